// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Receives every chunk written to a forwarding [`OutputSink`]
pub type LogFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Accumulates the combined stdout/stderr of a child.
///
/// Rules:
///  - a write appends and forwards inside one critical section, so the forwarded
///    sequence always matches the order of the buffer
///  - readers see a consistent prefix of everything written so far
///  - unbounded for the life of the sink
pub struct OutputSink {
    buffer: Mutex<Vec<u8>>,
    forward: Option<LogFn>,
}

impl OutputSink {
    /// A sink that only buffers
    pub fn new() -> Self {
        Self {
            buffer: Mutex::new(Vec::new()),
            forward: None,
        }
    }

    /// A sink that buffers and also hands each write to `forward`
    pub fn with_forward(forward: LogFn) -> Self {
        Self {
            buffer: Mutex::new(Vec::new()),
            forward: Some(forward),
        }
    }

    pub fn is_forwarding(&self) -> bool {
        self.forward.is_some()
    }

    /// Everything written so far, lossily decoded as UTF-8
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.lock()).into_owned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn append(&self, buf: &[u8]) -> usize {
        let mut buffer = self.lock();
        buffer.extend_from_slice(buf);

        // forwarded while still holding the buffer
        if let Some(ref forward) = self.forward {
            forward(&String::from_utf8_lossy(buf));
        }

        buf.len()
    }

    // a panicking forwarder must not wedge the child's output pumps
    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for OutputSink {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSink")
            .field("len", &self.len())
            .field("forwarding", &self.is_forwarding())
            .finish()
    }
}

impl io::Write for &OutputSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.append(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Write for OutputSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.append(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::thread;

    use super::*;

    fn recording_sink() -> (Arc<OutputSink>, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let forward: LogFn = Arc::new(move |msg: &str| {
            recorder.lock().unwrap().push(msg.to_string());
        });

        (Arc::new(OutputSink::with_forward(forward)), seen)
    }

    #[test]
    fn test_buffer_only() {
        let sink = OutputSink::new();
        assert!(sink.is_empty());
        assert!(!sink.is_forwarding());

        (&sink).write_all(b"hello ").unwrap();
        (&sink).write_all(b"world").unwrap();

        assert_eq!(sink.contents(), "hello world");
        assert_eq!(sink.len(), 11);
    }

    #[test]
    fn test_forward_receives_each_write() {
        let (sink, seen) = recording_sink();

        let mut writer = &*sink;
        writer.write_all(b"first\n").unwrap();
        writer.write_all(b"second\n").unwrap();

        assert_eq!(sink.contents(), "first\nsecond\n");
        assert_eq!(*seen.lock().unwrap(), vec!["first\n", "second\n"]);
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        let sink = OutputSink::new();
        (&sink).write_all(&[b'a', 0xff, b'b']).unwrap();

        assert_eq!(sink.contents(), "a\u{fffd}b");
        assert_eq!(sink.len(), 3);
    }

    #[test]
    fn test_concurrent_writes_are_not_torn() {
        const WRITERS: usize = 8;
        const WRITES: usize = 200;

        let (sink, seen) = recording_sink();

        let threads = (0..WRITERS)
            .map(|w| {
                let sink = Arc::clone(&sink);
                thread::spawn(move || {
                    for i in 0..WRITES {
                        let chunk = format!("<{}:{}>", w, i);
                        (&*sink).write_all(chunk.as_bytes()).unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();

        // reads while writes are in flight must see whole chunks only
        for _ in 0..50 {
            let snapshot = sink.contents();
            assert_eq!(snapshot.matches('<').count(), snapshot.matches('>').count());
        }

        for t in threads {
            t.join().unwrap();
        }

        let contents = sink.contents();
        let forwarded = seen.lock().unwrap().concat();
        assert_eq!(contents, forwarded);
        assert_eq!(seen.lock().unwrap().len(), WRITERS * WRITES);

        for w in 0..WRITERS {
            for i in 0..WRITES {
                assert!(contents.contains(&format!("<{}:{}>", w, i)));
            }
        }
    }
}
