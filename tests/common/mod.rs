//! Shared helpers for driving the `vermilion-toy` binary

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use vermilion_supervisor::{Error, Reap};

pub const TOY: &str = env!("CARGO_BIN_EXE_vermilion-toy");

/// Polls `check` until it holds or `timeout` passes
pub fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut check: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }

    check()
}

/// The toy under a name no other test uses, so a real sweep only hits this test's processes
pub struct UniqueToy {
    _dir: TempDir,
    pub path: PathBuf,
    pub name: String,
}

impl UniqueToy {
    pub fn new(tag: &str) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let name = format!("vermilion-toy-{}-{}", tag, std::process::id());
        let path = dir.path().join(&name);

        // a link rather than a copy, a freshly written executable can fail with ETXTBSY
        std::os::unix::fs::symlink(TOY, &path).expect("failed to link toy");

        Self {
            _dir: dir,
            path,
            name,
        }
    }

    pub fn program(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// Records sweeps instead of performing them
#[derive(Default)]
pub struct CountingReaper {
    calls: Mutex<Vec<(String, bool)>>,
}

impl CountingReaper {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<(String, bool)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Reap for CountingReaper {
    fn kill_all_by_name(&self, executable_name: &str, disable_global: bool) -> Result<(), Error> {
        self.calls
            .lock()
            .unwrap()
            .push((executable_name.to_string(), disable_global));
        Ok(())
    }
}

/// A stop may race the child's own exit, "no child processes" is the only acceptable complaint
pub fn assert_benign(result: Result<(), Error>) {
    if let Err(err) = result {
        assert!(
            err.to_string().contains("no child processes"),
            "unexpected error: {}",
            err
        );
    }
}
