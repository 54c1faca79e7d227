// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::io::{self, Read};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ErrorKind;
use crate::procs::{self, Signaller, SupervisorConfig};
use crate::sink::OutputSink;
use crate::Error;

/// One spawned child process
///
/// Rules:
///   - stdout and stderr are both copied into the same sink
///   - a monitor thread owns the `Child` and is the only thing that waits on it
///   - signals go by pid, and never after the monitor has seen the exit
#[derive(Clone, Debug)]
pub struct ProcessHandle {
    pid: u32,
    exit: Arc<ExitState>,
}

#[derive(Debug, Default)]
struct ExitState {
    status: Mutex<Option<Exit>>,
    exited: Condvar,
}

#[derive(Clone, Copy, Debug)]
struct Exit {
    code: Option<i32>,
}

impl ExitState {
    fn mark(&self, code: Option<i32>) {
        *self.lock() = Some(Exit { code });
        self.exited.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, Option<Exit>> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ProcessHandle {
    /// Spawns the configured program, `on_exit` runs on the monitor thread once the child is reaped
    pub fn spawn<F>(
        config: &SupervisorConfig,
        sink: Arc<OutputSink>,
        on_exit: F,
    ) -> Result<Self, Error>
    where
        F: FnOnce(Option<i32>) + Send + 'static,
    {
        let args = (config.args)();

        let mut command = Command::new(&config.program);
        command
            .args(&args)
            .envs(config.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(ref dir) = config.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| ErrorKind::Spawn {
            program: config.program.clone(),
            source,
        })?;
        let pid = child.id();
        debug!(pid, program = %config.program, ?args, "spawned child");

        if let Err(err) = start_pumps(pid, &mut child, &sink) {
            child.kill().ok();
            child.wait().ok();
            return Err(err.into());
        }

        let exit = Arc::new(ExitState::default());
        let monitor_exit = Arc::clone(&exit);
        let monitor = thread::Builder::new()
            .name(format!("vermilion-wait-{}", pid))
            .spawn(move || {
                let code = match child.wait() {
                    Ok(status) => status.code(),
                    // someone else reaped it, it's gone either way
                    Err(ref e) if is_no_child(e) => None,
                    Err(e) => {
                        warn!(pid, error = %e, "failed to wait on child");
                        None
                    }
                };

                debug!(pid, ?code, "child exited");
                monitor_exit.mark(code);
                on_exit(code);
            });

        if let Err(err) = monitor {
            // the Child went down with the closure, only the pid is left
            procs::native().force_kill(pid).ok();
            return Err(err.into());
        }

        Ok(Self { pid, exit })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn has_exited(&self) -> bool {
        self.exit.lock().is_some()
    }

    /// The exit code, `None` while running or when ended by a signal
    pub fn exit_code(&self) -> Option<i32> {
        let exit = *self.exit.lock();
        exit.and_then(|exit| exit.code)
    }

    /// Blocks until the child exits or `timeout` elapses, returns true if it exited
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let status = self.exit.lock();
        let (status, _) = self
            .exit
            .exited
            .wait_timeout_while(status, timeout, |status| status.is_none())
            .unwrap_or_else(PoisonError::into_inner);

        status.is_some()
    }

    /// Blocks until the child exits
    pub fn wait(&self) {
        let status = self.exit.lock();
        let _status = self
            .exit
            .exited
            .wait_while(status, |status| status.is_none())
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Interrupts the child, killing it outright if the interrupt can't be delivered
    pub fn interrupt(&self, signaller: &dyn Signaller) -> Result<(), Error> {
        if self.has_exited() {
            return Ok(());
        }

        debug!(pid = self.pid, "interrupting child");
        if let Err(err) = signaller.interrupt(self.pid) {
            warn!(pid = self.pid, error = %err, "interrupt failed, killing");
            signaller.force_kill(self.pid)?;
        }

        Ok(())
    }

    /// Waits up to `grace` for the child to exit, then kills it and waits for that
    pub fn await_exit(&self, signaller: &dyn Signaller, grace: Duration) -> Result<(), Error> {
        if self.wait_timeout(grace) {
            return Ok(());
        }

        warn!(pid = self.pid, ?grace, "child ignored interrupt, killing");
        signaller.force_kill(self.pid)?;
        self.wait();

        Ok(())
    }
}

fn start_pumps(pid: u32, child: &mut Child, sink: &Arc<OutputSink>) -> io::Result<()> {
    if let Some(stdout) = child.stdout.take() {
        pump(pid, "stdout", stdout, Arc::clone(sink))?;
    }

    if let Some(stderr) = child.stderr.take() {
        pump(pid, "stderr", stderr, Arc::clone(sink))?;
    }

    Ok(())
}

fn pump<R>(pid: u32, stream: &'static str, mut reader: R, sink: Arc<OutputSink>) -> io::Result<()>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name(format!("vermilion-{}-{}", stream, pid))
        .spawn(move || {
            if let Err(e) = io::copy(&mut reader, &mut &*sink) {
                debug!(pid, stream, error = %e, "output pump stopped");
            }
        })
        .map(|_| ())
}

#[cfg(unix)]
fn is_no_child(err: &io::Error) -> bool {
    err.raw_os_error() == Some(nix::errno::Errno::ECHILD as i32)
}

#[cfg(not(unix))]
fn is_no_child(_err: &io::Error) -> bool {
    false
}
