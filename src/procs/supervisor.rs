// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures::channel::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::procs::{self, ProcessHandle, Reap, SystemReaper};
use crate::sink::{LogFn, OutputSink};
use crate::Error;

/// Produces the arguments for each run, called fresh on every start
pub type ArgsFn = Arc<dyn Fn() -> Vec<String> + Send + Sync>;

const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// What to run and how to clean up after it
#[derive(Clone)]
pub struct SupervisorConfig {
    /// eg: "server/main.exe"
    pub program: String,
    pub args: ArgsFn,
    /// Receives `true` each time a started child exits
    pub exit_tx: Option<UnboundedSender<bool>>,
    /// Receives the child's output as it arrives
    pub logger: Option<LogFn>,
    /// `stop` also sweeps every instance of the executable from the host
    pub kill_all_on_stop: bool,
    /// Turns every sweep into a no-op, overrides `kill_all_on_stop`
    pub disable_global_cleanup: bool,
    pub working_dir: Option<PathBuf>,
    /// Added to the inherited environment
    pub env: Vec<(String, String)>,
    /// How long `stop` waits after the interrupt before killing
    pub stop_timeout: Duration,
}

impl SupervisorConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Arc::new(Vec::new),
            exit_tx: None,
            logger: None,
            kill_all_on_stop: false,
            disable_global_cleanup: false,
            working_dir: None,
            env: Vec::new(),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    pub fn with_args<F>(mut self, args: F) -> Self
    where
        F: Fn() -> Vec<String> + Send + Sync + 'static,
    {
        self.args = Arc::new(args);
        self
    }

    pub fn with_exit_channel(mut self, exit_tx: UnboundedSender<bool>) -> Self {
        self.exit_tx = Some(exit_tx);
        self
    }

    pub fn with_logger<F>(mut self, logger: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.logger = Some(Arc::new(logger));
        self
    }

    pub fn kill_all_on_stop(mut self, kill_all_on_stop: bool) -> Self {
        self.kill_all_on_stop = kill_all_on_stop;
        self
    }

    pub fn disable_global_cleanup(mut self, disable_global_cleanup: bool) -> Self {
        self.disable_global_cleanup = disable_global_cleanup;
        self
    }

    pub fn working_dir(mut self, working_dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(working_dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }
}

impl fmt::Debug for SupervisorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisorConfig")
            .field("program", &self.program)
            .field("exit_tx", &self.exit_tx.is_some())
            .field("logger", &self.logger.is_some())
            .field("kill_all_on_stop", &self.kill_all_on_stop)
            .field("disable_global_cleanup", &self.disable_global_cleanup)
            .field("working_dir", &self.working_dir)
            .field("env", &self.env)
            .field("stop_timeout", &self.stop_timeout)
            .finish()
    }
}

/// Launch and monitor one program
///
/// Rules:
///   - every operation takes the state lock exactly once, and only `*_locked`
///     variants run under it
///   - the lock guards bookkeeping and the checks that gate spawn and interrupt,
///     waiting for an exit and sweeping the host happen after it is released
///   - output is captured independently of this lock
pub struct Supervisor {
    config: SupervisorConfig,
    state: Arc<RwLock<State>>,
    sink: Arc<OutputSink>,
    reaper: Arc<dyn Reap>,
}

#[derive(Debug, Default)]
struct State {
    handle: Option<ProcessHandle>,
    is_running: bool,
    // the current handle has been reaped, its pid must not be signalled
    has_waited: bool,
    // bumped per start, so a stale monitor can't clear a newer run
    generation: u64,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self::with_reaper(config, Arc::new(SystemReaper))
    }

    /// Sweeps go through `reaper` instead of the host's process table
    pub fn with_reaper(config: SupervisorConfig, reaper: Arc<dyn Reap>) -> Self {
        let sink = match config.logger {
            Some(ref logger) => OutputSink::with_forward(Arc::clone(logger)),
            None => OutputSink::new(),
        };

        Self {
            config,
            state: Arc::new(RwLock::new(State::default())),
            sink: Arc::new(sink),
            reaper,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Spawns the program, does nothing if it is already running
    pub fn start(&self) -> Result<(), Error> {
        let mut state = write(&self.state);
        if state.is_running {
            debug!(program = %self.config.program, "already running");
            return Ok(());
        }

        let generation = state.generation.wrapping_add(1);
        let on_exit = {
            let state = Arc::downgrade(&self.state);
            let exit_tx = self.config.exit_tx.clone();

            move |_code: Option<i32>| {
                if let Some(state) = state.upgrade() {
                    let mut state = write(&state);
                    if state.generation == generation {
                        state.is_running = false;
                        state.has_waited = true;
                    }
                }

                if let Some(exit_tx) = exit_tx {
                    // nobody listening is fine
                    exit_tx.unbounded_send(true).ok();
                }
            }
        };

        let handle = ProcessHandle::spawn(&self.config, Arc::clone(&self.sink), on_exit)?;
        info!(pid = handle.pid(), program = %self.config.program, "started program");

        state.generation = generation;
        state.handle = Some(handle);
        state.is_running = true;
        state.has_waited = false;

        Ok(())
    }

    /// Stops the program, and sweeps the host too if `kill_all_on_stop` is set
    pub fn stop(&self) -> Result<(), Error> {
        self.stop_and_cleanup(self.config.kill_all_on_stop)
    }

    /// Stops the program, then optionally kills every other instance of the executable.
    ///
    /// The result is that of stopping this supervisor's own child, a failed sweep is only logged.
    pub fn stop_and_cleanup(&self, kill_all: bool) -> Result<(), Error> {
        let stopping = {
            let mut state = write(&self.state);
            self.begin_stop_locked(&mut state)
        };

        let result = self.finish_stop(stopping);

        if kill_all && !self.config.program.is_empty() {
            let name = executable_name(&self.config.program);
            if let Err(err) = self
                .reaper
                .kill_all_by_name(name, self.config.disable_global_cleanup)
            {
                warn!(executable = name, error = %err, "failed to clean up all instances");
            }
        }

        result
    }

    pub fn is_running(&self) -> bool {
        read(&self.state).is_running
    }

    /// Pid of the running child
    pub fn pid(&self) -> Option<u32> {
        let state = read(&self.state);
        if !state.is_running {
            return None;
        }

        state.handle.as_ref().map(ProcessHandle::pid)
    }

    /// Everything the child has written to stdout and stderr
    pub fn output(&self) -> String {
        self.sink.contents()
    }

    pub fn sink(&self) -> &Arc<OutputSink> {
        &self.sink
    }

    // bookkeeping and the interrupt only, waiting for the exit happens after the guard is dropped
    fn begin_stop_locked(&self, state: &mut State) -> Result<Option<ProcessHandle>, Error> {
        if !state.is_running {
            return Ok(None);
        }
        state.is_running = false;

        let handle = match state.handle {
            Some(ref handle) if !state.has_waited => handle.clone(),
            _ => return Ok(None),
        };

        handle.interrupt(procs::native())?;
        Ok(Some(handle))
    }

    fn finish_stop(&self, stopping: Result<Option<ProcessHandle>, Error>) -> Result<(), Error> {
        let handle = match stopping? {
            Some(handle) => handle,
            None => return Ok(()),
        };

        handle.await_exit(procs::native(), self.config.stop_timeout)?;
        info!(pid = handle.pid(), exit_code = ?handle.exit_code(), "stopped program");

        Ok(())
    }
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("sink", &self.sink)
            .finish()
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        let stopping = {
            let mut state = write(&self.state);
            self.begin_stop_locked(&mut state)
        };

        if let Err(err) = self.finish_stop(stopping) {
            warn!(program = %self.config.program, error = %err, "failed to stop program on drop");
        }
    }
}

/// The bare executable name of `path`, accepts both `/` and `\` as separators on every host
pub fn executable_name(path: &str) -> &str {
    path.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(path)
}

fn write(state: &RwLock<State>) -> RwLockWriteGuard<'_, State> {
    state.write().unwrap_or_else(PoisonError::into_inner)
}

fn read(state: &RwLock<State>) -> RwLockReadGuard<'_, State> {
    state.read().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_executable_name() {
        assert_eq!(executable_name("server/main.exe"), "main.exe");
        assert_eq!(executable_name("/usr/local/bin/app"), "app");
        assert_eq!(executable_name(r"C:\build\server.exe"), "server.exe");
        assert_eq!(executable_name(r"mixed/dir\app"), "app");
        assert_eq!(executable_name("app"), "app");
        assert_eq!(executable_name("dir/"), "");
    }

    #[test]
    fn test_defaults() {
        let supervisor = Supervisor::new(SupervisorConfig::new("app"));
        let config = supervisor.config();

        assert_eq!(config.program, "app");
        assert!((config.args)().is_empty());
        assert!(!config.kill_all_on_stop);
        assert!(!config.disable_global_cleanup);
        assert_eq!(config.stop_timeout, DEFAULT_STOP_TIMEOUT);
    }

    #[test]
    fn test_sink_follows_logger() {
        let plain = Supervisor::new(SupervisorConfig::new("app"));
        assert!(!plain.sink().is_forwarding());

        let logged = Supervisor::new(SupervisorConfig::new("app").with_logger(|_: &str| ()));
        assert!(logged.sink().is_forwarding());
    }

    #[test]
    fn test_stop_before_start() {
        let supervisor = Supervisor::new(SupervisorConfig::new("app"));

        assert!(supervisor.stop().is_ok());
        assert!(supervisor.stop_and_cleanup(false).is_ok());
        assert!(!supervisor.is_running());
        assert_eq!(supervisor.pid(), None);
    }

    #[test]
    fn test_spawn_failure() {
        let supervisor = Supervisor::new(SupervisorConfig::new(
            "/nonexistent/vermilion/no_such_program",
        ));

        let err = supervisor.start().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Spawn { .. }));
        assert!(!supervisor.is_running());
        assert!(supervisor.stop().is_ok());
    }
}
