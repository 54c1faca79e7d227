// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use tracing::{debug, warn};

use crate::error::ErrorKind;
use crate::procs::{self, ProcessTable};
use crate::Error;

/// Terminates every process on the host running a given executable
///
/// Rules:
///   - `disable_global` short circuits before anything touches the process table
///   - never signals this process or its parent (the shell or IDE that launched it)
///   - best effort, a bad entry never stops the rest of the sweep
pub trait Reap: Send + Sync {
    fn kill_all_by_name(&self, executable_name: &str, disable_global: bool) -> Result<(), Error>;
}

/// Reaps through the host's native mechanism, see [`kill_all_by_name`]
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemReaper;

impl Reap for SystemReaper {
    fn kill_all_by_name(&self, executable_name: &str, disable_global: bool) -> Result<(), Error> {
        kill_all_by_name(executable_name, disable_global)
    }
}

/// Reaps by sweeping a specific [`ProcessTable`]
#[derive(Clone, Debug, Default)]
pub struct Reaper<T> {
    table: T,
}

impl<T: ProcessTable> Reaper<T> {
    pub fn new(table: T) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &T {
        &self.table
    }

    pub fn kill_all_by_name(&self, executable_name: &str, disable_global: bool) -> Result<(), Error> {
        if disable_global {
            debug!(executable_name, "global cleanup disabled");
            return Ok(());
        }

        check_name(executable_name)?;
        sweep(&self.table, executable_name)
    }
}

impl<T: ProcessTable> Reap for Reaper<T> {
    fn kill_all_by_name(&self, executable_name: &str, disable_global: bool) -> Result<(), Error> {
        Reaper::kill_all_by_name(self, executable_name, disable_global)
    }
}

/// Kills all running processes that match `executable_name`.
///
/// On unix the command lines are searched with `pgrep -f`, every match other than this
///   process and its parent is interrupted, and killed outright only if the interrupt
///   could not be delivered. On Windows the image name is force killed with `taskkill`.
pub fn kill_all_by_name(executable_name: &str, disable_global: bool) -> Result<(), Error> {
    if disable_global {
        debug!(executable_name, "global cleanup disabled");
        return Ok(());
    }

    check_name(executable_name)?;

    #[cfg(windows)]
    {
        procs::windows::kill_image(executable_name)
    }

    #[cfg(unix)]
    {
        sweep(&procs::PosixTable, executable_name)
    }
}

/// One pass over `table`, signalling everything that matches `executable_name`
pub fn sweep<T: ProcessTable + ?Sized>(table: &T, executable_name: &str) -> Result<(), Error> {
    let candidates = table.find_matching(executable_name)?;
    debug!(executable_name, count = candidates.len(), "found matching processes");

    let own_pid = std::process::id();
    let parent_pid = procs::parent_pid();
    let mut failures = Vec::new();

    for candidate in candidates {
        let pid = match candidate.trim().parse::<u32>() {
            Ok(pid) => pid,
            Err(e) => {
                failures.push(format!("invalid PID {}: {}", candidate, e));
                continue;
            }
        };

        if pid == own_pid || Some(pid) == parent_pid {
            debug!(pid, "skipping self or parent");
            continue;
        }

        // delivery failure escalates, an undelivered interrupt can't stop anything
        if let Err(err) = table.interrupt(pid) {
            warn!(pid, error = %err, "interrupt failed, killing");
            if let Err(err) = table.force_kill(pid) {
                failures.push(format!("failed to kill process {}: {}", pid, err));
            }
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(ErrorKind::Sweep(failures).into())
    }
}

fn check_name(executable_name: &str) -> Result<(), Error> {
    // an empty pattern matches every command line on the host
    if executable_name.trim().is_empty() {
        return Err(ErrorKind::InvalidName(executable_name.to_string()).into());
    }

    Ok(())
}
