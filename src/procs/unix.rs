// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::convert::TryFrom;
use std::process::Command;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::trace;

use crate::error::ErrorKind;
use crate::procs::{ProcessTable, Signaller};
use crate::Error;

/// pgrep's exit status when nothing matched
const PGREP_NO_MATCH: i32 = 1;

/// `pgrep -f` for lookup and `kill(2)` for delivery
#[derive(Clone, Copy, Debug, Default)]
pub struct PosixTable;

impl Signaller for PosixTable {
    fn interrupt(&self, pid: u32) -> Result<(), Error> {
        send(pid, Signal::SIGINT)
    }

    fn force_kill(&self, pid: u32) -> Result<(), Error> {
        send(pid, Signal::SIGKILL)
    }
}

impl ProcessTable for PosixTable {
    fn find_matching(&self, name: &str) -> Result<Vec<String>, Error> {
        let output = Command::new("pgrep")
            .arg("-f")
            .arg(name)
            .output()
            .map_err(|e| ErrorKind::Search {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            return Ok(stdout.split_whitespace().map(str::to_string).collect());
        }

        match output.status.code() {
            Some(PGREP_NO_MATCH) => Ok(Vec::new()),
            _ => Err(ErrorKind::Search {
                name: name.to_string(),
                reason: format!(
                    "pgrep {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            }
            .into()),
        }
    }
}

fn send(pid: u32, signal: Signal) -> Result<(), Error> {
    // 0 and anything that wraps negative would address a process group
    let raw = match i32::try_from(pid) {
        Ok(raw) if raw > 0 => raw,
        _ => {
            return Err(ErrorKind::Signal {
                pid,
                reason: "not a single process id".to_string(),
            }
            .into())
        }
    };

    trace!(pid, ?signal, "sending signal");
    match kill(Pid::from_raw(raw), signal) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => {
            trace!(pid, "process already gone");
            Ok(())
        }
        Err(errno) => Err(ErrorKind::Signal {
            pid,
            reason: format!("{}: {}", signal, errno.desc()),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refuses_process_groups() {
        let table = PosixTable;

        assert!(matches!(
            table.interrupt(0).unwrap_err().kind(),
            ErrorKind::Signal { pid: 0, .. }
        ));
        assert!(table.force_kill(u32::MAX).is_err());
    }

    #[test]
    fn test_find_nothing() {
        let found = PosixTable
            .find_matching("vermilion_no_such_program_98765")
            .expect("zero matches is not an error");

        // the pattern appears in no command line but pgrep's own, which it skips
        assert!(found.is_empty());
    }
}
