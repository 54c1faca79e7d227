// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

mod handle;
mod reaper;
mod supervisor;
#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

pub use handle::ProcessHandle;
pub use reaper::{kill_all_by_name, sweep, Reap, Reaper, SystemReaper};
pub use supervisor::{executable_name, ArgsFn, Supervisor, SupervisorConfig};
#[cfg(unix)]
pub use unix::PosixTable;
#[cfg(windows)]
pub use windows::WindowsTable;

use crate::Error;

/// Delivers termination requests to a single process
///
/// A target that is already gone counts as success, the process table is shared
///   with the rest of the host and can change between lookup and delivery.
pub trait Signaller: Send + Sync {
    /// Graceful request, SIGINT on unix
    fn interrupt(&self, pid: u32) -> Result<(), Error>;

    /// Unconditional kill, SIGKILL on unix
    fn force_kill(&self, pid: u32) -> Result<(), Error>;
}

/// A host process table that can be searched by command line
pub trait ProcessTable: Signaller {
    /// Raw pid tokens whose command line matches `name`, zero matches is `Ok(vec![])`
    fn find_matching(&self, name: &str) -> Result<Vec<String>, Error>;
}

#[cfg(unix)]
static NATIVE: PosixTable = PosixTable;
#[cfg(windows)]
static NATIVE: WindowsTable = WindowsTable;

/// The signaller for the host platform
pub fn native() -> &'static dyn Signaller {
    &NATIVE
}

/// Pid of the process that launched this one, if the platform reports it
pub(crate) fn parent_pid() -> Option<u32> {
    #[cfg(unix)]
    {
        Some(nix::unistd::getppid().as_raw() as u32)
    }

    #[cfg(not(unix))]
    {
        None
    }
}
