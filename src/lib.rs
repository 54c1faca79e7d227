// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Supervise a single child program.
//!
//! A [`Supervisor`] starts the program, captures its combined output into an
//! [`OutputSink`], and stops it on request. Stopping can also sweep every other
//! instance of the same executable off the host through the [`Reap`] seam, see
//! [`kill_all_by_name`].

mod error;
pub mod procs;
pub mod sink;

pub use error::{Error, ErrorKind};
pub use procs::{kill_all_by_name, Reap, Supervisor, SupervisorConfig};
pub use sink::{LogFn, OutputSink};
