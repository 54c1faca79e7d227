// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::process::Command;

use tracing::trace;

use crate::error::ErrorKind;
use crate::procs::Signaller;
use crate::Error;

/// `taskkill` for delivery, by pid or by image name
#[derive(Clone, Copy, Debug, Default)]
pub struct WindowsTable;

impl Signaller for WindowsTable {
    fn interrupt(&self, pid: u32) -> Result<(), Error> {
        taskkill(&["/PID", &pid.to_string()])
            .map_err(|reason| ErrorKind::Signal { pid, reason }.into())
    }

    fn force_kill(&self, pid: u32) -> Result<(), Error> {
        taskkill(&["/F", "/PID", &pid.to_string()])
            .map_err(|reason| ErrorKind::Signal { pid, reason }.into())
    }
}

/// Force kills every process running the image `executable_name`
pub fn kill_image(executable_name: &str) -> Result<(), Error> {
    taskkill(&["/F", "/IM", executable_name]).map_err(|reason| {
        Error::from(format!(
            "failed to kill processes {}: {}",
            executable_name, reason
        ))
    })
}

fn taskkill(args: &[&str]) -> Result<(), String> {
    trace!(?args, "taskkill");
    let output = Command::new("taskkill")
        .args(args)
        .output()
        .map_err(|e| e.to_string())?;

    if output.status.success() {
        return Ok(());
    }

    // nothing left to kill
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    if text.contains("not found") {
        return Ok(());
    }

    Err(format!("{}, output: {}", output.status, text.trim()))
}
