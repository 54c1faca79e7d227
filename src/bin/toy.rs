// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A throwaway program for exercising the supervisor

use std::io::{self, Write};
use std::thread;
use std::time::Duration;

use clap::{App, Arg, ArgMatches};

const LINES: &str = "lines";
const INTERVAL_MS: &str = "interval-ms";
const LINGER_MS: &str = "linger-ms";
const IGNORE_INTERRUPT: &str = "ignore-interrupt";
const PRINT_CWD: &str = "print-cwd";
const PRINT_ENV: &str = "print-env";
const EXIT_CODE: &str = "exit-code";

fn number_arg(name: &'static str, default: &'static str, help: &'static str) -> Arg<'static, 'static> {
    Arg::with_name(name)
        .long(name)
        .value_name("NUMBER")
        .default_value(default)
        .validator(|v| v.parse::<u64>().map(|_| ()).map_err(|_| "number was expected".to_string()))
        .help(help)
        .takes_value(true)
}

fn number(args: &ArgMatches<'_>, name: &str) -> u64 {
    // validated and defaulted by clap
    args.value_of(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or_default()
}

fn main() -> io::Result<()> {
    let args = App::new("vermilion-toy")
        .version(env!("CARGO_PKG_VERSION"))
        .about("prints, lingers and exits, for exercising vermilion")
        .arg(number_arg(LINES, "1", "lines to print to stdout"))
        .arg(number_arg(INTERVAL_MS, "10", "pause between lines"))
        .arg(number_arg(LINGER_MS, "0", "time to stay alive after printing"))
        .arg(number_arg(EXIT_CODE, "0", "status to exit with"))
        .arg(
            Arg::with_name(IGNORE_INTERRUPT)
                .long(IGNORE_INTERRUPT)
                .help("ignore SIGINT, only a kill will stop it"),
        )
        .arg(
            Arg::with_name(PRINT_CWD)
                .long(PRINT_CWD)
                .help("print the working directory"),
        )
        .arg(
            Arg::with_name(PRINT_ENV)
                .long(PRINT_ENV)
                .value_name("KEY")
                .takes_value(true)
                .help("print the value of an environment variable"),
        )
        .get_matches();

    if args.is_present(IGNORE_INTERRUPT) {
        ignore_interrupt()?;
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();

    if args.is_present(PRINT_CWD) {
        writeln!(out, "cwd={}", std::env::current_dir()?.display())?;
    }

    if let Some(key) = args.value_of(PRINT_ENV) {
        writeln!(out, "{}={}", key, std::env::var(key).unwrap_or_default())?;
    }

    let interval = Duration::from_millis(number(&args, INTERVAL_MS));
    for i in 0..number(&args, LINES) {
        writeln!(out, "tick {}", i)?;
        out.flush()?;
        thread::sleep(interval);
    }
    drop(out);

    eprintln!("toy done");
    thread::sleep(Duration::from_millis(number(&args, LINGER_MS)));

    std::process::exit(number(&args, EXIT_CODE) as i32)
}

#[cfg(unix)]
fn ignore_interrupt() -> io::Result<()> {
    use nix::sys::signal::{signal, SigHandler, Signal};

    // SigIgn installs no handler code, nothing runs in signal context
    unsafe { signal(Signal::SIGINT, SigHandler::SigIgn) }
        .map(|_| ())
        .map_err(io::Error::from)
}

#[cfg(not(unix))]
fn ignore_interrupt() -> io::Result<()> {
    Ok(())
}
