// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use futures::channel::mpsc;
use futures::executor::block_on;
use futures::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vermilion_supervisor::{kill_all_by_name, Error, Supervisor, SupervisorConfig};

const RUN: &str = "run";
const KILL_ALL: &str = "kill-all";

const PROGRAM: &str = "PROGRAM";
const ARGS: &str = "ARGS";
const NAME: &str = "NAME";
const SWEEP: &str = "sweep";
const NO_GLOBAL_CLEANUP: &str = "no-global-cleanup";
const DIR: &str = "dir";
const TIMEOUT: &str = "timeout";
const GRACE: &str = "grace";

const LOG_ENV: &str = "VERMILION_LOG";

trait SetupClapApp {
    fn setup_clap_app(self) -> Self;
}

impl<'a, 'b> SetupClapApp for App<'a, 'b> {
    fn setup_clap_app(self) -> Self {
        self.version(env!("CARGO_PKG_VERSION"))
            .author(env!("CARGO_PKG_AUTHORS"))
    }
}

fn number_arg(name: &'static str) -> Arg<'static, 'static> {
    Arg::with_name(name)
        .long(name)
        .value_name("NUMBER")
        .validator(|i| {
            i.parse::<u64>()
                .map(|_| ())
                .map_err(|_| "number was expected".to_string())
        })
        .takes_value(true)
}

fn run_sub_command() -> App<'static, 'static> {
    SubCommand::with_name(RUN)
        .about("supervise a program until it exits")
        .setting(AppSettings::TrailingVarArg)
        .arg(
            Arg::with_name(SWEEP)
                .long(KILL_ALL)
                .help("after stopping, kill every other instance of the executable"),
        )
        .arg(
            Arg::with_name(NO_GLOBAL_CLEANUP)
                .long(NO_GLOBAL_CLEANUP)
                .help("never kill processes by name, overrides --kill-all"),
        )
        .arg(
            Arg::with_name(DIR)
                .long(DIR)
                .value_name("DIR")
                .takes_value(true)
                .help("working directory for the program"),
        )
        .arg(number_arg(TIMEOUT).help("stop the program after this many seconds"))
        .arg(
            number_arg(GRACE)
                .default_value("5000")
                .help("milliseconds between interrupt and kill when stopping"),
        )
        .arg(
            Arg::with_name(PROGRAM)
                .required(true)
                .help("the executable to run"),
        )
        .arg(
            Arg::with_name(ARGS)
                .multiple(true)
                .help("arguments passed to the program"),
        )
}

fn kill_all_sub_command() -> App<'static, 'static> {
    SubCommand::with_name(KILL_ALL)
        .about("interrupt every process whose command line matches NAME")
        .arg(
            Arg::with_name(NAME)
                .required(true)
                .help("executable name to match"),
        )
}

fn main() -> Result<(), Error> {
    let args = App::new(env!("CARGO_PKG_NAME"))
        .setup_clap_app()
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .subcommand(run_sub_command().setup_clap_app())
        .subcommand(kill_all_sub_command().setup_clap_app())
        .get_matches();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.subcommand() {
        (RUN, Some(args)) => run(args),
        (KILL_ALL, Some(args)) => {
            let name = args.value_of(NAME).ok_or("NAME is required")?;
            kill_all_by_name(name, false)
        }
        ("", None) => {
            println!("command required");
            println!("{}", args.usage());
            std::process::exit(1);
        }
        (arg, _) => {
            println!("unexpected argument: {}", arg);
            println!("{}", args.usage());
            std::process::exit(2);
        }
    }
}

fn run(args: &ArgMatches<'_>) -> Result<(), Error> {
    let program = args.value_of(PROGRAM).ok_or("PROGRAM is required")?;
    let program_args: Vec<String> = args
        .values_of(ARGS)
        .map(|values| values.map(str::to_string).collect())
        .unwrap_or_default();
    let grace = parse_number(args, GRACE)?.map_or(Duration::from_secs(5), Duration::from_millis);
    let timeout = parse_number(args, TIMEOUT)?.map(Duration::from_secs);
    let kill_all = args.is_present(SWEEP);

    let (exit_tx, mut exit_rx) = mpsc::unbounded();
    let mut config = SupervisorConfig::new(program)
        .with_args(move || program_args.clone())
        .with_exit_channel(exit_tx)
        .with_logger(|output: &str| {
            for line in output.lines() {
                info!(target: "vermilion::child", "{}", line);
            }
        })
        .disable_global_cleanup(args.is_present(NO_GLOBAL_CLEANUP))
        .stop_timeout(grace);
    if let Some(dir) = args.value_of(DIR) {
        config = config.working_dir(dir);
    }

    let supervisor = Arc::new(Supervisor::new(config));
    supervisor.start()?;

    if let Some(timeout) = timeout {
        let supervisor = Arc::clone(&supervisor);
        thread::spawn(move || {
            thread::sleep(timeout);
            info!(?timeout, "timeout reached, stopping");
            if let Err(err) = supervisor.stop() {
                warn!(error = %err, "failed to stop program");
            }
        });
    }

    block_on(exit_rx.next());
    info!(program = %supervisor.config().program, "program exited");

    supervisor.stop_and_cleanup(kill_all)
}

fn parse_number(args: &ArgMatches<'_>, name: &str) -> Result<Option<u64>, Error> {
    match args.value_of(name) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| Error::from(format!("{} is not a number: {}", name, value))),
        None => Ok(None),
    }
}
