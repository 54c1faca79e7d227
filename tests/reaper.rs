//! Integration tests for host-wide sweeps through `pgrep` and `kill(2)`

#![cfg(unix)]

mod common;

use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use common::{wait_until, UniqueToy};
use vermilion_supervisor::kill_all_by_name;
use vermilion_supervisor::procs::{PosixTable, ProcessTable};

fn spawn_stray(toy: &UniqueToy) -> Child {
    Command::new(&toy.path)
        .args(&["--linger-ms", "30000"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn toy")
}

fn exited(child: &mut Child) -> bool {
    wait_until(Duration::from_secs(5), || matches!(child.try_wait(), Ok(Some(_))))
}

fn cleanup(mut child: Child) {
    child.kill().ok();
    child.wait().ok();
}

/// Zero matches is success, not failure
#[test]
fn test_nonexistent_program() {
    kill_all_by_name("nonexistent_program_12345", false).expect("no matches is not an error");
}

/// With global cleanup disabled nothing is signalled, even a perfect match
#[test]
fn test_disabled_leaves_matches_alone() {
    let toy = UniqueToy::new("disabled");
    let mut stray = spawn_stray(&toy);

    kill_all_by_name(&toy.name, true).expect("disabled sweep must succeed");

    thread::sleep(Duration::from_millis(200));
    assert!(matches!(stray.try_wait(), Ok(None)), "disabled sweep killed a process");
    cleanup(stray);
}

/// Every matching instance is interrupted
#[test]
fn test_sweeps_all_instances() {
    let toy = UniqueToy::new("sweep");
    let mut first = spawn_stray(&toy);
    let mut second = spawn_stray(&toy);

    kill_all_by_name(&toy.name, false).expect("sweep failed");

    let first_gone = exited(&mut first);
    let second_gone = exited(&mut second);
    cleanup(first);
    cleanup(second);

    assert!(first_gone && second_gone, "an instance survived the sweep");
}

/// An empty name would match everything, so it's refused outright
#[test]
fn test_empty_name_refused() {
    assert!(kill_all_by_name("", false).is_err());
    assert!(kill_all_by_name("  ", false).is_err());
}

/// A sweep for this test binary's own name finds the runner, and leaves it alone
#[test]
fn test_sweep_spares_runner() {
    let exe = std::env::current_exe().expect("no current exe");
    let name = exe
        .file_name()
        .expect("exe has a file name")
        .to_string_lossy()
        .into_owned();

    let found = PosixTable.find_matching(&name).expect("search failed");
    let own_pid = std::process::id().to_string();
    assert!(found.contains(&own_pid), "{} not matched by {:?}", own_pid, found);

    kill_all_by_name(&name, false).expect("sweep over the runner failed");

    // still here, and an interrupt would have ended us by now
    thread::sleep(Duration::from_millis(200));
    assert!(PosixTable
        .find_matching(&name)
        .expect("search failed")
        .contains(&own_pid));
}
