//! Shared helpers for integration tests.
//!
//! Tests whose subject terminates the process re-execute the test binary
//! filtered down to themselves, with a marker variable set. The child takes the
//! terminating path; the parent inspects exit status and output.

#![allow(dead_code)]

use std::cell::RefCell;
use std::process::{Command, Output};
use std::rc::Rc;

const CHILD_MARKER: &str = "DEFER_SCOPE_ISOLATED_CHILD";

/// Shared, single-thread log that deferred actions append to
pub type Log = Rc<RefCell<Vec<String>>>;

pub fn log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

/// Build a niladic callback appending `label` to `log`
pub fn record(log: &Log, label: impl Into<String>) -> impl FnOnce() + 'static {
    let log = Rc::clone(log);
    let label = label.into();
    move || log.borrow_mut().push(label)
}

pub fn entries(log: &Log) -> Vec<String> {
    log.borrow().clone()
}

pub fn in_isolated_child() -> bool {
    std::env::var_os(CHILD_MARKER).is_some()
}

pub fn run_isolated(test_name: &str) -> Output {
    let exe = std::env::current_exe().expect("test binary path");
    Command::new(exe)
        .args([test_name, "--exact", "--nocapture", "--test-threads=1"])
        .env(CHILD_MARKER, "1")
        .output()
        .expect("spawn isolated test")
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

pub fn assert_aborted(output: &Output) {
    assert!(
        !output.status.success(),
        "child exited cleanly: {}",
        stdout(output)
    );

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(output.status.signal(), Some(libc::SIGABRT));
    }
}

/// Install a test-writer subscriber so `RUST_LOG=defer_scope=trace` shows the
/// runtime's events next to a failing test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
