//! Helpers for tests whose subject terminates the process.
//!
//! The test re-executes its own binary filtered down to itself, with a marker
//! variable set; the child takes the fatal path while the parent inspects the
//! exit status and captured output.

use std::process::{Command, Output};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

const CHILD_MARKER: &str = "DEFER_SCOPE_ISOLATED_CHILD";

pub(crate) fn in_isolated_child() -> bool {
    std::env::var_os(CHILD_MARKER).is_some()
}

pub(crate) fn run_isolated(test_name: &str) -> Output {
    let exe = std::env::current_exe().expect("test binary path");
    Command::new(exe)
        .args([test_name, "--exact", "--nocapture", "--test-threads=1"])
        .env(CHILD_MARKER, "1")
        .output()
        .expect("spawn isolated test")
}

pub(crate) fn assert_aborted(output: &Output) {
    assert!(
        !output.status.success(),
        "child exited cleanly: {}",
        String::from_utf8_lossy(&output.stdout)
    );

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(output.status.signal(), Some(libc::SIGABRT));
    }
}

/// Layer counting every event it sees
#[derive(Debug, Clone, Default)]
pub(crate) struct EventCount(Arc<AtomicUsize>);

impl EventCount {
    /// Run `f` with this layer as the thread's only subscriber
    pub(crate) fn capture<R>(&self, f: impl FnOnce() -> R) -> R {
        let subscriber = tracing_subscriber::registry().with(self.clone());
        tracing::subscriber::with_default(subscriber, f)
    }

    pub(crate) fn count(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

impl<S: Subscriber> Layer<S> for EventCount {
    fn on_event(&self, _event: &Event<'_>, _ctx: Context<'_, S>) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}
