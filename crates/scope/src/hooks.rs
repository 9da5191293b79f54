//! Lifecycle hooks
//!
//! - thread exit: a `pthread` key destructor unwinds the stack of a thread
//!   that returns. Key destructors do not run on `exit`.
//! - process exit: an `atexit` handler unwinds the stack of the thread calling
//!   `exit`. It is the only exit-time unwind, so [`DeferConfig::exit_hook`]
//!   switches it off entirely.
//! - fork: a `pthread_atfork` child handler unwinds the stack the child
//!   inherited from the forking thread, so the child never runs those actions
//!   a second time later on.
//!
//! The fork child handler starts with whatever locks other threads of the
//! parent were holding, and those are never released in the child. The
//! runtime does not log on that path; actions still pending at a fork must
//! not log or allocate through locks either.
//!
//! The stack itself is never destroyed, so actions run by any hook can keep
//! deferring, pushing and popping. Every hook is registered at most once per
//! process. Without unix or with the `hooks` feature disabled, thread exit
//! falls back to a thread-local destructor and the process hooks are
//! unavailable.

use parking_lot::Once;
use tracing::debug;

use crate::config::DeferConfig;
use crate::error::OrAbort;
use crate::runtime;

static EXIT_HOOK: Once = Once::new();
static FORK_HOOK: Once = Once::new();

/// Install the process-exit hook if the configuration asks for it
pub(crate) fn install_process_hooks(config: &DeferConfig) {
    if config.exit_hook {
        EXIT_HOOK.call_once(|| {
            platform::register_exit_hook().or_abort();
            debug!(available = platform::AVAILABLE, "process exit hook installed");
        });
    }
}

/// Called when a thread pushes onto an empty stack
pub(crate) fn on_thread_activated() {
    platform::arm_thread_exit().or_abort();

    if runtime::config().fork_hook {
        FORK_HOOK.call_once(|| {
            platform::register_fork_hook().or_abort();
            debug!(available = platform::AVAILABLE, "fork hook installed");
        });
    }
}

/// Whether the process-exit hook is registered
pub fn exit_hook_installed() -> bool {
    platform::AVAILABLE && EXIT_HOOK.state().done()
}

/// Whether the fork hook is registered
pub fn fork_hook_installed() -> bool {
    platform::AVAILABLE && FORK_HOOK.state().done()
}

#[cfg(all(unix, feature = "hooks"))]
mod platform {
    use std::ffi::c_void;
    use std::ptr;

    use once_cell::sync::OnceCell;

    use crate::error::{DeferError, DeferResult};
    use crate::stack::{self, Teardown};

    pub(super) const AVAILABLE: bool = true;

    static THREAD_EXIT_KEY: OnceCell<libc::pthread_key_t> = OnceCell::new();

    extern "C" fn on_thread_exit(_: *mut c_void) {
        stack::unwind_current_thread(Teardown::ThreadExit);
    }

    extern "C" fn on_process_exit() {
        stack::unwind_current_thread(Teardown::ProcessExit);
    }

    extern "C" fn on_fork_child() {
        stack::unwind_current_thread(Teardown::ForkChild);
    }

    fn check(hook: &'static str, rc: libc::c_int) -> DeferResult<()> {
        if rc == 0 {
            Ok(())
        } else {
            Err(DeferError::hook_registration(hook, rc))
        }
    }

    /// Arm the thread-exit destructor for the calling thread
    ///
    /// Re-arming from inside the destructor makes the thread run it again.
    pub(super) fn arm_thread_exit() -> DeferResult<()> {
        let key = THREAD_EXIT_KEY.get_or_try_init(|| {
            let mut key: libc::pthread_key_t = 0;
            // SAFETY: `key` is a valid out-pointer; `on_thread_exit` never
            // unwinds across the FFI boundary.
            let rc = unsafe { libc::pthread_key_create(&mut key, Some(on_thread_exit)) };
            check("pthread_key_create", rc).map(|()| key)
        })?;

        // The destructor only runs for a non-null value; the value is unused.
        // SAFETY: the key was created above and is never deleted.
        let rc = unsafe { libc::pthread_setspecific(*key, ptr::dangling::<c_void>()) };
        check("pthread_setspecific", rc)
    }

    pub(super) fn register_exit_hook() -> DeferResult<()> {
        // SAFETY: `on_process_exit` is a plain `extern "C"` function that never
        // unwinds across the FFI boundary (a panic there aborts).
        check("atexit", unsafe { libc::atexit(on_process_exit) })
    }

    pub(super) fn register_fork_hook() -> DeferResult<()> {
        // SAFETY: only the child handler is registered; it runs on the single
        // thread that survives the fork.
        check("pthread_atfork", unsafe {
            libc::pthread_atfork(None, None, Some(on_fork_child))
        })
    }
}

#[cfg(not(all(unix, feature = "hooks")))]
mod platform {
    use crate::error::DeferResult;
    use crate::stack::{self, Teardown};

    pub(super) const AVAILABLE: bool = false;

    struct ThreadExitGuard;

    impl Drop for ThreadExitGuard {
        fn drop(&mut self) {
            stack::unwind_current_thread(Teardown::ThreadExit);
        }
    }

    thread_local! {
        static THREAD_EXIT: ThreadExitGuard = const { ThreadExitGuard };
    }

    pub(super) fn arm_thread_exit() -> DeferResult<()> {
        // Touching the guard registers its destructor. Inside that destructor
        // the access fails, and the running unwind already covers new scopes.
        let _ = THREAD_EXIT.try_with(|_| ());
        Ok(())
    }

    pub(super) fn register_exit_hook() -> DeferResult<()> {
        Ok(())
    }

    pub(super) fn register_fork_hook() -> DeferResult<()> {
        Ok(())
    }
}
