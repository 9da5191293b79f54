#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rust_2018_idioms)]
#![allow(unsafe_code)] // atexit / pthread_atfork registration
//! # defer-scope
//!
//! Ordered, stack-structured deferred cleanup.
//!
//! Code registers *deferred actions* (a callback, optionally with an argument)
//! against a scope; when the scope ends, its actions run in strict reverse
//! registration order. Scopes nest per thread, and a single pop can unwind
//! several levels at once down to a chosen ancestor.
//!
//! Scopes end through:
//! - [`end`] / [`pop`] called explicitly, or a [`ScopeGuard`] being dropped
//!   (normal return, `?`, panic)
//! - the thread exiting (a `pthread` key destructor, or a thread-local
//!   destructor without the `hooks` feature)
//! - the process exiting normally (`atexit` hook, feature `hooks`, unix)
//! - `fork` (the child unwinds what it inherited, feature `hooks`, unix)
//!
//! ## Quick Start
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let log = Rc::new(RefCell::new(Vec::new()));
//!
//! defer_scope::begin();
//! for n in 1..=4 {
//!     let log = Rc::clone(&log);
//!     defer_scope::defer(move |n| log.borrow_mut().push(n), n);
//! }
//! defer_scope::end();
//!
//! assert_eq!(*log.borrow(), vec![4, 3, 2, 1]);
//! ```
//!
//! ## Features
//!
//! - `hooks` (default): process exit and fork integration through `libc`
//! - `serde`: (de)serialization of [`DeferConfig`]
//!
//! ## Errors
//!
//! Misuse of the stack (popping with no scope, naming a scope that is not on
//! the stack) and corrupted actions are programming errors: they are logged and
//! the process aborts. [`try_pop`] and [`try_end`] return recoverable misuse as
//! a [`DeferError`] instead.

// Error types
pub mod error;

// Core modules
pub mod action;
pub mod config;
pub mod guard;
pub mod hooks;
pub mod runtime;
pub mod scope;
pub mod stack;
pub mod stats;

#[cfg(test)]
mod testing;

pub use crate::action::ActionKind;
pub use crate::config::{DeferConfig, PanicPolicy};
pub use crate::error::{DeferError, DeferResult, OrAbort, Result, fatal};
pub use crate::guard::{ScopeGuard, with_scope};
pub use crate::hooks::{exit_hook_installed, fork_hook_installed};
pub use crate::runtime::{config, init, init_with, is_initialized};
pub use crate::scope::{Scope, ScopeId};
pub use crate::stack::PopTarget;
pub use crate::stats::StackStats;

use crate::action::DeferredAction;

/// Convenient re-exports of commonly used types and functions.
pub mod prelude {
    pub use crate::config::{DeferConfig, PanicPolicy};
    pub use crate::error::{DeferError, DeferResult};
    pub use crate::guard::{ScopeGuard, with_scope};
    pub use crate::scope::{Scope, ScopeId};
    pub use crate::stack::PopTarget;
    pub use crate::{begin, defer, defer_noarg, defer_on, defer_on_noarg, end, pop};
}

// ============================================================================
// Stack operations
// ============================================================================

/// Begin a new scope on the calling thread
pub fn begin() -> ScopeId {
    push(None)
}

/// End the innermost scope, running its actions
///
/// Aborts if the thread has no active scope.
pub fn end() {
    pop(PopTarget::Innermost);
}

/// Like [`end`], but report a missing scope instead of aborting
pub fn try_end() -> DeferResult<()> {
    try_pop(PopTarget::Innermost)
}

/// Push a scope onto the calling thread's stack
///
/// `None` pushes a fresh scope; a detached [`Scope`] keeps its pending actions
/// and from now on is unwound with the stack.
pub fn push(scope: Option<Scope>) -> ScopeId {
    stack::push(scope)
}

/// Unwind the calling thread's stack down to `target`
///
/// Accepts a [`PopTarget`] or a [`ScopeId`] (pop that scope and everything
/// pushed after it). Aborts if the thread has no active scope or the target is
/// not on this thread's stack.
///
/// # Examples
///
/// ```
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// let log = Rc::new(RefCell::new(Vec::new()));
/// let outer = defer_scope::begin();
/// for label in ["outer", "middle", "inner"] {
///     if label != "outer" {
///         defer_scope::begin();
///     }
///     let log = Rc::clone(&log);
///     defer_scope::defer_noarg(move || log.borrow_mut().push(label));
/// }
///
/// defer_scope::pop(outer);
/// assert_eq!(*log.borrow(), vec!["inner", "middle", "outer"]);
/// ```
pub fn pop(target: impl Into<PopTarget>) {
    stack::pop(target.into()).or_abort();
}

/// Like [`pop`], but return stack misuse as an error
///
/// Corruption is still fatal.
pub fn try_pop(target: impl Into<PopTarget>) -> DeferResult<()> {
    match stack::pop(target.into()) {
        Err(err) if err.is_fatal() => fatal(&err),
        result => result,
    }
}

/// Unwind every scope of the calling thread
pub fn pop_all() {
    pop(PopTarget::All);
}

/// Run the actions of a scope on the stack without ending it
pub fn clear(id: ScopeId) {
    stack::clear(id).or_abort();
}

// ============================================================================
// Registration
// ============================================================================

/// Defer `callback(arg)` until the innermost scope ends
///
/// With `auto_root` enabled (the default) a thread with no scope gets a root
/// scope pushed first; otherwise this aborts.
pub fn defer<F, T>(callback: F, arg: T)
where
    F: FnOnce(T) + 'static,
    T: 'static,
{
    stack::defer_current(DeferredAction::unary(callback, arg)).or_abort();
}

/// Defer `callback()` until the innermost scope ends
pub fn defer_noarg<F>(callback: F)
where
    F: FnOnce() + 'static,
{
    stack::defer_current(DeferredAction::niladic(callback)).or_abort();
}

/// Defer `callback(arg)` until the scope `id` ends
pub fn defer_on<F, T>(id: ScopeId, callback: F, arg: T)
where
    F: FnOnce(T) + 'static,
    T: 'static,
{
    stack::defer_on(id, DeferredAction::unary(callback, arg)).or_abort();
}

/// Defer `callback()` until the scope `id` ends
pub fn defer_on_noarg<F>(id: ScopeId, callback: F)
where
    F: FnOnce() + 'static,
{
    stack::defer_on(id, DeferredAction::niladic(callback)).or_abort();
}

// ============================================================================
// Introspection
// ============================================================================

/// Innermost scope of the calling thread
pub fn current() -> Option<ScopeId> {
    stack::current()
}

/// Number of scopes on the calling thread's stack
pub fn depth() -> usize {
    stack::depth()
}

/// Statistics of the calling thread's stack
pub fn stats() -> StackStats {
    stack::stats()
}
