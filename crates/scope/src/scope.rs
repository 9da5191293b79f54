//! Scopes and scope handles
//!
//! A [`Scope`] owns an ordered list of deferred actions. Scopes live either on
//! a thread's stack (addressed through a [`ScopeId`]) or detached, as a plain
//! value owned by the caller.

use core::fmt;

use tracing::trace;

use crate::action::DeferredAction;
use crate::runtime;

/// Handle to a scope pushed onto a thread's stack
///
/// Handles are only meaningful on the thread that pushed the scope; using one
/// elsewhere is reported as [`crate::DeferError::ForeignScope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId {
    thread: u64,
    serial: u64,
}

impl ScopeId {
    pub(crate) const fn new(thread: u64, serial: u64) -> Self {
        Self { thread, serial }
    }

    /// Token of the thread that owns the scope
    #[must_use]
    pub fn thread(&self) -> u64 {
        self.thread
    }

    /// Per-thread sequence number, increasing with every push
    #[must_use]
    pub fn serial(&self) -> u64 {
        self.serial
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.thread, self.serial)
    }
}

/// One nesting level of cleanup obligations
///
/// A scope created with [`Scope::new`] is detached: no pop or end on the thread
/// stack ever touches it. Its actions run on [`Scope::clear`],
/// [`Scope::delete`] or when the value is dropped. Handing it to
/// [`crate::push`] moves it onto the stack, pending actions included.
///
/// # Examples
///
/// ```
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use defer_scope::Scope;
///
/// let log = Rc::new(RefCell::new(Vec::new()));
/// let mut scope = Scope::new();
/// for n in 1..=3 {
///     let log = Rc::clone(&log);
///     scope.defer(move |n| log.borrow_mut().push(n), n);
/// }
///
/// scope.clear();
/// assert_eq!(*log.borrow(), vec![3, 2, 1]);
/// ```
#[derive(Debug, Default)]
pub struct Scope {
    actions: Vec<DeferredAction>,
}

impl Scope {
    /// Create a detached, empty scope
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defer `callback(arg)` until this scope is cleared
    pub fn defer<F, T>(&mut self, callback: F, arg: T)
    where
        F: FnOnce(T) + 'static,
        T: 'static,
    {
        self.register(DeferredAction::unary(callback, arg));
    }

    /// Defer `callback()` until this scope is cleared
    pub fn defer_noarg<F>(&mut self, callback: F)
    where
        F: FnOnce() + 'static,
    {
        self.register(DeferredAction::niladic(callback));
    }

    /// Run every pending action, last registered first, and leave the scope
    /// empty and reusable
    pub fn clear(&mut self) {
        if self.actions.is_empty() {
            return;
        }

        let policy = runtime::config().panic_policy;
        trace!(actions = self.actions.len(), "clearing detached scope");
        while let Some(action) = self.actions.pop() {
            action.run(policy);
        }
    }

    /// Clear the scope and release it
    pub fn delete(mut self) {
        self.clear();
    }

    /// Number of pending actions
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether no action is pending
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub(crate) fn register(&mut self, action: DeferredAction) {
        trace!(kind = %action.kind(), pending = self.actions.len() + 1, "action deferred");
        self.actions.push(action);
    }

    /// Detach the most recently registered action
    pub(crate) fn take_last(&mut self) -> Option<DeferredAction> {
        self.actions.pop()
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.clear();
    }
}
