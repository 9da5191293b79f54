//! RAII integration with Rust control flow
//!
//! A [`ScopeGuard`] pushes a scope when created and unwinds the stack down to
//! and including that scope when dropped. Early returns, `?` and panics all
//! end the scope, which is what multi-level pops exist for.

use std::marker::PhantomData;

use crate::error::{DeferError, fatal};
use crate::scope::{Scope, ScopeId};
use crate::stack::{self, PopTarget};

/// Guard that ends its scope on drop
///
/// # Examples
///
/// ```
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// let log = Rc::new(RefCell::new(Vec::new()));
/// {
///     let scope = defer_scope::ScopeGuard::new();
///     let sink = Rc::clone(&log);
///     scope.defer(move |path| sink.borrow_mut().push(path), "/tmp/lock");
/// }
/// assert_eq!(*log.borrow(), vec!["/tmp/lock"]);
/// ```
#[must_use = "ScopeGuard ends its scope as soon as it is dropped"]
#[derive(Debug)]
pub struct ScopeGuard {
    id: ScopeId,
    active: bool,
    // Scopes are bound to the thread that pushed them.
    _not_send: PhantomData<*const ()>,
}

impl ScopeGuard {
    /// Push a fresh scope and guard it
    pub fn new() -> Self {
        Self::from_scope(Scope::new())
    }

    /// Push a detached scope, pending actions included, and guard it
    pub fn from_scope(scope: Scope) -> Self {
        Self {
            id: crate::push(Some(scope)),
            active: true,
            _not_send: PhantomData,
        }
    }

    /// Handle of the guarded scope
    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// Defer `callback(arg)` until the guarded scope ends
    pub fn defer<F, T>(&self, callback: F, arg: T)
    where
        F: FnOnce(T) + 'static,
        T: 'static,
    {
        crate::defer_on(self.id, callback, arg);
    }

    /// Defer `callback()` until the guarded scope ends
    pub fn defer_noarg<F>(&self, callback: F)
    where
        F: FnOnce() + 'static,
    {
        crate::defer_on_noarg(self.id, callback);
    }

    /// Run the guarded scope's actions now without ending it
    pub fn clear(&self) {
        crate::clear(self.id);
    }

    /// End the scope immediately
    pub fn end(mut self) {
        self.release();
    }

    /// Disarm the guard, leaving the scope on the stack
    ///
    /// The scope is then ended by an explicit pop, an enclosing guard, or the
    /// thread or process exiting.
    pub fn leak(mut self) -> ScopeId {
        self.active = false;
        self.id
    }

    fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;

        match stack::pop(PopTarget::Scope(self.id)) {
            // Already unwound by an outer pop.
            Ok(()) | Err(DeferError::UnknownScope { .. } | DeferError::NoActiveScope { .. }) => {}
            Err(err) => fatal(&err),
        }
    }
}

impl Default for ScopeGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Run `f` inside a fresh scope that ends when `f` returns or panics
///
/// # Examples
///
/// ```
/// let value = defer_scope::with_scope(|scope| {
///     defer_scope::defer_on_noarg(scope, || println!("released"));
///     42
/// });
/// assert_eq!(value, 42);
/// ```
pub fn with_scope<R>(f: impl FnOnce(ScopeId) -> R) -> R {
    let guard = ScopeGuard::new();
    f(guard.id())
}
