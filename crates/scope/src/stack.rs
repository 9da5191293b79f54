//! Thread-local scope stack and the unwind algorithm
//!
//! Every thread owns one [`ScopeStack`]: a vector of pushed scopes where the
//! entry below a scope is its parent. The stack is created lazily on first use
//! and never destroyed, so the thread-exit, process-exit and fork hooks (and
//! the actions they run) can still use it after other thread-locals are gone.
//! The hooks in [`crate::hooks`] unwind it; this module only runs the unwind.
//!
//! The `RefCell` guarding a stack is never borrowed while a deferred action
//! runs, so actions are free to defer, push, pop or clear themselves.

use std::cell::RefCell;
use std::mem::ManuallyDrop;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, trace};

use crate::action::DeferredAction;
use crate::config::PanicPolicy;
use crate::error::{DeferError, DeferResult};
use crate::hooks;
use crate::runtime;
use crate::scope::{Scope, ScopeId};
use crate::stats::{Counters, StackStats};

static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    // No destructor is registered for a `ManuallyDrop` value.
    static STACK: ManuallyDrop<RefCell<ScopeStack>> =
        ManuallyDrop::new(RefCell::new(ScopeStack::new()));
}

/// Where an unwind stops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopTarget {
    /// Pop exactly the innermost scope
    Innermost,
    /// Pop the given scope and every scope pushed after it
    Scope(ScopeId),
    /// Pop every scope of the calling thread
    All,
}

impl From<ScopeId> for PopTarget {
    fn from(id: ScopeId) -> Self {
        Self::Scope(id)
    }
}

/// Lifecycle event unwinding a thread's whole stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Teardown {
    ThreadExit,
    ProcessExit,
    /// Child side of `fork`. Must not log: locks held by other threads of the
    /// parent are never released in the child.
    ForkChild,
}

impl Teardown {
    fn as_str(self) -> &'static str {
        match self {
            Self::ThreadExit => "thread exit",
            Self::ProcessExit => "process exit",
            Self::ForkChild => "fork child",
        }
    }

    fn traced(self) -> bool {
        self != Self::ForkChild
    }
}

#[derive(Debug)]
struct StackEntry {
    id: ScopeId,
    scope: Scope,
}

/// Scope stack of one thread
#[derive(Debug)]
pub(crate) struct ScopeStack {
    thread: u64,
    next_serial: u64,
    entries: Vec<StackEntry>,
    counters: Counters,
}

impl ScopeStack {
    pub(crate) fn new() -> Self {
        Self {
            thread: NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed),
            next_serial: 1,
            entries: Vec::new(),
            counters: Counters::default(),
        }
    }

    pub(crate) fn push(&mut self, scope: Scope) -> ScopeId {
        let id = ScopeId::new(self.thread, self.next_serial);
        self.next_serial += 1;
        self.counters.scopes_pushed += 1;
        self.entries.push(StackEntry { id, scope });
        id
    }

    pub(crate) fn top(&self) -> Option<ScopeId> {
        self.entries.last().map(|entry| entry.id)
    }

    pub(crate) fn depth(&self) -> usize {
        self.entries.len()
    }

    fn position(&self, id: ScopeId) -> DeferResult<usize> {
        if id.thread() != self.thread {
            return Err(DeferError::foreign_scope(id));
        }
        self.entries
            .iter()
            .rposition(|entry| entry.id == id)
            .ok_or_else(|| DeferError::unknown_scope(id))
    }

    /// Depth the stack is cut back to when unwinding towards `target`
    pub(crate) fn stop_point(&self, target: PopTarget) -> DeferResult<usize> {
        if self.entries.is_empty() {
            return Err(DeferError::no_active_scope("pop"));
        }
        match target {
            PopTarget::Innermost => Ok(self.entries.len() - 1),
            PopTarget::All => Ok(0),
            PopTarget::Scope(id) => self.position(id),
        }
    }

    pub(crate) fn scope_mut(&mut self, id: ScopeId) -> DeferResult<&mut Scope> {
        let index = self.position(id)?;
        Ok(&mut self.entries[index].scope)
    }

    pub(crate) fn top_mut(&mut self) -> Option<&mut Scope> {
        self.entries.last_mut().map(|entry| &mut entry.scope)
    }

    pub(crate) fn stats(&self) -> StackStats {
        let pending = self.entries.iter().map(|entry| entry.scope.len()).sum();
        self.counters.snapshot(self.entries.len(), pending)
    }
}

/// Unwind `cell` until only `until` scopes remain.
///
/// Runs the top scope's actions one at a time, most recent first, releasing a
/// scope once its list is empty. Actions deferred onto the scope being unwound
/// are picked up by the same loop, as are scopes pushed by an action.
pub(crate) fn unwind_to(
    cell: &RefCell<ScopeStack>,
    until: usize,
    policy: PanicPolicy,
    traced: bool,
) {
    loop {
        let action = {
            let mut stack = cell.borrow_mut();
            if stack.entries.len() <= until {
                break;
            }
            let next = stack.top_mut().and_then(Scope::take_last);
            match next {
                Some(action) => {
                    stack.counters.actions_run += 1;
                    action
                }
                None => {
                    if let Some(entry) = stack.entries.pop() {
                        stack.counters.scopes_popped += 1;
                        if traced {
                            trace!(scope = %entry.id, depth = stack.entries.len(), "scope released");
                        }
                    }
                    continue;
                }
            }
        };
        action.run(policy);
    }
}

/// Run and discard every action of a stacked scope without popping it
pub(crate) fn clear_in(
    cell: &RefCell<ScopeStack>,
    id: ScopeId,
    policy: PanicPolicy,
) -> DeferResult<()> {
    cell.borrow().position(id)?;
    loop {
        let action = {
            let mut stack = cell.borrow_mut();
            // An action may have popped the scope it was clearing.
            let Ok(scope) = stack.scope_mut(id) else {
                break;
            };
            let Some(action) = scope.take_last() else {
                break;
            };
            stack.counters.actions_run += 1;
            action
        };
        action.run(policy);
    }
    Ok(())
}

fn with_stack<R>(f: impl FnOnce(&RefCell<ScopeStack>) -> R) -> R {
    STACK.with(|stack| f(&**stack))
}

// ============================================================================
// Operations on the calling thread's stack
// ============================================================================

pub(crate) fn push(scope: Option<Scope>) -> ScopeId {
    runtime::ensure_initialized();

    let (id, depth) = with_stack(|cell| {
        let mut stack = cell.borrow_mut();
        let id = stack.push(scope.unwrap_or_default());
        (id, stack.depth())
    });

    if depth == 1 {
        hooks::on_thread_activated();
    }
    trace!(scope = %id, depth, "scope pushed");
    id
}

pub(crate) fn pop(target: PopTarget) -> DeferResult<()> {
    let policy = runtime::config().panic_policy;
    with_stack(|cell| -> DeferResult<()> {
        let until = cell.borrow().stop_point(target)?;
        trace!(?target, until, "unwinding scope stack");
        unwind_to(cell, until, policy, true);
        Ok(())
    })
}

pub(crate) fn clear(id: ScopeId) -> DeferResult<()> {
    let policy = runtime::config().panic_policy;
    with_stack(|cell| clear_in(cell, id, policy))
}

pub(crate) fn defer_on(id: ScopeId, action: DeferredAction) -> DeferResult<()> {
    with_stack(|cell| {
        cell.borrow_mut()
            .scope_mut(id)
            .map(|scope| scope.register(action))
    })
}

pub(crate) fn defer_current(action: DeferredAction) -> DeferResult<()> {
    if with_stack(|cell| cell.borrow().depth()) == 0 {
        if !runtime::config().auto_root {
            return Err(DeferError::no_active_scope("defer"));
        }
        let id = push(None);
        debug!(scope = %id, "root scope pushed on demand");
    }

    with_stack(|cell| match cell.borrow_mut().top_mut() {
        Some(scope) => {
            scope.register(action);
            Ok(())
        }
        None => Err(DeferError::no_active_scope("defer")),
    })
}

pub(crate) fn current() -> Option<ScopeId> {
    with_stack(|cell| cell.borrow().top())
}

pub(crate) fn depth() -> usize {
    with_stack(|cell| cell.borrow().depth())
}

pub(crate) fn stats() -> StackStats {
    with_stack(|cell| cell.borrow().stats())
}

/// Unwind the calling thread's whole stack from a lifecycle hook.
///
/// A thread without scopes is left alone. On thread exit the emptied stack
/// also gives its storage back.
pub(crate) fn unwind_current_thread(teardown: Teardown) {
    let policy = runtime::config().panic_policy;
    with_stack(|cell| {
        let depth = cell.borrow().depth();
        if depth > 0 {
            if teardown.traced() {
                debug!(reason = teardown.as_str(), depth, "unwinding scope stack");
            }
            unwind_to(cell, 0, policy, teardown.traced());
        }
        if teardown == Teardown::ThreadExit {
            cell.borrow_mut().entries.shrink_to_fit();
        }
    });
}
