//! Per-thread scope-stack statistics

/// Snapshot of the calling thread's scope stack
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StackStats {
    /// Scopes currently on the stack
    pub depth: usize,
    /// Actions registered on stacked scopes and not yet run
    pub pending_actions: usize,
    /// Scopes pushed since the thread started
    pub scopes_pushed: u64,
    /// Scopes released by unwinding since the thread started
    pub scopes_popped: u64,
    /// Actions executed by unwinding or clearing stacked scopes
    pub actions_run: u64,
}

/// Running counters kept alongside a thread's stack
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Counters {
    pub(crate) scopes_pushed: u64,
    pub(crate) scopes_popped: u64,
    pub(crate) actions_run: u64,
}

impl Counters {
    pub(crate) fn snapshot(&self, depth: usize, pending_actions: usize) -> StackStats {
        StackStats {
            depth,
            pending_actions,
            scopes_pushed: self.scopes_pushed,
            scopes_popped: self.scopes_popped,
            actions_run: self.actions_run,
        }
    }
}
