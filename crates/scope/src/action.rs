//! Deferred actions
//!
//! A deferred action is one pending cleanup step: a boxed callback that runs
//! exactly once when the scope owning it is cleared or unwound.

use core::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::error;

use crate::config::PanicPolicy;
use crate::error::{DeferError, fatal};

/// Shape of the callback an action was registered with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Callback taking the argument supplied at registration
    Unary,
    /// Callback taking no argument
    Niladic,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unary => write!(f, "unary"),
            Self::Niladic => write!(f, "niladic"),
        }
    }
}

/// One pending cleanup step owned by a scope
pub(crate) struct DeferredAction {
    kind: ActionKind,
    /// Never `None` for actions built through the constructors below.
    callback: Option<Box<dyn FnOnce()>>,
}

impl DeferredAction {
    /// Wrap a unary callback together with the argument it will receive
    pub(crate) fn unary<F, T>(callback: F, arg: T) -> Self
    where
        F: FnOnce(T) + 'static,
        T: 'static,
    {
        Self {
            kind: ActionKind::Unary,
            callback: Some(Box::new(move || callback(arg))),
        }
    }

    /// Wrap a niladic callback
    pub(crate) fn niladic<F>(callback: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        Self {
            kind: ActionKind::Niladic,
            callback: Some(Box::new(callback)),
        }
    }

    pub(crate) fn kind(&self) -> ActionKind {
        self.kind
    }

    /// Execute the action, consuming it
    ///
    /// An action without a callback aborts the process: the remaining actions
    /// of the list are never reached.
    pub(crate) fn run(self, policy: PanicPolicy) {
        let Some(callback) = self.callback else {
            fatal(&DeferError::corruption(&format!(
                "{} action has no callback",
                self.kind
            )));
        };

        match policy {
            PanicPolicy::Propagate => callback(),
            PanicPolicy::Abort => {
                if catch_unwind(AssertUnwindSafe(callback)).is_err() {
                    error!(kind = %self.kind, "deferred action panicked, aborting");
                    eprintln!("defer-scope: {} deferred action panicked, aborting", self.kind);
                    std::process::abort();
                }
            }
        }
    }
}

impl fmt::Debug for DeferredAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredAction")
            .field("kind", &self.kind)
            .field("valid", &self.callback.is_some())
            .finish()
    }
}

#[cfg(test)]
impl DeferredAction {
    /// Build an action with no callback, for fault-injection tests only
    pub(crate) fn corrupted(kind: ActionKind) -> Self {
        Self {
            kind,
            callback: None,
        }
    }
}
