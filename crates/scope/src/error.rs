//! Error types for defer-scope
//!
//! Uses thiserror for clean, idiomatic Rust error definitions.
//!
//! Almost every failure in the scope-stack runtime is a programming error or
//! corrupted bookkeeping, and the runtime treats those as unrecoverable: see
//! [`fatal`] and [`OrAbort`]. Only configuration and the `try_*` entry points
//! hand a [`DeferError`] back to the caller.

use thiserror::Error;
use tracing::error;

use crate::scope::ScopeId;

// ============================================================================
// Main Error Types
// ============================================================================

/// Scope-stack errors
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeferError {
    // --- Stack Errors ---
    #[error("No active scope on this thread for {operation}")]
    NoActiveScope { operation: &'static str },

    #[error("Scope {id} is not on this thread's stack")]
    UnknownScope { id: ScopeId },

    #[error("Scope {id} belongs to another thread")]
    ForeignScope { id: ScopeId },

    // --- Action Errors ---
    #[error("Invalid deferred action encountered: {details}")]
    Corruption { details: String },

    // --- Lifecycle Errors ---
    #[error("Failed to register {hook} hook (code {code})")]
    HookRegistration { hook: &'static str, code: i32 },

    #[error("defer-scope runtime is already initialized")]
    AlreadyInitialized,

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl DeferError {
    /// Get error code for categorization
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoActiveScope { .. } => "DEFER:STACK:EMPTY",
            Self::UnknownScope { .. } => "DEFER:STACK:UNKNOWN",
            Self::ForeignScope { .. } => "DEFER:STACK:FOREIGN",
            Self::Corruption { .. } => "DEFER:ACTION:CORRUPTION",
            Self::HookRegistration { .. } => "DEFER:HOOK:REGISTER",
            Self::AlreadyInitialized => "DEFER:INIT:ALREADY",
            Self::InvalidConfig { .. } => "DEFER:CONFIG:INVALID",
        }
    }

    /// Check if this error is only ever reported, never returned
    ///
    /// Fatal errors abort the process even through the `try_*` entry points.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Corruption { .. } | Self::HookRegistration { .. })
    }

    // ============================================================================
    // Convenience Constructors
    // ============================================================================

    /// Create no active scope error
    #[must_use]
    pub fn no_active_scope(operation: &'static str) -> Self {
        Self::NoActiveScope { operation }
    }

    /// Create unknown scope error
    #[must_use]
    pub fn unknown_scope(id: ScopeId) -> Self {
        Self::UnknownScope { id }
    }

    /// Create foreign scope error
    #[must_use]
    pub fn foreign_scope(id: ScopeId) -> Self {
        Self::ForeignScope { id }
    }

    /// Create corruption error
    #[must_use]
    pub fn corruption(details: &str) -> Self {
        Self::Corruption {
            details: details.to_string(),
        }
    }

    /// Create hook registration error
    #[must_use]
    pub fn hook_registration(hook: &'static str, code: i32) -> Self {
        Self::HookRegistration { hook, code }
    }

    /// Create invalid config error
    pub fn invalid_config(reason: &str) -> Self {
        Self::InvalidConfig {
            reason: reason.to_string(),
        }
    }
}

// ============================================================================
// Result Types
// ============================================================================

/// Result type for scope-stack operations
pub type DeferResult<T> = core::result::Result<T, DeferError>;

/// Generic result type alias
pub type Result<T> = DeferResult<T>;

// ============================================================================
// Fatal path
// ============================================================================

/// Report an unrecoverable scope-stack failure and abort the process.
///
/// Nothing here unwinds. The error is logged, written to stderr (a subscriber
/// may not be installed) and the process is aborted.
#[cold]
pub fn fatal(err: &DeferError) -> ! {
    error!(code = err.code(), error = %err, "unrecoverable scope-stack failure, aborting");
    eprintln!("defer-scope: {err}, aborting");
    std::process::abort()
}

/// Extension trait turning scope-stack errors into process aborts
pub trait OrAbort<T> {
    /// Unwrap the value, or abort the process through [`fatal`]
    fn or_abort(self) -> T;
}

impl<T> OrAbort<T> for DeferResult<T> {
    #[inline]
    fn or_abort(self) -> T {
        match self {
            Ok(value) => value,
            Err(err) => fatal(&err),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
