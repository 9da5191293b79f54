//! Runtime configuration
//!
//! The configuration is fixed once per process, either explicitly through
//! [`crate::init_with`] or lazily from the environment on first use.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{DeferError, DeferResult};

/// Environment variable toggling lazy root scopes
pub const ENV_AUTO_ROOT: &str = "DEFER_SCOPE_AUTO_ROOT";
/// Environment variable toggling the process-exit hook
pub const ENV_EXIT_HOOK: &str = "DEFER_SCOPE_EXIT_HOOK";
/// Environment variable toggling the fork hook
pub const ENV_FORK_HOOK: &str = "DEFER_SCOPE_FORK_HOOK";
/// Environment variable selecting the [`PanicPolicy`]
pub const ENV_ON_PANIC: &str = "DEFER_SCOPE_ON_PANIC";

/// What happens when a deferred action panics during an unwind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum PanicPolicy {
    /// Let the panic unwind out of the pop; remaining actions stay pending
    #[default]
    Propagate,
    /// Log the panic and abort the process
    Abort,
}

impl PanicPolicy {
    fn parse(value: &str) -> DeferResult<Self> {
        match value.trim().to_lowercase().as_str() {
            "propagate" | "unwind" => Ok(Self::Propagate),
            "abort" => Ok(Self::Abort),
            other => Err(DeferError::invalid_config(&format!(
                "{ENV_ON_PANIC}: expected `propagate` or `abort`, got `{other}`"
            ))),
        }
    }
}

/// Configuration for the scope-stack runtime
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DeferConfig {
    /// Push a root scope on demand when deferring on a thread with no scope
    pub auto_root: bool,

    /// Unwind the exiting thread's stack from an `atexit` handler
    pub exit_hook: bool,

    /// Unwind the inherited stack in the child after `fork`
    pub fork_hook: bool,

    /// Behaviour when a deferred action panics
    pub panic_policy: PanicPolicy,
}

impl Default for DeferConfig {
    fn default() -> Self {
        Self {
            auto_root: true,
            exit_hook: true,
            fork_hook: true,
            panic_policy: PanicPolicy::Propagate,
        }
    }
}

impl DeferConfig {
    /// Strict configuration - every scope must be begun explicitly
    #[must_use]
    pub fn strict() -> Self {
        Self {
            auto_root: false,
            panic_policy: PanicPolicy::Abort,
            ..Self::default()
        }
    }

    /// Minimal configuration - no process-level hooks are installed
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            exit_hook: false,
            fork_hook: false,
            ..Self::default()
        }
    }

    /// Create configuration from environment variables
    ///
    /// Unset variables keep their default value.
    pub fn from_env() -> DeferResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> DeferResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_AUTO_ROOT) {
            config.auto_root = parse_flag(ENV_AUTO_ROOT, &value)?;
        }
        if let Some(value) = lookup(ENV_EXIT_HOOK) {
            config.exit_hook = parse_flag(ENV_EXIT_HOOK, &value)?;
        }
        if let Some(value) = lookup(ENV_FORK_HOOK) {
            config.fork_hook = parse_flag(ENV_FORK_HOOK, &value)?;
        }
        if let Some(value) = lookup(ENV_ON_PANIC) {
            config.panic_policy = PanicPolicy::parse(&value)?;
        }

        Ok(config)
    }
}

fn parse_flag(key: &str, value: &str) -> DeferResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(DeferError::invalid_config(&format!(
            "{key}: expected a boolean, got `{other}`"
        ))),
    }
}
