//! Process-wide runtime state: the active configuration and one-time setup

use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use crate::config::DeferConfig;
use crate::error::{DeferError, DeferResult};
use crate::hooks;

static CONFIG: OnceCell<DeferConfig> = OnceCell::new();

/// Configuration the runtime is running with
///
/// Loaded from the environment on first use unless [`init_with`] ran before.
pub fn config() -> &'static DeferConfig {
    CONFIG.get_or_init(|| match DeferConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "ignoring invalid defer-scope environment, using defaults");
            DeferConfig::default()
        }
    })
}

/// Initialize the runtime from environment variables
///
/// Calling this is optional: the first push on any thread initializes the
/// runtime the same way, except that an invalid environment is reported here
/// and silently replaced by defaults there.
///
/// # Examples
///
/// ```rust
/// fn main() -> defer_scope::DeferResult<()> {
///     defer_scope::init()?;
///
///     let _root = defer_scope::ScopeGuard::new();
///     defer_scope::defer_noarg(|| println!("cleanup"));
///
///     Ok(())
/// }
/// ```
pub fn init() -> DeferResult<()> {
    init_with(DeferConfig::from_env()?)
}

/// Initialize the runtime with an explicit configuration
///
/// Repeating the call with the configuration already in effect is a no-op;
/// any other configuration is rejected with
/// [`DeferError::AlreadyInitialized`].
pub fn init_with(config: DeferConfig) -> DeferResult<()> {
    let mut fresh = false;
    let active = CONFIG.get_or_init(|| {
        fresh = true;
        config.clone()
    });

    if !fresh && *active != config {
        return Err(DeferError::AlreadyInitialized);
    }

    if fresh {
        debug!(?config, "defer-scope runtime initialized");
    }
    hooks::install_process_hooks(active);
    Ok(())
}

/// Whether the runtime configuration has been fixed
pub fn is_initialized() -> bool {
    CONFIG.get().is_some()
}

pub(crate) fn ensure_initialized() {
    hooks::install_process_hooks(config());
}
