use std::sync::OnceLock;

/// Process-wide configuration, set once by [`init_save_compat_config`].
static CONFIG_INSTANCE: OnceLock<SaveCompatConfig> = OnceLock::new();

/// Tunables for the migration engine.
///
/// The registry and the ledger are not configuration; they are explicit objects handed to
/// the [`MigrationRunner`](crate::migration::MigrationRunner).
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct SaveCompatConfig {
    /// Distribution decorations appended to package ids by the host (e.g. `_steam`).
    ///
    /// A decoration is stripped from ids read out of a save manifest, and every decorated
    /// variant is tried when checking whether a package is enabled.
    pub package_suffixes: Vec<String>,
    /// When set, a persisted ledger section without a checksum is treated as tampered.
    pub require_ledger_checksum: bool,
    /// Emit an info line for every identifier rewritten during a load.
    pub log_rewrites: bool,
}

impl Default for SaveCompatConfig {
    fn default() -> Self {
        Self {
            package_suffixes: vec!["_steam".to_string(), "_copy".to_string()],
            require_ledger_checksum: false,
            log_rewrites: true,
        }
    }
}

/// Initializes the global configuration.
///
/// Call once at startup, before content definitions are registered. Subsequent calls are
/// ignored with a warning.
///
/// # Examples
///
/// ## Kotlin
///
/// ```kotlin
/// initSaveCompatConfig(SaveCompatConfig(listOf("_steam"), true, false))
/// ```
#[uniffi::export]
pub fn init_save_compat_config(config: SaveCompatConfig) {
    match CONFIG_INSTANCE.set(config) {
        Ok(()) => crate::info!("savecompat config initialized"),
        Err(_) => crate::warn!("savecompat config already initialized, ignoring"),
    }
}

/// Returns the active configuration, or the defaults if none was initialized.
#[must_use]
pub fn current_config() -> SaveCompatConfig {
    CONFIG_INSTANCE.get().cloned().unwrap_or_default()
}
