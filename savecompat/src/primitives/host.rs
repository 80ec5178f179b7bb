//! Host abstractions consumed by the migration engine.
//!
//! These traits are implemented by the host process (usually in a foreign language through
//! `UniFFI`). The engine never reaches into host internals by any other route.

use thiserror::Error;

/// Errors raised by host callbacks.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Error, uniffi::Error)]
pub enum HostError {
    /// The host could not recompute derived state for an entity
    #[error("regeneration failed for {entity_id}: {reason}")]
    RegenerationFailed {
        /// Entity whose derived state could not be recomputed
        entity_id: String,
        /// Host-provided explanation
        reason: String,
    },
    /// An unexpected error occurred in the foreign callback
    #[error("unexpected error in foreign callback: {0}")]
    UnexpectedUniFFICallbackError(String),
}

impl From<uniffi::UnexpectedUniFFICallbackError> for HostError {
    fn from(e: uniffi::UnexpectedUniFFICallbackError) -> Self {
        Self::UnexpectedUniFFICallbackError(e.reason)
    }
}

/// The host's package (extension) activation registry.
#[uniffi::export(with_foreign)]
pub trait PackageEnvironment: Send + Sync {
    /// Whether the package with exactly this id is enabled in the running environment.
    fn is_enabled(&self, package_id: String) -> bool;

    /// Every package id enabled in the running environment.
    fn enabled_package_ids(&self) -> Vec<String>;
}

/// The host's catalogs of loadable identifiers.
///
/// Used to validate rename tables at registration time and to check that a replacement
/// target actually exists before a value is rewritten.
#[uniffi::export(with_foreign)]
pub trait DefinitionCatalog: Send + Sync {
    /// Whether `category` names a value category the host can resolve (e.g. `ThingDef`).
    fn has_category(&self, category: String) -> bool;

    /// Whether `identifier` exists in the catalog for `category`.
    fn contains(&self, category: String, identifier: String) -> bool;

    /// Whether `identifier` exists in the catalog of formative-period (backstory) values.
    fn has_backstory(&self, identifier: String) -> bool;
}

/// Recomputes derived entity state from canonical inputs.
///
/// Called by the runner at the end of a load, never mid-parse, because derived state may
/// depend on fields that were not parsed yet when the need for regeneration was detected.
#[uniffi::export(with_foreign)]
pub trait EntityRegenerator: Send + Sync {
    /// Regenerates derived state for `entity_id`.
    ///
    /// # Errors
    /// Returns [`HostError`] if the entity could not be regenerated. The packages whose rules
    /// requested the regeneration are then left unmarked in the ledger and re-run next load.
    fn regenerate(&self, entity_id: String) -> Result<(), HostError>;
}
