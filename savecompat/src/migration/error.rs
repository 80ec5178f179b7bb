/// Errors that can occur while registering, running or persisting migrations.
///
/// None of these abort a load. At worst a value is left unmigrated and surfaces later as an
/// ordinary missing reference in the host's own validation.
#[crate::savecompat_error]
pub enum MigrationError {
    /// A definition is missing a required field or carries an unparseable rule table
    #[error("invalid migration definition '{definition_id}': {reason}")]
    DefinitionInvalid {
        /// Id of the rejected definition (may be empty if the id itself was missing)
        definition_id: String,
        /// What was wrong with it
        reason: String,
    },

    /// A definition with the same `(package, id)` pair was already registered
    #[error("migration '{migration_id}' is already registered for package '{package_id}'")]
    DuplicateRegistration {
        /// Owning package of both definitions
        package_id: String,
        /// Colliding migration id
        migration_id: String,
    },

    /// A replacement target does not exist in the destination catalog
    #[error("replacement target '{identifier}' not found in {category}")]
    UnresolvedReference {
        /// Catalog that was searched
        category: String,
        /// Identifier that could not be found
        identifier: String,
    },

    /// `pre_load` was called while a load was already in progress
    #[error("a migration load is already running")]
    AlreadyRunning,

    /// An invalid runner transition was attempted
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// The persisted ledger section failed its integrity check
    #[error("ledger section is corrupted: {reason}")]
    LedgerCorrupted {
        /// Why the section was rejected
        reason: String,
    },

    /// JSON serialization/deserialization failed
    #[error("JSON error: {message}")]
    JsonError {
        /// The error message from serde_json
        message: String,
    },
}

impl From<serde_json::Error> for MigrationError {
    fn from(e: serde_json::Error) -> Self {
        Self::JsonError {
            message: e.to_string(),
        }
    }
}

/// Result type for migration operations
pub type MigrationResult<T> = std::result::Result<T, MigrationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(MigrationError::AlreadyRunning.code(), "ALREADY_RUNNING");
        assert_eq!(
            MigrationError::DuplicateRegistration {
                package_id: "modA".to_string(),
                migration_id: "m1".to_string(),
            }
            .code(),
            "DUPLICATE_REGISTRATION"
        );
        assert_eq!(
            MigrationError::InvalidOperation("x".to_string()).code(),
            "INVALID_OPERATION"
        );
    }

    #[test]
    fn test_anyhow_chain_is_preserved() {
        let err = anyhow::anyhow!("disk full").context("writing ledger");
        let converted = MigrationError::from(err);
        assert_eq!(converted.code(), "GENERIC");
        assert_eq!(
            converted.to_string(),
            "Generic error: writing ledger (caused by: disk full)"
        );
    }

    #[test]
    fn test_json_errors_convert() {
        let err = serde_json::from_str::<Vec<String>>("{").unwrap_err();
        let converted = MigrationError::from(err);
        assert!(matches!(converted, MigrationError::JsonError { .. }));
    }
}
