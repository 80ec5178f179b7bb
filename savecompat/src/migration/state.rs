use std::collections::HashSet;

/// Lifecycle phase of a [`MigrationRunner`](crate::migration::MigrationRunner).
///
/// `Idle → PreLoad → Active → PostLoad → Idle`. `PreLoad` and `PostLoad` are only observable
/// from inside the corresponding calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, uniffi::Enum)]
pub enum RunnerPhase {
    /// No load in progress
    #[default]
    Idle,
    /// Computing the active set for a load
    PreLoad,
    /// The document is being parsed; hooks may fire
    Active,
    /// Regenerating entities and committing the ledger
    PostLoad,
}

/// Where the game currently being played came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SaveLineage {
    /// Started as a new game; nothing in it predates the enabled packages
    #[default]
    Fresh,
    /// Loaded from a save written with these (normalized) packages
    Loaded {
        /// Package ids recorded in the save's manifest
        manifest: HashSet<String>,
    },
}

impl SaveLineage {
    /// Whether `package_id` was part of the loaded save's manifest.
    #[must_use]
    pub fn contains(&self, package_id: &str) -> bool {
        match self {
            Self::Fresh => false,
            Self::Loaded { manifest } => manifest.contains(package_id),
        }
    }

    /// Package ids of the loaded save's manifest (empty for a fresh game).
    #[must_use]
    pub fn manifest(&self) -> HashSet<String> {
        match self {
            Self::Fresh => HashSet::new(),
            Self::Loaded { manifest } => manifest.clone(),
        }
    }
}

/// Summary of one load, returned by `post_load`.
#[derive(Debug, Clone, Default, PartialEq, Eq, uniffi::Record)]
pub struct LoadSummary {
    /// Number of migrations that were active for the load
    pub active_migrations: u32,
    /// Identifiers rewritten by rename tables
    pub renamed_identifiers: u32,
    /// Backstory slots rewritten by paired-field rules
    pub replaced_slots: u32,
    /// Replacement targets missing from the destination catalog
    pub unresolved_references: u32,
    /// Entities whose recorded category was corrected
    pub corrected_categories: u32,
    /// Entities regenerated successfully
    pub regenerated_entities: u32,
    /// Entities the host failed to regenerate
    pub failed_regenerations: u32,
    /// Migrations marked applied in the ledger
    pub committed_migrations: u32,
    /// Wall-clock time from `pre_load` to the end of `post_load`
    pub duration_ms: u64,
}
