//! Save Compatibility Migrations
//!
//! Rewrites obsolete identifiers while an older save document is being loaded, so that
//! saves written against earlier versions of a package keep loading after that package
//! renames or restructures its content.
//!
//! # Overview
//!
//! - [`MigrationRegistry`]: process-lifetime catalog of [`MigrationDefinition`]s, filled once
//!   from declarative JSON documents while content is loaded
//! - [`MigrationLedger`]: per-save record of which migrations already ran for which package,
//!   stored in its own section of the save document
//! - [`MigrationRunner`]: per-load controller wired into the host's document parser through
//!   three hooks
//! - [`AliasTable`]: cross-reference aliases for entities whose identity changed
//!
//! # Definition documents
//!
//! ```json
//! {
//!   "id": "rename-bar-v2",
//!   "owningPackageId": "author.mod",
//!   "renames": [
//!     { "category": "ThingDef", "replacements": { "Foo": "Bar" } }
//!   ],
//!   "backstory": {
//!     "update": ["Refugee"],
//!     "replaceMissing": { "OldChild": "NewChild" },
//!     "replaceOpposing": { "OldChild2": "NewAdult" }
//!   }
//! }
//! ```
//!
//! # Usage
//!
//! ```kotlin
//! // Startup
//! val registry = MigrationRegistry.withCatalog(catalog)
//! registry.registerSources(definitionDocuments)
//! val ledger = MigrationLedger()
//! val runner = MigrationRunner(registry, ledger, environment, catalog, regenerator)
//!
//! // Loading a save
//! runner.loadLedgerSection(document.section(ledgerSectionKey()))
//! runner.preLoad(document.manifestPackageIds())
//! val aliases = AliasTable()
//! // ... parser calls resolveRenamedIdentifier / resolveBackstoryIdentifier /
//! //     postProcessEntity while the document is read ...
//! val summary = runner.postLoad()
//!
//! // Saving
//! document.putSection(ledgerSectionKey(), runner.prepareForSave())
//! ```
//!
//! # Versioning
//!
//! A migration id is never reused. A package that needs to change a shipped migration adds
//! a new one with a new id; saves that already ran the old one only run the new one.

mod alias;
mod definition;
mod entity;
mod error;
mod ledger;
mod registry;
mod runner;
mod session;
mod state;

pub use alias::AliasTable;
pub use definition::{
    parse_definition_json, DefinitionSource, IdentifierRule, MigrationDefinition,
    PairedFieldRule, PairedFieldSource, RenameTableSource, SlotMatch,
};
pub use entity::{BackstorySlot, EntitySnapshot, PostProcessOutcome, SlotReplacement};
pub use error::{MigrationError, MigrationResult};
pub use ledger::{ledger_section_key, LedgerEntry, MigrationLedger, LEDGER_SECTION_KEY};
pub use registry::MigrationRegistry;
pub use runner::MigrationRunner;
pub use state::{LoadSummary, RunnerPhase};
