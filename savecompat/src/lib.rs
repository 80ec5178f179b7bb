#![deny(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs, dead_code)]

//! `savecompat` keeps older save documents loadable after the packages that produced them
//! rename or restructure their content.
//!
//! Packages ship declarative migration definitions. When a save is loaded, the engine works
//! out which of them have not run for that save yet, rewrites obsolete identifiers while the
//! host parses the document, and records what it did in a ledger stored with the save.
//!
//! The host process drives everything through `UniFFI` bindings; see [`migration`] for the
//! lifecycle.

/// Introduces the save compatibility migration engine.
pub mod migration;

/// Introduces the primitives shared by the engine: configuration, host traits and logging.
pub mod primitives;

pub use savecompat_macros::{savecompat_error, savecompat_export};

uniffi::setup_scaffolding!("savecompat");
