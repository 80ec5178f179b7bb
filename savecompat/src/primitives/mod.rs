/// Process-wide engine configuration.
pub mod config;

/// Traits implemented by the host process (package environment, catalogs, regeneration).
pub mod host;

/// Context-aware logging routed to the host's log sink.
pub mod logger;

mod package_id;

pub use config::{current_config, init_save_compat_config, SaveCompatConfig};
pub use host::{DefinitionCatalog, EntityRegenerator, HostError, PackageEnvironment};
pub use package_id::{is_package_enabled, normalize_package_id};
