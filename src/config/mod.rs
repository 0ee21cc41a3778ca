//! Configuration loaded from `.gitengine.toml`.
//!
//! Precedence is command-line flags, then the file, then defaults. The file
//! is looked up in the working directory and up to nine of its ancestors.

mod core;
mod loader;

pub use self::core::{
    ArchiveConfig, EngineConfig, LoggingConfig, ReferencesConfig, SourceConfig, DEFAULT_PARTITIONS,
};
pub use self::loader::{
    directory_ancestors, load_config, load_config_from, parse_and_validate_config, CONFIG_FILE_NAME,
};
