//! Ground data archive configuration loading and validation.
//!
//! This crate provides:
//! - The typed `ArchiveConfig` consumed by the archive controller
//! - Config resolution (CLI → env → XDG → /etc → defaults)
//! - Semantic validation with stable error codes

pub mod archive;
pub mod resolve;
pub mod validate;

pub use archive::{
    AllocatorConfig, ArchiveConfig, ConfigError, ExportConfig, ExtendedTables, InserterConfig,
    ShutdownTimings, LDI_DIR, MIN_FLUSH_INTERVAL_MS,
};
pub use resolve::{load_resolved, resolve_config_path, ConfigSource};
pub use validate::{validate_archive_config, ValidationError, ValidationResult};
