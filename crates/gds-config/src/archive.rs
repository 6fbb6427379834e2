//! Archive configuration.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration.

use crate::validate::{validate_archive_config, ValidationError};
use gds_common::{ExportCategory, StoreIdentifier};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Floor for the gatherer interval.
pub const MIN_FLUSH_INTERVAL_MS: u64 = 1000;

/// Errors raised while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid config {path}: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: ValidationError,
    },
}

/// Top-level archive configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// When false, nothing is archived and shutdown is immediate.
    pub use_database: bool,

    /// Bulk-load file directory; defaults to `<output_dir>/ldi`.
    pub base_dir: Option<PathBuf>,

    /// Destination for export copies of bulk-load files.
    pub export_dir: PathBuf,

    /// Gatherer interval in milliseconds.
    pub flush_interval_ms: u64,

    /// Maximum rows per bulk-load file; reaching it wakes the gatherer early.
    pub row_limit: u64,

    /// Keep bulk-load files after a successful load.
    pub save_files: bool,

    /// Use-archive decision for tables missing from `use_archive`.
    pub use_archive_default: bool,

    /// Per-table use-archive flags, keyed by table name without the `Sse` marker.
    pub use_archive: BTreeMap<String, bool>,

    /// Export flags.
    pub export: ExportConfig,

    /// Extended table naming.
    pub extended: ExtendedTables,

    /// Inserter backpressure.
    pub inserter: InserterConfig,

    /// Bulk-load file allocation retries.
    pub allocator: AllocatorConfig,

    /// Shutdown protocol timings.
    pub shutdown: ShutdownTimings,

    /// Require a valid session identity at init.
    pub validate_session: bool,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        ArchiveConfig {
            use_database: true,
            base_dir: None,
            export_dir: PathBuf::from("/tmp/export"),
            flush_interval_ms: 5000,
            row_limit: 10_000,
            save_files: false,
            use_archive_default: true,
            use_archive: BTreeMap::new(),
            export: ExportConfig::default(),
            extended: ExtendedTables::default(),
            inserter: InserterConfig::default(),
            allocator: AllocatorConfig::default(),
            shutdown: ShutdownTimings::default(),
            validate_session: true,
        }
    }
}

/// Per-category export flags; `all` turns on every category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub all: bool,
    pub frame: bool,
    pub log: bool,
    pub packet: bool,
    pub product: bool,
    pub cfdp: bool,
    pub channel_aggregate: bool,
    pub evr: bool,
    pub command: bool,
    pub channel: bool,
}

impl ExportConfig {
    /// Whether files of the given category are copied to the export directory.
    pub fn is_enabled(&self, category: ExportCategory) -> bool {
        let flag = match category {
            ExportCategory::Frame => self.frame,
            ExportCategory::Log => self.log,
            ExportCategory::Packet => self.packet,
            ExportCategory::Product => self.product,
            ExportCategory::Cfdp => self.cfdp,
            ExportCategory::ChannelAggregate => self.channel_aggregate,
            ExportCategory::Evr => self.evr,
            ExportCategory::Command => self.command,
            ExportCategory::Channel => self.channel,
        };
        flag || self.all
    }
}

/// Tables written under a suffixed name when extended mode is on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtendedTables {
    pub enabled: bool,
    pub postfix: String,
    pub tables: BTreeSet<String>,
}

impl Default for ExtendedTables {
    fn default() -> Self {
        ExtendedTables {
            enabled: false,
            postfix: "2".to_string(),
            tables: BTreeSet::new(),
        }
    }
}

impl ExtendedTables {
    /// Table name as created in the database.
    pub fn actual_table_name(&self, table: &str) -> String {
        if self.enabled && self.tables.contains(table) {
            format!("{}{}", table, self.postfix)
        } else {
            table.to_string()
        }
    }
}

/// Inserter backpressure settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InserterConfig {
    /// Pending rows at which appends start blocking.
    pub capacity: usize,
    /// Length of one wait slice while an append is blocked.
    pub append_wait_ms: u64,
    /// Total time an append may block before it is rejected.
    pub max_block_ms: u64,
}

impl Default for InserterConfig {
    fn default() -> Self {
        InserterConfig {
            capacity: 100_000,
            append_wait_ms: 250,
            max_block_ms: 30_000,
        }
    }
}

/// Bulk-load file allocation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    pub open_attempts: u32,
    /// Ceiling of the randomized sleep between attempts.
    pub jitter_ms: u64,
    /// Attempts for directory creation and file deletion.
    pub directory_attempts: u32,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        AllocatorConfig {
            open_attempts: 100,
            jitter_ms: 1000,
            directory_attempts: 10,
        }
    }
}

/// Shutdown protocol timings, all in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownTimings {
    pub drain_poll_ms: u64,
    pub flush_poll_ms: u64,
    pub gatherer_join_ms: u64,
    pub supervisor_join_ms: u64,
    pub idle_check_ms: u64,
}

impl Default for ShutdownTimings {
    fn default() -> Self {
        ShutdownTimings {
            drain_poll_ms: 500,
            flush_poll_ms: 100,
            gatherer_join_ms: 15_000,
            supervisor_join_ms: 15_000,
            idle_check_ms: 3_000,
        }
    }
}

impl ShutdownTimings {
    pub fn drain_poll(&self) -> Duration {
        Duration::from_millis(self.drain_poll_ms)
    }

    pub fn flush_poll(&self) -> Duration {
        Duration::from_millis(self.flush_poll_ms)
    }

    pub fn gatherer_join(&self) -> Duration {
        Duration::from_millis(self.gatherer_join_ms)
    }

    pub fn supervisor_join(&self) -> Duration {
        Duration::from_millis(self.supervisor_join_ms)
    }

    pub fn idle_check(&self) -> Duration {
        Duration::from_millis(self.idle_check_ms)
    }
}

impl ArchiveConfig {
    /// Load and validate a config file; `.json` is parsed as JSON, anything else as TOML.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));

        let config = if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
        .map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })?;

        validate_archive_config(&config).map_err(|source| ConfigError::Invalid {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(config)
    }

    /// Parse TOML without validating.
    pub fn from_toml_str(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Parse JSON without validating.
    pub fn from_json_str(content: &str) -> Result<Self, String> {
        serde_json::from_str(content).map_err(|e| e.to_string())
    }

    /// Configured use-archive decision for a table.
    pub fn use_archive(&self, id: StoreIdentifier) -> bool {
        self.use_archive
            .get(&id.use_archive_key())
            .copied()
            .unwrap_or(self.use_archive_default)
    }

    /// Set the use-archive flag for a table (and its SSE counterpart).
    pub fn with_use_archive(mut self, id: StoreIdentifier, enabled: bool) -> Self {
        self.use_archive.insert(id.use_archive_key(), enabled);
        self
    }

    /// Whether bulk-load files for this table are copied to the export directory.
    pub fn export_enabled(&self, id: StoreIdentifier) -> bool {
        id.export_category()
            .is_some_and(|category| self.export.is_enabled(category))
    }

    /// Gatherer interval, clamped to the floor.
    pub fn flush_interval(&self) -> Duration {
        if self.flush_interval_ms < MIN_FLUSH_INTERVAL_MS {
            warn!(
                configured_ms = self.flush_interval_ms,
                floor_ms = MIN_FLUSH_INTERVAL_MS,
                "flush interval below floor, clamping"
            );
            return Duration::from_millis(MIN_FLUSH_INTERVAL_MS);
        }
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Row count that triggers an early gatherer pass.
    pub fn row_limit(&self) -> u64 {
        self.row_limit.max(1)
    }

    /// Bulk-load directory for a session rooted at `output_dir`.
    pub fn file_base(&self, output_dir: &Path) -> PathBuf {
        match &self.base_dir {
            Some(dir) => dir.clone(),
            None => output_dir.join(LDI_DIR),
        }
    }
}

/// Subdirectory of the session output holding bulk-load files.
pub const LDI_DIR: &str = "ldi";
