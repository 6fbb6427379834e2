//! Configuration resolution and path discovery.
//!
//! Resolution order: CLI argument → environment variables → XDG paths → /etc → defaults.

use crate::archive::{ArchiveConfig, ConfigError};
use std::path::{Path, PathBuf};

/// Where the configuration was found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Explicitly provided via CLI argument.
    CliArgument,

    /// Set via environment variable.
    Environment,

    /// Found in XDG config directory.
    XdgConfig,

    /// Found in /etc/gds/.
    SystemConfig,

    /// Using built-in defaults.
    #[default]
    BuiltinDefault,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::CliArgument => write!(f, "CLI argument"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::XdgConfig => write!(f, "XDG config"),
            ConfigSource::SystemConfig => write!(f, "system config"),
            ConfigSource::BuiltinDefault => write!(f, "builtin default"),
        }
    }
}

/// Environment variable names.
pub const ENV_CONFIG_PATH: &str = "GDS_ARCHIVE_CONFIG";
pub const ENV_CONFIG_DIR: &str = "GDS_CONFIG_DIR";

/// Standard config file name.
const CONFIG_FILENAME: &str = "archive.toml";

/// Application name for XDG directories.
const APP_NAME: &str = "gds";

/// Resolve the archive config path.
///
/// Resolution order:
/// 1. Explicit CLI path (if it exists)
/// 2. GDS_ARCHIVE_CONFIG
/// 3. GDS_CONFIG_DIR + archive.toml
/// 4. XDG config directory (~/.config/gds/)
/// 5. System config (/etc/gds/)
/// 6. Built-in defaults (None)
pub fn resolve_config_path(cli_path: Option<&Path>) -> (Option<PathBuf>, ConfigSource) {
    if let Some(path) = cli_path {
        if path.exists() {
            return (Some(path.to_path_buf()), ConfigSource::CliArgument);
        }
    }

    if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return (Some(path), ConfigSource::Environment);
        }
    }

    if let Ok(config_dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = PathBuf::from(config_dir).join(CONFIG_FILENAME);
        if path.exists() {
            return (Some(path), ConfigSource::Environment);
        }
    }

    if let Some(xdg_config) = dirs::config_dir() {
        let path = xdg_config.join(APP_NAME).join(CONFIG_FILENAME);
        if path.exists() {
            return (Some(path), ConfigSource::XdgConfig);
        }
    }

    let system_path = PathBuf::from("/etc").join(APP_NAME).join(CONFIG_FILENAME);
    if system_path.exists() {
        return (Some(system_path), ConfigSource::SystemConfig);
    }

    (None, ConfigSource::BuiltinDefault)
}

/// Resolve, load and validate the archive config.
pub fn load_resolved(cli_path: Option<&Path>) -> Result<(ArchiveConfig, ConfigSource), ConfigError> {
    match resolve_config_path(cli_path) {
        (Some(path), source) => Ok((ArchiveConfig::load(&path)?, source)),
        (None, source) => Ok((ArchiveConfig::default(), source)),
    }
}
