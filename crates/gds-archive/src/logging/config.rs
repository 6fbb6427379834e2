//! Logging settings for an embedded archive.
//!
//! `GDS_LOG` uses the archive's own short syntax: a base level followed by
//! per-component overrides, for example `info,gatherer=debug,shutdown=trace`.
//! Components name modules of this crate (`gatherer`, `shutdown`, `allocator`,
//! ...) or `config` for the config crate. When `GDS_LOG` is unset, a
//! `RUST_LOG` directive string is passed through untouched.

use std::collections::BTreeMap;
use tracing_subscriber::filter::LevelFilter;

pub const ENV_LOG: &str = "GDS_LOG";
pub const ENV_LOG_FORMAT: &str = "GDS_LOG_FORMAT";
pub const ENV_RUST_LOG: &str = "RUST_LOG";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    /// One JSON object per line, for log shippers.
    Jsonl,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "human" | "text" => Ok(LogFormat::Human),
            "jsonl" | "json" => Ok(LogFormat::Jsonl),
            _ => Err(format!("unknown log format: {}", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Level for both archive crates unless a component override applies.
    pub level: LevelFilter,
    /// Component → level, applied under `gds_archive::<component>`.
    pub components: BTreeMap<String, LevelFilter>,
    /// Raw `RUST_LOG` directives; ignored when `GDS_LOG` was given.
    pub passthrough: Option<String>,
    pub timestamps: bool,
    /// The gatherer and the shutdown supervisor run on named threads.
    pub thread_names: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            format: LogFormat::Human,
            level: LevelFilter::INFO,
            components: BTreeMap::new(),
            passthrough: None,
            timestamps: true,
            thread_names: true,
        }
    }
}

impl LogConfig {
    /// Settings from `GDS_LOG`, `RUST_LOG` and `GDS_LOG_FORMAT`.
    pub fn from_env() -> Self {
        Self::from_vars(
            std::env::var(ENV_LOG).ok().as_deref(),
            std::env::var(ENV_RUST_LOG).ok().as_deref(),
            std::env::var(ENV_LOG_FORMAT).ok().as_deref(),
        )
    }

    /// Settings from raw variable values; `gds_log` wins over `rust_log`.
    pub fn from_vars(gds_log: Option<&str>, rust_log: Option<&str>, format: Option<&str>) -> Self {
        let mut config = LogConfig::default();
        match gds_log {
            Some(spec) => config.apply_gds_log(spec),
            None => config.passthrough = rust_log.map(str::to_string),
        }
        if let Some(format) = format.and_then(|f| f.parse().ok()) {
            config.format = format;
        }
        config
    }

    fn apply_gds_log(&mut self, spec: &str) {
        for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.split_once('=') {
                Some((component, level)) => {
                    if let Ok(level) = level.trim().parse() {
                        self.components.insert(component.trim().to_string(), level);
                    }
                }
                None => {
                    if let Ok(level) = part.parse() {
                        self.level = level;
                    }
                }
            }
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LevelFilter) -> Self {
        self.level = level;
        self
    }

    pub fn with_component(mut self, component: &str, level: LevelFilter) -> Self {
        self.components.insert(component.to_string(), level);
        self
    }

    pub fn with_timestamps(mut self, enabled: bool) -> Self {
        self.timestamps = enabled;
        self
    }

    /// `EnvFilter` directive string for these settings.
    pub fn directives(&self) -> String {
        if let Some(raw) = &self.passthrough {
            return raw.clone();
        }
        let config_level = self.components.get("config").copied().unwrap_or(self.level);
        let mut directives = vec![
            format!("gds_archive={}", level_name(self.level)),
            format!("gds_config={}", level_name(config_level)),
        ];
        for (component, level) in self.components.iter().filter(|(c, _)| *c != "config") {
            directives.push(format!("gds_archive::{}={}", component, level_name(*level)));
        }
        directives.join(",")
    }
}

// `LevelFilter` displays upper-case names.
fn level_name(level: LevelFilter) -> String {
    level.to_string().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parse() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Jsonl);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_gds_log_components() {
        let config = LogConfig::from_vars(Some("warn,gatherer=debug,config=error"), None, None);
        assert_eq!(config.level, LevelFilter::WARN);
        assert_eq!(
            config.directives(),
            "gds_archive=warn,gds_config=error,gds_archive::gatherer=debug"
        );
    }

    #[test]
    fn test_gds_log_beats_rust_log() {
        let config = LogConfig::from_vars(Some("error"), Some("trace"), Some("jsonl"));
        assert_eq!(config.passthrough, None);
        assert_eq!(config.format, LogFormat::Jsonl);
        assert!(!config.directives().contains("trace"));
        assert!(config.directives().starts_with("gds_archive=error"));
    }

    #[test]
    fn test_rust_log_passthrough() {
        let config = LogConfig::from_vars(None, Some("gds_archive::shutdown=trace"), None);
        assert_eq!(config.directives(), "gds_archive::shutdown=trace");
    }

    #[test]
    fn test_bad_parts_ignored() {
        let config = LogConfig::from_vars(Some("loud,gatherer=very"), None, Some("xml"));
        assert_eq!(config.level, LevelFilter::INFO);
        assert!(config.components.is_empty());
        assert_eq!(config.format, LogFormat::Human);
    }
}
