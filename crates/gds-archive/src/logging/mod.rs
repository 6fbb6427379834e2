//! Structured logging for the archive.
//!
//! Provides dual-mode logging on stderr:
//! - Human-readable console output for interactive use
//! - JSON lines for log shippers
//!
//! Lifecycle events carry an `event` field drawn from [`event_names`].

pub mod config;

pub use config::{LogConfig, LogFormat};

use std::io::IsTerminal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Standard event names used in logging.
pub mod event_names {
    // Controller lifecycle
    pub const ARCHIVE_INIT: &str = "archive.init";
    pub const ARCHIVE_STARTED: &str = "archive.started";
    pub const ARCHIVE_RESTART: &str = "archive.restart";
    pub const STORE_STARTED: &str = "archive.store.started";
    pub const STORE_START_FAILED: &str = "archive.store.start_failed";
    pub const SESSION_INSERTED: &str = "archive.session.inserted";

    // Gatherer
    pub const GATHERER_STARTED: &str = "archive.gatherer.started";
    pub const GATHERER_FLUSHED: &str = "archive.gatherer.flushed";
    pub const FILE_LOADED: &str = "archive.file.loaded";
    pub const FILE_LOAD_FAILED: &str = "archive.file.load_failed";

    // Shutdown
    pub const SHUTDOWN_PHASE: &str = "archive.shutdown.phase";
    pub const SHUTDOWN_STALL: &str = "archive.shutdown.stall";
    pub const SHUTDOWN_COMPLETE: &str = "archive.shutdown.complete";
}

/// Install the global subscriber on stderr.
///
/// Filters with [`LogConfig::directives`]; a directive string `EnvFilter`
/// rejects falls back to the base level. Returns false if a subscriber was
/// already installed.
pub fn init_logging(config: &LogConfig) -> bool {
    let filter = EnvFilter::try_new(config.directives()).unwrap_or_else(|_| {
        EnvFilter::default().add_directive(config.level.into())
    });

    match config.format {
        LogFormat::Human => {
            let use_ansi = std::io::stderr().is_terminal();
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_names(config.thread_names)
                .with_ansi(use_ansi);

            if config.timestamps {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer)
                    .try_init()
                    .is_ok()
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer.without_time())
                    .try_init()
                    .is_ok()
            }
        }
        LogFormat::Jsonl => {
            let json_layer = fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(false)
                .with_thread_names(config.thread_names);
            tracing_subscriber::registry()
                .with(filter)
                .with(json_layer)
                .try_init()
                .is_ok()
        }
    }
}

/// Generate a run id correlating one controller lifetime in logs.
pub fn generate_run_id() -> String {
    let uuid = uuid::Uuid::new_v4();
    format!("run-{}", &uuid.simple().to_string()[..12])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn test_run_id_shape() {
        let id = generate_run_id();
        assert!(id.starts_with("run-"));
        assert_eq!(id.len(), 16);
        assert_ne!(id, generate_run_id());
    }

    #[test]
    fn test_second_init_is_noop() {
        let config = LogConfig::default().with_level(LevelFilter::OFF);
        init_logging(&config);
        assert!(!init_logging(&config));
    }
}
