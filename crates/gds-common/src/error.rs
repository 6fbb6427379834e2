//! Error types for the archive pipeline.
//!
//! Every error carries:
//! - A stable numeric code for machine parsing
//! - A category for grouping
//! - A recoverability hint for callers deciding whether to retry
//! - A remediation string for operators
//!
//! Code ranges:
//! - 10-19: configuration and session identity
//! - 20-29: store connectivity
//! - 30-39: bulk-load file allocation and loading
//! - 40-49: shutdown
//! - 50-59: store registry
//! - 60-69: I/O and serialization

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration and session identity errors.
    Config,
    /// A table store could not reach the database.
    Connectivity,
    /// Bulk-load file creation failures.
    Allocation,
    /// Bulk-load submission failures.
    Load,
    /// Shutdown protocol stalls.
    Shutdown,
    /// Store registration errors.
    Registry,
    /// File I/O and serialization errors.
    Io,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Connectivity => write!(f, "connectivity"),
            ErrorCategory::Allocation => write!(f, "allocation"),
            ErrorCategory::Load => write!(f, "load"),
            ErrorCategory::Shutdown => write!(f, "shutdown"),
            ErrorCategory::Registry => write!(f, "registry"),
            ErrorCategory::Io => write!(f, "io"),
        }
    }
}

/// Unified error type for the archive pipeline.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid session identity: {0}")]
    InvalidSession(String),

    #[error("cannot create bulk-load directory {}: {reason}", path.display())]
    FileBase { path: PathBuf, reason: String },

    // Connectivity errors (20-29)
    #[error("store {store} failed to connect: {reason}")]
    Connectivity { store: String, reason: String },

    // Allocation and load errors (30-39)
    #[error("no bulk-load file for {table} after {attempts} attempts in {}", base.display())]
    FileAllocation {
        table: String,
        base: PathBuf,
        attempts: u32,
    },

    #[error("bulk load of {} into {table} failed: {reason}", path.display())]
    BulkLoad {
        table: String,
        path: PathBuf,
        reason: String,
    },

    #[error("record for {table} has {actual} values, expected {expected}")]
    ColumnMismatch {
        table: String,
        expected: usize,
        actual: usize,
    },

    // Shutdown errors (40-49)
    #[error("{what} did not stop within {waited_ms}ms")]
    ShutdownStall { what: String, waited_ms: u64 },

    // Registry errors (50-59)
    #[error("store {store} is already registered")]
    DuplicateStore { store: String },

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns the stable error code.
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::InvalidSession(_) => 11,
            Error::FileBase { .. } => 12,
            Error::Connectivity { .. } => 20,
            Error::FileAllocation { .. } => 30,
            Error::BulkLoad { .. } => 31,
            Error::ColumnMismatch { .. } => 32,
            Error::ShutdownStall { .. } => 40,
            Error::DuplicateStore { .. } => 50,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) | Error::InvalidSession(_) | Error::FileBase { .. } => {
                ErrorCategory::Config
            }
            Error::Connectivity { .. } => ErrorCategory::Connectivity,
            Error::FileAllocation { .. } => ErrorCategory::Allocation,
            Error::BulkLoad { .. } | Error::ColumnMismatch { .. } => ErrorCategory::Load,
            Error::ShutdownStall { .. } => ErrorCategory::Shutdown,
            Error::DuplicateStore { .. } => ErrorCategory::Registry,
            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,
        }
    }

    /// Returns whether retrying later may succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Fatal at init until the caller fixes its inputs
            Error::Config(_) => false,
            Error::InvalidSession(_) => false,
            Error::FileBase { .. } => true,

            // Store-scoped, the database may come back
            Error::Connectivity { .. } => true,

            // Pending rows stay queued for the next gatherer pass
            Error::FileAllocation { .. } => true,
            Error::BulkLoad { .. } => true,
            Error::ColumnMismatch { .. } => false,

            Error::ShutdownStall { .. } => false,

            // Programming error
            Error::DuplicateStore { .. } => false,

            Error::Io(_) => true,
            Error::Json(_) => false,
        }
    }

    /// Returns a human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::Config(_) => "Check the archive configuration file for invalid values.",
            Error::InvalidSession(_) => {
                "Supply a session with a host name, a non-zero host id, and an output directory."
            }
            Error::FileBase { .. } => {
                "Verify the output directory exists and is writable by this process."
            }
            Error::Connectivity { .. } => {
                "Verify the database is reachable; the store stays unusable until restart."
            }
            Error::FileAllocation { .. } => {
                "Check free space and permissions in the bulk-load directory; rows are retried next pass."
            }
            Error::BulkLoad { .. } => {
                "Inspect the retained bulk-load file and the database log for the rejected rows."
            }
            Error::ColumnMismatch { .. } => {
                "The producer built a record for a different table layout; fix the producer."
            }
            Error::ShutdownStall { .. } => {
                "A worker thread is stuck, usually in a bulk load; check database health."
            }
            Error::DuplicateStore { .. } => {
                "Each table may be registered once per controller; this is a programming error."
            }
            Error::Io(_) => "Check file permissions and available disk space.",
            Error::Json(_) => "Report this as a bug; serialization should not fail.",
        }
    }
}
