//! Ground data archive common types and errors.
//!
//! This crate provides the vocabulary shared by the config and archive crates:
//! - The closed set of archive tables (`StoreIdentifier`)
//! - Telemetry domains and the per-run session identity
//! - The unified error type with stable codes

pub mod error;
pub mod session;
pub mod store;

pub use error::{Error, ErrorCategory, Result};
pub use session::{derive_host_id, detect_host_name, ArchiveSession, Domain};
pub use store::{ExportCategory, StoreIdentifier};
