//! Ground data archive ingestion.
//!
//! This crate provides:
//! - Per-table inserters that buffer records from many producer threads
//! - A gatherer thread that turns buffered records into uniquely named
//!   bulk-load files and hands them to a database backend
//! - Channel-id assignment per telemetry domain
//! - The ordered shutdown protocol that loads every accepted record before
//!   stores close
//!
//! Embedders construct an [`ArchiveController`] with an [`ArchiveBackend`]
//! and drive it through `start_all_stores` and `shut_down`.

pub mod allocator;
pub mod backend;
pub mod controller;
pub mod gatherer;
pub mod ids;
pub mod inserter;
pub mod logging;
pub mod monitor;
pub mod record;
pub mod schema;
pub mod shutdown;
pub mod span;
pub mod store;

pub use allocator::{AllocatedFile, FileIdentity, RetryPolicy, UniqueFileAllocator};
pub use backend::{ArchiveBackend, BulkLoadFile, DryRunBackend, MemoryBackend};
pub use controller::ArchiveController;
pub use gatherer::{DrainReport, GatherContext, GatherSettings, Gatherer, PassMode};
pub use ids::{AssignedId, IdAssignmentRegistry, ID_START};
pub use inserter::{AppendOutcome, Inserter, RejectReason};
pub use logging::{init_logging, LogConfig, LogFormat};
pub use monitor::{AggregateStats, MonitorStats, StoreMonitor, StoreRegistry};
pub use record::{split_row, FieldValue, Record};
pub use shutdown::ArchiveState;
pub use span::{SessionSpan, SpanSummary};
pub use store::TableStore;

pub use gds_common::{ArchiveSession, Domain, Error, Result, StoreIdentifier};
pub use gds_config::ArchiveConfig;
