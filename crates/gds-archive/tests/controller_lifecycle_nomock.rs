//! No-mock integration tests for the archive controller lifecycle.
//!
//! These tests validate:
//! - Needed-store gating from configuration and explicit requests
//! - The two-table, multi-producer ingest scenario end to end
//! - Idempotent shutdown and restart with a new session
//! - Connectivity failures reported without stopping other stores

use gds_archive::{
    AppendOutcome, ArchiveConfig, ArchiveController, ArchiveSession, ArchiveState, Domain,
    FieldValue, MemoryBackend, Record, RejectReason, StoreIdentifier,
};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

// ============================================================================
// Test Helpers
// ============================================================================

fn fast_config() -> ArchiveConfig {
    let mut config = ArchiveConfig::default();
    config.save_files = true;
    config.allocator.jitter_ms = 1;
    config.shutdown.drain_poll_ms = 10;
    config.shutdown.flush_poll_ms = 10;
    config.shutdown.idle_check_ms = 10;
    config
}

fn session(dir: &Path, domain: Domain) -> ArchiveSession {
    ArchiveSession::new(domain, dir).with_host("gds-test", 31)
}

fn nulls(id: StoreIdentifier) -> Record {
    Record::new(vec![FieldValue::Null; gds_archive::schema::column_count(id)])
}

/// Bulk-load file names left in `base`, with saving enabled.
fn saved_files(base: &Path) -> Vec<String> {
    std::fs::read_dir(base)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default()
}

fn rows_in_files(base: &Path, table: &str) -> usize {
    saved_files(base)
        .iter()
        .filter(|name| name.starts_with(&format!("{table}_")))
        .map(|name| {
            std::fs::read_to_string(base.join(name))
                .map(|content| content.lines().count())
                .unwrap_or(0)
        })
        .sum()
}

// ============================================================================
// Needed-store gating
// ============================================================================

#[test]
fn test_config_gating_without_requests() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(MemoryBackend::new());
    let config = fast_config()
        .with_use_archive(StoreIdentifier::Frame, true)
        .with_use_archive(StoreIdentifier::Product, false);
    let controller = ArchiveController::new(config, session(dir.path(), Domain::Fsw), backend.clone());

    assert!(controller.is_needed_store(StoreIdentifier::Frame));
    assert!(!controller.is_needed_store(StoreIdentifier::Product));

    assert!(controller.start_all_stores());
    assert!(controller
        .append(StoreIdentifier::Frame, nulls(StoreIdentifier::Frame))
        .is_accepted());
    assert_eq!(
        controller.append(StoreIdentifier::Product, nulls(StoreIdentifier::Product)),
        AppendOutcome::Rejected(RejectReason::NotNeeded)
    );

    let base = controller.file_base().unwrap();
    controller.shut_down();

    assert!(!backend.loaded_stores().contains(&StoreIdentifier::Product));
    assert!(saved_files(&base)
        .iter()
        .all(|name| !name.starts_with("Product_")));
    assert_eq!(rows_in_files(&base, "Frame"), 1);
}

// ============================================================================
// Scenario
// ============================================================================

#[test]
fn test_two_tables_four_producers() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(MemoryBackend::new());
    let controller = Arc::new(ArchiveController::new(
        fast_config(),
        session(dir.path(), Domain::Fsw),
        backend.clone(),
    ));
    controller
        .init_with(&[StoreIdentifier::Evr, StoreIdentifier::Packet])
        .unwrap();
    assert!(controller.start_all_stores());

    // Two producers per table; 3 Evr rows and 5 Packet rows in total.
    let plan = [
        (StoreIdentifier::Evr, 2),
        (StoreIdentifier::Evr, 1),
        (StoreIdentifier::Packet, 3),
        (StoreIdentifier::Packet, 2),
    ];
    let handles: Vec<_> = plan
        .into_iter()
        .map(|(id, count)| {
            let controller = Arc::clone(&controller);
            thread::spawn(move || {
                for _ in 0..count {
                    assert!(controller.append(id, nulls(id)).is_accepted());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let base = controller.file_base().unwrap();
    let registered = controller.registered_stores();
    controller.shut_down();
    assert_eq!(controller.state(), ArchiveState::Stopped);

    assert_eq!(rows_in_files(&base, "Evr"), 3);
    assert_eq!(rows_in_files(&base, "Packet"), 5);
    assert_eq!(backend.row_count(StoreIdentifier::Evr), 3);
    assert_eq!(backend.row_count(StoreIdentifier::Packet), 5);

    for name in saved_files(&base) {
        let table = name.split("_FSW_").next().unwrap();
        let id: StoreIdentifier = table.parse().unwrap();
        assert!(registered.contains(&id), "file for unneeded store: {name}");
        assert!(controller.is_needed_store(id));
    }
}

#[test]
fn test_bookkeeping_rows_with_explicit_requests() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(MemoryBackend::new());
    let controller = ArchiveController::new(
        fast_config(),
        session(dir.path(), Domain::Fsw),
        backend.clone(),
    );
    controller.init_with(&[StoreIdentifier::Evr]).unwrap();
    assert!(controller.start_all_stores());
    assert!(controller.session_stores_started());

    assert!(controller
        .append(StoreIdentifier::Evr, nulls(StoreIdentifier::Evr))
        .is_accepted());
    assert!(controller.update_session_end_time().is_accepted());
    assert!(controller
        .append_context_value("station", "dss-14")
        .is_accepted());
    controller.shut_down();

    assert_eq!(backend.sessions_inserted().len(), 1);
    assert_eq!(backend.row_count(StoreIdentifier::Host), 1);
    assert_eq!(backend.row_count(StoreIdentifier::EndSession), 1);
    assert_eq!(backend.row_count(StoreIdentifier::ContextConfig), 1);
    assert_eq!(backend.row_count(StoreIdentifier::Evr), 1);
}

// ============================================================================
// Shutdown and restart
// ============================================================================

#[test]
fn test_second_shutdown_returns_immediately() {
    let dir = TempDir::new().unwrap();
    let controller = ArchiveController::new(
        fast_config(),
        session(dir.path(), Domain::Fsw),
        Arc::new(MemoryBackend::new()),
    );
    controller.init_with(&[StoreIdentifier::Evr]).unwrap();
    assert!(controller.start_all_stores());
    controller.shut_down();

    let started = Instant::now();
    controller.shut_down();
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(controller.state(), ArchiveState::Stopped);
}

#[test]
fn test_shutdown_before_init_is_noop() {
    let dir = TempDir::new().unwrap();
    let controller = ArchiveController::new(
        fast_config(),
        session(dir.path(), Domain::Fsw),
        Arc::new(MemoryBackend::new()),
    );
    controller.shut_down();
    assert_eq!(controller.state(), ArchiveState::Uninitialized);
}

#[test]
fn test_restart_with_new_session() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(MemoryBackend::new());
    let controller = ArchiveController::new(
        fast_config(),
        session(dir.path(), Domain::Fsw),
        backend.clone(),
    );
    controller.init_with(&[StoreIdentifier::Evr]).unwrap();
    assert!(controller.start_all_stores());
    controller.append(StoreIdentifier::Evr, nulls(StoreIdentifier::Evr));
    controller.get_associated_id("A-0001", Domain::Fsw);
    assert_eq!(controller.session().number, Some(1));

    let next = session(dir.path(), Domain::Sse);
    let restarted = controller
        .restart_archive_with_new_context(next, &[StoreIdentifier::SseEvr])
        .unwrap();
    assert!(restarted);
    assert!(controller.is_up());
    assert_eq!(controller.session().domain, Domain::Sse);
    assert_eq!(controller.session().number, Some(2));
    assert_eq!(controller.get_associated_id("B-0002", Domain::Fsw).id, 1);

    let registered = controller.registered_stores();
    assert!(registered.contains(&StoreIdentifier::SseEvr));
    assert!(!registered.contains(&StoreIdentifier::Evr));

    controller.append(StoreIdentifier::SseEvr, nulls(StoreIdentifier::SseEvr));
    controller.shut_down();
    assert_eq!(backend.row_count(StoreIdentifier::Evr), 1);
    assert_eq!(backend.row_count(StoreIdentifier::SseEvr), 1);
}

#[test]
fn test_drop_while_running_flushes() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(MemoryBackend::new());
    {
        let controller = ArchiveController::new(
            fast_config(),
            session(dir.path(), Domain::Fsw),
            backend.clone(),
        );
        controller.init_with(&[StoreIdentifier::Evr]).unwrap();
        assert!(controller.start_all_stores());
        controller.append(StoreIdentifier::Evr, nulls(StoreIdentifier::Evr));
    }
    assert_eq!(backend.row_count(StoreIdentifier::Evr), 1);
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_connect_failure_is_store_scoped() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(MemoryBackend::new());
    backend.refuse_connect(StoreIdentifier::Packet);
    let controller = ArchiveController::new(
        fast_config(),
        session(dir.path(), Domain::Fsw),
        backend.clone(),
    );
    controller
        .init_with(&[StoreIdentifier::Evr, StoreIdentifier::Packet])
        .unwrap();

    assert!(!controller.start_all_stores());
    assert!(controller
        .append(StoreIdentifier::Evr, nulls(StoreIdentifier::Evr))
        .is_accepted());
    assert_eq!(
        controller.append(StoreIdentifier::Packet, nulls(StoreIdentifier::Packet)),
        AppendOutcome::Rejected(RejectReason::NotStarted)
    );

    controller.shut_down();
    assert_eq!(controller.state(), ArchiveState::Stopped);
    assert_eq!(backend.row_count(StoreIdentifier::Evr), 1);
}

#[test]
fn test_database_disabled() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(MemoryBackend::new());
    let mut config = fast_config();
    config.use_database = false;
    let controller = ArchiveController::new(config, session(dir.path(), Domain::Fsw), backend.clone());

    assert!(!controller.start_all_stores());
    controller.shut_down();
    assert_eq!(controller.state(), ArchiveState::Stopped);
    assert!(backend.sessions_inserted().is_empty());
    assert!(backend.loads().is_empty());
}
