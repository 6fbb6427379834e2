//! The database side of the archive.
//!
//! The controller never talks SQL. It hands finished bulk-load files to an
//! `ArchiveBackend`, which loads them into the named table and reports back
//! synchronously so the file can be cleaned up.

use crate::record::split_row;
use gds_common::{ArchiveSession, Error, Result, StoreIdentifier};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, info};

/// A finished bulk-load file ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkLoadFile {
    pub path: PathBuf,
    pub store: StoreIdentifier,
    /// Table name as created in the database (extended suffix applied).
    pub table: String,
    pub rows: u64,
}

/// Connection to the relational store.
pub trait ArchiveBackend: Send + Sync {
    /// Open whatever the store needs to accept loads.
    fn connect(&self, store: StoreIdentifier) -> Result<()>;

    /// Record the session row and return the session number to use.
    ///
    /// Called only when the session has no number yet.
    fn insert_session(&self, session: &ArchiveSession) -> Result<u64>;

    /// Load a file into its table and return the number of rows accepted.
    fn bulk_load(&self, file: &BulkLoadFile) -> Result<u64>;

    /// Release resources held for the store.
    fn close(&self, _store: StoreIdentifier) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryState {
    rows: BTreeMap<StoreIdentifier, Vec<Vec<Option<String>>>>,
    loads: Vec<BulkLoadFile>,
    connected: BTreeSet<StoreIdentifier>,
    closed: BTreeSet<StoreIdentifier>,
    sessions: Vec<ArchiveSession>,
}

/// Backend that parses loaded files back into rows and keeps them in memory.
#[derive(Debug)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    next_session: AtomicU64,
    refuse_connect: Mutex<HashSet<StoreIdentifier>>,
    fail_loads: AtomicU32,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend {
            state: Mutex::new(MemoryState::default()),
            next_session: AtomicU64::new(1),
            refuse_connect: Mutex::new(HashSet::new()),
            fail_loads: AtomicU32::new(0),
        }
    }

    /// Make `connect` fail for a store.
    pub fn refuse_connect(&self, store: StoreIdentifier) {
        self.refuse_connect
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(store);
    }

    /// Make the next `count` bulk loads fail.
    pub fn fail_next_loads(&self, count: u32) {
        self.fail_loads.store(count, Ordering::SeqCst);
    }

    /// Rows loaded for a store, in load order.
    pub fn rows(&self, store: StoreIdentifier) -> Vec<Vec<Option<String>>> {
        self.lock().rows.get(&store).cloned().unwrap_or_default()
    }

    pub fn row_count(&self, store: StoreIdentifier) -> usize {
        self.lock().rows.get(&store).map_or(0, Vec::len)
    }

    /// Every successful load, in order.
    pub fn loads(&self) -> Vec<BulkLoadFile> {
        self.lock().loads.clone()
    }

    /// Stores that received at least one load.
    pub fn loaded_stores(&self) -> BTreeSet<StoreIdentifier> {
        self.lock().rows.keys().copied().collect()
    }

    pub fn is_connected(&self, store: StoreIdentifier) -> bool {
        self.lock().connected.contains(&store)
    }

    pub fn closed_stores(&self) -> BTreeSet<StoreIdentifier> {
        self.lock().closed.clone()
    }

    pub fn sessions_inserted(&self) -> Vec<ArchiveSession> {
        self.lock().sessions.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ArchiveBackend for MemoryBackend {
    fn connect(&self, store: StoreIdentifier) -> Result<()> {
        let refused = self
            .refuse_connect
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&store);
        if refused {
            return Err(Error::Connectivity {
                store: store.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        let mut state = self.lock();
        state.connected.insert(store);
        state.closed.remove(&store);
        Ok(())
    }

    fn insert_session(&self, session: &ArchiveSession) -> Result<u64> {
        let number = self.next_session.fetch_add(1, Ordering::SeqCst);
        self.lock().sessions.push(session.clone());
        Ok(number)
    }

    fn bulk_load(&self, file: &BulkLoadFile) -> Result<u64> {
        let pending_failures = self
            .fail_loads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if pending_failures.is_ok() {
            return Err(Error::BulkLoad {
                table: file.table.clone(),
                path: file.path.clone(),
                reason: "injected load failure".to_string(),
            });
        }

        let content = std::fs::read_to_string(&file.path)?;
        let parsed: Vec<Vec<Option<String>>> = content.lines().map(split_row).collect();
        let count = parsed.len() as u64;

        let mut state = self.lock();
        state.rows.entry(file.store).or_default().extend(parsed);
        state.loads.push(file.clone());
        Ok(count)
    }

    fn close(&self, store: StoreIdentifier) -> Result<()> {
        let mut state = self.lock();
        state.connected.remove(&store);
        state.closed.insert(store);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Dry-run backend
// ---------------------------------------------------------------------------

/// Backend that logs every call and loads nothing.
#[derive(Debug, Default)]
pub struct DryRunBackend {
    files: AtomicU64,
    rows: AtomicU64,
}

impl DryRunBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn files_seen(&self) -> u64 {
        self.files.load(Ordering::SeqCst)
    }

    pub fn rows_seen(&self) -> u64 {
        self.rows.load(Ordering::SeqCst)
    }
}

impl ArchiveBackend for DryRunBackend {
    fn connect(&self, store: StoreIdentifier) -> Result<()> {
        debug!(store = %store, "dry-run connect");
        Ok(())
    }

    fn insert_session(&self, session: &ArchiveSession) -> Result<u64> {
        info!(session = %session, "dry-run session insert");
        Ok(session.number.unwrap_or(1).max(1))
    }

    fn bulk_load(&self, file: &BulkLoadFile) -> Result<u64> {
        self.files.fetch_add(1, Ordering::SeqCst);
        self.rows.fetch_add(file.rows, Ordering::SeqCst);
        info!(
            table = %file.table,
            path = %file.path.display(),
            rows = file.rows,
            "dry-run bulk load"
        );
        Ok(file.rows)
    }
}
