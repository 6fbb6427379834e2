//! Table-specific writers.
//!
//! A `TableStore` knows its table's column layout, turns drained records into
//! bulk-load rows, and tracks its connection to the backend.

use crate::backend::ArchiveBackend;
use crate::inserter::RejectReason;
use crate::record::Record;
use crate::schema;
use gds_common::{Error, Result, StoreIdentifier};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

#[derive(Debug)]
pub struct TableStore {
    id: StoreIdentifier,
    table: String,
    columns: &'static [&'static str],
    connected: AtomicBool,
    closed: AtomicBool,
}

impl TableStore {
    /// `table` is the actual database table name (extended suffix applied).
    pub fn new(id: StoreIdentifier, table: impl Into<String>) -> Self {
        TableStore {
            id,
            table: table.into(),
            columns: schema::columns(id),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> StoreIdentifier {
        self.id
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &'static [&'static str] {
        self.columns
    }

    /// Connect through the backend; failure leaves the store unusable.
    pub fn connect(&self, backend: &dyn ArchiveBackend) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        backend.connect(self.id).map_err(|e| match e {
            Error::Connectivity { .. } => e,
            other => Error::Connectivity {
                store: self.id.to_string(),
                reason: other.to_string(),
            },
        })?;
        self.connected.store(true, Ordering::SeqCst);
        self.closed.store(false, Ordering::SeqCst);
        debug!(store = %self.id, table = %self.table, "store connected");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Reject records that do not fit the table layout.
    pub fn check(&self, record: &Record) -> std::result::Result<(), RejectReason> {
        if record.values.len() == self.columns.len() {
            Ok(())
        } else {
            Err(RejectReason::ColumnMismatch {
                expected: self.columns.len(),
                actual: record.values.len(),
            })
        }
    }

    /// Write a batch as rows into `file` and sync it; returns rows written.
    pub fn write_batch(&self, file: File, batch: &[Record]) -> Result<u64> {
        let mut out = BufWriter::new(file);
        for record in batch {
            if let Err(RejectReason::ColumnMismatch { expected, actual }) = self.check(record) {
                return Err(Error::ColumnMismatch {
                    table: self.table.clone(),
                    expected,
                    actual,
                });
            }
            out.write_all(record.to_row().as_bytes())?;
        }
        let file = out.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(batch.len() as u64)
    }

    /// Close through the backend; closing twice is a no-op.
    pub fn close(&self, backend: &dyn ArchiveBackend) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.connected.store(false, Ordering::SeqCst);
        backend.close(self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::record::FieldValue;
    use tempfile::TempDir;

    fn host_record(name: &str) -> Record {
        Record::new(vec![
            FieldValue::UInt(1),
            FieldValue::from(name),
            FieldValue::Int(0),
        ])
    }

    #[test]
    fn test_write_batch_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Host");
        let store = TableStore::new(StoreIdentifier::Host, "Host");
        let rows = store
            .write_batch(
                File::create(&path).unwrap(),
                &[host_record("a"), host_record("b")],
            )
            .unwrap();
        assert_eq!(rows, 2);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1,a,0\n1,b,0\n");
    }

    #[test]
    fn test_check_column_count() {
        let store = TableStore::new(StoreIdentifier::Host, "Host");
        assert!(store.check(&host_record("a")).is_ok());
        assert_eq!(
            store.check(&Record::new(vec![FieldValue::Null])),
            Err(RejectReason::ColumnMismatch {
                expected: 3,
                actual: 1
            })
        );
    }

    #[test]
    fn test_connect_failure_is_connectivity() {
        let backend = MemoryBackend::new();
        backend.refuse_connect(StoreIdentifier::Session);
        let store = TableStore::new(StoreIdentifier::Session, "Session");
        let err = store.connect(&backend).unwrap_err();
        assert_eq!(err.code(), 20);
        assert!(!store.is_connected());
    }

    #[test]
    fn test_close_is_idempotent() {
        let backend = MemoryBackend::new();
        let store = TableStore::new(StoreIdentifier::Frame, "Frame");
        store.connect(&backend).unwrap();
        store.close(&backend).unwrap();
        store.close(&backend).unwrap();
        assert!(!store.is_connected());
        assert!(backend.closed_stores().contains(&StoreIdentifier::Frame));
    }
}
