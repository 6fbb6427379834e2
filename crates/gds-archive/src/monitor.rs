//! Store monitors and the per-controller monitor registry.
//!
//! A monitor pairs one table's `Inserter` with its `TableStore` and keeps the
//! bookkeeping the gatherer and the shutdown supervisor look at. Aggregate
//! tables get a monitor that also tallies rolled-up channel samples; the
//! variant is picked by `monitor_for`.

use crate::inserter::Inserter;
use crate::record::Record;
use crate::store::TableStore;
use gds_common::{Error, Result, StoreIdentifier};
use gds_config::ArchiveConfig;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Roll-up counters kept for aggregate tables. Reporting only.
#[derive(Debug, Default)]
pub struct AggregateTally {
    /// Samples appended but not yet written to a file.
    in_progress: AtomicU64,
    /// Samples in the file currently being loaded.
    ready_for_insert: AtomicU64,
    /// Samples in successfully loaded files.
    loaded: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AggregateStats {
    pub in_progress: u64,
    pub ready_for_insert: u64,
    pub loaded: u64,
}

/// Monitor variant.
#[derive(Debug)]
pub enum MonitorKind {
    Plain,
    Aggregate(AggregateTally),
}

/// Snapshot of one monitor's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorStats {
    pub store: StoreIdentifier,
    pub table: String,
    pub pending: usize,
    pub high_water: usize,
    pub values_processed: u64,
    pub files_generated: u64,
    pub load_failures: u64,
    pub accepting: bool,
    pub export: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<AggregateStats>,
}

/// One table's pipeline state.
#[derive(Debug)]
pub struct StoreMonitor {
    id: StoreIdentifier,
    store: TableStore,
    inserter: Inserter,
    export: bool,
    loading: AtomicBool,
    values_processed: AtomicU64,
    files_generated: AtomicU64,
    load_failures: AtomicU64,
    kind: MonitorKind,
}

/// Build the monitor for `id`, choosing the aggregate variant where it applies.
pub fn monitor_for(id: StoreIdentifier, table: String, config: &ArchiveConfig) -> StoreMonitor {
    let kind = if id.is_aggregate() {
        MonitorKind::Aggregate(AggregateTally::default())
    } else {
        MonitorKind::Plain
    };
    StoreMonitor {
        id,
        store: TableStore::new(id, table),
        inserter: Inserter::new(id, &config.inserter),
        export: config.export_enabled(id),
        loading: AtomicBool::new(false),
        values_processed: AtomicU64::new(0),
        files_generated: AtomicU64::new(0),
        load_failures: AtomicU64::new(0),
        kind,
    }
}

/// Clears the in-flight flag when a load attempt ends, however it ends.
pub struct LoadGuard<'a> {
    monitor: &'a StoreMonitor,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        self.monitor.loading.store(false, Ordering::SeqCst);
    }
}

impl StoreMonitor {
    pub fn id(&self) -> StoreIdentifier {
        self.id
    }

    pub fn store(&self) -> &TableStore {
        &self.store
    }

    pub fn inserter(&self) -> &Inserter {
        &self.inserter
    }

    pub fn kind(&self) -> &MonitorKind {
        &self.kind
    }

    pub fn export_enabled(&self) -> bool {
        self.export
    }

    /// True while producers may still feed the store or a load is in flight.
    pub fn is_bulk_loadable_and_active(&self) -> bool {
        self.inserter.is_accepting() || self.loading.load(Ordering::SeqCst)
    }

    pub fn has_backlog(&self) -> bool {
        !self.inserter.is_empty()
    }

    /// Mark a drain-write-load cycle as in flight.
    pub fn begin_load(&self) -> LoadGuard<'_> {
        self.loading.store(true, Ordering::SeqCst);
        LoadGuard { monitor: self }
    }

    /// Account for a record the inserter accepted.
    pub fn note_appended(&self, aggregate_count: u32) {
        if let MonitorKind::Aggregate(tally) = &self.kind {
            tally
                .in_progress
                .fetch_add(u64::from(aggregate_count), Ordering::SeqCst);
        }
    }

    /// Account for a batch written to a file that is about to be loaded.
    pub fn note_file_written(&self, batch: &[Record]) {
        self.files_generated.fetch_add(1, Ordering::SeqCst);
        if let MonitorKind::Aggregate(tally) = &self.kind {
            let samples: u64 = batch.iter().map(|r| u64::from(r.aggregate_count)).sum();
            saturating_sub(&tally.in_progress, samples);
            tally.ready_for_insert.store(samples, Ordering::SeqCst);
        }
    }

    /// Account for a successful load of `rows` rows.
    pub fn note_loaded(&self, rows: u64) {
        self.values_processed.fetch_add(rows, Ordering::SeqCst);
        if let MonitorKind::Aggregate(tally) = &self.kind {
            let samples = tally.ready_for_insert.swap(0, Ordering::SeqCst);
            tally.loaded.fetch_add(samples, Ordering::SeqCst);
        }
    }

    pub fn note_load_failed(&self) {
        self.load_failures.fetch_add(1, Ordering::SeqCst);
        if let MonitorKind::Aggregate(tally) = &self.kind {
            tally.ready_for_insert.store(0, Ordering::SeqCst);
        }
    }

    pub fn values_processed(&self) -> u64 {
        self.values_processed.load(Ordering::SeqCst)
    }

    pub fn files_generated(&self) -> u64 {
        self.files_generated.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> MonitorStats {
        let aggregate = match &self.kind {
            MonitorKind::Plain => None,
            MonitorKind::Aggregate(tally) => Some(AggregateStats {
                in_progress: tally.in_progress.load(Ordering::SeqCst),
                ready_for_insert: tally.ready_for_insert.load(Ordering::SeqCst),
                loaded: tally.loaded.load(Ordering::SeqCst),
            }),
        };
        MonitorStats {
            store: self.id,
            table: self.store.table().to_string(),
            pending: self.inserter.size(),
            high_water: self.inserter.high_water_mark(),
            values_processed: self.values_processed(),
            files_generated: self.files_generated(),
            load_failures: self.load_failures.load(Ordering::SeqCst),
            accepting: self.inserter.is_accepting(),
            export: self.export,
            aggregate,
        }
    }
}

fn saturating_sub(counter: &AtomicU64, amount: u64) {
    let _ = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
        Some(v.saturating_sub(amount))
    });
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// StoreIdentifier → StoreMonitor, at most one live monitor per identifier.
#[derive(Debug, Default)]
pub struct StoreRegistry {
    monitors: RwLock<BTreeMap<StoreIdentifier, Arc<StoreMonitor>>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a monitor; a second monitor for the same identifier is an error.
    pub fn register(&self, monitor: StoreMonitor) -> Result<Arc<StoreMonitor>> {
        let mut monitors = self.monitors.write().unwrap_or_else(|e| e.into_inner());
        let id = monitor.id();
        if monitors.contains_key(&id) {
            return Err(Error::DuplicateStore {
                store: id.to_string(),
            });
        }
        let monitor = Arc::new(monitor);
        monitors.insert(id, Arc::clone(&monitor));
        Ok(monitor)
    }

    pub fn get(&self, id: StoreIdentifier) -> Option<Arc<StoreMonitor>> {
        self.monitors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    /// Every monitor, in identifier order.
    pub fn all(&self) -> Vec<Arc<StoreMonitor>> {
        self.monitors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn ids(&self) -> Vec<StoreIdentifier> {
        self.monitors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect()
    }

    pub fn any_active(&self) -> bool {
        self.all().iter().any(|m| m.is_bulk_loadable_and_active())
    }

    /// Drop every monitor.
    pub fn clear(&self) {
        self.monitors
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn len(&self) -> usize {
        self.monitors.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FieldValue;

    fn aggregate_record(samples: u32) -> Record {
        Record::new(vec![FieldValue::Null; 7]).with_aggregate_count(samples)
    }

    #[test]
    fn test_factory_picks_variant() {
        let config = ArchiveConfig::default();
        let plain = monitor_for(StoreIdentifier::Evr, "Evr".into(), &config);
        assert!(matches!(plain.kind(), MonitorKind::Plain));
        assert!(plain.stats().aggregate.is_none());

        let agg = monitor_for(
            StoreIdentifier::HeaderChannelAggregate,
            "HeaderChannelAggregate".into(),
            &config,
        );
        assert!(matches!(agg.kind(), MonitorKind::Aggregate(_)));
    }

    #[test]
    fn test_aggregate_tally_flow() {
        let monitor = monitor_for(
            StoreIdentifier::ChannelAggregate,
            "ChannelAggregate".into(),
            &ArchiveConfig::default(),
        );
        let batch = vec![aggregate_record(10), aggregate_record(5)];
        for record in &batch {
            monitor.note_appended(record.aggregate_count);
        }
        assert_eq!(monitor.stats().aggregate.unwrap().in_progress, 15);

        monitor.note_file_written(&batch);
        let stats = monitor.stats().aggregate.unwrap();
        assert_eq!(stats.in_progress, 0);
        assert_eq!(stats.ready_for_insert, 15);

        monitor.note_loaded(2);
        let stats = monitor.stats();
        assert_eq!(stats.values_processed, 2);
        assert_eq!(stats.files_generated, 1);
        assert_eq!(stats.aggregate.unwrap().loaded, 15);
    }

    #[test]
    fn test_active_tracks_accepting_and_loading() {
        let monitor = monitor_for(StoreIdentifier::Frame, "Frame".into(), &ArchiveConfig::default());
        assert!(!monitor.is_bulk_loadable_and_active());
        monitor.inserter().start();
        assert!(monitor.is_bulk_loadable_and_active());
        monitor.inserter().stop();
        assert!(!monitor.is_bulk_loadable_and_active());
        {
            let _guard = monitor.begin_load();
            assert!(monitor.is_bulk_loadable_and_active());
        }
        assert!(!monitor.is_bulk_loadable_and_active());
    }

    #[test]
    fn test_export_flag_from_config() {
        let mut config = ArchiveConfig::default();
        config.export.evr = true;
        assert!(monitor_for(StoreIdentifier::SseEvr, "SseEvr".into(), &config).export_enabled());
        assert!(!monitor_for(StoreIdentifier::Frame, "Frame".into(), &config).export_enabled());
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let config = ArchiveConfig::default();
        let registry = StoreRegistry::new();
        registry
            .register(monitor_for(StoreIdentifier::Frame, "Frame".into(), &config))
            .unwrap();
        let err = registry
            .register(monitor_for(StoreIdentifier::Frame, "Frame".into(), &config))
            .unwrap_err();
        assert_eq!(err.code(), 50);
        assert_eq!(registry.len(), 1);

        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.get(StoreIdentifier::Frame).is_none());
    }
}
