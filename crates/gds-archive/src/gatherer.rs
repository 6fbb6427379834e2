//! The shared background worker that turns pending records into bulk-load files.
//!
//! One gatherer thread runs per controller. Each interval (or early, when an
//! inserter crosses the row limit) it visits every active monitor with a
//! backlog and, for each, repeatedly:
//! 1. allocates a unique file,
//! 2. drains up to `row_limit` records into it,
//! 3. copies it to the export directory if the store exports,
//! 4. submits it to the backend and deletes it unless files are saved.
//!
//! The file is allocated before anything is drained, so a failed allocation
//! leaves every record queued for the next pass.
//!
//! `begin_flush` asks the thread for one exhaustive pass over every store,
//! after which it clears the flushing flag and exits.

use crate::allocator::{remove_with_retry, RetryPolicy, UniqueFileAllocator};
use crate::backend::{ArchiveBackend, BulkLoadFile};
use crate::logging::event_names;
use crate::monitor::{StoreMonitor, StoreRegistry};
use gds_common::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Gatherer thread name.
pub const GATHERER_THREAD: &str = "archive-gatherer";

/// Tunables for one controller session.
#[derive(Debug, Clone)]
pub struct GatherSettings {
    pub interval: Duration,
    pub row_limit: usize,
    pub save_files: bool,
    pub file_base: PathBuf,
    pub export_dir: PathBuf,
    pub retry: RetryPolicy,
}

/// Everything a drain needs.
#[derive(Clone)]
pub struct GatherContext {
    pub registry: Arc<StoreRegistry>,
    pub allocator: Arc<UniqueFileAllocator>,
    pub backend: Arc<dyn ArchiveBackend>,
    pub settings: GatherSettings,
}

/// Which monitors a pass visits and how much it takes from each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassMode {
    /// Active monitors only, up to the backlog present when the drain began.
    Interval,
    /// Every monitor, until its inserter is empty or a file cannot be made.
    Exhaustive,
}

/// Outcome of draining one monitor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub files: u64,
    pub rows: u64,
    pub failed_loads: u64,
    /// Records left queued because a file could not be allocated or written.
    pub retained: usize,
}

impl DrainReport {
    fn absorb(&mut self, other: DrainReport) {
        self.files += other.files;
        self.rows += other.rows;
        self.failed_loads += other.failed_loads;
        self.retained += other.retained;
    }
}

#[derive(Debug, Default)]
struct Signal {
    kicked: bool,
    flush: bool,
    stop: bool,
}

enum Wake {
    Interval,
    Kicked,
    Flush,
    Stop,
}

/// Handle on the gatherer thread and its signals.
pub struct Gatherer {
    signal: Mutex<Signal>,
    wake: Condvar,
    flushing: AtomicBool,
    passes: AtomicU64,
    context: Mutex<Option<GatherContext>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Default for Gatherer {
    fn default() -> Self {
        Self::new()
    }
}

impl Gatherer {
    pub fn new() -> Self {
        Gatherer {
            signal: Mutex::new(Signal::default()),
            wake: Condvar::new(),
            flushing: AtomicBool::new(false),
            passes: AtomicU64::new(0),
            context: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    /// Install the context used by the thread and by inline drains.
    pub fn configure(&self, context: GatherContext) {
        *lock(&self.context) = Some(context);
    }

    pub fn context(&self) -> Option<GatherContext> {
        lock(&self.context).clone()
    }

    /// Spawn the worker thread; a no-op while one is running.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut handle = lock(&self.handle);
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(());
        }
        let context = self
            .context()
            .ok_or_else(|| Error::Config("gatherer started before configure".to_string()))?;

        *lock(&self.signal) = Signal::default();
        self.flushing.store(false, Ordering::SeqCst);

        let gatherer = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(GATHERER_THREAD.to_string())
            .spawn(move || gatherer.run(context))?;
        *handle = Some(spawned);
        info!(
            event = event_names::GATHERER_STARTED,
            thread = GATHERER_THREAD,
            "gatherer started"
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        lock(&self.handle)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Wake the thread for an early interval pass.
    pub fn kick(&self) {
        lock(&self.signal).kicked = true;
        self.wake.notify_all();
    }

    /// Request the final exhaustive pass; the thread exits afterwards.
    pub fn begin_flush(&self) {
        self.flushing.store(true, Ordering::SeqCst);
        lock(&self.signal).flush = true;
        self.wake.notify_all();
    }

    /// Make the thread exit without flushing.
    pub fn stop(&self) {
        lock(&self.signal).stop = true;
        self.wake.notify_all();
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::SeqCst)
    }

    pub(crate) fn clear_flushing(&self) {
        self.flushing.store(false, Ordering::SeqCst);
    }

    /// Passes completed since construction.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    pub fn take_handle(&self) -> Option<JoinHandle<()>> {
        lock(&self.handle).take()
    }

    /// Run one exhaustive pass on the calling thread.
    pub fn flush_inline(&self) -> DrainReport {
        match self.context() {
            Some(context) => {
                let report = run_pass(&context, PassMode::Exhaustive);
                self.passes.fetch_add(1, Ordering::SeqCst);
                report
            }
            None => DrainReport::default(),
        }
    }

    /// Drain one monitor exhaustively on the calling thread.
    pub fn drain_inline(&self, monitor: &StoreMonitor) -> DrainReport {
        match self.context() {
            Some(context) => drain_monitor(&context, monitor, PassMode::Exhaustive),
            None => DrainReport::default(),
        }
    }

    fn run(&self, context: GatherContext) {
        loop {
            match self.wait_for_work(context.settings.interval) {
                Wake::Flush => {
                    let report = run_pass(&context, PassMode::Exhaustive);
                    self.passes.fetch_add(1, Ordering::SeqCst);
                    info!(
                        event = event_names::GATHERER_FLUSHED,
                        files = report.files,
                        rows = report.rows,
                        retained = report.retained,
                        "gatherer final flush complete"
                    );
                    self.flushing.store(false, Ordering::SeqCst);
                    break;
                }
                Wake::Stop => break,
                Wake::Interval | Wake::Kicked => {
                    let report = run_pass(&context, PassMode::Interval);
                    self.passes.fetch_add(1, Ordering::SeqCst);
                    if report.files > 0 || report.retained > 0 {
                        debug!(
                            files = report.files,
                            rows = report.rows,
                            retained = report.retained,
                            "gatherer pass"
                        );
                    }
                }
            }
        }
        debug!(thread = GATHERER_THREAD, "gatherer exiting");
    }

    fn wait_for_work(&self, interval: Duration) -> Wake {
        let deadline = Instant::now() + interval;
        let mut signal = lock(&self.signal);
        loop {
            if signal.flush {
                signal.flush = false;
                signal.kicked = false;
                return Wake::Flush;
            }
            if signal.stop {
                signal.stop = false;
                return Wake::Stop;
            }
            if signal.kicked {
                signal.kicked = false;
                return Wake::Kicked;
            }
            let now = Instant::now();
            if now >= deadline {
                return Wake::Interval;
            }
            signal = self
                .wake
                .wait_timeout(signal, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Visit every registered monitor once.
pub fn run_pass(context: &GatherContext, mode: PassMode) -> DrainReport {
    let mut total = DrainReport::default();
    for monitor in context.registry.all() {
        if !monitor.has_backlog() {
            continue;
        }
        if mode == PassMode::Interval && !monitor.is_bulk_loadable_and_active() {
            continue;
        }
        total.absorb(drain_monitor(context, &monitor, mode));
    }
    total
}

/// Move a monitor's backlog into bulk-load files and submit them.
pub fn drain_monitor(context: &GatherContext, monitor: &StoreMonitor, mode: PassMode) -> DrainReport {
    let mut report = DrainReport::default();
    let inserter = monitor.inserter();
    let budget = match mode {
        PassMode::Interval => inserter.size(),
        PassMode::Exhaustive => usize::MAX,
    };
    if budget == 0 {
        return report;
    }

    let settings = &context.settings;
    let id = monitor.id();
    let _in_flight = monitor.begin_load();
    let mut consumed = 0usize;

    while consumed < budget && !inserter.is_empty() {
        let allocated = match context.allocator.allocate(id.table_name(), &settings.file_base) {
            Ok(allocated) => allocated,
            Err(e) => {
                report.retained = inserter.size();
                error!(
                    store = %id,
                    code = e.code(),
                    error = %e,
                    retained = report.retained,
                    "no bulk-load file; records stay queued"
                );
                break;
            }
        };

        let take = settings.row_limit.max(1).min(budget - consumed);
        let batch = inserter.drain(take);
        if batch.is_empty() {
            remove_with_retry(&allocated.path, settings.retry.directory_attempts, settings.retry.jitter);
            break;
        }

        let rows = match monitor.store().write_batch(allocated.file, &batch) {
            Ok(rows) => rows,
            Err(e) => {
                error!(
                    store = %id,
                    path = %allocated.path.display(),
                    error = %e,
                    "cannot write bulk-load file; records restored"
                );
                inserter.restore_front(batch);
                remove_with_retry(&allocated.path, settings.retry.directory_attempts, settings.retry.jitter);
                report.retained = inserter.size();
                break;
            }
        };
        consumed += batch.len();
        monitor.note_file_written(&batch);

        if monitor.export_enabled() {
            export_copy(&allocated.path, &settings.export_dir);
        }

        let file = BulkLoadFile {
            path: allocated.path,
            store: id,
            table: monitor.store().table().to_string(),
            rows,
        };
        match context.backend.bulk_load(&file) {
            Ok(loaded) => {
                monitor.note_loaded(loaded);
                report.files += 1;
                report.rows += loaded;
                debug!(
                    event = event_names::FILE_LOADED,
                    store = %id,
                    table = %file.table,
                    path = %file.path.display(),
                    rows = loaded,
                    "bulk-load file loaded"
                );
                if !settings.save_files
                    && !remove_with_retry(&file.path, settings.retry.directory_attempts, settings.retry.jitter)
                {
                    warn!(path = %file.path.display(), "loaded file could not be deleted");
                }
            }
            Err(e) => {
                monitor.note_load_failed();
                report.failed_loads += 1;
                error!(
                    event = event_names::FILE_LOAD_FAILED,
                    store = %id,
                    table = %file.table,
                    path = %file.path.display(),
                    rows,
                    code = e.code(),
                    error = %e,
                    "bulk load failed; file kept"
                );
            }
        }
    }
    report
}

fn export_copy(path: &Path, export_dir: &Path) {
    let Some(name) = path.file_name() else {
        return;
    };
    let target = export_dir.join(name);
    let result = fs::create_dir_all(export_dir).and_then(|_| fs::copy(path, &target));
    match result {
        Ok(_) => debug!(path = %target.display(), "export copy written"),
        Err(e) => warn!(
            path = %path.display(),
            export_dir = %export_dir.display(),
            error = %e,
            "export copy failed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::FileIdentity;
    use crate::backend::MemoryBackend;
    use crate::monitor::monitor_for;
    use crate::record::{FieldValue, Record};
    use gds_common::{Domain, StoreIdentifier};
    use gds_config::{ArchiveConfig, ExtendedTables};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        context: GatherContext,
        backend: Arc<MemoryBackend>,
    }

    fn fixture(config: &ArchiveConfig) -> Fixture {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(MemoryBackend::new());
        let retry = RetryPolicy {
            open_attempts: 2,
            directory_attempts: 2,
            jitter: Duration::from_millis(1),
        };
        let context = GatherContext {
            registry: Arc::new(StoreRegistry::new()),
            allocator: Arc::new(UniqueFileAllocator::new(
                FileIdentity {
                    domain: Domain::Fsw,
                    pid: 1,
                    host_id: 2,
                },
                ExtendedTables::default(),
                retry,
            )),
            backend: backend.clone(),
            settings: GatherSettings {
                interval: Duration::from_secs(1),
                row_limit: config.row_limit as usize,
                save_files: config.save_files,
                file_base: dir.path().join("ldi"),
                export_dir: dir.path().join("export"),
                retry,
            },
        };
        std::fs::create_dir_all(&context.settings.file_base).unwrap();
        Fixture {
            _dir: dir,
            context,
            backend,
        }
    }

    fn evr(n: u64) -> Record {
        let mut values = vec![FieldValue::Null; 9];
        values[2] = FieldValue::UInt(n);
        Record::new(values)
    }

    fn register_started(fixture: &Fixture, config: &ArchiveConfig) -> Arc<StoreMonitor> {
        let monitor = fixture
            .context
            .registry
            .register(monitor_for(StoreIdentifier::Evr, "Evr".into(), config))
            .unwrap();
        monitor.inserter().start();
        monitor
    }

    fn files_in(dir: &Path) -> usize {
        fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[test]
    fn test_drain_splits_on_row_limit() {
        let config = ArchiveConfig {
            row_limit: 4,
            ..Default::default()
        };
        let fixture = fixture(&config);
        let monitor = register_started(&fixture, &config);
        for n in 0..10 {
            assert!(monitor.inserter().append(evr(n)).is_accepted());
        }

        let report = run_pass(&fixture.context, PassMode::Interval);
        assert_eq!(report.files, 3);
        assert_eq!(report.rows, 10);
        assert!(monitor.inserter().is_empty());

        let ids: Vec<_> = fixture
            .backend
            .rows(StoreIdentifier::Evr)
            .into_iter()
            .map(|row| row[2].clone().unwrap())
            .collect();
        let expected: Vec<_> = (0..10).map(|n: u64| n.to_string()).collect();
        assert_eq!(ids, expected);

        // Loaded files are deleted by default.
        assert_eq!(files_in(&fixture.context.settings.file_base), 0);
        assert_eq!(monitor.stats().files_generated, 3);
    }

    #[test]
    fn test_interval_pass_skips_stopped_store() {
        let config = ArchiveConfig::default();
        let fixture = fixture(&config);
        let monitor = register_started(&fixture, &config);
        monitor.inserter().append(evr(1));
        monitor.inserter().stop();

        assert_eq!(run_pass(&fixture.context, PassMode::Interval).files, 0);
        assert_eq!(run_pass(&fixture.context, PassMode::Exhaustive).files, 1);
    }

    #[test]
    fn test_save_files_and_export() {
        let mut config = ArchiveConfig {
            save_files: true,
            ..Default::default()
        };
        config.export.evr = true;
        let fixture = fixture(&config);
        let monitor = register_started(&fixture, &config);
        monitor.inserter().append(evr(1));

        run_pass(&fixture.context, PassMode::Interval);
        assert_eq!(files_in(&fixture.context.settings.file_base), 1);
        assert_eq!(files_in(&fixture.context.settings.export_dir), 1);
    }

    #[test]
    fn test_failed_load_keeps_file() {
        let config = ArchiveConfig::default();
        let fixture = fixture(&config);
        let monitor = register_started(&fixture, &config);
        monitor.inserter().append(evr(1));
        fixture.backend.fail_next_loads(1);

        let report = run_pass(&fixture.context, PassMode::Interval);
        assert_eq!(report.failed_loads, 1);
        assert_eq!(report.files, 0);
        assert_eq!(files_in(&fixture.context.settings.file_base), 1);
        assert_eq!(monitor.stats().load_failures, 1);
    }

    #[test]
    fn test_allocation_failure_retains_records() {
        let config = ArchiveConfig::default();
        let mut fixture = fixture(&config);
        let blocker = fixture.context.settings.file_base.join("blocker");
        fs::write(&blocker, b"x").unwrap();
        fixture.context.settings.file_base = blocker;
        let monitor = register_started(&fixture, &config);
        monitor.inserter().append(evr(1));
        monitor.inserter().append(evr(2));

        let report = run_pass(&fixture.context, PassMode::Exhaustive);
        assert_eq!(report.retained, 2);
        assert_eq!(monitor.inserter().size(), 2);
        assert_eq!(fixture.backend.row_count(StoreIdentifier::Evr), 0);
    }

    #[test]
    fn test_thread_flush_exits_and_clears_flag() {
        let config = ArchiveConfig::default();
        let fixture = fixture(&config);
        let monitor = register_started(&fixture, &config);
        monitor.inserter().append(evr(7));

        let gatherer = Arc::new(Gatherer::new());
        gatherer.configure(fixture.context.clone());
        gatherer.start().unwrap();
        assert!(gatherer.is_running());

        monitor.inserter().stop();
        gatherer.begin_flush();
        let handle = gatherer.take_handle().unwrap();
        handle.join().unwrap();

        assert!(!gatherer.is_flushing());
        assert_eq!(fixture.backend.row_count(StoreIdentifier::Evr), 1);
    }

    #[test]
    fn test_kick_triggers_early_pass() {
        let config = ArchiveConfig::default();
        let mut fixture = fixture(&config);
        fixture.context.settings.interval = Duration::from_secs(60);
        let monitor = register_started(&fixture, &config);

        let gatherer = Arc::new(Gatherer::new());
        gatherer.configure(fixture.context.clone());
        gatherer.start().unwrap();
        monitor.inserter().append(evr(1));
        gatherer.kick();

        let deadline = Instant::now() + Duration::from_secs(5);
        while fixture.backend.row_count(StoreIdentifier::Evr) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(fixture.backend.row_count(StoreIdentifier::Evr), 1);

        gatherer.stop();
        gatherer.take_handle().unwrap().join().unwrap();
    }
}
