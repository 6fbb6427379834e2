//! The archive controller.
//!
//! Owns one monitor per needed table, the shared gatherer, the two id
//! registries and the session span. Producers call [`ArchiveController::append`];
//! the embedding application drives the lifecycle:
//!
//! ```text
//! new → init → start_all_stores → ... → shut_down
//!                    ↑                        │
//!                    └── restart_archive_with_new_context
//! ```

use crate::allocator::{make_directory_exist, FileIdentity, RetryPolicy, UniqueFileAllocator};
use crate::backend::ArchiveBackend;
use crate::gatherer::{GatherContext, GatherSettings, Gatherer};
use crate::ids::{AssignedId, IdAssignmentRegistry};
use crate::inserter::{AppendOutcome, RejectReason};
use crate::logging::{event_names, generate_run_id};
use crate::monitor::{monitor_for, MonitorStats, StoreMonitor, StoreRegistry};
use crate::record::{FieldValue, Record};
use crate::shutdown::{checked_join, ArchiveState, ShutdownSupervisor, StateCell, SHUTDOWN_THREAD};
use crate::span::{SessionSpan, SpanSummary};
use chrono::Utc;
use gds_common::{ArchiveSession, Domain, Error, Result, StoreIdentifier};
use gds_config::ArchiveConfig;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{debug, error, info, warn};

/// Session bookkeeping stores, in start order.
const SESSION_STORES: [StoreIdentifier; 3] = [
    StoreIdentifier::Session,
    StoreIdentifier::Host,
    StoreIdentifier::EndSession,
];

pub struct ArchiveController {
    config: ArchiveConfig,
    backend: Arc<dyn ArchiveBackend>,
    session: RwLock<ArchiveSession>,
    run_id: String,
    registry: Arc<StoreRegistry>,
    requested: Mutex<BTreeSet<StoreIdentifier>>,
    allocator: Arc<UniqueFileAllocator>,
    gatherer: Arc<Gatherer>,
    fsw_ids: IdAssignmentRegistry,
    sse_ids: IdAssignmentRegistry,
    span: SessionSpan,
    state: Arc<StateCell>,
    file_base: RwLock<Option<PathBuf>>,
    session_stores_started: AtomicBool,
    lifecycle: Mutex<()>,
}

impl ArchiveController {
    pub fn new(
        config: ArchiveConfig,
        session: ArchiveSession,
        backend: Arc<dyn ArchiveBackend>,
    ) -> Self {
        let allocator = Arc::new(UniqueFileAllocator::from_config(&session, &config));
        ArchiveController {
            backend,
            session: RwLock::new(session),
            run_id: generate_run_id(),
            registry: Arc::new(StoreRegistry::new()),
            requested: Mutex::new(BTreeSet::new()),
            allocator,
            gatherer: Arc::new(Gatherer::new()),
            fsw_ids: IdAssignmentRegistry::new(Domain::Fsw),
            sse_ids: IdAssignmentRegistry::new(Domain::Sse),
            span: SessionSpan::new(),
            state: Arc::new(StateCell::new(ArchiveState::Uninitialized)),
            file_base: RwLock::new(None),
            session_stores_started: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
            config,
        }
    }

    // -----------------------------------------------------------------------
    // Needed-store selection
    // -----------------------------------------------------------------------

    /// Declare a store that must be instantiated at init.
    pub fn add_needed_store(&self, id: StoreIdentifier) {
        lock(&self.requested).insert(id);
    }

    /// Explicitly requested stores.
    pub fn requested_stores(&self) -> Vec<StoreIdentifier> {
        lock(&self.requested).iter().copied().collect()
    }

    /// Whether a pipeline should exist for `id` in this session.
    ///
    /// Session bookkeeping (session, host, end-session, context config), log
    /// messages and header channel aggregates are always needed. Anything
    /// else must be requested (or, with no requests at all, enabled in the
    /// configuration) and must belong to this session's domain.
    pub fn is_needed_store(&self, id: StoreIdentifier) -> bool {
        if id.is_always_needed() || id.is_domain_neutral() {
            return true;
        }
        let requested = lock(&self.requested);
        let wanted = if requested.is_empty() {
            self.config.use_archive(id)
        } else {
            requested.contains(&id)
        };
        drop(requested);
        wanted && id.domain() == self.session().domain
    }

    // -----------------------------------------------------------------------
    // Initialization
    // -----------------------------------------------------------------------

    /// Create monitors for every needed store. A second call is a no-op.
    pub fn init(&self) -> Result<()> {
        self.init_with(&[])
    }

    /// Request `ids`, then initialize.
    pub fn init_with(&self, ids: &[StoreIdentifier]) -> Result<()> {
        let _lifecycle = lock(&self.lifecycle);
        for &id in ids {
            self.add_needed_store(id);
        }

        match self.state.get() {
            ArchiveState::Uninitialized | ArchiveState::Stopped => {}
            state => {
                debug!(state = %state, "archive already initialized");
                return Ok(());
            }
        }

        let session = self.session();
        if self.config.validate_session {
            session.validate()?;
        }

        let policy = RetryPolicy::from_config(&self.config);
        let base = self.config.file_base(&session.output_dir);
        if !make_directory_exist(&base, policy.directory_attempts, policy.jitter) {
            return Err(Error::FileBase {
                path: base,
                reason: "directory could not be created".to_string(),
            });
        }

        self.allocator.set_identity(FileIdentity::from_session(&session));
        self.span.reset();
        self.registry.clear();

        for id in StoreIdentifier::ALL {
            if !self.is_needed_store(id) {
                continue;
            }
            let table = self.allocator.actual_table_name(id.table_name());
            self.registry.register(monitor_for(id, table, &self.config))?;
        }

        self.gatherer.configure(GatherContext {
            registry: Arc::clone(&self.registry),
            allocator: Arc::clone(&self.allocator),
            backend: Arc::clone(&self.backend),
            settings: GatherSettings {
                interval: self.config.flush_interval(),
                row_limit: usize::try_from(self.config.row_limit()).unwrap_or(usize::MAX),
                save_files: self.config.save_files,
                file_base: base.clone(),
                export_dir: self.config.export_dir.clone(),
                retry: policy,
            },
        });

        info!(
            event = event_names::ARCHIVE_INIT,
            run_id = %self.run_id,
            session = %session,
            domain = %session.domain,
            stores = self.registry.len(),
            file_base = %base.display(),
            "archive initialized"
        );
        *self.file_base.write().unwrap_or_else(|e| e.into_inner()) = Some(base);
        self.state.set(ArchiveState::Initialized);
        Ok(())
    }

    fn init_or_log(&self) -> bool {
        match self.init() {
            Ok(()) => true,
            Err(e) => {
                error!(code = e.code(), error = %e, "archive init failed");
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Starting stores
    // -----------------------------------------------------------------------

    /// Start session bookkeeping, then context config, then everything else.
    pub fn start_all_stores(&self) -> bool {
        if !self.init_or_log() {
            return false;
        }
        let started = self.start_session_stores()
            && self.start_context_config_store()
            && self.start_peripheral_stores();
        if started {
            info!(
                event = event_names::ARCHIVE_STARTED,
                run_id = %self.run_id,
                session = %self.session(),
                "archive started"
            );
        }
        started
    }

    /// Start everything except the session bookkeeping stores.
    pub fn start_all_non_session_stores(&self) -> bool {
        if !self.init_or_log() {
            return false;
        }
        self.start_context_config_store() && self.start_peripheral_stores()
    }

    /// Start the command store, and the log store when `also_log` is set.
    pub fn start_log_command_stores(&self, also_log: bool) -> bool {
        if !self.init_or_log() || !self.config.use_database {
            return false;
        }
        let mut ok = true;
        let mut ids = vec![StoreIdentifier::CommandMessage];
        if also_log {
            ids.push(StoreIdentifier::LogMessage);
        }
        for id in ids {
            if let Some(monitor) = self.registry.get(id) {
                ok &= self.start_monitor(&monitor);
            }
        }
        self.ensure_gatherer();
        ok
    }

    /// Start the session bookkeeping stores and settle the session number.
    ///
    /// Returns false, after logging, if the database is disabled or a session
    /// store cannot connect.
    pub fn start_session_stores(&self) -> bool {
        if !self.config.use_database {
            return false;
        }
        if !self.init_or_log() {
            return false;
        }

        if let Some(monitor) = self.registry.get(StoreIdentifier::Session) {
            if !self.start_monitor(&monitor) {
                return false;
            }
        }

        let mut session = self.session();
        if session.needs_new_session() {
            match self.backend.insert_session(&session) {
                Ok(number) => {
                    session.number = Some(number);
                    *self.session.write().unwrap_or_else(|e| e.into_inner()) = session.clone();
                    info!(
                        event = event_names::SESSION_INSERTED,
                        session = %session,
                        "new session"
                    );
                }
                Err(e) => {
                    error!(code = e.code(), error = %e, session = %session, "cannot insert session");
                    return false;
                }
            }
        } else {
            info!(session = %session, fragment = session.fragment, "continuing session with new fragment");
            if !self.append_bookkeeping(StoreIdentifier::Session, session_row(&session)) {
                return false;
            }
        }

        for id in [StoreIdentifier::Host, StoreIdentifier::EndSession] {
            if let Some(monitor) = self.registry.get(id) {
                if !self.start_monitor(&monitor) {
                    return false;
                }
            }
        }
        if !self.append_bookkeeping(StoreIdentifier::Host, host_row(&session)) {
            return false;
        }

        self.session_stores_started.store(true, Ordering::SeqCst);
        true
    }

    fn append_bookkeeping(&self, id: StoreIdentifier, record: Record) -> bool {
        match self.append(id, record) {
            AppendOutcome::Accepted { .. } => true,
            AppendOutcome::Rejected(reason) => {
                error!(
                    store = %id,
                    reason = %reason,
                    session = %self.session(),
                    "session bookkeeping row rejected"
                );
                false
            }
        }
    }

    /// Start the context configuration store if it is needed.
    pub fn start_context_config_store(&self) -> bool {
        match self.registry.get(StoreIdentifier::ContextConfig) {
            Some(monitor) => self.config.use_database && self.start_monitor(&monitor),
            None => true,
        }
    }

    /// Start every needed store outside the session bookkeeping set, then the gatherer.
    ///
    /// Returns false if any store failed to connect; the others still start.
    pub fn start_peripheral_stores(&self) -> bool {
        if !self.config.use_database {
            return false;
        }
        let mut ok = true;
        for monitor in self.registry.all() {
            let id = monitor.id();
            if SESSION_STORES.contains(&id) || id == StoreIdentifier::ContextConfig {
                continue;
            }
            ok &= self.start_monitor(&monitor);
        }
        self.ensure_gatherer();
        ok
    }

    fn start_monitor(&self, monitor: &StoreMonitor) -> bool {
        let id = monitor.id();
        if monitor.inserter().is_accepting() {
            return true;
        }
        if let Err(e) = monitor.store().connect(self.backend.as_ref()) {
            error!(
                event = event_names::STORE_START_FAILED,
                store = %id,
                code = e.code(),
                error = %e,
                session = %self.session(),
                "store unusable"
            );
            return false;
        }
        if !monitor.inserter().start() {
            warn!(store = %id, "store already shut down");
            return false;
        }
        debug!(event = event_names::STORE_STARTED, store = %id, table = %monitor.store().table(), "store started");
        true
    }

    fn ensure_gatherer(&self) {
        if let Err(e) = self.gatherer.start() {
            error!(code = e.code(), error = %e, "gatherer failed to start");
            return;
        }
        if self.state.get() == ArchiveState::Initialized {
            self.state.set(ArchiveState::Running);
        }
    }

    // -----------------------------------------------------------------------
    // Ingestion
    // -----------------------------------------------------------------------

    /// Queue a record for `id`'s table.
    ///
    /// Never blocks past the inserter's block window and never panics.
    pub fn append(&self, id: StoreIdentifier, record: Record) -> AppendOutcome {
        let Some(monitor) = self.registry.get(id) else {
            return AppendOutcome::Rejected(RejectReason::NotNeeded);
        };
        if let Err(reason) = monitor.store().check(&record) {
            warn!(store = %id, reason = %reason, "record rejected");
            return AppendOutcome::Rejected(reason);
        }

        let event_time = record.event_time;
        let aggregate_count = record.aggregate_count;
        let outcome = monitor.inserter().append(record);
        if let AppendOutcome::Accepted { pending } = outcome {
            monitor.note_appended(aggregate_count);
            if !id.is_domain_neutral() {
                self.span.record(id, event_time);
            }
            if pending as u64 == self.config.row_limit() {
                self.gatherer.kick();
            }
        }
        outcome
    }

    /// Record a key/value pair of the run's context configuration.
    pub fn append_context_value(&self, key: &str, value: &str) -> AppendOutcome {
        let session = self.session();
        self.append(
            StoreIdentifier::ContextConfig,
            Record::new(vec![
                FieldValue::from(session.number),
                FieldValue::from(session.host_id),
                FieldValue::from(key),
                FieldValue::from(value),
            ]),
        )
    }

    /// Write the session's end row, using the latest event time seen.
    pub fn update_session_end_time(&self) -> AppendOutcome {
        let session = self.session();
        let span = self.span.summary();
        let end = span.latest.unwrap_or_else(Utc::now);
        self.append(
            StoreIdentifier::EndSession,
            Record::new(vec![
                FieldValue::from(session.number),
                FieldValue::from(session.fragment),
                FieldValue::from(session.host_id),
                FieldValue::Time(end),
                FieldValue::UInt(span.total_records),
            ])
            .with_event_time(end),
        )
    }

    // -----------------------------------------------------------------------
    // Ids
    // -----------------------------------------------------------------------

    fn ids(&self, domain: Domain) -> &IdAssignmentRegistry {
        match domain {
            Domain::Fsw => &self.fsw_ids,
            Domain::Sse => &self.sse_ids,
        }
    }

    /// Numeric id for a channel key in `domain`, assigning one if new.
    pub fn get_associated_id(&self, key: &str, domain: Domain) -> AssignedId {
        self.ids(domain).get_or_assign(key)
    }

    /// Remove keys matching any prefix (all keys when none are given).
    pub fn clear_ids(&self, domain: Domain, prefixes: &[&str]) -> usize {
        self.ids(domain).clear(prefixes)
    }

    // -----------------------------------------------------------------------
    // Stopping
    // -----------------------------------------------------------------------

    /// Stop every inserter from accepting input. Pending records stay queued.
    pub fn stop_all_stores(&self) {
        for monitor in self.registry.all() {
            monitor.inserter().stop();
        }
    }

    /// Run the shutdown protocol and release every monitor.
    ///
    /// Returns immediately if the controller was never initialized or is
    /// already stopped.
    pub fn shut_down(&self) {
        let _lifecycle = lock(&self.lifecycle);
        let state = self.state.get();
        if matches!(state, ArchiveState::Uninitialized | ArchiveState::Stopped) {
            return;
        }
        info!(run_id = %self.run_id, session = %self.session(), state = %state, "archive shutting down");

        self.stop_all_stores();

        if !self.config.use_database {
            self.state.set(ArchiveState::Stopped);
            self.release();
            return;
        }

        match self.supervisor().spawn() {
            Ok(handle) => {
                let poll = self.config.shutdown.flush_poll();
                let stopped = self
                    .state
                    .wait_for(ArchiveState::Stopped, poll, || handle.is_finished());
                if !stopped {
                    error!(thread = SHUTDOWN_THREAD, "shutdown supervisor ended before stopping");
                    self.state.set(ArchiveState::Stopped);
                }
                checked_join(handle, self.config.shutdown.supervisor_join(), SHUTDOWN_THREAD);
            }
            Err(e) => {
                warn!(error = %e, "cannot spawn shutdown supervisor; running inline");
                self.supervisor().run();
            }
        }
        self.release();
    }

    fn supervisor(&self) -> ShutdownSupervisor {
        ShutdownSupervisor {
            registry: Arc::clone(&self.registry),
            gatherer: Arc::clone(&self.gatherer),
            backend: Arc::clone(&self.backend),
            state: Arc::clone(&self.state),
            timings: self.config.shutdown.clone(),
            session: self.session().to_string(),
        }
    }

    fn release(&self) {
        self.registry.clear();
        *self.file_base.write().unwrap_or_else(|e| e.into_inner()) = None;
        self.session_stores_started.store(false, Ordering::SeqCst);
    }

    /// Shut down if running, switch to `session`, and start again.
    ///
    /// Non-empty `ids` replace the explicit request set. Ids assigned in the
    /// previous session are discarded.
    pub fn restart_archive_with_new_context(
        &self,
        session: ArchiveSession,
        ids: &[StoreIdentifier],
    ) -> Result<bool> {
        info!(
            event = event_names::ARCHIVE_RESTART,
            from = %self.session(),
            to = %session,
            "restarting archive with new session"
        );
        self.shut_down();

        *self.session.write().unwrap_or_else(|e| e.into_inner()) = session;
        if !ids.is_empty() {
            let mut requested = lock(&self.requested);
            requested.clear();
            requested.extend(ids.iter().copied());
        }
        self.fsw_ids.clear(&[]);
        self.sse_ids.clear(&[]);

        self.init()?;
        Ok(self.start_all_stores())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn state(&self) -> ArchiveState {
        self.state.get()
    }

    /// Initialized or running, and not shutting down.
    pub fn is_up(&self) -> bool {
        matches!(
            self.state.get(),
            ArchiveState::Initialized | ArchiveState::Running
        )
    }

    pub fn session(&self) -> ArchiveSession {
        self.session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Directory receiving bulk-load files, once initialized.
    pub fn file_base(&self) -> Option<PathBuf> {
        self.file_base
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn session_stores_started(&self) -> bool {
        self.session_stores_started.load(Ordering::SeqCst)
    }

    /// Stores with a live monitor.
    pub fn registered_stores(&self) -> Vec<StoreIdentifier> {
        self.registry.ids()
    }

    pub fn is_any_store_active(&self) -> bool {
        self.registry.any_active()
    }

    pub fn monitor_stats(&self) -> Vec<MonitorStats> {
        self.registry.all().iter().map(|m| m.stats()).collect()
    }

    pub fn session_span(&self) -> SpanSummary {
        self.span.summary()
    }

    /// Table name as created in the database.
    pub fn actual_table_name(&self, id: StoreIdentifier) -> String {
        self.allocator.actual_table_name(id.table_name())
    }
}

impl Drop for ArchiveController {
    fn drop(&mut self) {
        if self.is_up() {
            warn!(run_id = %self.run_id, "archive dropped while running; shutting down");
            self.shut_down();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn session_row(session: &ArchiveSession) -> Record {
    let now = Utc::now();
    Record::new(vec![
        FieldValue::from(session.number),
        FieldValue::from(session.fragment),
        FieldValue::from(session.host_id),
        FieldValue::from(session.host_name.as_str()),
        FieldValue::from(session.pid),
        FieldValue::from(session.domain.to_string()),
        FieldValue::Time(now),
    ])
    .with_event_time(now)
}

fn host_row(session: &ArchiveSession) -> Record {
    Record::new(vec![
        FieldValue::from(session.host_id),
        FieldValue::from(session.host_name.as_str()),
        FieldValue::Int(0),
    ])
}
