//! Controller state machine and the shutdown supervisor.
//!
//! Shutdown runs on its own thread through these phases:
//!
//! - `Draining`: wait until no monitor is accepting input or loading
//! - `Flushing`: ask the gatherer for its final exhaustive pass, then join it
//! - `IdlingDown`: wait until every inserter is empty, re-checking all stores
//!   each round
//! - `Closing`: shut each inserter and close each store; one store failing to
//!   close does not stop the rest
//!
//! Each phase starts only after the previous phase's condition holds for every
//! store. Thread joins are bounded; the idle-down wait is not.

use crate::backend::ArchiveBackend;
use crate::gatherer::{Gatherer, GATHERER_THREAD};
use crate::logging::event_names;
use crate::monitor::StoreRegistry;
use gds_common::Error;
use gds_config::ShutdownTimings;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Supervisor thread name.
pub const SHUTDOWN_THREAD: &str = "archive-shutdown";

/// Poll interval while waiting on a thread to finish.
const JOIN_POLL: Duration = Duration::from_millis(10);

/// Where the controller is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveState {
    Uninitialized,
    Initialized,
    Running,
    Draining,
    Flushing,
    IdlingDown,
    Closing,
    Stopped,
}

impl ArchiveState {
    /// True for the phases between `Running` and `Stopped`.
    pub fn is_shutting_down(&self) -> bool {
        matches!(
            self,
            ArchiveState::Draining
                | ArchiveState::Flushing
                | ArchiveState::IdlingDown
                | ArchiveState::Closing
        )
    }
}

impl std::fmt::Display for ArchiveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ArchiveState::Uninitialized => "uninitialized",
            ArchiveState::Initialized => "initialized",
            ArchiveState::Running => "running",
            ArchiveState::Draining => "draining",
            ArchiveState::Flushing => "flushing",
            ArchiveState::IdlingDown => "idling_down",
            ArchiveState::Closing => "closing",
            ArchiveState::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

/// Shared, observable controller state.
#[derive(Debug)]
pub struct StateCell {
    state: Mutex<ArchiveState>,
    changed: Condvar,
}

impl StateCell {
    pub fn new(initial: ArchiveState) -> Self {
        StateCell {
            state: Mutex::new(initial),
            changed: Condvar::new(),
        }
    }

    pub fn get(&self) -> ArchiveState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set(&self, next: ArchiveState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let previous = *state;
        *state = next;
        drop(state);
        self.changed.notify_all();
        if next.is_shutting_down() || next == ArchiveState::Stopped {
            info!(
                event = event_names::SHUTDOWN_PHASE,
                from = %previous,
                to = %next,
                "archive state change"
            );
        }
    }

    /// Block until the state equals `target` or `give_up` returns true.
    ///
    /// `give_up` is re-checked every `poll`. Returns whether `target` was reached.
    pub fn wait_for(&self, target: ArchiveState, poll: Duration, give_up: impl Fn() -> bool) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if *state == target {
                return true;
            }
            if give_up() {
                return false;
            }
            state = self
                .changed
                .wait_timeout(state, poll)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }
}

/// Join `handle` if it finishes within `ceiling`; otherwise log and detach.
///
/// Returns true if the thread was joined.
pub fn checked_join(handle: JoinHandle<()>, ceiling: Duration, what: &str) -> bool {
    let started = Instant::now();
    while !handle.is_finished() {
        if started.elapsed() >= ceiling {
            let err = Error::ShutdownStall {
                what: what.to_string(),
                waited_ms: u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX),
            };
            warn!(
                event = event_names::SHUTDOWN_STALL,
                code = err.code(),
                error = %err,
                "thread join timed out; continuing without it"
            );
            return false;
        }
        thread::sleep(JOIN_POLL);
    }
    if handle.join().is_err() {
        error!(thread = what, "thread panicked");
    }
    true
}

/// Runs the shutdown phases for one controller session.
pub(crate) struct ShutdownSupervisor {
    pub registry: Arc<StoreRegistry>,
    pub gatherer: Arc<Gatherer>,
    pub backend: Arc<dyn ArchiveBackend>,
    pub state: Arc<StateCell>,
    pub timings: ShutdownTimings,
    pub session: String,
}

impl ShutdownSupervisor {
    pub(crate) fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(SHUTDOWN_THREAD.to_string())
            .spawn(move || self.run())
    }

    pub(crate) fn run(self) {
        self.drain();
        self.flush();
        self.idle_down();
        self.close();
        self.state.set(ArchiveState::Stopped);
        info!(
            event = event_names::SHUTDOWN_COMPLETE,
            session = %self.session,
            "archive stopped"
        );
    }

    fn drain(&self) {
        self.state.set(ArchiveState::Draining);
        while self.registry.any_active() {
            thread::sleep(self.timings.drain_poll());
        }
    }

    fn flush(&self) {
        self.state.set(ArchiveState::Flushing);

        if self.gatherer.is_running() {
            self.gatherer.begin_flush();
            let deadline = Instant::now() + self.timings.gatherer_join();
            while self.gatherer.is_flushing()
                && self.gatherer.is_running()
                && Instant::now() < deadline
            {
                thread::sleep(self.timings.flush_poll());
            }
            if let Some(handle) = self.gatherer.take_handle() {
                checked_join(handle, self.timings.gatherer_join(), GATHERER_THREAD);
            }
        } else {
            // Never started, or already gone: flush from here instead.
            if let Some(handle) = self.gatherer.take_handle() {
                checked_join(handle, self.timings.gatherer_join(), GATHERER_THREAD);
            }
            let report = self.gatherer.flush_inline();
            debug!(files = report.files, rows = report.rows, "inline final flush");
        }
        self.gatherer.clear_flushing();
    }

    fn idle_down(&self) {
        self.state.set(ArchiveState::IdlingDown);
        'pass: loop {
            for monitor in self.registry.all() {
                let inserter = monitor.inserter();
                let pending = inserter.size();
                if pending == 0 || !inserter.is_started() {
                    continue;
                }
                info!(
                    store = %monitor.id(),
                    pending,
                    "store still has pending entries"
                );
                self.gatherer.drain_inline(&monitor);
                if !inserter.is_empty() {
                    thread::sleep(self.timings.idle_check());
                }
                continue 'pass;
            }
            break;
        }
    }

    fn close(&self) {
        self.state.set(ArchiveState::Closing);
        for monitor in self.registry.all() {
            let id = monitor.id();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                monitor.inserter().inform_shut_down();
                monitor.inserter().close();
                monitor.store().close(self.backend.as_ref())
            }));
            match outcome {
                Ok(Ok(())) => debug!(
                    store = %id,
                    values_processed = monitor.values_processed(),
                    files = monitor.files_generated(),
                    "store closed"
                ),
                Ok(Err(e)) => error!(store = %id, code = e.code(), error = %e, "store close failed"),
                Err(_) => error!(store = %id, "store close panicked"),
            }
        }
    }
}
