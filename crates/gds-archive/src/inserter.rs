//! Per-table pending-record buffer.
//!
//! Producers append at the tail; only the gatherer (or the final shutdown
//! drain) removes from the head. When the buffer is full, `append` blocks in
//! short slices until space frees up or the total block time runs out.

use crate::record::Record;
use gds_common::StoreIdentifier;
use gds_config::InserterConfig;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{error, warn};

/// Why a record was not taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// No pipeline exists for the table in this configuration.
    NotNeeded,
    /// The pipeline exists but has not been started.
    NotStarted,
    /// The pipeline was stopped or shut down.
    ShutDown,
    /// The inserter stayed full for the whole block window.
    Backpressure,
    /// The record does not match the table's column count.
    ColumnMismatch { expected: usize, actual: usize },
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::NotNeeded => write!(f, "store not needed"),
            RejectReason::NotStarted => write!(f, "store not started"),
            RejectReason::ShutDown => write!(f, "store shut down"),
            RejectReason::Backpressure => write!(f, "store backlog full"),
            RejectReason::ColumnMismatch { expected, actual } => {
                write!(f, "expected {} values, got {}", expected, actual)
            }
        }
    }
}

/// Result of handing a record to the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppendOutcome {
    /// Queued; `pending` is the buffer size right after the append.
    Accepted { pending: usize },
    Rejected(RejectReason),
}

impl AppendOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, AppendOutcome::Accepted { .. })
    }
}

#[derive(Debug, Default)]
struct InserterState {
    queue: VecDeque<Record>,
    started: bool,
    accepting: bool,
    shut_down: bool,
    closed: bool,
    high_water: usize,
    appended: u64,
}

/// Bounded, thread-safe batch buffer for one table.
#[derive(Debug)]
pub struct Inserter {
    store: StoreIdentifier,
    state: Mutex<InserterState>,
    not_full: Condvar,
    capacity: usize,
    wait_slice: Duration,
    max_block: Duration,
}

impl Inserter {
    pub fn new(store: StoreIdentifier, config: &InserterConfig) -> Self {
        Inserter {
            store,
            state: Mutex::new(InserterState::default()),
            not_full: Condvar::new(),
            capacity: config.capacity.max(1),
            wait_slice: Duration::from_millis(config.append_wait_ms.max(1)),
            max_block: Duration::from_millis(config.max_block_ms),
        }
    }

    pub fn store(&self) -> StoreIdentifier {
        self.store
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Begin accepting input. A shut-down inserter stays shut.
    pub fn start(&self) -> bool {
        let mut state = self.lock();
        if state.shut_down {
            return false;
        }
        state.started = true;
        state.accepting = true;
        true
    }

    /// Stop accepting input; pending records stay queued.
    pub fn stop(&self) {
        self.lock().accepting = false;
        self.not_full.notify_all();
    }

    /// Mark closed to new input for good; pending records stay drainable.
    pub fn inform_shut_down(&self) {
        let mut state = self.lock();
        state.shut_down = true;
        state.accepting = false;
        drop(state);
        self.not_full.notify_all();
    }

    /// Queue a record at the tail.
    pub fn append(&self, record: Record) -> AppendOutcome {
        let mut state = self.lock();
        if let Some(reason) = Self::refusal(&state) {
            return AppendOutcome::Rejected(reason);
        }

        if state.queue.len() >= self.capacity {
            let started = Instant::now();
            let mut warned = false;
            while state.queue.len() >= self.capacity {
                let waited = started.elapsed();
                if waited >= self.max_block {
                    warn!(
                        store = %self.store,
                        pending = state.queue.len(),
                        waited_ms = waited.as_millis() as u64,
                        "inserter still full, rejecting record"
                    );
                    return AppendOutcome::Rejected(RejectReason::Backpressure);
                }
                let slice = self.wait_slice.min(self.max_block - waited);
                let (guard, timeout) = self
                    .not_full
                    .wait_timeout(state, slice)
                    .unwrap_or_else(|e| e.into_inner());
                state = guard;
                if let Some(reason) = Self::refusal(&state) {
                    return AppendOutcome::Rejected(reason);
                }
                if timeout.timed_out() && !warned {
                    warned = true;
                    warn!(
                        store = %self.store,
                        pending = state.queue.len(),
                        capacity = self.capacity,
                        "inserter full, producer blocked"
                    );
                }
            }
        }

        state.queue.push_back(record);
        state.appended += 1;
        let pending = state.queue.len();
        state.high_water = state.high_water.max(pending);
        AppendOutcome::Accepted { pending }
    }

    fn refusal(state: &InserterState) -> Option<RejectReason> {
        if state.shut_down || state.closed {
            Some(RejectReason::ShutDown)
        } else if !state.started {
            Some(RejectReason::NotStarted)
        } else if !state.accepting {
            Some(RejectReason::ShutDown)
        } else {
            None
        }
    }

    /// Remove up to `max` records from the head, in append order.
    pub fn drain(&self, max: usize) -> Vec<Record> {
        let mut state = self.lock();
        let take = state.queue.len().min(max);
        let batch: Vec<Record> = state.queue.drain(..take).collect();
        drop(state);
        if !batch.is_empty() {
            self.not_full.notify_all();
        }
        batch
    }

    /// Put a batch that could not be written back at the head.
    pub fn restore_front(&self, batch: Vec<Record>) {
        let mut state = self.lock();
        for record in batch.into_iter().rev() {
            state.queue.push_front(record);
        }
    }

    /// Close for good and report how many records were still pending.
    pub fn close(&self) -> usize {
        let mut state = self.lock();
        state.closed = true;
        state.shut_down = true;
        state.accepting = false;
        let pending = state.queue.len();
        drop(state);
        self.not_full.notify_all();
        if pending > 0 {
            error!(store = %self.store, pending, "inserter closed with pending records");
        }
        pending
    }

    pub fn size(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    pub fn is_started(&self) -> bool {
        self.lock().started
    }

    pub fn is_accepting(&self) -> bool {
        self.lock().accepting
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock().shut_down
    }

    pub fn high_water_mark(&self) -> usize {
        self.lock().high_water
    }

    pub fn total_appended(&self) -> u64 {
        self.lock().appended
    }

    fn lock(&self) -> MutexGuard<'_, InserterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FieldValue;
    use std::sync::Arc;
    use std::thread;

    fn config(capacity: usize, max_block_ms: u64) -> InserterConfig {
        InserterConfig {
            capacity,
            append_wait_ms: 5,
            max_block_ms,
        }
    }

    fn record(n: u64) -> Record {
        Record::new(vec![FieldValue::UInt(n)])
    }

    fn values(batch: &[Record]) -> Vec<FieldValue> {
        batch.iter().map(|r| r.values[0].clone()).collect()
    }

    #[test]
    fn test_rejects_before_start() {
        let inserter = Inserter::new(StoreIdentifier::Frame, &config(10, 100));
        assert_eq!(
            inserter.append(record(1)),
            AppendOutcome::Rejected(RejectReason::NotStarted)
        );
        assert!(inserter.start());
        assert_eq!(
            inserter.append(record(1)),
            AppendOutcome::Accepted { pending: 1 }
        );
    }

    #[test]
    fn test_drain_preserves_order() {
        let inserter = Inserter::new(StoreIdentifier::Frame, &config(10, 100));
        inserter.start();
        for n in 0..5 {
            inserter.append(record(n));
        }
        let first = inserter.drain(3);
        assert_eq!(
            values(&first),
            vec![FieldValue::UInt(0), FieldValue::UInt(1), FieldValue::UInt(2)]
        );
        assert_eq!(inserter.size(), 2);

        inserter.restore_front(first);
        let all = inserter.drain(usize::MAX);
        assert_eq!(values(&all), (0..5u64).map(FieldValue::from).collect::<Vec<_>>());
        assert!(inserter.is_empty());
    }

    #[test]
    fn test_shutdown_rejects_but_keeps_pending() {
        let inserter = Inserter::new(StoreIdentifier::Evr, &config(10, 100));
        inserter.start();
        inserter.append(record(1));
        inserter.inform_shut_down();
        assert_eq!(
            inserter.append(record(2)),
            AppendOutcome::Rejected(RejectReason::ShutDown)
        );
        assert!(!inserter.start());
        assert_eq!(inserter.drain(10).len(), 1);
    }

    #[test]
    fn test_full_inserter_rejects_after_block_window() {
        let inserter = Inserter::new(StoreIdentifier::Evr, &config(1, 20));
        inserter.start();
        assert!(inserter.append(record(1)).is_accepted());
        assert_eq!(
            inserter.append(record(2)),
            AppendOutcome::Rejected(RejectReason::Backpressure)
        );
        assert_eq!(inserter.size(), 1);
    }

    #[test]
    fn test_blocked_append_resumes_after_drain() {
        let inserter = Arc::new(Inserter::new(StoreIdentifier::Evr, &config(1, 5_000)));
        inserter.start();
        inserter.append(record(1));

        let producer = {
            let inserter = Arc::clone(&inserter);
            thread::spawn(move || inserter.append(record(2)))
        };
        thread::sleep(Duration::from_millis(30));
        assert_eq!(inserter.drain(1).len(), 1);

        assert!(producer.join().unwrap().is_accepted());
        assert_eq!(values(&inserter.drain(1)), vec![FieldValue::UInt(2)]);
        assert_eq!(inserter.high_water_mark(), 1);
    }

    #[test]
    fn test_stop_wakes_blocked_producer() {
        let inserter = Arc::new(Inserter::new(StoreIdentifier::Evr, &config(1, 5_000)));
        inserter.start();
        inserter.append(record(1));

        let producer = {
            let inserter = Arc::clone(&inserter);
            thread::spawn(move || inserter.append(record(2)))
        };
        thread::sleep(Duration::from_millis(30));
        inserter.stop();
        assert_eq!(
            producer.join().unwrap(),
            AppendOutcome::Rejected(RejectReason::ShutDown)
        );
    }

    #[test]
    fn test_close_reports_pending() {
        let inserter = Inserter::new(StoreIdentifier::Evr, &config(10, 100));
        inserter.start();
        inserter.append(record(1));
        assert_eq!(inserter.close(), 1);
        assert!(inserter.is_shut_down());
    }
}
