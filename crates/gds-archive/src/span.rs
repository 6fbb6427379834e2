//! Per-session accumulator of event-time extremes and record counts.

use chrono::{DateTime, Utc};
use gds_common::StoreIdentifier;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Snapshot of a session's span.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SpanSummary {
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
    pub total_records: u64,
    pub per_store: BTreeMap<StoreIdentifier, u64>,
}

/// Owned by the controller; one per session.
#[derive(Debug, Default)]
pub struct SessionSpan {
    inner: Mutex<SpanSummary>,
}

impl SessionSpan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one accepted record.
    pub fn record(&self, store: StoreIdentifier, event_time: Option<DateTime<Utc>>) {
        let mut span = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        span.total_records += 1;
        *span.per_store.entry(store).or_insert(0) += 1;
        if let Some(t) = event_time {
            span.earliest = Some(span.earliest.map_or(t, |e| e.min(t)));
            span.latest = Some(span.latest.map_or(t, |l| l.max(t)));
        }
    }

    pub fn summary(&self) -> SpanSummary {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn reset(&self) {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = SpanSummary::default();
    }
}
