//! Session-scoped numeric ids for channel keys.
//!
//! One registry exists per telemetry domain, each behind its own lock, so
//! FSW and SSE assignment never contend.

use gds_common::Domain;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

/// First id handed out in an empty registry.
pub const ID_START: u64 = 1;

/// Result of a lookup: the id, and whether this call created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AssignedId {
    pub id: u64,
    pub newly_assigned: bool,
}

#[derive(Debug)]
struct IdTable {
    ids: HashMap<String, u64>,
    next: u64,
}

/// Maps upper-cased keys to stable, increasing ids.
#[derive(Debug)]
pub struct IdAssignmentRegistry {
    domain: Domain,
    table: Mutex<IdTable>,
}

impl IdAssignmentRegistry {
    pub fn new(domain: Domain) -> Self {
        IdAssignmentRegistry {
            domain,
            table: Mutex::new(IdTable {
                ids: HashMap::new(),
                next: ID_START,
            }),
        }
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    /// Return the id for `key`, assigning the next one if it is new.
    pub fn get_or_assign(&self, key: &str) -> AssignedId {
        let key = key.to_uppercase();
        let mut table = self.lock();
        if let Some(&id) = table.ids.get(&key) {
            return AssignedId {
                id,
                newly_assigned: false,
            };
        }
        let id = table.next;
        table.next += 1;
        table.ids.insert(key, id);
        AssignedId {
            id,
            newly_assigned: true,
        }
    }

    /// Existing id for `key`, without assigning.
    pub fn get(&self, key: &str) -> Option<u64> {
        self.lock().ids.get(&key.to_uppercase()).copied()
    }

    /// Remove keys starting with any prefix; no prefixes (or an empty one)
    /// removes everything. Resets the counter once the registry is empty.
    ///
    /// Returns the number of keys removed.
    pub fn clear(&self, prefixes: &[&str]) -> usize {
        let prefixes: Vec<String> = prefixes.iter().map(|p| p.to_uppercase()).collect();
        let clear_all = prefixes.is_empty() || prefixes.iter().any(String::is_empty);

        let mut table = self.lock();
        let before = table.ids.len();
        if clear_all {
            table.ids.clear();
        } else {
            table
                .ids
                .retain(|key, _| !prefixes.iter().any(|p| key.starts_with(p.as_str())));
        }
        if table.ids.is_empty() {
            table.next = ID_START;
        }
        before - table.ids.len()
    }

    pub fn len(&self) -> usize {
        self.lock().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().ids.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IdTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }
}
