//! In-memory projection of the system-of-record table
//!
//! **Thread-safety**: DashMap shards give concurrent readers; every write swaps a
//! whole `Arc<Record>` under a single key, so a reader sees either the old row or
//! the new row and never a mix of the two.
//!
//! **Scaling**: `snapshot()` is linear in table size. The projection is meant for
//! reference-scale tables that fit comfortably in one process.

use dashmap::DashMap;
use std::sync::Arc;

use crate::services::cdc::Record;

#[derive(Debug, Default)]
pub struct ProjectionStore {
    rows: DashMap<String, Arc<Record>>,
}

impl ProjectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the row stored under `key` wholesale
    pub(crate) fn upsert(&self, key: String, record: Record) -> Option<Arc<Record>> {
        self.rows.insert(key, Arc::new(record))
    }

    /// Returns whether a row was present
    pub(crate) fn remove(&self, key: &str) -> bool {
        self.rows.remove(key).is_some()
    }

    pub fn get(&self, key: &str) -> Option<Arc<Record>> {
        self.rows.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Every live row, in no particular order
    pub fn snapshot(&self) -> Vec<Arc<Record>> {
        self.rows
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub(crate) fn clear(&self) {
        self.rows.clear();
    }
}
