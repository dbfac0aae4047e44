//! The record index.
//!
//! The index lets the vault list entries without decrypting every record.
//! It is a cache: the record objects in the store are authoritative and the
//! index may lag behind them or be missing altogether.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::record::{timestamp, Category, Record};
use cardsafe_common::RecordId;

/// Current index format version.
pub const INDEX_VERSION: u32 = 1;

/// Listing projection of one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: RecordId,
    pub category: Category,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_four: Option<String>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub modified_at: DateTime<Utc>,
}

impl From<&Record> for IndexEntry {
    fn from(record: &Record) -> Self {
        Self {
            id: record.id,
            category: record.category,
            label: record.label.clone(),
            last_four: record.last_four(),
            created_at: record.created_at,
            modified_at: record.modified_at,
        }
    }
}

/// Summary of all records, in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub version: u32,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
    pub entries: Vec<IndexEntry>,
}

/// Differences between an index and the live record set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexDiff {
    /// In the index but no longer in the store.
    pub stale: Vec<RecordId>,
    /// In the store but not in the index.
    pub missing: Vec<RecordId>,
}

impl IndexDiff {
    /// True when index and store agree.
    pub fn is_empty(&self) -> bool {
        self.stale.is_empty() && self.missing.is_empty()
    }
}

impl Index {
    /// Create an empty index.
    pub fn new() -> Self {
        Self {
            version: INDEX_VERSION,
            updated_at: Utc::now(),
            entries: Vec::new(),
        }
    }

    /// Project `records` in the order given.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a Record>) -> Self {
        Self {
            entries: records.into_iter().map(IndexEntry::from).collect(),
            ..Self::new()
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for `id`.
    pub fn get(&self, id: &RecordId) -> Option<&IndexEntry> {
        self.entries.iter().find(|e| &e.id == id)
    }

    /// Replace the entry for `record` in place, or append it.
    pub fn upsert(&mut self, record: &Record) {
        let entry = IndexEntry::from(record);
        match self.entries.iter_mut().find(|e| e.id == record.id) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
        self.updated_at = Utc::now();
    }

    /// Drop the entry for `id`. Returns whether one was present.
    pub fn remove(&mut self, id: &RecordId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| &e.id != id);
        let removed = self.entries.len() != before;
        if removed {
            self.updated_at = Utc::now();
        }
        removed
    }

    /// Compare against the ids of the records actually stored.
    pub fn reconcile(&self, live: &[RecordId]) -> IndexDiff {
        let live_set: HashSet<&RecordId> = live.iter().collect();
        let indexed: HashSet<&RecordId> = self.entries.iter().map(|e| &e.id).collect();

        IndexDiff {
            stale: self
                .entries
                .iter()
                .map(|e| e.id)
                .filter(|id| !live_set.contains(id))
                .collect(),
            missing: live
                .iter()
                .copied()
                .filter(|id| !indexed.contains(id))
                .collect(),
        }
    }
}

impl Default for Index {
    fn default() -> Self {
        Self::new()
    }
}
