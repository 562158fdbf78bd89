//! Bounded per-session buffer of recent records
//!
//! Each [`RecordKind`] has its own FIFO partition of `capacity` records, so a
//! noisy kind only ever evicts its own oldest entries. A global timeline
//! ordered by timestamp answers "most recent N across all kinds".

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::trace;

use super::types::{MemoryRecord, RecordId, RecordKind};
use crate::error::{HohenheimError, Result};

/// Counts reported by [`ShortTermMemory::stats`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShortTermStats {
    pub total: usize,
    pub capacity: usize,
    pub by_kind: BTreeMap<RecordKind, usize>,
}

#[derive(Debug)]
pub struct ShortTermMemory {
    capacity: usize,
    records: HashMap<RecordId, MemoryRecord>,
    partitions: HashMap<RecordKind, VecDeque<RecordId>>,
    timeline: BTreeSet<(DateTime<Utc>, RecordId)>,
}

impl ShortTermMemory {
    /// Create an empty buffer holding up to `capacity` records per kind.
    ///
    /// A zero capacity is a configuration error.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(HohenheimError::Config(
                "short-term capacity must be a positive integer".to_string(),
            ));
        }
        Ok(Self {
            capacity,
            records: HashMap::new(),
            partitions: HashMap::new(),
            timeline: BTreeSet::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert at the tail of the record's kind partition and the timeline,
    /// evicting the oldest record of the same kind when the partition is full.
    pub fn append(&mut self, record: MemoryRecord) -> RecordId {
        let id = record.id;
        // Re-appending an id replaces the earlier entry
        self.remove(&id);

        let partition = self.partitions.entry(record.kind).or_default();
        partition.push_back(id);
        let evicted = if partition.len() > self.capacity {
            partition.pop_front()
        } else {
            None
        };

        self.timeline.insert((record.timestamp, id));
        self.records.insert(id, record);

        if let Some(old) = evicted {
            if let Some(old_record) = self.records.remove(&old) {
                self.timeline.remove(&(old_record.timestamp, old));
                trace!(id = %old, kind = %old_record.kind, "Evicted short-term record");
            }
        }
        id
    }

    /// Up to `n` most recent records of `kind`, newest first
    pub fn recent(&self, kind: RecordKind, n: usize) -> Vec<MemoryRecord> {
        self.partitions
            .get(&kind)
            .map(|partition| {
                partition
                    .iter()
                    .rev()
                    .take(n)
                    .filter_map(|id| self.records.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Up to `n` most recent records across all kinds, newest first
    pub fn timeline(&self, n: usize) -> Vec<MemoryRecord> {
        self.timeline
            .iter()
            .rev()
            .take(n)
            .filter_map(|(_, id)| self.records.get(id).cloned())
            .collect()
    }

    pub fn get(&self, id: &RecordId) -> Option<&MemoryRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.records.contains_key(id)
    }

    /// Take a record out of its partition and the timeline
    pub fn remove(&mut self, id: &RecordId) -> Option<MemoryRecord> {
        let record = self.records.remove(id)?;
        if let Some(partition) = self.partitions.get_mut(&record.kind) {
            if let Some(pos) = partition.iter().position(|p| p == id) {
                partition.remove(pos);
            }
        }
        self.timeline.remove(&(record.timestamp, *id));
        Some(record)
    }

    /// Case-insensitive substring search over content and metadata, newest first
    pub fn search(&self, text: &str, kind: Option<RecordKind>, limit: usize) -> Vec<MemoryRecord> {
        let needle = text.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.timeline
            .iter()
            .rev()
            .filter_map(|(_, id)| self.records.get(id))
            .filter(|r| kind.is_none_or(|k| r.kind == k))
            .filter(|r| r.matches_text(&needle))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Empty every partition
    pub fn clear(&mut self) {
        self.records.clear();
        self.partitions.clear();
        self.timeline.clear();
    }

    /// Empty a single partition
    pub fn clear_kind(&mut self, kind: RecordKind) {
        if let Some(partition) = self.partitions.remove(&kind) {
            for id in partition {
                if let Some(record) = self.records.remove(&id) {
                    self.timeline.remove(&(record.timestamp, id));
                }
            }
        }
    }

    pub fn stats(&self) -> ShortTermStats {
        let by_kind = RecordKind::ALL
            .into_iter()
            .map(|kind| {
                let count = self.partitions.get(&kind).map_or(0, VecDeque::len);
                (kind, count)
            })
            .collect();
        ShortTermStats {
            total: self.records.len(),
            capacity: self.capacity,
            by_kind,
        }
    }
}
