//! Durable record store seam plus an in-memory implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StorageError;
use crate::ingest::types::ContentRecord;
use crate::prioritizer::{PriorityLevel, PriorityResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRecord {
    pub record: ContentRecord,
    pub total_score: f64,
    pub priority_level: PriorityLevel,
}

#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub source_id: Option<String>,
    pub topic: Option<String>,
    pub min_level: Option<PriorityLevel>,
    /// Inclusive lower bound on `collected_at`.
    pub since: Option<DateTime<Utc>>,
}

impl RecordFilter {
    pub fn matches(&self, stored: &StoredRecord) -> bool {
        if let Some(src) = &self.source_id {
            if &stored.record.source_id != src {
                return false;
            }
        }
        if let Some(topic) = &self.topic {
            if !stored.record.topics.iter().any(|t| t == topic) {
                return false;
            }
        }
        if let Some(min) = self.min_level {
            if stored.priority_level < min {
                return false;
            }
        }
        if let Some(since) = self.since {
            if stored.record.collected_at < since {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStatistics {
    pub total: usize,
    pub by_priority: BTreeMap<PriorityLevel, usize>,
    pub by_source: BTreeMap<String, usize>,
}

#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Returns `false` when a record with the same id is already stored;
    /// the existing entry is left untouched.
    async fn put(
        &self,
        record: &ContentRecord,
        priority: &PriorityResult,
    ) -> Result<bool, StorageError>;

    async fn exists(&self, id: &str) -> Result<bool, StorageError>;

    /// Newest first by `collected_at`.
    async fn query(
        &self,
        filter: &RecordFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredRecord>, StorageError>;

    async fn statistics(&self) -> Result<StoreStatistics, StorageError>;
}

/// Process-local store for development and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, StoredRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, StoredRecord>>, StorageError> {
        self.inner
            .lock()
            .map_err(|_| StorageError::Unavailable("memory store mutex poisoned".into()))
    }

    pub fn len(&self) -> usize {
        self.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl RecordStore for MemoryStore {
    async fn put(
        &self,
        record: &ContentRecord,
        priority: &PriorityResult,
    ) -> Result<bool, StorageError> {
        let mut guard = self.lock()?;
        if guard.contains_key(&record.id) {
            return Ok(false);
        }
        guard.insert(
            record.id.clone(),
            StoredRecord {
                record: record.clone(),
                total_score: priority.total_score,
                priority_level: priority.priority_level,
            },
        );
        Ok(true)
    }

    async fn exists(&self, id: &str) -> Result<bool, StorageError> {
        Ok(self.lock()?.contains_key(id))
    }

    async fn query(
        &self,
        filter: &RecordFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredRecord>, StorageError> {
        let guard = self.lock()?;
        let mut rows: Vec<&StoredRecord> = guard.values().filter(|s| filter.matches(s)).collect();
        rows.sort_by(|a, b| {
            b.record
                .collected_at
                .cmp(&a.record.collected_at)
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
        Ok(rows.into_iter().skip(offset).take(limit).cloned().collect())
    }

    async fn statistics(&self) -> Result<StoreStatistics, StorageError> {
        let guard = self.lock()?;
        let mut stats = StoreStatistics {
            total: guard.len(),
            ..Default::default()
        };
        for s in guard.values() {
            *stats.by_priority.entry(s.priority_level).or_insert(0) += 1;
            *stats.by_source.entry(s.record.source_id.clone()).or_insert(0) += 1;
        }
        Ok(stats)
    }
}
