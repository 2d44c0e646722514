// tests/common/mod.rs
//
// Shared fixtures for the integration tests: record builders, a scripted
// adapter, and a store whose writes can be switched off.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use topic_radar::config::{AppConfig, ConfigHandle};
use topic_radar::error::{SourceFetchError, StorageError};
use topic_radar::ingest::store::{
    MemoryStore, RecordFilter, RecordStore, StoreStatistics, StoredRecord,
};
use topic_radar::ingest::types::{
    ContentRecord, RawRecord, SourceAdapter, SourceDescriptor, SourceType,
};
use topic_radar::orchestrate::workers::AdapterRegistry;
use topic_radar::prioritizer::PriorityResult;

pub fn record(id: &str, topic: &str, source_type: SourceType, at: DateTime<Utc>) -> ContentRecord {
    ContentRecord {
        id: id.into(),
        source_id: format!("{topic}-src"),
        source_type,
        source_authority: 0.6,
        title: format!("Update {id} on {topic}"),
        body: "The new release is available for download and will be supported for a year."
            .into(),
        url: format!("https://news.test/{id}"),
        published_at: Some(at),
        collected_at: at,
        topics: vec![topic.into()],
        metadata: Map::new(),
    }
}

pub fn raw(title: &str, url: &str) -> RawRecord {
    RawRecord {
        title: Some(title.into()),
        body: Some(
            "This is a detailed write-up about the change and what it means for your projects."
                .into(),
        ),
        url: Some(url.into()),
        ..Default::default()
    }
}

pub fn raw_published(title: &str, url: &str, published: DateTime<Utc>) -> RawRecord {
    RawRecord {
        published_at: Some(published.to_rfc3339()),
        ..raw(title, url)
    }
}

pub fn raw_with_meta(title: &str, url: &str, key: &str, value: Value) -> RawRecord {
    let mut r = raw(title, url);
    r.metadata.insert(key.into(), value);
    r
}

/// Per-source canned responses. Unknown sources return an empty list.
#[derive(Default)]
pub struct ScriptedAdapter {
    responses: Mutex<HashMap<String, Result<Vec<RawRecord>, SourceFetchError>>>,
    calls: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, source_id: &str, response: Result<Vec<RawRecord>, SourceFetchError>) {
        self.responses
            .lock()
            .unwrap()
            .insert(source_id.to_string(), response);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    async fn fetch(&self, source: &SourceDescriptor) -> Result<Vec<RawRecord>, SourceFetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .get(&source.id)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub fn registry_for_all(adapter: Arc<ScriptedAdapter>) -> AdapterRegistry {
    let mut reg = AdapterRegistry::new();
    for t in SourceType::ALL {
        reg.register(t, adapter.clone());
    }
    reg
}

/// Memory store whose `put` fails while `failing` is set.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub failing: AtomicBool,
}

impl FlakyStore {
    pub fn new(failing: bool) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(),
            failing: AtomicBool::new(failing),
        })
    }

    pub fn set_failing(&self, on: bool) {
        self.failing.store(on, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn put(
        &self,
        record: &ContentRecord,
        priority: &PriorityResult,
    ) -> Result<bool, StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("disk full".into()));
        }
        self.inner.put(record, priority).await
    }

    async fn exists(&self, id: &str) -> Result<bool, StorageError> {
        self.inner.exists(id).await
    }

    async fn query(
        &self,
        filter: &RecordFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredRecord>, StorageError> {
        self.inner.query(filter, limit, offset).await
    }

    async fn statistics(&self) -> Result<StoreStatistics, StorageError> {
        self.inner.statistics().await
    }
}

/// Two topics, three sources, every source re-polled each cycle and no
/// backoff sleeps.
pub const PIPELINE_TOML: &str = r#"
cycle_secs = 60

[watermark]
tolerance_secs = 300
max_staleness_secs = 0

[allocator]
budget = 12.0

[workers]
max_attempts = 2
backoff_base_ms = 1

[authorities]
default_authority = 0.5
authorities = { "rust-blog" = 0.9 }

[[topics]]
name = "rust"
priority = 2.0
preference = 0.9
keywords = { tokio = 0.9 }
sources = [
  { id = "rust-blog", type = "feed" },
  { id = "rust-forum", type = "forum" },
]

[[topics]]
name = "wasm"
priority = 1.0
sources = [{ id = "wasm-search", type = "search" }]
"#;

pub fn pipeline_config() -> Arc<ConfigHandle> {
    let cfg = AppConfig::from_toml_str(PIPELINE_TOML).expect("pipeline config");
    Arc::new(ConfigHandle::fixed(cfg))
}

/// Fresh directory under the system temp dir.
pub fn unique_tmp_dir(prefix: &str) -> std::path::PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}_{}_{nanos}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
