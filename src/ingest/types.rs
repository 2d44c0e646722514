// src/ingest/types.rs
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SourceFetchError;

/// Worker pools are partitioned by this; each kind gets its own concurrency budget.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Feed,
    Repository,
    Video,
    Forum,
    Search,
}

impl SourceType {
    pub const ALL: [SourceType; 5] = [
        SourceType::Feed,
        SourceType::Repository,
        SourceType::Video,
        SourceType::Forum,
        SourceType::Search,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Feed => "feed",
            SourceType::Repository => "repository",
            SourceType::Video => "video",
            SourceType::Forum => "forum",
            SourceType::Search => "search",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured source as handed to an adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Overrides the authority table for this source.
    #[serde(default)]
    pub authority: Option<f64>,
}

/// What an adapter returns. Everything is optional; conversion into a
/// `ContentRecord` decides what is fatal for the record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Source-native identifier (video id, repo full name, post id).
    #[serde(default)]
    pub natural_key: Option<String>,
    /// Unparsed; see `ingest::parse_published`.
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: String,
    pub source_id: String,
    pub source_type: SourceType,
    pub source_authority: f64,
    pub title: String,
    pub body: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub collected_at: DateTime<Utc>,
    /// First entry is the topic the record was collected for.
    pub topics: Vec<String>,
    pub metadata: Map<String, Value>,
}

impl ContentRecord {
    pub fn primary_topic(&self) -> Option<&str> {
        self.topics.first().map(String::as_str)
    }

    /// Title and body joined for text matching.
    pub fn text(&self) -> String {
        if self.body.is_empty() {
            self.title.clone()
        } else {
            format!("{}\n{}", self.title, self.body)
        }
    }

    /// Numeric metadata lookup; accepts numbers and numeric strings.
    pub fn metric(&self, key: &str) -> Option<f64> {
        match self.metadata.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
        .filter(|v| v.is_finite())
    }

    /// Timestamp used for trend ordering.
    pub fn event_time(&self) -> DateTime<Utc> {
        self.published_at.unwrap_or(self.collected_at)
    }
}

/// The only I/O seam of the pipeline: one adapter per source type.
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    async fn fetch(&self, source: &SourceDescriptor) -> Result<Vec<RawRecord>, SourceFetchError>;
    fn name(&self) -> &'static str;
}
