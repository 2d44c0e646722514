//! Error taxonomy for the monitoring pipeline.
//!
//! Each variant family maps to one containment rule: fetch errors are retried
//! and then degrade the source, parse errors drop one record, scoring config
//! errors fall back to defaults, storage errors requeue the record. Only
//! `ConfigError` at startup is fatal.

use std::path::PathBuf;

use thiserror::Error;

use crate::ingest::types::SourceType;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceFetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("no adapter registered for source type {0}")]
    NoAdapter(SourceType),
}

impl SourceFetchError {
    /// Auth failures, broken payloads and missing adapters will not fix
    /// themselves within a cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RateLimited { .. } | Self::Timeout(_)
        )
    }

    /// Short label used for metrics and status output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Auth(_) => "auth",
            Self::RateLimited { .. } => "rate_limited",
            Self::Timeout(_) => "timeout",
            Self::Malformed(_) => "malformed",
            Self::NoAdapter(_) => "no_adapter",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("record from `{source_id}` has no {field}")]
    MissingField {
        source_id: String,
        field: &'static str,
    },

    #[error("record from `{source_id}` has no natural key (url or title)")]
    MissingKey { source_id: String },
}

/// Missing weights are not fatal; the prioritizer reports them next to the
/// default it substituted.
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum ScoringConfigError {
    #[error("no authority configured for source `{0}`")]
    MissingSourceAuthority(String),

    #[error("no preference weight configured for topic `{0}`")]
    MissingTopicWeight(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("write rejected for `{id}`: {reason}")]
    Rejected { id: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("pattern `{id}` does not compile: {source}")]
    Pattern {
        id: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TrendError {
    #[error("unknown analysis window `{0}`")]
    UnknownWindow(String),
}

/// The orchestrator task is gone (shut down or panicked).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("orchestrator is not running")]
pub struct OrchestratorClosed;
