//! Relevance / language gate run on every record before scoring.
//!
//! Both filters are pure over `(title, body, topics)`. Rejections are logged
//! with a hashed record id and a machine-readable reason; nothing is stored.

pub mod language;
pub mod relevance;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;
use crate::ingest::types::ContentRecord;
use language::{LanguageConfig, LanguageFilter};
use relevance::{RelevanceConfig, RelevanceFilter};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Admission {
    pub admitted: bool,
    pub reason: String,
}

impl Admission {
    pub fn admit(reason: impl Into<String>) -> Self {
        Self {
            admitted: true,
            reason: reason.into(),
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            admitted: false,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub language: LanguageConfig,
    pub relevance: RelevanceConfig,
}

/// Short anonymized id for logs; raw text never reaches the log.
pub(crate) fn anon_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[derive(Debug)]
pub struct Gate {
    language: LanguageFilter,
    relevance: RelevanceFilter,
}

impl Gate {
    pub fn from_config(cfg: &GateConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            language: LanguageFilter::new(cfg.language.clone()),
            relevance: RelevanceFilter::from_config(&cfg.relevance)?,
        })
    }

    /// Language first (cheaper to reject), then relevance.
    pub fn admit_parts(&self, title: &str, body: &str, topics: &[String]) -> Admission {
        let lang = self.language.check(title, body);
        if !lang.admitted {
            return lang;
        }
        self.relevance.evaluate(title, body, topics)
    }

    pub fn admit(&self, record: &ContentRecord) -> Admission {
        let verdict = self.admit_parts(&record.title, &record.body, &record.topics);
        if !verdict.admitted {
            let filter = verdict.reason.split(':').next().unwrap_or("unknown").to_string();
            counter!("gate_rejected_total", "filter" => filter).increment(1);
            info!(
                target: "gate",
                id = %anon_hash(&record.id),
                source = %record.source_id,
                reason = %verdict.reason,
                "record rejected"
            );
        }
        verdict
    }
}
