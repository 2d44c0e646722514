//! Analysis fan-out: stateless scorers run concurrently over a gated batch.
//!
//! Every scorer sees the whole batch on a blocking thread and returns one
//! value in `[0,1]` per record. Results are merged into record metadata as
//! `analysis.<scorer>`, where the prioritizer picks them up.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::ingest::types::ContentRecord;

static LEXICON: Lazy<BTreeMap<String, i32>> = Lazy::new(|| {
    let raw = include_str!("../../sentiment_lexicon.json");
    serde_json::from_str::<BTreeMap<String, i32>>(raw).expect("valid sentiment lexicon")
});

pub const METADATA_PREFIX: &str = "analysis.";

pub trait ContentScorer: Send + Sync {
    fn name(&self) -> &'static str;
    /// Value in `[0,1]`.
    fn score(&self, record: &ContentRecord) -> f64;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Scorers to run, by name.
    pub scorers: Vec<String>,
    /// Extra or overriding sentiment entries (-5..=5).
    pub sentiment_lexicon: BTreeMap<String, i32>,
    /// Extra vocabulary for the technical depth scorer.
    pub tech_terms: Vec<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            scorers: ["technical_depth", "engagement", "sentiment", "quality"]
                .map(String::from)
                .to_vec(),
            sentiment_lexicon: BTreeMap::new(),
            tech_terms: Vec::new(),
        }
    }
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .map(|t| t.trim_matches('\''))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Share of technical vocabulary and code-like tokens, saturating quickly.
#[derive(Debug, Clone)]
pub struct TechnicalDepth {
    terms: Vec<String>,
}

const BASE_TECH_TERMS: &[&str] = &[
    "api", "async", "benchmark", "compiler", "concurrency", "database", "debug", "deploy",
    "framework", "function", "kernel", "latency", "library", "memory", "migration", "module",
    "protocol", "runtime", "scheduler", "schema", "thread", "throughput", "trait", "type",
    "compile", "allocation", "algorithm", "architecture", "cache", "query", "release",
];

static CODE_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\w+::\w+|\w+\(\)|`[^`]+`|\b\w+_\w+\b|\bv?\d+\.\d+(\.\d+)?\b)")
        .expect("code token regex")
});

impl TechnicalDepth {
    pub fn new(extra: &[String]) -> Self {
        let mut terms: Vec<String> = BASE_TECH_TERMS.iter().map(|s| s.to_string()).collect();
        terms.extend(extra.iter().map(|t| t.to_lowercase()));
        terms.sort();
        terms.dedup();
        Self { terms }
    }
}

impl ContentScorer for TechnicalDepth {
    fn name(&self) -> &'static str {
        "technical_depth"
    }

    fn score(&self, record: &ContentRecord) -> f64 {
        let text = record.text();
        let w = words(&text);
        if w.is_empty() {
            return 0.0;
        }
        let hits = w
            .iter()
            .filter(|t| self.terms.binary_search(t).is_ok())
            .count();
        let code = CODE_TOKEN.find_iter(&text).count() + 3 * (text.matches("```").count() / 2);
        let density = (hits + code) as f64 / w.len() as f64;
        (density * 5.0).min(1.0)
    }
}

/// How likely the text is to draw discussion, from textual cues only.
#[derive(Debug, Clone, Default)]
pub struct Engagement;

const DISCUSSION_CUES: &[&str] = &[
    "how", "why", "vs", "versus", "should", "best", "announcing", "introducing", "new", "guide",
    "tutorial", "review", "comparison", "opinion", "ask",
];

impl ContentScorer for Engagement {
    fn name(&self) -> &'static str {
        "engagement"
    }

    fn score(&self, record: &ContentRecord) -> f64 {
        let title_words = words(&record.title);
        let mut s: f64 = 0.2;
        if record.title.contains('?') {
            s += 0.2;
        }
        let cues = title_words
            .iter()
            .filter(|w| DISCUSSION_CUES.contains(&w.as_str()))
            .count();
        s += 0.15 * cues.min(3) as f64;
        // very short or rambling titles underperform
        if (5..=14).contains(&title_words.len()) {
            s += 0.15;
        }
        if record.body.chars().count() >= 280 {
            s += 0.1;
        }
        s.min(1.0)
    }
}

/// Lexicon sentiment with negation over the three preceding tokens,
/// mapped to `[0,1]` with 0.5 as neutral.
#[derive(Debug, Clone)]
pub struct Sentiment {
    overrides: BTreeMap<String, i32>,
}

fn is_negator(tok: &str) -> bool {
    matches!(
        tok,
        "not" | "no" | "never" | "isn't" | "wasn't" | "aren't" | "won't" | "can't" | "cannot"
            | "without" | "don't" | "doesn't"
    )
}

impl Sentiment {
    pub fn new(overrides: BTreeMap<String, i32>) -> Self {
        let overrides = overrides
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v.clamp(-5, 5)))
            .collect();
        Self { overrides }
    }

    fn word_score(&self, w: &str) -> i32 {
        self.overrides
            .get(w)
            .or_else(|| LEXICON.get(w))
            .copied()
            .unwrap_or(0)
    }

    /// Raw lexicon score and token count.
    pub fn score_text(&self, text: &str) -> (i32, usize) {
        let tokens = words(text);
        let mut score = 0;
        for (i, w) in tokens.iter().enumerate() {
            let base = self.word_score(w);
            if base == 0 {
                continue;
            }
            let negated = (1..=3).any(|k| i >= k && is_negator(&tokens[i - k]));
            score += if negated { -base } else { base };
        }
        (score, tokens.len())
    }
}

impl ContentScorer for Sentiment {
    fn name(&self) -> &'static str {
        "sentiment"
    }

    fn score(&self, record: &ContentRecord) -> f64 {
        let (raw, _) = self.score_text(&record.text());
        let raw = raw as f64;
        0.5 + 0.5 * raw / (raw.abs() + 4.0)
    }
}

/// Editorial quality: length, structure, no shouting or link farms.
#[derive(Debug, Clone, Default)]
pub struct Quality;

static LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://\S+").expect("link regex"));

impl ContentScorer for Quality {
    fn name(&self) -> &'static str {
        "quality"
    }

    fn score(&self, record: &ContentRecord) -> f64 {
        let body = &record.body;
        let chars = body.chars().count();
        let mut s: f64 = match chars {
            0 => 0.2,
            1..=199 => 0.4,
            200..=1999 => 0.7,
            _ => 0.8,
        };
        if body.contains("\n\n") {
            s += 0.1;
        }
        let letters: Vec<char> = record.title.chars().filter(|c| c.is_alphabetic()).collect();
        if letters.len() >= 8 {
            let upper = letters.iter().filter(|c| c.is_uppercase()).count();
            if upper * 10 > letters.len() * 7 {
                s -= 0.3;
            }
        }
        if record.title.contains("!!") || record.title.contains("??") {
            s -= 0.1;
        }
        let body_words = words(body).len().max(1);
        if LINK.find_iter(body).count() * 10 > body_words {
            s -= 0.3;
        }
        s.clamp(0.0, 1.0)
    }
}

pub struct Fanout {
    scorers: Vec<Arc<dyn ContentScorer>>,
}

impl std::fmt::Debug for Fanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.scorers.iter().map(|s| s.name()))
            .finish()
    }
}

impl Fanout {
    pub fn new(scorers: Vec<Arc<dyn ContentScorer>>) -> Self {
        Self { scorers }
    }

    pub fn from_config(cfg: &AnalysisConfig) -> Result<Self, ConfigError> {
        let mut scorers: Vec<Arc<dyn ContentScorer>> = Vec::new();
        for name in &cfg.scorers {
            let s: Arc<dyn ContentScorer> = match name.as_str() {
                "technical_depth" => Arc::new(TechnicalDepth::new(&cfg.tech_terms)),
                "engagement" => Arc::new(Engagement),
                "sentiment" => Arc::new(Sentiment::new(cfg.sentiment_lexicon.clone())),
                "quality" => Arc::new(Quality),
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "analysis: unknown scorer `{other}`"
                    )))
                }
            };
            scorers.push(s);
        }
        Ok(Self { scorers })
    }

    pub fn scorer_names(&self) -> Vec<&'static str> {
        self.scorers.iter().map(|s| s.name()).collect()
    }

    /// Runs every scorer concurrently and returns the records with results merged.
    pub async fn run(&self, records: Vec<ContentRecord>) -> Vec<ContentRecord> {
        if records.is_empty() || self.scorers.is_empty() {
            return records;
        }
        let shared = Arc::new(records);
        let jobs = self.scorers.iter().map(|scorer| {
            let scorer = Arc::clone(scorer);
            let batch = Arc::clone(&shared);
            async move {
                let name = scorer.name();
                let res = tokio::task::spawn_blocking(move || {
                    batch.iter().map(|r| scorer.score(r)).collect::<Vec<f64>>()
                })
                .await;
                (name, res)
            }
        });
        let results = join_all(jobs).await;

        let mut records = Arc::try_unwrap(shared).unwrap_or_else(|arc| (*arc).clone());
        for (name, res) in results {
            match res {
                Ok(values) => {
                    for (record, v) in records.iter_mut().zip(values) {
                        let v = crate::source_weights::clamp01(v);
                        if let Some(n) = serde_json::Number::from_f64(v) {
                            record
                                .metadata
                                .insert(format!("{METADATA_PREFIX}{name}"), Value::Number(n));
                        }
                    }
                }
                Err(e) => {
                    warn!(target: "orchestrator", scorer = name, error = %e, "scorer task failed");
                }
            }
        }
        debug!(target: "orchestrator", records = records.len(), scorers = self.scorers.len(), "analysis merged");
        records
    }
}
