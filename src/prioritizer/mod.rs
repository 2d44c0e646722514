//! Multi-factor content prioritizer.
//!
//! `score` is a pure function of the record, topic preferences, source
//! authorities and strategy. Each factor is clamped to `[0,1]` after keyword
//! boosts and before the weighted combination, so a boost can saturate a
//! factor but never push the total past 1.0.

pub mod factors;
pub mod strategy;

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ScoringConfigError};
use crate::ingest::types::ContentRecord;
use crate::source_weights::SourceAuthorities;
pub use factors::{Factor, FactorScores, RecencyConfig};
pub use strategy::{ScoringStrategy, SourceAwareParams};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PriorityLevel {
    Archive,
    Low,
    Medium,
    High,
    Critical,
}

impl PriorityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityLevel::Archive => "archive",
            PriorityLevel::Low => "low",
            PriorityLevel::Medium => "medium",
            PriorityLevel::High => "high",
            PriorityLevel::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorWeights {
    pub authority: f64,
    pub recency: f64,
    pub topic_relevance: f64,
    pub engagement: f64,
    pub uniqueness: f64,
    pub completeness: f64,
    pub actionability: f64,
    pub cross_topic: f64,
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            authority: 0.20,
            recency: 0.25,
            topic_relevance: 0.20,
            engagement: 0.10,
            uniqueness: 0.10,
            completeness: 0.05,
            actionability: 0.05,
            cross_topic: 0.05,
        }
    }
}

impl FactorWeights {
    fn as_array(&self) -> [f64; 8] {
        [
            self.authority,
            self.recency,
            self.topic_relevance,
            self.engagement,
            self.uniqueness,
            self.completeness,
            self.actionability,
            self.cross_topic,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityThresholds {
    pub critical: f64,
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl Default for PriorityThresholds {
    fn default() -> Self {
        Self {
            critical: 0.85,
            high: 0.70,
            medium: 0.50,
            low: 0.30,
        }
    }
}

impl PriorityThresholds {
    pub fn level_for(&self, score: f64) -> PriorityLevel {
        if score >= self.critical {
            PriorityLevel::Critical
        } else if score >= self.high {
            PriorityLevel::High
        } else if score >= self.medium {
            PriorityLevel::Medium
        } else if score >= self.low {
            PriorityLevel::Low
        } else {
            PriorityLevel::Archive
        }
    }
}

/// Multiplies one factor when `pattern` matches title or body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostCfg {
    pub id: String,
    pub pattern: String,
    pub factor: Factor,
    pub multiplier: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrioritizerConfig {
    pub strategy: ScoringStrategy,
    pub weights: FactorWeights,
    pub thresholds: PriorityThresholds,
    pub recency: RecencyConfig,
    pub boosts: Vec<BoostCfg>,
}

/// Caller-supplied preference weights, keyed by topic and by keyword phrase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopicPreferences {
    pub topics: BTreeMap<String, f64>,
    pub keywords: BTreeMap<String, f64>,
}

impl TopicPreferences {
    pub fn with_topic(mut self, topic: &str, weight: f64) -> Self {
        self.topics.insert(topic.to_string(), weight.clamp(0.0, 1.0));
        self
    }

    /// Keeps the higher weight when two topics share a keyword.
    pub fn with_keyword(mut self, keyword: &str, weight: f64) -> Self {
        let key = factors::padded_words(keyword).trim().to_string();
        if key.is_empty() {
            return self;
        }
        let w = weight.clamp(0.0, 1.0);
        let slot = self.keywords.entry(key).or_insert(w);
        *slot = slot.max(w);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriorityResult {
    pub record_id: String,
    pub total_score: f64,
    pub priority_level: PriorityLevel,
    pub factors: FactorScores,
    pub strategy: String,
    pub reasoning: String,
    pub recommendations: Vec<String>,
    /// Defaults substituted for missing configuration.
    pub fallbacks: Vec<ScoringConfigError>,
}

#[derive(Debug)]
struct CompiledBoost {
    id: String,
    re: Regex,
    factor: Factor,
    multiplier: f64,
}

#[derive(Debug)]
pub struct Prioritizer {
    weights: FactorWeights,
    thresholds: PriorityThresholds,
    recency: RecencyConfig,
    boosts: Vec<CompiledBoost>,
}

impl Prioritizer {
    pub fn new(cfg: &PrioritizerConfig) -> Result<Self, ConfigError> {
        let w = cfg.weights.as_array();
        if w.iter().any(|x| !x.is_finite() || *x < 0.0) {
            return Err(ConfigError::Invalid(
                "factor weights must be finite and non-negative".into(),
            ));
        }
        if w.iter().sum::<f64>() <= 0.0 {
            return Err(ConfigError::Invalid("factor weights sum to zero".into()));
        }
        let t = &cfg.thresholds;
        if !(t.critical >= t.high && t.high >= t.medium && t.medium >= t.low) {
            return Err(ConfigError::Invalid(
                "priority thresholds must be descending".into(),
            ));
        }
        let boosts = cfg
            .boosts
            .iter()
            .map(|b| {
                let re = Regex::new(&b.pattern).map_err(|source| ConfigError::Pattern {
                    id: b.id.clone(),
                    source,
                })?;
                Ok(CompiledBoost {
                    id: b.id.clone(),
                    re,
                    factor: b.factor,
                    multiplier: b.multiplier.max(0.0),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            weights: cfg.weights.clone(),
            thresholds: cfg.thresholds.clone(),
            recency: cfg.recency.clone(),
            boosts,
        })
    }

    pub fn thresholds(&self) -> &PriorityThresholds {
        &self.thresholds
    }

    pub fn score(
        &self,
        record: &ContentRecord,
        prefs: &TopicPreferences,
        authorities: &SourceAuthorities,
        strategy: &ScoringStrategy,
    ) -> PriorityResult {
        let mut fallbacks = Vec::new();
        let mut raw = FactorScores {
            authority: factors::authority(record, authorities, &mut fallbacks),
            recency: factors::recency(record.published_at, record.collected_at, &self.recency),
            topic_relevance: factors::topic_relevance(record, prefs, &mut fallbacks),
            engagement: factors::engagement(record, strategy),
            uniqueness: factors::uniqueness(record),
            completeness: factors::completeness(record, strategy),
            actionability: factors::actionability(record, strategy),
            cross_topic: factors::cross_topic(record),
        };

        let mut applied = Vec::new();
        if !self.boosts.is_empty() {
            let text = record.text();
            for b in &self.boosts {
                if b.re.is_match(&text) {
                    *raw.get_mut(b.factor) *= b.multiplier;
                    applied.push(b.id.as_str());
                }
            }
        }

        let factors = raw.clamped();
        let total_score = self.combine(&factors);
        let priority_level = self.thresholds.level_for(total_score);

        PriorityResult {
            record_id: record.id.clone(),
            total_score,
            priority_level,
            factors,
            strategy: strategy.name().to_string(),
            reasoning: reasoning(&factors, priority_level, strategy.name(), &applied),
            recommendations: recommendations(&factors, priority_level),
            fallbacks,
        }
    }

    /// Scores every record and returns results highest score first.
    pub fn prioritize_batch(
        &self,
        records: &[ContentRecord],
        prefs: &TopicPreferences,
        authorities: &SourceAuthorities,
        strategy: &ScoringStrategy,
    ) -> Vec<PriorityResult> {
        let mut out: Vec<PriorityResult> = records
            .iter()
            .map(|r| self.score(r, prefs, authorities, strategy))
            .collect();
        out.sort_by(|a, b| {
            b.total_score
                .total_cmp(&a.total_score)
                .then_with(|| a.record_id.cmp(&b.record_id))
        });
        out
    }

    /// Weighted sum normalized by the weight total.
    fn combine(&self, f: &FactorScores) -> f64 {
        let w = self.weights.as_array();
        let values = f.named().map(|(_, v)| v);
        let raw: f64 = w.iter().zip(values.iter()).map(|(w, v)| w * v).sum();
        let denom = w.iter().sum::<f64>().max(1e-9);
        (raw / denom).clamp(0.0, 1.0)
    }
}

fn reasoning(f: &FactorScores, level: PriorityLevel, strategy: &str, boosts: &[&str]) -> String {
    let mut named = f.named().to_vec();
    // stable: equal scores keep declaration order
    named.sort_by(|a, b| b.1.total_cmp(&a.1));
    let top = named
        .iter()
        .take(3)
        .map(|(n, v)| format!("{n} ({v:.2})"))
        .collect::<Vec<_>>()
        .join(", ");
    let mut out = format!(
        "Prioritized as {} using {strategy} strategy. Key factors: {top}.",
        level.as_str()
    );
    if !boosts.is_empty() {
        out.push_str(&format!(" Boosts: {}.", boosts.join(", ")));
    }
    out
}

fn recommendations(f: &FactorScores, level: PriorityLevel) -> Vec<String> {
    let mut out: Vec<String> = match level {
        PriorityLevel::Critical => vec![
            "Immediate review required".into(),
            "Alert topic owners".into(),
        ],
        PriorityLevel::High => vec!["Schedule for detailed analysis".into()],
        PriorityLevel::Medium => vec!["Include in regular review cycle".into()],
        PriorityLevel::Low | PriorityLevel::Archive => Vec::new(),
    };
    if f.uniqueness > 0.8 {
        out.push("Novel information, consider deep analysis".into());
    }
    if f.cross_topic > 0.7 {
        out.push("Relevant across topics, share widely".into());
    }
    if f.actionability > 0.8 {
        out.push("Highly actionable, create follow-up items".into());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::SourceType;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    fn record() -> ContentRecord {
        let collected = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        ContentRecord {
            id: "rec-1".into(),
            source_id: "rust-blog".into(),
            source_type: SourceType::Repository,
            source_authority: 0.9,
            title: "Tokio 2.0 released: a guide to the new scheduler".into(),
            body: "1. upgrade\n2. run\n```rust\n#[tokio::main]\n```".into(),
            url: "https://x.test/tokio".into(),
            published_at: Some(collected - Duration::hours(2)),
            collected_at: collected,
            topics: vec!["rust".into()],
            metadata: json!({"stars": 25000, "forks": 2000})
                .as_object()
                .cloned()
                .unwrap(),
        }
    }

    fn authorities() -> SourceAuthorities {
        let mut a = SourceAuthorities::default();
        a.authorities.insert("rust-blog".into(), 0.9);
        a.normalized()
    }

    fn prefs() -> TopicPreferences {
        TopicPreferences::default()
            .with_topic("rust", 0.8)
            .with_keyword("Tokio", 0.95)
    }

    #[test]
    fn levels_follow_thresholds() {
        let t = PriorityThresholds::default();
        assert_eq!(t.level_for(0.85), PriorityLevel::Critical);
        assert_eq!(t.level_for(0.84), PriorityLevel::High);
        assert_eq!(t.level_for(0.5), PriorityLevel::Medium);
        assert_eq!(t.level_for(0.3), PriorityLevel::Low);
        assert_eq!(t.level_for(0.29), PriorityLevel::Archive);
        assert!(PriorityLevel::Archive < PriorityLevel::Critical);
    }

    #[test]
    fn scoring_is_idempotent() {
        let p = Prioritizer::new(&PrioritizerConfig::default()).unwrap();
        let strategy = ScoringStrategy::default();
        let r = record();
        let a = p.score(&r, &prefs(), &authorities(), &strategy);
        let b = p.score(&r, &prefs(), &authorities(), &strategy);
        assert_eq!(a, b);
        assert!(a.fallbacks.is_empty());
        assert!((a.factors.topic_relevance - 0.95).abs() < 1e-9);
    }

    #[test]
    fn source_aware_rewards_structure_and_metadata() {
        let p = Prioritizer::new(&PrioritizerConfig::default()).unwrap();
        let r = record();
        let aware = p.score(&r, &prefs(), &authorities(), &ScoringStrategy::default());
        let generic = p.score(&r, &prefs(), &authorities(), &ScoringStrategy::Generic);
        assert!(aware.factors.engagement > generic.factors.engagement);
        assert!(aware.factors.actionability > generic.factors.actionability);
        assert_eq!(generic.strategy, "generic");
    }

    #[test]
    fn missing_weights_fall_back_to_documented_defaults() {
        let p = Prioritizer::new(&PrioritizerConfig::default()).unwrap();
        let mut r = record();
        r.source_id = "unknown-src".into();
        r.topics = vec!["gardening".into()];
        r.title = "Spring planting".into();
        let res = p.score(
            &r,
            &TopicPreferences::default(),
            &SourceAuthorities::default(),
            &ScoringStrategy::Generic,
        );
        assert!((res.factors.topic_relevance - 0.5).abs() < 1e-9);
        assert!((res.factors.authority - 0.5).abs() < 1e-9);
        assert_eq!(
            res.fallbacks,
            vec![
                ScoringConfigError::MissingSourceAuthority("unknown-src".into()),
                ScoringConfigError::MissingTopicWeight("gardening".into()),
            ]
        );
    }

    #[test]
    fn boosts_saturate_a_factor_instead_of_the_total() {
        let cfg = PrioritizerConfig {
            boosts: vec![BoostCfg {
                id: "release".into(),
                pattern: "(?i)released".into(),
                factor: Factor::Uniqueness,
                multiplier: 2.2,
            }],
            ..Default::default()
        };
        let p = Prioritizer::new(&cfg).unwrap();
        let res = p.score(&record(), &prefs(), &authorities(), &ScoringStrategy::default());
        assert_eq!(res.factors.uniqueness, 1.0);
        assert!(res.total_score <= 1.0);
        assert!(res.reasoning.contains("Boosts: release"));
    }

    #[test]
    fn batch_is_sorted_by_score() {
        let p = Prioritizer::new(&PrioritizerConfig::default()).unwrap();
        let fresh = record();
        let mut stale = record();
        stale.id = "rec-0".into();
        stale.published_at = Some(stale.collected_at - Duration::days(40));
        let out = p.prioritize_batch(
            &[stale, fresh],
            &prefs(),
            &authorities(),
            &ScoringStrategy::default(),
        );
        assert_eq!(out[0].record_id, "rec-1");
        assert!(out[0].total_score > out[1].total_score);
    }

    #[test]
    fn rejects_degenerate_weights() {
        let cfg = PrioritizerConfig {
            weights: FactorWeights {
                authority: 0.0,
                recency: 0.0,
                topic_relevance: 0.0,
                engagement: 0.0,
                uniqueness: 0.0,
                completeness: 0.0,
                actionability: 0.0,
                cross_topic: 0.0,
            },
            ..Default::default()
        };
        assert!(matches!(Prioritizer::new(&cfg), Err(ConfigError::Invalid(_))));
    }
}
