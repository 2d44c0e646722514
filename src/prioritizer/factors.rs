//! The eight factor computations. Every function returns an unclamped raw
//! value; clamping happens once, after keyword boosts, in `Prioritizer::score`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ScoringConfigError;
use crate::ingest::types::ContentRecord;
use crate::prioritizer::strategy::{structure_of, type_engagement, ScoringStrategy};
use crate::prioritizer::TopicPreferences;
use crate::source_weights::SourceAuthorities;

pub const UNKNOWN_DATE_RECENCY: f64 = 0.3;
pub const NEUTRAL: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    Authority,
    Recency,
    TopicRelevance,
    Engagement,
    Uniqueness,
    Completeness,
    Actionability,
    CrossTopic,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FactorScores {
    pub authority: f64,
    pub recency: f64,
    pub topic_relevance: f64,
    pub engagement: f64,
    pub uniqueness: f64,
    pub completeness: f64,
    pub actionability: f64,
    pub cross_topic: f64,
}

impl FactorScores {
    /// Human-readable names in declaration order.
    pub fn named(&self) -> [(&'static str, f64); 8] {
        [
            ("authority", self.authority),
            ("recency", self.recency),
            ("topic relevance", self.topic_relevance),
            ("engagement", self.engagement),
            ("uniqueness", self.uniqueness),
            ("completeness", self.completeness),
            ("actionability", self.actionability),
            ("cross-topic value", self.cross_topic),
        ]
    }

    pub fn get_mut(&mut self, factor: Factor) -> &mut f64 {
        match factor {
            Factor::Authority => &mut self.authority,
            Factor::Recency => &mut self.recency,
            Factor::TopicRelevance => &mut self.topic_relevance,
            Factor::Engagement => &mut self.engagement,
            Factor::Uniqueness => &mut self.uniqueness,
            Factor::Completeness => &mut self.completeness,
            Factor::Actionability => &mut self.actionability,
            Factor::CrossTopic => &mut self.cross_topic,
        }
    }

    pub fn clamped(self) -> Self {
        let c = crate::source_weights::clamp01;
        Self {
            authority: c(self.authority),
            recency: c(self.recency),
            topic_relevance: c(self.topic_relevance),
            engagement: c(self.engagement),
            uniqueness: c(self.uniqueness),
            completeness: c(self.completeness),
            actionability: c(self.actionability),
            cross_topic: c(self.cross_topic),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecencyConfig {
    pub half_life_hours: f64,
    pub max_age_days: f64,
}

impl Default for RecencyConfig {
    fn default() -> Self {
        Self {
            half_life_hours: 48.0,
            max_age_days: 30.0,
        }
    }
}

pub fn authority(
    record: &ContentRecord,
    authorities: &SourceAuthorities,
    fallbacks: &mut Vec<ScoringConfigError>,
) -> f64 {
    match authorities.lookup(&record.source_id) {
        Some(w) => w,
        None => {
            fallbacks.push(ScoringConfigError::MissingSourceAuthority(
                record.source_id.clone(),
            ));
            authorities.default_authority
        }
    }
}

/// Age is measured against `collected_at`, so re-scoring later gives the same value.
pub fn recency(
    published_at: Option<DateTime<Utc>>,
    collected_at: DateTime<Utc>,
    cfg: &RecencyConfig,
) -> f64 {
    let Some(published) = published_at else {
        return UNKNOWN_DATE_RECENCY;
    };
    let age_hours = (collected_at - published).num_seconds().max(0) as f64 / 3600.0;
    if age_hours > cfg.max_age_days * 24.0 {
        return 0.0;
    }
    if cfg.half_life_hours <= 0.0 {
        return 1.0;
    }
    0.5_f64.powf(age_hours / cfg.half_life_hours)
}

pub fn topic_relevance(
    record: &ContentRecord,
    prefs: &TopicPreferences,
    fallbacks: &mut Vec<ScoringConfigError>,
) -> f64 {
    let mut best: Option<f64> = None;
    let mut bump = |w: f64| best = Some(best.map_or(w, |b: f64| b.max(w)));

    for t in &record.topics {
        if let Some(&w) = prefs.topics.get(t) {
            bump(w);
        }
    }
    if !prefs.keywords.is_empty() {
        let padded = padded_words(&record.text());
        for (kw, &w) in &prefs.keywords {
            if padded.contains(&format!(" {kw} ")) {
                bump(w);
            }
        }
    }

    best.unwrap_or_else(|| {
        fallbacks.push(ScoringConfigError::MissingTopicWeight(
            record.primary_topic().unwrap_or_default().to_string(),
        ));
        NEUTRAL
    })
}

/// Lowercased words joined by single spaces, padded for whole-phrase search.
pub(crate) fn padded_words(text: &str) -> String {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric() && c != '+' && c != '#')
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    format!(" {} ", words.join(" "))
}

pub fn engagement(record: &ContentRecord, strategy: &ScoringStrategy) -> f64 {
    let analysis = record.metric("analysis.engagement");
    let base = match strategy {
        ScoringStrategy::Generic => record.metric("engagement").or(analysis).unwrap_or(NEUTRAL),
        ScoringStrategy::SourceAware(p) => match (type_engagement(record, p), analysis) {
            (Some(t), Some(a)) => 0.7 * t + 0.3 * a,
            (Some(t), None) => t,
            (None, Some(a)) => a,
            (None, None) => NEUTRAL,
        },
    };
    // strongly worded content draws more reaction
    match record.metric("analysis.sentiment") {
        Some(s) => 0.9 * base + 0.1 * ((s - 0.5).abs() * 2.0),
        None => base,
    }
}

pub fn uniqueness(record: &ContentRecord) -> f64 {
    record.metric("uniqueness").unwrap_or(NEUTRAL)
}

pub fn completeness(record: &ContentRecord, strategy: &ScoringStrategy) -> f64 {
    let len = record.body.chars().count();
    let mut base = if len == 0 {
        0.3
    } else {
        (len as f64 / 1000.0).min(1.0)
    };
    if let ScoringStrategy::SourceAware(_) = strategy {
        let s = structure_of(&record.body);
        if s.code_blocks > 0 {
            base += 0.15;
        }
        if s.enumerated_steps >= 2 {
            base += 0.1;
        }
        if let Some(minutes) = record
            .metric("duration_minutes")
            .or_else(|| record.metric("duration_secs").map(|s| s / 60.0))
        {
            base = base.max((minutes / 20.0).min(1.0));
        }
    }
    match record.metric("analysis.quality") {
        Some(q) => 0.7 * base + 0.3 * q,
        None => base,
    }
}

pub fn actionability(record: &ContentRecord, strategy: &ScoringStrategy) -> f64 {
    let base = match strategy {
        ScoringStrategy::Generic => record.metric("actionability").unwrap_or(NEUTRAL),
        ScoringStrategy::SourceAware(_) => {
            let s = structure_of(&record.body);
            let mut a = record.metric("actionability").unwrap_or(NEUTRAL);
            if s.enumerated_steps >= 2 {
                a = a.max(0.8);
            }
            if s.code_blocks > 0 {
                a += 0.1;
            }
            a
        }
    };
    match record.metric("analysis.technical_depth") {
        Some(td) => 0.7 * base + 0.3 * td,
        None => base,
    }
}

pub fn cross_topic(record: &ContentRecord) -> f64 {
    if record.topics.is_empty() {
        0.1
    } else {
        record.topics.len() as f64 / 5.0
    }
}
