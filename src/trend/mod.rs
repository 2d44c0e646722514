//! Trend detection over rolling per-topic signal history.
//!
//! Signals are appended as scored records arrive and are kept until they fall
//! out of twice the longest window. `analyze` sorts each topic's signals by time,
//! fits a least-squares slope (value per hour) and classifies the topic.

pub mod stats;
pub mod window;

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, TrendError};
use crate::ingest::types::{ContentRecord, SourceType};
pub use window::{TrendConfig, WindowCfg};

const UNCATEGORIZED: &str = "uncategorized";

/// How far past its collection time a record's publish date may point.
const FUTURE_SKEW_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendSignal {
    pub topic: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub source_record_id: String,
    pub source_id: String,
    pub source_type: SourceType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendType {
    Emerging,
    Viral,
    Declining,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendStrength {
    Weak,
    Moderate,
    Strong,
    Extreme,
}

impl TrendStrength {
    /// Buckets `|velocity|` relative to the window's emergence threshold.
    fn from_ratio(ratio: f64) -> Self {
        if ratio < 1.0 {
            TrendStrength::Weak
        } else if ratio < 2.0 {
            TrendStrength::Moderate
        } else if ratio < 4.0 {
            TrendStrength::Strong
        } else {
            TrendStrength::Extreme
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendRecord {
    pub topic: String,
    pub trend_type: TrendType,
    pub strength: TrendStrength,
    pub velocity: f64,
    pub confidence: f64,
    pub signal_count: usize,
    pub window: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendAnalysis {
    pub window: String,
    pub analyzed_at: DateTime<Utc>,
    pub detected_trends: Vec<TrendRecord>,
    pub emergence_candidates: Vec<String>,
    pub declining_topics: Vec<String>,
    pub viral_content_ids: Vec<String>,
    pub topic_velocities: BTreeMap<String, f64>,
    pub confidence_score: f64,
    pub total_signals: usize,
}

/// Engagement bonus derived from source-type metadata, roughly `[0, 0.6]`.
pub fn engagement_signal(record: &ContentRecord) -> f64 {
    let m = |k: &str| record.metric(k);
    let lg = |x: Option<f64>| (x.unwrap_or(0.0).max(0.0) + 1.0).log10();
    let bonus = match record.source_type {
        SourceType::Video => {
            let views = m("views").unwrap_or(0.0);
            let like_rate = match m("likes") {
                Some(l) if views > 0.0 => (l / views * 20.0).min(1.0),
                _ => 0.0,
            };
            0.3 * (lg(Some(views)) / 6.0).min(1.0) + 0.2 * like_rate
        }
        SourceType::Repository => {
            0.4 * (lg(m("stars")) / 5.0).min(1.0) + 0.2 * (lg(m("forks")) / 4.0).min(1.0)
        }
        SourceType::Search => {
            let rank = m("rank")
                .filter(|r| *r >= 1.0)
                .map(|r| ((11.0 - r) / 10.0).clamp(0.0, 1.0))
                .unwrap_or(0.0);
            0.3 * rank + 0.2 * m("relevance").unwrap_or(0.0).clamp(0.0, 1.0)
        }
        SourceType::Forum => {
            0.3 * (lg(m("comments")) / 3.0).min(1.0)
                + 0.2 * (lg(m("upvotes").or_else(|| m("score"))) / 4.0).min(1.0)
        }
        SourceType::Feed => m("engagement").unwrap_or(0.0).clamp(0.0, 1.0) * 0.5,
    };
    bonus.max(0.0)
}

#[derive(Debug)]
pub struct TrendEngine {
    cfg: TrendConfig,
    signals: BTreeMap<String, VecDeque<TrendSignal>>,
    /// window name → topic → latest record
    current: HashMap<String, BTreeMap<String, TrendRecord>>,
}

impl TrendEngine {
    pub fn new(cfg: TrendConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;
        Ok(Self {
            cfg,
            signals: BTreeMap::new(),
            current: HashMap::new(),
        })
    }

    pub fn config(&self) -> &TrendConfig {
        &self.cfg
    }

    /// Swaps thresholds and windows; history is kept, stale window results dropped.
    pub fn reconfigure(&mut self, cfg: TrendConfig) -> Result<(), ConfigError> {
        cfg.validate()?;
        if cfg != self.cfg {
            self.current
                .retain(|name, _| cfg.windows.iter().any(|w| &w.name == name));
            self.cfg = cfg;
        }
        Ok(())
    }

    /// Appends a signal for the record's primary topic.
    pub fn add_signal(&mut self, record: &ContentRecord, priority_score: f64) -> TrendSignal {
        let topic = record
            .primary_topic()
            .filter(|t| !t.is_empty())
            .unwrap_or(UNCATEGORIZED)
            .to_string();
        let collected = record.collected_at;
        let latest = collected
            .checked_add_signed(Duration::seconds(FUTURE_SKEW_SECS))
            .unwrap_or(collected);
        let signal = TrendSignal {
            topic: topic.clone(),
            timestamp: record.event_time().min(latest),
            value: (priority_score + engagement_signal(record)).clamp(0.1, 2.0),
            source_record_id: record.id.clone(),
            source_id: record.source_id.clone(),
            source_type: record.source_type,
        };

        let cutoff = collected.checked_sub_signed(self.cfg.retention());

        let buf = self.signals.entry(topic).or_default();
        buf.push_back(signal.clone());
        // only the front is trimmed here; `expire` sweeps late arrivals
        if let Some(cutoff) = cutoff {
            while buf.front().is_some_and(|s| s.timestamp < cutoff) {
                buf.pop_front();
            }
        }
        signal
    }

    /// Drops every signal older than the retention period. Returns how many went.
    pub fn expire(&mut self, now: DateTime<Utc>) -> usize {
        let Some(cutoff) = now.checked_sub_signed(self.cfg.retention()) else {
            return 0;
        };
        let mut dropped = 0;
        for buf in self.signals.values_mut() {
            let before = buf.len();
            buf.retain(|s| s.timestamp >= cutoff);
            dropped += before - buf.len();
        }
        self.signals.retain(|_, buf| !buf.is_empty());
        dropped
    }

    pub fn signal_count(&self) -> usize {
        self.signals.values().map(VecDeque::len).sum()
    }

    /// Latest trend records for `window`, ordered by topic.
    pub fn current(&self, window: &str) -> Result<Vec<TrendRecord>, TrendError> {
        if self.cfg.window(window).is_none() {
            return Err(TrendError::UnknownWindow(window.to_string()));
        }
        Ok(self
            .current
            .get(window)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    pub fn analyze(&mut self, window: &str) -> Result<TrendAnalysis, TrendError> {
        self.analyze_at(window, Utc::now())
    }

    pub fn analyze_at(
        &mut self,
        window: &str,
        now: DateTime<Utc>,
    ) -> Result<TrendAnalysis, TrendError> {
        let w = self
            .cfg
            .window(window)
            .cloned()
            .ok_or_else(|| TrendError::UnknownWindow(window.to_string()))?;
        let min_count = self.cfg.min_signal_count;
        let viral_since = now
            .checked_sub_signed(self.cfg.viral_span())
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut analysis = TrendAnalysis {
            window: w.name.clone(),
            analyzed_at: now,
            detected_trends: Vec::new(),
            emergence_candidates: Vec::new(),
            declining_topics: Vec::new(),
            viral_content_ids: Vec::new(),
            topic_velocities: BTreeMap::new(),
            confidence_score: 0.0,
            total_signals: 0,
        };
        let mut topics_seen = 0usize;

        for (topic, buf) in &self.signals {
            let mut in_window: Vec<&TrendSignal> =
                buf.iter().filter(|s| w.contains(s.timestamp, now)).collect();
            if in_window.is_empty() {
                continue;
            }
            topics_seen += 1;
            analysis.total_signals += in_window.len();
            in_window.sort_by_key(|s| s.timestamp);

            let origin = in_window[0].timestamp;
            let points: Vec<(f64, f64)> = in_window
                .iter()
                .map(|s| ((s.timestamp - origin).num_milliseconds() as f64 / 3_600_000.0, s.value))
                .collect();
            let velocity = stats::slope(&points);
            if let Some(v) = velocity {
                analysis.topic_velocities.insert(topic.clone(), v);
            }
            if in_window.len() < min_count {
                continue;
            }
            let velocity = velocity.unwrap_or(0.0);

            let previous = buf
                .iter()
                .filter(|s| w.contains_previous(s.timestamp, now))
                .count();
            let emerging = velocity > w.emergence_velocity && previous < min_count;
            let viral_hits: Vec<&TrendSignal> = in_window
                .iter()
                .copied()
                .filter(|s| s.timestamp >= viral_since && s.value >= self.cfg.viral_magnitude)
                .collect();
            let viral = velocity >= w.viral_velocity && !viral_hits.is_empty();

            let trend_type = if viral {
                TrendType::Viral
            } else if emerging {
                TrendType::Emerging
            } else if velocity < w.decline_velocity {
                TrendType::Declining
            } else {
                TrendType::Stable
            };

            match trend_type {
                TrendType::Viral => {
                    analysis
                        .viral_content_ids
                        .extend(viral_hits.iter().map(|s| s.source_record_id.clone()));
                    if emerging {
                        analysis.emergence_candidates.push(topic.clone());
                    }
                }
                TrendType::Emerging => analysis.emergence_candidates.push(topic.clone()),
                TrendType::Declining => analysis.declining_topics.push(topic.clone()),
                TrendType::Stable => {}
            }

            let xs: Vec<f64> = points.iter().map(|p| p.0).collect();
            let regularity = stats::gap_variation(&xs).map_or(0.5, |cv| 1.0 / (1.0 + cv));
            let volume = (in_window.len() as f64 / (4 * min_count) as f64).min(1.0);
            let confidence = (0.6 * volume + 0.4 * regularity).clamp(0.0, 1.0);

            let ratio = if w.emergence_velocity > 0.0 {
                velocity.abs() / w.emergence_velocity
            } else {
                0.0
            };
            analysis.detected_trends.push(TrendRecord {
                topic: topic.clone(),
                trend_type,
                strength: TrendStrength::from_ratio(ratio),
                velocity,
                confidence,
                signal_count: in_window.len(),
                window: w.name.clone(),
            });
        }

        if !analysis.detected_trends.is_empty() {
            let mean = analysis.detected_trends.iter().map(|t| t.confidence).sum::<f64>()
                / analysis.detected_trends.len() as f64;
            let sufficiency = analysis.detected_trends.len() as f64 / topics_seen.max(1) as f64;
            analysis.confidence_score = (mean * sufficiency).clamp(0.0, 1.0);
        }

        debug!(
            target: "trend",
            window = %w.name,
            signals = analysis.total_signals,
            trends = analysis.detected_trends.len(),
            emerging = analysis.emergence_candidates.len(),
            declining = analysis.declining_topics.len(),
            "window analyzed"
        );

        self.current.insert(
            w.name.clone(),
            analysis
                .detected_trends
                .iter()
                .map(|t| (t.topic.clone(), t.clone()))
                .collect(),
        );
        Ok(analysis)
    }
}
