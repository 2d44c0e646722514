//! Per-source watermarks: the boundary between already processed and new.
//!
//! The tracker is owned by the orchestrator task and never shared; callers
//! get copies of watermark values and stats.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::ingest::types::ContentRecord;

pub const DEFAULT_TOLERANCE_SECS: i64 = 300;
/// Longest tolerance or staleness threshold accepted from configuration.
pub const MAX_WATERMARK_SECS: i64 = 365 * 86_400;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatermarkConfig {
    /// Slack subtracted from the watermark for clock skew and late delivery.
    pub tolerance_secs: i64,
    /// A source is overdue once its watermark is older than this.
    pub max_staleness_secs: i64,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
            max_staleness_secs: 1800,
        }
    }
}

impl WatermarkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let in_range = |v: i64| (0..=MAX_WATERMARK_SECS).contains(&v);
        if !in_range(self.tolerance_secs) || !in_range(self.max_staleness_secs) {
            return Err(ConfigError::Invalid(format!(
                "watermark durations must be between 0 and {MAX_WATERMARK_SECS} seconds"
            )));
        }
        Ok(())
    }

    pub fn tolerance(&self) -> Duration {
        Duration::seconds(self.tolerance_secs.clamp(0, MAX_WATERMARK_SECS))
    }

    pub fn max_staleness(&self) -> Duration {
        Duration::seconds(self.max_staleness_secs.clamp(0, MAX_WATERMARK_SECS))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WatermarkStats {
    pub total_sources: usize,
    pub ever_fetched: usize,
    pub never_fetched: usize,
    pub updated_last_24h: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct WatermarkTracker {
    tolerance: Duration,
    /// `None` = registered but never fetched successfully.
    marks: BTreeMap<String, Option<DateTime<Utc>>>,
}

impl Default for WatermarkTracker {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_TOLERANCE_SECS))
    }
}

impl WatermarkTracker {
    pub fn new(tolerance: Duration) -> Self {
        Self {
            tolerance: tolerance.max(Duration::zero()),
            marks: BTreeMap::new(),
        }
    }

    pub fn set_tolerance(&mut self, tolerance: Duration) {
        self.tolerance = tolerance.max(Duration::zero());
    }

    /// Idempotent; never resets an existing watermark.
    pub fn register_source(&mut self, source_id: &str) {
        self.marks.entry(source_id.to_string()).or_insert(None);
    }

    pub fn watermark(&self, source_id: &str) -> Option<DateTime<Utc>> {
        self.marks.get(source_id).copied().flatten()
    }

    /// Accept iff the record was published strictly after `watermark - tolerance`.
    /// Unknown sources and undated records are accepted.
    pub fn should_process(&self, source_id: &str, record: &ContentRecord) -> bool {
        let Some(mark) = self.watermark(source_id) else {
            return true;
        };
        match record.published_at {
            Some(published) => published > mark - self.tolerance,
            None => true,
        }
    }

    /// Advance to the fetch start time. Returns the watermark now in effect,
    /// which is never earlier than the previous one.
    pub fn record_fetch_success(
        &mut self,
        source_id: &str,
        fetch_started_at: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let slot = self.marks.entry(source_id.to_string()).or_insert(None);
        let next = match *slot {
            Some(prev) if prev >= fetch_started_at => prev,
            _ => fetch_started_at,
        };
        *slot = Some(next);
        next
    }

    /// Registered sources whose watermark is older than `max_staleness`.
    /// Never-fetched sources come first, then oldest watermark first.
    pub fn overdue_sources(&self, max_staleness: Duration, now: DateTime<Utc>) -> Vec<String> {
        self.overdue_among(self.marks.keys().map(String::as_str), max_staleness, now)
    }

    /// Same ordering as `overdue_sources`, restricted to `ids`.
    /// Ids that were never registered count as never fetched.
    pub fn overdue_among<'a, I>(
        &self,
        ids: I,
        max_staleness: Duration,
        now: DateTime<Utc>,
    ) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let cutoff = now.checked_sub_signed(max_staleness);
        let mut due: Vec<(Option<DateTime<Utc>>, &'a str)> = ids
            .into_iter()
            .map(|id| (self.watermark(id), id))
            .filter(|(mark, _)| match (mark, cutoff) {
                (None, _) => true,
                (Some(m), Some(c)) => *m <= c,
                (Some(_), None) => false,
            })
            .collect();
        // None sorts before Some; ties broken by id for determinism
        due.sort();
        due.dedup_by(|a, b| a.1 == b.1);
        due.into_iter().map(|(_, id)| id.to_string()).collect()
    }

    pub fn stats(&self, now: DateTime<Utc>) -> WatermarkStats {
        let day_ago = now - Duration::hours(24);
        let mut stats = WatermarkStats {
            total_sources: self.marks.len(),
            ..Default::default()
        };
        for mark in self.marks.values() {
            match mark {
                Some(m) => {
                    stats.ever_fetched += 1;
                    if *m >= day_ago {
                        stats.updated_last_24h += 1;
                    }
                    stats.oldest = Some(stats.oldest.map_or(*m, |o| o.min(*m)));
                    stats.newest = Some(stats.newest.map_or(*m, |n| n.max(*m)));
                }
                None => stats.never_fetched += 1,
            }
        }
        stats
    }
}
