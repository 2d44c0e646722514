//! Cycle summaries, the read-only status snapshot and a capped cycle history.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ingest::watermark::WatermarkStats;
use crate::orchestrate::allocator::TopicAllocation;
use crate::trend::TrendRecord;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceCycleStats {
    pub topic: String,
    pub fetched: usize,
    pub accepted: usize,
    pub stale: usize,
    pub rejected: usize,
    pub parse_errors: usize,
    pub duplicates: usize,
    pub stored: usize,
    pub requeued: usize,
    pub failed: bool,
    pub attempts: u32,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TopicCycleStats {
    pub units: f64,
    pub polled: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleSummary {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: BTreeMap<String, SourceCycleStats>,
    pub topics: BTreeMap<String, TopicCycleStats>,
    /// Failed fetch tasks per source type.
    pub failures_by_type: BTreeMap<String, usize>,
    pub stored: usize,
    pub requeue_pending: usize,
    /// Set when the cycle could not run at all (e.g. unusable configuration).
    pub error: Option<String>,
}

impl CycleSummary {
    pub fn new(cycle: u64, started_at: DateTime<Utc>) -> Self {
        Self {
            cycle,
            started_at,
            finished_at: started_at,
            sources: BTreeMap::new(),
            topics: BTreeMap::new(),
            failures_by_type: BTreeMap::new(),
            stored: 0,
            requeue_pending: 0,
            error: None,
        }
    }

    pub fn source_mut(&mut self, source_id: &str, topic: &str) -> &mut SourceCycleStats {
        self.sources
            .entry(source_id.to_string())
            .or_insert_with(|| SourceCycleStats {
                topic: topic.to_string(),
                ..Default::default()
            })
    }

    pub fn topic_mut(&mut self, topic: &str) -> &mut TopicCycleStats {
        self.topics.entry(topic.to_string()).or_default()
    }
}

/// What `status()` returns. Everything is a copy; holding it blocks nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub cycles_run: u64,
    pub allocations: Vec<TopicAllocation>,
    pub last_cycle: Option<CycleSummary>,
    /// Latest trend record per topic and window.
    pub trends: BTreeMap<String, Vec<TrendRecord>>,
    pub degraded_sources: BTreeSet<String>,
    pub watermarks: WatermarkStats,
    pub requeue_pending: usize,
    pub cancelled_topics: BTreeSet<String>,
}

/// Short history of finished cycles, oldest dropped first.
#[derive(Debug)]
pub struct CycleHistory {
    entries: VecDeque<CycleSummary>,
    cap: usize,
}

impl CycleHistory {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.clamp(1, 1_000);
        Self {
            entries: VecDeque::with_capacity(cap),
            cap,
        }
    }

    pub fn push(&mut self, summary: CycleSummary) {
        self.entries.push_back(summary);
        while self.entries.len() > self.cap {
            self.entries.pop_front();
        }
    }

    pub fn last(&self) -> Option<&CycleSummary> {
        self.entries.back()
    }

    pub fn snapshot_last_n(&self, n: usize) -> Vec<CycleSummary> {
        let start = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(start).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_capped() {
        let mut h = CycleHistory::with_capacity(2);
        for i in 1..=3 {
            h.push(CycleSummary::new(i, Utc::now()));
        }
        assert_eq!(h.len(), 2);
        let cycles: Vec<u64> = h.snapshot_last_n(5).iter().map(|s| s.cycle).collect();
        assert_eq!(cycles, vec![2, 3]);
        assert_eq!(h.last().map(|s| s.cycle), Some(3));
    }

    #[test]
    fn per_source_entries_remember_their_topic() {
        let mut s = CycleSummary::new(1, Utc::now());
        s.source_mut("feed-a", "rust").fetched += 3;
        s.source_mut("feed-a", "ignored").stored += 1;
        let e = &s.sources["feed-a"];
        assert_eq!(e.topic, "rust");
        assert_eq!((e.fetched, e.stored), (3, 1));
    }
}
