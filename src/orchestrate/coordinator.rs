//! Per-topic coordinator: turns an allocation into a list of fetch tasks.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::ingest::types::SourceDescriptor;
use crate::ingest::watermark::WatermarkTracker;
use crate::orchestrate::allocator::{StrategyHint, TopicAllocation};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchTask {
    pub task_id: u64,
    pub topic: String,
    pub source: SourceDescriptor,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MonitoringPlan {
    pub tasks: Vec<FetchTask>,
    /// Configured sources not polled this cycle (fresh enough or over budget).
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TopicCoordinator {
    pub topic: String,
    pub sources: Vec<SourceDescriptor>,
}

impl TopicCoordinator {
    pub fn new(topic: impl Into<String>, sources: Vec<SourceDescriptor>) -> Self {
        Self {
            topic: topic.into(),
            sources,
        }
    }

    /// Staleness threshold after applying the allocation's hint.
    pub fn staleness_for(hint: StrategyHint, base: Duration) -> Duration {
        match hint {
            StrategyHint::IncreasePolling => base / 2,
            StrategyHint::Maintain => base,
            StrategyHint::Deprioritize => base * 2,
        }
    }

    /// Most overdue sources first, truncated to the allocated units.
    ///
    /// `next_id` hands out task ids so they stay unique across topics.
    pub fn plan(
        &self,
        allocation: &TopicAllocation,
        watermarks: &WatermarkTracker,
        base_staleness: Duration,
        now: DateTime<Utc>,
        next_id: &mut u64,
    ) -> MonitoringPlan {
        let slots = if allocation.resource_units > 0.0 {
            (allocation.resource_units.round() as usize).max(1)
        } else {
            0
        };
        let staleness = Self::staleness_for(allocation.strategy_hint, base_staleness);
        let overdue = watermarks.overdue_among(
            self.sources.iter().map(|s| s.id.as_str()),
            staleness,
            now,
        );

        let mut plan = MonitoringPlan::default();
        for id in overdue.iter().take(slots) {
            if let Some(source) = self.sources.iter().find(|s| &s.id == id) {
                *next_id += 1;
                plan.tasks.push(FetchTask {
                    task_id: *next_id,
                    topic: self.topic.clone(),
                    source: source.clone(),
                });
            }
        }
        plan.skipped = self
            .sources
            .iter()
            .filter(|s| !plan.tasks.iter().any(|t| t.source.id == s.id))
            .map(|s| s.id.clone())
            .collect();
        plan
    }
}
