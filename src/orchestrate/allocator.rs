//! Budget allocator: splits the global monitoring budget across topics.
//!
//! Baseline share follows static topic priority. Trend classification from
//! the configured window scales a topic up (emerging, viral) or down
//! (declining), bounded by `baseline * max_boost`, the floor, and the
//! per-cycle change cap. The sum of units never exceeds the budget.

use std::collections::BTreeMap;

use metrics::gauge;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::trend::{TrendRecord, TrendStrength, TrendType};

const EPS: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Global budget in resource units (one unit ≈ one source poll per cycle).
    pub budget: f64,
    pub max_boost: f64,
    /// Multiplier reached by an extreme decline.
    pub decline_factor: f64,
    /// Max relative change of a topic's units between cycles.
    pub change_cap: f64,
    /// Minimum units for every enabled topic.
    pub floor_units: f64,
    /// Trend window the allocator reacts to.
    pub trend_window: String,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            budget: 100.0,
            max_boost: 2.0,
            decline_factor: 0.5,
            change_cap: 0.5,
            floor_units: 1.0,
            trend_window: "short".into(),
        }
    }
}

impl AllocatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ok = self.budget.is_finite()
            && self.budget >= 0.0
            && self.max_boost >= 1.0
            && (0.0..=1.0).contains(&self.decline_factor)
            && self.decline_factor > 0.0
            && self.change_cap > 0.0
            && self.floor_units >= 0.0;
        if ok {
            Ok(())
        } else {
            Err(ConfigError::Invalid(format!(
                "allocator: out-of-range settings {self:?}"
            )))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyHint {
    IncreasePolling,
    Maintain,
    Deprioritize,
}

/// Per-topic lifecycle: idle → allocated → monitoring → reallocated | deprioritized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicState {
    Idle,
    Allocated,
    Monitoring,
    Reallocated,
    Deprioritized,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicAllocation {
    pub topic: String,
    pub resource_units: f64,
    pub strategy_hint: StrategyHint,
    pub state: TopicState,
}

/// What the allocator needs to know about one configured topic.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicDemand {
    pub topic: String,
    pub priority: f64,
    pub enabled: bool,
}

fn strength_fraction(s: TrendStrength) -> f64 {
    match s {
        TrendStrength::Weak => 0.25,
        TrendStrength::Moderate => 0.5,
        TrendStrength::Strong => 0.75,
        TrendStrength::Extreme => 1.0,
    }
}

#[derive(Debug)]
pub struct Allocator {
    cfg: AllocatorConfig,
    table: BTreeMap<String, TopicAllocation>,
}

impl Allocator {
    pub fn new(cfg: AllocatorConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;
        Ok(Self {
            cfg,
            table: BTreeMap::new(),
        })
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.cfg
    }

    pub fn reconfigure(&mut self, cfg: AllocatorConfig) -> Result<(), ConfigError> {
        cfg.validate()?;
        self.cfg = cfg;
        Ok(())
    }

    /// Copy of the current table, ordered by topic.
    pub fn allocations(&self) -> Vec<TopicAllocation> {
        self.table.values().cloned().collect()
    }

    pub fn get(&self, topic: &str) -> Option<&TopicAllocation> {
        self.table.get(topic)
    }

    /// Marks a topic as actively monitored for the running cycle.
    pub fn mark_monitoring(&mut self, topic: &str) {
        if let Some(a) = self.table.get_mut(topic) {
            if a.resource_units > 0.0 {
                a.state = TopicState::Monitoring;
            }
        }
    }

    /// Trend multiplier for one topic, `1.0` when it has no trend record.
    pub fn multiplier(&self, trend: Option<&TrendRecord>) -> f64 {
        let Some(t) = trend else { return 1.0 };
        let frac = strength_fraction(t.strength);
        match t.trend_type {
            TrendType::Emerging => 1.0 + (self.cfg.max_boost - 1.0) * frac,
            TrendType::Viral => 1.0 + (self.cfg.max_boost - 1.0) * (frac + 0.25).min(1.0),
            TrendType::Declining => 1.0 - (1.0 - self.cfg.decline_factor) * frac,
            TrendType::Stable => 1.0,
        }
    }

    /// Recomputes the table. Topics no longer configured are dropped.
    pub fn allocate(
        &mut self,
        demands: &[TopicDemand],
        trends: &[TrendRecord],
    ) -> Vec<TopicAllocation> {
        let budget = self.cfg.budget.max(0.0);
        let active: Vec<&TopicDemand> = demands
            .iter()
            .filter(|d| d.enabled && d.priority > 0.0 && d.priority.is_finite())
            .collect();
        let total_priority: f64 = active.iter().map(|d| d.priority).sum();

        struct Slot {
            target: f64,
            lo: f64,
            hi: f64,
            multiplier: f64,
        }
        let mut slots: BTreeMap<&str, Slot> = BTreeMap::new();

        if budget > 0.0 && total_priority > 0.0 {
            let weighted: Vec<(&TopicDemand, f64)> = active
                .iter()
                .map(|d| {
                    let trend = trends.iter().find(|t| t.topic == d.topic);
                    (*d, self.multiplier(trend))
                })
                .collect();
            let weighted_total: f64 = weighted.iter().map(|(d, m)| d.priority * m).sum();

            for (d, m) in weighted {
                let baseline = budget * d.priority / total_priority;
                let ceiling = baseline * self.cfg.max_boost;
                let mut lo = self.cfg.floor_units.min(ceiling);
                let mut hi = ceiling;
                if let Some(prev) = self
                    .table
                    .get(&d.topic)
                    .map(|a| a.resource_units)
                    .filter(|u| *u > 0.0)
                {
                    lo = lo.max(prev * (1.0 - self.cfg.change_cap));
                    hi = hi.min(prev * (1.0 + self.cfg.change_cap));
                }
                lo = lo.min(hi);
                let target = (budget * d.priority * m / weighted_total).clamp(lo, hi);
                slots.insert(
                    d.topic.as_str(),
                    Slot {
                        target,
                        lo,
                        hi,
                        multiplier: m,
                    },
                );
            }

            let sum: f64 = slots.values().map(|s| s.target).sum();
            if sum > budget + EPS {
                let excess = sum - budget;
                let room: f64 = slots.values().map(|s| s.target - s.lo).sum();
                if room + EPS >= excess {
                    for s in slots.values_mut() {
                        let r = s.target - s.lo;
                        if room > 0.0 {
                            s.target -= excess * r / room;
                        }
                    }
                } else {
                    // floors and caps alone overshoot; keep proportions
                    let lo_sum: f64 = slots.values().map(|s| s.lo).sum();
                    warn!(
                        target: "allocator",
                        budget,
                        required = lo_sum,
                        "lower bounds exceed budget, scaling down"
                    );
                    let scale = if lo_sum > 0.0 { budget / lo_sum } else { 0.0 };
                    for s in slots.values_mut() {
                        s.target = s.lo * scale;
                    }
                }
            }
            debug_assert!(slots.values().all(|s| s.target <= s.hi + 1e-6));
        }

        let mut next = BTreeMap::new();
        for d in demands {
            let prev = self.table.get(&d.topic);
            let (units, hint, state) = match slots.get(d.topic.as_str()) {
                Some(s) => {
                    let hint = if s.multiplier > 1.0 + EPS {
                        StrategyHint::IncreasePolling
                    } else if s.multiplier < 1.0 - EPS {
                        StrategyHint::Deprioritize
                    } else {
                        StrategyHint::Maintain
                    };
                    let state = match (prev, hint) {
                        (None, _) => TopicState::Allocated,
                        (Some(p), _) if p.state == TopicState::Idle => TopicState::Allocated,
                        (Some(_), StrategyHint::Deprioritize) => TopicState::Deprioritized,
                        (Some(_), _) => TopicState::Reallocated,
                    };
                    (s.target.max(0.0), hint, state)
                }
                None => (0.0, StrategyHint::Maintain, TopicState::Idle),
            };
            gauge!("allocation_units", "topic" => d.topic.clone()).set(units);
            next.insert(
                d.topic.clone(),
                TopicAllocation {
                    topic: d.topic.clone(),
                    resource_units: units,
                    strategy_hint: hint,
                    state,
                },
            );
        }
        self.table = next;

        info!(
            target: "allocator",
            topics = self.table.len(),
            budget,
            allocated = self.table.values().map(|a| a.resource_units).sum::<f64>(),
            "allocation updated"
        );
        self.allocations()
    }
}
