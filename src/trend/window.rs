//! Trend window configuration.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Upper bound for any trend span; keeps chrono arithmetic in range.
pub const MAX_SPAN_SECS: i64 = 365 * 86_400;

/// One named analysis window with its velocity thresholds (value units per hour).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowCfg {
    pub name: String,
    pub span_secs: i64,
    pub emergence_velocity: f64,
    pub viral_velocity: f64,
    /// Negative; velocities below it count as declining.
    pub decline_velocity: f64,
}

impl WindowCfg {
    fn new(name: &str, span_secs: i64, emergence: f64, viral: f64, decline: f64) -> Self {
        Self {
            name: name.to_string(),
            span_secs,
            emergence_velocity: emergence,
            viral_velocity: viral,
            decline_velocity: decline,
        }
    }

    pub fn span(&self) -> Duration {
        Duration::seconds(self.span_secs.clamp(0, MAX_SPAN_SECS))
    }

    /// `[now - span, now]`
    pub fn contains(&self, ts: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        ts <= now
            && now
                .checked_sub_signed(self.span())
                .map_or(true, |start| ts >= start)
    }

    /// The equally long period just before this one: `[now - 2*span, now - span)`.
    pub fn contains_previous(&self, ts: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let Some(start) = now.checked_sub_signed(self.span()) else {
            return false;
        };
        ts < start
            && start
                .checked_sub_signed(self.span())
                .map_or(true, |from| ts >= from)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    pub windows: Vec<WindowCfg>,
    /// Topics with fewer signals in a window are never reported as trends.
    pub min_signal_count: usize,
    /// Peak signal value a topic needs to count as viral.
    pub viral_magnitude: f64,
    /// How recent the peak must be.
    pub viral_span_secs: i64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            windows: vec![
                WindowCfg::new("immediate", 3_600, 0.2, 0.5, -0.2),
                WindowCfg::new("short", 86_400, 0.02, 0.05, -0.02),
                WindowCfg::new("long", 604_800, 0.003, 0.008, -0.003),
            ],
            min_signal_count: 3,
            viral_magnitude: 1.2,
            viral_span_secs: 3_600,
        }
    }
}

impl TrendConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.windows.is_empty() {
            return Err(ConfigError::Invalid("trend: at least one window required".into()));
        }
        for (i, w) in self.windows.iter().enumerate() {
            if w.span_secs <= 0 || w.span_secs > MAX_SPAN_SECS {
                return Err(ConfigError::Invalid(format!(
                    "trend window {}: span must be between 1 and {MAX_SPAN_SECS} seconds",
                    w.name
                )));
            }
            if w.decline_velocity > 0.0 || w.viral_velocity < w.emergence_velocity {
                return Err(ConfigError::Invalid(format!(
                    "trend window {}: expected decline <= 0 and viral >= emergence",
                    w.name
                )));
            }
            if self.windows[..i].iter().any(|o| o.name == w.name) {
                return Err(ConfigError::Invalid(format!(
                    "trend window {} defined twice",
                    w.name
                )));
            }
        }
        if self.viral_span_secs <= 0 || self.viral_span_secs > MAX_SPAN_SECS {
            return Err(ConfigError::Invalid(format!(
                "trend: viral_span_secs must be between 1 and {MAX_SPAN_SECS}"
            )));
        }
        if self.min_signal_count < 2 {
            return Err(ConfigError::Invalid(
                "trend: min_signal_count must be at least 2".into(),
            ));
        }
        Ok(())
    }

    pub fn window(&self, name: &str) -> Option<&WindowCfg> {
        self.windows.iter().find(|w| w.name == name)
    }

    /// Twice the longest window, so its previous period is still on hand.
    pub fn retention(&self) -> Duration {
        self.windows
            .iter()
            .map(WindowCfg::span)
            .max()
            .unwrap_or_else(Duration::zero)
            * 2
    }

    pub fn viral_span(&self) -> Duration {
        Duration::seconds(self.viral_span_secs.clamp(0, MAX_SPAN_SECS))
    }
}
