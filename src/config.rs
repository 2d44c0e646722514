//! Application configuration: one TOML file, hot-reloaded between cycles.
//!
//! ```toml
//! cycle_secs = 300
//!
//! [allocator]
//! budget = 100.0
//!
//! [[topics]]
//! name = "rust"
//! priority = 2.0
//! preference = 0.9
//! keywords = { tokio = 0.95, "borrow checker" = 0.8 }
//! sources = [{ id = "rust-blog", type = "feed", url = "https://blog.rust-lang.org/feed.xml" }]
//! ```
//!
//! `ConfigHandle::current()` compares the file's mtime on every call and
//! reloads when it changed. A file that fails to parse or validate is logged
//! and the previous configuration stays active.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::gate::{Gate, GateConfig};
use crate::ingest::types::SourceDescriptor;
use crate::ingest::watermark::WatermarkConfig;
use crate::orchestrate::allocator::{AllocatorConfig, TopicDemand};
use crate::orchestrate::fanout::{AnalysisConfig, Fanout};
use crate::orchestrate::workers::WorkerConfig;
use crate::prioritizer::{Prioritizer, PrioritizerConfig, TopicPreferences};
use crate::source_weights::SourceAuthorities;
use crate::trend::TrendConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config/radar.toml";
pub const ENV_CONFIG_PATH: &str = "RADAR_CONFIG_PATH";
pub const ENV_BUDGET: &str = "RADAR_BUDGET";
pub const ENV_CYCLE_SECS: &str = "RADAR_CYCLE_SECS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicConfig {
    pub name: String,
    /// Static share of the budget relative to other topics.
    #[serde(default = "default_priority")]
    pub priority: f64,
    /// Preference weight used for topic relevance (0-1).
    #[serde(default)]
    pub preference: Option<f64>,
    /// Keyword phrase → preference weight.
    #[serde(default)]
    pub keywords: BTreeMap<String, f64>,
    #[serde(default)]
    pub sources: Vec<SourceDescriptor>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_priority() -> f64 {
    1.0
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cycle_secs: u64,
    /// Finished cycles kept for status.
    pub history_len: usize,
    pub watermark: WatermarkConfig,
    pub gate: GateConfig,
    pub scoring: PrioritizerConfig,
    pub trend: TrendConfig,
    pub allocator: AllocatorConfig,
    pub workers: WorkerConfig,
    pub analysis: AnalysisConfig,
    pub authorities: SourceAuthorities,
    pub topics: Vec<TopicConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cycle_secs: 300,
            history_len: 50,
            watermark: WatermarkConfig::default(),
            gate: GateConfig::default(),
            scoring: PrioritizerConfig::default(),
            trend: TrendConfig::default(),
            allocator: AllocatorConfig::default(),
            workers: WorkerConfig::default(),
            analysis: AnalysisConfig::default(),
            authorities: SourceAuthorities::default(),
            topics: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Parses and validates; no env overrides.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let mut cfg: AppConfig = toml::from_str(s)?;
        for t in &mut cfg.topics {
            t.name = t.name.trim().to_lowercase();
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads `path`, validates, then applies env overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut cfg = Self::from_toml_str(&raw)?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// `$RADAR_CONFIG_PATH`, else `config/radar.toml`.
    pub fn path_from_env() -> PathBuf {
        std::env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Startup entry point; any problem here is fatal.
    pub fn from_env() -> anyhow::Result<(Self, PathBuf)> {
        let path = Self::path_from_env();
        let cfg = Self::load(&path)
            .with_context(|| format!("loading configuration from {}", path.display()))?;
        Ok((cfg, path))
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(b) = std::env::var(ENV_BUDGET)
            .ok()
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|b| b.is_finite())
        {
            self.allocator.budget = b.max(0.0);
        }
        if let Some(secs) = std::env::var(ENV_CYCLE_SECS)
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|s| *s > 0)
        {
            self.cycle_secs = secs;
        }
    }

    /// Builds every component once so a bad file is caught before it is used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cycle_secs == 0 {
            return Err(ConfigError::Invalid("cycle_secs must be positive".into()));
        }
        self.watermark.validate()?;
        self.workers.validate()?;
        let mut names = BTreeSet::new();
        let mut sources = BTreeSet::new();
        for t in &self.topics {
            if t.name.is_empty() {
                return Err(ConfigError::Invalid("topic with empty name".into()));
            }
            if !names.insert(t.name.as_str()) {
                return Err(ConfigError::Invalid(format!("topic `{}` defined twice", t.name)));
            }
            if !t.priority.is_finite() || t.priority < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "topic `{}`: priority must be >= 0",
                    t.name
                )));
            }
            for s in &t.sources {
                // one watermark per source, so one owning topic per source
                if !sources.insert(s.id.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "source `{}` is configured more than once",
                        s.id
                    )));
                }
            }
        }
        Gate::from_config(&self.gate)?;
        Prioritizer::new(&self.scoring)?;
        self.trend.validate()?;
        self.allocator.validate()?;
        if self.trend.window(&self.allocator.trend_window).is_none() {
            return Err(ConfigError::Invalid(format!(
                "allocator.trend_window `{}` is not a configured trend window",
                self.allocator.trend_window
            )));
        }
        Fanout::from_config(&self.analysis)?;
        Ok(())
    }

    pub fn topic(&self, name: &str) -> Option<&TopicConfig> {
        self.topics.iter().find(|t| t.name == name)
    }

    pub fn demands(&self) -> Vec<TopicDemand> {
        self.topics
            .iter()
            .map(|t| TopicDemand {
                topic: t.name.clone(),
                priority: t.priority,
                enabled: t.enabled,
            })
            .collect()
    }

    /// Topic and keyword weights across every configured topic.
    pub fn topic_preferences(&self) -> TopicPreferences {
        let mut prefs = TopicPreferences::default();
        for t in &self.topics {
            if let Some(p) = t.preference {
                prefs = prefs.with_topic(&t.name, p);
            }
            for (kw, w) in &t.keywords {
                prefs = prefs.with_keyword(kw, *w);
            }
        }
        prefs
    }

    /// The authority table with per-source overrides from topic sources.
    pub fn authorities(&self) -> SourceAuthorities {
        let mut a = self.authorities.clone();
        for s in self.topics.iter().flat_map(|t| t.sources.iter()) {
            if let Some(w) = s.authority {
                a.authorities.insert(s.id.clone(), w);
            }
        }
        a.normalized()
    }

    pub fn sources(&self) -> impl Iterator<Item = (&TopicConfig, &SourceDescriptor)> {
        self.topics
            .iter()
            .flat_map(|t| t.sources.iter().map(move |s| (t, s)))
    }
}

#[derive(Debug)]
struct State {
    config: Arc<AppConfig>,
    last_modified: Option<SystemTime>,
}

/// Shared, hot-reloading view of the configuration file.
#[derive(Debug)]
pub struct ConfigHandle {
    path: Option<PathBuf>,
    inner: RwLock<State>,
}

impl ConfigHandle {
    /// Never reloads.
    pub fn fixed(config: AppConfig) -> Self {
        Self {
            path: None,
            inner: RwLock::new(State {
                config: Arc::new(config),
                last_modified: None,
            }),
        }
    }

    /// Loads `path` now; fails if the initial file is unusable.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let last_modified = mtime(&path);
        let config = AppConfig::load(&path)?;
        Ok(Self::watching(path, config, last_modified))
    }

    /// Wraps an already loaded config and watches `path` from here on.
    pub fn watching(
        path: impl Into<PathBuf>,
        config: AppConfig,
        last_modified: Option<SystemTime>,
    ) -> Self {
        Self {
            path: Some(path.into()),
            inner: RwLock::new(State {
                config: Arc::new(config),
                last_modified,
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Latest configuration, reloading first if the file changed.
    pub fn current(&self) -> Arc<AppConfig> {
        let Some(path) = self.path.as_deref() else {
            return self.read().config.clone();
        };
        let Some(modified) = mtime(path) else {
            // file gone: keep what we have
            return self.read().config.clone();
        };
        if self.read().last_modified == Some(modified) {
            return self.read().config.clone();
        }

        let mut guard = self.inner.write().unwrap_or_else(|p| p.into_inner());
        // another caller may have reloaded meanwhile
        if guard.last_modified != Some(modified) {
            guard.last_modified = Some(modified);
            match AppConfig::load(path) {
                Ok(cfg) => {
                    info!(target: "orchestrator", path = %path.display(), "configuration reloaded");
                    guard.config = Arc::new(cfg);
                }
                Err(e) => {
                    warn!(
                        target: "orchestrator",
                        path = %path.display(),
                        error = %e,
                        "configuration reload failed, keeping previous"
                    );
                }
            }
        }
        guard.config.clone()
    }

    /// Reloads regardless of mtime. The previous config stays on error.
    pub fn reload_now(&self) -> Result<Arc<AppConfig>, ConfigError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(self.read().config.clone());
        };
        let cfg = Arc::new(AppConfig::load(path)?);
        let mut guard = self.inner.write().unwrap_or_else(|p| p.into_inner());
        guard.config = cfg.clone();
        guard.last_modified = mtime(path);
        Ok(cfg)
    }

    /// Swaps the configuration in memory (tests, admin tooling).
    pub fn replace(&self, config: AppConfig) {
        let mut guard = self.inner.write().unwrap_or_else(|p| p.into_inner());
        guard.config = Arc::new(config);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.inner.read().unwrap_or_else(|p| p.into_inner())
    }
}

fn mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
cycle_secs = 60

[allocator]
budget = 40.0

[authorities]
default_authority = 0.4
authorities = { "rust-blog" = 0.95 }

[[topics]]
name = " Rust "
priority = 2.0
preference = 0.9
keywords = { tokio = 0.95 }
sources = [
  { id = "rust-blog", type = "feed" },
  { id = "rust-repos", type = "repository", authority = 0.8 },
]

[[topics]]
name = "go"
enabled = false
"#;

    #[test]
    fn parses_topics_and_defaults() {
        let cfg = AppConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.cycle_secs, 60);
        assert_eq!(cfg.allocator.budget, 40.0);
        assert_eq!(cfg.allocator.max_boost, 2.0);
        let rust = cfg.topic("rust").unwrap();
        assert_eq!(rust.sources.len(), 2);
        assert!(!cfg.topic("go").unwrap().enabled);
        assert_eq!(cfg.topic("go").unwrap().priority, 1.0);
    }

    #[test]
    fn descriptor_authority_overrides_table() {
        let cfg = AppConfig::from_toml_str(SAMPLE).unwrap();
        let a = cfg.authorities();
        assert_eq!(a.lookup("rust-repos"), Some(0.8));
        assert_eq!(a.lookup("rust-blog"), Some(0.95));
    }

    #[test]
    fn preferences_collect_topics_and_keywords() {
        let cfg = AppConfig::from_toml_str(SAMPLE).unwrap();
        let p = cfg.topic_preferences();
        assert_eq!(p.topics.get("rust"), Some(&0.9));
        assert_eq!(p.keywords.get("tokio"), Some(&0.95));
        assert!(!p.topics.contains_key("go"));
    }

    #[test]
    fn duplicate_sources_are_invalid() {
        let bad = r#"
[[topics]]
name = "a"
sources = [{ id = "x", type = "feed" }]
[[topics]]
name = "b"
sources = [{ id = "x", type = "forum" }]
"#;
        assert!(matches!(
            AppConfig::from_toml_str(bad),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn bad_patterns_surface_as_config_errors() {
        let bad = r#"
[[gate.relevance.deny]]
id = "broken"
pattern = "(unclosed"
reason = "x"
"#;
        assert!(matches!(
            AppConfig::from_toml_str(bad),
            Err(ConfigError::Pattern { .. })
        ));
    }

    #[test]
    fn fixed_handle_never_reloads() {
        let h = ConfigHandle::fixed(AppConfig::default());
        assert!(h.path().is_none());
        assert_eq!(h.current().cycle_secs, 300);
        h.replace(AppConfig {
            cycle_secs: 5,
            ..Default::default()
        });
        assert_eq!(h.current().cycle_secs, 5);
    }
}
