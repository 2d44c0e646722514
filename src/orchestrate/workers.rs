//! Fetch worker pool with bounded concurrency per source type.
//!
//! Each task fetches one source through its type's adapter. A permit is
//! held for the duration of one attempt only, so a task sleeping through its
//! backoff does not block siblings. Failures end up in the task's outcome;
//! they never abort the batch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

use crate::error::{ConfigError, SourceFetchError};
use crate::ingest::types::{RawRecord, SourceAdapter, SourceType};
use crate::orchestrate::coordinator::FetchTask;

/// Longest `retry_after` a rate-limited source can impose on one task.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);
/// Ceiling for the exponential backoff between attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(30);
pub const MAX_ATTEMPTS: u32 = 10;
/// Ten minutes.
pub const MAX_TIMEOUT_MS: u64 = 600_000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TypeLimits {
    pub max_concurrent: usize,
    pub timeout_ms: u64,
}

impl TypeLimits {
    const fn new(max_concurrent: usize, timeout_secs: u64) -> Self {
        Self {
            max_concurrent,
            timeout_ms: timeout_secs * 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub feed: TypeLimits,
    pub repository: TypeLimits,
    pub video: TypeLimits,
    pub forum: TypeLimits,
    pub search: TypeLimits,
    pub max_attempts: u32,
    /// Delay before retry `n` is `backoff_base_ms * 3^(n-1)`.
    pub backoff_base_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            feed: TypeLimits::new(10, 15),
            repository: TypeLimits::new(5, 30),
            video: TypeLimits::new(3, 45),
            forum: TypeLimits::new(5, 20),
            search: TypeLimits::new(5, 20),
            max_attempts: 3,
            backoff_base_ms: 500,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 || self.max_attempts > MAX_ATTEMPTS {
            return Err(ConfigError::Invalid(format!(
                "workers.max_attempts must be between 1 and {MAX_ATTEMPTS}"
            )));
        }
        for t in SourceType::ALL {
            let l = self.limits(t);
            if l.max_concurrent == 0 {
                return Err(ConfigError::Invalid(format!(
                    "workers.{t}: max_concurrent must be positive"
                )));
            }
            if l.timeout_ms == 0 || l.timeout_ms > MAX_TIMEOUT_MS {
                return Err(ConfigError::Invalid(format!(
                    "workers.{t}: timeout_ms must be between 1 and {MAX_TIMEOUT_MS}"
                )));
            }
        }
        Ok(())
    }

    pub fn limits(&self, source_type: SourceType) -> TypeLimits {
        match source_type {
            SourceType::Feed => self.feed,
            SourceType::Repository => self.repository,
            SourceType::Video => self.video,
            SourceType::Forum => self.forum,
            SourceType::Search => self.search,
        }
    }
}

/// One adapter per source type.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<SourceType, Arc<dyn SourceAdapter>>,
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<(SourceType, &'static str)> =
            self.adapters.iter().map(|(t, a)| (*t, a.name())).collect();
        names.sort();
        f.debug_struct("AdapterRegistry").field("adapters", &names).finish()
    }
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any adapter already registered for `source_type`.
    pub fn register(&mut self, source_type: SourceType, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(source_type, adapter);
    }

    pub fn with(mut self, source_type: SourceType, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.register(source_type, adapter);
        self
    }

    pub fn get(&self, source_type: SourceType) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(&source_type).cloned()
    }
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub task: FetchTask,
    /// Taken before the first attempt; the watermark advances to this.
    pub started_at: DateTime<Utc>,
    pub result: Result<Vec<RawRecord>, SourceFetchError>,
    pub attempts: u32,
    pub elapsed_ms: u64,
}

#[derive(Debug)]
pub struct WorkerPool {
    cfg: WorkerConfig,
    registry: Arc<AdapterRegistry>,
    permits: HashMap<SourceType, Arc<Semaphore>>,
}

impl WorkerPool {
    pub fn new(cfg: WorkerConfig, registry: Arc<AdapterRegistry>) -> Self {
        let permits = SourceType::ALL
            .iter()
            .map(|t| {
                let n = cfg.limits(*t).max_concurrent.max(1);
                (*t, Arc::new(Semaphore::new(n)))
            })
            .collect();
        Self {
            cfg,
            registry,
            permits,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.cfg
    }

    /// Starts every task; outcomes arrive in completion order.
    pub fn spawn_batch(&self, tasks: Vec<FetchTask>) -> mpsc::Receiver<FetchOutcome> {
        let (tx, rx) = mpsc::channel(tasks.len().max(1));
        for task in tasks {
            let source_type = task.source.source_type;
            let adapter = self.registry.get(source_type);
            let permits = self.permits.get(&source_type).cloned();
            let limits = self.cfg.limits(source_type);
            let retry = Retry {
                max_attempts: self.cfg.max_attempts.max(1),
                base: Duration::from_millis(self.cfg.backoff_base_ms),
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                let outcome = run_task(task, adapter, permits, limits, retry).await;
                // receiver dropped means the cycle was abandoned
                let _ = tx.send(outcome).await;
            });
        }
        rx
    }

    /// Runs a batch to completion.
    pub async fn run_batch(&self, tasks: Vec<FetchTask>) -> Vec<FetchOutcome> {
        let mut rx = self.spawn_batch(tasks);
        let mut out = Vec::new();
        while let Some(o) = rx.recv().await {
            out.push(o);
        }
        out
    }
}

#[derive(Debug, Clone, Copy)]
struct Retry {
    max_attempts: u32,
    base: Duration,
}

impl Retry {
    fn delay(&self, attempt: u32, err: &SourceFetchError) -> Duration {
        match err {
            SourceFetchError::RateLimited {
                retry_after_secs: Some(s),
            } => Duration::from_secs(*s).min(MAX_RETRY_AFTER),
            _ => self
                .base
                .checked_mul(3u32.saturating_pow(attempt.saturating_sub(1)))
                .map_or(MAX_BACKOFF, |d| d.min(MAX_BACKOFF)),
        }
    }
}

async fn run_task(
    task: FetchTask,
    adapter: Option<Arc<dyn SourceAdapter>>,
    permits: Option<Arc<Semaphore>>,
    limits: TypeLimits,
    retry: Retry,
) -> FetchOutcome {
    let started_at = Utc::now();
    let clock = Instant::now();
    let source_type = task.source.source_type;
    let mut attempts = 0u32;

    let result = match (adapter, permits) {
        (Some(adapter), Some(permits)) => loop {
            attempts += 1;
            let res = {
                let _permit = match permits.clone().acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => break Err(SourceFetchError::Network("worker pool closed".into())),
                };
                match tokio::time::timeout(
                    Duration::from_millis(limits.timeout_ms),
                    adapter.fetch(&task.source),
                )
                .await
                {
                    Ok(r) => r,
                    Err(_) => Err(SourceFetchError::Timeout(limits.timeout_ms)),
                }
            };
            match res {
                Ok(records) => break Ok(records),
                Err(e) if e.is_retryable() && attempts < retry.max_attempts => {
                    let delay = retry.delay(attempts, &e);
                    debug!(
                        target: "workers",
                        task_id = task.task_id,
                        source = %task.source.id,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "fetch failed, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => break Err(e),
            }
        },
        _ => Err(SourceFetchError::NoAdapter(source_type)),
    };

    let elapsed_ms = clock.elapsed().as_millis() as u64;
    histogram!("worker_fetch_ms", "source_type" => source_type.as_str()).record(elapsed_ms as f64);
    if let Err(e) = &result {
        counter!(
            "worker_task_failures_total",
            "source_type" => source_type.as_str(),
            "kind" => e.kind()
        )
        .increment(1);
        warn!(
            target: "workers",
            task_id = task.task_id,
            topic = %task.topic,
            source = %task.source.id,
            source_type = %source_type,
            attempts,
            error = %e,
            "fetch task failed"
        );
    }

    FetchOutcome {
        task,
        started_at,
        result,
        attempts,
        elapsed_ms,
    }
}
