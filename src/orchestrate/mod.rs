//! Orchestration: allocator → topic coordinators → worker pool → gate →
//! analysis fan-out → prioritizer → store → trend engine.
//!
//! All mutable pipeline state (watermarks, signal history, allocation table,
//! requeue, degraded set) is owned by a single actor task. Callers talk to it
//! through `OrchestratorHandle`: commands over an mpsc channel, status over a
//! `watch` channel, and topic cancellation over a second `watch` channel the
//! actor checks at every stage handoff.

pub mod allocator;
pub mod coordinator;
pub mod fanout;
pub mod scheduler;
pub mod status;
pub mod workers;

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use metrics::{counter, gauge};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, ConfigHandle};
use crate::error::{ConfigError, OrchestratorClosed};
use crate::gate::Gate;
use crate::ingest::store::RecordStore;
use crate::ingest::types::ContentRecord;
use crate::ingest::watermark::WatermarkTracker;
use crate::ingest::{ensure_metrics_described, into_record};
use crate::prioritizer::{Prioritizer, ScoringStrategy, TopicPreferences};
use crate::source_weights::SourceAuthorities;
use crate::trend::TrendEngine;
use allocator::Allocator;
use coordinator::TopicCoordinator;
use fanout::Fanout;
use status::{CycleHistory, CycleSummary, SourceCycleStats, StatusSnapshot};
use workers::{AdapterRegistry, WorkerPool};

/// Requeued records beyond this are dropped, oldest first.
const MAX_REQUEUE: usize = 10_000;

#[derive(Debug)]
enum Command {
    RunOnce {
        reply: oneshot::Sender<CycleSummary>,
    },
    Shutdown,
}

/// Cheap to clone; every clone talks to the same actor.
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::Sender<Command>,
    status: watch::Receiver<StatusSnapshot>,
    cancel: Arc<watch::Sender<BTreeSet<String>>>,
}

impl OrchestratorHandle {
    /// Runs one full cycle and waits for its summary. Requests queue up
    /// behind a cycle that is already running.
    pub async fn run_once(&self) -> Result<CycleSummary, OrchestratorClosed> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::RunOnce { reply })
            .await
            .map_err(|_| OrchestratorClosed)?;
        rx.await.map_err(|_| OrchestratorClosed)
    }

    /// Latest published status. Never waits for a running cycle.
    pub fn status(&self) -> StatusSnapshot {
        let mut s = self.status.borrow().clone();
        s.cancelled_topics = self.cancel.borrow().clone();
        s
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.clone()
    }

    /// Discards the topic's results for the running (or next) cycle.
    /// In-flight fetches still complete. Returns `false` if already cancelled.
    pub fn cancel_topic(&self, topic: &str) -> bool {
        let topic = topic.trim().to_lowercase();
        self.cancel.send_if_modified(|set| set.insert(topic.clone()))
    }

    pub async fn shutdown(&self) -> Result<(), OrchestratorClosed> {
        self.tx
            .send(Command::Shutdown)
            .await
            .map_err(|_| OrchestratorClosed)
    }
}

/// Per-cycle components built from the configuration in effect.
struct CycleContext {
    gate: Gate,
    prioritizer: Prioritizer,
    fanout: Fanout,
    prefs: TopicPreferences,
    authorities: SourceAuthorities,
    strategy: ScoringStrategy,
}

impl CycleContext {
    fn build(cfg: &AppConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            gate: Gate::from_config(&cfg.gate)?,
            prioritizer: Prioritizer::new(&cfg.scoring)?,
            fanout: Fanout::from_config(&cfg.analysis)?,
            prefs: cfg.topic_preferences(),
            authorities: cfg.authorities(),
            strategy: cfg.scoring.strategy.clone(),
        })
    }
}

enum StoreOutcome {
    Stored,
    Duplicate,
    Requeued,
}

pub struct Orchestrator {
    config: Arc<ConfigHandle>,
    registry: Arc<AdapterRegistry>,
    store: Arc<dyn RecordStore>,
    pool: WorkerPool,
    watermarks: WatermarkTracker,
    trends: TrendEngine,
    allocator: Allocator,
    history: CycleHistory,
    degraded: BTreeSet<String>,
    requeue: VecDeque<ContentRecord>,
    cycles: u64,
    next_task_id: u64,
    status_tx: watch::Sender<StatusSnapshot>,
    cancel: Arc<watch::Sender<BTreeSet<String>>>,
}

impl Orchestrator {
    fn new(
        config: Arc<ConfigHandle>,
        registry: AdapterRegistry,
        store: Arc<dyn RecordStore>,
    ) -> Result<(Self, OrchestratorHandle, mpsc::Receiver<Command>), ConfigError> {
        ensure_metrics_described();
        let cfg = config.current();
        cfg.watermark.validate()?;
        cfg.workers.validate()?;
        let registry = Arc::new(registry);
        let (status_tx, status_rx) = watch::channel(StatusSnapshot::default());
        let (cancel_tx, _) = watch::channel(BTreeSet::new());
        let cancel = Arc::new(cancel_tx);
        let (tx, rx) = mpsc::channel(16);

        let orchestrator = Self {
            pool: WorkerPool::new(cfg.workers.clone(), Arc::clone(&registry)),
            watermarks: WatermarkTracker::new(cfg.watermark.tolerance()),
            trends: TrendEngine::new(cfg.trend.clone())?,
            allocator: Allocator::new(cfg.allocator.clone())?,
            history: CycleHistory::with_capacity(cfg.history_len),
            degraded: BTreeSet::new(),
            requeue: VecDeque::new(),
            cycles: 0,
            next_task_id: 0,
            status_tx,
            cancel: Arc::clone(&cancel),
            config,
            registry,
            store,
        };
        let handle = OrchestratorHandle {
            tx,
            status: status_rx,
            cancel,
        };
        Ok((orchestrator, handle, rx))
    }

    /// Builds the actor and starts it on the current runtime.
    pub fn spawn(
        config: Arc<ConfigHandle>,
        registry: AdapterRegistry,
        store: Arc<dyn RecordStore>,
    ) -> Result<(OrchestratorHandle, JoinHandle<()>), ConfigError> {
        let (orchestrator, handle, rx) = Self::new(config, registry, store)?;
        let join = tokio::spawn(orchestrator.run(rx));
        Ok((handle, join))
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        info!(target: "orchestrator", "orchestrator started");
        self.publish_status();
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::RunOnce { reply } => {
                    let summary = self.run_cycle().await;
                    let _ = reply.send(summary);
                }
                Command::Shutdown => break,
            }
        }
        info!(target: "orchestrator", cycles = self.cycles, "orchestrator stopped");
    }

    fn is_cancelled(&self, topic: &str) -> bool {
        let topic = topic.trim().to_lowercase();
        self.cancel.borrow().contains(&topic)
    }

    /// Applies the current configuration to long-lived components.
    fn reconfigure(&mut self, cfg: &AppConfig) -> Result<(), ConfigError> {
        // `replace` skips validation, so bounds are checked again here
        cfg.watermark.validate()?;
        cfg.workers.validate()?;
        self.trends.reconfigure(cfg.trend.clone())?;
        self.allocator.reconfigure(cfg.allocator.clone())?;
        self.watermarks
            .set_tolerance(cfg.watermark.tolerance());
        if self.pool.config() != &cfg.workers {
            self.pool = WorkerPool::new(cfg.workers.clone(), Arc::clone(&self.registry));
        }
        Ok(())
    }

    async fn run_cycle(&mut self) -> CycleSummary {
        self.cycles += 1;
        let started_at = Utc::now();
        let mut summary = CycleSummary::new(self.cycles, started_at);
        let cfg = self.config.current();

        let ctx = match self
            .reconfigure(&cfg)
            .and_then(|_| CycleContext::build(&cfg))
        {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(target: "orchestrator", cycle = self.cycles, error = %e, "cycle skipped: unusable configuration");
                summary.error = Some(e.to_string());
                return self.finish_cycle(summary);
            }
        };

        // 1) records whose store write failed last time
        let mut seen: HashSet<String> = HashSet::new();
        let pending: Vec<ContentRecord> = self.requeue.drain(..).collect();
        if !pending.is_empty() {
            debug!(target: "orchestrator", count = pending.len(), "retrying requeued records");
        }
        for record in pending {
            let topic = record.primary_topic().unwrap_or_default().to_string();
            let outcome = self.store_record(record, &ctx, &mut seen).await;
            if let StoreOutcome::Stored = outcome {
                summary.stored += 1;
                debug!(target: "orchestrator", topic = %topic, "requeued record stored");
            }
        }

        // 2) allocate
        for (_, source) in cfg.sources() {
            self.watermarks.register_source(&source.id);
        }
        let window_trends = self
            .trends
            .current(&cfg.allocator.trend_window)
            .unwrap_or_default();
        self.allocator.allocate(&cfg.demands(), &window_trends);

        // 3) plan
        let base_staleness = cfg.watermark.max_staleness();
        let now = Utc::now();
        let mut tasks = Vec::new();
        for topic in &cfg.topics {
            let Some(allocation) = self.allocator.get(&topic.name).cloned() else {
                continue;
            };
            let cancelled = self.is_cancelled(&topic.name);
            let stats = summary.topic_mut(&topic.name);
            stats.units = allocation.resource_units;
            if cancelled || allocation.resource_units <= 0.0 {
                stats.cancelled = cancelled;
                stats.skipped = topic.sources.len();
                continue;
            }
            let plan = TopicCoordinator::new(topic.name.clone(), topic.sources.clone()).plan(
                &allocation,
                &self.watermarks,
                base_staleness,
                now,
                &mut self.next_task_id,
            );
            stats.polled = plan.tasks.len();
            stats.skipped = plan.skipped.len();
            if !plan.tasks.is_empty() {
                self.allocator.mark_monitoring(&topic.name);
            }
            tasks.extend(plan.tasks);
        }

        // 4) fetch
        let mut rx = self.pool.spawn_batch(tasks);
        let mut outcomes = Vec::new();
        while let Some(outcome) = rx.recv().await {
            outcomes.push(outcome);
        }
        outcomes.sort_by_key(|o| o.task.task_id);

        // 5) parse → watermark → gate
        let mut gated = Vec::new();
        let mut fetched_ok = Vec::new();
        for outcome in outcomes {
            let topic = outcome.task.topic.clone();
            let source = &outcome.task.source;
            let mut stats = SourceCycleStats {
                topic: topic.clone(),
                attempts: outcome.attempts,
                ..Default::default()
            };
            match outcome.result {
                Err(e) => {
                    stats.failed = true;
                    stats.error = Some(e.to_string());
                    summary.topic_mut(&topic).failed += 1;
                    *summary
                        .failures_by_type
                        .entry(source.source_type.as_str().to_string())
                        .or_default() += 1;
                    if self.degraded.insert(source.id.clone()) {
                        warn!(target: "orchestrator", source = %source.id, error = %e, "source degraded");
                    }
                }
                Ok(_) if self.is_cancelled(&topic) => {
                    summary.topic_mut(&topic).cancelled = true;
                    debug!(target: "orchestrator", topic = %topic, source = %source.id, "discarding results of cancelled topic");
                }
                Ok(raws) => {
                    summary.topic_mut(&topic).succeeded += 1;
                    stats.fetched = raws.len();
                    counter!("ingest_records_total", "source_type" => source.source_type.as_str())
                        .increment(raws.len() as u64);
                    let authority = ctx.authorities.weight_for(&source.id);
                    let collected_at = Utc::now();
                    for raw in raws {
                        let record = match into_record(raw, source, &topic, authority, collected_at) {
                            Ok(r) => r,
                            Err(e) => {
                                stats.parse_errors += 1;
                                counter!("ingest_parse_errors_total").increment(1);
                                debug!(target: "ingest", source = %source.id, error = %e, "record dropped");
                                continue;
                            }
                        };
                        if !self.watermarks.should_process(&source.id, &record) {
                            stats.stale += 1;
                            counter!("ingest_stale_total").increment(1);
                            continue;
                        }
                        if !ctx.gate.admit(&record).admitted {
                            stats.rejected += 1;
                            continue;
                        }
                        stats.accepted += 1;
                        gated.push(record);
                    }
                    fetched_ok.push((source.id.clone(), topic.clone(), outcome.started_at));
                }
            }
            summary.sources.insert(source.id.clone(), stats);
        }

        // 6) analysis fan-out
        let analyzed = ctx.fanout.run(gated).await;

        // 7) dedup → score → store → trend signal
        for record in analyzed {
            let topic = record.primary_topic().unwrap_or_default().to_string();
            if self.is_cancelled(&topic) {
                summary.topic_mut(&topic).cancelled = true;
                continue;
            }
            let source_id = record.source_id.clone();
            let outcome = self.store_record(record, &ctx, &mut seen).await;
            let stats = summary.source_mut(&source_id, &topic);
            match outcome {
                StoreOutcome::Stored => stats.stored += 1,
                StoreOutcome::Duplicate => stats.duplicates += 1,
                StoreOutcome::Requeued => stats.requeued += 1,
            }
        }
        summary.stored += summary.sources.values().map(|s| s.stored).sum::<usize>();

        // 8) watermarks advance only for sources whose results were kept
        for (source_id, topic, started) in fetched_ok {
            if self.is_cancelled(&topic) {
                continue;
            }
            self.watermarks.record_fetch_success(&source_id, started);
            if self.degraded.remove(&source_id) {
                info!(target: "orchestrator", source = %source_id, "source recovered");
            }
        }

        // 9) trends
        let now = Utc::now();
        self.trends.expire(now);
        for w in &cfg.trend.windows {
            if let Err(e) = self.trends.analyze_at(&w.name, now) {
                warn!(target: "trend", window = %w.name, error = %e, "trend analysis failed");
            }
        }

        self.finish_cycle(summary)
    }

    /// Dedup against this cycle and the store, score, persist, emit a signal.
    async fn store_record(
        &mut self,
        record: ContentRecord,
        ctx: &CycleContext,
        seen: &mut HashSet<String>,
    ) -> StoreOutcome {
        if seen.contains(&record.id) {
            counter!("ingest_duplicates_total").increment(1);
            return StoreOutcome::Duplicate;
        }
        match self.store.exists(&record.id).await {
            Ok(true) => {
                seen.insert(record.id.clone());
                counter!("ingest_duplicates_total").increment(1);
                return StoreOutcome::Duplicate;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(target: "orchestrator", error = %e, "store lookup failed, requeueing record");
                seen.insert(record.id.clone());
                self.push_requeue(record);
                return StoreOutcome::Requeued;
            }
        }

        let priority = ctx
            .prioritizer
            .score(&record, &ctx.prefs, &ctx.authorities, &ctx.strategy);
        if !priority.fallbacks.is_empty() {
            debug!(
                target: "prioritizer",
                record = %record.id,
                fallbacks = ?priority.fallbacks,
                "scored with default weights"
            );
        }

        match self.store.put(&record, &priority).await {
            Ok(true) => {
                seen.insert(record.id.clone());
                self.trends.add_signal(&record, priority.total_score);
                StoreOutcome::Stored
            }
            Ok(false) => {
                seen.insert(record.id.clone());
                counter!("ingest_duplicates_total").increment(1);
                StoreOutcome::Duplicate
            }
            Err(e) => {
                warn!(target: "orchestrator", record = %record.id, error = %e, "store write failed, requeueing record");
                // later copies in this cycle count as duplicates of the pending one
                seen.insert(record.id.clone());
                self.push_requeue(record);
                StoreOutcome::Requeued
            }
        }
    }

    fn push_requeue(&mut self, record: ContentRecord) {
        counter!("storage_requeued_total").increment(1);
        self.requeue.push_back(record);
        while self.requeue.len() > MAX_REQUEUE {
            if let Some(dropped) = self.requeue.pop_front() {
                warn!(target: "orchestrator", record = %dropped.id, "requeue full, dropping oldest record");
            }
        }
    }

    fn finish_cycle(&mut self, mut summary: CycleSummary) -> CycleSummary {
        summary.finished_at = Utc::now();
        summary.requeue_pending = self.requeue.len();

        counter!("cycle_runs_total").increment(1);
        gauge!("cycle_last_run_ts").set(summary.finished_at.timestamp() as f64);
        info!(
            target: "orchestrator",
            cycle = summary.cycle,
            sources = summary.sources.len(),
            stored = summary.stored,
            failed = summary.sources.values().filter(|s| s.failed).count(),
            requeued = summary.requeue_pending,
            degraded = self.degraded.len(),
            "cycle finished"
        );

        self.history.push(summary.clone());
        self.cancel.send_if_modified(|set| {
            let had = !set.is_empty();
            set.clear();
            had
        });
        self.publish_status();
        summary
    }

    fn publish_status(&self) {
        let cfg = self.config.current();
        let mut trends: BTreeMap<String, Vec<crate::trend::TrendRecord>> = BTreeMap::new();
        for w in &cfg.trend.windows {
            for t in self.trends.current(&w.name).unwrap_or_default() {
                trends.entry(t.topic.clone()).or_default().push(t);
            }
        }
        let snapshot = StatusSnapshot {
            cycles_run: self.cycles,
            allocations: self.allocator.allocations(),
            last_cycle: self.history.last().cloned(),
            trends,
            degraded_sources: self.degraded.clone(),
            watermarks: self.watermarks.stats(Utc::now()),
            requeue_pending: self.requeue.len(),
            cancelled_topics: self.cancel.borrow().clone(),
        };
        self.status_tx.send_replace(snapshot);
    }
}
