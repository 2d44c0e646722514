//! topic-radar service entrypoint.
//! Loads configuration, starts the orchestrator and its scheduler, and
//! serves the control API plus `/metrics`.

use std::sync::Arc;

use anyhow::Context;
use shuttle_axum::ShuttleAxum;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use topic_radar::api::{router, AppState};
use topic_radar::config::{AppConfig, ConfigHandle};
use topic_radar::ingest::fixture::FixtureAdapter;
use topic_radar::ingest::store::MemoryStore;
use topic_radar::ingest::types::SourceType;
use topic_radar::metrics::Metrics;
use topic_radar::orchestrate::scheduler::spawn_scheduler;
use topic_radar::orchestrate::workers::AdapterRegistry;
use topic_radar::orchestrate::Orchestrator;

/// Compact logs by default; `RADAR_LOG_JSON=1` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("orchestrator=info,allocator=info,workers=warn,gate=info,ingest=info,warn")
    });
    let json = std::env::var("RADAR_LOG_JSON")
        .ok()
        .is_some_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    // another subscriber may already be installed by the runtime
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let metrics = Metrics::init().context("installing prometheus recorder")?;

    let (cfg, path) = AppConfig::from_env()?;
    let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
    info!(
        target: "orchestrator",
        path = %path.display(),
        topics = cfg.topics.len(),
        budget = cfg.allocator.budget,
        "configuration loaded"
    );
    let config = Arc::new(ConfigHandle::watching(path, cfg, modified));

    // Real adapters plug in here; fixtures serve every type until then.
    let fixtures = Arc::new(FixtureAdapter::from_env());
    let mut registry = AdapterRegistry::new();
    for source_type in SourceType::ALL {
        registry.register(source_type, fixtures.clone());
    }

    let store = Arc::new(MemoryStore::new());
    let (handle, _join) = Orchestrator::spawn(config.clone(), registry, store)
        .context("starting orchestrator")?;
    spawn_scheduler(handle.clone(), config.clone());

    let app = router(AppState {
        orchestrator: handle,
        config,
    })
    .merge(metrics.router());

    Ok(app.into())
}
