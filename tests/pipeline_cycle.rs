// tests/pipeline_cycle.rs
//
// Full monitoring cycles through `OrchestratorHandle::run_once` with a
// scripted adapter and in-memory stores.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};

use topic_radar::config::{AppConfig, ConfigHandle};
use topic_radar::error::{OrchestratorClosed, SourceFetchError};
use topic_radar::gate::relevance::DenyCfg;
use topic_radar::ingest::store::{MemoryStore, RecordFilter, RecordStore};
use topic_radar::ingest::types::RawRecord;
use topic_radar::orchestrate::allocator::TopicState;
use topic_radar::orchestrate::scheduler::spawn_scheduler;
use topic_radar::orchestrate::Orchestrator;

use common::{raw, raw_published, registry_for_all, FlakyStore, ScriptedAdapter};

fn script_defaults(adapter: &ScriptedAdapter) {
    adapter.set(
        "rust-blog",
        Ok(vec![
            raw("Tokio 1.40 released", "https://blog.test/tokio-1-40"),
            // same url, same record id
            raw("Tokio 1.40 released (updated)", "https://blog.test/tokio-1-40"),
        ]),
    );
    adapter.set(
        "rust-forum",
        Ok(vec![raw(
            "How do you structure a large async workspace?",
            "https://forum.test/t/1",
        )]),
    );
    adapter.set(
        "wasm-search",
        Ok(vec![raw("WASI preview 3 is out", "https://search.test/wasi")]),
    );
}

#[tokio::test]
async fn cycle_stores_records_and_dedups_within_and_across_cycles() {
    let adapter = ScriptedAdapter::new();
    script_defaults(&adapter);
    let store = Arc::new(MemoryStore::new());
    let (handle, _join) =
        Orchestrator::spawn(common::pipeline_config(), registry_for_all(adapter.clone()), store.clone())
            .unwrap();

    let first = handle.run_once().await.unwrap();
    assert_eq!(first.cycle, 1);
    assert!(first.error.is_none());
    assert_eq!(first.stored, 3);
    let blog = &first.sources["rust-blog"];
    assert_eq!(blog.fetched, 2);
    assert_eq!(blog.stored, 1);
    assert_eq!(blog.duplicates, 1);
    assert_eq!(first.topics["rust"].polled, 2);
    assert_eq!(first.topics["wasm"].polled, 1);
    assert_eq!(store.len(), 3);

    // undated records pass the watermark and are caught by the store
    let second = handle.run_once().await.unwrap();
    assert_eq!(second.stored, 0);
    assert_eq!(second.sources["rust-blog"].duplicates, 2);
    assert_eq!(second.sources["wasm-search"].duplicates, 1);
    assert_eq!(store.len(), 3);

    let status = handle.status();
    assert_eq!(status.cycles_run, 2);
    assert_eq!(status.last_cycle.as_ref().map(|c| c.cycle), Some(2));
    assert_eq!(status.watermarks.ever_fetched, 3);
    assert_eq!(status.allocations.len(), 2);
    assert!(status
        .allocations
        .iter()
        .all(|a| a.state == TopicState::Monitoring));

    let rust_rows = store
        .query(
            &RecordFilter {
                topic: Some("rust".into()),
                ..Default::default()
            },
            10,
            0,
        )
        .await
        .unwrap();
    assert_eq!(rust_rows.len(), 2);
}

#[tokio::test]
async fn records_older_than_the_watermark_are_skipped_next_cycle() {
    let adapter = ScriptedAdapter::new();
    let published = Utc::now() - Duration::hours(2);
    adapter.set(
        "rust-blog",
        Ok(vec![raw_published(
            "Async closures are stable",
            "https://blog.test/async-closures",
            published,
        )]),
    );
    let store = Arc::new(MemoryStore::new());
    let (handle, _join) =
        Orchestrator::spawn(common::pipeline_config(), registry_for_all(adapter.clone()), store.clone())
            .unwrap();

    let first = handle.run_once().await.unwrap();
    assert_eq!(first.sources["rust-blog"].accepted, 1);

    adapter.set(
        "rust-blog",
        Ok(vec![
            raw_published(
                "Async closures are stable",
                "https://blog.test/async-closures",
                published,
            ),
            raw_published(
                "The next edition is planned for the autumn",
                "https://blog.test/edition",
                Utc::now() + Duration::minutes(1),
            ),
        ]),
    );
    let second = handle.run_once().await.unwrap();
    let blog = &second.sources["rust-blog"];
    assert_eq!(blog.stale, 1);
    assert_eq!(blog.accepted, 1);
    assert_eq!(blog.stored, 1);
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn failing_source_degrades_without_blocking_others() {
    let adapter = ScriptedAdapter::new();
    script_defaults(&adapter);
    adapter.set("rust-forum", Err(SourceFetchError::Auth("token expired".into())));
    adapter.set(
        "wasm-search",
        Err(SourceFetchError::Network("connection reset".into())),
    );
    let store = Arc::new(MemoryStore::new());
    let (handle, _join) =
        Orchestrator::spawn(common::pipeline_config(), registry_for_all(adapter.clone()), store.clone())
            .unwrap();

    let summary = handle.run_once().await.unwrap();
    let forum = &summary.sources["rust-forum"];
    assert!(forum.failed);
    assert_eq!(forum.attempts, 1, "auth errors are not retried");
    let search = &summary.sources["wasm-search"];
    assert!(search.failed);
    assert_eq!(search.attempts, 2, "network errors use every attempt");
    assert_eq!(summary.failures_by_type.get("forum"), Some(&1));
    assert_eq!(summary.failures_by_type.get("search"), Some(&1));
    assert_eq!(summary.topics["rust"].failed, 1);
    assert_eq!(summary.topics["rust"].succeeded, 1);
    assert_eq!(summary.stored, 1);

    let status = handle.status();
    assert!(status.degraded_sources.contains("rust-forum"));
    assert!(status.degraded_sources.contains("wasm-search"));
    // failed fetches do not move the watermark
    assert_eq!(status.watermarks.ever_fetched, 1);

    script_defaults(&adapter);
    handle.run_once().await.unwrap();
    assert!(handle.status().degraded_sources.is_empty());
}

#[tokio::test]
async fn storage_failures_requeue_and_retry_next_cycle() {
    let adapter = ScriptedAdapter::new();
    script_defaults(&adapter);
    let store = FlakyStore::new(true);
    let (handle, _join) =
        Orchestrator::spawn(common::pipeline_config(), registry_for_all(adapter.clone()), store.clone())
            .unwrap();

    let first = handle.run_once().await.unwrap();
    assert_eq!(first.stored, 0);
    assert_eq!(first.requeue_pending, 3);
    assert_eq!(first.sources["rust-blog"].requeued, 1);
    assert_eq!(handle.status().requeue_pending, 3);
    assert!(store.inner.is_empty());

    store.set_failing(false);
    let second = handle.run_once().await.unwrap();
    assert_eq!(second.stored, 3, "requeued records land first");
    assert_eq!(second.requeue_pending, 0);
    assert_eq!(second.sources["rust-blog"].duplicates, 2);
    assert_eq!(store.inner.len(), 3);
}

#[tokio::test]
async fn cancelled_topic_is_skipped_for_one_cycle() {
    let adapter = ScriptedAdapter::new();
    script_defaults(&adapter);
    let store = Arc::new(MemoryStore::new());
    let (handle, _join) =
        Orchestrator::spawn(common::pipeline_config(), registry_for_all(adapter.clone()), store.clone())
            .unwrap();

    assert!(handle.cancel_topic(" Rust "));
    assert!(!handle.cancel_topic("rust"), "already cancelled");
    assert!(handle.status().cancelled_topics.contains("rust"));

    let summary = handle.run_once().await.unwrap();
    assert!(summary.topics["rust"].cancelled);
    assert_eq!(summary.topics["rust"].polled, 0);
    assert_eq!(summary.topics["rust"].skipped, 2);
    assert!(!summary.sources.contains_key("rust-blog"));
    assert_eq!(summary.stored, 1);

    let status = handle.status();
    assert!(status.cancelled_topics.is_empty());
    assert_eq!(status.watermarks.ever_fetched, 1);

    let next = handle.run_once().await.unwrap();
    assert!(!next.topics["rust"].cancelled);
    assert_eq!(next.sources["rust-blog"].stored, 1);
}

#[tokio::test]
async fn cancellation_ignores_case_of_configured_topic_names() {
    let adapter = ScriptedAdapter::new();
    script_defaults(&adapter);
    let mut cfg = AppConfig::from_toml_str(common::PIPELINE_TOML).unwrap();
    for t in &mut cfg.topics {
        if t.name == "rust" {
            t.name = "Rust".into();
        }
    }
    let (handle, _join) = Orchestrator::spawn(
        Arc::new(ConfigHandle::fixed(cfg)),
        registry_for_all(adapter.clone()),
        Arc::new(MemoryStore::new()),
    )
    .unwrap();

    assert!(handle.cancel_topic("rust"));
    let summary = handle.run_once().await.unwrap();
    assert!(summary.topics["Rust"].cancelled);
    assert_eq!(summary.topics["Rust"].polled, 0);
    assert!(!summary.sources.contains_key("rust-blog"));
}

#[tokio::test]
async fn parse_errors_and_gate_rejections_drop_single_records() {
    let adapter = ScriptedAdapter::new();
    adapter.set(
        "rust-blog",
        Ok(vec![
            RawRecord {
                url: Some("https://blog.test/untitled".into()),
                ..Default::default()
            },
            RawRecord {
                title: Some("Die neue Version ist da".into()),
                body: Some(
                    "Die Entwickler haben die Version mit vielen Verbesserungen für den Compiler und die Werkzeuge veröffentlicht."
                        .into(),
                ),
                url: Some("https://blog.test/de".into()),
                ..Default::default()
            },
            raw("Cargo gets a new lockfile format", "https://blog.test/lockfile"),
        ]),
    );
    let store = Arc::new(MemoryStore::new());
    let (handle, _join) =
        Orchestrator::spawn(common::pipeline_config(), registry_for_all(adapter.clone()), store.clone())
            .unwrap();

    let summary = handle.run_once().await.unwrap();
    let blog = &summary.sources["rust-blog"];
    assert_eq!(blog.fetched, 3);
    assert_eq!(blog.parse_errors, 1);
    assert_eq!(blog.rejected, 1);
    assert_eq!(blog.stored, 1);
    assert!(!blog.failed);
}

#[tokio::test]
async fn fresh_sources_are_not_polled_again() {
    let mut cfg = AppConfig::from_toml_str(common::PIPELINE_TOML).unwrap();
    cfg.watermark.max_staleness_secs = 3600;
    let adapter = ScriptedAdapter::new();
    script_defaults(&adapter);
    let (handle, _join) = Orchestrator::spawn(
        Arc::new(ConfigHandle::fixed(cfg)),
        registry_for_all(adapter.clone()),
        Arc::new(MemoryStore::new()),
    )
    .unwrap();

    handle.run_once().await.unwrap();
    assert_eq!(adapter.calls(), 3);

    let second = handle.run_once().await.unwrap();
    assert_eq!(adapter.calls(), 3);
    assert_eq!(second.topics["rust"].polled, 0);
    assert_eq!(second.topics["rust"].skipped, 2);
    assert!(second.sources.is_empty());
}

#[tokio::test]
async fn unusable_config_skips_the_cycle_with_an_error() {
    let config = common::pipeline_config();
    let adapter = ScriptedAdapter::new();
    script_defaults(&adapter);
    let (handle, _join) = Orchestrator::spawn(
        config.clone(),
        registry_for_all(adapter.clone()),
        Arc::new(MemoryStore::new()),
    )
    .unwrap();

    let mut broken = (*config.current()).clone();
    broken.gate.relevance.deny.push(DenyCfg {
        id: "broken".into(),
        pattern: "(unclosed".into(),
        reason: "x".into(),
        near: None,
        unless_near: None,
    });
    config.replace(broken);

    let summary = handle.run_once().await.unwrap();
    assert!(summary.error.as_deref().unwrap_or("").contains("broken"));
    assert!(summary.sources.is_empty());
    assert_eq!(adapter.calls(), 0);
}

#[tokio::test]
async fn out_of_range_spans_skip_the_cycle_and_keep_the_actor_alive() {
    let config = common::pipeline_config();
    let adapter = ScriptedAdapter::new();
    script_defaults(&adapter);
    let (handle, _join) = Orchestrator::spawn(
        config.clone(),
        registry_for_all(adapter.clone()),
        Arc::new(MemoryStore::new()),
    )
    .unwrap();
    let good = (*config.current()).clone();

    let mut huge_window = good.clone();
    huge_window.trend.windows[2].span_secs = 10_000_000_000_000;
    config.replace(huge_window);
    let summary = handle.run_once().await.unwrap();
    assert!(summary.error.as_deref().unwrap_or("").contains("span"));
    assert_eq!(adapter.calls(), 0);

    let mut huge_tolerance = good.clone();
    huge_tolerance.watermark.tolerance_secs = i64::MAX;
    config.replace(huge_tolerance);
    let summary = handle.run_once().await.unwrap();
    assert!(summary.error.as_deref().unwrap_or("").contains("watermark"));

    config.replace(good);
    let summary = handle.run_once().await.unwrap();
    assert!(summary.error.is_none());
    assert!(summary.stored > 0);
}

#[tokio::test]
async fn run_once_after_shutdown_reports_closed() {
    let (handle, join) = Orchestrator::spawn(
        common::pipeline_config(),
        registry_for_all(ScriptedAdapter::new()),
        Arc::new(MemoryStore::new()),
    )
    .unwrap();
    handle.shutdown().await.unwrap();
    join.await.unwrap();
    assert_eq!(handle.run_once().await.unwrap_err(), OrchestratorClosed);
}

#[tokio::test(start_paused = true)]
async fn scheduler_runs_immediately_and_stops_with_the_orchestrator() {
    let config = common::pipeline_config();
    let adapter = ScriptedAdapter::new();
    script_defaults(&adapter);
    let (handle, _join) = Orchestrator::spawn(
        config.clone(),
        registry_for_all(adapter.clone()),
        Arc::new(MemoryStore::new()),
    )
    .unwrap();
    let mut status = handle.subscribe();
    let scheduler = spawn_scheduler(handle.clone(), config);

    while status.borrow_and_update().cycles_run == 0 {
        status.changed().await.unwrap();
    }
    assert_eq!(adapter.calls(), 3);

    handle.shutdown().await.unwrap();
    // the paused clock skips the cadence sleep; the next trigger sees a closed actor
    scheduler.await.unwrap();
}
