//! Fixed-cadence trigger for the orchestrator.
//!
//! The cadence is re-read from the configuration after every cycle, so a
//! hot-reloaded `cycle_secs` takes effect on the next sleep.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::ConfigHandle;
use crate::orchestrate::OrchestratorHandle;

/// Runs a cycle immediately, then once per `cycle_secs`, until the
/// orchestrator goes away.
pub fn spawn_scheduler(handle: OrchestratorHandle, config: Arc<ConfigHandle>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match handle.run_once().await {
                Ok(summary) => debug!(
                    target: "orchestrator",
                    cycle = summary.cycle,
                    stored = summary.stored,
                    "scheduled cycle done"
                ),
                Err(_) => {
                    info!(target: "orchestrator", "orchestrator closed, scheduler stopping");
                    break;
                }
            }
            let secs = config.current().cycle_secs.max(1);
            tokio::time::sleep(Duration::from_secs(secs)).await;
        }
    })
}
