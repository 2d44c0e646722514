// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod error;
pub mod gate;
pub mod ingest;
pub mod metrics;
pub mod orchestrate;
pub mod prioritizer;
pub mod source_weights;
pub mod trend;

pub use crate::api::{router, AppState};
pub use crate::config::{AppConfig, ConfigHandle};
pub use crate::orchestrate::{Orchestrator, OrchestratorHandle};
