//! Development adapter: serves `RawRecord` arrays from `<dir>/<source_id>.json`.
//!
//! Real feed/API adapters live outside this crate; this one lets the binary
//! run a full cycle locally.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::SourceFetchError;
use crate::ingest::types::{RawRecord, SourceAdapter, SourceDescriptor};

pub const DEFAULT_FIXTURE_DIR: &str = "fixtures";
pub const ENV_FIXTURE_DIR: &str = "RADAR_FIXTURE_DIR";

#[derive(Debug, Clone)]
pub struct FixtureAdapter {
    dir: PathBuf,
}

impl FixtureAdapter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_env() -> Self {
        let dir = std::env::var(ENV_FIXTURE_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_FIXTURE_DIR));
        Self::new(dir)
    }
}

#[async_trait]
impl SourceAdapter for FixtureAdapter {
    async fn fetch(&self, source: &SourceDescriptor) -> Result<Vec<RawRecord>, SourceFetchError> {
        let path = self.dir.join(format!("{}.json", source.id));
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SourceFetchError::Network(format!("{}: {e}", path.display()))),
        };
        serde_json::from_slice::<Vec<RawRecord>>(&bytes)
            .map_err(|e| SourceFetchError::Malformed(format!("{}: {e}", path.display())))
    }

    fn name(&self) -> &'static str {
        "fixture"
    }
}
