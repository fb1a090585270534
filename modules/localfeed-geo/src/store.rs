use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::range::RangeState;
use crate::traits::RangeStateStore;

/// Keeps range state in memory only.
#[derive(Default)]
pub struct MemoryRangeStore {
    state: Mutex<Option<RangeState>>,
    saves: Mutex<u32>,
}

impl MemoryRangeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: RangeState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            saves: Mutex::new(0),
        }
    }

    pub fn snapshot(&self) -> Option<RangeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn save_count(&self) -> u32 {
        *self.saves.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RangeStateStore for MemoryRangeStore {
    async fn load(&self) -> Result<Option<RangeState>> {
        Ok(self.snapshot())
    }

    async fn save(&self, state: &RangeState) -> Result<()> {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = Some(state.clone());
        *self.saves.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }
}

/// Persists range state as a JSON file. Writes go to a sibling temp file
/// first and are renamed into place.
pub struct JsonFileRangeStore {
    path: PathBuf,
}

impl JsonFileRangeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RangeStateStore for JsonFileRangeStore {
    async fn load(&self) -> Result<Option<RangeState>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", self.path.display()))
            }
        };
        let state = serde_json::from_str(&raw)
            .with_context(|| format!("parsing {}", self.path.display()))?;
        Ok(Some(state))
    }

    async fn save(&self, state: &RangeState) -> Result<()> {
        let json = serde_json::to_vec_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("renaming into {}", self.path.display()))?;
        Ok(())
    }
}
