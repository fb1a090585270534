// Boundaries of range resolution.
//
// RangeStateStore persists the selected city and recent-cities list on device.
// PositionProvider wraps the platform location service.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::range::RangeState;

// ---------------------------------------------------------------------------
// RangeStateStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait RangeStateStore: Send + Sync {
    /// The last persisted state, or `None` on first launch.
    async fn load(&self) -> Result<Option<RangeState>>;

    async fn save(&self, state: &RangeState) -> Result<()>;
}

// ---------------------------------------------------------------------------
// PositionProvider
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationState {
    NotDetermined,
    Granted,
    Denied,
    Restricted,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionUpdate {
    Fix { latitude: f64, longitude: f64 },
    Authorization(AuthorizationState),
}

#[async_trait]
pub trait PositionProvider: Send + Sync {
    /// Begin listening. Updates arrive on the returned channel until `stop`
    /// is called or the provider gives up.
    async fn start(&self) -> Result<mpsc::Receiver<PositionUpdate>>;

    async fn stop(&self);
}
