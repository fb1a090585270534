// Test helpers for geo code.
//
// - city / scenario_catalog build small catalogs
// - ScriptedPositionProvider (PositionProvider) replays a fixed update list

use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::{bail, Result};
use async_trait::async_trait;
use localfeed_common::City;
use tokio::sync::mpsc;

use crate::index::GeoIndex;
use crate::traits::{PositionProvider, PositionUpdate};

/// Springfield, IL coordinates.
pub const SPRINGFIELD: (f64, f64) = (39.7817, -89.6501);
/// Chatham, IL, about 9 miles south of Springfield.
pub const CHATHAM: (f64, f64) = (39.6761, -89.7043);
/// Peoria, IL, about 60 miles north of Springfield.
pub const PEORIA: (f64, f64) = (40.6936, -89.5890);

pub fn city(id: &str, lat: f64, lng: f64) -> City {
    City {
        id: id.to_string(),
        display_name: id.replace('-', " "),
        region_code: "ZZ".to_string(),
        latitude: lat,
        longitude: lng,
    }
}

/// CityA (0,0), CityB (0,0.01) about 1.1km away, CityC (1,1) about 157km away.
pub fn scenario_catalog() -> GeoIndex {
    GeoIndex::new(vec![
        city("city-c", 1.0, 1.0),
        city("city-b", 0.0, 0.01),
        city("city-a", 0.0, 0.0),
    ])
}

pub fn illinois_catalog() -> GeoIndex {
    GeoIndex::new(vec![
        city("springfield", SPRINGFIELD.0, SPRINGFIELD.1),
        city("chatham", CHATHAM.0, CHATHAM.1),
        city("peoria", PEORIA.0, PEORIA.1),
    ])
}

/// Replays `updates` on each `start`, then closes the channel.
pub struct ScriptedPositionProvider {
    updates: Vec<PositionUpdate>,
    fail_start: bool,
    starts: AtomicU32,
    stops: AtomicU32,
}

impl ScriptedPositionProvider {
    pub fn new(updates: Vec<PositionUpdate>) -> Self {
        Self {
            updates,
            fail_start: false,
            starts: AtomicU32::new(0),
            stops: AtomicU32::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_start: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PositionProvider for ScriptedPositionProvider {
    async fn start(&self) -> Result<mpsc::Receiver<PositionUpdate>> {
        if self.fail_start {
            bail!("ScriptedPositionProvider: location services off");
        }
        self.starts.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(self.updates.len().max(1));
        for update in &self.updates {
            tx.send(*update).await?;
        }
        Ok(rx)
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}
