//! RangeResolver: turns a position or a chosen city into the ordered list of
//! nearby city ids, and keeps the selected city plus a short recent-cities
//! history persisted on device.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use localfeed_common::{City, FeedConfig, FeedError};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::index::GeoIndex;
use crate::traits::{AuthorizationState, PositionProvider, PositionUpdate, RangeStateStore};

/// Outcome of one resolution. `closest_city` is `None` when nothing in the
/// catalog is within range; callers show "no local content" in that case.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeResult {
    pub ordered_city_ids: Vec<String>,
    pub closest_city: Option<City>,
}

impl RangeResult {
    pub fn empty() -> Self {
        Self {
            ordered_city_ids: Vec::new(),
            closest_city: None,
        }
    }
}

/// The persisted part of range resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeState {
    pub selected_city_id: Option<String>,
    /// Most recent first, no duplicates, never contains the selected city.
    pub recent_city_ids: Vec<String>,
}

impl RangeState {
    /// Move the selection to `new_selected`. A previous selection that differs
    /// and is not already remembered is pushed to the front of the recent list;
    /// the list is then capped at `max`.
    pub fn select(&mut self, new_selected: Option<&str>, max: usize) {
        if let Some(prev) = self.selected_city_id.take() {
            if Some(prev.as_str()) != new_selected && !self.recent_city_ids.contains(&prev) {
                self.recent_city_ids.insert(0, prev);
            }
        }
        if let Some(new) = new_selected {
            self.recent_city_ids.retain(|id| id != new);
        }
        self.recent_city_ids.truncate(max);
        self.selected_city_id = new_selected.map(str::to_string);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RangeEvent {
    Resolved {
        selected_city_id: Option<String>,
        nearby_count: usize,
    },
    RecentCitiesChanged(Vec<String>),
}

pub struct RangeResolver {
    index: Arc<GeoIndex>,
    store: Arc<dyn RangeStateStore>,
    state: Mutex<RangeState>,
    // Serializes resolve-and-persist so concurrent resolutions cannot lose
    // recent-list updates.
    writer: tokio::sync::Mutex<()>,
    radius_miles: f64,
    recent_max: usize,
    events: broadcast::Sender<RangeEvent>,
}

impl RangeResolver {
    pub fn new(index: Arc<GeoIndex>, store: Arc<dyn RangeStateStore>, config: &FeedConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            index,
            store,
            state: Mutex::new(RangeState::default()),
            writer: tokio::sync::Mutex::new(()),
            radius_miles: config.nearby_radius_miles,
            recent_max: config.recent_cities_max,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RangeEvent> {
        self.events.subscribe()
    }

    pub fn selected_city_id(&self) -> Option<String> {
        self.lock_state().selected_city_id.clone()
    }

    pub fn selected_city(&self) -> Option<City> {
        let id = self.selected_city_id()?;
        self.index.lookup(&id).cloned()
    }

    pub fn recent_city_ids(&self) -> Vec<String> {
        self.lock_state().recent_city_ids.clone()
    }

    /// Reload persisted state. Ids no longer in the catalog are dropped.
    pub async fn restore(&self) -> Result<RangeState, FeedError> {
        let _guard = self.writer.lock().await;
        let mut loaded = self.store.load().await?.unwrap_or_default();

        if let Some(id) = &loaded.selected_city_id {
            if self.index.lookup(id).is_none() {
                debug!(city = id.as_str(), "Dropping stale selected city");
                loaded.selected_city_id = None;
            }
        }
        let mut seen = HashSet::new();
        loaded
            .recent_city_ids
            .retain(|id| self.index.lookup(id).is_some() && seen.insert(id.clone()));
        if let Some(selected) = loaded.selected_city_id.clone() {
            loaded.recent_city_ids.retain(|id| *id != selected);
        }
        loaded.recent_city_ids.truncate(self.recent_max);

        *self.lock_state() = loaded.clone();
        Ok(loaded)
    }

    /// Resolve from a position fix. The closest city becomes the selection.
    pub async fn resolve_for_position(&self, lat: f64, lng: f64) -> Result<RangeResult, FeedError> {
        let hits = self.index.nearby_with_distance(lat, lng, self.radius_miles);
        let result = RangeResult {
            ordered_city_ids: hits.iter().map(|(c, _)| c.id.clone()).collect(),
            closest_city: hits.first().map(|(c, _)| (*c).clone()),
        };
        self.commit_selection(&result).await;
        Ok(result)
    }

    /// Resolve around a city the user picked. The picked city is the
    /// selection and leads the list even if the catalog has another city at
    /// the same coordinates.
    pub async fn resolve_for_chosen_city(&self, city: &City) -> Result<RangeResult, FeedError> {
        let mut ordered: Vec<String> = self
            .index
            .nearby(city.latitude, city.longitude, self.radius_miles)
            .into_iter()
            .filter(|id| *id != city.id)
            .collect();
        ordered.insert(0, city.id.clone());

        let result = RangeResult {
            ordered_city_ids: ordered,
            closest_city: Some(city.clone()),
        };
        self.commit_selection(&result).await;
        Ok(result)
    }

    /// Like `resolve_for_chosen_city`, by catalog id. An unknown id yields an
    /// empty result and leaves the selection untouched.
    pub async fn resolve_for_city_id(&self, city_id: &str) -> Result<RangeResult, FeedError> {
        match self.index.lookup(city_id).cloned() {
            Some(city) => self.resolve_for_chosen_city(&city).await,
            None => {
                debug!(city = city_id, "Chosen city not in catalog");
                Ok(RangeResult::empty())
            }
        }
    }

    /// Take the first fix from `provider`, stop it, and resolve that fix.
    pub async fn resolve_current_position(
        &self,
        provider: &dyn PositionProvider,
    ) -> Result<RangeResult, FeedError> {
        let mut updates = provider.start().await?;

        let fix = loop {
            match updates.recv().await {
                Some(PositionUpdate::Fix { latitude, longitude }) => break Ok((latitude, longitude)),
                Some(PositionUpdate::Authorization(
                    AuthorizationState::Denied | AuthorizationState::Restricted,
                )) => break Err(FeedError::LocationDenied),
                Some(PositionUpdate::Authorization(state)) => {
                    debug!(?state, "Location authorization changed");
                }
                None => {
                    break Err(FeedError::LocationUnavailable(
                        "provider stopped before a fix".into(),
                    ))
                }
            }
        };
        provider.stop().await;

        let (lat, lng) = fix?;
        self.resolve_for_position(lat, lng).await
    }

    async fn commit_selection(&self, result: &RangeResult) {
        let _guard = self.writer.lock().await;

        let (snapshot, recent_changed) = {
            let mut state = self.lock_state();
            let before = state.recent_city_ids.clone();
            state.select(result.closest_city.as_ref().map(|c| c.id.as_str()), self.recent_max);
            (state.clone(), before != state.recent_city_ids)
        };

        info!(
            selected = snapshot.selected_city_id.as_deref().unwrap_or("<none>"),
            nearby = result.ordered_city_ids.len(),
            "Range resolved"
        );

        if let Err(e) = self.store.save(&snapshot).await {
            warn!(error = %e, "Failed to persist range state, continuing");
        }

        let _ = self.events.send(RangeEvent::Resolved {
            selected_city_id: snapshot.selected_city_id.clone(),
            nearby_count: result.ordered_city_ids.len(),
        });
        if recent_changed {
            let _ = self.events.send(RangeEvent::RecentCitiesChanged(snapshot.recent_city_ids));
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, RangeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
