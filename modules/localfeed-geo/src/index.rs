//! GeoIndex: static in-memory city catalog with proximity search.
//!
//! Read-only after construction, so it is shared as `Arc<GeoIndex>` and read
//! without synchronization. `nearby` is a linear scan over the catalog.

use std::collections::HashMap;
use std::path::Path;

use localfeed_common::{City, FeedError};
use tracing::{info, warn};

use crate::distance::haversine_distance_miles;

#[derive(Debug, Clone, Default)]
pub struct GeoIndex {
    cities: Vec<City>,
    by_id: HashMap<String, usize>,
}

impl GeoIndex {
    /// Build an index from catalog entries. Duplicate ids keep the first
    /// entry; entries with non-finite or out-of-range coordinates are dropped.
    pub fn new(entries: Vec<City>) -> Self {
        let mut cities = Vec::with_capacity(entries.len());
        let mut by_id = HashMap::with_capacity(entries.len());

        for city in entries {
            if !valid_coords(city.latitude, city.longitude) {
                warn!(id = city.id.as_str(), "Dropping catalog city with invalid coordinates");
                continue;
            }
            if by_id.contains_key(&city.id) {
                warn!(id = city.id.as_str(), "Dropping duplicate catalog city");
                continue;
            }
            by_id.insert(city.id.clone(), cities.len());
            cities.push(city);
        }

        Self { cities, by_id }
    }

    /// Parse a JSON array of cities.
    pub fn from_json(json: &str) -> Result<Self, FeedError> {
        let entries: Vec<City> = serde_json::from_str(json)
            .map_err(|e| FeedError::CatalogUnavailable(format!("malformed catalog: {e}")))?;
        if entries.is_empty() {
            return Err(FeedError::CatalogUnavailable("catalog is empty".into()));
        }
        Ok(Self::new(entries))
    }

    /// Load the catalog file. Any failure is reported as
    /// `FeedError::CatalogUnavailable` so geo features can be disabled
    /// without taking the process down.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, FeedError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            FeedError::CatalogUnavailable(format!("cannot read {}: {e}", path.display()))
        })?;
        let index = Self::from_json(&raw)?;
        info!(path = %path.display(), cities = index.len(), "City catalog loaded");
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.cities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cities.is_empty()
    }

    pub fn cities(&self) -> &[City] {
        &self.cities
    }

    pub fn lookup(&self, id: &str) -> Option<&City> {
        self.by_id.get(id).map(|&i| &self.cities[i])
    }

    /// Resolve a set of ids. Unknown ids are skipped; each city appears once.
    pub fn lookup_many<'a, I>(&self, ids: I) -> Vec<&City>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut seen = vec![false; self.cities.len()];
        let mut out = Vec::new();
        for id in ids {
            if let Some(&i) = self.by_id.get(id) {
                if !seen[i] {
                    seen[i] = true;
                    out.push(&self.cities[i]);
                }
            }
        }
        out
    }

    /// Catalog cities within `radius_miles` of the point with their distance,
    /// nearest first. Ties keep catalog order.
    pub fn nearby_with_distance(&self, lat: f64, lng: f64, radius_miles: f64) -> Vec<(&City, f64)> {
        if !valid_coords(lat, lng) || !(radius_miles >= 0.0) {
            return Vec::new();
        }

        let mut hits: Vec<(&City, f64)> = self
            .cities
            .iter()
            .map(|c| (c, haversine_distance_miles(lat, lng, c.latitude, c.longitude)))
            .filter(|(_, d)| *d <= radius_miles)
            .collect();

        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        hits
    }

    /// City ids within `radius_miles`, ordered by ascending distance.
    pub fn nearby(&self, lat: f64, lng: f64, radius_miles: f64) -> Vec<String> {
        self.nearby_with_distance(lat, lng, radius_miles)
            .into_iter()
            .map(|(c, _)| c.id.clone())
            .collect()
    }
}

fn valid_coords(lat: f64, lng: f64) -> bool {
    lat.is_finite() && lng.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng)
}
