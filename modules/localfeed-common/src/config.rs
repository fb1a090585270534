use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::info;

use crate::error::FeedError;

/// Operational constants for range resolution, batching, ranking and comments.
///
/// `Default` carries the values observed in production; `from_env` lets each
/// of them be overridden with a `LOCALFEED_*` variable.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedConfig {
    // Geo
    pub nearby_radius_miles: f64,
    pub recent_cities_max: usize,

    // Batching
    pub membership_batch_size: usize,
    pub chunk_concurrency: usize,

    // Feeds and leaderboards
    pub feed_page_size: usize,
    pub top_all_time_overfetch: usize,
    pub top_weekly_overfetch: usize,
    pub leaderboard_size: usize,

    // Comments
    pub comment_page_size: usize,
    pub comment_max_depth: usize,

    // Search
    pub search_debounce: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            nearby_radius_miles: 30.0,
            recent_cities_max: 3,
            membership_batch_size: 10,
            chunk_concurrency: 4,
            feed_page_size: 20,
            top_all_time_overfetch: 20,
            top_weekly_overfetch: 5,
            leaderboard_size: 5,
            comment_page_size: 20,
            comment_max_depth: 10,
            search_debounce: Duration::from_millis(300),
        }
    }
}

impl FeedConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, FeedError> {
        let d = Self::default();
        let config = Self {
            nearby_radius_miles: env_or("LOCALFEED_NEARBY_RADIUS_MILES", d.nearby_radius_miles)?,
            recent_cities_max: env_or("LOCALFEED_RECENT_CITIES_MAX", d.recent_cities_max)?,
            membership_batch_size: env_or("LOCALFEED_MEMBERSHIP_BATCH_SIZE", d.membership_batch_size)?,
            chunk_concurrency: env_or("LOCALFEED_CHUNK_CONCURRENCY", d.chunk_concurrency)?,
            feed_page_size: env_or("LOCALFEED_FEED_PAGE_SIZE", d.feed_page_size)?,
            top_all_time_overfetch: env_or("LOCALFEED_TOP_ALL_TIME_OVERFETCH", d.top_all_time_overfetch)?,
            top_weekly_overfetch: env_or("LOCALFEED_TOP_WEEKLY_OVERFETCH", d.top_weekly_overfetch)?,
            leaderboard_size: env_or("LOCALFEED_LEADERBOARD_SIZE", d.leaderboard_size)?,
            comment_page_size: env_or("LOCALFEED_COMMENT_PAGE_SIZE", d.comment_page_size)?,
            comment_max_depth: env_or("LOCALFEED_COMMENT_MAX_DEPTH", d.comment_max_depth)?,
            search_debounce: Duration::from_millis(env_or(
                "LOCALFEED_SEARCH_DEBOUNCE_MS",
                d.search_debounce.as_millis() as u64,
            )?),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), FeedError> {
        if !(self.nearby_radius_miles.is_finite() && self.nearby_radius_miles > 0.0) {
            return Err(FeedError::Config(format!(
                "nearby radius must be a positive number of miles, got {}",
                self.nearby_radius_miles
            )));
        }
        if self.membership_batch_size == 0 {
            return Err(FeedError::Config("membership batch size must be at least 1".into()));
        }
        if self.chunk_concurrency == 0 {
            return Err(FeedError::Config("chunk concurrency must be at least 1".into()));
        }
        if self.leaderboard_size > self.top_weekly_overfetch.max(self.top_all_time_overfetch) {
            return Err(FeedError::Config(format!(
                "leaderboard size {} exceeds every over-fetch limit",
                self.leaderboard_size
            )));
        }
        Ok(())
    }

    /// Log the effective values once at startup.
    pub fn log_summary(&self) {
        info!(
            radius_miles = self.nearby_radius_miles,
            batch_size = self.membership_batch_size,
            feed_page_size = self.feed_page_size,
            leaderboard_size = self.leaderboard_size,
            comment_max_depth = self.comment_max_depth,
            debounce_ms = self.search_debounce.as_millis() as u64,
            "Feed configuration loaded"
        );
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, FeedError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| FeedError::Config(format!("{key} must be a number, got {raw:?}"))),
        Err(_) => Ok(default),
    }
}
