//! Debounced keyword search over the nearby corpus.
//!
//! The corpus is fetched once per session, on the first query. Each query
//! takes a generation number; a query whose number is no longer the latest
//! after its debounce wait (or after the corpus fetch) returns `None` and
//! its result is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use localfeed_common::{ContentItem, FeedError};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::aggregator::ContentAggregator;

pub struct SearchSession {
    aggregator: Arc<ContentAggregator>,
    city_ids: Vec<String>,
    corpus: OnceCell<Vec<ContentItem>>,
    generation: AtomicU64,
    debounce: Duration,
}

impl SearchSession {
    pub fn new(aggregator: Arc<ContentAggregator>, city_ids: Vec<String>, debounce: Duration) -> Self {
        Self {
            aggregator,
            city_ids,
            corpus: OnceCell::new(),
            generation: AtomicU64::new(0),
            debounce,
        }
    }

    /// Start a new query, superseding every earlier one.
    pub fn begin(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_current(&self, ticket: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == ticket
    }

    /// The full nearby corpus, fetched on first call. A failed fetch is not
    /// cached; the next call retries.
    pub async fn corpus(&self) -> Result<&[ContentItem], FeedError> {
        let corpus = self
            .corpus
            .get_or_try_init(|| self.aggregator.fetch_all_nearby(&self.city_ids))
            .await?;
        Ok(corpus)
    }

    /// Debounce, then filter the corpus by `query`. `Ok(None)` means a later
    /// query superseded this one.
    pub async fn search(&self, query: &str) -> Result<Option<Vec<ContentItem>>, FeedError> {
        let ticket = self.begin();
        tokio::time::sleep(self.debounce).await;
        if !self.is_current(ticket) {
            debug!(ticket, "Search superseded during debounce");
            return Ok(None);
        }

        let corpus = self.corpus().await?;
        if !self.is_current(ticket) {
            debug!(ticket, "Search superseded while loading corpus");
            return Ok(None);
        }

        let results = self.aggregator.search_by_keyword(query, corpus);
        debug!(ticket, matches = results.len(), corpus = corpus.len(), "Search complete");
        Ok(Some(results))
    }
}
