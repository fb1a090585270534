//! ContentAggregator: nearby feeds, keyword search and leaderboards built on
//! batched city-membership queries.
//!
//! Leaderboards over-fetch per chunk, merge keeping the larger counter, drop
//! non-positive counters, sort and truncate. Per-chunk top-N alone can miss
//! the global top-N when one item is reachable through several chunks with
//! different snapshots.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use localfeed_common::{
    iso_week, ContentItem, Event, FeedConfig, FeedError, Poll, PollOption, Post, TextSearchIndex,
    WeeklyStat,
};
use localfeed_geo::GeoIndex;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::batch::{BatchedQueryClient, Membership, MergeRule};
use crate::store::{collections, Direction, Document, DocumentStore, Query};

pub struct ContentAggregator {
    batch: BatchedQueryClient,
    store: Arc<dyn DocumentStore>,
    catalog: Arc<GeoIndex>,
    search_index: Arc<dyn TextSearchIndex>,
    config: FeedConfig,
}

impl ContentAggregator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        catalog: Arc<GeoIndex>,
        search_index: Arc<dyn TextSearchIndex>,
        config: FeedConfig,
    ) -> Self {
        Self {
            batch: BatchedQueryClient::new(store.clone(), &config),
            store,
            catalog,
            search_index,
            config,
        }
    }

    // --- Feeds ---

    /// Newest posts reachable through `city_ids`, capped per chunk. After
    /// cross-chunk dedup the result can hold fewer than
    /// `chunks × feed_page_size` items; this is best-effort coverage.
    pub async fn fetch_nearby_posts(&self, city_ids: &[String]) -> Result<Vec<Post>, FeedError> {
        self.posts_in(city_ids, Some(self.config.feed_page_size)).await
    }

    pub async fn fetch_nearby_events(&self, city_ids: &[String]) -> Result<Vec<Event>, FeedError> {
        self.events_in(city_ids, Some(self.config.feed_page_size)).await
    }

    /// Posts and events together, newest first.
    pub async fn fetch_nearby_feed(&self, city_ids: &[String]) -> Result<Vec<ContentItem>, FeedError> {
        let (posts, events) = tokio::try_join!(
            self.fetch_nearby_posts(city_ids),
            self.fetch_nearby_events(city_ids),
        )?;
        let feed = combine_newest_first(posts, events);
        info!(cities = city_ids.len(), items = feed.len(), "Nearby feed fetched");
        Ok(feed)
    }

    /// Every post and event reachable through `city_ids`, uncapped.
    ///
    /// Cost is O(total nearby documents). Fetch once per search session and
    /// reuse; `SearchSession` does this.
    pub async fn fetch_all_nearby(&self, city_ids: &[String]) -> Result<Vec<ContentItem>, FeedError> {
        let (posts, events) = tokio::try_join!(self.posts_in(city_ids, None), self.events_in(city_ids, None))?;
        let corpus = combine_newest_first(posts, events);
        info!(
            cities = city_ids.len(),
            documents = corpus.len(),
            "Fetched full nearby corpus for search"
        );
        Ok(corpus)
    }

    /// Filter an already-fetched corpus by `query`. No remote calls.
    pub fn search_by_keyword(&self, query: &str, corpus: &[ContentItem]) -> Vec<ContentItem> {
        corpus
            .iter()
            .filter(|item| {
                let mut displayed: Vec<&str> = vec![item.display_text()];
                displayed.extend(
                    self.catalog
                        .lookup_many(item.city_ids())
                        .into_iter()
                        .map(|c| c.display_name.as_str()),
                );
                self.search_index.matches(item.keywords(), &displayed, query)
            })
            .cloned()
            .collect()
    }

    // --- Leaderboards ---

    /// Top weekly stats for the ISO week containing `now`.
    pub async fn fetch_top_weekly(
        &self,
        city_ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vec<WeeklyStat>, FeedError> {
        let (week_key, _) = iso_week(now);
        let base = Query::collection(collections::WEEKLY_STATS)
            .eq("week_key", week_key.as_str())
            .order_by("upvotes", Direction::Desc)
            .limit(self.config.top_weekly_overfetch);

        let docs = self
            .batch
            .fetch_by_membership(
                &base,
                "city_ids",
                Membership::Array,
                city_ids,
                &MergeRule::KeepMax {
                    field: "upvotes".into(),
                },
            )
            .await?;

        let stats: Vec<WeeklyStat> = decode_all(&docs);
        let ranked = rank_by(stats, |s| s.upvotes, |s| &s.content_id, self.config.leaderboard_size);
        debug!(week = week_key.as_str(), ranked = ranked.len(), "Weekly leaderboard");
        Ok(ranked)
    }

    /// Weekly leaderboard resolved to posts. Stats whose post is gone are skipped.
    pub async fn fetch_top_weekly_posts(
        &self,
        city_ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vec<(WeeklyStat, Post)>, FeedError> {
        let stats = self.fetch_top_weekly(city_ids, now).await?;
        let posts = futures::future::try_join_all(stats.iter().map(|s| self.fetch_post(&s.content_id))).await?;
        Ok(stats
            .into_iter()
            .zip(posts)
            .filter_map(|(stat, post)| post.map(|p| (stat, p)))
            .collect())
    }

    pub async fn fetch_top_all_time(&self, city_ids: &[String]) -> Result<Vec<Post>, FeedError> {
        self.top_posts_by(city_ids, "upvotes", |p| p.upvotes).await
    }

    pub async fn fetch_top_downvoted_all_time(&self, city_ids: &[String]) -> Result<Vec<Post>, FeedError> {
        self.top_posts_by(city_ids, "downvotes", |p| p.downvotes).await
    }

    // --- Lookups ---

    pub async fn fetch_post(&self, id: &str) -> Result<Option<Post>, FeedError> {
        self.fetch_typed(collections::POSTS, id).await
    }

    pub async fn fetch_event(&self, id: &str) -> Result<Option<Event>, FeedError> {
        self.fetch_typed(collections::EVENTS, id).await
    }

    /// Resolve a linked content id to a post or event. A deleted item is `None`.
    pub async fn fetch_content(&self, id: &str) -> Result<Option<ContentItem>, FeedError> {
        if let Some(post) = self.fetch_post(id).await? {
            return Ok(Some(ContentItem::Post(post)));
        }
        Ok(self.fetch_event(id).await?.map(ContentItem::Event))
    }

    /// A poll with its options in display order.
    pub async fn fetch_poll(&self, id: &str) -> Result<Option<Poll>, FeedError> {
        let Some(mut poll) = self.fetch_typed::<Poll>(collections::POLLS, id).await? else {
            return Ok(None);
        };
        let query = Query::collection(collections::POLL_OPTIONS)
            .eq("poll_id", id)
            .order_by("index", Direction::Asc);
        let docs = self.store.query(&query).await.map_err(FeedError::Remote)?;
        poll.options = decode_all::<PollOption>(&docs);
        Ok(Some(poll))
    }

    // --- Internals ---

    async fn posts_in(&self, city_ids: &[String], limit: Option<usize>) -> Result<Vec<Post>, FeedError> {
        let base = Query::collection(collections::POSTS)
            .order_by("created_at", Direction::Desc)
            .maybe_limit(limit);
        let docs = self
            .batch
            .fetch_by_membership(&base, "city_ids", Membership::Array, city_ids, &MergeRule::KeepFirst)
            .await?;
        Ok(decode_all(&docs))
    }

    async fn events_in(&self, city_ids: &[String], limit: Option<usize>) -> Result<Vec<Event>, FeedError> {
        let base = Query::collection(collections::EVENTS)
            .order_by("created_at", Direction::Desc)
            .maybe_limit(limit);
        let docs = self
            .batch
            .fetch_by_membership(&base, "city_id", Membership::Scalar, city_ids, &MergeRule::KeepFirst)
            .await?;
        Ok(decode_all(&docs))
    }

    async fn top_posts_by(
        &self,
        city_ids: &[String],
        field: &str,
        counter: fn(&Post) -> i64,
    ) -> Result<Vec<Post>, FeedError> {
        let base = Query::collection(collections::POSTS)
            .order_by(field, Direction::Desc)
            .limit(self.config.top_all_time_overfetch);
        let docs = self
            .batch
            .fetch_by_membership(
                &base,
                "city_ids",
                Membership::Array,
                city_ids,
                &MergeRule::KeepMax { field: field.into() },
            )
            .await?;
        let posts: Vec<Post> = decode_all(&docs);
        Ok(rank_by(posts, counter, |p| &p.id, self.config.leaderboard_size))
    }

    async fn fetch_typed<T: DeserializeOwned>(&self, collection: &str, id: &str) -> Result<Option<T>, FeedError> {
        let Some(doc) = self.store.get(collection, id).await.map_err(FeedError::Remote)? else {
            return Ok(None);
        };
        Ok(Some(doc.decode()?))
    }
}

/// Drop non-positive counters, sort by counter descending with `key`
/// ascending as tie-break, keep the first `n`.
pub fn rank_by<T>(
    items: Vec<T>,
    counter: impl Fn(&T) -> i64,
    key: impl Fn(&T) -> &String,
    n: usize,
) -> Vec<T> {
    let mut ranked: Vec<T> = items.into_iter().filter(|i| counter(i) > 0).collect();
    ranked.sort_by(|a, b| match counter(b).cmp(&counter(a)) {
        Ordering::Equal => key(a).cmp(key(b)),
        other => other,
    });
    ranked.truncate(n);
    ranked
}

fn combine_newest_first(posts: Vec<Post>, events: Vec<Event>) -> Vec<ContentItem> {
    let mut items: Vec<ContentItem> = posts
        .into_iter()
        .map(ContentItem::Post)
        .chain(events.into_iter().map(ContentItem::Event))
        .collect();
    items.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
    items
}

/// Decode documents, skipping any that do not match the model.
fn decode_all<T: DeserializeOwned>(docs: &[Document]) -> Vec<T> {
    docs.iter()
        .filter_map(|d| match d.decode() {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(id = d.id.as_str(), error = %e, "Skipping malformed document");
                None
            }
        })
        .collect()
}
