// Test fakes and builders for the engine.
//
// - RecordingStore (DocumentStore) wraps MemoryDocumentStore, records every
//   query and commit, and can fail or script responses per membership value
// - SlowRecordStore (LocalRecordStore) suspends on every call, the way
//   on-device storage does, so concurrent mutations actually interleave
// - post / event / comment / poll build models at fixed whole-second times
// - seed writes a typed model straight into a MemoryDocumentStore

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration as StdDuration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use localfeed_common::{
    prefix_keywords, Comment, Event, LocalEngagementRecord, Poll, PollOption, Post, RecordKey,
};
use serde::Serialize;
use serde_json::Value;

use crate::memory::{MemoryDocumentStore, MemoryRecordStore};
use crate::store::{collections, Document, DocumentStore, LocalRecordStore, Query, Write};

// ---------------------------------------------------------------------------
// RecordingStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Recorded {
    queries: Vec<Query>,
    commits: Vec<Vec<Write>>,
    fail_membership: HashSet<String>,
    scripted: Vec<(String, Vec<Document>)>,
    fail_commits: bool,
}

/// In-memory store that records traffic. Thread-safe via interior Mutex.
#[derive(Default)]
pub struct RecordingStore {
    pub inner: Arc<MemoryDocumentStore>,
    recorded: Mutex<Recorded>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any query whose membership filter includes `value`.
    pub fn fail_when_membership_contains(&self, value: &str) {
        self.lock().fail_membership.insert(value.to_string());
    }

    /// Answer any query whose membership filter includes `value` with
    /// `docs` instead of the stored documents. Several matching scripts are
    /// concatenated.
    pub fn respond_for(&self, value: &str, docs: Vec<Document>) {
        self.lock().scripted.push((value.to_string(), docs));
    }

    pub fn fail_commits(&self, fail: bool) {
        self.lock().fail_commits = fail;
    }

    pub fn query_count(&self) -> usize {
        self.lock().queries.len()
    }

    pub fn queries(&self) -> Vec<Query> {
        self.lock().queries.clone()
    }

    pub fn commits(&self) -> Vec<Vec<Write>> {
        self.lock().commits.clone()
    }

    pub fn commit_count(&self) -> usize {
        self.lock().commits.len()
    }

    pub fn clear_recorded(&self) {
        let mut recorded = self.lock();
        recorded.queries.clear();
        recorded.commits.clear();
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl DocumentStore for RecordingStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.inner.get(collection, id).await
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        let scripted = {
            let mut recorded = self.lock();
            recorded.queries.push(query.clone());

            let values: Vec<&str> = query.membership_values().filter_map(Value::as_str).collect();
            if let Some(bad) = values.iter().find(|v| recorded.fail_membership.contains(**v)) {
                bail!("simulated failure for query containing {bad}");
            }
            let scripted: Vec<Document> = recorded
                .scripted
                .iter()
                .filter(|(value, _)| values.contains(&value.as_str()))
                .flat_map(|(_, docs)| docs.clone())
                .collect();
            let any_scripted = recorded.scripted.iter().any(|(v, _)| values.contains(&v.as_str()));
            any_scripted.then_some(scripted)
        };

        match scripted {
            Some(docs) => Ok(docs),
            None => self.inner.query(query).await,
        }
    }

    async fn commit(&self, writes: Vec<Write>) -> Result<()> {
        let fail = {
            let mut recorded = self.lock();
            recorded.commits.push(writes.clone());
            recorded.fail_commits
        };
        if fail {
            bail!("simulated commit failure");
        }
        self.inner.commit(writes).await
    }
}

// ---------------------------------------------------------------------------
// SlowRecordStore
// ---------------------------------------------------------------------------

/// MemoryRecordStore that sleeps for `delay` before every call.
pub struct SlowRecordStore {
    pub inner: Arc<MemoryRecordStore>,
    delay: StdDuration,
}

impl SlowRecordStore {
    pub fn new(delay: StdDuration) -> Self {
        Self {
            inner: Arc::new(MemoryRecordStore::new()),
            delay,
        }
    }
}

#[async_trait]
impl LocalRecordStore for SlowRecordStore {
    async fn put(&self, record: &LocalEngagementRecord) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.put(record).await
    }

    async fn get(&self, key: &RecordKey) -> Result<Option<LocalEngagementRecord>> {
        tokio::time::sleep(self.delay).await;
        self.inner.get(key).await
    }

    async fn delete(&self, key: &RecordKey) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.delete(key).await
    }

    async fn all(&self) -> Result<Vec<LocalEngagementRecord>> {
        tokio::time::sleep(self.delay).await;
        self.inner.all().await
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Monday 2026-10-12 09:00 UTC. Offsets are whole minutes so stored
/// timestamps sort correctly as strings.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 12, 9, 0, 0).unwrap()
}

pub fn at_minute(minutes: i64) -> DateTime<Utc> {
    base_time() + Duration::minutes(minutes)
}

/// `prefix-1` .. `prefix-n`.
pub fn ids(prefix: &str, n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("{prefix}-{i}")).collect()
}

pub fn post(id: &str, city_ids: &[&str], minutes: i64) -> Post {
    let author_name = "Caden Lee".to_string();
    let text = format!("post {id}");
    Post {
        id: id.to_string(),
        author_id: "author-1".to_string(),
        keywords: prefix_keywords(&[author_name.as_str(), text.as_str()]),
        author_name,
        created_at: at_minute(minutes),
        city_ids: city_ids.iter().map(|c| c.to_string()).collect(),
        text,
        image_url: None,
        upvotes: 0,
        downvotes: 0,
        upvotes_this_week: 0,
        comment_count: 0,
        poll_id: None,
    }
}

pub fn post_with_votes(id: &str, city_ids: &[&str], upvotes: i64, downvotes: i64) -> Post {
    Post {
        upvotes,
        downvotes,
        ..post(id, city_ids, 0)
    }
}

pub fn event(id: &str, city_id: &str, minutes: i64) -> Event {
    let name = format!("event {id}");
    Event {
        id: id.to_string(),
        author_id: "author-2".to_string(),
        author_name: "Mara".to_string(),
        created_at: at_minute(minutes),
        city_id: city_id.to_string(),
        keywords: prefix_keywords(&[name.as_str(), "Mara"]),
        name,
        date: at_minute(60 * 24 * 7),
        rsvps: 0,
        description: String::new(),
        location_details: String::new(),
        comment_count: 0,
    }
}

pub fn comment(id: &str, content_id: &str, parent: Option<&str>, minutes: i64) -> Comment {
    Comment {
        id: id.to_string(),
        content_id: content_id.to_string(),
        author_id: "author-3".to_string(),
        message: format!("comment {id}"),
        created_at: at_minute(minutes),
        upvotes: 0,
        parent_comment_id: parent.map(str::to_string),
        has_children: false,
    }
}

/// A poll with options `{id}_0 .. {id}_{n-1}`, no votes.
pub fn poll(id: &str, options: usize) -> Poll {
    Poll {
        id: id.to_string(),
        title: format!("poll {id}"),
        context: String::new(),
        total_votes: 0,
        linked_content_id: None,
        options: (0..options)
            .map(|i| PollOption {
                id: format!("{id}_{i}"),
                poll_id: id.to_string(),
                text: format!("option {i}"),
                vote_count: 0,
                index: i as u32,
            })
            .collect(),
    }
}

/// Write `value` under `collection/id`, bypassing commit.
pub fn seed<T: Serialize>(store: &MemoryDocumentStore, collection: &str, id: &str, value: &T) {
    let doc = Document::from_typed(id, value).expect("test model serializes");
    store.insert(collection, doc);
}

pub fn seed_post(store: &MemoryDocumentStore, post: &Post) {
    seed(store, collections::POSTS, &post.id, post);
}

pub fn seed_event(store: &MemoryDocumentStore, event: &Event) {
    seed(store, collections::EVENTS, &event.id, event);
}

pub fn seed_comment(store: &MemoryDocumentStore, comment: &Comment) {
    seed(store, collections::COMMENTS, &comment.id, comment);
}

/// The poll document and one document per option.
pub fn seed_poll(store: &MemoryDocumentStore, poll: &Poll) {
    seed(store, collections::POLLS, &poll.id, poll);
    for option in &poll.options {
        seed(store, collections::POLL_OPTIONS, &option.id, option);
    }
}
