//! EngagementStateStore: the user's votes, poll choices and saves.
//!
//! Every mutation is two-phase: the local record is written first so views
//! reflect it immediately, then one remote commit is issued. If the commit
//! fails the local write is rolled back and the caller gets the error.
//! Mutations on the same entity are serialized through `EntityLocks`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use localfeed_common::{
    iso_week, FeedError, LocalEngagementRecord, Polarity, Poll, Post, RecordKey, Vote, WeeklyStat,
};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::locks::EntityLocks;
use crate::store::{collections, DocumentStore, LocalRecordStore, Write};

/// What a vote is cast on: the content id and the cities its weekly stat is
/// ranked under.
#[derive(Debug, Clone, Copy)]
pub struct VoteTarget<'a> {
    pub content_id: &'a str,
    pub city_ids: &'a [String],
}

impl<'a> From<&'a Post> for VoteTarget<'a> {
    fn from(post: &'a Post) -> Self {
        Self {
            content_id: &post.id,
            city_ids: &post.city_ids,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Cast,
    Switched,
    Removed,
    /// Already in the requested state; nothing was sent.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngagementEvent {
    VoteChanged {
        content_id: String,
        polarity: Option<Polarity>,
    },
    PollChanged {
        poll_id: String,
        option_id: Option<String>,
    },
    SavedChanged {
        item_id: String,
        saved: bool,
    },
    /// A remote commit failed and the local state for `key` was restored.
    RolledBack {
        key: RecordKey,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct LocalVote {
    polarity: Polarity,
    cast_at: DateTime<Utc>,
}

#[derive(Default)]
struct Mirror {
    votes: HashMap<String, LocalVote>,
    polls: HashMap<String, String>,
    saved: HashMap<String, bool>,
}

impl Mirror {
    fn apply(&mut self, key: &RecordKey, record: Option<&LocalEngagementRecord>) {
        match (key, record) {
            (_, Some(LocalEngagementRecord::Vote { content_id, is_upvoted, cast_at })) => {
                self.votes.insert(
                    content_id.clone(),
                    LocalVote {
                        polarity: Polarity::from_upvote(*is_upvoted),
                        cast_at: *cast_at,
                    },
                );
            }
            (_, Some(LocalEngagementRecord::PollChoice { poll_id, option_id })) => {
                self.polls.insert(poll_id.clone(), option_id.clone());
            }
            (_, Some(LocalEngagementRecord::Saved { saved_id, is_post })) => {
                self.saved.insert(saved_id.clone(), *is_post);
            }
            (RecordKey::Vote(id), None) => {
                self.votes.remove(id);
            }
            (RecordKey::PollChoice(id), None) => {
                self.polls.remove(id);
            }
            (RecordKey::Saved(id), None) => {
                self.saved.remove(id);
            }
        }
    }
}

/// A local write applied ahead of remote confirmation.
struct Pending {
    key: RecordKey,
    previous: Option<LocalEngagementRecord>,
}

pub struct EngagementStateStore {
    user_id: String,
    documents: Arc<dyn DocumentStore>,
    records: Arc<dyn LocalRecordStore>,
    mirror: Mutex<Mirror>,
    locks: EntityLocks,
    events: broadcast::Sender<EngagementEvent>,
}

impl EngagementStateStore {
    pub fn new(
        user_id: impl Into<String>,
        documents: Arc<dyn DocumentStore>,
        records: Arc<dyn LocalRecordStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(128);
        Self {
            user_id: user_id.into(),
            documents,
            records,
            mirror: Mutex::new(Mirror::default()),
            locks: EntityLocks::new(),
            events,
        }
    }

    /// Load persisted records into memory. Call once before first use.
    pub async fn load(&self) -> Result<usize, FeedError> {
        let records = self.records.all().await?;
        let mut mirror = Mirror::default();
        for record in &records {
            mirror.apply(&record.key(), Some(record));
        }
        *self.lock_mirror() = mirror;
        debug!(records = records.len(), "Engagement records loaded");
        Ok(records.len())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngagementEvent> {
        self.events.subscribe()
    }

    // --- Getters ---

    pub fn is_voted(&self, content_id: &str) -> Option<Polarity> {
        self.lock_mirror().votes.get(content_id).map(|v| v.polarity)
    }

    pub fn poll_choice(&self, poll_id: &str) -> Option<String> {
        self.lock_mirror().polls.get(poll_id).cloned()
    }

    pub fn is_saved(&self, item_id: &str) -> bool {
        self.lock_mirror().saved.contains_key(item_id)
    }

    /// Saved item ids with whether each is a post.
    pub fn saved_items(&self) -> Vec<(String, bool)> {
        let mut items: Vec<(String, bool)> = self
            .lock_mirror()
            .saved
            .iter()
            .map(|(id, is_post)| (id.clone(), *is_post))
            .collect();
        items.sort();
        items
    }

    // --- Content votes ---

    /// Cast a vote. Same polarity as the existing vote is a no-op; the
    /// opposite polarity switches the vote in a single commit.
    pub async fn cast_vote(&self, target: VoteTarget<'_>, polarity: Polarity) -> Result<VoteOutcome, FeedError> {
        let key = RecordKey::Vote(target.content_id.to_string());
        let _guard = self.locks.acquire(&key.to_string()).await;

        let now = Utc::now();
        let current = self.lock_mirror().votes.get(target.content_id).copied();
        let (outcome, writes) = match current {
            Some(v) if v.polarity == polarity => return Ok(VoteOutcome::Unchanged),
            Some(v) => (VoteOutcome::Switched, self.switch_writes(target, v, polarity, now)?),
            None => (VoteOutcome::Cast, self.cast_writes(target, polarity, now)?),
        };

        let record = LocalEngagementRecord::Vote {
            content_id: target.content_id.to_string(),
            is_upvoted: polarity.is_upvote(),
            cast_at: now,
        };
        let pending = self.apply_local(key, Some(record)).await?;
        self.try_commit(pending, writes).await?;

        info!(content = target.content_id, %polarity, ?outcome, "Vote committed");
        let _ = self.events.send(EngagementEvent::VoteChanged {
            content_id: target.content_id.to_string(),
            polarity: Some(polarity),
        });
        Ok(outcome)
    }

    /// Remove the user's vote. No vote is a no-op.
    pub async fn remove_vote(&self, target: VoteTarget<'_>) -> Result<VoteOutcome, FeedError> {
        let key = RecordKey::Vote(target.content_id.to_string());
        let _guard = self.locks.acquire(&key.to_string()).await;

        let Some(current) = self.lock_mirror().votes.get(target.content_id).copied() else {
            return Ok(VoteOutcome::Unchanged);
        };
        let writes = self.remove_writes(target, current, Utc::now())?;

        let pending = self.apply_local(key, None).await?;
        self.try_commit(pending, writes).await?;

        info!(content = target.content_id, "Vote removed");
        let _ = self.events.send(EngagementEvent::VoteChanged {
            content_id: target.content_id.to_string(),
            polarity: None,
        });
        Ok(VoteOutcome::Removed)
    }

    fn cast_writes(&self, target: VoteTarget<'_>, polarity: Polarity, now: DateTime<Utc>) -> Result<Vec<Write>, FeedError> {
        let vote = Vote {
            content_id: target.content_id.to_string(),
            user_id: self.user_id.clone(),
            timestamp: now,
            is_upvote: polarity.is_upvote(),
        };
        let mut writes = vec![
            Write::set(collections::VOTES, &Vote::doc_id(target.content_id, &self.user_id), &vote)?,
            Write::increment(collections::POSTS, target.content_id, polarity.counter_field(), 1),
        ];
        if polarity.is_upvote() {
            writes.push(Write::increment(collections::POSTS, target.content_id, "upvotes_this_week", 1));
        }
        writes.push(stat_upsert(target, now, polarity, 1)?);
        Ok(writes)
    }

    fn remove_writes(&self, target: VoteTarget<'_>, current: LocalVote, now: DateTime<Utc>) -> Result<Vec<Write>, FeedError> {
        let mut writes = vec![
            Write::delete(collections::VOTES, &Vote::doc_id(target.content_id, &self.user_id)),
            Write::increment(collections::POSTS, target.content_id, current.polarity.counter_field(), -1),
        ];
        if current.polarity.is_upvote() && same_week(current.cast_at, now) {
            writes.push(Write::increment(collections::POSTS, target.content_id, "upvotes_this_week", -1));
        }
        writes.push(stat_upsert(target, current.cast_at, current.polarity, -1)?);
        Ok(writes)
    }

    /// Undo the old vote and apply the new one in the same commit, so the
    /// counters never show both or neither polarity.
    fn switch_writes(
        &self,
        target: VoteTarget<'_>,
        current: LocalVote,
        polarity: Polarity,
        now: DateTime<Utc>,
    ) -> Result<Vec<Write>, FeedError> {
        let mut writes = self.remove_writes(target, current, now)?;
        // The vote record is replaced, not deleted.
        writes.remove(0);
        writes.extend(self.cast_writes(target, polarity, now)?);
        Ok(writes)
    }

    // --- Poll votes ---

    /// Choose `option_id`. Choosing the current option is a no-op; choosing
    /// another option switches.
    pub async fn cast_poll_vote(&self, poll: &mut Poll, option_id: &str) -> Result<VoteOutcome, FeedError> {
        self.poll_transition(poll, PollIntent::Choose { to: option_id.to_string() })
            .await
    }

    /// Move the vote from `old_option_id` to `new_option_id`. Fails with
    /// `InvariantViolation` if the user's current choice is not
    /// `old_option_id`.
    pub async fn switch_poll_vote(
        &self,
        poll: &mut Poll,
        old_option_id: &str,
        new_option_id: &str,
    ) -> Result<VoteOutcome, FeedError> {
        if old_option_id == new_option_id {
            return Ok(VoteOutcome::Unchanged);
        }
        self.poll_transition(
            poll,
            PollIntent::Switch {
                from: old_option_id.to_string(),
                to: new_option_id.to_string(),
            },
        )
        .await
    }

    pub async fn remove_poll_vote(&self, poll: &mut Poll) -> Result<VoteOutcome, FeedError> {
        self.poll_transition(poll, PollIntent::Remove).await
    }

    async fn poll_transition(&self, poll: &mut Poll, intent: PollIntent) -> Result<VoteOutcome, FeedError> {
        let key = RecordKey::PollChoice(poll.id.clone());
        let _guard = self.locks.acquire(&key.to_string()).await;

        // The current choice is only read under the lock.
        let current = self.poll_choice(&poll.id);
        let Some(transition) = intent.resolve(&poll.id, current)? else {
            return Ok(VoteOutcome::Unchanged);
        };
        for option_id in transition.touched() {
            if poll.option(option_id).is_none() {
                return Err(FeedError::InvariantViolation(format!(
                    "poll {} has no option {option_id}",
                    poll.id
                )));
            }
        }

        let deltas = transition.deltas();
        let total_delta = transition.total_delta();
        let writes = self.poll_writes(&poll.id, &transition, &deltas, total_delta)?;

        let record = transition.target().map(|option_id| LocalEngagementRecord::PollChoice {
            poll_id: poll.id.clone(),
            option_id: option_id.to_string(),
        });
        let pending = self.apply_local(key, record).await?;
        adjust_poll(poll, &deltas, total_delta);

        if let Err(e) = self.try_commit(pending, writes).await {
            adjust_poll(poll, &negate(&deltas), -total_delta);
            return Err(e);
        }

        info!(poll = poll.id.as_str(), ?transition, total = poll.total_votes, "Poll vote committed");
        let _ = self.events.send(EngagementEvent::PollChanged {
            poll_id: poll.id.clone(),
            option_id: transition.target().map(str::to_string),
        });
        Ok(transition.outcome())
    }

    fn poll_writes(
        &self,
        poll_id: &str,
        transition: &PollTransition,
        deltas: &[(String, i64)],
        total_delta: i64,
    ) -> Result<Vec<Write>, FeedError> {
        let mut writes: Vec<Write> = deltas
            .iter()
            .map(|(option_id, by)| Write::increment(collections::POLL_OPTIONS, option_id, "vote_count", *by))
            .collect();
        if total_delta != 0 {
            writes.push(Write::increment(collections::POLLS, poll_id, "total_votes", total_delta));
        }
        let vote_id = format!("{poll_id}_{}", self.user_id);
        match transition.target() {
            Some(option_id) => writes.push(Write::set(
                collections::POLL_VOTES,
                &vote_id,
                &json!({ "poll_id": poll_id, "user_id": self.user_id, "option_id": option_id }),
            )?),
            None => writes.push(Write::delete(collections::POLL_VOTES, &vote_id)),
        }
        Ok(writes)
    }

    // --- Saves ---

    /// Save or unsave an item. Returns whether it is now saved. Saves are
    /// kept on device only.
    pub async fn toggle_save(&self, item_id: &str, is_post: bool) -> Result<bool, FeedError> {
        let key = RecordKey::Saved(item_id.to_string());
        let _guard = self.locks.acquire(&key.to_string()).await;

        let saved = !self.is_saved(item_id);
        let record = saved.then(|| LocalEngagementRecord::Saved {
            saved_id: item_id.to_string(),
            is_post,
        });
        self.apply_local(key, record).await?;

        let _ = self.events.send(EngagementEvent::SavedChanged {
            item_id: item_id.to_string(),
            saved,
        });
        Ok(saved)
    }

    // --- Two-phase plumbing ---

    async fn apply_local(&self, key: RecordKey, next: Option<LocalEngagementRecord>) -> Result<Pending, FeedError> {
        let previous = self.records.get(&key).await?;
        match &next {
            Some(record) => self.records.put(record).await?,
            None => self.records.delete(&key).await?,
        }
        self.lock_mirror().apply(&key, next.as_ref());
        Ok(Pending { key, previous })
    }

    async fn try_commit(&self, pending: Pending, writes: Vec<Write>) -> Result<(), FeedError> {
        match self.documents.commit(writes).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(key = %pending.key, error = %e, "Remote commit failed, rolling back local state");
                let reason = e.to_string();
                self.rollback(&pending).await;
                let _ = self.events.send(EngagementEvent::RolledBack {
                    key: pending.key,
                    reason,
                });
                Err(FeedError::Remote(e))
            }
        }
    }

    async fn rollback(&self, pending: &Pending) {
        let restored = match &pending.previous {
            Some(record) => self.records.put(record).await,
            None => self.records.delete(&pending.key).await,
        };
        if let Err(e) = restored {
            warn!(key = %pending.key, error = %e, "Failed to restore local record");
        }
        self.lock_mirror().apply(&pending.key, pending.previous.as_ref());
    }

    fn lock_mirror(&self) -> MutexGuard<'_, Mirror> {
        self.mirror.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// What the caller asked for, before the current choice is known.
#[derive(Debug, Clone, PartialEq)]
enum PollIntent {
    Choose { to: String },
    Switch { from: String, to: String },
    Remove,
}

impl PollIntent {
    /// Pick the transition from the current choice. `None` means already in
    /// the requested state.
    fn resolve(self, poll_id: &str, current: Option<String>) -> Result<Option<PollTransition>, FeedError> {
        let transition = match (self, current) {
            (PollIntent::Choose { to }, None) => PollTransition::Cast { to },
            (PollIntent::Choose { to }, Some(from)) if from == to => return Ok(None),
            (PollIntent::Choose { to }, Some(from)) => PollTransition::Switch { from, to },
            (PollIntent::Switch { from, to }, Some(current)) if current == from => {
                PollTransition::Switch { from, to }
            }
            (PollIntent::Switch { from, .. }, current) => {
                return Err(FeedError::InvariantViolation(format!(
                    "poll {poll_id} choice is {current:?}, expected {from:?}"
                )));
            }
            (PollIntent::Remove, None) => return Ok(None),
            (PollIntent::Remove, Some(from)) => PollTransition::Remove { from },
        };
        Ok(Some(transition))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum PollTransition {
    Cast { to: String },
    Switch { from: String, to: String },
    Remove { from: String },
}

impl PollTransition {
    fn target(&self) -> Option<&str> {
        match self {
            PollTransition::Cast { to } | PollTransition::Switch { to, .. } => Some(to),
            PollTransition::Remove { .. } => None,
        }
    }

    fn touched(&self) -> Vec<&str> {
        match self {
            PollTransition::Cast { to } => vec![to],
            PollTransition::Switch { from, to } => vec![from, to],
            PollTransition::Remove { from } => vec![from],
        }
    }

    fn deltas(&self) -> Vec<(String, i64)> {
        match self {
            PollTransition::Cast { to } => vec![(to.clone(), 1)],
            PollTransition::Switch { from, to } => vec![(from.clone(), -1), (to.clone(), 1)],
            PollTransition::Remove { from } => vec![(from.clone(), -1)],
        }
    }

    fn total_delta(&self) -> i64 {
        match self {
            PollTransition::Cast { .. } => 1,
            PollTransition::Switch { .. } => 0,
            PollTransition::Remove { .. } => -1,
        }
    }

    fn outcome(&self) -> VoteOutcome {
        match self {
            PollTransition::Cast { .. } => VoteOutcome::Cast,
            PollTransition::Switch { .. } => VoteOutcome::Switched,
            PollTransition::Remove { .. } => VoteOutcome::Removed,
        }
    }
}

fn adjust_poll(poll: &mut Poll, deltas: &[(String, i64)], total_delta: i64) {
    for (option_id, by) in deltas {
        if let Some(option) = poll.option_mut(option_id) {
            option.vote_count += by;
        }
    }
    poll.total_votes += total_delta;
}

fn negate(deltas: &[(String, i64)]) -> Vec<(String, i64)> {
    deltas.iter().map(|(id, by)| (id.clone(), -by)).collect()
}

fn same_week(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    iso_week(a).0 == iso_week(b).0
}

/// Create-or-increment the weekly stat of the week containing `at`.
fn stat_upsert(target: VoteTarget<'_>, at: DateTime<Utc>, polarity: Polarity, by: i64) -> Result<Write, FeedError> {
    let (week_key, week_start) = iso_week(at);
    let id = WeeklyStat::doc_id(target.content_id, &week_key);
    let defaults = WeeklyStat {
        id: id.clone(),
        content_id: target.content_id.to_string(),
        week_key,
        week_start,
        upvotes: 0,
        downvotes: 0,
        city_ids: target.city_ids.to_vec(),
    };
    Ok(Write::Upsert {
        collection: collections::WEEKLY_STATS.to_string(),
        id,
        defaults: serde_json::to_value(&defaults)?,
        increments: vec![(polarity.counter_field().to_string(), by)],
    })
}
