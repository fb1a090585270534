//! Votes, poll choices and saves: local-first writes with rollback.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use localfeed_common::{iso_week, FeedError, Polarity, Poll, Post, WeeklyStat};
use localfeed_engine::testing::{poll, post, seed_poll, seed_post, RecordingStore, SlowRecordStore};
use localfeed_engine::{
    collections, EngagementEvent, EngagementStateStore, FeedDeps, LocalRecordStore, MemoryRecordStore,
    VoteOutcome, VoteTarget, Write,
};
use localfeed_geo::testing::scenario_catalog;
use localfeed_geo::MemoryRangeStore;

struct Harness {
    store: Arc<RecordingStore>,
    records: Arc<MemoryRecordStore>,
    engagement: EngagementStateStore,
    post: Post,
}

fn harness() -> Harness {
    let store = Arc::new(RecordingStore::new());
    let records = Arc::new(MemoryRecordStore::new());
    let post = post("p1", &["city-1", "city-2"], 0);
    seed_post(&store.inner, &post);
    let engagement = EngagementStateStore::new("u1", store.clone(), records.clone());
    Harness {
        store,
        records,
        engagement,
        post,
    }
}

/// Same document store, but local records take 5 ms per call.
fn slow_harness() -> (Arc<RecordingStore>, EngagementStateStore) {
    let store = Arc::new(RecordingStore::new());
    let records = Arc::new(SlowRecordStore::new(Duration::from_millis(5)));
    (store.clone(), EngagementStateStore::new("u1", store, records))
}

fn option_votes(store: &RecordingStore, option_id: &str) -> i64 {
    store
        .inner
        .get_now(collections::POLL_OPTIONS, option_id)
        .map_or(0, |d| d.counter("vote_count"))
}

impl Harness {
    fn counter(&self, collection: &str, id: &str, field: &str) -> i64 {
        self.store.inner.get_now(collection, id).map_or(0, |d| d.counter(field))
    }

    fn this_week_stat(&self, field: &str) -> i64 {
        let (week_key, _) = iso_week(Utc::now());
        self.counter(collections::WEEKLY_STATS, &WeeklyStat::doc_id("p1", &week_key), field)
    }

    fn remote_poll_is_consistent(&self, p: &Poll) -> bool {
        let options: i64 = p
            .options
            .iter()
            .map(|o| self.counter(collections::POLL_OPTIONS, &o.id, "vote_count"))
            .sum();
        options == self.counter(collections::POLLS, &p.id, "total_votes")
    }
}

#[tokio::test]
async fn switching_polarity_is_one_commit() {
    let h = harness();
    let target = VoteTarget::from(&h.post);

    assert_eq!(h.engagement.cast_vote(target, Polarity::Up).await.unwrap(), VoteOutcome::Cast);
    h.store.clear_recorded();

    let outcome = h.engagement.cast_vote(target, Polarity::Down).await.unwrap();

    assert_eq!(outcome, VoteOutcome::Switched);
    let commits = h.store.commits();
    assert_eq!(commits.len(), 1);
    assert!(commits[0].contains(&Write::increment("posts", "p1", "upvotes", -1)));
    assert!(commits[0].contains(&Write::increment("posts", "p1", "downvotes", 1)));

    assert_eq!(h.counter(collections::POSTS, "p1", "upvotes"), 0);
    assert_eq!(h.counter(collections::POSTS, "p1", "downvotes"), 1);
    assert_eq!(h.this_week_stat("upvotes"), 0);
    assert_eq!(h.this_week_stat("downvotes"), 1);
    assert_eq!(h.engagement.is_voted("p1"), Some(Polarity::Down));
    assert_eq!(h.store.inner.count(collections::VOTES), 1);
}

#[tokio::test]
async fn vote_sequence_keeps_one_vote_and_net_counts() {
    let h = harness();
    let target = VoteTarget::from(&h.post);
    let steps: [(Option<Polarity>, VoteOutcome); 7] = [
        (Some(Polarity::Up), VoteOutcome::Cast),
        (Some(Polarity::Up), VoteOutcome::Unchanged),
        (None, VoteOutcome::Removed),
        (Some(Polarity::Down), VoteOutcome::Cast),
        (Some(Polarity::Up), VoteOutcome::Switched),
        (None, VoteOutcome::Removed),
        (Some(Polarity::Down), VoteOutcome::Cast),
    ];

    for (step, expected) in steps {
        let outcome = match step {
            Some(polarity) => h.engagement.cast_vote(target, polarity).await.unwrap(),
            None => h.engagement.remove_vote(target).await.unwrap(),
        };
        assert_eq!(outcome, expected, "{step:?}");
        assert!(h.store.inner.count(collections::VOTES) <= 1);
        assert_eq!(
            h.counter(collections::POSTS, "p1", "upvotes") - h.counter(collections::POSTS, "p1", "downvotes"),
            h.this_week_stat("upvotes") - h.this_week_stat("downvotes"),
        );
    }

    assert_eq!(h.counter(collections::POSTS, "p1", "upvotes"), 0);
    assert_eq!(h.counter(collections::POSTS, "p1", "downvotes"), 1);
    assert_eq!(h.this_week_stat("downvotes"), 1);
    assert_eq!(h.counter(collections::POSTS, "p1", "upvotes_this_week"), 0);
}

#[tokio::test]
async fn weekly_stat_carries_the_post_cities() {
    let h = harness();
    h.engagement
        .cast_vote(VoteTarget::from(&h.post), Polarity::Up)
        .await
        .unwrap();

    let (week_key, _) = iso_week(Utc::now());
    let doc = h
        .store
        .inner
        .get_now(collections::WEEKLY_STATS, &WeeklyStat::doc_id("p1", &week_key))
        .unwrap();
    let stat: WeeklyStat = doc.decode().unwrap();
    assert_eq!(stat.city_ids, vec!["city-1", "city-2"]);
    assert_eq!(stat.week_key, week_key);
}

#[tokio::test]
async fn failed_commit_rolls_back_local_vote() {
    let h = harness();
    let mut events = h.engagement.subscribe();
    h.store.fail_commits(true);

    let err = h
        .engagement
        .cast_vote(VoteTarget::from(&h.post), Polarity::Up)
        .await
        .unwrap_err();

    assert!(matches!(err, FeedError::Remote(_)), "{err}");
    assert!(err.is_retryable());
    assert_eq!(h.engagement.is_voted("p1"), None);
    assert!(h.records.is_empty());
    assert_eq!(h.counter(collections::POSTS, "p1", "upvotes"), 0);
    assert!(matches!(events.try_recv().unwrap(), EngagementEvent::RolledBack { .. }));

    h.store.fail_commits(false);
    let outcome = h
        .engagement
        .cast_vote(VoteTarget::from(&h.post), Polarity::Up)
        .await
        .unwrap();
    assert_eq!(outcome, VoteOutcome::Cast);
}

#[tokio::test]
async fn failed_switch_restores_previous_vote() {
    let h = harness();
    let target = VoteTarget::from(&h.post);
    h.engagement.cast_vote(target, Polarity::Up).await.unwrap();

    h.store.fail_commits(true);
    assert!(h.engagement.cast_vote(target, Polarity::Down).await.is_err());

    assert_eq!(h.engagement.is_voted("p1"), Some(Polarity::Up));
    assert_eq!(h.records.len(), 1);
    assert_eq!(h.counter(collections::POSTS, "p1", "upvotes"), 1);
}

#[tokio::test]
async fn concurrent_votes_on_one_item_are_serialized() {
    let h = harness();
    let target = VoteTarget::from(&h.post);

    let (a, b) = tokio::join!(
        h.engagement.cast_vote(target, Polarity::Up),
        h.engagement.cast_vote(target, Polarity::Up),
    );

    let mut outcomes = vec![a.unwrap(), b.unwrap()];
    outcomes.sort_by_key(|o| *o == VoteOutcome::Unchanged);
    assert_eq!(outcomes, vec![VoteOutcome::Cast, VoteOutcome::Unchanged]);
    assert_eq!(h.counter(collections::POSTS, "p1", "upvotes"), 1);
}

#[tokio::test]
async fn double_tap_on_a_poll_option_counts_once() {
    let (store, engagement) = slow_harness();
    let p = poll("poll-1", 2);
    seed_poll(&store.inner, &p);
    let a = p.options[0].id.clone();
    let (mut first_view, mut second_view) = (p.clone(), p.clone());

    let (first, second) = tokio::join!(
        engagement.cast_poll_vote(&mut first_view, &a),
        engagement.cast_poll_vote(&mut second_view, &a),
    );

    assert_eq!(first.unwrap(), VoteOutcome::Cast);
    assert_eq!(second.unwrap(), VoteOutcome::Unchanged);
    assert_eq!(store.commit_count(), 1);
    assert_eq!(option_votes(&store, &a), 1);
    assert_eq!(store.inner.get_now(collections::POLLS, "poll-1").unwrap().counter("total_votes"), 1);
}

#[tokio::test]
async fn quick_taps_on_two_poll_options_switch() {
    let (store, engagement) = slow_harness();
    let p = poll("poll-1", 2);
    seed_poll(&store.inner, &p);
    let (a, b) = (p.options[0].id.clone(), p.options[1].id.clone());
    let (mut first_view, mut second_view) = (p.clone(), p.clone());

    let (first, second) = tokio::join!(
        engagement.cast_poll_vote(&mut first_view, &a),
        engagement.cast_poll_vote(&mut second_view, &b),
    );

    assert_eq!(first.unwrap(), VoteOutcome::Cast);
    assert_eq!(second.unwrap(), VoteOutcome::Switched);
    assert_eq!(engagement.poll_choice("poll-1"), Some(b.clone()));
    assert_eq!(option_votes(&store, &a), 0);
    assert_eq!(option_votes(&store, &b), 1);
    assert_eq!(store.inner.get_now(collections::POLLS, "poll-1").unwrap().counter("total_votes"), 1);
}

#[tokio::test]
async fn concurrent_remove_and_recast_leave_one_consistent_choice() {
    let (store, engagement) = slow_harness();
    let mut p = poll("poll-1", 2);
    seed_poll(&store.inner, &p);
    let (a, b) = (p.options[0].id.clone(), p.options[1].id.clone());
    engagement.cast_poll_vote(&mut p, &a).await.unwrap();
    let (mut first_view, mut second_view) = (p.clone(), p.clone());

    let (removed, cast) = tokio::join!(
        engagement.remove_poll_vote(&mut first_view),
        engagement.cast_poll_vote(&mut second_view, &b),
    );

    assert_eq!(removed.unwrap(), VoteOutcome::Removed);
    assert_eq!(cast.unwrap(), VoteOutcome::Cast);
    assert_eq!(option_votes(&store, &a), 0);
    assert_eq!(option_votes(&store, &b), 1);
    assert_eq!(store.inner.get_now(collections::POLLS, "poll-1").unwrap().counter("total_votes"), 1);
}

#[tokio::test]
async fn deps_hand_out_one_shared_engagement_store() {
    let store = Arc::new(RecordingStore::new());
    let post = post("p1", &["city-1"], 0);
    seed_post(&store.inner, &post);
    let deps = FeedDeps::builder()
        .documents(store.clone())
        .records(Arc::new(SlowRecordStore::new(Duration::from_millis(5))))
        .range_store(Arc::new(MemoryRangeStore::new()))
        .catalog(Arc::new(scenario_catalog()))
        .user_id("u1")
        .build();

    let feed_view = deps.engagement();
    let detail_view = deps.clone().engagement();
    assert!(Arc::ptr_eq(&feed_view, &detail_view));
    assert!(Arc::ptr_eq(&deps.range_resolver(), &deps.clone().range_resolver()));

    let target = VoteTarget::from(&post);
    let (first, second) = tokio::join!(
        feed_view.cast_vote(target, Polarity::Up),
        detail_view.cast_vote(target, Polarity::Up),
    );
    assert_eq!(first.unwrap(), VoteOutcome::Cast);
    assert_eq!(second.unwrap(), VoteOutcome::Unchanged);

    assert_eq!(
        detail_view.cast_vote(target, Polarity::Up).await.unwrap(),
        VoteOutcome::Unchanged
    );
    assert_eq!(store.commit_count(), 1);
    assert_eq!(store.inner.get_now(collections::POSTS, "p1").unwrap().counter("upvotes"), 1);
}

#[tokio::test]
async fn poll_totals_stay_consistent_through_every_transition() {
    let h = harness();
    let mut p = poll("poll-1", 3);
    seed_poll(&h.store.inner, &p);
    let (a, b) = (p.options[0].id.clone(), p.options[1].id.clone());

    assert_eq!(h.engagement.cast_poll_vote(&mut p, &a).await.unwrap(), VoteOutcome::Cast);
    assert!(p.is_consistent() && h.remote_poll_is_consistent(&p));
    assert_eq!(p.total_votes, 1);

    assert_eq!(h.engagement.switch_poll_vote(&mut p, &a, &b).await.unwrap(), VoteOutcome::Switched);
    assert!(p.is_consistent() && h.remote_poll_is_consistent(&p));
    assert_eq!(p.option(&b).unwrap().vote_count, 1);
    assert_eq!(p.total_votes, 1);

    assert_eq!(h.engagement.remove_poll_vote(&mut p).await.unwrap(), VoteOutcome::Removed);
    assert!(p.is_consistent() && h.remote_poll_is_consistent(&p));
    assert_eq!(p.total_votes, 0);

    assert_eq!(h.store.commit_count(), 3);
    assert_eq!(h.store.inner.count(collections::POLL_VOTES), 0);
}

#[tokio::test]
async fn casting_a_different_option_switches() {
    let h = harness();
    let mut p = poll("poll-1", 2);
    seed_poll(&h.store.inner, &p);
    let (a, b) = (p.options[0].id.clone(), p.options[1].id.clone());

    h.engagement.cast_poll_vote(&mut p, &a).await.unwrap();
    assert_eq!(h.engagement.cast_poll_vote(&mut p, &a).await.unwrap(), VoteOutcome::Unchanged);
    assert_eq!(h.engagement.cast_poll_vote(&mut p, &b).await.unwrap(), VoteOutcome::Switched);

    assert_eq!(h.engagement.poll_choice("poll-1"), Some(b));
    assert_eq!(p.total_votes, 1);
    assert!(h.remote_poll_is_consistent(&p));
}

#[tokio::test]
async fn switching_from_the_wrong_option_is_rejected() {
    let h = harness();
    let mut p = poll("poll-1", 3);
    seed_poll(&h.store.inner, &p);
    let (a, b, c) = (p.options[0].id.clone(), p.options[1].id.clone(), p.options[2].id.clone());

    let err = h.engagement.switch_poll_vote(&mut p, &a, &b).await.unwrap_err();
    assert!(matches!(err, FeedError::InvariantViolation(_)), "{err}");

    h.engagement.cast_poll_vote(&mut p, &a).await.unwrap();
    let err = h.engagement.switch_poll_vote(&mut p, &c, &b).await.unwrap_err();
    assert!(matches!(err, FeedError::InvariantViolation(_)), "{err}");

    assert_eq!(h.store.commit_count(), 1);
    assert_eq!(h.engagement.poll_choice("poll-1"), Some(a));
}

#[tokio::test]
async fn failed_poll_commit_restores_local_counters() {
    let h = harness();
    let mut p = poll("poll-1", 2);
    seed_poll(&h.store.inner, &p);
    let a = p.options[0].id.clone();
    h.store.fail_commits(true);

    assert!(h.engagement.cast_poll_vote(&mut p, &a).await.is_err());

    assert_eq!(p.total_votes, 0);
    assert_eq!(p.option(&a).unwrap().vote_count, 0);
    assert_eq!(h.engagement.poll_choice("poll-1"), None);
}

#[tokio::test]
async fn saves_toggle_locally_without_remote_writes() {
    let h = harness();

    assert!(h.engagement.toggle_save("p1", true).await.unwrap());
    assert!(h.engagement.toggle_save("e1", false).await.unwrap());
    assert!(h.engagement.is_saved("p1"));
    assert_eq!(
        h.engagement.saved_items(),
        vec![("e1".to_string(), false), ("p1".to_string(), true)]
    );

    assert!(!h.engagement.toggle_save("p1", true).await.unwrap());
    assert!(!h.engagement.is_saved("p1"));
    assert_eq!(h.store.commit_count(), 0);
}

#[tokio::test]
async fn load_restores_persisted_state() {
    let h = harness();
    let mut p = poll("poll-1", 2);
    seed_poll(&h.store.inner, &p);
    let a = p.options[0].id.clone();
    h.engagement.cast_vote(VoteTarget::from(&h.post), Polarity::Down).await.unwrap();
    h.engagement.cast_poll_vote(&mut p, &a).await.unwrap();
    h.engagement.toggle_save("p1", true).await.unwrap();

    let reopened = EngagementStateStore::new("u1", h.store.clone(), h.records.clone());
    assert_eq!(reopened.load().await.unwrap(), 3);

    assert_eq!(reopened.is_voted("p1"), Some(Polarity::Down));
    assert_eq!(reopened.poll_choice("poll-1"), Some(a));
    assert!(reopened.is_saved("p1"));
    assert_eq!(h.records.all().await.unwrap().len(), 3);
}
