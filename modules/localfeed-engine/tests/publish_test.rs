//! Publishing posts, polls and events, wired through FeedDeps.

use std::sync::Arc;

use localfeed_common::FeedError;
use localfeed_engine::testing::{at_minute, RecordingStore};
use localfeed_engine::{
    collections, EventDraft, FeedDeps, MemoryRecordStore, PollDraft, PostDraft, TextClassifier,
};
use localfeed_geo::testing::scenario_catalog;
use localfeed_geo::MemoryRangeStore;

struct BlockWord(&'static str);

impl TextClassifier for BlockWord {
    fn is_objectionable(&self, text: &str) -> bool {
        text.to_lowercase().contains(self.0)
    }
}

fn deps(store: Arc<RecordingStore>) -> FeedDeps {
    FeedDeps::builder()
        .documents(store)
        .records(Arc::new(MemoryRecordStore::new()))
        .range_store(Arc::new(MemoryRangeStore::new()))
        .catalog(Arc::new(scenario_catalog()))
        .user_id("u1")
        .classifier(Arc::new(BlockWord("spam")))
        .build()
}

fn draft_with_poll(options: &[&str]) -> PostDraft {
    PostDraft::builder()
        .author_id("u1")
        .author_name("Caden Lee")
        .text("Farmers market moved to Saturday")
        .city_ids(vec!["city-a".into(), "city-b".into()])
        .poll(
            PollDraft::builder()
                .title("Which morning works?")
                .options(options.iter().map(|o| o.to_string()).collect())
                .build(),
        )
        .build()
}

#[tokio::test]
async fn post_and_poll_are_written_in_one_commit() {
    let store = Arc::new(RecordingStore::new());
    let deps = deps(store.clone());

    let (post, poll) = deps
        .publisher()
        .create_post(draft_with_poll(&["Sat", "Sun", "Either"]))
        .await
        .unwrap();

    assert_eq!(store.commit_count(), 1);
    assert_eq!(store.commits()[0].len(), 5);
    let poll = poll.unwrap();
    assert_eq!(post.poll_id.as_deref(), Some(poll.id.as_str()));
    assert_eq!(poll.linked_content_id.as_deref(), Some(post.id.as_str()));
    assert!(post.keywords.contains(&"cad".to_string()));
    assert!(post.keywords.contains(&"saturday".to_string()));

    let fetched = deps.aggregator().fetch_poll(&poll.id).await.unwrap().unwrap();
    let texts: Vec<&str> = fetched.options.iter().map(|o| o.text.as_str()).collect();
    assert_eq!(texts, vec!["Sat", "Sun", "Either"]);
    assert!(fetched.is_consistent());
}

#[tokio::test]
async fn published_post_shows_up_in_the_nearby_feed() {
    let store = Arc::new(RecordingStore::new());
    let deps = deps(store);
    let (post, _) = deps
        .publisher()
        .create_post(draft_with_poll(&["yes", "no"]))
        .await
        .unwrap();

    let result = deps.range_resolver().resolve_for_position(0.0, 0.0).await.unwrap();
    let feed = deps
        .aggregator()
        .fetch_nearby_feed(&result.ordered_city_ids)
        .await
        .unwrap();

    assert_eq!(feed.len(), 1);
    assert_eq!(feed[0].id(), post.id);
}

#[tokio::test]
async fn poll_with_one_option_is_refused() {
    let store = Arc::new(RecordingStore::new());

    let err = deps(store.clone())
        .publisher()
        .create_post(draft_with_poll(&["only"]))
        .await
        .unwrap_err();

    assert!(matches!(err, FeedError::Rejected(_)), "{err}");
    assert_eq!(store.commit_count(), 0);
}

#[tokio::test]
async fn objectionable_text_is_refused_before_writing() {
    let store = Arc::new(RecordingStore::new());
    let draft = PostDraft::builder()
        .author_id("u1")
        .author_name("Caden")
        .text("Buy SPAM here")
        .city_ids(vec!["city-a".into()])
        .build();

    let err = deps(store.clone()).publisher().create_post(draft).await.unwrap_err();

    assert!(matches!(err, FeedError::Rejected(_)));
    assert!(!err.is_retryable());
    assert_eq!(store.commit_count(), 0);
}

#[tokio::test]
async fn post_without_cities_is_refused() {
    let store = Arc::new(RecordingStore::new());
    let draft = PostDraft::builder()
        .author_id("u1")
        .author_name("Caden")
        .text("Nowhere in particular")
        .city_ids(Vec::new())
        .build();

    assert!(deps(store).publisher().create_post(draft).await.is_err());
}

#[tokio::test]
async fn event_keywords_cover_name_and_author() {
    let store = Arc::new(RecordingStore::new());
    let draft = EventDraft::builder()
        .author_id("u2")
        .author_name("Mara")
        .city_id("city-a")
        .name("Block Party")
        .date(at_minute(60 * 24))
        .build();

    let event = deps(store.clone()).publisher().create_event(draft).await.unwrap();

    assert!(event.keywords.contains(&"bloc".to_string()));
    assert!(event.keywords.contains(&"mar".to_string()));
    assert_eq!(store.inner.count(collections::EVENTS), 1);
}
