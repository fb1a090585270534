//! Chunked membership queries against the recording store.

use std::collections::HashSet;
use std::sync::Arc;

use localfeed_common::{FeedConfig, FeedError};
use localfeed_engine::testing::{ids, post, seed_post, RecordingStore};
use localfeed_engine::{
    collections, BatchedQueryClient, Document, Membership, MergeRule, Query, MAX_MEMBERSHIP_VALUES,
};
use serde_json::json;

fn client(store: Arc<RecordingStore>) -> BatchedQueryClient {
    BatchedQueryClient::new(store, &FeedConfig::default())
}

fn posts() -> Query {
    Query::collection(collections::POSTS)
}

#[tokio::test]
async fn document_in_two_chunks_is_returned_once() {
    let store = Arc::new(RecordingStore::new());
    seed_post(&store.inner, &post("shared", &["city-3", "city-17"], 0));
    seed_post(&store.inner, &post("only-25", &["city-25"], 1));
    seed_post(&store.inner, &post("elsewhere", &["city-99"], 2));

    let city_ids = ids("city", 25);
    let docs = client(store.clone())
        .fetch_by_membership(&posts(), "city_ids", Membership::Array, &city_ids, &MergeRule::KeepFirst)
        .await
        .unwrap();

    assert_eq!(store.query_count(), 3);
    let mut got: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
    got.sort();
    assert_eq!(got, vec!["only-25", "shared"]);
}

#[tokio::test]
async fn every_chunk_respects_the_value_limit() {
    let store = Arc::new(RecordingStore::new());
    let city_ids = ids("city", 47);

    client(store.clone())
        .fetch_by_membership(&posts(), "city_ids", Membership::Array, &city_ids, &MergeRule::KeepFirst)
        .await
        .unwrap();

    let queries = store.queries();
    assert_eq!(queries.len(), 5);
    let mut covered = HashSet::new();
    for query in &queries {
        let values: Vec<&str> = query.membership_values().filter_map(|v| v.as_str()).collect();
        assert!(!values.is_empty() && values.len() <= MAX_MEMBERSHIP_VALUES);
        covered.extend(values.into_iter().map(str::to_string));
    }
    assert_eq!(covered.len(), 47);
}

#[tokio::test]
async fn duplicate_inputs_do_not_add_chunks() {
    let store = Arc::new(RecordingStore::new());
    let mut city_ids = ids("city", 10);
    city_ids.extend(ids("city", 10));

    client(store.clone())
        .fetch_by_membership(&posts(), "city_ids", Membership::Array, &city_ids, &MergeRule::KeepFirst)
        .await
        .unwrap();

    assert_eq!(store.query_count(), 1);
}

#[tokio::test]
async fn empty_input_issues_no_queries() {
    let store = Arc::new(RecordingStore::new());
    let docs = client(store.clone())
        .fetch_by_membership(&posts(), "city_ids", Membership::Array, &[], &MergeRule::KeepFirst)
        .await
        .unwrap();

    assert!(docs.is_empty());
    assert_eq!(store.query_count(), 0);
}

#[tokio::test]
async fn one_failed_chunk_fails_the_whole_call() {
    let store = Arc::new(RecordingStore::new());
    seed_post(&store.inner, &post("p1", &["city-1"], 0));
    store.fail_when_membership_contains("city-15");

    let err = client(store)
        .fetch_by_membership(&posts(), "city_ids", Membership::Array, &ids("city", 25), &MergeRule::KeepFirst)
        .await
        .unwrap_err();

    assert!(matches!(err, FeedError::PartialCoverage { chunk: 2, chunks: 3, .. }), "{err}");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn keep_max_prefers_the_fresher_snapshot() {
    let store = Arc::new(RecordingStore::new());
    store.respond_for("city-1", vec![Document::new("p1", json!({ "upvotes": 5 }))]);
    store.respond_for("city-11", vec![Document::new("p1", json!({ "upvotes": 7 }))]);

    let docs = client(store.clone())
        .fetch_by_membership(
            &posts(),
            "city_ids",
            Membership::Array,
            &ids("city", 20),
            &MergeRule::KeepMax {
                field: "upvotes".into(),
            },
        )
        .await
        .unwrap();

    assert_eq!(store.query_count(), 2);
    assert_eq!(docs, vec![Document::new("p1", json!({ "upvotes": 7 }))]);
}

#[tokio::test]
async fn scalar_membership_matches_single_city_field() {
    let store = Arc::new(RecordingStore::new());
    store.inner.insert("events", Document::new("e1", json!({ "city_id": "city-12" })));
    store.inner.insert("events", Document::new("e2", json!({ "city_id": "city-40" })));

    let docs = client(store)
        .fetch_by_membership(
            &Query::collection(collections::EVENTS),
            "city_id",
            Membership::Scalar,
            &ids("city", 15),
            &MergeRule::KeepFirst,
        )
        .await
        .unwrap();

    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].id, "e1");
}
