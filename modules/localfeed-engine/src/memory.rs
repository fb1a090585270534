//! In-memory implementations of the store boundaries.
//!
//! `MemoryDocumentStore` evaluates queries with the hosted store's semantics
//! and limits, so chunking and merge logic behave the same against it as in
//! production. Commits apply to a copy and swap it in only when every write
//! succeeded.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use localfeed_common::{LocalEngagementRecord, RecordKey};
use serde_json::{Map, Value};

use crate::store::{
    Direction, Document, DocumentStore, Filter, LocalRecordStore, Query, Write,
    MAX_MEMBERSHIP_VALUES,
};

type Collections = HashMap<String, BTreeMap<String, Value>>;

// ---------------------------------------------------------------------------
// MemoryDocumentStore
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryDocumentStore {
    collections: Mutex<Collections>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document directly, bypassing commit.
    pub fn insert(&self, collection: &str, doc: Document) {
        self.lock()
            .entry(collection.to_string())
            .or_default()
            .insert(doc.id, doc.fields);
    }

    pub fn get_now(&self, collection: &str, id: &str) -> Option<Document> {
        self.lock()
            .get(collection)
            .and_then(|c| c.get(id))
            .map(|fields| Document::new(id, fields.clone()))
    }

    pub fn count(&self, collection: &str) -> usize {
        self.lock().get(collection).map_or(0, BTreeMap::len)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Collections> {
        self.collections.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        Ok(self.get_now(collection, id))
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        validate_query(query)?;

        let collections = self.lock();
        let Some(docs) = collections.get(&query.collection) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<Document> = docs
            .iter()
            .filter(|(_, fields)| query.filters.iter().all(|f| matches_filter(fields, f)))
            .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
            .collect();

        if let Some((field, direction)) = &query.order_by {
            hits.sort_by(|a, b| {
                let ord = compare_values(a.get(field), b.get(field));
                match direction {
                    Direction::Asc => ord,
                    Direction::Desc => ord.reverse(),
                }
            });
        }
        if let Some(limit) = query.limit {
            hits.truncate(limit);
        }
        Ok(hits)
    }

    async fn commit(&self, writes: Vec<Write>) -> Result<()> {
        let mut collections = self.lock();
        let mut staged = collections.clone();
        for write in &writes {
            apply_write(&mut staged, write)?;
        }
        *collections = staged;
        Ok(())
    }
}

fn validate_query(query: &Query) -> Result<()> {
    for filter in &query.filters {
        if let Some(values) = filter.membership_values() {
            if values.is_empty() {
                bail!("membership filter on {} needs at least one value", query.collection);
            }
            if values.len() > MAX_MEMBERSHIP_VALUES {
                bail!(
                    "membership filter on {} has {} values, limit is {MAX_MEMBERSHIP_VALUES}",
                    query.collection,
                    values.len()
                );
            }
        }
    }
    Ok(())
}

fn matches_filter(fields: &Value, filter: &Filter) -> bool {
    match filter {
        Filter::Eq { field, value } => match fields.get(field) {
            Some(actual) => actual == value,
            None => value.is_null(),
        },
        Filter::In { field, values } => fields
            .get(field)
            .is_some_and(|actual| values.contains(actual)),
        Filter::ArrayContainsAny { field, values } => fields
            .get(field)
            .and_then(Value::as_array)
            .is_some_and(|items| items.iter().any(|i| values.contains(i))),
    }
}

/// Absent and null sort first, then booleans, numbers, strings.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.total_cmp(&y)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn apply_write(collections: &mut Collections, write: &Write) -> Result<()> {
    let docs = collections.entry(write.collection().to_string()).or_default();
    match write {
        Write::Set { id, fields, .. } => {
            docs.insert(id.clone(), fields.clone());
        }
        Write::Merge { id, fields, .. } => {
            let doc = docs
                .entry(id.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            merge_fields(doc, fields)?;
        }
        Write::Increment { collection, id, field, by } => {
            let doc = docs
                .get_mut(id)
                .ok_or_else(|| anyhow!("no document {collection}/{id} to increment"))?;
            increment_field(doc, field, *by)?;
        }
        Write::Upsert { id, defaults, increments, .. } => {
            let doc = docs.entry(id.clone()).or_insert_with(|| defaults.clone());
            for (field, by) in increments {
                increment_field(doc, field, *by)?;
            }
        }
        Write::Delete { id, .. } => {
            docs.remove(id);
        }
    }
    Ok(())
}

fn merge_fields(doc: &mut Value, fields: &Value) -> Result<()> {
    let (Value::Object(target), Value::Object(source)) = (doc, fields) else {
        bail!("merge requires object documents");
    };
    for (k, v) in source {
        target.insert(k.clone(), v.clone());
    }
    Ok(())
}

fn increment_field(doc: &mut Value, field: &str, by: i64) -> Result<()> {
    let Value::Object(map) = doc else {
        bail!("increment requires an object document");
    };
    let current = map.get(field).and_then(Value::as_i64).unwrap_or(0);
    map.insert(field.to_string(), Value::from(current + by));
    Ok(())
}

// ---------------------------------------------------------------------------
// MemoryRecordStore
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<BTreeMap<String, LocalEngagementRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, LocalEngagementRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LocalRecordStore for MemoryRecordStore {
    async fn put(&self, record: &LocalEngagementRecord) -> Result<()> {
        self.lock().insert(record.key().to_string(), record.clone());
        Ok(())
    }

    async fn get(&self, key: &RecordKey) -> Result<Option<LocalEngagementRecord>> {
        Ok(self.lock().get(&key.to_string()).cloned())
    }

    async fn delete(&self, key: &RecordKey) -> Result<()> {
        self.lock().remove(&key.to_string());
        Ok(())
    }

    async fn all(&self) -> Result<Vec<LocalEngagementRecord>> {
        Ok(self.lock().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded() -> MemoryDocumentStore {
        let store = MemoryDocumentStore::new();
        store.insert("posts", Document::new("p1", json!({"city_ids": ["a", "b"], "upvotes": 3, "parent": null})));
        store.insert("posts", Document::new("p2", json!({"city_ids": ["c"], "upvotes": 9})));
        store.insert("posts", Document::new("p3", json!({"city_ids": ["b"], "upvotes": 3})));
        store
    }

    #[tokio::test]
    async fn array_contains_any_with_order_and_limit() {
        let store = seeded();
        let q = Query::collection("posts")
            .filter(Filter::ArrayContainsAny {
                field: "city_ids".into(),
                values: vec![json!("b"), json!("c")],
            })
            .order_by("upvotes", Direction::Desc)
            .limit(2);
        let ids: Vec<String> = store.query(&q).await.unwrap().into_iter().map(|d| d.id).collect();
        // Ties keep id order.
        assert_eq!(ids, vec!["p2", "p1"]);
    }

    #[tokio::test]
    async fn null_equality_matches_absent_fields() {
        let store = seeded();
        let q = Query::collection("posts").is_null("parent");
        assert_eq!(store.query(&q).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn more_than_ten_membership_values_is_rejected() {
        let store = seeded();
        let values = (0..11).map(|i| json!(format!("c{i}"))).collect();
        let q = Query::collection("posts").filter(Filter::In {
            field: "city_id".into(),
            values,
        });
        assert!(store.query(&q).await.is_err());
    }

    #[tokio::test]
    async fn failed_commit_leaves_no_partial_writes() {
        let store = seeded();
        let result = store
            .commit(vec![
                Write::increment("posts", "p1", "upvotes", 1),
                Write::increment("posts", "missing", "upvotes", 1),
            ])
            .await;
        assert!(result.is_err());
        assert_eq!(store.get_now("posts", "p1").unwrap().counter("upvotes"), 3);
    }

    #[tokio::test]
    async fn upsert_creates_then_increments() {
        let store = MemoryDocumentStore::new();
        let upsert = Write::Upsert {
            collection: "weekly_stats".into(),
            id: "p1_2026-W42".into(),
            defaults: json!({"upvotes": 0, "downvotes": 0}),
            increments: vec![("upvotes".into(), 1)],
        };
        store.commit(vec![upsert.clone(), upsert]).await.unwrap();
        let doc = store.get_now("weekly_stats", "p1_2026-W42").unwrap();
        assert_eq!(doc.counter("upvotes"), 2);
        assert_eq!(doc.counter("downvotes"), 0);
    }

    #[tokio::test]
    async fn merge_creates_missing_document() {
        let store = MemoryDocumentStore::new();
        store
            .commit(vec![Write::merge("comments", "c1", json!({"has_children": true}))])
            .await
            .unwrap();
        assert_eq!(
            store.get_now("comments", "c1").unwrap().get("has_children"),
            Some(&json!(true))
        );
    }

    #[tokio::test]
    async fn record_store_put_get_delete() {
        let store = MemoryRecordStore::new();
        let record = LocalEngagementRecord::PollChoice {
            poll_id: "poll".into(),
            option_id: "a".into(),
        };
        store.put(&record).await.unwrap();
        assert_eq!(store.get(&record.key()).await.unwrap(), Some(record.clone()));
        store.delete(&record.key()).await.unwrap();
        assert!(store.all().await.unwrap().is_empty());
    }
}
