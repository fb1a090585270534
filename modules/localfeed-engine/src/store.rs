// Trait abstractions for the hosted document database and the on-device
// record store.
//
// DocumentStore covers exactly what the hosted store offers: get by id,
// filtered/ordered/limited queries with at most 10 values per membership
// filter, and atomic multi-document commits.
// LocalRecordStore holds the user's own votes, poll choices and saves.

use anyhow::Result;
use async_trait::async_trait;
use localfeed_common::{LocalEngagementRecord, RecordKey};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Hosted limit on values in one `In` / `ArrayContainsAny` filter.
pub const MAX_MEMBERSHIP_VALUES: usize = 10;

pub mod collections {
    pub const POSTS: &str = "posts";
    pub const EVENTS: &str = "events";
    pub const WEEKLY_STATS: &str = "weekly_stats";
    pub const VOTES: &str = "votes";
    pub const COMMENTS: &str = "comments";
    pub const POLLS: &str = "polls";
    pub const POLL_OPTIONS: &str = "poll_options";
    pub const POLL_VOTES: &str = "poll_votes";
}

// ---------------------------------------------------------------------------
// Documents and queries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Value,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Value) -> Self {
        Self { id: id.into(), fields }
    }

    pub fn from_typed<T: Serialize>(id: impl Into<String>, value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(id, serde_json::to_value(value)?))
    }

    /// Decode into a typed model. The document id fills an absent `id` field.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let mut fields = self.fields.clone();
        if let Value::Object(map) = &mut fields {
            map.entry("id").or_insert_with(|| Value::String(self.id.clone()));
        }
        serde_json::from_value(fields)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Integer counter value; absent or non-numeric reads as 0.
    pub fn counter(&self, field: &str) -> i64 {
        self.get(field).and_then(Value::as_i64).unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Field equals value. `Value::Null` also matches an absent field.
    Eq { field: String, value: Value },
    /// Scalar field is one of `values`.
    In { field: String, values: Vec<Value> },
    /// Array field shares at least one element with `values`.
    ArrayContainsAny { field: String, values: Vec<Value> },
}

impl Filter {
    pub fn membership_values(&self) -> Option<&[Value]> {
        match self {
            Filter::In { values, .. } | Filter::ArrayContainsAny { values, .. } => Some(values),
            Filter::Eq { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(name: &str) -> Self {
        Self {
            collection: name.to_string(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq {
            field: field.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn is_null(self, field: &str) -> Self {
        self.eq(field, Value::Null)
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some((field.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn maybe_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// All values across the membership filters of this query.
    pub fn membership_values(&self) -> impl Iterator<Item = &Value> {
        self.filters
            .iter()
            .filter_map(Filter::membership_values)
            .flatten()
    }
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Create or replace.
    Set { collection: String, id: String, fields: Value },
    /// Merge top-level fields, creating the document if absent.
    Merge { collection: String, id: String, fields: Value },
    /// Add `by` to a numeric field. Fails the commit if the document is absent.
    Increment { collection: String, id: String, field: String, by: i64 },
    /// Create from `defaults` if absent, then apply each increment.
    Upsert {
        collection: String,
        id: String,
        defaults: Value,
        increments: Vec<(String, i64)>,
    },
    Delete { collection: String, id: String },
}

impl Write {
    pub fn set<T: Serialize>(collection: &str, id: &str, value: &T) -> Result<Self, serde_json::Error> {
        Ok(Write::Set {
            collection: collection.to_string(),
            id: id.to_string(),
            fields: serde_json::to_value(value)?,
        })
    }

    pub fn merge(collection: &str, id: &str, fields: Value) -> Self {
        Write::Merge {
            collection: collection.to_string(),
            id: id.to_string(),
            fields,
        }
    }

    pub fn increment(collection: &str, id: &str, field: &str, by: i64) -> Self {
        Write::Increment {
            collection: collection.to_string(),
            id: id.to_string(),
            field: field.to_string(),
            by,
        }
    }

    pub fn delete(collection: &str, id: &str) -> Self {
        Write::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    pub fn collection(&self) -> &str {
        match self {
            Write::Set { collection, .. }
            | Write::Merge { collection, .. }
            | Write::Increment { collection, .. }
            | Write::Upsert { collection, .. }
            | Write::Delete { collection, .. } => collection,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Write::Set { id, .. }
            | Write::Merge { id, .. }
            | Write::Increment { id, .. }
            | Write::Upsert { id, .. }
            | Write::Delete { id, .. } => id,
        }
    }
}

// ---------------------------------------------------------------------------
// DocumentStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    /// Run a query. Membership filters with more than
    /// `MAX_MEMBERSHIP_VALUES` values are rejected.
    async fn query(&self, query: &Query) -> Result<Vec<Document>>;

    /// Apply all writes atomically: every write lands or none does.
    async fn commit(&self, writes: Vec<Write>) -> Result<()>;
}

// ---------------------------------------------------------------------------
// LocalRecordStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait LocalRecordStore: Send + Sync {
    /// Create or replace the record under its key.
    async fn put(&self, record: &LocalEngagementRecord) -> Result<()>;

    async fn get(&self, key: &RecordKey) -> Result<Option<LocalEngagementRecord>>;

    async fn delete(&self, key: &RecordKey) -> Result<()>;

    async fn all(&self) -> Result<Vec<LocalEngagementRecord>>;
}
