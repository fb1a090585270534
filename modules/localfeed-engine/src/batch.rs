//! BatchedQueryClient: membership queries over arbitrarily many values.
//!
//! The hosted store accepts at most `MAX_MEMBERSHIP_VALUES` values per
//! membership filter, so a value list is split into chunks, one query is
//! issued per chunk and the results are merged without duplicate ids.
//! Any failed chunk fails the whole call: a partial list would silently
//! under-report nearby content.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use localfeed_common::{FeedConfig, FeedError};
use serde_json::Value;
use tracing::{debug, warn};

use crate::store::{Document, DocumentStore, Filter, Query, MAX_MEMBERSHIP_VALUES};

/// How the membership field is shaped on the documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    /// Scalar field, value is one of the chunk.
    Scalar,
    /// Array field, shares at least one element with the chunk.
    Array,
}

/// How to resolve the same document id returned by several chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeRule {
    KeepFirst,
    /// Keep the instance with the larger integer value of `field`. Chunks can
    /// observe the same document at different moments.
    KeepMax { field: String },
}

pub struct BatchedQueryClient {
    store: Arc<dyn DocumentStore>,
    batch_size: usize,
    concurrency: usize,
}

impl BatchedQueryClient {
    pub fn new(store: Arc<dyn DocumentStore>, config: &FeedConfig) -> Self {
        Self {
            store,
            batch_size: config.membership_batch_size.clamp(1, MAX_MEMBERSHIP_VALUES),
            concurrency: config.chunk_concurrency.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of chunk queries issued for `n` distinct values.
    pub fn chunk_count(&self, n: usize) -> usize {
        n.div_ceil(self.batch_size)
    }

    /// Run `base` once per chunk of `values` with a membership filter on
    /// `field` added, and merge the results. Duplicate input values are
    /// dropped before chunking. `base` carries any other filters plus the
    /// per-chunk ordering and limit.
    pub async fn fetch_by_membership(
        &self,
        base: &Query,
        field: &str,
        membership: Membership,
        values: &[String],
        merge: &MergeRule,
    ) -> Result<Vec<Document>, FeedError> {
        let mut seen = HashSet::new();
        let distinct: Vec<&String> = values.iter().filter(|v| seen.insert(v.as_str())).collect();
        if distinct.is_empty() {
            return Ok(Vec::new());
        }

        let chunks: Vec<&[&String]> = distinct.chunks(self.batch_size).collect();
        let total = chunks.len();
        debug!(
            collection = base.collection.as_str(),
            field,
            values = distinct.len(),
            chunks = total,
            "Batched membership query"
        );

        let store = &self.store;
        let per_chunk: Vec<Vec<Document>> = stream::iter(chunks.into_iter().enumerate().map(|(i, chunk)| {
            let query = with_membership(base, field, membership, chunk);
            async move {
                store.query(&query).await.map_err(|source| {
                    warn!(
                        collection = query.collection.as_str(),
                        chunk = i + 1,
                        chunks = total,
                        error = %source,
                        "Chunk query failed, failing batched call"
                    );
                    FeedError::PartialCoverage {
                        chunk: i + 1,
                        chunks: total,
                        source,
                    }
                })
            }
        }))
        .buffered(self.concurrency)
        .try_collect()
        .await?;

        Ok(merge_documents(per_chunk.into_iter().flatten(), merge))
    }
}

fn with_membership(base: &Query, field: &str, membership: Membership, chunk: &[&String]) -> Query {
    let values: Vec<Value> = chunk.iter().map(|v| Value::String((*v).clone())).collect();
    let filter = match membership {
        Membership::Scalar => Filter::In {
            field: field.to_string(),
            values,
        },
        Membership::Array => Filter::ArrayContainsAny {
            field: field.to_string(),
            values,
        },
    };
    base.clone().filter(filter)
}

/// Merge documents from several chunks into a list with unique ids. Order
/// follows first appearance.
pub fn merge_documents(docs: impl IntoIterator<Item = Document>, rule: &MergeRule) -> Vec<Document> {
    let mut out: Vec<Document> = Vec::new();
    let mut position: HashMap<String, usize> = HashMap::new();

    for doc in docs {
        match position.get(&doc.id) {
            None => {
                position.insert(doc.id.clone(), out.len());
                out.push(doc);
            }
            Some(&i) => {
                if let MergeRule::KeepMax { field } = rule {
                    if doc.counter(field) > out[i].counter(field) {
                        out[i] = doc;
                    }
                }
            }
        }
    }
    out
}
