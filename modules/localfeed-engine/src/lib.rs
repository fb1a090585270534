//! Nearby feeds, leaderboards, engagement and comment threads over a hosted
//! document store.

pub mod aggregator;
pub mod batch;
pub mod comments;
pub mod deps;
pub mod engagement;
pub mod locks;
pub mod memory;
pub mod publish;
pub mod search;
pub mod store;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use aggregator::{rank_by, ContentAggregator};
pub use batch::{merge_documents, BatchedQueryClient, Membership, MergeRule};
pub use comments::{
    Chronological, CommentNode, CommentOrdering, CommentThread, CommentTree, ContentKind, NewComment,
    WeightedScore,
};
pub use deps::FeedDeps;
pub use engagement::{EngagementEvent, EngagementStateStore, VoteOutcome, VoteTarget};
pub use locks::EntityLocks;
pub use memory::{MemoryDocumentStore, MemoryRecordStore};
pub use publish::{AllowAll, EventDraft, PollDraft, PostDraft, Publisher, TextClassifier};
pub use search::SearchSession;
pub use store::{
    collections, Direction, Document, DocumentStore, Filter, LocalRecordStore, Query, Write,
    MAX_MEMBERSHIP_VALUES,
};
