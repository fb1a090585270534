//! Shared dependency container.
//!
//! Holds the injected collaborators and config. Stateless components are
//! constructed from it on demand, so tests swap in fakes by building a
//! different `FeedDeps`. The range resolver and the engagement store own
//! locks and in-memory state, so every handle (and every clone of the deps)
//! shares one instance of each.

use std::sync::{Arc, OnceLock};

use localfeed_common::{FeedConfig, PrefixKeywordIndex, TextSearchIndex};
use localfeed_geo::{GeoIndex, RangeResolver, RangeStateStore};
use typed_builder::TypedBuilder;

use crate::aggregator::ContentAggregator;
use crate::batch::BatchedQueryClient;
use crate::comments::{Chronological, CommentOrdering, CommentThread, CommentTree};
use crate::engagement::EngagementStateStore;
use crate::publish::{AllowAll, Publisher, TextClassifier};
use crate::search::SearchSession;
use crate::store::{DocumentStore, LocalRecordStore};

#[derive(Clone, TypedBuilder)]
pub struct FeedDeps {
    pub documents: Arc<dyn DocumentStore>,
    pub records: Arc<dyn LocalRecordStore>,
    pub range_store: Arc<dyn RangeStateStore>,
    pub catalog: Arc<GeoIndex>,
    #[builder(setter(into))]
    pub user_id: String,
    #[builder(default)]
    pub config: FeedConfig,
    #[builder(default = Arc::new(PrefixKeywordIndex) as Arc<dyn TextSearchIndex>)]
    pub search_index: Arc<dyn TextSearchIndex>,
    #[builder(default = Arc::new(AllowAll) as Arc<dyn TextClassifier>)]
    pub classifier: Arc<dyn TextClassifier>,
    #[builder(default = Arc::new(Chronological) as Arc<dyn CommentOrdering>)]
    pub comment_ordering: Arc<dyn CommentOrdering>,
    #[builder(default, setter(skip))]
    range_resolver: Arc<OnceLock<Arc<RangeResolver>>>,
    #[builder(default, setter(skip))]
    engagement: Arc<OnceLock<Arc<EngagementStateStore>>>,
}

impl FeedDeps {
    pub fn range_resolver(&self) -> Arc<RangeResolver> {
        self.range_resolver
            .get_or_init(|| {
                Arc::new(RangeResolver::new(
                    self.catalog.clone(),
                    self.range_store.clone(),
                    &self.config,
                ))
            })
            .clone()
    }

    pub fn batched_client(&self) -> BatchedQueryClient {
        BatchedQueryClient::new(self.documents.clone(), &self.config)
    }

    pub fn aggregator(&self) -> ContentAggregator {
        ContentAggregator::new(
            self.documents.clone(),
            self.catalog.clone(),
            self.search_index.clone(),
            self.config.clone(),
        )
    }

    pub fn publisher(&self) -> Publisher {
        Publisher::new(self.documents.clone(), self.search_index.clone(), self.classifier.clone())
    }

    /// Engagement state for `user_id`. Call `load()` once before first use.
    pub fn engagement(&self) -> Arc<EngagementStateStore> {
        self.engagement
            .get_or_init(|| {
                Arc::new(EngagementStateStore::new(
                    self.user_id.clone(),
                    self.documents.clone(),
                    self.records.clone(),
                ))
            })
            .clone()
    }

    pub fn comment_tree(&self) -> CommentTree {
        CommentTree::new(
            self.documents.clone(),
            &self.config,
            self.comment_ordering.clone(),
            self.classifier.clone(),
        )
    }

    pub fn comment_thread(&self, content_id: &str) -> CommentThread {
        CommentThread::new(Arc::new(self.comment_tree()), content_id)
    }

    pub fn search_session(&self, aggregator: Arc<ContentAggregator>, city_ids: Vec<String>) -> SearchSession {
        SearchSession::new(aggregator, city_ids, self.config.search_debounce)
    }
}
