use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedError {
    /// A fetch or mutation against the document store failed. Safe to retry
    /// by re-invoking the same operation.
    #[error("Remote error: {0}")]
    Remote(#[source] anyhow::Error),

    /// One chunk of a batched membership query failed, so the aggregate
    /// result would under-report nearby content.
    #[error("Partial coverage: chunk {chunk} of {chunks} failed: {source}")]
    PartialCoverage {
        chunk: usize,
        chunks: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("City catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("Location unavailable: {0}")]
    LocationUnavailable(String),

    #[error("Location permission denied")]
    LocationDenied,

    #[error("Content rejected: {0}")]
    Rejected(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl FeedError {
    /// Whether re-invoking the failed operation can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FeedError::Remote(_) | FeedError::PartialCoverage { .. })
    }
}
