pub mod config;
pub mod error;
pub mod keywords;
pub mod types;

pub use config::FeedConfig;
pub use error::FeedError;
pub use keywords::{prefix_keywords, PrefixKeywordIndex, TextSearchIndex};
pub use types::*;
