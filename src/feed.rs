//! Data-provider seam for payload-producing task handlers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One item returned by a feed query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedItem {
    pub title: String,
    pub snippet: String,
    pub link: String,
}

/// External data provider consumed by the built-in task handlers.
///
/// Failures are the provider's concern; an empty result set is the only
/// failure mode visible here.
#[async_trait]
pub trait Feed: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Vec<FeedItem>;
}
