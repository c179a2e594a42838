//! The source connector seam.
//!
//! Each provider (local filesystem, Google, Microsoft) is one
//! [`SourceConnector`]: a single `search` operation that fans out over the
//! provider's own configured accounts and returns normalized
//! [`SearchResult`]s.
//!
//! # Failure contract
//!
//! A connector never lets one account's failure abort the overall search:
//! API errors, timeouts, and missing authentication are caught inside and
//! degrade to an empty per-account list plus a log line. An account whose
//! token lookup comes back `None` is skipped without any network call.
//! The single exception is [`StoreError`] — a broken credential store
//! propagates, because no search can meaningfully proceed without token
//! resolution.

use async_trait::async_trait;

use crate::models::{Provider, SearchResult};
use crate::store::StoreError;

#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// The provider family this connector serves.
    fn provider(&self) -> Provider;

    /// Search all of this provider's configured accounts by name.
    ///
    /// An empty `query` means browse mode. The returned list preserves
    /// the connector's fixed internal merge order (account config order,
    /// then sub-source order) — the aggregator's first-wins dedupe
    /// depends on it being deterministic.
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, StoreError>;
}
