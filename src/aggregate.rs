//! Fan-out search aggregation engine.
//!
//! [`SearchEngine::search`] is the system's core contract: given a name
//! query and optional source/account filters it queries every enabled
//! provider concurrently, merges the per-provider lists in a fixed order,
//! deduplicates overlapping hits, ranks, and truncates.
//!
//! # Merge order
//!
//! Dedupe is first-occurrence-wins, so the merge order is fixed and
//! documented: providers in `local`, `google`, `microsoft` order; within
//! a provider, accounts in config order; within an account, sub-sources
//! in the connector's declared order (drive then gmail; onedrive,
//! sharepoint, outlook). Completion order of the concurrent tasks never
//! leaks into the output — `join_all` yields results in input order and
//! the final ordering is purely a function of the ranking step.
//!
//! # Failure policy
//!
//! A slow or failing provider cannot block or fail the others: provider
//! tasks are spawned, bounded by the per-request timeout inside each
//! connector, and a task that panics contributes an empty list. The one
//! exception is a credential-store failure, which aborts the search —
//! see [`SearchError`].

use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

use crate::config::Config;
use crate::connector::SourceConnector;
use crate::connector_google::GoogleConnector;
use crate::connector_local::LocalConnector;
use crate::connector_microsoft::MicrosoftConnector;
use crate::models::{Provider, SearchResult, Source};
use crate::store::{CredentialStore, StoreError};
use crate::token::TokenManager;

/// Neutral ranking score for a result whose title does not match the
/// query and whose connector supplied no relevance of its own.
const DEFAULT_SCORE: f64 = 0.6;
/// Ranking penalty per year of age. Light, so relevance dominates
/// recency but near-ties break toward newer items.
const RECENCY_WEIGHT: f64 = 0.02;
/// Age cap for the recency penalty; unknown `modified` ranks here.
const MAX_AGE_YEARS: f64 = 5.0;
const MS_PER_YEAR: f64 = 365.25 * 24.0 * 3600.0 * 1000.0;

/// All source tags, used to validate filter entries.
const ALL_SOURCES: &[Source] = &[
    Source::Local,
    Source::GoogleDrive,
    Source::GmailAttachment,
    Source::MicrosoftOneDrive,
    Source::MicrosoftSharePoint,
    Source::MicrosoftTeams,
    Source::MicrosoftOutlookAttachment,
];

/// Search failure taxonomy visible to callers: bad input versus a broken
/// credential store. Downstream provider failures never surface here —
/// they degrade to missing results.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Optional source/account scoping for one search call. Empty lists mean
/// "everything configured".
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Provider families (`google`) or exact source tags
    /// (`gmail-attachment`), interchangeable.
    pub sources: Vec<String>,
    /// Bare account aliases; `provider:alias` entries are normalized to
    /// the bare alias at parse time.
    pub accounts: Vec<String>,
}

impl SearchFilter {
    /// Parse the comma-separated `sources` / `accounts` query parameters.
    pub fn parse(sources: Option<&str>, accounts: Option<&str>) -> Self {
        let split = |s: Option<&str>| -> Vec<String> {
            s.map(|s| {
                s.split(',')
                    .map(|part| part.trim().to_string())
                    .filter(|part| !part.is_empty())
                    .collect()
            })
            .unwrap_or_default()
        };

        let accounts = split(accounts)
            .into_iter()
            .map(|entry| match entry.split_once(':') {
                // `provider:alias` form; keep the bare alias.
                Some((prefix, alias)) if prefix.parse::<Provider>().is_ok() => alias.to_string(),
                _ => entry,
            })
            .collect();

        Self {
            sources: split(sources),
            accounts,
        }
    }

    /// The provider family a source-filter entry selects, if the entry
    /// is valid: either a coarse provider name or a fine-grained tag.
    fn entry_family(entry: &str) -> Option<Provider> {
        if let Ok(provider) = entry.parse::<Provider>() {
            return Some(provider);
        }
        ALL_SOURCES
            .iter()
            .find(|s| s.as_str() == entry)
            .map(|s| s.family())
    }

    /// Whether this filter selects the given provider. An empty source
    /// list selects all providers.
    fn selects_provider(&self, provider: Provider) -> bool {
        self.sources.is_empty()
            || self
                .sources
                .iter()
                .any(|entry| Self::entry_family(entry) == Some(provider))
    }

    /// Post-merge source match, stricter than the family gating: a
    /// fine-grained entry (`gmail-attachment`) matches only its exact
    /// tag, while a coarse provider name (`google`) still passes the
    /// whole family — by now every result carries its precise tag, so
    /// fine entries can discriminate between a provider's sub-sources.
    fn matches_source(&self, source: Source) -> bool {
        self.sources.is_empty()
            || self.sources.iter().any(|entry| {
                entry == source.as_str()
                    || entry.parse::<Provider>().ok() == Some(source.family())
            })
    }

    fn matches_account(&self, alias: &str) -> bool {
        self.accounts.is_empty() || self.accounts.iter().any(|a| a == alias)
    }
}

pub struct SearchEngine {
    config: Arc<Config>,
    tokens: Arc<TokenManager>,
    /// Fixed merge order: local, google, microsoft.
    connectors: Vec<Arc<dyn SourceConnector>>,
}

impl SearchEngine {
    /// Build the standard three-connector engine from config, wiring the
    /// shared HTTP client (bounded by the configured timeout) and token
    /// manager through every connector.
    pub fn from_config(
        config: Arc<Config>,
        store: Arc<dyn CredentialStore>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.search.request_timeout_secs))
            .build()?;
        let tokens = Arc::new(TokenManager::new(store, client.clone()));

        let connectors: Vec<Arc<dyn SourceConnector>> = vec![
            Arc::new(LocalConnector::new(config.local.clone(), &config.search)),
            Arc::new(GoogleConnector::new(
                config.accounts(Provider::Google),
                tokens.clone(),
                client.clone(),
            )),
            Arc::new(MicrosoftConnector::new(
                config.accounts(Provider::Microsoft),
                tokens.clone(),
                client,
            )),
        ];

        Ok(Self::new(config, tokens, connectors))
    }

    /// Explicit-injection constructor; tests swap in stub connectors.
    pub fn new(
        config: Arc<Config>,
        tokens: Arc<TokenManager>,
        connectors: Vec<Arc<dyn SourceConnector>>,
    ) -> Self {
        Self {
            config,
            tokens,
            connectors,
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn token_manager(&self) -> Arc<TokenManager> {
        self.tokens.clone()
    }

    /// Run one fan-out search. Stateless and idempotent apart from the
    /// token refreshes it may trigger along the way.
    pub async fn search(
        &self,
        query: &str,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchResult>, SearchError> {
        self.validate_filter(filter)?;

        // Step 1: family-based provider gating.
        let active: Vec<Arc<dyn SourceConnector>> = self
            .connectors
            .iter()
            .filter(|c| {
                self.config.provider_enabled(c.provider()) && filter.selects_provider(c.provider())
            })
            .cloned()
            .collect();

        // Step 2: one concurrent task per enabled provider. Spawning
        // isolates panics (defense in depth against connector bugs);
        // join_all keeps the results in connector order.
        let tasks = active.iter().map(|connector| {
            let connector = connector.clone();
            let query = query.to_string();
            tokio::spawn(async move { connector.search(&query).await })
        });

        // Step 3: concatenate in the fixed merge order.
        let mut merged: Vec<SearchResult> = Vec::new();
        for (connector, joined) in active.iter().zip(join_all(tasks).await) {
            match joined {
                Ok(Ok(results)) => merged.extend(results),
                Ok(Err(store_err)) => return Err(store_err.into()),
                Err(join_err) => {
                    error!(
                        provider = %connector.provider(),
                        error = %join_err,
                        "provider search task panicked; contributing no results"
                    );
                }
            }
        }

        // Steps 4–5: account filter, then the stricter exact-tag filter.
        merged.retain(|r| filter.matches_account(&r.account));
        merged.retain(|r| filter.matches_source(r.source));

        // Step 6: dedupe.
        let mut results = dedupe(merged);

        // Step 7: rank ascending (lower = better) and truncate.
        let now_ms = chrono::Utc::now().timestamp_millis();
        let query_lower = query.trim().to_lowercase();
        results.sort_by(|a, b| {
            rank_score(a, &query_lower, now_ms)
                .partial_cmp(&rank_score(b, &query_lower, now_ms))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.modified.unwrap_or(i64::MIN).cmp(&a.modified.unwrap_or(i64::MIN)))
                .then_with(|| a.id.cmp(&b.id))
        });
        results.truncate(self.config.search.result_limit);

        Ok(results)
    }

    /// Reject unknown source entries and unconfigured aliases before any
    /// fan-out happens — these are client errors, not degradations.
    fn validate_filter(&self, filter: &SearchFilter) -> Result<(), SearchError> {
        for entry in &filter.sources {
            if SearchFilter::entry_family(entry).is_none() {
                return Err(SearchError::BadRequest(format!(
                    "unknown source filter entry: '{}'",
                    entry
                )));
            }
        }

        let known: HashSet<String> = self
            .config
            .all_accounts()
            .into_iter()
            .map(|a| a.alias)
            .chain(std::iter::once("local".to_string()))
            .collect();
        for alias in &filter.accounts {
            if !known.contains(alias) {
                return Err(SearchError::BadRequest(format!(
                    "unknown account alias: '{}'",
                    alias
                )));
            }
        }

        Ok(())
    }
}

/// First-occurrence-wins dedupe over the fixed merge order.
///
/// Key is `source:id`; a result with an empty id falls back to
/// `title:size:modified`, a documented approximation that can collide
/// for same-named, same-sized items of unknown age.
pub fn dedupe(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(results.len());

    for result in results {
        if seen.insert(dedupe_key(&result)) {
            out.push(result);
        }
    }
    out
}

fn dedupe_key(result: &SearchResult) -> String {
    if result.id.is_empty() {
        format!(
            "{}:{}:{}",
            result.title,
            result.size.map_or(String::new(), |s| s.to_string()),
            result.modified.map_or(String::new(), |m| m.to_string()),
        )
    } else {
        format!("{}:{}", result.source, result.id)
    }
}

/// Composite ranking score; lower is better.
///
/// Title relevance dominates: an exact case-insensitive match is 0.0, a
/// substring match 0.2, anything else falls back to the connector's own
/// relevance or the neutral default. A light age penalty (capped at five
/// years; unknown age counts as the cap) breaks near-ties toward newer
/// items. With an empty query the title terms are skipped entirely.
fn rank_score(result: &SearchResult, query_lower: &str, now_ms: i64) -> f64 {
    let base = if query_lower.is_empty() {
        result.score.unwrap_or(DEFAULT_SCORE)
    } else {
        let title_lower = result.title.to_lowercase();
        if title_lower == query_lower {
            0.0
        } else if title_lower.contains(query_lower) {
            0.2
        } else {
            result.score.unwrap_or(DEFAULT_SCORE)
        }
    };

    let age_years = match result.modified {
        Some(modified) => ((now_ms - modified).max(0) as f64) / MS_PER_YEAR,
        None => MAX_AGE_YEARS,
    };

    base + RECENCY_WEIGHT * age_years.min(MAX_AGE_YEARS)
}
