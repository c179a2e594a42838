use anyhow::Result;
use std::sync::Arc;

use crate::aggregate::{SearchEngine, SearchFilter};
use crate::config::Config;
use crate::store::FileStore;

/// `scout search` — run one fan-out search and print the results, one
/// per line: source, title, ISO-8601 modified (or `-`), and the item's
/// path or URL, tab-separated.
pub async fn run_search(
    config: &Config,
    query: &str,
    sources: Option<String>,
    accounts: Option<String>,
    limit: Option<usize>,
) -> Result<()> {
    let mut config = config.clone();
    if let Some(limit) = limit {
        config.search.result_limit = limit;
    }

    let store = Arc::new(FileStore::new(config.credentials.path.clone()));
    let engine = SearchEngine::from_config(Arc::new(config), store)?;

    let filter = SearchFilter::parse(sources.as_deref(), accounts.as_deref());
    let results = engine.search(query, &filter).await?;

    if results.is_empty() {
        println!("No matches");
        return Ok(());
    }

    for result in &results {
        println!(
            "{}\t{}\t{}\t{}",
            result.source,
            result.title,
            result.modified_iso(),
            result.url.as_deref().unwrap_or("-"),
        );
    }

    Ok(())
}
