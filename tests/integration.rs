//! Engine-level integration scenarios, run entirely through the library
//! API: a tempdir stands in for the local filesystem and an in-memory
//! credential store for the token file. No network traffic — cloud
//! accounts in these tests are deliberately unauthenticated, which the
//! connectors must treat as "skip without calling out".

use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use docscout::aggregate::{SearchEngine, SearchError, SearchFilter};
use docscout::config::{AccountConfig, Config};
use docscout::models::{Provider, Source};
use docscout::store::MemoryStore;

fn local_config(root: &Path) -> Config {
    let mut config = Config::minimal();
    config.local.enabled = true;
    config.local.roots = vec![root.to_path_buf()];
    config
}

fn google_account(alias: &str) -> AccountConfig {
    AccountConfig {
        alias: alias.to_string(),
        client_id: "client-id".to_string(),
        client_secret: "client-secret".to_string(),
        tenant_id: "common".to_string(),
        redirect_uri: "http://127.0.0.1:8787/auth/callback".to_string(),
        scopes: vec!["https://www.googleapis.com/auth/drive.readonly".to_string()],
    }
}

fn engine(config: Config) -> SearchEngine {
    SearchEngine::from_config(Arc::new(config), Arc::new(MemoryStore::new())).unwrap()
}

fn seed_files(root: &Path) {
    fs::write(root.join("Report.pdf"), "quarterly numbers").unwrap();
    fs::write(root.join("Annual Report.pdf"), "yearly numbers").unwrap();
    fs::write(root.join("notes.txt"), "unrelated").unwrap();
}

#[tokio::test]
async fn local_search_end_to_end() {
    let tmp = TempDir::new().unwrap();
    seed_files(tmp.path());

    let engine = engine(local_config(tmp.path()));
    let results = engine
        .search("Report.pdf", &SearchFilter::default())
        .await
        .unwrap();

    assert!(results.len() >= 2);
    // The exact title match outranks the substring match.
    assert_eq!(results[0].title, "Report.pdf");
    assert_eq!(results[0].source, Source::Local);
    assert_eq!(results[0].account, "local");
    assert!(results[0].url.as_deref().unwrap().starts_with("file://"));
    assert!(results[0].modified.is_some());
    assert!(!results.iter().any(|r| r.title == "notes.txt"));
}

#[tokio::test]
async fn empty_query_browses_local_files() {
    let tmp = TempDir::new().unwrap();
    seed_files(tmp.path());

    let engine = engine(local_config(tmp.path()));
    let results = engine.search("", &SearchFilter::default()).await.unwrap();

    assert_eq!(results.len(), 3);
}

#[tokio::test]
async fn disabled_provider_yields_no_results_and_no_error() {
    let tmp = TempDir::new().unwrap();
    seed_files(tmp.path());

    let mut config = local_config(tmp.path());
    config.microsoft.enabled = false;
    config.microsoft.accounts.push(AccountConfig {
        alias: "corp".to_string(),
        client_id: "cid".to_string(),
        client_secret: "cs".to_string(),
        tenant_id: "common".to_string(),
        redirect_uri: "http://127.0.0.1:8787/auth/callback".to_string(),
        scopes: vec!["Files.Read.All".to_string()],
    });

    let engine = engine(config);
    let results = engine
        .search("Report.pdf", &SearchFilter::default())
        .await
        .unwrap();

    assert!(!results.is_empty());
    assert!(results
        .iter()
        .all(|r| r.source.family() != Provider::Microsoft));
}

#[tokio::test]
async fn unauthenticated_account_contributes_zero_while_siblings_return() {
    let tmp = TempDir::new().unwrap();
    seed_files(tmp.path());

    // Google is enabled with a configured account, but the store holds
    // no tokens: the connector must skip the network entirely and the
    // local results must still come back.
    let mut config = local_config(tmp.path());
    config.google.enabled = true;
    config.google.accounts.push(google_account("work"));

    let engine = engine(config);
    let results = engine
        .search("Report.pdf", &SearchFilter::default())
        .await
        .unwrap();

    assert!(!results.is_empty());
    assert!(results.iter().all(|r| r.source == Source::Local));
}

#[tokio::test]
async fn filtered_output_is_a_subset_satisfying_both_filters() {
    let tmp = TempDir::new().unwrap();
    seed_files(tmp.path());

    let mut config = local_config(tmp.path());
    config.google.enabled = true;
    config.google.accounts.push(google_account("work"));

    let engine = engine(config);

    let unfiltered = engine
        .search("Report.pdf", &SearchFilter::default())
        .await
        .unwrap();
    let filter = SearchFilter::parse(Some("local"), Some("local"));
    let filtered = engine.search("Report.pdf", &filter).await.unwrap();

    for r in &filtered {
        assert!(unfiltered.iter().any(|u| u.id == r.id));
        assert_eq!(r.source, Source::Local);
        assert_eq!(r.account, "local");
    }
    assert!(!filtered.is_empty());
}

#[tokio::test]
async fn source_family_filter_excludes_local() {
    let tmp = TempDir::new().unwrap();
    seed_files(tmp.path());

    let mut config = local_config(tmp.path());
    config.google.enabled = true;
    config.google.accounts.push(google_account("work"));

    let engine = engine(config);
    let results = engine
        .search("Report.pdf", &SearchFilter::parse(Some("google"), None))
        .await
        .unwrap();

    // Only the (unauthenticated, hence empty) google provider was in
    // scope, so nothing comes back and nothing errors.
    assert!(results.is_empty());
}

#[tokio::test]
async fn result_limit_bounds_the_output() {
    let tmp = TempDir::new().unwrap();
    for i in 0..50 {
        fs::write(tmp.path().join(format!("report-{:02}.txt", i)), "x").unwrap();
    }

    let mut config = local_config(tmp.path());
    config.search.result_limit = 10;

    let engine = engine(config);
    let results = engine
        .search("report", &SearchFilter::default())
        .await
        .unwrap();
    assert_eq!(results.len(), 10);
}

#[tokio::test]
async fn unknown_alias_is_a_client_error() {
    let tmp = TempDir::new().unwrap();
    seed_files(tmp.path());

    let engine = engine(local_config(tmp.path()));
    let err = engine
        .search("Report.pdf", &SearchFilter::parse(None, Some("ghost")))
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::BadRequest(_)));
}

#[tokio::test]
async fn no_matches_is_an_empty_list_not_an_error() {
    let tmp = TempDir::new().unwrap();
    seed_files(tmp.path());

    let engine = engine(local_config(tmp.path()));
    let results = engine
        .search("zzz-does-not-exist-zzz", &SearchFilter::default())
        .await
        .unwrap();
    assert!(results.is_empty());
}
