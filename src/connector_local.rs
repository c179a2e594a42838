//! Local filesystem connector.
//!
//! Walks the configured root directories and matches file basenames
//! against the query with approximate (edit-distance style) scoring, so
//! `"Repot.pdf"` still finds `Report.pdf`. An empty query switches to
//! listing mode: the first `search.local_list_limit` files, unranked.
//!
//! Ids are `file:<sha256(absolute path)[..16]>` — stable for the same
//! file across searches, which is what the aggregator's dedupe key needs.

use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use similar::TextDiff;
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

use crate::config::{LocalConfig, SearchConfig};
use crate::connector::SourceConnector;
use crate::models::{Provider, SearchResult, Source};
use crate::store::StoreError;

/// Account tag carried by every local result (the local provider has no
/// aliased accounts).
const LOCAL_ACCOUNT: &str = "local";

/// Minimum character-diff ratio for a non-substring fuzzy hit.
const MATCH_THRESHOLD: f32 = 0.5;

pub struct LocalConnector {
    config: LocalConfig,
    /// Browse-mode listing cap.
    list_limit: usize,
}

impl LocalConnector {
    pub fn new(config: LocalConfig, search: &SearchConfig) -> Self {
        Self {
            config,
            list_limit: search.local_list_limit,
        }
    }
}

#[async_trait]
impl SourceConnector for LocalConnector {
    fn provider(&self) -> Provider {
        Provider::Local
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, StoreError> {
        let config = self.config.clone();
        let list_limit = self.list_limit;
        let query = query.to_string();

        // The walk is blocking I/O; keep it off the async worker threads
        // so slow disks don't stall the cloud fan-out.
        let results = tokio::task::spawn_blocking(move || scan_roots(&config, &query, list_limit))
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "local scan task failed");
                Vec::new()
            });

        Ok(results)
    }
}

fn scan_roots(config: &LocalConfig, query: &str, list_limit: usize) -> Vec<SearchResult> {
    let exclude_set = match build_exclude_set(&config.exclude_globs) {
        Ok(set) => set,
        Err(e) => {
            warn!(error = %e, "invalid local exclude globs; skipping local search");
            return Vec::new();
        }
    };

    let browse = query.trim().is_empty();
    let query_lower = query.trim().to_lowercase();
    let mut results = Vec::new();

    for root in &config.roots {
        if !root.exists() {
            warn!(root = %root.display(), "local root does not exist; skipping");
            continue;
        }

        let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
        for entry in walker.into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            if exclude_set.is_match(relative.to_string_lossy().as_ref()) {
                continue;
            }

            let name = match path.file_name() {
                Some(n) => n.to_string_lossy().to_string(),
                None => continue,
            };

            if browse {
                results.push(file_result(path, &name, None));
                if results.len() >= list_limit {
                    return results;
                }
                continue;
            }

            if let Some(score) = fuzzy_score(&query_lower, &name.to_lowercase()) {
                results.push(file_result(path, &name, Some(score)));
            }
        }
    }

    if !browse {
        // Best matches first; path id as the deterministic tie-break.
        results.sort_by(|a, b| {
            a.score
                .partial_cmp(&b.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
    }

    results
}

/// Score a basename against the query; `None` means no match.
///
/// Lower is better, on the same scale the aggregator ranks with: an
/// exact name is 0.0, a substring hit lands in (0.1, 0.2], and anything
/// else falls back to the character-diff ratio, kept only above
/// [`MATCH_THRESHOLD`].
fn fuzzy_score(query_lower: &str, name_lower: &str) -> Option<f64> {
    if name_lower == query_lower {
        return Some(0.0);
    }

    if name_lower.contains(query_lower) {
        let coverage = query_lower.len() as f64 / name_lower.len() as f64;
        return Some(0.1 + 0.1 * (1.0 - coverage));
    }

    let ratio = TextDiff::from_chars(query_lower, name_lower).ratio();
    if ratio >= MATCH_THRESHOLD {
        Some((1.0 - ratio as f64).clamp(0.0, 1.0))
    } else {
        None
    }
}

fn file_result(path: &Path, name: &str, score: Option<f64>) -> SearchResult {
    let metadata = std::fs::metadata(path).ok();

    let modified = metadata.as_ref().and_then(|m| {
        m.modified().ok().and_then(|t| {
            t.duration_since(std::time::SystemTime::UNIX_EPOCH)
                .ok()
                .map(|d| d.as_millis() as i64)
        })
    });

    SearchResult {
        id: file_id(path),
        title: name.to_string(),
        source: Source::Local,
        account: LOCAL_ACCOUNT.to_string(),
        url: Some(format!("file://{}", path.display())),
        modified,
        size: metadata.map(|m| m.len()),
        owner: None,
        score,
    }
}

/// Stable id for a local file, derived from its absolute path.
fn file_id(path: &Path) -> String {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string_lossy().as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("file:{}", &digest[..16])
}

/// Default excludes plus the configured ones.
fn build_exclude_set(configured: &[String]) -> anyhow::Result<GlobSet> {
    let mut patterns = vec![
        "**/.git/**".to_string(),
        "**/node_modules/**".to_string(),
        "**/target/**".to_string(),
    ];
    patterns.extend(configured.iter().cloned());

    let mut builder = GlobSetBuilder::new();
    for pattern in &patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn connector(dir: &Path, excludes: Vec<String>) -> LocalConnector {
        LocalConnector::new(
            LocalConfig {
                enabled: true,
                roots: vec![dir.to_path_buf()],
                exclude_globs: excludes,
                follow_symlinks: false,
            },
            &SearchConfig::default(),
        )
    }

    #[tokio::test]
    async fn exact_name_scores_best() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Report.pdf"), "x").unwrap();
        fs::write(dir.path().join("Annual Report.pdf"), "x").unwrap();
        fs::write(dir.path().join("unrelated.txt"), "x").unwrap();

        let results = connector(dir.path(), vec![])
            .search("Report.pdf")
            .await
            .unwrap();

        assert!(results.len() >= 2);
        assert_eq!(results[0].title, "Report.pdf");
        assert_eq!(results[0].score, Some(0.0));
        assert!(results.iter().any(|r| r.title == "Annual Report.pdf"));
        assert!(!results.iter().any(|r| r.title == "unrelated.txt"));
    }

    #[tokio::test]
    async fn typo_still_matches() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Report.pdf"), "x").unwrap();

        let results = connector(dir.path(), vec![])
            .search("Repot.pdf")
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Report.pdf");
    }

    #[tokio::test]
    async fn empty_query_lists_files_unranked() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            fs::write(dir.path().join(format!("note-{}.md", i)), "x").unwrap();
        }

        let results = connector(dir.path(), vec![]).search("").await.unwrap();
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| r.score.is_none()));
    }

    #[tokio::test]
    async fn exclude_globs_are_honoured() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("build");
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join("report.pdf"), "x").unwrap();
        fs::write(dir.path().join("report.pdf"), "x").unwrap();

        let results = connector(dir.path(), vec!["**/build/**".to_string()])
            .search("report.pdf")
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].url.as_deref(),
            Some(format!("file://{}", dir.path().join("report.pdf").display()).as_str())
        );
    }

    #[tokio::test]
    async fn missing_root_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("nope");
        let connector = LocalConnector::new(
            LocalConfig {
                enabled: true,
                roots: vec![gone],
                exclude_globs: vec![],
                follow_symlinks: false,
            },
            &SearchConfig::default(),
        );

        let results = connector.search("anything").await.unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn ids_are_stable_per_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "x").unwrap();
        assert_eq!(file_id(&path), file_id(&path));
        assert!(file_id(&path).starts_with("file:"));
    }

    #[test]
    fn fuzzy_score_orders_exact_substring_approximate() {
        let exact = fuzzy_score("report.pdf", "report.pdf").unwrap();
        let substring = fuzzy_score("report.pdf", "annual report.pdf").unwrap();
        let approx = fuzzy_score("repot.pdf", "report.pdf").unwrap();
        assert_eq!(exact, 0.0);
        assert!(substring > exact && substring <= 0.2);
        assert!(approx > 0.0);
        assert!(fuzzy_score("zzzzz", "report.pdf").is_none());
    }
}
