//! Google connector: Drive metadata search plus Gmail attachment search.
//!
//! One [`SourceConnector::search`] call fans out over every configured
//! Google account; per account, the Drive and Gmail queries run
//! concurrently and merge drive-then-gmail. Accounts without a valid
//! token are skipped without any network traffic.
//!
//! # API calls
//!
//! - Drive: `GET /drive/v3/files` with a `name contains … or fullText
//!   contains …` query, trash excluded, shared drives included.
//! - Gmail: `GET /gmail/v1/users/me/messages` with
//!   `has:attachment filename:…`, then each hit fetched with
//!   `format=full` and its payload tree walked for attachment parts.
//!
//! Attachment ids rotate between fetches, so attachment results are
//! identified by `gmail:<messageId>:<partId>` — stable for the same
//! message part.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use futures::future::join_all;
use std::sync::Arc;
use tracing::warn;

use crate::connector::SourceConnector;
use crate::models::{Account, Provider, SearchResult, Source};
use crate::store::StoreError;
use crate::token::TokenManager;

const DRIVE_FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const GMAIL_MESSAGES_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me/messages";

/// Drive result page size; one page is plenty for a name lookup.
const DRIVE_PAGE_SIZE: &str = "50";
/// How many recent attachment-bearing messages to scan per account.
const GMAIL_SCAN_LIMIT: &str = "25";

pub struct GoogleConnector {
    accounts: Vec<Account>,
    tokens: Arc<TokenManager>,
    client: reqwest::Client,
}

impl GoogleConnector {
    pub fn new(accounts: Vec<Account>, tokens: Arc<TokenManager>, client: reqwest::Client) -> Self {
        Self {
            accounts,
            tokens,
            client,
        }
    }
}

#[async_trait]
impl SourceConnector for GoogleConnector {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, StoreError> {
        // join_all returns results in input order, which keeps the merge
        // deterministic (account config order) despite the concurrency.
        let per_account = join_all(
            self.accounts
                .iter()
                .map(|account| self.search_account(account, query)),
        )
        .await;

        let mut merged = Vec::new();
        for results in per_account {
            merged.extend(results?);
        }
        Ok(merged)
    }
}

impl GoogleConnector {
    async fn search_account(
        &self,
        account: &Account,
        query: &str,
    ) -> Result<Vec<SearchResult>, StoreError> {
        let Some(token) = self.tokens.access_token(account).await? else {
            warn!(
                alias = %account.alias,
                "google account not authenticated; contributing no results"
            );
            return Ok(Vec::new());
        };

        let (drive, gmail) = tokio::join!(
            self.search_drive(account, &token, query),
            self.search_gmail(account, &token, query),
        );

        let mut results = Vec::new();
        match drive {
            Ok(hits) => results.extend(hits),
            Err(e) => warn!(alias = %account.alias, error = %e, "drive search failed"),
        }
        match gmail {
            Ok(hits) => results.extend(hits),
            Err(e) => warn!(alias = %account.alias, error = %e, "gmail search failed"),
        }
        Ok(results)
    }

    async fn search_drive(
        &self,
        account: &Account,
        token: &str,
        query: &str,
    ) -> Result<Vec<SearchResult>> {
        let q = if query.trim().is_empty() {
            "trashed = false".to_string()
        } else {
            let escaped = query.replace('\\', "\\\\").replace('\'', "\\'");
            format!(
                "(name contains '{}' or fullText contains '{}') and trashed = false",
                escaped, escaped
            )
        };

        let body = get_json(
            &self.client,
            DRIVE_FILES_URL,
            token,
            &[
                ("q", q.as_str()),
                (
                    "fields",
                    "files(id,name,mimeType,size,modifiedTime,webViewLink,owners(displayName))",
                ),
                ("pageSize", DRIVE_PAGE_SIZE),
                ("includeItemsFromAllDrives", "true"),
                ("supportsAllDrives", "true"),
            ],
        )
        .await?;

        Ok(parse_drive_files(&body, &account.alias))
    }

    async fn search_gmail(
        &self,
        account: &Account,
        token: &str,
        query: &str,
    ) -> Result<Vec<SearchResult>> {
        let q = if query.trim().is_empty() {
            "has:attachment".to_string()
        } else {
            format!("has:attachment filename:{}", query)
        };

        let listing = get_json(
            &self.client,
            GMAIL_MESSAGES_URL,
            token,
            &[("q", q.as_str()), ("maxResults", GMAIL_SCAN_LIMIT)],
        )
        .await?;

        let ids: Vec<String> = listing["messages"]
            .as_array()
            .map(|msgs| {
                msgs.iter()
                    .filter_map(|m| m["id"].as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        // Full payloads fetched concurrently; failures cost only that
        // message, not the account.
        let messages = join_all(ids.iter().map(|id| {
            let url = format!("{}/{}", GMAIL_MESSAGES_URL, id);
            let client = self.client.clone();
            let token = token.to_string();
            async move { get_json(&client, &url, &token, &[("format", "full")]).await }
        }))
        .await;

        let mut results = Vec::new();
        for (id, message) in ids.iter().zip(messages) {
            match message {
                Ok(body) => results.extend(parse_gmail_message(&body, &account.alias, query)),
                Err(e) => {
                    warn!(alias = %account.alias, msg_id = %id, error = %e, "gmail message fetch failed")
                }
            }
        }
        Ok(results)
    }
}

/// Bearer-authenticated GET returning parsed JSON; non-2xx is an error
/// with the response head attached.
async fn get_json(
    client: &reqwest::Client,
    url: &str,
    token: &str,
    params: &[(&str, &str)],
) -> Result<serde_json::Value> {
    let resp = client
        .get(url)
        .bearer_auth(token)
        .query(params)
        .send()
        .await
        .with_context(|| format!("Request failed: {}", url))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!(
            "Google API error (HTTP {}): {}",
            status,
            body.chars().take(300).collect::<String>()
        );
    }

    resp.json().await.context("Invalid JSON response")
}

/// Normalize a Drive `files.list` response.
fn parse_drive_files(body: &serde_json::Value, alias: &str) -> Vec<SearchResult> {
    let Some(files) = body["files"].as_array() else {
        return Vec::new();
    };

    files
        .iter()
        .filter_map(|file| {
            let id = file["id"].as_str()?;
            Some(SearchResult {
                id: format!("gdrive:{}", id),
                title: file["name"].as_str().unwrap_or("(untitled)").to_string(),
                source: Source::GoogleDrive,
                account: alias.to_string(),
                url: file["webViewLink"].as_str().map(|s| s.to_string()),
                modified: file["modifiedTime"]
                    .as_str()
                    .and_then(parse_rfc3339_millis),
                // Drive serializes size as a decimal string.
                size: file["size"].as_str().and_then(|s| s.parse().ok()),
                owner: file["owners"][0]["displayName"]
                    .as_str()
                    .map(|s| s.to_string()),
                score: None,
            })
        })
        .collect()
}

/// Normalize one full Gmail message into attachment results.
///
/// Walks the (possibly nested multipart) payload tree and keeps parts
/// that carry a filename; when a query is present the filename must
/// contain it, since Gmail's `filename:` operator also matches on
/// message bodies of forwarded mail.
fn parse_gmail_message(
    body: &serde_json::Value,
    alias: &str,
    query: &str,
) -> Vec<SearchResult> {
    let Some(message_id) = body["id"].as_str() else {
        return Vec::new();
    };

    let modified = body["internalDate"].as_str().and_then(|s| s.parse().ok());
    let query_lower = query.trim().to_lowercase();

    let mut parts = Vec::new();
    collect_attachment_parts(&body["payload"], &mut parts);

    parts
        .into_iter()
        .filter_map(|part| {
            let filename = part["filename"].as_str().filter(|f| !f.is_empty())?;
            if !query_lower.is_empty() && !filename.to_lowercase().contains(&query_lower) {
                return None;
            }
            let part_id = part["partId"].as_str().unwrap_or("0");
            Some(SearchResult {
                id: format!("gmail:{}:{}", message_id, part_id),
                title: filename.to_string(),
                source: Source::GmailAttachment,
                account: alias.to_string(),
                url: Some(format!(
                    "https://mail.google.com/mail/u/0/#all/{}",
                    message_id
                )),
                modified,
                size: part["body"]["size"].as_u64().filter(|s| *s > 0),
                owner: header_value(body, "From"),
                score: None,
            })
        })
        .collect()
}

/// Depth-first walk over a message payload collecting leaf parts.
fn collect_attachment_parts<'a>(
    payload: &'a serde_json::Value,
    out: &mut Vec<&'a serde_json::Value>,
) {
    if payload["filename"].as_str().is_some_and(|f| !f.is_empty()) {
        out.push(payload);
    }
    if let Some(parts) = payload["parts"].as_array() {
        for part in parts {
            collect_attachment_parts(part, out);
        }
    }
}

fn header_value(message: &serde_json::Value, name: &str) -> Option<String> {
    message["payload"]["headers"]
        .as_array()?
        .iter()
        .find(|h| h["name"].as_str() == Some(name))
        .and_then(|h| h["value"].as_str())
        .map(|s| s.to_string())
}

fn parse_rfc3339_millis(s: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drive_files_normalize() {
        let body = serde_json::json!({
            "files": [
                {
                    "id": "abc123",
                    "name": "Report.pdf",
                    "mimeType": "application/pdf",
                    "size": "2048",
                    "modifiedTime": "2026-01-15T10:30:00.000Z",
                    "webViewLink": "https://drive.google.com/file/d/abc123/view",
                    "owners": [{"displayName": "Dana"}]
                },
                {
                    "id": "def456",
                    "name": "Notes"
                }
            ]
        });

        let results = parse_drive_files(&body, "work");
        assert_eq!(results.len(), 2);

        let first = &results[0];
        assert_eq!(first.id, "gdrive:abc123");
        assert_eq!(first.title, "Report.pdf");
        assert_eq!(first.source, Source::GoogleDrive);
        assert_eq!(first.account, "work");
        assert_eq!(first.size, Some(2048));
        assert_eq!(first.owner.as_deref(), Some("Dana"));
        assert!(first.modified.is_some());

        let second = &results[1];
        assert!(second.modified.is_none());
        assert!(second.size.is_none());
        assert!(second.url.is_none());
    }

    #[test]
    fn drive_empty_body_normalizes_to_empty() {
        assert!(parse_drive_files(&serde_json::json!({}), "work").is_empty());
    }

    #[test]
    fn gmail_message_attachments_extracted() {
        let body = serde_json::json!({
            "id": "msg-1",
            "internalDate": "1737000000000",
            "payload": {
                "filename": "",
                "headers": [
                    {"name": "From", "value": "dana@example.com"},
                    {"name": "Subject", "value": "Q4 numbers"}
                ],
                "parts": [
                    {"partId": "0", "filename": "", "body": {"size": 120}},
                    {
                        "partId": "1",
                        "filename": "Report.pdf",
                        "body": {"size": 4096, "attachmentId": "att-rotating"}
                    },
                    {
                        "partId": "2",
                        "filename": "",
                        "parts": [
                            {"partId": "2.1", "filename": "inline-report.pdf", "body": {"size": 99}}
                        ]
                    }
                ]
            }
        });

        let results = parse_gmail_message(&body, "work", "report");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "gmail:msg-1:1");
        assert_eq!(results[0].title, "Report.pdf");
        assert_eq!(results[0].source, Source::GmailAttachment);
        assert_eq!(results[0].modified, Some(1_737_000_000_000));
        assert_eq!(results[0].size, Some(4096));
        assert_eq!(results[0].owner.as_deref(), Some("dana@example.com"));
        assert_eq!(results[1].id, "gmail:msg-1:2.1");
    }

    #[test]
    fn gmail_filename_filter_applies() {
        let body = serde_json::json!({
            "id": "msg-2",
            "payload": {
                "parts": [
                    {"partId": "1", "filename": "invoice.xlsx", "body": {"size": 10}}
                ]
            }
        });

        assert!(parse_gmail_message(&body, "work", "report").is_empty());
        assert_eq!(parse_gmail_message(&body, "work", "").len(), 1);
        assert_eq!(parse_gmail_message(&body, "work", "INVOICE").len(), 1);
    }
}
