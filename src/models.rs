//! Core data models used throughout docscout.
//!
//! These types describe configured accounts, persisted OAuth state, and the
//! normalized search results that flow through the fan-out pipeline.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A searchable document source family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Local,
    Google,
    Microsoft,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Local => "local",
            Provider::Google => "google",
            Provider::Microsoft => "microsoft",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Provider::Local),
            "google" => Ok(Provider::Google),
            "microsoft" => Ok(Provider::Microsoft),
            other => anyhow::bail!(
                "Unknown provider: '{}'. Must be local, google, or microsoft.",
                other
            ),
        }
    }
}

/// Fine-grained origin tag carried by every search result.
///
/// A provider can surface the same item through more than one of these
/// (e.g. a file visible to both the OneDrive and SharePoint endpoints);
/// the aggregator collapses such overlaps during dedupe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    #[serde(rename = "local")]
    Local,
    #[serde(rename = "google-drive")]
    GoogleDrive,
    #[serde(rename = "gmail-attachment")]
    GmailAttachment,
    #[serde(rename = "microsoft-onedrive")]
    MicrosoftOneDrive,
    #[serde(rename = "microsoft-sharepoint")]
    MicrosoftSharePoint,
    #[serde(rename = "microsoft-teams")]
    MicrosoftTeams,
    #[serde(rename = "microsoft-outlook-attachment")]
    MicrosoftOutlookAttachment,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Local => "local",
            Source::GoogleDrive => "google-drive",
            Source::GmailAttachment => "gmail-attachment",
            Source::MicrosoftOneDrive => "microsoft-onedrive",
            Source::MicrosoftSharePoint => "microsoft-sharepoint",
            Source::MicrosoftTeams => "microsoft-teams",
            Source::MicrosoftOutlookAttachment => "microsoft-outlook-attachment",
        }
    }

    /// The provider family this tag belongs to.
    pub fn family(&self) -> Provider {
        match self {
            Source::Local => Provider::Local,
            Source::GoogleDrive | Source::GmailAttachment => Provider::Google,
            Source::MicrosoftOneDrive
            | Source::MicrosoftSharePoint
            | Source::MicrosoftTeams
            | Source::MicrosoftOutlookAttachment => Provider::Microsoft,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured identity for one provider.
///
/// The `(provider, alias)` pair is the primary key for both account
/// configuration and stored token records. Scopes are normalized (provider
/// defaults applied) once at config load, so everything downstream sees a
/// non-empty ordered list.
#[derive(Debug, Clone)]
pub struct Account {
    pub provider: Provider,
    pub alias: String,
    pub client_id: String,
    pub client_secret: String,
    /// Microsoft only; `"common"` unless the account is tenant-pinned.
    pub tenant_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

/// Persisted OAuth state for one `(provider, alias)`.
///
/// Mutated only by the token manager after a successful exchange or
/// refresh, and deleted on account removal or explicit disconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    /// Absent means no silent refresh is possible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Epoch milliseconds. A record without an expiry is treated as
    /// expired — never trust a token whose lifetime is unknown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    /// Scopes actually granted by the provider.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Provider-specific opaque state (e.g. Microsoft token cache blob).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

impl TokenRecord {
    /// Whether the access token is still valid at `now_ms`, keeping a
    /// safety buffer so a token about to lapse mid-request is refreshed
    /// up front.
    pub fn is_fresh(&self, now_ms: i64, buffer_ms: i64) -> bool {
        match self.expires_at {
            Some(exp) => exp - now_ms > buffer_ms,
            None => false,
        }
    }
}

/// A single normalized hit returned from the fan-out search.
///
/// Created fresh per search call and never persisted. The `(source, id)`
/// pair is unique after dedupe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Provider-namespaced identifier (e.g. `"gdrive:<fileId>"`), stable
    /// for the same underlying item. Dedupe key.
    pub id: String,
    pub title: String,
    pub source: Source,
    /// Alias of the account that produced this hit.
    pub account: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Epoch milliseconds; `None` means unknown recency and ranks as
    /// very old.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Connector-supplied relevance in `[0, 1]` (lower = better), used as
    /// the ranking fallback when the title does not match the query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl SearchResult {
    /// ISO-8601 rendering of `modified`, or `"-"` when unknown.
    pub fn modified_iso(&self) -> String {
        self.modified
            .and_then(DateTime::from_timestamp_millis)
            .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
            .unwrap_or_else(|| "-".to_string())
    }
}
