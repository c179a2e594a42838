//! OAuth2 client plumbing for the Google and Microsoft identity platforms.
//!
//! docscout is an OAuth *client* only: it builds authorization URLs, swaps
//! authorization codes for tokens, and performs refresh-token exchanges.
//! Endpoint URLs live in an [`Endpoints`] value owned by the token manager
//! and injected where needed, so tests can point the exchange at a local
//! stub server instead of the real identity platforms.
//!
//! # Endpoints
//!
//! | Provider | Authorize | Token |
//! |----------|-----------|-------|
//! | Google | `accounts.google.com/o/oauth2/v2/auth` | `oauth2.googleapis.com/token` |
//! | Microsoft | `login.microsoftonline.com/{tenant}/oauth2/v2.0/authorize` | `login.microsoftonline.com/{tenant}/oauth2/v2.0/token` |
//!
//! Google refresh tokens are only issued with `access_type=offline`, and
//! re-consent (`prompt=consent`) is forced so reconnecting an account
//! always yields a fresh refresh token. Microsoft issues refresh tokens
//! when the `offline_access` scope is granted.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Deserialize;

use crate::models::{Account, Provider, TokenRecord};

/// Provider endpoint URLs, injectable for tests.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub google_auth: String,
    pub google_token: String,
    /// Base URL; tenant and `/oauth2/v2.0/...` segments are appended.
    pub microsoft_base: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            google_auth: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            google_token: "https://oauth2.googleapis.com/token".to_string(),
            microsoft_base: "https://login.microsoftonline.com".to_string(),
        }
    }
}

impl Endpoints {
    /// Token endpoint for one account.
    pub fn token_url(&self, account: &Account) -> String {
        match account.provider {
            Provider::Google => self.google_token.clone(),
            Provider::Microsoft => format!(
                "{}/{}/oauth2/v2.0/token",
                self.microsoft_base, account.tenant_id
            ),
            Provider::Local => unreachable!("local accounts carry no tokens"),
        }
    }

    fn authorize_base(&self, account: &Account) -> String {
        match account.provider {
            Provider::Google => self.google_auth.clone(),
            Provider::Microsoft => format!(
                "{}/{}/oauth2/v2.0/authorize",
                self.microsoft_base, account.tenant_id
            ),
            Provider::Local => unreachable!("local accounts carry no tokens"),
        }
    }
}

/// Build the browser authorization URL for an account.
///
/// `state` binds the eventual callback back to the `(provider, alias)`
/// that initiated the flow.
pub fn authorize_url(endpoints: &Endpoints, account: &Account, state: &str) -> Result<String> {
    let scope = account.scopes.join(" ");
    let mut params = vec![
        ("client_id", account.client_id.as_str()),
        ("redirect_uri", account.redirect_uri.as_str()),
        ("response_type", "code"),
        ("scope", scope.as_str()),
        ("state", state),
    ];

    if account.provider == Provider::Google {
        // Without these Google never issues a refresh token.
        params.push(("access_type", "offline"));
        params.push(("prompt", "consent"));
    }

    let url = reqwest::Url::parse_with_params(&endpoints.authorize_base(account), &params)
        .context("Failed to build authorization URL")?;
    Ok(url.into())
}

/// Wire shape of a token endpoint response (exchange and refresh alike).
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    /// Lifetime in seconds.
    #[serde(default)]
    expires_in: Option<i64>,
    /// Space-delimited granted scopes.
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    fn into_record(self, requested_scopes: &[String]) -> TokenRecord {
        let scopes = match self.scope {
            Some(ref s) if !s.trim().is_empty() => {
                s.split_whitespace().map(|s| s.to_string()).collect()
            }
            _ => requested_scopes.to_vec(),
        };
        TokenRecord {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self
                .expires_in
                .map(|secs| Utc::now().timestamp_millis() + secs * 1000),
            scopes,
            extra: None,
        }
    }
}

/// Exchange an authorization code for a token record.
pub async fn exchange_code(
    client: &reqwest::Client,
    endpoints: &Endpoints,
    account: &Account,
    code: &str,
) -> Result<TokenRecord> {
    let scope = account.scopes.join(" ");
    let mut form = vec![
        ("client_id", account.client_id.as_str()),
        ("client_secret", account.client_secret.as_str()),
        ("code", code),
        ("grant_type", "authorization_code"),
        ("redirect_uri", account.redirect_uri.as_str()),
    ];
    if account.provider == Provider::Microsoft {
        form.push(("scope", scope.as_str()));
    }

    post_token(client, &endpoints.token_url(account), &form, account).await
}

/// Exchange a refresh token for a new token record.
///
/// The response may omit a new refresh token (Google usually does); the
/// caller carries the old one over in that case.
pub async fn refresh(
    client: &reqwest::Client,
    endpoints: &Endpoints,
    account: &Account,
    refresh_token: &str,
) -> Result<TokenRecord> {
    let scope = account.scopes.join(" ");
    let mut form = vec![
        ("client_id", account.client_id.as_str()),
        ("client_secret", account.client_secret.as_str()),
        ("refresh_token", refresh_token),
        ("grant_type", "refresh_token"),
    ];
    if account.provider == Provider::Microsoft {
        form.push(("scope", scope.as_str()));
    }

    post_token(client, &endpoints.token_url(account), &form, account).await
}

async fn post_token(
    client: &reqwest::Client,
    url: &str,
    form: &[(&str, &str)],
    account: &Account,
) -> Result<TokenRecord> {
    let resp = client.post(url).form(form).send().await.with_context(|| {
        format!(
            "Token endpoint unreachable for {}:{}",
            account.provider, account.alias
        )
    })?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!(
            "Token exchange failed for {}:{} (HTTP {}): {}",
            account.provider,
            account.alias,
            status,
            body.chars().take(300).collect::<String>()
        );
    }

    let parsed: TokenResponse = resp
        .json()
        .await
        .context("Invalid token endpoint response")?;
    Ok(parsed.into_record(&account.scopes))
}
