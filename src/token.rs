//! Per-account OAuth token lifecycle.
//!
//! [`TokenManager::access_token`] is the single gate connectors go through
//! before touching a provider API: it returns a currently-valid bearer
//! token for an account, refreshing silently when the stored one is at or
//! near expiry, or `None` when the account simply is not authenticated.
//! "Not authenticated" is an expected, common state (a never-connected
//! account) and is therefore a value, never an error; the only hard
//! failure is the credential store itself breaking.
//!
//! Refresh tokens can be single-use, so refreshes of the same
//! `(provider, alias)` are serialized through a per-key async lock: a
//! second concurrent search re-reads the store under the lock and finds
//! the record the first one just persisted.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::models::{Account, Provider, TokenRecord};
use crate::oauth::{self, Endpoints};
use crate::store::{CredentialStore, StoreError};

/// Tokens expiring within this window are refreshed up front, so a
/// request started now cannot outlive its credential.
pub const EXPIRY_BUFFER_MS: i64 = 5 * 60 * 1000;

pub struct TokenManager {
    store: Arc<dyn CredentialStore>,
    client: reqwest::Client,
    endpoints: Endpoints,
    /// Lazily-allocated per-`provider:alias` refresh locks.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TokenManager {
    pub fn new(store: Arc<dyn CredentialStore>, client: reqwest::Client) -> Self {
        Self::with_endpoints(store, client, Endpoints::default())
    }

    /// Construct with explicit endpoints (tests point these at a stub
    /// token server).
    pub fn with_endpoints(
        store: Arc<dyn CredentialStore>,
        client: reqwest::Client,
        endpoints: Endpoints,
    ) -> Self {
        Self {
            store,
            client,
            endpoints,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Return a valid bearer token for the account, or `None` when the
    /// account needs (re-)authentication. Errors only on credential
    /// store failure.
    pub async fn access_token(&self, account: &Account) -> Result<Option<String>, StoreError> {
        let lock = self.key_lock(account).await;
        let _guard = lock.lock().await;

        let Some(record) = self.store.get(account.provider, &account.alias).await? else {
            return Ok(None);
        };

        let now = Utc::now().timestamp_millis();
        if record.is_fresh(now, EXPIRY_BUFFER_MS) {
            return Ok(Some(record.access_token));
        }

        let Some(refresh_token) = record.refresh_token.clone() else {
            debug!(
                provider = %account.provider,
                alias = %account.alias,
                "access token expired and no refresh token stored"
            );
            return Ok(None);
        };

        match oauth::refresh(&self.client, &self.endpoints, account, &refresh_token).await {
            Ok(mut renewed) => {
                // Providers often omit the refresh token on renewal;
                // keep the one that worked.
                if renewed.refresh_token.is_none() {
                    renewed.refresh_token = Some(refresh_token);
                }
                if renewed.extra.is_none() {
                    renewed.extra = record.extra;
                }
                let token = renewed.access_token.clone();
                self.store
                    .save(account.provider, &account.alias, renewed)
                    .await?;
                Ok(Some(token))
            }
            Err(e) => {
                warn!(
                    provider = %account.provider,
                    alias = %account.alias,
                    error = %e,
                    "token refresh failed; account needs re-authentication"
                );
                Ok(None)
            }
        }
    }

    /// Finish an authorization-code flow: exchange the code and persist
    /// the resulting record.
    pub async fn complete_connect(&self, account: &Account, code: &str) -> anyhow::Result<()> {
        let record = oauth::exchange_code(&self.client, &self.endpoints, account, code).await?;
        self.store
            .save(account.provider, &account.alias, record)
            .await?;
        Ok(())
    }

    /// Drop the stored token record for an account. Returns whether one
    /// existed.
    pub async fn disconnect(&self, provider: Provider, alias: &str) -> Result<bool, StoreError> {
        self.store.delete(provider, alias).await
    }

    /// Connection status for the accounts listing: the stored record, if
    /// any, without triggering a refresh.
    pub async fn peek(
        &self,
        provider: Provider,
        alias: &str,
    ) -> Result<Option<TokenRecord>, StoreError> {
        self.store.get(provider, alias).await
    }

    async fn key_lock(&self, account: &Account) -> Arc<Mutex<()>> {
        let key = format!("{}:{}", account.provider, account.alias);
        let mut locks = self.locks.lock().await;
        locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn account() -> Account {
        Account {
            provider: Provider::Google,
            alias: "work".to_string(),
            client_id: "client-1".to_string(),
            client_secret: "secret".to_string(),
            tenant_id: "common".to_string(),
            redirect_uri: "http://127.0.0.1:8787/auth/callback".to_string(),
            scopes: vec!["scope.a".to_string()],
        }
    }

    fn record(expires_at: Option<i64>, refresh_token: Option<&str>) -> TokenRecord {
        TokenRecord {
            access_token: "stored-token".to_string(),
            refresh_token: refresh_token.map(|s| s.to_string()),
            expires_at,
            scopes: vec!["scope.a".to_string()],
            extra: None,
        }
    }

    /// Spawn a stub token endpoint returning `status` + `body`, counting
    /// hits. Returns the endpoint URL.
    async fn spawn_token_stub(
        status: axum::http::StatusCode,
        body: serde_json::Value,
        hits: Arc<AtomicUsize>,
    ) -> String {
        let app = Router::new().route(
            "/token",
            post(move || {
                let body = body.clone();
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    (status, Json(body))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/token", addr)
    }

    fn manager(store: Arc<MemoryStore>, token_url: String) -> TokenManager {
        let endpoints = Endpoints {
            google_token: token_url,
            ..Endpoints::default()
        };
        TokenManager::with_endpoints(store, reqwest::Client::new(), endpoints)
    }

    #[tokio::test]
    async fn missing_record_is_none_not_error() {
        let hits = Arc::new(AtomicUsize::new(0));
        let url = spawn_token_stub(
            axum::http::StatusCode::OK,
            serde_json::json!({"access_token": "x"}),
            hits.clone(),
        )
        .await;
        let mgr = manager(Arc::new(MemoryStore::new()), url);

        let token = mgr.access_token(&account()).await.unwrap();
        assert!(token.is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fresh_token_returned_without_network() {
        let hits = Arc::new(AtomicUsize::new(0));
        let url = spawn_token_stub(
            axum::http::StatusCode::OK,
            serde_json::json!({"access_token": "renewed"}),
            hits.clone(),
        )
        .await;

        let store = Arc::new(MemoryStore::new());
        let far_out = Utc::now().timestamp_millis() + 60 * 60 * 1000;
        store
            .save(Provider::Google, "work", record(Some(far_out), Some("rt")))
            .await
            .unwrap();

        let mgr = manager(store, url);
        let token = mgr.access_token(&account()).await.unwrap();
        assert_eq!(token.as_deref(), Some("stored-token"));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn near_expiry_triggers_refresh_and_persists() {
        let hits = Arc::new(AtomicUsize::new(0));
        // No refresh_token in the response; the stored one must carry over.
        let url = spawn_token_stub(
            axum::http::StatusCode::OK,
            serde_json::json!({"access_token": "renewed", "expires_in": 3600}),
            hits.clone(),
        )
        .await;

        let store = Arc::new(MemoryStore::new());
        // Four minutes out: inside the five-minute safety buffer.
        let near = Utc::now().timestamp_millis() + 4 * 60 * 1000;
        store
            .save(Provider::Google, "work", record(Some(near), Some("rt-1")))
            .await
            .unwrap();

        let mgr = manager(store.clone(), url);
        let token = mgr.access_token(&account()).await.unwrap();
        assert_eq!(token.as_deref(), Some("renewed"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let saved = store.get(Provider::Google, "work").await.unwrap().unwrap();
        assert_eq!(saved.access_token, "renewed");
        assert_eq!(saved.refresh_token.as_deref(), Some("rt-1"));
        assert!(saved.expires_at.unwrap() > Utc::now().timestamp_millis());
    }

    #[tokio::test]
    async fn missing_expiry_is_treated_as_expired() {
        let hits = Arc::new(AtomicUsize::new(0));
        let url = spawn_token_stub(
            axum::http::StatusCode::OK,
            serde_json::json!({"access_token": "renewed", "expires_in": 3600}),
            hits.clone(),
        )
        .await;

        let store = Arc::new(MemoryStore::new());
        store
            .save(Provider::Google, "work", record(None, Some("rt")))
            .await
            .unwrap();

        let mgr = manager(store, url);
        let token = mgr.access_token(&account()).await.unwrap();
        assert_eq!(token.as_deref(), Some("renewed"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejected_refresh_is_soft() {
        let hits = Arc::new(AtomicUsize::new(0));
        let url = spawn_token_stub(
            axum::http::StatusCode::BAD_REQUEST,
            serde_json::json!({"error": "invalid_grant"}),
            hits.clone(),
        )
        .await;

        let store = Arc::new(MemoryStore::new());
        store
            .save(Provider::Google, "work", record(Some(0), Some("rt")))
            .await
            .unwrap();

        let mgr = manager(store.clone(), url);
        let token = mgr.access_token(&account()).await.unwrap();
        assert!(token.is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // The stale record stays put for inspection/re-auth.
        assert!(store.get(Provider::Google, "work").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn expired_without_refresh_token_skips_network() {
        let hits = Arc::new(AtomicUsize::new(0));
        let url = spawn_token_stub(
            axum::http::StatusCode::OK,
            serde_json::json!({"access_token": "x"}),
            hits.clone(),
        )
        .await;

        let store = Arc::new(MemoryStore::new());
        store
            .save(Provider::Google, "work", record(Some(0), None))
            .await
            .unwrap();

        let mgr = manager(store, url);
        let token = mgr.access_token(&account()).await.unwrap();
        assert!(token.is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrent_refreshes_single_flight_per_key() {
        let hits = Arc::new(AtomicUsize::new(0));
        let url = spawn_token_stub(
            axum::http::StatusCode::OK,
            serde_json::json!({"access_token": "renewed", "expires_in": 3600}),
            hits.clone(),
        )
        .await;

        let store = Arc::new(MemoryStore::new());
        store
            .save(Provider::Google, "work", record(Some(0), Some("rt")))
            .await
            .unwrap();

        let mgr = Arc::new(manager(store, url));
        let acct1 = account();
        let acct2 = account();
        let (a, b) = tokio::join!(
            mgr.access_token(&acct1),
            mgr.access_token(&acct2)
        );
        assert_eq!(a.unwrap().as_deref(), Some("renewed"));
        assert_eq!(b.unwrap().as_deref(), Some("renewed"));
        // The second caller re-reads under the key lock and finds the
        // freshly persisted record instead of refreshing again.
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disconnect_deletes_the_record() {
        let store = Arc::new(MemoryStore::new());
        store
            .save(Provider::Google, "work", record(Some(0), Some("rt")))
            .await
            .unwrap();

        let mgr = TokenManager::new(store.clone(), reqwest::Client::new());
        assert!(mgr.disconnect(Provider::Google, "work").await.unwrap());
        assert!(!mgr.disconnect(Provider::Google, "work").await.unwrap());
        assert!(store.get(Provider::Google, "work").await.unwrap().is_none());
    }
}
