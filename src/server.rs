//! HTTP surface for search and account management.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/search` | Fan-out search (`name`, `sources`, `accounts` query params) |
//! | `GET`  | `/accounts` | List configured accounts with connection status |
//! | `DELETE` | `/accounts/{provider}/{alias}` | Drop an account's stored tokens |
//! | `GET`  | `/auth/{provider}/{alias}` | Start the OAuth connect flow (redirect) |
//! | `GET`  | `/auth/callback` | OAuth redirect target; exchanges the code |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Error responses are JSON:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "unknown account alias: 'x'" } }
//! ```
//!
//! A search always answers `200` with a (possibly empty) list; `400` is
//! reserved for malformed requests (unknown provider, source, or alias)
//! and `500` for credential-store outages.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser-based
//! frontends can call the API directly.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{delete, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use uuid::Uuid;

use crate::aggregate::{SearchEngine, SearchError, SearchFilter};
use crate::config::Config;
use crate::models::{Provider, SearchResult};
use crate::oauth;
use crate::store::FileStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    engine: Arc<SearchEngine>,
    /// OAuth `state` values for in-flight connect flows, mapped back to
    /// the `(provider, alias)` that started them.
    pending_auth: Arc<Mutex<HashMap<String, (Provider, String)>>>,
}

/// Starts the HTTP server on the configured bind address. Runs until
/// the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let store = Arc::new(FileStore::new(config.credentials.path.clone()));
    let engine = Arc::new(SearchEngine::from_config(Arc::new(config.clone()), store)?);

    let state = AppState {
        engine,
        pending_auth: Arc::new(Mutex::new(HashMap::new())),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/search", get(handle_search))
        .route("/accounts", get(handle_list_accounts))
        .route("/accounts/{provider}/{alias}", delete(handle_disconnect))
        .route("/auth/{provider}/{alias}", get(handle_auth_start))
        .route("/auth/callback", get(handle_auth_callback))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    println!("docscout server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`).
    code: String,
    /// Human-readable error message.
    message: String,
}

/// Internal error type that converts into an HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn store_unavailable(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "store_unavailable".to_string(),
        message: message.into(),
    }
}

fn auth_failed(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "auth_failed".to_string(),
        message: message.into(),
    }
}

impl From<SearchError> for AppError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::BadRequest(msg) => bad_request(msg),
            SearchError::Store(e) => store_unavailable(e.to_string()),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /search ============

#[derive(Deserialize)]
struct SearchParams {
    /// The name query; absent or empty means browse mode.
    #[serde(default)]
    name: String,
    /// Comma-separated source filter (families or exact tags).
    sources: Option<String>,
    /// Comma-separated account filter (`alias` or `provider:alias`).
    accounts: Option<String>,
}

async fn handle_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<SearchResult>>, AppError> {
    let filter = SearchFilter::parse(params.sources.as_deref(), params.accounts.as_deref());
    let results = state.engine.search(&params.name, &filter).await?;
    Ok(Json(results))
}

// ============ GET /accounts ============

#[derive(Serialize)]
struct AccountInfo {
    provider: Provider,
    alias: String,
    connected: bool,
}

#[derive(Serialize)]
struct AccountsResponse {
    accounts: Vec<AccountInfo>,
}

async fn handle_list_accounts(
    State(state): State<AppState>,
) -> Result<Json<AccountsResponse>, AppError> {
    let tokens = state.engine.token_manager();
    let mut accounts = Vec::new();

    for account in state.engine.config().all_accounts() {
        let record = tokens
            .peek(account.provider, &account.alias)
            .await
            .map_err(|e| store_unavailable(e.to_string()))?;
        let connected = record
            .map(|r| r.refresh_token.is_some() || r.is_fresh(chrono::Utc::now().timestamp_millis(), 0))
            .unwrap_or(false);
        accounts.push(AccountInfo {
            provider: account.provider,
            alias: account.alias,
            connected,
        });
    }

    Ok(Json(AccountsResponse { accounts }))
}

// ============ DELETE /accounts/{provider}/{alias} ============

async fn handle_disconnect(
    State(state): State<AppState>,
    Path((provider, alias)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let provider: Provider = provider.parse().map_err(|e: anyhow::Error| bad_request(e.to_string()))?;

    let existed = state
        .engine
        .token_manager()
        .disconnect(provider, &alias)
        .await
        .map_err(|e| store_unavailable(e.to_string()))?;

    if existed {
        info!(%provider, %alias, "account disconnected");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(format!("no stored tokens for {}:{}", provider, alias)))
    }
}

// ============ GET /auth/{provider}/{alias} ============

async fn handle_auth_start(
    State(state): State<AppState>,
    Path((provider, alias)): Path<(String, String)>,
) -> Result<Redirect, AppError> {
    let provider: Provider = provider.parse().map_err(|e: anyhow::Error| bad_request(e.to_string()))?;

    let account = state
        .engine
        .config()
        .find_account(provider, &alias)
        .ok_or_else(|| bad_request(format!("account not configured: {}:{}", provider, alias)))?;

    let auth_state = Uuid::new_v4().to_string();
    let url = oauth::authorize_url(
        state.engine.token_manager().endpoints(),
        &account,
        &auth_state,
    )
    .map_err(|e| bad_request(e.to_string()))?;

    state
        .pending_auth
        .lock()
        .await
        .insert(auth_state, (provider, alias));

    Ok(Redirect::temporary(&url))
}

// ============ GET /auth/callback ============

#[derive(Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

async fn handle_auth_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Result<Html<String>, AppError> {
    if let Some(err) = params.error {
        let detail = params.error_description.unwrap_or_default();
        return Err(auth_failed(format!("provider returned '{}': {}", err, detail)));
    }

    let auth_state = params
        .state
        .ok_or_else(|| bad_request("missing state parameter"))?;
    let code = params
        .code
        .ok_or_else(|| bad_request("missing code parameter"))?;

    let Some((provider, alias)) = state.pending_auth.lock().await.remove(&auth_state) else {
        return Err(bad_request("unknown or already-used state parameter"));
    };

    let account = state
        .engine
        .config()
        .find_account(provider, &alias)
        .ok_or_else(|| bad_request(format!("account not configured: {}:{}", provider, alias)))?;

    state
        .engine
        .token_manager()
        .complete_connect(&account, &code)
        .await
        .map_err(|e| auth_failed(e.to_string()))?;

    info!(%provider, %alias, "account connected");

    Ok(Html(format!(
        "<!doctype html><html><body style=\"font-family: sans-serif; text-align: center; padding-top: 4em\">\
         <h2>Connected</h2>\
         <p>{} account <strong>{}</strong> is now connected.</p>\
         <p>You can close this window.</p>\
         </body></html>",
        provider, alias
    )))
}
