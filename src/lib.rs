//! # docscout
//!
//! Search a named document across local files, Google, and Microsoft
//! accounts at once.
//!
//! docscout fans a name query out across every configured source — local
//! directories, Google Drive and Gmail attachments, Microsoft OneDrive,
//! SharePoint, and Outlook attachments — concurrently, then merges,
//! deduplicates, and ranks the per-source results into one bounded list.
//! Each provider supports multiple accounts distinguished by alias, with
//! per-account OAuth tokens persisted and refreshed silently.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │               SearchEngine                 │
//! │  ┌─────────┐  ┌─────────┐  ┌───────────┐  │
//! │  │  Local  │  │ Google  │  │ Microsoft │  │
//! │  │  walk   │  │Drive+Gm │  │ Graph ×3  │  │
//! │  └─────────┘  └────┬────┘  └─────┬─────┘  │
//! │                    ▼             ▼         │
//! │              TokenManager ── CredentialStore
//! └──────────────┬────────────────────────────┘
//!                │ merge → dedupe → rank → truncate
//!         ┌──────┴──────┐
//!         ▼             ▼
//!    ┌─────────┐   ┌─────────┐
//!    │   CLI   │   │  HTTP   │
//!    │ (scout) │   │ (axum)  │
//!    └─────────┘   └─────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and normalization |
//! | [`models`] | Core data types |
//! | [`store`] | Credential store trait and backends |
//! | [`token`] | OAuth token lifecycle (expiry buffer, silent refresh) |
//! | [`oauth`] | OAuth2 client plumbing (authorize URLs, exchanges) |
//! | [`connector`] | The source connector trait |
//! | [`connector_local`] | Local filesystem connector |
//! | [`connector_google`] | Google Drive + Gmail connector |
//! | [`connector_microsoft`] | OneDrive + SharePoint + Outlook connector |
//! | [`aggregate`] | Fan-out, merge, dedupe, rank, truncate |
//! | [`server`] | HTTP server |

pub mod aggregate;
pub mod config;
pub mod connector;
pub mod connector_google;
pub mod connector_local;
pub mod connector_microsoft;
pub mod models;
pub mod oauth;
pub mod search;
pub mod server;
pub mod sources;
pub mod store;
pub mod token;
