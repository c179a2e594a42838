//! # docscout CLI (`scout`)
//!
//! The `scout` binary is the primary interface for docscout. It searches
//! for a named document across every configured source — local
//! directories, Google accounts (Drive + Gmail attachments), and
//! Microsoft accounts (OneDrive + SharePoint + Outlook attachments) —
//! and manages account connections.
//!
//! ## Usage
//!
//! ```bash
//! scout --config ./scout.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scout search "<name>"` | Search all configured sources at once |
//! | `scout accounts` | List configured accounts and connection status |
//! | `scout connect <provider> <alias>` | Print the URL that connects an account |
//! | `scout disconnect <provider> <alias>` | Drop an account's stored tokens |
//! | `scout serve` | Start the HTTP server (search API + OAuth callback) |
//!
//! ## Examples
//!
//! ```bash
//! # Search everywhere
//! scout search "Q4 Report.pdf"
//!
//! # Only Gmail attachments from the work account
//! scout search "invoice" --sources gmail-attachment --accounts google:work
//!
//! # Connect a Microsoft account (server must be running for the callback)
//! scout serve &
//! scout connect microsoft corp
//! ```

mod aggregate;
mod config;
mod connector;
mod connector_google;
mod connector_local;
mod connector_microsoft;
mod models;
mod oauth;
mod search;
mod server;
mod sources;
mod store;
mod token;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use models::Provider;
use store::{CredentialStore, FileStore};

/// docscout — search a named document across local files, Google, and
/// Microsoft accounts at once.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/scout.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "scout",
    about = "docscout — search local files, Google, and Microsoft accounts at once",
    version,
    long_about = "docscout fans a name query out across every configured source — local \
    directories, Google Drive and Gmail attachments, Microsoft OneDrive, SharePoint, and \
    Outlook attachments — concurrently, then merges, deduplicates, and ranks the results \
    into one list. Accounts are connected per provider via OAuth and distinguished by alias."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/scout.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Search all configured sources for a document by name.
    ///
    /// Prints one line per hit: source tag, title, modified timestamp
    /// (ISO-8601 or `-`), and the item's path or URL, tab-separated.
    /// Prints `No matches` when nothing is found.
    Search {
        /// The document name to search for.
        name: String,

        /// Comma-separated source filter. Accepts coarse provider names
        /// (`google`) and fine-grained tags (`gmail-attachment`)
        /// interchangeably.
        #[arg(long)]
        sources: Option<String>,

        /// Comma-separated account filter; entries are bare aliases or
        /// `provider:alias`.
        #[arg(long)]
        accounts: Option<String>,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// List configured accounts and their connection status.
    Accounts,

    /// Print the URL that starts the OAuth connect flow for an account.
    ///
    /// The flow completes in the browser against the running server
    /// (`scout serve`), which receives the provider's redirect.
    Connect {
        /// Provider: google or microsoft.
        provider: String,
        /// Account alias from the config file.
        alias: String,
    },

    /// Drop the stored tokens for an account.
    Disconnect {
        /// Provider: google or microsoft.
        provider: String,
        /// Account alias from the config file.
        alias: String,
    },

    /// Start the HTTP server (search API and OAuth callback endpoint).
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docscout=info,scout=info".into()),
        )
        .try_init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Search {
            name,
            sources,
            accounts,
            limit,
        } => {
            search::run_search(&cfg, &name, sources, accounts, limit).await?;
        }
        Commands::Accounts => {
            sources::run_accounts(&cfg).await?;
        }
        Commands::Connect { provider, alias } => {
            let provider: Provider = provider.parse()?;
            if cfg.find_account(provider, &alias).is_none() {
                anyhow::bail!("account not configured: {}:{}", provider, alias);
            }
            println!(
                "Open this URL in your browser (requires `scout serve` running):"
            );
            println!("  http://{}/auth/{}/{}", cfg.server.bind, provider, alias);
        }
        Commands::Disconnect { provider, alias } => {
            let provider: Provider = provider.parse()?;
            let store = FileStore::new(cfg.credentials.path.clone());
            if store.delete(provider, &alias).await? {
                println!("Disconnected {}:{}", provider, alias);
            } else {
                println!("No stored tokens for {}:{}", provider, alias);
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
