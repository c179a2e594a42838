use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::{Account, Provider};

/// Default OAuth scopes requested for Google accounts when the config
/// leaves `scopes` empty.
pub const GOOGLE_DEFAULT_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/drive.readonly",
    "https://www.googleapis.com/auth/gmail.readonly",
];

/// Default OAuth scopes requested for Microsoft accounts when the config
/// leaves `scopes` empty.
pub const MICROSOFT_DEFAULT_SCOPES: &[&str] = &[
    "offline_access",
    "User.Read",
    "Files.Read.All",
    "Sites.Read.All",
    "Mail.Read",
];

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub local: LocalConfig,
    #[serde(default)]
    pub google: CloudProviderConfig,
    #[serde(default)]
    pub microsoft: CloudProviderConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    /// Upper bound on the merged, ranked result list.
    #[serde(default = "default_result_limit")]
    pub result_limit: usize,
    /// Timeout applied to every outbound provider call.
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    /// How many files the local connector returns for an empty
    /// (browse-mode) query.
    #[serde(default = "default_local_list_limit")]
    pub local_list_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            result_limit: default_result_limit(),
            request_timeout_secs: default_timeout_secs(),
            local_list_limit: default_local_list_limit(),
        }
    }
}

fn default_result_limit() -> usize {
    200
}
fn default_timeout_secs() -> u64 {
    12
}
fn default_local_list_limit() -> usize {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct CredentialsConfig {
    /// Path of the token record file.
    #[serde(default = "default_credentials_path")]
    pub path: PathBuf,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            path: default_credentials_path(),
        }
    }
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from("~/.docscout/credentials.json")
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LocalConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Root directories enumerated by the local connector.
    #[serde(default)]
    pub roots: Vec<PathBuf>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

/// Configuration shared by the Google and Microsoft provider sections:
/// an `enabled` switch plus an ordered list of aliased accounts.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct CloudProviderConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AccountConfig {
    pub alias: String,
    pub client_id: String,
    pub client_secret: String,
    /// Microsoft only; ignored for Google.
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    /// Empty (or absent) means "use the provider default list"; the
    /// fallback is applied once in [`load_config`], never downstream.
    #[serde(default)]
    pub scopes: Vec<String>,
}

fn default_tenant() -> String {
    "common".to_string()
}

fn default_redirect_uri() -> String {
    "http://127.0.0.1:8787/auth/callback".to_string()
}

impl Config {
    /// Minimal config for tests and tooling that runs before a real
    /// config file exists.
    #[allow(dead_code)]
    pub fn minimal() -> Self {
        Self {
            server: ServerConfig {
                bind: "127.0.0.1:8787".to_string(),
            },
            search: SearchConfig::default(),
            credentials: CredentialsConfig::default(),
            local: LocalConfig::default(),
            google: CloudProviderConfig::default(),
            microsoft: CloudProviderConfig::default(),
        }
    }

    pub fn provider_enabled(&self, provider: Provider) -> bool {
        match provider {
            Provider::Local => self.local.enabled,
            Provider::Google => self.google.enabled,
            Provider::Microsoft => self.microsoft.enabled,
        }
    }

    /// Configured accounts for a cloud provider, in config order. Local
    /// has no accounts; it yields an empty list.
    pub fn accounts(&self, provider: Provider) -> Vec<Account> {
        let section = match provider {
            Provider::Local => return Vec::new(),
            Provider::Google => &self.google,
            Provider::Microsoft => &self.microsoft,
        };
        section
            .accounts
            .iter()
            .map(|a| Account {
                provider,
                alias: a.alias.clone(),
                client_id: a.client_id.clone(),
                client_secret: a.client_secret.clone(),
                tenant_id: a.tenant_id.clone(),
                redirect_uri: a.redirect_uri.clone(),
                scopes: a.scopes.clone(),
            })
            .collect()
    }

    /// Look up one account by provider and alias.
    pub fn find_account(&self, provider: Provider, alias: &str) -> Option<Account> {
        self.accounts(provider)
            .into_iter()
            .find(|a| a.alias == alias)
    }

    /// Every configured cloud account, Google first, in config order.
    pub fn all_accounts(&self) -> Vec<Account> {
        let mut all = self.accounts(Provider::Google);
        all.extend(self.accounts(Provider::Microsoft));
        all
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.search.result_limit < 1 {
        anyhow::bail!("search.result_limit must be >= 1");
    }
    if config.search.request_timeout_secs == 0 {
        anyhow::bail!("search.request_timeout_secs must be > 0");
    }

    if config.local.enabled && config.local.roots.is_empty() {
        anyhow::bail!("local.roots must not be empty when the local provider is enabled");
    }

    config.credentials.path = expand_tilde(&config.credentials.path);
    for root in &mut config.local.roots {
        *root = expand_tilde(root);
    }

    normalize_accounts(&mut config.google, GOOGLE_DEFAULT_SCOPES, "google")?;
    normalize_accounts(&mut config.microsoft, MICROSOFT_DEFAULT_SCOPES, "microsoft")?;

    Ok(config)
}

/// Apply the provider default scope list and enforce alias uniqueness.
/// Runs exactly once, at load time.
fn normalize_accounts(
    section: &mut CloudProviderConfig,
    default_scopes: &[&str],
    provider_name: &str,
) -> Result<()> {
    let mut seen = std::collections::HashSet::new();

    for account in &mut section.accounts {
        if account.alias.trim().is_empty() {
            anyhow::bail!("{}: account alias must not be empty", provider_name);
        }
        if !seen.insert(account.alias.clone()) {
            anyhow::bail!(
                "{}: duplicate account alias '{}'",
                provider_name,
                account.alias
            );
        }
        if account.client_id.trim().is_empty() {
            anyhow::bail!(
                "{}: account '{}' is missing client_id",
                provider_name,
                account.alias
            );
        }

        // Blank entries collapse to the provider default list.
        account.scopes.retain(|s| !s.trim().is_empty());
        if account.scopes.is_empty() {
            account.scopes = default_scopes.iter().map(|s| s.to_string()).collect();
        }
    }

    Ok(())
}

/// Expand `~` at the start of a path to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if s.starts_with("~/") || s == "~" {
        if let Some(home) = std::env::var_os("HOME").map(PathBuf::from) {
            return home.join(s.strip_prefix("~/").unwrap_or(""));
        }
    }
    path.to_path_buf()
}
