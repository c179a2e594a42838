use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;

use crate::config::Config;
use crate::models::{Provider, TokenRecord};
use crate::store::{CredentialStore, FileStore};

/// `scout accounts` — list every configured account and its connection
/// status, plus the local provider's state.
pub async fn run_accounts(config: &Config) -> Result<()> {
    let store: Arc<dyn CredentialStore> = Arc::new(FileStore::new(config.credentials.path.clone()));

    println!("{:<12} {:<16} STATUS", "PROVIDER", "ACCOUNT");

    let local_status = if !config.local.enabled {
        "disabled"
    } else if config.local.roots.iter().all(|r| r.exists()) {
        "ok"
    } else {
        "ok (some roots missing)"
    };
    println!("{:<12} {:<16} {}", "local", "-", local_status);

    for provider in [Provider::Google, Provider::Microsoft] {
        let enabled = config.provider_enabled(provider);
        for account in config.accounts(provider) {
            let record = store.get(provider, &account.alias).await?;
            let status = if !enabled {
                "disabled".to_string()
            } else {
                connection_status(record.as_ref())
            };
            println!("{:<12} {:<16} {}", provider, account.alias, status);
        }
    }

    Ok(())
}

/// Human-readable connection state for one stored record.
///
/// A stale token with a refresh token still counts as connected — the
/// next search refreshes it silently.
fn connection_status(record: Option<&TokenRecord>) -> String {
    match record {
        None => "not connected".to_string(),
        Some(rec) => {
            let now = Utc::now().timestamp_millis();
            if rec.is_fresh(now, 0) || rec.refresh_token.is_some() {
                "connected".to_string()
            } else {
                "expired (reconnect required)".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(expires_at: Option<i64>, refresh: Option<&str>) -> TokenRecord {
        TokenRecord {
            access_token: "tok".to_string(),
            refresh_token: refresh.map(|s| s.to_string()),
            expires_at,
            scopes: vec![],
            extra: None,
        }
    }

    #[test]
    fn status_reflects_record_state() {
        assert_eq!(connection_status(None), "not connected");

        let future = Utc::now().timestamp_millis() + 3_600_000;
        assert_eq!(connection_status(Some(&record(Some(future), None))), "connected");

        // Stale but refreshable.
        assert_eq!(connection_status(Some(&record(Some(0), Some("rt")))), "connected");

        assert_eq!(
            connection_status(Some(&record(Some(0), None))),
            "expired (reconnect required)"
        );
    }
}
