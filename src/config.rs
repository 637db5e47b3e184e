//! Runtime configuration from the environment, with the remote endpoint
//! overridable through `local_settings`.

use rusqlite::Connection;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::api::normalize_endpoint_url;
use crate::db;
use crate::diagnostics;
use crate::error::{Result, StockError};

pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 8_000;
pub const DEFAULT_DASHBOARD_DEBOUNCE_MS: u64 = 80;

const SETTINGS_CATEGORY: &str = "remote";
const SETTING_ENDPOINT_URL: &str = "endpoint_url";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Normalised endpoint URL; empty when not configured yet.
    pub remote_url: String,
    pub api_key: Option<String>,
    pub data_dir: PathBuf,
    pub call_timeout: Duration,
    pub dashboard_debounce: Duration,
    pub log_filter: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes `std::env::var`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let millis = |key: &str, default: u64| -> Result<Duration> {
            match get(key) {
                None => Ok(Duration::from_millis(default)),
                Some(raw) => raw
                    .parse::<u64>()
                    .ok()
                    .filter(|ms| *ms > 0)
                    .map(Duration::from_millis)
                    .ok_or_else(|| StockError::Config(format!("{key} must be a positive integer, got {raw:?}"))),
            }
        };

        Ok(Self {
            remote_url: get("STOCKROOM_REMOTE_URL")
                .map(|u| normalize_endpoint_url(&u))
                .unwrap_or_default(),
            api_key: get("STOCKROOM_API_KEY"),
            data_dir: get("STOCKROOM_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(diagnostics::app_data_dir),
            call_timeout: millis("STOCKROOM_CALL_TIMEOUT_MS", DEFAULT_CALL_TIMEOUT_MS)?,
            dashboard_debounce: millis("STOCKROOM_DASHBOARD_DEBOUNCE_MS", DEFAULT_DASHBOARD_DEBOUNCE_MS)?,
            log_filter: get("RUST_LOG").unwrap_or_else(|| diagnostics::DEFAULT_LOG_FILTER.to_string()),
        })
    }

    /// A persisted endpoint override wins over the environment.
    pub fn apply_overrides(&mut self, conn: &Connection) {
        if let Some(url) = db::get_setting(conn, SETTINGS_CATEGORY, SETTING_ENDPOINT_URL)
            .map(|u| normalize_endpoint_url(&u))
            .filter(|u| !u.is_empty())
        {
            if url != self.remote_url {
                info!(endpoint = %url, "using endpoint from local settings");
            }
            self.remote_url = url;
        } else {
            debug!("no endpoint override in local settings");
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.remote_url.is_empty()
    }
}

/// Persist an endpoint override for future runs.
pub fn save_endpoint(conn: &Connection, url: &str) -> Result<String> {
    let url = normalize_endpoint_url(url);
    if url.is_empty() {
        return Err(StockError::Config("endpoint URL is empty".into()));
    }
    db::set_setting(conn, SETTINGS_CATEGORY, SETTING_ENDPOINT_URL, &url)?;
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::from_lookup(lookup(&[("STOCKROOM_DATA_DIR", "/tmp/stock")])).unwrap();
        assert_eq!(cfg.call_timeout, Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS));
        assert_eq!(cfg.dashboard_debounce, Duration::from_millis(80));
        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/stock"));
        assert_eq!(cfg.api_key, None);
        assert!(!cfg.is_configured());
    }

    #[test]
    fn test_values_parsed_and_normalised() {
        let cfg = Config::from_lookup(lookup(&[
            ("STOCKROOM_REMOTE_URL", "script.example/exec/"),
            ("STOCKROOM_API_KEY", " k-1 "),
            ("STOCKROOM_CALL_TIMEOUT_MS", "2500"),
        ]))
        .unwrap();
        assert_eq!(cfg.remote_url, "https://script.example/exec");
        assert_eq!(cfg.api_key.as_deref(), Some("k-1"));
        assert_eq!(cfg.call_timeout, Duration::from_millis(2500));
    }

    #[test]
    fn test_bad_timeout_is_config_error() {
        let err = Config::from_lookup(lookup(&[("STOCKROOM_CALL_TIMEOUT_MS", "soon")])).unwrap_err();
        assert!(matches!(err, StockError::Config(_)));
        assert!(Config::from_lookup(lookup(&[("STOCKROOM_CALL_TIMEOUT_MS", "0")])).is_err());
    }

    #[test]
    fn test_local_settings_override_endpoint() {
        let db = db::open_in_memory().unwrap();
        let conn = db.conn.lock().unwrap();
        let mut cfg = Config::from_lookup(lookup(&[("STOCKROOM_REMOTE_URL", "a.example")])).unwrap();

        cfg.apply_overrides(&conn);
        assert_eq!(cfg.remote_url, "https://a.example");

        assert_eq!(save_endpoint(&conn, "localhost:9000/").unwrap(), "http://localhost:9000");
        cfg.apply_overrides(&conn);
        assert_eq!(cfg.remote_url, "http://localhost:9000");
        assert!(save_endpoint(&conn, "  ").is_err());
    }
}
