//! Configuration module for the POS sync service.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::{AddrParseError, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_PROBE_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_CYCLE_TIMEOUT_MS: u64 = 15_000;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite cache file
    pub db_path: PathBuf,
    /// Address the local host API binds to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Base URL of the remote authoritative service
    pub remote_url: String,
    /// Bearer token for the remote service, if any
    pub remote_token: Option<String>,
    /// Fallback caller identity when a request carries none
    pub seller_id: Option<String>,
    /// Upper bound for the reachability probe
    pub probe_timeout: Duration,
    /// Upper bound for the remote fetch of one cycle
    pub cycle_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AddrParseError> {
        dotenvy::dotenv().ok();

        let db_path = env::var("POS_SYNC_DB_PATH")
            .unwrap_or_else(|_| "./data/pos-cache.sqlite".to_string())
            .into();

        let bind_addr = env::var("POS_SYNC_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8787".to_string())
            .parse()?;

        let log_level = env::var("POS_SYNC_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let remote_url = env::var("POS_SYNC_REMOTE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());

        let remote_token = non_empty(env::var("POS_SYNC_REMOTE_TOKEN").ok());
        let seller_id = non_empty(env::var("POS_SYNC_SELLER_ID").ok());

        let probe_timeout = parse_millis(
            env::var("POS_SYNC_PROBE_TIMEOUT_MS").ok(),
            DEFAULT_PROBE_TIMEOUT_MS,
        );
        let cycle_timeout = parse_millis(
            env::var("POS_SYNC_CYCLE_TIMEOUT_MS").ok(),
            DEFAULT_CYCLE_TIMEOUT_MS,
        );

        Ok(Self {
            db_path,
            bind_addr,
            log_level,
            remote_url,
            remote_token,
            seller_id,
            probe_timeout,
            cycle_timeout,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_millis(value: Option<String>, default_ms: u64) -> Duration {
    let ms = value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .unwrap_or(default_ms);
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        // Clear any existing env vars
        for key in [
            "POS_SYNC_DB_PATH",
            "POS_SYNC_BIND_ADDR",
            "POS_SYNC_LOG_LEVEL",
            "POS_SYNC_REMOTE_URL",
            "POS_SYNC_REMOTE_TOKEN",
            "POS_SYNC_SELLER_ID",
            "POS_SYNC_PROBE_TIMEOUT_MS",
            "POS_SYNC_CYCLE_TIMEOUT_MS",
        ] {
            env::remove_var(key);
        }

        let config = Config::from_env().unwrap();

        assert_eq!(config.db_path, PathBuf::from("./data/pos-cache.sqlite"));
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8787");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.remote_url, "http://127.0.0.1:8080");
        assert!(config.remote_token.is_none());
        assert!(config.seller_id.is_none());
        assert_eq!(config.probe_timeout, Duration::from_millis(3_000));
        assert_eq!(config.cycle_timeout, Duration::from_millis(15_000));
    }

    #[test]
    fn test_parse_millis_falls_back_on_garbage() {
        assert_eq!(parse_millis(Some("250".into()), 10), Duration::from_millis(250));
        assert_eq!(parse_millis(Some("soon".into()), 10), Duration::from_millis(10));
        assert_eq!(parse_millis(Some("0".into()), 10), Duration::from_millis(10));
        assert_eq!(parse_millis(None, 10), Duration::from_millis(10));
    }

    #[test]
    fn test_blank_identity_is_absent() {
        assert_eq!(non_empty(Some("  ".into())), None);
        assert_eq!(non_empty(Some("seller-7".into())), Some("seller-7".into()));
    }
}
