use dotenvy::dotenv;
use serde::Deserialize;
use std::env;

/// Runtime configuration. Every knob comes from the environment with the
/// documented default; parse failures are fatal at startup.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    /// Path of the SQLite store.
    pub database_path: String,
    /// Base URL of the upstream credit-history provider.
    pub upstream_base_url: String,
    /// Signed-request timestamp window, ± seconds.
    pub sign_window_secs: i64,
    /// Nonce retention; must be at least the signing window.
    pub nonce_ttl_secs: i64,
    /// Pending-invoice lifetime.
    pub invoice_ttl_secs: i64,
    /// Paid-transaction cache lifetime.
    pub paid_cache_ttl_secs: i64,
    /// Token-bucket size per merchant per rolling minute.
    pub rate_limit_per_min: u32,
    pub webhook_max_attempts: i64,
    pub webhook_backoff_base_secs: i64,
    pub webhook_timeout_ms: u64,
    pub scheduler_interval_ms: u64,
}

/// A loaded configuration plus which variables the environment overrode,
/// so startup logs and `config` output show where each value came from.
pub struct ConfigInfo {
    pub config: Config,
    pub overrides: Vec<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<ConfigInfo> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary lookup so tests don't race on process env.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<ConfigInfo> {
        let mut overrides = Vec::new();
        let mut fetch = |key: &str| -> Option<String> {
            let value = get(key);
            if value.is_some() {
                overrides.push(key.to_string());
            }
            value
        };

        let config = Config {
            server_port: parse(fetch("SERVER_PORT"), "SERVER_PORT", 8080)?,
            database_path: fetch("DATABASE_PATH").unwrap_or_else(|| "qrisgate.db".to_string()),
            upstream_base_url: fetch("UPSTREAM_BASE_URL")
                .unwrap_or_else(|| "https://gateway.okeconnect.com".to_string()),
            sign_window_secs: parse(fetch("SIGN_WINDOW_SECS"), "SIGN_WINDOW_SECS", 60)?,
            nonce_ttl_secs: parse(fetch("NONCE_TTL_SECS"), "NONCE_TTL_SECS", 120)?,
            invoice_ttl_secs: parse(fetch("INVOICE_TTL_SECS"), "INVOICE_TTL_SECS", 600)?,
            paid_cache_ttl_secs: parse(fetch("PAID_CACHE_TTL_SECS"), "PAID_CACHE_TTL_SECS", 3600)?,
            rate_limit_per_min: parse(fetch("RATE_LIMIT_PER_MIN"), "RATE_LIMIT_PER_MIN", 120)?,
            webhook_max_attempts: parse(fetch("WEBHOOK_MAX_ATTEMPTS"), "WEBHOOK_MAX_ATTEMPTS", 8)?,
            webhook_backoff_base_secs: parse(
                fetch("WEBHOOK_BACKOFF_BASE_SECS"),
                "WEBHOOK_BACKOFF_BASE_SECS",
                60,
            )?,
            webhook_timeout_ms: parse(fetch("WEBHOOK_TIMEOUT_MS"), "WEBHOOK_TIMEOUT_MS", 8000)?,
            scheduler_interval_ms: parse(
                fetch("SCHEDULER_INTERVAL_MS"),
                "SCHEDULER_INTERVAL_MS",
                15000,
            )?,
        };

        Ok(ConfigInfo { config, overrides })
    }
}

fn parse<T: std::str::FromStr>(raw: Option<String>, key: &str, default: T) -> anyhow::Result<T> {
    match raw {
        Some(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("{} is not a valid value for {}", raw, key)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let info = Config::from_lookup(|_| None).unwrap();
        let config = info.config;
        assert_eq!(config.sign_window_secs, 60);
        assert_eq!(config.nonce_ttl_secs, 120);
        assert_eq!(config.invoice_ttl_secs, 600);
        assert_eq!(config.paid_cache_ttl_secs, 3600);
        assert_eq!(config.rate_limit_per_min, 120);
        assert_eq!(config.webhook_max_attempts, 8);
        assert_eq!(config.webhook_backoff_base_secs, 60);
        assert_eq!(config.webhook_timeout_ms, 8000);
        assert_eq!(config.scheduler_interval_ms, 15000);
        assert!(info.overrides.is_empty());
    }

    #[test]
    fn overrides_take_effect_and_are_tracked() {
        let info = Config::from_lookup(|key| match key {
            "SIGN_WINDOW_SECS" => Some("30".to_string()),
            "DATABASE_PATH" => Some("/tmp/gateway.db".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(info.config.sign_window_secs, 30);
        assert_eq!(info.config.database_path, "/tmp/gateway.db");
        assert_eq!(
            info.overrides,
            vec!["DATABASE_PATH".to_string(), "SIGN_WINDOW_SECS".to_string()]
        );
    }

    #[test]
    fn unparseable_override_is_an_error() {
        let result = Config::from_lookup(|key| {
            (key == "SERVER_PORT").then(|| "not-a-port".to_string())
        });
        assert!(result.is_err());
    }
}
