//! Application configuration loaded from environment variables (§2.10).

use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

/// Configuration read once at process startup by both binaries.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub sentry_dsn: Option<String>,
    pub log_scrapes: bool,
    pub metrics_port: u16,

    pub resource_scrape_interval: Duration,
    pub asset_scrape_interval: Duration,
    pub max_retries: u32,
    pub retry_interval: Duration,
    pub resize_poll_interval: Duration,
    pub stale_resize_window: Duration,
    pub gc_interval: Duration,
    pub gc_retention: Duration,
}

impl Config {
    /// Loads configuration from the environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            database_max_connections: parse_env_or("DATABASE_MAX_CONNECTIONS", 10)?,
            sentry_dsn: env::var("SENTRY_DSN").ok(),
            log_scrapes: parse_bool_env("CASTELLUM_LOG_SCRAPES"),
            metrics_port: parse_env_or("METRICS_PORT", 9090)?,

            resource_scrape_interval: Duration::from_secs(parse_env_or(
                "RESOURCE_SCRAPE_INTERVAL_SECS",
                1800,
            )?),
            asset_scrape_interval: Duration::from_secs(parse_env_or(
                "ASSET_SCRAPE_INTERVAL_SECS",
                300,
            )?),
            max_retries: parse_env_or("MAX_RETRIES", 3)?,
            retry_interval: Duration::from_secs(parse_env_or("RETRY_INTERVAL_SECS", 300)?),
            resize_poll_interval: Duration::from_secs(parse_env_or(
                "RESIZE_POLL_INTERVAL_SECS",
                5,
            )?),
            stale_resize_window: Duration::from_secs(parse_env_or(
                "STALE_RESIZE_WINDOW_SECS",
                3600,
            )?),
            gc_interval: Duration::from_secs(parse_env_or("GC_INTERVAL_SECS", 3600)?),
            gc_retention: Duration::from_secs(parse_env_or(
                "GC_RETENTION_SECS",
                60 * 60 * 24 * 90,
            )?),
        })
    }
}

fn parse_env_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{key} must be a valid value")),
        Err(_) => Ok(default),
    }
}

fn parse_bool_env(key: &str) -> bool {
    match env::var(key) {
        Ok(raw) => matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_env_accepts_common_spellings() {
        std::env::set_var("TEST_BOOL_FLAG", "TRUE");
        assert!(parse_bool_env("TEST_BOOL_FLAG"));
        std::env::set_var("TEST_BOOL_FLAG", "0");
        assert!(!parse_bool_env("TEST_BOOL_FLAG"));
        std::env::remove_var("TEST_BOOL_FLAG");
        assert!(!parse_bool_env("TEST_BOOL_FLAG"));
    }

    #[test]
    fn parse_env_or_falls_back_to_default() {
        std::env::remove_var("TEST_NUMERIC_KNOB");
        let value: u32 = parse_env_or("TEST_NUMERIC_KNOB", 42).unwrap();
        assert_eq!(value, 42);
    }
}
