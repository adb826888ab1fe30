use std::str::FromStr;
use std::time::Duration;

use crate::services::llm_service::LlmConfig;

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub worker_concurrency: usize,
    pub lease_ttl: Duration,
    pub heartbeat_interval: Duration,
    pub recovery_interval: Duration,
    pub poll_interval: Duration,
    pub max_queue_age: Duration,
    pub upstream_min_interval: Duration,
    pub upstream_timeout: Duration,
    pub freshness_ttl_hours: i64,
    pub max_upload_bytes: usize,
    pub llm: LlmConfig,
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| "DATABASE_URL is not set".to_string())?;

        Ok(Self {
            database_url,
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            worker_concurrency: env_parse("WORKER_CONCURRENCY", 5),
            lease_ttl: Duration::from_secs(env_parse("LEASE_TTL_SECS", 90)),
            heartbeat_interval: Duration::from_secs(env_parse("HEARTBEAT_INTERVAL_SECS", 30)),
            recovery_interval: Duration::from_secs(env_parse("RECOVERY_INTERVAL_SECS", 60)),
            poll_interval: Duration::from_secs(env_parse("POLL_INTERVAL_SECS", 2)),
            max_queue_age: Duration::from_secs(env_parse("MAX_QUEUE_AGE_SECS", 3600)),
            upstream_min_interval: Duration::from_millis(env_parse(
                "UPSTREAM_MIN_INTERVAL_MS",
                1000,
            )),
            upstream_timeout: Duration::from_secs(env_parse("UPSTREAM_TIMEOUT_SECS", 30)),
            freshness_ttl_hours: env_parse("FRESHNESS_TTL_HOURS", 24),
            max_upload_bytes: env_parse("MAX_UPLOAD_BYTES", 20 * 1024 * 1024),
            llm: LlmConfig::from_env(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parse_falls_back_on_missing_or_bad_values() {
        std::env::remove_var("FUNDFOLIO_TEST_MISSING");
        assert_eq!(env_parse("FUNDFOLIO_TEST_MISSING", 42u64), 42);

        std::env::set_var("FUNDFOLIO_TEST_BAD", "not-a-number");
        assert_eq!(env_parse("FUNDFOLIO_TEST_BAD", 7usize), 7);
        std::env::remove_var("FUNDFOLIO_TEST_BAD");
    }
}
