use std::sync::Arc;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

/// Information about a failed upstream fetch for a symbol
#[derive(Debug, Clone)]
pub struct FailureInfo {
    pub failed_at: DateTime<Utc>,
    pub failure_type: FailureType,
    pub ttl_hours: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FailureType {
    /// 4xx from upstream; the symbol will keep failing
    NonRetryable,
    /// Temporary rate limit
    RateLimited,
    /// Timeouts and transport problems
    Transient,
}

/// Thread-safe cache of symbols whose upstream fetch recently failed, so a
/// fleet run does not burn its serialized call budget on known-bad symbols.
#[derive(Clone, Default)]
pub struct UpstreamFailureCache {
    cache: Arc<DashMap<String, FailureInfo>>,
}

impl UpstreamFailureCache {
    pub fn new() -> Self {
        Self {
            cache: Arc::new(DashMap::new()),
        }
    }

    /// Check whether a symbol has a still-valid recorded failure
    pub fn is_failed(&self, symbol: &str) -> Option<FailureInfo> {
        if let Some(entry) = self.cache.get(symbol) {
            let info = entry.value().clone();
            let expiry = info.failed_at + Duration::hours(info.ttl_hours);

            if Utc::now() < expiry {
                return Some(info);
            } else {
                drop(entry); // Release the read lock
                self.cache.remove(symbol);
            }
        }
        None
    }

    pub fn record_failure(&self, symbol: &str, failure_type: FailureType) {
        let ttl_hours = match failure_type {
            FailureType::NonRetryable => 24,
            FailureType::RateLimited => 1,
            FailureType::Transient => 1,
        };

        let info = FailureInfo {
            failed_at: Utc::now(),
            failure_type,
            ttl_hours,
        };

        self.cache.insert(symbol.to_string(), info);
    }

    /// Clear a symbol after a successful fetch
    pub fn clear(&self, symbol: &str) {
        self.cache.remove(symbol);
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_retrieves_failures() {
        let cache = UpstreamFailureCache::new();

        cache.record_failure("BADETF", FailureType::NonRetryable);

        let result = cache.is_failed("BADETF");
        assert!(result.is_some());
        assert_eq!(result.unwrap().failure_type, FailureType::NonRetryable);
    }

    #[test]
    fn clears_symbol_after_success() {
        let cache = UpstreamFailureCache::new();

        cache.record_failure("UTINIFTETF", FailureType::Transient);
        assert!(cache.is_failed("UTINIFTETF").is_some());

        cache.clear("UTINIFTETF");
        assert!(cache.is_failed("UTINIFTETF").is_none());
    }

    #[test]
    fn non_retryable_failures_outlive_transient_ones() {
        let cache = UpstreamFailureCache::new();

        cache.record_failure("GONE", FailureType::NonRetryable);
        cache.record_failure("SLOW", FailureType::Transient);

        assert_eq!(cache.is_failed("GONE").unwrap().ttl_hours, 24);
        assert_eq!(cache.is_failed("SLOW").unwrap().ttl_hours, 1);
    }
}
