use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::db::etf_queries;
use crate::errors::{AppError, ErrorKind, JobError};
use crate::external::holdings_provider::HoldingsProvider;
use crate::services::failure_cache::{FailureType, UpstreamFailureCache};
use crate::services::rate_limiter::UpstreamGate;

/// Outcome of one symbol's fetch attempt. Upstream problems land here as
/// per-symbol failures; only store-level trouble escapes as an error.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolFetchOutcome {
    pub symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isin: Option<String>,
    pub success: bool,
    pub cache_hit: bool,
    pub api_called: bool,
    pub holdings_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SymbolFetchOutcome {
    fn new(symbol: &str, isin: Option<String>) -> Self {
        Self {
            symbol: symbol.to_string(),
            isin,
            success: false,
            cache_hit: false,
            api_called: false,
            holdings_count: 0,
            error: None,
        }
    }
}

/// A snapshot younger than the freshness TTL suppresses the upstream call.
pub fn should_fetch(
    fetched_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    freshness_ttl: Duration,
) -> bool {
    match fetched_at {
        Some(at) => now - at >= freshness_ttl,
        None => true,
    }
}

/// Fetches and stores ETF holdings snapshots: freshness cache first, then
/// one serialized upstream call per stale symbol.
pub struct HoldingsService {
    pool: PgPool,
    provider: Arc<dyn HoldingsProvider>,
    gate: Arc<UpstreamGate>,
    failures: UpstreamFailureCache,
    freshness_ttl: Duration,
}

impl HoldingsService {
    pub fn new(
        pool: PgPool,
        provider: Arc<dyn HoldingsProvider>,
        gate: Arc<UpstreamGate>,
        freshness_ttl_hours: i64,
    ) -> Self {
        Self {
            pool,
            provider,
            gate,
            failures: UpstreamFailureCache::new(),
            freshness_ttl: Duration::hours(freshness_ttl_hours),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Fetch holdings for one symbol, honoring the freshness cache, the
    /// failure cache and the upstream gate.
    pub async fn fetch_symbol(&self, symbol: &str) -> Result<SymbolFetchOutcome, JobError> {
        let metadata = etf_queries::get_metadata(&self.pool, symbol)
            .await
            .map_err(AppError::from)?
            .ok_or_else(|| {
                JobError::new(ErrorKind::NotFound, format!("unknown ETF symbol: {symbol}"))
            })?;

        let isin = match metadata.isin.as_deref().filter(|s| !s.is_empty()) {
            Some(isin) => isin.to_string(),
            None => {
                return Err(JobError::new(
                    ErrorKind::Validation,
                    format!("ETF {symbol} has no ISIN; holdings cannot be fetched"),
                ))
            }
        };

        let mut outcome = SymbolFetchOutcome::new(symbol, Some(isin.clone()));

        let existing = etf_queries::get_snapshot(&self.pool, symbol)
            .await
            .map_err(AppError::from)?;
        if !should_fetch(existing.map(|s| s.fetched_at), Utc::now(), self.freshness_ttl) {
            info!("💾 Holdings for {} are fresh, skipping upstream call", symbol);
            outcome.cache_hit = true;
            outcome.success = true;
            return Ok(outcome);
        }

        if let Some(failure) = self.failures.is_failed(symbol) {
            outcome.error = Some(format!(
                "skipped: previous {:?} failure at {}",
                failure.failure_type, failure.failed_at
            ));
            return Ok(outcome);
        }

        let _permit = self.gate.acquire().await;
        outcome.api_called = true;

        match self.provider.fetch_holdings(&isin).await {
            Ok(holdings) if !holdings.is_empty() => {
                etf_queries::upsert_snapshot(
                    &self.pool,
                    symbol,
                    Some(&isin),
                    metadata.name.as_deref(),
                    &holdings,
                    Utc::now(),
                    None,
                )
                .await
                .map_err(AppError::from)?;
                self.failures.clear(symbol);
                info!("✅ Stored {} holdings for {}", holdings.len(), symbol);
                outcome.success = true;
                outcome.holdings_count = holdings.len();
            }
            Ok(_) => {
                warn!("⚠️  Upstream returned no holdings for {}", symbol);
                self.failures.record_failure(symbol, FailureType::Transient);
                outcome.error = Some("upstream returned no holdings".to_string());
            }
            Err(e) => {
                warn!("❌ Holdings fetch failed for {}: {}", symbol, e);
                let failure_type = if e.is_non_retryable() {
                    FailureType::NonRetryable
                } else {
                    FailureType::Transient
                };
                self.failures.record_failure(symbol, failure_type);
                outcome.error = Some(format!("{}: {}", e.error_kind(), e));
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_snapshot_always_fetches() {
        assert!(should_fetch(None, Utc::now(), Duration::hours(24)));
    }

    #[test]
    fn fresh_snapshot_suppresses_fetch() {
        let now = Utc::now();
        let fetched = now - Duration::hours(2);
        assert!(!should_fetch(Some(fetched), now, Duration::hours(24)));
    }

    #[test]
    fn stale_snapshot_fetches_again() {
        let now = Utc::now();
        let fetched = now - Duration::hours(25);
        assert!(should_fetch(Some(fetched), now, Duration::hours(24)));
    }

    #[test]
    fn boundary_age_counts_as_stale() {
        let now = Utc::now();
        let fetched = now - Duration::hours(24);
        assert!(should_fetch(Some(fetched), now, Duration::hours(24)));
    }
}
