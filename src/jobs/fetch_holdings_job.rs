use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::etf_queries;
use crate::errors::{ErrorKind, JobError};
use crate::jobs::{JobContext, JobHandler};
use crate::models::{JobKind, JobProgress};
use crate::services::holdings_service::{HoldingsService, SymbolFetchOutcome};

#[derive(Debug, Serialize, Deserialize)]
pub struct FetchHoldingsOnePayload {
    pub symbol: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct FetchHoldingsAllPayload {
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct FetchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cache_hits: usize,
    pub api_calls: usize,
    pub results: Vec<SymbolFetchOutcome>,
}

impl FetchSummary {
    fn tally(outcomes: Vec<SymbolFetchOutcome>) -> Self {
        Self {
            total: outcomes.len(),
            succeeded: outcomes.iter().filter(|o| o.success).count(),
            failed: outcomes.iter().filter(|o| !o.success).count(),
            cache_hits: outcomes.iter().filter(|o| o.cache_hit).count(),
            api_calls: outcomes.iter().filter(|o| o.api_called).count(),
            results: outcomes,
        }
    }
}

/// Fetch the holdings snapshot for a single symbol.
pub struct FetchHoldingsOneHandler {
    service: Arc<HoldingsService>,
}

impl FetchHoldingsOneHandler {
    pub fn new(service: Arc<HoldingsService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl JobHandler for FetchHoldingsOneHandler {
    fn kind(&self) -> JobKind {
        JobKind::FetchHoldingsOne
    }

    async fn run(
        &self,
        payload: serde_json::Value,
        ctx: &JobContext,
    ) -> Result<serde_json::Value, JobError> {
        let payload: FetchHoldingsOnePayload = serde_json::from_value(payload)
            .map_err(|e| JobError::validation(format!("bad fetch_holdings_one payload: {e}")))?;

        if ctx.cancelled().await? {
            return Err(JobError::cancelled());
        }

        let mut progress = JobProgress::new(1);
        progress.current_item = Some(payload.symbol.clone());
        ctx.progress(&progress).await?;

        let outcome = self.service.fetch_symbol(&payload.symbol).await?;

        if outcome.success {
            progress.completed = 1;
        } else {
            progress.failed = 1;
        }
        progress.current_item = None;
        ctx.progress(&progress).await?;

        if !outcome.success {
            return Err(JobError::new(
                ErrorKind::UpstreamTotalFailure,
                outcome
                    .error
                    .unwrap_or_else(|| "holdings fetch failed".to_string()),
            ));
        }

        let summary = FetchSummary::tally(vec![outcome]);
        serde_json::to_value(summary)
            .map_err(|e| JobError::new(ErrorKind::Validation, e.to_string()))
    }
}

/// Fleet-wide fetch over every catalogued ETF with an ISIN, in symbol order.
pub struct FetchHoldingsAllHandler {
    service: Arc<HoldingsService>,
}

impl FetchHoldingsAllHandler {
    pub fn new(service: Arc<HoldingsService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl JobHandler for FetchHoldingsAllHandler {
    fn kind(&self) -> JobKind {
        JobKind::FetchHoldingsAll
    }

    async fn run(
        &self,
        payload: serde_json::Value,
        ctx: &JobContext,
    ) -> Result<serde_json::Value, JobError> {
        let payload: FetchHoldingsAllPayload = serde_json::from_value(payload)
            .map_err(|e| JobError::validation(format!("bad fetch_holdings_all payload: {e}")))?;

        let candidates = etf_queries::list_with_isin(self.service.pool(), payload.limit)
            .await
            .map_err(crate::errors::AppError::from)?;
        if candidates.is_empty() {
            return Err(JobError::new(
                ErrorKind::UpstreamTotalFailure,
                "no catalogued ETFs carry an ISIN",
            ));
        }

        info!("🔄 Fleet holdings fetch over {} symbols", candidates.len());

        let mut progress = JobProgress::new(candidates.len() as i32);
        ctx.progress(&progress).await?;

        let mut outcomes = Vec::with_capacity(candidates.len());
        for etf in &candidates {
            if ctx.lease_lost() {
                return Err(JobError::lease_lost());
            }
            if ctx.cancelled().await? {
                info!(symbol = %etf.symbol, "Cancellation observed before symbol");
                return Err(JobError::cancelled());
            }

            progress.current_item = Some(etf.symbol.clone());
            let outcome = self.service.fetch_symbol(&etf.symbol).await?;

            if outcome.success {
                progress.completed += 1;
            } else {
                progress.failed += 1;
            }
            outcomes.push(outcome);
            ctx.progress(&progress).await?;
        }

        let summary = FetchSummary::tally(outcomes);
        if summary.succeeded == 0 {
            return Err(JobError::new(
                ErrorKind::UpstreamTotalFailure,
                format!("all {} symbols failed", summary.total),
            ));
        }

        serde_json::to_value(summary)
            .map_err(|e| JobError::new(ErrorKind::Validation, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(symbol: &str, success: bool, cache_hit: bool, api_called: bool) -> SymbolFetchOutcome {
        SymbolFetchOutcome {
            symbol: symbol.to_string(),
            isin: Some("INF204KB14I2".to_string()),
            success,
            cache_hit,
            api_called,
            holdings_count: if success { 50 } else { 0 },
            error: (!success).then(|| "upstream_http: upstream returned status 502".to_string()),
        }
    }

    #[test]
    fn tally_counts_cache_hits_and_api_calls_separately() {
        let summary = FetchSummary::tally(vec![
            outcome("UTINIFTETF", true, true, false),
            outcome("NIFTYBEES", true, false, true),
            outcome("GOLDBEES", false, false, true),
        ]);

        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.cache_hits, 1);
        assert_eq!(summary.api_calls, 2);
    }

    #[test]
    fn all_payload_tolerates_missing_limit() {
        let payload: FetchHoldingsAllPayload = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(payload.limit.is_none());

        let payload: FetchHoldingsAllPayload =
            serde_json::from_value(serde_json::json!({"limit": 5})).unwrap();
        assert_eq!(payload.limit, Some(5));
    }
}
