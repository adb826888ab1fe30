use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::info;

use crate::db::etf_queries;
use crate::errors::AppError;
use crate::jobs::fetch_holdings_job::{FetchHoldingsAllPayload, FetchHoldingsOnePayload};
use crate::models::response::ApiEnvelope;
use crate::models::{EtfMetadata, EtfStats, HoldingsSnapshot, JobKind, SubmitJob};
use crate::routes::JobSubmitted;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/etf/fetch-holdings/:symbol", post(fetch_holdings_one))
        .route("/etf/fetch-all-holdings", post(fetch_all_holdings))
        .route("/etf/holdings/:symbol", get(get_holdings))
        .route("/etf/stats", get(etf_stats))
        .route("/etf/search", get(search_etfs))
}

/// Optional submission extras shared by the async ETF endpoints.
#[derive(Debug, Default, Deserialize)]
struct SubmitOptions {
    callback_url: Option<String>,
    user_id: Option<String>,
}

async fn fetch_holdings_one(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    options: Option<Json<SubmitOptions>>,
) -> Result<(StatusCode, Json<ApiEnvelope<JobSubmitted>>), AppError> {
    info!("POST /etf/fetch-holdings/{} - Queueing fetch", symbol);

    let metadata = etf_queries::get_metadata(&state.pool, &symbol)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("unknown ETF symbol: {symbol}")))?;
    if metadata.isin.as_deref().unwrap_or("").is_empty() {
        return Err(AppError::Validation(format!(
            "ETF {symbol} has no ISIN; holdings cannot be fetched"
        )));
    }

    let options = options.map(|Json(o)| o).unwrap_or_default();
    let payload = FetchHoldingsOnePayload { symbol: symbol.clone() };
    let job = state
        .job_store
        .insert(SubmitJob {
            kind: JobKind::FetchHoldingsOne,
            payload: serde_json::to_value(payload)
                .map_err(|e| AppError::Validation(e.to_string()))?,
            callback_url: options.callback_url,
            user_id: options.user_id,
        })
        .await?;

    info!(job_id = %job.id, "📋 Holdings fetch queued for {}", symbol);
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiEnvelope::success(
            format!("Holdings fetch queued for {symbol}"),
            JobSubmitted {
                job_id: job.id,
                status: job.status,
            },
        )),
    ))
}

#[derive(Debug, Deserialize)]
struct FleetParams {
    limit: Option<i64>,
}

async fn fetch_all_holdings(
    State(state): State<AppState>,
    Query(params): Query<FleetParams>,
    options: Option<Json<SubmitOptions>>,
) -> Result<(StatusCode, Json<ApiEnvelope<JobSubmitted>>), AppError> {
    info!(
        "POST /etf/fetch-all-holdings - Queueing fleet fetch (limit: {:?})",
        params.limit
    );

    let options = options.map(|Json(o)| o).unwrap_or_default();
    let payload = FetchHoldingsAllPayload {
        limit: params.limit,
    };
    let job = state
        .job_store
        .insert(SubmitJob {
            kind: JobKind::FetchHoldingsAll,
            payload: serde_json::to_value(payload)
                .map_err(|e| AppError::Validation(e.to_string()))?,
            callback_url: options.callback_url,
            user_id: options.user_id,
        })
        .await?;

    info!(job_id = %job.id, "📋 Fleet holdings fetch queued");
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiEnvelope::success(
            "Fleet holdings fetch queued",
            JobSubmitted {
                job_id: job.id,
                status: job.status,
            },
        )),
    ))
}

async fn get_holdings(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<ApiEnvelope<HoldingsSnapshot>>, AppError> {
    info!("GET /etf/holdings/{} - Fetching stored snapshot", symbol);
    let snapshot = etf_queries::get_snapshot(&state.pool, &symbol)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no holdings stored for {symbol}")))?;
    Ok(Json(ApiEnvelope::success("Holdings snapshot", snapshot)))
}

async fn etf_stats(
    State(state): State<AppState>,
) -> Result<Json<ApiEnvelope<EtfStats>>, AppError> {
    info!("GET /etf/stats - Collection statistics");
    let stats = etf_queries::stats(&state.pool).await?;
    Ok(Json(ApiEnvelope::success("ETF statistics", stats)))
}

#[derive(Debug, Deserialize)]
struct EtfSearchParams {
    query: String,
    limit: Option<i64>,
}

async fn search_etfs(
    State(state): State<AppState>,
    Query(params): Query<EtfSearchParams>,
) -> Result<Json<ApiEnvelope<Vec<EtfMetadata>>>, AppError> {
    info!("GET /etf/search - query '{}'", params.query);
    let etfs = etf_queries::search_metadata(
        &state.pool,
        &params.query,
        params.limit.unwrap_or(20),
    )
    .await?;
    let message = format!("{} ETFs", etfs.len());
    Ok(Json(ApiEnvelope::success(message, etfs)))
}
