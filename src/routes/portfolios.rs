use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::info;

use crate::db::portfolio_queries;
use crate::errors::AppError;
use crate::models::response::ApiEnvelope;
use crate::models::{CreatePortfolio, FundStatistics, IsinHolding, Portfolio};
use crate::services::portfolio_service;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/portfolios", post(create_portfolio).get(list_portfolios))
        .route("/portfolios/search", get(search_portfolios))
        .route("/portfolios/:id", get(get_portfolio))
        .route("/holdings/:isin", get(holdings_by_isin))
        .route("/funds/:name/statistics", get(fund_statistics))
}

async fn create_portfolio(
    State(state): State<AppState>,
    Json(data): Json<CreatePortfolio>,
) -> Result<(StatusCode, Json<ApiEnvelope<Portfolio>>), AppError> {
    info!(
        "POST /portfolios - Upserting portfolio for '{}' ({})",
        data.mutual_fund_name, data.portfolio_date
    );

    let portfolio = portfolio_service::upsert(&state.pool, data, None).await?;
    // Fresh inserts leave both timestamps at the same instant
    let created = portfolio.created_at == portfolio.updated_at;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let message = if created {
        "Portfolio created"
    } else {
        "Portfolio updated"
    };
    Ok((status, Json(ApiEnvelope::success(message, portfolio))))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    fund_name: Option<String>,
    limit: Option<i64>,
}

async fn list_portfolios(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ApiEnvelope<Vec<Portfolio>>>, AppError> {
    info!("GET /portfolios - Listing portfolios");
    let portfolios = portfolio_queries::list(
        &state.pool,
        params.fund_name.as_deref(),
        params.limit.unwrap_or(50),
    )
    .await?;
    let message = format!("{} portfolios", portfolios.len());
    Ok(Json(ApiEnvelope::success(message, portfolios)))
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    fund_name: String,
    limit: Option<i64>,
}

async fn search_portfolios(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<ApiEnvelope<Vec<Portfolio>>>, AppError> {
    info!(
        "GET /portfolios/search - fund_name contains '{}'",
        params.fund_name
    );
    let portfolios = portfolio_queries::search_by_fund_name(
        &state.pool,
        &params.fund_name,
        params.limit.unwrap_or(50),
    )
    .await?;
    let message = format!("{} matches", portfolios.len());
    Ok(Json(ApiEnvelope::success(message, portfolios)))
}

async fn get_portfolio(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiEnvelope<Portfolio>>, AppError> {
    info!("GET /portfolios/{} - Fetching portfolio", id);
    let portfolio = portfolio_service::fetch_one(&state.pool, &id).await?;
    Ok(Json(ApiEnvelope::success("Portfolio found", portfolio)))
}

async fn holdings_by_isin(
    State(state): State<AppState>,
    Path(isin): Path<String>,
) -> Result<Json<ApiEnvelope<Vec<IsinHolding>>>, AppError> {
    info!("GET /holdings/{} - Cross-portfolio ISIN scan", isin);
    let holdings = portfolio_queries::holdings_by_isin(&state.pool, &isin).await?;
    let message = format!("{} holdings with ISIN {}", holdings.len(), isin);
    Ok(Json(ApiEnvelope::success(message, holdings)))
}

async fn fund_statistics(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApiEnvelope<FundStatistics>>, AppError> {
    info!("GET /funds/{}/statistics - Aggregating", name);
    let stats = portfolio_queries::fund_statistics(&state.pool, &name)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no portfolios for fund: {name}")))?;
    Ok(Json(ApiEnvelope::success("Fund statistics", stats)))
}
