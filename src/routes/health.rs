use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tracing::{error, info};

use crate::db::portfolio_queries;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

#[derive(Serialize)]
struct HealthReport {
    status: &'static str,
    database: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    total_portfolios: Option<i64>,
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    info!("GET /health - Health check");

    match portfolio_queries::count(&state.pool).await {
        Ok(count) => (
            StatusCode::OK,
            Json(HealthReport {
                status: "healthy",
                database: "connected",
                total_portfolios: Some(count),
            }),
        ),
        Err(e) => {
            error!("Health check store ping failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthReport {
                    status: "unhealthy",
                    database: "unreachable",
                    total_portfolios: None,
                }),
            )
        }
    }
}
