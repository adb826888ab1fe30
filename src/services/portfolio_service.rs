use sqlx::PgPool;
use uuid::Uuid;

use crate::db::portfolio_queries;
use crate::errors::AppError;
use crate::models::{CreatePortfolio, Portfolio};

/// Upsert a portfolio by natural key. `id` is the sheet identity for
/// workbook-ingested portfolios; direct API submissions get a fresh UUID.
pub async fn upsert(
    pool: &PgPool,
    input: CreatePortfolio,
    id: Option<String>,
) -> Result<Portfolio, AppError> {
    input.validate()?;
    let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let portfolio = portfolio_queries::upsert(pool, &id, &input).await?;
    Ok(portfolio)
}

pub async fn fetch_one(pool: &PgPool, id: &str) -> Result<Portfolio, AppError> {
    portfolio_queries::fetch_one(pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("portfolio not found: {id}")))
}
