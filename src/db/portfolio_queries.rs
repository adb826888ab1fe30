use sqlx::types::Json;
use sqlx::PgPool;

use crate::models::{CreatePortfolio, FundStatistics, IsinHolding, Portfolio};

const PORTFOLIO_COLUMNS: &str = "id, mutual_fund_name, portfolio_date, total_holdings, \
     portfolio_holdings, created_at, updated_at";

/// Upsert by natural key. An existing row keeps its `created_at` and adopts
/// the new id, so a re-ingested sheet always owns the document it produced.
pub async fn upsert(
    pool: &PgPool,
    id: &str,
    input: &CreatePortfolio,
) -> Result<Portfolio, sqlx::Error> {
    let sql = format!(
        "INSERT INTO portfolios
            (id, mutual_fund_name, portfolio_date, total_holdings, portfolio_holdings)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (mutual_fund_name, portfolio_date) DO UPDATE SET
            id = EXCLUDED.id,
            total_holdings = EXCLUDED.total_holdings,
            portfolio_holdings = EXCLUDED.portfolio_holdings,
            updated_at = NOW()
         RETURNING {PORTFOLIO_COLUMNS}"
    );
    sqlx::query_as::<_, Portfolio>(&sql)
        .bind(id)
        .bind(&input.mutual_fund_name)
        .bind(&input.portfolio_date)
        .bind(input.portfolio_holdings.len() as i32)
        .bind(Json(&input.portfolio_holdings))
        .fetch_one(pool)
        .await
}

pub async fn fetch_one(pool: &PgPool, id: &str) -> Result<Option<Portfolio>, sqlx::Error> {
    let sql = format!("SELECT {PORTFOLIO_COLUMNS} FROM portfolios WHERE id = $1");
    sqlx::query_as::<_, Portfolio>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn fetch_by_natural_key(
    pool: &PgPool,
    fund_name: &str,
    portfolio_date: &str,
) -> Result<Option<Portfolio>, sqlx::Error> {
    let sql = format!(
        "SELECT {PORTFOLIO_COLUMNS} FROM portfolios
         WHERE mutual_fund_name = $1 AND portfolio_date = $2"
    );
    sqlx::query_as::<_, Portfolio>(&sql)
        .bind(fund_name)
        .bind(portfolio_date)
        .fetch_optional(pool)
        .await
}

pub async fn list(
    pool: &PgPool,
    fund_name: Option<&str>,
    limit: i64,
) -> Result<Vec<Portfolio>, sqlx::Error> {
    match fund_name {
        Some(name) => {
            let sql = format!(
                "SELECT {PORTFOLIO_COLUMNS} FROM portfolios
                 WHERE mutual_fund_name = $1
                 ORDER BY updated_at DESC LIMIT $2"
            );
            sqlx::query_as::<_, Portfolio>(&sql)
                .bind(name)
                .bind(limit)
                .fetch_all(pool)
                .await
        }
        None => {
            let sql = format!(
                "SELECT {PORTFOLIO_COLUMNS} FROM portfolios
                 ORDER BY updated_at DESC LIMIT $1"
            );
            sqlx::query_as::<_, Portfolio>(&sql)
                .bind(limit)
                .fetch_all(pool)
                .await
        }
    }
}

pub async fn search_by_fund_name(
    pool: &PgPool,
    query: &str,
    limit: i64,
) -> Result<Vec<Portfolio>, sqlx::Error> {
    let sql = format!(
        "SELECT {PORTFOLIO_COLUMNS} FROM portfolios
         WHERE mutual_fund_name ILIKE $1
         ORDER BY updated_at DESC LIMIT $2"
    );
    sqlx::query_as::<_, Portfolio>(&sql)
        .bind(format!("%{}%", query))
        .bind(limit)
        .fetch_all(pool)
        .await
}

/// Cross-portfolio scan: every holding carrying the ISIN, with its fund and
/// date context. The GIN index on `portfolio_holdings` narrows the candidate
/// rows before the lateral expansion.
pub async fn holdings_by_isin(
    pool: &PgPool,
    isin: &str,
) -> Result<Vec<IsinHolding>, sqlx::Error> {
    sqlx::query_as::<_, IsinHolding>(
        "SELECT
            p.id AS portfolio_id,
            p.mutual_fund_name,
            p.portfolio_date,
            COALESCE(h.value->>'name_of_instrument', '') AS name_of_instrument,
            COALESCE(h.value->>'isin_code', '') AS isin_code,
            COALESCE(h.value->>'percentage_to_nav', '') AS percentage_to_nav
         FROM portfolios p
         CROSS JOIN LATERAL jsonb_array_elements(p.portfolio_holdings) AS h
         WHERE p.portfolio_holdings @> jsonb_build_array(jsonb_build_object('isin_code', $1::text))
           AND h.value->>'isin_code' = $1
         ORDER BY p.mutual_fund_name, p.portfolio_date",
    )
    .bind(isin)
    .fetch_all(pool)
    .await
}

pub async fn fund_statistics(
    pool: &PgPool,
    fund_name: &str,
) -> Result<Option<FundStatistics>, sqlx::Error> {
    let row = sqlx::query_as::<_, FundStatsRow>(
        "SELECT
            COUNT(*) AS portfolio_count,
            COALESCE(ARRAY_AGG(DISTINCT portfolio_date) FILTER (WHERE portfolio_date IS NOT NULL), '{}') AS portfolio_dates,
            COALESCE(SUM(total_holdings), 0)::BIGINT AS total_holdings,
            COALESCE(AVG(total_holdings::float8), 0) AS avg_holdings,
            MAX(updated_at) AS latest_update
         FROM portfolios
         WHERE mutual_fund_name = $1",
    )
    .bind(fund_name)
    .fetch_one(pool)
    .await?;

    if row.portfolio_count == 0 {
        return Ok(None);
    }
    Ok(Some(FundStatistics {
        fund_name: fund_name.to_string(),
        portfolio_count: row.portfolio_count,
        portfolio_dates: row.portfolio_dates,
        total_holdings: row.total_holdings,
        avg_holdings: row.avg_holdings,
        latest_update: row.latest_update,
    }))
}

pub async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM portfolios")
        .fetch_one(pool)
        .await
}

#[derive(sqlx::FromRow)]
struct FundStatsRow {
    portfolio_count: i64,
    portfolio_dates: Vec<String>,
    total_holdings: i64,
    avg_holdings: f64,
    latest_update: Option<chrono::DateTime<chrono::Utc>>,
}
