use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;

use crate::models::{EtfHoldingRecord, EtfMetadata, EtfStats, HoldingsSnapshot};

const METADATA_COLUMNS: &str = "symbol, isin, name, fund_house, category, created_at";
const SNAPSHOT_COLUMNS: &str =
    "symbol, isin, name, holdings, total_holdings, fetched_at, source_etag";

pub async fn get_metadata(
    pool: &PgPool,
    symbol: &str,
) -> Result<Option<EtfMetadata>, sqlx::Error> {
    let sql = format!("SELECT {METADATA_COLUMNS} FROM etf_metadata WHERE symbol = $1");
    sqlx::query_as::<_, EtfMetadata>(&sql)
        .bind(symbol)
        .fetch_optional(pool)
        .await
}

/// Candidates for a fleet fetch. Symbol order keeps re-runs deterministic.
pub async fn list_with_isin(
    pool: &PgPool,
    limit: Option<i64>,
) -> Result<Vec<EtfMetadata>, sqlx::Error> {
    let sql = format!(
        "SELECT {METADATA_COLUMNS} FROM etf_metadata
         WHERE isin IS NOT NULL AND isin <> ''
         ORDER BY symbol
         LIMIT $1"
    );
    sqlx::query_as::<_, EtfMetadata>(&sql)
        .bind(limit.unwrap_or(i64::MAX))
        .fetch_all(pool)
        .await
}

pub async fn search_metadata(
    pool: &PgPool,
    query: &str,
    limit: i64,
) -> Result<Vec<EtfMetadata>, sqlx::Error> {
    let sql = format!(
        "SELECT {METADATA_COLUMNS} FROM etf_metadata
         WHERE symbol ILIKE $1 OR name ILIKE $1
         ORDER BY symbol
         LIMIT $2"
    );
    sqlx::query_as::<_, EtfMetadata>(&sql)
        .bind(format!("%{}%", query))
        .bind(limit)
        .fetch_all(pool)
        .await
}

/// Replace the stored snapshot for a symbol. Touches only the holdings
/// collection; ETF metadata stays as loaded.
pub async fn upsert_snapshot(
    pool: &PgPool,
    symbol: &str,
    isin: Option<&str>,
    name: Option<&str>,
    holdings: &[EtfHoldingRecord],
    fetched_at: DateTime<Utc>,
    source_etag: Option<&str>,
) -> Result<HoldingsSnapshot, sqlx::Error> {
    let sql = format!(
        "INSERT INTO etf_holdings (symbol, isin, name, holdings, total_holdings, fetched_at, source_etag)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         ON CONFLICT (symbol) DO UPDATE SET
            isin = EXCLUDED.isin,
            name = EXCLUDED.name,
            holdings = EXCLUDED.holdings,
            total_holdings = EXCLUDED.total_holdings,
            fetched_at = EXCLUDED.fetched_at,
            source_etag = EXCLUDED.source_etag
         RETURNING {SNAPSHOT_COLUMNS}"
    );
    sqlx::query_as::<_, HoldingsSnapshot>(&sql)
        .bind(symbol)
        .bind(isin)
        .bind(name)
        .bind(Json(holdings))
        .bind(holdings.len() as i32)
        .bind(fetched_at)
        .bind(source_etag)
        .fetch_one(pool)
        .await
}

pub async fn get_snapshot(
    pool: &PgPool,
    symbol: &str,
) -> Result<Option<HoldingsSnapshot>, sqlx::Error> {
    let sql = format!("SELECT {SNAPSHOT_COLUMNS} FROM etf_holdings WHERE symbol = $1");
    sqlx::query_as::<_, HoldingsSnapshot>(&sql)
        .bind(symbol)
        .fetch_optional(pool)
        .await
}

pub async fn stats(pool: &PgPool) -> Result<EtfStats, sqlx::Error> {
    let (total_etfs, etfs_with_isin): (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*),
                COUNT(*) FILTER (WHERE isin IS NOT NULL AND isin <> '')
         FROM etf_metadata",
    )
    .fetch_one(pool)
    .await?;

    let snapshots_stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM etf_holdings")
        .fetch_one(pool)
        .await?;

    let pct = |num: i64, den: i64| {
        if den == 0 {
            0.0
        } else {
            (num as f64 / den as f64) * 100.0
        }
    };

    Ok(EtfStats {
        total_etfs,
        etfs_with_isin,
        snapshots_stored,
        isin_coverage_pct: pct(etfs_with_isin, total_etfs),
        holdings_coverage_pct: pct(snapshots_stored, etfs_with_isin),
    })
}
