use sqlx::PgPool;
use tracing::info;

use crate::errors::AppError;

/// DDL applied at startup. Every statement is idempotent so restarts and
/// concurrent instances are safe.
const STATEMENTS: &[&str] = &[
    r#"
    DO $$ BEGIN
        CREATE TYPE job_status AS ENUM ('queued', 'running', 'completed', 'failed', 'cancelled');
    EXCEPTION WHEN duplicate_object THEN NULL;
    END $$
    "#,
    r#"
    DO $$ BEGIN
        CREATE TYPE job_kind AS ENUM ('workbook_ingest', 'fetch_holdings_one', 'fetch_holdings_all');
    EXCEPTION WHEN duplicate_object THEN NULL;
    END $$
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id                 UUID PRIMARY KEY,
        kind               job_kind NOT NULL,
        payload            JSONB NOT NULL DEFAULT '{}'::jsonb,
        status             job_status NOT NULL DEFAULT 'queued',
        progress_total     INT NOT NULL DEFAULT 0,
        progress_completed INT NOT NULL DEFAULT 0,
        progress_failed    INT NOT NULL DEFAULT 0,
        current_item       TEXT,
        percentage         DOUBLE PRECISION NOT NULL DEFAULT 0,
        result             JSONB,
        error              JSONB,
        attempts           INT NOT NULL DEFAULT 0,
        worker_id          TEXT,
        lease_expires_at   TIMESTAMPTZ,
        created_at         TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        started_at         TIMESTAMPTZ,
        completed_at       TIMESTAMPTZ,
        callback_url       TEXT,
        user_id            TEXT,
        cancel_requested   BOOLEAN NOT NULL DEFAULT FALSE,
        webhook_error      TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs (status)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_status_lease ON jobs (status, lease_expires_at)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs (created_at)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_callback_url ON jobs (callback_url)",
    r#"
    CREATE TABLE IF NOT EXISTS portfolios (
        id                 TEXT PRIMARY KEY,
        mutual_fund_name   TEXT NOT NULL,
        portfolio_date     TEXT NOT NULL,
        total_holdings     INT NOT NULL,
        portfolio_holdings JSONB NOT NULL DEFAULT '[]'::jsonb,
        created_at         TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at         TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_portfolios_natural_key ON portfolios (mutual_fund_name, portfolio_date)",
    "CREATE INDEX IF NOT EXISTS idx_portfolios_fund_name ON portfolios (mutual_fund_name)",
    "CREATE INDEX IF NOT EXISTS idx_portfolios_date ON portfolios (portfolio_date)",
    "CREATE INDEX IF NOT EXISTS idx_portfolios_updated_at ON portfolios (updated_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_portfolios_holdings ON portfolios USING GIN (portfolio_holdings jsonb_path_ops)",
    r#"
    CREATE TABLE IF NOT EXISTS etf_metadata (
        symbol     TEXT PRIMARY KEY,
        isin       TEXT,
        name       TEXT,
        fund_house TEXT,
        category   TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_etf_metadata_isin ON etf_metadata (isin)",
    r#"
    CREATE TABLE IF NOT EXISTS etf_holdings (
        symbol         TEXT PRIMARY KEY,
        isin           TEXT,
        name           TEXT,
        holdings       JSONB NOT NULL DEFAULT '[]'::jsonb,
        total_holdings INT NOT NULL DEFAULT 0,
        fetched_at     TIMESTAMPTZ NOT NULL,
        source_etag    TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_etf_holdings_fetched_at ON etf_holdings (fetched_at)",
    r#"
    CREATE TABLE IF NOT EXISTS workbook_uploads (
        id           UUID PRIMARY KEY,
        filename     TEXT NOT NULL,
        content      BYTEA NOT NULL,
        content_hash TEXT NOT NULL,
        sheet_count  INT NOT NULL DEFAULT 0,
        created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_workbook_uploads_hash ON workbook_uploads (content_hash)",
];

pub async fn ensure_schema(pool: &PgPool) -> Result<(), AppError> {
    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }
    info!("🗄️  Schema and indexes ensured ({} statements)", STATEMENTS.len());
    Ok(())
}
