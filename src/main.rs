use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;

use fundfolio::config::Config;
use fundfolio::db::{schema, JobStore};
use fundfolio::external::moneycontrol::MoneycontrolProvider;
use fundfolio::jobs::fetch_holdings_job::{FetchHoldingsAllHandler, FetchHoldingsOneHandler};
use fundfolio::jobs::recovery::Recovery;
use fundfolio::jobs::scheduler::{Scheduler, SchedulerConfig};
use fundfolio::jobs::webhook::WebhookDispatcher;
use fundfolio::jobs::workbook_ingest_job::WorkbookIngestHandler;
use fundfolio::jobs::HandlerRegistry;
use fundfolio::logging::{init_logging, LoggingConfig};
use fundfolio::services::holdings_service::HoldingsService;
use fundfolio::services::llm_service;
use fundfolio::services::manual_parser::ManualParser;
use fundfolio::services::rate_limiter::UpstreamGate;
use fundfolio::services::workbook::{DelimitedWorkbookDecoder, WorkbookDecoder};
use fundfolio::state::AppState;
use fundfolio::{app, external::holdings_provider::HoldingsProvider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Initialize logging FIRST
    init_logging(LoggingConfig::from_env())?;

    let config = Arc::new(Config::from_env()?);

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    schema::ensure_schema(&pool).await?;

    let job_store = JobStore::new(pool.clone());

    let llm = llm_service::client_from_config(&config.llm);
    if config.llm.api_key.is_some() {
        tracing::info!("🤖 LLM parser enabled (provider: {})", config.llm.provider);
    } else {
        tracing::info!("🤖 LLM parser disabled; manual parser handles all sheets");
    }

    let gate = Arc::new(UpstreamGate::new(config.upstream_min_interval));
    tracing::info!(
        "⏱️  Upstream gate initialized: one call per {:?}",
        config.upstream_min_interval
    );

    let provider: Arc<dyn HoldingsProvider> =
        Arc::new(MoneycontrolProvider::new(config.upstream_timeout));
    let holdings = Arc::new(HoldingsService::new(
        pool.clone(),
        provider,
        gate,
        config.freshness_ttl_hours,
    ));

    let decoder: Arc<dyn WorkbookDecoder> = Arc::new(DelimitedWorkbookDecoder);
    let manual_parser = ManualParser::default();

    let webhooks = Arc::new(WebhookDispatcher::new(job_store.clone()));

    let registry = Arc::new(
        HandlerRegistry::new()
            .register(Arc::new(WorkbookIngestHandler::new(
                pool.clone(),
                decoder.clone(),
                manual_parser.clone(),
                llm.clone(),
            )))
            .register(Arc::new(FetchHoldingsOneHandler::new(holdings.clone())))
            .register(Arc::new(FetchHoldingsAllHandler::new(holdings.clone()))),
    );

    // Orphans from a previous run go back to the queue before workers start
    let recovery = Arc::new(Recovery::new(job_store.clone(), config.recovery_interval));
    recovery.startup_sweep().await?;
    recovery.clone().spawn();

    let scheduler = Arc::new(Scheduler::new(
        job_store.clone(),
        registry,
        webhooks.clone(),
        SchedulerConfig {
            worker_concurrency: config.worker_concurrency,
            lease_ttl: config.lease_ttl,
            heartbeat_interval: config.heartbeat_interval,
            poll_interval: config.poll_interval,
        },
    ));
    scheduler.spawn_workers();

    let state = AppState {
        pool,
        config: config.clone(),
        job_store,
        webhooks,
        decoder,
        manual_parser,
        llm,
        holdings,
    };
    let app = app::create_app(state);

    let listener = TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("🚀 fundfolio backend running at http://{}/", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
