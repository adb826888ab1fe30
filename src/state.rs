use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::db::JobStore;
use crate::jobs::webhook::WebhookDispatcher;
use crate::services::holdings_service::HoldingsService;
use crate::services::llm_service::LlmClient;
use crate::services::manual_parser::ManualParser;
use crate::services::workbook::WorkbookDecoder;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub job_store: JobStore,
    pub webhooks: Arc<WebhookDispatcher>,
    pub decoder: Arc<dyn WorkbookDecoder>,
    pub manual_parser: ManualParser,
    pub llm: Arc<dyn LlmClient>,
    pub holdings: Arc<HoldingsService>,
}
