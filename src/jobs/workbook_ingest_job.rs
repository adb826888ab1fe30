use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::upload_queries;
use crate::errors::{ErrorKind, JobError, LlmError};
use crate::jobs::{JobContext, JobHandler};
use crate::models::{CreatePortfolio, JobKind, JobProgress};
use crate::services::llm_service::LlmClient;
use crate::services::manual_parser::ManualParser;
use crate::services::portfolio_service;
use crate::services::workbook::{sheet_identity, SheetBlock, WorkbookDecoder};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseMethod {
    Manual,
    #[default]
    Llm,
}

impl std::str::FromStr for ParseMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "manual" => Ok(ParseMethod::Manual),
            "llm" => Ok(ParseMethod::Llm),
            other => Err(format!("unknown parse_method: {other}")),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WorkbookIngestPayload {
    pub upload_id: Uuid,
    #[serde(default)]
    pub parse_method: ParseMethod,
    /// When true, an unavailable LLM fails the sheet instead of falling
    /// back to the manual parser.
    #[serde(default)]
    pub pin_parser: bool,
}

#[derive(Debug, Serialize)]
pub struct SheetError {
    pub sheet: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct IngestSummary {
    pub total_sheets: usize,
    pub parsed_sheets: usize,
    pub failed_sheets: usize,
    pub portfolio_ids: Vec<String>,
    pub sheet_errors: Vec<SheetError>,
    pub parse_method: ParseMethod,
}

/// Parse one sheet with the selected method. Returns the portfolio and the
/// method that actually produced it ("llm", "manual", "manual_fallback").
pub async fn parse_sheet(
    manual: &ManualParser,
    llm: &Arc<dyn LlmClient>,
    sheet: &SheetBlock,
    method: ParseMethod,
    pin_parser: bool,
) -> Result<(CreatePortfolio, &'static str), JobError> {
    match method {
        ParseMethod::Manual => manual.parse(sheet).map(|p| (p, "manual")),
        ParseMethod::Llm => match llm.structured_portfolio(sheet).await {
            Ok(portfolio) => Ok((portfolio, "llm")),
            Err(e) if e.permits_fallback() && !pin_parser => {
                warn!(
                    sheet = %sheet.name,
                    "LLM parse unavailable ({}), falling back to manual parser", e
                );
                manual.parse(sheet).map(|p| (p, "manual_fallback"))
            }
            Err(e) => Err(llm_sheet_error(&sheet.name, e)),
        },
    }
}

fn llm_sheet_error(sheet: &str, e: LlmError) -> JobError {
    let kind = match e {
        LlmError::Timeout => ErrorKind::UpstreamTimeout,
        LlmError::InvalidResponse(_) => ErrorKind::UpstreamParse,
        _ => ErrorKind::UpstreamHttp,
    };
    JobError::new(kind, format!("sheet '{sheet}': {e}"))
}

/// Workbook ingestion: decompose into sheets, parse each one, upsert the
/// portfolio under its sheet identity.
pub struct WorkbookIngestHandler {
    pool: PgPool,
    decoder: Arc<dyn WorkbookDecoder>,
    manual: ManualParser,
    llm: Arc<dyn LlmClient>,
}

impl WorkbookIngestHandler {
    pub fn new(
        pool: PgPool,
        decoder: Arc<dyn WorkbookDecoder>,
        manual: ManualParser,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            pool,
            decoder,
            manual,
            llm,
        }
    }
}

#[async_trait]
impl JobHandler for WorkbookIngestHandler {
    fn kind(&self) -> JobKind {
        JobKind::WorkbookIngest
    }

    async fn run(
        &self,
        payload: serde_json::Value,
        ctx: &JobContext,
    ) -> Result<serde_json::Value, JobError> {
        let payload: WorkbookIngestPayload = serde_json::from_value(payload)
            .map_err(|e| JobError::validation(format!("bad workbook_ingest payload: {e}")))?;

        let upload = upload_queries::get(&self.pool, payload.upload_id)
            .await
            .map_err(crate::errors::AppError::from)?
            .ok_or_else(|| {
                JobError::new(
                    ErrorKind::NotFound,
                    format!("workbook upload not found: {}", payload.upload_id),
                )
            })?;

        let sheets = self
            .decoder
            .decode(&upload.content)
            .map_err(|e| JobError::new(ErrorKind::ParseTotalFailure, e.to_string()))?;
        if sheets.is_empty() {
            return Err(JobError::new(
                ErrorKind::ParseTotalFailure,
                "workbook contains no sheets",
            ));
        }

        let mut progress = JobProgress::new(sheets.len() as i32);
        ctx.progress(&progress).await?;

        let mut summary = IngestSummary {
            total_sheets: sheets.len(),
            parsed_sheets: 0,
            failed_sheets: 0,
            portfolio_ids: Vec::new(),
            sheet_errors: Vec::new(),
            parse_method: payload.parse_method,
        };

        for sheet in &sheets {
            if ctx.lease_lost() {
                return Err(JobError::lease_lost());
            }
            if ctx.cancelled().await? {
                info!(sheet = %sheet.name, "Cancellation observed before sheet");
                return Err(JobError::cancelled());
            }

            progress.current_item = Some(sheet.name.clone());
            let sid = sheet_identity(&upload.content_hash, sheet.index, &sheet.name);

            let parsed = parse_sheet(
                &self.manual,
                &self.llm,
                sheet,
                payload.parse_method,
                payload.pin_parser,
            )
            .await;

            match parsed {
                Ok((portfolio, method_used)) => {
                    match portfolio_service::upsert(&self.pool, portfolio, Some(sid.clone())).await
                    {
                        Ok(stored) => {
                            info!(
                                sheet = %sheet.name,
                                portfolio_id = %stored.id,
                                method = method_used,
                                "✅ Sheet parsed and stored"
                            );
                            summary.parsed_sheets += 1;
                            progress.completed += 1;
                            summary.portfolio_ids.push(stored.id);
                        }
                        // Store trouble is systemic, not a per-sheet condition
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) => {
                    warn!(sheet = %sheet.name, "❌ Sheet failed: {}", e);
                    summary.failed_sheets += 1;
                    progress.failed += 1;
                    summary.sheet_errors.push(SheetError {
                        sheet: sheet.name.clone(),
                        error: e.to_string(),
                    });
                }
            }

            ctx.progress(&progress).await?;
        }

        if summary.parsed_sheets == 0 {
            return Err(JobError::new(
                ErrorKind::ParseTotalFailure,
                format!("all {} sheets failed to parse", summary.total_sheets),
            ));
        }

        Ok(serde_json::to_value(summary)
            .map_err(|e| JobError::new(ErrorKind::Validation, e.to_string()))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Holding;

    struct FailingLlm(fn() -> LlmError);

    #[async_trait]
    impl LlmClient for FailingLlm {
        async fn structured_portfolio(
            &self,
            _sheet: &SheetBlock,
        ) -> Result<CreatePortfolio, LlmError> {
            Err((self.0)())
        }
    }

    struct FixedLlm;

    #[async_trait]
    impl LlmClient for FixedLlm {
        async fn structured_portfolio(
            &self,
            _sheet: &SheetBlock,
        ) -> Result<CreatePortfolio, LlmError> {
            Ok(CreatePortfolio {
                mutual_fund_name: "LLM Fund".to_string(),
                portfolio_date: "March 2025".to_string(),
                portfolio_holdings: vec![Holding {
                    name_of_instrument: "Reliance Industries".to_string(),
                    isin_code: "INE002A01018".to_string(),
                    percentage_to_nav: "9.1%".to_string(),
                }],
            })
        }
    }

    fn sheet() -> SheetBlock {
        SheetBlock {
            index: 0,
            name: "YO01".to_string(),
            rows: vec![
                vec!["Name of Instrument".into(), "ISIN".into(), "% to NAV".into()],
                vec!["Reliance Industries".into(), "INE002A01018".into(), "9.1%".into()],
            ],
        }
    }

    #[test]
    fn parse_method_accepts_wire_values() {
        assert_eq!("manual".parse::<ParseMethod>().unwrap(), ParseMethod::Manual);
        assert_eq!("LLM".parse::<ParseMethod>().unwrap(), ParseMethod::Llm);
        assert!("pandas".parse::<ParseMethod>().is_err());
    }

    #[test]
    fn payload_defaults_to_llm_without_pin() {
        let payload: WorkbookIngestPayload = serde_json::from_value(serde_json::json!({
            "upload_id": Uuid::new_v4(),
        }))
        .unwrap();
        assert_eq!(payload.parse_method, ParseMethod::Llm);
        assert!(!payload.pin_parser);
    }

    #[tokio::test]
    async fn llm_success_is_used_directly() {
        let llm: Arc<dyn LlmClient> = Arc::new(FixedLlm);
        let (portfolio, method) = parse_sheet(
            &ManualParser::default(),
            &llm,
            &sheet(),
            ParseMethod::Llm,
            false,
        )
        .await
        .unwrap();
        assert_eq!(method, "llm");
        assert_eq!(portfolio.mutual_fund_name, "LLM Fund");
    }

    #[tokio::test]
    async fn unavailable_llm_falls_back_to_manual() {
        let llm: Arc<dyn LlmClient> = Arc::new(FailingLlm(|| LlmError::Disabled));
        let (portfolio, method) = parse_sheet(
            &ManualParser::default(),
            &llm,
            &sheet(),
            ParseMethod::Llm,
            false,
        )
        .await
        .unwrap();
        assert_eq!(method, "manual_fallback");
        assert_eq!(portfolio.portfolio_holdings.len(), 1);
    }

    #[tokio::test]
    async fn pinned_llm_does_not_fall_back() {
        let llm: Arc<dyn LlmClient> = Arc::new(FailingLlm(|| LlmError::Disabled));
        let err = parse_sheet(
            &ManualParser::default(),
            &llm,
            &sheet(),
            ParseMethod::Llm,
            true,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UpstreamHttp);
    }

    #[tokio::test]
    async fn llm_timeout_maps_to_upstream_timeout_when_pinned() {
        let llm: Arc<dyn LlmClient> = Arc::new(FailingLlm(|| LlmError::Timeout));
        let err = parse_sheet(
            &ManualParser::default(),
            &llm,
            &sheet(),
            ParseMethod::Llm,
            true,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UpstreamTimeout);
    }

    #[tokio::test]
    async fn manual_method_never_touches_the_llm() {
        let llm: Arc<dyn LlmClient> = Arc::new(FailingLlm(|| LlmError::ApiError("401".into())));
        let (_, method) = parse_sheet(
            &ManualParser::default(),
            &llm,
            &sheet(),
            ParseMethod::Manual,
            false,
        )
        .await
        .unwrap();
        assert_eq!(method, "manual");
    }
}
