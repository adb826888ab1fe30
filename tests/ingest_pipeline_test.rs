/// End-to-end checks for the workbook pipeline that run without a live
/// store: decode → sheet identity → parse, plus the fallback rules between
/// the LLM and manual parsers.
use std::sync::Arc;

use async_trait::async_trait;
use fundfolio::errors::{ErrorKind, LlmError};
use fundfolio::jobs::workbook_ingest_job::{parse_sheet, ParseMethod};
use fundfolio::models::CreatePortfolio;
use fundfolio::services::llm_service::{validate_response, LlmClient};
use fundfolio::services::manual_parser::ManualParser;
use fundfolio::services::workbook::{
    content_hash, sheet_identity, DelimitedWorkbookDecoder, SheetBlock, WorkbookDecoder,
};

const WORKBOOK: &str = "\
### YO01
Fund Name,Alpha Midcap Fund
Portfolio Date,March 2025
Name of Instrument,ISIN,% to NAV
Multi Commodity Exchange of India Limited,INE745G01035,0.0159%
Kaynes Technology India Limited,INE918Z01012,0.0231%
### YO03
Fund Name,Alpha Smallcap Fund
Portfolio Date,March 2025
Name of Instrument,ISIN,% to NAV
Reliance Industries,INE002A01018,9.1%
";

struct UnavailableLlm;

#[async_trait]
impl LlmClient for UnavailableLlm {
    async fn structured_portfolio(
        &self,
        _sheet: &SheetBlock,
    ) -> Result<CreatePortfolio, LlmError> {
        Err(LlmError::NetworkError("connection refused".to_string()))
    }
}

struct EchoLlm;

#[async_trait]
impl LlmClient for EchoLlm {
    async fn structured_portfolio(
        &self,
        sheet: &SheetBlock,
    ) -> Result<CreatePortfolio, LlmError> {
        // A provider would return JSON; reuse the response validator on a
        // body equivalent to what the manual parser sees.
        let body = format!(
            r#"{{"mutual_fund_name": "{}", "portfolio_date": "March 2025",
                "portfolio_holdings": [{{"name_of_instrument": "X",
                "isin_code": "INE000000000", "percentage_to_nav": "1%"}}]}}"#,
            sheet.name
        );
        validate_response(&body)
    }
}

#[tokio::test]
async fn two_sheet_workbook_parses_into_two_portfolios() {
    let bytes = WORKBOOK.as_bytes();
    let sheets = DelimitedWorkbookDecoder.decode(bytes).unwrap();
    assert_eq!(sheets.len(), 2);

    let hash = content_hash(bytes);
    let manual = ManualParser::default();
    let llm: Arc<dyn LlmClient> = Arc::new(UnavailableLlm);

    let mut ids = Vec::new();
    for sheet in &sheets {
        let sid = sheet_identity(&hash, sheet.index, &sheet.name);
        let (portfolio, method) = parse_sheet(&manual, &llm, sheet, ParseMethod::Llm, false)
            .await
            .unwrap();
        assert_eq!(method, "manual_fallback");
        assert!(!portfolio.portfolio_holdings.is_empty());
        ids.push(sid);
    }

    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);
    // Same workbook, same sheets: identities reproduce exactly
    let again = sheet_identity(&hash, sheets[0].index, &sheets[0].name);
    assert_eq!(ids[0], again);
}

#[tokio::test]
async fn natural_keys_come_from_the_preamble() {
    let sheets = DelimitedWorkbookDecoder.decode(WORKBOOK.as_bytes()).unwrap();
    let manual = ManualParser::default();

    let first = manual.parse(&sheets[0]).unwrap();
    assert_eq!(first.mutual_fund_name, "Alpha Midcap Fund");
    assert_eq!(first.portfolio_date, "March 2025");
    assert_eq!(first.portfolio_holdings.len(), 2);

    let second = manual.parse(&sheets[1]).unwrap();
    assert_eq!(second.mutual_fund_name, "Alpha Smallcap Fund");
    assert_eq!(second.portfolio_holdings[0].percentage_to_nav, "9.1%");
}

#[tokio::test]
async fn pinned_llm_failure_is_a_sheet_error_not_a_fallback() {
    let sheets = DelimitedWorkbookDecoder.decode(WORKBOOK.as_bytes()).unwrap();
    let llm: Arc<dyn LlmClient> = Arc::new(UnavailableLlm);

    let err = parse_sheet(
        &ManualParser::default(),
        &llm,
        &sheets[0],
        ParseMethod::Llm,
        true,
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::UpstreamHttp);
}

#[tokio::test]
async fn working_llm_wins_over_manual() {
    let sheets = DelimitedWorkbookDecoder.decode(WORKBOOK.as_bytes()).unwrap();
    let llm: Arc<dyn LlmClient> = Arc::new(EchoLlm);

    let (portfolio, method) = parse_sheet(
        &ManualParser::default(),
        &llm,
        &sheets[0],
        ParseMethod::Llm,
        false,
    )
    .await
    .unwrap();
    assert_eq!(method, "llm");
    assert_eq!(portfolio.mutual_fund_name, "YO01");
}

#[test]
fn unparseable_workbook_yields_no_sheets() {
    let sheets = DelimitedWorkbookDecoder.decode(b"").unwrap();
    assert!(sheets.is_empty());
}

#[test]
fn sheet_identity_depends_on_workbook_content() {
    let other = WORKBOOK.replace("9.1%", "9.2%");
    let h1 = content_hash(WORKBOOK.as_bytes());
    let h2 = content_hash(other.as_bytes());
    assert_ne!(
        sheet_identity(&h1, 0, "YO01"),
        sheet_identity(&h2, 0, "YO01")
    );
}
