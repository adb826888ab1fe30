pub mod failure_cache;
pub mod holdings_service;
pub mod llm_service;
pub mod manual_parser;
pub mod portfolio_service;
pub mod rate_limiter;
pub mod workbook;
