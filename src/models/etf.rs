use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

/// ETF descriptor sourced from the scheme catalogue. Read-only to this
/// service; holdings fetches only ever consult it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EtfMetadata {
    pub symbol: String,
    pub isin: Option<String>,
    pub name: Option<String>,
    pub fund_house: Option<String>,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One constituent of an ETF holdings payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtfHoldingRecord {
    pub stock_name: String,
    pub isin_code: Option<String>,
    pub percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<i64>,
}

/// Snapshot of an ETF's holdings, stored in its own collection keyed by
/// symbol. Writing one never touches the metadata document.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct HoldingsSnapshot {
    pub symbol: String,
    pub isin: Option<String>,
    pub name: Option<String>,
    pub holdings: Json<Vec<EtfHoldingRecord>>,
    pub total_holdings: i32,
    pub fetched_at: DateTime<Utc>,
    pub source_etag: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EtfStats {
    pub total_etfs: i64,
    pub etfs_with_isin: i64,
    pub snapshots_stored: i64,
    pub isin_coverage_pct: f64,
    pub holdings_coverage_pct: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_holding_fields_are_omitted() {
        let record = EtfHoldingRecord {
            stock_name: "Reliance Industries".to_string(),
            isin_code: Some("INE002A01018".to_string()),
            percentage: Some(10.42),
            market_value: None,
            quantity: None,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("market_value").is_none());
        assert!(value.get("quantity").is_none());
        assert_eq!(value["percentage"], 10.42);
    }
}
