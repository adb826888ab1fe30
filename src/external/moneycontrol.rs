use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::external::holdings_provider::{HoldingsProvider, HoldingsProviderError};
use crate::models::EtfHoldingRecord;

const DEFAULT_BASE_URL: &str = "https://mf.moneycontrol.com";

/// Holdings source backed by the moneycontrol scheme-holding endpoint.
pub struct MoneycontrolProvider {
    client: Client,
    base_url: String,
}

impl MoneycontrolProvider {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl HoldingsProvider for MoneycontrolProvider {
    async fn fetch_holdings(
        &self,
        isin: &str,
    ) -> Result<Vec<EtfHoldingRecord>, HoldingsProviderError> {
        let url = format!(
            "{}/service/etf/v1/getSchemeHoldingData?isin={}&key=Stocks",
            self.base_url, isin
        );
        debug!("Fetching ETF holdings from {}", url);

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                HoldingsProviderError::Timeout
            } else {
                HoldingsProviderError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(HoldingsProviderError::Status(status.as_u16()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| HoldingsProviderError::Parse(e.to_string()))?;
        parse_payload(&body)
    }
}

/// Map the upstream payload to holdings records. The endpoint has shipped
/// both `{data: [...]}` and bare-array bodies, and two spellings for most
/// fields, so extraction stays lenient.
pub fn parse_payload(body: &Value) -> Result<Vec<EtfHoldingRecord>, HoldingsProviderError> {
    let items = match body {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("data") {
            Some(Value::Array(items)) => items.as_slice(),
            Some(other) => {
                return Err(HoldingsProviderError::Parse(format!(
                    "'data' is not an array: {}",
                    other
                )))
            }
            None => {
                return Err(HoldingsProviderError::Parse(
                    "body has neither an array nor a 'data' field".to_string(),
                ))
            }
        },
        other => {
            return Err(HoldingsProviderError::Parse(format!(
                "unexpected body: {}",
                other
            )))
        }
    };

    let mut holdings = Vec::with_capacity(items.len());
    for item in items {
        let stock_name = string_field(item, &["name", "stock_name"])
            .unwrap_or_else(|| "Unknown".to_string());
        holdings.push(EtfHoldingRecord {
            stock_name,
            isin_code: string_field(item, &["isin_code", "isin"]),
            percentage: float_field(item, &["holdingPer", "percentage"]),
            market_value: float_field(item, &["investedAmount", "market_value"]),
            quantity: int_field(item, &["quantity"]),
        });
    }
    Ok(holdings)
}

fn string_field(item: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        item.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    })
}

/// Percent-ish values arrive as numbers or strings like "10.42%".
fn float_field(item: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| match item.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    })
}

fn int_field(item: &Value, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|key| match item.get(key) {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_wrapped_data_array() {
        let body = json!({
            "data": [
                {"name": "Reliance Industries", "isin": "INE002A01018", "holdingPer": 10.42},
                {"stock_name": "HDFC Bank", "isin_code": "INE040A01034", "percentage": "9.67%"}
            ]
        });
        let holdings = parse_payload(&body).unwrap();
        assert_eq!(holdings.len(), 2);
        assert_eq!(holdings[0].stock_name, "Reliance Industries");
        assert_eq!(holdings[0].percentage, Some(10.42));
        assert_eq!(holdings[1].isin_code.as_deref(), Some("INE040A01034"));
        assert_eq!(holdings[1].percentage, Some(9.67));
    }

    #[test]
    fn parses_bare_array_body() {
        let body = json!([
            {"name": "Infosys", "isin": "INE009A01021", "holdingPer": "5.5",
             "investedAmount": 120000.5, "quantity": 4200}
        ]);
        let holdings = parse_payload(&body).unwrap();
        assert_eq!(holdings[0].market_value, Some(120000.5));
        assert_eq!(holdings[0].quantity, Some(4200));
    }

    #[test]
    fn missing_name_falls_back_to_unknown() {
        let body = json!([{"isin": "INE009A01021"}]);
        let holdings = parse_payload(&body).unwrap();
        assert_eq!(holdings[0].stock_name, "Unknown");
    }

    #[test]
    fn non_tabular_body_is_a_parse_error() {
        assert!(parse_payload(&json!({"message": "no data"})).is_err());
        assert!(parse_payload(&json!("nope")).is_err());
        assert!(parse_payload(&json!({"data": {"x": 1}})).is_err());
    }
}
