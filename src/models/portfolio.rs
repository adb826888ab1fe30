use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

use crate::errors::AppError;

/// One instrument line of a fund statement. Values stay as received so the
/// source precision and units ("0.0159%") survive storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    pub name_of_instrument: String,
    pub isin_code: String,
    pub percentage_to_nav: String,
}

/// An extracted fund statement. `(mutual_fund_name, portfolio_date)` is the
/// natural key; `id` is the sheet identity for workbook-ingested portfolios.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Portfolio {
    pub id: String,
    pub mutual_fund_name: String,
    pub portfolio_date: String,
    pub total_holdings: i32,
    pub portfolio_holdings: Json<Vec<Holding>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePortfolio {
    pub mutual_fund_name: String,
    pub portfolio_date: String,
    pub portfolio_holdings: Vec<Holding>,
}

impl CreatePortfolio {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.mutual_fund_name.trim().is_empty() {
            return Err(AppError::Validation(
                "mutual_fund_name must not be empty".to_string(),
            ));
        }
        if self.portfolio_date.trim().is_empty() {
            return Err(AppError::Validation(
                "portfolio_date must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// A holding matched by ISIN, with the portfolio it belongs to.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct IsinHolding {
    pub portfolio_id: String,
    pub mutual_fund_name: String,
    pub portfolio_date: String,
    pub name_of_instrument: String,
    pub isin_code: String,
    pub percentage_to_nav: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FundStatistics {
    pub fund_name: String,
    pub portfolio_count: i64,
    pub portfolio_dates: Vec<String>,
    pub total_holdings: i64,
    pub avg_holdings: f64,
    pub latest_update: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holding() -> Holding {
        Holding {
            name_of_instrument: "Multi Commodity Exchange of India Limited".to_string(),
            isin_code: "INE745G01035".to_string(),
            percentage_to_nav: "0.0159%".to_string(),
        }
    }

    #[test]
    fn holding_preserves_source_formatting() {
        let json = serde_json::to_value(holding()).unwrap();
        assert_eq!(json["percentage_to_nav"], "0.0159%");
        assert_eq!(json["isin_code"], "INE745G01035");
    }

    #[test]
    fn create_portfolio_rejects_blank_natural_key() {
        let bad = CreatePortfolio {
            mutual_fund_name: "  ".to_string(),
            portfolio_date: "March 2025".to_string(),
            portfolio_holdings: vec![holding()],
        };
        assert!(bad.validate().is_err());

        let ok = CreatePortfolio {
            mutual_fund_name: "Motilal Oswal Nifty Smallcap 250 Index Fund".to_string(),
            portfolio_date: "March 2025".to_string(),
            portfolio_holdings: vec![holding()],
        };
        assert!(ok.validate().is_ok());
    }
}
