use async_trait::async_trait;
use thiserror::Error;

use crate::errors::ErrorKind;
use crate::models::EtfHoldingRecord;

#[derive(Debug, Error)]
pub enum HoldingsProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("timeout")]
    Timeout,

    #[error("upstream returned status {0}")]
    Status(u16),

    #[error("parse error: {0}")]
    Parse(String),
}

impl HoldingsProviderError {
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            HoldingsProviderError::Timeout => ErrorKind::UpstreamTimeout,
            HoldingsProviderError::Network(_) | HoldingsProviderError::Status(_) => {
                ErrorKind::UpstreamHttp
            }
            HoldingsProviderError::Parse(_) => ErrorKind::UpstreamParse,
        }
    }

    /// 4xx responses will keep failing until the upstream catalogue changes.
    pub fn is_non_retryable(&self) -> bool {
        matches!(self, HoldingsProviderError::Status(code) if (400..500).contains(code))
    }
}

/// Capability interface for the upstream ETF holdings source.
#[async_trait]
pub trait HoldingsProvider: Send + Sync {
    async fn fetch_holdings(
        &self,
        isin: &str,
    ) -> Result<Vec<EtfHoldingRecord>, HoldingsProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_are_non_retryable() {
        assert!(HoldingsProviderError::Status(404).is_non_retryable());
        assert!(HoldingsProviderError::Status(422).is_non_retryable());
        assert!(!HoldingsProviderError::Status(500).is_non_retryable());
        assert!(!HoldingsProviderError::Timeout.is_non_retryable());
    }

    #[test]
    fn provider_errors_map_to_taxonomy() {
        assert_eq!(
            HoldingsProviderError::Timeout.error_kind(),
            ErrorKind::UpstreamTimeout
        );
        assert_eq!(
            HoldingsProviderError::Status(502).error_kind(),
            ErrorKind::UpstreamHttp
        );
        assert_eq!(
            HoldingsProviderError::Parse("bad".into()).error_kind(),
            ErrorKind::UpstreamParse
        );
    }
}
