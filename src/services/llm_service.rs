use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::errors::LlmError;
use crate::models::CreatePortfolio;
use crate::services::workbook::SheetBlock;

/// Configuration for the LLM-backed statement parser
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: String,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub max_tokens: usize,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            api_key: None,
            model: None,
            max_tokens: 4000,
            temperature: 0.0,
            timeout: Duration::from_secs(60),
        }
    }
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            provider: std::env::var("LLM_PROVIDER").unwrap_or_else(|_| "disabled".to_string()),
            api_key: std::env::var("LLM_API_KEY").ok(),
            model: std::env::var("LLM_MODEL").ok(),
            max_tokens: std::env::var("LLM_MAX_TOKENS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(4000),
            temperature: std::env::var("LLM_TEMPERATURE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.0),
            timeout: Duration::from_secs(
                std::env::var("LLM_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
        }
    }
}

/// Capability interface: turn a tabular sheet into a structured portfolio.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn structured_portfolio(&self, sheet: &SheetBlock)
        -> Result<CreatePortfolio, LlmError>;
}

/// JSON shape the model is asked to produce, embedded in the prompt.
pub const PORTFOLIO_SCHEMA: &str = r#"{
  "type": "object",
  "required": ["mutual_fund_name", "portfolio_date", "portfolio_holdings"],
  "properties": {
    "mutual_fund_name": {"type": "string"},
    "portfolio_date": {"type": "string"},
    "portfolio_holdings": {
      "type": "array",
      "items": {
        "type": "object",
        "required": ["name_of_instrument", "isin_code", "percentage_to_nav"],
        "properties": {
          "name_of_instrument": {"type": "string"},
          "isin_code": {"type": "string"},
          "percentage_to_nav": {"type": "string"}
        }
      }
    }
  }
}"#;

pub fn build_prompt(sheet: &SheetBlock) -> String {
    let table = serde_json::to_string(&sheet.rows).unwrap_or_default();
    format!(
        "You are given rows extracted from one sheet of a mutual fund statement \
         (sheet name: {name}). Return STRICT JSON matching this schema, with no \
         commentary and no markdown fences:\n{schema}\n\
         Keep percentage values exactly as written in the source, including the \
         % sign. Skip sub-total and banner rows that have no ISIN.\n\
         Rows:\n{table}",
        name = sheet.name,
        schema = PORTFOLIO_SCHEMA,
        table = table
    )
}

/// Validate a model response against the portfolio schema.
pub fn validate_response(text: &str) -> Result<CreatePortfolio, LlmError> {
    let trimmed = strip_code_fences(text);
    let portfolio: CreatePortfolio = serde_json::from_str(trimmed)
        .map_err(|e| LlmError::InvalidResponse(format!("schema mismatch: {}", e)))?;

    if portfolio.mutual_fund_name.trim().is_empty() {
        return Err(LlmError::InvalidResponse(
            "mutual_fund_name is empty".to_string(),
        ));
    }
    if portfolio.portfolio_holdings.is_empty() {
        return Err(LlmError::InvalidResponse(
            "portfolio_holdings is empty".to_string(),
        ));
    }
    Ok(portfolio)
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open.strip_suffix("```").unwrap_or(without_open).trim()
}

// OpenAI-compatible chat API structures (used by both providers)
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Debug, Serialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// Provider speaking the OpenAI-compatible chat-completions protocol.
/// `openai` and `together` differ only in endpoint and default model.
pub struct ChatCompletionsClient {
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: usize,
    temperature: f32,
    client: Client,
}

impl ChatCompletionsClient {
    pub fn openai(config: &LlmConfig, api_key: String) -> Self {
        Self::new(
            "https://api.openai.com/v1/chat/completions".to_string(),
            api_key,
            config.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string()),
            config,
        )
    }

    pub fn together(config: &LlmConfig, api_key: String) -> Self {
        Self::new(
            "https://api.together.xyz/v1/chat/completions".to_string(),
            api_key,
            config
                .model
                .clone()
                .unwrap_or_else(|| "meta-llama/Llama-3.3-70B-Instruct-Turbo".to_string()),
            config,
        )
    }

    fn new(endpoint: String, api_key: String, model: String, config: &LlmConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            endpoint,
            api_key,
            model,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            client,
        }
    }

    async fn chat(&self, prompt: String) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt,
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::NetworkError(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            warn!("LLM provider rate limited the request");
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("LLM API returned {}: {}", status, body);
            return Err(LlmError::ApiError(format!("{}: {}", status, body)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("response has no choices".to_string()))
    }
}

#[async_trait]
impl LlmClient for ChatCompletionsClient {
    async fn structured_portfolio(
        &self,
        sheet: &SheetBlock,
    ) -> Result<CreatePortfolio, LlmError> {
        let text = self.chat(build_prompt(sheet)).await?;
        validate_response(&text)
    }
}

/// Stand-in when no provider is configured; always defers to the manual
/// parser via the fallback rule.
pub struct DisabledLlmClient;

#[async_trait]
impl LlmClient for DisabledLlmClient {
    async fn structured_portfolio(
        &self,
        _sheet: &SheetBlock,
    ) -> Result<CreatePortfolio, LlmError> {
        Err(LlmError::Disabled)
    }
}

pub fn client_from_config(config: &LlmConfig) -> Arc<dyn LlmClient> {
    match (config.provider.to_lowercase().as_str(), &config.api_key) {
        ("openai", Some(key)) => Arc::new(ChatCompletionsClient::openai(config, key.clone())),
        ("together", Some(key)) => Arc::new(ChatCompletionsClient::together(config, key.clone())),
        _ => Arc::new(DisabledLlmClient),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn prompt_embeds_schema_and_rows() {
        let prompt = build_prompt(&sheet());
        assert!(prompt.contains("mutual_fund_name"));
        assert!(prompt.contains("percentage_to_nav"));
        assert!(prompt.contains("INE002A01018"));
        assert!(prompt.contains("YO01"));
    }

    #[test]
    fn valid_response_passes_validation() {
        let body = r#"{
            "mutual_fund_name": "Alpha Midcap Fund",
            "portfolio_date": "March 2025",
            "portfolio_holdings": [
                {"name_of_instrument": "Reliance Industries",
                 "isin_code": "INE002A01018",
                 "percentage_to_nav": "9.1%"}
            ]
        }"#;
        let portfolio = validate_response(body).unwrap();
        assert_eq!(portfolio.mutual_fund_name, "Alpha Midcap Fund");
        assert_eq!(portfolio.portfolio_holdings.len(), 1);
    }

    #[test]
    fn fenced_response_is_accepted() {
        let body = "```json\n{\"mutual_fund_name\": \"F\", \"portfolio_date\": \"D\", \
                    \"portfolio_holdings\": [{\"name_of_instrument\": \"X\", \
                    \"isin_code\": \"I\", \"percentage_to_nav\": \"1%\"}]}\n```";
        assert!(validate_response(body).is_ok());
    }

    #[test]
    fn empty_holdings_fail_validation() {
        let body = r#"{"mutual_fund_name": "F", "portfolio_date": "D", "portfolio_holdings": []}"#;
        assert!(matches!(
            validate_response(body),
            Err(LlmError::InvalidResponse(_))
        ));
    }

    #[test]
    fn commentary_fails_validation() {
        assert!(matches!(
            validate_response("Sure! Here is the portfolio you asked for."),
            Err(LlmError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn disabled_client_reports_disabled() {
        let err = DisabledLlmClient
            .structured_portfolio(&sheet())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Disabled));
        assert!(err.permits_fallback());
    }
}
