use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use tracing::debug;

use super::types::{ChatRequest, ChatResponse};
use crate::error::AiError;
use crate::util::truncate_to_char_boundary;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const ERROR_BODY_PREVIEW_BYTES: usize = 500;

/// Messages API transport. Headers are validated once, at construction.
pub(crate) struct ClaudeClient {
    http: reqwest::Client,
    endpoint: String,
    headers: HeaderMap,
}

impl ClaudeClient {
    pub fn new(api_key: &str, base_url: Option<&str>) -> Result<Self, AiError> {
        let key = HeaderValue::from_str(api_key)
            .map_err(|e| AiError::Config(format!("invalid API key header: {e}")))?;

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", key);
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let base = base_url.unwrap_or(ANTHROPIC_API_URL).trim_end_matches('/');
        Ok(Self {
            http: reqwest::Client::new(),
            endpoint: format!("{base}/messages"),
            headers,
        })
    }

    pub async fn messages(&self, request: &ChatRequest) -> Result<ChatResponse, AiError> {
        debug!(model = %request.model, messages = request.messages.len(), "Claude chat request");

        let response = self
            .http
            .post(&self.endpoint)
            .headers(self.headers.clone())
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AiError::Api {
                status: status.as_u16(),
                body: truncate_to_char_boundary(&body, ERROR_BODY_PREVIEW_BYTES).to_string(),
            });
        }

        serde_json::from_str(&body).map_err(|e| {
            AiError::Parse(format!(
                "{e}: {}",
                truncate_to_char_boundary(&body, ERROR_BODY_PREVIEW_BYTES)
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_ignores_trailing_slash() {
        let client = ClaudeClient::new("sk-test", Some("http://localhost:9000/v1/")).unwrap();
        assert_eq!(client.endpoint, "http://localhost:9000/v1/messages");
    }

    #[test]
    fn rejects_keys_that_cannot_be_headers() {
        let err = ClaudeClient::new("bad\nkey", None).err().unwrap();
        assert!(matches!(err, AiError::Config(_)));
    }
}
