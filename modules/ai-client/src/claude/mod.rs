mod client;
pub(crate) mod types;

use crate::error::AiError;
use crate::traits::{split_system, Message, MessageRole};
use client::ClaudeClient;
use types::*;

// =============================================================================
// Claude
// =============================================================================

#[derive(Debug, Clone)]
pub struct Claude {
    api_key: String,
    pub(crate) model: String,
    base_url: Option<String>,
}

/// Text plus token accounting for one completion.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Claude {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send a full conversation. System messages become the request preamble.
    pub async fn chat(
        &self,
        messages: &[Message],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<Completion, AiError> {
        let (system, turns) = split_system(messages);
        if turns.is_empty() {
            return Err(AiError::Config("conversation has no user turn".to_string()));
        }

        let wire = turns.into_iter().map(|m| match m.role {
            MessageRole::Assistant => WireMessage::assistant(m.content.as_str()),
            _ => WireMessage::user(m.content.as_str()),
        });

        let request = ChatRequest::new(&self.model)
            .system(system)
            .messages(wire)
            .max_tokens(max_tokens)
            .temperature(temperature);

        let client = ClaudeClient::new(&self.api_key, self.base_url.as_deref())?;
        let response = client.messages(&request).await?;
        let text = response
            .text()
            .ok_or_else(|| AiError::EmptyResponse(self.model.clone()))?;
        let usage = response.usage.unwrap_or_default();

        Ok(Completion {
            text,
            model: response.model.unwrap_or_else(|| self.model.clone()),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
        })
    }
}
