//! Anthropic Claude token source built on the OpenAI-compatible transport.
//!
//! The wrapper delegates HTTP concerns to the shared OpenAI implementation, so
//! swapping from OpenAI to Claude only requires a different constructor.

use async_trait::async_trait;

use crate::multiprompt::backends::openai::OpenAiBackend;
use crate::multiprompt::token_source::{GenerationError, TokenSource, TokenStream, WireMessage};

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";

/// Token source for Anthropic's Claude API routed through the OpenAI-compatible
/// surface.
pub struct ClaudeBackend {
    /// Delegated client that handles the HTTP interactions.
    delegate: OpenAiBackend,
}

impl ClaudeBackend {
    /// Create a client from an API key and model string.
    pub fn new(secret_key: &str, model_name: &str) -> Self {
        Self::new_with_base_url(secret_key, model_name, ANTHROPIC_BASE_URL)
    }

    /// Create a client pointing at a custom Claude-compatible base URL.
    pub fn new_with_base_url(secret_key: &str, model_name: &str, base_url: &str) -> Self {
        ClaudeBackend {
            delegate: OpenAiBackend::new_with_base_url(secret_key, model_name, base_url),
        }
    }
}

#[async_trait]
impl TokenSource for ClaudeBackend {
    fn model_name(&self) -> &str {
        self.delegate.model_name()
    }

    async fn stream_tokens(
        &self,
        messages: &[WireMessage],
        max_tokens: u32,
        temperature: f64,
    ) -> Result<TokenStream, GenerationError> {
        self.delegate
            .stream_tokens(messages, max_tokens, temperature)
            .await
    }
}
