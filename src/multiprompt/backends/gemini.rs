//! Google Gemini token source via the OpenAI-compatible surface.

use async_trait::async_trait;

use crate::multiprompt::backends::openai::OpenAiBackend;
use crate::multiprompt::token_source::{GenerationError, TokenSource, TokenStream, WireMessage};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Token source for Google's Gemini models.
pub struct GeminiBackend {
    delegate: OpenAiBackend,
}

impl GeminiBackend {
    /// Create a client from an API key and model string.
    pub fn new(secret_key: &str, model_name: &str) -> Self {
        Self::new_with_base_url(secret_key, model_name, GEMINI_BASE_URL)
    }

    /// Create a client pointing at a custom base URL.
    pub fn new_with_base_url(secret_key: &str, model_name: &str, base_url: &str) -> Self {
        GeminiBackend {
            delegate: OpenAiBackend::new_with_base_url(secret_key, model_name, base_url)
                .with_url_path("/v1beta/openai/chat/completions"),
        }
    }
}

#[async_trait]
impl TokenSource for GeminiBackend {
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
