//! Local token source: an Ollama daemon reached over its OpenAI-compatible
//! endpoint. This is the fallback for model names no registry rule matches.

use async_trait::async_trait;

use crate::multiprompt::backends::openai::OpenAiBackend;
use crate::multiprompt::config::DEFAULT_OLLAMA_BASE_URL;
use crate::multiprompt::token_source::{GenerationError, TokenSource, TokenStream, WireMessage};

/// Token source for a local Ollama daemon.
pub struct OllamaBackend {
    delegate: OpenAiBackend,
}

impl OllamaBackend {
    /// Create a client against `http://localhost:11434/v1`.
    pub fn new(model_name: &str) -> Self {
        Self::new_with_base_url(model_name, DEFAULT_OLLAMA_BASE_URL)
    }

    /// Create a client against a custom daemon address.
    pub fn new_with_base_url(model_name: &str, base_url: &str) -> Self {
        OllamaBackend {
            // Ollama ignores the bearer token but the transport requires one.
            delegate: OpenAiBackend::new_with_base_url("ollama", model_name, base_url)
                .with_url_path("/v1/chat/completions"),
        }
    }
}

#[async_trait]
impl TokenSource for OllamaBackend {
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
