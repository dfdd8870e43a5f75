//! Token source for OpenAI's Chat Completions API.
//!
//! This is also the transport other backends delegate to: any endpoint that
//! speaks the OpenAI-compatible streaming surface can be reached by
//! constructing an [`OpenAiBackend`] with a custom base URL.

use async_trait::async_trait;
use openai_rust2 as openai_rust;

use crate::multiprompt::backends::common::{open_chat_stream, shared_http_client};
use crate::multiprompt::token_source::{GenerationError, TokenSource, TokenStream, WireMessage};

/// Token source for OpenAI's Chat Completions API (and compatible endpoints).
pub struct OpenAiBackend {
    /// Underlying SDK client pointing at the REST endpoint.
    client: openai_rust::Client,
    /// Model name injected into each request.
    model: String,
    /// Completions path on the endpoint.
    url_path: String,
}

impl OpenAiBackend {
    /// Construct a client for api.openai.com with the given key and model.
    pub fn new(secret_key: &str, model_name: &str) -> Self {
        OpenAiBackend {
            client: openai_rust::Client::new_with_client(secret_key, shared_http_client()),
            model: model_name.to_string(),
            url_path: "/v1/chat/completions".to_string(),
        }
    }

    /// Construct a client targeting a custom OpenAI-compatible base URL.
    ///
    /// This is the most general constructor and is what the Claude, Gemini and
    /// Ollama backends delegate to.
    pub fn new_with_base_url(secret_key: &str, model_name: &str, base_url: &str) -> Self {
        OpenAiBackend {
            client: openai_rust::Client::new_with_client_and_base_url(
                secret_key,
                shared_http_client(),
                base_url,
            ),
            model: model_name.to_string(),
            url_path: "/v1/chat/completions".to_string(),
        }
    }

    /// Override the completions path (some compatible endpoints nest it
    /// differently).
    pub fn with_url_path(mut self, url_path: &str) -> Self {
        self.url_path = url_path.to_string();
        self
    }
}

#[async_trait]
impl TokenSource for OpenAiBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream_tokens(
        &self,
        messages: &[WireMessage],
        max_tokens: u32,
        temperature: f64,
    ) -> Result<TokenStream, GenerationError> {
        open_chat_stream(
            &self.client,
            &self.model,
            messages,
            max_tokens,
            temperature,
            Some(self.url_path.clone()),
        )
        .await
    }
}
