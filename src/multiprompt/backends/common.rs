use std::time::Duration;

use futures_util::StreamExt;
use lazy_static::lazy_static;
use openai_rust::chat;
use openai_rust2 as openai_rust;

use crate::multiprompt::token_source::{GenerationError, TokenStream, WireMessage};

lazy_static! {
    /// One shared HTTP client for all backends so connections, DNS lookups
    /// and TLS handshakes are reused across requests.
    static ref SHARED_HTTP_CLIENT: reqwest::Client = reqwest::ClientBuilder::new()
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .pool_max_idle_per_host(10)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .timeout(Duration::from_secs(300))
        .build()
        .expect("Failed to build HTTP client");
}

/// Get the shared HTTP client configured for persistent connections.
pub fn shared_http_client() -> reqwest::Client {
    SHARED_HTTP_CLIENT.clone()
}

/// Open a streaming chat completion and map its chunks to a [`TokenStream`].
///
/// Empty delta chunks (role-only frames, finish frames) are filtered out so
/// the stream carries text tokens only; a chunk-level error becomes the
/// stream's final `Err` item.
pub async fn open_chat_stream(
    api: &openai_rust::Client,
    model: &str,
    messages: &[WireMessage],
    max_tokens: u32,
    temperature: f64,
    url_path: Option<String>,
) -> Result<TokenStream, GenerationError> {
    let mut formatted_messages = Vec::with_capacity(messages.len());
    for msg in messages {
        formatted_messages.push(chat::Message {
            role: msg.role.clone(),
            content: msg.content.clone(),
        });
    }

    let mut chat_arguments = chat::ChatArguments::new(model, formatted_messages);
    chat_arguments.max_tokens = Some(max_tokens);
    chat_arguments.temperature = Some(temperature as f32);

    let chunk_stream = api
        .create_chat_stream(chat_arguments, url_path)
        .await
        .map_err(|err| GenerationError::Backend(err.to_string()))?;

    let token_stream = chunk_stream.filter_map(|chunk_result| async move {
        match chunk_result {
            Ok(chunk) => chunk
                .choices
                .first()
                .and_then(|choice| choice.delta.content.clone())
                .filter(|token| !token.is_empty())
                .map(Ok),
            Err(err) => Some(Err(GenerationError::Stream(err.to_string()))),
        }
    });

    Ok(Box::pin(token_stream))
}
