//! The token-source abstraction and the cache-transparent generator.
//!
//! A [`TokenSource`] is the single capability the engine needs from a model
//! backend: turn a message list into an ordered stream of text tokens. It does
//! not keep track of conversations or caching — for that, a [`Generator`] pairs
//! a source with a [`GenerationCache`](crate::GenerationCache) and serves every
//! request transparently from cache or from a live call.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use futures_util::StreamExt;
//! use multiprompt::{
//!     GenerationCache, GenerationRequest, Generator, MessageList,
//!     backends::OpenAiBackend,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let source = Arc::new(OpenAiBackend::new("sk-...", "gpt-4o"));
//! let cache = Arc::new(GenerationCache::open("llm_cache")?);
//! let generator = Generator::new(source, cache);
//!
//! let mut messages = MessageList::new();
//! messages.add_user_message("Say hi");
//!
//! let request = GenerationRequest::new("gpt-4o", messages, 4096, 0.7);
//! let mut tokens = generator.generate(&request, false).await?;
//! while let Some(token) = tokens.next().await {
//!     print!("{}", token?);
//! }
//! # Ok(())
//! # }
//! ```

use std::error::Error;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::multiprompt::cache::GenerationCache;
use crate::multiprompt::message::MessageList;

/// An ordered, replayable sequence of text tokens.
///
/// Both live backend calls and cache replays produce this same shape, so
/// consumers never need to know where the tokens came from.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, GenerationError>> + Send>>;

/// The flattened role/content shape backends put on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Lowercase role name (`system`, `user`, `assistant`).
    pub role: String,
    /// Concatenated text content.
    pub content: String,
}

/// Errors raised by token sources and the generation path.
#[derive(Debug)]
pub enum GenerationError {
    /// The resolved backend needs a credential that was not configured.
    /// Carries the name of the missing environment variable.
    MissingApiKey(String),
    /// The backend call could not be started.
    Backend(String),
    /// The backend stream failed after it had started; tokens already emitted
    /// were delivered, only the continuation is lost.
    Stream(String),
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationError::MissingApiKey(var) => {
                write!(f, "{} not found in environment variables", var)
            }
            GenerationError::Backend(msg) => write!(f, "backend call failed: {}", msg),
            GenerationError::Stream(msg) => write!(f, "stream failed: {}", msg),
        }
    }
}

impl Error for GenerationError {}

/// Trait defining the interface to a specific model backend.
///
/// Implementations are expected to forward tokens as they arrive — no
/// buffering beyond what the backend itself requires.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// The model identifier this source was constructed for.
    fn model_name(&self) -> &str;

    /// Open a streaming generation for `messages`.
    ///
    /// Returns `Err` when the call cannot be started; failures after the
    /// stream has begun surface as `Err` items on the stream itself.
    async fn stream_tokens(
        &self,
        messages: &[WireMessage],
        max_tokens: u32,
        temperature: f64,
    ) -> Result<TokenStream, GenerationError>;
}

/// The fully-resolved parameters of one generation.
///
/// This is exactly the parameter set the cache key is derived from: two
/// requests with equal fields always share a cache entry.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Model identifier.
    pub model: String,
    /// Complete message history to send, system prompt included.
    pub messages: MessageList,
    /// Output token ceiling.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
}

impl GenerationRequest {
    /// Bundle the parameters of one generation.
    pub fn new(
        model: impl Into<String>,
        messages: MessageList,
        max_tokens: u32,
        temperature: f64,
    ) -> Self {
        GenerationRequest {
            model: model.into(),
            messages,
            max_tokens,
            temperature,
        }
    }

    /// The normalized parameter map the cache key is computed over.
    pub fn cache_params(&self) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": self.messages,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        })
    }
}

/// Pairs a [`TokenSource`] with a [`GenerationCache`] and serves requests
/// transparently from either.
///
/// On a live call every token is forwarded to the caller as it arrives and
/// teed into a buffer; the buffer is written to the cache only when the stream
/// completes cleanly, so a failed generation is never cached. Two concurrent
/// generations for the same key both run and both write — last writer wins
/// (callers needing single-flight semantics must add it externally).
#[derive(Clone)]
pub struct Generator {
    source: Arc<dyn TokenSource>,
    cache: Arc<GenerationCache>,
}

impl Generator {
    /// Build a generator over `source`, caching into `cache`.
    pub fn new(source: Arc<dyn TokenSource>, cache: Arc<GenerationCache>) -> Self {
        Generator { source, cache }
    }

    /// The wrapped token source.
    pub fn source(&self) -> &Arc<dyn TokenSource> {
        &self.source
    }

    /// The cache this generator reads and writes.
    pub fn cache(&self) -> &Arc<GenerationCache> {
        &self.cache
    }

    /// Stream tokens for `request`, replaying from cache when possible.
    ///
    /// `force` skips the cache lookup and overwrites the entry with the fresh
    /// result. A cache read failure is treated as a miss and the generation
    /// proceeds live; a cache write failure is logged and does not fail the
    /// stream.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        force: bool,
    ) -> Result<TokenStream, GenerationError> {
        let key = GenerationCache::key_for(&request.cache_params());

        if !force {
            match self.cache.get(&key) {
                Ok(Some(tokens)) => {
                    log::debug!("cache hit for key {}", key);
                    return Ok(GenerationCache::replay(tokens));
                }
                Ok(None) => {}
                Err(err) => {
                    log::warn!("cache read failed for key {}, regenerating: {}", key, err);
                }
            }
        }

        log::debug!("cache miss for key {}, calling {}", key, self.source.model_name());
        let mut upstream = self
            .source
            .stream_tokens(
                &request.messages.to_wire(),
                request.max_tokens,
                request.temperature,
            )
            .await?;

        let cache = Arc::clone(&self.cache);
        let (tx, rx) = mpsc::unbounded_channel::<Result<String, GenerationError>>();
        tokio::spawn(async move {
            let mut collected: Vec<String> = Vec::new();
            let mut completed = true;
            while let Some(item) = upstream.next().await {
                match item {
                    Ok(token) => {
                        collected.push(token.clone());
                        if tx.send(Ok(token)).is_err() {
                            // Receiver dropped; abandon the generation.
                            return;
                        }
                    }
                    Err(err) => {
                        completed = false;
                        let _ = tx.send(Err(err));
                        break;
                    }
                }
            }
            if completed {
                if let Err(err) = cache.put(&key, &collected) {
                    log::warn!("cache write failed for key {}: {}", key, err);
                }
            }
        });

        Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })))
    }

    /// Drain [`Generator::generate`] and concatenate the tokens — for
    /// non-streaming callers.
    pub async fn generate_text(
        &self,
        request: &GenerationRequest,
        force: bool,
    ) -> Result<String, GenerationError> {
        let mut stream = self.generate(request, force).await?;
        let mut text = String::new();
        while let Some(token) = stream.next().await {
            text.push_str(&token?);
        }
        Ok(text)
    }
}
