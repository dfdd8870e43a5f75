//! # Multiprompt
//!
//! Multiprompt is a Rust engine for dispatching one prompt to many Large Language
//! Model "agents" at once, merging their token streams into a single ordered event
//! feed, and caching every generation behind a content-addressed store so that
//! identical requests never re-invoke a paid model.
//!
//! The crate provides carefully layered abstractions for:
//!
//! * **Messages**: [`Message`] / [`MessageList`] — role-tagged conversation history
//!   with attachment expansion, few-shot example support, and same-role coalescing
//! * **Agents**: [`Agent`] — a configuration record (model, system prompt,
//!   temperature, max tokens, position) exposing the token-streaming generation
//!   contract, with cache-transparent generation built in
//! * **Caching**: [`GenerationCache`] — a content-addressed key-value store mapping
//!   normalized generation parameters to the token list they produced
//! * **Token Sources**: [`TokenSource`] — the single capability each model backend
//!   implements, resolved from a model name through a [`BackendRegistry`]
//! * **Rounds**: [`ConversationRound`] — runs all agents sharing a position
//!   concurrently, fans their token streams into one event stream, and folds the
//!   finished responses back into the shared history before the next position runs
//! * **Conversations**: [`Conversation`] / [`ConversationStore`] — an ordered
//!   sequence of rounds over one growing history, re-attachable by UUID
//!
//! ## Quickstart
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use futures_util::StreamExt;
//! use multiprompt::{Agent, BackendConfig, BackendRegistry, Conversation, GenerationCache};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     multiprompt::init_logger();
//!
//!     let registry = Arc::new(BackendRegistry::standard(BackendConfig::from_env()));
//!     let cache = Arc::new(GenerationCache::open("llm_cache")?);
//!
//!     let agents = vec![
//!         Agent::new("A", "gpt-4o", &registry, &cache)?.with_position(1),
//!         Agent::new("B", "claude-3-5-sonnet-20240620", &registry, &cache)?.with_position(1),
//!     ];
//!
//!     let mut conversation = Conversation::new(agents);
//!     let round = conversation.add_round("Say hi")?;
//!
//!     let mut events = round.run();
//!     while let Some(event) = events.next().await {
//!         println!("{}", serde_json::to_string(&event)?);
//!     }
//!
//!     // Both agents' full responses are now recorded on the round.
//!     println!("{:?}", round.responses());
//!     Ok(())
//! }
//! ```
//!
//! ## How a round executes
//!
//! Agents are grouped into *position tiers*: every agent with `position == 1` runs
//! concurrently first, then every agent with `position == 2` sees the first tier's
//! responses in its history, and so on. Within a tier the merged event stream
//! interleaves tokens as they arrive — a fast agent is never held back by a slow
//! peer, and one agent's failure surfaces as an error event without aborting its
//! siblings. The user's own prompt is echoed into the stream (position 0, agent
//! `"User"`) before any model is invoked.
//!
//! ## Caching
//!
//! Every generation is keyed by a SHA-256 hash over the sorted request parameters
//! `{model, messages, max_tokens, temperature}`. A cache hit replays the stored
//! tokens through the same stream interface as a live call, paced with a few
//! milliseconds of jitter so downstream consumers keep their streaming semantics.

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// The helper is intentionally lightweight so that applications embedding
/// multiprompt can opt-in to simple `RUST_LOG` driven diagnostics without having
/// to choose a specific logging backend upfront.
///
/// ```rust
/// multiprompt::init_logger();
/// log::info!("Logger is ready");
/// ```
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

// Import the top-level `multiprompt` module.
pub mod multiprompt;

// Re-exporting key items for easier external access.
pub use crate::multiprompt::agent::{Agent, AgentOverrides, GenerateOptions};
pub use crate::multiprompt::backends;
pub use crate::multiprompt::backends::BackendRegistry;
pub use crate::multiprompt::cache::{CacheError, GenerationCache};
pub use crate::multiprompt::config::{
    BackendConfig, DEFAULT_MAX_TOKENS, DEFAULT_MODEL, DEFAULT_TEMPERATURE,
};
pub use crate::multiprompt::conversation::{Conversation, ConversationStore};
pub use crate::multiprompt::message::{AttachmentError, ContentPart, Message, MessageList, Role};
pub use crate::multiprompt::round::{
    ConversationRound, RoundEvent, RoundState, RoundStream, TokenEvent,
};
pub use crate::multiprompt::token_source::{
    GenerationError, GenerationRequest, Generator, TokenSource, TokenStream, WireMessage,
};
