//! Model backends and the registry that selects between them.
//!
//! Every provider is exposed as a [`TokenSource`] implementation. Which
//! implementation serves a given model name is decided by a
//! [`BackendRegistry`]: an explicit, ordered table of (name prefix → factory)
//! rules plus a fallback, resolved **once** at agent construction — there is no
//! string dispatch buried in the generation path and no module-level singleton.
//!
//! The standard rule set mirrors the conventional model families:
//!
//! | prefix   | backend                               |
//! |----------|---------------------------------------|
//! | `claude` | [`ClaudeBackend`] (Anthropic)         |
//! | `gpt`    | [`OpenAiBackend`] (OpenAI)            |
//! | `gemini` | [`GeminiBackend`] (Google)            |
//! | *other*  | [`OllamaBackend`] (local daemon)      |
//!
//! Resolved sources are cached per model name, so repeated agents over the
//! same model share one client (and its HTTP connection pool).
//!
//! # Example
//!
//! ```rust
//! use multiprompt::{BackendConfig, BackendRegistry, TokenSource};
//!
//! let config = BackendConfig {
//!     openai_api_key: Some("sk-test".to_string()),
//!     ..Default::default()
//! };
//! let registry = BackendRegistry::standard(config);
//!
//! let source = registry.resolve("gpt-4o").unwrap();
//! assert_eq!(source.model_name(), "gpt-4o");
//! ```

pub mod claude;
pub mod common;
pub mod gemini;
pub mod ollama;
pub mod openai;

pub use claude::ClaudeBackend;
pub use gemini::GeminiBackend;
pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::multiprompt::config::{BackendConfig, DEFAULT_OLLAMA_BASE_URL};
use crate::multiprompt::token_source::{GenerationError, TokenSource};

/// Builds a token source for a concrete model name.
pub type BackendFactory =
    Arc<dyn Fn(&str) -> Result<Arc<dyn TokenSource>, GenerationError> + Send + Sync>;

/// Ordered lookup table mapping model-name prefixes to backend factories.
pub struct BackendRegistry {
    rules: Vec<(String, BackendFactory)>,
    fallback: BackendFactory,
    instances: Mutex<HashMap<String, Arc<dyn TokenSource>>>,
}

impl BackendRegistry {
    /// Create an empty registry with only a fallback factory.
    pub fn new(fallback: BackendFactory) -> Self {
        BackendRegistry {
            rules: Vec::new(),
            fallback,
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// The standard rule set over the given credentials.
    ///
    /// A missing API key is not an error here — it becomes
    /// [`GenerationError::MissingApiKey`] if and when a model of that family is
    /// actually resolved.
    pub fn standard(config: BackendConfig) -> Self {
        let BackendConfig {
            openai_api_key,
            anthropic_api_key,
            gemini_api_key,
            ollama_base_url,
        } = config;
        let ollama_base_url =
            ollama_base_url.unwrap_or_else(|| DEFAULT_OLLAMA_BASE_URL.to_string());

        let mut registry = BackendRegistry::new(Arc::new(move |model: &str| {
            Ok(Arc::new(OllamaBackend::new_with_base_url(model, &ollama_base_url))
                as Arc<dyn TokenSource>)
        }));

        registry.register(
            "claude",
            Arc::new(move |model: &str| {
                let key = anthropic_api_key.clone().ok_or_else(|| {
                    GenerationError::MissingApiKey("ANTHROPIC_API_KEY".to_string())
                })?;
                Ok(Arc::new(ClaudeBackend::new(&key, model)) as Arc<dyn TokenSource>)
            }),
        );
        registry.register(
            "gpt",
            Arc::new(move |model: &str| {
                let key = openai_api_key
                    .clone()
                    .ok_or_else(|| GenerationError::MissingApiKey("OPENAI_API_KEY".to_string()))?;
                Ok(Arc::new(OpenAiBackend::new(&key, model)) as Arc<dyn TokenSource>)
            }),
        );
        registry.register(
            "gemini",
            Arc::new(move |model: &str| {
                let key = gemini_api_key
                    .clone()
                    .ok_or_else(|| GenerationError::MissingApiKey("GEMINI_API_KEY".to_string()))?;
                Ok(Arc::new(GeminiBackend::new(&key, model)) as Arc<dyn TokenSource>)
            }),
        );
        registry
    }

    /// Append a rule. Rules are consulted in registration order; the first
    /// prefix match wins.
    pub fn register(&mut self, prefix: impl Into<String>, factory: BackendFactory) {
        self.rules.push((prefix.into(), factory));
    }

    /// Resolve the token source for `model`, building and memoizing it on
    /// first use.
    pub fn resolve(&self, model: &str) -> Result<Arc<dyn TokenSource>, GenerationError> {
        if let Some(source) = self.instances.lock().unwrap().get(model) {
            return Ok(Arc::clone(source));
        }

        let factory = self
            .rules
            .iter()
            .find(|(prefix, _)| model.starts_with(prefix.as_str()))
            .map(|(_, factory)| factory)
            .unwrap_or(&self.fallback);
        let source = factory(model)?;

        self.instances
            .lock()
            .unwrap()
            .insert(model.to_string(), Arc::clone(&source));
        Ok(source)
    }
}
