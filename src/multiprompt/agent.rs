//! Agent System
//!
//! An [`Agent`] is a configuration record — model identifier, system prompt,
//! temperature, output token ceiling, display name and execution position —
//! plus the generation contract it exposes. The backend serving the agent's
//! model is resolved once, at construction, through a
//! [`BackendRegistry`](crate::BackendRegistry); the agent then generates
//! through a cache-transparent [`Generator`](crate::Generator).
//!
//! Agents are immutable after construction. The one sanctioned way to vary a
//! configuration — e.g. for temperature or model sweeps — is
//! [`Agent::derive`], which returns a **new** agent value with the overrides
//! applied and never mutates in place.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use multiprompt::{Agent, AgentOverrides, BackendConfig, BackendRegistry, GenerationCache};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(BackendRegistry::standard(BackendConfig::from_env()));
//! let cache = Arc::new(GenerationCache::open("llm_cache")?);
//!
//! let reviewer = Agent::new("reviewer", "gpt-4o", &registry, &cache)?
//!     .with_position(2)
//!     .with_system_prompt("You review the other answers.")
//!     .with_temperature(0.2);
//!
//! // A cooler-headed variant for a parameter sweep.
//! let cold = reviewer.derive(AgentOverrides {
//!     temperature: Some(0.0),
//!     ..Default::default()
//! })?;
//! assert_eq!(cold.temperature, 0.0);
//! assert_eq!(reviewer.temperature, 0.2);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use futures_util::StreamExt;

use crate::multiprompt::backends::BackendRegistry;
use crate::multiprompt::cache::GenerationCache;
use crate::multiprompt::config::{DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};
use crate::multiprompt::message::MessageList;
use crate::multiprompt::token_source::{
    GenerationError, GenerationRequest, Generator, TokenStream,
};

/// Per-call overrides accepted by [`Agent::generate_async`].
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Appended after the agent's own system prompt (blank-line separated) —
    /// it never replaces the agent's identity instructions.
    pub system_prompt_override: Option<String>,
    /// Replaces the agent's configured temperature for this call.
    pub temperature_override: Option<f64>,
    /// Replaces the agent's configured token ceiling for this call.
    pub max_tokens_override: Option<u32>,
    /// Skip the cache lookup and overwrite the entry with the fresh result.
    pub force: bool,
}

impl GenerateOptions {
    /// Options that force regeneration, everything else defaulted.
    pub fn forced() -> Self {
        GenerateOptions {
            force: true,
            ..Default::default()
        }
    }
}

/// Construction-time overrides for [`Agent::derive`].
///
/// `None` fields keep the source agent's value.
#[derive(Debug, Clone, Default)]
pub struct AgentOverrides {
    /// New agent name.
    pub name: Option<String>,
    /// New display name.
    pub display_name: Option<String>,
    /// New execution position (must be ≥ 1).
    pub position: Option<u32>,
    /// New model identifier; triggers backend re-resolution.
    pub model: Option<String>,
    /// New system prompt.
    pub system_prompt: Option<String>,
    /// New sampling temperature.
    pub temperature: Option<f64>,
    /// New output token ceiling.
    pub max_tokens: Option<u32>,
}

/// A configured binding to one model: identity, prompt parameters, execution
/// position, and the streaming generation contract.
#[derive(Clone)]
pub struct Agent {
    /// Stable identifier; also the key responses are recorded under.
    pub name: String,
    /// Human-readable display name for logging and UI surfaces.
    pub display_name: String,
    /// 1-based execution position; agents sharing a position run concurrently.
    pub position: u32,
    /// Model identifier the backend was resolved for.
    pub model: String,
    /// The agent's own steering instructions (may be empty).
    pub system_prompt: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Output token ceiling.
    pub max_tokens: u32,

    registry: Arc<BackendRegistry>,
    generator: Generator,
}

impl Agent {
    /// Create an agent for `model`, resolving its backend through `registry`
    /// and caching generations into `cache`.
    ///
    /// Fails when no backend can be built for the model (e.g. the required
    /// API key is not configured).
    pub fn new(
        name: impl Into<String>,
        model: impl Into<String>,
        registry: &Arc<BackendRegistry>,
        cache: &Arc<GenerationCache>,
    ) -> Result<Self, GenerationError> {
        let name = name.into();
        let model = model.into();
        let source = registry.resolve(&model)?;
        Ok(Agent {
            display_name: name.clone(),
            name,
            position: 1,
            model,
            system_prompt: String::new(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            registry: Arc::clone(registry),
            generator: Generator::new(source, Arc::clone(cache)),
        })
    }

    /// Set the execution position (1-based).
    pub fn with_position(mut self, position: u32) -> Self {
        assert!(position >= 1, "agent positions are 1-based");
        self.position = position;
        self
    }

    /// Set a display name distinct from the identifier.
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    /// Set the agent's system prompt.
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the output token ceiling.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Return a new agent with `overrides` applied.
    ///
    /// When the model changes, the backend is re-resolved through the same
    /// registry this agent was built with. The receiver is never modified.
    pub fn derive(&self, overrides: AgentOverrides) -> Result<Agent, GenerationError> {
        let mut agent = self.clone();
        if let Some(name) = overrides.name {
            agent.name = name;
        }
        if let Some(display_name) = overrides.display_name {
            agent.display_name = display_name;
        }
        if let Some(position) = overrides.position {
            assert!(position >= 1, "agent positions are 1-based");
            agent.position = position;
        }
        if let Some(system_prompt) = overrides.system_prompt {
            agent.system_prompt = system_prompt;
        }
        if let Some(temperature) = overrides.temperature {
            agent.temperature = temperature;
        }
        if let Some(max_tokens) = overrides.max_tokens {
            agent.max_tokens = max_tokens;
        }
        if let Some(model) = overrides.model {
            if model != agent.model {
                let source = agent.registry.resolve(&model)?;
                agent.generator = Generator::new(source, Arc::clone(agent.generator.cache()));
                agent.model = model;
            }
        }
        Ok(agent)
    }

    /// The cache this agent's generations go through.
    pub fn cache(&self) -> &Arc<GenerationCache> {
        self.generator.cache()
    }

    /// Stream a generation seeded with `history`.
    ///
    /// The request is assembled as: the agent's system prompt merged with any
    /// override (override appended after the agent's own, blank-line
    /// separated), followed by the history. Temperature and max tokens come
    /// from the options when overridden, from the agent otherwise. The cache
    /// is consulted before the backend is invoked; every token is forwarded as
    /// it arrives. A backend failure surfaces as the stream's final `Err` item
    /// — tokens delivered before the failure are not lost.
    pub async fn generate_async(
        &self,
        history: &MessageList,
        opts: &GenerateOptions,
    ) -> Result<TokenStream, GenerationError> {
        let mut messages = MessageList::new();
        let system_prompt = self.merged_system_prompt(opts.system_prompt_override.as_deref());
        if !system_prompt.is_empty() {
            messages.add_system_message(system_prompt);
        }
        for message in history {
            messages.push(message.clone());
        }

        let request = GenerationRequest::new(
            self.model.clone(),
            messages,
            opts.max_tokens_override.unwrap_or(self.max_tokens),
            opts.temperature_override.unwrap_or(self.temperature),
        );
        self.generator.generate(&request, opts.force).await
    }

    /// Drain [`Agent::generate_async`] and concatenate the tokens — for
    /// non-streaming callers.
    pub async fn generate(
        &self,
        history: &MessageList,
        opts: &GenerateOptions,
    ) -> Result<String, GenerationError> {
        let mut stream = self.generate_async(history, opts).await?;
        let mut text = String::new();
        while let Some(token) = stream.next().await {
            text.push_str(&token?);
        }
        Ok(text)
    }

    fn merged_system_prompt(&self, override_prompt: Option<&str>) -> String {
        match override_prompt {
            Some(extra) if !extra.is_empty() => {
                if self.system_prompt.is_empty() {
                    extra.to_string()
                } else {
                    format!("{}\n\n{}", self.system_prompt, extra)
                }
            }
            _ => self.system_prompt.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multiprompt::config::BackendConfig;

    fn test_agent() -> Agent {
        let registry = Arc::new(BackendRegistry::standard(BackendConfig {
            openai_api_key: Some("sk-test".to_string()),
            ..Default::default()
        }));
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(GenerationCache::open(dir.path()).unwrap());
        Agent::new("a", "gpt-4o", &registry, &cache).unwrap()
    }

    #[test]
    fn override_is_appended_never_substituted() {
        let agent = test_agent().with_system_prompt("Identity.");
        assert_eq!(
            agent.merged_system_prompt(Some("Extra.")),
            "Identity.\n\nExtra."
        );
        assert_eq!(agent.merged_system_prompt(None), "Identity.");
    }

    #[test]
    fn empty_own_prompt_yields_override_alone() {
        let agent = test_agent();
        assert_eq!(agent.merged_system_prompt(Some("Extra.")), "Extra.");
        assert_eq!(agent.merged_system_prompt(Some("")), "");
    }
}
