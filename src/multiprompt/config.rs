//! Crate-wide defaults and backend configuration.
//!
//! [`BackendConfig`] collects the provider credentials a
//! [`BackendRegistry`](crate::BackendRegistry) needs. It is a plain struct —
//! construct it manually or pull everything from the environment with
//! [`BackendConfig::from_env`]. No config-file parsing dependencies are
//! introduced.
//!
//! # Example
//!
//! ```rust
//! use multiprompt::BackendConfig;
//!
//! let config = BackendConfig {
//!     openai_api_key: Some("sk-...".to_string()),
//!     ..Default::default()
//! };
//! ```

use std::env;

/// Model used when an agent does not specify one.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Sampling temperature used when an agent does not specify one.
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Output token ceiling used when an agent does not specify one.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// OpenAI-compatible endpoint of a local Ollama daemon.
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

/// Credentials and endpoints for the standard backend set.
///
/// Every field is optional; a missing key only becomes an error when an agent
/// actually resolves a model that needs it.
#[derive(Debug, Clone, Default)]
pub struct BackendConfig {
    /// API key for `gpt*` models.
    pub openai_api_key: Option<String>,
    /// API key for `claude*` models.
    pub anthropic_api_key: Option<String>,
    /// API key for `gemini*` models.
    pub gemini_api_key: Option<String>,
    /// Base URL of the local fallback backend. Defaults to
    /// [`DEFAULT_OLLAMA_BASE_URL`] when `None`.
    pub ollama_base_url: Option<String>,
}

impl BackendConfig {
    /// Read `OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, `GEMINI_API_KEY` and
    /// `OLLAMA_BASE_URL` from the process environment.
    pub fn from_env() -> Self {
        BackendConfig {
            openai_api_key: env::var("OPENAI_API_KEY").ok(),
            anthropic_api_key: env::var("ANTHROPIC_API_KEY").ok(),
            gemini_api_key: env::var("GEMINI_API_KEY").ok(),
            ollama_base_url: env::var("OLLAMA_BASE_URL").ok(),
        }
    }
}
