use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{stream, StreamExt};

use multiprompt::{
    Agent, AgentOverrides, BackendRegistry, GenerateOptions, GenerationCache, GenerationError,
    MessageList, TokenSource, TokenStream, WireMessage,
};

/// A backend that plays back a scripted token list and records what it was
/// asked.
struct ScriptedSource {
    model: String,
    tokens: Mutex<Vec<String>>,
    /// Fail with a stream error after this many tokens.
    fail_after: Option<usize>,
    calls: AtomicUsize,
    requests: Mutex<Vec<Vec<WireMessage>>>,
}

impl ScriptedSource {
    fn new(model: &str, tokens: &[&str]) -> Arc<Self> {
        Arc::new(ScriptedSource {
            model: model.to_string(),
            tokens: Mutex::new(tokens.iter().map(|t| t.to_string()).collect()),
            fail_after: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn failing_after(model: &str, tokens: &[&str], fail_after: usize) -> Arc<Self> {
        Arc::new(ScriptedSource {
            model: model.to_string(),
            tokens: Mutex::new(tokens.iter().map(|t| t.to_string()).collect()),
            fail_after: Some(fail_after),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn set_tokens(&self, tokens: &[&str]) {
        *self.tokens.lock().unwrap() = tokens.iter().map(|t| t.to_string()).collect();
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_system_content(&self) -> Option<String> {
        self.requests.lock().unwrap().last().and_then(|messages| {
            messages
                .iter()
                .find(|msg| msg.role == "system")
                .map(|msg| msg.content.clone())
        })
    }
}

#[async_trait]
impl TokenSource for ScriptedSource {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream_tokens(
        &self,
        messages: &[WireMessage],
        _max_tokens: u32,
        _temperature: f64,
    ) -> Result<TokenStream, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(messages.to_vec());

        let mut items: Vec<Result<String, GenerationError>> = self
            .tokens
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .map(Ok)
            .collect();
        if let Some(n) = self.fail_after {
            items.truncate(n);
            items.push(Err(GenerationError::Stream("backend dropped".to_string())));
        }
        Ok(Box::pin(stream::iter(items)))
    }
}

fn registry_for(source: &Arc<ScriptedSource>) -> Arc<BackendRegistry> {
    let mut registry = BackendRegistry::new(Arc::new(|model: &str| {
        Err(GenerationError::Backend(format!(
            "no backend for model {}",
            model
        )))
    }));
    let captured = Arc::clone(source);
    registry.register(
        "mock",
        Arc::new(move |_model: &str| Ok(Arc::clone(&captured) as Arc<dyn TokenSource>)),
    );
    Arc::new(registry)
}

fn agent_over(source: &Arc<ScriptedSource>, cache_dir: &std::path::Path) -> Agent {
    let registry = registry_for(source);
    let cache = Arc::new(GenerationCache::open(cache_dir).unwrap());
    Agent::new("a", source.model.clone(), &registry, &cache).unwrap()
}

fn history(prompt: &str) -> MessageList {
    let mut messages = MessageList::new();
    messages.add_user_message(prompt);
    messages
}

#[tokio::test]
async fn generate_concatenates_the_stream() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new("mock-1", &["Hel", "lo", "!"]);
    let agent = agent_over(&source, dir.path());

    let text = agent
        .generate(&history("hi"), &GenerateOptions::default())
        .await
        .unwrap();
    assert_eq!(text, "Hello!");
}

#[tokio::test]
async fn system_prompt_override_is_appended_not_substituted() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new("mock-1", &["ok"]);
    let agent = agent_over(&source, dir.path()).with_system_prompt("You are agent A.");

    let opts = GenerateOptions {
        system_prompt_override: Some("Answer in French.".to_string()),
        ..Default::default()
    };
    agent.generate(&history("hi"), &opts).await.unwrap();

    assert_eq!(
        source.last_system_content().unwrap(),
        "You are agent A.\n\nAnswer in French."
    );
}

#[tokio::test]
async fn identical_requests_hit_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new("mock-1", &["cached", " answer"]);
    let agent = agent_over(&source, dir.path());

    let first = agent
        .generate(&history("hi"), &GenerateOptions::default())
        .await
        .unwrap();
    let second = agent
        .generate(&history("hi"), &GenerateOptions::default())
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(source.calls(), 1, "second request must not reach the backend");
}

#[tokio::test]
async fn replay_matches_the_original_generation_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new("mock-1", &["one ", "two ", "three"]);
    let agent = agent_over(&source, dir.path());

    let live = agent
        .generate(&history("count"), &GenerateOptions::default())
        .await
        .unwrap();

    // Second call replays from cache through the same stream interface.
    let mut replayed = String::new();
    let mut stream = agent
        .generate_async(&history("count"), &GenerateOptions::default())
        .await
        .unwrap();
    while let Some(token) = stream.next().await {
        replayed.push_str(&token.unwrap());
    }

    assert_eq!(live, replayed);
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn parameter_overrides_change_the_cache_key() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new("mock-1", &["ok"]);
    let agent = agent_over(&source, dir.path());

    agent
        .generate(&history("hi"), &GenerateOptions::default())
        .await
        .unwrap();
    let opts = GenerateOptions {
        temperature_override: Some(0.1),
        ..Default::default()
    };
    agent.generate(&history("hi"), &opts).await.unwrap();

    assert_eq!(source.calls(), 2, "a different temperature is a different key");
}

#[tokio::test]
async fn force_overwrites_the_cached_entry() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new("mock-1", &["old"]);
    let agent = agent_over(&source, dir.path());

    let first = agent
        .generate(&history("hi"), &GenerateOptions::default())
        .await
        .unwrap();
    assert_eq!(first, "old");

    source.set_tokens(&["new"]);

    // Without force the stale entry is served.
    let stale = agent
        .generate(&history("hi"), &GenerateOptions::default())
        .await
        .unwrap();
    assert_eq!(stale, "old");
    assert_eq!(source.calls(), 1);

    // Force regenerates and replaces the entry.
    let fresh = agent
        .generate(&history("hi"), &GenerateOptions::forced())
        .await
        .unwrap();
    assert_eq!(fresh, "new");
    assert_eq!(source.calls(), 2);

    // The overwrite is what later lookups see.
    let after = agent
        .generate(&history("hi"), &GenerateOptions::default())
        .await
        .unwrap();
    assert_eq!(after, "new");
    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn partial_tokens_are_delivered_before_the_failure() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::failing_after("mock-1", &["a", "b", "c", "d"], 2);
    let agent = agent_over(&source, dir.path());

    let mut stream = agent
        .generate_async(&history("hi"), &GenerateOptions::default())
        .await
        .unwrap();

    let mut delivered = Vec::new();
    let mut failure = None;
    while let Some(item) = stream.next().await {
        match item {
            Ok(token) => delivered.push(token),
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }

    assert_eq!(delivered, vec!["a".to_string(), "b".to_string()]);
    assert!(failure.is_some(), "the error must reach the caller");
}

#[tokio::test]
async fn failed_generations_are_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::failing_after("mock-1", &["a", "b"], 1);
    let agent = agent_over(&source, dir.path());

    for _ in 0..2 {
        let mut stream = agent
            .generate_async(&history("hi"), &GenerateOptions::default())
            .await
            .unwrap();
        while let Some(item) = stream.next().await {
            if item.is_err() {
                break;
            }
        }
    }

    assert_eq!(source.calls(), 2, "a failed run must not satisfy later lookups");
}

#[tokio::test]
async fn derive_returns_a_new_agent_and_keeps_the_original() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new("mock-1", &["ok"]);
    let agent = agent_over(&source, dir.path())
        .with_position(2)
        .with_temperature(0.9);

    let derived = agent
        .derive(AgentOverrides {
            name: Some("a-cold".to_string()),
            temperature: Some(0.0),
            model: Some("mock-2".to_string()),
            ..Default::default()
        })
        .unwrap();

    assert_eq!(derived.name, "a-cold");
    assert_eq!(derived.temperature, 0.0);
    assert_eq!(derived.model, "mock-2");
    assert_eq!(derived.position, 2);

    assert_eq!(agent.name, "a");
    assert_eq!(agent.temperature, 0.9);
    assert_eq!(agent.model, "mock-1");
}

#[tokio::test]
async fn derive_to_an_unknown_model_family_fails() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new("mock-1", &["ok"]);
    let agent = agent_over(&source, dir.path());

    let err = agent
        .derive(AgentOverrides {
            model: Some("unknown-model".to_string()),
            ..Default::default()
        })
        .unwrap_err();
    assert!(err.to_string().contains("unknown-model"));
}
