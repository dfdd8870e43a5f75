//! Conversations: ordered sequences of rounds over one growing history.
//!
//! A [`Conversation`] owns the agent list used to construct new rounds and the
//! shared message history every round reads and extends. Rounds capture the
//! agent list **by value** when they are created, so replacing the
//! conversation's agents never changes a round already built.
//!
//! A [`ConversationStore`] lets a transport layer re-attach to an existing
//! conversation across separate calls (e.g. multiple socket events). It is an
//! explicit object handed to whoever needs lookup — not a process-global — and
//! it bounds its memory with least-recently-used eviction, so a long-running
//! server does not accumulate conversations forever.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use multiprompt::{Agent, BackendConfig, BackendRegistry, ConversationStore, GenerationCache};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(BackendRegistry::standard(BackendConfig::from_env()));
//! let cache = Arc::new(GenerationCache::open("llm_cache")?);
//! let store = ConversationStore::default();
//!
//! let handle = store.get_or_create(None, || {
//!     vec![Agent::new("A", "gpt-4o", &registry, &cache).unwrap()]
//! });
//! let id = handle.lock().unwrap().id();
//!
//! // Same id, same instance, same history.
//! let again = store.get_or_create(Some(id), Vec::new);
//! assert!(Arc::ptr_eq(&handle, &again));
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::multiprompt::agent::Agent;
use crate::multiprompt::message::{AttachmentError, Message, MessageList, Role};
use crate::multiprompt::round::ConversationRound;

/// Conversations kept before the store starts evicting the least recently
/// used one.
pub const DEFAULT_STORE_CAPACITY: usize = 64;

/// An ordered sequence of rounds sharing one growing message history and one
/// set of agents.
pub struct Conversation {
    id: Uuid,
    agents: Vec<Agent>,
    history: Arc<Mutex<MessageList>>,
    rounds: Vec<Arc<ConversationRound>>,
}

impl Conversation {
    /// Create a conversation with a fresh UUID.
    pub fn new(agents: Vec<Agent>) -> Self {
        Self::with_id(Uuid::new_v4(), agents)
    }

    /// Create a conversation under a caller-supplied id.
    pub fn with_id(id: Uuid, agents: Vec<Agent>) -> Self {
        Conversation {
            id,
            agents,
            history: Arc::new(Mutex::new(MessageList::new())),
            rounds: Vec::new(),
        }
    }

    /// The conversation's identity.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Agents new rounds will be constructed over.
    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    /// Replace the agent list used by *future* rounds. Rounds already created
    /// keep the list they captured.
    pub fn set_agents(&mut self, agents: Vec<Agent>) {
        self.agents = agents;
    }

    /// Snapshot of the shared history as of now.
    pub fn history(&self) -> MessageList {
        self.history.lock().unwrap().clone()
    }

    /// All rounds, in creation order.
    pub fn rounds(&self) -> &[Arc<ConversationRound>] {
        &self.rounds
    }

    /// The most recently created round, if any.
    pub fn latest_round(&self) -> Option<&Arc<ConversationRound>> {
        self.rounds.last()
    }

    /// Append the user's prompt to the history and construct the next round
    /// over the current agent list.
    pub fn add_round(&mut self, prompt: &str) -> Result<Arc<ConversationRound>, AttachmentError> {
        self.add_round_with_attachments(prompt, &[])
    }

    /// [`Conversation::add_round`] with file attachments expanded into the
    /// prompt message. Attachment errors surface here, before any event is
    /// emitted.
    pub fn add_round_with_attachments(
        &mut self,
        prompt: &str,
        attachments: &[PathBuf],
    ) -> Result<Arc<ConversationRound>, AttachmentError> {
        let message = Message::with_attachments(Role::User, prompt, attachments)?;
        self.history.lock().unwrap().push(message.clone());

        let round = Arc::new(ConversationRound::new(
            self.id,
            self.rounds.len() + 1,
            message,
            self.agents.clone(),
            Arc::clone(&self.history),
        ));
        self.rounds.push(Arc::clone(&round));
        Ok(round)
    }
}

struct StoreInner {
    capacity: usize,
    /// Least recently used first.
    order: Vec<Uuid>,
    conversations: HashMap<Uuid, Arc<Mutex<Conversation>>>,
}

impl StoreInner {
    fn touch(&mut self, id: Uuid) {
        self.order.retain(|known| *known != id);
        self.order.push(id);
    }

    fn evict_over_capacity(&mut self) {
        while self.conversations.len() > self.capacity {
            let oldest = self.order.remove(0);
            self.conversations.remove(&oldest);
            log::info!("evicted least recently used conversation {}", oldest);
        }
    }
}

/// A capacity-bounded registry of conversations keyed by UUID.
///
/// Lookup is idempotent: requesting an existing id returns the same instance
/// (same history). The store is meant to be owned by the layer that needs
/// conversation re-attachment and passed down explicitly.
pub struct ConversationStore {
    inner: Mutex<StoreInner>,
}

impl ConversationStore {
    /// Create a store that keeps at most `capacity` conversations.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "store capacity must be at least 1");
        ConversationStore {
            inner: Mutex::new(StoreInner {
                capacity,
                order: Vec::new(),
                conversations: HashMap::new(),
            }),
        }
    }

    /// Look up `id`, or create a new conversation when `id` is `None` or
    /// unknown. `build_agents` is only called when a conversation is actually
    /// created.
    pub fn get_or_create<F>(&self, id: Option<Uuid>, build_agents: F) -> Arc<Mutex<Conversation>>
    where
        F: FnOnce() -> Vec<Agent>,
    {
        let mut inner = self.inner.lock().unwrap();

        if let Some(id) = id {
            if let Some(existing) = inner.conversations.get(&id).map(Arc::clone) {
                inner.touch(id);
                return existing;
            }
        }

        let id = id.unwrap_or_else(Uuid::new_v4);
        let conversation = Arc::new(Mutex::new(Conversation::with_id(id, build_agents())));
        inner.conversations.insert(id, Arc::clone(&conversation));
        inner.touch(id);
        inner.evict_over_capacity();
        conversation
    }

    /// Look up an existing conversation without creating one.
    pub fn get(&self, id: Uuid) -> Option<Arc<Mutex<Conversation>>> {
        let mut inner = self.inner.lock().unwrap();
        let found = inner.conversations.get(&id).map(Arc::clone);
        if found.is_some() {
            inner.touch(id);
        }
        found
    }

    /// Explicitly evict a conversation. Returns it if it was present.
    pub fn remove(&self, id: Uuid) -> Option<Arc<Mutex<Conversation>>> {
        let mut inner = self.inner.lock().unwrap();
        inner.order.retain(|known| *known != id);
        inner.conversations.remove(&id)
    }

    /// Number of conversations currently held.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().conversations.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        ConversationStore::new(DEFAULT_STORE_CAPACITY)
    }
}
