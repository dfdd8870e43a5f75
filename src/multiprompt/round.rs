//! One orchestrated execution of all agents against the shared history.
//!
//! A [`ConversationRound`] partitions its agents into *position tiers* and runs
//! them tier by tier:
//!
//! ```text
//! run()
//!   ├─ "User" events          one per text part of the round's prompt (position 0)
//!   ├─ tier: position 1       agents A and B stream concurrently
//!   │    ├─ {agent:"A", token_index:1} {agent:"B", token_index:1} {agent:"A", ...}
//!   │    └─ barrier: both exhausted → responses folded into history (A, then B)
//!   ├─ tier: position 2       agent C sees A's and B's answers in its history
//!   │    └─ ...
//!   └─ Complete
//! ```
//!
//! Within a tier every agent task forwards its tokens into one merge channel
//! the moment they arrive, so delivery is interleaved and a fast agent is
//! never held back by a slow peer. The tier barrier is the only
//! synchronization point: the next tier starts only after *every* agent in the
//! current tier has terminated, and only the coordinating task ever touches
//! the shared history — worker tasks receive an immutable snapshot.
//!
//! One agent's failure becomes an [`RoundEvent::AgentError`] on the merged
//! stream; its siblings run to completion and whatever tokens the failing
//! agent produced before the error are still folded into history as its
//! response so far. The merged stream always terminates.
//!
//! Dropping the [`RoundStream`] cancels the coordinator and every in-flight
//! agent task; subsequent tiers never start.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::{JoinHandle, JoinSet};
use uuid::Uuid;

use crate::multiprompt::agent::{Agent, GenerateOptions};
use crate::multiprompt::message::{ContentPart, Message, MessageList};

/// Agent name carried by the prompt-echo events.
pub const USER_AGENT_NAME: &str = "User";

/// Lifecycle of a round. No state allows re-entry to an earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundState {
    /// Constructed, not yet run.
    Created,
    /// `run()` has started and events are being produced.
    Streaming,
    /// All tiers finished and the terminal event was emitted.
    Complete,
}

/// One token of one agent's output, with everything a consumer needs to
/// reconstruct a strict total order by `(round, position, agent, token_index)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenEvent {
    /// 1-based round number.
    pub round: usize,
    /// The agent's declared position; 0 for the user's own prompt.
    pub position: u32,
    /// Name of the producing agent, or `"User"` for the prompt echo.
    pub agent: String,
    /// 1-based, monotonically increasing per agent, independent across agents.
    pub token_index: u64,
    /// The token text.
    pub token: String,
    /// Conversation this round belongs to.
    pub conversation_id: Uuid,
}

/// An event on the merged round stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RoundEvent {
    /// A token arrived from an agent (or from the user-prompt echo).
    Token(TokenEvent),
    /// One agent's generation failed; its siblings keep streaming.
    AgentError {
        /// 1-based round number.
        round: usize,
        /// The failing agent's position.
        position: u32,
        /// The failing agent's name.
        agent: String,
        /// Rendered error message.
        error: String,
        /// Conversation this round belongs to.
        conversation_id: Uuid,
    },
    /// Terminal signal: every tier ran and history was updated.
    Complete {
        /// 1-based round number.
        round: usize,
        /// Conversation this round belongs to.
        conversation_id: Uuid,
    },
}

/// The merged, time-ordered event stream of one running round.
///
/// Dropping the stream aborts the coordinator and all in-flight agent tasks.
pub struct RoundStream {
    events: UnboundedReceiver<RoundEvent>,
    coordinator: JoinHandle<()>,
}

impl Stream for RoundStream {
    type Item = RoundEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<RoundEvent>> {
        self.get_mut().events.poll_recv(cx)
    }
}

impl Drop for RoundStream {
    fn drop(&mut self) {
        self.coordinator.abort();
    }
}

/// One orchestrated execution of the conversation's agents, organized into
/// position tiers.
pub struct ConversationRound {
    conversation_id: Uuid,
    num: usize,
    prompt: Message,
    agents: Vec<Agent>,
    history: Arc<Mutex<MessageList>>,
    responses: Mutex<HashMap<String, String>>,
    state: Mutex<RoundState>,
}

impl ConversationRound {
    /// Bind a round to its conversation's shared history.
    ///
    /// `agents` is the conversation's agent list captured **by value** at
    /// creation time — later mutation of the conversation's list does not
    /// affect this round.
    pub(crate) fn new(
        conversation_id: Uuid,
        num: usize,
        prompt: Message,
        agents: Vec<Agent>,
        history: Arc<Mutex<MessageList>>,
    ) -> Self {
        ConversationRound {
            conversation_id,
            num,
            prompt,
            agents,
            history,
            responses: Mutex::new(HashMap::new()),
            state: Mutex::new(RoundState::Created),
        }
    }

    /// 1-based display number of this round.
    pub fn num(&self) -> usize {
        self.num
    }

    /// Conversation this round belongs to.
    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    /// Text of the prompt this round was created with.
    pub fn prompt_text(&self) -> String {
        self.prompt.text()
    }

    /// The agent list captured at round creation.
    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RoundState {
        *self.state.lock().unwrap()
    }

    /// Accumulated agent-name → response-text mapping. Empty strings for
    /// agents whose tier started but produced nothing (yet).
    pub fn responses(&self) -> HashMap<String, String> {
        self.responses.lock().unwrap().clone()
    }

    /// Partition the round's agents into ordered groups by ascending
    /// position; agents within a group are concurrent peers. Ties keep
    /// declaration order.
    pub fn agents_in_position(&self) -> Vec<Vec<Agent>> {
        let mut sorted = self.agents.clone();
        sorted.sort_by_key(|agent| agent.position);
        let mut tiers: Vec<Vec<Agent>> = Vec::new();
        for agent in sorted {
            match tiers.last_mut() {
                Some(tier) if tier[0].position == agent.position => tier.push(agent),
                _ => tiers.push(vec![agent]),
            }
        }
        tiers
    }

    /// Start the round and return its merged event stream.
    ///
    /// A round runs once; calling `run()` again yields a stream that ends
    /// immediately.
    pub fn run(self: &Arc<Self>) -> RoundStream {
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut state = self.state.lock().unwrap();
            if *state != RoundState::Created {
                log::warn!(
                    "round {} of conversation {} was already run",
                    self.num,
                    self.conversation_id
                );
                drop(tx);
                // Coordinator that does nothing; the closed channel ends the stream.
                let coordinator = tokio::spawn(async {});
                return RoundStream {
                    events: rx,
                    coordinator,
                };
            }
            *state = RoundState::Streaming;
        }

        let round = Arc::clone(self);
        let coordinator = tokio::spawn(async move {
            round.drive(tx).await;
        });
        RoundStream {
            events: rx,
            coordinator,
        }
    }

    async fn drive(&self, tx: UnboundedSender<RoundEvent>) {
        // The caller always sees the user's own turn first, in source order.
        let mut user_index = 0u64;
        for part in &self.prompt.content {
            if let ContentPart::Text { text } = part {
                user_index += 1;
                let event = RoundEvent::Token(TokenEvent {
                    round: self.num,
                    position: 0,
                    agent: USER_AGENT_NAME.to_string(),
                    token_index: user_index,
                    token: text.clone(),
                    conversation_id: self.conversation_id,
                });
                if tx.send(event).is_err() {
                    return;
                }
            }
        }

        for tier in self.agents_in_position() {
            // Each tier is seeded with the history as of its start: prior
            // rounds, this round's prompt, and every tier already folded in.
            let snapshot = self.history.lock().unwrap().clone();

            let mut workers = JoinSet::new();
            for (idx, agent) in tier.iter().enumerate() {
                self.responses
                    .lock()
                    .unwrap()
                    .entry(agent.name.clone())
                    .or_default();

                let agent = agent.clone();
                let snapshot = snapshot.clone();
                let tx = tx.clone();
                let round_num = self.num;
                let conversation_id = self.conversation_id;
                workers.spawn(async move {
                    let response =
                        run_agent(&agent, &snapshot, &tx, round_num, conversation_id).await;
                    (idx, response)
                });
            }

            // Tier barrier: the merge for this tier ends only when every
            // worker has terminated. Results arrive in completion order and
            // are slotted back into declaration order.
            let mut results: Vec<Option<String>> = vec![None; tier.len()];
            while let Some(joined) = workers.join_next().await {
                match joined {
                    Ok((idx, response)) => results[idx] = Some(response),
                    Err(err) => {
                        if err.is_panic() {
                            log::error!("agent task panicked in round {}: {}", self.num, err);
                        }
                    }
                }
            }

            // Fold the tier into history in declaration order — the tie-break
            // rule consumers rely on for history reproducibility.
            let mut history = self.history.lock().unwrap();
            let mut responses = self.responses.lock().unwrap();
            for (idx, agent) in tier.iter().enumerate() {
                let text = results[idx].take().unwrap_or_default();
                history.add_agent_message(&agent.name, text.clone());
                responses.insert(agent.name.clone(), text);
            }
        }

        *self.state.lock().unwrap() = RoundState::Complete;
        let _ = tx.send(RoundEvent::Complete {
            round: self.num,
            conversation_id: self.conversation_id,
        });
    }
}

/// Drive one agent's generation to completion, forwarding every token as an
/// event. Returns the accumulated response text — including the partial text
/// produced before a mid-stream failure.
async fn run_agent(
    agent: &Agent,
    snapshot: &MessageList,
    tx: &UnboundedSender<RoundEvent>,
    round: usize,
    conversation_id: Uuid,
) -> String {
    use futures_util::StreamExt;

    let mut response = String::new();
    let mut stream = match agent.generate_async(snapshot, &GenerateOptions::default()).await {
        Ok(stream) => stream,
        Err(err) => {
            let _ = tx.send(RoundEvent::AgentError {
                round,
                position: agent.position,
                agent: agent.name.clone(),
                error: err.to_string(),
                conversation_id,
            });
            return response;
        }
    };

    let mut token_index = 0u64;
    while let Some(item) = stream.next().await {
        match item {
            Ok(token) => {
                token_index += 1;
                response.push_str(&token);
                let event = RoundEvent::Token(TokenEvent {
                    round,
                    position: agent.position,
                    agent: agent.name.clone(),
                    token_index,
                    token,
                    conversation_id,
                });
                if tx.send(event).is_err() {
                    break;
                }
            }
            Err(err) => {
                let _ = tx.send(RoundEvent::AgentError {
                    round,
                    position: agent.position,
                    agent: agent.name.clone(),
                    error: err.to_string(),
                    conversation_id,
                });
                break;
            }
        }
    }
    response
}
