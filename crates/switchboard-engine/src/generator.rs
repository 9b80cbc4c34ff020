use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use switchboard_core::errors::GenerationError;
use switchboard_core::generator::{GenerationRequest, TurnGenerator};
use switchboard_core::ids::{AssistantId, ToolCallId};
use switchboard_core::messages::{ConversationMessage, Role};
use switchboard_core::protocol::ToolCall;

/// One pre-programmed assistant turn.
#[derive(Clone, Debug)]
pub enum ScriptedTurn {
    /// A plain text reply; ends the dispatch cycle.
    Text(String),
    /// Tool calls with generated ids, given as `(name, arguments)`.
    Calls(Vec<(String, Value)>),
    /// Tool calls exactly as written, including raw argument text.
    RawCalls(Vec<ToolCall>),
    Error(GenerationError),
    /// Wait, then produce the inner turn.
    Delay(Duration, Box<ScriptedTurn>),
}

impl ScriptedTurn {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn call(name: impl Into<String>, args: Value) -> Self {
        Self::Calls(vec![(name.into(), args)])
    }

    pub fn calls<S: Into<String>>(calls: impl IntoIterator<Item = (S, Value)>) -> Self {
        Self::Calls(calls.into_iter().map(|(n, a)| (n.into(), a)).collect())
    }

    pub fn delayed(delay: Duration, inner: ScriptedTurn) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// What the generator was shown on one call.
#[derive(Clone, Debug)]
pub struct SeenRequest {
    pub assistant_id: AssistantId,
    pub capabilities: Vec<String>,
    pub history_len: usize,
}

/// Generator that replays scripted turns in order. Once the script runs out
/// it repeats the fallback turn if one is set, and fails otherwise.
pub struct ScriptedGenerator {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    fallback: Option<ScriptedTurn>,
    call_count: AtomicUsize,
    seen: Mutex<Vec<SeenRequest>>,
}

impl ScriptedGenerator {
    pub fn new(turns: impl IntoIterator<Item = ScriptedTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into_iter().collect()),
            fallback: None,
            call_count: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Produce the same turn forever.
    pub fn repeating(turn: ScriptedTurn) -> Self {
        Self::new(Vec::new()).with_fallback(turn)
    }

    pub fn with_fallback(mut self, turn: ScriptedTurn) -> Self {
        self.fallback = Some(turn);
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().clone()
    }

    pub fn seen_assistants(&self) -> Vec<String> {
        self.seen.lock().iter().map(|s| s.assistant_id.to_string()).collect()
    }

    pub fn remaining(&self) -> usize {
        self.turns.lock().len()
    }
}

#[async_trait]
impl TurnGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<ConversationMessage, GenerationError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.seen.lock().push(SeenRequest {
            assistant_id: request.assistant.id.clone(),
            capabilities: request.capability_names().into_iter().map(String::from).collect(),
            history_len: request.history.len(),
        });

        let next = self.turns.lock().pop_front();
        let mut turn = match next.or_else(|| self.fallback.clone()) {
            Some(turn) => turn,
            None => return Err(GenerationError::Exhausted(idx)),
        };

        // Unrolled iteratively to avoid recursive async.
        loop {
            match turn {
                ScriptedTurn::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    turn = *inner;
                }
                ScriptedTurn::Error(e) => return Err(e),
                ScriptedTurn::Text(text) => {
                    return Ok(ConversationMessage::assistant(request.session_id, text)
                        .with_assistant(request.assistant.id))
                }
                ScriptedTurn::Calls(calls) => {
                    let calls = calls
                        .into_iter()
                        .map(|(name, args)| ToolCall::with_json(ToolCallId::new(), name, &args))
                        .collect();
                    return Ok(ConversationMessage::assistant_calls(request.session_id, "", calls)
                        .with_assistant(request.assistant.id));
                }
                ScriptedTurn::RawCalls(calls) => {
                    return Ok(ConversationMessage::assistant_calls(request.session_id, "", calls)
                        .with_assistant(request.assistant.id))
                }
            }
        }
    }
}

/// Generator that answers the latest user message by echoing it.
/// Stands in for a model provider in the CLI.
#[derive(Clone, Copy, Debug, Default)]
pub struct EchoGenerator;

#[async_trait]
impl TurnGenerator for EchoGenerator {
    fn name(&self) -> &str {
        "echo"
    }

    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<ConversationMessage, GenerationError> {
        let last_user = request
            .history
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("");
        let text = format!(
            "[{}] {} ({} capabilities available)",
            request.assistant.name,
            last_user,
            request.capabilities.len()
        );
        let reply = ConversationMessage::assistant(request.session_id, text);
        Ok(reply.with_assistant(request.assistant.id))
    }
}
