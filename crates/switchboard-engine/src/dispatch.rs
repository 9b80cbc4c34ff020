use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use switchboard_core::capability::CallContext;
use switchboard_core::events::{DispatchEvent, Route};
use switchboard_core::generator::{GenerationRequest, TurnGenerator};
use switchboard_core::ids::SessionId;
use switchboard_core::messages::{ConversationMessage, Role};
use switchboard_core::protocol::{codes, ProtocolResponse, ToolCall};

use crate::conversation::ConversationStore;
use crate::error::EngineError;
use crate::registry::CapabilityRegistry;
use crate::remote::RemoteCapabilityClient;
use crate::session::SessionContext;

const DEFAULT_MAX_TURNS: u32 = 25;
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone, Debug)]
pub struct DispatchConfig {
    /// Follow-up turns one run may submit before it stops.
    pub max_turns: u32,
    /// Upper bound for a single capability call.
    pub call_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The tail no longer requests tools.
    Settled { turns: u32 },
    /// The turn budget ran out while the assistant still requested tools.
    TurnLimitReached { turns: u32 },
    /// Another run for the same session is in progress.
    Busy,
}

/// Removes the session from the in-flight map when the run ends.
struct InFlightGuard {
    runs: Arc<DashMap<SessionId, Instant>>,
    session_id: SessionId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.runs.remove(&self.session_id);
    }
}

/// Drives assistant turns: executes pending tool calls in order and submits
/// their results as the input of the next turn.
pub struct DispatchLoop {
    registry: Arc<CapabilityRegistry>,
    remote: Arc<dyn RemoteCapabilityClient>,
    store: Arc<dyn ConversationStore>,
    generator: Arc<dyn TurnGenerator>,
    context: Arc<SessionContext>,
    event_tx: broadcast::Sender<DispatchEvent>,
    config: DispatchConfig,
    in_flight: Arc<DashMap<SessionId, Instant>>,
}

impl DispatchLoop {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        remote: Arc<dyn RemoteCapabilityClient>,
        store: Arc<dyn ConversationStore>,
        generator: Arc<dyn TurnGenerator>,
        context: Arc<SessionContext>,
        event_tx: broadcast::Sender<DispatchEvent>,
    ) -> Self {
        Self {
            registry,
            remote,
            store,
            generator,
            context,
            event_tx,
            config: DispatchConfig::default(),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.config.max_turns = max_turns;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = timeout;
        self
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.context
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.event_tx.subscribe()
    }

    pub fn is_running(&self, session_id: &SessionId) -> bool {
        self.in_flight.contains_key(session_id)
    }

    fn send_event(&self, event: DispatchEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("no event receivers, event dropped");
        }
    }

    fn claim(&self, session_id: &SessionId) -> Option<InFlightGuard> {
        match self.in_flight.entry(session_id.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
                Some(InFlightGuard {
                    runs: Arc::clone(&self.in_flight),
                    session_id: session_id.clone(),
                })
            }
        }
    }

    /// Execute calls one at a time, in order. Returns one tool message per
    /// call, in the same order, each carrying its call's id.
    #[instrument(skip(self, calls), fields(session_id = %session_id, calls = calls.len()))]
    pub async fn dispatch_batch(
        &self,
        session_id: &SessionId,
        calls: &[ToolCall],
    ) -> Vec<ConversationMessage> {
        self.send_event(DispatchEvent::BatchStart {
            session_id: session_id.clone(),
            call_count: calls.len(),
        });

        let ctx = CallContext::for_session(session_id.clone());
        let timeout = self.config.call_timeout;
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let route = if self.registry.is_capability(call.name()) {
                Route::Local
            } else {
                Route::Remote
            };

            self.send_event(DispatchEvent::ToolStart {
                session_id: session_id.clone(),
                tool_call_id: call.id.clone(),
                tool_name: call.name().to_string(),
                route,
            });

            let start = Instant::now();
            let execution = async {
                match route {
                    Route::Local => self.registry.execute(call, &ctx).await,
                    Route::Remote => self.remote.execute(call).await,
                }
            };
            let response = match tokio::time::timeout(timeout, execution).await {
                Ok(response) => response,
                Err(_) => {
                    let timeout_ms = timeout.as_millis() as u64;
                    warn!(tool = %call.name(), timeout_ms, "capability call timed out");
                    ProtocolResponse::failure(
                        &call.id,
                        codes::TIMEOUT,
                        format!(
                            "Error executing tool: timed out after {}s",
                            timeout.as_secs_f64()
                        ),
                    )
                }
            };
            let duration_ms = start.elapsed().as_millis() as u64;

            debug!(
                tool = %call.name(),
                route = route.as_str(),
                success = response.success,
                duration_ms,
                "capability call finished"
            );
            self.send_event(DispatchEvent::ToolEnd {
                session_id: session_id.clone(),
                tool_call_id: call.id.clone(),
                tool_name: call.name().to_string(),
                success: response.success,
                duration_ms,
            });

            results.push(ConversationMessage::tool(
                session_id.clone(),
                call.id.clone(),
                render_tool_content(&response),
            ));
        }

        self.send_event(DispatchEvent::BatchComplete {
            session_id: session_id.clone(),
            call_count: calls.len(),
        });
        results
    }

    /// Append `inputs`, flush deferred messages, and generate the next
    /// assistant turn. Returns the stored assistant message.
    ///
    /// Holds the same per-session guard as [`run`](Self::run); submitting to
    /// a session with a run in flight fails with
    /// [`EngineError::SessionBusy`].
    pub async fn submit(
        &self,
        session_id: &SessionId,
        inputs: Vec<ConversationMessage>,
    ) -> Result<ConversationMessage, EngineError> {
        let Some(_guard) = self.claim(session_id) else {
            info!(session_id = %session_id, "session already has a run in flight");
            return Err(EngineError::SessionBusy(session_id.clone()));
        };
        self.submit_turn(session_id, inputs, 0).await
    }

    #[instrument(skip(self, inputs), fields(session_id = %session_id, inputs = inputs.len()))]
    async fn submit_turn(
        &self,
        session_id: &SessionId,
        inputs: Vec<ConversationMessage>,
        turn: u32,
    ) -> Result<ConversationMessage, EngineError> {
        for message in inputs {
            self.store.append(message).await?;
        }
        for message in self.context.take_deferred(session_id) {
            self.store.append(message).await?;
        }

        let assistant = self
            .context
            .assistant_for(session_id)
            .ok_or(EngineError::NoActiveAssistant)?;

        if let Err(e) = self.remote.connect(&assistant).await {
            warn!(
                assistant_id = %assistant.id,
                error = %e,
                "remote capabilities unavailable for this turn"
            );
        }

        let mut capabilities = self.registry.definitions_for(&assistant);
        capabilities.extend(self.remote.definitions_for(&assistant));
        let history = self.store.list_for_session(session_id).await?;

        let assistant_id = assistant.id.clone();
        let generated = self
            .generator
            .generate(GenerationRequest {
                session_id: session_id.clone(),
                assistant,
                capabilities,
                history,
            })
            .await?;
        if generated.role != Role::Assistant {
            return Err(EngineError::Internal(format!(
                "generator {} produced a {} message",
                self.generator.name(),
                generated.role
            )));
        }

        let stored = self.store.append(generated).await?;
        self.send_event(DispatchEvent::TurnSubmitted {
            session_id: session_id.clone(),
            assistant_id,
            turn,
        });
        Ok(stored)
    }

    /// Dispatch pending tool calls and resubmit until the assistant stops
    /// requesting tools or the turn budget is spent.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn run(&self, session_id: &SessionId) -> Result<DispatchOutcome, EngineError> {
        let Some(_guard) = self.claim(session_id) else {
            info!("session already has a run in flight");
            return Ok(DispatchOutcome::Busy);
        };
        self.drive(session_id).await
    }

    /// Submit a user message and keep going like [`run`](Self::run).
    #[instrument(skip(self, text), fields(session_id = %session_id))]
    pub async fn prompt(
        &self,
        session_id: &SessionId,
        text: &str,
    ) -> Result<DispatchOutcome, EngineError> {
        let Some(_guard) = self.claim(session_id) else {
            info!("session already has a run in flight");
            return Ok(DispatchOutcome::Busy);
        };
        self.submit_turn(
            session_id,
            vec![ConversationMessage::user(session_id.clone(), text)],
            0,
        )
        .await?;
        self.drive(session_id).await
    }

    async fn drive(&self, session_id: &SessionId) -> Result<DispatchOutcome, EngineError> {
        let mut turns = 0u32;
        loop {
            let tail = self.store.last_for_session(session_id).await?;
            let Some(tail) = tail.filter(ConversationMessage::awaits_dispatch) else {
                return Ok(DispatchOutcome::Settled { turns });
            };

            if turns >= self.config.max_turns {
                warn!(
                    max_turns = self.config.max_turns,
                    "turn limit reached with tool calls pending"
                );
                self.send_event(DispatchEvent::TurnLimitReached {
                    session_id: session_id.clone(),
                    max_turns: self.config.max_turns,
                });
                return Ok(DispatchOutcome::TurnLimitReached { turns });
            }

            let results = self.dispatch_batch(session_id, &tail.tool_calls).await;
            turns += 1;
            self.submit_turn(session_id, results, turns).await?;
        }
    }
}

/// Tool message content: the serialized result on success, a plain-text
/// error on failure.
pub fn render_tool_content(response: &ProtocolResponse) -> String {
    if response.success {
        return match &response.result {
            Some(result) => serde_json::to_string(result)
                .unwrap_or_else(|e| format!("Error: failed to serialize result: {e}")),
            None => "null".to_string(),
        };
    }
    let message = response
        .error
        .as_ref()
        .map(|e| e.message.as_str())
        .unwrap_or("Unknown error");
    if message.starts_with("Error") {
        message.to_string()
    } else {
        format!("Error: {message}")
    }
}
