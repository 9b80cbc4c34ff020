use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Number, Value};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use switchboard_core::assistant::Assistant;
use switchboard_core::capability::{
    CallContext, Capability, CapabilityDefinition, CapabilityError, CapabilityHandler,
    CapabilityProvider,
};
use switchboard_core::events::DispatchEvent;
use switchboard_core::ids::{AssistantId, ResponseId, SessionId};
use switchboard_core::messages::ConversationMessage;
use switchboard_core::protocol::{codes, ProtocolResponse, ProtocolResult};
use switchboard_core::schema::{array_schema, number_schema, object_schema, string_schema};

use super::plan::{InvalidIndex, Plan, PlanItem};
use crate::error::EngineError;
use crate::registry::CapabilityRegistry;
use crate::session::SessionContext;

pub const PROVIDER_NAME: &str = "multi-agent-orchestrator-service";
pub const ORCHESTRATOR_ID: &str = "multi-agent-orchestrator";
pub const ORCHESTRATOR_NAME: &str = "MultiAgentOrchestrator";

const NO_ACTIVE_SESSION: &str = "No active session";

/// Who is expected to answer next.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OrchestrationPhase {
    /// The orchestrator itself is in charge.
    Idle,
    /// A specialist has been handed the conversation.
    Delegating { assistant_id: AssistantId },
}

/// Plans are keyed by the calling session; calls made outside a session
/// share the `None` plan.
struct ControllerState {
    plans: Mutex<HashMap<Option<SessionId>, Plan>>,
    phases: Mutex<HashMap<SessionId, OrchestrationPhase>>,
    context: Arc<SessionContext>,
    event_tx: broadcast::Sender<DispatchEvent>,
}

impl ControllerState {
    fn orchestrator_id() -> AssistantId {
        AssistantId::from_raw(ORCHESTRATOR_ID)
    }

    fn send_event(&self, event: DispatchEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("no event receivers, event dropped");
        }
    }

    fn plan_updated(&self, session_id: &Option<SessionId>, plan: &Plan) {
        self.send_event(DispatchEvent::PlanUpdated {
            session_id: session_id.clone(),
            total: plan.len(),
            complete: plan.completed(),
        });
    }

    /// Run `f` against the calling session's plan.
    fn with_plan<T>(&self, ctx: &CallContext, f: impl FnOnce(&mut Plan) -> T) -> T {
        let mut plans = self.plans.lock();
        let plan = plans.entry(ctx.session_id.clone()).or_default();
        f(plan)
    }

    fn require_session(ctx: &CallContext) -> Result<SessionId, ProtocolResponse> {
        ctx.session_id
            .clone()
            .ok_or_else(|| ProtocolResponse::error(codes::INVALID_ARGUMENTS, NO_ACTIVE_SESSION))
    }

    fn set_phase(&self, session_id: &SessionId, phase: OrchestrationPhase) {
        let mut phases = self.phases.lock();
        let current = phases.entry(session_id.clone()).or_insert(OrchestrationPhase::Idle);
        if *current != phase {
            debug!(
                session_id = %session_id,
                from = ?*current,
                to = ?phase,
                "orchestration phase changed"
            );
            *current = phase;
        }
    }
}

fn reply(text: impl Into<String>) -> ProtocolResponse {
    ProtocolResponse::ok(ResponseId::new(), ProtocolResult::text(text))
}

fn reply_structured(text: impl Into<String>, structured: Value) -> ProtocolResponse {
    let result = ProtocolResult::text(text).with_structured(structured);
    ProtocolResponse::ok(ResponseId::new(), result)
}

// --- Handlers ---

#[derive(Deserialize)]
struct PromptToUserArgs {
    prompt: String,
}

struct PromptToUser(Arc<ControllerState>);

#[async_trait]
impl CapabilityHandler for PromptToUser {
    async fn call(
        &self,
        args: Value,
        ctx: &CallContext,
    ) -> Result<ProtocolResponse, CapabilityError> {
        let args: PromptToUserArgs = serde_json::from_value(args)?;
        let session_id = match ControllerState::require_session(ctx) {
            Ok(id) => id,
            Err(resp) => return Ok(resp),
        };
        self.0.context.defer(
            ConversationMessage::assistant(session_id, args.prompt)
                .with_assistant(ControllerState::orchestrator_id()),
        );
        Ok(reply("Prompt sent to user"))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwitchAssistantArgs {
    assistant_id: String,
    #[serde(default)]
    instruction: Option<String>,
}

struct SwitchAssistant(Arc<ControllerState>);

#[async_trait]
impl CapabilityHandler for SwitchAssistant {
    async fn call(
        &self,
        args: Value,
        ctx: &CallContext,
    ) -> Result<ProtocolResponse, CapabilityError> {
        let args: SwitchAssistantArgs = serde_json::from_value(args)?;
        let session_id = match ControllerState::require_session(ctx) {
            Ok(id) => id,
            Err(resp) => return Ok(resp),
        };

        let id = AssistantId::from_raw(args.assistant_id);
        let Some(next) = self.0.context.assistant(&id) else {
            return Ok(assistant_not_found(&id));
        };
        // The directory may have dropped it since the lookup.
        if !self.0.context.set_session_assistant(&session_id, &next.id) {
            return Ok(assistant_not_found(&id));
        }

        if let Some(instruction) = args.instruction.filter(|i| !i.trim().is_empty()) {
            self.0.context.defer(
                ConversationMessage::user(session_id.clone(), instruction)
                    .with_assistant(ControllerState::orchestrator_id()),
            );
        }

        let phase = if next.id == ControllerState::orchestrator_id() {
            OrchestrationPhase::Idle
        } else {
            OrchestrationPhase::Delegating {
                assistant_id: next.id.clone(),
            }
        };
        self.0.set_phase(&session_id, phase);
        info!(session_id = %session_id, assistant_id = %next.id, "switched assistant");
        self.0.send_event(DispatchEvent::AssistantSwitched {
            session_id,
            assistant_id: next.id,
        });
        Ok(reply(format!("Switched to assistant: {}", next.name)))
    }
}

fn assistant_not_found(id: &AssistantId) -> ProtocolResponse {
    ProtocolResponse::error(codes::NOT_FOUND, format!("Assistant with ID {id} not found"))
}

#[derive(Deserialize)]
struct SetPlanArgs {
    items: Vec<String>,
}

struct SetPlan(Arc<ControllerState>);

#[async_trait]
impl CapabilityHandler for SetPlan {
    async fn call(
        &self,
        args: Value,
        ctx: &CallContext,
    ) -> Result<ProtocolResponse, CapabilityError> {
        let SetPlanArgs { items } = serde_json::from_value(args)?;
        self.0.with_plan(ctx, |plan| {
            plan.set(items.iter().cloned());
            self.0.plan_updated(&ctx.session_id, plan);
        });
        Ok(reply_structured(
            format!("Plan set with {} items: {}", items.len(), items.join(", ")),
            json!({ "items": items }),
        ))
    }
}

#[derive(Deserialize)]
struct CheckPlanItemArgs {
    index: Number,
}

struct CheckPlanItem(Arc<ControllerState>);

#[async_trait]
impl CapabilityHandler for CheckPlanItem {
    async fn call(
        &self,
        args: Value,
        ctx: &CallContext,
    ) -> Result<ProtocolResponse, CapabilityError> {
        let CheckPlanItemArgs { index } = serde_json::from_value(args)?;
        let checked = match whole_number(&index) {
            Some(i) => self.0.with_plan(ctx, |plan| {
                let outcome = plan.check(i);
                if outcome.is_ok() {
                    self.0.plan_updated(&ctx.session_id, plan);
                }
                outcome.map(|()| i)
            }),
            None => Err(InvalidIndex(index.to_string())),
        };
        match checked {
            Ok(i) => Ok(reply_structured(
                format!("Plan item {i} marked as complete"),
                json!({ "index": i }),
            )),
            Err(e) => Ok(ProtocolResponse::error(codes::INVALID_ARGUMENTS, e.to_string())),
        }
    }
}

/// Integral value of `n`, if it has one that fits in an `i64`.
fn whole_number(n: &Number) -> Option<i64> {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0; // 2^63
    n.as_i64().or_else(|| {
        n.as_f64()
            .filter(|f| f.fract() == 0.0 && (-LIMIT..LIMIT).contains(f))
            .map(|f| f as i64)
    })
}

struct ClearPlan(Arc<ControllerState>);

#[async_trait]
impl CapabilityHandler for ClearPlan {
    async fn call(
        &self,
        _args: Value,
        ctx: &CallContext,
    ) -> Result<ProtocolResponse, CapabilityError> {
        self.0.with_plan(ctx, |plan| {
            plan.clear();
            self.0.plan_updated(&ctx.session_id, plan);
        });
        Ok(reply("Plan cleared"))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportResultArgs {
    result_in_detail: String,
}

struct ReportResult(Arc<ControllerState>);

#[async_trait]
impl CapabilityHandler for ReportResult {
    async fn call(
        &self,
        args: Value,
        ctx: &CallContext,
    ) -> Result<ProtocolResponse, CapabilityError> {
        let ReportResultArgs { result_in_detail } = serde_json::from_value(args)?;
        let session_id = match ControllerState::require_session(ctx) {
            Ok(id) => id,
            Err(resp) => return Ok(resp),
        };
        self.0.context.defer(
            ConversationMessage::assistant(session_id.clone(), result_in_detail.clone())
                .with_assistant(ControllerState::orchestrator_id()),
        );
        self.0.set_phase(&session_id, OrchestrationPhase::Idle);
        Ok(reply_structured(
            format!("Result reported: {result_in_detail}"),
            json!({ "detail": result_in_detail }),
        ))
    }
}

// --- Controller ---

/// Plan tracking and assistant handoff, exposed as the
/// `multi-agent-orchestrator-service` provider.
#[derive(Clone)]
pub struct OrchestrationController {
    state: Arc<ControllerState>,
}

impl OrchestrationController {
    pub fn new(context: Arc<SessionContext>, event_tx: broadcast::Sender<DispatchEvent>) -> Self {
        Self {
            state: Arc::new(ControllerState {
                plans: Mutex::new(HashMap::new()),
                phases: Mutex::new(HashMap::new()),
                context,
                event_tx,
            }),
        }
    }

    pub fn definitions() -> Vec<CapabilityDefinition> {
        vec![
            CapabilityDefinition::new(
                "promptToUser",
                "Prompt the user for additional information or clarification",
                object_schema(
                    &[("prompt", string_schema("The prompt message to show to the user"))],
                    &["prompt"],
                ),
            ),
            CapabilityDefinition::new(
                "switchAssistant",
                "Switch to a different specialized assistant with specific instructions",
                object_schema(
                    &[
                        ("assistantId", string_schema("The ID of the assistant to switch to")),
                        (
                            "instruction",
                            string_schema("Optional specific instruction for the assistant"),
                        ),
                    ],
                    &["assistantId"],
                ),
            ),
            CapabilityDefinition::new(
                "setPlan",
                "Set a plan of action items for the user",
                object_schema(
                    &[(
                        "items",
                        array_schema(json!({"type": "string"}), "Array of plan items/steps"),
                    )],
                    &["items"],
                ),
            ),
            CapabilityDefinition::new(
                "checkPlanItem",
                "Mark a specific plan item as completed",
                object_schema(
                    &[(
                        "index",
                        number_schema("0-based index of the plan item to mark as complete"),
                    )],
                    &["index"],
                ),
            ),
            CapabilityDefinition::new(
                "clearPlan",
                "Clear/cancel the current plan",
                object_schema(&[], &[]),
            ),
            CapabilityDefinition::new(
                "reportResult",
                "Provide a detailed summary of completed task or current status",
                object_schema(
                    &[("resultInDetail", string_schema("Detailed result summary"))],
                    &["resultInDetail"],
                ),
            ),
        ]
    }

    /// The provider wired to this controller's state.
    pub fn provider(&self) -> CapabilityProvider {
        let state = &self.state;
        let handlers: [Arc<dyn CapabilityHandler>; 6] = [
            Arc::new(PromptToUser(Arc::clone(state))),
            Arc::new(SwitchAssistant(Arc::clone(state))),
            Arc::new(SetPlan(Arc::clone(state))),
            Arc::new(CheckPlanItem(Arc::clone(state))),
            Arc::new(ClearPlan(Arc::clone(state))),
            Arc::new(ReportResult(Arc::clone(state))),
        ];
        CapabilityProvider {
            name: PROVIDER_NAME.to_string(),
            capabilities: Self::definitions()
                .into_iter()
                .zip(handlers)
                .map(|(definition, handler)| Capability { definition, handler })
                .collect(),
        }
    }

    /// The orchestrator assistant, with a system prompt naming every other
    /// assistant currently in the directory.
    pub fn assistant(&self) -> Assistant {
        let available = self
            .state
            .context
            .assistants()
            .into_iter()
            .filter(|a| a.id.as_str() != ORCHESTRATOR_ID)
            .map(|a| format!("{}: {}", a.id, a.name))
            .collect::<Vec<_>>()
            .join(", ");
        Assistant::new(ControllerState::orchestrator_id(), ORCHESTRATOR_NAME)
            .with_provider(PROVIDER_NAME)
            .with_system_prompt(format!("{SYSTEM_PROMPT}\n\nAvailable assistants: {available}"))
    }

    /// Register the provider and put the orchestrator in charge of every
    /// session.
    pub fn activate(&self, registry: &CapabilityRegistry) -> Result<(), EngineError> {
        if registry.contains_provider(PROVIDER_NAME) {
            warn!("orchestration controller already registered");
            return Err(EngineError::ControllerAlreadyActive);
        }
        registry.register(self.provider());

        let assistant = self.assistant();
        let id = assistant.id.clone();
        self.state.context.upsert_assistant(assistant);
        self.state.context.set_active_assistant(&id);
        self.state.context.reset_session_assistants();
        self.state.phases.lock().clear();
        info!("orchestration controller activated");
        Ok(())
    }

    /// Unregister the provider and drop the orchestrator from the directory.
    pub fn deactivate(&self, registry: &CapabilityRegistry) -> bool {
        let removed = registry.unregister(PROVIDER_NAME);
        self.state.context.remove_assistant(&ControllerState::orchestrator_id());
        if removed {
            info!("orchestration controller deactivated");
        }
        removed
    }

    /// Copy of one session's plan; empty when it never set one.
    pub fn plan_snapshot(&self, session_id: &SessionId) -> Vec<PlanItem> {
        self.state
            .plans
            .lock()
            .get(&Some(session_id.clone()))
            .map(|plan| plan.items().to_vec())
            .unwrap_or_default()
    }

    pub fn phase(&self, session_id: &SessionId) -> OrchestrationPhase {
        self.state
            .phases
            .lock()
            .get(session_id)
            .cloned()
            .unwrap_or(OrchestrationPhase::Idle)
    }
}

const SYSTEM_PROMPT: &str = "\
You are a Multi-Agent Orchestrator. You coordinate specialized assistants
to fulfil complex user requests.

Tools:
1. promptToUser(prompt): ask the user for more information.
2. switchAssistant(assistantId, instruction?): hand the conversation to
   another assistant with instructions.
3. setPlan(items): lay out the plan as a checklist.
4. checkPlanItem(index): mark a plan item (0-based) as complete.
5. clearPlan(): drop the current plan.
6. reportResult(resultInDetail): summarize the outcome for the user and end
   the cycle.

Break requests down, delegate to the right assistant, keep the plan current,
and report back clearly.";

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::ids::ToolCallId;
    use switchboard_core::messages::Role;
    use switchboard_core::protocol::ToolCall;
    use switchboard_core::schema::validate_definition;

    struct Fixture {
        registry: CapabilityRegistry,
        context: Arc<SessionContext>,
        controller: OrchestrationController,
        events: broadcast::Receiver<DispatchEvent>,
        session_id: SessionId,
    }

    fn fixture() -> Fixture {
        let context = Arc::new(SessionContext::with_assistants([
            Assistant::new(AssistantId::from_raw("coder"), "Coder"),
            Assistant::new(AssistantId::from_raw("writer"), "Writer"),
        ]));
        let (tx, events) = broadcast::channel(64);
        let controller = OrchestrationController::new(Arc::clone(&context), tx);
        let registry = CapabilityRegistry::new();
        controller.activate(&registry).unwrap();
        let session_id = SessionId::new();
        Fixture {
            registry,
            context,
            controller,
            events,
            session_id,
        }
    }

    async fn call_in(f: &Fixture, ctx: &CallContext, name: &str, args: Value) -> ProtocolResponse {
        let call = ToolCall::with_json(ToolCallId::new(), name, &args);
        f.registry.execute(&call, ctx).await
    }

    async fn call(f: &Fixture, name: &str, args: Value) -> ProtocolResponse {
        call_in(f, &CallContext::for_session(f.session_id.clone()), name, args).await
    }

    fn text(resp: &ProtocolResponse) -> String {
        resp.outcome().unwrap().text_content()
    }

    #[test]
    fn definitions_validate() {
        for def in OrchestrationController::definitions() {
            assert!(validate_definition(&def).is_ok(), "{}", def.name);
        }
    }

    #[test]
    fn activation_installs_orchestrator() {
        let f = fixture();
        assert_eq!(f.registry.list_provider_names(), [PROVIDER_NAME]);
        let names: Vec<_> =
            f.registry.list_capabilities(PROVIDER_NAME).into_iter().map(|d| d.name).collect();
        assert_eq!(
            names,
            [
                "promptToUser",
                "switchAssistant",
                "setPlan",
                "checkPlanItem",
                "clearPlan",
                "reportResult"
            ]
        );

        let active = f.context.active_assistant().unwrap();
        assert_eq!(active.id.as_str(), ORCHESTRATOR_ID);
        assert_eq!(active.name, ORCHESTRATOR_NAME);
        assert!(active.enables(PROVIDER_NAME));
        assert!(active
            .system_prompt
            .ends_with("Available assistants: coder: Coder, writer: Writer"));
        assert_eq!(f.controller.phase(&f.session_id), OrchestrationPhase::Idle);
    }

    #[test]
    fn second_activation_is_rejected() {
        let f = fixture();
        let other = OrchestrationController::new(Arc::clone(&f.context), broadcast::channel(1).0);
        let again = other.activate(&f.registry);
        assert!(matches!(again, Err(EngineError::ControllerAlreadyActive)));
        let again = f.controller.activate(&f.registry);
        assert!(matches!(again, Err(EngineError::ControllerAlreadyActive)));
    }

    #[test]
    fn deactivate_removes_provider_and_assistant() {
        let f = fixture();
        assert!(f.controller.deactivate(&f.registry));
        assert!(!f.registry.contains_provider(PROVIDER_NAME));
        assert!(f.context.active_assistant().is_none());
        assert!(!f.controller.deactivate(&f.registry));
        // Can come back after deactivation.
        f.controller.activate(&f.registry).unwrap();
    }

    #[tokio::test]
    async fn set_then_check_plan() {
        let f = fixture();
        let resp = call(&f, "setPlan", json!({"items": ["Step1", "Step2"]})).await;
        assert_eq!(text(&resp), "Plan set with 2 items: Step1, Step2");
        assert_eq!(
            resp.outcome().unwrap().structured_content.as_ref().unwrap()["items"],
            json!(["Step1", "Step2"])
        );

        let resp = call(&f, "checkPlanItem", json!({"index": 1})).await;
        assert_eq!(text(&resp), "Plan item 1 marked as complete");
        assert_eq!(resp.outcome().unwrap().structured_content.as_ref().unwrap()["index"], 1);

        assert_eq!(
            f.controller.plan_snapshot(&f.session_id),
            [
                PlanItem { description: "Step1".into(), complete: false },
                PlanItem { description: "Step2".into(), complete: true },
            ]
        );
    }

    #[tokio::test]
    async fn out_of_range_check_is_rejected() {
        let f = fixture();
        call(&f, "setPlan", json!({"items": ["Step1", "Step2"]})).await;
        call(&f, "checkPlanItem", json!({"index": 1})).await;
        let before = f.controller.plan_snapshot(&f.session_id);

        let resp = call(&f, "checkPlanItem", json!({"index": 5})).await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, 400);
        assert_eq!(err.message, "Invalid plan item index: 5");
        assert_eq!(f.controller.plan_snapshot(&f.session_id), before);

        let resp = call(&f, "checkPlanItem", json!({"index": 0.5})).await;
        assert_eq!(resp.error.unwrap().message, "Invalid plan item index: 0.5");
        assert_eq!(f.controller.plan_snapshot(&f.session_id), before);
    }

    #[tokio::test]
    async fn huge_index_is_reported_as_sent() {
        let f = fixture();
        call(&f, "setPlan", json!({"items": ["Step1"]})).await;

        let huge = Number::from_f64(1e20).unwrap();
        let resp = call(&f, "checkPlanItem", json!({ "index": huge })).await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, 400);
        assert_eq!(err.message, format!("Invalid plan item index: {huge}"));
        assert!(!err.message.contains(&i64::MAX.to_string()));

        let resp = call(&f, "checkPlanItem", json!({"index": 1.0})).await;
        assert_eq!(resp.error.unwrap().message, "Invalid plan item index: 1");
        assert!(!f.controller.plan_snapshot(&f.session_id)[0].complete);
    }

    #[tokio::test]
    async fn clear_plan_empties() {
        let f = fixture();
        call(&f, "setPlan", json!({"items": ["a"]})).await;
        let resp = call(&f, "clearPlan", json!({})).await;
        assert_eq!(text(&resp), "Plan cleared");
        assert!(f.controller.plan_snapshot(&f.session_id).is_empty());
    }

    #[tokio::test]
    async fn plan_changes_emit_events() {
        let mut f = fixture();
        call(&f, "setPlan", json!({"items": ["a", "b"]})).await;
        call(&f, "checkPlanItem", json!({"index": 0})).await;
        call(&f, "checkPlanItem", json!({"index": 9})).await;

        let mut updates = Vec::new();
        while let Ok(evt) = f.events.try_recv() {
            if let DispatchEvent::PlanUpdated { total, complete, session_id } = evt {
                assert_eq!(session_id.as_ref(), Some(&f.session_id));
                updates.push((total, complete));
            }
        }
        assert_eq!(updates, [(2, 0), (2, 1)]);
    }

    #[tokio::test]
    async fn switch_to_unknown_assistant_is_404() {
        let f = fixture();
        let resp = call(&f, "switchAssistant", json!({"assistantId": "unknown"})).await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, 404);
        assert_eq!(err.message, "Assistant with ID unknown not found");
        let current = f.context.session_assistant_id(&f.session_id).unwrap();
        assert_eq!(current.as_str(), ORCHESTRATOR_ID);
        assert_eq!(f.controller.phase(&f.session_id), OrchestrationPhase::Idle);
    }

    #[tokio::test]
    async fn session_is_checked_before_assistant() {
        let f = fixture();
        let detached = CallContext::detached();
        let resp =
            call_in(&f, &detached, "switchAssistant", json!({"assistantId": "unknown"})).await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, 400);
        assert_eq!(err.message, "No active session");

        for (name, args) in [
            ("promptToUser", json!({"prompt": "?"})),
            ("reportResult", json!({"resultInDetail": "done"})),
        ] {
            let resp = call_in(&f, &detached, name, args).await;
            assert_eq!(resp.error.unwrap().message, "No active session", "{name}");
        }
        assert_eq!(f.context.deferred_len(), 0);
    }

    #[tokio::test]
    async fn switch_delegates_and_defers_instruction() {
        let mut f = fixture();
        let resp = call(
            &f,
            "switchAssistant",
            json!({"assistantId": "coder", "instruction": "Write the parser"}),
        )
        .await;
        assert_eq!(text(&resp), "Switched to assistant: Coder");
        assert_eq!(f.context.session_assistant_id(&f.session_id).unwrap().as_str(), "coder");
        assert_eq!(f.context.active_assistant_id().unwrap().as_str(), ORCHESTRATOR_ID);
        assert_eq!(
            f.controller.phase(&f.session_id),
            OrchestrationPhase::Delegating { assistant_id: AssistantId::from_raw("coder") }
        );

        let deferred = f.context.take_deferred(&f.session_id);
        assert_eq!(deferred.len(), 1);
        assert_eq!(deferred[0].role, Role::User);
        assert_eq!(deferred[0].content, "Write the parser");
        assert_eq!(deferred[0].assistant_id.as_ref().unwrap().as_str(), ORCHESTRATOR_ID);

        let switched = std::iter::from_fn(|| f.events.try_recv().ok()).any(|e| {
            matches!(
                e,
                DispatchEvent::AssistantSwitched { ref assistant_id, .. }
                    if assistant_id.as_str() == "coder"
            )
        });
        assert!(switched);
    }

    #[tokio::test]
    async fn switch_without_instruction_defers_nothing() {
        let f = fixture();
        call(&f, "switchAssistant", json!({"assistantId": "writer"})).await;
        assert_eq!(f.context.deferred_len(), 0);
    }

    #[tokio::test]
    async fn phase_returns_to_idle() {
        let f = fixture();
        call(&f, "switchAssistant", json!({"assistantId": "coder"})).await;
        call(&f, "promptToUser", json!({"prompt": "Which language?"})).await;
        let phase = f.controller.phase(&f.session_id);
        assert!(matches!(phase, OrchestrationPhase::Delegating { .. }));

        call(&f, "switchAssistant", json!({"assistantId": ORCHESTRATOR_ID})).await;
        assert_eq!(f.controller.phase(&f.session_id), OrchestrationPhase::Idle);

        call(&f, "switchAssistant", json!({"assistantId": "writer"})).await;
        let resp = call(&f, "reportResult", json!({"resultInDetail": "All done"})).await;
        assert_eq!(text(&resp), "Result reported: All done");
        let structured = resp.outcome().unwrap().structured_content.as_ref().unwrap();
        assert_eq!(structured["detail"], "All done");
        assert_eq!(f.controller.phase(&f.session_id), OrchestrationPhase::Idle);
    }

    #[tokio::test]
    async fn sessions_do_not_share_plan_phase_or_assistant() {
        let f = fixture();
        let other = SessionId::new();
        let other_ctx = CallContext::for_session(other.clone());

        call(&f, "setPlan", json!({"items": ["mine"]})).await;
        call(&f, "switchAssistant", json!({"assistantId": "coder"})).await;
        call_in(&f, &other_ctx, "promptToUser", json!({"prompt": "Yours?"})).await;

        assert!(f.controller.plan_snapshot(&other).is_empty());
        assert_eq!(f.controller.plan_snapshot(&f.session_id).len(), 1);
        assert_eq!(f.controller.phase(&other), OrchestrationPhase::Idle);
        assert_eq!(f.context.session_assistant_id(&other).unwrap().as_str(), ORCHESTRATOR_ID);
        assert_eq!(f.context.session_assistant_id(&f.session_id).unwrap().as_str(), "coder");

        assert!(f.context.take_deferred(&f.session_id).is_empty());
        let deferred = f.context.take_deferred(&other);
        assert_eq!(deferred.len(), 1);
        assert_eq!(deferred[0].content, "Yours?");
    }

    #[tokio::test]
    async fn reactivation_hands_every_session_back() {
        let f = fixture();
        call(&f, "switchAssistant", json!({"assistantId": "writer"})).await;
        f.controller.deactivate(&f.registry);
        f.controller.activate(&f.registry).unwrap();

        let current = f.context.session_assistant_id(&f.session_id).unwrap();
        assert_eq!(current.as_str(), ORCHESTRATOR_ID);
        assert_eq!(f.controller.phase(&f.session_id), OrchestrationPhase::Idle);
    }

    #[tokio::test]
    async fn prompt_and_report_defer_assistant_messages() {
        let f = fixture();
        let resp = call(&f, "promptToUser", json!({"prompt": "Which file?"})).await;
        assert_eq!(text(&resp), "Prompt sent to user");
        call(&f, "reportResult", json!({"resultInDetail": "Summary"})).await;

        let deferred = f.context.take_deferred(&f.session_id);
        let contents: Vec<_> = deferred.iter().map(|m| (m.role, m.content.as_str())).collect();
        assert_eq!(contents, [(Role::Assistant, "Which file?"), (Role::Assistant, "Summary")]);
    }

    #[tokio::test]
    async fn missing_arguments_are_400() {
        let f = fixture();
        let resp = call(&f, "setPlan", json!({})).await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, 400);
        assert!(err.message.starts_with("Error executing tool: invalid arguments"));
    }
}
