use serde::{Deserialize, Serialize};

use crate::ids::{AssistantId, SessionId, ToolCallId};

/// Where a call was routed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Local,
    Remote,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

/// Events emitted by the dispatch loop and the orchestration controller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DispatchEvent {
    #[serde(rename = "batch_start")]
    BatchStart {
        session_id: SessionId,
        call_count: usize,
    },

    #[serde(rename = "tool_start")]
    ToolStart {
        session_id: SessionId,
        tool_call_id: ToolCallId,
        tool_name: String,
        route: Route,
    },

    #[serde(rename = "tool_end")]
    ToolEnd {
        session_id: SessionId,
        tool_call_id: ToolCallId,
        tool_name: String,
        success: bool,
        duration_ms: u64,
    },

    #[serde(rename = "batch_complete")]
    BatchComplete {
        session_id: SessionId,
        call_count: usize,
    },

    #[serde(rename = "turn_submitted")]
    TurnSubmitted {
        session_id: SessionId,
        assistant_id: AssistantId,
        turn: u32,
    },

    #[serde(rename = "turn_limit_reached")]
    TurnLimitReached {
        session_id: SessionId,
        max_turns: u32,
    },

    #[serde(rename = "assistant_switched")]
    AssistantSwitched {
        session_id: SessionId,
        assistant_id: AssistantId,
    },

    #[serde(rename = "plan_updated")]
    PlanUpdated {
        session_id: Option<SessionId>,
        total: usize,
        complete: usize,
    },
}

impl DispatchEvent {
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::BatchStart { session_id, .. }
            | Self::ToolStart { session_id, .. }
            | Self::ToolEnd { session_id, .. }
            | Self::BatchComplete { session_id, .. }
            | Self::TurnSubmitted { session_id, .. }
            | Self::TurnLimitReached { session_id, .. }
            | Self::AssistantSwitched { session_id, .. } => Some(session_id),
            Self::PlanUpdated { session_id, .. } => session_id.as_ref(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::BatchStart { .. } => "batch_start",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolEnd { .. } => "tool_end",
            Self::BatchComplete { .. } => "batch_complete",
            Self::TurnSubmitted { .. } => "turn_submitted",
            Self::TurnLimitReached { .. } => "turn_limit_reached",
            Self::AssistantSwitched { .. } => "assistant_switched",
            Self::PlanUpdated { .. } => "plan_updated",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_session_id() {
        let sid = SessionId::new();
        let evt = DispatchEvent::BatchStart {
            session_id: sid.clone(),
            call_count: 2,
        };
        assert_eq!(evt.session_id(), Some(&sid));

        let plan = DispatchEvent::PlanUpdated {
            session_id: None,
            total: 0,
            complete: 0,
        };
        assert!(plan.session_id().is_none());
    }

    #[test]
    fn event_type_matches_serde_tag() {
        let evt = DispatchEvent::ToolStart {
            session_id: SessionId::new(),
            tool_call_id: ToolCallId::from_raw("t1"),
            tool_name: "setPlan".into(),
            route: Route::Local,
        };
        let v = serde_json::to_value(&evt).unwrap();
        assert_eq!(v["type"], evt.event_type());
        assert_eq!(v["route"], "local");
    }
}
