use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ids::SessionId;
use crate::protocol::{codes, ProtocolResponse};

/// Capability definition advertised to the assistant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDefinition {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

impl CapabilityDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// Per-call context handed to every handler.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallContext {
    /// Session the call belongs to; `None` for calls made outside a session.
    pub session_id: Option<SessionId>,
}

impl CallContext {
    pub fn for_session(session_id: SessionId) -> Self {
        Self {
            session_id: Some(session_id),
        }
    }

    pub fn detached() -> Self {
        Self::default()
    }
}

/// Trait implemented by every in-process capability.
///
/// Handlers receive already-parsed arguments. Returning `Err` is the normal
/// way to signal a failed call; the registry turns it into an error envelope.
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    async fn call(
        &self,
        args: serde_json::Value,
        ctx: &CallContext,
    ) -> Result<ProtocolResponse, CapabilityError>;
}

#[derive(Clone)]
pub struct Capability {
    pub definition: CapabilityDefinition,
    pub handler: Arc<dyn CapabilityHandler>,
}

impl Capability {
    pub fn new(
        definition: CapabilityDefinition,
        handler: impl CapabilityHandler + 'static,
    ) -> Self {
        Self {
            definition,
            handler: Arc::new(handler),
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.definition.name)
            .finish_non_exhaustive()
    }
}

/// A named group of capabilities registered as a unit.
#[derive(Clone, Debug)]
pub struct CapabilityProvider {
    pub name: String,
    pub capabilities: Vec<Capability>,
}

impl CapabilityProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: Vec::new(),
        }
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    pub fn definitions(&self) -> Vec<CapabilityDefinition> {
        self.capabilities.iter().map(|c| c.definition.clone()).collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("{0}")]
    ExecutionFailed(String),
    #[error("capability unavailable: {0}")]
    Unavailable(String),
}

impl CapabilityError {
    /// Envelope code used when this error is surfaced to the assistant.
    pub fn code(&self) -> i64 {
        match self {
            Self::InvalidArguments(_) => codes::INVALID_ARGUMENTS,
            Self::ExecutionFailed(_) | Self::Unavailable(_) => codes::INTERNAL,
        }
    }
}

impl From<serde_json::Error> for CapabilityError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidArguments(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl CapabilityHandler for Echo {
        async fn call(
            &self,
            args: serde_json::Value,
            ctx: &CallContext,
        ) -> Result<ProtocolResponse, CapabilityError> {
            let session = ctx.session_id.as_ref().map(|s| s.to_string()).unwrap_or_default();
            Ok(ProtocolResponse::text(format!("{session}:{args}")))
        }
    }

    #[test]
    fn definition_uses_input_schema_key() {
        let def = CapabilityDefinition::new("echo", "Echo", json!({"type": "object"}));
        let v = serde_json::to_value(&def).unwrap();
        assert_eq!(v["inputSchema"]["type"], "object");
        assert!(v.get("input_schema").is_none());
    }

    #[test]
    fn provider_lists_definitions_in_order() {
        let provider = CapabilityProvider::new("svc")
            .with(Capability::new(CapabilityDefinition::new("a", "", json!({})), Echo))
            .with(Capability::new(CapabilityDefinition::new("b", "", json!({})), Echo));
        let names: Vec<_> = provider.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn error_codes() {
        assert_eq!(CapabilityError::InvalidArguments("x".into()).code(), 400);
        assert_eq!(CapabilityError::ExecutionFailed("x".into()).code(), 500);
        assert_eq!(CapabilityError::Unavailable("x".into()).code(), 500);
    }

    #[tokio::test]
    async fn handler_is_callable_through_arc() {
        let cap = Capability::new(CapabilityDefinition::new("echo", "", json!({})), Echo);
        let resp = cap.handler.call(json!({"k": 1}), &CallContext::detached()).await.unwrap();
        assert!(resp.success);
        assert_eq!(resp.result.unwrap().text_content(), r#":{"k":1}"#);

        let ctx = CallContext::for_session(SessionId::from_raw("s1"));
        let resp = cap.handler.call(json!({}), &ctx).await.unwrap();
        assert_eq!(resp.result.unwrap().text_content(), "s1:{}");
    }
}
