use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use parking_lot::RwLock;
use tracing::{debug, error, instrument, warn};

use switchboard_core::assistant::Assistant;
use switchboard_core::capability::{
    CallContext, Capability, CapabilityDefinition, CapabilityProvider,
};
use switchboard_core::protocol::{codes, ProtocolResponse, ToolCall};
use switchboard_core::schema::validate_definition;

/// Registered providers in registration order.
///
/// Lookups scan providers front to back, so when two providers expose the
/// same capability name the earlier registration wins.
#[derive(Default)]
pub struct CapabilityRegistry {
    providers: RwLock<Vec<CapabilityProvider>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider. Re-registering a name replaces its capability
    /// set but keeps its original slot in the lookup order.
    pub fn register(&self, provider: CapabilityProvider) {
        for cap in &provider.capabilities {
            if let Err(reason) = validate_definition(&cap.definition) {
                warn!(provider = %provider.name, %reason, "capability schema failed validation");
            }
        }

        let mut providers = self.providers.write();
        for cap in &provider.capabilities {
            if let Some(owner) = providers
                .iter()
                .filter(|p| p.name != provider.name)
                .find(|p| p.capabilities.iter().any(|c| c.name() == cap.name()))
            {
                debug!(
                    capability = cap.name(),
                    provider = %provider.name,
                    shadowed_by = %owner.name,
                    "capability name already exposed by another provider"
                );
            }
        }

        match providers.iter_mut().find(|p| p.name == provider.name) {
            Some(existing) => {
                debug!(provider = %provider.name, "replacing provider");
                *existing = provider;
            }
            None => {
                let count = provider.capabilities.len();
                debug!(provider = %provider.name, count, "registered provider");
                providers.push(provider);
            }
        }
    }

    /// Remove a provider. Returns whether it was present.
    pub fn unregister(&self, name: &str) -> bool {
        let mut providers = self.providers.write();
        let before = providers.len();
        providers.retain(|p| p.name != name);
        let removed = providers.len() != before;
        if removed {
            debug!(provider = name, "unregistered provider");
        }
        removed
    }

    pub fn contains_provider(&self, name: &str) -> bool {
        self.providers.read().iter().any(|p| p.name == name)
    }

    /// Definitions exposed by one provider; empty when it is not registered.
    pub fn list_capabilities(&self, provider: &str) -> Vec<CapabilityDefinition> {
        self.providers
            .read()
            .iter()
            .find(|p| p.name == provider)
            .map(CapabilityProvider::definitions)
            .unwrap_or_default()
    }

    pub fn list_provider_names(&self) -> Vec<String> {
        self.providers.read().iter().map(|p| p.name.clone()).collect()
    }

    /// First capability with this name, in provider registration order.
    pub fn resolve(&self, name: &str) -> Option<Capability> {
        self.providers
            .read()
            .iter()
            .flat_map(|p| p.capabilities.iter())
            .find(|c| c.name() == name)
            .cloned()
    }

    pub fn is_capability(&self, name: &str) -> bool {
        self.providers
            .read()
            .iter()
            .any(|p| p.capabilities.iter().any(|c| c.name() == name))
    }

    /// Definitions visible to an assistant, following the order in which it
    /// lists its enabled providers. Unregistered providers are skipped.
    pub fn definitions_for(&self, assistant: &Assistant) -> Vec<CapabilityDefinition> {
        let providers = self.providers.read();
        let mut seen: Vec<&str> = Vec::new();
        let mut defs = Vec::new();
        for name in &assistant.enabled_capability_providers {
            if seen.contains(&name.as_str()) {
                continue;
            }
            seen.push(name);
            if let Some(p) = providers.iter().find(|p| &p.name == name) {
                defs.extend(p.definitions());
            }
        }
        defs
    }

    /// Execute one call. Never fails: every problem becomes an error envelope.
    #[instrument(skip(self, call, ctx), fields(tool = %call.name(), call_id = %call.id))]
    pub async fn execute(&self, call: &ToolCall, ctx: &CallContext) -> ProtocolResponse {
        let Some(capability) = self.resolve(call.name()) else {
            debug!("capability not found");
            return ProtocolResponse::not_found(call);
        };

        let args = match call.parse_arguments() {
            Ok(args) => args,
            Err(e) => {
                debug!(error = %e, "malformed arguments");
                return ProtocolResponse::failure(
                    &call.id,
                    codes::INVALID_ARGUMENTS,
                    format!("Error executing tool: {e}"),
                );
            }
        };

        // The lock is released by now; handlers may re-enter the registry.
        let invocation = capability.handler.call(args, ctx);
        match AssertUnwindSafe(invocation).catch_unwind().await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                debug!(error = %e, "capability returned an error");
                let message = format!("Error executing tool: {e}");
                ProtocolResponse::failure(&call.id, e.code(), message)
            }
            Err(panic) => {
                error!(panic = %panic_message(&panic), "capability panicked during execution");
                ProtocolResponse::failure(
                    &call.id,
                    codes::INTERNAL,
                    "Error executing tool: capability crashed",
                )
            }
        }
    }
}

pub(crate) fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use serde_json::{json, Value};
    use switchboard_core::capability::{CapabilityError, CapabilityHandler};
    use switchboard_core::ids::{AssistantId, SessionId, ToolCallId};
    use switchboard_core::protocol::RequestId;
    use switchboard_core::schema::object_schema;

    struct Reply(&'static str);

    #[async_trait]
    impl CapabilityHandler for Reply {
        async fn call(
            &self,
            _args: Value,
            _ctx: &CallContext,
        ) -> Result<ProtocolResponse, CapabilityError> {
            Ok(ProtocolResponse::text(self.0))
        }
    }

    struct EchoArgs;

    #[async_trait]
    impl CapabilityHandler for EchoArgs {
        async fn call(
            &self,
            args: Value,
            _ctx: &CallContext,
        ) -> Result<ProtocolResponse, CapabilityError> {
            Ok(ProtocolResponse::text(args.to_string()))
        }
    }

    struct SessionOf;

    #[async_trait]
    impl CapabilityHandler for SessionOf {
        async fn call(
            &self,
            _args: Value,
            ctx: &CallContext,
        ) -> Result<ProtocolResponse, CapabilityError> {
            let session = ctx.session_id.as_ref().map(|s| s.to_string());
            Ok(ProtocolResponse::text(session.unwrap_or_else(|| "none".into())))
        }
    }

    struct Failing(fn() -> CapabilityError);

    #[async_trait]
    impl CapabilityHandler for Failing {
        async fn call(
            &self,
            _args: Value,
            _ctx: &CallContext,
        ) -> Result<ProtocolResponse, CapabilityError> {
            Err((self.0)())
        }
    }

    struct Panicking;

    #[async_trait]
    impl CapabilityHandler for Panicking {
        async fn call(
            &self,
            _args: Value,
            _ctx: &CallContext,
        ) -> Result<ProtocolResponse, CapabilityError> {
            panic!("boom");
        }
    }

    fn cap(name: &str, handler: impl CapabilityHandler + 'static) -> Capability {
        Capability::new(
            CapabilityDefinition::new(name, format!("{name} capability"), object_schema(&[], &[])),
            handler,
        )
    }

    fn call(name: &str, args: &str) -> ToolCall {
        ToolCall::new(ToolCallId::from_raw("t1"), name, args)
    }

    async fn exec(registry: &CapabilityRegistry, name: &str, args: &str) -> ProtocolResponse {
        registry.execute(&call(name, args), &CallContext::detached()).await
    }

    fn text_of(resp: &ProtocolResponse) -> String {
        resp.outcome().unwrap().text_content()
    }

    #[test]
    fn register_and_list() {
        let registry = CapabilityRegistry::new();
        registry.register(
            CapabilityProvider::new("a").with(cap("x", Reply("a"))).with(cap("y", Reply("a"))),
        );
        registry.register(CapabilityProvider::new("b").with(cap("z", Reply("b"))));

        assert_eq!(registry.list_provider_names(), ["a", "b"]);
        let names: Vec<_> = registry.list_capabilities("a").into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["x", "y"]);
        assert!(registry.list_capabilities("missing").is_empty());
        assert!(registry.is_capability("z"));
        assert!(!registry.is_capability("w"));
    }

    #[tokio::test]
    async fn reregistration_replaces_in_place() {
        let registry = CapabilityRegistry::new();
        registry.register(CapabilityProvider::new("a").with(cap("x", Reply("old"))));
        registry.register(CapabilityProvider::new("b").with(cap("x", Reply("b"))));
        registry.register(
            CapabilityProvider::new("a")
                .with(cap("x", Reply("new")))
                .with(cap("q", Reply("new"))),
        );

        assert_eq!(registry.list_provider_names(), ["a", "b"]);
        assert_eq!(text_of(&exec(&registry, "x", "{}").await), "new");
        assert!(registry.is_capability("q"));
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = CapabilityRegistry::new();
        registry.register(CapabilityProvider::new("a").with(cap("x", Reply("a"))));
        assert!(registry.unregister("a"));
        assert!(!registry.unregister("a"));
        assert!(!registry.unregister("never-registered"));
        assert!(registry.resolve("x").is_none());
        assert!(!registry.contains_provider("a"));
    }

    #[test]
    fn definitions_follow_assistant_provider_order() {
        let registry = CapabilityRegistry::new();
        registry.register(CapabilityProvider::new("a").with(cap("x", Reply("a"))));
        registry.register(CapabilityProvider::new("b").with(cap("y", Reply("b"))));
        let assistant = Assistant::new(AssistantId::from_raw("asst"), "A")
            .with_provider("b")
            .with_provider("missing")
            .with_provider("a")
            .with_provider("b");

        let names: Vec<_> =
            registry.definitions_for(&assistant).into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["y", "x"]);
    }

    #[tokio::test]
    async fn first_registered_provider_wins() {
        let registry = CapabilityRegistry::new();
        registry.register(CapabilityProvider::new("first").with(cap("dup", Reply("first"))));
        registry.register(CapabilityProvider::new("second").with(cap("dup", Reply("second"))));
        assert_eq!(text_of(&exec(&registry, "dup", "{}").await), "first");

        registry.unregister("first");
        assert_eq!(text_of(&exec(&registry, "dup", "{}").await), "second");
    }

    #[tokio::test]
    async fn unknown_capability_is_404() {
        let registry = CapabilityRegistry::new();
        let resp = exec(&registry, "doesNotExist", "{}").await;
        assert!(!resp.success);
        let err = resp.error.as_ref().unwrap();
        assert_eq!(err.code, 404);
        assert_eq!(err.message, "Tool \"doesNotExist\" not found.");
        assert_eq!(resp.id, RequestId::Text("t1".into()));
    }

    #[tokio::test]
    async fn malformed_arguments_are_400_and_skip_handler() {
        let registry = CapabilityRegistry::new();
        registry.register(CapabilityProvider::new("a").with(cap("boom", Panicking)));
        let resp = exec(&registry, "boom", "{not json").await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, 400);
        assert!(err.message.starts_with("Error executing tool: "));
    }

    #[tokio::test]
    async fn empty_arguments_become_empty_object() {
        let registry = CapabilityRegistry::new();
        registry.register(CapabilityProvider::new("a").with(cap("echo", EchoArgs)));
        assert_eq!(text_of(&exec(&registry, "echo", "").await), "{}");
    }

    #[tokio::test]
    async fn handler_errors_become_envelopes() {
        let registry = CapabilityRegistry::new();
        registry.register(
            CapabilityProvider::new("a")
                .with(cap(
                    "bad_args",
                    Failing(|| CapabilityError::InvalidArguments("missing location".into())),
                ))
                .with(cap(
                    "broken",
                    Failing(|| CapabilityError::ExecutionFailed("disk full".into())),
                )),
        );

        let resp = exec(&registry, "bad_args", "{}").await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, 400);
        assert_eq!(err.message, "Error executing tool: invalid arguments: missing location");

        let resp = exec(&registry, "broken", "{}").await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, 500);
        assert_eq!(err.message, "Error executing tool: disk full");
    }

    #[tokio::test]
    async fn panicking_handler_is_contained() {
        let registry = CapabilityRegistry::new();
        registry.register(
            CapabilityProvider::new("a")
                .with(cap("boom", Panicking))
                .with(cap("ok", Reply("fine"))),
        );

        let resp = exec(&registry, "boom", "{}").await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, 500);
        assert_eq!(err.message, "Error executing tool: capability crashed");

        // The registry keeps working afterwards.
        assert_eq!(text_of(&exec(&registry, "ok", "{}").await), "fine");
    }

    #[tokio::test]
    async fn call_context_reaches_handler() {
        let registry = CapabilityRegistry::new();
        registry.register(CapabilityProvider::new("a").with(cap("whoami", SessionOf)));

        assert_eq!(text_of(&exec(&registry, "whoami", "{}").await), "none");
        let ctx = CallContext::for_session(SessionId::from_raw("sess_a"));
        let resp = registry.execute(&call("whoami", "{}"), &ctx).await;
        assert_eq!(text_of(&resp), "sess_a");
    }

    #[test]
    fn invalid_schema_is_still_registered() {
        let registry = CapabilityRegistry::new();
        registry.register(CapabilityProvider::new("a").with(Capability::new(
            CapabilityDefinition::new("loose", "", json!({"type": "string"})),
            Reply("a"),
        )));
        assert!(registry.is_capability("loose"));
    }

    #[test]
    fn panic_message_extracts_payload() {
        let p: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(&p), "static");
        let p: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&p), "owned");
        let p: Box<dyn std::any::Any + Send> = Box::new(42);
        assert_eq!(panic_message(&p), "unknown panic");
    }

    proptest! {
        #[test]
        fn lookup_follows_registration_order(
            order in Just((0..6usize).collect::<Vec<_>>()).prop_shuffle()
        ) {
            let registry = CapabilityRegistry::new();
            for i in &order {
                registry.register(CapabilityProvider::new(format!("p{i}")).with(Capability::new(
                    CapabilityDefinition::new("shared", format!("p{i}"), object_schema(&[], &[])),
                    Reply("x"),
                )));
            }
            let winner = registry.resolve("shared").unwrap();
            prop_assert_eq!(winner.definition.description, format!("p{}", order[0]));

            // Lookups are stable across repeated calls.
            let again = registry.resolve("shared").unwrap();
            prop_assert_eq!(again.definition.description, format!("p{}", order[0]));
        }

        #[test]
        fn unregister_promotes_next_provider(
            order in Just((0..4usize).collect::<Vec<_>>()).prop_shuffle()
        ) {
            let registry = CapabilityRegistry::new();
            for i in &order {
                registry.register(CapabilityProvider::new(format!("p{i}")).with(Capability::new(
                    CapabilityDefinition::new("shared", format!("p{i}"), object_schema(&[], &[])),
                    Reply("x"),
                )));
            }
            registry.unregister(&format!("p{}", order[0]));
            let winner = registry.resolve("shared").unwrap();
            prop_assert_eq!(winner.definition.description, format!("p{}", order[1]));
        }
    }
}
