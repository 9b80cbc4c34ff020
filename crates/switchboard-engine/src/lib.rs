//! Capability dispatch and orchestration.
//!
//! [`CapabilityRegistry`] maps capability names to handlers, [`DispatchLoop`]
//! runs the assistant/tool cycle for a session, and
//! [`OrchestrationController`] layers planning and assistant handoff on top
//! of both.

pub mod conversation;
pub mod dispatch;
pub mod error;
pub mod generator;
pub mod orchestration;
pub mod providers;
pub mod registry;
pub mod remote;
pub mod session;

pub use conversation::ConversationStore;
pub use dispatch::{DispatchConfig, DispatchLoop, DispatchOutcome};
pub use error::EngineError;
pub use generator::{EchoGenerator, ScriptedGenerator, ScriptedTurn};
pub use orchestration::{OrchestrationController, OrchestrationPhase, Plan, PlanItem};
pub use registry::CapabilityRegistry;
pub use remote::{DisconnectedRemote, RemoteCapabilityClient, RemoteError, StdioRemoteClient};
pub use session::SessionContext;
