//! Supervisory layer that plans work and hands turns between assistants.
//!
//! The controller is an ordinary capability provider: the assistant drives it
//! through tool calls that go through the same dispatch loop as everything
//! else.

mod controller;
mod plan;

pub use controller::{
    OrchestrationController, OrchestrationPhase, ORCHESTRATOR_ID, ORCHESTRATOR_NAME, PROVIDER_NAME,
};
pub use plan::{InvalidIndex, Plan, PlanItem};
