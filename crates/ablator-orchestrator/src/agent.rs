//! The model side of a scenario.
//!
//! Provider calls are not this crate's business: an embedding application
//! supplies an [`AgentLoop`] that talks to the model and routes the model's
//! tool calls through the gate.

use async_trait::async_trait;

use ablator_gate::ToolCallGate;
use ablator_session::SessionStateMachine;
use ablator_utils::types::ModelRef;

/// Everything one model turn needs
pub struct TurnRequest<'a> {
    pub model: &'a ModelRef,
    pub query: &'a str,
    /// Upper bound on model/tool round trips within this turn
    pub max_iterations: u32,
    /// Gate with the scenario's hooks attached; use
    /// [`ToolCallGate::execute_for_model`] for model tool calls
    pub gate: &'a ToolCallGate,
    /// Active session; the query is already appended as a user message
    pub session: &'a mut SessionStateMachine,
}

/// What a finished turn reports back to the scheduler
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnOutcome {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// The model asked to abandon the remaining phases of this model/iteration
    pub abort_run: bool,
}

impl TurnOutcome {
    #[must_use]
    pub const fn tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[async_trait]
pub trait AgentLoop: Send + Sync {
    /// Run one user query to completion. An error fails the scenario.
    async fn run_turn(&self, request: TurnRequest<'_>) -> anyhow::Result<TurnOutcome>;
}
