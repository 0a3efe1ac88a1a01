//! Seams between the gate and the hook engine.

use async_trait::async_trait;
use serde_json::Value;

use ablator_utils::error::GateError;

use crate::types::ToolResult;

/// Internal-call entry point handed to hooks.
///
/// Calls made through it are [`CallOrigin::Internal`](crate::CallOrigin):
/// not logged as user calls, auto-stopped on abort.
#[async_trait]
pub trait HookInvoker: Send + Sync {
    async fn invoke_internal(&self, tool: &str, args: Value) -> Result<ToolResult, GateError>;
}

/// Hooks consulted around every gated tool call.
#[async_trait]
pub trait ToolHooks: Send + Sync {
    /// Runs before the tool. An error aborts the triggering call.
    async fn before_call(
        &self,
        tool: &str,
        input: &Value,
        invoker: &dyn HookInvoker,
    ) -> Result<(), GateError>;

    /// Runs after the tool produced `result`. Failures are the hook's to log;
    /// they never change the triggering result.
    async fn after_call(
        &self,
        tool: &str,
        input: &Value,
        result: &ToolResult,
        invoker: &dyn HookInvoker,
    );
}
