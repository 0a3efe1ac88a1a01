use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Mutex;
use std::time::Instant;

use ablator_gate::{HookInvoker, ToolHooks, ToolResult};
use ablator_utils::directive::{Directive, parse_directive};
use ablator_utils::error::{DefinitionError, GateError};
use ablator_utils::types::{Hook, HookProvenance, HookTiming};

use crate::matcher::submatch;

tokio::task_local! {
    // Set while a hook's own tool call runs, for that call chain only.
    static IN_HOOK: ();
}

fn in_hook() -> bool {
    IN_HOOK.try_with(|_| ()).is_ok()
}

/// A hook ready to fire: parsed directive plus its position in the definition.
#[derive(Debug, Clone)]
struct PreparedHook {
    index: usize,
    label: String,
    timing: HookTiming,
    tool: String,
    when_input: Option<Value>,
    when_output: Option<Value>,
    run: Directive,
}

/// Record of one hook invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookFiring {
    pub label: String,
    pub index: usize,
    pub timing: HookTiming,
    pub trigger_tool: String,
    pub invoked_tool: String,
    pub args: Value,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
    pub result_preview: Option<String>,
}

impl HookFiring {
    #[must_use]
    pub fn provenance(&self) -> HookProvenance {
        HookProvenance {
            hook: self.label.clone(),
            timing: self.timing,
            trigger_tool: self.trigger_tool.clone(),
        }
    }
}

/// Evaluates hooks around gated tool calls.
#[derive(Debug, Default)]
pub struct HookEngine {
    hooks: Vec<PreparedHook>,
    firings: Mutex<Vec<HookFiring>>,
}

impl HookEngine {
    /// Prepare `top_level` then `phase_local` hooks. Disabled hooks are dropped;
    /// indexes still count them so labels stay stable.
    pub fn new(top_level: &[Hook], phase_local: &[Hook]) -> Result<Self, DefinitionError> {
        let mut hooks = Vec::new();
        for (index, hook) in top_level.iter().chain(phase_local).enumerate() {
            if !hook.enabled {
                continue;
            }
            let (timing, tool) = hook.trigger().ok_or_else(|| DefinitionError::InvalidHook {
                index,
                reason: "exactly one of 'before' or 'after' is required".to_string(),
            })?;
            let run = parse_directive(&hook.run).map_err(|e| DefinitionError::InvalidHook {
                index,
                reason: e.to_string(),
            })?;
            hooks.push(PreparedHook {
                index,
                label: hook.display_label(index),
                timing,
                tool: tool.to_string(),
                when_input: hook.when_input.clone(),
                when_output: hook.when_output.clone(),
                run,
            });
        }
        Ok(Self {
            hooks,
            firings: Mutex::new(Vec::new()),
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Drain the firings recorded so far.
    pub fn take_firings(&self) -> Vec<HookFiring> {
        self.firings
            .lock()
            .map(|mut firings| std::mem::take(&mut *firings))
            .unwrap_or_default()
    }

    fn matching<'a>(
        &'a self,
        timing: HookTiming,
        tool: &'a str,
        input: &'a Value,
        output: Option<&'a Value>,
    ) -> impl Iterator<Item = &'a PreparedHook> + 'a {
        self.hooks.iter().filter(move |hook| {
            if hook.timing != timing || hook.tool != tool {
                return false;
            }
            if let Some(expected) = &hook.when_input
                && !submatch(expected, input)
            {
                return false;
            }
            match (&hook.when_output, output) {
                (None, _) => true,
                (Some(expected), Some(actual)) => submatch(expected, actual),
                (Some(_), None) => false,
            }
        })
    }

    async fn fire(
        &self,
        hook: &PreparedHook,
        trigger_tool: &str,
        invoker: &dyn HookInvoker,
    ) -> Result<(), GateError> {
        tracing::debug!(
            hook = %hook.label,
            timing = %hook.timing,
            trigger = trigger_tool,
            tool = %hook.run.tool,
            "Firing hook"
        );

        let started_at = Utc::now();
        let started = Instant::now();
        let result = IN_HOOK
            .scope((), invoker.invoke_internal(&hook.run.tool, hook.run.args.clone()))
            .await;

        let mut firing = HookFiring {
            label: hook.label.clone(),
            index: hook.index,
            timing: hook.timing,
            trigger_tool: trigger_tool.to_string(),
            invoked_tool: hook.run.tool.clone(),
            args: hook.run.args.clone(),
            started_at,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            success: true,
            error: None,
            result_preview: None,
        };

        let outcome = match result {
            Ok(tool_result) => {
                firing.result_preview = Some(tool_result.preview());
                Ok(())
            }
            Err(err) => {
                firing.success = false;
                firing.error = Some(err.to_string());
                Err(GateError::HookExecution {
                    hook: hook.label.clone(),
                    tool: trigger_tool.to_string(),
                    reason: err.to_string(),
                })
            }
        };

        if let Ok(mut firings) = self.firings.lock() {
            firings.push(firing);
        }
        outcome
    }

    /// Fire matching before-hooks in order. The first failure stops the
    /// remaining hooks and aborts the triggering call.
    pub async fn fire_before(
        &self,
        tool: &str,
        input: &Value,
        invoker: &dyn HookInvoker,
    ) -> Result<(), GateError> {
        if in_hook() {
            return Ok(());
        }
        for hook in self.matching(HookTiming::Before, tool, input, None) {
            if let Err(err) = self.fire(hook, tool, invoker).await {
                tracing::error!(hook = %hook.label, tool, error = %err, "Before-hook failed; aborting tool call");
                return Err(err);
            }
        }
        Ok(())
    }

    /// Fire matching after-hooks in order. Failures are logged and recorded
    /// and never change `result`.
    pub async fn fire_after(
        &self,
        tool: &str,
        input: &Value,
        result: &ToolResult,
        invoker: &dyn HookInvoker,
    ) {
        if in_hook() {
            return;
        }
        // Non-JSON results never satisfy whenOutput
        let output = result.json();
        for hook in self.matching(HookTiming::After, tool, input, output.as_ref()) {
            if let Err(err) = self.fire(hook, tool, invoker).await {
                tracing::warn!(hook = %hook.label, tool, error = %err, "After-hook failed; continuing");
            }
        }
    }
}

#[async_trait]
impl ToolHooks for HookEngine {
    async fn before_call(
        &self,
        tool: &str,
        input: &Value,
        invoker: &dyn HookInvoker,
    ) -> Result<(), GateError> {
        self.fire_before(tool, input, invoker).await
    }

    async fn after_call(
        &self,
        tool: &str,
        input: &Value,
        result: &ToolResult,
        invoker: &dyn HookInvoker,
    ) {
        self.fire_after(tool, input, result, invoker).await;
    }
}
