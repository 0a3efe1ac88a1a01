//! The tool call gate: timeout, abort polling, force stop and recovery.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::{Instant, MissedTickBehavior};

use ablator_utils::error::GateError;
use ablator_utils::logging::duration_ms;

use crate::abort::{AbortMachine, AbortPoll, AbortSignal, PromptMutex};
use crate::invoker::{HookInvoker, ToolHooks};
use crate::preferences::{GateOptions, GatePreferences, effective_timeout};
use crate::prompt::ForceStopPrompter;
use crate::server::{ServerRegistry, ToolServer};
use crate::types::{CallOrigin, IntoToolResult, ToolResult};

/// Executes tool calls against the registered servers.
///
/// Every call runs under the preference-provided timeout and is watched by
/// its own abort machine. Clones share the abort flag and the prompt mutex,
/// so a single prompt is visible at a time no matter how many calls are in
/// flight.
#[derive(Clone)]
pub struct ToolCallGate {
    registry: Arc<ServerRegistry>,
    preferences: Arc<dyn GatePreferences>,
    prompter: Arc<dyn ForceStopPrompter>,
    abort: AbortSignal,
    prompt_mutex: PromptMutex,
    options: GateOptions,
    hooks: Option<Arc<dyn ToolHooks>>,
}

impl std::fmt::Debug for ToolCallGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCallGate")
            .field("registry", &self.registry)
            .field("options", &self.options)
            .field("hooks", &self.hooks.is_some())
            .finish_non_exhaustive()
    }
}

enum CallOutcome {
    Finished(Result<ToolResult, GateError>),
    ForceStop,
}

impl ToolCallGate {
    #[must_use]
    pub fn new(
        registry: ServerRegistry,
        preferences: Arc<dyn GatePreferences>,
        prompter: Arc<dyn ForceStopPrompter>,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            preferences,
            prompter,
            abort: AbortSignal::new(),
            prompt_mutex: PromptMutex::new(),
            options: GateOptions::default(),
            hooks: None,
        }
    }

    #[must_use]
    pub const fn with_options(mut self, options: GateOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_abort_signal(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    #[must_use]
    pub fn with_prompt_mutex(mut self, prompt_mutex: PromptMutex) -> Self {
        self.prompt_mutex = prompt_mutex;
        self
    }

    /// A clone of this gate that consults `hooks` around every call.
    #[must_use]
    pub fn with_hooks(&self, hooks: Arc<dyn ToolHooks>) -> Self {
        Self {
            hooks: Some(hooks),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn abort_signal(&self) -> &AbortSignal {
        &self.abort
    }

    #[must_use]
    pub fn prompt_mutex(&self) -> &PromptMutex {
        &self.prompt_mutex
    }

    #[must_use]
    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    /// Run one tool call with hooks, timeout and abort handling.
    pub async fn execute(
        &self,
        tool: &str,
        input: Value,
        origin: CallOrigin,
    ) -> Result<ToolResult, GateError> {
        let server = self
            .registry
            .server_for(tool)
            .ok_or_else(|| GateError::NotFound {
                tool: tool.to_string(),
            })?;

        if let Some(hooks) = &self.hooks {
            hooks.before_call(tool, &input, self).await?;
        }

        let result = self.call(&server, tool, input.clone(), origin).await?;

        if let Some(hooks) = &self.hooks {
            hooks.after_call(tool, &input, &result, self).await;
        }

        Ok(result)
    }

    /// Like [`execute`](Self::execute) for a model-issued call: non-fatal
    /// errors (timeout, tool failure) come back as an error result the model
    /// can read. Fatal errors still end the turn.
    pub async fn execute_for_model(&self, tool: &str, input: Value) -> Result<ToolResult, GateError> {
        match self.execute(tool, input, CallOrigin::User).await {
            Err(err) if !err.is_fatal() => {
                tracing::debug!(tool, error = %err, "Returning tool error to the model");
                Ok(err.into_tool_result())
            }
            other => other,
        }
    }

    async fn call(
        &self,
        server: &Arc<dyn ToolServer>,
        tool: &str,
        input: Value,
        origin: CallOrigin,
    ) -> Result<ToolResult, GateError> {
        let timeout = effective_timeout(self.preferences.tool_timeout_secs());
        if origin == CallOrigin::User {
            tracing::info!(tool, server = %server.name(), args = %input, "Calling tool");
        }

        let started = Instant::now();
        let request = tokio::time::timeout(timeout, server.request(tool, input, timeout));

        let outcome = tokio::select! {
            biased;
            result = request => CallOutcome::Finished(match result {
                Ok(Ok(content)) => Ok(ToolResult::success(content)),
                Ok(Err(e)) => Err(GateError::ExecutionError {
                    tool: tool.to_string(),
                    reason: format!("{e:#}"),
                }),
                Err(_) => {
                    tracing::warn!(tool, timeout_ms = duration_ms(timeout), "Tool call timed out");
                    Err(GateError::Timeout {
                        tool: tool.to_string(),
                        timeout_ms: duration_ms(timeout),
                    })
                }
            }),
            () = self.watch_abort(server.name(), tool, origin) => CallOutcome::ForceStop,
        };

        match outcome {
            CallOutcome::Finished(result) => {
                tracing::debug!(
                    tool,
                    duration_ms = duration_ms(started.elapsed()),
                    ok = result.is_ok(),
                    "Tool call finished"
                );
                result
            }
            CallOutcome::ForceStop => {
                // The request future is gone; restart the server to tear down whatever it left running
                tracing::warn!(tool, server = %server.name(), "Force stopping tool call");
                let recovered = match server.restart().await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::error!(server = %server.name(), error = %format!("{e:#}"), "Tool server restart failed");
                        false
                    }
                };
                Err(GateError::ForceStopped {
                    tool: tool.to_string(),
                    server: server.name().to_string(),
                    recovered,
                })
            }
        }
    }

    /// Poll the abort flag until a force stop is agreed. Never returns otherwise.
    async fn watch_abort(&self, server: &str, tool: &str, origin: CallOrigin) {
        let mut machine = AbortMachine::new(self.options.force_stop_countdown);
        let mut ticker = tokio::time::interval(self.options.abort_poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if machine.observe(self.abort.is_set(), Instant::now()) != AbortPoll::CountdownElapsed {
                continue;
            }

            // Someone else is prompting; keep the elapsed countdown and re-check next tick
            let Some(_guard) = self.prompt_mutex.try_acquire() else {
                continue;
            };
            if !self.abort.is_set() {
                machine.reset();
                continue;
            }

            let confirmed = match origin {
                CallOrigin::Internal => {
                    tracing::info!(tool, server, "Auto-stopping internal tool call after abort");
                    true
                }
                CallOrigin::User => {
                    machine.prompt_shown();
                    self.prompter.confirm_force_stop(tool, server).await
                }
            };

            if confirmed {
                machine.stopped();
                return;
            }
            tracing::info!(tool, server, "Force stop declined; restarting countdown");
            machine.declined();
        }
    }
}

#[async_trait]
impl HookInvoker for ToolCallGate {
    async fn invoke_internal(&self, tool: &str, args: Value) -> Result<ToolResult, GateError> {
        self.execute(tool, args, CallOrigin::Internal).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preferences::StaticPreferences;
    use crate::types::{ToolContent, ToolDescriptor};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Echoes its arguments after an optional delay; `hang` tools never answer.
    struct MockServer {
        delay: Duration,
        restarts: AtomicUsize,
    }

    impl MockServer {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                restarts: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ToolServer for MockServer {
        fn name(&self) -> &str {
            "mock"
        }

        fn tools(&self) -> Vec<ToolDescriptor> {
            ["echo", "hang", "fail"]
                .into_iter()
                .map(|name| ToolDescriptor {
                    name: name.to_string(),
                    description: None,
                })
                .collect()
        }

        async fn request(
            &self,
            tool: &str,
            args: Value,
            _timeout: Duration,
        ) -> anyhow::Result<Vec<ToolContent>> {
            match tool {
                "hang" => std::future::pending().await,
                "fail" => anyhow::bail!("disk full"),
                _ => {
                    tokio::time::sleep(self.delay).await;
                    Ok(vec![ToolContent::text(args.to_string())])
                }
            }
        }

        async fn restart(&self) -> anyhow::Result<()> {
            self.restarts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Answers from a script and records how many holders the mutex had.
    struct ScriptedPrompter {
        answers: Mutex<VecDeque<bool>>,
        prompts: AtomicUsize,
        max_holders: AtomicUsize,
        mutex: PromptMutex,
        think: Duration,
    }

    impl ScriptedPrompter {
        fn new(mutex: &PromptMutex, answers: &[bool], think: Duration) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.iter().copied().collect()),
                prompts: AtomicUsize::new(0),
                max_holders: AtomicUsize::new(0),
                mutex: mutex.clone(),
                think,
            })
        }
    }

    #[async_trait]
    impl ForceStopPrompter for ScriptedPrompter {
        async fn confirm_force_stop(&self, _tool: &str, _server: &str) -> bool {
            self.prompts.fetch_add(1, Ordering::SeqCst);
            self.max_holders
                .fetch_max(self.mutex.holders(), Ordering::SeqCst);
            tokio::time::sleep(self.think).await;
            self.answers.lock().unwrap().pop_front().unwrap_or(true)
        }
    }

    fn gate(server: Arc<MockServer>, prompter: Arc<ScriptedPrompter>, timeout_secs: i64) -> ToolCallGate {
        let mutex = prompter.mutex.clone();
        ToolCallGate::new(
            ServerRegistry::new().with_server(server),
            Arc::new(StaticPreferences {
                tool_timeout_secs: timeout_secs,
            }),
            prompter,
        )
        .with_prompt_mutex(mutex)
    }

    fn prompter(answers: &[bool]) -> Arc<ScriptedPrompter> {
        ScriptedPrompter::new(&PromptMutex::new(), answers, Duration::ZERO)
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_tool_is_not_found() {
        let gate = gate(MockServer::new(Duration::ZERO), prompter(&[]), 300);
        let err = gate
            .execute("nope", json!({}), CallOrigin::User)
            .await
            .unwrap_err();
        assert_eq!(err, GateError::NotFound { tool: "nope".to_string() });
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_call() {
        let gate = gate(MockServer::new(Duration::from_secs(2)), prompter(&[]), 300);
        let result = gate
            .execute("echo", json!({"q": 1}), CallOrigin::User)
            .await
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.json(), Some(json!({"q": 1})));
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_failure_is_execution_error() {
        let gate = gate(MockServer::new(Duration::ZERO), prompter(&[]), 300);
        let err = gate
            .execute("fail", json!({}), CallOrigin::User)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::ExecutionError { ref reason, .. } if reason.contains("disk full")));
        assert!(!err.is_fatal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_non_fatal_for_model() {
        let gate = gate(MockServer::new(Duration::ZERO), prompter(&[]), 5);
        let started = Instant::now();

        let err = gate
            .execute("hang", json!({}), CallOrigin::User)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GateError::Timeout {
                tool: "hang".to_string(),
                timeout_ms: 5000
            }
        );
        assert!(started.elapsed() >= Duration::from_secs(5));

        let result = gate.execute_for_model("hang", json!({})).await.unwrap();
        assert!(result.is_error);
        assert_eq!(result.json().unwrap()["error"], "timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_force_stop_restarts_server() {
        let server = MockServer::new(Duration::ZERO);
        let prompter = prompter(&[true]);
        let gate = gate(Arc::clone(&server), Arc::clone(&prompter), -1);
        gate.abort_signal().set();
        let started = Instant::now();

        let err = gate
            .execute("hang", json!({}), CallOrigin::User)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            GateError::ForceStopped {
                tool: "hang".to_string(),
                server: "mock".to_string(),
                recovered: true
            }
        );
        assert!(err.is_fatal());
        assert!(started.elapsed() >= Duration::from_secs(15));
        assert_eq!(prompter.prompts.load(Ordering::SeqCst), 1);
        assert_eq!(server.restarts.load(Ordering::SeqCst), 1);
        assert_eq!(gate.prompt_mutex().holders(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_declined_force_stop_resets_countdown() {
        let server = MockServer::new(Duration::ZERO);
        let prompter = prompter(&[false, true]);
        let gate = gate(Arc::clone(&server), Arc::clone(&prompter), -1);
        gate.abort_signal().set();
        let started = Instant::now();

        let err = gate
            .execute("hang", json!({}), CallOrigin::User)
            .await
            .unwrap_err();

        assert!(matches!(err, GateError::ForceStopped { .. }));
        assert_eq!(prompter.prompts.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(server.restarts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleared_abort_lets_call_finish() {
        let server = MockServer::new(Duration::from_secs(20));
        let prompter = prompter(&[true]);
        let gate = gate(Arc::clone(&server), Arc::clone(&prompter), 300);
        gate.abort_signal().set();

        let signal = gate.abort_signal().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            signal.clear();
        });

        let result = gate
            .execute("echo", json!({"done": true}), CallOrigin::User)
            .await
            .unwrap();
        assert_eq!(result.json(), Some(json!({"done": true})));
        assert_eq!(prompter.prompts.load(Ordering::SeqCst), 0);
        assert_eq!(server.restarts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_internal_call_auto_stops_without_prompt() {
        let server = MockServer::new(Duration::ZERO);
        let prompter = prompter(&[false]);
        let gate = gate(Arc::clone(&server), Arc::clone(&prompter), -1);
        gate.abort_signal().set();

        let err = gate.invoke_internal("hang", json!({})).await.unwrap_err();
        assert!(matches!(err, GateError::ForceStopped { .. }));
        assert_eq!(prompter.prompts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_calls_share_one_prompt_at_a_time() {
        let mutex = PromptMutex::new();
        let prompter = ScriptedPrompter::new(&mutex, &[true, true, true], Duration::from_secs(3));
        let gate = gate(MockServer::new(Duration::ZERO), Arc::clone(&prompter), -1);
        gate.abort_signal().set();

        let calls: Vec<_> = (0..3)
            .map(|_| {
                let gate = gate.clone();
                tokio::spawn(async move { gate.execute("hang", json!({}), CallOrigin::User).await })
            })
            .collect();

        for call in calls {
            let err = call.await.unwrap().unwrap_err();
            assert!(matches!(err, GateError::ForceStopped { .. }));
        }
        assert_eq!(prompter.prompts.load(Ordering::SeqCst), 3);
        assert_eq!(prompter.max_holders.load(Ordering::SeqCst), 1);
        assert_eq!(gate.prompt_mutex().holders(), 0);
    }
}
