//! The experiment scheduler: iterations x models x phases, strictly in order.

use anyhow::{Context, Result, bail};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use ablator_gate::{CallOrigin, ToolCallGate, ToolHooks, ToolResult};
use ablator_hooks::{HookEngine, HookFiring};
use ablator_session::{ChatMessage, ChatStore, SessionState, SessionStateMachine};
use ablator_snapshot::OutputSnapshotStore;
use ablator_utils::directive::{Command, Directive, parse_command};
use ablator_utils::error::SessionError;
use ablator_utils::logging::{
    duration_ms, log_scenario_complete, log_scenario_error, log_scenario_start, scenario_span,
};
use ablator_utils::paths::scenario_dir;
use ablator_utils::types::{
    AblationDefinition, AblationRun, AblationRunStatus, HookTiming, ModelRef, Phase, RunResult,
    RunStatus, ToolExecLog, ToolExecLogEntry,
};

use crate::agent::{AgentLoop, TurnRequest};
use crate::definition::{resolve_arguments, validate_definition, validate_directives};
use crate::placeholders::{apply_arguments, validate_placeholders};
use crate::progress::{ProgressEvent, ProgressSender};
use crate::report::write_tool_exec_log;
use crate::store::AblationStore;

/// Key a directive result sets to abandon the rest of the model/iteration
pub const ABORT_RUN_KEY: &str = "abortRun";

fn elapsed_ms(started: Instant) -> u64 {
    duration_ms(started.elapsed())
}

fn requests_abort(result: &ToolResult) -> bool {
    result
        .json()
        .and_then(|value| value.get(ABORT_RUN_KEY).and_then(serde_json::Value::as_bool))
        .unwrap_or(false)
}

fn firing_entry(command_index: usize, firing: HookFiring) -> ToolExecLogEntry {
    ToolExecLogEntry {
        command_index,
        hook: Some(firing.provenance()),
        tool: firing.invoked_tool,
        args: firing.args,
        started_at: firing.started_at,
        duration_ms: firing.duration_ms,
        success: firing.success,
        error: firing.error,
        result_preview: firing.result_preview,
    }
}

/// End a per-scenario session and return its chat ref. Dry-run scenarios
/// never start one, so an idle session has nothing to end.
fn end_scenario_session(
    session: &mut SessionStateMachine,
) -> Result<Option<String>, SessionError> {
    let ended = if session.state() == SessionState::Active {
        session.end().map(|metadata| metadata.map(|m| m.id))
    } else {
        Ok(None)
    };
    session.discard();
    ended
}

/// Which part of a phase a command belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    OnStart,
    Main,
    OnEnd,
}

/// One (phase, model, iteration) coordinate
struct Scenario<'a> {
    phase: &'a Phase,
    model: Option<&'a ModelRef>,
    /// 1-based iteration counter
    run_index: u32,
    /// Iteration as recorded; None when the ablation runs once
    iteration: Option<u32>,
}

impl Scenario<'_> {
    fn model_name(&self) -> Option<String> {
        self.model.map(ModelRef::display_name)
    }

    fn model_slug(&self) -> Option<String> {
        self.model.map(ModelRef::slug)
    }

    fn result(&self, status: RunStatus) -> RunResult {
        RunResult::new(&self.phase.name, self.model_name(), self.iteration, status)
    }
}

/// Mutable state of the scenario being executed
struct ScenarioState<'s> {
    gate: ToolCallGate,
    engine: Arc<HookEngine>,
    session: &'s mut SessionStateMachine,
    tool_log: Vec<ToolExecLogEntry>,
    tokens: u64,
    abort_run: bool,
}

struct ScenarioReport {
    result: RunResult,
    abort_run: bool,
    cancelled: bool,
}

enum RunEnd {
    Finished,
    Cancelled,
}

/// Drives a whole ablation run.
///
/// Scenarios run one after another. Tool directives go through the gate with
/// the scenario's hooks attached, queries go to the [`AgentLoop`], and each
/// scenario's outputs are captured into its own directory.
pub struct ExperimentScheduler {
    gate: ToolCallGate,
    store: AblationStore,
    snapshot: OutputSnapshotStore,
    agent: Option<Arc<dyn AgentLoop>>,
    chat_store: Option<Arc<dyn ChatStore>>,
    progress: Option<ProgressSender>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ExperimentScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentScheduler")
            .field("gate", &self.gate)
            .field("store", &self.store)
            .field("snapshot", &self.snapshot)
            .field("agent", &self.agent.is_some())
            .finish_non_exhaustive()
    }
}

impl ExperimentScheduler {
    #[must_use]
    pub fn new(gate: ToolCallGate, store: AblationStore, snapshot: OutputSnapshotStore) -> Self {
        Self {
            gate,
            store,
            snapshot,
            agent: None,
            chat_store: None,
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_agent(mut self, agent: Arc<dyn AgentLoop>) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Persist scenario conversations that had at least one round trip.
    #[must_use]
    pub fn with_chat_store(mut self, chat_store: Arc<dyn ChatStore>) -> Self {
        self.chat_store = Some(chat_store);
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: ProgressSender) -> Self {
        self.progress = Some(progress);
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token checked at phase and command boundaries.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn store(&self) -> &AblationStore {
        &self.store
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(progress) = &self.progress {
            // A dropped receiver only means nobody is watching
            let _ = progress.send(event);
        }
    }

    fn persist(&self, run: &AblationRun) {
        if let Err(e) = self.store.save_run(run) {
            tracing::warn!(run = %run.id, error = %e, "Failed to persist run");
        }
    }

    fn new_session(&self) -> SessionStateMachine {
        match &self.chat_store {
            Some(store) => SessionStateMachine::with_store(Arc::clone(store)),
            None => SessionStateMachine::new(),
        }
    }

    /// Run `definition` with user-supplied `arguments`.
    ///
    /// Fails only when the definition or arguments are invalid; everything
    /// after the run starts is recorded in the returned [`AblationRun`].
    pub async fn run(
        &self,
        definition: &AblationDefinition,
        arguments: &BTreeMap<String, String>,
    ) -> Result<AblationRun> {
        validate_definition(definition)?;
        for warning in validate_placeholders(definition) {
            tracing::warn!(ablation = %definition.name, "{warning}");
        }
        let resolved = resolve_arguments(definition, arguments)?;
        let definition = apply_arguments(definition, &resolved);
        validate_directives(&definition)?;

        if !definition.dry_run && self.agent.is_none() {
            bail!(
                "Ablation '{}' sends queries to models but no agent loop is configured; \
                 run it as a dry run instead",
                definition.name
            );
        }

        let mut run = AblationRun::start(&definition, resolved);
        let run_dir = self
            .store
            .create_run_dir(&definition.name, &run.id)
            .context("Failed to create run directory")?;
        tracing::info!(
            ablation = %definition.name,
            run = %run.id,
            scenarios = run.total_scenarios,
            dry_run = definition.dry_run,
            "Starting ablation run"
        );
        self.persist(&run);

        // Without a stash the outputs directory holds the user's files, so
        // scenarios run without clearing or capturing it
        let isolated = match self.snapshot.stash(&run_dir) {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(error = %e, "Failed to stash outputs; running without output isolation");
                self.emit(ProgressEvent::Error {
                    phase: None,
                    model: None,
                    message: e.to_string(),
                    duration_ms: 0,
                });
                false
            }
        };

        let end = self
            .run_scenarios(&definition, &run_dir, isolated, &mut run)
            .await;

        run.status = match end {
            RunEnd::Cancelled => AblationRunStatus::Aborted,
            RunEnd::Finished if run.count(RunStatus::Failed) > 0 => AblationRunStatus::Failed,
            RunEnd::Finished => AblationRunStatus::Completed,
        };
        run.completed_at = Some(Utc::now());
        self.persist(&run);

        if isolated && let Err(e) = self.snapshot.unstash(&run_dir) {
            tracing::error!(error = %e, "Failed to restore stashed outputs");
        }
        tracing::info!(
            ablation = %run.ablation,
            run = %run.id,
            status = %run.status,
            completed = run.count(RunStatus::Completed),
            failed = run.count(RunStatus::Failed),
            skipped = run.count(RunStatus::Skipped),
            "Ablation run finished"
        );
        Ok(run)
    }

    /// Park an active interactive session for the duration of a run.
    pub async fn run_with_parked_session(
        &self,
        user_session: &mut SessionStateMachine,
        definition: &AblationDefinition,
        arguments: &BTreeMap<String, String>,
    ) -> Result<AblationRun> {
        let parked = match user_session.state() {
            SessionState::Active => Some(user_session.pause()?),
            SessionState::Idle | SessionState::Paused => None,
        };
        let outcome = self.run(definition, arguments).await;
        if let Some(bundle) = parked {
            user_session.resume(bundle)?;
        }
        outcome
    }

    async fn run_scenarios(
        &self,
        definition: &AblationDefinition,
        run_dir: &Path,
        isolated: bool,
        run: &mut AblationRun,
    ) -> RunEnd {
        let runs = definition.runs();
        let models: Vec<Option<&ModelRef>> = if definition.dry_run {
            vec![None]
        } else {
            definition.models.iter().map(Some).collect()
        };

        for run_index in 1..=runs {
            let iteration = (runs > 1).then_some(run_index);
            for model in &models {
                let mut session = self.new_session();
                let mut abort_rest = false;

                for phase in &definition.phases {
                    let scenario = Scenario {
                        phase,
                        model: *model,
                        run_index,
                        iteration,
                    };

                    if abort_rest {
                        let skipped = scenario.result(RunStatus::Skipped);
                        self.emit(ProgressEvent::Result {
                            result: skipped.clone(),
                        });
                        run.record(skipped);
                        self.persist(run);
                        continue;
                    }
                    if self.cancel.is_cancelled() {
                        self.finish_session(&mut session);
                        return RunEnd::Cancelled;
                    }

                    let span = scenario_span(
                        &definition.name,
                        &phase.name,
                        scenario.model_name().as_deref(),
                        iteration,
                    );
                    let report = self
                        .run_scenario(definition, run_dir, isolated, &scenario, &mut session)
                        .instrument(span)
                        .await;

                    self.emit(ProgressEvent::Result {
                        result: report.result.clone(),
                    });
                    run.record(report.result);
                    self.persist(run);

                    if report.cancelled {
                        self.finish_session(&mut session);
                        return RunEnd::Cancelled;
                    }
                    abort_rest = report.abort_run;
                }

                self.finish_session(&mut session);
            }
        }
        RunEnd::Finished
    }

    /// End a session carried across phases, persisting it if it was used.
    fn finish_session(&self, session: &mut SessionStateMachine) {
        if session.state() == SessionState::Active
            && let Err(e) = session.end()
        {
            tracing::warn!(error = %e, "Failed to persist scenario chat");
        }
        session.discard();
    }

    async fn run_scenario(
        &self,
        definition: &AblationDefinition,
        run_dir: &Path,
        isolated: bool,
        scenario: &Scenario<'_>,
        session: &mut SessionStateMachine,
    ) -> ScenarioReport {
        let started = Instant::now();
        let phase = scenario.phase;
        let model_name = scenario.model_name();
        let model_slug = scenario.model_slug();
        let total_commands = phase.on_start.len() + phase.commands.len() + phase.on_end.len();

        log_scenario_start(&phase.name, model_name.as_deref(), total_commands);
        self.emit(ProgressEvent::Progress {
            phase: phase.name.clone(),
            model: model_name.clone(),
            run_index: scenario.run_index,
            command_index: None,
            total_commands,
            status: RunStatus::Running,
            message: None,
        });

        if isolated && let Err(e) = self.snapshot.clear() {
            tracing::warn!(error = %e, "Failed to clear outputs before scenario");
        }

        let mut result = scenario.result(RunStatus::Running);
        let prepared = self.prepare_scenario(definition, scenario, session);
        let (mut state, mut failure) = match prepared {
            Ok(state) => (Some(state), None),
            Err(e) => (None, Some(format!("{e:#}"))),
        };
        let mut cancelled = false;

        if let Some(state) = state.as_mut() {
            let commands = phase
                .on_start
                .iter()
                .map(|c| (Stage::OnStart, c))
                .chain(phase.commands.iter().map(|c| (Stage::Main, c)))
                .chain(phase.on_end.iter().map(|c| (Stage::OnEnd, c)));

            for (index, (stage, command)) in commands.enumerate() {
                if self.cancel.is_cancelled() {
                    cancelled = true;
                    break;
                }
                // A failure skips the remaining commands; onEnd still runs
                if failure.is_some() && stage != Stage::OnEnd {
                    continue;
                }
                self.emit(ProgressEvent::Progress {
                    phase: phase.name.clone(),
                    model: model_name.clone(),
                    run_index: scenario.run_index,
                    command_index: Some(index),
                    total_commands,
                    status: RunStatus::Running,
                    message: Some(command.clone()),
                });

                if let Err(reason) = self
                    .run_command(definition, scenario, state, index, command)
                    .await
                {
                    tracing::warn!(command_index = index, stage = ?stage, error = %reason, "Command failed");
                    failure.get_or_insert(reason);
                }
            }
            // Cancelled while the last command was in flight
            cancelled = cancelled || self.cancel.is_cancelled();
        }

        if isolated {
            result.outputs_captured = match self.snapshot.capture(
                run_dir,
                &phase.name,
                model_slug.as_deref(),
                scenario.iteration,
            ) {
                Ok(files) => files,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to capture scenario outputs");
                    0
                }
            };
        }

        let mut abort_run = false;
        if let Some(state) = state {
            abort_run = state.abort_run;
            result.tokens = state.tokens;

            if definition.dry_run {
                let dir = scenario_dir(run_dir, None, &phase.name, scenario.iteration);
                let log = ToolExecLog {
                    ablation: definition.name.clone(),
                    phase: phase.name.clone(),
                    iteration: scenario.iteration,
                    entries: state.tool_log,
                };
                match write_tool_exec_log(&dir, &log) {
                    Ok(path) => {
                        result.tool_log_ref = path
                            .strip_prefix(run_dir)
                            .ok()
                            .map(|rel| rel.display().to_string());
                    }
                    Err(e) => tracing::warn!(error = %e, "Failed to write tool execution log"),
                }
            }

            result.chat_ref = session.session_id().map(str::to_string);
            if !definition.settings.keep_context {
                match end_scenario_session(session) {
                    Ok(chat_ref) => result.chat_ref = chat_ref,
                    Err(e) => tracing::warn!(error = %e, "Failed to persist scenario chat"),
                }
            }
        }

        result.duration_ms = elapsed_ms(started);
        result.status = if cancelled {
            RunStatus::Aborted
        } else if failure.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        result.error = failure;

        match &result.error {
            Some(error) => {
                log_scenario_error(&phase.name, error, result.duration_ms);
                self.emit(ProgressEvent::Error {
                    phase: Some(phase.name.clone()),
                    model: model_name,
                    message: error.clone(),
                    duration_ms: result.duration_ms,
                });
            }
            None => {
                log_scenario_complete(&phase.name, result.status.as_ref(), result.duration_ms);
            }
        }

        ScenarioReport {
            result,
            abort_run,
            cancelled,
        }
    }

    fn prepare_scenario<'s>(
        &self,
        definition: &AblationDefinition,
        scenario: &Scenario<'_>,
        session: &'s mut SessionStateMachine,
    ) -> Result<ScenarioState<'s>> {
        let engine = Arc::new(HookEngine::new(&definition.hooks, &scenario.phase.hooks)?);
        let gate = self
            .gate
            .with_hooks(Arc::clone(&engine) as Arc<dyn ToolHooks>);

        if let Some(model) = scenario.model
            && session.state() == SessionState::Idle
        {
            let registry = gate.registry();
            session.start(
                model.clone(),
                registry.server_names(),
                registry.tool_names(),
                None,
            )?;
        }

        Ok(ScenarioState {
            gate,
            engine,
            session,
            tool_log: Vec::new(),
            tokens: 0,
            abort_run: false,
        })
    }

    async fn run_command(
        &self,
        definition: &AblationDefinition,
        scenario: &Scenario<'_>,
        state: &mut ScenarioState<'_>,
        index: usize,
        command: &str,
    ) -> Result<(), String> {
        match parse_command(command).map_err(|e| e.to_string())? {
            Command::Query(query) => self.run_query(definition, scenario, state, &query).await,
            Command::Directive(directive) => {
                self.run_directive(definition.dry_run, state, index, &directive)
                    .await
            }
        }
    }

    async fn run_query(
        &self,
        definition: &AblationDefinition,
        scenario: &Scenario<'_>,
        state: &mut ScenarioState<'_>,
        query: &str,
    ) -> Result<(), String> {
        let (Some(model), false) = (scenario.model, definition.dry_run) else {
            tracing::warn!(query, "Skipping model query in dry run");
            return Ok(());
        };
        let agent = self
            .agent
            .as_ref()
            .ok_or_else(|| "no agent loop configured".to_string())?;

        state
            .session
            .push(ChatMessage::user(query))
            .map_err(|e| e.to_string())?;
        let outcome = agent
            .run_turn(TurnRequest {
                model,
                query,
                max_iterations: definition.settings.max_iterations,
                gate: &state.gate,
                session: &mut *state.session,
            })
            .await
            .map_err(|e| format!("{e:#}"))?;

        // Hook firings only feed dry-run tool logs
        let firings = state.engine.take_firings();
        if !firings.is_empty() {
            tracing::debug!(count = firings.len(), "Hooks fired during model turn");
        }

        state.tokens += outcome.tokens();
        if outcome.abort_run {
            state.abort_run = true;
            return Err("model requested abortRun".to_string());
        }
        Ok(())
    }

    async fn run_directive(
        &self,
        dry_run: bool,
        state: &mut ScenarioState<'_>,
        index: usize,
        directive: &Directive,
    ) -> Result<(), String> {
        tracing::debug!(directive = %directive.summary(), "Executing directive");
        let started_at = Utc::now();
        let started = Instant::now();
        let outcome = state
            .gate
            .execute(&directive.tool, directive.args.clone(), CallOrigin::User)
            .await;
        let duration_ms = elapsed_ms(started);
        let firings = state.engine.take_firings();

        if dry_run {
            let (before, after): (Vec<_>, Vec<_>) = firings
                .into_iter()
                .partition(|firing| firing.timing == HookTiming::Before);
            state
                .tool_log
                .extend(before.into_iter().map(|f| firing_entry(index, f)));
            state.tool_log.push(ToolExecLogEntry {
                command_index: index,
                tool: directive.tool.clone(),
                args: directive.args.clone(),
                started_at,
                duration_ms,
                success: matches!(&outcome, Ok(result) if !result.is_error),
                error: outcome.as_ref().err().map(ToString::to_string),
                result_preview: outcome.as_ref().ok().map(ToolResult::preview),
                hook: None,
            });
            state
                .tool_log
                .extend(after.into_iter().map(|f| firing_entry(index, f)));
        }

        let result = outcome.map_err(|e| e.to_string())?;
        if state.session.state() == SessionState::Active {
            state
                .session
                .push(ChatMessage::tool(&directive.tool, result.text(), false))
                .map_err(|e| e.to_string())?;
        }
        if result.is_error {
            return Err(format!(
                "tool '{}' reported an error: {}",
                directive.tool,
                result.preview()
            ));
        }
        if requests_abort(&result) {
            state.abort_run = true;
            return Err(format!("tool '{}' requested abortRun", directive.tool));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ablator_gate::ToolContent;

    #[test]
    fn test_requests_abort() {
        let abort = ToolResult::success(vec![ToolContent::text(r#"{"abortRun": true}"#)]);
        let keep = ToolResult::success(vec![ToolContent::text(r#"{"abortRun": false}"#)]);
        let plain = ToolResult::success(vec![ToolContent::text("abortRun")]);
        assert!(requests_abort(&abort));
        assert!(!requests_abort(&keep));
        assert!(!requests_abort(&plain));
    }

    #[test]
    fn test_idle_scenario_session_ends_quietly() {
        let mut session = SessionStateMachine::new();
        assert_eq!(end_scenario_session(&mut session), Ok(None));
        assert_eq!(session.state(), SessionState::Idle);

        // Started but never answered: nothing to persist
        session
            .start(ModelRef::new("test", "a"), Vec::new(), Vec::new(), None)
            .unwrap();
        assert_eq!(end_scenario_session(&mut session), Ok(None));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_firing_entry_carries_provenance() {
        let firing = HookFiring {
            label: "audit".into(),
            index: 2,
            timing: HookTiming::Before,
            trigger_tool: "write".into(),
            invoked_tool: "log".into(),
            args: serde_json::json!({"n": 1}),
            started_at: Utc::now(),
            duration_ms: 4,
            success: true,
            error: None,
            result_preview: Some("ok".into()),
        };
        let entry = firing_entry(3, firing);
        assert_eq!(entry.command_index, 3);
        assert_eq!(entry.tool, "log");
        let hook = entry.hook.unwrap();
        assert_eq!(hook.hook, "audit");
        assert_eq!(hook.trigger_tool, "write");
    }
}
