//! Data model shared by every ablator crate.
//!
//! These types are persisted as JSON with camelCase keys. Struct field order
//! is the persisted key order, so do not reorder fields casually.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use strum::{AsRefStr, Display, EnumString};

use crate::paths::slugify;

fn is_false(value: &bool) -> bool {
    !*value
}

const fn default_true() -> bool {
    true
}

const fn default_max_iterations() -> u32 {
    20
}

/// A saved experiment: phases of commands run against one or more models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AblationDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub models: Vec<ModelRef>,
    /// Skip model switching and execute tool directives directly
    #[serde(default, skip_serializing_if = "is_false")]
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runs: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<ArgumentDefinition>,
    #[serde(default)]
    pub settings: AblationSettings,
    pub phases: Vec<Phase>,
    /// Top-level hooks, applied to every phase before phase-local hooks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<Hook>,
}

impl AblationDefinition {
    /// Create an empty definition stamped with the current time.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            created: Utc::now(),
            updated: None,
            models: Vec::new(),
            dry_run: false,
            runs: None,
            arguments: Vec::new(),
            settings: AblationSettings::default(),
            phases: Vec::new(),
            hooks: Vec::new(),
        }
    }

    /// Repeat count, defaulting to 1.
    #[must_use]
    pub fn runs(&self) -> u32 {
        self.runs.unwrap_or(1)
    }

    /// Number of model passes per iteration; dry runs use one synthetic pass.
    #[must_use]
    pub fn model_passes(&self) -> usize {
        if self.dry_run { 1 } else { self.models.len() }
    }

    /// Number of whole-definition repetitions times model passes.
    #[must_use]
    pub fn total_runs(&self) -> usize {
        self.model_passes() * self.runs() as usize
    }

    /// Number of (phase, model, iteration) scenarios a complete run produces.
    #[must_use]
    pub fn total_scenarios(&self) -> usize {
        self.phases.len() * self.total_runs()
    }
}

/// Run-wide settings of an ablation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AblationSettings {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_config_path: Option<String>,
    /// Carry one conversation across all phases of a model/iteration
    #[serde(default, skip_serializing_if = "is_false")]
    pub keep_context: bool,
}

impl Default for AblationSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            mcp_config_path: None,
            keep_context: false,
        }
    }
}

/// A provider/model pair an ablation runs against
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRef {
    pub provider: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl ModelRef {
    #[must_use]
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            label: None,
        }
    }

    /// Human-facing name: the label, or `provider/model`.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| format!("{}/{}", self.provider, self.model))
    }

    /// Directory-safe identifier derived from provider and model.
    #[must_use]
    pub fn slug(&self) -> String {
        slugify(&format!("{}-{}", self.provider, self.model))
    }
}

/// Kind of value an argument placeholder accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ArgumentType {
    #[default]
    String,
    /// A path to a file that must exist when the run starts
    Attachment,
}

/// A named `{{placeholder}}` the user fills in when starting a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArgumentDefinition {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: ArgumentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// One named stage of an ablation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phase {
    pub name: String,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_start: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_end: Vec<String>,
    /// Phase-local hooks, evaluated after the top-level hooks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<Hook>,
}

impl Phase {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            commands: Vec::new(),
            on_start: Vec::new(),
            on_end: Vec::new(),
            hooks: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_commands<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.commands.extend(commands.into_iter().map(Into::into));
        self
    }
}

/// When a hook fires relative to its triggering tool call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HookTiming {
    Before,
    After,
}

/// A user-defined trigger that runs a tool directive before or after a matched tool call.
///
/// Exactly one of `before`/`after` must be set. `whenInput`/`whenOutput` are
/// partial-object submatches. The legacy single `when` key is not accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Hook {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when_input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when_output: Option<Value>,
    pub run: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Hook {
    /// Hook that runs `run` before `tool`.
    #[must_use]
    pub fn before(tool: impl Into<String>, run: impl Into<String>) -> Self {
        Self {
            label: None,
            before: Some(tool.into()),
            after: None,
            when_input: None,
            when_output: None,
            run: run.into(),
            enabled: true,
        }
    }

    /// Hook that runs `run` after `tool`.
    #[must_use]
    pub fn after(tool: impl Into<String>, run: impl Into<String>) -> Self {
        Self {
            after: Some(tool.into()),
            before: None,
            ..Self::before("", run)
        }
    }

    /// Timing and target tool, or None when the hook is malformed.
    #[must_use]
    pub fn trigger(&self) -> Option<(HookTiming, &str)> {
        match (&self.before, &self.after) {
            (Some(tool), None) => Some((HookTiming::Before, tool.as_str())),
            (None, Some(tool)) => Some((HookTiming::After, tool.as_str())),
            _ => None,
        }
    }

    /// Label used in logs and tool-exec provenance.
    #[must_use]
    pub fn display_label(&self, index: usize) -> String {
        match (&self.label, self.trigger()) {
            (Some(label), _) => label.clone(),
            (None, Some((timing, tool))) => format!("{timing}:{tool}#{index}"),
            (None, None) => format!("hook#{index}"),
        }
    }
}

/// Lifecycle status of a scenario result
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Aborted,
}

impl RunStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Skipped | Self::Aborted
        )
    }
}

/// Outcome of one (phase, model, iteration) scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub phase: String,
    /// Model display name; absent for dry runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// 1-based iteration; absent when the ablation runs once
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,
    pub status: RunStatus,
    pub duration_ms: u64,
    pub tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_log_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub outputs_captured: usize,
}

impl RunResult {
    #[must_use]
    pub fn new(
        phase: impl Into<String>,
        model: Option<String>,
        iteration: Option<u32>,
        status: RunStatus,
    ) -> Self {
        Self {
            phase: phase.into(),
            model,
            iteration,
            status,
            duration_ms: 0,
            tokens: 0,
            chat_ref: None,
            tool_log_ref: None,
            error: None,
            outputs_captured: 0,
        }
    }

    /// The (phase, model, iteration) identity of this result.
    #[must_use]
    pub fn key(&self) -> (&str, Option<&str>, Option<u32>) {
        (self.phase.as_str(), self.model.as_deref(), self.iteration)
    }
}

/// Overall status of an ablation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AblationRunStatus {
    Running,
    Completed,
    Failed,
    Aborted,
}

/// One execution of an ablation definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AblationRun {
    pub id: String,
    pub ablation: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: AblationRunStatus,
    #[serde(default, skip_serializing_if = "is_false")]
    pub dry_run: bool,
    pub total_scenarios: usize,
    #[serde(default)]
    pub arguments: BTreeMap<String, String>,
    #[serde(default)]
    pub results: Vec<RunResult>,
    pub total_tokens: u64,
    pub total_duration_ms: u64,
}

impl AblationRun {
    /// Start a new run record for `definition`.
    #[must_use]
    pub fn start(definition: &AblationDefinition, arguments: BTreeMap<String, String>) -> Self {
        let started_at = Utc::now();
        Self {
            id: started_at.format("%Y%m%d-%H%M%S-%3f").to_string(),
            ablation: definition.name.clone(),
            started_at,
            completed_at: None,
            status: AblationRunStatus::Running,
            dry_run: definition.dry_run,
            total_scenarios: definition.total_scenarios(),
            arguments,
            results: Vec::new(),
            total_tokens: 0,
            total_duration_ms: 0,
        }
    }

    /// Insert or replace the result for its (phase, model, iteration) triple.
    ///
    /// Keeps the one-result-per-triple invariant even if a scenario is
    /// recorded twice (e.g. `running` then `completed`).
    pub fn record(&mut self, result: RunResult) {
        match self.results.iter_mut().find(|r| r.key() == result.key()) {
            Some(existing) => *existing = result,
            None => self.results.push(result),
        }
        self.recompute_totals();
    }

    pub fn recompute_totals(&mut self) {
        self.total_tokens = self.results.iter().map(|r| r.tokens).sum();
        self.total_duration_ms = self.results.iter().map(|r| r.duration_ms).sum();
    }

    /// Number of results with the given status.
    #[must_use]
    pub fn count(&self, status: RunStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }
}

/// Where a tool invocation in a dry-run log came from when a hook caused it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookProvenance {
    pub hook: String,
    pub timing: HookTiming,
    pub trigger_tool: String,
}

/// One tool invocation recorded during a dry-run scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecLogEntry {
    pub command_index: usize,
    pub tool: String,
    pub args: Value,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook: Option<HookProvenance>,
}

/// Tool invocations of one dry-run scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecLog {
    pub ablation: String,
    pub phase: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,
    pub entries: Vec<ToolExecLogEntry>,
}
