//! Markdown renderings of run summaries and dry-run tool logs.

use anyhow::Result;
use camino::Utf8Path;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use ablator_utils::atomic_write::{write_bytes_atomic, write_file_atomic, write_json_atomic};
use ablator_utils::types::{AblationRun, RunStatus, ToolExecLog};

pub const TOOL_EXEC_JSON: &str = "tool-exec.json";
pub const TOOL_EXEC_MD: &str = "tool-exec.md";

/// Atomically write markdown, preferring the UTF-8 path writer.
pub fn write_markdown(path: &Path, content: &str) -> Result<()> {
    match Utf8Path::from_path(path) {
        Some(utf8) => write_file_atomic(utf8, content)?,
        None => write_bytes_atomic(path, content.as_bytes())?,
    };
    Ok(())
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{ms} ms")
    } else {
        format!("{:.1} s", ms as f64 / 1000.0)
    }
}

/// Human summary of a run: header, status counts and one row per scenario.
#[must_use]
pub fn render_run_markdown(run: &AblationRun) -> String {
    let mut md = String::new();
    let _ = writeln!(md, "# {} run {}", run.ablation, run.id);
    let _ = writeln!(md);
    let _ = writeln!(md, "- Status: {}", run.status);
    let _ = writeln!(md, "- Started: {}", run.started_at.to_rfc3339());
    if let Some(completed) = run.completed_at {
        let _ = writeln!(md, "- Completed: {}", completed.to_rfc3339());
    }
    if run.dry_run {
        let _ = writeln!(md, "- Mode: dry run");
    }
    let _ = writeln!(
        md,
        "- Scenarios: {}/{} recorded ({} completed, {} failed, {} skipped, {} aborted)",
        run.results.len(),
        run.total_scenarios,
        run.count(RunStatus::Completed),
        run.count(RunStatus::Failed),
        run.count(RunStatus::Skipped),
        run.count(RunStatus::Aborted),
    );
    let _ = writeln!(md, "- Tokens: {}", run.total_tokens);
    let _ = writeln!(md, "- Duration: {}", format_duration(run.total_duration_ms));

    if !run.arguments.is_empty() {
        let _ = writeln!(md, "\n## Arguments\n");
        for (name, value) in &run.arguments {
            let _ = writeln!(md, "- `{name}` = `{value}`");
        }
    }

    let _ = writeln!(md, "\n## Results\n");
    let _ = writeln!(
        md,
        "| Phase | Model | Iteration | Status | Duration | Tokens | Outputs | Error |"
    );
    let _ = writeln!(md, "|---|---|---|---|---|---|---|---|");
    for result in &run.results {
        let _ = writeln!(
            md,
            "| {} | {} | {} | {} | {} | {} | {} | {} |",
            escape_cell(&result.phase),
            escape_cell(result.model.as_deref().unwrap_or("-")),
            result.iteration.map_or_else(|| "-".to_string(), |i| i.to_string()),
            result.status,
            format_duration(result.duration_ms),
            result.tokens,
            result.outputs_captured,
            escape_cell(result.error.as_deref().unwrap_or("")),
        );
    }
    md
}

/// Tool log table for one dry-run scenario, hook invocations marked.
#[must_use]
pub fn render_tool_exec_markdown(log: &ToolExecLog) -> String {
    let mut md = String::new();
    let _ = write!(md, "# Tool executions: {} / {}", log.ablation, log.phase);
    if let Some(iteration) = log.iteration {
        let _ = write!(md, " (run {iteration})");
    }
    let _ = writeln!(md, "\n");

    if log.entries.is_empty() {
        let _ = writeln!(md, "_No tool calls._");
        return md;
    }

    let _ = writeln!(md, "| # | Tool | Source | Duration | Result |");
    let _ = writeln!(md, "|---|---|---|---|---|");
    for entry in &log.entries {
        let source = entry.hook.as_ref().map_or_else(
            || "command".to_string(),
            |hook| format!("{} hook `{}` on {}", hook.timing, hook.hook, hook.trigger_tool),
        );
        let outcome = if entry.success {
            entry.result_preview.clone().unwrap_or_default()
        } else {
            format!("**error:** {}", entry.error.as_deref().unwrap_or("unknown"))
        };
        let _ = writeln!(
            md,
            "| {} | `{}` | {} | {} | {} |",
            entry.command_index,
            entry.tool,
            escape_cell(&source),
            format_duration(entry.duration_ms),
            escape_cell(&outcome),
        );
    }
    md
}

/// Write `tool-exec.json` and `tool-exec.md` into `scenario_dir`.
pub fn write_tool_exec_log(scenario_dir: &Path, log: &ToolExecLog) -> Result<PathBuf> {
    let json_path = scenario_dir.join(TOOL_EXEC_JSON);
    write_json_atomic(&json_path, log)?;
    write_markdown(&scenario_dir.join(TOOL_EXEC_MD), &render_tool_exec_markdown(log))?;
    Ok(json_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ablator_utils::types::{
        AblationDefinition, HookProvenance, HookTiming, Phase, RunResult, ToolExecLogEntry,
    };
    use chrono::Utc;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn entry(index: usize, tool: &str, hook: Option<HookProvenance>) -> ToolExecLogEntry {
        ToolExecLogEntry {
            command_index: index,
            tool: tool.to_string(),
            args: json!({}),
            started_at: Utc::now(),
            duration_ms: 12,
            success: hook.is_none(),
            error: hook.as_ref().map(|_| "boom".to_string()),
            result_preview: Some("ok|done".to_string()),
            hook,
        }
    }

    #[test]
    fn test_run_markdown_lists_results() {
        let mut def = AblationDefinition::new("demo");
        def.dry_run = true;
        def.phases = vec![Phase::new("p1"), Phase::new("p2")];
        let mut args = BTreeMap::new();
        args.insert("topic".to_string(), "rust".to_string());
        let mut run = AblationRun::start(&def, args);
        run.record(RunResult::new("p1", None, None, RunStatus::Completed));
        let mut failed = RunResult::new("p2", None, None, RunStatus::Failed);
        failed.error = Some("tool a|b failed".into());
        run.record(failed);

        let md = render_run_markdown(&run);
        assert!(md.contains("2/2 recorded (1 completed, 1 failed"));
        assert!(md.contains("`topic` = `rust`"));
        assert!(md.contains("| p2 | - | - | failed |"));
        assert!(md.contains("tool a\\|b failed"));
    }

    #[test]
    fn test_tool_exec_markdown_marks_hooks() {
        let log = ToolExecLog {
            ablation: "demo".into(),
            phase: "p1".into(),
            iteration: Some(2),
            entries: vec![
                entry(0, "search", None),
                entry(
                    0,
                    "notify",
                    Some(HookProvenance {
                        hook: "after:search#0".into(),
                        timing: HookTiming::After,
                        trigger_tool: "search".into(),
                    }),
                ),
            ],
        };
        let md = render_tool_exec_markdown(&log);
        assert!(md.starts_with("# Tool executions: demo / p1 (run 2)"));
        assert!(md.contains("| 0 | `search` | command | 12 ms | ok\\|done |"));
        assert!(md.contains("after hook `after:search#0` on search"));
        assert!(md.contains("**error:** boom"));
    }

    #[test]
    fn test_write_tool_exec_log() {
        let temp = tempfile::TempDir::new().unwrap();
        let log = ToolExecLog {
            ablation: "demo".into(),
            phase: "p".into(),
            iteration: None,
            entries: Vec::new(),
        };
        let path = write_tool_exec_log(temp.path(), &log).unwrap();
        let parsed: ToolExecLog =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(parsed, log);
        assert!(
            std::fs::read_to_string(temp.path().join(TOOL_EXEC_MD))
                .unwrap()
                .contains("_No tool calls._")
        );
    }
}
