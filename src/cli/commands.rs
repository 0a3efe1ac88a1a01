//! Command handlers
//!
//! Each handler prints its own output and returns the exit code for a
//! completed operation. Errors are reported by the caller.

use anyhow::{Context, Result};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use ablator_config::Config;
use ablator_gate::{GateOptions, ToolCallGate, registry_from_config};
use ablator_orchestrator::{
    AblationStore, ExperimentScheduler, ProgressEvent, ProgressReceiver, parse_definition,
    progress_channel, validate_definition, validate_placeholders,
};
use ablator_session::FileChatStore;
use ablator_snapshot::OutputSnapshotStore;
use ablator_utils::exit_codes::ExitCode;
use ablator_utils::types::{AblationDefinition, AblationRun, AblationRunStatus, RunStatus};

use super::prompt::TerminalPrompter;

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{ms}ms")
    } else {
        format!("{:.1}s", ms as f64 / 1000.0)
    }
}

pub fn execute_list_command(store: &AblationStore, json: bool) -> Result<ExitCode> {
    let names = store.list()?;
    let mut definitions = Vec::with_capacity(names.len());
    for name in &names {
        match store.load(name) {
            Ok(definition) => definitions.push(definition),
            Err(e) => tracing::warn!(ablation = %name, error = %e, "Skipping unreadable ablation"),
        }
    }

    if json {
        let entries: Vec<_> = definitions
            .iter()
            .map(|def| {
                json!({
                    "name": def.name,
                    "description": def.description,
                    "phases": def.phases.len(),
                    "models": def.models.len(),
                    "dryRun": def.dry_run,
                    "scenarios": def.total_scenarios(),
                })
            })
            .collect();
        print_json(&entries)?;
        return Ok(ExitCode::SUCCESS);
    }

    if definitions.is_empty() {
        println!("No ablations in {}", store.root().display());
        return Ok(ExitCode::SUCCESS);
    }
    for def in &definitions {
        let mode = if def.dry_run { " [dry run]" } else { "" };
        println!(
            "{:<24} {} phase(s), {} model(s){mode}  {}",
            def.name,
            def.phases.len(),
            def.models.len(),
            def.description
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn print_definition(def: &AblationDefinition) {
    println!("{}", def.name);
    if !def.description.is_empty() {
        println!("  {}", def.description);
    }
    println!("  Created: {}", def.created.to_rfc3339());
    if let Some(updated) = def.updated {
        println!("  Updated: {}", updated.to_rfc3339());
    }
    if def.dry_run {
        println!("  Mode: dry run");
    } else {
        let models: Vec<String> = def.models.iter().map(|m| m.display_name()).collect();
        println!("  Models: {}", models.join(", "));
    }
    println!("  Runs: {}", def.runs());
    println!("  Scenarios: {}", def.total_scenarios());

    if !def.arguments.is_empty() {
        println!("  Arguments:");
        for arg in &def.arguments {
            let required = if arg.required { " (required)" } else { "" };
            let default = arg
                .default
                .as_ref()
                .map(|d| format!(" = {d}"))
                .unwrap_or_default();
            println!("    {} [{}]{required}{default}", arg.name, arg.kind);
        }
    }

    for (index, hook) in def.hooks.iter().enumerate() {
        println!("  Hook {}: {}", hook.display_label(index), hook.run);
    }

    let mut hook_index = def.hooks.len();
    for phase in &def.phases {
        println!("  Phase {}:", phase.name);
        for command in &phase.on_start {
            println!("    (start) {command}");
        }
        for command in &phase.commands {
            println!("    {command}");
        }
        for command in &phase.on_end {
            println!("    (end) {command}");
        }
        for hook in &phase.hooks {
            println!("    hook {}: {}", hook.display_label(hook_index), hook.run);
            hook_index += 1;
        }
    }
}

pub fn execute_show_command(store: &AblationStore, name: &str, json: bool) -> Result<ExitCode> {
    let definition = store.load(name)?;
    if json {
        print_json(&definition)?;
    } else {
        print_definition(&definition);
    }
    Ok(ExitCode::SUCCESS)
}

fn read_definition_file(path: &Path) -> Result<AblationDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read definition file {}", path.display()))?;
    Ok(parse_definition(&content)?)
}

fn report_placeholder_warnings(definition: &AblationDefinition) {
    for warning in validate_placeholders(definition) {
        println!("  warning: {warning}");
    }
}

pub fn execute_import_command(store: &AblationStore, file: &Path, force: bool) -> Result<ExitCode> {
    let definition = read_definition_file(file)?;
    validate_definition(&definition)?;
    report_placeholder_warnings(&definition);

    if force && store.exists(&definition.name) {
        store.update(&definition)?;
        println!("Replaced ablation '{}'", definition.name);
    } else {
        let path = store.create(&definition)?;
        println!("Imported ablation '{}' to {}", definition.name, path.display());
    }
    Ok(ExitCode::SUCCESS)
}

pub fn execute_validate_command(store: &AblationStore, target: &str) -> Result<ExitCode> {
    let as_path = PathBuf::from(target);
    let definition = if as_path.is_file() {
        read_definition_file(&as_path)?
    } else {
        store.load(target)?
    };
    validate_definition(&definition)?;
    println!(
        "'{}' is valid: {} scenario(s)",
        definition.name,
        definition.total_scenarios()
    );
    report_placeholder_warnings(&definition);
    Ok(ExitCode::SUCCESS)
}

pub fn execute_delete_command(store: &AblationStore, name: &str) -> Result<ExitCode> {
    store.delete(name)?;
    println!("Deleted ablation '{name}'");
    Ok(ExitCode::SUCCESS)
}

fn print_event(event: &ProgressEvent) {
    match event {
        ProgressEvent::Progress {
            phase,
            model,
            run_index,
            command_index,
            total_commands,
            message,
            ..
        } => {
            let model = model.as_deref().unwrap_or("dry-run");
            match (command_index, message) {
                (Some(index), Some(message)) => println!(
                    "  [{model} #{run_index}] {phase} {}/{total_commands}: {message}",
                    index + 1
                ),
                (Some(index), None) => {
                    println!("  [{model} #{run_index}] {phase} {}/{total_commands}", index + 1);
                }
                (None, _) => println!("▶ [{model} #{run_index}] {phase}"),
            }
        }
        ProgressEvent::Result { result } => {
            let mark = match result.status {
                RunStatus::Completed => "✓",
                RunStatus::Skipped => "-",
                _ => "✗",
            };
            let error = result
                .error
                .as_ref()
                .map(|e| format!(": {e}"))
                .unwrap_or_default();
            println!(
                "{mark} {} {} ({}, {} tokens){error}",
                result.phase,
                result.status,
                format_duration(result.duration_ms),
                result.tokens
            );
        }
        ProgressEvent::Error { phase, message, .. } => match phase {
            Some(phase) => eprintln!("✗ {phase}: {message}"),
            None => eprintln!("✗ {message}"),
        },
    }
}

fn spawn_progress_printer(mut events: ProgressReceiver) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(&event);
        }
    })
}

/// Ctrl-C raises the gate's abort flag and cancels the run.
///
/// Later presses raise the abort flag again so a stuck call keeps counting
/// down toward the force-stop prompt.
fn spawn_interrupt_handler(
    gate: &ToolCallGate,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let abort = gate.abort_signal().clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !cancel.is_cancelled() {
                eprintln!("\nInterrupted; stopping after the current command (Ctrl-C again to keep waiting)");
            }
            abort.set();
            cancel.cancel();
        }
    })
}

const fn run_exit_code(run: &AblationRun) -> ExitCode {
    match run.status {
        AblationRunStatus::Completed => ExitCode::SUCCESS,
        AblationRunStatus::Aborted => ExitCode::CANCELLED,
        AblationRunStatus::Failed | AblationRunStatus::Running => ExitCode::RUN_FAILED,
    }
}

fn print_run_summary(run: &AblationRun, store: &AblationStore) {
    println!();
    println!("Run {} {}", run.id, run.status);
    println!(
        "  {}/{} scenario(s): {} completed, {} failed, {} skipped, {} aborted",
        run.results.len(),
        run.total_scenarios,
        run.count(RunStatus::Completed),
        run.count(RunStatus::Failed),
        run.count(RunStatus::Skipped),
        run.count(RunStatus::Aborted),
    );
    println!(
        "  {} tokens, {}",
        run.total_tokens,
        format_duration(run.total_duration_ms)
    );
    println!(
        "  Summary: {}",
        store.run_dir(&run.ablation, &run.id).display()
    );
}

pub async fn execute_run_command(
    config: &Config,
    store: &AblationStore,
    name: &str,
    args: Vec<(String, String)>,
    dry_run: bool,
    json: bool,
) -> Result<ExitCode> {
    let mut definition = store.load(name)?;
    if dry_run {
        definition.dry_run = true;
    }
    let arguments: BTreeMap<String, String> = args.into_iter().collect();

    let gate = ToolCallGate::new(
        registry_from_config(config),
        Arc::new(config.clone()),
        Arc::new(TerminalPrompter::new()),
    )
    .with_options(GateOptions::from_config(config));
    tracing::debug!(
        servers = ?gate.registry().server_names(),
        tools = ?gate.registry().tool_names(),
        "Tool servers configured"
    );

    let cancel = CancellationToken::new();
    let interrupts = spawn_interrupt_handler(&gate, cancel.clone());

    let mut scheduler = ExperimentScheduler::new(
        gate,
        store.clone(),
        OutputSnapshotStore::new(config.outputs_dir()),
    )
    .with_chat_store(Arc::new(FileChatStore::new(config.chats_dir())))
    .with_cancellation(cancel);

    let printer = if json {
        None
    } else {
        let (sender, receiver) = progress_channel();
        scheduler = scheduler.with_progress(sender);
        Some(spawn_progress_printer(receiver))
    };

    let outcome = scheduler.run(&definition, &arguments).await;
    // Dropping the scheduler closes the progress channel
    drop(scheduler);
    if let Some(printer) = printer {
        let _ = printer.await;
    }
    interrupts.abort();

    let run = outcome?;
    if json {
        print_json(&run)?;
    } else {
        print_run_summary(&run, store);
    }
    Ok(run_exit_code(&run))
}

pub fn execute_runs_command(store: &AblationStore, name: &str, json: bool) -> Result<ExitCode> {
    let runs = store.list_runs(name)?;
    if json {
        print_json(&runs)?;
        return Ok(ExitCode::SUCCESS);
    }
    if runs.is_empty() {
        println!("No runs recorded for '{name}'");
        return Ok(ExitCode::SUCCESS);
    }
    for run in &runs {
        println!(
            "{:<22} {:<9} {}/{} scenario(s), {} failed, {} skipped, {} tokens, {}",
            run.id,
            run.status.to_string(),
            run.count(RunStatus::Completed),
            run.total_scenarios,
            run.count(RunStatus::Failed),
            run.count(RunStatus::Skipped),
            run.total_tokens,
            format_duration(run.total_duration_ms),
        );
    }
    Ok(ExitCode::SUCCESS)
}

pub fn execute_totals_command(store: &AblationStore, name: &str, json: bool) -> Result<ExitCode> {
    let totals = store.totals(name)?;
    if json {
        print_json(&totals)?;
        return Ok(ExitCode::SUCCESS);
    }
    println!("{name}");
    println!("  Runs: {}", totals.runs);
    println!(
        "  Scenarios: {} ({} completed, {} failed, {} skipped, {} aborted)",
        totals.scenarios, totals.completed, totals.failed, totals.skipped, totals.aborted
    );
    println!("  Tokens: {}", totals.total_tokens);
    println!("  Duration: {}", format_duration(totals.total_duration_ms));
    Ok(ExitCode::SUCCESS)
}
