//! Logging and observability infrastructure for ablator
//!
//! Structured logging through `tracing`, with span helpers that tag every
//! event emitted while a scenario runs with its ablation, phase, model and
//! iteration.

use std::io::IsTerminal;
use std::time::Duration;
use tracing::{Level, error, info, span};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Check if colored output should be used.
///
/// Returns true only if stderr is a terminal and `NO_COLOR` is not set.
fn use_color() -> bool {
    std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` takes precedence; otherwise verbose mode enables debug output
/// for ablator crates. Logs go to stderr so progress output on stdout stays
/// machine readable.
pub fn init_tracing(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("ablator=debug,ablator_gate=debug,ablator_orchestrator=debug,info")
            } else {
                EnvFilter::try_new("warn,ablator=info,ablator_orchestrator=info")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(use_color())
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_line_number(false)
        .with_file(false);

    if verbose {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                layer
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.with_target(false).compact())
            .try_init()?;
    }

    Ok(())
}

/// Create a span for one scenario (phase x model x iteration).
pub fn scenario_span(
    ablation: &str,
    phase: &str,
    model: Option<&str>,
    iteration: Option<u32>,
) -> tracing::Span {
    span!(
        Level::INFO,
        "scenario",
        ablation = %ablation,
        phase = %phase,
        model = model.unwrap_or("dry-run"),
        iteration = iteration.unwrap_or(1),
    )
}

/// Log scenario start with structured fields
pub fn log_scenario_start(phase: &str, model: Option<&str>, commands: usize) {
    info!(
        phase = %phase,
        model = model.unwrap_or("dry-run"),
        commands,
        "Starting scenario"
    );
}

/// Log scenario completion with duration and status
pub fn log_scenario_complete(phase: &str, status: &str, duration_ms: u64) {
    info!(
        phase = %phase,
        status = %status,
        duration_ms,
        "Scenario finished"
    );
}

/// Log a scenario-level error
pub fn log_scenario_error(phase: &str, error: &str, duration_ms: u64) {
    error!(
        phase = %phase,
        duration_ms,
        error = %error,
        "Scenario failed"
    );
}

/// Milliseconds for log fields and reports, saturating instead of truncating.
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
