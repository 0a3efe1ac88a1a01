//! Path helpers: filesystem-safe names, the ablator home directory and the
//! per-scenario directory layout.

use std::cell::RefCell;
use std::path::{Path, PathBuf};

use crate::error::DefinitionError;

/// Environment variable overriding the ablator home directory
pub const HOME_ENV: &str = "ABLATOR_HOME";

/// Directory name used under a project root or the user's home
pub const STATE_DIR_NAME: &str = ".ablator";

// Thread-local override used only in tests to avoid process-global env races.
thread_local! {
    static THREAD_HOME: RefCell<Option<PathBuf>> = const { RefCell::new(None) };
}

/// Resolve the ablator home directory.
///
/// Precedence: thread-local test override, `ABLATOR_HOME`, `~/.ablator`,
/// then `./.ablator` when no home directory can be determined.
#[must_use]
pub fn ablator_home() -> PathBuf {
    if let Some(home) = THREAD_HOME.with(|h| h.borrow().clone()) {
        return home;
    }
    if let Some(home) = std::env::var_os(HOME_ENV) {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .map(|home| home.join(STATE_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(STATE_DIR_NAME))
}

/// Guard returned by [`with_isolated_home`]; restores the previous override on drop.
pub struct HomeGuard {
    previous: Option<PathBuf>,
}

impl Drop for HomeGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        THREAD_HOME.with(|h| *h.borrow_mut() = previous);
    }
}

/// Point [`ablator_home`] at `path` for the current thread.
pub fn with_isolated_home(path: impl Into<PathBuf>) -> HomeGuard {
    let path = path.into();
    let previous = THREAD_HOME.with(|h| h.borrow_mut().replace(path));
    HomeGuard { previous }
}

/// Create a directory and all parents, tolerating concurrent creation.
pub fn ensure_dir_all(path: &Path) -> std::io::Result<()> {
    match std::fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(e) => Err(e),
    }
}

/// Replace every character outside `[A-Za-z0-9._-]` with `_` and collapse `..`.
///
/// Used for directory names derived from free text (phase names, model ids).
#[must_use]
pub fn slugify(raw: &str) -> String {
    let mut slug: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();

    while slug.contains("..") {
        slug = slug.replace("..", "__");
    }
    if slug.is_empty() || slug.chars().all(|c| c == '_' || c == '.') {
        return "_".to_string();
    }
    slug
}

/// Validate an ablation name: it becomes a directory name, so it must already
/// be filesystem safe rather than silently rewritten.
pub fn validate_name(name: &str) -> Result<(), DefinitionError> {
    let invalid = |reason: &str| DefinitionError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.trim().is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.len() > 128 {
        return Err(invalid("name is longer than 128 characters"));
    }
    if name.starts_with('.') {
        return Err(invalid("name must not start with a dot"));
    }
    if slugify(name) != name {
        return Err(invalid(
            "only ASCII letters, digits, '.', '-' and '_' are allowed",
        ));
    }
    Ok(())
}

/// Directory for one scenario inside a run directory.
///
/// Layout: `<run_dir>/<model-slug | dry-run>/<phase-slug>/[run-N/]`. The
/// `run-N` level only exists when the ablation repeats (`iteration` is Some).
#[must_use]
pub fn scenario_dir(
    run_dir: &Path,
    model_slug: Option<&str>,
    phase: &str,
    iteration: Option<u32>,
) -> PathBuf {
    let mut dir = run_dir
        .join(model_slug.unwrap_or("dry-run"))
        .join(slugify(phase));
    if let Some(iteration) = iteration {
        dir = dir.join(format!("run-{iteration}"));
    }
    dir
}
