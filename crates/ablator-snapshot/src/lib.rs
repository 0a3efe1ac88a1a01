//! Outputs directory isolation for ablation runs.
//!
//! Tools write artifacts into one shared outputs directory. For the duration
//! of a run the user's existing outputs are moved aside ([`OutputSnapshotStore::stash`]),
//! every scenario starts from an empty directory and its artifacts are moved
//! into the scenario directory ([`OutputSnapshotStore::capture`]). At the end
//! the original contents are put back ([`OutputSnapshotStore::unstash`]).

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use ablator_utils::error::SnapshotError;
use ablator_utils::paths::{ensure_dir_all, scenario_dir};

/// Directory under the run directory holding the user's outputs during a run
pub const STASH_DIR: &str = ".outputs-stash";

/// Directory under a scenario directory receiving captured artifacts
pub const CAPTURE_DIR: &str = "outputs";

#[derive(Debug, Clone)]
pub struct OutputSnapshotStore {
    outputs_dir: PathBuf,
}

impl OutputSnapshotStore {
    #[must_use]
    pub fn new(outputs_dir: impl Into<PathBuf>) -> Self {
        Self {
            outputs_dir: outputs_dir.into(),
        }
    }

    #[must_use]
    pub fn outputs_dir(&self) -> &Path {
        &self.outputs_dir
    }

    #[must_use]
    pub fn stash_dir(run_dir: &Path) -> PathBuf {
        run_dir.join(STASH_DIR)
    }

    /// Move the current outputs into `run_dir/.outputs-stash/`, leaving the
    /// outputs directory empty. Returns the number of files stashed.
    pub fn stash(&self, run_dir: &Path) -> Result<usize, SnapshotError> {
        let stash = Self::stash_dir(run_dir);
        if stash.exists() {
            return Err(SnapshotError::AlreadyStashed {
                path: stash.display().to_string(),
            });
        }
        ensure_dir_all(&self.outputs_dir).map_err(|e| SnapshotError::io(&self.outputs_dir, e))?;
        ensure_dir_all(&stash).map_err(|e| SnapshotError::io(&stash, e))?;

        if let Err(e) = move_children(&self.outputs_dir, &stash) {
            // Put back whatever was already moved so the outputs stay whole
            match move_children(&stash, &self.outputs_dir) {
                Ok(()) => {
                    let _ = fs::remove_dir(&stash);
                }
                Err(restore) => tracing::error!(
                    stash = %stash.display(),
                    error = %restore,
                    "Failed to roll back partial stash; files remain in the stash directory"
                ),
            }
            return Err(e);
        }
        let files = count_files(&stash);
        tracing::info!(files, stash = %stash.display(), "Stashed existing outputs");
        Ok(files)
    }

    /// Remove everything inside the outputs directory.
    pub fn clear(&self) -> Result<(), SnapshotError> {
        let entries = match fs::read_dir(&self.outputs_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return ensure_dir_all(&self.outputs_dir)
                    .map_err(|e| SnapshotError::io(&self.outputs_dir, e));
            }
            Err(e) => return Err(SnapshotError::io(&self.outputs_dir, e)),
        };
        for entry in entries {
            let path = entry.map_err(|e| SnapshotError::io(&self.outputs_dir, e))?.path();
            remove_path(&path).map_err(|e| SnapshotError::io(&path, e))?;
        }
        Ok(())
    }

    /// Move everything the scenario produced into its `outputs/` directory.
    ///
    /// The outputs directory is empty afterwards. Returns the number of files
    /// captured.
    pub fn capture(
        &self,
        run_dir: &Path,
        phase: &str,
        model_slug: Option<&str>,
        iteration: Option<u32>,
    ) -> Result<usize, SnapshotError> {
        let dest = scenario_dir(run_dir, model_slug, phase, iteration).join(CAPTURE_DIR);
        if !self.outputs_dir.exists() {
            return Ok(0);
        }
        ensure_dir_all(&dest).map_err(|e| SnapshotError::io(&dest, e))?;
        move_children(&self.outputs_dir, &dest)?;
        let files = count_files(&dest);
        tracing::debug!(files, dest = %dest.display(), phase, "Captured scenario outputs");
        Ok(files)
    }

    /// Clear the outputs directory, restore the stash and remove it.
    ///
    /// Without a stash for `run_dir` nothing is touched: the outputs directory
    /// then holds the user's own files. Returns the number of files restored.
    pub fn unstash(&self, run_dir: &Path) -> Result<usize, SnapshotError> {
        let stash = Self::stash_dir(run_dir);
        if !stash.exists() {
            tracing::debug!(stash = %stash.display(), "Nothing stashed; leaving outputs in place");
            return Ok(0);
        }
        self.clear()?;
        let files = count_files(&stash);
        move_children(&stash, &self.outputs_dir)?;
        fs::remove_dir(&stash).map_err(|e| SnapshotError::io(&stash, e))?;
        prune_empty_dirs(run_dir);
        tracing::info!(files, outputs = %self.outputs_dir.display(), "Restored stashed outputs");
        Ok(files)
    }
}

fn count_files(root: &Path) -> usize {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .count()
}

fn move_children(from: &Path, to: &Path) -> Result<(), SnapshotError> {
    let entries = fs::read_dir(from).map_err(|e| SnapshotError::io(from, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| SnapshotError::io(from, e))?;
        let src = entry.path();
        let dst = to.join(entry.file_name());
        move_path(&src, &dst).map_err(|e| SnapshotError::io(&src, e))?;
    }
    Ok(())
}

#[cfg(unix)]
fn is_cross_filesystem_error(err: &io::Error) -> bool {
    err.raw_os_error() == Some(18) // EXDEV
}

#[cfg(windows)]
fn is_cross_filesystem_error(err: &io::Error) -> bool {
    err.raw_os_error() == Some(17) // ERROR_NOT_SAME_DEVICE
}

/// Rename, falling back to copy + remove across filesystems.
fn move_path(src: &Path, dst: &Path) -> io::Result<()> {
    if dst.exists() {
        remove_path(dst)?;
    }
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_filesystem_error(&e) => {
            tracing::debug!(src = %src.display(), dst = %dst.display(), "Rename crossed filesystems; copying");
            copy_path(src, dst)?;
            remove_path(src)
        }
        Err(e) => Err(e),
    }
}

fn copy_path(src: &Path, dst: &Path) -> io::Result<()> {
    if !fs::symlink_metadata(src)?.is_dir() {
        fs::copy(src, dst)?;
        return Ok(());
    }
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry.path().strip_prefix(src).map_err(io::Error::other)?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn remove_path(path: &Path) -> io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Remove empty directories below `root`, deepest first. Best effort.
fn prune_empty_dirs(root: &Path) {
    let dirs: Vec<PathBuf> = WalkDir::new(root)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir())
        .map(walkdir::DirEntry::into_path)
        .collect();
    for dir in dirs {
        // Fails harmlessly on non-empty directories
        let _ = fs::remove_dir(&dir);
    }
}
