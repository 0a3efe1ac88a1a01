//! Atomic file writes for definitions, run summaries and chat logs
//!
//! Every persisted document goes through temp file + fsync + rename so a
//! crash mid-run leaves either the previous or the new version on disk,
//! never a torn file. Incremental run persistence relies on this.

use anyhow::{Context, Result};
use camino::Utf8Path;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

/// Result of an atomic write operation
#[derive(Debug, Clone, Default)]
pub struct AtomicWriteResult {
    /// Whether cross-filesystem fallback was used
    pub used_cross_filesystem_fallback: bool,
    /// Bytes written
    pub bytes_written: usize,
}

/// Atomically write content to a file using temp file + fsync + rename.
///
/// Line endings are normalized to LF.
pub fn write_file_atomic(path: &Utf8Path, content: &str) -> Result<AtomicWriteResult> {
    let normalized = normalize_line_endings(content);
    write_bytes_atomic(path.as_std_path(), normalized.as_bytes())
}

/// Serialize `value` as pretty JSON and write it atomically.
///
/// Key order follows struct field order, which is what keeps persisted
/// ablation definitions stable across edits.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<AtomicWriteResult> {
    let mut json = serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialize JSON for {}", path.display()))?;
    json.push('\n');
    write_bytes_atomic(path, json.as_bytes())
}

/// Atomically write raw bytes.
pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<AtomicWriteResult> {
    let mut result = AtomicWriteResult {
        bytes_written: bytes.len(),
        ..AtomicWriteResult::default()
    };

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create parent directory: {}", parent.display()))?;

    let mut temp_file = NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temporary file in: {}", parent.display()))?;

    temp_file
        .write_all(bytes)
        .context("Failed to write content to temporary file")?;
    temp_file
        .as_file()
        .sync_all()
        .context("Failed to fsync temporary file")?;

    let temp_path = temp_file.path().to_path_buf();
    match temp_file.persist(path) {
        Ok(_) => {}
        Err(persist_error) if is_cross_filesystem_error(&persist_error.error) => {
            result.used_cross_filesystem_fallback = true;
            cross_filesystem_copy(&temp_path, path)?;
        }
        Err(persist_error) => {
            return Err(anyhow::anyhow!(persist_error.error))
                .with_context(|| format!("Failed to atomically write file: {}", path.display()));
        }
    }

    Ok(result)
}

fn normalize_line_endings(content: &str) -> String {
    content.replace("\r\n", "\n").replace('\r', "\n")
}

#[cfg(unix)]
fn is_cross_filesystem_error(err: &std::io::Error) -> bool {
    // EXDEV on Linux/macOS
    err.raw_os_error() == Some(18)
}

#[cfg(not(unix))]
fn is_cross_filesystem_error(_err: &std::io::Error) -> bool {
    false
}

/// copy -> fsync -> replace, used when rename crosses filesystems
fn cross_filesystem_copy(temp_path: &Path, target: &Path) -> Result<()> {
    let content =
        fs::read(temp_path).context("Failed to read temporary file for cross-filesystem copy")?;

    let target_dir = target.parent().unwrap_or_else(|| Path::new("."));
    let mut target_temp = NamedTempFile::new_in(target_dir).with_context(|| {
        format!(
            "Failed to create temp file in target directory: {}",
            target_dir.display()
        )
    })?;
    target_temp.write_all(&content)?;
    target_temp.as_file().sync_all()?;
    target_temp
        .persist(target)
        .map_err(|e| anyhow::anyhow!(e.error))
        .context("Failed to persist during cross-filesystem copy")?;

    let _ = fs::remove_file(temp_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_line_endings() {
        assert_eq!(normalize_line_endings("a\r\nb\rc\n"), "a\nb\nc\n");
    }

    #[test]
    fn test_write_file_atomic_creates_parents() {
        let temp_dir = TempDir::new().unwrap();
        let path_buf = temp_dir.path().join("nested/dir/report.md");
        let path = Utf8Path::from_path(&path_buf).unwrap();

        let result = write_file_atomic(path, "# Report\r\nbody").unwrap();
        assert!(!result.used_cross_filesystem_fallback);
        assert_eq!(fs::read_to_string(&path_buf).unwrap(), "# Report\nbody");
    }

    #[test]
    fn test_write_json_atomic_keeps_field_order() {
        #[derive(Serialize)]
        struct Doc {
            zeta: u32,
            alpha: u32,
        }

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("doc.json");
        write_json_atomic(&path, &Doc { zeta: 1, alpha: 2 }).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.find("zeta").unwrap() < text.find("alpha").unwrap());
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn test_overwrite_replaces_content() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("run.json");
        write_bytes_atomic(&path, b"first").unwrap();
        write_bytes_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
    }
}
