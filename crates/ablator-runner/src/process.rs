use std::collections::HashSet;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncWriteExt;

use crate::command_spec::CommandSpec;
use crate::error::RunnerError;

/// Default wait between SIGTERM and SIGKILL when tearing down process groups
pub const DEFAULT_TERMINATION_GRACE: Duration = Duration::from_secs(2);

/// Output from a process execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Exit code (None if terminated by signal)
    pub exit_code: Option<i32>,
}

impl ProcessOutput {
    #[must_use]
    pub fn new(stdout: Vec<u8>, stderr: Vec<u8>, exit_code: Option<i32>) -> Self {
        Self {
            stdout,
            stderr,
            exit_code,
        }
    }

    #[must_use]
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    #[must_use]
    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs commands and remembers which process groups are still alive so they
/// can all be terminated at once.
///
/// Clones share the same set of in-flight processes.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    in_flight: Arc<Mutex<HashSet<u32>>>,
    grace: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(DEFAULT_TERMINATION_GRACE)
    }
}

/// Removes a pid from the in-flight set when the run finishes or is dropped.
struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<u32>>>,
    pid: Option<u32>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Some(pid) = self.pid
            && let Ok(mut set) = self.in_flight.lock()
        {
            set.remove(&pid);
        }
    }
}

impl ProcessRunner {
    #[must_use]
    pub fn new(grace: Duration) -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            grace,
        }
    }

    /// Number of processes currently running through this runner.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().map(|set| set.len()).unwrap_or(0)
    }

    /// Run `spec`, feeding `stdin` to the child, with a hard `timeout`.
    ///
    /// A non-zero exit is not an error; callers inspect [`ProcessOutput`].
    /// On timeout the child's process group is terminated.
    pub async fn run(
        &self,
        spec: &CommandSpec,
        stdin: Option<Vec<u8>>,
        timeout: Duration,
    ) -> Result<ProcessOutput, RunnerError> {
        let mut cmd = spec.to_tokio_command();
        cmd.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        #[cfg(unix)]
        crate::unix::isolate_process_group(&mut cmd);

        let mut child = cmd.spawn().map_err(|e| RunnerError::SpawnFailed {
            program: spec.display_program(),
            reason: e.to_string(),
        })?;

        let pid = child.id();
        let _guard = InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            pid,
        };
        if let Some(pid) = pid
            && let Ok(mut set) = self.in_flight.lock()
        {
            set.insert(pid);
        }
        tracing::debug!(program = %spec.display_program(), pid, "Spawned process");

        if let (Some(bytes), Some(mut child_stdin)) = (stdin, child.stdin.take()) {
            // Write concurrently so a child that does not drain stdin cannot deadlock us
            tokio::spawn(async move {
                let _ = child_stdin.write_all(&bytes).await;
                let _ = child_stdin.shutdown().await;
            });
        }

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(ProcessOutput::new(
                output.stdout,
                output.stderr,
                output.status.code(),
            )),
            Ok(Err(e)) => Err(RunnerError::Io {
                reason: e.to_string(),
            }),
            Err(_) => {
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(
                    program = %spec.display_program(),
                    timeout_ms,
                    "Process timed out; terminating process group"
                );
                if let Some(pid) = pid {
                    self.terminate(&[pid]).await;
                }
                Err(RunnerError::Timeout { timeout_ms })
            }
        }
    }

    /// Terminate every process group still running through this runner.
    ///
    /// Returns how many groups were signalled.
    pub async fn terminate_all(&self) -> usize {
        let pids: Vec<u32> = self
            .in_flight
            .lock()
            .map(|mut set| set.drain().collect())
            .unwrap_or_default();
        if !pids.is_empty() {
            tracing::info!(count = pids.len(), "Terminating in-flight tool processes");
        }
        self.terminate(&pids).await;
        pids.len()
    }

    #[cfg(unix)]
    async fn terminate(&self, pids: &[u32]) {
        crate::unix::terminate_process_groups(pids, self.grace).await;
    }

    #[cfg(not(unix))]
    async fn terminate(&self, _pids: &[u32]) {}
}
