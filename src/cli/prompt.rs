//! Force-stop confirmation on the terminal.

use async_trait::async_trait;
use std::io::{BufRead, Write};
use tokio::sync::{Mutex, mpsc};

use ablator_gate::ForceStopPrompter;

/// Asks on stderr and reads the answer from stdin.
///
/// Stdin is read by one long-lived thread that feeds a channel, started on
/// the first prompt. A prompt that is dropped before it is answered leaves
/// the reader in place, so the next line goes to the next prompt instead of
/// an orphaned read.
#[derive(Debug, Default)]
pub struct TerminalPrompter {
    answers: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

/// Only an explicit yes confirms.
pub(crate) fn is_confirmation(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    let spawned = std::thread::Builder::new()
        .name("ablator-stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Stopped reading stdin");
                        break;
                    }
                }
            }
        });
    if let Err(e) = spawned {
        // The sender went with the closure, so every prompt sees a closed channel
        tracing::warn!(error = %e, "Could not start stdin reader");
    }
    rx
}

impl TerminalPrompter {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn with_lines(lines: mpsc::UnboundedReceiver<String>) -> Self {
        Self {
            answers: Mutex::new(Some(lines)),
        }
    }

    /// Next line typed after the question, or `None` once stdin is closed.
    async fn next_answer(&self, question: &str) -> Option<String> {
        let mut answers = self.answers.lock().await;
        let lines = answers.get_or_insert_with(spawn_stdin_reader);

        // Lines typed while no question was showing do not answer this one
        while lines.try_recv().is_ok() {}

        {
            let mut stderr = std::io::stderr().lock();
            if let Err(e) = write!(stderr, "{question}").and_then(|()| stderr.flush()) {
                tracing::warn!(error = %e, "Could not show force stop prompt");
            }
        }

        lines.recv().await
    }
}

#[async_trait]
impl ForceStopPrompter for TerminalPrompter {
    async fn confirm_force_stop(&self, tool: &str, server: &str) -> bool {
        let question = format!("Force stop {tool}? [y/N] ");
        match self.next_answer(&question).await {
            Some(line) => {
                let confirmed = is_confirmation(&line);
                tracing::info!(tool, server, confirmed, "Force stop answered");
                confirmed
            }
            None => {
                tracing::warn!(tool, "Stdin closed; continuing to wait");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_confirmation_answers() {
        assert!(is_confirmation("y\n"));
        assert!(is_confirmation(" YES "));
        assert!(!is_confirmation("\n"));
        assert!(!is_confirmation("n"));
        assert!(!is_confirmation("yep"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_prompt_leaves_next_line_for_next_prompt() {
        let (tx, rx) = mpsc::unbounded_channel();
        let prompter = TerminalPrompter::with_lines(rx);

        // The call finishes before anyone answers
        let unanswered = tokio::time::timeout(
            Duration::from_secs(1),
            prompter.confirm_force_stop("slow", "local"),
        )
        .await;
        assert!(unanswered.is_err());

        let next = prompter.confirm_force_stop("stuck", "local");
        tokio::pin!(next);
        assert!(
            tokio::time::timeout(Duration::from_millis(10), &mut next)
                .await
                .is_err()
        );
        tx.send("y".to_string()).unwrap();
        assert!(next.await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lines_typed_before_the_question_are_ignored() {
        let (tx, rx) = mpsc::unbounded_channel();
        let prompter = TerminalPrompter::with_lines(rx);

        tx.send("y".to_string()).unwrap();
        let answer = prompter.confirm_force_stop("stuck", "local");
        tokio::pin!(answer);
        assert!(
            tokio::time::timeout(Duration::from_millis(10), &mut answer)
                .await
                .is_err()
        );
        tx.send("n".to_string()).unwrap();
        assert!(!answer.await);
    }

    #[tokio::test]
    async fn test_closed_stdin_declines() {
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        drop(tx);
        let prompter = TerminalPrompter::with_lines(rx);
        assert!(!prompter.confirm_force_stop("stuck", "local").await);
    }
}
