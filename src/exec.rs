//! Command Executor
//!
//! Runs the external storage-management tools (lvcreate, ietadm,
//! vblade-persist, rbd, ...), captures their output, and provides the
//! idempotent-retry policy shared by all drivers. Volume commands can
//! partially fail due to timing when co-located operations race on the same
//! host; running them again after a quadratic backoff usually recovers
//! without serializing the callers.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

// =============================================================================
// Command Runner Port
// =============================================================================

/// Captured output of a finished external command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// The process-spawning seam.
///
/// `SystemRunner` is the production implementation; tests substitute a
/// scripted runner that records every command line.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Spawn the command and wait for it to finish.
    ///
    /// A non-zero exit is not an error at this layer; failing to spawn is.
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;
}

pub type CommandRunnerRef = Arc<dyn CommandRunner>;

/// Runs commands on the local host via `tokio::process`.
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .output()
            .await?;
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

// =============================================================================
// Executor
// =============================================================================

/// Configuration for the executor retry policy
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Number of times to attempt flakey shell commands
    pub max_tries: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { max_tries: 3 }
    }
}

/// Executes external commands with exit-code checking and bounded retry.
#[derive(Clone)]
pub struct Executor {
    runner: CommandRunnerRef,
    config: ExecutorConfig,
}

impl Executor {
    /// Create an executor over an arbitrary runner.
    pub fn new(runner: CommandRunnerRef, config: ExecutorConfig) -> Self {
        Self { runner, config }
    }

    /// Create an executor that spawns real processes.
    pub fn system(config: ExecutorConfig) -> Self {
        Self::new(Arc::new(SystemRunner), config)
    }

    fn render(program: &str, args: &[&str]) -> String {
        let mut line = String::from(program);
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Run a command, failing with `Error::Execution` on non-zero exit.
    pub async fn execute(&self, program: &str, args: &[&str]) -> Result<(String, String)> {
        let out = self.runner.run(program, args).await?;
        if out.exit_code != 0 {
            return Err(Error::Execution {
                command: Self::render(program, args),
                exit_code: out.exit_code,
                stdout: out.stdout,
                stderr: out.stderr,
            });
        }
        debug!(command = %Self::render(program, args), "command succeeded");
        Ok((out.stdout, out.stderr))
    }

    /// Run a command without inspecting the exit code.
    ///
    /// For tools whose per-target commands spuriously fail while concurrent
    /// setups are in flight on the same host.
    pub async fn execute_unchecked(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        self.runner.run(program, args).await
    }

    /// Run an idempotent command, retrying transient failures.
    ///
    /// Retries `Error::Execution` up to `max_tries` total attempts with a
    /// backoff of `tries * tries` seconds between them, then propagates the
    /// last error. Only idempotent commands belong here; destructive
    /// non-idempotent commands go through `execute` directly.
    pub async fn try_execute(&self, program: &str, args: &[&str]) -> Result<(String, String)> {
        let mut tries = 0;
        loop {
            match self.execute(program, args).await {
                Ok(out) => return Ok(out),
                Err(err @ Error::Execution { .. }) => {
                    tries += 1;
                    if tries >= self.config.max_tries {
                        return Err(err);
                    }
                    warn!(
                        command = program,
                        tries, "recovering from a failed execute"
                    );
                    tokio::time::sleep(Duration::from_secs(u64::from(tries * tries))).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

// =============================================================================
// Test Support
// =============================================================================


#[cfg(test)]
mod tests {
    use super::testing::{executor, RecordingRunner};
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_execute_captures_failure_context() {
        let runner = RecordingRunner::new();
        runner.fail("lvcreate", 5, "insufficient free space");
        let exec = executor(runner.clone());

        let err = exec
            .execute("sudo", &["lvcreate", "-L", "2G", "-n", "vol-1", "vg"])
            .await
            .unwrap_err();
        assert_matches!(
            err,
            Error::Execution {
                exit_code: 5,
                ref stderr,
                ..
            } if stderr.contains("insufficient")
        );
    }

    #[tokio::test]
    async fn test_execute_unchecked_ignores_exit_code() {
        let runner = RecordingRunner::new();
        runner.fail("aoe-stat", 1, "down");
        let exec = executor(runner.clone());

        let out = exec.execute_unchecked("sudo", &["aoe-stat"]).await.unwrap();
        assert_eq!(out.exit_code, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_execute_recovers_after_two_failures() {
        let runner = RecordingRunner::new();
        runner.push_fail(1, "device busy");
        runner.push_fail(1, "device busy");
        runner.push_ok("done");
        let exec = executor(runner.clone());

        let (stdout, _stderr) = exec
            .try_execute("sudo", &["vblade-persist", "setup", "0", "0"])
            .await
            .unwrap();
        assert_eq!(stdout, "done");
        assert_eq!(runner.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_execute_surfaces_final_error_after_max_tries() {
        let runner = RecordingRunner::new();
        runner.fail("", 1, "still busy");
        let exec = executor(runner.clone());

        let err = exec
            .try_execute("sudo", &["vblade-persist", "setup", "0", "0"])
            .await
            .unwrap_err();
        assert_matches!(err, Error::Execution { exit_code: 1, .. });
        assert_eq!(runner.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_rendered_command_line_includes_args() {
        let runner = RecordingRunner::new();
        let exec = executor(runner.clone());

        exec.execute("sudo", &["vgs", "--noheadings", "-o", "name"])
            .await
            .unwrap();
        assert_eq!(runner.calls(), vec!["sudo vgs --noheadings -o name"]);
    }
}
