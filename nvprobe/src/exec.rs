//! External command execution.
//!
//! Every tool the probe drives (`nvme`, `fio`, `lsblk`, `msmtp`) goes through
//! [`CommandRunner`], so the whole pipeline can run against a scripted runner
//! in tests. Commands are awaited one at a time; nothing here spawns work in
//! the background.

use std::fmt;
use std::future::Future;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// A fully-specified external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Bytes written to the child's stdin, which is then closed.
    pub stdin: Option<Vec<u8>>,
    /// Hard limit after which the child is killed.
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            timeout: None,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Wrap the command in `sudo` when requested.
    #[must_use]
    pub fn privileged(self, use_sudo: bool) -> Self {
        if !use_sudo {
            return self;
        }
        let mut args = Vec::with_capacity(self.args.len() + 1);
        args.push(self.program);
        args.extend(self.args);
        Self {
            program: "sudo".to_string(),
            args,
            ..self
        }
    }

    /// Whether this command runs `program`, directly or through `sudo`.
    pub fn invokes(&self, program: &str) -> bool {
        self.program == program
            || (self.program == "sudo" && self.args.first().is_some_and(|a| a == program))
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `-1` when the process was killed by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Trimmed stderr, falling back to stdout when stderr is empty.
    pub fn diagnostic(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

/// Failure to run a command at all. A non-zero exit is not an error here.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while running `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` timed out after {}s", timeout.as_secs_f64())]
    Timeout { command: String, timeout: Duration },
}

/// Seam between the probe and the operating system.
pub trait CommandRunner {
    fn run(&self, spec: &CommandSpec)
    -> impl Future<Output = Result<CommandOutput, CommandError>>;
}

/// Runs commands as local child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        let command = spec.to_string();
        debug!(%command, "Running command");
        let start = Instant::now();

        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CommandError::Spawn {
                command: command.clone(),
                source,
            })?;

        let input = spec.stdin.clone();
        let execution = async move {
            if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
                stdin.write_all(&input).await?;
                stdin.shutdown().await?;
            }
            child.wait_with_output().await
        };

        // Dropping `execution` on timeout drops the child, which kills it.
        let output = match spec.timeout {
            Some(limit) => match tokio::time::timeout(limit, execution).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(%command, timeout_secs = limit.as_secs_f64(), "Command timed out");
                    return Err(CommandError::Timeout {
                        command,
                        timeout: limit,
                    });
                }
            },
            None => execution.await,
        }
        .map_err(|source| CommandError::Io {
            command: command.clone(),
            source,
        })?;

        let result = CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        debug!(
            %command,
            exit_code = result.exit_code,
            duration_ms = result.duration_ms,
            "Command finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privileged_prefixes_sudo() {
        let spec = CommandSpec::new("nvme")
            .args(["smart-log", "/dev/nvme0"])
            .privileged(true);
        assert_eq!(spec.program, "sudo");
        assert_eq!(spec.args, vec!["nvme", "smart-log", "/dev/nvme0"]);
        assert!(spec.invokes("nvme"));
        assert_eq!(spec.to_string(), "sudo nvme smart-log /dev/nvme0");
    }

    #[test]
    fn test_privileged_false_is_identity() {
        let spec = CommandSpec::new("fio").arg("--version");
        assert_eq!(spec.clone().privileged(false), spec);
        assert!(spec.invokes("fio"));
        assert!(!spec.invokes("nvme"));
    }

    #[test]
    fn test_diagnostic_prefers_stderr() {
        let mut output = CommandOutput {
            exit_code: 1,
            stdout: "out\n".to_string(),
            stderr: "  permission denied\n".to_string(),
            duration_ms: 0,
        };
        assert_eq!(output.diagnostic(), "permission denied");
        output.stderr.clear();
        assert_eq!(output.diagnostic(), "out");
    }

    #[tokio::test]
    async fn test_process_runner_captures_output() {
        let spec = CommandSpec::new("sh").args(["-c", "echo hello; echo oops >&2; exit 3"]);
        let output = ProcessRunner.run(&spec).await.unwrap();
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr.trim(), "oops");
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_process_runner_feeds_stdin() {
        let spec = CommandSpec::new("cat").with_stdin("Subject: test\n\nbody\n");
        let output = ProcessRunner.run(&spec).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "Subject: test\n\nbody\n");
    }

    #[tokio::test]
    async fn test_process_runner_missing_program() {
        let spec = CommandSpec::new("/nonexistent/definitely-not-a-tool");
        let err = ProcessRunner.run(&spec).await.unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_process_runner_timeout() {
        let spec = CommandSpec::new("sleep")
            .arg("5")
            .with_timeout(Duration::from_millis(100));
        let start = Instant::now();
        let err = ProcessRunner.run(&spec).await.unwrap_err();
        assert!(matches!(err, CommandError::Timeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(4));
    }
}
