//! Subprocess execution for the `git` and `gh` binaries.
//!
//! Every external call the harness makes goes through [`CommandRunner`], so
//! the wrappers in [`crate::github`] and [`crate::git`] can be exercised
//! against a scripted runner in unit tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};

/// A single program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program name (`git`, `gh`).
    pub program: String,
    /// Arguments, in order.
    pub args: Vec<String>,
    /// Working directory, if any.
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    /// Creates an invocation of `program` with `args`.
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
        }
    }

    /// Runs the invocation inside `dir`.
    pub fn in_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Returns `program arg1 arg2 ...` for log lines.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Captured result of a finished subprocess.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code, `None` when terminated by a signal.
    pub status: Option<i32>,
    /// Whether the process exited successfully.
    pub success: bool,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Output of a successful run with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Output of a failed run with the given exit code and stderr.
    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Returns self on success, otherwise a [`Error::CommandFailed`] naming the
    /// attempted operation and the remote it targeted.
    pub fn require(self, operation: &str, remote: &str) -> Result<Self> {
        if self.success {
            return Ok(self);
        }
        Err(Error::CommandFailed {
            operation: operation.to_string(),
            remote: remote.to_string(),
            status: self.status,
            stderr: self.stderr.trim().to_string(),
        })
    }

    /// Trimmed stdout.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// Executes program invocations.
pub trait CommandRunner: Send + Sync {
    /// Runs the invocation to completion and captures its output.
    ///
    /// A non-zero exit is not an error at this level; only failing to start
    /// the program is.
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput>;
}

/// Runs invocations as real child processes.
#[derive(Clone, Default)]
pub struct SystemRunner {
    /// Extra environment variables applied to every child.
    envs: HashMap<String, String>,
    /// Values scrubbed from captured output.
    secrets: Vec<String>,
}

impl SystemRunner {
    /// Creates a runner with the inherited environment only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Passes the GitHub token to `gh` as `GH_TOKEN` and redacts it from output.
    pub fn with_github_token(mut self, token: Option<&str>) -> Self {
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            self.envs.insert("GH_TOKEN".to_string(), token.to_string());
            self.secrets.push(token.to_string());
        }
        self
    }

    /// Replaces every known secret value in `text` with `[REDACTED]`.
    pub fn redact(&self, text: &str) -> String {
        redact(text, &self.secrets)
    }
}

impl std::fmt::Debug for SystemRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemRunner")
            .field("envs", &self.envs.keys().collect::<Vec<_>>())
            .field("secret_count", &self.secrets.len())
            .finish()
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args).envs(&self.envs);
        if let Some(dir) = &invocation.cwd {
            command.current_dir(dir);
        }

        tracing::debug!(command = %self.redact(&invocation.display()), "running");

        let output = command.output().map_err(|source| Error::Spawn {
            program: invocation.program.clone(),
            source,
        })?;

        let result = CommandOutput {
            status: output.status.code(),
            success: output.status.success(),
            stdout: self.redact(&String::from_utf8_lossy(&output.stdout)),
            stderr: self.redact(&String::from_utf8_lossy(&output.stderr)),
        };

        if !result.success {
            tracing::debug!(
                command = %self.redact(&invocation.display()),
                status = ?result.status,
                stderr = %result.stderr.trim(),
                "command exited with failure"
            );
        }

        Ok(result)
    }
}

/// Replaces each non-empty secret in `text`, longest first.
pub fn redact(text: &str, secrets: &[String]) -> String {
    let mut ordered: Vec<&String> = secrets.iter().filter(|s| !s.is_empty()).collect();
    ordered.sort_by(|a, b| b.len().cmp(&a.len()));

    let mut result = text.to_string();
    for secret in ordered {
        result = result.replace(secret.as_str(), "[REDACTED]");
    }
    result
}
