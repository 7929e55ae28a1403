//! Wrappers over the `git` CLI.
//!
//! Porcelain only. Every step a scenario depends on returns
//! [`Error::CommandFailed`](crate::error::Error::CommandFailed) naming the
//! operation and the remote it targeted.

use std::path::Path;
use std::sync::Arc;

use crate::command::{CommandOutput, CommandRunner, Invocation};
use crate::error::Result;

/// Default branch every keeper test repository uses.
pub const DEFAULT_BRANCH: &str = "main";

/// Client for the `git` operations the harness needs.
#[derive(Clone)]
pub struct Git {
    runner: Arc<dyn CommandRunner>,
}

impl Git {
    /// Creates a client that runs `git` through `runner`.
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn git<I, S>(&self, dir: &Path, args: I) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.runner.run(&Invocation::new("git", args).in_dir(dir))
    }

    fn run_required<I, S>(
        &self,
        dir: &Path,
        operation: &str,
        remote: &str,
        args: I,
    ) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.git(dir, args)?.require(operation, remote)
    }

    /// Clones `url` into `dest`. `remote` names the repository in errors so the
    /// URL, which may carry a token, never does.
    pub fn clone_repo(&self, url: &str, dest: &Path, remote: &str) -> Result<()> {
        let parent = dest.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;
        let dest = dest.to_string_lossy().into_owned();
        tracing::info!(repo = %remote, dest = %dest, "cloning repository");
        self.run_required(parent, "clone", remote, ["clone", url, dest.as_str()])?;
        Ok(())
    }

    /// Initializes a repository in `dir` whose first branch is `branch`.
    pub fn init(&self, dir: &Path, branch: &str) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let initial = format!("--initial-branch={}", branch);
        self.run_required(dir, "init", "local", ["init", initial.as_str()])?;
        Ok(())
    }

    /// Sets the commit identity for this repository only.
    pub fn configure_identity(&self, dir: &Path, name: &str, email: &str) -> Result<()> {
        self.run_required(dir, "config user.name", "local", ["config", "user.name", name])?;
        self.run_required(dir, "config user.email", "local", ["config", "user.email", email])?;
        Ok(())
    }

    /// Checks out an existing branch.
    pub fn checkout(&self, dir: &Path, branch: &str) -> Result<()> {
        self.run_required(dir, "checkout", "local", ["checkout", branch])?;
        Ok(())
    }

    /// Creates `branch` from `base`, replacing any local branch of that name.
    pub fn create_branch(&self, dir: &Path, branch: &str, base: &str) -> Result<()> {
        self.checkout(dir, base)?;
        // Absent branch is fine.
        let _ = self.git(dir, ["branch", "-D", branch]);
        self.run_required(dir, "checkout -b", "local", ["checkout", "-b", branch])?;
        tracing::debug!(branch = %branch, base = %base, "created branch");
        Ok(())
    }

    /// Stages `paths`, or everything when `paths` is empty.
    pub fn add(&self, dir: &Path, paths: &[&str]) -> Result<()> {
        let mut args = vec!["add"];
        if paths.is_empty() {
            args.push(".");
        } else {
            args.push("--");
            args.extend_from_slice(paths);
        }
        self.run_required(dir, "add", "local", args)?;
        Ok(())
    }

    /// Commits staged changes.
    pub fn commit(&self, dir: &Path, message: &str) -> Result<()> {
        self.run_required(dir, "commit", "local", ["commit", "-m", message])?;
        Ok(())
    }

    /// Name of the checked-out branch.
    pub fn current_branch(&self, dir: &Path) -> Result<String> {
        let output =
            self.run_required(dir, "branch --show-current", "local", ["branch", "--show-current"])?;
        Ok(output.stdout_trimmed().to_string())
    }

    /// Pushes `branch` to `origin` and sets it as upstream.
    pub fn push_branch(&self, dir: &Path, branch: &str) -> Result<()> {
        self.run_required(dir, "push", "origin", ["push", "-u", "origin", branch])?;
        Ok(())
    }

    /// Force-pushes `branch` to `remote`, replacing its history.
    pub fn force_push(&self, dir: &Path, remote: &str, branch: &str) -> Result<()> {
        tracing::info!(remote = %remote, branch = %branch, "force-pushing");
        self.run_required(dir, "force push", remote, ["push", "--force", "-u", remote, branch])?;
        Ok(())
    }

    /// Deletes `branch` from `remote`. Failures are logged and reported as `false`.
    pub fn delete_remote_branch(&self, dir: &Path, remote: &str, branch: &str) -> bool {
        match self.git(dir, ["push", remote, "--delete", branch]) {
            Ok(output) if output.success => {
                tracing::info!(remote = %remote, branch = %branch, "deleted remote branch");
                true
            }
            Ok(output) => {
                tracing::warn!(
                    remote = %remote,
                    branch = %branch,
                    stderr = %output.stderr.trim(),
                    "failed to delete remote branch"
                );
                false
            }
            Err(e) => {
                tracing::warn!(
                    remote = %remote,
                    branch = %branch,
                    error = %e,
                    "failed to delete remote branch"
                );
                false
            }
        }
    }

    /// Stages `files` (everything when empty), commits, and pushes the current branch to `origin`.
    pub fn commit_and_push(&self, dir: &Path, message: &str, files: &[&str]) -> Result<()> {
        self.add(dir, files)?;
        self.commit(dir, message)?;
        let branch = self.current_branch(dir)?;
        self.run_required(dir, "push", "origin", ["push", "origin", branch.as_str()])?;
        Ok(())
    }

    /// Pulls `branch` from `remote`.
    pub fn pull(&self, dir: &Path, remote: &str, branch: &str) -> Result<()> {
        self.run_required(dir, "pull", remote, ["pull", remote, branch])?;
        Ok(())
    }

    /// Adds a remote.
    pub fn add_remote(&self, dir: &Path, name: &str, url: &str) -> Result<()> {
        self.run_required(dir, "remote add", name, ["remote", "add", name, url])?;
        Ok(())
    }

    /// URL of remote `name`, if configured.
    pub fn remote_url(&self, dir: &Path, name: &str) -> Option<String> {
        match self.git(dir, ["remote", "get-url", name]) {
            Ok(output) if output.success => Some(output.stdout_trimmed().to_string()),
            _ => None,
        }
    }

    /// Whether local branch `branch` exists.
    pub fn branch_exists(&self, dir: &Path, branch: &str) -> bool {
        let reference = format!("refs/heads/{}", branch);
        matches!(
            self.git(dir, ["show-ref", "--verify", "--quiet", reference.as_str()]),
            Ok(output) if output.success
        )
    }
}
