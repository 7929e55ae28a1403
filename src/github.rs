//! Wrappers over the `gh` CLI.
//!
//! One method per operation. Calls whose result is needed downstream (PR and
//! issue numbers, label listings) return `Result`; calls that can fail for
//! benign reasons (label races, teardown) return `bool`.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::command::{CommandOutput, CommandRunner, Invocation};
use crate::error::{Error, Result};
use crate::labels::LabelSpec;

/// Outcome of probing a remote repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoAccess {
    /// `gh repo view` succeeded.
    Accessible,
    /// GitHub reports no such repository.
    NotFound,
    /// The repository could not be viewed for another reason.
    Inaccessible(String),
}

impl RepoAccess {
    /// Converts a non-accessible outcome into the matching error for `repo`.
    pub fn into_result(self, repo: &str) -> Result<()> {
        match self {
            RepoAccess::Accessible => Ok(()),
            RepoAccess::NotFound => Err(Error::RepositoryNotFound(repo.to_string())),
            RepoAccess::Inaccessible(reason) => Err(Error::RepositoryInaccessible {
                repo: repo.to_string(),
                reason,
            }),
        }
    }
}

/// A pull request comment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Comment {
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub author: Option<CommentAuthor>,
}

/// Author of a comment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CommentAuthor {
    #[serde(default)]
    pub login: String,
}

#[derive(Debug, Default, Deserialize)]
struct LabelsView {
    #[serde(default)]
    labels: Option<Vec<LabelRef>>,
}

#[derive(Debug, Deserialize)]
struct LabelRef {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CommentsView {
    #[serde(default)]
    comments: Option<Vec<Comment>>,
}

/// Label names from a `gh ... view --json labels` response.
///
/// A missing or null `labels` array yields no labels; entries without a
/// `name` are skipped.
pub fn parse_labels(json: &str) -> Result<Vec<String>> {
    let view: LabelsView = serde_json::from_str(json)?;
    Ok(view
        .labels
        .unwrap_or_default()
        .into_iter()
        .filter_map(|l| l.name)
        .collect())
}

/// Comments from a `gh pr view --json comments` response.
pub fn parse_comments(json: &str) -> Result<Vec<Comment>> {
    let view: CommentsView = serde_json::from_str(json)?;
    Ok(view.comments.unwrap_or_default())
}

/// Extracts the trailing number from a PR or issue URL printed by `gh`.
pub fn number_from_url(output: &str) -> Option<u64> {
    output.trim().rsplit('/').next()?.parse().ok()
}

/// `[checkout-name]` suffix appended to titles so concurrent runs can be told apart.
pub fn title_suffix(dir: &Path) -> String {
    let name = dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    format!("[{}]", name)
}

/// Client for the `gh` operations the harness needs.
#[derive(Clone)]
pub struct GitHubClient {
    runner: Arc<dyn CommandRunner>,
}

impl GitHubClient {
    /// Creates a client that runs `gh` through `runner`.
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn gh<I, S>(&self, dir: Option<&Path>, args: I) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut invocation = Invocation::new("gh", args);
        if let Some(dir) = dir {
            invocation = invocation.in_dir(dir);
        }
        self.runner.run(&invocation)
    }

    /// Runs `gh` and reports only whether it succeeded.
    fn gh_ok<I, S>(&self, dir: Option<&Path>, args: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match self.gh(dir, args) {
            Ok(output) => output.success,
            Err(e) => {
                tracing::warn!(error = %e, "gh invocation failed");
                false
            }
        }
    }

    fn remote_name(dir: &Path) -> String {
        dir.display().to_string()
    }

    // ---- repositories ----

    /// Checks `full_name` with `gh repo view`.
    pub fn check_repository(&self, full_name: &str) -> Result<RepoAccess> {
        let output = self.gh(None, ["repo", "view", full_name])?;
        if output.success {
            return Ok(RepoAccess::Accessible);
        }
        let stderr = output.stderr.trim().to_string();
        if stderr.contains("Could not resolve to a Repository") {
            Ok(RepoAccess::NotFound)
        } else {
            Ok(RepoAccess::Inaccessible(stderr))
        }
    }

    /// Whether `full_name` exists and is viewable.
    pub fn repository_exists(&self, full_name: &str) -> bool {
        matches!(self.check_repository(full_name), Ok(RepoAccess::Accessible))
    }

    /// Creates a repository on GitHub.
    pub fn create_repository(&self, full_name: &str, private: bool) -> Result<()> {
        let visibility = if private { "--private" } else { "--public" };
        tracing::info!(repo = %full_name, "creating repository");
        self.gh(None, ["repo", "create", full_name, visibility])?
            .require("repo create", full_name)?;
        Ok(())
    }

    /// Deletes a repository; failures are logged and reported as `false`.
    pub fn delete_repository(&self, full_name: &str) -> bool {
        tracing::info!(repo = %full_name, "deleting repository");
        let ok = self.gh_ok(None, ["repo", "delete", full_name, "--yes"]);
        if !ok {
            tracing::warn!(repo = %full_name, "failed to delete repository");
        }
        ok
    }

    /// Stores a repository secret.
    pub fn set_secret(&self, repo: &str, name: &str, value: &str) -> Result<()> {
        tracing::info!(repo = %repo, secret = %name, "setting repository secret");
        self.gh(None, ["secret", "set", name, "--repo", repo, "--body", value])?
            .require("secret set", repo)?;
        Ok(())
    }

    /// Dispatches a workflow on `git_ref`.
    pub fn run_workflow(&self, repo: &str, workflow: &str, git_ref: &str) -> Result<()> {
        self.gh(None, ["workflow", "run", workflow, "--repo", repo, "--ref", git_ref])?
            .require("workflow run", repo)?;
        Ok(())
    }

    /// Points `gh` in the checkout at `full_name`, so a fork checkout opens PRs
    /// against the primary.
    pub fn set_default_repo(&self, dir: &Path, full_name: &str) -> Result<()> {
        self.gh(Some(dir), ["repo", "set-default", full_name])?
            .require("repo set-default", full_name)?;
        Ok(())
    }

    /// Whether `gh auth status` succeeds.
    pub fn is_authenticated(&self) -> bool {
        self.gh_ok(None, ["auth", "status"])
    }

    // ---- labels ----

    /// Whether a label named exactly `name` exists.
    ///
    /// `gh label list --search` matches substrings, so the first tab-separated
    /// column of each line is compared for equality.
    pub fn label_exists(&self, dir: &Path, name: &str) -> bool {
        match self.gh(Some(dir), ["label", "list", "--search", name]) {
            Ok(output) if output.success => output
                .stdout.lines().any(|line| line.split('\t').next() == Some(name)),
            _ => false,
        }
    }

    /// Creates `label` unless it already exists. Returns whether the label is present afterwards.
    pub fn create_label(&self, dir: &Path, label: &LabelSpec) -> bool {
        if self.label_exists(dir, &label.name) {
            return true;
        }
        tracing::info!(label = %label.name, "creating label");
        self.gh_ok(
            Some(dir),
            [
                "label",
                "create",
                label.name.as_str(),
                "--color",
                label.color.as_str(),
                "--description",
                label.description.as_str(),
            ],
        )
    }

    // ---- pull requests ----

    fn create_pr_inner(
        &self,
        dir: &Path,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
        draft: bool,
    ) -> Result<u64> {
        let title = format!("{} {}", title, title_suffix(dir));
        let mut args = vec![
            "pr",
            "create",
            "--title",
            title.as_str(),
            "--body",
            body,
            "--head",
            head,
            "--base",
            base,
        ];
        if draft {
            args.push("--draft");
        }

        let output = self.gh(Some(dir), args)?.require("pr create", &Self::remote_name(dir))?;
        let number = number_from_url(&output.stdout).ok_or_else(|| Error::UnexpectedOutput {
            operation: "pr create".to_string(),
            output: output.stdout_trimmed().to_string(),
        })?;

        tracing::info!(pr = number, head = %head, draft, "created pull request");
        Ok(number)
    }

    /// Opens a pull request from `head` into `base` and returns its number.
    pub fn create_pr(
        &self,
        dir: &Path,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<u64> {
        self.create_pr_inner(dir, title, body, head, base, false)
    }

    /// Opens a draft pull request and returns its number.
    pub fn create_draft_pr(
        &self,
        dir: &Path,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<u64> {
        self.create_pr_inner(dir, title, body, head, base, true)
    }

    /// Closes a pull request, optionally deleting its branch.
    pub fn close_pr(&self, dir: &Path, number: u64, delete_branch: bool) -> bool {
        let number = number.to_string();
        let mut args = vec!["pr", "close", number.as_str()];
        if delete_branch {
            args.push("--delete-branch");
        }
        self.gh_ok(Some(dir), args)
    }

    /// Labels currently on a pull request.
    pub fn pr_labels(&self, dir: &Path, number: u64) -> Result<Vec<String>> {
        let output = self
            .gh(Some(dir), ["pr", "view", number.to_string().as_str(), "--json", "labels"])?
            .require("pr view", &Self::remote_name(dir))?;
        parse_labels(&output.stdout)
    }

    /// Whether a pull request carries `label`. Query failures count as `false`.
    pub fn pr_has_label(&self, dir: &Path, number: u64, label: &str) -> bool {
        self.pr_labels(dir, number)
            .map(|labels| labels.iter().any(|l| l == label))
            .unwrap_or(false)
    }

    /// Adds labels to a pull request.
    pub fn add_labels_to_pr(&self, dir: &Path, number: u64, labels: &[&str]) -> bool {
        self.edit_labels(dir, "pr", number, "--add-label", labels)
    }

    /// Removes labels from a pull request.
    pub fn remove_labels_from_pr(&self, dir: &Path, number: u64, labels: &[&str]) -> bool {
        self.edit_labels(dir, "pr", number, "--remove-label", labels)
    }

    fn edit_labels(
        &self,
        dir: &Path,
        kind: &str,
        number: u64,
        flag: &str,
        labels: &[&str],
    ) -> bool {
        if labels.is_empty() {
            return true;
        }
        let number = number.to_string();
        let joined = labels.join(",");
        self.gh_ok(Some(dir), [kind, "edit", number.as_str(), flag, joined.as_str()])
    }

    /// Comments on a pull request, or the error that prevented reading them.
    pub fn try_pr_comments(&self, dir: &Path, number: u64) -> Result<Vec<Comment>> {
        let number = number.to_string();
        let output = self
            .gh(Some(dir), ["pr", "view", number.as_str(), "--json", "comments"])?
            .require("pr view", &Self::remote_name(dir))?;
        parse_comments(&output.stdout)
    }

    /// Comments on a pull request. Failures and malformed output yield no comments.
    pub fn pr_comments(&self, dir: &Path, number: u64) -> Vec<Comment> {
        self.try_pr_comments(dir, number).unwrap_or_else(|e| {
            tracing::debug!(pr = number, error = %e, "comments query failed");
            Vec::new()
        })
    }

    /// Whether any comment on the pull request contains `text`.
    pub fn pr_has_comment_containing(&self, dir: &Path, number: u64, text: &str) -> bool {
        self.pr_comments(dir, number).iter().any(|c| c.body.contains(text))
    }

    /// Marks a draft pull request ready for review.
    pub fn mark_pr_ready_for_review(&self, dir: &Path, number: u64) -> bool {
        self.gh_ok(Some(dir), ["pr", "ready", number.to_string().as_str()])
    }

    /// Replaces a pull request title.
    pub fn update_pr_title(&self, dir: &Path, number: u64, title: &str) -> bool {
        self.gh_ok(Some(dir), ["pr", "edit", number.to_string().as_str(), "--title", title])
    }

    /// Replaces a pull request description.
    pub fn update_pr_body(&self, dir: &Path, number: u64, body: &str) -> Result<()> {
        self.gh(Some(dir), ["pr", "edit", number.to_string().as_str(), "--body", body])?
            .require("pr edit", &Self::remote_name(dir))?;
        Ok(())
    }

    // ---- issues ----

    /// Opens an issue and returns its number.
    pub fn create_issue(&self, dir: &Path, title: &str, body: &str) -> Result<u64> {
        let title = format!("{} {}", title, title_suffix(dir));
        let output = self
            .gh(Some(dir), ["issue", "create", "--title", title.as_str(), "--body", body])?
            .require("issue create", &Self::remote_name(dir))?;
        let number = number_from_url(&output.stdout).ok_or_else(|| Error::UnexpectedOutput {
            operation: "issue create".to_string(),
            output: output.stdout_trimmed().to_string(),
        })?;

        tracing::info!(issue = number, "created issue");
        Ok(number)
    }

    /// Closes an issue.
    pub fn close_issue(&self, dir: &Path, number: u64) -> bool {
        self.gh_ok(Some(dir), ["issue", "close", number.to_string().as_str()])
    }

    /// Labels currently on an issue.
    pub fn issue_labels(&self, dir: &Path, number: u64) -> Result<Vec<String>> {
        let output = self
            .gh(Some(dir), ["issue", "view", number.to_string().as_str(), "--json", "labels"])?
            .require("issue view", &Self::remote_name(dir))?;
        parse_labels(&output.stdout)
    }

    /// Whether an issue carries `label`. Query failures count as `false`.
    pub fn issue_has_label(&self, dir: &Path, number: u64, label: &str) -> bool {
        self.issue_labels(dir, number)
            .map(|labels| labels.iter().any(|l| l == label))
            .unwrap_or(false)
    }

    /// Adds labels to an issue.
    pub fn add_labels_to_issue(&self, dir: &Path, number: u64, labels: &[&str]) -> bool {
        self.edit_labels(dir, "issue", number, "--add-label", labels)
    }

    /// Removes labels from an issue.
    pub fn remove_labels_from_issue(&self, dir: &Path, number: u64, labels: &[&str]) -> bool {
        self.edit_labels(dir, "issue", number, "--remove-label", labels)
    }
}
