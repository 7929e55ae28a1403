//! Building blocks for keeper workflow scenarios.
//!
//! A scenario is branch, change, commit, push, open a PR or issue, then poll
//! for label and comment effects. [`Harness`] runs the setup half and hands
//! back a guard that closes the PR or issue when dropped, so cleanup happens
//! even when an assertion panics.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::command::{CommandRunner, SystemRunner};
use crate::config::{ConfigLoader, TestingConfig};
use crate::error::{Error, Result};
use crate::git::{Git, DEFAULT_BRANCH};
use crate::github::GitHubClient;
use crate::labels::{LabelCatalog, LabelSpec};
use crate::naming;
use crate::poll::{poll_until, PollSettings};
use crate::repo::{Baseline, LocalCheckout, RepoManager, TESTING_FILE};
use crate::session::{InitOutcome, SessionCoordinator};

const FALLBACK_LABEL_COLOR: &str = "EDEDED";

/// A file change committed on a fresh branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// Branch name prefix; a unique suffix is appended.
    pub branch_prefix: String,
    /// File to change, relative to the repository root.
    pub file: String,
    /// For `TESTING.md` a section heading to append, otherwise the full file content.
    pub content: String,
    /// Commit message.
    pub commit_message: String,
}

impl Change {
    /// Writes `content` as the whole of `file`.
    pub fn new(branch_prefix: &str, file: &str, content: &str, commit_message: &str) -> Self {
        Self {
            branch_prefix: branch_prefix.to_string(),
            file: file.to_string(),
            content: content.to_string(),
            commit_message: commit_message.to_string(),
        }
    }

    /// Appends a uniquely named section to `TESTING.md`.
    pub fn testing_section(branch_prefix: &str, heading: &str) -> Self {
        Self {
            branch_prefix: branch_prefix.to_string(),
            file: TESTING_FILE.to_string(),
            content: format!("{} {}", heading, chrono::Utc::now().timestamp()),
            commit_message: heading.to_string(),
        }
    }

    fn apply(&self, checkout: &LocalCheckout) -> Result<()> {
        if self.file == TESTING_FILE {
            checkout.append_to_testing_file(&self.content)
        } else {
            checkout.write_file(&self.file, &self.content).map(|_| ())
        }
    }
}

/// Pull request to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestSpec {
    pub title: String,
    pub body: String,
    pub draft: bool,
}

impl PullRequestSpec {
    /// A ready-for-review pull request.
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            draft: false,
        }
    }

    /// Opens the pull request as a draft.
    pub fn draft(mut self) -> Self {
        self.draft = true;
        self
    }
}

/// Issue to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueSpec {
    pub title: String,
    pub body: String,
}

impl IssueSpec {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }
}

/// Wraps `lines` in a fenced `yaml` block.
pub fn yaml_block(lines: &[&str]) -> String {
    let mut block = String::from("```yaml\n");
    for line in lines {
        block.push_str(line);
        block.push('\n');
    }
    block.push_str("```");
    block
}

/// PR description with an intro, a fenced YAML block, and an optional outro.
pub fn describe(intro: &str, yaml: &[&str], outro: &str) -> String {
    let mut body = format!("{}\n\n{}", intro, yaml_block(yaml));
    if !outro.is_empty() {
        body.push_str("\n\n");
        body.push_str(outro);
    }
    body
}

/// Everything a scenario needs, wired to one configuration.
pub struct Harness {
    pub config: TestingConfig,
    pub github: GitHubClient,
    pub git: Git,
    pub repos: RepoManager,
    pub poll: PollSettings,
    catalog: LabelCatalog,
}

impl Harness {
    /// Loads `.env` plus the environment, validates it, and wires real `gh`/`git` calls.
    pub fn from_env() -> Result<Self> {
        let bootstrap: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new());
        let config = ConfigLoader::new(bootstrap).load(Path::new(".env"))?;
        Self::new(config)
    }

    /// Wires real `gh`/`git` calls for `config`.
    pub fn new(config: TestingConfig) -> Result<Self> {
        let runner = SystemRunner::new().with_github_token(config.github_token.as_deref());
        Self::with_runner(config, Arc::new(runner))
    }

    /// Wires the harness to a custom runner.
    pub fn with_runner(config: TestingConfig, runner: Arc<dyn CommandRunner>) -> Result<Self> {
        let git = Git::new(runner.clone());
        let github = GitHubClient::new(runner);
        let repos = RepoManager::new(&config, git.clone(), github.clone());
        Ok(Self {
            poll: PollSettings::default(),
            catalog: LabelCatalog::builtin()?,
            config,
            github,
            git,
            repos,
        })
    }

    /// Runs the self-reference guard against `dir` instead of the current directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.repos = self.repos.with_working_dir(dir);
        self
    }

    /// Poll window from `TEST_TIMEOUT` / `TEST_POLL_INTERVAL`, for waits that
    /// need more room than the default.
    pub fn configured_poll(&self) -> PollSettings {
        PollSettings::from_config(&self.config)
    }

    /// Coordinator over this configuration's cache directory.
    pub fn session(&self) -> SessionCoordinator {
        SessionCoordinator::from_config(&self.config)
    }

    /// Initializes the primary repository unless another worker already did this session.
    pub fn initialize_once(&self) -> Result<InitOutcome> {
        let baseline = Baseline::standard(&self.config)?;
        self.session()
            .ensure_initialized(|| {
                self.repos.initialize_remote(&self.config.primary_repo, &baseline)
            })
    }

    /// Fresh checkout of the primary repository with the required labels present.
    pub fn checkout(&self, prefix: &str) -> Result<LocalCheckout> {
        let checkout = self
            .repos.clone_checkout(&self.config.primary_repo, &naming::unique_name(prefix))?;
        for label in &self.config.required_labels {
            self.ensure_label(&checkout, label);
        }
        Ok(checkout)
    }

    /// Fresh checkout of the fork with the primary as `upstream`, or `None` without a fork.
    pub fn fork_checkout(&self, prefix: &str) -> Result<Option<LocalCheckout>> {
        let Some(fork) = &self.config.fork_repo else {
            return Ok(None);
        };
        let primary = &self.config.primary_repo;
        let checkout = self.repos.clone_fork(fork, primary, &naming::unique_name(prefix))?;
        self.github.set_default_repo(checkout.path(), &primary.full_name())?;
        Ok(Some(checkout))
    }

    /// Creates `name` in the repository when missing, using the catalog definition if there is one.
    pub fn ensure_label(&self, checkout: &LocalCheckout, name: &str) -> bool {
        let spec = self
            .catalog
            .get(name)
            .cloned()
            .unwrap_or_else(|| LabelSpec::new(name, FALLBACK_LABEL_COLOR, name));
        self.github.create_label(checkout.path(), &spec)
    }

    /// Commits `change` on a new branch, pushes it, and opens a pull request into `main`.
    pub fn open_pull_request<'a>(
        &'a self,
        checkout: &'a LocalCheckout,
        change: &Change,
        spec: &PullRequestSpec,
    ) -> Result<PullRequestGuard<'a>> {
        self.open_pull_request_from(checkout, change, spec, None)
    }

    /// Like [`open_pull_request`](Self::open_pull_request), from a fork checkout
    /// into the primary repository.
    pub fn open_fork_pull_request<'a>(
        &'a self,
        checkout: &'a LocalCheckout,
        change: &Change,
        spec: &PullRequestSpec,
    ) -> Result<PullRequestGuard<'a>> {
        let owner = self
            .config
            .fork_repo
            .as_ref()
            .map(|f| f.owner.clone())
            .ok_or_else(|| Error::Config("no fork repository configured".to_string()))?;
        self.open_pull_request_from(checkout, change, spec, Some(&owner))
    }

    fn open_pull_request_from<'a>(
        &'a self,
        checkout: &'a LocalCheckout,
        change: &Change,
        spec: &PullRequestSpec,
        head_owner: Option<&str>,
    ) -> Result<PullRequestGuard<'a>> {
        let dir = checkout.path();
        let branch = naming::unique_name(&naming::sanitize(&change.branch_prefix));

        self.git.create_branch(dir, &branch, DEFAULT_BRANCH)?;
        change.apply(checkout)?;
        self.git.commit_and_push(dir, &change.commit_message, &[change.file.as_str()])?;

        let head = match head_owner {
            Some(owner) => format!("{}:{}", owner, branch),
            None => branch.clone(),
        };
        let created = if spec.draft {
            self.github.create_draft_pr(dir, &spec.title, &spec.body, &head, DEFAULT_BRANCH)
        } else {
            self.github.create_pr(dir, &spec.title, &spec.body, &head, DEFAULT_BRANCH)
        };
        let number = match created {
            Ok(number) => number,
            Err(e) => {
                // No guard exists yet to delete the pushed branch.
                self.git.delete_remote_branch(dir, "origin", &branch);
                return Err(e);
            }
        };

        Ok(PullRequestGuard {
            github: &self.github,
            checkout,
            number,
            branch,
            poll: self.poll,
            closed: false,
        })
    }

    /// Opens an issue.
    pub fn open_issue<'a>(
        &'a self,
        checkout: &'a LocalCheckout,
        spec: &IssueSpec,
    ) -> Result<IssueGuard<'a>> {
        let number = self.github.create_issue(checkout.path(), &spec.title, &spec.body)?;
        Ok(IssueGuard {
            github: &self.github,
            checkout,
            number,
            poll: self.poll,
            closed: false,
        })
    }
}

/// An open pull request, closed with its branch deleted on drop.
pub struct PullRequestGuard<'a> {
    github: &'a GitHubClient,
    checkout: &'a LocalCheckout,
    number: u64,
    branch: String,
    poll: PollSettings,
    closed: bool,
}

impl<'a> PullRequestGuard<'a> {
    /// Pull request number.
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Head branch name.
    pub fn branch(&self) -> &str {
        &self.branch
    }

    fn dir(&self) -> &Path {
        self.checkout.path()
    }

    fn subject(&self) -> String {
        format!("PR #{}", self.number)
    }

    /// Uses `poll` for subsequent waits.
    pub fn with_poll(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    /// Current labels.
    pub fn labels(&self) -> Result<Vec<String>> {
        self.github.pr_labels(self.dir(), self.number)
    }

    /// Current labels, empty when the query fails.
    fn observed_labels(&self) -> Vec<String> {
        self.labels().unwrap_or_default()
    }

    fn comment_bodies(&self) -> Vec<String> {
        self.github.pr_comments(self.dir(), self.number).into_iter().map(|c| c.body).collect()
    }

    /// Whether the PR carries `label` right now.
    pub fn has_label(&self, label: &str) -> bool {
        self.github.pr_has_label(self.dir(), self.number, label)
    }

    /// Polls until `label` is present.
    pub fn wait_for_label(&self, label: &str) -> bool {
        tracing::info!(pr = self.number, label = %label, "waiting for label");
        self.poll.until(|| self.has_label(label))
    }

    /// Polls until every label in `labels` is present at once.
    pub fn wait_for_labels(&self, labels: &[&str]) -> bool {
        tracing::info!(pr = self.number, labels = ?labels, "waiting for labels");
        self.poll.until(|| match self.labels() {
            Ok(current) => labels.iter().all(|l| current.iter().any(|c| c == l)),
            Err(_) => false,
        })
    }

    /// Polls until `label` is gone. A failed query does not count as gone.
    pub fn wait_for_label_absent(&self, label: &str) -> bool {
        tracing::info!(pr = self.number, label = %label, "waiting for label removal");
        self.poll.until(|| match self.labels() {
            Ok(current) => !current.iter().any(|c| c == label),
            Err(_) => false,
        })
    }

    /// True only when the comments were read and none contains `text`.
    fn has_no_comment_containing(&self, text: &str) -> bool {
        match self.github.try_pr_comments(self.dir(), self.number) {
            Ok(comments) => !comments.iter().any(|c| c.body.contains(text)),
            Err(e) => {
                tracing::debug!(pr = self.number, error = %e, "comments query failed");
                false
            }
        }
    }

    /// Polls until a comment contains `text`.
    pub fn wait_for_comment(&self, text: &str) -> bool {
        tracing::info!(pr = self.number, text = %text, "waiting for comment");
        self.poll.until(|| self.github.pr_has_comment_containing(self.dir(), self.number, text))
    }

    /// Polls until no comment contains `text`.
    pub fn wait_for_comment_absent(&self, text: &str) -> bool {
        tracing::info!(pr = self.number, text = %text, "waiting for comment removal");
        self.poll.until(|| self.has_no_comment_containing(text))
    }

    /// Waits for `label` and fails with the observed labels if it never appears.
    pub fn expect_label(&self, label: &str) -> Result<()> {
        self.expect_labels(&[label])
    }

    /// Waits for all of `labels` and fails with the observed labels otherwise.
    pub fn expect_labels(&self, labels: &[&str]) -> Result<()> {
        if self.wait_for_labels(labels) {
            return Ok(());
        }
        Err(Error::ConditionNotMet {
            subject: self.subject(),
            expectation: format!("labels {:?}", labels),
            observed: self.observed_labels(),
        })
    }

    /// Waits for `label` to disappear.
    pub fn expect_label_absent(&self, label: &str) -> Result<()> {
        if self.wait_for_label_absent(label) {
            return Ok(());
        }
        Err(Error::ConditionNotMet {
            subject: self.subject(),
            expectation: format!("no label '{}'", label),
            observed: self.observed_labels(),
        })
    }

    /// Fails if `label` shows up at any point during `window`.
    pub fn expect_label_stays_absent(&self, label: &str, window: Duration) -> Result<()> {
        let appeared = poll_until(|| self.has_label(label), window, self.poll.interval);
        if !appeared {
            return Ok(());
        }
        Err(Error::ConditionNotMet {
            subject: self.subject(),
            expectation: format!("no label '{}' within {:?}", label, window),
            observed: self.observed_labels(),
        })
    }

    /// After `settle`, fails if any label starts with `prefix`.
    pub fn expect_no_label_with_prefix(&self, prefix: &str, settle: Duration) -> Result<()> {
        std::thread::sleep(settle);
        let labels = self.labels()?;
        if labels.iter().any(|l| l.starts_with(prefix)) {
            return Err(Error::ConditionNotMet {
                subject: self.subject(),
                expectation: format!("no label starting with '{}'", prefix),
                observed: labels,
            });
        }
        Ok(())
    }

    /// Waits for a comment containing `text`, failing with the observed comments otherwise.
    pub fn expect_comment(&self, text: &str) -> Result<()> {
        if self.wait_for_comment(text) {
            return Ok(());
        }
        Err(Error::ConditionNotMet {
            subject: self.subject(),
            expectation: format!("a comment containing {:?}", text),
            observed: self.comment_bodies(),
        })
    }

    /// Waits until no comment contains `text`.
    pub fn expect_comment_absent(&self, text: &str) -> Result<()> {
        if self.wait_for_comment_absent(text) {
            return Ok(());
        }
        Err(Error::ConditionNotMet {
            subject: self.subject(),
            expectation: format!("no comment containing {:?}", text),
            observed: self.comment_bodies(),
        })
    }

    /// Returns the first comment containing `text`.
    pub fn comment_containing(&self, text: &str) -> Option<String> {
        self.comment_bodies().into_iter().find(|b| b.contains(text))
    }

    /// Replaces the title.
    pub fn set_title(&self, title: &str) -> Result<()> {
        if self.github.update_pr_title(self.dir(), self.number, title) {
            return Ok(());
        }
        Err(Error::ConditionNotMet {
            subject: self.subject(),
            expectation: format!("title update to {:?}", title),
            observed: Vec::new(),
        })
    }

    /// Replaces the description.
    pub fn set_body(&self, body: &str) -> Result<()> {
        self.github.update_pr_body(self.dir(), self.number, body)
    }

    /// Adds labels.
    pub fn add_labels(&self, labels: &[&str]) -> bool {
        self.github.add_labels_to_pr(self.dir(), self.number, labels)
    }

    /// Removes labels.
    pub fn remove_labels(&self, labels: &[&str]) -> bool {
        self.github.remove_labels_from_pr(self.dir(), self.number, labels)
    }

    /// Moves a draft out of draft state.
    pub fn mark_ready(&self) -> Result<()> {
        if self.github.mark_pr_ready_for_review(self.dir(), self.number) {
            return Ok(());
        }
        Err(Error::ConditionNotMet {
            subject: self.subject(),
            expectation: "draft marked ready for review".to_string(),
            observed: Vec::new(),
        })
    }

    /// Closes the PR and deletes its branch now. Returns whether `gh` succeeded.
    pub fn close(&mut self) -> bool {
        if self.closed {
            return true;
        }
        self.closed = true;
        let ok = self.github.close_pr(self.dir(), self.number, true);
        if !ok {
            tracing::warn!(pr = self.number, "failed to close pull request");
        }
        ok
    }
}

impl Drop for PullRequestGuard<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

/// An open issue, closed on drop.
pub struct IssueGuard<'a> {
    github: &'a GitHubClient,
    checkout: &'a LocalCheckout,
    number: u64,
    poll: PollSettings,
    closed: bool,
}

impl<'a> IssueGuard<'a> {
    /// Issue number.
    pub fn number(&self) -> u64 {
        self.number
    }

    fn dir(&self) -> &Path {
        self.checkout.path()
    }

    /// Uses `poll` for subsequent waits.
    pub fn with_poll(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    /// Current labels.
    pub fn labels(&self) -> Result<Vec<String>> {
        self.github.issue_labels(self.dir(), self.number)
    }

    /// Whether the issue carries `label` right now.
    pub fn has_label(&self, label: &str) -> bool {
        self.github.issue_has_label(self.dir(), self.number, label)
    }

    /// Polls until `label` is present.
    pub fn wait_for_label(&self, label: &str) -> bool {
        tracing::info!(issue = self.number, label = %label, "waiting for label");
        self.poll.until(|| self.has_label(label))
    }

    /// Waits for `label` and fails with the observed labels if it never appears.
    pub fn expect_label(&self, label: &str) -> Result<()> {
        if self.wait_for_label(label) {
            return Ok(());
        }
        Err(Error::ConditionNotMet {
            subject: format!("issue #{}", self.number),
            expectation: format!("label '{}'", label),
            observed: self.labels().unwrap_or_default(),
        })
    }

    /// Adds labels.
    pub fn add_labels(&self, labels: &[&str]) -> bool {
        self.github.add_labels_to_issue(self.dir(), self.number, labels)
    }

    /// Removes labels.
    pub fn remove_labels(&self, labels: &[&str]) -> bool {
        self.github.remove_labels_from_issue(self.dir(), self.number, labels)
    }

    /// Closes the issue now. Returns whether `gh` succeeded.
    pub fn close(&mut self) -> bool {
        if self.closed {
            return true;
        }
        self.closed = true;
        let ok = self.github.close_issue(self.dir(), self.number);
        if !ok {
            tracing::warn!(issue = self.number, "failed to close issue");
        }
        ok
    }
}

impl Drop for IssueGuard<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::fake::ScriptedRunner;
    use crate::command::CommandOutput;
    use crate::config::RepositoryConfig;
    use tempfile::TempDir;

    #[test]
    fn yaml_block_is_fenced() {
        assert_eq!(
            yaml_block(&["release: 1.5", "backport: 1.4"]),
            "```yaml\nrelease: 1.5\nbackport: 1.4\n```"
        );
    }

    #[test]
    fn describe_joins_sections() {
        let body = describe("Testing release labels.", &["release: 1.5"], "");
        assert_eq!(body, "Testing release labels.\n\n```yaml\nrelease: 1.5\n```");

        let body = describe("Intro", &["needs_feature_branch: true"], "Outro");
        assert!(body.ends_with("```\n\nOutro"));
    }

    #[test]
    fn pull_request_spec_builder() {
        let spec = PullRequestSpec::new("t", "b").draft();
        assert!(spec.draft);
    }

    #[test]
    fn testing_section_targets_testing_file() {
        let change = Change::testing_section("test-release", "Test Release Labels");
        assert_eq!(change.file, TESTING_FILE);
        assert!(change.content.starts_with("Test Release Labels "));
        assert_eq!(change.commit_message, "Test Release Labels");
    }

    fn harness(cache: &Path, runner: Arc<ScriptedRunner>) -> Harness {
        let mut config = TestingConfig::new(RepositoryConfig::primary("org", "repo"));
        config.cache_dir = cache.to_path_buf();
        let mut harness = Harness::with_runner(config, runner).unwrap();
        harness.poll = PollSettings::new(Duration::from_millis(50), Duration::from_millis(10));
        harness
    }

    fn checkout_in(dir: &TempDir) -> LocalCheckout {
        let mut checkout = LocalCheckout::for_path("work", dir.path().join("work"));
        std::fs::create_dir_all(checkout.path()).unwrap();
        checkout.keep();
        checkout
    }

    #[test]
    fn open_pull_request_runs_the_full_skeleton_and_closes_on_drop() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(
            ScriptedRunner::new()
                .reply("git branch --show-current", CommandOutput::ok("test-wip-x\n"))
                .reply("gh pr create", CommandOutput::ok("https://github.com/org/repo/pull/31\n"))
                .reply("gh pr view 31", CommandOutput::ok(r#"{"labels":[{"name":"wip"}]}"#)),
        );
        let harness = harness(dir.path(), runner.clone());
        let checkout = checkout_in(&dir);

        {
            let pr = harness
                .open_pull_request(
                    &checkout,
                    &Change::testing_section("Test WIP", "Test WIP Title"),
                    &PullRequestSpec::new("[WIP] Something", "body"),
                )
                .unwrap();
            assert_eq!(pr.number(), 31);
            assert!(pr.branch().starts_with("test-wip-"));
            assert!(pr.wait_for_label("wip"));
        }

        let lines = runner.call_lines();
        assert!(lines[0].starts_with("git checkout main"));
        assert!(lines.iter().any(|l| l == "git add -- TESTING.md"));
        assert!(lines.iter().any(|l| l.starts_with("gh pr create --title [WIP] Something [work]")));
        assert_eq!(lines.last().unwrap(), "gh pr close 31 --delete-branch");
        assert!(checkout.path().join(TESTING_FILE).exists());
    }

    #[test]
    fn expect_label_reports_observed_labels() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new().reply(
            "gh issue create",
            CommandOutput::ok("https://github.com/org/repo/issues/8"),
        ));
        let harness = harness(dir.path(), runner.clone());
        let checkout = checkout_in(&dir);

        let issue = harness.open_issue(&checkout, &IssueSpec::new("Test issue", "body")).unwrap();
        // Label queries get empty output, which never parses.
        let err = issue.expect_label("triage").unwrap_err();
        assert!(err.to_string().starts_with("issue #8: expected label 'triage'"));
        drop(issue);

        assert_eq!(runner.call_lines().last().unwrap(), "gh issue close 8");
    }

    #[test]
    fn explicit_close_is_not_repeated_on_drop() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new().reply(
            "gh issue create",
            CommandOutput::ok("https://github.com/org/repo/issues/2"),
        ));
        let harness = harness(dir.path(), runner.clone());
        let checkout = checkout_in(&dir);

        let mut issue = harness.open_issue(&checkout, &IssueSpec::new("t", "b")).unwrap();
        assert!(issue.close());
        drop(issue);

        let closes = runner.call_lines().iter().filter(|l| l.starts_with("gh issue close")).count();
        assert_eq!(closes, 1);
    }

    #[test]
    fn failed_pr_creation_deletes_the_pushed_branch() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(
            ScriptedRunner::new()
                .reply("git branch --show-current", CommandOutput::ok("test-release-x\n"))
                .reply(
                    "gh pr create",
                    CommandOutput::failed(1, "GraphQL: Head sha can't be blank"),
                ),
        );
        let harness = harness(dir.path(), runner.clone());
        let checkout = checkout_in(&dir);

        let result = harness.open_pull_request(
            &checkout,
            &Change::testing_section("Test Release", "Test Release Labels"),
            &PullRequestSpec::new("Release labels", "body"),
        );

        assert!(matches!(result, Err(Error::CommandFailed { .. })), "{:?}", result.err());
        let lines = runner.call_lines();
        let last = lines.last().unwrap();
        assert!(last.starts_with("git push origin --delete test-release-"), "{}", last);
        assert!(lines.iter().all(|l| !l.starts_with("gh pr close")));
    }

    #[test]
    fn comment_absence_requires_a_successful_query() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(
            ScriptedRunner::new()
                .reply("gh pr create", CommandOutput::ok("https://github.com/org/repo/pull/40\n"))
                .reply("gh pr view 40", CommandOutput::failed(1, "HTTP 502"))
                .reply("gh pr view 40", CommandOutput::failed(1, "HTTP 502"))
                .reply("gh pr view 40", CommandOutput::failed(1, "HTTP 502")),
        );
        let harness = harness(dir.path(), runner.clone());
        let checkout = checkout_in(&dir);
        let pr = harness
            .open_pull_request(
                &checkout,
                &Change::testing_section("Test Feature", "Test Feature Branch"),
                &PullRequestSpec::new("Feature branch", "body"),
            )
            .unwrap();

        // Every query fails, either with the 502 or on the empty default output.
        assert!(!pr.wait_for_comment_absent("needs_feature_branch"));
        let err = pr.expect_comment_absent("needs_feature_branch").unwrap_err();
        assert!(err.to_string().contains("no comment containing"), "{}", err);
    }

    #[test]
    fn comment_absence_is_seen_when_the_query_succeeds() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(
            ScriptedRunner::new()
                .reply("gh pr create", CommandOutput::ok("https://github.com/org/repo/pull/41\n"))
                .reply("gh pr view 41", CommandOutput::failed(1, "HTTP 502"))
                .reply(
                    "gh pr view 41",
                    CommandOutput::ok(r#"{"comments":[{"body":"Thanks for the PR"}]}"#),
                ),
        );
        let harness = harness(dir.path(), runner.clone());
        let checkout = checkout_in(&dir);
        let pr = harness
            .open_pull_request(
                &checkout,
                &Change::testing_section("Test Feature", "Test Feature Branch"),
                &PullRequestSpec::new("Feature branch", "body"),
            )
            .unwrap();

        assert!(pr.wait_for_comment_absent("needs_feature_branch"));
    }

    #[test]
    fn configured_poll_follows_timeout_settings() {
        let dir = TempDir::new().unwrap();
        let mut config = TestingConfig::new(RepositoryConfig::primary("org", "repo"));
        config.cache_dir = dir.path().to_path_buf();
        config.test_timeout = Duration::from_secs(420);
        config.poll_interval = Duration::from_secs(15);
        let harness = Harness::with_runner(config, Arc::new(ScriptedRunner::new())).unwrap();

        assert_eq!(harness.configured_poll(), PollSettings::secs(420, 15));
        assert_eq!(harness.poll, PollSettings::default());
    }

    #[test]
    fn working_dir_reaches_the_self_reference_guard() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new().reply(
            "git remote get-url origin",
            CommandOutput::ok("https://github.com/org/repo.git"),
        ));
        let harness = harness(dir.path(), runner.clone()).with_working_dir("/srv/keeper-checkout");

        let err = harness.checkout("work").unwrap_err();

        assert!(matches!(err, Error::SelfReferentialRepository(_)));
        assert_eq!(
            runner.calls()[0].cwd.as_deref(),
            Some(Path::new("/srv/keeper-checkout"))
        );
    }
}
