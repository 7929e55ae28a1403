//! Keeper Harness - end-to-end test harness for keeper GitHub Actions workflows
//!
//! This library drives the `gh` and `git` CLIs against an external test
//! repository, opens pull requests and issues shaped to trigger the keeper
//! labeling workflows, and polls GitHub until the expected labels and comments
//! appear or a timeout elapses.

pub mod command;
pub mod config;
pub mod error;
pub mod git;
pub mod github;
pub mod labels;
pub mod naming;
pub mod poll;
pub mod repo;
pub mod scenario;
pub mod session;
pub mod workflows;

pub use command::{CommandOutput, CommandRunner, Invocation, SystemRunner};
pub use config::{parse_github_remote, ConfigLoader, RepositoryConfig, TestingConfig};
pub use error::{Error, Result};
pub use git::Git;
pub use github::{Comment, GitHubClient, RepoAccess};
pub use labels::{LabelCatalog, LabelSpec};
pub use naming::unique_name;
pub use poll::{poll_until, try_poll_until, PollSettings};
pub use repo::{Baseline, LocalCheckout, RepoManager};
pub use scenario::{
    describe, yaml_block, Change, Harness, IssueGuard, IssueSpec, PullRequestGuard,
    PullRequestSpec,
};
pub use session::{InitOutcome, SessionCoordinator};
