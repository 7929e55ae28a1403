//! Error types for the keeper workflow harness.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Top-level error type for harness operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A required environment variable is missing or empty.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    /// An environment variable holds a value that cannot be used.
    #[error("invalid value for {name}: {value:?}")]
    InvalidEnvVar { name: &'static str, value: String },

    /// The target repository is the one the harness itself runs from.
    #[error(
        "cannot run tests on the same repository ({0}); set TEST_GITHUB_ORG and \
         TEST_GITHUB_REPO to an external repository"
    )]
    SelfReferentialRepository(String),

    /// Generic configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The remote repository does not exist.
    #[error("repository {0} does not exist")]
    RepositoryNotFound(String),

    /// The remote repository exists but cannot be accessed with the current credentials.
    #[error("repository {repo} is not accessible: {reason}")]
    RepositoryInaccessible { repo: String, reason: String },

    /// A git or gh subprocess exited with a non-zero status during an essential step.
    #[error("{operation} failed for {remote} (exit status {status:?}): {stderr}")]
    CommandFailed {
        operation: String,
        remote: String,
        status: Option<i32>,
        stderr: String,
    },

    /// A subprocess succeeded but printed something the harness cannot use.
    #[error("unexpected output from {operation}: {output:?}")]
    UnexpectedOutput { operation: String, output: String },

    /// A subprocess could not be started at all.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Another worker holds the initialization lock and never finished.
    #[error("timed out after {waited:?} waiting for initialization marker {}", marker.display())]
    InitializationTimeout { marker: PathBuf, waited: Duration },

    /// A scenario expectation on labels or comments did not hold.
    #[error("{subject}: expected {expectation}, observed {observed:?}")]
    ConditionNotMet {
        subject: String,
        expectation: String,
        observed: Vec<String>,
    },

    /// JSON decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML decoding error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, Error>;
