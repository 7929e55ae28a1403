//! Shared setup for the live keeper workflow scenarios.

#![allow(dead_code)]

use std::fmt::Display;
use std::sync::{Once, OnceLock};

use keeper_harness::Harness;

static TRACING: Once = Once::new();
static HARNESS: OnceLock<Harness> = OnceLock::new();

/// Routes tracing output through the test writer so `--nocapture` shows it.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("keeper_harness=info")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Harness for the configured repository, initialized once per session.
pub fn harness() -> &'static Harness {
    init_tracing();
    HARNESS.get_or_init(|| {
        let harness = ok(Harness::from_env(), "loading test configuration");
        let outcome = ok(harness.initialize_once(), "initializing test repository");
        tracing::info!(
            ?outcome,
            repo = %harness.config.primary_repo.full_name(),
            "test repository ready"
        );
        harness
    })
}

/// Unwraps `result`, panicking with the error's message rather than its debug form.
pub fn ok<T, E: Display>(result: Result<T, E>, context: &str) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("{}: {}", context, e),
    }
}
