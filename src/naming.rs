//! Collision-free names for branches, checkouts and repositories.
//!
//! Parallel workers share one remote repository, so everything a test creates
//! there is named `{prefix}-{unix_secs}-{thread}-{pid}-{random}`.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_THREAD_NUMBER: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_NUMBER: Cell<u64> = const { Cell::new(0) };
}

/// Returns a small number identifying the calling thread within this process.
pub fn thread_number() -> u64 {
    THREAD_NUMBER.with(|n| {
        if n.get() == 0 {
            n.set(NEXT_THREAD_NUMBER.fetch_add(1, Ordering::Relaxed));
        }
        n.get()
    })
}

/// Generates a unique name for parallel test execution.
///
/// Format: `{prefix}-{timestamp}-{thread}-{pid}-{random}` where `random` is
/// eight hex characters from a v4 UUID.
pub fn unique_name(prefix: &str) -> String {
    let timestamp = chrono::Utc::now().timestamp();
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}-{}-{}-{}",
        prefix,
        timestamp,
        thread_number(),
        std::process::id(),
        &random[..8]
    )
}

/// Lowercases `text` and replaces anything that is not alphanumeric with `-`.
pub fn sanitize(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn unique_name_has_four_parts_after_prefix() {
        let name = unique_name("test-branch");
        let rest = name.strip_prefix("test-branch-").unwrap();
        let parts: Vec<&str> = rest.split('-').collect();

        assert_eq!(parts.len(), 4);
        assert!(parts[0].parse::<i64>().is_ok());
        assert!(parts[1].parse::<u64>().is_ok());
        assert_eq!(parts[2], std::process::id().to_string());
        assert_eq!(parts[3].len(), 8);
    }

    #[test]
    fn repeated_calls_do_not_collide() {
        let names: HashSet<String> = (0..1000).map(|_| unique_name("repo")).collect();
        assert_eq!(names.len(), 1000);
    }

    #[test]
    fn threads_get_distinct_numbers_and_names() {
        let handles: Vec<_> = (0..8)
            .map(|_| thread::spawn(|| (thread_number(), unique_name("pr"))))
            .collect();

        let results: Vec<(u64, String)> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let numbers: HashSet<u64> = results.iter().map(|(n, _)| *n).collect();
        let names: HashSet<&String> = results.iter().map(|(_, name)| name).collect();

        assert_eq!(numbers.len(), 8);
        assert_eq!(names.len(), 8);
    }

    #[test]
    fn thread_number_is_stable_within_a_thread() {
        assert_eq!(thread_number(), thread_number());
    }

    #[test]
    fn sanitize_replaces_punctuation() {
        assert_eq!(sanitize("Test WIP_Title!"), "test-wip-title-");
    }
}
