//! Repository references inside keeper workflow files.
//!
//! Keeper workflows guard their jobs with `github.repository == 'owner/repo'`
//! and carry a `# Source: https://github.com/owner/repo` comment. When the
//! harness targets another repository those references have to match it.

use std::path::{Path, PathBuf};

use crate::config::RepositoryConfig;
use crate::error::Result;

const CONDITION_PREFIX: &str = "github.repository == ";
const SOURCE_PREFIX: &str = "# Source: https://github.com/";

/// Returns the workflow condition that restricts a job to `repo`.
pub fn repository_check(repo: &RepositoryConfig) -> String {
    format!("github.repository == '{}'", repo.full_name())
}

/// Lists `keeper-*.yml` files in `dir`, sorted by name.
pub fn list_keeper_workflows(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_keeper = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("keeper-") && n.ends_with(".yml"));
        if is_keeper && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// A repository reference found in a workflow file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// `github.repository == '...'` condition.
    Condition(String),
    /// `# Source: https://github.com/...` comment.
    Source(String),
}

/// Finds every repository reference in `content`, in order of appearance.
pub fn find_references(content: &str) -> Vec<Reference> {
    let mut refs = Vec::new();
    for line in content.lines() {
        let mut rest = line;
        while let Some(index) = rest.find(CONDITION_PREFIX) {
            rest = &rest[index + CONDITION_PREFIX.len()..];
            if let Some((value, tail)) = quoted(rest) {
                refs.push(Reference::Condition(value.to_string()));
                rest = tail;
            }
        }

        if let Some(index) = line.find(SOURCE_PREFIX) {
            let url_path = &line[index + SOURCE_PREFIX.len()..];
            let url_path = url_path.split_whitespace().next().unwrap_or("");
            let url_path = url_path.trim_end_matches('/');
            if let Some((owner, repo)) = url_path.split_once('/') {
                if !owner.is_empty() && !repo.is_empty() {
                    refs.push(Reference::Source(format!("{}/{}", owner, repo)));
                }
            }
        }
    }
    refs
}

/// Splits a leading `'value'` or `"value"` off `text`.
fn quoted(text: &str) -> Option<(&str, &str)> {
    let quote = text.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    let body = &text[1..];
    let end = body.find(|c| c == '\'' || c == '"')?;
    if end == 0 || !body[end..].starts_with(quote) {
        return None;
    }
    Some((&body[..end], &body[end + 1..]))
}

/// Checks that keeper workflows in `dir` reference `expected`.
///
/// Returns one human-readable line per problem; an empty list means all good.
pub fn validate_repository_references(dir: &Path, expected: &RepositoryConfig) -> Vec<String> {
    let expected_name = expected.full_name();

    if !dir.exists() {
        return vec![format!("Workflow directory {} does not exist", dir.display())];
    }

    let files = match list_keeper_workflows(dir) {
        Ok(files) => files,
        Err(e) => return vec![format!("Cannot list {}: {}", dir.display(), e)],
    };
    if files.is_empty() {
        return vec![format!("No keeper-*.yml workflow files found in {}", dir.display())];
    }

    let mut issues = Vec::new();
    for path in files {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                issues.push(format!("{}: Error reading file - {}", file_name, e));
                continue;
            }
        };

        for reference in find_references(&content) {
            match reference {
                Reference::Condition(found) if found != expected_name => issues.push(format!(
                    "{}: Repository condition '{}' should be '{}'",
                    file_name, found, expected_name
                )),
                Reference::Source(found) if found != expected_name => issues.push(format!(
                    "{}: Source URL references '{}' should be '{}'",
                    file_name, found, expected_name
                )),
                _ => {}
            }
        }
    }
    issues
}

/// Rewrites repository references in `content` to point at `target`.
pub fn rewrite_references(content: &str, target: &RepositoryConfig) -> String {
    let target_name = target.full_name();
    let mut out = String::with_capacity(content.len());

    for line in content.split_inclusive('\n') {
        let mut line = rewrite_conditions(line, &target_name);
        if let Some(index) = line.find(SOURCE_PREFIX) {
            let start = index + SOURCE_PREFIX.len();
            let end = line[start..]
                .find(char::is_whitespace)
                .map_or(line.len(), |offset| start + offset);
            if line[start..end].contains('/') {
                line.replace_range(start..end, &target_name);
            }
        }
        out.push_str(&line);
    }
    out
}

fn rewrite_conditions(line: &str, target_name: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(index) = rest.find(CONDITION_PREFIX) {
        let after = index + CONDITION_PREFIX.len();
        out.push_str(&rest[..after]);
        rest = &rest[after..];
        if let Some((_, tail)) = quoted(rest) {
            let quote = &rest[..1];
            out.push_str(quote);
            out.push_str(target_name);
            out.push_str(quote);
            rest = tail;
        }
    }
    out.push_str(rest);
    out
}

/// Rewrites the references in the workflow at `path` to `target`.
///
/// With `backup`, the original is first copied to `<file>.backup`. Returns
/// whether the file content changed.
pub fn update_repository_references(
    path: &Path,
    target: &RepositoryConfig,
    backup: bool,
) -> Result<bool> {
    let content = std::fs::read_to_string(path)?;

    if backup {
        let mut backup_path = path.as_os_str().to_owned();
        backup_path.push(".backup");
        std::fs::write(PathBuf::from(backup_path), &content)?;
    }

    let updated = rewrite_references(&content, target);
    if updated == content {
        return Ok(false);
    }

    std::fs::write(path, updated)?;
    tracing::info!(
        path = %path.display(),
        repo = %target.full_name(),
        "updated workflow repository references"
    );
    Ok(true)
}
