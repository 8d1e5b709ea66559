//! Git Churn Mining
//!
//! Counts, per file, how many commits touched it. The counts feed the churn
//! half of the hotspot score.
//!
//! ## Algorithm
//!
//! 1. Run `git log --name-only --relative` bounded by commit count and an
//!    optional day window, so paths come back relative to the indexed root
//! 2. Each file line under a commit header adds one to that file's count
//! 3. Merge commits are skipped; they repeat changes already counted
//!
//! `core.quotePath` is forced off so non-ASCII paths print verbatim and match
//! the scanner's relative paths.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::Path;
use std::process::Command;

/// Marker prefixed to commit header lines so they cannot collide with paths.
const HEADER_PREFIX: &str = "commit\u{1f}";

/// Per-file commit counts keyed by repository-relative path.
pub fn mine_change_counts(
    repo_root: &Path,
    max_commits: usize,
    since_days: Option<u32>,
) -> Result<HashMap<String, i64>> {
    let mut command = Command::new("git");
    command
        .arg("-c")
        .arg("core.quotePath=false")
        .arg("log")
        .arg("--name-only")
        .arg("--relative")
        .arg(format!("--format={HEADER_PREFIX}%H"))
        .arg(format!("-n{max_commits}"))
        .arg("--no-merges");
    if let Some(days) = since_days {
        command.arg(format!("--since={days} days ago"));
    }
    let output = command
        .arg("--")
        .arg(".")
        .current_dir(repo_root)
        .output()
        .map_err(|err| Error::Git(format!("failed to run git log: {err}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Git(stderr.trim().to_string()));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(count_file_changes(&stdout))
}

/// Parse `git log --name-only` output with prefixed commit headers.
///
/// Format:
/// ```text
/// commit\x1fHASH
///
/// path/a.py
/// path/b.py
/// commit\x1fHASH
/// ...
/// ```
fn count_file_changes(output: &str) -> HashMap<String, i64> {
    let mut counts: HashMap<String, i64> = HashMap::new();
    let mut in_commit = false;

    for line in output.lines() {
        let line = line.trim_end();
        if line.starts_with(HEADER_PREFIX) {
            in_commit = true;
            continue;
        }
        if line.is_empty() || !in_commit {
            continue;
        }
        *counts.entry(line.to_string()).or_insert(0) += 1;
    }

    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_each_commit_touching_a_file() {
        let output = "\
commit\u{1f}abc1234567890123456789012345678901234567

pkg/a.py
pkg/b.py
commit\u{1f}def4567890123456789012345678901234567890

pkg/a.py
";
        let counts = count_file_changes(output);
        assert_eq!(counts.get("pkg/a.py"), Some(&2));
        assert_eq!(counts.get("pkg/b.py"), Some(&1));
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn lines_before_first_header_are_ignored() {
        let counts = count_file_changes("stray.py\ncommit\u{1f}abc\n\nkept.py\n");
        assert_eq!(counts.get("stray.py"), None);
        assert_eq!(counts.get("kept.py"), Some(&1));
    }

    #[test]
    fn non_ascii_paths_are_kept_verbatim() {
        let counts = count_file_changes("commit\u{1f}abc\n\ncafé.py\nmenü/tee.py\n");
        assert_eq!(counts.get("café.py"), Some(&1));
        assert_eq!(counts.get("menü/tee.py"), Some(&1));
    }

    #[test]
    fn git_history_with_non_ascii_paths_is_unquoted() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let git = |args: &[&str]| {
            Command::new("git")
                .args(["-c", "user.name=ttmm", "-c", "user.email=ttmm@example.com"])
                .args(args)
                .current_dir(root)
                .output()
                .map(|out| out.status.success())
                .unwrap_or(false)
        };
        if !git(&["init", "-q"]) {
            eprintln!("skipping: git unavailable");
            return;
        }
        std::fs::write(root.join("café.py"), "x = 1\n").unwrap();
        assert!(git(&["add", "."]));
        assert!(git(&["commit", "-q", "-m", "one"]));
        std::fs::write(root.join("café.py"), "x = 2\n").unwrap();
        assert!(git(&["commit", "-q", "-am", "two"]));

        let counts = mine_change_counts(root, 100, None).unwrap();
        assert_eq!(counts.get("café.py"), Some(&2));
    }

    #[test]
    fn outside_a_repository_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = mine_change_counts(dir.path(), 100, None);
        assert!(matches!(result, Err(Error::Git(_))));
    }
}
