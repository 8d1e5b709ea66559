use crate::error::{Error, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::Command;

pub fn normalize_rel_path(repo_root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(repo_root).ok()?;
    Some(normalize_path(rel))
}

pub fn normalize_path(path: &Path) -> String {
    let mut parts = Vec::new();
    for comp in path.components() {
        match comp {
            Component::Normal(os) => parts.push(os.to_string_lossy().to_string()),
            Component::ParentDir => parts.push("..".to_string()),
            Component::CurDir => {}
            _ => {}
        }
    }
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

/// Canonicalize a repository root, rejecting anything that is not a readable directory.
pub fn canonical_repo_root(repo_root: &Path) -> Result<PathBuf> {
    let root = fs::canonicalize(repo_root).map_err(|err| Error::RepoRoot {
        path: repo_root.to_path_buf(),
        reason: err.to_string(),
    })?;
    if !root.is_dir() {
        return Err(Error::RepoRoot {
            path: repo_root.to_path_buf(),
            reason: "not a directory".to_string(),
        });
    }
    fs::read_dir(&root).map_err(|err| Error::RepoRoot {
        path: repo_root.to_path_buf(),
        reason: err.to_string(),
    })?;
    Ok(root)
}

pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

pub fn git_head_sha(repo_root: &Path) -> Option<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(repo_root)
        .arg("rev-parse")
        .arg("HEAD")
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let sha = String::from_utf8_lossy(&output.stdout);
    let trimmed = sha.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_relative_paths() {
        let root = Path::new("/repo");
        assert_eq!(
            normalize_rel_path(root, Path::new("/repo/pkg/./mod.py")).as_deref(),
            Some("pkg/mod.py")
        );
        assert_eq!(normalize_rel_path(root, Path::new("/elsewhere/x.py")), None);
        assert_eq!(normalize_path(Path::new("")), ".");
    }

    #[test]
    fn rejects_missing_root() {
        let err = canonical_repo_root(Path::new("/definitely/not/here/ttmm")).unwrap_err();
        assert!(matches!(err, Error::RepoRoot { .. }));
    }
}
