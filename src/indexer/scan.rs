use crate::error::Result;
use crate::model::IndexWarning;
use blake3::Hasher;
use ignore::WalkBuilder;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub hash: String,
    pub size: i64,
}

/// Files found by a scan, plus the ones that could not be read.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub files: Vec<ScannedFile>,
    pub skipped: Vec<IndexWarning>,
}

/// Directory names never descended into, even without an ignore file.
const SKIPPED_DIRS: &[&str] = &[
    ".git",
    ".ttmm",
    "__pycache__",
    ".venv",
    "venv",
    "node_modules",
    ".tox",
];

/// Every `*.py` file under `repo_root`, sorted by repository-relative path.
/// A file that cannot be stat'ed or read is skipped with a warning.
pub fn scan_repo(repo_root: &Path) -> Result<ScanOutcome> {
    let mut outcome = ScanOutcome::default();
    let walker = WalkBuilder::new(repo_root)
        .ignore(true)
        .git_ignore(true)
        .git_global(false)
        .git_exclude(true)
        .parents(false)
        .require_git(false)
        .hidden(false)
        .filter_entry(|entry| !is_skipped_entry(entry))
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!("walk error: {err}");
                continue;
            }
        };
        if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }
        let path = entry.path();
        if !is_python_path(path) {
            continue;
        }
        let Some(rel_path) = crate::util::normalize_rel_path(repo_root, path) else {
            continue;
        };
        match stat_and_hash(path) {
            Ok((size, hash)) => outcome.files.push(ScannedFile {
                rel_path,
                abs_path: path.to_path_buf(),
                hash,
                size,
            }),
            Err(err) => {
                tracing::warn!("skipping {rel_path}: {err}");
                outcome.skipped.push(IndexWarning {
                    path: rel_path,
                    message: format!("skipped unreadable file: {err}"),
                });
            }
        }
    }
    outcome.files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    outcome.skipped.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(outcome)
}

fn stat_and_hash(path: &Path) -> Result<(i64, String)> {
    let size = fs::metadata(path)?.len() as i64;
    Ok((size, hash_file(path)?))
}

fn is_skipped_entry(entry: &ignore::DirEntry) -> bool {
    let is_dir = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
    is_dir
        && SKIPPED_DIRS
            .iter()
            .any(|name| entry.file_name() == OsStr::new(name))
}

pub fn is_python_path(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("py")
}

pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize().to_hex().to_string()
}

fn hash_file(path: &Path) -> Result<String> {
    let data = fs::read(path)?;
    Ok(hash_bytes(&data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_python_files_and_skips_tool_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("pkg")).unwrap();
        fs::create_dir_all(root.join(".venv/lib")).unwrap();
        fs::create_dir_all(root.join("pkg/__pycache__")).unwrap();
        fs::write(root.join("pkg/b.py"), "def g():\n    pass\n").unwrap();
        fs::write(root.join("a.py"), "x = 1\n").unwrap();
        fs::write(root.join("README.md"), "# readme\n").unwrap();
        fs::write(root.join(".venv/lib/site.py"), "x = 2\n").unwrap();
        fs::write(root.join("pkg/__pycache__/b.py"), "x = 3\n").unwrap();

        let files = scan_repo(root).unwrap().files;
        let paths: Vec<_> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["a.py", "pkg/b.py"]);
        assert_eq!(files[0].hash, hash_bytes(b"x = 1\n"));
        assert_eq!(files[0].size, 6);
    }

    #[test]
    fn respects_gitignore() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join(".gitignore"), "build/\n").unwrap();
        fs::create_dir_all(root.join("build")).unwrap();
        fs::write(root.join("build/gen.py"), "x = 1\n").unwrap();
        fs::write(root.join("main.py"), "x = 1\n").unwrap();

        let files = scan_repo(root).unwrap().files;
        let paths: Vec<_> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["main.py"]);
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_file_is_skipped_not_fatal() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("a.py"), "x = 1\n").unwrap();
        fs::write(root.join("locked.py"), "x = 2\n").unwrap();
        let locked = root.join("locked.py");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::read(&locked).is_ok() {
            eprintln!("skipping: permissions are not enforced for this user");
            return;
        }

        let outcome = scan_repo(root).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();
        let paths: Vec<_> = outcome.files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["a.py"]);
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].path, "locked.py");
    }
}
