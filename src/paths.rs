use std::path::{Path, PathBuf};

/// Resolve the repository root for a working directory.
///
/// Walks upward looking for a `.git` entry (directory or worktree file).
/// When none is found the start directory itself is used, since version
/// control is optional for a supervised run.
pub fn resolve_repo_root(start: &Path) -> PathBuf {
    let mut dir = start.to_path_buf();
    loop {
        if dir.join(".git").exists() {
            return dir;
        }
        if !dir.pop() {
            return start.to_path_buf();
        }
    }
}

/// Anchor a configured path at the repository root unless it is absolute.
pub fn resolve_under(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// `<generated-dir>/logs/<run-id>.jsonl`
pub fn execution_log_path(generated_dir: &Path, run_id: &str) -> PathBuf {
    generated_dir.join("logs").join(format!("{run_id}.jsonl"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_enclosing_repository() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join(".git")).unwrap();
        let nested = tmp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(resolve_repo_root(&nested), tmp.path());
    }

    #[test]
    fn falls_back_to_start_outside_repository() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("plain");
        std::fs::create_dir_all(&nested).unwrap();

        let root = resolve_repo_root(&nested);
        if !root.join(".git").exists() {
            assert_eq!(root, nested);
        }
    }

    #[test]
    fn relative_paths_anchor_at_root() {
        let root = Path::new("/repo");
        assert_eq!(
            resolve_under(root, Path::new(".shepherd/workflow.db")),
            PathBuf::from("/repo/.shepherd/workflow.db")
        );
        assert_eq!(
            resolve_under(root, Path::new("/data/wf.db")),
            PathBuf::from("/data/wf.db")
        );
    }

    #[test]
    fn execution_log_lives_under_logs() {
        assert_eq!(
            execution_log_path(Path::new("/g"), "run-1"),
            PathBuf::from("/g/logs/run-1.jsonl")
        );
    }
}
