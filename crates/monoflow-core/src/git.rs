//! Resolving the ref a pipeline runs at, and the paths changed since a base.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("could not launch git: {0}")]
    Launch(#[from] std::io::Error),

    #[error("`git {command}` exited unsuccessfully: {stderr}")]
    Command { command: String, stderr: String },

    #[error("`git {command}` printed nothing")]
    EmptyOutput { command: String },
}

/// Stdout of `git <args>` run inside `repo_dir`.
fn git_stdout(repo_dir: &Path, args: &[&str]) -> Result<String, GitError> {
    debug!(dir = %repo_dir.display(), ?args, "invoking git");
    let out = Command::new("git").args(args).current_dir(repo_dir).output()?;
    if out.status.success() {
        return Ok(String::from_utf8_lossy(&out.stdout).into_owned());
    }
    Err(GitError::Command {
        command: args.join(" "),
        stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
    })
}

/// Full SHA of `HEAD` for the repository containing `repo_dir`.
pub fn capture_head_sha(repo_dir: &Path) -> Result<String, GitError> {
    let sha = git_stdout(repo_dir, &["rev-parse", "HEAD"])?;
    match sha.trim() {
        "" => Err(GitError::EmptyOutput {
            command: "rev-parse HEAD".to_string(),
        }),
        sha => Ok(sha.to_string()),
    }
}

/// Repository-relative paths touched between the merge base of `base` and
/// `HEAD`.
pub fn changed_files(repo_dir: &Path, base: &str) -> Result<Vec<PathBuf>, GitError> {
    let range = format!("{base}...HEAD");
    let listing = git_stdout(repo_dir, &["diff", "--name-only", &range])?;
    Ok(listing
        .lines()
        .filter_map(|line| match line.trim() {
            "" => None,
            path => Some(PathBuf::from(path)),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Throwaway repository with one empty commit.
    struct Scratch(tempfile::TempDir);

    impl Scratch {
        fn new() -> Self {
            let scratch = Scratch(tempfile::tempdir().unwrap());
            scratch.git(&["init", "--quiet"]);
            scratch.git(&["config", "user.name", "monoflow"]);
            scratch.git(&["config", "user.email", "ci@monoflow.invalid"]);
            scratch.git(&["commit", "--quiet", "--allow-empty", "-m", "root"]);
            scratch
        }

        fn path(&self) -> &Path {
            self.0.path()
        }

        fn git(&self, args: &[&str]) {
            git_stdout(self.path(), args).unwrap_or_else(|e| panic!("{e}"));
        }

        fn commit_file(&self, rel: &str) {
            let file = self.path().join(rel);
            std::fs::create_dir_all(file.parent().unwrap()).unwrap();
            std::fs::write(&file, rel).unwrap();
            self.git(&["add", rel]);
            self.git(&["commit", "--quiet", "-m", rel]);
        }
    }

    #[test]
    fn head_sha_is_full_hex() {
        let repo = Scratch::new();
        let sha = capture_head_sha(repo.path()).unwrap();
        assert_eq!(sha.len(), 40);
        assert!(sha.bytes().all(|b| b.is_ascii_hexdigit()), "{sha}");
    }

    #[test]
    fn head_sha_outside_a_repository_is_a_command_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = capture_head_sha(dir.path()).unwrap_err();
        assert!(matches!(err, GitError::Command { .. }), "{err}");
    }

    #[test]
    fn changed_files_since_base() {
        let repo = Scratch::new();
        let base = capture_head_sha(repo.path()).unwrap();
        repo.commit_file("libs/core/lib.rs");
        repo.commit_file("apps/web/main.ts");

        let mut changed = changed_files(repo.path(), &base).unwrap();
        changed.sort();
        assert_eq!(
            changed,
            vec![
                PathBuf::from("apps/web/main.ts"),
                PathBuf::from("libs/core/lib.rs")
            ]
        );
        assert!(changed_files(repo.path(), "HEAD").unwrap().is_empty());
    }
}
