//! Git repository setup for a freshly created project

use crate::pm::{CommandRunner, CommandSpec, PmError};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitSetup {
    Skip,
    Init,
    InitWithRemote(String),
}

#[derive(Error, Debug)]
pub enum GitError {
    #[error("git is not installed")]
    NotInstalled,

    #[error("'{0}' is not a valid repository URL")]
    InvalidRemote(String),

    #[error("Failed to add remote origin: {0}")]
    RemoteAddFailed(String),

    #[error("{} is already a git repository", .0.display())]
    AlreadyInitialized(PathBuf),

    #[error("`{command}` failed: {message}")]
    CommandFailed { command: String, message: String },
}

impl GitError {
    /// What the user can do about it
    pub fn remediation(&self) -> String {
        match self {
            GitError::NotInstalled => {
                "Install git from https://git-scm.com, then run `git init` in the project.".to_string()
            }
            GitError::InvalidRemote(_) => {
                "Use an https://, ssh:// or git@host:owner/repo URL and run `git remote add origin <url>`."
                    .to_string()
            }
            GitError::RemoteAddFailed(_) => {
                "The repository was created locally. Add the remote with `git remote add origin <url>`."
                    .to_string()
            }
            GitError::AlreadyInitialized(_) => {
                "Existing history was left untouched. Commit the new files yourself.".to_string()
            }
            GitError::CommandFailed { message, .. }
                if message.contains("user.email") || message.contains("identity") =>
            {
                "Set your identity with `git config --global user.name` and `git config --global user.email`, then commit."
                    .to_string()
            }
            GitError::CommandFailed { command, .. } => {
                format!("Run `{}` manually in the project directory.", command)
            }
        }
    }
}

fn remote_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:(?:https?|ssh|git)://[^\s/]+/\S+|[\w.-]+@[\w.-]+:\S+)$")
            .expect("valid remote pattern")
    })
}

pub fn is_valid_remote(url: &str) -> bool {
    remote_pattern().is_match(url.trim())
}

fn command_failed(spec: &CommandSpec, error: PmError) -> GitError {
    let message = match error {
        PmError::CommandFailed { stderr, .. } => stderr,
        other => other.to_string(),
    };
    GitError::CommandFailed {
        command: spec.display(),
        message,
    }
}

async fn git<R: CommandRunner>(runner: &R, dir: &Path, args: &[&str]) -> Result<(), GitError> {
    let spec = CommandSpec::new("git", args.iter().copied()).current_dir(dir);
    debug!(command = %spec.display(), "running git");
    runner
        .run(&spec)
        .await
        .map(|_| ())
        .map_err(|e| command_failed(&spec, e))
}

/// Create a repository with an initial commit, optionally adding a remote.
///
/// git commands run without a timeout.
pub async fn initialize<R: CommandRunner>(
    runner: &R,
    dir: &Path,
    setup: &GitSetup,
) -> Result<(), GitError> {
    let remote = match setup {
        GitSetup::Skip => return Ok(()),
        GitSetup::Init => None,
        GitSetup::InitWithRemote(url) => {
            let url = url.trim();
            if !is_valid_remote(url) {
                return Err(GitError::InvalidRemote(url.to_string()));
            }
            Some(url)
        }
    };

    let probe = CommandSpec::new("git", ["--version"]);
    if let Err(e) = runner.run(&probe).await {
        debug!(error = %e, "git probe failed");
        return Err(GitError::NotInstalled);
    }

    if dir.join(".git").exists() {
        return Err(GitError::AlreadyInitialized(dir.to_path_buf()));
    }

    git(runner, dir, &["init"]).await?;
    git(runner, dir, &["add", "-A"]).await?;
    git(runner, dir, &["commit", "-m", "Initial commit"]).await?;

    if let Some(url) = remote {
        git(runner, dir, &["remote", "add", "origin", url])
            .await
            .map_err(|e| match e {
                GitError::CommandFailed { message, .. } => GitError::RemoteAddFailed(message),
                other => other,
            })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pm::testing::ScriptedRunner;

    fn git_runner() -> ScriptedRunner {
        ScriptedRunner::new()
            .succeed("git --version", "git version 2.43.0")
            .succeed("git init", "")
            .succeed("git add -A", "")
            .succeed("git commit -m Initial commit", "")
    }

    #[test]
    fn test_remote_validation() {
        assert!(is_valid_remote("https://github.com/acme/shop.git"));
        assert!(is_valid_remote("git@github.com:acme/shop.git"));
        assert!(is_valid_remote("ssh://git@host.example/acme/shop"));
        assert!(!is_valid_remote("github.com/acme"));
        assert!(!is_valid_remote("https://"));
    }

    #[tokio::test]
    async fn test_skip_runs_nothing() {
        let runner = ScriptedRunner::new();
        let dir = tempfile::tempdir().unwrap();
        initialize(&runner, dir.path(), &GitSetup::Skip).await.unwrap();
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_init_commits_without_timeout() {
        let runner = git_runner();
        let dir = tempfile::tempdir().unwrap();
        initialize(&runner, dir.path(), &GitSetup::Init).await.unwrap();

        assert_eq!(
            runner.calls(),
            vec!["git --version", "git init", "git add -A", "git commit -m Initial commit"]
        );
        assert!(runner.specs().iter().all(|s| s.timeout.is_none()));
        assert_eq!(runner.specs()[1].cwd.as_deref(), Some(dir.path()));
    }

    #[tokio::test]
    async fn test_missing_git() {
        let dir = tempfile::tempdir().unwrap();
        let err = initialize(&ScriptedRunner::new(), dir.path(), &GitSetup::Init)
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::NotInstalled));
        assert!(err.remediation().contains("git-scm.com"));
    }

    #[tokio::test]
    async fn test_invalid_remote_is_rejected_first() {
        let runner = git_runner();
        let dir = tempfile::tempdir().unwrap();
        let err = initialize(&runner, dir.path(), &GitSetup::InitWithRemote("nope".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::InvalidRemote(_)));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_existing_repository() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        let err = initialize(&git_runner(), dir.path(), &GitSetup::Init)
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::AlreadyInitialized(_)));
    }

    #[tokio::test]
    async fn test_remote_add_failure() {
        let runner = git_runner().fail(
            "git remote add origin git@github.com:acme/shop.git",
            "error: remote origin already exists.",
        );
        let dir = tempfile::tempdir().unwrap();
        let err = initialize(
            &runner,
            dir.path(),
            &GitSetup::InitWithRemote("git@github.com:acme/shop.git".to_string()),
        )
        .await
        .unwrap_err();
        match err {
            GitError::RemoteAddFailed(message) => assert!(message.contains("already exists")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_commit_without_identity() {
        let runner = git_runner().fail(
            "git commit -m Initial commit",
            "Please tell me who you are. Run git config --global user.email",
        );
        let dir = tempfile::tempdir().unwrap();
        let err = initialize(&runner, dir.path(), &GitSetup::Init).await.unwrap_err();
        assert!(err.remediation().contains("user.email"));
    }
}
