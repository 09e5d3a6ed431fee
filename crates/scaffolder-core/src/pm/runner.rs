//! Subprocess execution behind a small trait so the engine can be driven by
//! real package managers or by scripted fakes in tests.

use super::error::{PmError, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;
use tracing::debug;

/// A command line to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// `None` waits for natural termination (git)
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
            timeout: None,
        }
    }

    /// Build from whitespace-separated tokens, e.g. `"pnpm store path"`
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program, parts))
    }

    /// Build from an already tokenized command (first token is the program)
    pub fn from_tokens(tokens: &[String]) -> Option<Self> {
        let (program, args) = tokens.split_first()?;
        Some(Self::new(program.clone(), args.iter().cloned()))
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    /// The command as the user would type it
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured output of a successful command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

/// Executes external commands.
///
/// Implementations reject on spawn failure, timeout, and non-zero exit.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Make executables in `dir` resolvable for subsequent commands
    fn register_search_dir(&self, _dir: &Path) {}
}

/// Runs commands on the host with tokio
#[derive(Debug, Default)]
pub struct SystemRunner {
    search_dirs: Mutex<Vec<PathBuf>>,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directories registered on top of the inherited PATH
    pub fn search_dirs(&self) -> Vec<PathBuf> {
        self.search_dirs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn path_env(&self) -> Option<OsString> {
        let dirs = self.search_dirs();
        if dirs.is_empty() {
            return None;
        }
        let inherited = std::env::var_os("PATH").unwrap_or_default();
        std::env::join_paths(dirs.into_iter().chain(std::env::split_paths(&inherited))).ok()
    }

    fn build_command(spec: &CommandSpec) -> TokioCommand {
        // npm, yarn and pnpm are .cmd shims on Windows
        if cfg!(windows) {
            let mut cmd = TokioCommand::new("cmd");
            cmd.arg("/C").arg(&spec.program).args(&spec.args);
            cmd
        } else {
            let mut cmd = TokioCommand::new(&spec.program);
            cmd.args(&spec.args);
            cmd
        }
    }
}

impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let command = spec.display();
        debug!(%command, cwd = ?spec.cwd, "running command");

        let mut cmd = Self::build_command(spec);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        if let Some(path) = self.path_env() {
            cmd.env("PATH", path);
        }

        let started = Instant::now();
        let output = match spec.timeout {
            Some(limit) => match timeout(limit, cmd.output()).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(PmError::Timeout {
                        command,
                        timeout: limit,
                    })
                }
            },
            None => cmd.output().await,
        }
        .map_err(|source| PmError::Spawn {
            command: command.clone(),
            source,
        })?;
        let duration = started.elapsed();

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            let detail = if stderr.trim().is_empty() {
                stdout.trim()
            } else {
                stderr.trim()
            };
            return Err(PmError::CommandFailed {
                command,
                code: output.status.code(),
                stderr: detail.to_string(),
            });
        }

        debug!(%command, elapsed_ms = duration.as_millis() as u64, "command finished");
        Ok(CommandOutput {
            stdout,
            stderr,
            duration,
        })
    }

    fn register_search_dir(&self, dir: &Path) {
        let mut dirs = self
            .search_dirs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !dirs.iter().any(|d| d == dir) {
            debug!(dir = %dir.display(), "registering search directory");
            dirs.push(dir.to_path_buf());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_splits_program_and_args() {
        let spec = CommandSpec::parse("pnpm store path").unwrap();
        assert_eq!(spec.program, "pnpm");
        assert_eq!(spec.args, vec!["store", "path"]);
        assert_eq!(spec.display(), "pnpm store path");
    }

    #[test]
    fn test_parse_empty_line() {
        assert!(CommandSpec::parse("   ").is_none());
        assert!(CommandSpec::from_tokens(&[]).is_none());
    }

    #[test]
    fn test_register_search_dir_deduplicates() {
        let runner = SystemRunner::new();
        runner.register_search_dir(Path::new("/opt/bun/bin"));
        runner.register_search_dir(Path::new("/opt/bun/bin"));
        assert_eq!(runner.search_dirs(), vec![PathBuf::from("/opt/bun/bin")]);
        assert!(runner.path_env().is_some());
    }

    #[test]
    fn test_no_path_override_without_registered_dirs() {
        let runner = SystemRunner::new();
        assert!(runner.path_env().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_an_error() {
        let runner = SystemRunner::new();
        let spec = CommandSpec::new("sh", ["-c", "echo boom >&2; exit 3"]);
        match runner.run(&spec).await {
            Err(PmError::CommandFailed { code, stderr, .. }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_is_reported() {
        let runner = SystemRunner::new();
        let spec = CommandSpec::new("sleep", ["5"]).timeout(Duration::from_millis(50));
        assert!(matches!(
            runner.run(&spec).await,
            Err(PmError::Timeout { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_stdout() {
        let runner = SystemRunner::new();
        let spec = CommandSpec::new("sh", ["-c", "echo 1.2.3"]);
        let output = runner.run(&spec).await.unwrap();
        assert_eq!(output.stdout.trim(), "1.2.3");
    }
}
