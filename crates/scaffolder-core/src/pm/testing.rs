//! Scripted command runner used by the engine's unit tests

use super::error::{PmError, Result};
use super::runner::{CommandOutput, CommandRunner, CommandSpec};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Response {
    Succeed(String),
    Fail(String),
}

/// Answers commands by their display string; unknown commands fail to spawn
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    responses: HashMap<String, Response>,
    calls: RefCell<Vec<CommandSpec>>,
    search_dirs: RefCell<Vec<PathBuf>>,
    elapsed: Duration,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn succeed(mut self, command: &str, stdout: &str) -> Self {
        self.responses
            .insert(command.to_string(), Response::Succeed(stdout.to_string()));
        self
    }

    pub fn fail(mut self, command: &str, stderr: &str) -> Self {
        self.responses
            .insert(command.to_string(), Response::Fail(stderr.to_string()));
        self
    }

    /// Report this wall time for every successful command
    pub fn elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    /// Display strings of every command run, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().iter().map(CommandSpec::display).collect()
    }

    pub fn specs(&self) -> Vec<CommandSpec> {
        self.calls.borrow().clone()
    }

    pub fn registered_dirs(&self) -> Vec<PathBuf> {
        self.search_dirs.borrow().clone()
    }
}

impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls.borrow_mut().push(spec.clone());
        let command = spec.display();
        match self.responses.get(&command) {
            Some(Response::Succeed(stdout)) => Ok(CommandOutput {
                stdout: stdout.clone(),
                stderr: String::new(),
                duration: self.elapsed,
            }),
            Some(Response::Fail(stderr)) => Err(PmError::CommandFailed {
                command,
                code: Some(1),
                stderr: stderr.clone(),
            }),
            None => Err(PmError::Spawn {
                command,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not scripted"),
            }),
        }
    }

    fn register_search_dir(&self, dir: &Path) {
        self.search_dirs.borrow_mut().push(dir.to_path_buf());
    }
}
