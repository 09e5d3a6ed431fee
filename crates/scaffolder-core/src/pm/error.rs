use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PmError {
    #[error(
        "`{command}` exited with status {}: {stderr}",
        code.map_or_else(|| "unknown".to_string(), |c| c.to_string())
    )]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("`{command}` timed out after {}s", timeout.as_secs())]
    Timeout { command: String, timeout: Duration },

    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unknown package manager: {0}")]
    UnknownManager(String),

    #[error("Installation failed for {target} ({}): {source}", path.display())]
    InstallFailed {
        target: String,
        path: PathBuf,
        #[source]
        source: Box<PmError>,
    },

    #[error("No fallback package manager available (original error: {original})")]
    FallbackExhausted { original: String },

    #[error("All optimization fallbacks exhausted for {manager}")]
    OptimizationsExhausted { manager: String },

    #[error("IO error at '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, PmError>;
