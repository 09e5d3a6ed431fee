//! Scaffolder Core - Shared library for the create-stack CLIs
//!
//! This library provides the core functionality for creating a client/server
//! JavaScript project from a local template and installing its dependencies
//! with whichever package manager the host has.
//!
//! # Architecture
//!
//! The library is organized into layers:
//!
//! - **Layer 1: Package manager engine** (`pm`) - Registry, detection, preferences,
//!   installation with tiered retry, fallback between managers, verification
//! - **Layer 2: Project operations** (`project`, `git`) - Template copying, install
//!   targets, repository setup
//! - **Layer 3: CLI/TUI Interface** - Optional cliclack-based prompts (feature-gated)
//!
//! # Feature Flags
//!
//! - `tui` (default): Enables the cliclack-based TUI prompts module
//!
//! # Example Usage (without TUI)
//!
//! ```ignore
//! use scaffolder_core::pm::{PmSession, PreferenceStore, SystemRunner};
//! use scaffolder_core::project;
//!
//! let mut session = PmSession::new(SystemRunner::new(), PreferenceStore::default_location());
//! session.validate();
//!
//! let resolution = session.resolve_manager(&project_dir, None).await;
//! let targets = project::default_install_targets(&project_dir);
//! let outcome = session.install(resolution.manager, &targets, false).await?;
//! ```

pub mod git;
pub mod logging;
pub mod pm;
pub mod project;

#[cfg(feature = "tui")]
pub mod tui;

// Re-export main types for convenience
pub use git::{GitError, GitSetup};
pub use pm::{PmError, PmSession};
pub use project::{Language, TemplateManifest};

#[cfg(feature = "tui")]
pub use tui::run;
