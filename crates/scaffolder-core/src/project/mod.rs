//! Project creation from a local template tree
//!
//! This module provides:
//! - Project name and npm scope validation
//! - Template manifest types (`TemplateManifest`)
//! - Template copying with renames and package name rewriting
//! - Install target discovery for the created project

pub mod copier;
pub mod manifest;

use crate::pm::InstallTarget;
use anyhow::{bail, Result};
use std::fmt;
use std::path::{Path, PathBuf};

pub use copier::{copy_template, CopyOptions};
pub use manifest::{InstallPath, Rename, TemplateManifest};

const MAX_NAME_LENGTH: usize = 214;
const RESERVED_NAMES: &[&str] = &["node_modules", "favicon.ico"];

/// Overrides where the templates root is looked up
pub const TEMPLATES_ENV: &str = "CREATE_STACK_TEMPLATES";

/// Install paths used when no manifest is at hand
pub const DEFAULT_INSTALL_PATHS: &[(&str, &str)] =
    &[("root", "."), ("client", "client"), ("server", "server")];

/// Supported template languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    TypeScript,
    JavaScript,
}

impl Language {
    pub const ALL: [Language; 2] = [Language::TypeScript, Language::JavaScript];

    pub fn display_name(&self) -> &'static str {
        match self {
            Language::TypeScript => "TypeScript",
            Language::JavaScript => "JavaScript",
        }
    }

    /// Template directory under the templates root
    pub fn template_dir(&self) -> &'static str {
        match self {
            Language::TypeScript => "typescript",
            Language::JavaScript => "javascript",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

fn is_url_safe(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '.' | '_' | '~')
}

/// npm package name rules for the unscoped part of a name
pub fn validate_project_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        bail!("Project name cannot be empty");
    }
    if name.trim() != name {
        bail!("Project name cannot start or end with spaces");
    }
    if name.len() > MAX_NAME_LENGTH {
        bail!("Project name cannot be longer than {} characters", MAX_NAME_LENGTH);
    }
    if name.starts_with('.') || name.starts_with('_') {
        bail!("Project name cannot start with a period or underscore");
    }
    if name.chars().any(|c| c.is_ascii_uppercase()) {
        bail!("Project name must be lowercase");
    }
    if let Some(c) = name.chars().find(|c| !is_url_safe(*c)) {
        bail!("Project name cannot contain '{}'", c);
    }
    if RESERVED_NAMES.contains(&name) {
        bail!("'{}' is a reserved name", name);
    }
    Ok(())
}

/// Normalize an optional npm scope to `@scope`; empty input means no scope
pub fn normalize_scope(scope: &str) -> Result<Option<String>> {
    let scope = scope.trim().trim_start_matches('@');
    if scope.is_empty() {
        return Ok(None);
    }
    if let Some(c) = scope.chars().find(|c| !is_url_safe(*c)) {
        bail!("Scope cannot contain '{}'", c);
    }
    Ok(Some(format!("@{}", scope)))
}

/// `<scope>/<project>[-<app>]`
pub fn package_name(scope: Option<&str>, project: &str, app: Option<&str>) -> String {
    let base = match app {
        Some(app) => format!("{}-{}", project, app),
        None => project.to_string(),
    };
    match scope {
        Some(scope) => format!("@{}/{}", scope.trim_start_matches('@'), base),
        None => base,
    }
}

fn targets_from<'a>(
    project_dir: &Path,
    paths: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Vec<InstallTarget> {
    paths
        .into_iter()
        .map(|(name, path)| {
            let dir: PathBuf = if path == "." {
                project_dir.to_path_buf()
            } else {
                project_dir.join(path)
            };
            InstallTarget::new(name, dir)
        })
        .filter(|t| t.path.join("package.json").is_file())
        .collect()
}

/// Manifest install paths that ended up with a package.json
pub fn install_targets(manifest: &TemplateManifest, project_dir: &Path) -> Vec<InstallTarget> {
    targets_from(
        project_dir,
        manifest
            .install_paths
            .iter()
            .map(|p| (p.name.as_str(), p.path.as_str())),
    )
}

/// root, client and server, as far as they exist
pub fn default_install_targets(project_dir: &Path) -> Vec<InstallTarget> {
    targets_from(project_dir, DEFAULT_INSTALL_PATHS.iter().copied())
}

/// Templates root: explicit path, `$CREATE_STACK_TEMPLATES`, next to the
/// executable, then the workspace copy
pub fn locate_templates(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        if !dir.is_dir() {
            bail!("Template directory not found: {}", dir.display());
        }
        return Ok(dir.to_path_buf());
    }

    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(dir) = std::env::var_os(TEMPLATES_ENV) {
        candidates.push(PathBuf::from(dir));
    }
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        candidates.push(exe_dir.join("templates"));
        candidates.push(exe_dir.join("../share/create-stack/templates"));
    }
    candidates.push(Path::new(env!("CARGO_MANIFEST_DIR")).join("../../templates"));

    match candidates.into_iter().find(|dir| dir.is_dir()) {
        Some(dir) => Ok(dir),
        None => bail!(
            "No templates found. Pass --template-dir or set {}.",
            TEMPLATES_ENV
        ),
    }
}
