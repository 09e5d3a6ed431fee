//! Template manifest types and parsing

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const MANIFEST_FILE: &str = "template.yaml";

/// A directory that gets its own dependency install
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallPath {
    /// Logical name, `root` for the project root
    pub name: String,

    /// Path relative to the project root
    #[serde(default = "default_install_path")]
    pub path: String,
}

fn default_install_path() -> String {
    ".".to_string()
}

/// A template file written under a different name in the project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rename {
    /// Source path relative to the template directory
    pub source: String,

    /// Destination path in the project (defaults to source if not specified)
    #[serde(default)]
    pub dest: Option<String>,
}

impl Rename {
    pub fn destination(&self) -> &str {
        self.dest.as_deref().unwrap_or(&self.source)
    }
}

/// Per-template manifest (templates/<name>/template.yaml)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateManifest {
    /// Display name of the template
    pub name: String,

    /// Description of what the template provides
    pub description: String,

    /// `typescript` or `javascript`
    pub language: String,

    /// Directories to install, root first
    #[serde(default)]
    pub install_paths: Vec<InstallPath>,

    #[serde(default)]
    pub renames: Vec<Rename>,

    /// Paths only kept when client and server run concurrently from the root
    #[serde(default)]
    pub root_only_when_concurrent: Vec<String>,

    /// Example route files, kept only when the user asks for them
    #[serde(default)]
    pub helper_routes: Vec<String>,
}

impl TemplateManifest {
    pub fn load(template_dir: &Path) -> Result<Self> {
        let path = template_dir.join(MANIFEST_FILE);
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Project-relative destination for a template-relative path
    pub fn destination_for<'a>(&'a self, relative: &'a str) -> &'a str {
        self.renames
            .iter()
            .find(|r| r.source == relative)
            .map_or(relative, Rename::destination)
    }

    pub fn is_root_only(&self, relative: &str) -> bool {
        matches_prefix(relative, &self.root_only_when_concurrent)
    }

    pub fn is_helper_route(&self, relative: &str) -> bool {
        matches_prefix(relative, &self.helper_routes)
    }
}

/// Exact match, or `relative` lies under one of the listed directories
fn matches_prefix(relative: &str, entries: &[String]) -> bool {
    entries.iter().any(|entry| {
        let entry = entry.trim_end_matches('/');
        relative == entry
            || relative
                .strip_prefix(entry)
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
name: TypeScript
description: React client and Express server
language: typescript
install_paths:
  - name: root
  - name: client
    path: client
renames:
  - source: _gitignore
    dest: .gitignore
  - source: client/_gitignore
    dest: client/.gitignore
root_only_when_concurrent:
  - package.json
helper_routes:
  - server/src/routes/
"#;

    #[test]
    fn test_parse_manifest() {
        let manifest: TemplateManifest = serde_yaml::from_str(MANIFEST).unwrap();
        assert_eq!(manifest.language, "typescript");
        assert_eq!(manifest.install_paths[0].path, ".");
        assert_eq!(manifest.install_paths[1].path, "client");
    }

    #[test]
    fn test_destination_applies_renames() {
        let manifest: TemplateManifest = serde_yaml::from_str(MANIFEST).unwrap();
        assert_eq!(manifest.destination_for("_gitignore"), ".gitignore");
        assert_eq!(manifest.destination_for("client/_gitignore"), "client/.gitignore");
        assert_eq!(manifest.destination_for("client/index.html"), "client/index.html");
    }

    #[test]
    fn test_prefix_matching() {
        let manifest: TemplateManifest = serde_yaml::from_str(MANIFEST).unwrap();
        assert!(manifest.is_root_only("package.json"));
        assert!(!manifest.is_root_only("client/package.json"));
        assert!(manifest.is_helper_route("server/src/routes/health.ts"));
        assert!(!manifest.is_helper_route("server/src/routes-extra.ts"));
    }
}
