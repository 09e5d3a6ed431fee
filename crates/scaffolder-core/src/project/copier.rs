//! Template tree copying with renames and package name rewriting

use super::manifest::{TemplateManifest, MANIFEST_FILE};
use super::package_name;
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::Path;
use tokio::fs;
use walkdir::WalkDir;

const SKIPPED_DIRS: &[&str] = &["node_modules", ".git"];

/// What the user chose that shapes the copied tree
#[derive(Debug, Clone, Default)]
pub struct CopyOptions {
    pub project_name: String,
    pub scope: Option<String>,
    pub concurrent: bool,
    pub helper_routes: bool,
}

/// Copy the template tree into `target_dir`.
///
/// Returns the project-relative paths that were written.
pub async fn copy_template(
    template_dir: &Path,
    manifest: &TemplateManifest,
    target_dir: &Path,
    options: &CopyOptions,
) -> Result<Vec<String>> {
    fs::create_dir_all(target_dir)
        .await
        .context("Failed to create target directory")?;

    let mut copied_files = Vec::new();

    let walker = WalkDir::new(template_dir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            !(e.file_type().is_dir()
                && SKIPPED_DIRS.contains(&e.file_name().to_string_lossy().as_ref()))
        });

    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", template_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = relative_path(template_dir, entry.path())?;
        if relative == MANIFEST_FILE {
            continue;
        }
        if !options.concurrent && manifest.is_root_only(&relative) {
            continue;
        }
        if !options.helper_routes && manifest.is_helper_route(&relative) {
            continue;
        }

        let destination = manifest.destination_for(&relative).to_string();
        let target_path = target_dir.join(&destination);
        if let Some(parent) = target_path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        if entry.file_name() == "package.json" {
            let content = fs::read_to_string(entry.path())
                .await
                .with_context(|| format!("Failed to read {}", entry.path().display()))?;
            let app = app_name(&destination);
            let name = package_name(options.scope.as_deref(), &options.project_name, app);
            let rewritten = rewrite_package_name(&content, &name)
                .with_context(|| format!("Invalid package.json in template: {}", relative))?;
            fs::write(&target_path, rewritten)
                .await
                .with_context(|| format!("Failed to write file: {}", target_path.display()))?;
        } else {
            fs::copy(entry.path(), &target_path)
                .await
                .with_context(|| format!("Failed to write file: {}", target_path.display()))?;
        }

        copied_files.push(destination);
    }

    Ok(copied_files)
}

/// Template-relative path with `/` separators
fn relative_path(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .with_context(|| format!("{} is outside the template", path.display()))?;
    Ok(relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}

/// Directory holding a package.json, `None` at the root
fn app_name(destination: &str) -> Option<&str> {
    let parent = destination.rsplit_once('/')?.0;
    parent.rsplit('/').next().filter(|s| !s.is_empty())
}

/// Set the `name` field, keeping every other field and its order
pub fn rewrite_package_name(content: &str, name: &str) -> Result<String> {
    let mut package: Value = serde_json::from_str(content).context("Failed to parse package.json")?;
    let object = package
        .as_object_mut()
        .context("package.json is not a JSON object")?;
    object.insert("name".to_string(), Value::String(name.to_string()));
    Ok(serde_json::to_string_pretty(&package)? + "\n")
}
