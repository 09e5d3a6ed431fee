//! Post-install verification and the user-facing install summary

use super::install::InstallTarget;
use super::metrics::InstallReport;
use super::registry::ManagerDescriptor;
use super::runner::{CommandRunner, CommandSpec};
use colored::Colorize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MANIFEST: &str = "package.json";
const DEPENDENCY_DIR: &str = "node_modules";

/// Installs slower than this get a recommendation
const SLOW_INSTALL: Duration = Duration::from_secs(60);
const LOW_CACHE_HIT_RATE: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Also ask the manager to list top-level dependencies
    pub probe_listing: bool,
    pub timeout: Duration,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            probe_listing: false,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSummary {
    pub name: String,
    pub path: PathBuf,
    pub has_manifest: bool,
    pub has_lockfile: bool,
    pub dependency_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct VerificationResult {
    pub success: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub paths: Vec<PathSummary>,
}

fn count_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(|e| e.ok()).count())
        .unwrap_or(0)
}

/// Check every target. Problems are reported, never raised.
pub async fn verify_installation<R: CommandRunner>(
    runner: &R,
    manager: &ManagerDescriptor,
    targets: &[InstallTarget],
    options: &VerifyOptions,
) -> VerificationResult {
    let mut result = VerificationResult::default();

    for target in targets {
        let label = format!("{} ({})", target.name, target.path.display());
        let has_manifest = target.path.join(MANIFEST).is_file();
        let has_lockfile = target.path.join(manager.lockfile).is_file();
        let dependency_count = count_entries(&target.path.join(DEPENDENCY_DIR));

        if !has_manifest {
            result.errors.push(format!("{}: missing {}", label, MANIFEST));
        }
        if !has_lockfile {
            result
                .warnings
                .push(format!("{}: no {} found", label, manager.lockfile));
        }
        if dependency_count == 0 {
            result
                .errors
                .push(format!("{}: {} is missing or empty", label, DEPENDENCY_DIR));
        }

        if options.probe_listing && has_manifest {
            if let Some(spec) = CommandSpec::parse(manager.list) {
                let spec = spec.current_dir(&target.path).timeout(options.timeout);
                if let Err(e) = runner.run(&spec).await {
                    result
                        .warnings
                        .push(format!("{}: `{}` failed: {}", label, manager.list, e));
                }
            }
        }

        result.paths.push(PathSummary {
            name: target.name.clone(),
            path: target.path.clone(),
            has_manifest,
            has_lockfile,
            dependency_count,
        });
    }

    result.success = result.errors.is_empty();
    result
}

/// Install outcome plus recommendations, ready to show the user
#[derive(Debug, Clone)]
pub struct InstallationSummary {
    pub manager: String,
    pub success: bool,
    pub duration: Duration,
    pub packages_installed: u32,
    pub retries: u32,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

pub fn generate_report(
    report: &InstallReport,
    verification: &VerificationResult,
    manager: &ManagerDescriptor,
) -> InstallationSummary {
    let mut recommendations = Vec::new();

    if report.total_duration > SLOW_INSTALL {
        recommendations.push(format!(
            "Installation took {}s. Commit {} and prefer a faster manager such as pnpm or bun.",
            report.total_duration.as_secs(),
            manager.lockfile
        ));
    }
    if let Some(rate) = report.cache_hit_rate {
        if rate < LOW_CACHE_HIT_RATE {
            recommendations.push(format!(
                "Only {:.0}% of packages came from the cache. Later installs will be faster once it is warm.",
                rate * 100.0
            ));
        }
    }
    if report.retries > 0 {
        recommendations.push(format!(
            "Installation needed {} retr{}. Your {} version may not support every optimization flag; consider upgrading it.",
            report.retries,
            if report.retries == 1 { "y" } else { "ies" },
            manager.label
        ));
    }
    if !verification.success {
        recommendations.push(format!(
            "Verification failed. Run `{}` again in the affected directories.",
            manager.install
        ));
    }
    if !verification.warnings.is_empty() {
        recommendations.push(format!(
            "Review the {} verification warning(s) above.",
            verification.warnings.len()
        ));
    }
    if !verification.paths.iter().any(|p| p.has_lockfile) {
        recommendations.push(format!(
            "No {} was created. Commit a lockfile for reproducible installs.",
            manager.lockfile
        ));
    }

    InstallationSummary {
        manager: manager.name.to_string(),
        success: report.success && verification.success,
        duration: report.total_duration,
        packages_installed: report.packages_installed,
        retries: report.retries,
        errors: verification.errors.clone(),
        warnings: verification.warnings.clone(),
        recommendations,
    }
}

impl fmt::Display for InstallationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.success {
            "installed".green()
        } else {
            "failed".red()
        };
        writeln!(
            f,
            "{} {} in {:.1}s",
            self.manager.bold(),
            status,
            self.duration.as_secs_f64()
        )?;
        if self.packages_installed > 0 {
            writeln!(f, "  {} packages", self.packages_installed)?;
        }
        for error in &self.errors {
            writeln!(f, "  {} {}", "error:".red(), error)?;
        }
        for warning in &self.warnings {
            writeln!(f, "  {} {}", "warning:".yellow(), warning)?;
        }
        for recommendation in &self.recommendations {
            writeln!(f, "  {} {}", "->".blue(), recommendation)?;
        }
        Ok(())
    }
}
