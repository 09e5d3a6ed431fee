//! Dependency installation with tiered command fallback

use super::error::PmError;
use super::metrics::{InstallReport, InstallationMetrics};
use super::registry::{InstallContext, ManagerDescriptor};
use super::runner::{CommandRunner, CommandSpec};
use futures::future::join_all;
use regex::Regex;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Timeout for a single install command (5 minutes)
pub const INSTALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Environment variables that signal a CI run
const CI_VARS: &[&str] = &[
    "CI",
    "CONTINUOUS_INTEGRATION",
    "GITHUB_ACTIONS",
    "BUILD_NUMBER",
    "RUN_ID",
];

pub fn is_ci_environment() -> bool {
    ci_signal(|var| std::env::var(var).ok())
}

/// True when any CI variable is set to something other than empty, `0` or
/// `false`
pub fn ci_signal(lookup: impl Fn(&str) -> Option<String>) -> bool {
    CI_VARS.iter().any(|var| {
        lookup(var).is_some_and(|value| {
            let value = value.trim();
            !value.is_empty() && value != "0" && !value.eq_ignore_ascii_case("false")
        })
    })
}

/// A directory to install, tagged with its role in the project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallTarget {
    pub name: String,
    pub path: PathBuf,
}

impl InstallTarget {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.name == "root"
    }
}

#[derive(Debug, Clone)]
pub struct InstallOptions {
    pub timeout: Duration,
    pub ci: bool,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            timeout: INSTALL_TIMEOUT,
            ci: is_ci_environment(),
        }
    }
}

pub fn select_context(ci: bool, has_lockfile: bool) -> InstallContext {
    if ci {
        InstallContext::Ci
    } else if has_lockfile {
        InstallContext::Fast
    } else {
        InstallContext::Development
    }
}

/// Drop repeated tokens, keeping the first occurrence
pub fn dedup_preserving_order(tokens: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tokens
        .into_iter()
        .filter(|token| seen.insert(token.clone()))
        .collect()
}

/// Commands for one target, from most to least aggressive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPlan {
    pub context: InstallContext,
    /// Optimized command with context flags
    pub optimized: Vec<String>,
    /// The CI-or-install command with no flags
    pub basic: Vec<String>,
    /// The bare install command
    pub minimal: Vec<String>,
}

impl CommandPlan {
    pub fn tiers(&self) -> [&[String]; 3] {
        [&self.optimized, &self.basic, &self.minimal]
    }

    /// Tiers in order, skipping any that repeat an earlier command
    pub fn distinct_tiers(&self) -> Vec<&[String]> {
        let mut tiers: Vec<&[String]> = Vec::with_capacity(3);
        for tier in self.tiers() {
            if !tiers.contains(&tier) {
                tiers.push(tier);
            }
        }
        tiers
    }
}

pub fn plan_commands(
    manager: &ManagerDescriptor,
    context: InstallContext,
    has_lockfile: bool,
) -> CommandPlan {
    let base = if has_lockfile {
        manager.ci_install_tokens()
    } else {
        manager.install_tokens()
    };

    let mut optimized = base.clone();
    if !has_lockfile && context != InstallContext::Ci {
        optimized.extend(manager.base_flags.iter().map(|f| f.to_string()));
    }
    optimized.extend(manager.context_flags(context).iter().map(|f| f.to_string()));

    CommandPlan {
        context,
        optimized: dedup_preserving_order(optimized),
        basic: base,
        minimal: manager.install_tokens(),
    }
}

fn package_count_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\d+)\s+packages?\b").expect("valid package pattern"))
}

fn cache_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"reused (\d+), downloaded (\d+)").expect("valid cache pattern")
    })
}

/// First "<n> package(s)" mention in install output
pub fn parse_package_count(output: &str) -> Option<u32> {
    package_count_pattern()
        .captures(output)
        .and_then(|c| c[1].parse().ok())
}

/// Final "reused N, downloaded M" progress line, as printed by pnpm
pub fn parse_cache_counts(output: &str) -> Option<(u32, u32)> {
    cache_pattern()
        .captures_iter(output)
        .last()
        .and_then(|c| Some((c[1].parse().ok()?, c[2].parse().ok()?)))
}

/// One command executed during a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub target: String,
    pub context: InstallContext,
    pub command: String,
    pub succeeded: bool,
}

/// Outcome of `Installer::install`
#[derive(Debug)]
pub struct InstallRun {
    pub report: InstallReport,
    pub attempts: Vec<Attempt>,
    pub result: Result<(), PmError>,
}

impl InstallRun {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

struct TargetOutcome {
    attempts: Vec<Attempt>,
    wall_times: Vec<Duration>,
    retries: u32,
    packages: u32,
    cache: Option<(u32, u32)>,
    result: Result<(), PmError>,
}

pub struct Installer<'a, R> {
    runner: &'a R,
    options: InstallOptions,
}

impl<'a, R: CommandRunner> Installer<'a, R> {
    pub fn new(runner: &'a R, options: InstallOptions) -> Self {
        Self { runner, options }
    }

    pub fn options(&self) -> &InstallOptions {
        &self.options
    }

    /// Install dependencies at every target
    pub async fn install(
        &self,
        manager: &ManagerDescriptor,
        targets: &[InstallTarget],
        concurrent: bool,
    ) -> InstallRun {
        let mut metrics = InstallationMetrics::new(manager.name);
        metrics.start_phase("preparation");

        if let Some(missing) = targets.iter().find(|t| !t.path.is_dir()) {
            let error = PmError::InstallFailed {
                target: missing.name.clone(),
                path: missing.path.clone(),
                source: Box::new(PmError::Io {
                    path: missing.path.clone(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "install directory does not exist",
                    ),
                }),
            };
            let report = metrics.finalize(Some(error.to_string()));
            return InstallRun {
                report,
                attempts: Vec::new(),
                result: Err(error),
            };
        }

        metrics.start_phase("dependency-installation");
        info!(
            manager = manager.name,
            targets = targets.len(),
            concurrent,
            "installing dependencies"
        );

        let outcomes = if concurrent || targets.len() <= 1 {
            self.install_sequential(manager, targets).await
        } else {
            self.install_overlapping(manager, targets).await
        };

        let mut attempts = Vec::new();
        let mut first_error = None;
        for outcome in outcomes {
            for wall_time in outcome.wall_times {
                metrics.record_attempt(wall_time);
            }
            for _ in 0..outcome.retries {
                metrics.record_retry();
            }
            metrics.add_packages(outcome.packages);
            if let Some((reused, downloaded)) = outcome.cache {
                metrics.add_cache_counts(reused, downloaded);
            }
            attempts.extend(outcome.attempts);
            if let Err(e) = outcome.result {
                first_error.get_or_insert(e);
            }
        }

        let report = metrics.finalize(first_error.as_ref().map(ToString::to_string));
        InstallRun {
            report,
            attempts,
            result: first_error.map_or(Ok(()), Err),
        }
    }

    /// One target after another, stopping at the first failure
    async fn install_sequential(
        &self,
        manager: &ManagerDescriptor,
        targets: &[InstallTarget],
    ) -> Vec<TargetOutcome> {
        let mut outcomes = Vec::new();
        for target in targets {
            let outcome = self.install_target(manager, target).await;
            let failed = outcome.result.is_err();
            outcomes.push(outcome);
            if failed {
                break;
            }
        }
        outcomes
    }

    /// Root first, then the remaining targets with overlapping processes
    async fn install_overlapping(
        &self,
        manager: &ManagerDescriptor,
        targets: &[InstallTarget],
    ) -> Vec<TargetOutcome> {
        let (roots, others): (Vec<&InstallTarget>, Vec<&InstallTarget>) =
            targets.iter().partition(|t| t.is_root());

        let mut outcomes = Vec::new();
        for root in roots {
            let outcome = self.install_target(manager, root).await;
            let failed = outcome.result.is_err();
            outcomes.push(outcome);
            if failed {
                return outcomes;
            }
        }

        let rest = others.into_iter().map(|t| self.install_target(manager, t));
        outcomes.extend(join_all(rest).await);
        outcomes
    }

    async fn install_target(
        &self,
        manager: &ManagerDescriptor,
        target: &InstallTarget,
    ) -> TargetOutcome {
        let has_lockfile = target.path.join(manager.lockfile).is_file();
        let context = select_context(self.options.ci, has_lockfile);
        let plan = plan_commands(manager, context, has_lockfile);
        debug!(name = %target.name, %context, has_lockfile, "planned install");

        let mut outcome = TargetOutcome {
            attempts: Vec::new(),
            wall_times: Vec::new(),
            retries: 0,
            packages: 0,
            cache: None,
            result: Ok(()),
        };
        let mut last_error = None;

        for (tier, tokens) in plan.distinct_tiers().into_iter().enumerate() {
            let Some(spec) = CommandSpec::from_tokens(tokens) else {
                continue;
            };
            let spec = spec
                .current_dir(&target.path)
                .timeout(self.options.timeout);
            let command = spec.display();

            if tier > 0 {
                outcome.retries += 1;
                info!(name = %target.name, %command, "retrying with reduced flags");
            }

            let started = Instant::now();
            match self.runner.run(&spec).await {
                Ok(output) => {
                    outcome.wall_times.push(output.duration);
                    let combined = format!("{}\n{}", output.stdout, output.stderr);
                    outcome.packages = parse_package_count(&combined).unwrap_or(0);
                    outcome.cache = parse_cache_counts(&combined);
                    outcome.attempts.push(Attempt {
                        target: target.name.clone(),
                        context,
                        command,
                        succeeded: true,
                    });
                    return outcome;
                }
                Err(e) => {
                    outcome.wall_times.push(started.elapsed());
                    warn!(name = %target.name, %command, error = %e, "install command failed");
                    outcome.attempts.push(Attempt {
                        target: target.name.clone(),
                        context,
                        command,
                        succeeded: false,
                    });
                    last_error = Some(e);
                }
            }
        }

        let source =
            last_error.unwrap_or_else(|| PmError::UnknownManager(manager.name.to_string()));
        outcome.result = Err(PmError::InstallFailed {
            target: target.name.clone(),
            path: target.path.clone(),
            source: Box::new(source),
        });
        outcome
    }
}
