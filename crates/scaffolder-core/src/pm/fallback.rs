//! Fallback to alternative package managers and reduced flag sets

use super::detect::Detector;
use super::error::{PmError, Result};
use super::registry::{ManagerDescriptor, Optimization, Registry};
use super::runner::CommandRunner;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, info};

/// Handle to an entry in a `FallbackLog`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(usize);

#[derive(Debug, Clone)]
pub struct FallbackLogEntry {
    pub timestamp: DateTime<Utc>,
    pub from: String,
    pub to: String,
    pub reason: String,
    /// `None` while the attempt is pending
    pub success: Option<bool>,
    pub error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Append-only record of fallback attempts for one invocation
#[derive(Debug, Default)]
pub struct FallbackLog {
    entries: Vec<FallbackLogEntry>,
}

impl FallbackLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, from: &str, to: &str, reason: &str) -> EntryId {
        self.entries.push(FallbackLogEntry {
            timestamp: Utc::now(),
            from: from.to_string(),
            to: to.to_string(),
            reason: reason.to_string(),
            success: None,
            error: None,
            completed_at: None,
        });
        EntryId(self.entries.len() - 1)
    }

    /// Record the result of a pending entry. Returns false when the entry does
    /// not exist or was already resolved.
    pub fn resolve(&mut self, id: EntryId, success: bool, error: Option<String>) -> bool {
        match self.entries.get_mut(id.0) {
            Some(entry) if entry.success.is_none() => {
                entry.success = Some(success);
                entry.error = error;
                entry.completed_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    pub fn entries(&self) -> &[FallbackLogEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn statistics(&self) -> FallbackStatistics {
        let succeeded = self.entries.iter().filter(|e| e.success == Some(true)).count();
        let failed = self.entries.iter().filter(|e| e.success == Some(false)).count();
        let resolved = succeeded + failed;

        let mut targets: HashMap<&str, usize> = HashMap::new();
        for entry in &self.entries {
            *targets.entry(entry.to.as_str()).or_default() += 1;
        }
        // Ties go to the target attempted first
        let most_common_target = self
            .entries
            .iter()
            .map(|e| e.to.as_str())
            .fold(None::<(&str, usize)>, |best, name| {
                let count = targets[name];
                match best {
                    Some((_, best_count)) if best_count >= count => best,
                    _ => Some((name, count)),
                }
            })
            .map(|(name, _)| name.to_string());

        FallbackStatistics {
            total: self.entries.len(),
            succeeded,
            failed,
            pending: self.entries.len() - resolved,
            success_rate: (resolved > 0).then(|| succeeded as f64 / resolved as f64),
            most_common_target,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FallbackStatistics {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub pending: usize,
    pub success_rate: Option<f64>,
    pub most_common_target: Option<String>,
}

/// The manager chosen after a failure.
///
/// `entry` stays pending until the caller resolves it with the result of the
/// install it runs with `manager`.
#[derive(Debug, Clone)]
pub struct FallbackOutcome<'a> {
    pub manager: &'a ManagerDescriptor,
    pub entry: EntryId,
    pub fallback_used: bool,
    pub original_manager: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Speed,
    Stability,
}

/// Conditions that adjust candidate scores
#[derive(Debug, Clone, Default)]
pub struct FallbackCriteria {
    pub ci: bool,
    pub has_lockfile: bool,
    pub large_project: bool,
    pub slow_network: bool,
    pub features: Vec<Feature>,
}

/// Lower is better; starts from the manager's priority
pub fn score(descriptor: &ManagerDescriptor, criteria: &FallbackCriteria) -> i32 {
    let opts = &descriptor.optimizations;
    let mut score = descriptor.priority;

    if criteria.ci && opts.supports(Optimization::Silent) {
        score -= 1;
    }
    if criteria.has_lockfile && descriptor.has_distinct_ci_command() {
        score -= 1;
    }
    if criteria.large_project && opts.supports(Optimization::Parallel) {
        score -= 2;
    }
    if criteria.slow_network && opts.supports(Optimization::Offline) {
        score -= 1;
    }
    if criteria.features.contains(&Feature::Speed) && descriptor.priority <= 2 {
        score -= 1;
    }
    if criteria.features.contains(&Feature::Stability) && descriptor.name == "npm" {
        score -= 1;
    }
    score
}

pub struct FallbackEngine<'a, R> {
    detector: Detector<'a, R>,
}

impl<'a, R: CommandRunner> FallbackEngine<'a, R> {
    pub fn new(detector: Detector<'a, R>) -> Self {
        Self { detector }
    }

    fn registry(&self) -> &'a Registry {
        self.detector.registry()
    }

    /// Alternatives in priority order, without the failed and excluded managers
    pub fn candidates(&self, failed: &str, exclude: &[&str]) -> Vec<&'a ManagerDescriptor> {
        self.registry()
            .by_priority()
            .into_iter()
            .filter(|m| !m.name.eq_ignore_ascii_case(failed))
            .filter(|m| !exclude.iter().any(|e| m.name.eq_ignore_ascii_case(e)))
            .collect()
    }

    /// Alternatives ordered by score; ties keep declaration order
    pub fn score_candidates(
        &self,
        failed: &str,
        exclude: &[&str],
        criteria: &FallbackCriteria,
    ) -> Vec<(&'a ManagerDescriptor, i32)> {
        let registry = self.registry();
        let mut scored: Vec<(&'a ManagerDescriptor, i32)> = self
            .candidates(failed, exclude)
            .into_iter()
            .map(|m| (m, score(m, criteria)))
            .collect();
        scored.sort_by_key(|(m, s)| (*s, registry.position(m.name)));
        scored
    }

    pub async fn find_fallback(
        &self,
        failed: &str,
        exclude: &[&str],
        original_error: &str,
        log: &mut FallbackLog,
    ) -> Result<FallbackOutcome<'a>> {
        let candidates = self.candidates(failed, exclude);
        self.walk(failed, candidates, original_error, log).await
    }

    pub async fn intelligent_fallback(
        &self,
        failed: &str,
        exclude: &[&str],
        criteria: &FallbackCriteria,
        original_error: &str,
        log: &mut FallbackLog,
    ) -> Result<FallbackOutcome<'a>> {
        let candidates = self
            .score_candidates(failed, exclude, criteria)
            .into_iter()
            .map(|(m, s)| {
                debug!(manager = m.name, score = s, "scored fallback candidate");
                m
            })
            .collect();
        self.walk(failed, candidates, original_error, log).await
    }

    async fn walk(
        &self,
        failed: &str,
        candidates: Vec<&'a ManagerDescriptor>,
        original_error: &str,
        log: &mut FallbackLog,
    ) -> Result<FallbackOutcome<'a>> {
        let reason = format!("{} failed: {}", failed, original_error);

        for candidate in candidates {
            let id = log.begin(failed, candidate.name, &reason);

            if !self.detector.is_installed(candidate).await {
                debug!(manager = candidate.name, "fallback candidate not installed");
                log.resolve(id, false, Some("not installed".to_string()));
                continue;
            }

            let health = self.detector.health_check(candidate).await;
            if !health.healthy {
                debug!(manager = candidate.name, "fallback candidate unhealthy");
                log.resolve(
                    id,
                    false,
                    Some(health.error.unwrap_or_else(|| "unhealthy".to_string())),
                );
                continue;
            }

            info!(from = failed, to = candidate.name, "falling back");
            return Ok(FallbackOutcome {
                manager: candidate,
                entry: id,
                fallback_used: true,
                original_manager: failed.to_string(),
                reason,
            });
        }

        Err(PmError::FallbackExhausted {
            original: original_error.to_string(),
        })
    }
}

/// Flag-filtering strategies, from least to most conservative
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReductionStrategy {
    DropSilent,
    DropOffline,
    DropParallel,
    DropAllOptimizations,
}

impl ReductionStrategy {
    pub const ORDER: [ReductionStrategy; 4] = [
        ReductionStrategy::DropSilent,
        ReductionStrategy::DropOffline,
        ReductionStrategy::DropParallel,
        ReductionStrategy::DropAllOptimizations,
    ];

    pub fn removes(&self, flag: &str) -> bool {
        let flag = flag.to_ascii_lowercase();
        match self {
            ReductionStrategy::DropSilent => flag.contains("silent") || flag.contains("quiet"),
            ReductionStrategy::DropOffline => flag.contains("offline"),
            ReductionStrategy::DropParallel => {
                flag.contains("parallel") || flag.contains("concurren")
            }
            ReductionStrategy::DropAllOptimizations => true,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ReductionStrategy::DropSilent => "without silent flags",
            ReductionStrategy::DropOffline => "without offline flags",
            ReductionStrategy::DropParallel => "without parallel flags",
            ReductionStrategy::DropAllOptimizations => "without optimization flags",
        }
    }
}

/// Produces successively reduced flag sets for a failed command.
///
/// Never runs anything; the caller re-executes with each set and stops
/// asking once one succeeds.
#[derive(Debug, Clone)]
pub struct OptimizationFallback {
    manager: String,
    flags: Vec<String>,
    next: usize,
}

impl OptimizationFallback {
    pub fn new<S: AsRef<str>>(manager: &str, flags: &[S]) -> Self {
        Self {
            manager: manager.to_string(),
            flags: flags.iter().map(|f| f.as_ref().to_string()).collect(),
            next: 0,
        }
    }

    /// Flags currently in effect
    pub fn current(&self) -> &[String] {
        &self.flags
    }

    /// Apply the next strategy that changes the flag set
    pub fn next_flags(&mut self) -> Result<(ReductionStrategy, Vec<String>)> {
        while let Some(strategy) = ReductionStrategy::ORDER.get(self.next).copied() {
            self.next += 1;
            let reduced: Vec<String> = self
                .flags
                .iter()
                .filter(|f| !strategy.removes(f))
                .cloned()
                .collect();
            if reduced != self.flags {
                debug!(manager = %self.manager, strategy = strategy.description(), "reduced flags");
                self.flags = reduced.clone();
                return Ok((strategy, reduced));
            }
        }

        Err(PmError::OptimizationsExhausted {
            manager: self.manager.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pm::detect::HostEnv;
    use crate::pm::testing::ScriptedRunner;

    fn engine<'a>(
        registry: &'a Registry,
        runner: &'a ScriptedRunner,
    ) -> FallbackEngine<'a, ScriptedRunner> {
        let env = HostEnv {
            home: None,
            windows: false,
            system_bin_dirs: Vec::new(),
        };
        FallbackEngine::new(Detector::new(registry, runner).with_env(env))
    }

    #[tokio::test]
    async fn test_falls_back_to_installed_healthy_manager() {
        let registry = Registry::builtin();
        let runner = ScriptedRunner::new()
            .succeed("yarn --version", "1.22.19")
            .succeed("yarn cache dir", "/home/dev/.cache/yarn");
        let engine = engine(&registry, &runner);
        let mut log = FallbackLog::new();

        let outcome = engine
            .find_fallback("npm", &[], "ERESOLVE", &mut log)
            .await
            .unwrap();

        assert_eq!(outcome.manager.name, "yarn");
        assert!(outcome.fallback_used);
        assert_eq!(outcome.original_manager, "npm");

        let results: Vec<(&str, Option<bool>)> = log
            .entries()
            .iter()
            .map(|e| (e.to.as_str(), e.success))
            .collect();
        assert_eq!(
            results,
            vec![("bun", Some(false)), ("pnpm", Some(false)), ("yarn", None)]
        );
        assert_eq!(log.statistics().pending, 1);

        assert!(log.resolve(outcome.entry, true, None));
        assert_eq!(log.entries()[2].success, Some(true));
    }

    #[tokio::test]
    async fn test_unhealthy_candidate_is_skipped() {
        let registry = Registry::builtin();
        let runner = ScriptedRunner::new()
            .succeed("pnpm --version", "9.1.0")
            .fail("pnpm store path", "broken store")
            .succeed("npm --version", "10.2.4")
            .succeed("npm config get cache", "/home/dev/.npm");
        let engine = engine(&registry, &runner);
        let mut log = FallbackLog::new();

        let outcome = engine
            .find_fallback("yarn", &["bun"], "boom", &mut log)
            .await
            .unwrap();

        assert_eq!(outcome.manager.name, "npm");
        assert!(log.entries()[0].error.as_deref().unwrap().contains("broken store"));
    }

    #[tokio::test]
    async fn test_exhausted_candidates_carry_original_error() {
        let registry = Registry::builtin();
        let runner = ScriptedRunner::new();
        let engine = engine(&registry, &runner);
        let mut log = FallbackLog::new();

        let err = engine
            .find_fallback("pnpm", &[], "network down", &mut log)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PmError::FallbackExhausted { ref original } if original == "network down"
        ));
        assert_eq!(log.statistics().failed, 3);
    }

    #[test]
    fn test_candidates_exclude_failed_and_excluded() {
        let registry = Registry::builtin();
        let runner = ScriptedRunner::new();
        let engine = engine(&registry, &runner);

        let names: Vec<&str> = engine
            .candidates("pnpm", &["BUN"])
            .iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["yarn", "npm"]);
    }

    #[test]
    fn test_scores_prefer_parallel_managers_for_large_projects() {
        let registry = Registry::builtin();
        let runner = ScriptedRunner::new();
        let engine = engine(&registry, &runner);
        let criteria = FallbackCriteria {
            large_project: true,
            features: vec![Feature::Speed],
            ..Default::default()
        };

        let scored: Vec<(&str, i32)> = engine
            .score_candidates("npm", &[], &criteria)
            .into_iter()
            .map(|(m, s)| (m.name, s))
            .collect();
        assert_eq!(scored, vec![("bun", -2), ("pnpm", -1), ("yarn", 3)]);
    }

    #[test]
    fn test_score_ties_keep_declaration_order() {
        let registry = Registry::builtin();
        let runner = ScriptedRunner::new();
        let engine = engine(&registry, &runner);
        let criteria = FallbackCriteria {
            ci: true,
            features: vec![Feature::Stability],
            ..Default::default()
        };

        let scored: Vec<(&str, i32)> = engine
            .score_candidates("bun", &[], &criteria)
            .into_iter()
            .map(|(m, s)| (m.name, s))
            .collect();
        assert_eq!(scored, vec![("pnpm", 1), ("yarn", 2), ("npm", 2)]);
    }

    #[tokio::test]
    async fn test_intelligent_fallback_walks_scored_order() {
        let registry = Registry::builtin();
        let runner = ScriptedRunner::new()
            .succeed("npm --version", "10.2.4")
            .succeed("npm config get cache", "/home/dev/.npm")
            .succeed("yarn --version", "1.22.19")
            .succeed("yarn cache dir", "/tmp/yarn");
        let engine = engine(&registry, &runner);
        let criteria = FallbackCriteria {
            features: vec![Feature::Stability],
            slow_network: true,
            ..Default::default()
        };
        let mut log = FallbackLog::new();

        // yarn 3-1=2, npm 4-1-1=2: tie broken by declaration order
        let outcome = engine
            .intelligent_fallback("pnpm", &["bun"], &criteria, "timeout", &mut log)
            .await
            .unwrap();
        assert_eq!(outcome.manager.name, "yarn");
    }

    #[test]
    fn test_log_entry_resolves_once() {
        let mut log = FallbackLog::new();
        let id = log.begin("npm", "yarn", "npm failed");
        assert_eq!(log.entries()[0].success, None);

        assert!(log.resolve(id, true, None));
        assert!(!log.resolve(id, false, Some("late".to_string())));
        assert_eq!(log.entries()[0].success, Some(true));
        assert!(log.entries()[0].completed_at.is_some());
    }

    #[test]
    fn test_statistics() {
        let mut log = FallbackLog::new();
        let a = log.begin("npm", "yarn", "r");
        let b = log.begin("npm", "pnpm", "r");
        log.begin("pnpm", "yarn", "r");
        log.resolve(a, false, None);
        log.resolve(b, true, None);

        let stats = log.statistics();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.success_rate, Some(0.5));
        assert_eq!(stats.most_common_target.as_deref(), Some("yarn"));
    }

    #[test]
    fn test_optimization_fallback_strategy_order() {
        let mut fallback =
            OptimizationFallback::new("pnpm", &["--silent", "--offline", "--parallel"]);

        let (strategy, flags) = fallback.next_flags().unwrap();
        assert_eq!(strategy, ReductionStrategy::DropSilent);
        assert_eq!(flags, vec!["--offline", "--parallel"]);

        let (_, flags) = fallback.next_flags().unwrap();
        assert_eq!(flags, vec!["--parallel"]);

        let (_, flags) = fallback.next_flags().unwrap();
        assert!(flags.is_empty());

        match fallback.next_flags() {
            Err(PmError::OptimizationsExhausted { manager }) => assert_eq!(manager, "pnpm"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_optimization_fallback_drops_everything_last() {
        let mut fallback = OptimizationFallback::new("npm", &["--no-audit", "--no-fund"]);
        let (strategy, flags) = fallback.next_flags().unwrap();
        assert_eq!(strategy, ReductionStrategy::DropAllOptimizations);
        assert!(flags.is_empty());
    }
}
