//! Top-level context tying detection, installation, fallback and verification
//! together for one CLI invocation

use super::detect::{DetectedManager, Detector, HostEnv};
use super::error::{PmError, Result};
use super::fallback::{EntryId, FallbackEngine, FallbackLog};
use super::install::{is_ci_environment, Attempt, InstallOptions, InstallTarget, Installer};
use super::metrics::InstallReport;
use super::preference::{PreferenceSource, PreferenceStore, UserPreferences};
use super::registry::{validate_registry, ManagerDescriptor, Registry, Violation};
use super::runner::CommandRunner;
use super::verify::{
    generate_report, verify_installation, InstallationSummary, VerificationResult, VerifyOptions,
};
use std::path::Path;
use tracing::{info, warn};

/// Why a manager was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    Requested,
    Preference(PreferenceSource),
    Fastest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub manager: &'static str,
    pub source: ResolutionSource,
}

/// A successful install, possibly after falling back
#[derive(Debug)]
pub struct InstallOutcome {
    pub manager: &'static str,
    /// The manager originally asked for, when a fallback was used
    pub fallback_from: Option<&'static str>,
    pub report: InstallReport,
    pub attempts: Vec<Attempt>,
    /// Reports of the managers that failed before `manager` succeeded
    pub failed_runs: Vec<InstallReport>,
}

pub struct PmSession<R> {
    registry: Registry,
    runner: R,
    log: FallbackLog,
    store: PreferenceStore,
    preferences: UserPreferences,
    env: HostEnv,
    ci: bool,
}

impl<R: CommandRunner> PmSession<R> {
    pub fn new(runner: R, store: PreferenceStore) -> Self {
        let preferences = store.load_user();
        Self {
            registry: Registry::builtin(),
            runner,
            log: FallbackLog::new(),
            store,
            preferences,
            env: HostEnv::current(),
            ci: is_ci_environment(),
        }
    }

    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_env(mut self, env: HostEnv) -> Self {
        self.env = env;
        self
    }

    pub fn with_ci(mut self, ci: bool) -> Self {
        self.ci = ci;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn fallback_log(&self) -> &FallbackLog {
        &self.log
    }

    pub fn preferences(&self) -> &UserPreferences {
        &self.preferences
    }

    pub fn store(&self) -> &PreferenceStore {
        &self.store
    }

    fn detector(&self) -> Detector<'_, R> {
        Detector::new(&self.registry, &self.runner).with_env(self.env.clone())
    }

    /// Check the registry once and log what is wrong with it
    pub fn validate(&self) -> Vec<Violation> {
        let violations = validate_registry(&self.registry);
        if !violations.is_empty() {
            let details: Vec<String> = violations.iter().map(ToString::to_string).collect();
            warn!(
                count = violations.len(),
                "package manager registry is invalid: {}",
                details.join("; ")
            );
        }
        violations
    }

    pub async fn detect_managers(&self) -> Vec<DetectedManager> {
        self.detector().detect_all().await
    }

    pub fn descriptor(&self, name: &str) -> Result<&ManagerDescriptor> {
        self.registry
            .get(name)
            .ok_or_else(|| PmError::UnknownManager(name.to_string()))
    }

    /// Explicit request, then effective preference, then the fastest installed
    /// manager. Choices that are unknown or not installed are skipped.
    pub async fn resolve_manager(&self, project_dir: &Path, requested: Option<&str>) -> Resolution {
        let detector = self.detector();

        if let Some(name) = requested {
            match self.registry.get(name) {
                Some(m) if detector.is_installed(m).await => {
                    return Resolution {
                        manager: m.name,
                        source: ResolutionSource::Requested,
                    }
                }
                Some(_) => warn!(manager = name, "requested package manager is not installed"),
                None => warn!(manager = name, "unknown package manager requested"),
            }
        }

        let preference = self.store.effective_preference(&self.registry, project_dir);
        for (source, name) in &preference.conflicts {
            info!(?source, manager = %name, "ignoring lower-precedence preference");
        }
        if let Some(m) = preference.manager.as_deref().and_then(|n| self.registry.get(n)) {
            if detector.is_installed(m).await {
                return Resolution {
                    manager: m.name,
                    source: ResolutionSource::Preference(preference.source),
                };
            }
            warn!(manager = m.name, "preferred package manager is not installed");
        }

        Resolution {
            manager: detector.fastest_available().await.name,
            source: ResolutionSource::Fastest,
        }
    }

    /// Install with `manager`, falling back to other managers on failure when
    /// fallback is enabled. Errors only once every candidate is exhausted.
    pub async fn install(
        &mut self,
        manager: &str,
        targets: &[InstallTarget],
        concurrent: bool,
    ) -> Result<InstallOutcome> {
        let registry = &self.registry;
        let runner = &self.runner;
        let log = &mut self.log;

        let requested = registry
            .get(manager)
            .ok_or_else(|| PmError::UnknownManager(manager.to_string()))?;
        let mut current = requested;

        let installer = Installer::new(
            runner,
            InstallOptions {
                timeout: self.preferences.installation_timeout(),
                ci: self.ci,
            },
        );
        let engine =
            FallbackEngine::new(Detector::new(registry, runner).with_env(self.env.clone()));

        let mut tried: Vec<&str> = Vec::new();
        let mut original_error: Option<String> = None;
        let mut pending: Option<EntryId> = None;
        let mut failed_runs = Vec::new();

        loop {
            let run = installer.install(current, targets, concurrent).await;
            if let Some(id) = pending.take() {
                let error = run.result.as_ref().err().map(ToString::to_string);
                log.resolve(id, run.succeeded(), error);
            }

            let error = match run.result {
                Ok(()) => {
                    return Ok(InstallOutcome {
                        manager: current.name,
                        fallback_from: (current.name != requested.name).then_some(requested.name),
                        report: run.report,
                        attempts: run.attempts,
                        failed_runs,
                    })
                }
                Err(e) => e,
            };

            if !self.preferences.fallback_enabled {
                return Err(error);
            }

            let message = error.to_string();
            let original = original_error.get_or_insert_with(|| message.clone()).clone();
            tried.push(current.name);
            failed_runs.push(run.report);

            match engine.find_fallback(current.name, &tried, &message, log).await {
                Ok(fallback) => {
                    info!(
                        from = current.name,
                        to = fallback.manager.name,
                        "retrying install with fallback manager"
                    );
                    pending = Some(fallback.entry);
                    current = fallback.manager;
                }
                Err(_) => return Err(PmError::FallbackExhausted { original }),
            }
        }
    }

    pub async fn verify(
        &self,
        manager: &str,
        targets: &[InstallTarget],
        options: &VerifyOptions,
    ) -> Result<VerificationResult> {
        let descriptor = self.descriptor(manager)?;
        Ok(verify_installation(&self.runner, descriptor, targets, options).await)
    }

    pub fn summarize(
        &self,
        outcome: &InstallOutcome,
        verification: &VerificationResult,
    ) -> Result<InstallationSummary> {
        let descriptor = self.descriptor(outcome.manager)?;
        let mut summary = generate_report(&outcome.report, verification, descriptor);
        for failed in &outcome.failed_runs {
            summary.warnings.push(format!(
                "{} failed after {:.1}s with {} retr{}: {}",
                failed.manager,
                failed.total_duration.as_secs_f64(),
                failed.retries,
                if failed.retries == 1 { "y" } else { "ies" },
                failed.error.as_deref().unwrap_or("unknown error")
            ));
        }
        Ok(summary)
    }

    /// Remember the manager used for a project; best-effort
    pub fn remember(&self, project_dir: &Path, manager: &str) -> bool {
        self.store.remember_project(project_dir, manager)
    }
}
