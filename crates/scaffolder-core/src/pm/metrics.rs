//! Timing and outcome tracking for a single install run

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// Share of an attempt's wall time attributed to network; the rest is disk.
/// This is an estimate, not a measurement.
const NETWORK_SHARE_PERCENT: u128 = 70;

#[derive(Debug, Clone)]
struct OpenPhase {
    name: String,
    started: Instant,
}

/// A completed phase
#[derive(Debug, Clone)]
pub struct Phase {
    pub name: String,
    pub started: Instant,
    pub ended: Instant,
    pub duration: Duration,
}

/// Mutable metrics, owned by the installer while a run is in progress
#[derive(Debug)]
pub struct InstallationMetrics {
    manager: String,
    started_at: DateTime<Utc>,
    started: Instant,
    phases: Vec<Phase>,
    current: Option<OpenPhase>,
    retries: u32,
    network_time: Duration,
    disk_time: Duration,
    packages_installed: u32,
    cache_reused: u32,
    cache_downloaded: u32,
}

impl InstallationMetrics {
    pub fn new(manager: &str) -> Self {
        Self {
            manager: manager.to_string(),
            started_at: Utc::now(),
            started: Instant::now(),
            phases: Vec::new(),
            current: None,
            retries: 0,
            network_time: Duration::ZERO,
            disk_time: Duration::ZERO,
            packages_installed: 0,
            cache_reused: 0,
            cache_downloaded: 0,
        }
    }

    /// Open a phase, closing whichever phase was open
    pub fn start_phase(&mut self, name: &str) {
        self.end_phase();
        self.current = Some(OpenPhase {
            name: name.to_string(),
            started: Instant::now(),
        });
    }

    pub fn end_phase(&mut self) {
        if let Some(open) = self.current.take() {
            let ended = Instant::now();
            self.phases.push(Phase {
                name: open.name,
                started: open.started,
                ended,
                duration: ended.duration_since(open.started),
            });
        }
    }

    pub fn current_phase(&self) -> Option<&str> {
        self.current.as_ref().map(|p| p.name.as_str())
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn record_retry(&mut self) {
        self.retries += 1;
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Split one attempt's wall time into network and disk estimates
    pub fn record_attempt(&mut self, wall_time: Duration) {
        let nanos = wall_time.as_nanos() * NETWORK_SHARE_PERCENT / 100;
        let network = Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX));
        self.network_time += network;
        self.disk_time += wall_time.saturating_sub(network);
    }

    pub fn add_packages(&mut self, count: u32) {
        self.packages_installed += count;
    }

    pub fn add_cache_counts(&mut self, reused: u32, downloaded: u32) {
        self.cache_reused += reused;
        self.cache_downloaded += downloaded;
    }

    /// Close the run and produce its report. Consumes the metrics so a run
    /// can only be finalized once.
    pub fn finalize(mut self, error: Option<String>) -> InstallReport {
        self.end_phase();
        let cache_total = self.cache_reused + self.cache_downloaded;
        let cache_hit_rate =
            (cache_total > 0).then(|| f64::from(self.cache_reused) / f64::from(cache_total));

        InstallReport {
            manager: self.manager,
            started_at: self.started_at,
            total_duration: self.started.elapsed(),
            phases: self
                .phases
                .into_iter()
                .map(|p| PhaseSummary {
                    name: p.name,
                    duration: p.duration,
                })
                .collect(),
            success: error.is_none(),
            error,
            retries: self.retries,
            network_time: self.network_time,
            disk_time: self.disk_time,
            packages_installed: self.packages_installed,
            cache_hit_rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseSummary {
    pub name: String,
    pub duration: Duration,
}

/// Read-only outcome of an install run
#[derive(Debug, Clone)]
pub struct InstallReport {
    pub manager: String,
    pub started_at: DateTime<Utc>,
    pub total_duration: Duration,
    pub phases: Vec<PhaseSummary>,
    pub success: bool,
    pub error: Option<String>,
    pub retries: u32,
    pub network_time: Duration,
    pub disk_time: Duration,
    pub packages_installed: u32,
    /// Fraction of packages served from cache, when the manager reports it
    pub cache_hit_rate: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starting_a_phase_closes_the_previous_one() {
        let mut metrics = InstallationMetrics::new("pnpm");
        metrics.start_phase("preparation");
        metrics.start_phase("dependency-installation");

        assert_eq!(metrics.phases().len(), 1);
        assert_eq!(metrics.phases()[0].name, "preparation");
        assert_eq!(metrics.current_phase(), Some("dependency-installation"));
    }

    #[test]
    fn test_finalize_closes_open_phase() {
        let mut metrics = InstallationMetrics::new("npm");
        metrics.start_phase("preparation");
        let report = metrics.finalize(None);

        assert!(report.success);
        assert_eq!(report.phases.len(), 1);
        assert_eq!(report.manager, "npm");
    }

    #[test]
    fn test_attempt_time_split_seventy_thirty() {
        let mut metrics = InstallationMetrics::new("yarn");
        metrics.record_attempt(Duration::from_secs(10));
        let report = metrics.finalize(Some("boom".to_string()));

        assert_eq!(report.network_time, Duration::from_secs(7));
        assert_eq!(report.disk_time, Duration::from_secs(3));
        assert!(!report.success);
        assert_eq!(report.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_cache_hit_rate_only_when_known() {
        let metrics = InstallationMetrics::new("pnpm");
        assert!(metrics.finalize(None).cache_hit_rate.is_none());

        let mut metrics = InstallationMetrics::new("pnpm");
        metrics.add_cache_counts(3, 1);
        assert_eq!(metrics.finalize(None).cache_hit_rate, Some(0.75));
    }

    #[test]
    fn test_retries_accumulate() {
        let mut metrics = InstallationMetrics::new("npm");
        metrics.record_retry();
        metrics.record_retry();
        assert_eq!(metrics.retries(), 2);
    }
}
