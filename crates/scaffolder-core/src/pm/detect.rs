//! Package manager detection on the host

use super::registry::{ManagerDescriptor, Registry};
use super::runner::{CommandRunner, CommandSpec};
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Host facts the detector depends on
#[derive(Debug, Clone)]
pub struct HostEnv {
    pub home: Option<PathBuf>,
    pub windows: bool,
    /// Common system bin directories scanned for managers installed outside PATH
    pub system_bin_dirs: Vec<PathBuf>,
}

impl HostEnv {
    pub fn current() -> Self {
        let windows = cfg!(windows);
        let system_bin_dirs = if windows {
            Vec::new()
        } else {
            ["/usr/local/bin", "/opt/homebrew/bin", "/usr/bin"]
                .iter()
                .map(PathBuf::from)
                .collect()
        };
        Self {
            home: dirs_next::home_dir(),
            windows,
            system_bin_dirs,
        }
    }
}

/// Result of a health check; failures only lower confidence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
    pub healthy: bool,
    pub error: Option<String>,
}

/// An installed manager, as offered to the user
#[derive(Debug, Clone)]
pub struct DetectedManager {
    pub name: &'static str,
    pub label: String,
    pub version: Option<semver::Version>,
}

/// Candidate executable locations for a manager that installs outside PATH.
///
/// `global_bin` is the global install directory reported by npm; it is ignored
/// on Windows.
pub fn fallback_locations(
    descriptor: &ManagerDescriptor,
    env: &HostEnv,
    global_bin: Option<&Path>,
) -> Vec<PathBuf> {
    let Some(install_dir) = descriptor.home_install_dir else {
        return Vec::new();
    };

    let executable = if env.windows {
        format!("{}.exe", descriptor.command)
    } else {
        descriptor.command.to_string()
    };

    let mut candidates = Vec::new();
    if let Some(home) = &env.home {
        candidates.push(home.join(install_dir).join(&executable));
    }
    for dir in &env.system_bin_dirs {
        candidates.push(dir.join(&executable));
    }
    if !env.windows {
        if let Some(bin) = global_bin {
            candidates.push(bin.join(&executable));
        }
    }
    candidates
}

/// First candidate that exists and is executable
pub fn find_executable(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates.iter().find(|p| is_executable(p)).cloned()
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

pub struct Detector<'a, R> {
    registry: &'a Registry,
    runner: &'a R,
    env: HostEnv,
}

impl<'a, R: CommandRunner> Detector<'a, R> {
    pub fn new(registry: &'a Registry, runner: &'a R) -> Self {
        Self {
            registry,
            runner,
            env: HostEnv::current(),
        }
    }

    pub fn with_env(mut self, env: HostEnv) -> Self {
        self.env = env;
        self
    }

    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    /// Run the version probe, optionally against an explicit executable
    async fn probe(
        &self,
        descriptor: &ManagerDescriptor,
        program: Option<&Path>,
    ) -> Option<String> {
        let mut spec = CommandSpec::parse(descriptor.verification.probe)?
            .timeout(descriptor.verification.timeout);
        if let Some(program) = program {
            spec.program = program.display().to_string();
        }

        let output = match self.runner.run(&spec).await {
            Ok(output) => output,
            Err(e) => {
                debug!(manager = descriptor.name, error = %e, "version probe failed");
                return None;
            }
        };

        let version = output.stdout.trim().to_string();
        let matches = match Regex::new(descriptor.verification.expected) {
            Ok(re) => re.is_match(&version),
            Err(_) => !version.is_empty(),
        };
        if matches {
            Some(version)
        } else {
            debug!(manager = descriptor.name, output = %version, "unexpected probe output");
            None
        }
    }

    async fn npm_global_bin(&self) -> Option<PathBuf> {
        let npm = self.registry.npm();
        let spec =
            CommandSpec::new(npm.command, ["prefix", "-g"]).timeout(npm.verification.timeout);
        let output = self.runner.run(&spec).await.ok()?;
        let prefix = output.stdout.trim();
        (!prefix.is_empty()).then(|| PathBuf::from(prefix).join("bin"))
    }

    /// Look for the manager in its known install locations
    async fn locate(&self, descriptor: &ManagerDescriptor) -> Option<String> {
        descriptor.home_install_dir?;

        let global_bin = if self.env.windows {
            None
        } else {
            self.npm_global_bin().await
        };
        let candidates = fallback_locations(descriptor, &self.env, global_bin.as_deref());
        let executable = find_executable(&candidates)?;
        let version = self.probe(descriptor, Some(&executable)).await?;

        if let Some(dir) = executable.parent() {
            debug!(manager = descriptor.name, dir = %dir.display(), "found outside PATH");
            self.runner.register_search_dir(dir);
        }
        Some(version)
    }

    /// Installed version string, if the manager is usable
    pub async fn version(&self, descriptor: &ManagerDescriptor) -> Option<String> {
        match self.probe(descriptor, None).await {
            Some(version) => Some(version),
            None => self.locate(descriptor).await,
        }
    }

    pub async fn is_installed(&self, descriptor: &ManagerDescriptor) -> bool {
        self.version(descriptor).await.is_some()
    }

    pub async fn health_check(&self, descriptor: &ManagerDescriptor) -> HealthStatus {
        let Some(spec) = CommandSpec::parse(descriptor.verification.health_check) else {
            return HealthStatus {
                healthy: false,
                error: Some("no health check command".to_string()),
            };
        };
        let spec = spec.timeout(descriptor.verification.timeout);

        match self.runner.run(&spec).await {
            Ok(_) => HealthStatus {
                healthy: true,
                error: None,
            },
            Err(e) => {
                debug!(manager = descriptor.name, error = %e, "health check failed");
                HealthStatus {
                    healthy: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Highest-priority installed manager, npm when nothing is detected
    pub async fn fastest_available(&self) -> &'a ManagerDescriptor {
        for descriptor in self.registry.by_priority() {
            if self.is_installed(descriptor).await {
                return descriptor;
            }
        }
        debug!("no package manager detected, assuming npm");
        self.registry.npm()
    }

    /// Every installed manager in priority order
    pub async fn detect_all(&self) -> Vec<DetectedManager> {
        let mut detected = Vec::new();
        for descriptor in self.registry.by_priority() {
            if let Some(raw) = self.version(descriptor).await {
                let version = semver::Version::parse(raw.trim_start_matches('v')).ok();
                detected.push(DetectedManager {
                    name: descriptor.name,
                    label: format!("{} ({})", descriptor.label, raw),
                    version,
                });
            }
        }
        detected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pm::testing::ScriptedRunner;

    fn isolated_env(home: Option<PathBuf>) -> HostEnv {
        HostEnv {
            home,
            windows: false,
            system_bin_dirs: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_fastest_available_skips_missing_managers() {
        let registry = Registry::builtin();
        let runner = ScriptedRunner::new()
            .succeed("pnpm --version", "9.1.0\n")
            .succeed("npm --version", "10.2.4\n");
        let detector = Detector::new(&registry, &runner).with_env(isolated_env(None));

        assert_eq!(detector.fastest_available().await.name, "pnpm");
    }

    #[tokio::test]
    async fn test_fastest_available_defaults_to_npm() {
        let registry = Registry::builtin();
        let runner = ScriptedRunner::new();
        let detector = Detector::new(&registry, &runner).with_env(isolated_env(None));

        assert_eq!(detector.fastest_available().await.name, "npm");
    }

    #[tokio::test]
    async fn test_unexpected_probe_output_is_not_installed() {
        let registry = Registry::builtin();
        let runner = ScriptedRunner::new().succeed("yarn --version", "command not found");
        let detector = Detector::new(&registry, &runner).with_env(isolated_env(None));
        let yarn = registry.get("yarn").unwrap();

        assert!(!detector.is_installed(yarn).await);
    }

    #[tokio::test]
    async fn test_probe_uses_declared_timeout() {
        let registry = Registry::builtin();
        let runner = ScriptedRunner::new().succeed("npm --version", "10.2.4");
        let detector = Detector::new(&registry, &runner).with_env(isolated_env(None));
        let npm = registry.get("npm").unwrap();

        assert!(detector.is_installed(npm).await);
        assert_eq!(runner.specs()[0].timeout, Some(npm.verification.timeout));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bun_found_in_home_install_dir() {
        use std::os::unix::fs::PermissionsExt;

        let home = tempfile::tempdir().unwrap();
        let bin_dir = home.path().join(".bun/bin");
        std::fs::create_dir_all(&bin_dir).unwrap();
        let bun = bin_dir.join("bun");
        std::fs::write(&bun, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&bun, std::fs::Permissions::from_mode(0o755)).unwrap();

        let registry = Registry::builtin();
        let runner =
            ScriptedRunner::new().succeed(&format!("{} --version", bun.display()), "1.1.8");
        let detector =
            Detector::new(&registry, &runner).with_env(isolated_env(Some(home.path().into())));

        assert!(detector.is_installed(registry.get("bun").unwrap()).await);
        assert_eq!(runner.registered_dirs(), vec![bin_dir]);
    }

    #[test]
    fn test_fallback_locations_only_for_home_installed_managers() {
        let registry = Registry::builtin();
        let env = HostEnv {
            home: Some(PathBuf::from("/home/dev")),
            windows: false,
            system_bin_dirs: vec![PathBuf::from("/usr/local/bin")],
        };

        let bun = fallback_locations(
            registry.get("bun").unwrap(),
            &env,
            Some(Path::new("/opt/node/bin")),
        );
        assert_eq!(
            bun,
            vec![
                PathBuf::from("/home/dev/.bun/bin/bun"),
                PathBuf::from("/usr/local/bin/bun"),
                PathBuf::from("/opt/node/bin/bun"),
            ]
        );
        assert!(fallback_locations(registry.get("pnpm").unwrap(), &env, None).is_empty());
    }

    #[test]
    fn test_fallback_locations_windows_skip_global_bin() {
        let registry = Registry::builtin();
        let env = HostEnv {
            home: Some(PathBuf::from("C:/Users/dev")),
            windows: true,
            system_bin_dirs: Vec::new(),
        };

        let bun = fallback_locations(
            registry.get("bun").unwrap(),
            &env,
            Some(Path::new("C:/npm")),
        );
        assert_eq!(bun, vec![PathBuf::from("C:/Users/dev/.bun/bin/bun.exe")]);
    }

    #[tokio::test]
    async fn test_health_check_failure_is_reported_not_raised() {
        let registry = Registry::builtin();
        let runner = ScriptedRunner::new().fail("pnpm store path", "store corrupted");
        let detector = Detector::new(&registry, &runner).with_env(isolated_env(None));

        let status = detector.health_check(registry.get("pnpm").unwrap()).await;
        assert!(!status.healthy);
        assert!(status.error.unwrap().contains("store corrupted"));
    }

    #[tokio::test]
    async fn test_detect_all_labels_versions() {
        let registry = Registry::builtin();
        let runner = ScriptedRunner::new()
            .succeed("yarn --version", "1.22.19")
            .succeed("npm --version", "10.2.4");
        let detector = Detector::new(&registry, &runner).with_env(isolated_env(None));

        let detected = detector.detect_all().await;
        let names: Vec<&str> = detected.iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["yarn", "npm"]);
        assert_eq!(detected[0].label, "Yarn (1.22.19)");
        assert_eq!(detected[0].version, Some(semver::Version::new(1, 22, 19)));
    }
}
