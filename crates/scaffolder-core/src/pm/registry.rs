//! Static table of supported package managers

use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

/// Installation scenario selecting a flag set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstallContext {
    Ci,
    Development,
    Production,
    Fast,
    Offline,
}

impl InstallContext {
    pub const ALL: [InstallContext; 5] = [
        InstallContext::Ci,
        InstallContext::Development,
        InstallContext::Production,
        InstallContext::Fast,
        InstallContext::Offline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InstallContext::Ci => "ci",
            InstallContext::Development => "development",
            InstallContext::Production => "production",
            InstallContext::Fast => "fast",
            InstallContext::Offline => "offline",
        }
    }
}

impl fmt::Display for InstallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optimization capabilities a manager may advertise
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Optimization {
    Parallel,
    Cache,
    Offline,
    Silent,
    Concurrent,
    NetworkOptimized,
}

/// Context flag table entry
pub type ContextFlags = (InstallContext, &'static [&'static str]);

#[derive(Debug, Clone)]
pub struct Optimizations {
    pub parallel: bool,
    pub cache: bool,
    pub offline: bool,
    pub silent: bool,
    pub concurrent: bool,
    pub network_optimized: bool,
    /// Extra flags per context, in the order they are passed
    pub contexts: &'static [ContextFlags],
}

impl Optimizations {
    pub fn flags(&self, context: InstallContext) -> &'static [&'static str] {
        self.contexts
            .iter()
            .find(|(ctx, _)| *ctx == context)
            .map(|(_, flags)| *flags)
            .unwrap_or(&[])
    }

    pub fn supports(&self, optimization: Optimization) -> bool {
        match optimization {
            Optimization::Parallel => self.parallel,
            Optimization::Cache => self.cache,
            Optimization::Offline => self.offline,
            Optimization::Silent => self.silent,
            Optimization::Concurrent => self.concurrent,
            Optimization::NetworkOptimized => self.network_optimized,
        }
    }
}

/// How to tell whether a manager is present and usable
#[derive(Debug, Clone)]
pub struct Verification {
    /// Version probe, e.g. `pnpm --version`
    pub probe: &'static str,
    pub timeout: Duration,
    /// Regex the trimmed probe output must match
    pub expected: &'static str,
    /// Functional check distinct from the version probe
    pub health_check: &'static str,
}

#[derive(Debug, Clone)]
pub struct ManagerDescriptor {
    pub name: &'static str,
    pub label: &'static str,
    pub command: &'static str,
    pub install: &'static str,
    pub ci_install: &'static str,
    pub lockfile: &'static str,
    pub base_flags: &'static [&'static str],
    pub global_install: &'static str,
    /// Lists top-level dependencies; used by post-install verification
    pub list: &'static str,
    /// Lower is preferred
    pub priority: i32,
    pub optimizations: Optimizations,
    pub verification: Verification,
    /// Home-relative directory the manager's own installer uses, when it
    /// installs outside the usual executable search path
    pub home_install_dir: Option<&'static str>,
}

impl ManagerDescriptor {
    pub fn install_tokens(&self) -> Vec<String> {
        tokens(self.install)
    }

    pub fn ci_install_tokens(&self) -> Vec<String> {
        tokens(self.ci_install)
    }

    pub fn has_distinct_ci_command(&self) -> bool {
        self.ci_install.trim() != self.install.trim()
    }

    pub fn context_flags(&self, context: InstallContext) -> &'static [&'static str] {
        self.optimizations.flags(context)
    }
}

fn tokens(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_string).collect()
}

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const VERSION_PATTERN: &str = r"^v?\d+\.\d+\.\d+";

const BUN: ManagerDescriptor = ManagerDescriptor {
    name: "bun",
    label: "Bun",
    command: "bun",
    install: "bun install",
    ci_install: "bun install --frozen-lockfile",
    lockfile: "bun.lockb",
    base_flags: &[],
    global_install: "bun add -g",
    list: "bun pm ls",
    priority: 1,
    optimizations: Optimizations {
        parallel: true,
        cache: true,
        offline: false,
        silent: true,
        concurrent: true,
        network_optimized: true,
        contexts: &[
            (InstallContext::Ci, &["--frozen-lockfile", "--silent"]),
            (InstallContext::Development, &[]),
            (InstallContext::Production, &["--production"]),
            (InstallContext::Fast, &["--silent"]),
            (InstallContext::Offline, &[]),
        ],
    },
    verification: Verification {
        probe: "bun --version",
        timeout: PROBE_TIMEOUT,
        expected: VERSION_PATTERN,
        health_check: "bun pm cache",
    },
    home_install_dir: Some(".bun/bin"),
};

const PNPM: ManagerDescriptor = ManagerDescriptor {
    name: "pnpm",
    label: "pnpm",
    command: "pnpm",
    install: "pnpm install",
    ci_install: "pnpm install --frozen-lockfile",
    lockfile: "pnpm-lock.yaml",
    base_flags: &[],
    global_install: "pnpm add -g",
    list: "pnpm list --depth=0",
    priority: 2,
    optimizations: Optimizations {
        parallel: true,
        cache: true,
        offline: true,
        silent: true,
        concurrent: true,
        network_optimized: true,
        contexts: &[
            (InstallContext::Ci, &["--frozen-lockfile", "--reporter=silent"]),
            (InstallContext::Development, &["--prefer-offline"]),
            (InstallContext::Production, &["--prod", "--frozen-lockfile"]),
            (InstallContext::Fast, &["--frozen-lockfile", "--reporter=silent"]),
            (InstallContext::Offline, &["--offline"]),
        ],
    },
    verification: Verification {
        probe: "pnpm --version",
        timeout: PROBE_TIMEOUT,
        expected: VERSION_PATTERN,
        health_check: "pnpm store path",
    },
    home_install_dir: None,
};

const YARN: ManagerDescriptor = ManagerDescriptor {
    name: "yarn",
    label: "Yarn",
    command: "yarn",
    install: "yarn install",
    ci_install: "yarn install --frozen-lockfile",
    lockfile: "yarn.lock",
    base_flags: &[],
    global_install: "yarn global add",
    list: "yarn list --depth=0",
    priority: 3,
    optimizations: Optimizations {
        parallel: false,
        cache: true,
        offline: true,
        silent: true,
        concurrent: false,
        network_optimized: true,
        contexts: &[
            (
                InstallContext::Ci,
                &["--frozen-lockfile", "--non-interactive", "--silent"],
            ),
            (InstallContext::Development, &[]),
            (InstallContext::Production, &["--production"]),
            (InstallContext::Fast, &["--prefer-offline", "--silent"]),
            (InstallContext::Offline, &["--offline"]),
        ],
    },
    verification: Verification {
        probe: "yarn --version",
        timeout: PROBE_TIMEOUT,
        expected: VERSION_PATTERN,
        health_check: "yarn cache dir",
    },
    home_install_dir: None,
};

const NPM: ManagerDescriptor = ManagerDescriptor {
    name: "npm",
    label: "npm",
    command: "npm",
    install: "npm install",
    ci_install: "npm ci",
    lockfile: "package-lock.json",
    base_flags: &["--no-audit", "--no-fund"],
    global_install: "npm install -g",
    list: "npm ls --depth=0",
    priority: 4,
    optimizations: Optimizations {
        parallel: false,
        cache: true,
        offline: true,
        silent: true,
        concurrent: false,
        network_optimized: false,
        contexts: &[
            (InstallContext::Ci, &["--no-audit", "--no-fund", "--silent"]),
            (InstallContext::Development, &[]),
            (InstallContext::Production, &["--omit=dev"]),
            (
                InstallContext::Fast,
                &["--prefer-offline", "--no-audit", "--no-fund"],
            ),
            (InstallContext::Offline, &["--offline"]),
        ],
    },
    verification: Verification {
        probe: "npm --version",
        timeout: PROBE_TIMEOUT,
        expected: VERSION_PATTERN,
        health_check: "npm config get cache",
    },
    home_install_dir: None,
};

/// npm ships with Node.js, so it is always assumed present
pub static NPM_FALLBACK: ManagerDescriptor = NPM;

static BUILTIN: [ManagerDescriptor; 4] = [BUN, PNPM, YARN, NPM];

/// Read-only mapping from manager name to descriptor
#[derive(Debug, Clone)]
pub struct Registry {
    managers: Vec<ManagerDescriptor>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Registry {
    /// bun, pnpm, yarn and npm
    pub fn builtin() -> Self {
        Self::new(BUILTIN.to_vec())
    }

    pub fn new(managers: Vec<ManagerDescriptor>) -> Self {
        Self { managers }
    }

    /// Descriptors in declaration order
    pub fn managers(&self) -> &[ManagerDescriptor] {
        &self.managers
    }

    pub fn get(&self, name: &str) -> Option<&ManagerDescriptor> {
        self.managers
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(name.trim()))
    }

    /// Ascending priority; equal priorities keep declaration order
    pub fn by_priority(&self) -> Vec<&ManagerDescriptor> {
        let mut ordered: Vec<&ManagerDescriptor> = self.managers.iter().collect();
        ordered.sort_by_key(|m| m.priority);
        ordered
    }

    pub fn context_flags(&self, name: &str, context: InstallContext) -> &[&'static str] {
        self.get(name)
            .map(|m| m.context_flags(context))
            .unwrap_or(&[])
    }

    pub fn supports(&self, name: &str, optimization: Optimization) -> bool {
        self.get(name)
            .is_some_and(|m| m.optimizations.supports(optimization))
    }

    /// The registry's npm entry, or the built-in one
    pub fn npm(&self) -> &ManagerDescriptor {
        self.get("npm").unwrap_or(&NPM_FALLBACK)
    }

    /// Declaration index, used as a stable tie-break
    pub fn position(&self, name: &str) -> usize {
        self.managers
            .iter()
            .position(|m| m.name == name)
            .unwrap_or(usize::MAX)
    }
}

/// A descriptor that does not satisfy the registry schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub manager: String,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.manager, self.message)
    }
}

/// Check every descriptor and collect all violations
pub fn validate_registry(registry: &Registry) -> Vec<Violation> {
    let mut violations = Vec::new();

    for manager in registry.managers() {
        let mut push = |message: String| {
            violations.push(Violation {
                manager: if manager.name.is_empty() {
                    "<unnamed>".to_string()
                } else {
                    manager.name.to_string()
                },
                message,
            })
        };

        for (field, value) in [
            ("name", manager.name),
            ("command", manager.command),
            ("install", manager.install),
            ("ci_install", manager.ci_install),
            ("lockfile", manager.lockfile),
            ("global_install", manager.global_install),
            ("list", manager.list),
            ("verification.probe", manager.verification.probe),
            ("verification.health_check", manager.verification.health_check),
        ] {
            if value.trim().is_empty() {
                push(format!("missing required field `{}`", field));
            }
        }

        if manager.priority <= 0 {
            push(format!(
                "priority must be a positive integer, got {}",
                manager.priority
            ));
        }

        for flag in manager.base_flags {
            if !flag.starts_with('-') {
                push(format!("base flag `{}` is not a flag", flag));
            }
        }

        let mut seen = HashSet::new();
        for (context, flags) in manager.optimizations.contexts {
            if !seen.insert(*context) {
                push(format!("context `{}` is defined more than once", context));
            }
            for flag in flags.iter() {
                if !flag.starts_with('-') {
                    push(format!("context `{}` has invalid flag `{}`", context, flag));
                }
            }
        }
        for context in InstallContext::ALL {
            if !seen.contains(&context) {
                push(format!("missing flags for context `{}`", context));
            }
        }

        if manager.verification.timeout.is_zero() {
            push("verification timeout must be greater than zero".to_string());
        }
        if let Err(e) = Regex::new(manager.verification.expected) {
            push(format!("invalid expected output pattern: {}", e));
        }
    }

    if registry.get("npm").is_none() {
        violations.push(Violation {
            manager: "npm".to_string(),
            message: "registry has no npm entry; the built-in one will be used".to_string(),
        });
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_is_valid() {
        let violations = validate_registry(&Registry::builtin());
        assert!(violations.is_empty(), "{:?}", violations);
    }

    #[test]
    fn test_every_priority_positive_and_every_context_defined() {
        let registry = Registry::builtin();
        for manager in registry.managers() {
            assert!(manager.priority > 0);
            for context in InstallContext::ALL {
                assert!(manager
                    .optimizations
                    .contexts
                    .iter()
                    .any(|(ctx, _)| *ctx == context));
            }
        }
    }

    #[test]
    fn test_by_priority_order() {
        let registry = Registry::builtin();
        let names: Vec<&str> = registry.by_priority().iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["bun", "pnpm", "yarn", "npm"]);
    }

    #[test]
    fn test_context_flags_unknown_manager_is_empty() {
        let registry = Registry::builtin();
        assert!(registry.context_flags("cargo", InstallContext::Fast).is_empty());
        assert_eq!(
            registry.context_flags("pnpm", InstallContext::Fast),
            &["--frozen-lockfile", "--reporter=silent"]
        );
    }

    #[test]
    fn test_supports_is_absent_safe() {
        let registry = Registry::builtin();
        assert!(registry.supports("pnpm", Optimization::Parallel));
        assert!(!registry.supports("npm", Optimization::Parallel));
        assert!(!registry.supports("nope", Optimization::Cache));
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = Registry::builtin();
        assert_eq!(registry.get("PNPM").map(|m| m.name), Some("pnpm"));
    }

    #[test]
    fn test_validation_collects_all_violations() {
        let broken = ManagerDescriptor {
            name: "broken",
            command: "",
            priority: 0,
            optimizations: Optimizations {
                contexts: &[
                    (InstallContext::Ci, &["frozen"]),
                    (InstallContext::Ci, &[]),
                ],
                ..BUN.optimizations
            },
            verification: Verification {
                expected: "(",
                ..BUN.verification
            },
            ..BUN
        };
        let violations = validate_registry(&Registry::new(vec![broken]));
        let messages: Vec<String> = violations.iter().map(|v| v.to_string()).collect();

        assert!(messages.iter().any(|m| m.contains("`command`")));
        assert!(messages.iter().any(|m| m.contains("priority")));
        assert!(messages.iter().any(|m| m.contains("invalid flag `frozen`")));
        assert!(messages.iter().any(|m| m.contains("more than once")));
        assert!(messages.iter().any(|m| m.contains("context `development`")));
        assert!(messages.iter().any(|m| m.contains("pattern")));
        assert!(messages.iter().any(|m| m.starts_with("npm:")));
    }

    #[test]
    fn test_npm_fallback_when_missing() {
        let registry = Registry::new(vec![BUN]);
        assert_eq!(registry.npm().name, "npm");
    }

    #[test]
    fn test_distinct_ci_command() {
        assert!(NPM.has_distinct_ci_command());
        assert_eq!(NPM.ci_install_tokens(), vec!["npm", "ci"]);
    }
}
