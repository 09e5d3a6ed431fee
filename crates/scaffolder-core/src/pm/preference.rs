//! Package manager preferences from the project, the user, and lockfiles

use super::install::INSTALL_TIMEOUT;
use super::registry::Registry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Overrides the directory holding the user preferences file
pub const CONFIG_DIR_ENV: &str = "CREATE_STACK_CONFIG_DIR";

/// Project-level preference file, at the project root
pub const PROJECT_PREFERENCE_FILE: &str = ".create-stack.json";

const USER_PREFERENCE_FILE: &str = "preferences.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserPreferences {
    pub preferred_manager: Option<String>,
    pub auto_install_missing: bool,
    pub fallback_enabled: bool,
    pub installation_timeout_secs: u64,
    /// Project path to manager name
    pub project_preferences: BTreeMap<String, String>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            preferred_manager: None,
            auto_install_missing: false,
            fallback_enabled: true,
            installation_timeout_secs: INSTALL_TIMEOUT.as_secs(),
            project_preferences: BTreeMap::new(),
            last_updated: None,
        }
    }
}

impl UserPreferences {
    pub fn installation_timeout(&self) -> Duration {
        if self.installation_timeout_secs == 0 {
            INSTALL_TIMEOUT
        } else {
            Duration::from_secs(self.installation_timeout_secs)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectPreference {
    pub package_manager: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferenceSource {
    Project,
    Detected,
    User,
    None,
}

/// The effective manager choice and where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preference {
    pub manager: Option<String>,
    pub source: PreferenceSource,
    /// Lower-precedence signals that named a different manager
    pub conflicts: Vec<(PreferenceSource, String)>,
}

impl Preference {
    pub fn none() -> Self {
        Self {
            manager: None,
            source: PreferenceSource::None,
            conflicts: Vec::new(),
        }
    }
}

/// Pick one signal: project > detected > user > none
pub fn resolve_conflict(
    project: Option<&str>,
    detected: Option<&str>,
    user: Option<&str>,
) -> Preference {
    let signals = [
        (PreferenceSource::Project, project),
        (PreferenceSource::Detected, detected),
        (PreferenceSource::User, user),
    ];

    let mut present = signals
        .into_iter()
        .filter_map(|(source, name)| Some((source, name?.trim())))
        .filter(|(_, name)| !name.is_empty());

    let Some((source, chosen)) = present.next() else {
        return Preference::none();
    };

    let conflicts = present
        .filter(|(_, name)| !name.eq_ignore_ascii_case(chosen))
        .map(|(source, name)| (source, name.to_string()))
        .collect();

    Preference {
        manager: Some(chosen.to_string()),
        source,
        conflicts,
    }
}

/// Manager whose lockfile is present, first by priority
pub fn detect_from_lockfiles<'a>(registry: &'a Registry, dir: &Path) -> Option<&'a str> {
    registry
        .by_priority()
        .into_iter()
        .find(|m| dir.join(m.lockfile).is_file())
        .map(|m| m.name)
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Option<T> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read preferences");
            return None;
        }
    };
    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring malformed preferences");
            None
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> bool {
    let result = path
        .parent()
        .map_or(Ok(()), fs::create_dir_all)
        .and_then(|_| {
            let content = serde_json::to_string_pretty(value)
                .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;
            fs::write(path, content + "\n")
        });
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not save preferences");
            false
        }
    }
}

/// Project preference file contents, if readable
pub fn read_project_preference(project_dir: &Path) -> Option<String> {
    read_json::<ProjectPreference>(&project_dir.join(PROJECT_PREFERENCE_FILE))
        .map(|p| p.package_manager)
}

pub fn write_project_preference(project_dir: &Path, manager: &str) -> bool {
    write_json(
        &project_dir.join(PROJECT_PREFERENCE_FILE),
        &ProjectPreference {
            package_manager: manager.to_string(),
        },
    )
}

fn project_key(project_dir: &Path) -> String {
    project_dir
        .canonicalize()
        .unwrap_or_else(|_| project_dir.to_path_buf())
        .display()
        .to_string()
}

/// Reads and writes the user-level preferences file
#[derive(Debug, Clone)]
pub struct PreferenceStore {
    user_file: PathBuf,
}

impl PreferenceStore {
    pub fn new(user_file: impl Into<PathBuf>) -> Self {
        Self {
            user_file: user_file.into(),
        }
    }

    /// `$CREATE_STACK_CONFIG_DIR`, else the platform config directory
    pub fn default_location() -> Self {
        let dir = std::env::var_os(CONFIG_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs_next::config_dir().map_or_else(
                    || {
                        dirs_next::home_dir().map_or_else(
                            || PathBuf::from(".create-stack"),
                            |home| home.join(".config").join("create-stack"),
                        )
                    },
                    |config| config.join("create-stack"),
                )
            });
        Self::new(dir.join(USER_PREFERENCE_FILE))
    }

    pub fn user_file(&self) -> &Path {
        &self.user_file
    }

    /// Missing or unreadable files yield defaults
    pub fn load_user(&self) -> UserPreferences {
        read_json(&self.user_file).unwrap_or_default()
    }

    pub fn save_user(&self, preferences: &UserPreferences) -> bool {
        let mut preferences = preferences.clone();
        preferences.last_updated = Some(Utc::now());
        write_json(&self.user_file, &preferences)
    }

    /// Project file first, then the user's entry for this project
    pub fn project_preference(&self, project_dir: &Path) -> Option<String> {
        read_project_preference(project_dir).or_else(|| {
            self.load_user()
                .project_preferences
                .get(&project_key(project_dir))
                .cloned()
        })
    }

    pub fn effective_preference(&self, registry: &Registry, project_dir: &Path) -> Preference {
        let project = self.project_preference(project_dir);
        let detected = detect_from_lockfiles(registry, project_dir);
        let user = self.load_user().preferred_manager;
        resolve_conflict(project.as_deref(), detected, user.as_deref())
    }

    /// Persist the choice for this project in both files
    pub fn remember_project(&self, project_dir: &Path, manager: &str) -> bool {
        let wrote_project = write_project_preference(project_dir, manager);

        let mut user = self.load_user();
        user.project_preferences
            .insert(project_key(project_dir), manager.to_string());
        let wrote_user = self.save_user(&user);

        wrote_project && wrote_user
    }
}
