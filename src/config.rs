use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::engine::EngineSettings;
use which::which;

/// Environment variable that overrides `data_dir`.
pub const DATA_DIR_ENV: &str = "SCRIPTBOX_DATA_DIR";

/// Configuration for the unit endpoint
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct ServerConfig {
    /// Address to bind. Default: 127.0.0.1:0 (random port)
    pub bind: Option<String>,

    /// Shared secret for run requests. Default: random per process
    pub token: Option<String>,
}

impl ServerConfig {
    pub fn bind(&self) -> &str {
        self.bind.as_deref().unwrap_or("127.0.0.1:0")
    }
}

/// Configuration for scriptbox, read from .scriptbox.yaml
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct Config {
    /// Python interpreter name or path (default: python3)
    #[serde(default)]
    pub python: Option<String>,

    /// Seconds before an execute/introspect run is killed; 0 disables (default: 60)
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Seconds before a test run is killed; 0 disables (default: 300)
    #[serde(default)]
    pub test_timeout_secs: Option<u64>,

    /// Directory holding one subdirectory per workspace (default: ./workspaces)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Name of the entry function in typed-function fragments (default: run)
    #[serde(default)]
    pub entry_function: Option<String>,

    /// Arguments passed to pytest before the harness path.
    /// "<global>" expands to the global list.
    #[serde(default)]
    pub pytest_args: Option<Vec<String>>,

    /// Unit endpoint configuration
    #[serde(default)]
    pub server: ServerConfig,
}

/// Find the nearest .scriptbox.yaml by walking up from start_dir.
pub fn find_project_config(start_dir: &Path) -> Option<PathBuf> {
    let config_names = [".scriptbox.yaml", ".scriptbox.yml"];

    let mut dir = start_dir
        .canonicalize()
        .unwrap_or_else(|_| start_dir.to_path_buf());

    loop {
        for name in &config_names {
            let candidate = dir.join(name);
            if candidate.exists() {
                debug!(path = %candidate.display(), "config:found project config");
                return Some(candidate);
            }
        }
        if !dir.pop() {
            return None;
        }
    }
}

impl Config {
    /// Load and merge global and project configurations.
    pub fn load() -> anyhow::Result<Self> {
        debug!("config:loading");
        let global_config = Self::load_global()?.unwrap_or_default();
        let project_config = Self::load_project()?.unwrap_or_default();
        let config = global_config.merge(project_config);
        debug!(
            python = ?config.python,
            data_dir = ?config.data_dir,
            "config:loaded"
        );
        Ok(config)
    }

    /// Load configuration from a specific path.
    fn load_from_path(path: &Path) -> anyhow::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        debug!(path = %path.display(), "config:reading file");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {}", path.display()))?;
        serde_yaml::from_str(&contents)
            .map(Some)
            .with_context(|| format!("Failed to parse config at {}", path.display()))
    }

    /// Load `~/.config/scriptbox/config.{yaml,yml}`.
    fn load_global() -> anyhow::Result<Option<Self>> {
        let Some(home_dir) = home::home_dir() else {
            return Ok(None);
        };
        let dir = home_dir.join(".config/scriptbox");
        match ["config.yaml", "config.yml"]
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.exists())
        {
            Some(path) => Self::load_from_path(&path),
            None => Ok(None),
        }
    }

    /// Load the nearest project configuration above the current directory.
    fn load_project() -> anyhow::Result<Option<Self>> {
        let start_dir = env::current_dir().unwrap_or_default();
        match find_project_config(&start_dir) {
            Some(path) => Self::load_from_path(&path),
            None => Ok(None),
        }
    }

    /// Merge a project config into a global config.
    /// Project config takes precedence. For lists, "<global>" placeholder expands to global items.
    fn merge(self, project: Self) -> Self {
        /// Merge vectors with "<global>" placeholder expansion.
        fn merge_vec_with_placeholder(
            global: Option<Vec<String>>,
            project: Option<Vec<String>>,
        ) -> Option<Vec<String>> {
            match (global, project) {
                (Some(global_items), Some(project_items)) => {
                    if !project_items.iter().any(|s| s == "<global>") {
                        return Some(project_items);
                    }
                    let mut result = Vec::new();
                    for item in project_items {
                        if item == "<global>" {
                            result.extend(global_items.clone());
                        } else {
                            result.push(item);
                        }
                    }
                    Some(result)
                }
                (global, project) => project.or(global),
            }
        }

        Self {
            python: project.python.or(self.python),
            timeout_secs: project.timeout_secs.or(self.timeout_secs),
            test_timeout_secs: project.test_timeout_secs.or(self.test_timeout_secs),
            data_dir: project.data_dir.or(self.data_dir),
            entry_function: project.entry_function.or(self.entry_function),
            pytest_args: merge_vec_with_placeholder(self.pytest_args, project.pytest_args),
            server: ServerConfig {
                bind: project.server.bind.or(self.server.bind),
                token: project.server.token.or(self.server.token),
            },
        }
    }

    pub fn python(&self) -> &str {
        self.python.as_deref().unwrap_or("python3")
    }

    /// Resolve the interpreter to an absolute path.
    pub fn resolve_python(&self) -> anyhow::Result<PathBuf> {
        resolve_executable_path(self.python())
            .ok_or_else(|| anyhow::anyhow!("Python interpreter '{}' not found", self.python()))
    }

    /// Workspace root; the environment variable wins over the config files.
    pub fn data_dir(&self) -> PathBuf {
        if let Ok(dir) = env::var(DATA_DIR_ENV)
            && !dir.is_empty()
        {
            return PathBuf::from(dir);
        }
        self.data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("workspaces"))
    }

    pub fn engine_settings(&self) -> EngineSettings {
        let defaults = EngineSettings::default();
        EngineSettings {
            timeout: seconds(self.timeout_secs, defaults.timeout),
            test_timeout: seconds(self.test_timeout_secs, defaults.test_timeout),
            entry_function: self
                .entry_function
                .clone()
                .unwrap_or(defaults.entry_function),
            pytest_args: merge_global_default(self.pytest_args.clone(), defaults.pytest_args),
        }
    }
}

/// `Some(0)` disables the limit, `None` keeps the default.
fn seconds(value: Option<u64>, default: Option<Duration>) -> Option<Duration> {
    match value {
        Some(0) => None,
        Some(secs) => Some(Duration::from_secs(secs)),
        None => default,
    }
}

/// A lone "<global>" left after merging (no global list configured) expands to the defaults.
fn merge_global_default(configured: Option<Vec<String>>, defaults: Vec<String>) -> Vec<String> {
    match configured {
        None => defaults,
        Some(items) => items
            .into_iter()
            .flat_map(|item| {
                if item == "<global>" {
                    defaults.clone()
                } else {
                    vec![item]
                }
            })
            .collect(),
    }
}

/// Absolute path for an interpreter setting.
///
/// Paths (anything with a separator) are taken relative to the working
/// directory; bare names are looked up on PATH.
pub fn resolve_executable_path(executable: &str) -> Option<PathBuf> {
    let path = Path::new(executable);
    if path.is_absolute() {
        Some(path.to_path_buf())
    } else if path.components().count() > 1 || executable.contains('\\') {
        env::current_dir().ok().map(|dir| dir.join(path))
    } else {
        which(executable).ok()
    }
}
