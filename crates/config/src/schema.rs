/// Config schema types (paths, update cycle, dispatch, runtimes).
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

/// Environment variable that carries the tool-storage path into plugins.
pub const DEFAULT_TOOL_PATH_ENV: &str = "SUBCOMMAND_TOOL_PATH";

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubhostConfig {
    pub paths: PathsConfig,
    pub update: UpdateConfig,
    pub dispatch: DispatchConfig,
    /// Runtimes keyed by the plugin file extension they handle (`py`, `sh`).
    pub runtimes: BTreeMap<String, RuntimeConfig>,
}

impl Default for SubhostConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            update: UpdateConfig::default(),
            dispatch: DispatchConfig::default(),
            runtimes: default_runtimes(),
        }
    }
}

fn default_runtimes() -> BTreeMap<String, RuntimeConfig> {
    BTreeMap::from([
        ("py".to_string(), RuntimeConfig::new(RuntimeKind::Python)),
        ("sh".to_string(), RuntimeConfig::new(RuntimeKind::Shell)),
    ])
}

/// Filesystem roots. Unset entries live under the data directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory scanned for plugin source files.
    pub plugins_dir: Option<PathBuf>,
    /// Root of the per-plugin isolated environments.
    pub envs_dir: Option<PathBuf>,
    /// Root of the per-plugin persistent tool storage.
    pub tools_dir: Option<PathBuf>,
    /// Where the last completed registry snapshot is persisted.
    pub registry_file: Option<PathBuf>,
}

impl PathsConfig {
    /// Fill unset paths from `data_dir`.
    pub fn resolve(&self, data_dir: &Path) -> ResolvedPaths {
        ResolvedPaths {
            plugins_dir: self
                .plugins_dir
                .clone()
                .unwrap_or_else(|| data_dir.join("plugins")),
            envs_dir: self
                .envs_dir
                .clone()
                .unwrap_or_else(|| data_dir.join("envs")),
            tools_dir: self
                .tools_dir
                .clone()
                .unwrap_or_else(|| data_dir.join("tools")),
            registry_file: self
                .registry_file
                .clone()
                .unwrap_or_else(|| data_dir.join("registry.json")),
        }
    }
}

/// Fully resolved filesystem layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub plugins_dir: PathBuf,
    pub envs_dir: PathBuf,
    pub tools_dir: PathBuf,
    pub registry_file: PathBuf,
}

impl ResolvedPaths {
    /// Layout rooted at a single directory, as used by tests and `--data-dir`.
    pub fn under(root: &Path) -> Self {
        PathsConfig::default().resolve(root)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// How many plugins are provisioned at the same time.
    pub concurrency: usize,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self { concurrency: 4 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Upper bound for a single execution when neither the caller nor the
    /// plugin manifest sets one. `None` means unbounded.
    pub default_timeout_secs: Option<u64>,
    /// Name of the env var that points a plugin at its tool storage.
    pub tool_path_env: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: None,
            tool_path_env: DEFAULT_TOOL_PATH_ENV.into(),
        }
    }
}

/// Kind of isolated runtime a plugin extension is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// A virtualenv per plugin; dependencies installed with pip.
    Python,
    /// A plain directory; plugins run under a shell and declare no packages.
    Shell,
}

impl std::fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Python => write!(f, "python"),
            Self::Shell => write!(f, "shell"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub kind: RuntimeKind,
    /// Interpreter used to create environments or run scripts.
    #[serde(default)]
    pub interpreter: Option<String>,
    /// Extra arguments appended to every package install.
    #[serde(default)]
    pub install_args: Vec<String>,
}

impl RuntimeConfig {
    pub fn new(kind: RuntimeKind) -> Self {
        Self {
            kind,
            interpreter: None,
            install_args: Vec::new(),
        }
    }

    /// Configured interpreter, or the conventional one for the kind.
    pub fn interpreter(&self) -> &str {
        match (&self.interpreter, self.kind) {
            (Some(custom), _) => custom,
            (None, RuntimeKind::Python) => "python3",
            (None, RuntimeKind::Shell) => "sh",
        }
    }
}
