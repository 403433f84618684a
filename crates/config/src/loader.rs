use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::SubhostConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "subhost.toml",
    "subhost.yaml",
    "subhost.yml",
    "subhost.json",
];

static CONFIG_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);
static DATA_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

fn read_override(slot: &Mutex<Option<PathBuf>>) -> Option<PathBuf> {
    slot.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

fn write_override(slot: &Mutex<Option<PathBuf>>, value: PathBuf) {
    *slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(value);
}

/// Override the config directory (e.g. from `--config-dir`).
pub fn set_config_dir(dir: PathBuf) {
    write_override(&CONFIG_DIR_OVERRIDE, dir);
}

/// Override the data directory (e.g. from `--data-dir`).
pub fn set_data_dir(dir: PathBuf) {
    write_override(&DATA_DIR_OVERRIDE, dir);
}

/// Returns the config directory: the override, else `~/.config/subhost/`.
pub fn config_dir() -> Option<PathBuf> {
    read_override(&CONFIG_DIR_OVERRIDE).or_else(|| {
        directories::ProjectDirs::from("", "", "subhost").map(|d| d.config_dir().to_path_buf())
    })
}

/// Returns the data directory holding plugins, environments, tool storage
/// and the registry snapshot.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = read_override(&DATA_DIR_OVERRIDE) {
        return dir;
    }
    directories::ProjectDirs::from("", "", "subhost")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".subhost"))
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<SubhostConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations, then apply env
/// overrides.
///
/// Search order:
/// 1. `./subhost.{toml,yaml,yml,json}` (project-local)
/// 2. `<config dir>/subhost.{toml,yaml,yml,json}`
///
/// Falls back to `SubhostConfig::default()` when nothing is found or the
/// file fails to parse.
pub fn discover_and_load() -> SubhostConfig {
    let config = match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(&path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                SubhostConfig::default()
            })
        },
        None => {
            debug!("no config file found, using defaults");
            SubhostConfig::default()
        },
    };
    apply_env_overrides(config)
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Apply `SUBHOST_*` environment overrides on top of a loaded config.
pub fn apply_env_overrides(config: SubhostConfig) -> SubhostConfig {
    apply_env_overrides_with(config, |name| std::env::var(name).ok())
}

fn apply_env_overrides_with(
    mut config: SubhostConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> SubhostConfig {
    if let Some(dir) = lookup("SUBHOST_PLUGINS_DIR") {
        config.paths.plugins_dir = Some(dir.into());
    }
    if let Some(dir) = lookup("SUBHOST_ENVS_DIR") {
        config.paths.envs_dir = Some(dir.into());
    }
    if let Some(dir) = lookup("SUBHOST_TOOLS_DIR") {
        config.paths.tools_dir = Some(dir.into());
    }
    if let Some(raw) = lookup("SUBHOST_DISPATCH_TIMEOUT") {
        match raw.trim().parse::<u64>() {
            Ok(secs) => config.dispatch.default_timeout_secs = Some(secs),
            Err(e) => warn!(value = %raw, error = %e, "ignoring invalid SUBHOST_DISPATCH_TIMEOUT"),
        }
    }
    config
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<SubhostConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::schema::RuntimeKind};

    #[test]
    fn loads_toml_config() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("subhost.toml");
        std::fs::write(
            &path,
            r#"
[paths]
plugins_dir = "/srv/plugins"

[update]
concurrency = 8
"#,
        )
        .unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.paths.plugins_dir.as_deref(), Some(Path::new("/srv/plugins")));
        assert_eq!(cfg.update.concurrency, 8);
    }

    #[test]
    fn loads_yaml_config() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("subhost.yaml");
        std::fs::write(
            &path,
            "runtimes:\n  sh:\n    kind: shell\n    interpreter: bash\n",
        )
        .unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.runtimes["sh"].kind, RuntimeKind::Shell);
        assert_eq!(cfg.runtimes["sh"].interpreter(), "bash");
    }

    #[test]
    fn loads_json_config() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("subhost.json");
        std::fs::write(&path, r#"{"dispatch": {"default_timeout_secs": 12}}"#).unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.dispatch.default_timeout_secs, Some(12));
    }

    #[test]
    fn rejects_unknown_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("subhost.ini");
        std::fs::write(&path, "x=1").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let lookup = |name: &str| match name {
            "SUBHOST_PLUGINS_DIR" => Some("/opt/plugins".to_string()),
            "SUBHOST_DISPATCH_TIMEOUT" => Some("45".to_string()),
            _ => None,
        };
        let cfg = apply_env_overrides_with(SubhostConfig::default(), lookup);
        assert_eq!(cfg.paths.plugins_dir.as_deref(), Some(Path::new("/opt/plugins")));
        assert_eq!(cfg.dispatch.default_timeout_secs, Some(45));
        assert!(cfg.paths.envs_dir.is_none());
    }

    #[test]
    fn invalid_timeout_override_is_ignored() {
        let lookup = |name: &str| (name == "SUBHOST_DISPATCH_TIMEOUT").then(|| "soon".to_string());
        let cfg = apply_env_overrides_with(SubhostConfig::default(), lookup);
        assert_eq!(cfg.dispatch.default_timeout_secs, None);
    }
}
