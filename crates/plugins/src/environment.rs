//! Isolated per-plugin environments.
//!
//! Layout under the envs root:
//!
//! ```text
//! <envs>/<plugin>/environment.json   commit marker
//! <envs>/<plugin>/gen-<uuid>/        one generation per install
//! ```
//!
//! A new generation is built beside the live one and becomes visible when
//! the marker is replaced. Environments such as virtualenvs embed their own
//! path, so generations are never renamed. Generation names start with
//! their creation time in milliseconds, so older ones sort first.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use {
    serde::{Deserialize, Serialize},
    tracing::{debug, info, warn},
};

use crate::{
    descriptor::PluginDescriptor,
    error::{Error, Result},
    installer::DependencyInstaller,
    locks::{LockRole, PluginLock, PluginLocks},
    runtime::{Runtime, Runtimes},
    signature::Signature,
    store::{load_json, save_json},
};

pub const MARKER_FILE: &str = "environment.json";
const GENERATION_PREFIX: &str = "gen-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentRecord {
    pub plugin_name: String,
    /// Root of the committed generation.
    pub path: PathBuf,
    pub installed_signature: Signature,
    pub tool_storage_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CommitMarker {
    plugin_name: String,
    generation: String,
    installed_signature: Signature,
    committed_at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnsureAction {
    Reused,
    Provisioned,
}

pub struct EnvironmentManager {
    envs_dir: PathBuf,
    tools_dir: PathBuf,
    runtimes: Runtimes,
    locks: PluginLocks,
}

impl EnvironmentManager {
    pub fn new(
        envs_dir: PathBuf,
        tools_dir: PathBuf,
        runtimes: Runtimes,
        locks: PluginLocks,
    ) -> Self {
        Self {
            envs_dir,
            tools_dir,
            runtimes,
            locks,
        }
    }

    pub fn envs_dir(&self) -> &Path {
        &self.envs_dir
    }

    pub fn tools_dir(&self) -> &Path {
        &self.tools_dir
    }

    pub fn runtimes(&self) -> &Runtimes {
        &self.runtimes
    }

    pub fn locks(&self) -> &PluginLocks {
        &self.locks
    }

    /// Directory holding all generations of `name`.
    pub fn plugin_root(&self, name: &str) -> PathBuf {
        self.envs_dir.join(name)
    }

    pub fn tool_storage(&self, name: &str) -> PathBuf {
        self.tools_dir.join(name)
    }

    /// Create the persistent tool storage for `name` if missing.
    pub fn ensure_tool_storage(&self, name: &str) -> Result<PathBuf> {
        let path = self.tool_storage(name);
        std::fs::create_dir_all(&path).map_err(|e| Error::environment(name, e))?;
        Ok(path)
    }

    /// The committed environment of `name`, if one exists on disk.
    pub fn current(&self, name: &str) -> Option<EnvironmentRecord> {
        let marker = self.read_marker(name)?;
        let path = self.plugin_root(name).join(&marker.generation);
        if !path.is_dir() {
            warn!(
                plugin = name,
                generation = %marker.generation,
                "committed generation is missing"
            );
            return None;
        }
        Some(EnvironmentRecord {
            plugin_name: name.to_string(),
            path,
            installed_signature: marker.installed_signature,
            tool_storage_path: self.tool_storage(name),
        })
    }

    /// Make sure `descriptor` has a committed environment matching its
    /// declared dependencies.
    ///
    /// On failure the previous committed environment, if any, is untouched.
    pub async fn ensure(
        &self,
        descriptor: &PluginDescriptor,
    ) -> Result<(EnvironmentRecord, EnsureAction)> {
        let name = descriptor.name.as_str();
        let runtime = self.runtimes.get(&descriptor.runtime).ok_or_else(|| {
            Error::environment(
                name,
                format!("no runtime configured for '.{}' files", descriptor.runtime),
            )
        })?;
        let dependencies = descriptor.dependencies();
        let signature = Signature::of(dependencies);

        let lock = self.locks.get(name);
        let _provisioning = lock.provisioning.lock().await;
        let mut provisioning_file = self
            .locks
            .file(name, LockRole::Provisioning)
            .map_err(|e| Error::environment(name, e))?;
        provisioning_file
            .exclusive(self.ensure_locked(name, runtime, dependencies, signature, &lock))
            .await
            .map_err(|e| Error::environment(name, e))?
    }

    /// Body of [`Self::ensure`]; caller holds both provisioning locks.
    async fn ensure_locked(
        &self,
        name: &str,
        runtime: Arc<dyn Runtime>,
        dependencies: &[String],
        signature: Signature,
        lock: &PluginLock,
    ) -> Result<(EnvironmentRecord, EnsureAction)> {
        if let Some(record) = self.current(name)
            && record.installed_signature == signature
            && DependencyInstaller::is_current(&record.path, &signature)
        {
            debug!(plugin = name, signature = signature.short(), "reusing environment");
            return Ok((record, EnsureAction::Reused));
        }

        let plugin_root = self.plugin_root(name);
        std::fs::create_dir_all(&plugin_root).map_err(|e| Error::environment(name, e))?;
        let generation = new_generation(&plugin_root);
        let gen_dir = plugin_root.join(&generation);

        info!(
            plugin = name,
            %generation,
            signature = signature.short(),
            "provisioning environment"
        );
        let built = async {
            runtime
                .provision(&gen_dir)
                .await
                .map_err(|e| Error::environment(name, e))?;
            DependencyInstaller::new(runtime.clone())
                .install(name, &gen_dir, dependencies)
                .await
        }
        .await;

        let outcome = match built {
            Ok(outcome) => outcome,
            Err(e) => {
                discard(&gen_dir);
                return Err(e);
            },
        };

        let marker = CommitMarker {
            plugin_name: name.to_string(),
            generation: generation.clone(),
            installed_signature: outcome.signature().clone(),
            committed_at_ms: now_ms(),
        };

        let committed: Result<()> = async {
            let _live = lock.live.write().await;
            let mut live_file = self.locks.file(name, LockRole::Live)?;
            live_file
                .exclusive(async {
                    save_json(&plugin_root.join(MARKER_FILE), &marker)?;
                    retire_generations(&plugin_root, &generation);
                    Ok::<_, Error>(())
                })
                .await?
        }
        .await;
        if let Err(e) = committed {
            discard(&gen_dir);
            return Err(Error::environment(name, e));
        }

        info!(plugin = name, %generation, "environment committed");
        Ok((
            EnvironmentRecord {
                plugin_name: name.to_string(),
                path: gen_dir,
                installed_signature: marker.installed_signature,
                tool_storage_path: self.tool_storage(name),
            },
            EnsureAction::Provisioned,
        ))
    }

    fn read_marker(&self, name: &str) -> Option<CommitMarker> {
        match load_json::<CommitMarker>(&self.plugin_root(name).join(MARKER_FILE)) {
            Ok(marker) => marker,
            Err(e) => {
                warn!(plugin = name, error = %e, "unreadable environment marker");
                None
            },
        }
    }
}

/// Name for a new generation of the plugin at `plugin_root`, sorting after
/// every generation already there.
fn new_generation(plugin_root: &Path) -> String {
    let latest = generation_names(plugin_root)
        .iter()
        .filter_map(|name| generation_stamp(name))
        .max();
    let stamp = match latest {
        Some(latest) => now_ms().max(latest + 1),
        None => now_ms(),
    };
    format!(
        "{GENERATION_PREFIX}{stamp:013}-{}",
        uuid::Uuid::new_v4().simple()
    )
}

fn generation_stamp(name: &str) -> Option<u64> {
    let rest = name.strip_prefix(GENERATION_PREFIX)?;
    let (stamp, _) = rest.split_once('-')?;
    stamp.parse().ok()
}

fn generation_names(plugin_root: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(plugin_root) else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|entry| entry.file_name().to_str().map(String::from))
        .filter(|name| name.starts_with(GENERATION_PREFIX))
        .collect()
}

/// Delete the generations of a plugin created before `keep`. Caller holds
/// the plugin's live locks.
fn retire_generations(plugin_root: &Path, keep: &str) {
    for name in generation_names(plugin_root) {
        if name.as_str() >= keep {
            continue;
        }
        debug!(generation = %name, "retiring environment generation");
        discard(&plugin_root.join(name));
    }
}

fn discard(dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(dir)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %dir.display(), error = %e, "failed to remove environment directory");
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
