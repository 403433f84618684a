//! Registry of plugin status and schemas, published as immutable snapshots.
//!
//! A snapshot is built from a finished update cycle and swapped in whole;
//! readers clone an `Arc` and never wait on a rebuild. When a store path is
//! set, each snapshot is also written to disk so that later processes see
//! the last completed cycle.

use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::{Arc, RwLock},
    time::{SystemTime, UNIX_EPOCH},
};

use {
    serde::{Deserialize, Serialize},
    tracing::{debug, warn},
};

use crate::{
    descriptor::{DescriptorSet, PluginStatus},
    environment::EnvironmentRecord,
    manifest::{InputField, ModeSpec},
    store::{load_json, save_json},
};

/// What dispatch needs to start a Ready plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub source_path: PathBuf,
    /// Runtime extension.
    pub runtime: String,
    pub environment: EnvironmentRecord,
    /// Manifest-level execution bound in seconds.
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub status: PluginStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Vec<InputField>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modes: Option<BTreeMap<String, ModeSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch: Option<LaunchSpec>,
}

/// Public view of an entry, as printed by `list`.
#[derive(Debug, Serialize)]
pub struct ListedPlugin<'a> {
    pub status: PluginStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<&'a Vec<InputField>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modes: Option<&'a BTreeMap<String, ModeSpec>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'a str>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub built_at_ms: u64,
    plugins: BTreeMap<String, SnapshotEntry>,
}

impl Snapshot {
    /// Build a snapshot from the descriptors of one scan and the
    /// environments committed for them.
    pub fn build(
        descriptors: &DescriptorSet,
        environments: &BTreeMap<String, EnvironmentRecord>,
    ) -> Self {
        let mut plugins = BTreeMap::new();
        for descriptor in descriptors.iter() {
            let mut entry = SnapshotEntry {
                status: descriptor.status,
                input_schema: None,
                modes: None,
                error: descriptor.last_error.clone(),
                launch: None,
            };

            if descriptor.status != PluginStatus::Error
                && let Some(manifest) = &descriptor.manifest
            {
                entry.input_schema = manifest.listed_input_schema();
                entry.modes = Some(manifest.modes());

                if descriptor.status == PluginStatus::Ready {
                    match environments.get(&descriptor.name) {
                        Some(environment) => {
                            entry.launch = Some(LaunchSpec {
                                source_path: descriptor.source_path.clone(),
                                runtime: descriptor.runtime.clone(),
                                environment: environment.clone(),
                                timeout_secs: manifest.timeout,
                            });
                        },
                        None => {
                            entry = SnapshotEntry {
                                status: PluginStatus::Error,
                                input_schema: None,
                                modes: None,
                                error: Some("no committed environment".into()),
                                launch: None,
                            };
                        },
                    }
                }
            }

            plugins.insert(descriptor.name.clone(), entry);
        }

        Self {
            built_at_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
            plugins,
        }
    }

    pub fn get(&self, name: &str) -> Option<&SnapshotEntry> {
        self.plugins.get(name)
    }

    /// Launch spec of `name` when it is Ready.
    pub fn ready(&self, name: &str) -> Option<&LaunchSpec> {
        self.plugins
            .get(name)
            .filter(|entry| entry.status == PluginStatus::Ready)
            .and_then(|entry| entry.launch.as_ref())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Name to `{status, input_schema?, modes?, error?}`.
    pub fn listing(&self) -> BTreeMap<&str, ListedPlugin<'_>> {
        self.plugins
            .iter()
            .map(|(name, entry)| {
                (name.as_str(), ListedPlugin {
                    status: entry.status,
                    input_schema: entry.input_schema.as_ref(),
                    modes: entry.modes.as_ref(),
                    error: entry.error.as_deref(),
                })
            })
            .collect()
    }
}

pub struct Registry {
    current: RwLock<Arc<Snapshot>>,
    store: Option<PathBuf>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// In-memory registry starting from an empty snapshot.
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(Snapshot::default())),
            store: None,
        }
    }

    /// Registry persisted at `path`, seeded from it when present.
    pub fn with_store(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let initial = match load_json::<Snapshot>(&path) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => Snapshot::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable registry file");
                Snapshot::default()
            },
        };
        Self {
            current: RwLock::new(Arc::new(initial)),
            store: Some(path),
        }
    }

    /// Build and publish a new snapshot.
    pub fn rebuild(
        &self,
        descriptors: &DescriptorSet,
        environments: &BTreeMap<String, EnvironmentRecord>,
    ) -> Arc<Snapshot> {
        let snapshot = Arc::new(Snapshot::build(descriptors, environments));
        self.publish(Arc::clone(&snapshot));
        snapshot
    }

    pub fn publish(&self, snapshot: Arc<Snapshot>) {
        if let Some(path) = &self.store
            && let Err(e) = save_json(path, snapshot.as_ref())
        {
            warn!(path = %path.display(), error = %e, "failed to persist registry snapshot");
        }
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = snapshot;
        debug!(count = current.len(), "registry snapshot published");
    }

    /// The last published snapshot.
    pub fn read(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(|e| e.into_inner()))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            descriptor::PluginDescriptor,
            manifest::{FieldType, IMPLICIT_MODE, PluginManifest},
            signature::Signature,
        },
    };

    fn descriptor(name: &str, status: PluginStatus) -> PluginDescriptor {
        PluginDescriptor {
            name: name.into(),
            source_path: PathBuf::from(format!("/plugins/{name}.py")),
            runtime: "py".into(),
            content_digest: String::new(),
            manifest: Some(PluginManifest {
                input_schema: Some(vec![InputField {
                    name: "path".into(),
                    display_name: None,
                    kind: FieldType::String,
                    required: true,
                    default: None,
                    description: None,
                    options: Vec::new(),
                    extra: Default::default(),
                }]),
                timeout: Some(30),
                ..Default::default()
            }),
            status,
            last_error: (status == PluginStatus::Error).then(|| "broken".to_string()),
        }
    }

    fn record(name: &str) -> EnvironmentRecord {
        EnvironmentRecord {
            plugin_name: name.into(),
            path: PathBuf::from(format!("/envs/{name}/gen-1")),
            installed_signature: Signature::of(&[]),
            tool_storage_path: PathBuf::from(format!("/tools/{name}")),
        }
    }

    fn fixture() -> (DescriptorSet, BTreeMap<String, EnvironmentRecord>) {
        let mut set = DescriptorSet::default();
        set.insert(descriptor("good", PluginStatus::Ready));
        set.insert(descriptor("bad", PluginStatus::Error));
        let envs = BTreeMap::from([("good".to_string(), record("good"))]);
        (set, envs)
    }

    #[test]
    fn error_entries_carry_no_schema_or_launch() {
        let (set, envs) = fixture();
        let snapshot = Snapshot::build(&set, &envs);

        let bad = snapshot.get("bad").unwrap();
        assert_eq!(bad.status, PluginStatus::Error);
        assert!(bad.input_schema.is_none());
        assert!(bad.launch.is_none());
        assert!(snapshot.ready("bad").is_none());

        let launch = snapshot.ready("good").unwrap();
        assert_eq!(launch.timeout_secs, Some(30));
        assert_eq!(launch.environment, record("good"));
    }

    #[test]
    fn ready_without_environment_is_demoted() {
        let mut set = DescriptorSet::default();
        set.insert(descriptor("orphan", PluginStatus::Ready));
        let snapshot = Snapshot::build(&set, &BTreeMap::new());
        assert_eq!(snapshot.get("orphan").unwrap().status, PluginStatus::Error);
        assert!(snapshot.ready("orphan").is_none());
    }

    #[test]
    fn listing_hides_launch_details() {
        let (set, envs) = fixture();
        let snapshot = Snapshot::build(&set, &envs);
        let json = serde_json::to_value(snapshot.listing()).unwrap();

        assert_eq!(json["good"]["status"], "ready");
        assert_eq!(json["good"]["input_schema"][0]["name"], "path");
        assert_eq!(
            json["good"]["modes"][IMPLICIT_MODE]["input_schema"][0]["name"],
            "path"
        );
        assert!(json["good"].get("launch").is_none());
        assert!(json["good"].get("error").is_none());
        assert_eq!(json["bad"]["status"], "error");
        assert_eq!(json["bad"]["error"], "broken");
        assert!(json["bad"].get("input_schema").is_none());
        assert!(json["bad"].get("modes").is_none());
    }

    #[test]
    fn read_returns_previous_snapshot_until_publish() {
        let registry = Registry::new();
        let before = registry.read();
        assert!(before.is_empty());

        let (set, envs) = fixture();
        registry.rebuild(&set, &envs);

        assert!(before.is_empty());
        assert_eq!(registry.read().names().collect::<Vec<_>>(), vec!["bad", "good"]);
    }

    #[test]
    fn persisted_snapshot_is_seen_by_new_registry() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("registry.json");
        let (set, envs) = fixture();

        let first = Registry::with_store(&path);
        let published = first.rebuild(&set, &envs);

        let second = Registry::with_store(&path);
        assert_eq!(*second.read(), *published);
        assert!(second.read().ready("good").is_some());
    }

    #[test]
    fn missing_or_corrupt_store_starts_empty() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(Registry::with_store(tmp.path().join("none.json")).read().is_empty());

        let corrupt = tmp.path().join("corrupt.json");
        std::fs::write(&corrupt, "[").unwrap();
        assert!(Registry::with_store(&corrupt).read().is_empty());
    }
}
