//! Ties discovery, environments, the registry, dispatch and cleanup into
//! the `update` / `list` / dispatch operations.

use std::{collections::BTreeMap, path::Path, sync::Arc, time::Duration};

use {
    futures::{StreamExt, stream},
    serde::Serialize,
    serde_json::Value,
    subhost_config::{DispatchConfig, ResolvedPaths, SubhostConfig, UpdateConfig},
    tokio::sync::Mutex,
    tracing::{info, warn},
};

use crate::{
    descriptor::{PluginDescriptor, PluginStatus},
    discovery::FsPluginDiscoverer,
    dispatch::Dispatcher,
    environment::{EnsureAction, EnvironmentManager, EnvironmentRecord},
    error::{Context, Error, Result},
    gc::GarbageCollector,
    locks::{LOCK_DIR, PluginLocks},
    registry::{Registry, Snapshot},
    runtime::Runtimes,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateAction {
    /// Environment already matched the declared dependencies.
    Reused,
    Provisioned,
    /// Metadata was invalid; no environment work was attempted.
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct PluginOutcome {
    pub name: String,
    pub status: PluginStatus,
    pub action: UpdateAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-plugin results of one update cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateReport {
    pub plugins: Vec<PluginOutcome>,
    /// Plugins whose leftover data was deleted.
    pub removed: Vec<String>,
}

impl UpdateReport {
    pub fn count(&self, action: UpdateAction) -> usize {
        self.plugins.iter().filter(|p| p.action == action).count()
    }

    pub fn get(&self, name: &str) -> Option<&PluginOutcome> {
        self.plugins.iter().find(|p| p.name == name)
    }
}

pub struct Orchestrator {
    paths: ResolvedPaths,
    discoverer: FsPluginDiscoverer,
    environments: Arc<EnvironmentManager>,
    registry: Registry,
    dispatcher: Dispatcher,
    gc: GarbageCollector,
    concurrency: usize,
    cycle: Mutex<()>,
}

impl Orchestrator {
    /// Build from a loaded config, resolving unset paths under `data_dir`.
    pub fn from_config(config: &SubhostConfig, data_dir: &Path) -> Self {
        Self::new(
            config.paths.resolve(data_dir),
            Runtimes::from_config(&config.runtimes),
            &config.update,
            &config.dispatch,
        )
    }

    pub fn new(
        paths: ResolvedPaths,
        runtimes: Runtimes,
        update: &UpdateConfig,
        dispatch: &DispatchConfig,
    ) -> Self {
        let discoverer = FsPluginDiscoverer::new(runtimes.extensions());
        let environments = Arc::new(EnvironmentManager::new(
            paths.envs_dir.clone(),
            paths.tools_dir.clone(),
            runtimes,
            PluginLocks::new(paths.envs_dir.join(LOCK_DIR)),
        ));
        let dispatcher = Dispatcher::new(
            Arc::clone(&environments),
            dispatch.tool_path_env.clone(),
            dispatch.default_timeout_secs.map(Duration::from_secs),
        );
        let gc = GarbageCollector::new(Arc::clone(&environments));
        let registry = Registry::with_store(paths.registry_file.clone());

        Self {
            paths,
            discoverer,
            environments,
            registry,
            dispatcher,
            gc,
            concurrency: update.concurrency.max(1),
            cycle: Mutex::new(()),
        }
    }

    pub fn paths(&self) -> &ResolvedPaths {
        &self.paths
    }

    pub fn environments(&self) -> &EnvironmentManager {
        &self.environments
    }

    /// Run one discovery → environments → registry → cleanup cycle.
    ///
    /// Per-plugin failures are recorded in the report; only failures that
    /// prevent the cycle itself (unusable roots) are returned as errors.
    pub async fn update(&self) -> Result<UpdateReport> {
        let _cycle = self.cycle.lock().await;

        for dir in [
            &self.paths.plugins_dir,
            &self.paths.envs_dir,
            &self.paths.tools_dir,
        ] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }

        let mut descriptors = self.discoverer.scan(&self.paths.plugins_dir)?;
        info!(count = descriptors.len(), "discovered plugins");

        let candidates: Vec<PluginDescriptor> = descriptors
            .iter()
            .filter(|d| !d.is_error())
            .cloned()
            .collect();
        let results: Vec<(String, Result<(EnvironmentRecord, EnsureAction)>)> =
            stream::iter(candidates)
                .map(|descriptor| async move {
                    let result = self.environments.ensure(&descriptor).await;
                    (descriptor.name, result)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        let mut actions = BTreeMap::new();
        let mut environments = BTreeMap::new();
        for (name, result) in results {
            let Some(descriptor) = descriptors.get_mut(&name) else {
                continue;
            };
            let committed = result.and_then(|(record, action)| {
                self.environments.ensure_tool_storage(&name)?;
                Ok((record, action))
            });
            match committed {
                Ok((record, action)) => {
                    descriptor.mark_ready();
                    environments.insert(name.clone(), record);
                    actions.insert(name, match action {
                        EnsureAction::Reused => UpdateAction::Reused,
                        EnsureAction::Provisioned => UpdateAction::Provisioned,
                    });
                },
                Err(e) => {
                    warn!(plugin = %name, error = %e, "plugin environment failed");
                    descriptor.mark_error(&e);
                    actions.insert(name, UpdateAction::Failed);
                },
            }
        }

        self.registry.rebuild(&descriptors, &environments);
        let removed = self.gc.collect(&descriptors).await;

        let report = UpdateReport {
            plugins: descriptors
                .iter()
                .map(|d| PluginOutcome {
                    name: d.name.clone(),
                    status: d.status,
                    action: actions
                        .get(&d.name)
                        .copied()
                        .unwrap_or(UpdateAction::Skipped),
                    error: d.last_error.clone(),
                })
                .collect(),
            removed: removed.into_iter().collect(),
        };

        info!(
            plugins = report.plugins.len(),
            provisioned = report.count(UpdateAction::Provisioned),
            reused = report.count(UpdateAction::Reused),
            failed = report.count(UpdateAction::Failed),
            skipped = report.count(UpdateAction::Skipped),
            removed = report.removed.len(),
            "update complete"
        );
        Ok(report)
    }

    /// The last completed cycle's snapshot.
    pub fn list(&self) -> Arc<Snapshot> {
        self.registry.read()
    }

    /// `NotFound` unless `name` is Ready in the current snapshot.
    pub fn lookup(&self, name: &str) -> Result<()> {
        match self.registry.read().ready(name) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(name.to_string())),
        }
    }

    pub async fn dispatch(
        &self,
        name: &str,
        payload: &Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let snapshot = self.registry.read();
        self.dispatcher
            .dispatch(&snapshot, name, payload, timeout)
            .await
    }
}
