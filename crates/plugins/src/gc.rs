//! Removes environments and tool storage left behind by deleted plugins.

use std::{collections::BTreeSet, io, path::Path, sync::Arc};

use tracing::{info, warn};

use crate::{descriptor::DescriptorSet, environment::EnvironmentManager, locks::LockRole};

pub struct GarbageCollector {
    environments: Arc<EnvironmentManager>,
}

impl GarbageCollector {
    pub fn new(environments: Arc<EnvironmentManager>) -> Self {
        Self { environments }
    }

    /// Delete every environment and tool-storage directory whose name has no
    /// descriptor in `descriptors`, whatever that descriptor's status.
    ///
    /// Returns the names for which something was removed. Failures are
    /// logged and leave the directory for the next cycle.
    pub async fn collect(&self, descriptors: &DescriptorSet) -> BTreeSet<String> {
        let mut orphans = BTreeSet::new();
        for root in [self.environments.envs_dir(), self.environments.tools_dir()] {
            orphans.extend(orphaned_names(root, descriptors));
        }

        let mut removed = BTreeSet::new();
        for name in orphans {
            match self.remove_locked(&name).await {
                Ok(true) => {
                    info!(plugin = %name, "removed orphaned plugin data");
                    removed.insert(name);
                },
                Ok(false) => {},
                Err(e) => warn!(plugin = %name, error = %e, "failed to lock orphaned plugin"),
            }
        }

        self.environments
            .locks()
            .retain(|name| descriptors.contains(name));
        removed
    }

    /// Remove both directories of `name` while holding all of its locks, so
    /// neither an install nor a dispatch in any process is using them.
    async fn remove_locked(&self, name: &str) -> io::Result<bool> {
        let locks = self.environments.locks();
        let lock = locks.get(name);
        let _provisioning = lock.provisioning.lock().await;
        let _live = lock.live.write().await;
        let mut provisioning_file = locks.file(name, LockRole::Provisioning)?;
        let mut live_file = locks.file(name, LockRole::Live)?;

        provisioning_file
            .exclusive(async {
                live_file
                    .exclusive(async {
                        let mut ok = true;
                        for path in [
                            self.environments.plugin_root(name),
                            self.environments.tool_storage(name),
                        ] {
                            ok &= remove(&path);
                        }
                        ok
                    })
                    .await
            })
            .await?
    }
}

/// Visible directories directly under `root` not named by a descriptor.
fn orphaned_names(root: &Path, descriptors: &DescriptorSet) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            (!name.starts_with('.') && !descriptors.contains(&name)).then_some(name)
        })
        .collect()
}

fn remove(path: &Path) -> bool {
    match std::fs::remove_dir_all(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to remove orphaned directory");
            false
        },
    }
}
