//! Per-plugin locks.
//!
//! `provisioning` serializes environment mutation for one plugin. `live`
//! guards the committed environment: dispatch holds it shared while a
//! process runs, the manager holds it exclusively only to flip the commit
//! marker and delete retired generations.
//!
//! Each in-process lock is paired with an advisory lock file under the
//! lock directory so separate `subhost` processes sharing one data dir
//! obey the same rules. The in-process lock is always taken first, and
//! `provisioning` before `live`.

use std::{
    collections::HashMap,
    fs::{File, OpenOptions},
    future::Future,
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    fd_lock::RwLock as FileRwLock,
    tokio::sync::{Mutex as AsyncMutex, RwLock},
};

/// Lock files live here, relative to the envs root. Hidden, so cleanup
/// never treats it as a plugin.
pub const LOCK_DIR: &str = ".locks";

const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Default)]
pub struct PluginLock {
    pub provisioning: AsyncMutex<()>,
    pub live: RwLock<()>,
}

/// Which of a plugin's two locks a lock file stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockRole {
    Provisioning,
    Live,
}

impl LockRole {
    fn suffix(self) -> &'static str {
        match self {
            Self::Provisioning => "provision.lock",
            Self::Live => "live.lock",
        }
    }
}

#[derive(Clone)]
pub struct PluginLocks {
    inner: Arc<Mutex<HashMap<String, Arc<PluginLock>>>>,
    dir: PathBuf,
}

impl PluginLocks {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::default(),
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Lock pair for `name`, created on first use.
    pub fn get(&self, name: &str) -> Arc<PluginLock> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(map.entry(name.to_string()).or_default())
    }

    /// Drop lock entries for plugins that no longer exist.
    pub fn retain(&self, keep: impl Fn(&str) -> bool) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.retain(|name, lock| keep(name) || Arc::strong_count(lock) > 1);
    }

    /// Open the lock file shared with other processes for `name`.
    pub fn file(&self, name: &str, role: LockRole) -> io::Result<LockFile> {
        LockFile::open(&self.dir.join(format!("{name}.{}", role.suffix())))
    }
}

/// Advisory file lock. Acquisition polls so a held lock never blocks the
/// async runtime's worker thread.
pub struct LockFile {
    lock: FileRwLock<File>,
}

impl LockFile {
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;
        Ok(Self {
            lock: FileRwLock::new(file),
        })
    }

    /// Run `work` while holding the lock exclusively.
    pub async fn exclusive<T>(&mut self, work: impl Future<Output = T>) -> io::Result<T> {
        let _guard = loop {
            match self.lock.try_write() {
                Ok(guard) => break guard,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {},
                Err(e) => return Err(e),
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        };
        Ok(work.await)
    }

    /// Run `work` while holding the lock shared.
    pub async fn shared<T>(&self, work: impl Future<Output = T>) -> io::Result<T> {
        let _guard = loop {
            match self.lock.try_read() {
                Ok(guard) => break guard,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {},
                Err(e) => return Err(e),
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        };
        Ok(work.await)
    }
}
