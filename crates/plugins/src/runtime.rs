//! Runtimes create isolated environments, install packages into them, and
//! build the command that runs a plugin inside one.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    async_trait::async_trait,
    subhost_config::{RuntimeConfig, RuntimeKind},
    tokio::process::Command,
    tracing::debug,
};

use crate::error::{Error, Result};

#[async_trait]
pub trait Runtime: Send + Sync {
    fn kind(&self) -> RuntimeKind;

    /// Create an empty isolated environment rooted at `env_root`.
    async fn provision(&self, env_root: &Path) -> Result<()>;

    /// Install `packages` into the environment at `env_root`.
    async fn install(&self, env_root: &Path, packages: &[String]) -> Result<()>;

    /// Command that runs `entry` with the environment's interpreter.
    fn command(&self, env_root: &Path, entry: &Path) -> Command;
}

/// A virtualenv per plugin, populated with pip.
pub struct PythonRuntime {
    interpreter: String,
    install_args: Vec<String>,
}

impl PythonRuntime {
    pub fn new(interpreter: impl Into<String>, install_args: Vec<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            install_args,
        }
    }

    /// Interpreter inside a created virtualenv.
    pub fn env_python(env_root: &Path) -> PathBuf {
        if cfg!(windows) {
            env_root.join("Scripts").join("python.exe")
        } else {
            env_root.join("bin").join("python")
        }
    }
}

#[async_trait]
impl Runtime for PythonRuntime {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Python
    }

    async fn provision(&self, env_root: &Path) -> Result<()> {
        let interpreter = which::which(&self.interpreter).map_err(|e| {
            Error::message(format!("interpreter '{}' not found: {e}", self.interpreter))
        })?;
        let mut cmd = Command::new(interpreter);
        cmd.arg("-m").arg("venv").arg(env_root);
        run_checked(cmd, "python -m venv").await
    }

    async fn install(&self, env_root: &Path, packages: &[String]) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        let mut cmd = Command::new(Self::env_python(env_root));
        cmd.args(["-m", "pip", "install", "--upgrade"])
            .args(&self.install_args)
            .args(packages);
        run_checked(cmd, "pip install").await
    }

    fn command(&self, env_root: &Path, entry: &Path) -> Command {
        let mut cmd = Command::new(Self::env_python(env_root));
        cmd.arg(entry).env("VIRTUAL_ENV", env_root);
        cmd
    }
}

/// Runs plugins with a shell. The environment is a plain directory and
/// package installs are not supported.
pub struct ShellRuntime {
    interpreter: String,
}

impl ShellRuntime {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }
}

#[async_trait]
impl Runtime for ShellRuntime {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Shell
    }

    async fn provision(&self, env_root: &Path) -> Result<()> {
        tokio::fs::create_dir_all(env_root).await?;
        Ok(())
    }

    async fn install(&self, _env_root: &Path, packages: &[String]) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        Err(Error::message(format!(
            "shell runtime cannot install packages: {}",
            packages.join(", ")
        )))
    }

    fn command(&self, _env_root: &Path, entry: &Path) -> Command {
        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(entry);
        cmd
    }
}

/// Spawn `cmd`, wait for it, and turn a non-zero exit into an error carrying
/// the tail of its stderr.
async fn run_checked(mut cmd: Command, what: &str) -> Result<()> {
    debug!(command = what, "running");
    let output = cmd
        .stdin(std::process::Stdio::null())
        .output()
        .await
        .map_err(|e| Error::message(format!("failed to run {what}: {e}")))?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(Error::message(format!(
        "{what} exited with {}: {}",
        output.status,
        tail(&stderr, 20)
    )))
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

/// Runtimes keyed by the plugin file extension they serve.
#[derive(Clone, Default)]
pub struct Runtimes {
    by_extension: BTreeMap<String, Arc<dyn Runtime>>,
}

impl Runtimes {
    pub fn from_config(runtimes: &BTreeMap<String, RuntimeConfig>) -> Self {
        let mut out = Self::default();
        for (ext, cfg) in runtimes {
            let runtime: Arc<dyn Runtime> = match cfg.kind {
                RuntimeKind::Python => Arc::new(PythonRuntime::new(
                    cfg.interpreter(),
                    cfg.install_args.clone(),
                )),
                RuntimeKind::Shell => Arc::new(ShellRuntime::new(cfg.interpreter())),
            };
            out.insert(ext.clone(), runtime);
        }
        out
    }

    pub fn insert(&mut self, extension: impl Into<String>, runtime: Arc<dyn Runtime>) {
        self.by_extension.insert(extension.into(), runtime);
    }

    pub fn get(&self, extension: &str) -> Option<Arc<dyn Runtime>> {
        self.by_extension.get(extension).cloned()
    }

    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.by_extension.keys().map(String::as_str)
    }
}
