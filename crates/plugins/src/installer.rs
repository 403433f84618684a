//! Installs a plugin's declared dependencies into its environment and
//! records what was installed.
//!
//! The signature file is written only after the runtime reports a complete
//! install, so an interrupted or partial install is retried in full.

use std::{path::Path, sync::Arc};

use tracing::{debug, info, warn};

use crate::{
    error::{Error, Result},
    runtime::Runtime,
    signature::Signature,
    store::write_atomic,
};

/// Name of the file inside an environment root holding its committed signature.
pub const SIGNATURE_FILE: &str = ".subhost-signature";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The environment already had this signature; nothing ran.
    UpToDate(Signature),
    Installed(Signature),
}

impl InstallOutcome {
    pub fn signature(&self) -> &Signature {
        match self {
            Self::UpToDate(sig) | Self::Installed(sig) => sig,
        }
    }
}

pub struct DependencyInstaller {
    runtime: Arc<dyn Runtime>,
}

impl DependencyInstaller {
    pub fn new(runtime: Arc<dyn Runtime>) -> Self {
        Self { runtime }
    }

    /// Signature committed in `env_root`, if any.
    pub fn installed_signature(env_root: &Path) -> Option<Signature> {
        let raw = std::fs::read_to_string(env_root.join(SIGNATURE_FILE)).ok()?;
        let parsed = Signature::parse(&raw);
        if parsed.is_none() {
            warn!(env = %env_root.display(), "ignoring malformed signature file");
        }
        parsed
    }

    pub fn is_current(env_root: &Path, signature: &Signature) -> bool {
        Self::installed_signature(env_root).as_ref() == Some(signature)
    }

    /// Install `dependencies` into `env_root` unless its committed signature
    /// already matches.
    pub async fn install(
        &self,
        plugin: &str,
        env_root: &Path,
        dependencies: &[String],
    ) -> Result<InstallOutcome> {
        let signature = Signature::of(dependencies);
        if Self::is_current(env_root, &signature) {
            debug!(plugin, signature = signature.short(), "dependencies up to date");
            return Ok(InstallOutcome::UpToDate(signature));
        }

        // A stale signature must not survive a failed attempt.
        match std::fs::remove_file(env_root.join(SIGNATURE_FILE)) {
            Ok(()) => {},
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => return Err(Error::install(plugin, e)),
        }

        info!(
            plugin,
            signature = signature.short(),
            count = dependencies.len(),
            "installing dependencies"
        );
        self.runtime
            .install(env_root, dependencies)
            .await
            .map_err(|e| Error::install(plugin, e))?;

        if !env_root.is_dir() {
            return Err(Error::install(
                plugin,
                format!("environment {} disappeared during install", env_root.display()),
            ));
        }
        write_atomic(
            &env_root.join(SIGNATURE_FILE),
            format!("{signature}\n").as_bytes(),
        )
        .map_err(|e| Error::install(plugin, e))?;

        Ok(InstallOutcome::Installed(signature))
    }
}
