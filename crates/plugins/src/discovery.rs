//! Plugin discovery from the plugins directory.
//!
//! Every file `<name>.<ext>` whose extension has a configured runtime is a
//! candidate. Its frontmatter is parsed as text; nothing is executed.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::{
    descriptor::{DescriptorSet, PluginDescriptor, PluginStatus},
    error::{Error, Result},
    manifest::parse_manifest,
    signature::sha256_hex,
};

/// Filesystem-based plugin discoverer.
pub struct FsPluginDiscoverer {
    extensions: BTreeSet<String>,
}

impl FsPluginDiscoverer {
    pub fn new(extensions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            extensions: extensions.into_iter().map(Into::into).collect(),
        }
    }

    /// Scan `dir` and return one descriptor per candidate file.
    ///
    /// A missing directory yields an empty set. Files whose metadata cannot
    /// be read or parsed are returned with status `Error`.
    pub fn scan(&self, dir: &Path) -> Result<DescriptorSet> {
        let mut set = DescriptorSet::default();

        if !dir.is_dir() {
            warn!(dir = %dir.display(), "plugins directory not found");
            return Ok(set);
        }

        let mut candidates: Vec<(String, String, PathBuf)> = std::fs::read_dir(dir)?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter_map(|path| self.candidate(&path).map(|(n, e)| (n, e, path)))
            .collect();
        candidates.sort_by(|a, b| a.2.cmp(&b.2));

        for (name, runtime, path) in candidates {
            let descriptor = describe(name, runtime, &path);
            if descriptor.is_error() {
                debug!(plugin = %descriptor.name, error = ?descriptor.last_error, "plugin metadata rejected");
            }
            let name = descriptor.name.clone();
            if !set.insert(descriptor) {
                warn!(plugin = %name, path = %path.display(), "duplicate plugin name, skipping");
            }
        }

        debug!(dir = %dir.display(), count = set.len(), "scanned plugins");
        Ok(set)
    }

    /// `(name, extension)` if `path` looks like a plugin.
    fn candidate(&self, path: &Path) -> Option<(String, String)> {
        let file_name = path.file_name()?.to_str()?;
        if file_name.starts_with('_') || file_name.starts_with('.') {
            return None;
        }
        let ext = path.extension()?.to_str()?;
        if !self.extensions.contains(ext) {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        Some((stem.to_string(), ext.to_string()))
    }
}

fn describe(name: String, runtime: String, path: &Path) -> PluginDescriptor {
    let mut descriptor = PluginDescriptor {
        name,
        source_path: path.to_path_buf(),
        runtime,
        content_digest: String::new(),
        manifest: None,
        status: PluginStatus::Pending,
        last_error: None,
    };

    if !is_valid_name(&descriptor.name) {
        let reason = format!(
            "invalid plugin name '{}': use letters, digits, '-' and '_'",
            descriptor.name
        );
        descriptor.mark_error(Error::discovery(path, reason));
        return descriptor;
    }

    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = %path.display(), %e, "failed to read plugin source");
            descriptor.mark_error(Error::discovery(path, e.to_string()));
            return descriptor;
        },
    };
    descriptor.content_digest = sha256_hex(&bytes);

    let content = String::from_utf8_lossy(&bytes);
    match parse_manifest(&content, path) {
        Ok(manifest) => descriptor.manifest = Some(manifest),
        Err(e) => descriptor.mark_error(e),
    }
    descriptor
}

/// Plugin names double as directory names, so keep them portable.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "# +++\n# dependencies = [\"x==1.0\"]\n# +++\necho '{}'\n";

    fn discoverer() -> FsPluginDiscoverer {
        FsPluginDiscoverer::new(["py", "sh"])
    }

    #[test]
    fn discovers_plugins_by_extension() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("get_duration.py"), VALID).unwrap();
        std::fs::write(tmp.path().join("hello.sh"), VALID).unwrap();
        std::fs::write(tmp.path().join("README.md"), "docs").unwrap();

        let set = discoverer().scan(tmp.path()).unwrap();
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["get_duration", "hello"]);

        let d = set.get("get_duration").unwrap();
        assert_eq!(d.runtime, "py");
        assert_eq!(d.status, PluginStatus::Pending);
        assert_eq!(d.dependencies(), ["x==1.0".to_string()]);
        assert_eq!(d.content_digest, sha256_hex(VALID.as_bytes()));
    }

    #[test]
    fn skips_private_and_hidden_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("_helpers.py"), VALID).unwrap();
        std::fs::write(tmp.path().join(".draft.py"), VALID).unwrap();
        std::fs::create_dir(tmp.path().join("nested.py")).unwrap();

        let set = discoverer().scan(tmp.path()).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn missing_directory_is_empty() {
        let set = discoverer()
            .scan(Path::new("/nonexistent/subhost/plugins"))
            .unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn malformed_metadata_is_listed_as_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("broken.py"), "import torch\n").unwrap();

        let set = discoverer().scan(tmp.path()).unwrap();
        let d = set.get("broken").unwrap();
        assert_eq!(d.status, PluginStatus::Error);
        assert!(d.manifest.is_none());
        assert!(d.last_error.as_ref().unwrap().contains("frontmatter"));
        assert!(!d.content_digest.is_empty());
    }

    #[test]
    fn invalid_name_is_listed_as_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("bad name.py"), VALID).unwrap();

        let set = discoverer().scan(tmp.path()).unwrap();
        assert_eq!(set.get("bad name").unwrap().status, PluginStatus::Error);
    }

    #[test]
    fn same_stem_keeps_first_extension() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("tool.py"), VALID).unwrap();
        std::fs::write(tmp.path().join("tool.sh"), VALID).unwrap();

        let set = discoverer().scan(tmp.path()).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("tool").unwrap().runtime, "py");
    }

    #[test]
    fn content_change_changes_digest() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("p.sh");
        std::fs::write(&path, VALID).unwrap();
        let before = discoverer().scan(tmp.path()).unwrap();

        std::fs::write(&path, VALID.replace("x==1.0", "x==2.0")).unwrap();
        let after = discoverer().scan(tmp.path()).unwrap();

        assert_ne!(
            before.get("p").unwrap().content_digest,
            after.get("p").unwrap().content_digest
        );
    }

    #[test]
    fn name_validation() {
        assert!(is_valid_name("chatterbox_tts"));
        assert!(is_valid_name("url-screenshot2"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("a.b"));
        assert!(!is_valid_name("a b"));
    }
}
