//! Configuration validation.
//!
//! Checks a loaded [`SubhostConfig`] for values that would make the update
//! cycle or dispatch misbehave, and reports them as diagnostics.

use std::path::{Path, PathBuf};

use crate::schema::{RuntimeKind, SubhostConfig};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "update.concurrency"
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}] {}", self.severity, self.path, self.message)
    }
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(&mut self, severity: Severity, path: impl Into<String>, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Validate `config`, resolving relative defaults against `data_dir`.
pub fn validate(config: &SubhostConfig, data_dir: &Path) -> ValidationResult {
    validate_with(config, data_dir, |bin| which::which(bin).is_ok())
}

fn validate_with(
    config: &SubhostConfig,
    data_dir: &Path,
    bin_exists: impl Fn(&str) -> bool,
) -> ValidationResult {
    let mut result = ValidationResult::default();

    if config.update.concurrency == 0 {
        result.push(
            Severity::Error,
            "update.concurrency",
            "must be at least 1",
        );
    }

    if config.dispatch.default_timeout_secs == Some(0) {
        result.push(
            Severity::Error,
            "dispatch.default_timeout_secs",
            "a zero timeout would fail every dispatch; omit it for no bound",
        );
    }

    let env_name = &config.dispatch.tool_path_env;
    if env_name.is_empty() || env_name.contains('=') || env_name.contains('\0') {
        result.push(
            Severity::Error,
            "dispatch.tool_path_env",
            format!("'{env_name}' is not a valid environment variable name"),
        );
    }

    if config.runtimes.is_empty() {
        result.push(
            Severity::Error,
            "runtimes",
            "no runtimes configured; no plugin file would ever be discovered",
        );
    }

    for (ext, runtime) in &config.runtimes {
        let path = format!("runtimes.{ext}");
        if ext.is_empty() || ext.contains('.') || ext.contains('/') {
            result.push(
                Severity::Error,
                &path,
                "runtime keys are bare file extensions such as 'py'",
            );
        }
        if !bin_exists(runtime.interpreter()) {
            result.push(
                Severity::Warning,
                format!("{path}.interpreter"),
                format!(
                    "'{}' not found on PATH; {} plugins will fail to provision",
                    runtime.interpreter(),
                    runtime.kind
                ),
            );
        }
        if runtime.kind == RuntimeKind::Shell && !runtime.install_args.is_empty() {
            result.push(
                Severity::Warning,
                format!("{path}.install_args"),
                "ignored: shell runtimes do not install packages",
            );
        }
    }

    let paths = config.paths.resolve(data_dir);
    let roots: [(&str, &PathBuf); 3] = [
        ("paths.plugins_dir", &paths.plugins_dir),
        ("paths.envs_dir", &paths.envs_dir),
        ("paths.tools_dir", &paths.tools_dir),
    ];
    for (i, (name_a, a)) in roots.iter().enumerate() {
        for (name_b, b) in roots.iter().skip(i + 1) {
            if a == b {
                result.push(
                    Severity::Error,
                    *name_b,
                    format!("must differ from {name_a} ({})", a.display()),
                );
            } else if b.starts_with(a) || a.starts_with(b) {
                result.push(
                    Severity::Error,
                    *name_b,
                    format!(
                        "{} and {} are nested; cleanup would delete one from the other",
                        a.display(),
                        b.display()
                    ),
                );
            }
        }
    }

    result
        .diagnostics
        .sort_by(|a, b| a.severity.cmp(&b.severity).then(a.path.cmp(&b.path)));
    result
}

#[cfg(test)]
mod tests {
    use {super::*, crate::schema::RuntimeConfig};

    fn always(_: &str) -> bool {
        true
    }

    #[test]
    fn default_config_is_clean() {
        let result = validate_with(&SubhostConfig::default(), Path::new("/data"), always);
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    }

    #[test]
    fn zero_concurrency_is_an_error() {
        let mut cfg = SubhostConfig::default();
        cfg.update.concurrency = 0;
        let result = validate_with(&cfg, Path::new("/data"), always);
        assert!(result.has_errors());
        assert_eq!(result.diagnostics[0].path, "update.concurrency");
    }

    #[test]
    fn zero_timeout_is_an_error() {
        let mut cfg = SubhostConfig::default();
        cfg.dispatch.default_timeout_secs = Some(0);
        assert!(validate_with(&cfg, Path::new("/data"), always).has_errors());
    }

    #[test]
    fn missing_interpreter_is_a_warning() {
        let result = validate_with(&SubhostConfig::default(), Path::new("/data"), |bin| {
            bin != "python3"
        });
        assert!(!result.has_errors());
        assert_eq!(result.count(Severity::Warning), 1);
        assert_eq!(result.diagnostics[0].path, "runtimes.py.interpreter");
    }

    #[test]
    fn dotted_extension_is_an_error() {
        let mut cfg = SubhostConfig::default();
        cfg.runtimes
            .insert(".py".into(), RuntimeConfig::new(RuntimeKind::Python));
        let result = validate_with(&cfg, Path::new("/data"), always);
        assert!(result.diagnostics.iter().any(|d| d.path == "runtimes..py"));
    }

    #[test]
    fn empty_runtimes_is_an_error() {
        let mut cfg = SubhostConfig::default();
        cfg.runtimes.clear();
        assert!(validate_with(&cfg, Path::new("/data"), always).has_errors());
    }

    #[test]
    fn nested_roots_are_rejected() {
        let mut cfg = SubhostConfig::default();
        cfg.paths.envs_dir = Some("/data/store".into());
        cfg.paths.tools_dir = Some("/data/store/tools".into());
        let result = validate_with(&cfg, Path::new("/data"), always);
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.path == "paths.tools_dir" && d.message.contains("nested"))
        );
    }

    #[test]
    fn identical_roots_are_rejected() {
        let mut cfg = SubhostConfig::default();
        cfg.paths.envs_dir = Some("/data/shared".into());
        cfg.paths.tools_dir = Some("/data/shared".into());
        let result = validate_with(&cfg, Path::new("/data"), always);
        assert_eq!(result.count(Severity::Error), 1);
    }
}
