//! Configuration loading, validation, and env substitution.
//!
//! Config files: `subhost.toml`, `subhost.yaml`, or `subhost.json`
//! Searched in `./` then `~/.config/subhost/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-fallback}` substitution in all
//! string values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{
        apply_env_overrides, config_dir, data_dir, discover_and_load, find_config_file,
        load_config, set_config_dir, set_data_dir,
    },
    schema::{
        DispatchConfig, PathsConfig, ResolvedPaths, RuntimeConfig, RuntimeKind, SubhostConfig,
        UpdateConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate},
};
