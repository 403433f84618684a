use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use {subhost_common::protocol::ErrorReport, thiserror::Error};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),

    #[error("invalid plugin metadata in {path}: {reason}")]
    Discovery { path: PathBuf, reason: String },

    #[error("failed to provision environment for '{plugin}': {reason}")]
    Environment { plugin: String, reason: String },

    #[error("failed to install dependencies for '{plugin}': {reason}")]
    Install { plugin: String, reason: String },

    #[error("plugin '{plugin}' violated the output protocol: {reason}")]
    Protocol {
        plugin: String,
        reason: String,
        stderr: String,
    },

    #[error("plugin '{plugin}' failed ({}): {}", exit_label(.exit_code), .stderr.trim())]
    Execution {
        plugin: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("plugin '{0}' not found or not ready")]
    NotFound(String),

    #[error("plugin '{plugin}' timed out after {timeout:?}")]
    Timeout { plugin: String, timeout: Duration },

    #[error(transparent)]
    Payload(#[from] subhost_common::Error),

    #[error("{message}")]
    Message { message: String },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

impl Error {
    #[must_use]
    pub fn discovery(path: &Path, reason: impl Into<String>) -> Self {
        Self::Discovery {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn environment(plugin: &str, reason: impl ToString) -> Self {
        Self::Environment {
            plugin: plugin.to_string(),
            reason: reason.to_string(),
        }
    }

    #[must_use]
    pub fn install(plugin: &str, reason: impl ToString) -> Self {
        Self::Install {
            plugin: plugin.to_string(),
            reason: reason.to_string(),
        }
    }

    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    /// Stable tag used in JSON error reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Discovery { .. } => "discovery_error",
            Self::Environment { .. } => "environment_error",
            Self::Install { .. } => "install_error",
            Self::Protocol { .. } => "protocol_error",
            Self::Execution { .. } => "execution_error",
            Self::NotFound(_) => "not_found",
            Self::Timeout { .. } => "timeout",
            Self::Payload(_) => "payload_error",
            Self::Io(_) | Self::Json(_) | Self::TomlDe(_) | Self::Message { .. } => "internal_error",
        }
    }

    /// Build the JSON error object a caller sees on stderr.
    pub fn report(&self) -> ErrorReport {
        let report = ErrorReport::new(self.kind(), self.to_string());
        match self {
            Self::Execution {
                exit_code, stderr, ..
            } => report.with_exit_code(*exit_code).with_stderr(stderr.as_str()),
            Self::Protocol { stderr, .. } => report.with_stderr(stderr.as_str()),
            _ => report,
        }
    }
}

impl subhost_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

subhost_common::impl_context!();
