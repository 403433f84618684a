//! Process-boundary protocol shared by the orchestrator and its callers.
//!
//! A plugin receives exactly one JSON object on stdin and must answer with
//! exactly one JSON document on stdout. Callers address the plugin through
//! reserved top-level keys:
//!
//! - `"@item"`: a single item to process
//! - `"@items"`: a batch, always an array
//! - `"@mode"`: selects one of the plugin's declared modes
//!
//! The orchestrator forwards these keys untouched; it only checks the shape.

use std::path::Path;

use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

use crate::error::{Error, Result};

pub const ITEM_KEY: &str = "@item";
pub const ITEMS_KEY: &str = "@items";
pub const MODE_KEY: &str = "@mode";

/// Key used when a bare path is passed on the command line.
pub const LEGACY_PATH_KEY: &str = "file_path";

/// How a payload addresses its plugin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Invocation<'a> {
    Single(&'a Value),
    Batch(&'a [Value]),
    /// Neither `@item` nor `@items` is present.
    Bare,
}

/// Check that `payload` is a JSON object whose reserved keys are well-formed.
pub fn validate_payload(payload: &Value) -> Result<()> {
    let Some(map) = payload.as_object() else {
        return Err(Error::invalid_payload(format!(
            "expected a JSON object, got {}",
            json_kind(payload)
        )));
    };

    if let Some(items) = map.get(ITEMS_KEY)
        && !items.is_array()
    {
        return Err(Error::invalid_payload(format!(
            "{ITEMS_KEY} must be an array, got {}",
            json_kind(items)
        )));
    }

    if let Some(mode) = map.get(MODE_KEY)
        && !mode.is_string()
    {
        return Err(Error::invalid_payload(format!(
            "{MODE_KEY} must be a string, got {}",
            json_kind(mode)
        )));
    }

    if map.contains_key(ITEM_KEY) && map.contains_key(ITEMS_KEY) {
        return Err(Error::invalid_payload(format!(
            "{ITEM_KEY} and {ITEMS_KEY} are mutually exclusive"
        )));
    }

    Ok(())
}

/// Classify a validated payload.
pub fn invocation(payload: &Value) -> Invocation<'_> {
    if let Some(items) = payload.get(ITEMS_KEY).and_then(Value::as_array) {
        return Invocation::Batch(items);
    }
    match payload.get(ITEM_KEY) {
        Some(item) => Invocation::Single(item),
        None => Invocation::Bare,
    }
}

/// The mode selected by the payload, if any.
pub fn requested_mode(payload: &Value) -> Option<&str> {
    payload.get(MODE_KEY).and_then(Value::as_str)
}

/// Decode a payload passed as a single command-line argument.
///
/// In order: inline JSON, a path to an existing `.json` file, and finally
/// the legacy convention of treating the argument as `{"file_path": arg}`.
pub fn decode_payload_arg(arg: &str) -> Result<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(arg) {
        return Ok(value);
    }

    let path = Path::new(arg);
    let is_json_file = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    if is_json_file && path.is_file() {
        let raw = std::fs::read_to_string(path).map_err(|source| Error::PayloadFile {
            path: path.to_path_buf(),
            source,
        })?;
        return serde_json::from_str(&raw).map_err(|e| {
            Error::invalid_payload(format!("{} is not valid JSON: {e}", path.display()))
        });
    }

    let mut map = Map::new();
    map.insert(LEGACY_PATH_KEY.into(), Value::String(arg.to_string()));
    Ok(Value::Object(map))
}

/// Decode a payload read from standard input. Empty input means `{}`.
pub fn decode_payload_stdin(raw: &str) -> Result<Value> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_str(raw)
        .map_err(|e| Error::invalid_payload(format!("stdin is not a single JSON document: {e}")))
}

/// Error object written to stderr when an invocation fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub status: String,
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl ErrorReport {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            kind: kind.into(),
            message: message.into(),
            exit_code: None,
            stderr: None,
        }
    }

    #[must_use]
    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    #[must_use]
    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        let stderr = stderr.into();
        if !stderr.trim().is_empty() {
            self.stderr = Some(stderr);
        }
        self
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
