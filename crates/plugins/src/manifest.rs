//! Static plugin metadata.
//!
//! A plugin declares its metadata as TOML frontmatter inside the leading
//! comment block of its source file, fenced by `+++` lines:
//!
//! ```text
//! #!/usr/bin/env python3
//! # +++
//! # description = "Report the duration of a media file"
//! # dependencies = ["ffmpeg-python==0.2.0"]
//! # timeout = 120
//! #
//! # [[input_schema]]
//! # name = "file_path"
//! # display_name = "Media File Path"
//! # type = "string"
//! # required = true
//! # +++
//! ```
//!
//! Multi-mode plugins declare `[modes.<id>]` tables instead of a top-level
//! `input_schema`. The file is only ever read as text, never executed.

use std::{
    collections::{BTreeMap, HashSet},
    path::Path,
};

use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

use crate::error::{Error, Result};

/// Comment markers accepted in front of frontmatter lines.
const COMMENT_MARKERS: &[&str] = &["//", "#", "--", ";"];

const FENCE: &str = "+++";

/// Name of the mode a plugin gets when it declares none.
pub const IMPLICIT_MODE: &str = "default";

/// Metadata parsed from a plugin's frontmatter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginManifest {
    #[serde(default)]
    pub description: String,
    /// Pinned package specifiers, installed into the plugin's environment.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub input_schema: Option<Vec<InputField>>,
    #[serde(default)]
    pub modes: Option<BTreeMap<String, ModeSpec>>,
    /// Default execution bound in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// One named mode of a multi-mode plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeSpec {
    #[serde(
        default,
        rename = "displayName",
        alias = "display_name",
        skip_serializing_if = "Option::is_none"
    )]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Vec<InputField>,
}

/// A single declared input field.
///
/// Keys a UI may need beyond the known ones are kept in `extra` and passed
/// through to `list` untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputField {
    pub name: String,
    #[serde(
        default,
        rename = "displayName",
        alias = "display_name",
        skip_serializing_if = "Option::is_none"
    )]
    pub display_name: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: FieldType,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<FieldOption>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    String,
    Number,
    Boolean,
    Options,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldOption {
    pub name: String,
    pub value: Value,
}

impl PluginManifest {
    /// Declared modes, or the single implicit mode built from the top-level
    /// schema.
    pub fn modes(&self) -> BTreeMap<String, ModeSpec> {
        match &self.modes {
            Some(modes) => modes.clone(),
            None => BTreeMap::from([(IMPLICIT_MODE.to_string(), ModeSpec {
                display_name: None,
                description: None,
                input_schema: self.input_schema.clone().unwrap_or_default(),
            })]),
        }
    }

    /// Schema shown by `list` for plugins without declared modes.
    pub fn listed_input_schema(&self) -> Option<Vec<InputField>> {
        match (&self.input_schema, &self.modes) {
            (Some(schema), _) => Some(schema.clone()),
            (None, None) => Some(Vec::new()),
            (None, Some(_)) => None,
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        let mut seen = HashSet::new();
        for dep in &self.dependencies {
            if dep.trim().is_empty() {
                return Err("dependencies must not contain empty entries".into());
            }
            if dep.chars().any(char::is_whitespace) {
                return Err(format!("dependency '{dep}' contains whitespace"));
            }
            if !seen.insert(dep.as_str()) {
                return Err(format!("dependency '{dep}' is declared twice"));
            }
        }

        if self.timeout == Some(0) {
            return Err("timeout must be at least 1 second".into());
        }

        match (&self.input_schema, &self.modes) {
            (Some(_), Some(_)) => {
                return Err("declare either input_schema or modes, not both".into());
            },
            (_, Some(modes)) if modes.is_empty() => {
                return Err("modes is declared but empty".into());
            },
            _ => {},
        }

        if let Some(schema) = &self.input_schema {
            validate_schema(schema).map_err(|e| format!("input_schema: {e}"))?;
        }
        for (id, mode) in self.modes.iter().flatten() {
            if id.is_empty() || id.chars().any(char::is_whitespace) {
                return Err(format!("mode id '{id}' must be a single word"));
            }
            validate_schema(&mode.input_schema).map_err(|e| format!("modes.{id}: {e}"))?;
        }

        Ok(())
    }
}

fn validate_schema(fields: &[InputField]) -> std::result::Result<(), String> {
    let mut names = HashSet::new();
    for field in fields {
        if field.name.trim().is_empty() {
            return Err("field with empty name".into());
        }
        if !names.insert(field.name.as_str()) {
            return Err(format!("field '{}' is declared twice", field.name));
        }
        if field.kind == FieldType::Options && field.options.is_empty() {
            return Err(format!(
                "field '{}' has type 'options' but no options",
                field.name
            ));
        }
    }
    Ok(())
}

/// Parse and validate the frontmatter of a plugin source file.
pub fn parse_manifest(content: &str, source_path: &Path) -> Result<PluginManifest> {
    let toml_str = extract_frontmatter(content).map_err(|e| Error::discovery(source_path, e))?;

    let manifest: PluginManifest = toml::from_str(&toml_str)
        .map_err(|e| Error::discovery(source_path, format!("invalid TOML frontmatter: {e}")))?;

    manifest
        .validate()
        .map_err(|e| Error::discovery(source_path, e))?;

    Ok(manifest)
}

/// Split a line into its comment marker and the text after it.
fn split_comment(line: &str) -> Option<(&'static str, &str)> {
    let trimmed = line.trim_start();
    COMMENT_MARKERS.iter().find_map(|marker| {
        trimmed
            .strip_prefix(marker)
            .map(|rest| (*marker, rest.strip_prefix(' ').unwrap_or(rest)))
    })
}

/// Pull the `+++`-fenced block out of the file's leading comments.
fn extract_frontmatter(content: &str) -> std::result::Result<String, String> {
    let mut lines = content.lines();

    let marker = loop {
        let Some(line) = lines.next() else {
            return Err("no +++ frontmatter found".into());
        };
        if line.trim().is_empty() {
            continue;
        }
        match split_comment(line) {
            Some((marker, rest)) if rest.trim() == FENCE => break marker,
            Some(_) => continue,
            None => {
                return Err(
                    "no +++ frontmatter in the leading comment block of the file".into(),
                );
            },
        }
    };

    let mut body = Vec::new();
    for line in lines {
        let text = match line.trim_start().strip_prefix(marker) {
            Some(rest) => rest.strip_prefix(' ').unwrap_or(rest),
            None if line.trim().is_empty() => "",
            None => return Err("frontmatter interrupted by a non-comment line".into()),
        };
        if text.trim() == FENCE {
            return Ok(body.join("\n"));
        }
        body.push(text);
    }

    Err("missing closing +++ in frontmatter".into())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<PluginManifest> {
        parse_manifest(content, Path::new("/plugins/test.py"))
    }

    #[test]
    fn parse_full_python_manifest() {
        let content = r#"#!/usr/bin/env python3
# +++
# description = "Report media duration"
# dependencies = ["ffmpeg-python==0.2.0"]
# timeout = 120
#
# [[input_schema]]
# name = "file_path"
# display_name = "Media File Path"
# type = "string"
# required = true
#
# [[input_schema]]
# name = "format"
# type = "options"
# default = "seconds"
# options = [
#   { name = "Seconds", value = "seconds" },
#   { name = "Minutes", value = "minutes" },
# ]
# +++
import sys
"#;
        let manifest = parse(content).unwrap();
        assert_eq!(manifest.description, "Report media duration");
        assert_eq!(manifest.dependencies, vec!["ffmpeg-python==0.2.0"]);
        assert_eq!(manifest.timeout, Some(120));

        let schema = manifest.input_schema.as_ref().unwrap();
        assert_eq!(schema.len(), 2);
        assert_eq!(schema[0].display_name.as_deref(), Some("Media File Path"));
        assert!(schema[0].required);
        assert_eq!(schema[1].kind, FieldType::Options);
        assert_eq!(schema[1].options.len(), 2);
        assert_eq!(schema[1].default, Some(Value::String("seconds".into())));
    }

    #[test]
    fn parse_slash_comment_manifest() {
        let content = "// +++\n// dependencies = []\n// +++\nconsole.log('{}')\n";
        let manifest = parse(content).unwrap();
        assert!(manifest.dependencies.is_empty());
        assert_eq!(manifest.listed_input_schema(), Some(Vec::new()));
    }

    #[test]
    fn parse_modes() {
        let content = r#"# +++
# dependencies = ["torch==2.3.0"]
#
# [modes.single]
# display_name = "Process Each Item Individually"
# [[modes.single.input_schema]]
# name = "text"
# required = true
#
# [modes.batch]
# displayName = "Process All Items as a Batch"
# [[modes.batch.input_schema]]
# name = "batch_json"
# type = "json"
# +++
"#;
        let manifest = parse(content).unwrap();
        let modes = manifest.modes();
        assert_eq!(modes.len(), 2);
        assert_eq!(
            modes["batch"].display_name.as_deref(),
            Some("Process All Items as a Batch")
        );
        assert_eq!(modes["batch"].input_schema[0].kind, FieldType::Json);
        assert!(manifest.listed_input_schema().is_none());
    }

    #[test]
    fn plugin_without_modes_has_implicit_default_mode() {
        let content = "# +++\n[[input_schema]]\nname = \"path\"\n# +++\n";
        // Unprefixed lines are only allowed when blank; this one is not.
        assert!(parse(content).is_err());

        let content = "# +++\n# [[input_schema]]\n# name = \"path\"\n# +++\n";
        let manifest = parse(content).unwrap();
        let modes = manifest.modes();
        assert_eq!(modes.len(), 1);
        assert_eq!(modes[IMPLICIT_MODE].input_schema[0].name, "path");
    }

    #[test]
    fn unknown_field_keys_pass_through() {
        let content = "# +++\n# [[input_schema]]\n# name = \"voice\"\n# placeholder = \"en-US\"\n# +++\n";
        let manifest = parse(content).unwrap();
        let field = &manifest.input_schema.unwrap()[0];
        assert_eq!(field.extra["placeholder"], "en-US");

        let json = serde_json::to_value(field).unwrap();
        assert_eq!(json["placeholder"], "en-US");
        assert_eq!(json["type"], "string");
        assert!(json.get("required").is_none());
    }

    #[test]
    fn field_serializes_display_name_in_camel_case() {
        let content = "# +++\n# [[input_schema]]\n# name = \"path\"\n# display_name = \"Path\"\n# required = true\n# +++\n";
        let manifest = parse(content).unwrap();
        let json = serde_json::to_value(&manifest.input_schema.unwrap()[0]).unwrap();
        assert_eq!(json["displayName"], "Path");
        assert_eq!(json["required"], true);
    }

    #[test]
    fn missing_frontmatter_fails() {
        let err = parse("import json\nprint('{}')\n").unwrap_err();
        assert!(matches!(err, Error::Discovery { .. }));
    }

    #[test]
    fn frontmatter_after_code_is_ignored() {
        let content = "import os\n# +++\n# dependencies = []\n# +++\n";
        assert!(parse(content).is_err());
    }

    #[test]
    fn unclosed_frontmatter_fails() {
        let err = parse("# +++\n# dependencies = []\n").unwrap_err();
        assert!(err.to_string().contains("missing closing +++"));
    }

    #[test]
    fn unknown_top_level_key_fails() {
        let err = parse("# +++\n# requires = [\"x\"]\n# +++\n").unwrap_err();
        assert!(err.to_string().contains("requires"));
    }

    #[test]
    fn schema_and_modes_together_fail() {
        let content = "# +++\n# input_schema = []\n# [modes.a]\n# input_schema = []\n# +++\n";
        assert!(parse(content).is_err());
    }

    #[test]
    fn empty_modes_fail() {
        assert!(parse("# +++\n# [modes]\n# +++\n").is_err());
    }

    #[test]
    fn duplicate_dependency_fails() {
        assert!(parse("# +++\n# dependencies = [\"a==1\", \"a==1\"]\n# +++\n").is_err());
    }

    #[test]
    fn dependency_with_whitespace_fails() {
        assert!(parse("# +++\n# dependencies = [\"a == 1\"]\n# +++\n").is_err());
    }

    #[test]
    fn duplicate_field_fails() {
        let content =
            "# +++\n# [[input_schema]]\n# name = \"a\"\n# [[input_schema]]\n# name = \"a\"\n# +++\n";
        assert!(parse(content).is_err());
    }

    #[test]
    fn options_field_without_options_fails() {
        let content = "# +++\n# [[input_schema]]\n# name = \"fmt\"\n# type = \"options\"\n# +++\n";
        assert!(parse(content).is_err());
    }

    #[test]
    fn zero_timeout_fails() {
        assert!(parse("# +++\n# timeout = 0\n# +++\n").is_err());
    }
}
