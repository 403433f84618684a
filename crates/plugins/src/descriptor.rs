//! The orchestrator's record of each discovered plugin.

use std::{collections::BTreeMap, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::manifest::PluginManifest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    /// Discovered, environment pass not finished yet.
    Pending,
    Ready,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PluginDescriptor {
    pub name: String,
    pub source_path: PathBuf,
    /// File extension, which selects the runtime.
    pub runtime: String,
    pub content_digest: String,
    /// `None` when the metadata could not be parsed.
    pub manifest: Option<PluginManifest>,
    pub status: PluginStatus,
    pub last_error: Option<String>,
}

impl PluginDescriptor {
    pub fn dependencies(&self) -> &[String] {
        self.manifest
            .as_ref()
            .map(|m| m.dependencies.as_slice())
            .unwrap_or_default()
    }

    pub fn mark_ready(&mut self) {
        self.status = PluginStatus::Ready;
        self.last_error = None;
    }

    pub fn mark_error(&mut self, error: impl ToString) {
        self.status = PluginStatus::Error;
        self.last_error = Some(error.to_string());
    }

    pub fn is_error(&self) -> bool {
        self.status == PluginStatus::Error
    }
}

/// Descriptors from one scan, keyed and ordered by name.
#[derive(Debug, Clone, Default)]
pub struct DescriptorSet {
    descriptors: BTreeMap<String, PluginDescriptor>,
}

impl DescriptorSet {
    /// Insert unless a descriptor with the same name is already present.
    /// Returns `false` on a name collision.
    pub fn insert(&mut self, descriptor: PluginDescriptor) -> bool {
        if self.descriptors.contains_key(&descriptor.name) {
            return false;
        }
        self.descriptors
            .insert(descriptor.name.clone(), descriptor);
        true
    }

    pub fn get(&self, name: &str) -> Option<&PluginDescriptor> {
        self.descriptors.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut PluginDescriptor> {
        self.descriptors.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.descriptors.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.descriptors.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PluginDescriptor> {
        self.descriptors.values()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
