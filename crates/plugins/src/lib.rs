//! Plugin orchestration: discovery, isolated environments, registry, and
//! dispatch.
//!
//! Plugins are single source files in the plugins directory carrying a
//! static TOML manifest in their leading comment block. Each one gets its
//! own environment under the envs root and a persistent tool-storage
//! directory, and runs as a separate process speaking JSON over stdio.

pub mod descriptor;
pub mod discovery;
pub mod dispatch;
pub mod environment;
pub mod error;
pub mod gc;
pub mod installer;
pub mod locks;
pub mod manifest;
pub mod orchestrator;
pub mod registry;
pub mod runtime;
pub mod signature;
pub mod store;

pub use {
    descriptor::{DescriptorSet, PluginDescriptor, PluginStatus},
    error::{Error, Result},
    orchestrator::{Orchestrator, PluginOutcome, UpdateAction, UpdateReport},
    registry::{Registry, Snapshot},
    runtime::{Runtime, Runtimes},
};
