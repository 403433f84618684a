//! Shared types, error helpers, and the plugin process protocol used across
//! all subhost crates.

pub mod error;
pub mod protocol;

pub use error::{Error, FromMessage, Result};
