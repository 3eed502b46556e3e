//! Shared types for the playout media playback service
//!
//! This crate holds the domain vocabulary used on both sides of the
//! client/server boundary: identifiers, media descriptors, playback and
//! network state enums, the shared-memory frame record layout, and the
//! server policy configuration.

pub mod config;
pub mod error;
pub mod frame;
pub mod types;

pub use config::ServerConfig;
pub use error::{Error, Result};
pub use types::*;
