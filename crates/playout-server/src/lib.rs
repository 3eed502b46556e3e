//! Playout playback daemon
//!
//! The server hosts GStreamer pipelines on behalf of remote clients. Each
//! playback session owns a dedicated worker thread that is the only
//! mutator of its pipeline; RPC handlers and the bus dispatcher post tasks
//! onto that thread. Compressed samples arrive through a partitioned
//! shared-memory buffer and encrypted samples are routed through the CDM
//! service before they reach the pipeline.

pub mod cdm;
pub mod error;
pub mod ipc;
pub mod player;
pub mod service;
pub mod shm;

pub use error::{Error, Result};
