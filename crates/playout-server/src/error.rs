//! Error types for the playback daemon

use thiserror::Error;

/// Result type alias for daemon operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top level daemon errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Player error: {0}")]
    Player(#[from] PlayerError),

    #[error("Shared memory error: {0}")]
    SharedMemory(#[from] ShmError),

    #[error("CDM error: {0}")]
    Cdm(#[from] CdmError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] playout_protocol::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Session level failures surfaced to RPC callers.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("No session with id {session_id}")]
    NoSession { session_id: i32 },

    #[error("All {max_playbacks} playback slots are in use")]
    SlotsExhausted { max_playbacks: u32 },

    #[error("Session {session_id} has no pipeline loaded")]
    NotLoaded { session_id: i32 },

    #[error("No source with id {source_id} in session {session_id}")]
    NoSource { session_id: i32, source_id: i32 },

    #[error("Operation rejected: {reason}")]
    Rejected { reason: String },

    #[error("Service is shutting down")]
    ServiceGone,
}

/// Pipeline and worker failures.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("Pipeline construction failed: {0}")]
    Construction(String),

    #[error("Pipeline state change to {target} failed")]
    StateChange { target: &'static str },

    #[error("Seek to {position_ns} ns failed")]
    Seek { position_ns: i64 },

    #[error("No source of type {0} attached")]
    NoSource(playout_common::MediaSourceType),

    #[error("Buffer push rejected by the pipeline")]
    BufferPush,

    #[error("Worker thread is gone")]
    WorkerGone,
}

/// Shared memory buffer failures.
#[derive(Debug, Error)]
pub enum ShmError {
    #[error("memfd_create failed: {0}")]
    Create(std::io::Error),

    #[error("Requested buffer size of {0} bytes overflows the region layout")]
    TooLarge(u64),

    #[error("ftruncate to {size} bytes failed: {source}")]
    Resize { size: u32, source: std::io::Error },

    #[error("mmap failed: {0}")]
    Map(std::io::Error),

    #[error("No free shared memory partition")]
    NoFreePartition,

    #[error("Session {0} has no mapped partition")]
    NotMapped(i32),

    #[error("Range [{offset}, {offset}+{len}) is outside the session partition")]
    OutOfBounds { offset: u32, len: u32 },
}

/// DRM / key management failures.
#[derive(Debug, Error)]
pub enum CdmError {
    #[error("OCDM system for key system '{0}' is unavailable")]
    SystemUnavailable(String),

    #[error("No media keys instance with handle {0}")]
    NoMediaKeys(i32),

    #[error("OCDM session construction failed: {0}")]
    SessionConstruction(String),
}
