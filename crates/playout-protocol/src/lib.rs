//! Wire schema for the playout media playback service
//!
//! The protocol is a fixed protobuf schema carried over a unix domain
//! socket: every frame is a length-delimited [`envelope::Frame`] holding a
//! call, a reply, or an asynchronous event. Requests and events are
//! multiplexed on one channel per client process.
//!
//! The message structs here are the schema; they are hand-maintained
//! prost derives rather than build-time generated code so the crate
//! carries no build dependency on `protoc`.

pub mod convert;
pub mod envelope;
pub mod fdpass;
pub mod messages;

pub use envelope::{Frame, FrameKind, Method, ReplyStatus};

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while encoding or decoding protocol traffic.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to decode protocol message: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("Frame of {0} bytes exceeds the maximum frame size")]
    Oversized(usize),

    #[error("Truncated frame: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("I/O error on the channel: {0}")]
    Io(#[from] std::io::Error),
}

/// Upper bound on a single frame, including large media key payloads.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;
