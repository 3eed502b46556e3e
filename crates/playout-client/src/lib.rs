//! Client library for the playout media playback service
//!
//! Applications embed this crate to drive pipelines hosted by the
//! daemon. The pieces compose as follows:
//!
//! 1. [`rpc::ClientChannel::connect`] opens the multiplexed channel.
//! 2. [`shm::SharedMemoryClient::fetch`] maps the daemon's media buffer.
//! 3. [`coordinator::PipelineCoordinator::connect`] creates a playback
//!    session and exposes the control surface; inbound events reach the
//!    application through its [`coordinator::PipelineEventObserver`].
//! 4. For protected content, [`media_keys::MediaKeysProxy`] drives the
//!    daemon's key management and feeds the [`key_registry::KeyIdRegistry`]
//!    the coordinator stamps segments from.

pub mod coordinator;
pub mod error;
pub mod frame_writer;
pub mod key_registry;
pub mod media_keys;
pub mod rpc;
pub mod shm;

pub use coordinator::{PipelineCoordinator, PipelineEventObserver};
pub use error::{ClientError, Result};
pub use key_registry::KeyIdRegistry;
