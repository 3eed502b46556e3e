//! DRM / CDM bridge
//!
//! Wraps the platform OCDM implementation behind trait seams so key
//! management and the per-sample decrypt contract can be exercised without
//! a real CDM. [`service::CdmService`] owns the media-keys instances and
//! is the decrypt entry point used on the sample path.

pub mod media_keys;
pub mod ocdm;
pub mod service;

pub use media_keys::{MediaKeys, MediaKeySession, MediaKeysClient};
pub use ocdm::{OcdmSession, OcdmSessionClient, OcdmSystem, OcdmSystemFactory, UnavailableOcdmFactory};
pub use service::{CdmService, KeySessionIdGenerator, SampleDecryptor};
