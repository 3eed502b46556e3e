//! OCDM trait seams
//!
//! The Widevine / PlayReady OCDM implementations live outside this
//! repository; the daemon programs against these traits and platform
//! integrations provide the factory at bootstrap.

use std::sync::{Arc, Weak};

use playout_common::{InitDataType, KeySessionType, MediaKeyErrorStatus, SubSamplePair};

use crate::error::CdmError;

/// Callbacks an OCDM session raises while processing licences.
///
/// All callbacks may arrive on CDM-owned threads.
pub trait OcdmSessionClient: Send + Sync {
    /// A licence challenge is ready to be sent to the licence server.
    fn on_process_challenge(&self, url: &str, challenge: &[u8]);

    /// One key of the session changed status.
    fn on_key_updated(&self, key_id: &[u8]);

    /// Every key update of the current batch has been delivered.
    fn on_all_keys_updated(&self);

    fn on_error(&self, message: &str);
}

/// One key session inside the platform CDM.
pub trait OcdmSession: Send + Sync {
    /// Constructs the underlying CDM session and kicks off licence
    /// acquisition; the challenge arrives via
    /// [`OcdmSessionClient::on_process_challenge`].
    fn construct_session(
        &self,
        session_type: KeySessionType,
        init_data_type: InitDataType,
        init_data: &[u8],
    ) -> MediaKeyErrorStatus;

    fn load(&self) -> MediaKeyErrorStatus;

    fn update(&self, response: &[u8]) -> MediaKeyErrorStatus;

    /// Decrypts one sample in place.
    fn decrypt_buffer(
        &self,
        payload: &mut [u8],
        sub_samples: &[SubSamplePair],
        init_vector: &[u8],
        key_id: &[u8],
        init_with_last_15: u32,
    ) -> MediaKeyErrorStatus;

    fn close(&self) -> MediaKeyErrorStatus;

    fn remove(&self) -> MediaKeyErrorStatus;

    /// The CDM-owned opaque session identifier, available once the
    /// session has been constructed.
    fn cdm_key_session_id(&self) -> Result<String, MediaKeyErrorStatus>;
}

/// One key system inside the platform CDM.
pub trait OcdmSystem: Send + Sync {
    fn create_session(
        &self,
        client: Weak<dyn OcdmSessionClient>,
    ) -> Result<Box<dyn OcdmSession>, CdmError>;
}

/// Creates [`OcdmSystem`] instances per key system string.
pub trait OcdmSystemFactory: Send + Sync {
    fn create_system(&self, key_system: &str) -> Result<Arc<dyn OcdmSystem>, CdmError>;
}

/// Factory used when no platform CDM is linked in. Creation fails, so
/// media keys instances are never handed out and every DRM call degrades
/// to a clean error.
pub struct UnavailableOcdmFactory;

impl OcdmSystemFactory for UnavailableOcdmFactory {
    fn create_system(&self, key_system: &str) -> Result<Arc<dyn OcdmSystem>, CdmError> {
        Err(CdmError::SystemUnavailable(key_system.to_string()))
    }
}
