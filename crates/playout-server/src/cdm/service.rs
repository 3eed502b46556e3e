//! CDM service: media keys registry and the sample decrypt entry point

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, Weak};

use playout_common::{InitDataType, KeySessionType, MediaKeyErrorStatus, SubSamplePair};
use tracing::{debug, warn};

use super::media_keys::{MediaKeys, MediaKeysClient};
use super::ocdm::OcdmSystemFactory;
use crate::error::CdmError;

/// Process-wide monotonically increasing key session id source.
///
/// Explicit state passed at construction rather than a global; every
/// media keys instance in the process shares one generator.
#[derive(Clone)]
pub struct KeySessionIdGenerator {
    next: Arc<AtomicI32>,
}

impl KeySessionIdGenerator {
    pub fn new() -> Self {
        Self { next: Arc::new(AtomicI32::new(0)) }
    }

    pub fn next_id(&self) -> i32 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for KeySessionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-sample decrypt contract used on the media sample path.
pub trait SampleDecryptor: Send + Sync {
    fn decrypt(
        &self,
        key_session_id: i32,
        payload: &mut [u8],
        sub_samples: &[SubSamplePair],
        init_vector: &[u8],
        key_id: &[u8],
        init_with_last_15: u32,
    ) -> MediaKeyErrorStatus;
}

struct MediaKeysEntry {
    media_keys: Arc<MediaKeys>,
    /// Connection that created the instance; used for disconnect cleanup.
    owner: u64,
}

/// Owns every media keys instance in the daemon.
pub struct CdmService {
    ocdm_factory: Arc<dyn OcdmSystemFactory>,
    id_generator: KeySessionIdGenerator,
    next_handle: AtomicI32,
    instances: Mutex<HashMap<i32, MediaKeysEntry>>,
}

impl CdmService {
    pub fn new(ocdm_factory: Arc<dyn OcdmSystemFactory>) -> Self {
        Self {
            ocdm_factory,
            id_generator: KeySessionIdGenerator::new(),
            next_handle: AtomicI32::new(0),
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a media keys instance for `key_system`, owned by the
    /// connection `owner`.
    pub fn create_media_keys(&self, key_system: &str, owner: u64) -> Result<i32, CdmError> {
        let ocdm_system = self.ocdm_factory.create_system(key_system)?;
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        let media_keys =
            Arc::new(MediaKeys::new(key_system, ocdm_system, self.id_generator.clone()));
        self.instances.lock().unwrap().insert(handle, MediaKeysEntry { media_keys, owner });
        debug!("Media keys {} created for key system '{}'", handle, key_system);
        Ok(handle)
    }

    pub fn destroy_media_keys(&self, handle: i32) -> Result<(), CdmError> {
        match self.instances.lock().unwrap().remove(&handle) {
            Some(_) => Ok(()),
            None => Err(CdmError::NoMediaKeys(handle)),
        }
    }

    /// Drops every media keys instance created by a disconnected client.
    pub fn drop_client(&self, owner: u64) {
        let mut instances = self.instances.lock().unwrap();
        let before = instances.len();
        instances.retain(|_, entry| entry.owner != owner);
        let dropped = before - instances.len();
        if dropped > 0 {
            debug!("Dropped {} media keys instances of client {}", dropped, owner);
        }
    }

    fn media_keys(&self, handle: i32) -> Option<Arc<MediaKeys>> {
        self.instances.lock().unwrap().get(&handle).map(|e| e.media_keys.clone())
    }

    pub fn create_key_session(
        &self,
        handle: i32,
        session_type: KeySessionType,
        client: Weak<dyn MediaKeysClient>,
        is_ldl: bool,
    ) -> Result<i32, MediaKeyErrorStatus> {
        match self.media_keys(handle) {
            Some(media_keys) => media_keys.create_key_session(session_type, client, is_ldl),
            None => Err(MediaKeyErrorStatus::BadSessionId),
        }
    }

    pub fn generate_request(
        &self,
        handle: i32,
        key_session_id: i32,
        init_data_type: InitDataType,
        init_data: &[u8],
    ) -> MediaKeyErrorStatus {
        match self.media_keys(handle) {
            Some(media_keys) => {
                media_keys.generate_request(key_session_id, init_data_type, init_data)
            }
            None => MediaKeyErrorStatus::BadSessionId,
        }
    }

    pub fn load_session(&self, handle: i32, key_session_id: i32) -> MediaKeyErrorStatus {
        match self.media_keys(handle) {
            Some(media_keys) => media_keys.load_session(key_session_id),
            None => MediaKeyErrorStatus::BadSessionId,
        }
    }

    pub fn update_session(
        &self,
        handle: i32,
        key_session_id: i32,
        response_data: &[u8],
    ) -> MediaKeyErrorStatus {
        match self.media_keys(handle) {
            Some(media_keys) => media_keys.update_session(key_session_id, response_data),
            None => MediaKeyErrorStatus::BadSessionId,
        }
    }

    pub fn close_key_session(&self, handle: i32, key_session_id: i32) -> MediaKeyErrorStatus {
        match self.media_keys(handle) {
            Some(media_keys) => media_keys.close_key_session(key_session_id),
            None => MediaKeyErrorStatus::BadSessionId,
        }
    }

    pub fn remove_key_session(&self, handle: i32, key_session_id: i32) -> MediaKeyErrorStatus {
        match self.media_keys(handle) {
            Some(media_keys) => media_keys.remove_key_session(key_session_id),
            None => MediaKeyErrorStatus::BadSessionId,
        }
    }

    pub fn cdm_key_session_id(
        &self,
        handle: i32,
        key_session_id: i32,
    ) -> Result<String, MediaKeyErrorStatus> {
        match self.media_keys(handle) {
            Some(media_keys) => media_keys.cdm_key_session_id(key_session_id),
            None => Err(MediaKeyErrorStatus::BadSessionId),
        }
    }

    /// The operations declared by the module but not backed by this
    /// daemon. They answer `NotSupported` rather than guessed behaviour.
    pub fn unsupported_operation(&self, name: &'static str) -> MediaKeyErrorStatus {
        warn!("DRM operation '{}' is not supported", name);
        MediaKeyErrorStatus::NotSupported
    }
}

impl SampleDecryptor for CdmService {
    /// Dispatches to the key session, wherever it is registered. Called
    /// by the sample path for every encrypted sample.
    fn decrypt(
        &self,
        key_session_id: i32,
        payload: &mut [u8],
        sub_samples: &[SubSamplePair],
        init_vector: &[u8],
        key_id: &[u8],
        init_with_last_15: u32,
    ) -> MediaKeyErrorStatus {
        let owner = {
            let instances = self.instances.lock().unwrap();
            instances
                .values()
                .find(|entry| entry.media_keys.has_session(key_session_id))
                .map(|entry| entry.media_keys.clone())
        };
        match owner {
            Some(media_keys) => media_keys.decrypt(
                key_session_id,
                payload,
                sub_samples,
                init_vector,
                key_id,
                init_with_last_15,
            ),
            None => {
                warn!("Decrypt for unknown key session {}", key_session_id);
                MediaKeyErrorStatus::BadSessionId
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdm::ocdm::{OcdmSession, OcdmSessionClient, OcdmSystem, UnavailableOcdmFactory};
    use playout_common::KeyStatus;
    use std::sync::atomic::AtomicUsize;

    struct FakeOcdmSession {
        client: Weak<dyn OcdmSessionClient>,
        decrypt_calls: Arc<AtomicUsize>,
        constructed: AtomicI32,
    }

    impl OcdmSession for FakeOcdmSession {
        fn construct_session(
            &self,
            _session_type: KeySessionType,
            _init_data_type: InitDataType,
            _init_data: &[u8],
        ) -> MediaKeyErrorStatus {
            self.constructed.store(1, Ordering::SeqCst);
            if let Some(client) = self.client.upgrade() {
                client.on_process_challenge("https://license.example", b"challenge");
            }
            MediaKeyErrorStatus::Ok
        }

        fn load(&self) -> MediaKeyErrorStatus {
            MediaKeyErrorStatus::Ok
        }

        fn update(&self, _response: &[u8]) -> MediaKeyErrorStatus {
            if let Some(client) = self.client.upgrade() {
                client.on_key_updated(&[0xaa, 0xbb]);
                client.on_key_updated(&[0xcc, 0xdd]);
                client.on_all_keys_updated();
            }
            MediaKeyErrorStatus::Ok
        }

        fn decrypt_buffer(
            &self,
            payload: &mut [u8],
            _sub_samples: &[SubSamplePair],
            _init_vector: &[u8],
            _key_id: &[u8],
            _init_with_last_15: u32,
        ) -> MediaKeyErrorStatus {
            self.decrypt_calls.fetch_add(1, Ordering::SeqCst);
            for byte in payload.iter_mut() {
                *byte ^= 0xff;
            }
            MediaKeyErrorStatus::Ok
        }

        fn close(&self) -> MediaKeyErrorStatus {
            MediaKeyErrorStatus::Ok
        }

        fn remove(&self) -> MediaKeyErrorStatus {
            MediaKeyErrorStatus::Ok
        }

        fn cdm_key_session_id(&self) -> Result<String, MediaKeyErrorStatus> {
            if self.constructed.load(Ordering::SeqCst) == 1 {
                Ok("cdm-session-1".to_string())
            } else {
                Err(MediaKeyErrorStatus::InvalidState)
            }
        }
    }

    struct FakeOcdmSystem {
        decrypt_calls: Arc<AtomicUsize>,
    }

    impl OcdmSystem for FakeOcdmSystem {
        fn create_session(
            &self,
            client: Weak<dyn OcdmSessionClient>,
        ) -> Result<Box<dyn OcdmSession>, CdmError> {
            Ok(Box::new(FakeOcdmSession {
                client,
                decrypt_calls: self.decrypt_calls.clone(),
                constructed: AtomicI32::new(0),
            }))
        }
    }

    struct FakeFactory {
        decrypt_calls: Arc<AtomicUsize>,
    }

    impl OcdmSystemFactory for FakeFactory {
        fn create_system(&self, _key_system: &str) -> Result<Arc<dyn OcdmSystem>, CdmError> {
            Ok(Arc::new(FakeOcdmSystem { decrypt_calls: self.decrypt_calls.clone() }))
        }
    }

    #[derive(Default)]
    struct RecordingClient {
        challenges: Mutex<Vec<(String, Vec<u8>)>>,
        key_statuses: Mutex<Vec<(i32, Vec<(Vec<u8>, KeyStatus)>)>>,
    }

    impl MediaKeysClient for RecordingClient {
        fn on_license_request(&self, _key_session_id: i32, request: &[u8], url: &str) {
            self.challenges.lock().unwrap().push((url.to_string(), request.to_vec()));
        }

        fn on_key_statuses_changed(
            &self,
            key_session_id: i32,
            statuses: &[(Vec<u8>, KeyStatus)],
        ) {
            self.key_statuses.lock().unwrap().push((key_session_id, statuses.to_vec()));
        }

        fn on_error(&self, _key_session_id: i32, _message: &str) {}
    }

    fn service() -> (CdmService, Arc<AtomicUsize>) {
        let decrypt_calls = Arc::new(AtomicUsize::new(0));
        let service =
            CdmService::new(Arc::new(FakeFactory { decrypt_calls: decrypt_calls.clone() }));
        (service, decrypt_calls)
    }

    #[test]
    fn key_session_lifecycle() {
        let (service, _) = service();
        let client = Arc::new(RecordingClient::default());
        let handle = service.create_media_keys("com.widevine.alpha", 1).unwrap();

        let weak = Arc::downgrade(&client) as Weak<dyn MediaKeysClient>;
        let sid = service.create_key_session(handle, KeySessionType::Temporary, weak, false).unwrap();
        assert!(sid >= 0);

        assert_eq!(
            service.generate_request(handle, sid, InitDataType::Cenc, b"init"),
            MediaKeyErrorStatus::Ok
        );
        assert_eq!(client.challenges.lock().unwrap().len(), 1);
        assert_eq!(service.cdm_key_session_id(handle, sid).unwrap(), "cdm-session-1");

        assert_eq!(service.close_key_session(handle, sid), MediaKeyErrorStatus::Ok);
        // Second close: the session is gone from the registry.
        assert_eq!(service.close_key_session(handle, sid), MediaKeyErrorStatus::BadSessionId);
    }

    #[test]
    fn key_session_ids_are_monotonic_across_instances() {
        let (service, _) = service();
        let client = Arc::new(RecordingClient::default());
        let h1 = service.create_media_keys("com.widevine.alpha", 1).unwrap();
        let h2 = service.create_media_keys("com.microsoft.playready", 1).unwrap();

        let a = service
            .create_key_session(h1, KeySessionType::Temporary, Arc::downgrade(&client) as _, false)
            .unwrap();
        let b = service
            .create_key_session(h2, KeySessionType::Temporary, Arc::downgrade(&client) as _, false)
            .unwrap();
        assert!(b > a);
    }

    #[test]
    fn key_updates_accumulate_until_flush() {
        let (service, _) = service();
        let client = Arc::new(RecordingClient::default());
        let handle = service.create_media_keys("com.widevine.alpha", 1).unwrap();
        let sid = service
            .create_key_session(handle, KeySessionType::Temporary, Arc::downgrade(&client) as _, false)
            .unwrap();

        assert_eq!(service.update_session(handle, sid, b"license"), MediaKeyErrorStatus::Ok);
        let statuses = client.key_statuses.lock().unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].0, sid);
        assert_eq!(statuses[0].1.len(), 2);
        assert_eq!(statuses[0].1[0].0, vec![0xaa, 0xbb]);
    }

    #[test]
    fn decrypt_dispatches_across_media_keys_instances() {
        let (service, decrypt_calls) = service();
        let client = Arc::new(RecordingClient::default());
        let handle = service.create_media_keys("com.widevine.alpha", 1).unwrap();
        let sid = service
            .create_key_session(handle, KeySessionType::Temporary, Arc::downgrade(&client) as _, false)
            .unwrap();

        let mut payload = vec![0x00, 0xff];
        let status = service.decrypt(sid, &mut payload, &[], &[0; 16], &[0xaa], 0);
        assert_eq!(status, MediaKeyErrorStatus::Ok);
        assert_eq!(payload, vec![0xff, 0x00]);
        assert_eq!(decrypt_calls.load(Ordering::SeqCst), 1);

        assert_eq!(
            service.decrypt(9999, &mut payload, &[], &[], &[], 0),
            MediaKeyErrorStatus::BadSessionId
        );
    }

    #[test]
    fn unavailable_ocdm_blocks_media_keys_creation() {
        let service = CdmService::new(Arc::new(UnavailableOcdmFactory));
        assert!(service.create_media_keys("com.widevine.alpha", 1).is_err());
    }

    #[test]
    fn disconnect_drops_owned_instances() {
        let (service, _) = service();
        let h1 = service.create_media_keys("com.widevine.alpha", 1).unwrap();
        let h2 = service.create_media_keys("com.widevine.alpha", 2).unwrap();
        service.drop_client(1);
        assert!(service.destroy_media_keys(h1).is_err());
        assert!(service.destroy_media_keys(h2).is_ok());
    }

    #[test]
    fn unsupported_operations_return_not_supported() {
        let (service, _) = service();
        assert_eq!(service.unsupported_operation("selectKeyId"), MediaKeyErrorStatus::NotSupported);
    }
}
