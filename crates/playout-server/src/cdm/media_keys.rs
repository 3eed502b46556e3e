//! Media keys instances and their key sessions

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use playout_common::{
    InitDataType, KeySessionType, KeyStatus, MediaKeyErrorStatus, SubSamplePair,
};
use tracing::{debug, error, warn};

use super::ocdm::{OcdmSession, OcdmSessionClient, OcdmSystem};
use super::service::KeySessionIdGenerator;

/// Event sink for the client owning a media keys instance.
pub trait MediaKeysClient: Send + Sync {
    fn on_license_request(&self, key_session_id: i32, request: &[u8], url: &str);
    fn on_key_statuses_changed(&self, key_session_id: i32, statuses: &[(Vec<u8>, KeyStatus)]);
    fn on_error(&self, key_session_id: i32, message: &str);
}

/// One key session: a stable integer id in front of an OCDM session.
pub struct MediaKeySession {
    key_system: String,
    key_session_id: i32,
    session_type: KeySessionType,
    is_ldl: bool,
    client: Weak<dyn MediaKeysClient>,
    ocdm_session: OnceLock<Box<dyn OcdmSession>>,
    /// Set once `generate_request` has run; licence processing callbacks
    /// are only meaningful afterwards.
    license_requested: AtomicBool,
    /// Key updates accumulate here until `on_all_keys_updated` flushes
    /// the batch to the client.
    updated_key_statuses: Mutex<Vec<(Vec<u8>, KeyStatus)>>,
}

impl MediaKeySession {
    /// Creates the session and its OCDM counterpart.
    pub fn new(
        key_system: &str,
        key_session_id: i32,
        ocdm_system: &dyn OcdmSystem,
        session_type: KeySessionType,
        client: Weak<dyn MediaKeysClient>,
        is_ldl: bool,
    ) -> Result<Arc<Self>, crate::error::CdmError> {
        let session = Arc::new(Self {
            key_system: key_system.to_string(),
            key_session_id,
            session_type,
            is_ldl,
            client,
            ocdm_session: OnceLock::new(),
            license_requested: AtomicBool::new(false),
            updated_key_statuses: Mutex::new(Vec::new()),
        });
        let ocdm =
            ocdm_system.create_session(Arc::downgrade(&session) as Weak<dyn OcdmSessionClient>)?;
        // The cell is freshly created above; set cannot race.
        let _ = session.ocdm_session.set(ocdm);
        debug!(
            "Key session {} created for '{}' (ldl: {})",
            key_session_id, session.key_system, is_ldl
        );
        Ok(session)
    }

    pub fn key_session_id(&self) -> i32 {
        self.key_session_id
    }

    pub fn is_ldl(&self) -> bool {
        self.is_ldl
    }

    fn ocdm(&self) -> &dyn OcdmSession {
        // Set unconditionally in new(); a session without it never leaves
        // the constructor.
        self.ocdm_session.get().map(|s| s.as_ref()).unwrap()
    }

    pub fn generate_request(
        &self,
        init_data_type: InitDataType,
        init_data: &[u8],
    ) -> MediaKeyErrorStatus {
        let status = self.ocdm().construct_session(self.session_type, init_data_type, init_data);
        if status == MediaKeyErrorStatus::Ok {
            self.license_requested.store(true, Ordering::SeqCst);
        } else {
            error!("generate_request failed for key session {}", self.key_session_id);
        }
        status
    }

    pub fn load_session(&self) -> MediaKeyErrorStatus {
        self.ocdm().load()
    }

    pub fn update_session(&self, response_data: &[u8]) -> MediaKeyErrorStatus {
        self.ocdm().update(response_data)
    }

    pub fn close_key_session(&self) -> MediaKeyErrorStatus {
        self.ocdm().close()
    }

    pub fn remove_key_session(&self) -> MediaKeyErrorStatus {
        self.ocdm().remove()
    }

    pub fn cdm_key_session_id(&self) -> Result<String, MediaKeyErrorStatus> {
        self.ocdm().cdm_key_session_id()
    }

    pub fn decrypt(
        &self,
        payload: &mut [u8],
        sub_samples: &[SubSamplePair],
        init_vector: &[u8],
        key_id: &[u8],
        init_with_last_15: u32,
    ) -> MediaKeyErrorStatus {
        self.ocdm().decrypt_buffer(payload, sub_samples, init_vector, key_id, init_with_last_15)
    }
}

impl OcdmSessionClient for MediaKeySession {
    fn on_process_challenge(&self, url: &str, challenge: &[u8]) {
        if !self.license_requested.load(Ordering::SeqCst) {
            warn!(
                "Challenge for key session {} before generate_request, dropping",
                self.key_session_id
            );
            return;
        }
        if let Some(client) = self.client.upgrade() {
            client.on_license_request(self.key_session_id, challenge, url);
        }
    }

    fn on_key_updated(&self, key_id: &[u8]) {
        self.updated_key_statuses
            .lock()
            .unwrap()
            .push((key_id.to_vec(), KeyStatus::Usable));
    }

    fn on_all_keys_updated(&self) {
        let statuses: Vec<_> = std::mem::take(&mut *self.updated_key_statuses.lock().unwrap());
        if statuses.is_empty() {
            return;
        }
        if let Some(client) = self.client.upgrade() {
            client.on_key_statuses_changed(self.key_session_id, &statuses);
        }
    }

    fn on_error(&self, message: &str) {
        error!("Key session {} reported: {}", self.key_session_id, message);
        if let Some(client) = self.client.upgrade() {
            client.on_error(self.key_session_id, message);
        }
    }
}

/// One media keys instance: an OCDM system plus its key session registry.
pub struct MediaKeys {
    key_system: String,
    ocdm_system: Arc<dyn OcdmSystem>,
    id_generator: KeySessionIdGenerator,
    sessions: Mutex<HashMap<i32, Arc<MediaKeySession>>>,
}

impl MediaKeys {
    pub fn new(
        key_system: &str,
        ocdm_system: Arc<dyn OcdmSystem>,
        id_generator: KeySessionIdGenerator,
    ) -> Self {
        Self {
            key_system: key_system.to_string(),
            ocdm_system,
            id_generator,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn key_system(&self) -> &str {
        &self.key_system
    }

    pub fn create_key_session(
        &self,
        session_type: KeySessionType,
        client: Weak<dyn MediaKeysClient>,
        is_ldl: bool,
    ) -> Result<i32, MediaKeyErrorStatus> {
        let key_session_id = self.id_generator.next_id();
        let session = MediaKeySession::new(
            &self.key_system,
            key_session_id,
            self.ocdm_system.as_ref(),
            session_type,
            client,
            is_ldl,
        )
        .map_err(|err| {
            error!("Failed to create key session: {}", err);
            MediaKeyErrorStatus::Fail
        })?;
        self.sessions.lock().unwrap().insert(key_session_id, session);
        Ok(key_session_id)
    }

    fn with_session<R>(
        &self,
        key_session_id: i32,
        f: impl FnOnce(&MediaKeySession) -> R,
    ) -> Result<R, MediaKeyErrorStatus> {
        let sessions = self.sessions.lock().unwrap();
        match sessions.get(&key_session_id) {
            Some(session) => Ok(f(session)),
            None => {
                error!("No key session with id {}", key_session_id);
                Err(MediaKeyErrorStatus::BadSessionId)
            }
        }
    }

    pub fn generate_request(
        &self,
        key_session_id: i32,
        init_data_type: InitDataType,
        init_data: &[u8],
    ) -> MediaKeyErrorStatus {
        self.with_session(key_session_id, |s| s.generate_request(init_data_type, init_data))
            .unwrap_or_else(|status| status)
    }

    pub fn load_session(&self, key_session_id: i32) -> MediaKeyErrorStatus {
        self.with_session(key_session_id, |s| s.load_session()).unwrap_or_else(|status| status)
    }

    pub fn update_session(&self, key_session_id: i32, response_data: &[u8]) -> MediaKeyErrorStatus {
        self.with_session(key_session_id, |s| s.update_session(response_data))
            .unwrap_or_else(|status| status)
    }

    /// Closes the session and erases it from the registry.
    pub fn close_key_session(&self, key_session_id: i32) -> MediaKeyErrorStatus {
        let removed = self.sessions.lock().unwrap().remove(&key_session_id);
        match removed {
            Some(session) => session.close_key_session(),
            None => {
                error!("No key session with id {}", key_session_id);
                MediaKeyErrorStatus::BadSessionId
            }
        }
    }

    /// OCDM-level remove; the session stays registered.
    pub fn remove_key_session(&self, key_session_id: i32) -> MediaKeyErrorStatus {
        self.with_session(key_session_id, |s| s.remove_key_session())
            .unwrap_or_else(|status| status)
    }

    pub fn cdm_key_session_id(&self, key_session_id: i32) -> Result<String, MediaKeyErrorStatus> {
        self.with_session(key_session_id, |s| s.cdm_key_session_id())
            .unwrap_or_else(Err)
    }

    pub fn has_session(&self, key_session_id: i32) -> bool {
        self.sessions.lock().unwrap().contains_key(&key_session_id)
    }

    pub fn decrypt(
        &self,
        key_session_id: i32,
        payload: &mut [u8],
        sub_samples: &[SubSamplePair],
        init_vector: &[u8],
        key_id: &[u8],
        init_with_last_15: u32,
    ) -> MediaKeyErrorStatus {
        self.with_session(key_session_id, |s| {
            s.decrypt(payload, sub_samples, init_vector, key_id, init_with_last_15)
        })
        .unwrap_or_else(|status| status)
    }
}
