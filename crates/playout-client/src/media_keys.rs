//! Client half of the media keys module
//!
//! Drives the daemon's key management for one media keys instance and
//! relays licence traffic to the embedding DRM client. Key ids resolved
//! by key-status updates are recorded in the [`KeyIdRegistry`] so the
//! pipeline coordinator can stamp encrypted segments.

use std::sync::{Arc, Weak};
use std::thread;

use playout_common::{InitDataType, KeySessionType, KeyStatus, MediaKeyErrorStatus};
use playout_protocol::convert::{key_status_from_raw, media_key_error_status_from_raw};
use playout_protocol::messages::*;
use playout_protocol::Method;
use tracing::{debug, warn};

use crate::error::Result;
use crate::key_registry::KeyIdRegistry;
use crate::rpc::ClientChannel;

/// Licence traffic delivered to the embedding DRM client.
pub trait MediaKeysObserver: Send + Sync {
    /// A licence challenge to post to the licence server.
    fn on_license_request(&self, key_session_id: i32, message: &[u8], url: &str);

    fn on_key_statuses_changed(&self, key_session_id: i32, statuses: &[(Vec<u8>, KeyStatus)]);
}

pub struct MediaKeysProxy {
    channel: Arc<ClientChannel>,
    media_keys_handle: i32,
    subscription: u64,
}

impl MediaKeysProxy {
    /// Creates a media keys instance for `key_system` on the daemon.
    pub fn connect(
        channel: Arc<ClientChannel>,
        key_system: &str,
        observer: Weak<dyn MediaKeysObserver>,
        registry: Arc<KeyIdRegistry>,
    ) -> Result<Self> {
        let reply = channel.call(
            Method::CreateMediaKeys,
            &CreateMediaKeysRequest { key_system: key_system.to_string() },
        )?;
        let response: CreateMediaKeysResponse = reply.decode_payload()?;
        let media_keys_handle = response.media_keys_handle;
        debug!("Media keys {} created for '{}'", media_keys_handle, key_system);

        let (subscription, events) = channel.subscribe_events();
        thread::Builder::new()
            .name(format!("playout-keys-{media_keys_handle}"))
            .spawn(move || {
                while let Ok(frame) = events.recv() {
                    match frame.method() {
                        Method::LicenseRequestEvent => {
                            let Ok(event) = frame.decode_payload::<LicenseRequestEvent>() else {
                                warn!("Undecodable license request event");
                                continue;
                            };
                            if event.media_keys_handle != media_keys_handle {
                                continue;
                            }
                            if let Some(observer) = observer.upgrade() {
                                observer.on_license_request(
                                    event.key_session_id,
                                    &event.license_request_message,
                                    &event.url,
                                );
                            }
                        }
                        Method::KeyStatusesChangedEvent => {
                            let Ok(event) = frame.decode_payload::<KeyStatusesChangedEvent>()
                            else {
                                warn!("Undecodable key statuses event");
                                continue;
                            };
                            if event.media_keys_handle != media_keys_handle {
                                continue;
                            }
                            let statuses: Vec<(Vec<u8>, KeyStatus)> = event
                                .key_statuses
                                .into_iter()
                                .map(|entry| (entry.key_id, key_status_from_raw(entry.status)))
                                .collect();
                            // Record the first usable key so the pipeline
                            // can stamp segments for this key session.
                            if let Some((key_id, _)) = statuses
                                .iter()
                                .find(|(_, status)| *status == KeyStatus::Usable)
                            {
                                registry.put(event.key_session_id, key_id.clone());
                            }
                            if let Some(observer) = observer.upgrade() {
                                observer.on_key_statuses_changed(event.key_session_id, &statuses);
                            }
                        }
                        _ => {}
                    }
                }
                debug!("Key event pump for media keys {} finished", media_keys_handle);
            })?;

        Ok(Self { channel, media_keys_handle, subscription })
    }

    pub fn create_key_session(
        &self,
        session_type: KeySessionType,
        is_ldl: bool,
    ) -> Result<(i32, MediaKeyErrorStatus)> {
        let reply = self.channel.call(
            Method::CreateKeySession,
            &CreateKeySessionRequest {
                media_keys_handle: self.media_keys_handle,
                session_type: WireKeySessionType::from(session_type) as i32,
                is_ldl,
            },
        )?;
        let response: CreateKeySessionResponse = reply.decode_payload()?;
        Ok((response.key_session_id, media_key_error_status_from_raw(response.error_status)))
    }

    pub fn generate_request(
        &self,
        key_session_id: i32,
        init_data_type: InitDataType,
        init_data: Vec<u8>,
    ) -> Result<MediaKeyErrorStatus> {
        let reply = self.channel.call(
            Method::GenerateRequest,
            &GenerateRequestRequest {
                media_keys_handle: self.media_keys_handle,
                key_session_id,
                init_data_type: WireInitDataType::from(init_data_type) as i32,
                init_data,
            },
        )?;
        let response: GenerateRequestResponse = reply.decode_payload()?;
        Ok(media_key_error_status_from_raw(response.error_status))
    }

    pub fn load_session(&self, key_session_id: i32) -> Result<MediaKeyErrorStatus> {
        let reply = self.channel.call(
            Method::LoadKeySession,
            &LoadKeySessionRequest { media_keys_handle: self.media_keys_handle, key_session_id },
        )?;
        let response: LoadKeySessionResponse = reply.decode_payload()?;
        Ok(media_key_error_status_from_raw(response.error_status))
    }

    pub fn update_session(
        &self,
        key_session_id: i32,
        response_data: Vec<u8>,
    ) -> Result<MediaKeyErrorStatus> {
        let reply = self.channel.call(
            Method::UpdateKeySession,
            &UpdateKeySessionRequest {
                media_keys_handle: self.media_keys_handle,
                key_session_id,
                response_data,
            },
        )?;
        let response: UpdateKeySessionResponse = reply.decode_payload()?;
        Ok(media_key_error_status_from_raw(response.error_status))
    }

    pub fn close_key_session(&self, key_session_id: i32) -> Result<MediaKeyErrorStatus> {
        let reply = self.channel.call(
            Method::CloseKeySession,
            &CloseKeySessionRequest { media_keys_handle: self.media_keys_handle, key_session_id },
        )?;
        let response: CloseKeySessionResponse = reply.decode_payload()?;
        Ok(media_key_error_status_from_raw(response.error_status))
    }

    pub fn remove_key_session(&self, key_session_id: i32) -> Result<MediaKeyErrorStatus> {
        let reply = self.channel.call(
            Method::RemoveKeySession,
            &RemoveKeySessionRequest { media_keys_handle: self.media_keys_handle, key_session_id },
        )?;
        let response: RemoveKeySessionResponse = reply.decode_payload()?;
        Ok(media_key_error_status_from_raw(response.error_status))
    }

    pub fn get_cdm_key_session_id(&self, key_session_id: i32) -> Result<String> {
        let reply = self.channel.call(
            Method::GetCdmKeySessionId,
            &GetCdmKeySessionIdRequest {
                media_keys_handle: self.media_keys_handle,
                key_session_id,
            },
        )?;
        let response: GetCdmKeySessionIdResponse = reply.decode_payload()?;
        Ok(response.cdm_key_session_id)
    }
}

impl Drop for MediaKeysProxy {
    fn drop(&mut self) {
        self.channel.unsubscribe(self.subscription);
        let request = DestroyMediaKeysRequest { media_keys_handle: self.media_keys_handle };
        if let Err(err) = self.channel.call(Method::DestroyMediaKeys, &request) {
            warn!("Destroying media keys {} failed: {}", self.media_keys_handle, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playout_protocol::envelope::{read_frame, write_frame};
    use playout_protocol::Frame;
    use std::os::unix::net::UnixListener;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Mutex as StdMutex};
    use std::time::Duration;

    const HANDLE: i32 = 7;

    static SOCKET_COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn socket_path(tag: &str) -> PathBuf {
        let n = SOCKET_COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!("playout-keys-{}-{}-{}", std::process::id(), tag, n))
    }

    /// Fake server: answers the media keys calls and, before each reply,
    /// flushes any events the test queued. Events therefore reach the
    /// client reader strictly before the reply of the call that flushed
    /// them, which makes the assertions deterministic.
    fn start_fake_server(tag: &str) -> (PathBuf, Arc<StdMutex<Vec<Frame>>>, mpsc::Sender<Frame>) {
        let path = socket_path(tag);
        let listener = UnixListener::bind(&path).unwrap();
        let calls = Arc::new(StdMutex::new(Vec::new()));
        let (event_tx, event_rx) = mpsc::channel::<Frame>();
        let recorded = calls.clone();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            while let Ok(frame) = read_frame(&mut stream) {
                while let Ok(event) = event_rx.try_recv() {
                    write_frame(&mut stream, &event).unwrap();
                }
                let reply = match frame.method() {
                    Method::CreateMediaKeys => Frame::reply(
                        frame.correlation_id,
                        frame.method(),
                        &CreateMediaKeysResponse { media_keys_handle: HANDLE },
                    ),
                    Method::DestroyMediaKeys => Frame::reply(
                        frame.correlation_id,
                        frame.method(),
                        &DestroyMediaKeysResponse {},
                    ),
                    Method::LoadKeySession => Frame::reply(
                        frame.correlation_id,
                        frame.method(),
                        &LoadKeySessionResponse {
                            error_status: WireMediaKeyErrorStatus::Ok as i32,
                        },
                    ),
                    other => Frame::error_reply(
                        frame.correlation_id,
                        other,
                        playout_protocol::ReplyStatus::Error,
                        "unhandled by the fake server",
                    ),
                };
                recorded.lock().unwrap().push(frame);
                write_frame(&mut stream, &reply).unwrap();
            }
        });
        (path, calls, event_tx)
    }

    struct RecordingObserver {
        statuses: StdMutex<Vec<(i32, Vec<(Vec<u8>, KeyStatus)>)>>,
        delivered: StdMutex<mpsc::Sender<()>>,
    }

    impl MediaKeysObserver for RecordingObserver {
        fn on_license_request(&self, _key_session_id: i32, _message: &[u8], _url: &str) {}

        fn on_key_statuses_changed(&self, key_session_id: i32, statuses: &[(Vec<u8>, KeyStatus)]) {
            self.statuses.lock().unwrap().push((key_session_id, statuses.to_vec()));
            let _ = self.delivered.lock().unwrap().send(());
        }
    }

    fn observer() -> (Arc<RecordingObserver>, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel();
        let observer = Arc::new(RecordingObserver {
            statuses: StdMutex::new(Vec::new()),
            delivered: StdMutex::new(tx),
        });
        (observer, rx)
    }

    fn key_statuses_event(
        handle: i32,
        key_session_id: i32,
        keys: Vec<(Vec<u8>, WireKeyStatus)>,
    ) -> Frame {
        Frame::event(
            Method::KeyStatusesChangedEvent,
            &KeyStatusesChangedEvent {
                media_keys_handle: handle,
                key_session_id,
                key_statuses: keys
                    .into_iter()
                    .map(|(key_id, status)| KeyIdWithStatus { key_id, status: status as i32 })
                    .collect(),
            },
        )
    }

    /// Any call works as a flush point; the server pushes queued events
    /// before answering it.
    fn flush_events(channel: &Arc<ClientChannel>) {
        channel
            .call(
                Method::LoadKeySession,
                &LoadKeySessionRequest { media_keys_handle: HANDLE, key_session_id: 0 },
            )
            .unwrap();
    }

    #[test]
    fn events_for_foreign_handles_are_ignored() {
        let (path, _calls, events) = start_fake_server("foreign");
        let channel = ClientChannel::connect(&path).unwrap();
        let registry = Arc::new(KeyIdRegistry::new());
        let (observer, delivered) = observer();
        let proxy = MediaKeysProxy::connect(
            channel.clone(),
            "com.widevine.alpha",
            Arc::downgrade(&observer) as _,
            registry.clone(),
        )
        .unwrap();

        events
            .send(key_statuses_event(HANDLE + 1, 1, vec![(vec![0x01], WireKeyStatus::Usable)]))
            .unwrap();
        events
            .send(key_statuses_event(HANDLE, 2, vec![(vec![0x02], WireKeyStatus::Usable)]))
            .unwrap();
        flush_events(&channel);
        delivered.recv_timeout(Duration::from_secs(5)).unwrap();

        // The pump preserves order, so the foreign event was already
        // processed when the own-handle one arrived: nothing recorded.
        let seen = observer.statuses.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, 2);
        drop(seen);
        assert!(registry.get(1).is_empty());
        assert_eq!(registry.get(2), vec![0x02]);

        drop(proxy);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn usable_keys_populate_the_registry() {
        let (path, _calls, events) = start_fake_server("usable");
        let channel = ClientChannel::connect(&path).unwrap();
        let registry = Arc::new(KeyIdRegistry::new());
        let (observer, delivered) = observer();
        let proxy = MediaKeysProxy::connect(
            channel.clone(),
            "com.widevine.alpha",
            Arc::downgrade(&observer) as _,
            registry.clone(),
        )
        .unwrap();

        // The first usable key of the batch wins.
        events
            .send(key_statuses_event(
                HANDLE,
                5,
                vec![(vec![0xaa], WireKeyStatus::Expired), (vec![0xbb], WireKeyStatus::Usable)],
            ))
            .unwrap();
        flush_events(&channel);
        delivered.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(registry.get(5), vec![0xbb]);

        // A batch without a usable key records nothing.
        events
            .send(key_statuses_event(HANDLE, 6, vec![(vec![0xcc], WireKeyStatus::Expired)]))
            .unwrap();
        flush_events(&channel);
        delivered.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(registry.get(6).is_empty());

        // The observer saw both batches regardless.
        assert_eq!(observer.statuses.lock().unwrap().len(), 2);

        drop(proxy);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn drop_unsubscribes_then_destroys_the_instance() {
        let (path, calls, events) = start_fake_server("drop");
        let channel = ClientChannel::connect(&path).unwrap();
        let registry = Arc::new(KeyIdRegistry::new());
        let (observer, _delivered) = observer();
        let proxy = MediaKeysProxy::connect(
            channel.clone(),
            "com.widevine.alpha",
            Arc::downgrade(&observer) as _,
            registry.clone(),
        )
        .unwrap();

        drop(proxy);

        // The destroy call reached the server with the right handle.
        {
            let calls = calls.lock().unwrap();
            let destroy = calls
                .iter()
                .find(|frame| frame.method() == Method::DestroyMediaKeys)
                .expect("no destroy call recorded");
            let request: DestroyMediaKeysRequest = destroy.decode_payload().unwrap();
            assert_eq!(request.media_keys_handle, HANDLE);
        }

        // The subscription died first: events pushed after the drop are
        // discarded at the channel and never touch the registry.
        events
            .send(key_statuses_event(HANDLE, 9, vec![(vec![0xdd], WireKeyStatus::Usable)]))
            .unwrap();
        flush_events(&channel);
        assert!(registry.get(9).is_empty());
        assert!(observer.statuses.lock().unwrap().is_empty());

        let _ = std::fs::remove_file(&path);
    }
}
