//! Per-session playback orchestration
//!
//! [`PlaybackSession`] is owned by the playback service task; its
//! [`SessionEventProxy`] is shared with the session's worker thread and
//! turns player callbacks into wire events for the owning client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use playout_common::{
    frame, MediaSegment, MediaSource, MediaSourceStatus, MediaSourceType, MediaType, NetworkState,
    PlaybackState, QosInfo, SessionId, VideoRequirements,
};
use playout_protocol::messages::{
    NeedMediaDataEvent, NetworkStateChangeEvent, PlaybackStateChangeEvent, PositionChangeEvent,
    QosEvent, QosInfoMsg, ShmInfoMsg, WireNetworkState, WirePlaybackState,
};
use playout_protocol::{Frame, Method};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::cdm::SampleDecryptor;
use crate::error::{PlaybackError, PlayerError};
use crate::player::backend::VideoGeometry;
use crate::player::client::PlayerEventSink;
use crate::player::inner::PlayerConfig;
use crate::player::{Player, PlayerFactory};
use crate::shm::SharedMemoryBuffer;

/// Frames requested from the client per need-data demand.
pub const AUDIO_FRAMES_PER_REQUEST: u32 = 24;
pub const VIDEO_FRAMES_PER_REQUEST: u32 = 12;

/// Bytes reserved at the head of each sub-region for frame metadata
/// records; payloads start right after.
pub const MAX_METADATA_BYTES: u32 = 2560;

/// Frames the server pushes toward one client connection.
pub type EventSender = UnboundedSender<Frame>;

struct OutstandingRequest {
    source_type: MediaSourceType,
}

/// Shared between the service task and the session's worker thread.
pub struct SessionEventProxy {
    session_id: SessionId,
    events: EventSender,
    shm: Arc<SharedMemoryBuffer>,
    next_request_id: AtomicU32,
    /// Source id → stream type for this session.
    sources: Mutex<HashMap<i32, MediaSourceType>>,
    /// Need-data requests sent to the client and not yet answered.
    outstanding: Mutex<HashMap<u32, OutstandingRequest>>,
}

impl SessionEventProxy {
    fn new(session_id: SessionId, events: EventSender, shm: Arc<SharedMemoryBuffer>) -> Self {
        Self {
            session_id,
            events,
            shm,
            next_request_id: AtomicU32::new(1),
            sources: Mutex::new(HashMap::new()),
            outstanding: Mutex::new(HashMap::new()),
        }
    }

    fn send_event(&self, method: Method, payload: &impl prost::Message) {
        if self.events.send(Frame::event(method, payload)).is_err() {
            warn!("Dropping {:?} event for disconnected client", method);
        }
    }

    fn register_source(&self, source_id: i32, source_type: MediaSourceType) {
        self.sources.lock().unwrap().insert(source_id, source_type);
    }

    fn unregister_source(&self, source_id: i32) -> Option<MediaSourceType> {
        self.sources.lock().unwrap().remove(&source_id)
    }

    fn source_id_for(&self, source_type: MediaSourceType) -> Option<i32> {
        self.sources
            .lock()
            .unwrap()
            .iter()
            .find(|(_, kind)| **kind == source_type)
            .map(|(id, _)| *id)
    }

    fn source_type_for(&self, source_id: i32) -> Option<MediaSourceType> {
        self.sources.lock().unwrap().get(&source_id).copied()
    }

    fn take_outstanding(&self, request_id: u32) -> Option<MediaSourceType> {
        self.outstanding.lock().unwrap().remove(&request_id).map(|request| request.source_type)
    }

    /// Invalidates every outstanding request; stale answers are then
    /// discarded with a log instead of feeding the pipeline.
    fn clear_outstanding(&self) {
        self.outstanding.lock().unwrap().clear();
    }
}

impl PlayerEventSink for SessionEventProxy {
    fn notify_playback_state(&self, state: PlaybackState) {
        self.send_event(
            Method::PlaybackStateChangeEvent,
            &PlaybackStateChangeEvent {
                session_id: self.session_id.0,
                state: WirePlaybackState::from(state) as i32,
            },
        );
    }

    fn notify_network_state(&self, state: NetworkState) {
        self.send_event(
            Method::NetworkStateChangeEvent,
            &NetworkStateChangeEvent {
                session_id: self.session_id.0,
                state: WireNetworkState::from(state) as i32,
            },
        );
    }

    fn notify_position(&self, position_ns: i64) {
        self.send_event(
            Method::PositionChangeEvent,
            &PositionChangeEvent { session_id: self.session_id.0, position_ns },
        );
    }

    fn notify_need_media_data(&self, source_type: MediaSourceType) -> bool {
        let Some(source_id) = self.source_id_for(source_type) else {
            warn!("Need-data for {} without an attached source", source_type);
            return false;
        };
        let (Ok(region_offset), Ok(region_len)) = (
            self.shm.data_offset(self.session_id, source_type),
            self.shm.max_data_len(self.session_id, source_type),
        ) else {
            warn!("Need-data for session {} without a mapped partition", self.session_id);
            return false;
        };
        if region_len <= MAX_METADATA_BYTES {
            warn!("Partition of session {} too small for metadata", self.session_id);
            return false;
        }

        let frame_count = match source_type {
            MediaSourceType::Audio => AUDIO_FRAMES_PER_REQUEST,
            _ => VIDEO_FRAMES_PER_REQUEST,
        };
        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        self.outstanding
            .lock()
            .unwrap()
            .insert(request_id, OutstandingRequest { source_type });

        self.send_event(
            Method::NeedMediaDataEvent,
            &NeedMediaDataEvent {
                session_id: self.session_id.0,
                source_id,
                frame_count,
                request_id,
                shm_info: Some(ShmInfoMsg {
                    max_metadata_bytes: MAX_METADATA_BYTES,
                    metadata_offset: region_offset,
                    media_data_offset: region_offset + MAX_METADATA_BYTES,
                    max_media_bytes: region_len - MAX_METADATA_BYTES,
                }),
            },
        );
        true
    }

    fn notify_qos(&self, source_type: MediaSourceType, info: QosInfo) {
        let Some(source_id) = self.source_id_for(source_type) else {
            return;
        };
        self.send_event(
            Method::QosEvent,
            &QosEvent {
                session_id: self.session_id.0,
                source_id,
                qos_info: Some(QosInfoMsg { processed: info.processed, dropped: info.dropped }),
            },
        );
    }
}

/// Reads the frames a client wrote into its partition back out as
/// segments for the pipeline.
fn read_segments(
    shm: &SharedMemoryBuffer,
    session_id: SessionId,
    source_type: MediaSourceType,
    num_frames: u32,
) -> Result<Vec<MediaSegment>, PlaybackError> {
    let metadata_offset = shm.data_offset(session_id, source_type).map_err(|err| {
        PlaybackError::Rejected { reason: format!("partition lookup failed: {err}") }
    })?;
    let metadata = shm.copy_out(session_id, metadata_offset, MAX_METADATA_BYTES).map_err(|err| {
        PlaybackError::Rejected { reason: format!("metadata read failed: {err}") }
    })?;
    let records = frame::read_records(&metadata, num_frames).map_err(|err| {
        PlaybackError::Rejected { reason: format!("malformed frame metadata: {err}") }
    })?;

    let mut segments = Vec::with_capacity(records.len());
    for record in records {
        if record.source_type != source_type {
            return Err(PlaybackError::Rejected {
                reason: format!("{} frame in {} request", record.source_type, source_type),
            });
        }
        let payload = shm.copy_out(session_id, record.data_offset, record.data_len).map_err(
            |err| PlaybackError::Rejected { reason: format!("payload read failed: {err}") },
        )?;
        segments.push(MediaSegment {
            source_type: record.source_type,
            timestamp_ns: record.timestamp_ns,
            duration_ns: record.duration_ns,
            sample_rate: record.sample_rate,
            channels: record.channels,
            width: record.width,
            height: record.height,
            encrypted: record.encrypted,
            media_key_session_id: record.media_key_session_id,
            key_id: record.key_id,
            init_vector: record.init_vector,
            sub_samples: record.sub_samples,
            init_with_last_15: record.init_with_last_15,
            data: payload.into(),
        });
    }
    Ok(segments)
}

/// One hosted playback session.
pub struct PlaybackSession {
    session_id: SessionId,
    client_id: u64,
    video_requirements: VideoRequirements,
    proxy: Arc<SessionEventProxy>,
    shm: Arc<SharedMemoryBuffer>,
    player: Option<Box<dyn Player>>,
    next_source_id: i32,
}

impl PlaybackSession {
    pub fn new(
        session_id: SessionId,
        client_id: u64,
        video_requirements: VideoRequirements,
        events: EventSender,
        shm: Arc<SharedMemoryBuffer>,
    ) -> Self {
        let proxy = Arc::new(SessionEventProxy::new(session_id, events, shm.clone()));
        Self {
            session_id,
            client_id,
            video_requirements,
            proxy,
            shm,
            player: None,
            next_source_id: 0,
        }
    }

    pub fn client_id(&self) -> u64 {
        self.client_id
    }

    /// Creates the pipeline for this session and reports buffering.
    pub fn load(
        &mut self,
        factory: &dyn PlayerFactory,
        decryptor: Arc<dyn SampleDecryptor>,
        media_type: MediaType,
        mime_type: &str,
        url: &str,
        player_config: PlayerConfig,
    ) -> Result<(), PlaybackError> {
        if self.player.is_some() {
            debug!("Session {} already loaded", self.session_id);
            return Ok(());
        }
        info!("Loading session {}: {:?} '{}' from '{}'", self.session_id, media_type, mime_type, url);
        let player = factory
            .create_player(
                self.session_id.0,
                self.proxy.clone(),
                decryptor,
                media_type,
                self.video_requirements,
                player_config,
            )
            .map_err(|err| {
                warn!("Pipeline construction for session {} failed: {}", self.session_id, err);
                PlaybackError::Rejected { reason: err.to_string() }
            })?;
        self.player = Some(player);
        self.proxy.notify_network_state(NetworkState::Buffering);
        Ok(())
    }

    fn player(&self) -> Result<&dyn Player, PlaybackError> {
        self.player
            .as_deref()
            .ok_or(PlaybackError::NotLoaded { session_id: self.session_id.0 })
    }

    fn run(&self, op: Result<(), PlayerError>) -> Result<(), PlaybackError> {
        op.map_err(|err| PlaybackError::Rejected { reason: err.to_string() })
    }

    pub fn attach_source(&mut self, mut source: MediaSource) -> Result<i32, PlaybackError> {
        let player = self.player()?;
        let source_id = self.next_source_id;
        source.id = source_id;
        let source_type = source.source_type;
        player
            .attach_source(source)
            .map_err(|err| PlaybackError::Rejected { reason: err.to_string() })?;
        self.next_source_id += 1;
        self.proxy.register_source(source_id, source_type);
        Ok(source_id)
    }

    pub fn remove_source(&mut self, source_id: i32) -> Result<(), PlaybackError> {
        let source_type = self.proxy.unregister_source(source_id).ok_or(PlaybackError::NoSource {
            session_id: self.session_id.0,
            source_id,
        })?;
        self.run(self.player()?.remove_source(source_type))
    }

    pub fn play(&self) -> Result<(), PlaybackError> {
        self.run(self.player()?.play())
    }

    pub fn pause(&self) -> Result<(), PlaybackError> {
        self.run(self.player()?.pause())
    }

    pub fn stop(&self) -> Result<(), PlaybackError> {
        self.proxy.clear_outstanding();
        self.run(self.player()?.stop())
    }

    /// Seeks. Outstanding need-data requests die with the old position.
    pub fn set_position(&self, position_ns: i64) -> Result<(), PlaybackError> {
        self.proxy.clear_outstanding();
        self.run(self.player()?.set_position(position_ns))
    }

    pub fn get_position(&self) -> Result<i64, PlaybackError> {
        self.player()?.get_position().ok_or(PlaybackError::Rejected {
            reason: "position not available".to_string(),
        })
    }

    pub fn set_playback_rate(&self, rate: f64) -> Result<(), PlaybackError> {
        self.run(self.player()?.set_playback_rate(rate))
    }

    pub fn set_video_window(&self, geometry: VideoGeometry) -> Result<(), PlaybackError> {
        self.run(self.player()?.set_video_geometry(geometry))
    }

    pub fn render_frame(&self) -> Result<(), PlaybackError> {
        self.run(self.player()?.render_frame())
    }

    /// Answers a need-data request: reads the written frames out of the
    /// partition and hands them to the pipeline. A stale request id is
    /// discarded with a log, never an error to the client.
    pub fn have_data(
        &self,
        status: MediaSourceStatus,
        num_frames: u32,
        request_id: u32,
    ) -> Result<(), PlaybackError> {
        let Some(source_type) = self.proxy.take_outstanding(request_id) else {
            info!(
                "Discarding have-data for unknown request {} on session {}",
                request_id, self.session_id
            );
            return Ok(());
        };
        let player = self.player()?;

        match status {
            MediaSourceStatus::Ok | MediaSourceStatus::Eos => {
                if num_frames > 0 {
                    let segments =
                        read_segments(&self.shm, self.session_id, source_type, num_frames)?;
                    self.run(player.attach_samples(segments))?;
                }
                if status == MediaSourceStatus::Eos {
                    self.run(player.set_eos(source_type))?;
                }
                Ok(())
            }
            MediaSourceStatus::NoAvailableSamples => Ok(()),
            MediaSourceStatus::CodecChanged => {
                debug!("Codec change reported on session {}", self.session_id);
                Ok(())
            }
            MediaSourceStatus::Error => {
                warn!("Client reported data error on session {}", self.session_id);
                Ok(())
            }
        }
    }
}
