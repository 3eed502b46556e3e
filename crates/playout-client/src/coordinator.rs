//! Pipeline coordinator: the client-side playback state machine
//!
//! Tracks the session's state from inbound playback / network events,
//! gates the data-path calls (`add_segment`, `have_data`, `set_position`)
//! on it, and owns the need-data request table that decides whether an
//! answer is still live.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use playout_common::{
    AddSegmentStatus, MediaSegment, MediaSource, MediaSourceStatus, MediaSourceType, MediaType,
    NetworkState, PlaybackState, QosInfo, ShmInfo, VideoRequirements,
};
use tracing::{debug, error, info, warn};

use crate::error::{ClientError, Result};
use crate::frame_writer::FrameWriter;
use crate::key_registry::KeyIdRegistry;
use crate::rpc::{ClientChannel, PipelineRpcProxy};
use crate::shm::SharedMemoryClient;

/// Blocking control surface the coordinator drives; implemented by the
/// RPC proxy and by mocks in tests.
pub trait PipelineIpc: Send + Sync {
    fn load(&self, media_type: MediaType, mime_type: &str, url: &str) -> Result<()>;
    fn attach_source(&self, source: &MediaSource) -> Result<i32>;
    fn remove_source(&self, source_id: i32) -> Result<()>;
    fn play(&self) -> Result<()>;
    fn pause(&self) -> Result<()>;
    fn stop(&self) -> Result<()>;
    fn set_position(&self, position_ns: i64) -> Result<()>;
    fn get_position(&self) -> Result<i64>;
    fn set_playback_rate(&self, rate: f64) -> Result<()>;
    fn set_video_window(&self, x: u32, y: u32, width: u32, height: u32) -> Result<()>;
    fn have_data(&self, status: MediaSourceStatus, num_frames: u32, request_id: u32) -> Result<()>;
    fn render_frame(&self) -> Result<()>;
}

/// Callbacks delivered to the embedding application, in server emission
/// order.
pub trait PipelineEventObserver: Send + Sync {
    fn on_playback_state(&self, state: PlaybackState);
    fn on_network_state(&self, state: NetworkState);
    fn on_position(&self, position_ns: i64);
    /// More samples are wanted; answer with `add_segment` calls followed
    /// by `have_data` for this request id.
    fn on_need_media_data(&self, source_id: i32, frame_count: u32, request_id: u32);
    fn on_qos(&self, source_id: i32, info: QosInfo);
}

/// Coordinator-level pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Buffering,
    Playing,
    Seeking,
    EndOfStream,
    Failure,
}

impl PipelineState {
    fn name(self) -> &'static str {
        match self {
            PipelineState::Idle => "IDLE",
            PipelineState::Buffering => "BUFFERING",
            PipelineState::Playing => "PLAYING",
            PipelineState::Seeking => "SEEKING",
            PipelineState::EndOfStream => "END_OF_STREAM",
            PipelineState::Failure => "FAILURE",
        }
    }
}

struct NeedDataRequest {
    shm_info: ShmInfo,
    writer: Option<FrameWriter>,
}

/// State shared between the public coordinator and the event pump.
pub(crate) struct CoordinatorCore {
    state: Mutex<PipelineState>,
    requests: Mutex<HashMap<u32, NeedDataRequest>>,
    shm: Arc<SharedMemoryClient>,
    registry: Arc<KeyIdRegistry>,
    observer: Weak<dyn PipelineEventObserver>,
}

impl CoordinatorCore {
    fn new(
        observer: Weak<dyn PipelineEventObserver>,
        shm: Arc<SharedMemoryClient>,
        registry: Arc<KeyIdRegistry>,
    ) -> Self {
        Self {
            state: Mutex::new(PipelineState::Idle),
            requests: Mutex::new(HashMap::new()),
            shm,
            registry,
            observer,
        }
    }

    fn state(&self) -> PipelineState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, new_state: PipelineState) {
        let mut state = self.state.lock().unwrap();
        if *state != new_state {
            debug!("Pipeline state {} -> {}", state.name(), new_state.name());
            *state = new_state;
        }
    }

    /// Inbound playback state: advances the state machine, then forwards.
    pub(crate) fn handle_playback_state(&self, state: PlaybackState) {
        match state {
            PlaybackState::Playing | PlaybackState::Paused => self.set_state(PipelineState::Playing),
            PlaybackState::Seeking => self.set_state(PipelineState::Seeking),
            PlaybackState::Stopped => self.set_state(PipelineState::Idle),
            PlaybackState::Flushed => self.set_state(PipelineState::Buffering),
            PlaybackState::EndOfStream => self.set_state(PipelineState::EndOfStream),
            PlaybackState::Failure => self.set_state(PipelineState::Failure),
            PlaybackState::Idle | PlaybackState::Unknown => {}
        }
        if let Some(observer) = self.observer.upgrade() {
            observer.on_playback_state(state);
        }
    }

    pub(crate) fn handle_network_state(&self, state: NetworkState) {
        match state {
            NetworkState::Buffering | NetworkState::BufferingProgress | NetworkState::Stalled => {
                self.set_state(PipelineState::Buffering)
            }
            NetworkState::FormatError | NetworkState::NetworkError | NetworkState::DecodeError => {
                self.set_state(PipelineState::Failure)
            }
            NetworkState::Idle | NetworkState::Buffered | NetworkState::Unknown => {}
        }
        if let Some(observer) = self.observer.upgrade() {
            observer.on_network_state(state);
        }
    }

    pub(crate) fn handle_position(&self, position_ns: i64) {
        if let Some(observer) = self.observer.upgrade() {
            observer.on_position(position_ns);
        }
    }

    /// Inbound need-data: recorded and forwarded only while data can
    /// actually flow; dropped while seeking or inactive.
    pub(crate) fn handle_need_media_data(
        &self,
        source_id: i32,
        frame_count: u32,
        request_id: u32,
        shm_info: Option<ShmInfo>,
    ) {
        match self.state() {
            PipelineState::Buffering | PipelineState::Playing => {
                let Some(shm_info) = shm_info else {
                    warn!("Need-data {} without a shared memory window", request_id);
                    return;
                };
                self.requests
                    .lock()
                    .unwrap()
                    .insert(request_id, NeedDataRequest { shm_info, writer: None });
                if let Some(observer) = self.observer.upgrade() {
                    observer.on_need_media_data(source_id, frame_count, request_id);
                }
            }
            PipelineState::Seeking => {
                info!("Need-data {} received while seeking, ignoring", request_id);
            }
            other => {
                warn!("Need-data {} received in state {}, ignoring", request_id, other.name());
            }
        }
    }

    pub(crate) fn handle_qos(&self, source_id: i32, info: QosInfo) {
        if let Some(observer) = self.observer.upgrade() {
            observer.on_qos(source_id, info);
        }
    }

    fn discard_request(&self, request_id: u32) {
        if self.requests.lock().unwrap().remove(&request_id).is_some() {
            info!("Discarded need-data request {}", request_id);
        }
    }
}

/// Public control surface of one hosted pipeline.
pub struct PipelineCoordinator {
    core: Arc<CoordinatorCore>,
    ipc: Arc<dyn PipelineIpc>,
}

impl PipelineCoordinator {
    /// Creates a playback session on the daemon and wires the event pump.
    pub fn connect(
        channel: &Arc<ClientChannel>,
        video_requirements: VideoRequirements,
        observer: Weak<dyn PipelineEventObserver>,
        shm: Arc<SharedMemoryClient>,
        registry: Arc<KeyIdRegistry>,
    ) -> Result<Self> {
        let core = Arc::new(CoordinatorCore::new(observer, shm, registry));
        let proxy =
            PipelineRpcProxy::connect(channel.clone(), video_requirements, Arc::downgrade(&core))?;
        Ok(Self { core, ipc: Arc::new(proxy) })
    }

    /// Builds a coordinator over an existing control surface.
    pub(crate) fn with_ipc(
        ipc: Arc<dyn PipelineIpc>,
        observer: Weak<dyn PipelineEventObserver>,
        shm: Arc<SharedMemoryClient>,
        registry: Arc<KeyIdRegistry>,
    ) -> Self {
        Self { core: Arc::new(CoordinatorCore::new(observer, shm, registry)), ipc }
    }

    pub(crate) fn core(&self) -> &Arc<CoordinatorCore> {
        &self.core
    }

    pub fn load(&self, media_type: MediaType, mime_type: &str, url: &str) -> Result<()> {
        self.ipc.load(media_type, mime_type, url)
    }

    /// Attaches a source; on success the server-assigned id is stored on
    /// the descriptor.
    pub fn attach_source(&self, source: &mut MediaSource) -> Result<()> {
        let source_id = self.ipc.attach_source(source)?;
        source.id = source_id;
        Ok(())
    }

    pub fn remove_source(&self, source_id: i32) -> Result<()> {
        self.ipc.remove_source(source_id)
    }

    pub fn play(&self) -> Result<()> {
        self.ipc.play()
    }

    pub fn pause(&self) -> Result<()> {
        self.ipc.pause()
    }

    pub fn stop(&self) -> Result<()> {
        self.core.set_state(PipelineState::Idle);
        self.ipc.stop()
    }

    pub fn set_playback_rate(&self, rate: f64) -> Result<()> {
        self.ipc.set_playback_rate(rate)
    }

    /// Seeks. Every outstanding need-data request is invalidated before
    /// the call goes out.
    pub fn set_position(&self, position_ns: i64) -> Result<()> {
        match self.core.state() {
            PipelineState::Playing
            | PipelineState::Buffering
            | PipelineState::Seeking
            | PipelineState::EndOfStream => {
                self.core.requests.lock().unwrap().clear();
                self.ipc.set_position(position_ns)
            }
            other => {
                warn!("set_position rejected in state {}", other.name());
                Err(ClientError::InvalidState { state: other.name() })
            }
        }
    }

    pub fn get_position(&self) -> Result<i64> {
        self.ipc.get_position()
    }

    pub fn set_video_window(&self, x: u32, y: u32, width: u32, height: u32) -> Result<()> {
        self.ipc.set_video_window(x, y, width, height)
    }

    pub fn render_frame(&self) -> Result<()> {
        self.ipc.render_frame()
    }

    /// Writes one segment into the window of a live need-data request.
    pub fn add_segment(&self, request_id: u32, segment: &mut MediaSegment) -> AddSegmentStatus {
        if segment.data.is_empty() {
            return AddSegmentStatus::Error;
        }

        let mut requests = self.core.requests.lock().unwrap();
        let Some(request) = requests.get_mut(&request_id) else {
            error!("No need-data request with id {}", request_id);
            return AddSegmentStatus::Error;
        };
        if self.core.shm.is_empty() {
            error!("Shared buffer no longer valid");
            return AddSegmentStatus::Error;
        }

        if segment.encrypted {
            let key_id = self.core.registry.get(segment.media_key_session_id);
            if !key_id.is_empty() {
                debug!("Stamping key id onto segment from key session {}", segment.media_key_session_id);
                segment.key_id = key_id;
            }
        }

        if request.writer.is_none() {
            if segment.source_type == MediaSourceType::Unknown {
                error!("Segment with unknown source type");
                return AddSegmentStatus::Error;
            }
            request.writer = Some(FrameWriter::new(
                self.core.shm.base(),
                self.core.shm.len(),
                request.shm_info,
            ));
        }
        // The writer exists by now; the branch above just built it.
        request.writer.as_mut().unwrap().write_frame(segment)
    }

    /// Answers a need-data request. While seeking the request is silently
    /// retired; in inactive states the answer is an error and nothing is
    /// transmitted.
    pub fn have_data(&self, status: MediaSourceStatus, request_id: u32) -> Result<()> {
        match self.core.state() {
            PipelineState::Buffering | PipelineState::Playing => {
                let request = self.core.requests.lock().unwrap().remove(&request_id);
                let Some(request) = request else {
                    error!("No need-data request with id {}", request_id);
                    return Err(ClientError::CallFailed(format!(
                        "unknown need-data request {request_id}"
                    )));
                };
                let num_frames = request.writer.as_ref().map_or(0, FrameWriter::num_frames);
                self.ipc.have_data(status, num_frames, request_id)
            }
            PipelineState::Seeking => {
                info!("have_data while seeking, discarding request {}", request_id);
                self.core.discard_request(request_id);
                Ok(())
            }
            other => {
                warn!("have_data in state {}, discarding request {}", other.name(), request_id);
                self.core.discard_request(request_id);
                Err(ClientError::InvalidState { state: other.name() })
            }
        }
    }

    /// The shared buffer is going away; every live request dies with it.
    pub fn notify_buffer_term(&self) {
        self.core.requests.lock().unwrap().clear();
    }

    /// Current coordinator state.
    pub fn state(&self) -> PipelineState {
        self.core.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use playout_common::frame;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct MockIpc {
        calls: StdMutex<Vec<String>>,
        have_data: StdMutex<Vec<(MediaSourceStatus, u32, u32)>>,
    }

    impl MockIpc {
        fn record(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_string());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl PipelineIpc for MockIpc {
        fn load(&self, _media_type: MediaType, _mime_type: &str, _url: &str) -> Result<()> {
            self.record("load");
            Ok(())
        }

        fn attach_source(&self, _source: &MediaSource) -> Result<i32> {
            self.record("attach_source");
            Ok(1)
        }

        fn remove_source(&self, _source_id: i32) -> Result<()> {
            self.record("remove_source");
            Ok(())
        }

        fn play(&self) -> Result<()> {
            self.record("play");
            Ok(())
        }

        fn pause(&self) -> Result<()> {
            self.record("pause");
            Ok(())
        }

        fn stop(&self) -> Result<()> {
            self.record("stop");
            Ok(())
        }

        fn set_position(&self, _position_ns: i64) -> Result<()> {
            self.record("set_position");
            Ok(())
        }

        fn get_position(&self) -> Result<i64> {
            Ok(0)
        }

        fn set_playback_rate(&self, _rate: f64) -> Result<()> {
            self.record("set_playback_rate");
            Ok(())
        }

        fn set_video_window(&self, _x: u32, _y: u32, _w: u32, _h: u32) -> Result<()> {
            self.record("set_video_window");
            Ok(())
        }

        fn have_data(
            &self,
            status: MediaSourceStatus,
            num_frames: u32,
            request_id: u32,
        ) -> Result<()> {
            self.record("have_data");
            self.have_data.lock().unwrap().push((status, num_frames, request_id));
            Ok(())
        }

        fn render_frame(&self) -> Result<()> {
            self.record("render_frame");
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        need_data: StdMutex<Vec<(i32, u32, u32)>>,
        playback_states: StdMutex<Vec<PlaybackState>>,
    }

    impl PipelineEventObserver for Arc<RecordingObserver> {
        fn on_playback_state(&self, state: PlaybackState) {
            self.playback_states.lock().unwrap().push(state);
        }

        fn on_network_state(&self, _state: NetworkState) {}

        fn on_position(&self, _position_ns: i64) {}

        fn on_need_media_data(&self, source_id: i32, frame_count: u32, request_id: u32) {
            self.need_data.lock().unwrap().push((source_id, frame_count, request_id));
        }

        fn on_qos(&self, _source_id: i32, _info: QosInfo) {}
    }

    struct Fixture {
        coordinator: PipelineCoordinator,
        ipc: Arc<MockIpc>,
        observer: Arc<Arc<RecordingObserver>>,
    }

    fn fixture() -> Fixture {
        let ipc = Arc::new(MockIpc::default());
        let observer = Arc::new(Arc::new(RecordingObserver::default()));
        let shm = Arc::new(SharedMemoryClient::for_tests(256 * 1024));
        let registry = Arc::new(KeyIdRegistry::new());
        let coordinator = PipelineCoordinator::with_ipc(
            ipc.clone(),
            Arc::downgrade(&observer) as Weak<dyn PipelineEventObserver>,
            shm,
            registry,
        );
        Fixture { coordinator, ipc, observer }
    }

    fn shm_info() -> ShmInfo {
        ShmInfo {
            max_metadata_bytes: 256,
            metadata_offset: 0,
            media_data_offset: 256,
            max_media_bytes: 65280,
        }
    }

    fn buffering(fixture: &Fixture) {
        fixture.coordinator.core().handle_network_state(NetworkState::Buffering);
    }

    fn audio_segment(payload: &'static [u8]) -> MediaSegment {
        MediaSegment::new_audio(0, 21_333_000, 48_000, 2, Bytes::from_static(payload))
    }

    #[test]
    fn load_sequence_reaches_playing() {
        let fixture = fixture();
        let core = fixture.coordinator.core();

        fixture.coordinator.load(MediaType::Mse, "video/mp4", "mse://x").unwrap();
        core.handle_network_state(NetworkState::Buffering);
        assert_eq!(fixture.coordinator.state(), PipelineState::Buffering);

        core.handle_playback_state(PlaybackState::Paused);
        assert_eq!(fixture.coordinator.state(), PipelineState::Playing);

        fixture.coordinator.play().unwrap();
        core.handle_playback_state(PlaybackState::Playing);
        assert_eq!(fixture.coordinator.state(), PipelineState::Playing);
        assert_eq!(
            *fixture.observer.playback_states.lock().unwrap(),
            vec![PlaybackState::Paused, PlaybackState::Playing]
        );
    }

    #[test]
    fn need_data_answered_with_written_frames() {
        let fixture = fixture();
        buffering(&fixture);
        let core = fixture.coordinator.core();

        core.handle_need_media_data(1, 24, 7, Some(shm_info()));
        assert_eq!(*fixture.observer.need_data.lock().unwrap(), vec![(1, 24, 7)]);

        for payload in [b"one" as &[u8], b"two", b"tri"] {
            let mut segment =
                MediaSegment::new_audio(0, 21_333_000, 48_000, 2, Bytes::copy_from_slice(payload));
            assert_eq!(fixture.coordinator.add_segment(7, &mut segment), AddSegmentStatus::Ok);
        }

        fixture.coordinator.have_data(MediaSourceStatus::Ok, 7).unwrap();
        assert_eq!(
            *fixture.ipc.have_data.lock().unwrap(),
            vec![(MediaSourceStatus::Ok, 3, 7)]
        );
        // Request 7 is gone from the table.
        assert!(core.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn need_data_while_seeking_is_ignored() {
        let fixture = fixture();
        let core = fixture.coordinator.core();
        core.handle_playback_state(PlaybackState::Seeking);

        core.handle_need_media_data(1, 24, 8, Some(shm_info()));
        assert!(core.requests.lock().unwrap().is_empty());
        assert!(fixture.observer.need_data.lock().unwrap().is_empty());

        // Answering the ignored request succeeds without any RPC.
        fixture.coordinator.have_data(MediaSourceStatus::Ok, 8).unwrap();
        assert!(fixture.ipc.have_data.lock().unwrap().is_empty());
    }

    #[test]
    fn have_data_in_idle_is_an_error_and_sends_nothing() {
        let fixture = fixture();
        assert!(fixture.coordinator.have_data(MediaSourceStatus::Ok, 3).is_err());
        assert!(fixture.ipc.calls().is_empty());
    }

    #[test]
    fn set_position_clears_the_request_table() {
        let fixture = fixture();
        buffering(&fixture);
        let core = fixture.coordinator.core();
        core.handle_need_media_data(1, 24, 5, Some(shm_info()));
        core.handle_need_media_data(2, 12, 6, Some(shm_info()));

        fixture.coordinator.set_position(5_000_000_000).unwrap();
        assert!(core.requests.lock().unwrap().is_empty());
        assert_eq!(fixture.ipc.calls(), vec!["set_position"]);
    }

    #[test]
    fn set_position_rejected_when_idle() {
        let fixture = fixture();
        assert!(matches!(
            fixture.coordinator.set_position(0),
            Err(ClientError::InvalidState { .. })
        ));
        assert!(fixture.ipc.calls().is_empty());
    }

    #[test]
    fn encrypted_segments_get_the_registered_key_id() {
        let fixture = fixture();
        buffering(&fixture);
        let core = fixture.coordinator.core();
        core.handle_need_media_data(1, 24, 9, Some(shm_info()));

        fixture.coordinator.core().registry.put(42, vec![0xaa, 0xbb]);
        let mut segment = audio_segment(b"enc");
        segment.encrypted = true;
        segment.media_key_session_id = 42;
        assert_eq!(fixture.coordinator.add_segment(9, &mut segment), AddSegmentStatus::Ok);
        assert_eq!(segment.key_id, vec![0xaa, 0xbb]);

        // The stamped key id landed in the shared-memory record too.
        let shm = &fixture.coordinator.core().shm;
        let metadata = unsafe {
            std::slice::from_raw_parts(shm.base().as_ptr(), 256)
        };
        let records = frame::read_records(metadata, 1).unwrap();
        assert_eq!(records[0].key_id, vec![0xaa, 0xbb]);
    }

    #[test]
    fn add_segment_without_a_request_fails() {
        let fixture = fixture();
        buffering(&fixture);
        let mut segment = audio_segment(b"x");
        assert_eq!(fixture.coordinator.add_segment(3, &mut segment), AddSegmentStatus::Error);
    }

    #[test]
    fn add_segment_rejects_empty_and_unknown_segments() {
        let fixture = fixture();
        buffering(&fixture);
        let core = fixture.coordinator.core();
        core.handle_need_media_data(1, 24, 4, Some(shm_info()));

        let mut empty = audio_segment(b"");
        assert_eq!(fixture.coordinator.add_segment(4, &mut empty), AddSegmentStatus::Error);

        let mut unknown = audio_segment(b"x");
        unknown.source_type = MediaSourceType::Unknown;
        assert_eq!(fixture.coordinator.add_segment(4, &mut unknown), AddSegmentStatus::Error);
    }

    #[test]
    fn buffer_term_clears_the_request_table() {
        let fixture = fixture();
        buffering(&fixture);
        let core = fixture.coordinator.core();
        core.handle_need_media_data(1, 24, 5, Some(shm_info()));
        fixture.coordinator.notify_buffer_term();
        assert!(core.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn stop_returns_the_pipeline_to_idle() {
        let fixture = fixture();
        buffering(&fixture);
        fixture.coordinator.stop().unwrap();
        assert_eq!(fixture.coordinator.state(), PipelineState::Idle);
    }

    #[test]
    fn failure_states_gate_the_data_path() {
        let fixture = fixture();
        let core = fixture.coordinator.core();
        core.handle_network_state(NetworkState::DecodeError);
        assert_eq!(fixture.coordinator.state(), PipelineState::Failure);

        core.handle_need_media_data(1, 24, 2, Some(shm_info()));
        assert!(core.requests.lock().unwrap().is_empty());
        assert!(fixture.coordinator.have_data(MediaSourceStatus::Ok, 2).is_err());
        assert!(fixture.ipc.have_data.lock().unwrap().is_empty());
    }
}
