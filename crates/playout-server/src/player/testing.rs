//! Shared mocks for the task layer tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};

use playout_common::{
    MediaKeyErrorStatus, MediaSourceType, NetworkState, PlaybackState, QosInfo, SubSamplePair,
};

use super::backend::{PlayerBackend, SampleBuffer, StreamCaps, TargetState, VideoGeometry};
use super::client::PlayerEventSink;
use super::inner::{PlayerConfig, PlayerInner};
use super::tasks::PlayerTask;
use crate::cdm::SampleDecryptor;
use crate::error::PlayerError;

#[derive(Default)]
pub(crate) struct MockBackend {
    state: Mutex<Option<TargetState>>,
    state_changes: Mutex<Vec<TargetState>>,
    fail_state_change: AtomicBool,
    seeks: Mutex<Vec<i64>>,
    fail_seek: AtomicBool,
    position: Mutex<Option<i64>>,
    instant_rates: Mutex<Vec<f64>>,
    segment_rates: Mutex<Vec<f64>>,
    audio_sink: Mutex<Option<String>>,
    reject_rectangle: AtomicBool,
    rectangles: Mutex<Vec<VideoGeometry>>,
    configured: Mutex<Vec<String>>,
    attach_calls: AtomicUsize,
    pushed: Mutex<HashMap<MediaSourceType, Vec<SampleBuffer>>>,
    caps_updates: Mutex<HashMap<MediaSourceType, Vec<StreamCaps>>>,
    eos_sources: Mutex<Vec<MediaSourceType>>,
}

impl MockBackend {
    pub fn force_state(&self, state: TargetState) {
        *self.state.lock().unwrap() = Some(state);
    }

    pub fn fail_next_state_change(&self) {
        self.fail_state_change.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_seek(&self) {
        self.fail_seek.store(true, Ordering::SeqCst);
    }

    pub fn set_position(&self, position_ns: i64) {
        *self.position.lock().unwrap() = Some(position_ns);
    }

    pub fn set_audio_sink_name(&self, name: &str) {
        *self.audio_sink.lock().unwrap() = Some(name.to_string());
    }

    pub fn reject_video_rectangle(&self) {
        self.reject_rectangle.store(true, Ordering::SeqCst);
    }

    pub fn accept_video_rectangle(&self) {
        self.reject_rectangle.store(false, Ordering::SeqCst);
    }

    pub fn attach_calls(&self) -> usize {
        self.attach_calls.load(Ordering::SeqCst)
    }

    pub fn state_changes(&self) -> Vec<TargetState> {
        self.state_changes.lock().unwrap().clone()
    }

    pub fn last_seek(&self) -> Option<i64> {
        self.seeks.lock().unwrap().last().copied()
    }

    pub fn instant_rate_changes(&self) -> Vec<f64> {
        self.instant_rates.lock().unwrap().clone()
    }

    pub fn segment_rates(&self) -> Vec<f64> {
        self.segment_rates.lock().unwrap().clone()
    }

    pub fn configured_elements(&self) -> Vec<String> {
        self.configured.lock().unwrap().clone()
    }

    pub fn pushed(&self, source_type: MediaSourceType) -> usize {
        self.pushed.lock().unwrap().get(&source_type).map_or(0, Vec::len)
    }

    pub fn last_pushed_data(&self, source_type: MediaSourceType) -> Option<Vec<u8>> {
        self.pushed
            .lock()
            .unwrap()
            .get(&source_type)
            .and_then(|samples| samples.last())
            .map(|sample| sample.data.clone())
    }

    pub fn caps_updates(&self, source_type: MediaSourceType) -> Vec<StreamCaps> {
        self.caps_updates.lock().unwrap().get(&source_type).cloned().unwrap_or_default()
    }

    pub fn eos_sources(&self) -> Vec<MediaSourceType> {
        self.eos_sources.lock().unwrap().clone()
    }
}

impl PlayerBackend for MockBackend {
    fn change_state(&self, state: TargetState) -> Result<(), PlayerError> {
        if self.fail_state_change.swap(false, Ordering::SeqCst) {
            return Err(PlayerError::StateChange { target: "mock" });
        }
        *self.state.lock().unwrap() = Some(state);
        self.state_changes.lock().unwrap().push(state);
        Ok(())
    }

    fn current_state(&self) -> TargetState {
        self.state.lock().unwrap().unwrap_or(TargetState::Null)
    }

    fn seek_to(&self, position_ns: i64) -> Result<(), PlayerError> {
        if self.fail_seek.swap(false, Ordering::SeqCst) {
            return Err(PlayerError::Seek { position_ns });
        }
        self.seeks.lock().unwrap().push(position_ns);
        Ok(())
    }

    fn query_position_ns(&self) -> Option<i64> {
        *self.position.lock().unwrap()
    }

    fn send_instant_rate_change(&self, rate: f64) -> bool {
        self.instant_rates.lock().unwrap().push(rate);
        true
    }

    fn audio_sink_name(&self) -> Option<String> {
        self.audio_sink.lock().unwrap().clone()
    }

    fn send_audio_sink_segment_rate(&self, rate: f64) -> bool {
        self.segment_rates.lock().unwrap().push(rate);
        true
    }

    fn set_video_rectangle(&self, geometry: VideoGeometry) -> bool {
        if self.reject_rectangle.load(Ordering::SeqCst) {
            return false;
        }
        self.rectangles.lock().unwrap().push(geometry);
        true
    }

    fn render_preroll_frame(&self) -> Result<(), PlayerError> {
        Ok(())
    }

    fn attach_source(
        &self,
        _source_type: MediaSourceType,
        _caps: &StreamCaps,
    ) -> Result<(), PlayerError> {
        self.attach_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remove_source(&self, _source_type: MediaSourceType) {}

    fn set_source_caps(&self, source_type: MediaSourceType, caps: &StreamCaps) {
        self.caps_updates.lock().unwrap().entry(source_type).or_default().push(caps.clone());
    }

    fn push_sample(&self, source_type: MediaSourceType, sample: SampleBuffer) -> Result<(), PlayerError> {
        self.pushed.lock().unwrap().entry(source_type).or_default().push(sample);
        Ok(())
    }

    fn end_of_stream(&self, source_type: MediaSourceType) -> Result<(), PlayerError> {
        self.eos_sources.lock().unwrap().push(source_type);
        Ok(())
    }

    fn configure_element(&self, element_name: &str, geometry: Option<VideoGeometry>) -> bool {
        self.configured.lock().unwrap().push(element_name.to_string());
        if let Some(geometry) = geometry {
            if self.reject_rectangle.load(Ordering::SeqCst) {
                return false;
            }
            self.rectangles.lock().unwrap().push(geometry);
        }
        true
    }
}

#[derive(Default)]
pub(crate) struct MockSink {
    playback_states: Mutex<Vec<PlaybackState>>,
    network_states: Mutex<Vec<NetworkState>>,
    positions: Mutex<Vec<i64>>,
    need_data: Mutex<Vec<MediaSourceType>>,
    reject_need_data: AtomicBool,
    qos: Mutex<Vec<(MediaSourceType, QosInfo)>>,
}

impl MockSink {
    pub fn reject_need_data(&self) {
        self.reject_need_data.store(true, Ordering::SeqCst);
    }

    pub fn playback_states(&self) -> Vec<PlaybackState> {
        self.playback_states.lock().unwrap().clone()
    }

    pub fn last_playback_state(&self) -> Option<PlaybackState> {
        self.playback_states.lock().unwrap().last().copied()
    }

    pub fn network_states(&self) -> Vec<NetworkState> {
        self.network_states.lock().unwrap().clone()
    }

    pub fn positions(&self) -> Vec<i64> {
        self.positions.lock().unwrap().clone()
    }

    pub fn need_data_calls(&self) -> Vec<MediaSourceType> {
        self.need_data.lock().unwrap().clone()
    }

    pub fn qos_calls(&self) -> Vec<(MediaSourceType, QosInfo)> {
        self.qos.lock().unwrap().clone()
    }
}

impl PlayerEventSink for MockSink {
    fn notify_playback_state(&self, state: PlaybackState) {
        self.playback_states.lock().unwrap().push(state);
    }

    fn notify_network_state(&self, state: NetworkState) {
        self.network_states.lock().unwrap().push(state);
    }

    fn notify_position(&self, position_ns: i64) {
        self.positions.lock().unwrap().push(position_ns);
    }

    fn notify_need_media_data(&self, source_type: MediaSourceType) -> bool {
        self.need_data.lock().unwrap().push(source_type);
        !self.reject_need_data.load(Ordering::SeqCst)
    }

    fn notify_qos(&self, source_type: MediaSourceType, info: QosInfo) {
        self.qos.lock().unwrap().push((source_type, info));
    }
}

#[derive(Default)]
pub(crate) struct MockDecryptor {
    calls: AtomicUsize,
    fail_next: AtomicBool,
}

impl MockDecryptor {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

impl SampleDecryptor for MockDecryptor {
    fn decrypt(
        &self,
        _key_session_id: i32,
        payload: &mut [u8],
        _sub_samples: &[SubSamplePair],
        _init_vector: &[u8],
        _key_id: &[u8],
        _init_with_last_15: u32,
    ) -> MediaKeyErrorStatus {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return MediaKeyErrorStatus::Fail;
        }
        for byte in payload.iter_mut() {
            *byte ^= 0xff;
        }
        MediaKeyErrorStatus::Ok
    }
}

/// A worker-less player: tasks are executed synchronously on the test
/// thread against the mocks.
pub(crate) struct TestPlayer {
    pub inner: PlayerInner,
    pub backend: Arc<MockBackend>,
    pub sink: Arc<MockSink>,
    pub decryptor: Arc<MockDecryptor>,
    /// Keeps the timer/signal channel alive for the test's duration.
    pub task_rx: Receiver<PlayerTask>,
}

impl TestPlayer {
    pub fn new() -> Self {
        let backend = Arc::new(MockBackend::default());
        let sink = Arc::new(MockSink::default());
        let decryptor = Arc::new(MockDecryptor::default());
        let (tx, task_rx) = mpsc::channel();
        let inner = PlayerInner::new(
            backend.clone(),
            sink.clone(),
            decryptor.clone(),
            PlayerConfig::default(),
            tx,
        );
        Self { inner, backend, sink, decryptor, task_rx }
    }
}
