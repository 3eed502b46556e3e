//! Pipeline capability traits
//!
//! The task layer drives the pipeline exclusively through these seams so
//! it can be exercised against mocks; only the GStreamer backend module
//! touches the C API.

use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

use playout_common::{MediaSourceType, MediaType, QosInfo, SegmentAlignment, StreamFormat, VideoRequirements};
use tracing::warn;

use super::tasks::PlayerTask;
use crate::error::PlayerError;

/// Pipeline states the task layer can request. Ordering follows the
/// pipeline's progression, so `state < Playing` reads naturally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TargetState {
    Null,
    Ready,
    Paused,
    Playing,
}

impl std::fmt::Display for TargetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TargetState::Null => "NULL",
            TargetState::Ready => "READY",
            TargetState::Paused => "PAUSED",
            TargetState::Playing => "PLAYING",
        };
        write!(f, "{name}")
    }
}

/// On-screen rectangle for the video sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoGeometry {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Caps of one attached elementary stream, in pipeline-neutral terms.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamCaps {
    pub mime_type: String,
    /// Raw caps string; wins over the structured fields when present.
    pub raw_caps: Option<String>,
    pub alignment: SegmentAlignment,
    pub stream_format: StreamFormat,
    pub codec_data: Option<Vec<u8>>,
    pub sample_rate: u32,
    pub channels: u32,
    pub width: u32,
    pub height: u32,
}

/// One decrypted, timestamped sample ready for the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleBuffer {
    pub timestamp_ns: i64,
    pub duration_ns: i64,
    pub data: Vec<u8>,
}

/// Messages surfaced by the pipeline bus.
#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    StateChanged { old: TargetState, new: TargetState, pending: TargetState },
    Eos,
    Error { message: String },
    Warning { message: String },
    Qos { source_type: MediaSourceType, info: QosInfo },
    /// Posted wakeup; the dispatcher exits cleanly on it.
    Wakeup,
}

/// The pipeline operations used by the task layer.
pub trait PlayerBackend: Send + Sync {
    fn change_state(&self, state: TargetState) -> Result<(), PlayerError>;
    fn current_state(&self) -> TargetState;

    fn seek_to(&self, position_ns: i64) -> Result<(), PlayerError>;
    fn query_position_ns(&self) -> Option<i64>;

    /// Sends the custom instant-rate-change event downstream.
    fn send_instant_rate_change(&self, rate: f64) -> bool;
    /// Name of the audio sink element, when one has been resolved.
    fn audio_sink_name(&self) -> Option<String>;
    /// Applies the rate as a fresh segment on the audio sink pad; the
    /// path taken for sinks that ignore instant-rate-change.
    fn send_audio_sink_segment_rate(&self, rate: f64) -> bool;

    fn set_video_rectangle(&self, geometry: VideoGeometry) -> bool;
    /// Steps a single prerolled frame on the video sink.
    fn render_preroll_frame(&self) -> Result<(), PlayerError>;

    fn attach_source(&self, source_type: MediaSourceType, caps: &StreamCaps) -> Result<(), PlayerError>;
    fn remove_source(&self, source_type: MediaSourceType);
    fn set_source_caps(&self, source_type: MediaSourceType, caps: &StreamCaps);
    fn push_sample(&self, source_type: MediaSourceType, sample: SampleBuffer) -> Result<(), PlayerError>;
    fn end_of_stream(&self, source_type: MediaSourceType) -> Result<(), PlayerError>;

    /// Applies deferred per-element configuration when the pipeline
    /// announces a newly created element.
    fn configure_element(&self, element_name: &str, pending_geometry: Option<VideoGeometry>) -> bool;
}

/// Blocking view of the pipeline bus, consumed by the dispatcher thread.
pub trait BusWatch: Send {
    fn next_message(&mut self) -> BusMessage;
}

/// Posts the wakeup message that makes [`BusWatch::next_message`] return
/// [`BusMessage::Wakeup`]. Callable from any thread.
pub trait BusWaker: Send + Sync {
    fn wake(&self);
}

/// Everything a backend factory hands back for one pipeline.
pub struct BackendParts {
    pub backend: Arc<dyn PlayerBackend>,
    pub bus: Box<dyn BusWatch>,
    pub waker: Arc<dyn BusWaker>,
}

/// Creates pipeline backends; the daemon wires the GStreamer factory in
/// at bootstrap, tests wire mocks.
pub trait PlayerBackendFactory: Send + Sync {
    fn create(
        &self,
        media_type: MediaType,
        video_requirements: &VideoRequirements,
        signals: PlayerSignals,
    ) -> Result<BackendParts, PlayerError>;
}

/// Task-queue entry points for pipeline callbacks (source-setup,
/// element-setup, appsrc data signals). Cheap to clone into closures;
/// the sender sits behind a mutex so closures can be `Sync`.
#[derive(Clone)]
pub struct PlayerSignals {
    tx: Arc<Mutex<Sender<PlayerTask>>>,
}

impl PlayerSignals {
    pub(crate) fn new(tx: Sender<PlayerTask>) -> Self {
        Self { tx: Arc::new(Mutex::new(tx)) }
    }

    fn post(&self, task: PlayerTask) {
        if self.tx.lock().unwrap().send(task).is_err() {
            warn!("Pipeline signal arrived after worker shutdown");
        }
    }

    pub fn source_setup(&self) {
        self.post(PlayerTask::SetupSource);
    }

    pub fn element_setup(&self, element_name: String) {
        self.post(PlayerTask::SetupElement { element_name });
    }

    pub fn need_data(&self, source_type: MediaSourceType) {
        self.post(PlayerTask::NeedData { source_type });
    }

    pub fn enough_data(&self, source_type: MediaSourceType) {
        self.post(PlayerTask::EnoughData { source_type });
    }

    pub fn underflow(&self, source_type: MediaSourceType) {
        self.post(PlayerTask::Underflow { source_type });
    }
}
