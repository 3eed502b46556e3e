//! Player task set
//!
//! Tasks are value-typed actions executed on the session worker thread.
//! They never leak errors into the queue: failures are logged and
//! reflected in the player context or surfaced through the event sink.

pub(crate) mod attach_samples;
pub(crate) mod attach_source;
pub(crate) mod data_flow;
pub(crate) mod playback;
pub(crate) mod position;
pub(crate) mod rate;
pub(crate) mod source_setup;

use playout_common::{MediaSegment, MediaSource, MediaSourceType, QosInfo};

use super::backend::{TargetState, VideoGeometry};

/// Everything the worker thread can be asked to do.
#[derive(Debug)]
pub enum PlayerTask {
    AttachSource { source: MediaSource },
    RemoveSource { source_type: MediaSourceType },
    SetupSource,
    SetupElement { element_name: String },
    FinishSourceSetup,
    Play,
    Pause,
    Stop,
    SetPosition { position_ns: i64 },
    SetPlaybackRate { rate: f64 },
    SetVideoGeometry { geometry: VideoGeometry },
    RenderFrame,
    NeedData { source_type: MediaSourceType },
    EnoughData { source_type: MediaSourceType },
    AttachSamples { segments: Vec<MediaSegment> },
    Underflow { source_type: MediaSourceType },
    SetEos { source_type: MediaSourceType },
    ReportPosition,
    HandleBusStateChanged { old: TargetState, new: TargetState, pending: TargetState },
    HandleBusEos,
    HandleBusError { message: String },
    HandleQos { source_type: MediaSourceType, info: QosInfo },
    /// Terminal: the worker loop exits without executing it.
    Shutdown,
}
