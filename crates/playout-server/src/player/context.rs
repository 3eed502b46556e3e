//! Per-session player context
//!
//! Owned by the session's worker thread; every read and write happens on
//! that thread. External callers influence it only by posting tasks.

use playout_common::MediaSourceType;

use super::backend::{StreamCaps, VideoGeometry};

/// Mutable playback state of one session.
#[derive(Debug, Default)]
pub struct PlayerContext {
    /// Caps last applied per source; `Some` marks the source attached.
    pub audio_caps: Option<StreamCaps>,
    pub video_caps: Option<StreamCaps>,

    /// True between a need-data notification and the client's answer (or
    /// a flush); gates duplicate notifications.
    pub audio_need_data: bool,
    pub video_need_data: bool,

    pub audio_underflow: bool,
    pub video_underflow: bool,

    pub audio_eos: bool,
    pub video_eos: bool,

    /// Applied playback rate; 1.0 until changed.
    pub playback_rate: f64,
    /// Rate requested while the pipeline was below PLAYING, applied on
    /// the next transition into PLAYING.
    pub pending_playback_rate: Option<f64>,

    /// Last position handed to the client, in nanoseconds.
    pub last_position_ns: i64,

    /// Video rectangle requested before the sink existed.
    pub pending_geometry: Option<VideoGeometry>,

    /// The source element reported ready by the pipeline.
    pub source_ready: bool,
    /// The initial PAUSED commit has happened.
    pub initial_state_committed: bool,
}

impl PlayerContext {
    pub fn new() -> Self {
        Self { playback_rate: 1.0, ..Default::default() }
    }

    pub fn caps_for(&self, source_type: MediaSourceType) -> Option<&StreamCaps> {
        match source_type {
            MediaSourceType::Audio => self.audio_caps.as_ref(),
            MediaSourceType::Video => self.video_caps.as_ref(),
            MediaSourceType::Unknown => None,
        }
    }

    pub fn set_caps(&mut self, source_type: MediaSourceType, caps: Option<StreamCaps>) {
        match source_type {
            MediaSourceType::Audio => self.audio_caps = caps,
            MediaSourceType::Video => self.video_caps = caps,
            MediaSourceType::Unknown => {}
        }
    }

    pub fn need_data(&self, source_type: MediaSourceType) -> bool {
        match source_type {
            MediaSourceType::Audio => self.audio_need_data,
            MediaSourceType::Video => self.video_need_data,
            MediaSourceType::Unknown => false,
        }
    }

    pub fn set_need_data(&mut self, source_type: MediaSourceType, value: bool) {
        match source_type {
            MediaSourceType::Audio => self.audio_need_data = value,
            MediaSourceType::Video => self.video_need_data = value,
            MediaSourceType::Unknown => {}
        }
    }

    pub fn set_underflow(&mut self, source_type: MediaSourceType, value: bool) {
        match source_type {
            MediaSourceType::Audio => self.audio_underflow = value,
            MediaSourceType::Video => self.video_underflow = value,
            MediaSourceType::Unknown => {}
        }
    }

    pub fn underflow(&self, source_type: MediaSourceType) -> bool {
        match source_type {
            MediaSourceType::Audio => self.audio_underflow,
            MediaSourceType::Video => self.video_underflow,
            MediaSourceType::Unknown => false,
        }
    }

    pub fn set_eos(&mut self, source_type: MediaSourceType, value: bool) {
        match source_type {
            MediaSourceType::Audio => self.audio_eos = value,
            MediaSourceType::Video => self.video_eos = value,
            MediaSourceType::Unknown => {}
        }
    }
}
