//! Core identifiers and media descriptors
//!
//! These types travel between the client library and the server in one
//! form or another; the wire representation lives in `playout-protocol`
//! and converts to and from the types defined here.

use std::fmt;

use bytes::Bytes;

/// Identifier of a playback session, assigned by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub i32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an elementary stream attached to a session.
///
/// Assigned by the server on attach, monotonically increasing and never
/// negative for a successfully attached source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub i32);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a DRM key session, assigned by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeySessionId(pub i32);

impl fmt::Display for KeySessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of playback a session hosts. Only MSE playback is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Mse,
    Unknown,
}

/// The elementary stream type of a source or segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaSourceType {
    Audio,
    Video,
    Unknown,
}

impl fmt::Display for MediaSourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaSourceType::Audio => write!(f, "audio"),
            MediaSourceType::Video => write!(f, "video"),
            MediaSourceType::Unknown => write!(f, "unknown"),
        }
    }
}

/// Status reported by the client when answering a need-data request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaSourceStatus {
    Ok,
    Eos,
    Error,
    CodecChanged,
    NoAvailableSamples,
}

/// Playback state of a session as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
    Seeking,
    Flushed,
    Stopped,
    EndOfStream,
    Failure,
    Unknown,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackState::Idle => "IDLE",
            PlaybackState::Playing => "PLAYING",
            PlaybackState::Paused => "PAUSED",
            PlaybackState::Seeking => "SEEKING",
            PlaybackState::Flushed => "FLUSHED",
            PlaybackState::Stopped => "STOPPED",
            PlaybackState::EndOfStream => "END_OF_STREAM",
            PlaybackState::Failure => "FAILURE",
            PlaybackState::Unknown => "UNKNOWN",
        };
        write!(f, "{name}")
    }
}

/// Network / buffering state of a session as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    Idle,
    Buffering,
    BufferingProgress,
    Buffered,
    Stalled,
    FormatError,
    NetworkError,
    DecodeError,
    Unknown,
}

impl fmt::Display for NetworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NetworkState::Idle => "IDLE",
            NetworkState::Buffering => "BUFFERING",
            NetworkState::BufferingProgress => "BUFFERING_PROGRESS",
            NetworkState::Buffered => "BUFFERED",
            NetworkState::Stalled => "STALLED",
            NetworkState::FormatError => "FORMAT_ERROR",
            NetworkState::NetworkError => "NETWORK_ERROR",
            NetworkState::DecodeError => "DECODE_ERROR",
            NetworkState::Unknown => "UNKNOWN",
        };
        write!(f, "{name}")
    }
}

/// Alignment of the segments delivered for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmentAlignment {
    #[default]
    Undefined,
    Nal,
    Au,
}

/// Stream format of the segments delivered for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamFormat {
    #[default]
    Undefined,
    Raw,
    Avc,
    ByteStream,
}

/// Result of a DRM operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKeyErrorStatus {
    Ok,
    Fail,
    BadSessionId,
    InterfaceNotImplemented,
    BufferTooSmall,
    NotSupported,
    InvalidState,
}

/// Type of a DRM key session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySessionType {
    Temporary,
    PersistentLicence,
    Unknown,
}

/// Format of the DRM initialisation data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitDataType {
    Cenc,
    KeyIds,
    WebM,
    Unknown,
}

/// Status of a single content key within a key session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    Usable,
    Expired,
    Released,
    OutputRestricted,
    Pending,
    InternalError,
}

/// Outcome of writing one segment into shared memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddSegmentStatus {
    Ok,
    NoSpace,
    Error,
}

/// Maximum video resolution a session must be able to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoRequirements {
    pub max_width: u32,
    pub max_height: u32,
}

/// Decoder configuration for an audio source.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AudioConfig {
    pub channels: u32,
    pub sample_rate: u32,
    /// Codec specific configuration, e.g. the AudioSpecificConfig for AAC.
    pub codec_specific_config: Vec<u8>,
}

/// Descriptor of one elementary stream to attach to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSource {
    /// Assigned by the server on attach; negative until then.
    pub id: i32,
    pub source_type: MediaSourceType,
    pub mime_type: String,
    /// Raw caps string; preferred over the structured fields when set.
    pub caps: Option<String>,
    pub audio_config: Option<AudioConfig>,
    pub segment_alignment: SegmentAlignment,
    pub stream_format: StreamFormat,
    pub codec_data: Option<Vec<u8>>,
}

impl MediaSource {
    pub fn new_audio(mime_type: impl Into<String>, audio_config: AudioConfig) -> Self {
        Self {
            id: -1,
            source_type: MediaSourceType::Audio,
            mime_type: mime_type.into(),
            caps: None,
            audio_config: Some(audio_config),
            segment_alignment: SegmentAlignment::Undefined,
            stream_format: StreamFormat::Undefined,
            codec_data: None,
        }
    }

    pub fn new_video(mime_type: impl Into<String>) -> Self {
        Self {
            id: -1,
            source_type: MediaSourceType::Video,
            mime_type: mime_type.into(),
            caps: None,
            audio_config: None,
            segment_alignment: SegmentAlignment::Undefined,
            stream_format: StreamFormat::Undefined,
            codec_data: None,
        }
    }
}

/// A `[clear, encrypted]` byte count pair partitioning an encrypted sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubSamplePair {
    pub clear_bytes: u32,
    pub encrypted_bytes: u32,
}

/// One demuxed compressed sample handed from client to server.
///
/// Timing is in nanoseconds. For audio segments `sample_rate`/`channels`
/// describe the sample, for video segments `width`/`height` do; the
/// remaining pair is zero.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaSegment {
    pub source_type: MediaSourceType,
    pub timestamp_ns: i64,
    pub duration_ns: i64,
    pub sample_rate: u32,
    pub channels: u32,
    pub width: u32,
    pub height: u32,
    pub encrypted: bool,
    pub media_key_session_id: i32,
    pub key_id: Vec<u8>,
    pub init_vector: Vec<u8>,
    pub sub_samples: Vec<SubSamplePair>,
    pub init_with_last_15: u32,
    pub data: Bytes,
}

impl MediaSegment {
    pub fn new_audio(timestamp_ns: i64, duration_ns: i64, sample_rate: u32, channels: u32, data: Bytes) -> Self {
        Self {
            source_type: MediaSourceType::Audio,
            timestamp_ns,
            duration_ns,
            sample_rate,
            channels,
            width: 0,
            height: 0,
            encrypted: false,
            media_key_session_id: 0,
            key_id: Vec::new(),
            init_vector: Vec::new(),
            sub_samples: Vec::new(),
            init_with_last_15: 0,
            data,
        }
    }

    pub fn new_video(timestamp_ns: i64, duration_ns: i64, width: u32, height: u32, data: Bytes) -> Self {
        Self {
            source_type: MediaSourceType::Video,
            timestamp_ns,
            duration_ns,
            sample_rate: 0,
            channels: 0,
            width,
            height,
            encrypted: false,
            media_key_session_id: 0,
            key_id: Vec::new(),
            init_vector: Vec::new(),
            sub_samples: Vec::new(),
            init_with_last_15: 0,
            data,
        }
    }
}

/// Location of the region a need-data request must be answered into.
///
/// All offsets are relative to the start of the shared memory mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShmInfo {
    pub max_metadata_bytes: u32,
    pub metadata_offset: u32,
    pub media_data_offset: u32,
    pub max_media_bytes: u32,
}

/// Rendering quality counters attached to a QoS notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QosInfo {
    pub processed: u64,
    pub dropped: u64,
}
