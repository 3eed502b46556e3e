//! Request, response and event messages
//!
//! One request/response pair per [`crate::Method`], plus the event
//! messages pushed by the server. Field numbering is frozen; additions
//! take new tags.

use bytes::Bytes;

// ---------------------------------------------------------------------------
// Wire enums
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum WireMediaType {
    Unknown = 0,
    Mse = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum WireMediaSourceType {
    Unknown = 0,
    Audio = 1,
    Video = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum WireMediaSourceStatus {
    Unknown = 0,
    Ok = 1,
    Eos = 2,
    Error = 3,
    CodecChanged = 4,
    NoAvailableSamples = 5,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum WireSegmentAlignment {
    Undefined = 0,
    Nal = 1,
    Au = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum WireStreamFormat {
    Undefined = 0,
    Raw = 1,
    Avc = 2,
    ByteStream = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum WirePlaybackState {
    Unknown = 0,
    Idle = 1,
    Playing = 2,
    Paused = 3,
    Seeking = 4,
    Flushed = 5,
    Stopped = 6,
    EndOfStream = 7,
    Failure = 8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum WireNetworkState {
    Unknown = 0,
    Idle = 1,
    Buffering = 2,
    BufferingProgress = 3,
    Buffered = 4,
    Stalled = 5,
    FormatError = 6,
    NetworkError = 7,
    DecodeError = 8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum WireKeySessionType {
    Unknown = 0,
    Temporary = 1,
    PersistentLicence = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum WireInitDataType {
    Unknown = 0,
    Cenc = 1,
    KeyIds = 2,
    WebM = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum WireMediaKeyErrorStatus {
    Unknown = 0,
    Ok = 1,
    Fail = 2,
    BadSessionId = 3,
    InterfaceNotImplemented = 4,
    BufferTooSmall = 5,
    NotSupported = 6,
    InvalidState = 7,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum WireKeyStatus {
    Usable = 0,
    Expired = 1,
    Released = 2,
    OutputRestricted = 3,
    Pending = 4,
    InternalError = 5,
}

// ---------------------------------------------------------------------------
// MediaPipelineModule
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateSessionRequest {
    #[prost(uint32, tag = "1")]
    pub max_width: u32,
    #[prost(uint32, tag = "2")]
    pub max_height: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateSessionResponse {
    #[prost(int32, tag = "1")]
    pub session_id: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DestroySessionRequest {
    #[prost(int32, tag = "1")]
    pub session_id: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DestroySessionResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LoadRequest {
    #[prost(int32, tag = "1")]
    pub session_id: i32,
    #[prost(enumeration = "WireMediaType", tag = "2")]
    pub media_type: i32,
    #[prost(string, tag = "3")]
    pub mime_type: String,
    #[prost(string, tag = "4")]
    pub url: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LoadResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AudioConfigMsg {
    #[prost(uint32, tag = "1")]
    pub channels: u32,
    #[prost(uint32, tag = "2")]
    pub sample_rate: u32,
    #[prost(bytes = "vec", tag = "3")]
    pub codec_specific_config: Vec<u8>,
}

/// Carries both the structured attach fields and an optional raw caps
/// string; the server prefers `caps` when non-empty.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AttachSourceRequest {
    #[prost(int32, tag = "1")]
    pub session_id: i32,
    #[prost(enumeration = "WireMediaSourceType", tag = "2")]
    pub media_type: i32,
    #[prost(string, tag = "3")]
    pub mime_type: String,
    #[prost(string, tag = "4")]
    pub caps: String,
    #[prost(message, optional, tag = "5")]
    pub audio_config: Option<AudioConfigMsg>,
    #[prost(bytes = "vec", tag = "6")]
    pub codec_data: Vec<u8>,
    #[prost(enumeration = "WireSegmentAlignment", tag = "7")]
    pub segment_alignment: i32,
    #[prost(enumeration = "WireStreamFormat", tag = "8")]
    pub stream_format: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AttachSourceResponse {
    #[prost(int32, tag = "1")]
    pub source_id: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RemoveSourceRequest {
    #[prost(int32, tag = "1")]
    pub session_id: i32,
    #[prost(int32, tag = "2")]
    pub source_id: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RemoveSourceResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PlayRequest {
    #[prost(int32, tag = "1")]
    pub session_id: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PlayResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PauseRequest {
    #[prost(int32, tag = "1")]
    pub session_id: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PauseResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StopRequest {
    #[prost(int32, tag = "1")]
    pub session_id: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StopResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetPositionRequest {
    #[prost(int32, tag = "1")]
    pub session_id: i32,
    #[prost(int64, tag = "2")]
    pub position_ns: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetPositionResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetPositionRequest {
    #[prost(int32, tag = "1")]
    pub session_id: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetPositionResponse {
    #[prost(int64, tag = "1")]
    pub position_ns: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetPlaybackRateRequest {
    #[prost(int32, tag = "1")]
    pub session_id: i32,
    #[prost(double, tag = "2")]
    pub rate: f64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetPlaybackRateResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetVideoWindowRequest {
    #[prost(int32, tag = "1")]
    pub session_id: i32,
    #[prost(uint32, tag = "2")]
    pub x: u32,
    #[prost(uint32, tag = "3")]
    pub y: u32,
    #[prost(uint32, tag = "4")]
    pub width: u32,
    #[prost(uint32, tag = "5")]
    pub height: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetVideoWindowResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HaveDataRequest {
    #[prost(int32, tag = "1")]
    pub session_id: i32,
    #[prost(enumeration = "WireMediaSourceStatus", tag = "2")]
    pub status: i32,
    #[prost(uint32, tag = "3")]
    pub num_frames: u32,
    #[prost(uint32, tag = "4")]
    pub request_id: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HaveDataResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RenderFrameRequest {
    #[prost(int32, tag = "1")]
    pub session_id: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RenderFrameResponse {}

// ---------------------------------------------------------------------------
// MediaKeysModule
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateMediaKeysRequest {
    #[prost(string, tag = "1")]
    pub key_system: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateMediaKeysResponse {
    #[prost(int32, tag = "1")]
    pub media_keys_handle: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DestroyMediaKeysRequest {
    #[prost(int32, tag = "1")]
    pub media_keys_handle: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DestroyMediaKeysResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateKeySessionRequest {
    #[prost(int32, tag = "1")]
    pub media_keys_handle: i32,
    #[prost(enumeration = "WireKeySessionType", tag = "2")]
    pub session_type: i32,
    #[prost(bool, tag = "3")]
    pub is_ldl: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateKeySessionResponse {
    #[prost(int32, tag = "1")]
    pub key_session_id: i32,
    #[prost(enumeration = "WireMediaKeyErrorStatus", tag = "2")]
    pub error_status: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GenerateRequestRequest {
    #[prost(int32, tag = "1")]
    pub media_keys_handle: i32,
    #[prost(int32, tag = "2")]
    pub key_session_id: i32,
    #[prost(enumeration = "WireInitDataType", tag = "3")]
    pub init_data_type: i32,
    #[prost(bytes = "vec", tag = "4")]
    pub init_data: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GenerateRequestResponse {
    #[prost(enumeration = "WireMediaKeyErrorStatus", tag = "1")]
    pub error_status: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LoadKeySessionRequest {
    #[prost(int32, tag = "1")]
    pub media_keys_handle: i32,
    #[prost(int32, tag = "2")]
    pub key_session_id: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LoadKeySessionResponse {
    #[prost(enumeration = "WireMediaKeyErrorStatus", tag = "1")]
    pub error_status: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateKeySessionRequest {
    #[prost(int32, tag = "1")]
    pub media_keys_handle: i32,
    #[prost(int32, tag = "2")]
    pub key_session_id: i32,
    #[prost(bytes = "vec", tag = "3")]
    pub response_data: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateKeySessionResponse {
    #[prost(enumeration = "WireMediaKeyErrorStatus", tag = "1")]
    pub error_status: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CloseKeySessionRequest {
    #[prost(int32, tag = "1")]
    pub media_keys_handle: i32,
    #[prost(int32, tag = "2")]
    pub key_session_id: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CloseKeySessionResponse {
    #[prost(enumeration = "WireMediaKeyErrorStatus", tag = "1")]
    pub error_status: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RemoveKeySessionRequest {
    #[prost(int32, tag = "1")]
    pub media_keys_handle: i32,
    #[prost(int32, tag = "2")]
    pub key_session_id: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RemoveKeySessionResponse {
    #[prost(enumeration = "WireMediaKeyErrorStatus", tag = "1")]
    pub error_status: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetCdmKeySessionIdRequest {
    #[prost(int32, tag = "1")]
    pub media_keys_handle: i32,
    #[prost(int32, tag = "2")]
    pub key_session_id: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetCdmKeySessionIdResponse {
    #[prost(enumeration = "WireMediaKeyErrorStatus", tag = "1")]
    pub error_status: i32,
    #[prost(string, tag = "2")]
    pub cdm_key_session_id: String,
}

/// Request shape shared by the declared-but-unsupported DRM operations
/// (`containsKey`, `selectKeyId`, `setDrmHeader`, store management,
/// limits and diagnostics). The server answers them all with
/// `NOT_SUPPORTED`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DrmAuxiliaryRequest {
    #[prost(int32, tag = "1")]
    pub media_keys_handle: i32,
    #[prost(int32, tag = "2")]
    pub key_session_id: i32,
    #[prost(bytes = "vec", tag = "3")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DrmAuxiliaryResponse {
    #[prost(enumeration = "WireMediaKeyErrorStatus", tag = "1")]
    pub error_status: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
}

// ---------------------------------------------------------------------------
// MediaPipelineCapabilitiesModule
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetSupportedMimeTypesRequest {
    #[prost(enumeration = "WireMediaSourceType", tag = "1")]
    pub media_type: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetSupportedMimeTypesResponse {
    #[prost(string, repeated, tag = "1")]
    pub mime_types: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IsMimeTypeSupportedRequest {
    #[prost(string, tag = "1")]
    pub mime_type: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IsMimeTypeSupportedResponse {
    #[prost(bool, tag = "1")]
    pub is_supported: bool,
}

// ---------------------------------------------------------------------------
// ControlModule
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetSharedMemoryRequest {}

/// The reply carries the region size; the file descriptor itself follows
/// the reply frame as one out-of-band byte with `SCM_RIGHTS` attached
/// (see [`crate::fdpass`]).
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetSharedMemoryResponse {
    #[prost(uint32, tag = "1")]
    pub size: u32,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PlaybackStateChangeEvent {
    #[prost(int32, tag = "1")]
    pub session_id: i32,
    #[prost(enumeration = "WirePlaybackState", tag = "2")]
    pub state: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NetworkStateChangeEvent {
    #[prost(int32, tag = "1")]
    pub session_id: i32,
    #[prost(enumeration = "WireNetworkState", tag = "2")]
    pub state: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PositionChangeEvent {
    #[prost(int32, tag = "1")]
    pub session_id: i32,
    #[prost(int64, tag = "2")]
    pub position_ns: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ShmInfoMsg {
    #[prost(uint32, tag = "1")]
    pub max_metadata_bytes: u32,
    #[prost(uint32, tag = "2")]
    pub metadata_offset: u32,
    #[prost(uint32, tag = "3")]
    pub media_data_offset: u32,
    #[prost(uint32, tag = "4")]
    pub max_media_bytes: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NeedMediaDataEvent {
    #[prost(int32, tag = "1")]
    pub session_id: i32,
    #[prost(int32, tag = "2")]
    pub source_id: i32,
    #[prost(uint32, tag = "3")]
    pub frame_count: u32,
    #[prost(uint32, tag = "4")]
    pub request_id: u32,
    #[prost(message, optional, tag = "5")]
    pub shm_info: Option<ShmInfoMsg>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QosInfoMsg {
    #[prost(uint64, tag = "1")]
    pub processed: u64,
    #[prost(uint64, tag = "2")]
    pub dropped: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QosEvent {
    #[prost(int32, tag = "1")]
    pub session_id: i32,
    #[prost(int32, tag = "2")]
    pub source_id: i32,
    #[prost(message, optional, tag = "3")]
    pub qos_info: Option<QosInfoMsg>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LicenseRequestEvent {
    #[prost(int32, tag = "1")]
    pub media_keys_handle: i32,
    #[prost(int32, tag = "2")]
    pub key_session_id: i32,
    #[prost(bytes = "bytes", tag = "3")]
    pub license_request_message: Bytes,
    #[prost(string, tag = "4")]
    pub url: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KeyIdWithStatus {
    #[prost(bytes = "vec", tag = "1")]
    pub key_id: Vec<u8>,
    #[prost(enumeration = "WireKeyStatus", tag = "2")]
    pub status: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KeyStatusesChangedEvent {
    #[prost(int32, tag = "1")]
    pub media_keys_handle: i32,
    #[prost(int32, tag = "2")]
    pub key_session_id: i32,
    #[prost(message, repeated, tag = "3")]
    pub key_statuses: Vec<KeyIdWithStatus>,
}
