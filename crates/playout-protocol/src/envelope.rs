//! Frame envelope and length-delimited codec helpers
//!
//! Every unit on the wire is one `Frame`, preceded by a big-endian `u32`
//! byte count. The prefix format matches `tokio_util`'s
//! `LengthDelimitedCodec` defaults so the server can use the framed codec
//! directly while the synchronous client reads frames with
//! [`read_frame`] / [`write_frame`].

use std::io::{Read, Write};

use bytes::{Bytes, BytesMut};
use prost::Message;

use crate::{Error, Result, MAX_FRAME_LEN};

/// Discriminates calls, replies and server-pushed events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
#[repr(i32)]
pub enum FrameKind {
    Unknown = 0,
    Call = 1,
    Reply = 2,
    Event = 3,
}

/// Outcome of a call, carried on the reply frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
#[repr(i32)]
pub enum ReplyStatus {
    Unknown = 0,
    Ok = 1,
    /// The call failed; `error_message` explains why.
    Error = 2,
    /// The session or handle named in the call does not exist.
    BadSession = 3,
}

/// Every callable method and pushable event on the channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum Method {
    Unknown = 0,

    // MediaPipelineModule
    CreateSession = 1,
    DestroySession = 2,
    Load = 3,
    AttachSource = 4,
    RemoveSource = 5,
    Play = 6,
    Pause = 7,
    Stop = 8,
    SetPosition = 9,
    GetPosition = 10,
    SetPlaybackRate = 11,
    SetVideoWindow = 12,
    HaveData = 13,
    RenderFrame = 14,

    // MediaKeysModule
    CreateMediaKeys = 30,
    DestroyMediaKeys = 31,
    CreateKeySession = 32,
    GenerateRequest = 33,
    LoadKeySession = 34,
    UpdateKeySession = 35,
    CloseKeySession = 36,
    RemoveKeySession = 37,
    GetCdmKeySessionId = 38,
    ContainsKey = 39,
    SelectKeyId = 40,
    SetDrmHeader = 41,
    DeleteDrmStore = 42,
    DeleteKeyStore = 43,
    GetDrmStoreHash = 44,
    GetKeyStoreHash = 45,
    GetLdlSessionsLimit = 46,
    GetLastDrmError = 47,
    GetDrmTime = 48,

    // MediaPipelineCapabilitiesModule
    GetSupportedMimeTypes = 60,
    IsMimeTypeSupported = 61,

    // ControlModule
    GetSharedMemory = 70,

    // Events
    PlaybackStateChangeEvent = 100,
    NetworkStateChangeEvent = 101,
    PositionChangeEvent = 102,
    NeedMediaDataEvent = 103,
    QosEvent = 104,
    LicenseRequestEvent = 105,
    KeyStatusesChangedEvent = 106,
}

/// One unit of traffic on the channel.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Frame {
    #[prost(enumeration = "FrameKind", tag = "1")]
    pub kind: i32,
    /// Matches a reply to its call; zero on events.
    #[prost(uint32, tag = "2")]
    pub correlation_id: u32,
    #[prost(enumeration = "Method", tag = "3")]
    pub method: i32,
    #[prost(enumeration = "ReplyStatus", tag = "4")]
    pub status: i32,
    #[prost(string, tag = "5")]
    pub error_message: ::prost::alloc::string::String,
    /// Encoded request, response or event message for `method`.
    #[prost(bytes = "bytes", tag = "6")]
    pub payload: Bytes,
}

impl Frame {
    pub fn call(correlation_id: u32, method: Method, payload: &impl Message) -> Self {
        Self {
            kind: FrameKind::Call as i32,
            correlation_id,
            method: method as i32,
            status: ReplyStatus::Unknown as i32,
            error_message: String::new(),
            payload: encode_payload(payload),
        }
    }

    pub fn reply(correlation_id: u32, method: Method, payload: &impl Message) -> Self {
        Self {
            kind: FrameKind::Reply as i32,
            correlation_id,
            method: method as i32,
            status: ReplyStatus::Ok as i32,
            error_message: String::new(),
            payload: encode_payload(payload),
        }
    }

    pub fn error_reply(correlation_id: u32, method: Method, status: ReplyStatus, message: impl Into<String>) -> Self {
        Self {
            kind: FrameKind::Reply as i32,
            correlation_id,
            method: method as i32,
            status: status as i32,
            error_message: message.into(),
            payload: Bytes::new(),
        }
    }

    pub fn event(method: Method, payload: &impl Message) -> Self {
        Self {
            kind: FrameKind::Event as i32,
            correlation_id: 0,
            method: method as i32,
            status: ReplyStatus::Unknown as i32,
            error_message: String::new(),
            payload: encode_payload(payload),
        }
    }

    pub fn reply_status(&self) -> ReplyStatus {
        ReplyStatus::try_from(self.status).unwrap_or(ReplyStatus::Unknown)
    }

    /// Decodes the payload as the message type expected for the method.
    pub fn decode_payload<M: Message + Default>(&self) -> Result<M> {
        Ok(M::decode(self.payload.clone())?)
    }

    /// Serialises the frame without the length prefix.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf).expect("BytesMut grows on demand");
        buf.freeze()
    }

    /// Parses a frame from prefix-stripped bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self::decode(bytes)?)
    }
}

fn encode_payload(payload: &impl Message) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.encoded_len());
    payload.encode(&mut buf).expect("BytesMut grows on demand");
    buf.freeze()
}

/// Writes one length-prefixed frame to a blocking stream.
pub fn write_frame(writer: &mut impl Write, frame: &Frame) -> Result<()> {
    let body = frame.to_bytes();
    if body.len() > MAX_FRAME_LEN {
        return Err(Error::Oversized(body.len()));
    }
    writer.write_all(&(body.len() as u32).to_be_bytes())?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

/// Reads one length-prefixed frame from a blocking stream.
pub fn read_frame(reader: &mut impl Read) -> Result<Frame> {
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix)?;
    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(Error::Oversized(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    Frame::from_bytes(&body)
}
