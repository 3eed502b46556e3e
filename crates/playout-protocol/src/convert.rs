//! Wire ↔ domain enum conversions
//!
//! Every conversion pair is bijective over the wire enum's value set.
//! Raw `i32` values that decode to no known wire variant map to the
//! domain `Unknown` variant with a warning; they are never an error.

use playout_common::{
    InitDataType, KeySessionType, KeyStatus, MediaKeyErrorStatus, MediaSourceStatus,
    MediaSourceType, MediaType, NetworkState, PlaybackState, SegmentAlignment, StreamFormat,
};
use tracing::warn;

use crate::messages::*;

macro_rules! enum_bridge {
    ($wire:ident, $domain:ident, $raw_fn:ident, { $($w:ident <=> $d:ident),+ $(,)? }) => {
        impl From<$domain> for $wire {
            fn from(value: $domain) -> Self {
                match value {
                    $($domain::$d => $wire::$w),+
                }
            }
        }

        impl From<$wire> for $domain {
            fn from(value: $wire) -> Self {
                match value {
                    $($wire::$w => $domain::$d),+
                }
            }
        }

        /// Decodes a raw wire value, mapping unknown values to
        /// the domain `Unknown` with a warning.
        pub fn $raw_fn(value: i32) -> $domain {
            match $wire::try_from(value) {
                Ok(wire) => wire.into(),
                Err(_) => {
                    warn!("Received unknown {} value {}", stringify!($wire), value);
                    $domain::Unknown
                }
            }
        }
    };
}

enum_bridge!(WireMediaType, MediaType, media_type_from_raw, {
    Unknown <=> Unknown,
    Mse <=> Mse,
});

enum_bridge!(WireMediaSourceType, MediaSourceType, media_source_type_from_raw, {
    Unknown <=> Unknown,
    Audio <=> Audio,
    Video <=> Video,
});

enum_bridge!(WirePlaybackState, PlaybackState, playback_state_from_raw, {
    Unknown <=> Unknown,
    Idle <=> Idle,
    Playing <=> Playing,
    Paused <=> Paused,
    Seeking <=> Seeking,
    Flushed <=> Flushed,
    Stopped <=> Stopped,
    EndOfStream <=> EndOfStream,
    Failure <=> Failure,
});

enum_bridge!(WireNetworkState, NetworkState, network_state_from_raw, {
    Unknown <=> Unknown,
    Idle <=> Idle,
    Buffering <=> Buffering,
    BufferingProgress <=> BufferingProgress,
    Buffered <=> Buffered,
    Stalled <=> Stalled,
    FormatError <=> FormatError,
    NetworkError <=> NetworkError,
    DecodeError <=> DecodeError,
});

enum_bridge!(WireKeySessionType, KeySessionType, key_session_type_from_raw, {
    Unknown <=> Unknown,
    Temporary <=> Temporary,
    PersistentLicence <=> PersistentLicence,
});

enum_bridge!(WireInitDataType, InitDataType, init_data_type_from_raw, {
    Unknown <=> Unknown,
    Cenc <=> Cenc,
    KeyIds <=> KeyIds,
    WebM <=> WebM,
});

// Status enums have no domain Unknown; undecodable raw values degrade to
// the conservative failure variants instead.

impl From<MediaSourceStatus> for WireMediaSourceStatus {
    fn from(value: MediaSourceStatus) -> Self {
        match value {
            MediaSourceStatus::Ok => WireMediaSourceStatus::Ok,
            MediaSourceStatus::Eos => WireMediaSourceStatus::Eos,
            MediaSourceStatus::Error => WireMediaSourceStatus::Error,
            MediaSourceStatus::CodecChanged => WireMediaSourceStatus::CodecChanged,
            MediaSourceStatus::NoAvailableSamples => WireMediaSourceStatus::NoAvailableSamples,
        }
    }
}

pub fn media_source_status_from_raw(value: i32) -> MediaSourceStatus {
    match WireMediaSourceStatus::try_from(value) {
        Ok(WireMediaSourceStatus::Ok) => MediaSourceStatus::Ok,
        Ok(WireMediaSourceStatus::Eos) => MediaSourceStatus::Eos,
        Ok(WireMediaSourceStatus::CodecChanged) => MediaSourceStatus::CodecChanged,
        Ok(WireMediaSourceStatus::NoAvailableSamples) => MediaSourceStatus::NoAvailableSamples,
        Ok(WireMediaSourceStatus::Error) => MediaSourceStatus::Error,
        Ok(WireMediaSourceStatus::Unknown) | Err(_) => {
            warn!("Received unknown WireMediaSourceStatus value {}", value);
            MediaSourceStatus::Error
        }
    }
}

impl From<MediaKeyErrorStatus> for WireMediaKeyErrorStatus {
    fn from(value: MediaKeyErrorStatus) -> Self {
        match value {
            MediaKeyErrorStatus::Ok => WireMediaKeyErrorStatus::Ok,
            MediaKeyErrorStatus::Fail => WireMediaKeyErrorStatus::Fail,
            MediaKeyErrorStatus::BadSessionId => WireMediaKeyErrorStatus::BadSessionId,
            MediaKeyErrorStatus::InterfaceNotImplemented => {
                WireMediaKeyErrorStatus::InterfaceNotImplemented
            }
            MediaKeyErrorStatus::BufferTooSmall => WireMediaKeyErrorStatus::BufferTooSmall,
            MediaKeyErrorStatus::NotSupported => WireMediaKeyErrorStatus::NotSupported,
            MediaKeyErrorStatus::InvalidState => WireMediaKeyErrorStatus::InvalidState,
        }
    }
}

pub fn media_key_error_status_from_raw(value: i32) -> MediaKeyErrorStatus {
    match WireMediaKeyErrorStatus::try_from(value) {
        Ok(WireMediaKeyErrorStatus::Ok) => MediaKeyErrorStatus::Ok,
        Ok(WireMediaKeyErrorStatus::BadSessionId) => MediaKeyErrorStatus::BadSessionId,
        Ok(WireMediaKeyErrorStatus::InterfaceNotImplemented) => {
            MediaKeyErrorStatus::InterfaceNotImplemented
        }
        Ok(WireMediaKeyErrorStatus::BufferTooSmall) => MediaKeyErrorStatus::BufferTooSmall,
        Ok(WireMediaKeyErrorStatus::NotSupported) => MediaKeyErrorStatus::NotSupported,
        Ok(WireMediaKeyErrorStatus::InvalidState) => MediaKeyErrorStatus::InvalidState,
        Ok(WireMediaKeyErrorStatus::Fail) => MediaKeyErrorStatus::Fail,
        Ok(WireMediaKeyErrorStatus::Unknown) | Err(_) => {
            warn!("Received unknown WireMediaKeyErrorStatus value {}", value);
            MediaKeyErrorStatus::Fail
        }
    }
}

impl From<SegmentAlignment> for WireSegmentAlignment {
    fn from(value: SegmentAlignment) -> Self {
        match value {
            SegmentAlignment::Undefined => WireSegmentAlignment::Undefined,
            SegmentAlignment::Nal => WireSegmentAlignment::Nal,
            SegmentAlignment::Au => WireSegmentAlignment::Au,
        }
    }
}

pub fn segment_alignment_from_raw(value: i32) -> SegmentAlignment {
    match WireSegmentAlignment::try_from(value) {
        Ok(WireSegmentAlignment::Nal) => SegmentAlignment::Nal,
        Ok(WireSegmentAlignment::Au) => SegmentAlignment::Au,
        Ok(WireSegmentAlignment::Undefined) => SegmentAlignment::Undefined,
        Err(_) => {
            warn!("Received unknown WireSegmentAlignment value {}", value);
            SegmentAlignment::Undefined
        }
    }
}

impl From<StreamFormat> for WireStreamFormat {
    fn from(value: StreamFormat) -> Self {
        match value {
            StreamFormat::Undefined => WireStreamFormat::Undefined,
            StreamFormat::Raw => WireStreamFormat::Raw,
            StreamFormat::Avc => WireStreamFormat::Avc,
            StreamFormat::ByteStream => WireStreamFormat::ByteStream,
        }
    }
}

pub fn stream_format_from_raw(value: i32) -> StreamFormat {
    match WireStreamFormat::try_from(value) {
        Ok(WireStreamFormat::Raw) => StreamFormat::Raw,
        Ok(WireStreamFormat::Avc) => StreamFormat::Avc,
        Ok(WireStreamFormat::ByteStream) => StreamFormat::ByteStream,
        Ok(WireStreamFormat::Undefined) => StreamFormat::Undefined,
        Err(_) => {
            warn!("Received unknown WireStreamFormat value {}", value);
            StreamFormat::Undefined
        }
    }
}

impl From<KeyStatus> for WireKeyStatus {
    fn from(value: KeyStatus) -> Self {
        match value {
            KeyStatus::Usable => WireKeyStatus::Usable,
            KeyStatus::Expired => WireKeyStatus::Expired,
            KeyStatus::Released => WireKeyStatus::Released,
            KeyStatus::OutputRestricted => WireKeyStatus::OutputRestricted,
            KeyStatus::Pending => WireKeyStatus::Pending,
            KeyStatus::InternalError => WireKeyStatus::InternalError,
        }
    }
}

pub fn key_status_from_raw(value: i32) -> KeyStatus {
    match WireKeyStatus::try_from(value) {
        Ok(WireKeyStatus::Usable) => KeyStatus::Usable,
        Ok(WireKeyStatus::Expired) => KeyStatus::Expired,
        Ok(WireKeyStatus::Released) => KeyStatus::Released,
        Ok(WireKeyStatus::OutputRestricted) => KeyStatus::OutputRestricted,
        Ok(WireKeyStatus::Pending) => KeyStatus::Pending,
        Ok(WireKeyStatus::InternalError) => KeyStatus::InternalError,
        Err(_) => {
            warn!("Received unknown WireKeyStatus value {}", value);
            KeyStatus::InternalError
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_bijective<W, D>(values: &[W])
    where
        W: Copy + PartialEq + std::fmt::Debug + From<D>,
        D: From<W>,
    {
        for &wire in values {
            let domain: D = wire.into();
            assert_eq!(W::from(domain), wire);
        }
    }

    #[test]
    fn playback_state_roundtrip() {
        use WirePlaybackState::*;
        assert_bijective::<WirePlaybackState, PlaybackState>(&[
            Unknown, Idle, Playing, Paused, Seeking, Flushed, Stopped, EndOfStream, Failure,
        ]);
    }

    #[test]
    fn network_state_roundtrip() {
        use WireNetworkState::*;
        assert_bijective::<WireNetworkState, NetworkState>(&[
            Unknown,
            Idle,
            Buffering,
            BufferingProgress,
            Buffered,
            Stalled,
            FormatError,
            NetworkError,
            DecodeError,
        ]);
    }

    #[test]
    fn media_source_type_roundtrip() {
        use WireMediaSourceType::*;
        assert_bijective::<WireMediaSourceType, MediaSourceType>(&[Unknown, Audio, Video]);
    }

    #[test]
    fn media_type_roundtrip() {
        use WireMediaType::*;
        assert_bijective::<WireMediaType, MediaType>(&[Unknown, Mse]);
    }

    #[test]
    fn key_session_and_init_data_roundtrip() {
        assert_bijective::<WireKeySessionType, KeySessionType>(&[
            WireKeySessionType::Unknown,
            WireKeySessionType::Temporary,
            WireKeySessionType::PersistentLicence,
        ]);
        assert_bijective::<WireInitDataType, InitDataType>(&[
            WireInitDataType::Unknown,
            WireInitDataType::Cenc,
            WireInitDataType::KeyIds,
            WireInitDataType::WebM,
        ]);
    }

    #[test]
    fn unknown_raw_values_degrade_to_unknown() {
        assert_eq!(playback_state_from_raw(999), PlaybackState::Unknown);
        assert_eq!(network_state_from_raw(-5), NetworkState::Unknown);
        assert_eq!(media_source_type_from_raw(77), MediaSourceType::Unknown);
    }

    #[test]
    fn status_enums_degrade_to_failure_variants() {
        assert_eq!(media_source_status_from_raw(999), MediaSourceStatus::Error);
        assert_eq!(media_key_error_status_from_raw(999), MediaKeyErrorStatus::Fail);
        assert_eq!(segment_alignment_from_raw(999), SegmentAlignment::Undefined);
        assert_eq!(stream_format_from_raw(999), StreamFormat::Undefined);
    }
}
