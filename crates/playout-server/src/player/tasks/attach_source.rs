//! AttachSource / RemoveSource tasks

use playout_common::{MediaSource, MediaSourceType};
use tracing::{debug, warn};

use crate::player::backend::StreamCaps;
use crate::player::inner::PlayerInner;

/// Builds the pipeline-neutral caps descriptor for a source. The raw
/// caps string, when supplied, wins over the structured fields.
pub fn stream_caps_from_source(source: &MediaSource) -> StreamCaps {
    let (sample_rate, channels) = source
        .audio_config
        .as_ref()
        .map(|config| (config.sample_rate, config.channels))
        .unwrap_or((0, 0));
    let codec_data = source.codec_data.clone().or_else(|| {
        source
            .audio_config
            .as_ref()
            .filter(|config| !config.codec_specific_config.is_empty())
            .map(|config| config.codec_specific_config.clone())
    });

    StreamCaps {
        mime_type: source.mime_type.clone(),
        raw_caps: source.caps.clone().filter(|caps| !caps.is_empty()),
        alignment: source.segment_alignment,
        stream_format: source.stream_format,
        codec_data,
        sample_rate,
        channels,
        width: 0,
        height: 0,
    }
}

/// Registers the source with the pipeline. Idempotent: re-attaching the
/// same source is a no-op.
pub(crate) fn attach_source(inner: &mut PlayerInner, source: MediaSource) {
    if source.source_type == MediaSourceType::Unknown {
        warn!("Refusing to attach source with unknown type");
        return;
    }
    let caps = stream_caps_from_source(&source);
    if inner.context.caps_for(source.source_type) == Some(&caps) {
        debug!("Source {} already attached with identical caps", source.source_type);
        return;
    }

    match inner.backend.attach_source(source.source_type, &caps) {
        Ok(()) => {
            debug!("Attached {} source '{}'", source.source_type, source.mime_type);
            inner.context.set_caps(source.source_type, Some(caps));
        }
        Err(err) => warn!("Failed to attach {} source: {}", source.source_type, err),
    }
}

/// Detaches the source and clears its caps and demand flag.
pub(crate) fn remove_source(inner: &mut PlayerInner, source_type: MediaSourceType) {
    if inner.context.caps_for(source_type).is_none() {
        warn!("Remove for unattached {} source", source_type);
        return;
    }
    inner.backend.remove_source(source_type);
    inner.context.set_caps(source_type, None);
    inner.context.set_need_data(source_type, false);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::testing::TestPlayer;
    use playout_common::{AudioConfig, SegmentAlignment, StreamFormat};

    fn aac_source() -> MediaSource {
        let mut source = MediaSource::new_audio(
            "audio/mp4",
            AudioConfig { channels: 2, sample_rate: 48_000, codec_specific_config: vec![0x12, 0x10] },
        );
        source.segment_alignment = SegmentAlignment::Au;
        source.stream_format = StreamFormat::Raw;
        source
    }

    #[test]
    fn caps_carry_audio_config_and_codec_data() {
        let caps = stream_caps_from_source(&aac_source());
        assert_eq!(caps.mime_type, "audio/mp4");
        assert_eq!(caps.sample_rate, 48_000);
        assert_eq!(caps.channels, 2);
        assert_eq!(caps.codec_data.as_deref(), Some(&[0x12u8, 0x10][..]));
        assert_eq!(caps.alignment, SegmentAlignment::Au);
    }

    #[test]
    fn raw_caps_string_is_preserved() {
        let mut source = MediaSource::new_video("video/h264");
        source.caps = Some("video/x-h264, stream-format=avc".to_string());
        let caps = stream_caps_from_source(&source);
        assert_eq!(caps.raw_caps.as_deref(), Some("video/x-h264, stream-format=avc"));
    }

    #[test]
    fn attach_is_idempotent_per_source() {
        let mut player = TestPlayer::new();
        player.inner.execute(crate::player::tasks::PlayerTask::AttachSource { source: aac_source() });
        player.inner.execute(crate::player::tasks::PlayerTask::AttachSource { source: aac_source() });
        assert_eq!(player.backend.attach_calls(), 1);
        assert!(player.inner.context.audio_caps.is_some());
    }

    #[test]
    fn remove_clears_caps_and_demand() {
        let mut player = TestPlayer::new();
        player.inner.execute(crate::player::tasks::PlayerTask::AttachSource { source: aac_source() });
        player.inner.context.audio_need_data = true;

        player.inner.execute(crate::player::tasks::PlayerTask::RemoveSource {
            source_type: MediaSourceType::Audio,
        });
        assert!(player.inner.context.audio_caps.is_none());
        assert!(!player.inner.context.audio_need_data);
    }
}
