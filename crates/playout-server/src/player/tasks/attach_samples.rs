//! AttachSamples task: decrypt, refresh caps, push into the pipeline

use playout_common::{MediaKeyErrorStatus, MediaSegment, MediaSourceType};
use tracing::{debug, warn};

use crate::player::backend::SampleBuffer;
use crate::player::inner::PlayerInner;

/// Pushes a batch of segments. Caps are refreshed lazily: audio on a
/// rate/channel change, video on a width/height change. Encrypted
/// payloads go through the decryptor first; a failed sample is dropped,
/// the batch continues.
pub(crate) fn attach_samples(inner: &mut PlayerInner, segments: Vec<MediaSegment>) {
    let mut saw_audio = false;
    let mut saw_video = false;

    for segment in segments {
        match segment.source_type {
            MediaSourceType::Audio => saw_audio = true,
            MediaSourceType::Video => saw_video = true,
            MediaSourceType::Unknown => {
                warn!("Dropping segment with unknown source type");
                continue;
            }
        }
        if inner.context.caps_for(segment.source_type).is_none() {
            warn!("Dropping {} segment for unattached source", segment.source_type);
            continue;
        }

        update_caps_for_segment(inner, &segment);

        let mut payload = segment.data.to_vec();
        if segment.encrypted {
            let status = inner.decryptor.decrypt(
                segment.media_key_session_id,
                &mut payload,
                &segment.sub_samples,
                &segment.init_vector,
                &segment.key_id,
                segment.init_with_last_15,
            );
            if status != MediaKeyErrorStatus::Ok {
                warn!(
                    "Decrypt failed ({:?}) for key session {}, dropping sample",
                    status, segment.media_key_session_id
                );
                continue;
            }
        }

        let sample = SampleBuffer {
            timestamp_ns: segment.timestamp_ns,
            duration_ns: segment.duration_ns,
            data: payload,
        };
        if let Err(err) = inner.backend.push_sample(segment.source_type, sample) {
            warn!("Failed to push {} sample: {}", segment.source_type, err);
        }
    }

    // The batch answers the outstanding demand and ends any underflow on
    // the sources it fed; fresh signals will raise both again.
    if saw_audio {
        inner.context.audio_need_data = false;
        inner.context.audio_underflow = false;
    }
    if saw_video {
        inner.context.video_need_data = false;
        inner.context.video_underflow = false;
    }
}

fn update_caps_for_segment(inner: &mut PlayerInner, segment: &MediaSegment) {
    let Some(current) = inner.context.caps_for(segment.source_type) else {
        return;
    };
    let mut caps = current.clone();
    let changed = match segment.source_type {
        MediaSourceType::Audio => {
            let changed = (segment.sample_rate != 0 && segment.sample_rate != caps.sample_rate)
                || (segment.channels != 0 && segment.channels != caps.channels);
            if changed {
                caps.sample_rate = segment.sample_rate;
                caps.channels = segment.channels;
            }
            changed
        }
        MediaSourceType::Video => {
            let changed = (segment.width != 0 && segment.width != caps.width)
                || (segment.height != 0 && segment.height != caps.height);
            if changed {
                caps.width = segment.width;
                caps.height = segment.height;
            }
            changed
        }
        MediaSourceType::Unknown => false,
    };

    if changed {
        debug!("Updating {} caps from segment", segment.source_type);
        inner.backend.set_source_caps(segment.source_type, &caps);
        inner.context.set_caps(segment.source_type, Some(caps));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::tasks::PlayerTask;
    use crate::player::testing::TestPlayer;
    use bytes::Bytes;
    use playout_common::{AudioConfig, MediaSource};

    fn attach_audio(player: &mut TestPlayer) {
        let source = MediaSource::new_audio(
            "audio/mp4",
            AudioConfig { channels: 2, sample_rate: 48_000, codec_specific_config: vec![] },
        );
        player.inner.execute(PlayerTask::AttachSource { source });
    }

    fn attach_video(player: &mut TestPlayer) {
        let source = MediaSource::new_video("video/h264");
        player.inner.execute(PlayerTask::AttachSource { source });
    }

    #[test]
    fn samples_are_pushed_and_demand_cleared() {
        let mut player = TestPlayer::new();
        attach_audio(&mut player);
        player.inner.context.audio_need_data = true;
        player.inner.context.audio_underflow = true;

        let segment = MediaSegment::new_audio(0, 21_333, 48_000, 2, Bytes::from_static(b"aac"));
        player.inner.execute(PlayerTask::AttachSamples { segments: vec![segment] });

        assert_eq!(player.backend.pushed(MediaSourceType::Audio), 1);
        assert!(!player.inner.context.audio_need_data);
        assert!(!player.inner.context.audio_underflow);
    }

    #[test]
    fn video_caps_follow_dimension_changes() {
        let mut player = TestPlayer::new();
        attach_video(&mut player);

        let first = MediaSegment::new_video(0, 0, 1280, 720, Bytes::from_static(b"a"));
        let same = MediaSegment::new_video(1, 0, 1280, 720, Bytes::from_static(b"b"));
        let larger = MediaSegment::new_video(2, 0, 1920, 1080, Bytes::from_static(b"c"));
        player.inner.execute(PlayerTask::AttachSamples { segments: vec![first, same, larger] });

        let updates = player.backend.caps_updates(MediaSourceType::Video);
        assert_eq!(updates.len(), 2);
        assert_eq!((updates[1].width, updates[1].height), (1920, 1080));
    }

    #[test]
    fn encrypted_samples_are_decrypted_before_push() {
        let mut player = TestPlayer::new();
        attach_video(&mut player);

        let mut segment = MediaSegment::new_video(0, 0, 0, 0, Bytes::from_static(&[0x0f, 0xf0]));
        segment.encrypted = true;
        segment.media_key_session_id = 3;
        segment.key_id = vec![0xaa];
        player.inner.execute(PlayerTask::AttachSamples { segments: vec![segment] });

        assert_eq!(player.decryptor.calls(), 1);
        // The test decryptor inverts every byte.
        assert_eq!(player.backend.last_pushed_data(MediaSourceType::Video), Some(vec![0xf0, 0x0f]));
    }

    #[test]
    fn failed_decrypt_drops_the_sample_only() {
        let mut player = TestPlayer::new();
        attach_video(&mut player);
        player.decryptor.fail_next();

        let mut encrypted = MediaSegment::new_video(0, 0, 0, 0, Bytes::from_static(b"x"));
        encrypted.encrypted = true;
        let clear = MediaSegment::new_video(1, 0, 0, 0, Bytes::from_static(b"y"));
        player.inner.execute(PlayerTask::AttachSamples { segments: vec![encrypted, clear] });

        assert_eq!(player.backend.pushed(MediaSourceType::Video), 1);
    }

    #[test]
    fn segments_for_unattached_sources_are_dropped() {
        let mut player = TestPlayer::new();
        let segment = MediaSegment::new_audio(0, 0, 48_000, 2, Bytes::from_static(b"z"));
        player.inner.execute(PlayerTask::AttachSamples { segments: vec![segment] });
        assert_eq!(player.backend.pushed(MediaSourceType::Audio), 0);
    }
}
