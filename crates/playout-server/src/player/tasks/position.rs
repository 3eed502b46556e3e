//! SetPosition / position reporting tasks

use playout_common::PlaybackState;
use tracing::warn;

use crate::player::inner::PlayerInner;

/// Seeks the pipeline. EOS and underflow markers from before the seek are
/// meaningless afterwards and are cleared; the seeking / flushed state
/// pair brackets the operation toward the client.
pub(crate) fn set_position(inner: &mut PlayerInner, position_ns: i64) {
    inner.client.notify_playback_state(PlaybackState::Seeking);

    inner.context.audio_eos = false;
    inner.context.video_eos = false;
    inner.context.audio_underflow = false;
    inner.context.video_underflow = false;
    inner.context.audio_need_data = false;
    inner.context.video_need_data = false;

    match inner.backend.seek_to(position_ns) {
        Ok(()) => {
            inner.context.last_position_ns = position_ns;
            inner.client.notify_playback_state(PlaybackState::Flushed);
        }
        Err(err) => {
            warn!("Seek to {} ns failed: {}", position_ns, err);
            inner.client.notify_playback_state(PlaybackState::Failure);
        }
    }
}

/// Periodic tick: report the pipeline position to the client.
pub(crate) fn report_position(inner: &mut PlayerInner) {
    if let Some(position_ns) = inner.backend.query_position_ns() {
        inner.context.last_position_ns = position_ns;
        inner.client.notify_position(position_ns);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::tasks::PlayerTask;
    use crate::player::testing::TestPlayer;

    #[test]
    fn seek_clears_eos_underflow_and_demand() {
        let mut player = TestPlayer::new();
        player.inner.context.audio_eos = true;
        player.inner.context.video_underflow = true;
        player.inner.context.audio_need_data = true;

        player.inner.execute(PlayerTask::SetPosition { position_ns: 5_000_000_000 });

        assert!(!player.inner.context.audio_eos);
        assert!(!player.inner.context.video_underflow);
        assert!(!player.inner.context.audio_need_data);
        assert_eq!(player.backend.last_seek(), Some(5_000_000_000));
        assert_eq!(
            player.sink.playback_states(),
            vec![PlaybackState::Seeking, PlaybackState::Flushed]
        );
    }

    #[test]
    fn failed_seek_surfaces_failure() {
        let mut player = TestPlayer::new();
        player.backend.fail_next_seek();
        player.inner.execute(PlayerTask::SetPosition { position_ns: 1 });
        assert_eq!(player.sink.last_playback_state(), Some(PlaybackState::Failure));
    }

    #[test]
    fn position_tick_reports_to_client() {
        let mut player = TestPlayer::new();
        player.backend.set_position(42_000);
        player.inner.execute(PlayerTask::ReportPosition);
        assert_eq!(player.sink.positions(), vec![42_000]);
        assert_eq!(player.inner.context.last_position_ns, 42_000);
    }
}
