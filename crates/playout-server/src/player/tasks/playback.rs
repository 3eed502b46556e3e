//! Play / Pause / Stop / RenderFrame tasks

use playout_common::PlaybackState;
use tracing::{debug, warn};

use crate::player::backend::TargetState;
use crate::player::inner::PlayerInner;

pub(crate) fn play(inner: &mut PlayerInner) {
    if inner.change_pipeline_state(TargetState::Playing) {
        inner.start_position_timer();
    }
}

pub(crate) fn pause(inner: &mut PlayerInner) {
    inner.stop_position_timer();
    inner.change_pipeline_state(TargetState::Paused);
}

/// Tears the pipeline down to NULL and clears outstanding demand.
/// The NULL transition produces no bus traffic, so the stopped state is
/// notified directly.
pub(crate) fn stop(inner: &mut PlayerInner) {
    inner.stop_position_timer();
    inner.cancel_source_setup_timer();
    if inner.change_pipeline_state(TargetState::Null) {
        inner.client.notify_playback_state(PlaybackState::Stopped);
    }
    inner.context.audio_need_data = false;
    inner.context.video_need_data = false;
    inner.context.pending_playback_rate = None;
}

pub(crate) fn render_frame(inner: &mut PlayerInner) {
    match inner.backend.render_preroll_frame() {
        Ok(()) => debug!("Rendered preroll frame"),
        Err(err) => warn!("Render frame failed: {}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::tasks::PlayerTask;
    use crate::player::testing::TestPlayer;

    #[test]
    fn stop_clears_demand_flags_and_pending_rate() {
        let mut player = TestPlayer::new();
        player.inner.context.audio_need_data = true;
        player.inner.context.video_need_data = true;
        player.inner.context.pending_playback_rate = Some(2.0);

        player.inner.execute(PlayerTask::Stop);

        assert!(!player.inner.context.audio_need_data);
        assert!(!player.inner.context.video_need_data);
        assert_eq!(player.inner.context.pending_playback_rate, None);
        assert_eq!(player.backend.current_state(), TargetState::Null);
        assert_eq!(player.sink.last_playback_state(), Some(PlaybackState::Stopped));
    }

    #[test]
    fn play_moves_pipeline_to_playing() {
        let mut player = TestPlayer::new();
        player.inner.execute(PlayerTask::Play);
        assert_eq!(player.backend.current_state(), TargetState::Playing);
    }

    #[test]
    fn failed_state_change_is_surfaced_as_failure() {
        let mut player = TestPlayer::new();
        player.backend.fail_next_state_change();
        player.inner.execute(PlayerTask::Play);
        assert_eq!(player.sink.last_playback_state(), Some(PlaybackState::Failure));
    }
}
