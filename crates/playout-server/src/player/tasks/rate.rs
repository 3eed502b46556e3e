//! SetPlaybackRate task and deferred rate application

use tracing::{debug, info, warn};

use crate::player::backend::TargetState;
use crate::player::inner::PlayerInner;

/// Applies or defers a rate change. Below PLAYING the rate is stashed and
/// applied on the next transition into PLAYING.
pub(crate) fn set_playback_rate(inner: &mut PlayerInner, rate: f64) {
    if inner.context.playback_rate == rate {
        debug!("Playback rate already {}", rate);
        return;
    }

    if inner.backend.current_state() < TargetState::Playing {
        info!("Pipeline below PLAYING, deferring playback rate {}", rate);
        inner.context.pending_playback_rate = Some(rate);
        return;
    }

    inner.context.pending_playback_rate = None;
    apply_rate(inner, rate);
}

/// Applies a rate stashed while the pipeline was below PLAYING. Called on
/// the transition into PLAYING.
pub(crate) fn apply_pending_rate(inner: &mut PlayerInner) {
    if let Some(rate) = inner.context.pending_playback_rate.take() {
        apply_rate(inner, rate);
    }
}

fn apply_rate(inner: &mut PlayerInner, rate: f64) {
    // Sinks of the amlhalasink family ignore the instant-rate-change
    // event and take the rate from a fresh segment on their sink pad.
    let success = match inner.backend.audio_sink_name() {
        Some(name) if name.starts_with("amlhalasink") => {
            inner.backend.send_audio_sink_segment_rate(rate)
        }
        _ => inner.backend.send_instant_rate_change(rate),
    };

    if success {
        info!("Playback rate set to {}", rate);
        inner.context.playback_rate = rate;
    } else {
        warn!("Failed to set playback rate {}", rate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::tasks::PlayerTask;
    use crate::player::testing::TestPlayer;

    #[test]
    fn rate_below_playing_is_deferred_then_applied() {
        let mut player = TestPlayer::new();
        player.backend.force_state(TargetState::Paused);

        player.inner.execute(PlayerTask::SetPlaybackRate { rate: 2.0 });
        assert_eq!(player.inner.context.pending_playback_rate, Some(2.0));
        assert_eq!(player.inner.context.playback_rate, 1.0);
        assert!(player.backend.instant_rate_changes().is_empty());

        player.backend.force_state(TargetState::Playing);
        player.inner.execute(PlayerTask::HandleBusStateChanged {
            old: TargetState::Paused,
            new: TargetState::Playing,
            pending: TargetState::Null,
        });

        assert_eq!(player.inner.context.pending_playback_rate, None);
        assert_eq!(player.inner.context.playback_rate, 2.0);
        assert_eq!(player.backend.instant_rate_changes(), vec![2.0]);
    }

    #[test]
    fn rate_while_playing_is_applied_immediately() {
        let mut player = TestPlayer::new();
        player.backend.force_state(TargetState::Playing);
        player.inner.execute(PlayerTask::SetPlaybackRate { rate: 0.5 });
        assert_eq!(player.inner.context.playback_rate, 0.5);
        assert_eq!(player.backend.instant_rate_changes(), vec![0.5]);
    }

    #[test]
    fn unchanged_rate_is_a_no_op() {
        let mut player = TestPlayer::new();
        player.backend.force_state(TargetState::Playing);
        player.inner.execute(PlayerTask::SetPlaybackRate { rate: 1.0 });
        assert!(player.backend.instant_rate_changes().is_empty());
    }

    #[test]
    fn amlhalasink_takes_the_segment_path() {
        let mut player = TestPlayer::new();
        player.backend.force_state(TargetState::Playing);
        player.backend.set_audio_sink_name("amlhalasink0");
        player.inner.execute(PlayerTask::SetPlaybackRate { rate: 2.0 });
        assert!(player.backend.instant_rate_changes().is_empty());
        assert_eq!(player.backend.segment_rates(), vec![2.0]);
        assert_eq!(player.inner.context.playback_rate, 2.0);
    }
}
