//! Need-data / enough-data / underflow / EOS / bus-driven tasks

use playout_common::{MediaSourceType, NetworkState, PlaybackState, QosInfo};
use tracing::{debug, info, warn};

use crate::player::backend::TargetState;
use crate::player::inner::PlayerInner;
use crate::player::tasks::rate;

/// The pipeline wants more samples on `source_type`. One notification is
/// in flight per source at a time: while the flag is raised, the demand
/// has been forwarded and not yet answered.
pub(crate) fn need_data(inner: &mut PlayerInner, source_type: MediaSourceType) {
    if inner.context.need_data(source_type) {
        return;
    }
    inner.context.set_need_data(source_type, true);
    if !inner.client.notify_need_media_data(source_type) {
        warn!("Could not forward {} data demand, dropping it", source_type);
        inner.context.set_need_data(source_type, false);
    }
}

pub(crate) fn enough_data(inner: &mut PlayerInner, source_type: MediaSourceType) {
    inner.context.set_need_data(source_type, false);
}

/// Raises the underflow flag and reports stalled buffering to the client.
pub(crate) fn underflow(inner: &mut PlayerInner, source_type: MediaSourceType) {
    if inner.context.underflow(source_type) {
        return;
    }
    info!("{} underflow", source_type);
    inner.context.set_underflow(source_type, true);
    inner.client.notify_network_state(NetworkState::Buffering);
}

/// Marks the source finished and pushes EOS into the pipeline.
pub(crate) fn set_eos(inner: &mut PlayerInner, source_type: MediaSourceType) {
    if inner.context.caps_for(source_type).is_none() {
        warn!("EOS for unattached {} source", source_type);
        return;
    }
    inner.context.set_eos(source_type, true);
    if let Err(err) = inner.backend.end_of_stream(source_type) {
        warn!("Failed to push {} EOS: {}", source_type, err);
    }
}

pub(crate) fn bus_state_changed(
    inner: &mut PlayerInner,
    old: TargetState,
    new: TargetState,
    pending: TargetState,
) {
    debug!("Pipeline state changed {} -> {} (pending {})", old, new, pending);
    match new {
        TargetState::Paused => inner.client.notify_playback_state(PlaybackState::Paused),
        TargetState::Playing => {
            inner.client.notify_playback_state(PlaybackState::Playing);
            rate::apply_pending_rate(inner);
        }
        TargetState::Null | TargetState::Ready => {}
    }
}

pub(crate) fn bus_eos(inner: &mut PlayerInner) {
    info!("Pipeline reached end of stream");
    inner.client.notify_playback_state(PlaybackState::EndOfStream);
}

/// A fatal bus error: the pipeline is no longer usable for playback.
pub(crate) fn bus_error(inner: &mut PlayerInner, message: &str) {
    warn!("Pipeline error: {}", message);
    inner.stop_position_timer();
    inner.client.notify_network_state(NetworkState::DecodeError);
    inner.client.notify_playback_state(PlaybackState::Failure);
}

pub(crate) fn qos(inner: &mut PlayerInner, source_type: MediaSourceType, info: QosInfo) {
    inner.client.notify_qos(source_type, info);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::tasks::PlayerTask;
    use crate::player::testing::TestPlayer;

    #[test]
    fn need_data_raises_flag_and_notifies_once() {
        let mut player = TestPlayer::new();
        player.inner.execute(PlayerTask::NeedData { source_type: MediaSourceType::Audio });
        player.inner.execute(PlayerTask::NeedData { source_type: MediaSourceType::Audio });

        assert!(player.inner.context.audio_need_data);
        assert_eq!(player.sink.need_data_calls(), vec![MediaSourceType::Audio]);
    }

    #[test]
    fn rejected_demand_clears_the_flag() {
        let mut player = TestPlayer::new();
        player.sink.reject_need_data();
        player.inner.execute(PlayerTask::NeedData { source_type: MediaSourceType::Video });
        assert!(!player.inner.context.video_need_data);
    }

    #[test]
    fn enough_data_clears_the_flag() {
        let mut player = TestPlayer::new();
        player.inner.execute(PlayerTask::NeedData { source_type: MediaSourceType::Audio });
        player.inner.execute(PlayerTask::EnoughData { source_type: MediaSourceType::Audio });
        assert!(!player.inner.context.audio_need_data);
    }

    #[test]
    fn underflow_reports_buffering_once() {
        let mut player = TestPlayer::new();
        player.inner.execute(PlayerTask::Underflow { source_type: MediaSourceType::Audio });
        player.inner.execute(PlayerTask::Underflow { source_type: MediaSourceType::Audio });
        assert!(player.inner.context.audio_underflow);
        assert_eq!(player.sink.network_states(), vec![NetworkState::Buffering]);
    }

    #[test]
    fn bus_error_surfaces_decode_error_and_failure() {
        let mut player = TestPlayer::new();
        player.inner.execute(PlayerTask::HandleBusError { message: "decoder died".into() });
        assert_eq!(player.sink.network_states(), vec![NetworkState::DecodeError]);
        assert_eq!(player.sink.last_playback_state(), Some(PlaybackState::Failure));
    }

    #[test]
    fn qos_is_forwarded() {
        let mut player = TestPlayer::new();
        let info = QosInfo { processed: 100, dropped: 3 };
        player.inner.execute(PlayerTask::HandleQos { source_type: MediaSourceType::Video, info });
        assert_eq!(player.sink.qos_calls(), vec![(MediaSourceType::Video, info)]);
    }
}
