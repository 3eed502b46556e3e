//! Source and element setup tasks

use tracing::{debug, info, warn};

use crate::player::backend::{TargetState, VideoGeometry};
use crate::player::inner::PlayerInner;

/// The pipeline announced its source element. Start the deadline that
/// finalises setup with whatever sources are attached by then.
pub(crate) fn setup_source(inner: &mut PlayerInner) {
    inner.context.source_ready = true;
    inner.schedule_source_setup_finish();
}

/// The pipeline announced a newly added element. Deferred configuration
/// (the video rectangle in particular) is applied here.
pub(crate) fn setup_element(inner: &mut PlayerInner, element_name: &str) {
    debug!("Configuring element '{}'", element_name);
    if inner.backend.configure_element(element_name, inner.context.pending_geometry)
        && inner.context.pending_geometry.is_some()
        && element_name.starts_with("westerossink")
    {
        inner.context.pending_geometry = None;
    }
}

/// Commits the initial pipeline state once sources are ready (or the
/// deadline expired).
pub(crate) fn finish_source_setup(inner: &mut PlayerInner) {
    inner.cancel_source_setup_timer();
    if inner.context.initial_state_committed {
        return;
    }
    if !inner.context.source_ready {
        warn!("Finishing source setup before the source element appeared");
    }
    info!("Committing initial pipeline state");
    if inner.change_pipeline_state(TargetState::Paused) {
        inner.context.initial_state_committed = true;
    }
}

/// Applies the video window rectangle now or, before the sink exists,
/// remembers it for element setup.
pub(crate) fn set_video_geometry(inner: &mut PlayerInner, geometry: VideoGeometry) {
    if inner.backend.set_video_rectangle(geometry) {
        inner.context.pending_geometry = None;
    } else {
        debug!("Video sink not available yet, deferring rectangle");
        inner.context.pending_geometry = Some(geometry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::tasks::PlayerTask;
    use crate::player::testing::TestPlayer;

    #[test]
    fn finish_source_setup_commits_paused_once() {
        let mut player = TestPlayer::new();
        player.inner.execute(PlayerTask::SetupSource);
        player.inner.execute(PlayerTask::FinishSourceSetup);
        assert!(player.inner.context.initial_state_committed);
        assert_eq!(player.backend.current_state(), TargetState::Paused);

        let changes = player.backend.state_changes();
        player.inner.execute(PlayerTask::FinishSourceSetup);
        assert_eq!(player.backend.state_changes(), changes);
    }

    #[test]
    fn geometry_is_deferred_until_the_sink_exists() {
        let mut player = TestPlayer::new();
        player.backend.reject_video_rectangle();
        let geometry = VideoGeometry { x: 0, y: 0, width: 1280, height: 720 };

        player.inner.execute(PlayerTask::SetVideoGeometry { geometry });
        assert_eq!(player.inner.context.pending_geometry, Some(geometry));

        player.backend.accept_video_rectangle();
        player.inner.execute(PlayerTask::SetupElement { element_name: "westerossink0".into() });
        assert_eq!(player.inner.context.pending_geometry, None);
        assert_eq!(player.backend.configured_elements(), vec!["westerossink0".to_string()]);
    }
}
