//! Worker-side player state and task dispatch

use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;

use playout_common::PlaybackState;
use tracing::{debug, warn};

use super::backend::{PlayerBackend, TargetState};
use super::client::PlayerEventSink;
use super::context::PlayerContext;
use super::tasks::{self, PlayerTask};
use super::timer::Timer;
use crate::cdm::SampleDecryptor;

/// Timing policy handed to the worker.
#[derive(Debug, Clone, Copy)]
pub struct PlayerConfig {
    pub position_report_interval: Duration,
    pub source_setup_timeout: Duration,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            position_report_interval: Duration::from_millis(250),
            source_setup_timeout: Duration::from_millis(200),
        }
    }
}

/// Everything the worker thread owns for one session.
pub(crate) struct PlayerInner {
    pub context: PlayerContext,
    pub backend: Arc<dyn PlayerBackend>,
    pub client: Arc<dyn PlayerEventSink>,
    pub decryptor: Arc<dyn SampleDecryptor>,
    pub config: PlayerConfig,
    task_tx: Sender<PlayerTask>,
    position_timer: Option<Timer>,
    source_setup_timer: Option<Timer>,
}

impl PlayerInner {
    pub fn new(
        backend: Arc<dyn PlayerBackend>,
        client: Arc<dyn PlayerEventSink>,
        decryptor: Arc<dyn SampleDecryptor>,
        config: PlayerConfig,
        task_tx: Sender<PlayerTask>,
    ) -> Self {
        Self {
            context: PlayerContext::new(),
            backend,
            client,
            decryptor,
            config,
            task_tx,
            position_timer: None,
            source_setup_timer: None,
        }
    }

    pub fn execute(&mut self, task: PlayerTask) {
        match task {
            PlayerTask::AttachSource { source } => tasks::attach_source::attach_source(self, source),
            PlayerTask::RemoveSource { source_type } => {
                tasks::attach_source::remove_source(self, source_type)
            }
            PlayerTask::SetupSource => tasks::source_setup::setup_source(self),
            PlayerTask::SetupElement { element_name } => {
                tasks::source_setup::setup_element(self, &element_name)
            }
            PlayerTask::FinishSourceSetup => tasks::source_setup::finish_source_setup(self),
            PlayerTask::Play => tasks::playback::play(self),
            PlayerTask::Pause => tasks::playback::pause(self),
            PlayerTask::Stop => tasks::playback::stop(self),
            PlayerTask::SetPosition { position_ns } => tasks::position::set_position(self, position_ns),
            PlayerTask::SetPlaybackRate { rate } => tasks::rate::set_playback_rate(self, rate),
            PlayerTask::SetVideoGeometry { geometry } => {
                tasks::source_setup::set_video_geometry(self, geometry)
            }
            PlayerTask::RenderFrame => tasks::playback::render_frame(self),
            PlayerTask::NeedData { source_type } => tasks::data_flow::need_data(self, source_type),
            PlayerTask::EnoughData { source_type } => tasks::data_flow::enough_data(self, source_type),
            PlayerTask::AttachSamples { segments } => {
                tasks::attach_samples::attach_samples(self, segments)
            }
            PlayerTask::Underflow { source_type } => tasks::data_flow::underflow(self, source_type),
            PlayerTask::SetEos { source_type } => tasks::data_flow::set_eos(self, source_type),
            PlayerTask::ReportPosition => tasks::position::report_position(self),
            PlayerTask::HandleBusStateChanged { old, new, pending } => {
                tasks::data_flow::bus_state_changed(self, old, new, pending)
            }
            PlayerTask::HandleBusEos => tasks::data_flow::bus_eos(self),
            PlayerTask::HandleBusError { message } => tasks::data_flow::bus_error(self, &message),
            PlayerTask::HandleQos { source_type, info } => {
                tasks::data_flow::qos(self, source_type, info)
            }
            PlayerTask::Shutdown => {}
        }
    }

    /// Final cleanup once the task loop has exited.
    pub fn shutdown(&mut self) {
        self.stop_position_timer();
        self.cancel_source_setup_timer();
    }

    /// Requests a pipeline state; a refusal is surfaced to the client as
    /// a playback failure.
    pub fn change_pipeline_state(&mut self, target: TargetState) -> bool {
        match self.backend.change_state(target) {
            Ok(()) => true,
            Err(err) => {
                warn!("Pipeline state change to {} failed: {}", target, err);
                self.client.notify_playback_state(PlaybackState::Failure);
                false
            }
        }
    }

    pub fn start_position_timer(&mut self) {
        if self.position_timer.is_some() {
            return;
        }
        let tx = self.task_tx.clone();
        self.position_timer = Some(Timer::periodic(self.config.position_report_interval, move || {
            let _ = tx.send(PlayerTask::ReportPosition);
        }));
    }

    pub fn stop_position_timer(&mut self) {
        if let Some(timer) = self.position_timer.take() {
            timer.cancel();
        }
    }

    /// Schedules the deadline that finalises source setup with whatever
    /// sources are known by then.
    pub fn schedule_source_setup_finish(&mut self) {
        if self.source_setup_timer.is_some() || self.context.initial_state_committed {
            return;
        }
        debug!("Scheduling source setup finish in {:?}", self.config.source_setup_timeout);
        let tx = self.task_tx.clone();
        self.source_setup_timer = Some(Timer::one_shot(self.config.source_setup_timeout, move || {
            let _ = tx.send(PlayerTask::FinishSourceSetup);
        }));
    }

    pub fn cancel_source_setup_timer(&mut self) {
        if let Some(timer) = self.source_setup_timer.take() {
            timer.cancel();
        }
    }
}
