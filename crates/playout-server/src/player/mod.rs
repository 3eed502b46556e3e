//! Per-session playback engine
//!
//! [`GstPlayer`] fronts one pipeline with a worker thread (the single
//! mutator of the player context), a bus dispatcher thread, and the task
//! set executed between them. The pipeline itself sits behind the
//! capability traits in [`backend`]; the real GStreamer implementation
//! lives in [`gst_backend`].

pub mod backend;
pub mod client;
pub mod context;
pub mod dispatcher;
#[cfg(feature = "gst")]
pub mod gst_backend;
pub mod inner;
pub mod tasks;
#[cfg(test)]
pub(crate) mod testing;
pub mod timer;
pub mod worker;

use std::sync::mpsc;
use std::sync::Arc;

use playout_common::{MediaSegment, MediaSource, MediaSourceType, MediaType, VideoRequirements};

use crate::cdm::SampleDecryptor;
use crate::error::PlayerError;

use backend::{PlayerBackend, PlayerBackendFactory, PlayerSignals, VideoGeometry};
use client::PlayerEventSink;
use dispatcher::DispatcherThread;
use inner::{PlayerConfig, PlayerInner};
use tasks::PlayerTask;
use worker::WorkerThread;

/// Object-safe playback surface the session layer drives.
pub trait Player: Send + Sync {
    fn attach_source(&self, source: MediaSource) -> Result<(), PlayerError>;
    fn remove_source(&self, source_type: MediaSourceType) -> Result<(), PlayerError>;
    fn play(&self) -> Result<(), PlayerError>;
    fn pause(&self) -> Result<(), PlayerError>;
    fn stop(&self) -> Result<(), PlayerError>;
    fn attach_samples(&self, segments: Vec<MediaSegment>) -> Result<(), PlayerError>;
    fn set_position(&self, position_ns: i64) -> Result<(), PlayerError>;
    fn set_video_geometry(&self, geometry: VideoGeometry) -> Result<(), PlayerError>;
    fn set_eos(&self, source_type: MediaSourceType) -> Result<(), PlayerError>;
    fn set_playback_rate(&self, rate: f64) -> Result<(), PlayerError>;
    fn render_frame(&self) -> Result<(), PlayerError>;
    /// Read-only position query; safe off the worker thread.
    fn get_position(&self) -> Option<i64>;
}

/// Creates players; the daemon wires the GStreamer-backed factory, tests
/// substitute mocks at the service layer.
pub trait PlayerFactory: Send + Sync {
    fn create_player(
        &self,
        session_id: i32,
        client: Arc<dyn PlayerEventSink>,
        decryptor: Arc<dyn SampleDecryptor>,
        media_type: MediaType,
        video_requirements: VideoRequirements,
        config: PlayerConfig,
    ) -> Result<Box<dyn Player>, PlayerError>;
}

/// Production factory: GStreamer pipelines behind [`GstPlayer`] workers.
#[cfg(feature = "gst")]
pub struct GstPlayerFactory {
    backend_factory: gst_backend::GstBackendFactory,
}

#[cfg(feature = "gst")]
impl GstPlayerFactory {
    pub fn new() -> Result<Self, PlayerError> {
        Ok(Self { backend_factory: gst_backend::GstBackendFactory::new()? })
    }
}

#[cfg(feature = "gst")]
impl PlayerFactory for GstPlayerFactory {
    fn create_player(
        &self,
        session_id: i32,
        client: Arc<dyn PlayerEventSink>,
        decryptor: Arc<dyn SampleDecryptor>,
        media_type: MediaType,
        video_requirements: VideoRequirements,
        config: PlayerConfig,
    ) -> Result<Box<dyn Player>, PlayerError> {
        let player = GstPlayer::new(
            session_id,
            client,
            decryptor,
            media_type,
            video_requirements,
            &self.backend_factory,
            config,
        )?;
        Ok(Box::new(player))
    }
}

/// The production player: one worker thread, one bus dispatcher, one
/// pipeline backend.
pub struct GstPlayer {
    worker: WorkerThread,
    _dispatcher: DispatcherThread,
    backend: Arc<dyn PlayerBackend>,
}

impl GstPlayer {
    pub fn new(
        session_id: i32,
        client: Arc<dyn PlayerEventSink>,
        decryptor: Arc<dyn SampleDecryptor>,
        media_type: MediaType,
        video_requirements: VideoRequirements,
        backend_factory: &dyn PlayerBackendFactory,
        config: PlayerConfig,
    ) -> Result<Self, PlayerError> {
        let (task_tx, task_rx) = mpsc::channel();
        let signals = PlayerSignals::new(task_tx.clone());
        let parts = backend_factory.create(media_type, &video_requirements, signals)?;

        let inner =
            PlayerInner::new(parts.backend.clone(), client, decryptor, config, task_tx.clone());
        let worker = WorkerThread::spawn(session_id, inner, task_tx.clone(), task_rx);
        let dispatcher = DispatcherThread::spawn(session_id, parts.bus, parts.waker, task_tx);

        Ok(Self { worker, _dispatcher: dispatcher, backend: parts.backend })
    }

    fn post(&self, task: PlayerTask) -> Result<(), PlayerError> {
        self.worker.post(task)
    }
}

impl Player for GstPlayer {
    fn attach_source(&self, source: MediaSource) -> Result<(), PlayerError> {
        self.post(PlayerTask::AttachSource { source })
    }

    fn remove_source(&self, source_type: MediaSourceType) -> Result<(), PlayerError> {
        self.post(PlayerTask::RemoveSource { source_type })
    }

    fn play(&self) -> Result<(), PlayerError> {
        self.post(PlayerTask::Play)
    }

    fn pause(&self) -> Result<(), PlayerError> {
        self.post(PlayerTask::Pause)
    }

    fn stop(&self) -> Result<(), PlayerError> {
        self.post(PlayerTask::Stop)
    }

    fn attach_samples(&self, segments: Vec<MediaSegment>) -> Result<(), PlayerError> {
        self.post(PlayerTask::AttachSamples { segments })
    }

    fn set_position(&self, position_ns: i64) -> Result<(), PlayerError> {
        self.post(PlayerTask::SetPosition { position_ns })
    }

    fn set_video_geometry(&self, geometry: VideoGeometry) -> Result<(), PlayerError> {
        self.post(PlayerTask::SetVideoGeometry { geometry })
    }

    fn set_eos(&self, source_type: MediaSourceType) -> Result<(), PlayerError> {
        self.post(PlayerTask::SetEos { source_type })
    }

    fn set_playback_rate(&self, rate: f64) -> Result<(), PlayerError> {
        self.post(PlayerTask::SetPlaybackRate { rate })
    }

    fn render_frame(&self) -> Result<(), PlayerError> {
        self.post(PlayerTask::RenderFrame)
    }

    fn get_position(&self) -> Option<i64> {
        self.backend.query_position_ns()
    }
}
