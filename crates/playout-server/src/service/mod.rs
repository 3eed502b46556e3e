//! Playback service: the top-level session coordinator
//!
//! The service owns the session registry and serializes every mutating
//! operation on one task ([`spawn`]); RPC handlers talk to it through a
//! [`ServiceHandle`]. Per-session work never runs here; it is posted to
//! the session's worker thread by the player facade.

pub mod capabilities;
pub mod session;

use std::collections::HashMap;
use std::sync::Arc;

use playout_common::{
    MediaSource, MediaSourceStatus, MediaType, ServerConfig, SessionId, VideoRequirements,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::cdm::SampleDecryptor;
use crate::error::PlaybackError;
use crate::player::backend::VideoGeometry;
use crate::player::inner::PlayerConfig;
use crate::player::PlayerFactory;
use crate::shm::SharedMemoryBuffer;

use session::{EventSender, PlaybackSession};

/// Top-level coordinator of the daemon's playback slots.
pub struct PlaybackService {
    config: ServerConfig,
    shm: Arc<SharedMemoryBuffer>,
    player_factory: Arc<dyn PlayerFactory>,
    decryptor: Arc<dyn SampleDecryptor>,
    sessions: HashMap<i32, PlaybackSession>,
    next_session_id: i32,
}

impl PlaybackService {
    pub fn new(
        config: ServerConfig,
        shm: Arc<SharedMemoryBuffer>,
        player_factory: Arc<dyn PlayerFactory>,
        decryptor: Arc<dyn SampleDecryptor>,
    ) -> Self {
        Self {
            config,
            shm,
            player_factory,
            decryptor,
            sessions: HashMap::new(),
            next_session_id: 0,
        }
    }

    fn player_config(&self) -> PlayerConfig {
        PlayerConfig {
            position_report_interval: self.config.position_report_interval(),
            source_setup_timeout: self.config.source_setup_timeout(),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn create_session(
        &mut self,
        client_id: u64,
        requirements: VideoRequirements,
        events: EventSender,
    ) -> Result<SessionId, PlaybackError> {
        if self.sessions.len() >= self.config.max_playbacks as usize {
            warn!("Rejecting session: all {} slots in use", self.config.max_playbacks);
            return Err(PlaybackError::SlotsExhausted {
                max_playbacks: self.config.max_playbacks,
            });
        }
        let session_id = SessionId(self.next_session_id);
        self.shm.map_partition(session_id).map_err(|err| PlaybackError::Rejected {
            reason: format!("no shared memory partition: {err}"),
        })?;
        self.next_session_id += 1;

        let session =
            PlaybackSession::new(session_id, client_id, requirements, events, self.shm.clone());
        self.sessions.insert(session_id.0, session);
        info!("Session {} created for client {}", session_id, client_id);
        Ok(session_id)
    }

    /// Destroys a session exactly once; a second call reports false.
    pub fn destroy_session(&mut self, session_id: SessionId) -> bool {
        match self.sessions.remove(&session_id.0) {
            Some(session) => {
                drop(session);
                if let Err(err) = self.shm.unmap_partition(session_id) {
                    warn!("Unmapping partition of session {} failed: {}", session_id, err);
                }
                info!("Session {} destroyed", session_id);
                true
            }
            None => {
                warn!("Destroy for unknown session {}", session_id);
                false
            }
        }
    }

    /// Destroys every session of a disconnected client.
    pub fn client_disconnected(&mut self, client_id: u64) {
        let stale: Vec<i32> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.client_id() == client_id)
            .map(|(id, _)| *id)
            .collect();
        if !stale.is_empty() {
            debug!("Client {} disconnected with {} sessions", client_id, stale.len());
        }
        for session_id in stale {
            self.destroy_session(SessionId(session_id));
        }
    }

    fn session(&self, session_id: SessionId) -> Result<&PlaybackSession, PlaybackError> {
        self.sessions
            .get(&session_id.0)
            .ok_or(PlaybackError::NoSession { session_id: session_id.0 })
    }

    fn session_mut(&mut self, session_id: SessionId) -> Result<&mut PlaybackSession, PlaybackError> {
        self.sessions
            .get_mut(&session_id.0)
            .ok_or(PlaybackError::NoSession { session_id: session_id.0 })
    }

    pub fn load(
        &mut self,
        session_id: SessionId,
        media_type: MediaType,
        mime_type: &str,
        url: &str,
    ) -> Result<(), PlaybackError> {
        let factory = self.player_factory.clone();
        let decryptor = self.decryptor.clone();
        let player_config = self.player_config();
        self.session_mut(session_id)?.load(
            factory.as_ref(),
            decryptor,
            media_type,
            mime_type,
            url,
            player_config,
        )
    }

    pub fn attach_source(
        &mut self,
        session_id: SessionId,
        source: MediaSource,
    ) -> Result<i32, PlaybackError> {
        self.session_mut(session_id)?.attach_source(source)
    }

    pub fn remove_source(&mut self, session_id: SessionId, source_id: i32) -> Result<(), PlaybackError> {
        self.session_mut(session_id)?.remove_source(source_id)
    }

    pub fn play(&self, session_id: SessionId) -> Result<(), PlaybackError> {
        self.session(session_id)?.play()
    }

    pub fn pause(&self, session_id: SessionId) -> Result<(), PlaybackError> {
        self.session(session_id)?.pause()
    }

    pub fn stop(&self, session_id: SessionId) -> Result<(), PlaybackError> {
        self.session(session_id)?.stop()
    }

    pub fn set_position(&self, session_id: SessionId, position_ns: i64) -> Result<(), PlaybackError> {
        self.session(session_id)?.set_position(position_ns)
    }

    pub fn get_position(&self, session_id: SessionId) -> Result<i64, PlaybackError> {
        self.session(session_id)?.get_position()
    }

    pub fn set_playback_rate(&self, session_id: SessionId, rate: f64) -> Result<(), PlaybackError> {
        self.session(session_id)?.set_playback_rate(rate)
    }

    pub fn set_video_window(
        &self,
        session_id: SessionId,
        geometry: VideoGeometry,
    ) -> Result<(), PlaybackError> {
        self.session(session_id)?.set_video_window(geometry)
    }

    pub fn render_frame(&self, session_id: SessionId) -> Result<(), PlaybackError> {
        self.session(session_id)?.render_frame()
    }

    pub fn have_data(
        &self,
        session_id: SessionId,
        status: MediaSourceStatus,
        num_frames: u32,
        request_id: u32,
    ) -> Result<(), PlaybackError> {
        self.session(session_id)?.have_data(status, num_frames, request_id)
    }
}

/// Commands serialized onto the service task.
enum ServiceCommand {
    CreateSession {
        client_id: u64,
        requirements: VideoRequirements,
        events: EventSender,
        reply: oneshot::Sender<Result<SessionId, PlaybackError>>,
    },
    DestroySession { session_id: SessionId, reply: oneshot::Sender<bool> },
    Load {
        session_id: SessionId,
        media_type: MediaType,
        mime_type: String,
        url: String,
        reply: oneshot::Sender<Result<(), PlaybackError>>,
    },
    AttachSource {
        session_id: SessionId,
        source: MediaSource,
        reply: oneshot::Sender<Result<i32, PlaybackError>>,
    },
    RemoveSource {
        session_id: SessionId,
        source_id: i32,
        reply: oneshot::Sender<Result<(), PlaybackError>>,
    },
    Play { session_id: SessionId, reply: oneshot::Sender<Result<(), PlaybackError>> },
    Pause { session_id: SessionId, reply: oneshot::Sender<Result<(), PlaybackError>> },
    Stop { session_id: SessionId, reply: oneshot::Sender<Result<(), PlaybackError>> },
    SetPosition {
        session_id: SessionId,
        position_ns: i64,
        reply: oneshot::Sender<Result<(), PlaybackError>>,
    },
    GetPosition { session_id: SessionId, reply: oneshot::Sender<Result<i64, PlaybackError>> },
    SetPlaybackRate {
        session_id: SessionId,
        rate: f64,
        reply: oneshot::Sender<Result<(), PlaybackError>>,
    },
    SetVideoWindow {
        session_id: SessionId,
        geometry: VideoGeometry,
        reply: oneshot::Sender<Result<(), PlaybackError>>,
    },
    RenderFrame { session_id: SessionId, reply: oneshot::Sender<Result<(), PlaybackError>> },
    HaveData {
        session_id: SessionId,
        status: MediaSourceStatus,
        num_frames: u32,
        request_id: u32,
        reply: oneshot::Sender<Result<(), PlaybackError>>,
    },
    ClientDisconnected { client_id: u64 },
}

/// Runs the service loop; the returned handle is the only way in.
pub fn spawn(mut service: PlaybackService) -> ServiceHandle {
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            dispatch(&mut service, command);
        }
        debug!("Playback service loop finished");
    });
    ServiceHandle { tx }
}

fn dispatch(service: &mut PlaybackService, command: ServiceCommand) {
    match command {
        ServiceCommand::CreateSession { client_id, requirements, events, reply } => {
            let _ = reply.send(service.create_session(client_id, requirements, events));
        }
        ServiceCommand::DestroySession { session_id, reply } => {
            let _ = reply.send(service.destroy_session(session_id));
        }
        ServiceCommand::Load { session_id, media_type, mime_type, url, reply } => {
            let _ = reply.send(service.load(session_id, media_type, &mime_type, &url));
        }
        ServiceCommand::AttachSource { session_id, source, reply } => {
            let _ = reply.send(service.attach_source(session_id, source));
        }
        ServiceCommand::RemoveSource { session_id, source_id, reply } => {
            let _ = reply.send(service.remove_source(session_id, source_id));
        }
        ServiceCommand::Play { session_id, reply } => {
            let _ = reply.send(service.play(session_id));
        }
        ServiceCommand::Pause { session_id, reply } => {
            let _ = reply.send(service.pause(session_id));
        }
        ServiceCommand::Stop { session_id, reply } => {
            let _ = reply.send(service.stop(session_id));
        }
        ServiceCommand::SetPosition { session_id, position_ns, reply } => {
            let _ = reply.send(service.set_position(session_id, position_ns));
        }
        ServiceCommand::GetPosition { session_id, reply } => {
            let _ = reply.send(service.get_position(session_id));
        }
        ServiceCommand::SetPlaybackRate { session_id, rate, reply } => {
            let _ = reply.send(service.set_playback_rate(session_id, rate));
        }
        ServiceCommand::SetVideoWindow { session_id, geometry, reply } => {
            let _ = reply.send(service.set_video_window(session_id, geometry));
        }
        ServiceCommand::RenderFrame { session_id, reply } => {
            let _ = reply.send(service.render_frame(session_id));
        }
        ServiceCommand::HaveData { session_id, status, num_frames, request_id, reply } => {
            let _ = reply.send(service.have_data(session_id, status, num_frames, request_id));
        }
        ServiceCommand::ClientDisconnected { client_id } => {
            service.client_disconnected(client_id);
        }
    }
}

/// Cloneable sender side of the service task.
#[derive(Clone)]
pub struct ServiceHandle {
    tx: mpsc::UnboundedSender<ServiceCommand>,
}

macro_rules! service_call {
    ($self:ident, $variant:ident { $($field:ident),* }) => {{
        let (reply, rx) = oneshot::channel();
        $self
            .tx
            .send(ServiceCommand::$variant { $($field,)* reply })
            .map_err(|_| PlaybackError::ServiceGone)?;
        rx.await.map_err(|_| PlaybackError::ServiceGone)?
    }};
}

impl ServiceHandle {
    pub async fn create_session(
        &self,
        client_id: u64,
        requirements: VideoRequirements,
        events: EventSender,
    ) -> Result<SessionId, PlaybackError> {
        service_call!(self, CreateSession { client_id, requirements, events })
    }

    pub async fn destroy_session(&self, session_id: SessionId) -> Result<bool, PlaybackError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ServiceCommand::DestroySession { session_id, reply })
            .map_err(|_| PlaybackError::ServiceGone)?;
        rx.await.map_err(|_| PlaybackError::ServiceGone)
    }

    pub async fn load(
        &self,
        session_id: SessionId,
        media_type: MediaType,
        mime_type: String,
        url: String,
    ) -> Result<(), PlaybackError> {
        service_call!(self, Load { session_id, media_type, mime_type, url })
    }

    pub async fn attach_source(
        &self,
        session_id: SessionId,
        source: MediaSource,
    ) -> Result<i32, PlaybackError> {
        service_call!(self, AttachSource { session_id, source })
    }

    pub async fn remove_source(
        &self,
        session_id: SessionId,
        source_id: i32,
    ) -> Result<(), PlaybackError> {
        service_call!(self, RemoveSource { session_id, source_id })
    }

    pub async fn play(&self, session_id: SessionId) -> Result<(), PlaybackError> {
        service_call!(self, Play { session_id })
    }

    pub async fn pause(&self, session_id: SessionId) -> Result<(), PlaybackError> {
        service_call!(self, Pause { session_id })
    }

    pub async fn stop(&self, session_id: SessionId) -> Result<(), PlaybackError> {
        service_call!(self, Stop { session_id })
    }

    pub async fn set_position(
        &self,
        session_id: SessionId,
        position_ns: i64,
    ) -> Result<(), PlaybackError> {
        service_call!(self, SetPosition { session_id, position_ns })
    }

    pub async fn get_position(&self, session_id: SessionId) -> Result<i64, PlaybackError> {
        service_call!(self, GetPosition { session_id })
    }

    pub async fn set_playback_rate(
        &self,
        session_id: SessionId,
        rate: f64,
    ) -> Result<(), PlaybackError> {
        service_call!(self, SetPlaybackRate { session_id, rate })
    }

    pub async fn set_video_window(
        &self,
        session_id: SessionId,
        geometry: VideoGeometry,
    ) -> Result<(), PlaybackError> {
        service_call!(self, SetVideoWindow { session_id, geometry })
    }

    pub async fn render_frame(&self, session_id: SessionId) -> Result<(), PlaybackError> {
        service_call!(self, RenderFrame { session_id })
    }

    pub async fn have_data(
        &self,
        session_id: SessionId,
        status: MediaSourceStatus,
        num_frames: u32,
        request_id: u32,
    ) -> Result<(), PlaybackError> {
        service_call!(self, HaveData { session_id, status, num_frames, request_id })
    }

    pub fn client_disconnected(&self, client_id: u64) {
        let _ = self.tx.send(ServiceCommand::ClientDisconnected { client_id });
    }
}
