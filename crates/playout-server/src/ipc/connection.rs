//! One client connection: framed dispatch and event push
//!
//! Each connection multiplexes calls and server-pushed events on a single
//! channel. Replies and events funnel through one writer task, so event
//! delivery order matches the order the session workers emitted them.

use std::collections::HashMap;
use std::os::fd::RawFd;
use std::os::unix::io::AsRawFd;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use playout_common::{
    KeyStatus, MediaSource, SessionId, VideoRequirements,
};
use playout_protocol::convert::{
    init_data_type_from_raw, key_session_type_from_raw, media_source_status_from_raw,
    media_source_type_from_raw, media_type_from_raw, segment_alignment_from_raw,
    stream_format_from_raw,
};
use playout_protocol::messages::*;
use playout_protocol::{fdpass, Frame, FrameKind, Method, ReplyStatus, MAX_FRAME_LEN};
use tokio::net::UnixStream;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, warn};

use crate::cdm::{CdmService, MediaKeysClient};
use crate::error::PlaybackError;
use crate::player::backend::VideoGeometry;
use crate::service::capabilities::CapabilitiesService;
use crate::service::ServiceHandle;

enum WriterCommand {
    Frame(Frame),
    /// A reply that must be chased by the shared-memory descriptor.
    FrameThenFd(Frame, RawFd),
}

/// Pushes license and key-status events for one media keys handle.
struct MediaKeysEventForwarder {
    media_keys_handle: i32,
    writer: UnboundedSender<WriterCommand>,
}

impl MediaKeysClient for MediaKeysEventForwarder {
    fn on_license_request(&self, key_session_id: i32, request: &[u8], url: &str) {
        let event = LicenseRequestEvent {
            media_keys_handle: self.media_keys_handle,
            key_session_id,
            license_request_message: request.to_vec().into(),
            url: url.to_string(),
        };
        let _ = self.writer.send(WriterCommand::Frame(Frame::event(Method::LicenseRequestEvent, &event)));
    }

    fn on_key_statuses_changed(&self, key_session_id: i32, statuses: &[(Vec<u8>, KeyStatus)]) {
        let event = KeyStatusesChangedEvent {
            media_keys_handle: self.media_keys_handle,
            key_session_id,
            key_statuses: statuses
                .iter()
                .map(|(key_id, status)| KeyIdWithStatus {
                    key_id: key_id.clone(),
                    status: WireKeyStatus::from(*status) as i32,
                })
                .collect(),
        };
        let _ = self
            .writer
            .send(WriterCommand::Frame(Frame::event(Method::KeyStatusesChangedEvent, &event)));
    }

    fn on_error(&self, key_session_id: i32, message: &str) {
        warn!("Key session {} error: {}", key_session_id, message);
    }
}

pub(crate) struct ClientConnection {
    client_id: u64,
    playback: ServiceHandle,
    cdm: Arc<CdmService>,
    capabilities: CapabilitiesService,
    shm_fd: RawFd,
    shm_size: u32,
    writer: UnboundedSender<WriterCommand>,
    key_forwarders: HashMap<i32, Arc<MediaKeysEventForwarder>>,
}

impl ClientConnection {
    /// Services the connection until the peer hangs up, then reaps the
    /// client's sessions and media keys.
    pub async fn run(
        client_id: u64,
        stream: UnixStream,
        playback: ServiceHandle,
        cdm: Arc<CdmService>,
        shm_fd: RawFd,
        shm_size: u32,
    ) {
        let socket_fd = stream.as_raw_fd();
        let mut codec = LengthDelimitedCodec::new();
        codec.set_max_frame_length(MAX_FRAME_LEN);
        let framed = Framed::new(stream, codec);
        let (mut sink, mut source) = framed.split();

        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(async move {
            while let Some(command) = writer_rx.recv().await {
                match command {
                    WriterCommand::Frame(frame) => {
                        if sink.send(frame.to_bytes()).await.is_err() {
                            break;
                        }
                    }
                    WriterCommand::FrameThenFd(frame, fd) => {
                        if sink.send(frame.to_bytes()).await.is_err() {
                            break;
                        }
                        if let Err(err) = send_fd_with_retry(socket_fd, fd).await {
                            warn!("Failed to pass shared memory descriptor: {}", err);
                            break;
                        }
                    }
                }
            }
        });

        let mut connection = ClientConnection {
            client_id,
            playback,
            cdm,
            capabilities: CapabilitiesService,
            shm_fd,
            shm_size,
            writer: writer_tx,
            key_forwarders: HashMap::new(),
        };

        while let Some(item) = source.next().await {
            let bytes = match item {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!("Client {} framing error: {}", client_id, err);
                    break;
                }
            };
            let frame = match Frame::from_bytes(&bytes) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!("Client {} sent an undecodable frame: {}", client_id, err);
                    continue;
                }
            };
            if frame.kind() != FrameKind::Call {
                warn!("Client {} sent a non-call frame, ignoring", client_id);
                continue;
            }
            connection.handle_call(frame).await;
        }

        debug!("Client {} disconnected", client_id);
        connection.playback.client_disconnected(client_id);
        connection.cdm.drop_client(client_id);
        writer_task.abort();
    }

    fn send(&self, frame: Frame) {
        let _ = self.writer.send(WriterCommand::Frame(frame));
    }

    fn reply_playback(
        &self,
        correlation_id: u32,
        method: Method,
        result: Result<(), PlaybackError>,
    ) {
        match result {
            Ok(()) => self.send(empty_reply(correlation_id, method)),
            Err(err) => self.send(playback_error_reply(correlation_id, method, err)),
        }
    }

    async fn handle_call(&mut self, frame: Frame) {
        let method = frame.method();
        let correlation_id = frame.correlation_id;

        macro_rules! parse {
            ($ty:ty) => {
                match frame.decode_payload::<$ty>() {
                    Ok(request) => request,
                    Err(err) => {
                        self.send(Frame::error_reply(
                            correlation_id,
                            method,
                            ReplyStatus::Error,
                            format!("malformed request: {err}"),
                        ));
                        return;
                    }
                }
            };
        }

        match method {
            Method::CreateSession => {
                let request = parse!(CreateSessionRequest);
                let requirements = VideoRequirements {
                    max_width: request.max_width,
                    max_height: request.max_height,
                };
                let events = self.event_sender();
                match self.playback.create_session(self.client_id, requirements, events).await {
                    Ok(session_id) => self.send(Frame::reply(
                        correlation_id,
                        method,
                        &CreateSessionResponse { session_id: session_id.0 },
                    )),
                    Err(err) => self.send(playback_error_reply(correlation_id, method, err)),
                }
            }
            Method::DestroySession => {
                let request = parse!(DestroySessionRequest);
                match self.playback.destroy_session(SessionId(request.session_id)).await {
                    Ok(true) => self.send(Frame::reply(
                        correlation_id,
                        method,
                        &DestroySessionResponse {},
                    )),
                    Ok(false) => self.send(Frame::error_reply(
                        correlation_id,
                        method,
                        ReplyStatus::BadSession,
                        format!("no session {}", request.session_id),
                    )),
                    Err(err) => self.send(playback_error_reply(correlation_id, method, err)),
                }
            }
            Method::Load => {
                let request = parse!(LoadRequest);
                let result = self
                    .playback
                    .load(
                        SessionId(request.session_id),
                        media_type_from_raw(request.media_type),
                        request.mime_type,
                        request.url,
                    )
                    .await;
                self.reply_playback(correlation_id, method, result);
            }
            Method::AttachSource => {
                let request = parse!(AttachSourceRequest);
                let session_id = SessionId(request.session_id);
                let source = media_source_from_request(request);
                match self.playback.attach_source(session_id, source).await {
                    Ok(source_id) => self.send(Frame::reply(
                        correlation_id,
                        method,
                        &AttachSourceResponse { source_id },
                    )),
                    Err(err) => self.send(playback_error_reply(correlation_id, method, err)),
                }
            }
            Method::RemoveSource => {
                let request = parse!(RemoveSourceRequest);
                let result = self
                    .playback
                    .remove_source(SessionId(request.session_id), request.source_id)
                    .await;
                self.reply_playback(correlation_id, method, result);
            }
            Method::Play => {
                let request = parse!(PlayRequest);
                let result = self.playback.play(SessionId(request.session_id)).await;
                self.reply_playback(correlation_id, method, result);
            }
            Method::Pause => {
                let request = parse!(PauseRequest);
                let result = self.playback.pause(SessionId(request.session_id)).await;
                self.reply_playback(correlation_id, method, result);
            }
            Method::Stop => {
                let request = parse!(StopRequest);
                let result = self.playback.stop(SessionId(request.session_id)).await;
                self.reply_playback(correlation_id, method, result);
            }
            Method::SetPosition => {
                let request = parse!(SetPositionRequest);
                let result = self
                    .playback
                    .set_position(SessionId(request.session_id), request.position_ns)
                    .await;
                self.reply_playback(correlation_id, method, result);
            }
            Method::GetPosition => {
                let request = parse!(GetPositionRequest);
                match self.playback.get_position(SessionId(request.session_id)).await {
                    Ok(position_ns) => self.send(Frame::reply(
                        correlation_id,
                        method,
                        &GetPositionResponse { position_ns },
                    )),
                    Err(err) => self.send(playback_error_reply(correlation_id, method, err)),
                }
            }
            Method::SetPlaybackRate => {
                let request = parse!(SetPlaybackRateRequest);
                let result = self
                    .playback
                    .set_playback_rate(SessionId(request.session_id), request.rate)
                    .await;
                self.reply_playback(correlation_id, method, result);
            }
            Method::SetVideoWindow => {
                let request = parse!(SetVideoWindowRequest);
                let geometry = VideoGeometry {
                    x: request.x,
                    y: request.y,
                    width: request.width,
                    height: request.height,
                };
                let result =
                    self.playback.set_video_window(SessionId(request.session_id), geometry).await;
                self.reply_playback(correlation_id, method, result);
            }
            Method::HaveData => {
                let request = parse!(HaveDataRequest);
                let result = self
                    .playback
                    .have_data(
                        SessionId(request.session_id),
                        media_source_status_from_raw(request.status),
                        request.num_frames,
                        request.request_id,
                    )
                    .await;
                self.reply_playback(correlation_id, method, result);
            }
            Method::RenderFrame => {
                let request = parse!(RenderFrameRequest);
                let result = self.playback.render_frame(SessionId(request.session_id)).await;
                self.reply_playback(correlation_id, method, result);
            }

            Method::CreateMediaKeys => {
                let request = parse!(CreateMediaKeysRequest);
                match self.cdm.create_media_keys(&request.key_system, self.client_id) {
                    Ok(media_keys_handle) => {
                        let forwarder = Arc::new(MediaKeysEventForwarder {
                            media_keys_handle,
                            writer: self.writer.clone(),
                        });
                        self.key_forwarders.insert(media_keys_handle, forwarder);
                        self.send(Frame::reply(
                            correlation_id,
                            method,
                            &CreateMediaKeysResponse { media_keys_handle },
                        ));
                    }
                    Err(err) => self.send(Frame::error_reply(
                        correlation_id,
                        method,
                        ReplyStatus::Error,
                        err.to_string(),
                    )),
                }
            }
            Method::DestroyMediaKeys => {
                let request = parse!(DestroyMediaKeysRequest);
                self.key_forwarders.remove(&request.media_keys_handle);
                match self.cdm.destroy_media_keys(request.media_keys_handle) {
                    Ok(()) => self.send(Frame::reply(
                        correlation_id,
                        method,
                        &DestroyMediaKeysResponse {},
                    )),
                    Err(err) => self.send(Frame::error_reply(
                        correlation_id,
                        method,
                        ReplyStatus::BadSession,
                        err.to_string(),
                    )),
                }
            }
            Method::CreateKeySession => {
                let request = parse!(CreateKeySessionRequest);
                let forwarder = self
                    .key_forwarders
                    .entry(request.media_keys_handle)
                    .or_insert_with(|| {
                        Arc::new(MediaKeysEventForwarder {
                            media_keys_handle: request.media_keys_handle,
                            writer: self.writer.clone(),
                        })
                    })
                    .clone();
                let response = match self.cdm.create_key_session(
                    request.media_keys_handle,
                    key_session_type_from_raw(request.session_type),
                    Arc::downgrade(&forwarder) as _,
                    request.is_ldl,
                ) {
                    Ok(key_session_id) => CreateKeySessionResponse {
                        key_session_id,
                        error_status: WireMediaKeyErrorStatus::Ok as i32,
                    },
                    Err(status) => CreateKeySessionResponse {
                        key_session_id: -1,
                        error_status: WireMediaKeyErrorStatus::from(status) as i32,
                    },
                };
                self.send(Frame::reply(correlation_id, method, &response));
            }
            Method::GenerateRequest => {
                let request = parse!(GenerateRequestRequest);
                let status = self.cdm.generate_request(
                    request.media_keys_handle,
                    request.key_session_id,
                    init_data_type_from_raw(request.init_data_type),
                    &request.init_data,
                );
                self.send(Frame::reply(
                    correlation_id,
                    method,
                    &GenerateRequestResponse {
                        error_status: WireMediaKeyErrorStatus::from(status) as i32,
                    },
                ));
            }
            Method::LoadKeySession => {
                let request = parse!(LoadKeySessionRequest);
                let status =
                    self.cdm.load_session(request.media_keys_handle, request.key_session_id);
                self.send(Frame::reply(
                    correlation_id,
                    method,
                    &LoadKeySessionResponse {
                        error_status: WireMediaKeyErrorStatus::from(status) as i32,
                    },
                ));
            }
            Method::UpdateKeySession => {
                let request = parse!(UpdateKeySessionRequest);
                let status = self.cdm.update_session(
                    request.media_keys_handle,
                    request.key_session_id,
                    &request.response_data,
                );
                self.send(Frame::reply(
                    correlation_id,
                    method,
                    &UpdateKeySessionResponse {
                        error_status: WireMediaKeyErrorStatus::from(status) as i32,
                    },
                ));
            }
            Method::CloseKeySession => {
                let request = parse!(CloseKeySessionRequest);
                let status =
                    self.cdm.close_key_session(request.media_keys_handle, request.key_session_id);
                self.send(Frame::reply(
                    correlation_id,
                    method,
                    &CloseKeySessionResponse {
                        error_status: WireMediaKeyErrorStatus::from(status) as i32,
                    },
                ));
            }
            Method::RemoveKeySession => {
                let request = parse!(RemoveKeySessionRequest);
                let status =
                    self.cdm.remove_key_session(request.media_keys_handle, request.key_session_id);
                self.send(Frame::reply(
                    correlation_id,
                    method,
                    &RemoveKeySessionResponse {
                        error_status: WireMediaKeyErrorStatus::from(status) as i32,
                    },
                ));
            }
            Method::GetCdmKeySessionId => {
                let request = parse!(GetCdmKeySessionIdRequest);
                let response = match self
                    .cdm
                    .cdm_key_session_id(request.media_keys_handle, request.key_session_id)
                {
                    Ok(cdm_key_session_id) => GetCdmKeySessionIdResponse {
                        error_status: WireMediaKeyErrorStatus::Ok as i32,
                        cdm_key_session_id,
                    },
                    Err(status) => GetCdmKeySessionIdResponse {
                        error_status: WireMediaKeyErrorStatus::from(status) as i32,
                        cdm_key_session_id: String::new(),
                    },
                };
                self.send(Frame::reply(correlation_id, method, &response));
            }
            Method::ContainsKey
            | Method::SelectKeyId
            | Method::SetDrmHeader
            | Method::DeleteDrmStore
            | Method::DeleteKeyStore
            | Method::GetDrmStoreHash
            | Method::GetKeyStoreHash
            | Method::GetLdlSessionsLimit
            | Method::GetLastDrmError
            | Method::GetDrmTime => {
                let _ = parse!(DrmAuxiliaryRequest);
                let status = self.cdm.unsupported_operation(method_name(method));
                self.send(Frame::reply(
                    correlation_id,
                    method,
                    &DrmAuxiliaryResponse {
                        error_status: WireMediaKeyErrorStatus::from(status) as i32,
                        data: Vec::new(),
                    },
                ));
            }

            Method::GetSupportedMimeTypes => {
                let request = parse!(GetSupportedMimeTypesRequest);
                let mime_types = self
                    .capabilities
                    .supported_mime_types(media_source_type_from_raw(request.media_type));
                self.send(Frame::reply(
                    correlation_id,
                    method,
                    &GetSupportedMimeTypesResponse { mime_types },
                ));
            }
            Method::IsMimeTypeSupported => {
                let request = parse!(IsMimeTypeSupportedRequest);
                let is_supported = self.capabilities.is_mime_type_supported(&request.mime_type);
                self.send(Frame::reply(
                    correlation_id,
                    method,
                    &IsMimeTypeSupportedResponse { is_supported },
                ));
            }

            Method::GetSharedMemory => {
                let _ = parse!(GetSharedMemoryRequest);
                let reply = Frame::reply(
                    correlation_id,
                    method,
                    &GetSharedMemoryResponse { size: self.shm_size },
                );
                let _ = self.writer.send(WriterCommand::FrameThenFd(reply, self.shm_fd));
            }

            other => {
                warn!("Client {} called unknown method {:?}", self.client_id, other);
                self.send(Frame::error_reply(
                    correlation_id,
                    method,
                    ReplyStatus::Error,
                    "unknown method",
                ));
            }
        }
    }

    /// Sender the session layer pushes events through; they join the
    /// same writer as replies, preserving emission order.
    fn event_sender(&self) -> UnboundedSender<Frame> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let writer = self.writer.clone();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if writer.send(WriterCommand::Frame(frame)).is_err() {
                    break;
                }
            }
        });
        tx
    }
}

fn media_source_from_request(request: AttachSourceRequest) -> MediaSource {
    MediaSource {
        id: -1,
        source_type: media_source_type_from_raw(request.media_type),
        mime_type: request.mime_type,
        caps: (!request.caps.is_empty()).then_some(request.caps),
        audio_config: request.audio_config.map(|config| playout_common::AudioConfig {
            channels: config.channels,
            sample_rate: config.sample_rate,
            codec_specific_config: config.codec_specific_config,
        }),
        segment_alignment: segment_alignment_from_raw(request.segment_alignment),
        stream_format: stream_format_from_raw(request.stream_format),
        codec_data: (!request.codec_data.is_empty()).then_some(request.codec_data),
    }
}

fn playback_error_reply(correlation_id: u32, method: Method, err: PlaybackError) -> Frame {
    let status = match err {
        PlaybackError::NoSession { .. } => ReplyStatus::BadSession,
        _ => ReplyStatus::Error,
    };
    Frame::error_reply(correlation_id, method, status, err.to_string())
}

/// Builds the success reply for the pipeline calls whose responses carry
/// no fields, each with its own response type.
fn empty_reply(correlation_id: u32, method: Method) -> Frame {
    match method {
        Method::Load => Frame::reply(correlation_id, method, &LoadResponse {}),
        Method::RemoveSource => Frame::reply(correlation_id, method, &RemoveSourceResponse {}),
        Method::Play => Frame::reply(correlation_id, method, &PlayResponse {}),
        Method::Pause => Frame::reply(correlation_id, method, &PauseResponse {}),
        Method::Stop => Frame::reply(correlation_id, method, &StopResponse {}),
        Method::SetPosition => Frame::reply(correlation_id, method, &SetPositionResponse {}),
        Method::SetPlaybackRate => {
            Frame::reply(correlation_id, method, &SetPlaybackRateResponse {})
        }
        Method::SetVideoWindow => Frame::reply(correlation_id, method, &SetVideoWindowResponse {}),
        Method::HaveData => Frame::reply(correlation_id, method, &HaveDataResponse {}),
        Method::RenderFrame => Frame::reply(correlation_id, method, &RenderFrameResponse {}),
        other => Frame::error_reply(
            correlation_id,
            other,
            ReplyStatus::Error,
            "method has no empty response",
        ),
    }
}

fn method_name(method: Method) -> &'static str {
    match method {
        Method::ContainsKey => "containsKey",
        Method::SelectKeyId => "selectKeyId",
        Method::SetDrmHeader => "setDrmHeader",
        Method::DeleteDrmStore => "deleteDrmStore",
        Method::DeleteKeyStore => "deleteKeyStore",
        Method::GetDrmStoreHash => "getDrmStoreHash",
        Method::GetKeyStoreHash => "getKeyStoreHash",
        Method::GetLdlSessionsLimit => "getLdlSessionsLimit",
        Method::GetLastDrmError => "getLastDrmError",
        Method::GetDrmTime => "getDrmTime",
        _ => "unknown",
    }
}

/// Sends the descriptor on the connection socket, retrying the transient
/// would-block case a nonblocking socket can report.
async fn send_fd_with_retry(socket_fd: RawFd, fd: RawFd) -> std::io::Result<()> {
    for _ in 0..100 {
        match fdpass::send_fd(socket_fd, fd) {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            }
            Err(err) => return Err(err),
        }
    }
    Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "descriptor send kept blocking"))
}
