//! Pipeline RPC proxy and its event pump
//!
//! The proxy owns the playback session on the daemon: it creates the
//! session at construction, translates the coordinator's calls into
//! protocol requests, and runs the single-threaded pump that routes this
//! session's events back into the coordinator in emission order.

use std::sync::{Arc, Weak};
use std::thread;

use playout_common::{
    MediaSource, MediaSourceStatus, MediaType, QosInfo, ShmInfo, VideoRequirements,
};
use playout_protocol::convert::{
    network_state_from_raw, playback_state_from_raw,
};
use playout_protocol::messages::*;
use playout_protocol::{Frame, Method};
use tracing::{debug, warn};

use crate::coordinator::{CoordinatorCore, PipelineIpc};
use crate::error::Result;
use crate::rpc::ClientChannel;

pub struct PipelineRpcProxy {
    channel: Arc<ClientChannel>,
    session_id: i32,
    subscription: u64,
}

impl PipelineRpcProxy {
    /// Creates the playback session and starts the event pump.
    pub(crate) fn connect(
        channel: Arc<ClientChannel>,
        video_requirements: VideoRequirements,
        core: Weak<CoordinatorCore>,
    ) -> Result<Self> {
        let reply = channel.call(
            Method::CreateSession,
            &CreateSessionRequest {
                max_width: video_requirements.max_width,
                max_height: video_requirements.max_height,
            },
        )?;
        let response: CreateSessionResponse = reply.decode_payload()?;
        let session_id = response.session_id;
        debug!("Playback session {} created", session_id);

        let (subscription, events) = channel.subscribe_events();
        thread::Builder::new()
            .name(format!("playout-events-{session_id}"))
            .spawn(move || {
                while let Ok(frame) = events.recv() {
                    let Some(core) = core.upgrade() else {
                        break;
                    };
                    pump_event(session_id, &frame, &core);
                }
                debug!("Event pump for session {} finished", session_id);
            })?;

        Ok(Self { channel, session_id, subscription })
    }

    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    fn call(&self, method: Method, payload: &impl prost::Message) -> Result<Frame> {
        self.channel.call(method, payload)
    }
}

impl Drop for PipelineRpcProxy {
    fn drop(&mut self) {
        self.channel.unsubscribe(self.subscription);
        let request = DestroySessionRequest { session_id: self.session_id };
        if let Err(err) = self.channel.call(Method::DestroySession, &request) {
            warn!("Destroying session {} failed: {}", self.session_id, err);
        }
    }
}

impl PipelineIpc for PipelineRpcProxy {
    fn load(&self, media_type: MediaType, mime_type: &str, url: &str) -> Result<()> {
        self.call(
            Method::Load,
            &LoadRequest {
                session_id: self.session_id,
                media_type: WireMediaType::from(media_type) as i32,
                mime_type: mime_type.to_string(),
                url: url.to_string(),
            },
        )?;
        Ok(())
    }

    fn attach_source(&self, source: &MediaSource) -> Result<i32> {
        let reply = self.call(
            Method::AttachSource,
            &AttachSourceRequest {
                session_id: self.session_id,
                media_type: WireMediaSourceType::from(source.source_type) as i32,
                mime_type: source.mime_type.clone(),
                caps: source.caps.clone().unwrap_or_default(),
                audio_config: source.audio_config.as_ref().map(|config| AudioConfigMsg {
                    channels: config.channels,
                    sample_rate: config.sample_rate,
                    codec_specific_config: config.codec_specific_config.clone(),
                }),
                codec_data: source.codec_data.clone().unwrap_or_default(),
                segment_alignment: WireSegmentAlignment::from(source.segment_alignment) as i32,
                stream_format: WireStreamFormat::from(source.stream_format) as i32,
            },
        )?;
        let response: AttachSourceResponse = reply.decode_payload()?;
        Ok(response.source_id)
    }

    fn remove_source(&self, source_id: i32) -> Result<()> {
        self.call(
            Method::RemoveSource,
            &RemoveSourceRequest { session_id: self.session_id, source_id },
        )?;
        Ok(())
    }

    fn play(&self) -> Result<()> {
        self.call(Method::Play, &PlayRequest { session_id: self.session_id })?;
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        self.call(Method::Pause, &PauseRequest { session_id: self.session_id })?;
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.call(Method::Stop, &StopRequest { session_id: self.session_id })?;
        Ok(())
    }

    fn set_position(&self, position_ns: i64) -> Result<()> {
        self.call(
            Method::SetPosition,
            &SetPositionRequest { session_id: self.session_id, position_ns },
        )?;
        Ok(())
    }

    fn get_position(&self) -> Result<i64> {
        let reply = self
            .call(Method::GetPosition, &GetPositionRequest { session_id: self.session_id })?;
        let response: GetPositionResponse = reply.decode_payload()?;
        Ok(response.position_ns)
    }

    fn set_playback_rate(&self, rate: f64) -> Result<()> {
        self.call(
            Method::SetPlaybackRate,
            &SetPlaybackRateRequest { session_id: self.session_id, rate },
        )?;
        Ok(())
    }

    fn set_video_window(&self, x: u32, y: u32, width: u32, height: u32) -> Result<()> {
        self.call(
            Method::SetVideoWindow,
            &SetVideoWindowRequest { session_id: self.session_id, x, y, width, height },
        )?;
        Ok(())
    }

    fn have_data(&self, status: MediaSourceStatus, num_frames: u32, request_id: u32) -> Result<()> {
        self.call(
            Method::HaveData,
            &HaveDataRequest {
                session_id: self.session_id,
                status: WireMediaSourceStatus::from(status) as i32,
                num_frames,
                request_id,
            },
        )?;
        Ok(())
    }

    fn render_frame(&self) -> Result<()> {
        self.call(Method::RenderFrame, &RenderFrameRequest { session_id: self.session_id })?;
        Ok(())
    }
}

/// Routes one inbound event into the coordinator. Events for other
/// sessions on the shared channel are dropped here.
fn pump_event(session_id: i32, frame: &Frame, core: &CoordinatorCore) {
    match frame.method() {
        Method::PlaybackStateChangeEvent => {
            let Ok(event) = frame.decode_payload::<PlaybackStateChangeEvent>() else {
                warn!("Undecodable playback state event");
                return;
            };
            if event.session_id == session_id {
                core.handle_playback_state(playback_state_from_raw(event.state));
            }
        }
        Method::NetworkStateChangeEvent => {
            let Ok(event) = frame.decode_payload::<NetworkStateChangeEvent>() else {
                warn!("Undecodable network state event");
                return;
            };
            if event.session_id == session_id {
                core.handle_network_state(network_state_from_raw(event.state));
            }
        }
        Method::PositionChangeEvent => {
            let Ok(event) = frame.decode_payload::<PositionChangeEvent>() else {
                return;
            };
            if event.session_id == session_id {
                core.handle_position(event.position_ns);
            }
        }
        Method::NeedMediaDataEvent => {
            let Ok(event) = frame.decode_payload::<NeedMediaDataEvent>() else {
                warn!("Undecodable need-data event");
                return;
            };
            if event.session_id == session_id {
                let shm_info = event.shm_info.map(|info| ShmInfo {
                    max_metadata_bytes: info.max_metadata_bytes,
                    metadata_offset: info.metadata_offset,
                    media_data_offset: info.media_data_offset,
                    max_media_bytes: info.max_media_bytes,
                });
                core.handle_need_media_data(
                    event.source_id,
                    event.frame_count,
                    event.request_id,
                    shm_info,
                );
            }
        }
        Method::QosEvent => {
            let Ok(event) = frame.decode_payload::<QosEvent>() else {
                return;
            };
            if event.session_id == session_id {
                let info = event.qos_info.map_or(QosInfo::default(), |qos| QosInfo {
                    processed: qos.processed,
                    dropped: qos.dropped,
                });
                core.handle_qos(event.source_id, info);
            }
        }
        // Media keys events belong to the MediaKeysProxy subscriber.
        Method::LicenseRequestEvent | Method::KeyStatusesChangedEvent => {}
        other => debug!("Ignoring {:?} on the pipeline pump", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{PipelineCoordinator, PipelineIpc, PipelineState};
    use crate::error::Result;
    use crate::key_registry::KeyIdRegistry;
    use crate::shm::SharedMemoryClient;

    struct NoopIpc;

    impl PipelineIpc for NoopIpc {
        fn load(&self, _: MediaType, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        fn attach_source(&self, _: &MediaSource) -> Result<i32> {
            Ok(0)
        }
        fn remove_source(&self, _: i32) -> Result<()> {
            Ok(())
        }
        fn play(&self) -> Result<()> {
            Ok(())
        }
        fn pause(&self) -> Result<()> {
            Ok(())
        }
        fn stop(&self) -> Result<()> {
            Ok(())
        }
        fn set_position(&self, _: i64) -> Result<()> {
            Ok(())
        }
        fn get_position(&self) -> Result<i64> {
            Ok(0)
        }
        fn set_playback_rate(&self, _: f64) -> Result<()> {
            Ok(())
        }
        fn set_video_window(&self, _: u32, _: u32, _: u32, _: u32) -> Result<()> {
            Ok(())
        }
        fn have_data(&self, _: MediaSourceStatus, _: u32, _: u32) -> Result<()> {
            Ok(())
        }
        fn render_frame(&self) -> Result<()> {
            Ok(())
        }
    }

    struct NullObserver;

    impl crate::coordinator::PipelineEventObserver for NullObserver {
        fn on_playback_state(&self, _state: playout_common::PlaybackState) {}
        fn on_network_state(&self, _state: playout_common::NetworkState) {}
        fn on_position(&self, _position_ns: i64) {}
        fn on_need_media_data(&self, _source_id: i32, _frame_count: u32, _request_id: u32) {}
        fn on_qos(&self, _source_id: i32, _info: QosInfo) {}
    }

    fn observer() -> Weak<dyn crate::coordinator::PipelineEventObserver> {
        Weak::<NullObserver>::new()
    }

    #[test]
    fn events_for_other_sessions_are_dropped() {
        let coordinator = PipelineCoordinator::with_ipc(
            Arc::new(NoopIpc),
            observer(),
            Arc::new(SharedMemoryClient::for_tests(4096)),
            Arc::new(KeyIdRegistry::new()),
        );
        let core = coordinator.core();

        let foreign = Frame::event(
            Method::PlaybackStateChangeEvent,
            &PlaybackStateChangeEvent { session_id: 9, state: WirePlaybackState::Playing as i32 },
        );
        pump_event(1, &foreign, core);
        assert_eq!(coordinator.state(), PipelineState::Idle);

        let own = Frame::event(
            Method::PlaybackStateChangeEvent,
            &PlaybackStateChangeEvent { session_id: 1, state: WirePlaybackState::Playing as i32 },
        );
        pump_event(1, &own, core);
        assert_eq!(coordinator.state(), PipelineState::Playing);
    }

    #[test]
    fn foreign_need_data_leaves_the_request_table_alone() {
        let coordinator = PipelineCoordinator::with_ipc(
            Arc::new(NoopIpc),
            observer(),
            Arc::new(SharedMemoryClient::for_tests(4096)),
            Arc::new(KeyIdRegistry::new()),
        );
        let core = coordinator.core();
        core.handle_network_state(playout_common::NetworkState::Buffering);

        let event = Frame::event(
            Method::NeedMediaDataEvent,
            &NeedMediaDataEvent {
                session_id: 2,
                source_id: 1,
                frame_count: 24,
                request_id: 7,
                shm_info: Some(ShmInfoMsg {
                    max_metadata_bytes: 256,
                    metadata_offset: 0,
                    media_data_offset: 256,
                    max_media_bytes: 1024,
                }),
            },
        );
        pump_event(1, &event, core);
        // Answering it fails: nothing was recorded.
        assert!(coordinator.have_data(MediaSourceStatus::Ok, 7).is_err());
    }
}
