//! GStreamer implementation of the pipeline capability traits
//!
//! The only module that touches the C API. Each session gets a pipeline
//! of per-source appsrc → queue → decodebin chains linked to auto sinks;
//! appsrc data signals and queue underruns feed the worker through
//! [`PlayerSignals`], bus traffic reaches it through [`GstBusWatch`].

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use gstreamer as gst;
use gstreamer_app as gst_app;

use gst::prelude::*;
use playout_common::{MediaSourceType, MediaType, QosInfo, SegmentAlignment, StreamFormat, VideoRequirements};
use tracing::{debug, info, warn};

use super::backend::{
    BackendParts, BusMessage, BusWaker, BusWatch, PlayerBackend, PlayerBackendFactory,
    PlayerSignals, SampleBuffer, StreamCaps, TargetState, VideoGeometry,
};
use crate::error::PlayerError;

const WAKEUP_STRUCTURE: &str = "playout-wakeup";

/// Creates GStreamer-backed pipelines. One instance serves the daemon.
pub struct GstBackendFactory;

impl GstBackendFactory {
    pub fn new() -> Result<Self, PlayerError> {
        gst::init().map_err(|err| PlayerError::Construction(err.to_string()))?;
        Ok(Self)
    }
}

impl PlayerBackendFactory for GstBackendFactory {
    fn create(
        &self,
        media_type: MediaType,
        video_requirements: &VideoRequirements,
        signals: PlayerSignals,
    ) -> Result<BackendParts, PlayerError> {
        debug!(
            "Creating {:?} pipeline for up to {}x{}",
            media_type, video_requirements.max_width, video_requirements.max_height
        );
        let pipeline = gst::Pipeline::new();

        let element_signals = signals.clone();
        pipeline.connect_deep_element_added(move |_, _, element| {
            element_signals.element_setup(element.name().to_string());
        });

        let bus = pipeline
            .bus()
            .ok_or_else(|| PlayerError::Construction("pipeline has no bus".to_string()))?;

        let backend = Arc::new(GstPlayerBackend {
            pipeline: pipeline.clone(),
            signals,
            sources: Mutex::new(HashMap::new()),
            source_announced: Mutex::new(false),
        });

        Ok(BackendParts {
            backend,
            bus: Box::new(GstBusWatch { bus: bus.clone(), pipeline }),
            waker: Arc::new(GstBusWaker { bus }),
        })
    }
}

struct SourceChain {
    appsrc: gst_app::AppSrc,
    sink: gst::Element,
}

struct GstPlayerBackend {
    pipeline: gst::Pipeline,
    signals: PlayerSignals,
    sources: Mutex<HashMap<MediaSourceType, SourceChain>>,
    source_announced: Mutex<bool>,
}

impl GstPlayerBackend {
    fn make_element(factory: &str, name: &str) -> Result<gst::Element, PlayerError> {
        gst::ElementFactory::make(factory)
            .name(name)
            .build()
            .map_err(|err| PlayerError::Construction(format!("{factory}: {err}")))
    }

    fn appsrc_for(&self, source_type: MediaSourceType) -> Result<gst_app::AppSrc, PlayerError> {
        self.sources
            .lock()
            .unwrap()
            .get(&source_type)
            .map(|chain| chain.appsrc.clone())
            .ok_or(PlayerError::NoSource(source_type))
    }

    fn sink_for(&self, source_type: MediaSourceType) -> Option<gst::Element> {
        self.sources.lock().unwrap().get(&source_type).map(|chain| chain.sink.clone())
    }
}

impl PlayerBackend for GstPlayerBackend {
    fn change_state(&self, state: TargetState) -> Result<(), PlayerError> {
        let target = match state {
            TargetState::Null => gst::State::Null,
            TargetState::Ready => gst::State::Ready,
            TargetState::Paused => gst::State::Paused,
            TargetState::Playing => gst::State::Playing,
        };
        self.pipeline
            .set_state(target)
            .map(|_| ())
            .map_err(|_| PlayerError::StateChange { target: state_name(state) })
    }

    fn current_state(&self) -> TargetState {
        let (_, current, _) = self.pipeline.state(Some(gst::ClockTime::ZERO));
        target_state(current)
    }

    fn seek_to(&self, position_ns: i64) -> Result<(), PlayerError> {
        let position = gst::ClockTime::from_nseconds(position_ns.max(0) as u64);
        self.pipeline
            .seek_simple(gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT, position)
            .map_err(|_| PlayerError::Seek { position_ns })
    }

    fn query_position_ns(&self) -> Option<i64> {
        self.pipeline.query_position::<gst::ClockTime>().map(|t| t.nseconds() as i64)
    }

    fn send_instant_rate_change(&self, rate: f64) -> bool {
        let structure =
            gst::Structure::builder("custom-instant-rate-change").field("rate", rate).build();
        self.pipeline.send_event(gst::event::CustomDownstreamOob::new(structure))
    }

    fn audio_sink_name(&self) -> Option<String> {
        self.sink_for(MediaSourceType::Audio).map(|sink| sink.name().to_string())
    }

    fn send_audio_sink_segment_rate(&self, rate: f64) -> bool {
        let Some(sink) = self.sink_for(MediaSourceType::Audio) else {
            return false;
        };
        let Some(pad) = sink.static_pad("sink") else {
            return false;
        };
        let mut segment = gst::FormattedSegment::<gst::ClockTime>::new();
        segment.set_rate(rate);
        pad.send_event(gst::event::Segment::new(&segment))
    }

    fn set_video_rectangle(&self, geometry: VideoGeometry) -> bool {
        let Some(sink) = self.sink_for(MediaSourceType::Video) else {
            return false;
        };
        if sink.find_property("rectangle").is_none() {
            return false;
        }
        let rectangle =
            format!("{},{},{},{}", geometry.x, geometry.y, geometry.width, geometry.height);
        sink.set_property_from_str("rectangle", &rectangle);
        true
    }

    fn render_preroll_frame(&self) -> Result<(), PlayerError> {
        let sink = self
            .sink_for(MediaSourceType::Video)
            .ok_or(PlayerError::NoSource(MediaSourceType::Video))?;
        if sink.find_property("frame-step-on-preroll").is_none() {
            return Err(PlayerError::Construction(
                "video sink has no frame-step-on-preroll property".to_string(),
            ));
        }
        sink.set_property("frame-step-on-preroll", true);
        sink.send_event(gst::event::Step::new(gst::format::Buffers::from_u64(1), 1.0, true, false));
        sink.set_property("frame-step-on-preroll", false);
        Ok(())
    }

    fn attach_source(&self, source_type: MediaSourceType, caps: &StreamCaps) -> Result<(), PlayerError> {
        let mut sources = self.sources.lock().unwrap();
        if sources.contains_key(&source_type) {
            return Ok(());
        }

        let label = match source_type {
            MediaSourceType::Audio => "audio",
            MediaSourceType::Video => "video",
            MediaSourceType::Unknown => return Err(PlayerError::NoSource(source_type)),
        };

        let appsrc = Self::make_element("appsrc", &format!("{label}-src"))?
            .downcast::<gst_app::AppSrc>()
            .map_err(|_| PlayerError::Construction("appsrc downcast failed".to_string()))?;
        appsrc.set_format(gst::Format::Time);
        appsrc.set_caps(Some(&gst_caps(caps)));

        let data_signals = self.signals.clone();
        let enough_signals = self.signals.clone();
        appsrc.set_callbacks(
            gst_app::AppSrcCallbacks::builder()
                .need_data(move |_, _| data_signals.need_data(source_type))
                .enough_data(move |_| enough_signals.enough_data(source_type))
                .build(),
        );

        let queue = Self::make_element("queue", &format!("{label}-queue"))?;
        let underflow_signals = self.signals.clone();
        queue.connect("underrun", false, move |_| {
            underflow_signals.underflow(source_type);
            None
        });

        let decodebin = Self::make_element("decodebin", &format!("{label}-decode"))?;
        let sink = match source_type {
            MediaSourceType::Audio => Self::make_element("autoaudiosink", "audio-sink")?,
            _ => Self::make_element("autovideosink", "video-sink")?,
        };

        self.pipeline
            .add_many([appsrc.upcast_ref::<gst::Element>(), &queue, &decodebin, &sink])
            .map_err(|err| PlayerError::Construction(err.to_string()))?;
        gst::Element::link_many([appsrc.upcast_ref::<gst::Element>(), &queue, &decodebin])
            .map_err(|err| PlayerError::Construction(err.to_string()))?;

        let pad_sink = sink.clone();
        decodebin.connect_pad_added(move |_, pad| {
            let Some(sink_pad) = pad_sink.static_pad("sink") else {
                return;
            };
            if sink_pad.is_linked() {
                return;
            }
            if let Err(err) = pad.link(&sink_pad) {
                warn!("Failed to link decoded {} pad: {:?}", pad.name(), err);
            }
        });

        for element in [appsrc.upcast_ref::<gst::Element>(), &queue, &decodebin, &sink] {
            let _ = element.sync_state_with_parent();
        }

        sources.insert(source_type, SourceChain { appsrc, sink });
        drop(sources);

        let mut announced = self.source_announced.lock().unwrap();
        if !*announced {
            *announced = true;
            self.signals.source_setup();
        }
        info!("Attached {} chain ('{}')", label, caps.mime_type);
        Ok(())
    }

    fn remove_source(&self, source_type: MediaSourceType) {
        if let Some(chain) = self.sources.lock().unwrap().remove(&source_type) {
            let _ = chain.appsrc.set_state(gst::State::Null);
            let _ = self.pipeline.remove(&chain.appsrc);
        }
    }

    fn set_source_caps(&self, source_type: MediaSourceType, caps: &StreamCaps) {
        if let Ok(appsrc) = self.appsrc_for(source_type) {
            appsrc.set_caps(Some(&gst_caps(caps)));
        }
    }

    fn push_sample(&self, source_type: MediaSourceType, sample: SampleBuffer) -> Result<(), PlayerError> {
        let appsrc = self.appsrc_for(source_type)?;
        let mut buffer = gst::Buffer::from_mut_slice(sample.data);
        {
            // A freshly created buffer is uniquely owned.
            let buffer = buffer.get_mut().unwrap();
            if sample.timestamp_ns >= 0 {
                buffer.set_pts(gst::ClockTime::from_nseconds(sample.timestamp_ns as u64));
            }
            if sample.duration_ns > 0 {
                buffer.set_duration(gst::ClockTime::from_nseconds(sample.duration_ns as u64));
            }
        }
        appsrc.push_buffer(buffer).map(|_| ()).map_err(|_| PlayerError::BufferPush)
    }

    fn end_of_stream(&self, source_type: MediaSourceType) -> Result<(), PlayerError> {
        let appsrc = self.appsrc_for(source_type)?;
        appsrc.end_of_stream().map(|_| ()).map_err(|_| PlayerError::BufferPush)
    }

    fn configure_element(&self, element_name: &str, pending_geometry: Option<VideoGeometry>) -> bool {
        if !element_name.starts_with("westerossink") {
            return false;
        }
        let Some(element) = self.pipeline.by_name(element_name) else {
            return false;
        };
        if let Some(geometry) = pending_geometry {
            if element.find_property("rectangle").is_some() {
                let rectangle =
                    format!("{},{},{},{}", geometry.x, geometry.y, geometry.width, geometry.height);
                element.set_property_from_str("rectangle", &rectangle);
                return true;
            }
        }
        false
    }
}

/// Translates the neutral caps descriptor into GstCaps. A raw caps
/// string wins when it parses; otherwise the structured fields build the
/// caps the demuxer negotiated out of band.
fn gst_caps(caps: &StreamCaps) -> gst::Caps {
    if let Some(raw) = &caps.raw_caps {
        match gst::Caps::from_str(raw) {
            Ok(parsed) => return parsed,
            Err(err) => warn!("Ignoring unparsable caps string '{}': {}", raw, err),
        }
    }

    let mut builder = match caps.mime_type.as_str() {
        "audio/mp4" | "audio/aac" | "audio/mpeg" => {
            gst::Caps::builder("audio/mpeg").field("mpegversion", 4i32)
        }
        "audio/x-eac3" => gst::Caps::builder("audio/x-eac3"),
        "audio/x-opus" => gst::Caps::builder("audio/x-opus"),
        "video/h264" | "video/x-h264" => gst::Caps::builder("video/x-h264"),
        "video/h265" | "video/x-h265" => gst::Caps::builder("video/x-h265"),
        "video/x-vp9" => gst::Caps::builder("video/x-vp9"),
        "video/x-av1" => gst::Caps::builder("video/x-av1"),
        other => gst::Caps::builder(other),
    };

    match caps.alignment {
        SegmentAlignment::Au => builder = builder.field("alignment", "au"),
        SegmentAlignment::Nal => builder = builder.field("alignment", "nal"),
        SegmentAlignment::Undefined => {}
    }
    match caps.stream_format {
        StreamFormat::Raw => builder = builder.field("stream-format", "raw"),
        StreamFormat::Avc => builder = builder.field("stream-format", "avc"),
        StreamFormat::ByteStream => builder = builder.field("stream-format", "byte-stream"),
        StreamFormat::Undefined => {}
    }
    if let Some(codec_data) = &caps.codec_data {
        builder = builder.field("codec_data", gst::Buffer::from_slice(codec_data.clone()));
    }
    if caps.sample_rate != 0 {
        builder = builder.field("rate", caps.sample_rate as i32);
    }
    if caps.channels != 0 {
        builder = builder.field("channels", caps.channels as i32);
    }
    if caps.width != 0 && caps.height != 0 {
        builder = builder.field("width", caps.width as i32).field("height", caps.height as i32);
    }
    builder.build()
}

fn target_state(state: gst::State) -> TargetState {
    match state {
        gst::State::Playing => TargetState::Playing,
        gst::State::Paused => TargetState::Paused,
        gst::State::Ready => TargetState::Ready,
        _ => TargetState::Null,
    }
}

fn state_name(state: TargetState) -> &'static str {
    match state {
        TargetState::Null => "NULL",
        TargetState::Ready => "READY",
        TargetState::Paused => "PAUSED",
        TargetState::Playing => "PLAYING",
    }
}

/// Blocking bus reader handed to the dispatcher thread.
struct GstBusWatch {
    bus: gst::Bus,
    pipeline: gst::Pipeline,
}

impl BusWatch for GstBusWatch {
    fn next_message(&mut self) -> BusMessage {
        loop {
            let Some(message) = self.bus.timed_pop(gst::ClockTime::NONE) else {
                continue;
            };
            match message.view() {
                gst::MessageView::Application(app) => {
                    if app.structure().is_some_and(|s| s.name() == WAKEUP_STRUCTURE) {
                        return BusMessage::Wakeup;
                    }
                }
                gst::MessageView::StateChanged(changed) => {
                    let from_pipeline = message
                        .src()
                        .is_some_and(|src| src.as_ptr() == self.pipeline.upcast_ref::<gst::Object>().as_ptr());
                    if from_pipeline {
                        return BusMessage::StateChanged {
                            old: target_state(changed.old()),
                            new: target_state(changed.current()),
                            pending: target_state(changed.pending()),
                        };
                    }
                }
                gst::MessageView::Eos(_) => return BusMessage::Eos,
                gst::MessageView::Error(err) => {
                    return BusMessage::Error { message: err.error().to_string() };
                }
                gst::MessageView::Warning(warning) => {
                    return BusMessage::Warning { message: warning.error().to_string() };
                }
                gst::MessageView::Qos(qos) => {
                    let source_type = match message.src() {
                        Some(src) if src.name().starts_with("video") => MediaSourceType::Video,
                        Some(src) if src.name().starts_with("audio") => MediaSourceType::Audio,
                        _ => continue,
                    };
                    let (processed, dropped) = qos.stats();
                    return BusMessage::Qos {
                        source_type,
                        info: QosInfo {
                            processed: formatted_count(processed),
                            dropped: formatted_count(dropped),
                        },
                    };
                }
                _ => {}
            }
        }
    }
}

fn formatted_count(value: gst::GenericFormattedValue) -> u64 {
    match value {
        gst::GenericFormattedValue::Buffers(Some(buffers)) => u64::from(buffers),
        gst::GenericFormattedValue::Default(Some(count)) => u64::from(count),
        _ => 0,
    }
}

/// Posts the wakeup that unblocks [`GstBusWatch`].
struct GstBusWaker {
    bus: gst::Bus,
}

impl BusWaker for GstBusWaker {
    fn wake(&self) {
        let message = gst::message::Application::new(gst::Structure::new_empty(WAKEUP_STRUCTURE));
        if self.bus.post(message).is_err() {
            warn!("Failed to post bus wakeup");
        }
    }
}
