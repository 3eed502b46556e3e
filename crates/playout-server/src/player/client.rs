//! Event sink the player drives toward the session layer

use playout_common::{MediaSourceType, NetworkState, PlaybackState, QosInfo};

/// Callbacks raised by the worker thread as playback progresses.
///
/// Implemented by the session, which turns them into wire events for the
/// owning client.
pub trait PlayerEventSink: Send + Sync {
    fn notify_playback_state(&self, state: PlaybackState);

    fn notify_network_state(&self, state: NetworkState);

    fn notify_position(&self, position_ns: i64);

    /// Asks the client for more samples on `source_type`. Returns false
    /// when the demand could not be forwarded.
    fn notify_need_media_data(&self, source_type: MediaSourceType) -> bool;

    fn notify_qos(&self, source_type: MediaSourceType, info: QosInfo);
}
