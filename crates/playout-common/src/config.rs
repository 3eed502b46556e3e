//! Server policy configuration
//!
//! Partition sizes and the playback bound are policy rather than protocol;
//! they are exposed here with documented defaults so integrators can size
//! the daemon for their platform.

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_socket_path() -> String {
    "/tmp/playout-0".to_string()
}

fn default_max_playbacks() -> u32 {
    2
}

fn default_audio_partition_len() -> u32 {
    1024 * 1024
}

fn default_video_partition_len() -> u32 {
    7 * 1024 * 1024
}

fn default_source_setup_timeout_ms() -> u64 {
    200
}

fn default_position_report_interval_ms() -> u64 {
    250
}

/// Daemon configuration.
///
/// All fields have defaults; a missing config file yields a working
/// single-box setup with two playback slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path of the unix domain socket the daemon listens on.
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Number of concurrently hosted playback sessions. Sizes the shared
    /// memory buffer: one audio+video partition per slot.
    #[serde(default = "default_max_playbacks")]
    pub max_playbacks: u32,

    /// Bytes reserved per session for compressed audio samples.
    #[serde(default = "default_audio_partition_len")]
    pub audio_partition_len: u32,

    /// Bytes reserved per session for compressed video samples.
    #[serde(default = "default_video_partition_len")]
    pub video_partition_len: u32,

    /// How long a pipeline waits for further sources after the first
    /// source-setup signal before committing the initial state.
    #[serde(default = "default_source_setup_timeout_ms")]
    pub source_setup_timeout_ms: u64,

    /// Interval of the position report / audio underflow check tick.
    #[serde(default = "default_position_report_interval_ms")]
    pub position_report_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            max_playbacks: default_max_playbacks(),
            audio_partition_len: default_audio_partition_len(),
            video_partition_len: default_video_partition_len(),
            source_setup_timeout_ms: default_source_setup_timeout_ms(),
            position_report_interval_ms: default_position_report_interval_ms(),
        }
    }
}

impl ServerConfig {
    pub fn source_setup_timeout(&self) -> Duration {
        Duration::from_millis(self.source_setup_timeout_ms)
    }

    pub fn position_report_interval(&self) -> Duration {
        Duration::from_millis(self.position_report_interval_ms)
    }
}
