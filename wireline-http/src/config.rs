//! Client configuration surface.

use wireline_h2::Settings;

use crate::error::HttpError;

/// Configuration for a client connection. Advertised values land in the
/// initial SETTINGS frame; the behavioral switches steer the handshake
/// driver and push delivery.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Advertised SETTINGS_MAX_CONCURRENT_STREAMS.
    pub max_concurrent_streams: u32,
    /// Per-stream receive window (SETTINGS_INITIAL_WINDOW_SIZE).
    pub initial_window_size: u32,
    /// Largest frame we accept (SETTINGS_MAX_FRAME_SIZE, 2^14..2^24-1).
    pub max_frame_size: u32,
    /// Decoder abort threshold (SETTINGS_MAX_HEADER_LIST_SIZE).
    pub max_header_list_size: Option<u32>,
    /// Advertise SETTINGS_ENABLE_PUSH=1.
    pub push_enabled: bool,
    /// Surface PUSH_PROMISE to the application. When off, pushed responses
    /// are still accepted and delivered on their streams, the application
    /// just never sees the promise itself.
    pub send_push_request_upstream: bool,
    /// Never inject the HTTP/1.1 Upgrade offer.
    pub never_force_upgrade: bool,
    /// Skip the upgrade dance; speak HTTP/2 from the first byte.
    pub prior_knowledge: bool,
    /// Byte cap for queued outbound DATA before writers see
    /// `SendQueueFull`.
    pub send_queue_limit: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_concurrent_streams: 100,
            initial_window_size: 65_535,
            max_frame_size: 16_384,
            max_header_list_size: None,
            push_enabled: true,
            send_push_request_upstream: false,
            never_force_upgrade: false,
            prior_knowledge: false,
            send_queue_limit: wireline_h2::DEFAULT_SEND_QUEUE_LIMIT,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), HttpError> {
        if !(16_384..=16_777_215).contains(&self.max_frame_size) {
            return Err(HttpError::Config(format!(
                "max_frame_size {} outside 2^14..2^24-1",
                self.max_frame_size
            )));
        }
        if self.initial_window_size > 0x7fff_ffff {
            return Err(HttpError::Config(format!(
                "initial_window_size {} above 2^31-1",
                self.initial_window_size
            )));
        }
        Ok(())
    }

    /// The SETTINGS announcement this configuration maps to.
    pub fn to_settings(&self) -> Settings {
        Settings {
            enable_push: self.push_enabled,
            max_concurrent_streams: Some(self.max_concurrent_streams),
            initial_window_size: self.initial_window_size,
            max_frame_size: self.max_frame_size,
            max_header_list_size: self.max_header_list_size,
            ..Default::default()
        }
    }
}
