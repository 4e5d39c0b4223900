//! HTTP/2 SETTINGS parameters (RFC 7540 Section 6.5).
//!
//! A SETTINGS frame carries a *delta*: identifiers absent from the frame
//! keep their previous value. `SettingsUpdate` models one decoded frame;
//! `Settings` holds the effective values and applies updates in order, so
//! the last value for an identifier wins.

use crate::error::H2Error;

// Settings identifiers.
const SETTINGS_HEADER_TABLE_SIZE: u16 = 0x1;
const SETTINGS_ENABLE_PUSH: u16 = 0x2;
const SETTINGS_MAX_CONCURRENT_STREAMS: u16 = 0x3;
const SETTINGS_INITIAL_WINDOW_SIZE: u16 = 0x4;
const SETTINGS_MAX_FRAME_SIZE: u16 = 0x5;
const SETTINGS_MAX_HEADER_LIST_SIZE: u16 = 0x6;

/// Effective HTTP/2 settings for one direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// SETTINGS_HEADER_TABLE_SIZE (0x1). Default 4096.
    pub header_table_size: u32,
    /// SETTINGS_ENABLE_PUSH (0x2). Default 1 (enabled).
    pub enable_push: bool,
    /// SETTINGS_MAX_CONCURRENT_STREAMS (0x3). Default unlimited.
    pub max_concurrent_streams: Option<u32>,
    /// SETTINGS_INITIAL_WINDOW_SIZE (0x4). Default 65535.
    pub initial_window_size: u32,
    /// SETTINGS_MAX_FRAME_SIZE (0x5). Default 16384.
    pub max_frame_size: u32,
    /// SETTINGS_MAX_HEADER_LIST_SIZE (0x6). Default unlimited.
    pub max_header_list_size: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            header_table_size: 4096,
            enable_push: true,
            max_concurrent_streams: None,
            initial_window_size: 65535,
            max_frame_size: 16384,
            max_header_list_size: None,
        }
    }
}

impl Settings {
    /// Apply one decoded SETTINGS frame on top of the current values.
    pub fn apply(&mut self, update: &SettingsUpdate) {
        if let Some(v) = update.header_table_size {
            self.header_table_size = v;
        }
        if let Some(v) = update.enable_push {
            self.enable_push = v;
        }
        if let Some(v) = update.max_concurrent_streams {
            self.max_concurrent_streams = Some(v);
        }
        if let Some(v) = update.initial_window_size {
            self.initial_window_size = v;
        }
        if let Some(v) = update.max_frame_size {
            self.max_frame_size = v;
        }
        if let Some(v) = update.max_header_list_size {
            self.max_header_list_size = Some(v);
        }
    }

    /// The full update announcing every locally-configured value. This is
    /// what goes into the initial SETTINGS frame (and the HTTP2-Settings
    /// upgrade header).
    pub fn to_update(&self) -> SettingsUpdate {
        SettingsUpdate {
            header_table_size: Some(self.header_table_size),
            enable_push: Some(self.enable_push),
            max_concurrent_streams: self.max_concurrent_streams,
            initial_window_size: Some(self.initial_window_size),
            max_frame_size: Some(self.max_frame_size),
            max_header_list_size: self.max_header_list_size,
        }
    }

    /// Encode the full announcement as a SETTINGS payload (6-byte pairs,
    /// no frame header).
    pub fn encode_payload(&self) -> Vec<u8> {
        self.to_update().encode_to_vec()
    }
}

/// One SETTINGS frame: the identifiers present and their new values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsUpdate {
    pub header_table_size: Option<u32>,
    pub enable_push: Option<bool>,
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: Option<u32>,
    pub max_frame_size: Option<u32>,
    pub max_header_list_size: Option<u32>,
}

impl SettingsUpdate {
    /// Encode as a sequence of 6-byte (id: u16, value: u32) pairs.
    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }

    /// Encode into `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        if let Some(v) = self.header_table_size {
            encode_setting(buf, SETTINGS_HEADER_TABLE_SIZE, v);
        }
        if let Some(v) = self.enable_push {
            encode_setting(buf, SETTINGS_ENABLE_PUSH, if v { 1 } else { 0 });
        }
        if let Some(v) = self.max_concurrent_streams {
            encode_setting(buf, SETTINGS_MAX_CONCURRENT_STREAMS, v);
        }
        if let Some(v) = self.initial_window_size {
            encode_setting(buf, SETTINGS_INITIAL_WINDOW_SIZE, v);
        }
        if let Some(v) = self.max_frame_size {
            encode_setting(buf, SETTINGS_MAX_FRAME_SIZE, v);
        }
        if let Some(v) = self.max_header_list_size {
            encode_setting(buf, SETTINGS_MAX_HEADER_LIST_SIZE, v);
        }
    }

    /// Decode a SETTINGS payload of 6-byte pairs.
    ///
    /// When an identifier appears more than once, the last value wins
    /// (RFC 7540 Section 6.5.3 processing order).
    pub fn decode(buf: &[u8]) -> Result<Self, H2Error> {
        if !buf.len().is_multiple_of(6) {
            return Err(H2Error::FrameSize);
        }
        let mut update = SettingsUpdate::default();
        let mut pos = 0;
        while pos + 6 <= buf.len() {
            let id = (u16::from(buf[pos]) << 8) | u16::from(buf[pos + 1]);
            let value = (u32::from(buf[pos + 2]) << 24)
                | (u32::from(buf[pos + 3]) << 16)
                | (u32::from(buf[pos + 4]) << 8)
                | u32::from(buf[pos + 5]);
            pos += 6;
            match id {
                SETTINGS_HEADER_TABLE_SIZE => update.header_table_size = Some(value),
                SETTINGS_ENABLE_PUSH => {
                    if value > 1 {
                        return Err(H2Error::Protocol("ENABLE_PUSH must be 0 or 1".into()));
                    }
                    update.enable_push = Some(value == 1);
                }
                SETTINGS_MAX_CONCURRENT_STREAMS => {
                    update.max_concurrent_streams = Some(value);
                }
                SETTINGS_INITIAL_WINDOW_SIZE => {
                    if value > 0x7fff_ffff {
                        return Err(H2Error::FlowControl);
                    }
                    update.initial_window_size = Some(value);
                }
                SETTINGS_MAX_FRAME_SIZE => {
                    if !(16_384..=16_777_215).contains(&value) {
                        return Err(H2Error::Protocol("MAX_FRAME_SIZE out of range".into()));
                    }
                    update.max_frame_size = Some(value);
                }
                SETTINGS_MAX_HEADER_LIST_SIZE => {
                    update.max_header_list_size = Some(value);
                }
                // Unknown settings MUST be ignored (RFC 7540 Section 6.5.2).
                _ => {}
            }
        }
        Ok(update)
    }
}

fn encode_setting(buf: &mut Vec<u8>, id: u16, value: u32) {
    buf.push((id >> 8) as u8);
    buf.push(id as u8);
    buf.push((value >> 24) as u8);
    buf.push((value >> 16) as u8);
    buf.push((value >> 8) as u8);
    buf.push(value as u8);
}
