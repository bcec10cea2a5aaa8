//! Common types used across the engine and its host.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration for a capture session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Capture and encode width in pixels (default: 800).
    pub width: u32,

    /// Capture and encode height in pixels (default: 480).
    pub height: u32,

    /// Virtual display density (default: 120).
    pub dpi: u32,

    /// Encoder bit rate in bits per second (default: 8 Mbit/s).
    pub bitrate_bps: u32,

    /// Target frames per second (default: 60).
    pub frame_rate: u32,

    /// Key-frame interval in frames (default: 600).
    pub key_frame_interval: u32,

    /// Re-emit the previous frame after this many microseconds of
    /// static content (default: one frame at 60 fps).
    pub repeat_previous_frame_after_us: u64,

    /// Input color format (default: surface-fed).
    pub color_format: ColorFormat,

    /// Write the codec header before the first compressed buffer.
    pub send_codec_header: bool,

    /// How long a graceful stop waits for buffered output (0 disables).
    pub drain_timeout_ms: u64,

    /// Name given to the virtual display.
    pub virtual_display_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 480,
            dpi: 120,
            bitrate_bps: 8 * 1024 * 1024,
            frame_rate: 60,
            key_frame_interval: 600,
            repeat_previous_frame_after_us: 1_000_000 / 60,
            color_format: ColorFormat::Surface,
            send_codec_header: true,
            drain_timeout_ms: 100,
            virtual_display_name: "Mimic".to_string(),
        }
    }
}

impl SessionConfig {
    /// Check the values an encoder cannot possibly accept.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::ZeroDimension);
        }
        // AVC hardware encoders operate on 2x2 chroma blocks.
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(ConfigError::OddDimension {
                width: self.width,
                height: self.height,
            });
        }
        if self.dpi == 0 {
            return Err(ConfigError::ZeroDensity);
        }
        if self.frame_rate == 0 {
            return Err(ConfigError::ZeroFrameRate);
        }
        if self.bitrate_bps == 0 {
            return Err(ConfigError::ZeroBitrate);
        }
        Ok(())
    }

    /// Duration between frames at the configured rate.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.frame_rate.max(1)))
    }

    /// Idle-frame repeat interval.
    pub fn repeat_interval(&self) -> Duration {
        Duration::from_micros(self.repeat_previous_frame_after_us)
    }

    /// Graceful drain timeout.
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Invalid session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("width and height must be non-zero")]
    ZeroDimension,

    #[error("dimensions must be even, got {width}x{height}")]
    OddDimension { width: u32, height: u32 },

    #[error("density must be non-zero")]
    ZeroDensity,

    #[error("frame rate must be non-zero")]
    ZeroFrameRate,

    #[error("bit rate must be non-zero")]
    ZeroBitrate,
}

/// Encoder input color format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorFormat {
    /// Frames arrive through an encoder-owned input surface.
    #[default]
    Surface,

    /// Planar YUV 4:2:0 written into input buffers.
    Yuv420Planar,

    /// Semi-planar YUV 4:2:0 (NV12) written into input buffers.
    Yuv420SemiPlanar,
}

impl ColorFormat {
    /// Returns true if frames must be supplied through input buffers.
    pub fn is_buffer_fed(self) -> bool {
        !matches!(self, Self::Surface)
    }
}

/// Display orientation as reported by the platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    Portrait,
    Landscape,
    #[default]
    Unknown,
}

/// Counters for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Compressed buffers written to the sink.
    pub buffers_written: u64,

    /// Bytes written to the sink, header included.
    pub bytes_written: u64,

    /// Buffers carrying an IDR picture.
    pub key_frames: u64,

    /// Buffers released to the encoder without reaching the sink.
    pub buffers_discarded: u64,

    /// Whether a codec header was written in-band.
    pub header_sent: bool,

    /// Session duration in milliseconds.
    pub uptime_ms: u64,
}
