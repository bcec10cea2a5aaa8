//! Hardware video encoder adapter.
//!
//! A platform encoder ([`Codec`]) reports its buffers through callbacks
//! that may fire on a thread it owns. [`CodecCallbacks`] turns those
//! callbacks into messages on a bounded channel, and [`EncoderAdapter`]
//! exposes them as a pull-style "next output" contract with
//! release-exactly-once bookkeeping.

mod adapter;
mod callbacks;
mod error;
mod synthetic;

pub use adapter::{EncoderAdapter, EncoderOutput, EncoderState};
pub use callbacks::{CodecCallbacks, CodecEvent, TaggedEvent};
pub use error::EncoderError;
pub use synthetic::SyntheticCodec;

use bytes::Bytes;
use mimic_ipc::{ColorFormat, SessionConfig, Surface};

/// Channel capacity for codec callbacks.
///
/// A full channel blocks the codec's callback thread, which in turn holds
/// its output buffers: this is the backpressure path from a slow sink.
pub const CODEC_EVENT_CHANNEL_CAPACITY: usize = 8;

/// MIME type of the produced elementary stream.
pub const MIME_AVC: &str = "video/avc";

/// Result type for encoder operations.
pub type EncoderResult<T> = Result<T, EncoderError>;

/// Video encoder configuration. Immutable once applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderConfig {
    /// Width in pixels.
    pub width: u32,

    /// Height in pixels.
    pub height: u32,

    /// Input color format.
    pub color_format: ColorFormat,

    /// Target bit rate in bits per second.
    pub bitrate_bps: u32,

    /// Target frames per second.
    pub frame_rate: u32,

    /// Key-frame interval in frames.
    pub key_frame_interval: u32,

    /// Repeat the previous frame after this many microseconds without
    /// new content.
    pub repeat_previous_frame_after_us: u64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for EncoderConfig {
    fn from(config: &SessionConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            color_format: config.color_format,
            bitrate_bps: config.bitrate_bps,
            frame_rate: config.frame_rate,
            key_frame_interval: config.key_frame_interval,
            repeat_previous_frame_after_us: config.repeat_previous_frame_after_us,
        }
    }
}

/// A compressed buffer owned by the encoder until released.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    /// Codec buffer index, returned on release.
    pub index: usize,

    /// Compressed bytes.
    pub data: Bytes,

    /// Presentation timestamp in microseconds.
    pub pts_us: u64,

    /// The buffer holds a sync frame.
    pub is_key_frame: bool,

    /// The buffer holds codec configuration (parameter sets), not media.
    pub is_codec_config: bool,

    /// Last buffer of the stream.
    pub is_end_of_stream: bool,
}

impl OutputBuffer {
    /// A media buffer with no special flags.
    pub fn new(index: usize, data: Bytes, pts_us: u64) -> Self {
        Self {
            index,
            data,
            pts_us,
            is_key_frame: false,
            is_codec_config: false,
            is_end_of_stream: false,
        }
    }

    /// Size of the payload.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Stream parameters reported once the encoder knows them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFormat {
    /// Coded width.
    pub width: u32,

    /// Coded height.
    pub height: u32,

    /// Codec-specific header (Annex B SPS and PPS), if the codec has one.
    pub codec_config: Option<Bytes>,
}

/// Platform encoder contract.
///
/// Mirrors an asynchronous hardware codec: callbacks are registered at
/// configure time and may be invoked from any thread until `stop`.
pub trait Codec: Send {
    /// Apply `config` and register `callbacks`.
    fn configure(&mut self, config: &EncoderConfig, callbacks: CodecCallbacks)
        -> EncoderResult<()>;

    /// Create the surface frames are rendered into. Valid after `configure`.
    fn create_input_surface(&mut self) -> EncoderResult<Surface>;

    /// Begin encoding.
    fn start(&mut self) -> EncoderResult<()>;

    /// Hand an output buffer back to the codec.
    fn release_output_buffer(&mut self, index: usize, render: bool) -> EncoderResult<()>;

    /// Ask the codec to push out anything it is holding. Optional.
    fn request_idle_frame(&mut self) {}

    /// Halt encoding; the codec returns to the unconfigured state.
    fn stop(&mut self) -> EncoderResult<()>;

    /// Free hardware resources.
    fn release(&mut self);

    /// Get encoder name for diagnostics.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_session() {
        let session = SessionConfig {
            width: 1280,
            height: 720,
            bitrate_bps: 4_000_000,
            ..Default::default()
        };
        let config = EncoderConfig::from(&session);
        assert_eq!(config.width, 1280);
        assert_eq!(config.height, 720);
        assert_eq!(config.bitrate_bps, 4_000_000);
        assert_eq!(config.key_frame_interval, 600);
        assert_eq!(config.color_format, ColorFormat::Surface);
    }
}
