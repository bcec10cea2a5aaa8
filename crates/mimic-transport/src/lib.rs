//! Frame sink over the accessory byte channel.
//!
//! This crate provides the write side of the accessory transport: a
//! [`FrameSink`] that delivers compressed elementary-stream bytes in
//! submission order, plus H.264 Annex B inspection helpers.

mod error;
pub mod nal;
mod sink;

pub use error::SinkError;
pub use nal::{has_parameter_sets, is_key_frame, parse_annex_b, to_annex_b, NalUnit, NalUnitType};
pub use sink::{FrameSink, WriterSink};

/// Result type for sink operations.
pub type SinkResult<T> = Result<T, SinkError>;

/// Default device node of the Android accessory gadget.
pub const ACCESSORY_DEVICE_PATH: &str = "/dev/usb_accessory";
