//! Platform services a session is built from.

use mimic_capture::{CaptureResult, DisplayBackend, HeadlessDisplay, RedrawForcer};
use mimic_encoder::{Codec, EncoderResult, SyntheticCodec};

use crate::power::{NullWakeLock, WakeLock};

/// Creates the platform resources for each session.
///
/// A fresh codec, display, and wake lock are created per session, since
/// all of them are released when a session ends.
pub trait PlatformServices: Send + Sync {
    /// Create a hardware encoder.
    fn create_codec(&self) -> EncoderResult<Box<dyn Codec>>;

    /// Create a virtual display backend.
    fn create_display(&self) -> CaptureResult<Box<dyn DisplayBackend>>;

    /// Create the wake lock held while streaming.
    fn wake_lock(&self) -> Box<dyn WakeLock>;

    /// Create the forced-redraw service, if the platform needs one.
    fn redraw_forcer(&self) -> Option<Box<dyn RedrawForcer>> {
        None
    }
}

/// Synthetic encoder behind a headless display.
#[derive(Debug, Default)]
pub struct HeadlessPlatform;

impl PlatformServices for HeadlessPlatform {
    fn create_codec(&self) -> EncoderResult<Box<dyn Codec>> {
        Ok(Box::new(SyntheticCodec::new()))
    }

    fn create_display(&self) -> CaptureResult<Box<dyn DisplayBackend>> {
        Ok(Box::new(HeadlessDisplay::new()))
    }

    fn wake_lock(&self) -> Box<dyn WakeLock> {
        Box::new(NullWakeLock)
    }
}
