//! Forced-redraw capability.

use crate::CaptureResult;

/// A service that forces the compositor to produce frames.
///
/// Some hardware encoders hold the last few frames of a static screen
/// until another frame arrives. A forcer keeps something redrawing on
/// screen so those frames come out. It has its own lifecycle, started
/// and stopped by the pipeline around a session.
pub trait RedrawForcer: Send {
    /// Begin forcing redraws.
    fn start(&mut self) -> CaptureResult<()>;

    /// Force at least one more frame now.
    fn poke(&mut self);

    /// Stop forcing redraws. Idempotent.
    fn stop(&mut self);
}
