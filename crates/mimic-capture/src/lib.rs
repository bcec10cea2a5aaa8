//! Screen capture through a virtual display bound to an encoder surface.
//!
//! A capture grant authorizes one session. The platform side is a
//! [`DisplayBackend`]; [`CaptureSession`] enforces the binding rules on top
//! of it: a valid surface before binding, and at most one live target.

mod error;
mod grant;
mod headless;
mod orientation;
mod redraw;
mod session;

pub use error::CaptureError;
pub use grant::CaptureGrant;
pub use headless::HeadlessDisplay;
pub use orientation::{orientation_channel, OrientationWatch};
pub use redraw::RedrawForcer;
pub use session::{CaptureHandle, CaptureSession, DisplayBackend, DisplayEvent, DisplayParams};

/// Channel capacity for display events.
pub const DISPLAY_EVENT_CHANNEL_CAPACITY: usize = 16;

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;
