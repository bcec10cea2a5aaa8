//! Shared types and typed host<->engine messages for mimic.
//!
//! This crate defines the configuration, state machine, and event types
//! exchanged between the hosting process and the streaming engine, plus
//! the surface handle that links an encoder to a capture source.

mod events;
mod state;
mod surface;
mod types;

pub use events::SessionEvent;
pub use state::{EndReason, PipelineState, StartupPhase, TeardownStep};
pub use surface::Surface;
pub use types::{ColorFormat, ConfigError, Orientation, SessionConfig, SessionStats};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for events (Engine → host).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<SessionEvent>, Receiver<SessionEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
