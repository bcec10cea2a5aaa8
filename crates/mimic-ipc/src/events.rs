//! Events sent from the engine to the hosting process.

use serde::{Deserialize, Serialize};

use crate::state::{EndReason, PipelineState};
use crate::types::{Orientation, SessionStats};

/// Events that the engine publishes to the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    /// Pipeline state has changed.
    StateChanged {
        /// Previous state.
        previous: PipelineState,

        /// Current state.
        current: PipelineState,
    },

    /// A session has ended and every resource it held has been released.
    ///
    /// Published exactly once per session that reached `Starting`.
    SessionEnded {
        /// Why the session ended.
        reason: EndReason,

        /// Underlying fault description, if any.
        detail: Option<String>,
    },

    /// Display orientation changed while a session was running.
    OrientationChanged(Orientation),

    /// Final counters of a session, published just before `SessionEnded`.
    Stats(SessionStats),

    /// A request could not be honored (for example, start while running).
    Error {
        /// Error message.
        message: String,
    },

    /// Engine is ready to accept commands.
    Ready,

    /// Engine has shut down.
    Shutdown,
}

impl SessionEvent {
    /// Returns the end reason if this is a `SessionEnded` event.
    pub fn end_reason(&self) -> Option<EndReason> {
        match self {
            Self::SessionEnded { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}
