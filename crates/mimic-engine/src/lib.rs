//! Screen mirroring pipeline.
//!
//! This crate ties a capture source, a hardware encoder, and an accessory
//! transport into one session: captured frames are encoded and every
//! compressed buffer is written to the accessory in encoder order.

mod error;
mod orchestrator;
mod pipeline;
mod platform;
mod power;
mod state;
mod stats;

pub use error::{PipelineError, PowerError};
pub use orchestrator::{command_channel, Engine, SessionCommand, COMMAND_CHANNEL_CAPACITY};
pub use pipeline::{Pipeline, StartRequest, StopOutcome};
pub use platform::{HeadlessPlatform, PlatformServices};
pub use power::{NullWakeLock, WakeLock, WakeReservation};
pub use state::{SessionResources, TeardownFailure};
pub use stats::StatsCollector;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
