//! Pipeline state machine types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The current state of the capture pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    /// No session, nothing held.
    #[default]
    Idle,

    /// Acquiring resources for a new session.
    Starting {
        /// Current startup phase.
        phase: StartupPhase,
    },

    /// Capture and encoder are live, buffers flow to the sink.
    Running,

    /// Graceful stop in progress.
    Stopping,

    /// A fault ended the session; teardown runs before returning to `Idle`.
    Failed {
        /// What caused the failure.
        reason: EndReason,
    },
}

impl PipelineState {
    /// Returns true if the pipeline is idle.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true if the pipeline is starting.
    pub fn is_starting(&self) -> bool {
        matches!(self, Self::Starting { .. })
    }

    /// Returns true if the pipeline is running.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns true if the pipeline is stopping.
    pub fn is_stopping(&self) -> bool {
        matches!(self, Self::Stopping)
    }

    /// Returns true if the pipeline is in the failed state.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Returns true if a session currently owns resources.
    pub fn is_active(&self) -> bool {
        !self.is_idle()
    }

    /// Returns a simple string representation of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Starting { .. } => "Starting",
            Self::Running => "Running",
            Self::Stopping => "Stopping",
            Self::Failed { .. } => "Failed",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Startup phases, in acquisition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartupPhase {
    /// Reserving the wake lock.
    AcquireWakeLock,

    /// Configuring the encoder and obtaining its input surface.
    ConfigureEncoder,

    /// Binding the capture source to the encoder surface.
    StartCapture,

    /// Starting the encoder.
    StartEncoder,
}

impl StartupPhase {
    /// Returns the next phase, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::AcquireWakeLock => Some(Self::ConfigureEncoder),
            Self::ConfigureEncoder => Some(Self::StartCapture),
            Self::StartCapture => Some(Self::StartEncoder),
            Self::StartEncoder => None,
        }
    }

    /// Returns the display name for this phase.
    pub fn name(self) -> &'static str {
        match self {
            Self::AcquireWakeLock => "Acquiring wake lock",
            Self::ConfigureEncoder => "Configuring encoder",
            Self::StartCapture => "Starting capture",
            Self::StartEncoder => "Starting encoder",
        }
    }
}

/// Teardown steps, in the fixed order they always run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TeardownStep {
    /// Stop the capture source and release the display binding.
    StopCapture,

    /// Stop the encoder.
    StopEncoder,

    /// Release encoder hardware resources.
    ReleaseEncoder,

    /// Close the frame sink.
    CloseSink,

    /// Release the wake reservation.
    ReleaseWakeLock,
}

impl TeardownStep {
    /// The first step of every teardown.
    pub const FIRST: Self = Self::StopCapture;

    /// Returns the next step, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::StopCapture => Some(Self::StopEncoder),
            Self::StopEncoder => Some(Self::ReleaseEncoder),
            Self::ReleaseEncoder => Some(Self::CloseSink),
            Self::CloseSink => Some(Self::ReleaseWakeLock),
            Self::ReleaseWakeLock => None,
        }
    }

    /// Returns the display name for this step.
    pub fn name(self) -> &'static str {
        match self {
            Self::StopCapture => "capture.stop",
            Self::StopEncoder => "encoder.stop",
            Self::ReleaseEncoder => "encoder.release",
            Self::CloseSink => "sink.close",
            Self::ReleaseWakeLock => "wakelock.release",
        }
    }
}

/// Reason a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndReason {
    /// Stopped on request.
    Completed,

    /// The transport went away.
    SinkDisconnected,

    /// The encoder reported an internal fault.
    EncoderFault,

    /// The capture source failed.
    CaptureFault,

    /// The capture grant was revoked or rejected.
    PermissionRevoked,
}

impl EndReason {
    /// Returns true for every reason except `Completed`.
    pub fn is_fault(self) -> bool {
        !matches!(self, Self::Completed)
    }

    /// Returns a display message for this reason.
    pub fn message(self) -> &'static str {
        match self {
            Self::Completed => "Session completed",
            Self::SinkDisconnected => "Accessory transport disconnected",
            Self::EncoderFault => "Encoder fault",
            Self::CaptureFault => "Capture fault",
            Self::PermissionRevoked => "Capture permission revoked",
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_phases_in_order() {
        let mut phase = StartupPhase::AcquireWakeLock;
        let mut seen = vec![phase];
        while let Some(next) = phase.next() {
            seen.push(next);
            phase = next;
        }
        assert_eq!(
            seen,
            vec![
                StartupPhase::AcquireWakeLock,
                StartupPhase::ConfigureEncoder,
                StartupPhase::StartCapture,
                StartupPhase::StartEncoder,
            ]
        );
    }

    #[test]
    fn test_teardown_order_is_fixed() {
        let mut step = TeardownStep::FIRST;
        let mut names = vec![step.name()];
        while let Some(next) = step.next() {
            names.push(next.name());
            step = next;
        }
        assert_eq!(
            names,
            vec![
                "capture.stop",
                "encoder.stop",
                "encoder.release",
                "sink.close",
                "wakelock.release",
            ]
        );
    }

    #[test]
    fn test_state_predicates() {
        assert!(PipelineState::Idle.is_idle());
        assert!(!PipelineState::Idle.is_active());
        assert!(PipelineState::Running.is_active());
        assert!(PipelineState::Failed {
            reason: EndReason::SinkDisconnected
        }
        .is_failed());
        assert_eq!(
            PipelineState::Starting {
                phase: StartupPhase::StartCapture
            }
            .name(),
            "Starting"
        );
    }

    #[test]
    fn test_end_reason_fault() {
        assert!(!EndReason::Completed.is_fault());
        assert!(EndReason::SinkDisconnected.is_fault());
        assert!(EndReason::PermissionRevoked.is_fault());
    }
}
