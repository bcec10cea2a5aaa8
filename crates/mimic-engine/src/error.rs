//! Error types for the pipeline.

use thiserror::Error;

use mimic_capture::CaptureError;
use mimic_encoder::EncoderError;
use mimic_ipc::{ConfigError, EndReason};
use mimic_transport::SinkError;

/// Errors surfaced by pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The capture grant was rejected.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The encoder cannot satisfy the session configuration.
    #[error("Unsupported configuration: {0}")]
    UnsupportedConfig(String),

    /// The capture source would not bind the encoder surface.
    #[error("Surface rejected: {0}")]
    SurfaceRejected(String),

    /// The transport went away.
    #[error("Sink disconnected: {0}")]
    SinkDisconnected(String),

    /// The encoder failed.
    #[error("Encoder fault: {0}")]
    EncoderFault(String),

    /// The capture source failed.
    #[error("Capture fault: {0}")]
    CaptureFault(String),

    /// A session is already starting or running.
    #[error("A session is already running")]
    AlreadyRunning,

    /// No session is running.
    #[error("No session is running")]
    NotRunning,
}

/// Errors acquiring a wake lock.
#[derive(Debug, Error)]
pub enum PowerError {
    #[error("Wake lock unavailable: {0}")]
    Unavailable(String),
}

impl PipelineError {
    /// The session-ended reason this error produces.
    pub fn end_reason(&self) -> EndReason {
        match self {
            Self::PermissionDenied(_) => EndReason::PermissionRevoked,
            Self::UnsupportedConfig(_) | Self::EncoderFault(_) => EndReason::EncoderFault,
            Self::SurfaceRejected(_) | Self::CaptureFault(_) => EndReason::CaptureFault,
            Self::SinkDisconnected(_) => EndReason::SinkDisconnected,
            Self::AlreadyRunning | Self::NotRunning => EndReason::Completed,
        }
    }
}

impl From<CaptureError> for PipelineError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::PermissionDenied(msg) => Self::PermissionDenied(msg),
            CaptureError::SurfaceRejected(msg) => Self::SurfaceRejected(msg),
            other => Self::CaptureFault(other.to_string()),
        }
    }
}

impl From<EncoderError> for PipelineError {
    fn from(err: EncoderError) -> Self {
        match err {
            EncoderError::UnsupportedConfig(msg) | EncoderError::Unsupported(msg) => {
                Self::UnsupportedConfig(msg)
            }
            other => Self::EncoderFault(other.to_string()),
        }
    }
}

impl From<SinkError> for PipelineError {
    fn from(err: SinkError) -> Self {
        Self::SinkDisconnected(err.to_string())
    }
}

impl From<ConfigError> for PipelineError {
    fn from(err: ConfigError) -> Self {
        Self::UnsupportedConfig(err.to_string())
    }
}

// Keeping the screen lit is part of capturing it.
impl From<PowerError> for PipelineError {
    fn from(err: PowerError) -> Self {
        Self::CaptureFault(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_errors_map_to_taxonomy() {
        let err = PipelineError::from(CaptureError::PermissionDenied("expired".into()));
        assert!(matches!(err, PipelineError::PermissionDenied(_)));
        assert_eq!(err.end_reason(), EndReason::PermissionRevoked);

        let err = PipelineError::from(EncoderError::Unsupported("buffer input".into()));
        assert!(matches!(err, PipelineError::UnsupportedConfig(_)));
        assert_eq!(err.end_reason(), EndReason::EncoderFault);

        let err = PipelineError::from(CaptureError::Backend("gone".into()));
        assert_eq!(err.end_reason(), EndReason::CaptureFault);

        let err = PipelineError::from(SinkError::Closed);
        assert_eq!(err.end_reason(), EndReason::SinkDisconnected);
    }

    #[test]
    fn test_wake_lock_failure_is_capture_fault() {
        let err = PipelineError::from(PowerError::Unavailable("screen off".into()));
        assert!(matches!(err, PipelineError::CaptureFault(ref msg) if msg.contains("screen off")));
        assert_eq!(err.end_reason(), EndReason::CaptureFault);
    }
}
