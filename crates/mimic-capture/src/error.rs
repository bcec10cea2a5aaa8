//! Error types for the capture module.

use thiserror::Error;

/// Errors that can occur during capture operations.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The capture grant is invalid, expired, or revoked.
    #[error("Permission denied for capture: {0}")]
    PermissionDenied(String),

    /// The surface cannot be bound.
    #[error("Surface rejected: {0}")]
    SurfaceRejected(String),

    /// Capture already started.
    #[error("Capture already started")]
    AlreadyStarted,

    /// Capture not started.
    #[error("Capture not started")]
    NotStarted,

    /// Platform display failure.
    #[error("Display backend error: {0}")]
    Backend(String),
}
