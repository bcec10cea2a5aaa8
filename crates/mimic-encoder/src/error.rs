//! Error types for the encoder module.

use thiserror::Error;

/// Errors that can occur during encoding operations.
#[derive(Debug, Error)]
pub enum EncoderError {
    /// The hardware cannot satisfy the requested format/resolution.
    #[error("Unsupported encoder configuration: {0}")]
    UnsupportedConfig(String),

    /// `configure` called while configured or running.
    #[error("Encoder already configured")]
    AlreadyConfigured,

    /// Operation requires a configured encoder.
    #[error("Encoder not configured")]
    NotConfigured,

    /// Operation is not supported by a surface-fed encoder.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Encoder-internal fault.
    #[error("Encoder fault: {0}")]
    Fault(String),

    /// Release of a buffer the adapter does not hold.
    #[error("Output buffer {0} is not outstanding")]
    BufferNotOutstanding(usize),

    /// Encoder resources were already released.
    #[error("Encoder released")]
    Released,
}
