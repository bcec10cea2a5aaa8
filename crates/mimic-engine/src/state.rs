//! Session resources and the teardown sequence.

use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, info, instrument, warn};

use mimic_capture::{CaptureSession, RedrawForcer};
use mimic_encoder::EncoderAdapter;
use mimic_ipc::TeardownStep;
use mimic_transport::FrameSink;

use crate::power::WakeReservation;

/// Resources held by one session, in acquisition order.
#[derive(Default)]
pub struct SessionResources {
    /// Wake reservation.
    pub wake: Option<WakeReservation>,

    /// Encoder adapter.
    pub encoder: Option<EncoderAdapter>,

    /// Capture session bound to the encoder surface.
    pub capture: Option<CaptureSession>,

    /// Output channel.
    pub sink: Option<Box<dyn FrameSink>>,

    /// Forced-redraw service.
    pub redraw: Option<Box<dyn RedrawForcer>>,
}

/// A teardown step that did not complete cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownFailure {
    pub step: TeardownStep,
    pub message: String,
}

impl SessionResources {
    /// Create empty resources.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if nothing is held.
    pub fn is_empty(&self) -> bool {
        self.wake.is_none()
            && self.encoder.is_none()
            && self.capture.is_none()
            && self.sink.is_none()
            && self.redraw.is_none()
    }

    /// Release everything, in the fixed teardown order.
    ///
    /// Every step runs even if an earlier one fails or panics. Steps for
    /// resources never acquired are skipped.
    #[instrument(name = "teardown", skip(self))]
    pub fn teardown(&mut self) -> Vec<TeardownFailure> {
        let mut failures = Vec::new();

        if let Some(mut redraw) = self.redraw.take() {
            if let Err(message) = guarded(|| {
                redraw.stop();
                Ok(())
            }) {
                warn!("Redraw forcer stop failed: {}", message);
            }
        }

        let mut step = TeardownStep::FIRST;
        loop {
            if let Err(message) = guarded(|| self.run_step(step)) {
                warn!(step = step.name(), "Teardown step failed: {}", message);
                failures.push(TeardownFailure { step, message });
            }

            match step.next() {
                Some(next) => step = next,
                None => break,
            }
        }

        info!(failures = failures.len(), "Teardown complete");
        failures
    }

    fn run_step(&mut self, step: TeardownStep) -> Result<(), String> {
        match step {
            TeardownStep::StopCapture => {
                if let Some(mut capture) = self.capture.take() {
                    debug!("Stopping capture");
                    capture.stop().map_err(|e| e.to_string())?;
                }
            }
            TeardownStep::StopEncoder => {
                if let Some(encoder) = self.encoder.as_mut() {
                    debug!("Stopping encoder");
                    encoder.stop().map_err(|e| e.to_string())?;
                }
            }
            TeardownStep::ReleaseEncoder => {
                if let Some(mut encoder) = self.encoder.take() {
                    debug!("Releasing encoder");
                    encoder.release();
                }
            }
            TeardownStep::CloseSink => {
                if let Some(mut sink) = self.sink.take() {
                    debug!("Closing sink");
                    sink.close().map_err(|e| e.to_string())?;
                }
            }
            TeardownStep::ReleaseWakeLock => {
                if let Some(mut wake) = self.wake.take() {
                    debug!("Releasing wake lock");
                    wake.release();
                }
            }
        }
        Ok(())
    }
}

impl Drop for SessionResources {
    fn drop(&mut self) {
        if !self.is_empty() {
            self.teardown();
        }
    }
}

/// Run a platform call, turning a panic into an error.
fn guarded(f: impl FnOnce() -> Result<(), String>) -> Result<(), String> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic".to_string())),
    }
}
