//! Software stand-in for a hardware encoder.
//!
//! Produces a well-formed Annex B stream at the configured cadence
//! without touching any pixels. Used on hosts that have no hardware
//! encoder, and by tests that need a codec with a real callback thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use mimic_ipc::Surface;
use mimic_transport::nal::{to_annex_b, NalUnitType};

use crate::callbacks::CodecCallbacks;
use crate::error::EncoderError;
use crate::{Codec, EncoderConfig, EncoderResult, OutputBuffer, OutputFormat};

/// Output buffers the codec cycles through.
const OUTPUT_BUFFER_COUNT: usize = 4;

/// Largest coded frame the codec emits.
const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Largest resolution the codec accepts.
const MAX_DIMENSION: u32 = 4096;

const SPS: &[u8] = &[0x67, 0x42, 0xC0, 0x1F, 0x8C, 0x8D, 0x40, 0x50, 0x1E, 0xD0];
const PPS: &[u8] = &[0x68, 0xCE, 0x3C, 0x80];

/// A [`Codec`] that fabricates an H.264 elementary stream.
pub struct SyntheticCodec {
    config: Option<EncoderConfig>,
    callbacks: Option<CodecCallbacks>,
    surface: Option<Surface>,
    free_tx: Sender<usize>,
    free_rx: Receiver<usize>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    should_stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SyntheticCodec {
    /// Create an unconfigured codec.
    pub fn new() -> Self {
        let (free_tx, free_rx) = crossbeam_channel::bounded(OUTPUT_BUFFER_COUNT);
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);

        Self {
            config: None,
            callbacks: None,
            surface: None,
            free_tx,
            free_rx,
            wake_tx,
            wake_rx,
            should_stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    fn reset_free_list(&self) {
        while self.free_rx.try_recv().is_ok() {}
        for index in 0..OUTPUT_BUFFER_COUNT {
            let _ = self.free_tx.try_send(index);
        }
    }

    fn join_worker(&mut self) {
        self.should_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("Synthetic encoder thread panicked");
            }
        }
    }
}

impl Default for SyntheticCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for SyntheticCodec {
    fn configure(&mut self, config: &EncoderConfig, callbacks: CodecCallbacks) -> EncoderResult<()> {
        if config.width > MAX_DIMENSION || config.height > MAX_DIMENSION {
            return Err(EncoderError::UnsupportedConfig(format!(
                "{}x{} exceeds {MAX_DIMENSION}x{MAX_DIMENSION}",
                config.width, config.height
            )));
        }
        if config.frame_rate == 0 {
            return Err(EncoderError::UnsupportedConfig("zero frame rate".into()));
        }

        self.config = Some(config.clone());
        self.callbacks = Some(callbacks);
        Ok(())
    }

    fn create_input_surface(&mut self) -> EncoderResult<Surface> {
        let config = self.config.as_ref().ok_or(EncoderError::NotConfigured)?;
        let surface = Surface::new(config.width, config.height);
        self.surface = Some(surface.clone());
        Ok(surface)
    }

    fn start(&mut self) -> EncoderResult<()> {
        let config = self.config.clone().ok_or(EncoderError::NotConfigured)?;
        let callbacks = self.callbacks.clone().ok_or(EncoderError::NotConfigured)?;
        if self.worker.is_some() {
            return Ok(());
        }

        self.reset_free_list();
        self.should_stop.store(false, Ordering::SeqCst);

        let worker = Worker {
            config,
            callbacks,
            surface: self.surface.clone(),
            free_rx: self.free_rx.clone(),
            wake_rx: self.wake_rx.clone(),
            should_stop: Arc::clone(&self.should_stop),
        };
        let handle = thread::Builder::new()
            .name("synthetic-encoder".into())
            .spawn(move || worker.run())
            .map_err(|e| EncoderError::Fault(format!("failed to spawn encoder thread: {e}")))?;

        self.worker = Some(handle);
        info!("Synthetic encoder started");
        Ok(())
    }

    fn release_output_buffer(&mut self, index: usize, _render: bool) -> EncoderResult<()> {
        if index >= OUTPUT_BUFFER_COUNT {
            return Err(EncoderError::BufferNotOutstanding(index));
        }
        let _ = self.free_tx.try_send(index);
        Ok(())
    }

    fn request_idle_frame(&mut self) {
        let _ = self.wake_tx.try_send(());
    }

    fn stop(&mut self) -> EncoderResult<()> {
        self.join_worker();
        self.callbacks = None;
        self.config = None;
        Ok(())
    }

    fn release(&mut self) {
        self.join_worker();
        if let Some(surface) = self.surface.take() {
            surface.release();
        }
        self.callbacks = None;
        self.config = None;
    }

    fn name(&self) -> &'static str {
        "synthetic"
    }
}

impl Drop for SyntheticCodec {
    fn drop(&mut self) {
        self.join_worker();
    }
}

struct Worker {
    config: EncoderConfig,
    callbacks: CodecCallbacks,
    surface: Option<Surface>,
    free_rx: Receiver<usize>,
    wake_rx: Receiver<()>,
    should_stop: Arc<AtomicBool>,
}

impl Worker {
    fn run(self) {
        debug!("Synthetic encoder thread starting");

        let format = OutputFormat {
            width: self.config.width,
            height: self.config.height,
            codec_config: Some(to_annex_b([SPS, PPS])),
        };
        if !self.callbacks.on_output_format_changed(format) {
            return;
        }

        let cadence = self.cadence();
        let mut frame: u64 = 0;

        while !self.should_stop.load(Ordering::SeqCst) && !self.callbacks.is_closed() {
            if let Some(surface) = &self.surface {
                if !surface.is_valid() {
                    self.callbacks.on_error("input surface released while encoding");
                    break;
                }
            }

            // No free output buffer means the consumer is behind.
            let index = match self.free_rx.recv_timeout(cadence) {
                Ok(index) => index,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let buffer = self.encode_frame(index, frame);
            if !self.callbacks.on_output_buffer_available(buffer) {
                break;
            }
            frame += 1;

            match self.wake_rx.recv_timeout(cadence) {
                Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        debug!(frames = frame, "Synthetic encoder thread stopped");
    }

    /// A static screen still produces a frame every repeat interval.
    fn cadence(&self) -> Duration {
        let frame = Duration::from_nanos(1_000_000_000 / u64::from(self.config.frame_rate));
        let repeat = Duration::from_micros(self.config.repeat_previous_frame_after_us);
        if repeat.is_zero() {
            frame
        } else {
            frame.max(repeat)
        }
    }

    fn encode_frame(&self, index: usize, frame: u64) -> OutputBuffer {
        let interval = u64::from(self.config.key_frame_interval.max(1));
        let is_key_frame = frame % interval == 0;

        let budget = (self.config.bitrate_bps / 8 / self.config.frame_rate) as usize;
        let size = (if is_key_frame { budget } else { budget / 4 }).clamp(16, MAX_FRAME_BYTES);

        let nal_type = if is_key_frame {
            NalUnitType::IdrSlice
        } else {
            NalUnitType::NonIdrSlice
        };

        // Filler bytes are never zero, so no start code can appear inside.
        let mut nal = Vec::with_capacity(size);
        nal.push(nal_type.header_byte());
        nal.extend((1..size).map(|i| {
            ((i as u64).wrapping_mul(31).wrapping_add(frame) as u8) | 0x01
        }));

        let pts_us = frame * 1_000_000 / u64::from(self.config.frame_rate);
        let mut buffer = OutputBuffer::new(index, to_annex_b([nal.as_slice()]), pts_us);
        buffer.is_key_frame = is_key_frame;
        buffer
    }
}
