//! Pull-style adapter over an asynchronous codec.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, instrument, trace, warn};

use mimic_ipc::Surface;

use crate::callbacks::{CodecCallbacks, CodecEvent, TaggedEvent};
use crate::error::EncoderError;
use crate::{
    Codec, EncoderConfig, EncoderResult, OutputBuffer, OutputFormat,
    CODEC_EVENT_CHANNEL_CAPACITY,
};

/// Lifecycle of the adapted encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    Unconfigured,
    Configured,
    Running,
    Stopped,
    Released,
}

/// Something the encoder produced.
#[derive(Debug, Clone)]
pub enum EncoderOutput {
    /// A compressed buffer; must be passed to
    /// [`EncoderAdapter::release_output`] exactly once.
    Buffer(OutputBuffer),

    /// Stream parameters changed.
    FormatChanged(OutputFormat),
}

/// Wraps a [`Codec`] behind configure/start/next-output/release.
pub struct EncoderAdapter {
    codec: Box<dyn Codec>,
    state: EncoderState,
    config: Option<EncoderConfig>,
    surface: Option<Surface>,
    epoch: u64,
    callbacks: Option<CodecCallbacks>,
    events_tx: Sender<TaggedEvent>,
    events_rx: Receiver<TaggedEvent>,
    outstanding: HashSet<usize>,
}

impl EncoderAdapter {
    /// Wrap a platform codec.
    pub fn new(codec: Box<dyn Codec>) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::bounded(CODEC_EVENT_CHANNEL_CAPACITY);

        Self {
            codec,
            state: EncoderState::Unconfigured,
            config: None,
            surface: None,
            epoch: 0,
            callbacks: None,
            events_tx,
            events_rx,
            outstanding: HashSet::new(),
        }
    }

    /// Configure the codec and return its input surface.
    #[instrument(name = "encoder_configure", skip(self, config), fields(codec = self.codec.name()))]
    pub fn configure(&mut self, config: &EncoderConfig) -> EncoderResult<Surface> {
        match self.state {
            EncoderState::Unconfigured | EncoderState::Stopped => {}
            EncoderState::Configured | EncoderState::Running => {
                return Err(EncoderError::AlreadyConfigured)
            }
            EncoderState::Released => return Err(EncoderError::Released),
        }

        if config.color_format.is_buffer_fed() {
            return Err(EncoderError::Unsupported(format!(
                "buffer input mode ({:?}); only surface input is supported",
                config.color_format
            )));
        }

        info!(
            width = config.width,
            height = config.height,
            bitrate_bps = config.bitrate_bps,
            frame_rate = config.frame_rate,
            "Configuring encoder"
        );

        self.epoch += 1;
        let callbacks = CodecCallbacks::new(self.epoch, self.events_tx.clone());
        self.codec.configure(config, callbacks.clone())?;

        let surface = match self.codec.create_input_surface() {
            Ok(surface) => surface,
            Err(e) => {
                callbacks.close();
                let _ = self.codec.stop();
                return Err(e);
            }
        };
        if !surface.is_valid() {
            callbacks.close();
            let _ = self.codec.stop();
            return Err(EncoderError::Fault("codec returned a released surface".into()));
        }

        self.callbacks = Some(callbacks);
        self.config = Some(config.clone());
        self.surface = Some(surface.clone());
        self.state = EncoderState::Configured;

        debug!(surface = surface.id(), "Encoder configured");
        Ok(surface)
    }

    /// Start encoding. Output arrives through [`next_output`](Self::next_output).
    #[instrument(name = "encoder_start", skip(self), fields(codec = self.codec.name()))]
    pub fn start(&mut self) -> EncoderResult<()> {
        match self.state {
            EncoderState::Configured => {}
            EncoderState::Running => return Ok(()),
            EncoderState::Released => return Err(EncoderError::Released),
            EncoderState::Unconfigured | EncoderState::Stopped => {
                return Err(EncoderError::NotConfigured)
            }
        }

        self.codec.start()?;
        self.state = EncoderState::Running;
        info!("Encoder started");
        Ok(())
    }

    /// Receiver of raw codec events, for callers that multiplex channels.
    ///
    /// Every event taken from it must go through [`accept`](Self::accept).
    pub fn events(&self) -> Receiver<TaggedEvent> {
        self.events_rx.clone()
    }

    /// Validate a raw codec event and turn it into output.
    ///
    /// Events from an earlier run are dropped. An input-buffer callback or
    /// a codec error is returned as an error.
    pub fn accept(&mut self, tagged: TaggedEvent) -> EncoderResult<Option<EncoderOutput>> {
        if tagged.epoch != self.epoch || self.state != EncoderState::Running {
            trace!(
                epoch = tagged.epoch,
                current = self.epoch,
                state = ?self.state,
                "Dropping stale codec event"
            );
            return Ok(None);
        }

        match tagged.event {
            CodecEvent::InputBufferAvailable(index) => Err(EncoderError::Unsupported(format!(
                "input buffer {index} offered to a surface-fed encoder"
            ))),
            CodecEvent::OutputBufferAvailable(buffer) => {
                if !self.outstanding.insert(buffer.index) {
                    return Err(EncoderError::Fault(format!(
                        "codec delivered buffer {} twice",
                        buffer.index
                    )));
                }
                Ok(Some(EncoderOutput::Buffer(buffer)))
            }
            CodecEvent::OutputFormatChanged(format) => {
                debug!(?format, "Output format changed");
                Ok(Some(EncoderOutput::FormatChanged(format)))
            }
            CodecEvent::Error(message) => Err(EncoderError::Fault(message)),
        }
    }

    /// Block until the encoder produces output or `timeout` elapses.
    pub fn next_output(&mut self, timeout: Duration) -> EncoderResult<Option<EncoderOutput>> {
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events_rx.recv_timeout(remaining) {
                Ok(tagged) => {
                    if let Some(output) = self.accept(tagged)? {
                        return Ok(Some(output));
                    }
                }
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                // The adapter holds a sender, so this cannot happen while it lives.
                Err(RecvTimeoutError::Disconnected) => return Err(EncoderError::Released),
            }
        }
    }

    /// Return a buffer to the codec. Each delivered buffer is released
    /// exactly once; a second release is rejected before reaching the codec.
    pub fn release_output(&mut self, buffer: &OutputBuffer) -> EncoderResult<()> {
        if !self.outstanding.remove(&buffer.index) {
            return Err(EncoderError::BufferNotOutstanding(buffer.index));
        }

        // Surface-fed encoder output is never rendered.
        self.codec.release_output_buffer(buffer.index, false)
    }

    /// Ask the codec to flush held output.
    pub fn drain_hint(&mut self) {
        if self.state == EncoderState::Running {
            self.codec.request_idle_frame();
        }
    }

    /// Halt encoding. Idempotent, and safe if never started.
    #[instrument(name = "encoder_stop", skip(self), fields(codec = self.codec.name()))]
    pub fn stop(&mut self) -> EncoderResult<()> {
        match self.state {
            EncoderState::Configured | EncoderState::Running => {}
            _ => return Ok(()),
        }

        if let Some(callbacks) = self.callbacks.take() {
            callbacks.close();
        }
        if !self.outstanding.is_empty() {
            debug!(count = self.outstanding.len(), "Abandoning outstanding buffers");
            self.outstanding.clear();
        }
        self.state = EncoderState::Stopped;

        self.codec.stop()?;
        info!("Encoder stopped");
        Ok(())
    }

    /// Free the codec and its input surface. Idempotent.
    #[instrument(name = "encoder_release", skip(self), fields(codec = self.codec.name()))]
    pub fn release(&mut self) {
        if self.state == EncoderState::Released {
            return;
        }

        if let Err(e) = self.stop() {
            warn!("Encoder stop during release failed: {}", e);
        }

        self.codec.release();
        if let Some(surface) = self.surface.take() {
            surface.release();
        }
        while self.events_rx.try_recv().is_ok() {}

        self.state = EncoderState::Released;
        info!("Encoder released");
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EncoderState {
        self.state
    }

    /// The configuration currently applied.
    pub fn config(&self) -> Option<&EncoderConfig> {
        self.config.as_ref()
    }

    /// Number of delivered buffers not yet released.
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Get encoder name for diagnostics.
    pub fn name(&self) -> &'static str {
        self.codec.name()
    }
}

impl Drop for EncoderAdapter {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use mimic_ipc::ColorFormat;
    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct CodecLog {
        callbacks: Option<CodecCallbacks>,
        released: Vec<(usize, bool)>,
        ops: Vec<&'static str>,
    }

    struct LoggingCodec(Arc<Mutex<CodecLog>>);

    impl Codec for LoggingCodec {
        fn configure(&mut self, _config: &EncoderConfig, callbacks: CodecCallbacks) -> EncoderResult<()> {
            let mut log = self.0.lock();
            log.callbacks = Some(callbacks);
            log.ops.push("configure");
            Ok(())
        }

        fn create_input_surface(&mut self) -> EncoderResult<Surface> {
            Ok(Surface::new(800, 480))
        }

        fn start(&mut self) -> EncoderResult<()> {
            self.0.lock().ops.push("start");
            Ok(())
        }

        fn release_output_buffer(&mut self, index: usize, render: bool) -> EncoderResult<()> {
            self.0.lock().released.push((index, render));
            Ok(())
        }

        fn stop(&mut self) -> EncoderResult<()> {
            self.0.lock().ops.push("stop");
            Ok(())
        }

        fn release(&mut self) {
            self.0.lock().ops.push("release");
        }

        fn name(&self) -> &'static str {
            "logging"
        }
    }

    fn running_adapter() -> (EncoderAdapter, Arc<Mutex<CodecLog>>, CodecCallbacks) {
        let log = Arc::new(Mutex::new(CodecLog::default()));
        let mut adapter = EncoderAdapter::new(Box::new(LoggingCodec(Arc::clone(&log))));
        adapter.configure(&EncoderConfig::default()).unwrap();
        adapter.start().unwrap();
        let callbacks = log.lock().callbacks.clone().unwrap();
        (adapter, log, callbacks)
    }

    fn buffer(index: usize) -> OutputBuffer {
        OutputBuffer::new(index, Bytes::from_static(b"\x00\x00\x00\x01\x41"), index as u64)
    }

    #[test]
    fn test_buffer_released_without_render() {
        let (mut adapter, log, callbacks) = running_adapter();
        callbacks.on_output_buffer_available(buffer(3));

        let output = adapter.next_output(Duration::from_secs(1)).unwrap();
        let Some(EncoderOutput::Buffer(buf)) = output else {
            panic!("expected buffer, got {output:?}");
        };
        assert_eq!(adapter.outstanding(), 1);

        adapter.release_output(&buf).unwrap();
        assert_eq!(log.lock().released, vec![(3, false)]);
        assert_eq!(adapter.outstanding(), 0);
    }

    #[test]
    fn test_double_release_rejected() {
        let (mut adapter, log, callbacks) = running_adapter();
        callbacks.on_output_buffer_available(buffer(1));
        let Some(EncoderOutput::Buffer(buf)) = adapter.next_output(Duration::from_secs(1)).unwrap()
        else {
            panic!("expected buffer");
        };

        adapter.release_output(&buf).unwrap();
        assert!(matches!(
            adapter.release_output(&buf),
            Err(EncoderError::BufferNotOutstanding(1))
        ));
        assert_eq!(log.lock().released.len(), 1);
    }

    #[test]
    fn test_configure_while_running() {
        let (mut adapter, _log, _callbacks) = running_adapter();
        assert!(matches!(
            adapter.configure(&EncoderConfig::default()),
            Err(EncoderError::AlreadyConfigured)
        ));
    }

    #[test]
    fn test_buffer_input_mode_unsupported() {
        let log = Arc::new(Mutex::new(CodecLog::default()));
        let mut adapter = EncoderAdapter::new(Box::new(LoggingCodec(Arc::clone(&log))));
        let config = EncoderConfig {
            color_format: ColorFormat::Yuv420SemiPlanar,
            ..Default::default()
        };
        assert!(matches!(
            adapter.configure(&config),
            Err(EncoderError::Unsupported(_))
        ));
        assert!(log.lock().ops.is_empty());
    }

    #[test]
    fn test_input_buffer_callback_is_fatal() {
        let (mut adapter, _log, callbacks) = running_adapter();
        callbacks.on_input_buffer_available(0);
        assert!(matches!(
            adapter.next_output(Duration::from_secs(1)),
            Err(EncoderError::Unsupported(_))
        ));
    }

    #[test]
    fn test_codec_error_is_fault() {
        let (mut adapter, _log, callbacks) = running_adapter();
        callbacks.on_error("hardware hung");
        assert!(matches!(
            adapter.next_output(Duration::from_secs(1)),
            Err(EncoderError::Fault(ref m)) if m == "hardware hung"
        ));
    }

    #[test]
    fn test_stale_events_dropped_after_reconfigure() {
        let (mut adapter, _log, old_callbacks) = running_adapter();
        adapter.stop().unwrap();
        // Old run is closed: nothing reaches the channel.
        assert!(!old_callbacks.on_output_buffer_available(buffer(0)));

        adapter.configure(&EncoderConfig::default()).unwrap();
        adapter.start().unwrap();
        assert!(adapter.next_output(Duration::from_millis(20)).unwrap().is_none());
    }

    #[test]
    fn test_stop_and_release_idempotent() {
        let log = Arc::new(Mutex::new(CodecLog::default()));
        let mut adapter = EncoderAdapter::new(Box::new(LoggingCodec(Arc::clone(&log))));
        adapter.stop().unwrap();
        adapter.stop().unwrap();

        let surface = adapter.configure(&EncoderConfig::default()).unwrap();
        adapter.start().unwrap();
        adapter.stop().unwrap();
        adapter.stop().unwrap();
        adapter.release();
        adapter.release();

        assert!(!surface.is_valid());
        assert_eq!(adapter.state(), EncoderState::Released);
        assert_eq!(log.lock().ops, vec!["configure", "start", "stop", "release"]);
    }

    #[test]
    fn test_start_requires_configure() {
        let log = Arc::new(Mutex::new(CodecLog::default()));
        let mut adapter = EncoderAdapter::new(Box::new(LoggingCodec(log)));
        assert!(matches!(adapter.start(), Err(EncoderError::NotConfigured)));
    }
}
