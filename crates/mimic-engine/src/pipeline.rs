//! Pipeline controller.
//!
//! Owns the capture source, encoder, sink, and wake reservation of one
//! session and drives them through `Idle → Starting → Running →
//! Stopping/Failed → Idle`. All state transitions and all buffer
//! forwarding happen under a single pipeline lock, so a teardown can
//! never race with an in-flight write.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{select, Receiver, Sender};
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, info, instrument, trace, warn};

use mimic_capture::{CaptureGrant, CaptureSession, DisplayEvent, OrientationWatch};
use mimic_encoder::{EncoderAdapter, EncoderConfig, EncoderOutput, OutputBuffer, TaggedEvent};
use mimic_ipc::{
    EndReason, Orientation, PipelineState, SessionConfig, SessionEvent, StartupPhase, Surface,
};
use mimic_transport::{is_key_frame, FrameSink, SinkError};

use crate::error::PipelineError;
use crate::platform::PlatformServices;
use crate::power::WakeReservation;
use crate::state::SessionResources;
use crate::stats::StatsCollector;
use crate::PipelineResult;

/// How often the pump re-checks session liveness and the capture grant.
const PUMP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Interval between periodic stream statistics logs.
const STATS_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// How long a session-end event waits for room on a full event channel.
const END_EVENT_SEND_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything needed to begin a session.
pub struct StartRequest {
    /// Screen capture authorization.
    pub grant: CaptureGrant,

    /// Ready-to-use accessory transport.
    pub sink: Box<dyn FrameSink>,

    /// Resolution, density, and encoder settings.
    pub config: SessionConfig,
}

impl StartRequest {
    pub fn new(grant: CaptureGrant, sink: Box<dyn FrameSink>, config: SessionConfig) -> Self {
        Self {
            grant,
            sink,
            config,
        }
    }
}

impl fmt::Debug for StartRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartRequest")
            .field("grant", &self.grant)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Result of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// A running session was stopped and torn down.
    Stopped,

    /// There was no running session; nothing changed.
    NotRunning,
}

/// One live session.
struct ActiveSession {
    generation: u64,
    config: SessionConfig,
    grant: CaptureGrant,
    resources: SessionResources,
    surface: Option<Surface>,
    pending_header: Option<Bytes>,
    header_sent: bool,
    stats: StatsCollector,
}

impl ActiveSession {
    fn new(generation: u64, request: StartRequest) -> Self {
        let mut resources = SessionResources::new();
        resources.sink = Some(request.sink);

        Self {
            generation,
            config: request.config,
            grant: request.grant,
            resources,
            surface: None,
            pending_header: None,
            header_sent: false,
            stats: StatsCollector::new(),
        }
    }

    /// Forward one buffer to the sink, then release it to the encoder.
    ///
    /// The release happens whatever the write outcome.
    fn on_output(&mut self, buffer: OutputBuffer) -> Result<(), SinkError> {
        let written = self.write_buffer(&buffer);
        if written.is_err() {
            self.stats.record_discard();
        }

        if let Some(encoder) = self.resources.encoder.as_mut() {
            if let Err(e) = encoder.release_output(&buffer) {
                warn!(index = buffer.index, "Output buffer release failed: {}", e);
            }
        }

        written
    }

    fn write_buffer(&mut self, buffer: &OutputBuffer) -> Result<(), SinkError> {
        let sink = self.resources.sink.as_mut().ok_or(SinkError::Closed)?;

        if buffer.is_codec_config {
            sink.write(&buffer.data)?;
            self.header_sent = true;
            self.pending_header = None;
            self.stats.record_header(buffer.len());
            debug!(bytes = buffer.len(), "Codec config buffer written");
            return Ok(());
        }

        if !self.header_sent {
            if let Some(header) = self.pending_header.take() {
                sink.write(&header)?;
                self.header_sent = true;
                self.stats.record_header(header.len());
                info!(bytes = header.len(), "Codec header written");
            }
        }

        if buffer.is_empty() {
            return Ok(());
        }

        sink.write(&buffer.data)?;

        let key = buffer.is_key_frame || is_key_frame(&buffer.data);
        self.stats.record_buffer(buffer.len(), key);

        let count = self.stats.buffers_written();
        if count <= 5 || count % 100 == 0 {
            debug!(
                count,
                bytes = buffer.len(),
                pts_us = buffer.pts_us,
                key,
                "Buffer written"
            );
        } else {
            trace!(count, bytes = buffer.len(), pts_us = buffer.pts_us, "Buffer written");
        }
        Ok(())
    }

    fn on_format_changed(&mut self, codec_config: Option<Bytes>) {
        if !self.config.send_codec_header || self.header_sent {
            return;
        }
        if let Some(header) = codec_config.filter(|h| !h.is_empty()) {
            debug!(bytes = header.len(), "Codec header captured");
            self.pending_header = Some(header);
        }
    }
}

/// State guarded by the pipeline lock.
struct Inner {
    state: PipelineState,
    generation: u64,
    session: Option<ActiveSession>,
    orientation: Option<OrientationWatch>,
}

/// State shared with the pump thread.
struct Shared {
    inner: Mutex<Inner>,
    session_ended: Condvar,
    event_tx: Sender<SessionEvent>,
    platform: Arc<dyn PlatformServices>,
}

impl Shared {
    fn send_event(&self, event: SessionEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("Failed to send event: {}", e);
        }
    }

    /// Send an event the host must not miss, waiting for room if needed.
    fn deliver_event(&self, event: SessionEvent) {
        if let Err(e) = self.event_tx.send_timeout(event, END_EVENT_SEND_TIMEOUT) {
            error!("Failed to deliver event: {}", e);
        }
    }

    fn transition_to(&self, inner: &mut Inner, new_state: PipelineState) {
        let previous = std::mem::replace(&mut inner.state, new_state);

        debug!(
            previous = %previous.name(),
            current = %new_state.name(),
            "State transition"
        );

        self.send_event(SessionEvent::StateChanged {
            previous,
            current: new_state,
        });
    }

    /// Run the teardown sequence for the live session and return to `Idle`.
    fn end_session(&self, inner: &mut Inner, reason: EndReason, detail: Option<String>) {
        if let Some(mut session) = inner.session.take() {
            let failures = session.resources.teardown();
            if !failures.is_empty() {
                warn!(count = failures.len(), "Teardown finished with failures");
            }

            let stats = session.stats.snapshot();
            info!(
                ?reason,
                buffers = stats.buffers_written,
                bytes = stats.bytes_written,
                uptime_ms = stats.uptime_ms,
                "Session ended"
            );
            self.deliver_event(SessionEvent::Stats(stats));
            self.deliver_event(SessionEvent::SessionEnded { reason, detail });
        }

        self.transition_to(inner, PipelineState::Idle);
        self.session_ended.notify_all();
    }

    /// Fault path: `Failed`, then the same teardown as a stop.
    fn fail(&self, inner: &mut Inner, err: &PipelineError) {
        let reason = err.end_reason();
        error!(?reason, "Session failed: {}", err);

        self.transition_to(inner, PipelineState::Failed { reason });
        self.end_session(inner, reason, Some(err.to_string()));
    }

    /// Lock the pipeline if `generation` is still the live session.
    fn lock_live(&self, generation: u64) -> Option<MutexGuard<'_, Inner>> {
        let inner = self.inner.lock();
        let live = inner
            .session
            .as_ref()
            .is_some_and(|session| session.generation == generation)
            && (inner.state.is_running() || inner.state.is_stopping());
        live.then_some(inner)
    }

    fn handle_codec_event(&self, generation: u64, tagged: TaggedEvent) {
        let Some(mut inner) = self.lock_live(generation) else {
            trace!("Codec event after session end");
            return;
        };
        let Some(session) = inner.session.as_mut() else {
            return;
        };
        let Some(encoder) = session.resources.encoder.as_mut() else {
            return;
        };

        let mut end_of_stream = false;
        let result = match encoder.accept(tagged) {
            Ok(None) => Ok(()),
            Ok(Some(EncoderOutput::FormatChanged(format))) => {
                session.on_format_changed(format.codec_config);
                Ok(())
            }
            Ok(Some(EncoderOutput::Buffer(buffer))) => {
                end_of_stream = buffer.is_end_of_stream;
                session.on_output(buffer).map_err(PipelineError::from)
            }
            Err(e) => Err(PipelineError::from(e)),
        };

        match result {
            Err(err) => self.fail(&mut inner, &err),
            Ok(()) if end_of_stream && inner.state.is_stopping() => {
                debug!("Encoder drained");
                self.end_session(&mut inner, EndReason::Completed, None);
            }
            Ok(()) => {}
        }
    }

    fn handle_display_event(&self, generation: u64, event: DisplayEvent) {
        let Some(mut inner) = self.lock_live(generation) else {
            return;
        };

        let err = match event {
            DisplayEvent::Revoked => {
                PipelineError::PermissionDenied("capture grant revoked by the platform".into())
            }
            DisplayEvent::Fault(message) => PipelineError::CaptureFault(message),
        };
        self.fail(&mut inner, &err);
    }

    fn handle_orientation(&self, generation: u64, orientation: Orientation) {
        let Some(mut inner) = self.lock_live(generation) else {
            return;
        };

        let changed = inner
            .orientation
            .as_mut()
            .and_then(|watch| watch.observe(orientation));
        if let Some(orientation) = changed {
            self.send_event(SessionEvent::OrientationChanged(orientation));
        }
    }

    /// Periodic check. Returns false once the session is over.
    fn tick(&self, generation: u64, last_log: &mut Instant) -> bool {
        let Some(mut inner) = self.lock_live(generation) else {
            return false;
        };

        let grant_revoked = inner.session.as_ref().is_some_and(|session| {
            let capture_revoked = session
                .resources
                .capture
                .as_ref()
                .is_some_and(|capture| !capture.grant_valid());
            capture_revoked || session.grant.is_revoked()
        });
        if grant_revoked {
            let err = PipelineError::PermissionDenied("capture grant no longer valid".into());
            self.fail(&mut inner, &err);
            return false;
        }

        if last_log.elapsed() >= STATS_LOG_INTERVAL {
            if let Some(session) = inner.session.as_ref() {
                let stats = session.stats.snapshot();
                info!(
                    "Stream stats: buffers={}, bytes={}, key_frames={}, uptime={:.1}s",
                    stats.buffers_written,
                    stats.bytes_written,
                    stats.key_frames,
                    stats.uptime_ms as f32 / 1000.0
                );
            }
            *last_log = Instant::now();
        }
        true
    }

    fn is_live(&self, generation: u64) -> bool {
        self.lock_live(generation).is_some()
    }
}

/// Receivers the pump multiplexes for one session.
struct PumpChannels {
    codec: Receiver<TaggedEvent>,
    display: Receiver<DisplayEvent>,
    orientation: Receiver<Orientation>,
}

/// Pump loop: moves encoder, display, and orientation events into the
/// pipeline lock until the session ends.
fn pump(shared: Arc<Shared>, generation: u64, mut channels: PumpChannels) {
    debug!(generation, "Pump starting");
    let mut last_log = Instant::now();

    loop {
        let mut orientation_closed = false;
        select! {
            recv(channels.codec) -> msg => match msg {
                Ok(tagged) => shared.handle_codec_event(generation, tagged),
                Err(_) => break,
            },
            recv(channels.display) -> msg => match msg {
                Ok(event) => shared.handle_display_event(generation, event),
                Err(_) => break,
            },
            recv(channels.orientation) -> msg => match msg {
                Ok(orientation) => shared.handle_orientation(generation, orientation),
                Err(_) => orientation_closed = true,
            },
            default(PUMP_POLL_INTERVAL) => {
                if !shared.tick(generation, &mut last_log) {
                    break;
                }
            },
        }

        // A disconnected receiver is always ready and would starve the tick.
        if orientation_closed {
            debug!(generation, "Orientation source closed");
            channels.orientation = crossbeam_channel::never();
        }

        if !shared.is_live(generation) {
            break;
        }
    }

    debug!(generation, "Pump stopped");
}

/// The capture → encode → transport controller.
pub struct Pipeline {
    shared: Arc<Shared>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Pipeline {
    /// Create an idle pipeline publishing events on `event_tx`.
    pub fn new(platform: Arc<dyn PlatformServices>, event_tx: Sender<SessionEvent>) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: PipelineState::Idle,
                    generation: 0,
                    session: None,
                    orientation: None,
                }),
                session_ended: Condvar::new(),
                event_tx,
                platform,
            }),
            pump: Mutex::new(None),
        }
    }

    /// Feed display orientation notifications to running sessions.
    pub fn watch_orientation(&self, initial: Orientation, rx: Receiver<Orientation>) {
        self.shared.inner.lock().orientation = Some(OrientationWatch::new(initial, rx));
    }

    /// Current state.
    pub fn state(&self) -> PipelineState {
        self.shared.inner.lock().state
    }

    /// Last known display orientation.
    pub fn last_orientation(&self) -> Orientation {
        self.shared
            .inner
            .lock()
            .orientation
            .as_ref()
            .map(OrientationWatch::last)
            .unwrap_or_default()
    }

    /// Begin a session.
    ///
    /// Fails with [`PipelineError::AlreadyRunning`] without touching the
    /// live session if one exists. Any other failure has already torn
    /// down whatever was acquired and published `SessionEnded`.
    #[instrument(name = "start_session", skip(self, request))]
    pub fn start_session(&self, request: StartRequest) -> PipelineResult<()> {
        if self.shared.inner.lock().state.is_active() {
            debug!("Already active, rejecting start");
            return Err(PipelineError::AlreadyRunning);
        }
        // The previous session is over, so its pump is exiting.
        self.reap_pump();

        let mut inner = self.shared.inner.lock();
        if inner.state.is_active() {
            debug!(state = %inner.state, "Already active, rejecting start");
            return Err(PipelineError::AlreadyRunning);
        }

        info!(
            width = request.config.width,
            height = request.config.height,
            dpi = request.config.dpi,
            "Starting session"
        );

        inner.generation += 1;
        let generation = inner.generation;
        inner.session = Some(ActiveSession::new(generation, request));

        let mut phase = StartupPhase::AcquireWakeLock;
        loop {
            self.shared
                .transition_to(&mut inner, PipelineState::Starting { phase });

            if let Err(err) = self.init_phase(&mut inner, phase) {
                self.shared.fail(&mut inner, &err);
                return Err(err);
            }

            match phase.next() {
                Some(next) => phase = next,
                None => break,
            }
        }

        let channels = match self.start_running(&mut inner) {
            Ok(channels) => channels,
            Err(err) => {
                self.shared.fail(&mut inner, &err);
                return Err(err);
            }
        };

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("mimic-pump".into())
            .spawn(move || pump(shared, generation, channels));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                let err = PipelineError::EncoderFault(format!("failed to spawn pump: {e}"));
                self.shared.fail(&mut inner, &err);
                return Err(err);
            }
        };

        self.shared.transition_to(&mut inner, PipelineState::Running);
        drop(inner);

        *self.pump.lock() = Some(handle);
        info!("Session running");
        Ok(())
    }

    fn init_phase(&self, inner: &mut Inner, phase: StartupPhase) -> PipelineResult<()> {
        debug!("Initializing phase: {}", phase.name());
        let platform = Arc::clone(&self.shared.platform);
        let session = inner.session.as_mut().ok_or(PipelineError::NotRunning)?;

        match phase {
            StartupPhase::AcquireWakeLock => {
                let wake = WakeReservation::acquire(platform.wake_lock())?;
                session.resources.wake = Some(wake);
            }
            StartupPhase::ConfigureEncoder => {
                session.config.validate()?;
                let codec = platform.create_codec()?;
                let encoder = session
                    .resources
                    .encoder
                    .insert(EncoderAdapter::new(codec));
                let surface = encoder.configure(&EncoderConfig::from(&session.config))?;
                session.surface = Some(surface);
            }
            StartupPhase::StartCapture => {
                let surface = session
                    .surface
                    .clone()
                    .ok_or_else(|| PipelineError::SurfaceRejected("no encoder surface".into()))?;
                let display = platform.create_display()?;
                let capture = session
                    .resources
                    .capture
                    .insert(CaptureSession::new(display));
                let config = &session.config;
                capture.start(
                    &session.grant,
                    &config.virtual_display_name,
                    config.width,
                    config.height,
                    config.dpi,
                    &surface,
                )?;
            }
            StartupPhase::StartEncoder => {
                let encoder = session
                    .resources
                    .encoder
                    .as_mut()
                    .ok_or(PipelineError::NotRunning)?;
                encoder.start()?;
            }
        }
        Ok(())
    }

    /// Collect the pump's receivers and start the redraw forcer.
    fn start_running(&self, inner: &mut Inner) -> PipelineResult<PumpChannels> {
        let orientation = inner
            .orientation
            .as_ref()
            .map(OrientationWatch::receiver)
            .unwrap_or_else(crossbeam_channel::never);

        let session = inner.session.as_mut().ok_or(PipelineError::NotRunning)?;
        let codec = session
            .resources
            .encoder
            .as_ref()
            .map(EncoderAdapter::events)
            .ok_or(PipelineError::NotRunning)?;
        let display = session
            .resources
            .capture
            .as_ref()
            .map(CaptureSession::events)
            .ok_or(PipelineError::NotRunning)?;

        if let Some(mut redraw) = self.shared.platform.redraw_forcer() {
            match redraw.start() {
                Ok(()) => session.resources.redraw = Some(redraw),
                Err(e) => warn!("Redraw forcer unavailable: {}", e),
            }
        }

        Ok(PumpChannels {
            codec,
            display,
            orientation,
        })
    }

    /// End the running session.
    ///
    /// Gives the encoder up to the configured drain timeout to flush
    /// buffered output, then tears down capture, encoder, sink, and wake
    /// reservation in that order. Stopping an idle pipeline is a no-op.
    #[instrument(name = "stop_session", skip(self))]
    pub fn stop_session(&self) -> PipelineResult<StopOutcome> {
        let outcome = {
            let mut inner = self.shared.inner.lock();
            if !inner.state.is_running() {
                debug!(state = %inner.state, "Not running, ignoring stop");
                return Ok(StopOutcome::NotRunning);
            }

            info!("Stopping session");
            let generation = inner.generation;
            self.shared.transition_to(&mut inner, PipelineState::Stopping);

            let drain_timeout = self.drain_hint(&mut inner);
            if !drain_timeout.is_zero() {
                let deadline = Instant::now() + drain_timeout;
                while inner.generation == generation && inner.session.is_some() {
                    if self
                        .shared
                        .session_ended
                        .wait_until(&mut inner, deadline)
                        .timed_out()
                    {
                        break;
                    }
                }
            }

            // A fault during the drain has already ended the session.
            if inner.generation == generation && inner.session.is_some() {
                self.shared
                    .end_session(&mut inner, EndReason::Completed, None);
            }
            StopOutcome::Stopped
        };

        self.reap_pump();
        Ok(outcome)
    }

    /// Coax buffered frames out of the encoder. Returns how long to wait
    /// for them.
    fn drain_hint(&self, inner: &mut Inner) -> Duration {
        let Some(session) = inner.session.as_mut() else {
            return Duration::ZERO;
        };
        let timeout = session.config.drain_timeout();
        if timeout.is_zero() {
            return timeout;
        }

        debug!(?timeout, "Draining encoder");
        if let Some(redraw) = session.resources.redraw.as_mut() {
            redraw.poke();
        }
        if let Some(encoder) = session.resources.encoder.as_mut() {
            encoder.drain_hint();
        }
        timeout
    }

    /// Apply a new configuration to the running session.
    ///
    /// Resizes the capture first, restarts the encoder with the new
    /// configuration, and swaps the capture onto the new surface, which
    /// releases the old one. Any failure tears the session down.
    #[instrument(name = "reconfigure", skip(self, config))]
    pub fn reconfigure(&self, config: SessionConfig) -> PipelineResult<()> {
        let mut inner = self.shared.inner.lock();
        if !inner.state.is_running() {
            return Err(PipelineError::NotRunning);
        }

        info!(
            width = config.width,
            height = config.height,
            dpi = config.dpi,
            "Reconfiguring session"
        );

        let result = match inner.session.as_mut() {
            Some(session) => Self::apply_config(session, config),
            None => Err(PipelineError::NotRunning),
        };

        if let Err(err) = result {
            self.shared.fail(&mut inner, &err);
            return Err(err);
        }
        Ok(())
    }

    fn apply_config(session: &mut ActiveSession, config: SessionConfig) -> PipelineResult<()> {
        config.validate()?;

        let resources = &mut session.resources;
        let capture = resources.capture.as_mut().ok_or(PipelineError::NotRunning)?;
        let encoder = resources.encoder.as_mut().ok_or(PipelineError::NotRunning)?;

        capture.resize(config.width, config.height, config.dpi)?;

        encoder.stop()?;
        let surface = encoder.configure(&EncoderConfig::from(&config))?;

        if let Err(e) = capture.set_surface(&surface) {
            // The capture still targets the old surface; nothing else will.
            if let Some(old) = capture.surface() {
                old.release();
            }
            return Err(e.into());
        }
        encoder.start()?;

        session.surface = Some(surface);
        session.config = config;
        session.header_sent = false;
        session.pending_header = None;
        Ok(())
    }

    fn reap_pump(&self) {
        let handle = self.pump.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Pump thread panicked");
            }
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Err(e) = self.stop_session() {
            warn!("Stop on drop failed: {}", e);
        }
        self.reap_pump();
    }
}
