//! Command-driven front end for the pipeline.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info, instrument, warn};

use mimic_ipc::{SessionConfig, SessionEvent};

use crate::pipeline::{Pipeline, StartRequest, StopOutcome};
use crate::platform::PlatformServices;

/// Bound on queued commands.
pub const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Commands accepted by the [`Engine`].
#[derive(Debug)]
pub enum SessionCommand {
    /// Begin a session.
    Start(StartRequest),

    /// End the running session.
    Stop,

    /// Apply a new configuration to the running session.
    Reconfigure(SessionConfig),

    /// Publish the current state.
    GetState,

    /// Stop any session and exit the run loop.
    Shutdown,
}

/// Create a bounded command channel.
pub fn command_channel() -> (Sender<SessionCommand>, Receiver<SessionCommand>) {
    bounded(COMMAND_CHANNEL_CAPACITY)
}

/// Serializes commands onto a [`Pipeline`].
pub struct Engine {
    command_rx: Receiver<SessionCommand>,
    event_tx: Sender<SessionEvent>,
    pipeline: Pipeline,
}

impl Engine {
    /// Create a new engine.
    pub fn new(
        platform: Arc<dyn PlatformServices>,
        command_rx: Receiver<SessionCommand>,
        event_tx: Sender<SessionEvent>,
    ) -> Self {
        let pipeline = Pipeline::new(platform, event_tx.clone());
        Self {
            command_rx,
            event_tx,
            pipeline,
        }
    }

    /// The pipeline this engine drives.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Run the engine (blocking).
    #[instrument(name = "engine_run", skip(self))]
    pub fn run(&mut self) {
        info!("Engine starting");
        self.send_event(SessionEvent::Ready);

        loop {
            match self.command_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(command) => {
                    if !self.handle_command(command) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Command channel disconnected, shutting down");
                    self.stop();
                    break;
                }
            }
        }

        info!("Engine stopped");
    }

    /// Handle a command. Returns false if the engine should stop.
    fn handle_command(&mut self, command: SessionCommand) -> bool {
        debug!(?command, "Handling command");

        match command {
            SessionCommand::Start(request) => {
                if let Err(e) = self.pipeline.start_session(request) {
                    error!("Session start failed: {}", e);
                    self.send_event(SessionEvent::Error {
                        message: e.to_string(),
                    });
                }
            }
            SessionCommand::Stop => self.stop(),
            SessionCommand::Reconfigure(config) => {
                if let Err(e) = self.pipeline.reconfigure(config) {
                    error!("Reconfigure failed: {}", e);
                    self.send_event(SessionEvent::Error {
                        message: e.to_string(),
                    });
                }
            }
            SessionCommand::GetState => {
                let state = self.pipeline.state();
                self.send_event(SessionEvent::StateChanged {
                    previous: state,
                    current: state,
                });
            }
            SessionCommand::Shutdown => {
                self.stop();
                self.send_event(SessionEvent::Shutdown);
                return false;
            }
        }

        true
    }

    fn stop(&self) {
        match self.pipeline.stop_session() {
            Ok(StopOutcome::Stopped) => info!("Session stopped"),
            Ok(StopOutcome::NotRunning) => debug!("No session to stop"),
            Err(e) => {
                error!("Stop failed: {}", e);
                self.send_event(SessionEvent::Error {
                    message: e.to_string(),
                });
            }
        }
    }

    fn send_event(&self, event: SessionEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("Failed to send event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use mimic_capture::CaptureGrant;
    use mimic_ipc::{event_channel, EndReason};
    use mimic_transport::WriterSink;

    use super::*;
    use crate::platform::HeadlessPlatform;

    fn test_config() -> SessionConfig {
        SessionConfig {
            width: 64,
            height: 48,
            frame_rate: 120,
            drain_timeout_ms: 0,
            ..SessionConfig::default()
        }
    }

    #[test]
    fn test_engine_runs_a_session_to_completion() {
        let (cmd_tx, cmd_rx) = command_channel();
        let (event_tx, event_rx) = event_channel();

        let handle = thread::spawn(move || {
            let mut engine = Engine::new(Arc::new(HeadlessPlatform), cmd_rx, event_tx);
            engine.run();
        });

        let sink = WriterSink::new(Vec::new());
        cmd_tx
            .send(SessionCommand::Start(StartRequest::new(
                CaptureGrant::new("grant"),
                Box::new(sink),
                test_config(),
            )))
            .unwrap();
        thread::sleep(Duration::from_millis(100));
        cmd_tx.send(SessionCommand::Stop).unwrap();
        cmd_tx.send(SessionCommand::Shutdown).unwrap();
        handle.join().unwrap();

        let events: Vec<_> = event_rx.try_iter().collect();
        assert!(matches!(events.first(), Some(SessionEvent::Ready)));
        assert!(matches!(events.last(), Some(SessionEvent::Shutdown)));

        let reasons: Vec<_> = events.iter().filter_map(SessionEvent::end_reason).collect();
        assert_eq!(reasons, vec![EndReason::Completed]);

        let buffers = events.iter().find_map(|e| match e {
            SessionEvent::Stats(stats) => Some(stats.buffers_written),
            _ => None,
        });
        assert!(buffers.unwrap_or(0) > 0);
    }

    #[test]
    fn test_start_failure_reported_as_error_event() {
        let (cmd_tx, cmd_rx) = command_channel();
        let (event_tx, event_rx) = event_channel();
        let mut engine = Engine::new(Arc::new(HeadlessPlatform), cmd_rx, event_tx);

        let grant = CaptureGrant::new("grant");
        grant.revoke();
        cmd_tx
            .send(SessionCommand::Start(StartRequest::new(
                grant,
                Box::new(WriterSink::new(Vec::new())),
                test_config(),
            )))
            .unwrap();
        cmd_tx.send(SessionCommand::Shutdown).unwrap();
        engine.run();

        let events: Vec<_> = event_rx.try_iter().collect();
        assert!(events
            .iter()
            .any(|e| e.end_reason() == Some(EndReason::PermissionRevoked)));
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::Error { .. })));
        assert!(engine.pipeline().state().is_idle());
    }
}
