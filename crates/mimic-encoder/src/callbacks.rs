//! Codec callback bridge.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{SendTimeoutError, Sender};
use tracing::trace;

use crate::{OutputBuffer, OutputFormat};

/// How long a blocked callback waits before re-checking for shutdown.
const SEND_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A callback from the codec.
#[derive(Debug, Clone)]
pub enum CodecEvent {
    /// An input buffer is free. Never valid for a surface-fed encoder.
    InputBufferAvailable(usize),

    /// A compressed buffer is ready.
    OutputBufferAvailable(OutputBuffer),

    /// Output parameters are known.
    OutputFormatChanged(OutputFormat),

    /// The codec failed.
    Error(String),
}

/// A codec event tagged with the encoder run that produced it.
#[derive(Debug, Clone)]
pub struct TaggedEvent {
    /// Encoder run the event belongs to.
    pub epoch: u64,

    /// The event itself.
    pub event: CodecEvent,
}

/// Callback handle given to a [`Codec`](crate::Codec) at configure time.
///
/// Each method blocks while the channel is full, so a slow consumer
/// throttles the codec. Once the run is closed, callbacks return `false`
/// immediately and the event is dropped.
#[derive(Debug, Clone)]
pub struct CodecCallbacks {
    epoch: u64,
    tx: Sender<TaggedEvent>,
    closed: Arc<AtomicBool>,
}

impl CodecCallbacks {
    pub(crate) fn new(epoch: u64, tx: Sender<TaggedEvent>) -> Self {
        Self {
            epoch,
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn on_input_buffer_available(&self, index: usize) -> bool {
        self.deliver(CodecEvent::InputBufferAvailable(index))
    }

    pub fn on_output_buffer_available(&self, buffer: OutputBuffer) -> bool {
        self.deliver(CodecEvent::OutputBufferAvailable(buffer))
    }

    pub fn on_output_format_changed(&self, format: OutputFormat) -> bool {
        self.deliver(CodecEvent::OutputFormatChanged(format))
    }

    pub fn on_error(&self, message: impl Into<String>) -> bool {
        self.deliver(CodecEvent::Error(message.into()))
    }

    /// Returns true once the run these callbacks belong to has ended.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// End the run. Blocked and future callbacks return `false`.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn deliver(&self, event: CodecEvent) -> bool {
        let mut tagged = TaggedEvent {
            epoch: self.epoch,
            event,
        };

        loop {
            if self.is_closed() {
                trace!(epoch = self.epoch, "Dropping callback for closed run");
                return false;
            }

            match self.tx.send_timeout(tagged, SEND_POLL_INTERVAL) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(event)) => tagged = event,
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use bytes::Bytes;

    use super::*;

    #[test]
    fn test_events_are_tagged() {
        let (tx, rx) = crossbeam_channel::bounded(4);
        let callbacks = CodecCallbacks::new(7, tx);

        assert!(callbacks.on_output_buffer_available(OutputBuffer::new(
            2,
            Bytes::from_static(b"au"),
            33
        )));
        let tagged = rx.recv().unwrap();
        assert_eq!(tagged.epoch, 7);
        assert!(matches!(
            tagged.event,
            CodecEvent::OutputBufferAvailable(ref b) if b.index == 2 && b.pts_us == 33
        ));
    }

    #[test]
    fn test_closed_run_drops_events() {
        let (tx, rx) = crossbeam_channel::bounded(4);
        let callbacks = CodecCallbacks::new(1, tx);
        callbacks.close();
        assert!(!callbacks.on_error("late"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_full_channel_unblocks_on_close() {
        let (tx, _rx) = crossbeam_channel::bounded(1);
        let callbacks = CodecCallbacks::new(1, tx);
        assert!(callbacks.on_input_buffer_available(0));

        let blocked = callbacks.clone();
        let handle = thread::spawn(move || blocked.on_input_buffer_available(1));

        thread::sleep(Duration::from_millis(50));
        callbacks.close();
        assert!(!handle.join().unwrap());
    }
}
