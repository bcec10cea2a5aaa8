//! Frame sink implementations.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use tracing::{debug, info, instrument, warn};

use crate::error::SinkError;
use crate::SinkResult;

/// A single writable byte channel.
///
/// Bytes are delivered in submission order. Implementations perform one
/// underlying write per call and keep nothing queued afterwards; a slow
/// channel blocks the caller.
pub trait FrameSink: Send {
    /// Write all of `bytes`, or fail with [`SinkError::Disconnected`].
    fn write(&mut self, bytes: &[u8]) -> SinkResult<()>;

    /// Close the channel. Idempotent, and safe on a broken channel.
    fn close(&mut self) -> SinkResult<()>;

    /// Returns true until `close` has been called.
    fn is_open(&self) -> bool;
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
    fn write(&mut self, bytes: &[u8]) -> SinkResult<()> {
        (**self).write(bytes)
    }

    fn close(&mut self) -> SinkResult<()> {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}

/// Frame sink over any [`Write`] implementation.
#[derive(Debug)]
pub struct WriterSink<W: Write + Send> {
    writer: Option<W>,
    bytes_written: u64,
    broken: bool,
}

impl<W: Write + Send> WriterSink<W> {
    /// Wrap an already-open writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Some(writer),
            bytes_written: 0,
            broken: false,
        }
    }

    /// Total bytes successfully written.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Returns the writer if the sink has not been closed.
    pub fn get_ref(&self) -> Option<&W> {
        self.writer.as_ref()
    }

    /// Consume the sink and return the writer, if still open.
    pub fn into_inner(mut self) -> Option<W> {
        self.writer.take()
    }
}

impl WriterSink<File> {
    /// Open a transport device node (for example the accessory gadget)
    /// for writing.
    #[instrument(name = "sink_open_device", skip_all, fields(path = %path.as_ref().display()))]
    pub fn open_device(path: impl AsRef<Path>) -> SinkResult<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|source| SinkError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        info!("Opened transport device");
        Ok(Self::new(file))
    }
}

impl<W: Write + Send> FrameSink for WriterSink<W> {
    fn write(&mut self, bytes: &[u8]) -> SinkResult<()> {
        let writer = self.writer.as_mut().ok_or(SinkError::Closed)?;

        let result = writer.write_all(bytes).and_then(|()| writer.flush());
        match result {
            Ok(()) => {
                self.bytes_written += bytes.len() as u64;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, len = bytes.len(), "Sink write failed");
                self.broken = true;
                Err(SinkError::Disconnected(e))
            }
        }
    }

    fn close(&mut self) -> SinkResult<()> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };

        // A broken channel has nothing left to flush.
        if !self.broken {
            if let Err(e) = writer.flush() {
                debug!(error = %e, "Flush on close failed");
            }
        }
        drop(writer);

        debug!(bytes_written = self.bytes_written, "Sink closed");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.writer.is_some()
    }
}

impl<W: Write + Send> Drop for WriterSink<W> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"))
        }
    }

    #[test]
    fn test_writes_in_order() {
        let mut sink = WriterSink::new(Vec::new());
        sink.write(b"abc").unwrap();
        sink.write(b"").unwrap();
        sink.write(b"def").unwrap();
        assert_eq!(sink.bytes_written(), 6);
        assert_eq!(sink.get_ref().unwrap().as_slice(), b"abcdef");
    }

    #[test]
    fn test_broken_pipe_is_disconnect() {
        let mut sink = WriterSink::new(BrokenPipe);
        let err = sink.write(b"frame").unwrap_err();
        assert!(matches!(err, SinkError::Disconnected(_)));
        assert!(err.is_disconnect());
        assert_eq!(sink.bytes_written(), 0);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut sink = WriterSink::new(BrokenPipe);
        let _ = sink.write(b"x");
        assert!(sink.close().is_ok());
        assert!(!sink.is_open());
        assert!(sink.close().is_ok());
    }

    #[test]
    fn test_write_after_close() {
        let mut sink = WriterSink::new(Vec::new());
        sink.close().unwrap();
        assert!(matches!(sink.write(b"x"), Err(SinkError::Closed)));
    }

    #[test]
    fn test_open_missing_device() {
        let err = WriterSink::open_device("/nonexistent/mimic/accessory").unwrap_err();
        assert!(matches!(err, SinkError::Open { .. }));
    }
}
