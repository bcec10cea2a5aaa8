//! Per-session counters.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use mimic_ipc::SessionStats;

/// Collects counters for one session.
pub struct StatsCollector {
    started_at: Instant,
    buffers_written: AtomicU64,
    bytes_written: AtomicU64,
    key_frames: AtomicU64,
    buffers_discarded: AtomicU64,
    header_sent: AtomicBool,
}

impl StatsCollector {
    /// Start counting now.
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            buffers_written: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            key_frames: AtomicU64::new(0),
            buffers_discarded: AtomicU64::new(0),
            header_sent: AtomicBool::new(false),
        }
    }

    /// Record a compressed buffer written to the sink.
    pub fn record_buffer(&self, bytes: usize, is_key_frame: bool) {
        self.buffers_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
        if is_key_frame {
            self.key_frames.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a codec header written to the sink.
    pub fn record_header(&self, bytes: usize) {
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
        self.header_sent.store(true, Ordering::Relaxed);
    }

    /// Record a buffer released without being written.
    pub fn record_discard(&self) {
        self.buffers_discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Buffers written so far.
    pub fn buffers_written(&self) -> u64 {
        self.buffers_written.load(Ordering::Relaxed)
    }

    /// Get current counters.
    pub fn snapshot(&self) -> SessionStats {
        SessionStats {
            buffers_written: self.buffers_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            key_frames: self.key_frames.load(Ordering::Relaxed),
            buffers_discarded: self.buffers_discarded.load(Ordering::Relaxed),
            header_sent: self.header_sent.load(Ordering::Relaxed),
            uptime_ms: self.started_at.elapsed().as_millis() as u64,
        }
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let stats = StatsCollector::new();
        stats.record_header(14);
        stats.record_buffer(100, true);
        stats.record_buffer(20, false);
        stats.record_discard();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.buffers_written, 2);
        assert_eq!(snapshot.bytes_written, 134);
        assert_eq!(snapshot.key_frames, 1);
        assert_eq!(snapshot.buffers_discarded, 1);
        assert!(snapshot.header_sent);
    }
}
