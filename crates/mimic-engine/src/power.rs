//! Power/wake reservation.

use tracing::{debug, warn};

use crate::error::PowerError;

/// Platform wake lock keeping the device awake and the screen lit.
pub trait WakeLock: Send {
    fn acquire(&mut self) -> Result<(), PowerError>;

    fn release(&mut self);

    fn name(&self) -> &'static str;
}

/// A held wake lock, released exactly once.
pub struct WakeReservation {
    lock: Box<dyn WakeLock>,
    held: bool,
}

impl WakeReservation {
    /// Acquire `lock` for the duration of a session.
    pub fn acquire(mut lock: Box<dyn WakeLock>) -> Result<Self, PowerError> {
        lock.acquire()?;
        debug!(lock = lock.name(), "Wake lock acquired");
        Ok(Self { lock, held: true })
    }

    /// Release the lock. Idempotent.
    pub fn release(&mut self) {
        if !self.held {
            return;
        }
        self.held = false;
        self.lock.release();
        debug!(lock = self.lock.name(), "Wake lock released");
    }

    /// Returns true until released.
    pub fn is_held(&self) -> bool {
        self.held
    }
}

impl Drop for WakeReservation {
    fn drop(&mut self) {
        if self.held {
            warn!("Wake reservation dropped while held");
            self.release();
        }
    }
}

/// Wake lock for hosts with nothing to keep awake.
#[derive(Debug, Default)]
pub struct NullWakeLock;

impl WakeLock for NullWakeLock {
    fn acquire(&mut self) -> Result<(), PowerError> {
        Ok(())
    }

    fn release(&mut self) {}

    fn name(&self) -> &'static str {
        "null"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    struct Counting(Arc<AtomicUsize>);

    impl WakeLock for Counting {
        fn acquire(&mut self) -> Result<(), PowerError> {
            Ok(())
        }

        fn release(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    #[test]
    fn test_released_once() {
        let releases = Arc::new(AtomicUsize::new(0));
        let mut reservation =
            WakeReservation::acquire(Box::new(Counting(Arc::clone(&releases)))).unwrap();
        reservation.release();
        reservation.release();
        drop(reservation);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases() {
        let releases = Arc::new(AtomicUsize::new(0));
        let reservation = WakeReservation::acquire(Box::new(Counting(Arc::clone(&releases)))).unwrap();
        assert!(reservation.is_held());
        drop(reservation);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }
}
