//! Display orientation tracking.

use crossbeam_channel::{Receiver, Sender};
use tracing::{error, warn};

use mimic_ipc::Orientation;

/// Channel capacity for orientation notifications.
const ORIENTATION_CHANNEL_CAPACITY: usize = 16;

/// Creates a bounded channel for platform orientation notifications.
pub fn orientation_channel() -> (Sender<Orientation>, Receiver<Orientation>) {
    crossbeam_channel::bounded(ORIENTATION_CHANNEL_CAPACITY)
}

/// Records the last known orientation and filters out repeats.
///
/// Configuration-change notifications fire for many reasons besides
/// rotation; only an actual change is reported.
pub struct OrientationWatch {
    last: Orientation,
    rx: Receiver<Orientation>,
}

impl OrientationWatch {
    /// Watch `rx`, starting from the orientation at session start.
    pub fn new(initial: Orientation, rx: Receiver<Orientation>) -> Self {
        Self { last: initial, rx }
    }

    /// The notification channel.
    pub fn receiver(&self) -> Receiver<Orientation> {
        self.rx.clone()
    }

    /// Record a notification. Returns the new orientation if it changed.
    pub fn observe(&mut self, orientation: Orientation) -> Option<Orientation> {
        if orientation == self.last {
            return None;
        }
        self.last = orientation;

        match orientation {
            Orientation::Landscape => warn!("New orientation: landscape"),
            Orientation::Portrait => warn!("New orientation: portrait"),
            Orientation::Unknown => error!("New orientation: unknown"),
        }
        Some(orientation)
    }

    /// Last known orientation.
    pub fn last(&self) -> Orientation {
        self.last
    }
}
