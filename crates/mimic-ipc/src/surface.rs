//! Encoder input surface handle.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

/// A surface the encoder consumes and a capture source renders into.
///
/// Clones share the same underlying surface. Once released, every clone
/// reports the surface as invalid.
#[derive(Clone)]
pub struct Surface {
    inner: Arc<SurfaceInner>,
}

struct SurfaceInner {
    id: u64,
    width: u32,
    height: u32,
    released: AtomicBool,
}

impl Surface {
    /// Allocate a new surface of the given size.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            inner: Arc::new(SurfaceInner {
                id: NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed),
                width,
                height,
                released: AtomicBool::new(false),
            }),
        }
    }

    /// Process-unique surface id.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Surface dimensions.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.inner.width, self.inner.height)
    }

    /// Returns true until the surface is released.
    pub fn is_valid(&self) -> bool {
        !self.inner.released.load(Ordering::SeqCst)
    }

    /// Release the surface. Returns true if this call did the release.
    pub fn release(&self) -> bool {
        !self.inner.released.swap(true, Ordering::SeqCst)
    }
}

impl PartialEq for Surface {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Surface {}

impl fmt::Debug for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Surface")
            .field("id", &self.inner.id)
            .field("width", &self.inner.width)
            .field("height", &self.inner.height)
            .field("valid", &self.is_valid())
            .finish()
    }
}
