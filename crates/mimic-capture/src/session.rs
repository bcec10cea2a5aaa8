//! Virtual display binding.

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, instrument, warn};

use mimic_ipc::Surface;

use crate::error::CaptureError;
use crate::grant::CaptureGrant;
use crate::{CaptureResult, DISPLAY_EVENT_CHANNEL_CAPACITY};

/// Virtual display geometry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayParams {
    /// Display name shown by the platform.
    pub name: String,

    /// Width in pixels.
    pub width: u32,

    /// Height in pixels.
    pub height: u32,

    /// Density in dots per inch.
    pub dpi: u32,
}

/// Asynchronous notifications from the display backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayEvent {
    /// The platform withdrew the capture grant.
    Revoked,

    /// The display failed and stopped producing frames.
    Fault(String),
}

/// Platform virtual-display contract.
pub trait DisplayBackend: Send {
    /// Create a virtual display mirroring the screen into `surface`.
    fn create_virtual_display(
        &mut self,
        grant: &CaptureGrant,
        params: &DisplayParams,
        surface: &Surface,
        events: Sender<DisplayEvent>,
    ) -> CaptureResult<()>;

    /// Change the display geometry.
    fn resize(&mut self, width: u32, height: u32, dpi: u32) -> CaptureResult<()>;

    /// Redirect display output to `surface`.
    fn set_surface(&mut self, surface: &Surface) -> CaptureResult<()>;

    /// Tear down the virtual display.
    fn release_display(&mut self);

    /// Get backend name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Description of a started capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureHandle {
    /// Display geometry.
    pub params: DisplayParams,

    /// Id of the bound surface.
    pub surface_id: u64,
}

struct Binding {
    grant: CaptureGrant,
    params: DisplayParams,
    surface: Surface,
}

/// A screen capture bound to one surface at a time.
pub struct CaptureSession {
    backend: Box<dyn DisplayBackend>,
    binding: Option<Binding>,
    events_tx: Sender<DisplayEvent>,
    events_rx: Receiver<DisplayEvent>,
}

impl CaptureSession {
    /// Create an idle capture session over a platform backend.
    pub fn new(backend: Box<dyn DisplayBackend>) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::bounded(DISPLAY_EVENT_CHANNEL_CAPACITY);

        Self {
            backend,
            binding: None,
            events_tx,
            events_rx,
        }
    }

    /// Start capturing into `surface`.
    #[instrument(name = "capture_start", skip(self, grant, surface), fields(backend = self.backend.name()))]
    pub fn start(
        &mut self,
        grant: &CaptureGrant,
        name: &str,
        width: u32,
        height: u32,
        dpi: u32,
        surface: &Surface,
    ) -> CaptureResult<CaptureHandle> {
        if self.binding.is_some() {
            return Err(CaptureError::AlreadyStarted);
        }
        if grant.is_revoked() {
            return Err(CaptureError::PermissionDenied("grant revoked".into()));
        }
        if !grant.is_valid() {
            return Err(CaptureError::PermissionDenied("grant invalid or expired".into()));
        }
        if !surface.is_valid() {
            return Err(CaptureError::SurfaceRejected(format!(
                "surface {} already released",
                surface.id()
            )));
        }

        let params = DisplayParams {
            name: name.to_string(),
            width,
            height,
            dpi,
        };

        // Discard notifications left over from a previous binding.
        while self.events_rx.try_recv().is_ok() {}

        self.backend
            .create_virtual_display(grant, &params, surface, self.events_tx.clone())?;

        info!(width, height, dpi, surface = surface.id(), "Capture started");

        let handle = CaptureHandle {
            params: params.clone(),
            surface_id: surface.id(),
        };
        self.binding = Some(Binding {
            grant: grant.clone(),
            params,
            surface: surface.clone(),
        });
        Ok(handle)
    }

    /// Change the capture geometry. Call before swapping in a surface of
    /// the new size.
    #[instrument(name = "capture_resize", skip(self))]
    pub fn resize(&mut self, width: u32, height: u32, dpi: u32) -> CaptureResult<()> {
        let binding = self.binding.as_mut().ok_or(CaptureError::NotStarted)?;

        self.backend.resize(width, height, dpi)?;
        binding.params.width = width;
        binding.params.height = height;
        binding.params.dpi = dpi;

        debug!("Capture resized");
        Ok(())
    }

    /// Rebind the live capture to `surface`.
    ///
    /// On success the previous surface has been released by the time this
    /// returns. On failure the previous binding is untouched.
    #[instrument(name = "capture_set_surface", skip(self, surface), fields(surface = surface.id()))]
    pub fn set_surface(&mut self, surface: &Surface) -> CaptureResult<()> {
        let binding = self.binding.as_mut().ok_or(CaptureError::NotStarted)?;

        if binding.surface == *surface {
            return Ok(());
        }
        if !surface.is_valid() {
            return Err(CaptureError::SurfaceRejected(format!(
                "surface {} already released",
                surface.id()
            )));
        }

        self.backend.set_surface(surface)?;

        let previous = std::mem::replace(&mut binding.surface, surface.clone());
        previous.release();

        debug!(previous = previous.id(), "Capture surface swapped");
        Ok(())
    }

    /// Stop capturing and release the display binding. Idempotent.
    #[instrument(name = "capture_stop", skip(self), fields(backend = self.backend.name()))]
    pub fn stop(&mut self) -> CaptureResult<()> {
        let Some(binding) = self.binding.take() else {
            return Ok(());
        };

        self.backend.release_display();
        info!(surface = binding.surface.id(), "Capture stopped");
        Ok(())
    }

    /// Notifications from the backend.
    pub fn events(&self) -> Receiver<DisplayEvent> {
        self.events_rx.clone()
    }

    /// Check whether the grant behind the live capture still holds.
    pub fn grant_valid(&self) -> bool {
        self.binding
            .as_ref()
            .map(|b| b.grant.is_valid())
            .unwrap_or(true)
    }

    /// Check if capture is active.
    pub fn is_active(&self) -> bool {
        self.binding.is_some()
    }

    /// The currently bound surface.
    pub fn surface(&self) -> Option<&Surface> {
        self.binding.as_ref().map(|b| &b.surface)
    }

    /// Current display geometry.
    pub fn params(&self) -> Option<&DisplayParams> {
        self.binding.as_ref().map(|b| &b.params)
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Capture stop on drop failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct Record {
        ops: Vec<String>,
        reject_surfaces: bool,
    }

    struct RecordingBackend(Arc<Mutex<Record>>);

    impl DisplayBackend for RecordingBackend {
        fn create_virtual_display(
            &mut self,
            _grant: &CaptureGrant,
            params: &DisplayParams,
            surface: &Surface,
            _events: Sender<DisplayEvent>,
        ) -> CaptureResult<()> {
            self.0
                .lock()
                .ops
                .push(format!("create {}x{} -> {}", params.width, params.height, surface.id()));
            Ok(())
        }

        fn resize(&mut self, width: u32, height: u32, dpi: u32) -> CaptureResult<()> {
            self.0.lock().ops.push(format!("resize {width}x{height}@{dpi}"));
            Ok(())
        }

        fn set_surface(&mut self, surface: &Surface) -> CaptureResult<()> {
            let mut record = self.0.lock();
            if record.reject_surfaces {
                return Err(CaptureError::SurfaceRejected("backend refused".into()));
            }
            record.ops.push(format!("set_surface {}", surface.id()));
            Ok(())
        }

        fn release_display(&mut self) {
            self.0.lock().ops.push("release".into());
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    fn session() -> (CaptureSession, Arc<Mutex<Record>>) {
        let record = Arc::new(Mutex::new(Record::default()));
        let session = CaptureSession::new(Box::new(RecordingBackend(Arc::clone(&record))));
        (session, record)
    }

    #[test]
    fn test_start_requires_valid_grant() {
        let (mut session, record) = session();
        let grant = CaptureGrant::new("token");
        grant.revoke();

        let err = session
            .start(&grant, "Mimic", 800, 480, 120, &Surface::new(800, 480))
            .unwrap_err();
        assert!(matches!(err, CaptureError::PermissionDenied(_)));
        assert!(record.lock().ops.is_empty());
    }

    #[test]
    fn test_start_rejects_released_surface() {
        let (mut session, _record) = session();
        let surface = Surface::new(800, 480);
        surface.release();

        let err = session
            .start(&CaptureGrant::new("token"), "Mimic", 800, 480, 120, &surface)
            .unwrap_err();
        assert!(matches!(err, CaptureError::SurfaceRejected(_)));
        assert!(!session.is_active());
    }

    #[test]
    fn test_set_surface_releases_previous() {
        let (mut session, record) = session();
        let first = Surface::new(800, 480);
        let second = Surface::new(480, 800);
        session
            .start(&CaptureGrant::new("token"), "Mimic", 800, 480, 120, &first)
            .unwrap();

        session.resize(480, 800, 120).unwrap();
        session.set_surface(&second).unwrap();

        assert!(!first.is_valid());
        assert!(second.is_valid());
        assert_eq!(session.surface(), Some(&second));
        assert_eq!(session.params().unwrap().width, 480);
        assert_eq!(
            record.lock().ops[1..].to_vec(),
            vec![
                "resize 480x800@120".to_string(),
                format!("set_surface {}", second.id()),
            ]
        );
    }

    #[test]
    fn test_rejected_swap_keeps_binding() {
        let (mut session, record) = session();
        let first = Surface::new(800, 480);
        session
            .start(&CaptureGrant::new("token"), "Mimic", 800, 480, 120, &first)
            .unwrap();
        record.lock().reject_surfaces = true;

        assert!(session.set_surface(&Surface::new(800, 480)).is_err());
        assert!(first.is_valid());
        assert_eq!(session.surface(), Some(&first));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (mut session, record) = session();
        session.stop().unwrap();
        session
            .start(&CaptureGrant::new("token"), "Mimic", 800, 480, 120, &Surface::new(800, 480))
            .unwrap();
        session.stop().unwrap();
        session.stop().unwrap();
        assert_eq!(record.lock().ops.iter().filter(|op| *op == "release").count(), 1);
    }

    #[test]
    fn test_double_start() {
        let (mut session, _record) = session();
        let grant = CaptureGrant::new("token");
        let surface = Surface::new(800, 480);
        session.start(&grant, "Mimic", 800, 480, 120, &surface).unwrap();
        assert!(matches!(
            session.start(&grant, "Mimic", 800, 480, 120, &surface),
            Err(CaptureError::AlreadyStarted)
        ));
    }

    #[test]
    fn test_grant_revoked_mid_session() {
        let (mut session, _record) = session();
        let grant = CaptureGrant::new("token");
        session
            .start(&grant, "Mimic", 800, 480, 120, &Surface::new(800, 480))
            .unwrap();
        assert!(session.grant_valid());
        grant.revoke();
        assert!(!session.grant_valid());
    }
}
