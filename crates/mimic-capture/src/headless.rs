//! Display backend with no physical screen behind it.

use crossbeam_channel::Sender;
use tracing::{debug, info};

use mimic_ipc::Surface;

use crate::error::CaptureError;
use crate::grant::CaptureGrant;
use crate::session::{DisplayBackend, DisplayEvent, DisplayParams};
use crate::CaptureResult;

/// A virtual display that tracks its binding but renders nothing.
///
/// Pairs with an encoder that generates its own content, such as the
/// synthetic codec, on hosts without a screen to capture.
#[derive(Default)]
pub struct HeadlessDisplay {
    params: Option<DisplayParams>,
    surface: Option<Surface>,
    events: Option<Sender<DisplayEvent>>,
}

impl HeadlessDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a fault as if the platform display had failed.
    pub fn inject_fault(&self, message: impl Into<String>) -> bool {
        self.events
            .as_ref()
            .map(|tx| tx.try_send(DisplayEvent::Fault(message.into())).is_ok())
            .unwrap_or(false)
    }
}

impl DisplayBackend for HeadlessDisplay {
    fn create_virtual_display(
        &mut self,
        _grant: &CaptureGrant,
        params: &DisplayParams,
        surface: &Surface,
        events: Sender<DisplayEvent>,
    ) -> CaptureResult<()> {
        if params.width == 0 || params.height == 0 {
            return Err(CaptureError::Backend(format!(
                "invalid display size {}x{}",
                params.width, params.height
            )));
        }

        info!(name = %params.name, width = params.width, height = params.height, "Headless display created");
        self.params = Some(params.clone());
        self.surface = Some(surface.clone());
        self.events = Some(events);
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32, dpi: u32) -> CaptureResult<()> {
        let params = self
            .params
            .as_mut()
            .ok_or_else(|| CaptureError::Backend("no display".into()))?;
        params.width = width;
        params.height = height;
        params.dpi = dpi;
        Ok(())
    }

    fn set_surface(&mut self, surface: &Surface) -> CaptureResult<()> {
        if self.params.is_none() {
            return Err(CaptureError::Backend("no display".into()));
        }
        debug!(surface = surface.id(), "Headless display retargeted");
        self.surface = Some(surface.clone());
        Ok(())
    }

    fn release_display(&mut self) {
        self.params = None;
        self.surface = None;
        self.events = None;
    }

    fn name(&self) -> &'static str {
        "headless"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_injected_fault_is_reported() {
        assert!(!HeadlessDisplay::new().inject_fault("unbound"));

        let mut display = HeadlessDisplay::new();
        let params = DisplayParams {
            name: "Mimic".into(),
            width: 64,
            height: 48,
            dpi: 120,
        };
        let (tx, rx) = crossbeam_channel::bounded(1);
        display
            .create_virtual_display(&CaptureGrant::new("token"), &params, &Surface::new(64, 48), tx)
            .unwrap();
        assert!(display.inject_fault("vsync lost"));
        assert_eq!(rx.try_recv().unwrap(), DisplayEvent::Fault("vsync lost".into()));

        display.release_display();
        assert!(!display.inject_fault("after release"));
    }

    #[test]
    fn test_rejects_empty_display() {
        let mut display = HeadlessDisplay::new();
        let params = DisplayParams {
            name: "Mimic".into(),
            width: 0,
            height: 48,
            dpi: 120,
        };
        let (tx, _rx) = crossbeam_channel::bounded(1);
        assert!(matches!(
            display.create_virtual_display(&CaptureGrant::new("token"), &params, &Surface::new(0, 48), tx),
            Err(CaptureError::Backend(_))
        ));
        assert!(display.set_surface(&Surface::new(64, 48)).is_err());
    }
}
