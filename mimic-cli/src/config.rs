//! Session configuration loading.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use mimic_ipc::SessionConfig;

/// Command-line overrides applied on top of the configuration file.
#[derive(Args, Debug, Clone, Default)]
pub struct Overrides {
    /// Capture width in pixels
    #[arg(long)]
    pub width: Option<u32>,

    /// Capture height in pixels
    #[arg(long)]
    pub height: Option<u32>,

    /// Virtual display density
    #[arg(long)]
    pub dpi: Option<u32>,

    /// Encoder bit rate in bits per second
    #[arg(long)]
    pub bitrate: Option<u32>,

    /// Target frames per second
    #[arg(long)]
    pub fps: Option<u32>,

    /// Do not write the codec header in-band
    #[arg(long)]
    pub no_header: bool,
}

impl Overrides {
    fn apply(&self, config: &mut SessionConfig) {
        if let Some(width) = self.width {
            config.width = width;
        }
        if let Some(height) = self.height {
            config.height = height;
        }
        if let Some(dpi) = self.dpi {
            config.dpi = dpi;
        }
        if let Some(bitrate) = self.bitrate {
            config.bitrate_bps = bitrate;
        }
        if let Some(fps) = self.fps {
            config.frame_rate = fps;
        }
        if self.no_header {
            config.send_codec_header = false;
        }
    }
}

/// Build the session configuration from an optional JSON file and overrides.
pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<SessionConfig> {
    let mut config = match path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => SessionConfig::default(),
    };

    overrides.apply(&mut config);
    config.validate().context("Invalid session configuration")?;
    Ok(config)
}
