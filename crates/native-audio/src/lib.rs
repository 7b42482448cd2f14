//! cpal-backed microphone and speaker for the Atlas voice client.
//!
//! Devices run at the rates the session expects when the hardware offers
//! them (16 kHz capture, 24 kHz playback) and are resampled otherwise.

pub mod host;
pub mod input;
pub mod output;
pub mod resample;

use async_trait::async_trait;
use atlas_core::device::{AudioBackend, AudioInput, AudioOutput, DeviceEventSender};
use atlas_core::Result;
use tracing::info;

use crate::input::CpalInput;
use crate::output::CpalOutput;

pub use atlas_core::frame::{CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE};

/// Opens the host's audio devices, by name or the system defaults.
#[derive(Clone, Debug, Default)]
pub struct CpalBackend {
    input_device: Option<String>,
    output_device: Option<String>,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input_device(mut self, name: impl Into<String>) -> Self {
        self.input_device = Some(name.into());
        self
    }

    pub fn with_output_device(mut self, name: impl Into<String>) -> Self {
        self.output_device = Some(name.into());
        self
    }
}

#[async_trait]
impl AudioBackend for CpalBackend {
    async fn open_input(&self) -> Result<Box<dyn AudioInput>> {
        let input = CpalInput::open(self.input_device.clone()).await?;
        info!(
            device = self.input_device.as_deref().unwrap_or("default"),
            "Microphone acquired"
        );
        Ok(Box::new(input))
    }

    async fn open_output(&self, events: DeviceEventSender) -> Result<Box<dyn AudioOutput>> {
        let output = CpalOutput::open(self.output_device.clone(), events).await?;
        Ok(Box::new(output))
    }
}
