//! Microphone capture: re-frames device blocks into fixed-size frames and
//! hands each one, encoded, to a frame handler.

use tracing::{debug, info};

use crate::device::{AudioInput, DeviceEventSender};
use crate::error::Result;
use crate::frame::{AudioFrame, CAPTURE_FRAME_SAMPLES, CAPTURE_SAMPLE_RATE, EncodedChunk};

/// Receives every encoded capture frame, in capture order.
pub type FrameHandler = Box<dyn FnMut(EncodedChunk) + Send>;

pub struct CapturePipeline {
    frame_samples: usize,
    sample_rate: u32,
    pending: Vec<f32>,
    running: bool,
    frames_emitted: u64,
    on_frame: FrameHandler,
}

impl CapturePipeline {
    /// A pipeline emitting 4096-sample frames at 16 kHz.
    pub fn new(on_frame: impl FnMut(EncodedChunk) + Send + 'static) -> Self {
        Self::with_frame_size(CAPTURE_FRAME_SAMPLES, CAPTURE_SAMPLE_RATE, on_frame)
    }

    pub fn with_frame_size(
        frame_samples: usize,
        sample_rate: u32,
        on_frame: impl FnMut(EncodedChunk) + Send + 'static,
    ) -> Self {
        Self {
            frame_samples: frame_samples.max(1),
            sample_rate,
            pending: Vec::with_capacity(frame_samples),
            running: false,
            frames_emitted: 0,
            on_frame: Box::new(on_frame),
        }
    }

    /// Starts the device. Calling it again while running does nothing.
    pub fn start(&mut self, input: &mut dyn AudioInput, events: DeviceEventSender) -> Result<()> {
        if self.running {
            return Ok(());
        }
        input.start(events)?;
        self.pending.clear();
        self.running = true;
        info!(frame_samples = self.frame_samples, "Microphone capture started");
        Ok(())
    }

    /// Feeds a block of captured samples; emits every frame it completes.
    /// Blocks arriving while stopped are ignored.
    pub fn push_samples(&mut self, samples: &[f32]) {
        if !self.running {
            return;
        }
        self.pending.extend_from_slice(samples);
        while self.pending.len() >= self.frame_samples {
            let frame = AudioFrame::new(
                self.pending.drain(..self.frame_samples).collect(),
                self.sample_rate,
            );
            self.frames_emitted += 1;
            debug!(frame = self.frames_emitted, "Capture frame ready");
            (self.on_frame)(EncodedChunk::from_frame(&frame));
        }
    }

    /// Stops the device and discards any partial frame. Safe when not started.
    pub fn stop(&mut self, input: &mut dyn AudioInput) {
        if !self.running {
            return;
        }
        input.stop();
        self.running = false;
        self.pending.clear();
        info!(frames = self.frames_emitted, "Microphone capture stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}
