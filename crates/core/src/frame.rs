//! Audio frames and their wire-ready encoded form.

use std::time::Duration;

use crate::codec;
use crate::error::{Result, VoiceError};

/// Microphone audio is sent to the agent at 16 kHz.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;
/// Agent audio arrives at 24 kHz.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;
/// Samples per outbound capture frame (256 ms at 16 kHz).
pub const CAPTURE_FRAME_SAMPLES: usize = 4096;

/// A block of mono samples at a known rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Playback length, computed in integer nanoseconds so equal sample
    /// counts always yield equal durations.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let nanos = self.samples.len() as u128 * 1_000_000_000 / self.sample_rate as u128;
        Duration::from_nanos(nanos as u64)
    }
}

/// PCM16 audio wrapped in base64 with a MIME tag naming its rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    pub mime_type: String,
    pub data: String,
}

impl EncodedChunk {
    /// Serializes a frame into the wire representation.
    pub fn from_frame(frame: &AudioFrame) -> Self {
        Self {
            mime_type: pcm_mime_type(frame.sample_rate()),
            data: codec::to_transport_text(&codec::encode(frame.samples())),
        }
    }

    /// Wraps an already base64-encoded PCM16 payload received from the wire.
    pub fn from_wire(data: impl Into<String>, sample_rate: u32) -> Self {
        Self {
            mime_type: pcm_mime_type(sample_rate),
            data: data.into(),
        }
    }

    /// The sample rate named by the MIME tag, if it carries one.
    pub fn sample_rate(&self) -> Option<u32> {
        self.mime_type
            .split(';')
            .filter_map(|param| param.trim().strip_prefix("rate="))
            .find_map(|rate| rate.parse().ok())
    }

    /// Decodes back into a frame. `default_rate` applies when the MIME tag
    /// does not name a rate.
    pub fn decode(&self, default_rate: u32) -> Result<AudioFrame> {
        if !self.mime_type.starts_with("audio/pcm") {
            return Err(VoiceError::MalformedAudio(format!(
                "unsupported mime type '{}'",
                self.mime_type
            )));
        }
        let bytes = codec::from_transport_text(&self.data)?;
        let samples = codec::decode(&bytes)?;
        Ok(AudioFrame::new(
            samples,
            self.sample_rate().unwrap_or(default_rate),
        ))
    }
}

/// `audio/pcm;rate=16000` style tag.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={sample_rate}")
}
