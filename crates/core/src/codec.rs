//! PCM16 and base64 conversions used on both sides of the wire.

use base64::Engine;

use crate::error::{Result, VoiceError};

/// Scale between normalized `f32` samples and signed 16-bit PCM.
const PCM16_SCALE: f32 = 32768.0;

/// Encodes normalized samples into little-endian signed 16-bit PCM.
///
/// Out-of-range samples are clamped rather than rejected. `NaN` encodes as
/// silence.
pub fn encode(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&sample| {
            let v = (sample * PCM16_SCALE)
                .round()
                .clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            v.to_le_bytes()
        })
        .collect()
}

/// Decodes little-endian signed 16-bit PCM into normalized samples.
pub fn decode(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.is_empty() {
        return Err(VoiceError::MalformedAudio("empty PCM buffer".to_string()));
    }
    if bytes.len() % 2 != 0 {
        return Err(VoiceError::MalformedAudio(format!(
            "PCM16 buffer has odd length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / PCM16_SCALE)
        .collect())
}

/// Wraps raw bytes in standard padded base64.
pub fn to_transport_text(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Reverses [`to_transport_text`].
pub fn from_transport_text(text: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(text)
        .map_err(|e| VoiceError::MalformedAudio(format!("invalid base64 payload: {e}")))
}
