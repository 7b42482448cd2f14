//! Device lookup and stream configuration shared by capture and playback.

use std::time::Duration;

use atlas_core::{Result, VoiceError};
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{SampleFormat, SampleRate, SupportedStreamConfig, SupportedStreamConfigRange};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Finds a device by name, or the host default when `name` is `None`.
pub fn find_device(name: Option<&str>, direction: Direction) -> Result<cpal::Device> {
    let host = cpal::default_host();
    let device = match (name, direction) {
        (None, Direction::Input) => host.default_input_device(),
        (None, Direction::Output) => host.default_output_device(),
        (Some(name), Direction::Input) => host
            .input_devices()
            .map_err(|e| device_error(direction, e))?
            .find(|d| d.name().is_ok_and(|n| n == name)),
        (Some(name), Direction::Output) => host
            .output_devices()
            .map_err(|e| device_error(direction, e))?
            .find(|d| d.name().is_ok_and(|n| n == name)),
    };
    device.ok_or_else(|| match direction {
        // No reachable microphone is indistinguishable from a denied one.
        Direction::Input => VoiceError::Permission(match name {
            Some(name) => format!("input device '{name}' is not available"),
            None => "no input device is available".to_string(),
        }),
        Direction::Output => VoiceError::Device(match name {
            Some(name) => format!("output device '{name}' is not available"),
            None => "no output device is available".to_string(),
        }),
    })
}

/// Picks a stream config running at `preferred_rate` when the device offers
/// one, else the device default.
pub fn choose_config(
    device: &cpal::Device,
    direction: Direction,
    preferred_rate: u32,
) -> Result<SupportedStreamConfig> {
    let ranges: Vec<SupportedStreamConfigRange> = match direction {
        Direction::Input => device
            .supported_input_configs()
            .map_err(|e| device_error(direction, e))?
            .collect(),
        Direction::Output => device
            .supported_output_configs()
            .map_err(|e| device_error(direction, e))?
            .collect(),
    };

    if let Some(range) = pick_range(&ranges, preferred_rate) {
        return Ok(range.clone().with_sample_rate(SampleRate(preferred_rate)));
    }

    match direction {
        Direction::Input => device.default_input_config(),
        Direction::Output => device.default_output_config(),
    }
    .map_err(|e| device_error(direction, e))
}

fn pick_range(
    ranges: &[SupportedStreamConfigRange],
    rate: u32,
) -> Option<&SupportedStreamConfigRange> {
    ranges
        .iter()
        .filter(|r| is_supported_format(r.sample_format()))
        .filter(|r| r.min_sample_rate().0 <= rate && rate <= r.max_sample_rate().0)
        .min_by_key(|r| r.channels())
}

pub fn is_supported_format(format: SampleFormat) -> bool {
    matches!(format, SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16)
}

fn device_error(direction: Direction, e: impl std::fmt::Display) -> VoiceError {
    match direction {
        Direction::Input => VoiceError::Permission(e.to_string()),
        Direction::Output => VoiceError::Device(e.to_string()),
    }
}

/// Whole frames in `duration` at `rate`, rounded to the nearest frame.
pub fn duration_to_frames(duration: Duration, rate: u32) -> u64 {
    ((duration.as_nanos() * rate as u128 + 500_000_000) / 1_000_000_000) as u64
}

pub fn frames_to_duration(frames: u64, rate: u32) -> Duration {
    Duration::from_nanos((frames as u128 * 1_000_000_000 / rate as u128) as u64)
}
