//! Audio device seams.
//!
//! Device callbacks (a captured block is ready, a scheduled buffer finished)
//! are never handled in place. Implementations push them as [`DeviceEvent`]s
//! onto the channel they are given, and the controller loop consumes them in
//! order. This keeps all mutation on one logical thread and lets tests drive
//! the pipeline without hardware.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::frame::AudioFrame;

/// Identifies one scheduled playback buffer.
pub type BufferId = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// Mono 16 kHz samples from the microphone, in capture order. Block size
    /// is whatever the device delivered.
    Captured(Vec<f32>),
    /// A buffer passed to [`AudioOutput::schedule`] finished playing.
    PlaybackEnded(BufferId),
}

pub type DeviceEventSender = mpsc::UnboundedSender<DeviceEvent>;

/// An acquired microphone. Acquisition happens in
/// [`AudioBackend::open_input`]; these calls only route blocks and must not
/// block.
#[cfg_attr(test, mockall::automock)]
pub trait AudioInput: Send {
    /// Begins pushing [`DeviceEvent::Captured`] blocks to `events`.
    fn start(&mut self, events: DeviceEventSender) -> Result<()>;

    /// Stops pushing blocks. Safe to call when not started.
    fn stop(&mut self);

    /// Gives the device back to the system. Idempotent.
    fn release(&mut self);
}

/// A speaker with its own monotonic clock.
#[cfg_attr(test, mockall::automock)]
pub trait AudioOutput: Send {
    /// Time elapsed on the output clock since the device was opened.
    fn current_time(&self) -> Duration;

    /// Plays `frame` starting at `start_at` on the output clock and reports
    /// [`DeviceEvent::PlaybackEnded`] with `id` when it finishes.
    fn schedule(&mut self, id: BufferId, frame: AudioFrame, start_at: Duration) -> Result<()>;

    /// Silences every scheduled buffer. No end events fire for them.
    fn stop_all(&mut self);
}

/// Opens audio devices for one connection.
#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Acquires a single-channel microphone and opens its stream. May
    /// suspend while the user is asked for permission; a refusal is
    /// `VoiceError::Permission`. Dropping the future abandons the device.
    async fn open_input(&self) -> Result<Box<dyn AudioInput>>;

    /// Opens the output device. End-of-buffer events go to `events`.
    /// Dropping the future abandons the device.
    async fn open_output(&self, events: DeviceEventSender) -> Result<Box<dyn AudioOutput>>;
}
