//! Gapless playback of inbound agent audio.
//!
//! Each decoded buffer starts at `max(now, next_start_time)` on the output
//! clock, and `next_start_time` then advances by the buffer's duration. So
//! buffers never overlap, and when the network falls behind real time the
//! schedule snaps forward to "now" instead of scheduling into the past.

use std::time::Duration;

use tracing::debug;

use crate::device::{AudioOutput, BufferId};
use crate::error::Result;
use crate::frame::{EncodedChunk, PLAYBACK_SAMPLE_RATE};

/// Where and when an enqueued buffer was placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledBuffer {
    pub id: BufferId,
    pub start: Duration,
    pub duration: Duration,
    /// This buffer ended an idle period.
    pub started_speaking: bool,
}

pub struct PlaybackScheduler {
    output: Box<dyn AudioOutput>,
    next_start_time: Duration,
    next_id: BufferId,
    speaking: bool,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        Self {
            output,
            next_start_time: Duration::ZERO,
            next_id: 0,
            speaking: false,
        }
    }

    /// Decodes `chunk` and schedules it right after everything already queued.
    ///
    /// A chunk that fails to decode leaves the clock untouched.
    pub fn enqueue(&mut self, chunk: &EncodedChunk) -> Result<ScheduledBuffer> {
        let frame = chunk.decode(PLAYBACK_SAMPLE_RATE)?;
        let duration = frame.duration();
        let start = self.output.current_time().max(self.next_start_time);
        let id = self.next_id;

        self.output.schedule(id, frame, start)?;
        self.next_id += 1;
        self.next_start_time = start + duration;

        let started_speaking = !self.speaking;
        self.speaking = true;
        debug!(id, start = ?start, duration = ?duration, "Scheduled playback buffer");

        Ok(ScheduledBuffer {
            id,
            start,
            duration,
            started_speaking,
        })
    }

    /// Handles an end-of-buffer notification. Returns `true` when playback
    /// has drained, i.e. the output clock has reached `next_start_time`.
    ///
    /// This is advisory: with heavy jitter a chunk can arrive just after the
    /// drain was reported.
    pub fn on_buffer_ended(&mut self, id: BufferId) -> bool {
        if !self.speaking {
            return false;
        }
        let drained = self.output.current_time() >= self.next_start_time;
        if drained {
            debug!(id, "Playback drained");
            self.speaking = false;
        }
        drained
    }

    /// Silences everything and rewinds the clock.
    pub fn reset(&mut self) {
        self.output.stop_all();
        self.next_start_time = Duration::ZERO;
        self.speaking = false;
    }

    pub fn next_start_time(&self) -> Duration {
        self.next_start_time
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }
}
