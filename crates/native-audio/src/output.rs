//! Speaker playback on a dedicated thread.
//!
//! Scheduled buffers are mixed into a shared [`Timeline`] whose position is
//! advanced by the output callback, so the timeline doubles as the device
//! clock reported through [`AudioOutput::current_time`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use atlas_core::device::{AudioOutput, BufferId, DeviceEvent, DeviceEventSender};
use atlas_core::frame::{AudioFrame, PLAYBACK_SAMPLE_RATE};
use atlas_core::{Result, VoiceError};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, StreamConfig};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::host::{Direction, choose_config, duration_to_frames, find_device, frames_to_duration};
use crate::resample::PlaybackResampler;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

struct Scheduled {
    id: BufferId,
    start: u64,
    samples: Vec<f32>,
}

impl Scheduled {
    fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }
}

/// Mono mix of scheduled buffers, addressed in device frames.
#[derive(Default)]
pub struct Timeline {
    position: u64,
    buffers: Vec<Scheduled>,
}

impl Timeline {
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Adds a buffer starting at frame `start`. A start in the past plays
    /// only the part still ahead of the cursor.
    pub fn schedule(&mut self, id: BufferId, start: u64, samples: Vec<f32>) {
        self.buffers.push(Scheduled { id, start, samples });
    }

    /// Mixes the next `out.len()` frames into `out` and advances the cursor.
    ///
    /// Returns the ids of buffers that finished within this block, in start order.
    pub fn render(&mut self, out: &mut [f32]) -> Vec<BufferId> {
        out.fill(0.0);
        let block_start = self.position;
        let block_end = block_start + out.len() as u64;

        for buffer in &self.buffers {
            let from = buffer.start.max(block_start);
            let to = buffer.end().min(block_end);
            for frame in from..to {
                out[(frame - block_start) as usize] +=
                    buffer.samples[(frame - buffer.start) as usize];
            }
        }
        self.position = block_end;

        let mut finished: Vec<&Scheduled> =
            self.buffers.iter().filter(|b| b.end() <= block_end).collect();
        finished.sort_by_key(|b| b.start);
        let ended: Vec<BufferId> = finished.into_iter().map(|b| b.id).collect();
        self.buffers.retain(|b| b.end() > block_end);
        ended
    }

    /// Drops every scheduled buffer without reporting it as ended.
    pub fn clear(&mut self) {
        self.buffers.clear();
    }

    pub fn pending(&self) -> usize {
        self.buffers.len()
    }
}

type SharedTimeline = Arc<Mutex<Timeline>>;

fn lock(timeline: &SharedTimeline) -> std::sync::MutexGuard<'_, Timeline> {
    timeline.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Places agent buffers on the device timeline.
///
/// A buffer that starts exactly where the previous one ended continues the
/// same run: it is resampled with the run's filter state and placed on the
/// frame right after the previous buffer's last sample.
pub struct PlaybackLane {
    device_rate: u32,
    resampler: PlaybackResampler,
    run_end: Option<Duration>,
    next_frame: u64,
}

impl PlaybackLane {
    pub fn new(device_rate: u32) -> Self {
        Self {
            device_rate,
            resampler: PlaybackResampler::new(device_rate),
            run_end: None,
            next_frame: 0,
        }
    }

    /// Returns the start frame and device-rate samples for `frame`.
    pub fn place(&mut self, frame: &AudioFrame, start_at: Duration) -> Result<(u64, Vec<f32>)> {
        let contiguous = self.run_end == Some(start_at);
        let samples = self
            .resampler
            .process(frame.samples(), frame.sample_rate(), contiguous)
            .map_err(|e| VoiceError::Device(e.to_string()))?;
        let start = if contiguous {
            self.next_frame
        } else {
            duration_to_frames(start_at, self.device_rate)
        };
        self.next_frame = start + samples.len() as u64;
        self.run_end = Some(start_at + frame.duration());
        Ok((start, samples))
    }

    /// Ends the current run; the next buffer starts a fresh one.
    pub fn break_run(&mut self) {
        self.run_end = None;
    }
}

/// The default (or named) output device, playing a [`Timeline`].
pub struct CpalOutput {
    timeline: SharedTimeline,
    lane: PlaybackLane,
    sample_rate: u32,
    stop: Arc<AtomicBool>,
}

impl CpalOutput {
    /// Builds and starts the output stream on its own thread, resolving once
    /// the device is playing. Dropping the future before then closes the
    /// stream as soon as it opens.
    pub(crate) async fn open(device_name: Option<String>, events: DeviceEventSender) -> Result<Self> {
        let timeline = SharedTimeline::default();
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = oneshot::channel();

        let thread_timeline = timeline.clone();
        let thread_stop = stop.clone();
        thread::Builder::new()
            .name("atlas-playback".into())
            .spawn(move || {
                playback_thread(device_name, thread_timeline, thread_stop, events, ready_tx)
            })
            .map_err(|e| VoiceError::Device(format!("failed to spawn playback thread: {e}")))?;

        match ready_rx.await {
            Ok(Ok(sample_rate)) => Ok(Self {
                timeline,
                lane: PlaybackLane::new(sample_rate),
                sample_rate,
                stop,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(VoiceError::Device(
                "playback thread exited before starting".into(),
            )),
        }
    }
}

impl AudioOutput for CpalOutput {
    fn current_time(&self) -> Duration {
        frames_to_duration(lock(&self.timeline).position(), self.sample_rate)
    }

    fn schedule(&mut self, id: BufferId, frame: AudioFrame, start_at: Duration) -> Result<()> {
        let (start, samples) = self.lane.place(&frame, start_at)?;
        lock(&self.timeline).schedule(id, start, samples);
        Ok(())
    }

    fn stop_all(&mut self) {
        self.lane.break_run();
        let mut timeline = lock(&self.timeline);
        if timeline.pending() > 0 {
            debug!(pending = timeline.pending(), "Cancelling scheduled playback");
        }
        timeline.clear();
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

fn playback_thread(
    device_name: Option<String>,
    timeline: SharedTimeline,
    stop: Arc<AtomicBool>,
    events: DeviceEventSender,
    ready: oneshot::Sender<Result<u32>>,
) {
    let (stream, rate) = match open_stream(device_name.as_deref(), timeline, events) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if ready.send(Ok(rate)).is_err() {
        debug!("Speaker opened after the caller gave up; closing it");
        return;
    }
    // The output owns the other handle to `stop`; losing it means it was dropped.
    while !stop.load(Ordering::SeqCst) && Arc::strong_count(&stop) > 1 {
        thread::sleep(POLL_INTERVAL);
    }
    drop(stream);
    info!("Speaker output closed");
}

fn open_stream(
    device_name: Option<&str>,
    timeline: SharedTimeline,
    events: DeviceEventSender,
) -> Result<(cpal::Stream, u32)> {
    let device = find_device(device_name, Direction::Output)?;
    let supported = choose_config(&device, Direction::Output, PLAYBACK_SAMPLE_RATE)?;
    let config = supported.config();
    debug!(
        device = %device.name().unwrap_or_default(),
        ?config,
        format = ?supported.sample_format(),
        "Opening output stream"
    );

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, timeline, events),
        SampleFormat::I16 => build_stream::<i16>(&device, &config, timeline, events),
        SampleFormat::U16 => build_stream::<u16>(&device, &config, timeline, events),
        other => Err(VoiceError::Device(format!(
            "unsupported output sample format {other:?}"
        ))),
    }?;
    stream
        .play()
        .map_err(|e| VoiceError::Device(e.to_string()))?;
    info!(rate = config.sample_rate.0, "Speaker output started");

    Ok((stream, config.sample_rate.0))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    timeline: SharedTimeline,
    events: DeviceEventSender,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels.max(1) as usize;
    let mut mono = Vec::<f32>::new();
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                mono.resize(data.len() / channels, 0.0);
                let ended = lock(&timeline).render(&mut mono);
                for (frame, &sample) in data.chunks_mut(channels).zip(mono.iter()) {
                    frame.fill(T::from_sample(sample.clamp(-1.0, 1.0)));
                }
                for id in ended {
                    let _ = events.send(DeviceEvent::PlaybackEnded(id));
                }
            },
            |err| warn!(error = %err, "Output stream error"),
            None,
        )
        .map_err(|e| VoiceError::Device(e.to_string()))
}
