//! Microphone capture on a dedicated thread.
//!
//! The cpal stream lives on the thread that built it. Its callback pushes raw
//! samples into a lock-free ring; the same thread drains the ring, downmixes to
//! mono, resamples to the capture rate and forwards the block to whichever
//! sender `start` installed. Blocks read while stopped are discarded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use atlas_core::device::{AudioInput, DeviceEvent, DeviceEventSender};
use atlas_core::frame::CAPTURE_SAMPLE_RATE;
use atlas_core::{Result, VoiceError};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, StreamConfig};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapProd, HeapRb};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::host::{Direction, choose_config, find_device};
use crate::resample::{StreamResampler, downmix};

/// One second of interleaved audio at typical desktop rates.
const RING_CAPACITY: usize = 96_000;
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const RESAMPLER_CHUNK: usize = 1024;

#[derive(Default)]
struct CaptureShared {
    sink: Mutex<Option<DeviceEventSender>>,
    closed: AtomicBool,
}

impl CaptureShared {
    fn set_sink(&self, sink: Option<DeviceEventSender>) {
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = sink;
    }

    fn forward(&self, samples: Vec<f32>) {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(events) = sink.as_ref() {
            if events.send(DeviceEvent::Captured(samples)).is_err() {
                *sink = None;
            }
        }
    }
}

/// A microphone opened through cpal. Blocks are forwarded between `start`
/// and `stop`; `release` (or drop) closes the stream.
pub struct CpalInput {
    shared: Arc<CaptureShared>,
    released: bool,
}

impl CpalInput {
    /// Builds and starts the input stream on its own thread, resolving once
    /// the device is running. Dropping the future before then closes the
    /// stream as soon as it opens.
    pub(crate) async fn open(device_name: Option<String>) -> Result<Self> {
        let shared = Arc::new(CaptureShared::default());
        let (ready_tx, ready_rx) = oneshot::channel();
        let thread_shared = shared.clone();
        thread::Builder::new()
            .name("atlas-capture".into())
            .spawn(move || capture_thread(device_name, thread_shared, ready_tx))
            .map_err(|e| VoiceError::Device(format!("failed to spawn capture thread: {e}")))?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(Self {
                shared,
                released: false,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(VoiceError::Device(
                "capture thread exited before starting".into(),
            )),
        }
    }
}

impl AudioInput for CpalInput {
    fn start(&mut self, events: DeviceEventSender) -> Result<()> {
        if self.released {
            return Err(VoiceError::Device("microphone has been released".into()));
        }
        self.shared.set_sink(Some(events));
        Ok(())
    }

    fn stop(&mut self) {
        self.shared.set_sink(None);
        debug!("Microphone capture stopped");
    }

    fn release(&mut self) {
        self.stop();
        if !self.released {
            self.released = true;
            self.shared.closed.store(true, Ordering::SeqCst);
            info!("Microphone released");
        }
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        self.shared.set_sink(None);
        self.shared.closed.store(true, Ordering::SeqCst);
    }
}

fn capture_thread(
    device_name: Option<String>,
    shared: Arc<CaptureShared>,
    ready: oneshot::Sender<Result<()>>,
) {
    let ring = HeapRb::<f32>::new(RING_CAPACITY);
    let (producer, mut consumer) = ring.split();

    let opened = open_stream(device_name.as_deref(), producer);
    let (stream, channels, rate) = match opened {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let mut resampler = match StreamResampler::new(rate, CAPTURE_SAMPLE_RATE, RESAMPLER_CHUNK) {
        Ok(resampler) => resampler,
        Err(e) => {
            let _ = ready.send(Err(VoiceError::Device(e.to_string())));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        debug!("Microphone opened after the caller gave up; closing it");
        return;
    }
    info!(channels, rate, "Microphone capture started");

    let mut scratch = vec![0.0f32; RESAMPLER_CHUNK * channels];
    // A strong count of one means the `CpalInput` was dropped before it was
    // ever handed out.
    while !shared.closed.load(Ordering::SeqCst) && Arc::strong_count(&shared) > 1 {
        let whole_frames = consumer.occupied_len() / channels * channels;
        if whole_frames == 0 {
            thread::sleep(POLL_INTERVAL);
            continue;
        }
        let take = whole_frames.min(scratch.len());
        let popped = consumer.pop_slice(&mut scratch[..take]);
        let mono = downmix(&scratch[..popped], channels);
        let samples = resampler.process(&mono);
        if !samples.is_empty() {
            shared.forward(samples);
        }
    }
    drop(stream);
    debug!("Microphone stream closed");
}

fn open_stream(
    device_name: Option<&str>,
    producer: HeapProd<f32>,
) -> Result<(cpal::Stream, usize, u32)> {
    let device = find_device(device_name, Direction::Input)?;
    let supported = choose_config(&device, Direction::Input, CAPTURE_SAMPLE_RATE)?;
    let config = supported.config();
    debug!(
        device = %device.name().unwrap_or_default(),
        ?config,
        format = ?supported.sample_format(),
        "Opening input stream"
    );

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, producer),
        SampleFormat::I16 => build_stream::<i16>(&device, &config, producer),
        SampleFormat::U16 => build_stream::<u16>(&device, &config, producer),
        other => Err(VoiceError::Device(format!(
            "unsupported input sample format {other:?}"
        ))),
    }?;
    stream
        .play()
        .map_err(|e| VoiceError::Permission(e.to_string()))?;

    Ok((stream, config.channels.max(1) as usize, config.sample_rate.0))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: HeapProd<f32>,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                for &sample in data {
                    // A full ring drops the newest samples.
                    let _ = producer.try_push(sample.to_sample::<f32>());
                }
            },
            |err| warn!(error = %err, "Input stream error"),
            None,
        )
        .map_err(|e| VoiceError::Permission(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_blocks_reach_only_the_installed_sink() {
        let shared = CaptureShared::default();
        let (tx, mut rx) = mpsc::unbounded_channel();

        shared.forward(vec![0.1]);
        shared.set_sink(Some(tx));
        shared.forward(vec![0.2, 0.3]);
        shared.set_sink(None);
        shared.forward(vec![0.4]);

        assert_eq!(rx.try_recv().unwrap(), DeviceEvent::Captured(vec![0.2, 0.3]));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_receiver_uninstalls_the_sink() {
        let shared = CaptureShared::default();
        let (tx, rx) = mpsc::unbounded_channel();
        shared.set_sink(Some(tx));
        drop(rx);

        shared.forward(vec![0.5]);
        assert!(shared.sink.lock().unwrap().is_none());
    }

    #[test]
    fn test_release_closes_the_stream_and_refuses_restart() {
        let shared = Arc::new(CaptureShared::default());
        let mut input = CpalInput {
            shared: shared.clone(),
            released: false,
        };
        let (tx, _rx) = mpsc::unbounded_channel();

        input.start(tx.clone()).unwrap();
        input.release();
        input.release();

        assert!(shared.closed.load(Ordering::SeqCst));
        assert!(shared.sink.lock().unwrap().is_none());
        assert!(matches!(input.start(tx), Err(VoiceError::Device(_))));
    }
}
