use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::warn;

/// Creates a mono resampler converting `in_sampling_rate` to `out_sampling_rate`.
pub fn create_resampler(
    in_sampling_rate: u32,
    out_sampling_rate: u32,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate as f64 / in_sampling_rate as f64,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Averages interleaved frames down to a single channel.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Feeds arbitrarily sized blocks through a fixed-chunk resampler.
///
/// Equal rates pass samples straight through.
pub struct StreamResampler {
    inner: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32, chunk_size: usize) -> anyhow::Result<Self> {
        let inner = if from_rate == to_rate {
            None
        } else {
            Some(create_resampler(from_rate, to_rate, chunk_size)?)
        };
        Ok(Self {
            inner,
            pending: Vec::new(),
        })
    }

    /// Resamples as many whole chunks as `samples` completes; the remainder waits.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(resampler) = self.inner.as_mut() else {
            return samples.to_vec();
        };
        self.pending.extend_from_slice(samples);

        let mut output = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let block: Vec<f32> = self.pending.drain(..needed).collect();
            match resampler.process(&[block], None) {
                Ok(mut channels) => output.append(&mut channels[0]),
                Err(e) => warn!(error = %e, "Dropping audio block that failed to resample"),
            }
        }
        output
    }

    /// Pushes out whatever is still pending, zero-padding the final chunk.
    pub fn flush(&mut self) -> Vec<f32> {
        let Some(resampler) = self.inner.as_mut() else {
            return std::mem::take(&mut self.pending);
        };
        if self.pending.is_empty() {
            return Vec::new();
        }
        let rest = std::mem::take(&mut self.pending);
        match resampler.process_partial(Some(&[rest]), None) {
            Ok(mut channels) => channels.swap_remove(0),
            Err(e) => {
                warn!(error = %e, "Dropping audio tail that failed to resample");
                Vec::new()
            }
        }
    }
}

/// Largest block handed to the playback resampler in one call.
const PLAYBACK_MAX_CHUNK: usize = 8192;

/// Resamples agent audio to the device rate.
///
/// Filter state carries over between buffers that play back to back, so a
/// contiguous run comes out as one continuous signal. Each call resamples
/// the whole buffer; nothing is held back for the next one.
pub struct PlaybackResampler {
    to_rate: u32,
    from_rate: u32,
    inner: Option<FastFixedIn<f32>>,
}

impl PlaybackResampler {
    pub fn new(to_rate: u32) -> Self {
        Self {
            to_rate,
            from_rate: 0,
            inner: None,
        }
    }

    /// Resamples `samples`. `contiguous` continues the previous buffer;
    /// otherwise the filter restarts from silence.
    pub fn process(
        &mut self,
        samples: &[f32],
        from_rate: u32,
        contiguous: bool,
    ) -> anyhow::Result<Vec<f32>> {
        if from_rate == self.to_rate {
            return Ok(samples.to_vec());
        }
        let resampler = match self.inner.take() {
            Some(mut resampler) if from_rate == self.from_rate => {
                if !contiguous {
                    resampler.reset();
                }
                resampler
            }
            _ => {
                self.from_rate = from_rate;
                create_resampler(from_rate, self.to_rate, PLAYBACK_MAX_CHUNK)?
            }
        };
        let resampler = self.inner.insert(resampler);

        let mut output = Vec::new();
        for block in samples.chunks(PLAYBACK_MAX_CHUNK) {
            resampler.set_chunk_size(block.len())?;
            let mut channels = resampler.process(&[block], None)?;
            output.append(&mut channels[0]);
        }
        Ok(output)
    }
}
