//! Decoded audio clips and the local output devices that play them.

#[cfg(feature = "backend-cpal")]
mod device;

use std::{path::Path, sync::Arc, time::Duration};

use crate::{LipSyncError, Result};

#[cfg(feature = "backend-cpal")]
pub use device::CpalOutput;

/// Mono samples plus their sample rate.
///
/// The samples are shared behind an [`Arc`] so the playback worker and the
/// envelope extractor can read the same clip without copying it. Neither
/// may mutate it.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: impl Into<Arc<[f32]>>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    /// Decodes a WAV file. Integer PCM is scaled into `[-1, 1]` and
    /// multi-channel audio is averaged down to mono.
    pub fn from_wav(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = hound::WavReader::open(path)
            .map_err(|e| LipSyncError::Decode(format!("{}: {}", path.display(), e)))?;

        let spec = reader.spec();
        let channels = usize::from(spec.channels.max(1));

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<std::result::Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let bits = u32::from(spec.bits_per_sample);
                if bits == 0 || bits > 32 {
                    return Err(LipSyncError::Decode(format!(
                        "unsupported bits per sample: {bits}"
                    )));
                }
                let scale = (1_i64 << (bits - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|sample| sample.map(|value| value as f32 / scale))
                    .collect::<std::result::Result<_, _>>()?
            }
        };

        let samples: Vec<f32> = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect()
        };

        tracing::debug!(
            path = %path.display(),
            sample_rate = spec.sample_rate,
            channels,
            samples = samples.len(),
            "decoded clip"
        );

        Ok(Self::new(samples, spec.sample_rate))
    }

    /// Mono samples in `[-1, 1]`.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of mono samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Wall-clock length of the clip.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }

    pub(crate) fn shared_samples(&self) -> Arc<[f32]> {
        Arc::clone(&self.samples)
    }
}

/// Local audio output. `play` blocks until the device has finished the
/// clip, so callers run it on a blocking worker thread.
pub trait AudioOutput: Send + Sync {
    fn play(&self, clip: &AudioBuffer) -> Result<()>;
}

/// Output without a device: blocks for as long as the clip would play.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentOutput;

impl AudioOutput for SilentOutput {
    fn play(&self, clip: &AudioBuffer) -> Result<()> {
        std::thread::sleep(clip.duration());
        Ok(())
    }
}
