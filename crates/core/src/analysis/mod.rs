//! Loudness envelope extraction.
//!
//! A clip is cut into consecutive, non-overlapping windows of `frame_ms`
//! milliseconds. Each window is reduced to its RMS energy, amplified by
//! [`ENVELOPE_GAIN`] and clamped into `[0, 1]` so it can drive a mouth
//! openness parameter directly. A trailing window shorter than a full frame
//! is dropped, never padded. NaN and infinite samples are read as silence.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{AudioBuffer, LipSyncError, Result};

/// Fixed amplification applied to the RMS of every window.
pub const ENVELOPE_GAIN: f32 = 10.0;

/// One analysed window of the clip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub index: usize,
    /// Offset of the first sample of the window.
    pub start_sample: usize,
    pub time_seconds: f32,
    /// Normalised loudness in `[0, 1]`.
    pub value: f32,
}

/// Lazy, single-pass sequence of [`Frame`]s in temporal order.
///
/// Once drained it stays drained; build a new one from the buffer to
/// analyse the clip again.
#[derive(Debug, Clone)]
pub struct Envelope {
    samples: Arc<[f32]>,
    sample_rate: u32,
    frame_len: usize,
    next: usize,
}

impl Envelope {
    /// Number of samples in every window.
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Total number of frames the clip yields, regardless of progress.
    pub fn total_frames(&self) -> usize {
        self.samples.len() / self.frame_len
    }
}

impl Iterator for Envelope {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        let start = self.next * self.frame_len;
        let window = self.samples.get(start..start + self.frame_len)?;

        let frame = Frame {
            index: self.next,
            start_sample: start,
            time_seconds: start as f32 / self.sample_rate as f32,
            value: (compute_rms(window) * ENVELOPE_GAIN).max(0.0).min(1.0),
        };
        self.next += 1;
        Some(frame)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total_frames().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Envelope {}

impl std::iter::FusedIterator for Envelope {}

impl AudioBuffer {
    /// Starts envelope extraction with windows of `frame_ms` milliseconds.
    pub fn envelope(&self, frame_ms: u32) -> Result<Envelope> {
        let frame_len = (u64::from(self.sample_rate()) * u64::from(frame_ms) / 1000) as usize;
        if frame_len == 0 {
            return Err(LipSyncError::InvalidInput(
                "frame duration is shorter than one sample",
            ));
        }

        Ok(Envelope {
            samples: self.shared_samples(),
            sample_rate: self.sample_rate(),
            frame_len,
            next: 0,
        })
    }
}

/// Aggregate view over a whole envelope, used by offline inspection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvelopeSummary {
    pub sample_rate: u32,
    pub frame_ms: u32,
    pub frames: usize,
    pub peak: f32,
    pub mean: f32,
    pub duration_seconds: f32,
}

impl EnvelopeSummary {
    pub fn from_frames(sample_rate: u32, frame_ms: u32, frames: &[Frame]) -> Self {
        let peak = frames.iter().map(|f| f.value).fold(0.0, f32::max);
        let mean = if frames.is_empty() {
            0.0
        } else {
            frames.iter().map(|f| f.value).sum::<f32>() / frames.len() as f32
        };

        Self {
            sample_rate,
            frame_ms,
            frames: frames.len(),
            peak,
            mean,
            duration_seconds: frames.len() as f32 * frame_ms as f32 / 1000.0,
        }
    }
}

/// Non-finite samples count as silence.
fn compute_rms(samples: &[f32]) -> f32 {
    let sum: f32 = samples
        .iter()
        .filter(|sample| sample.is_finite())
        .map(|sample| sample * sample)
        .sum();
    (sum / samples.len() as f32).sqrt()
}
