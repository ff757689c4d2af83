use std::{
    sync::mpsc,
    time::Duration,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::{AudioBuffer, AudioOutput};
use crate::{LipSyncError, Result};

/// Extra time granted to the device past the clip length before the
/// playback is declared stuck.
const COMPLETION_GRACE: Duration = Duration::from_secs(2);
/// The last callback hands samples to the device; give it time to drain.
const DRAIN_DELAY: Duration = Duration::from_millis(100);

/// Plays clips on the default output device of the default host.
///
/// `cpal::Stream` is not `Send`, so the device and stream are acquired
/// inside [`AudioOutput::play`] on whichever thread calls it.
#[derive(Debug, Default, Clone)]
pub struct CpalOutput {
    device_name: Option<String>,
}

impl CpalOutput {
    /// Checks that an output device exists and remembers its name.
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| LipSyncError::Playback("no output device available".into()))?;
        let device_name = device.name().ok();
        tracing::info!(device = ?device_name, "using audio output device");
        Ok(Self { device_name })
    }

    fn device(&self) -> Result<cpal::Device> {
        let host = cpal::default_host();
        let named = self.device_name.as_ref().and_then(|wanted| {
            host.output_devices()
                .ok()?
                .find(|device| device.name().ok().as_ref() == Some(wanted))
        });
        named
            .or_else(|| host.default_output_device())
            .ok_or_else(|| LipSyncError::Playback("no output device available".into()))
    }
}

impl AudioOutput for CpalOutput {
    fn play(&self, clip: &AudioBuffer) -> Result<()> {
        if clip.is_empty() {
            return Ok(());
        }

        let device = self.device()?;
        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(clip.sample_rate()),
            buffer_size: cpal::BufferSize::Default,
        };

        let samples = clip.shared_samples();
        let (done_tx, done_rx) = mpsc::sync_channel::<()>(1);
        let (error_tx, error_rx) = mpsc::channel::<String>();
        let mut done_tx = Some(done_tx);
        let mut position = 0_usize;

        let stream = device
            .build_output_stream(
                &config,
                move |output: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for slot in output.iter_mut() {
                        if position < samples.len() {
                            *slot = samples[position];
                            position += 1;
                        } else {
                            *slot = 0.0;
                        }
                    }
                    if position >= samples.len() {
                        if let Some(tx) = done_tx.take() {
                            let _ = tx.try_send(());
                        }
                    }
                },
                move |err| {
                    let _ = error_tx.send(err.to_string());
                },
                None,
            )
            .map_err(|e| LipSyncError::Playback(e.to_string()))?;

        stream
            .play()
            .map_err(|e| LipSyncError::Playback(e.to_string()))?;

        match done_rx.recv_timeout(clip.duration() + COMPLETION_GRACE) {
            Ok(()) => {
                std::thread::sleep(DRAIN_DELAY);
                Ok(())
            }
            Err(_) => Err(LipSyncError::Playback(
                error_rx
                    .try_recv()
                    .unwrap_or_else(|_| "device stopped before the clip finished".into()),
            )),
        }
    }
}
