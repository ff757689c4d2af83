//! Plays a clip while streaming its envelope to the controller.
//!
//! Playback runs on a blocking worker thread and streaming runs on the
//! calling task. They do not share a clock: playback advances with the
//! device, streaming advances by `pacing + round trip` per frame. Over a
//! clip of `n` frames the parameter stream therefore trails the audio by
//! roughly `n * (pacing + round_trip - frame_ms)`; keep `pacing` below the
//! frame duration to stay close.

use std::{
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};

use futures::{future::BoxFuture, stream::FuturesUnordered, FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::{
    config::LipSyncConfig,
    rig::{SharedRig, Transport},
    watch::wait_until_stable,
    AudioBuffer, AudioOutput, LipSyncError, ParameterDefinition, ParameterStreamer, Result,
    StreamReport, WatchSettings,
};

/// What happened while a clip was spoken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipReport {
    pub frames_sent: usize,
    pub clip_duration: Duration,
    /// From the start of the write watch until both activities settled.
    pub elapsed: Duration,
}

enum Activity {
    Played,
    Streamed(StreamReport),
}

/// Drives one clip at a time through playback and parameter streaming.
pub struct PlaybackCoordinator<T> {
    rig: SharedRig<T>,
    output: Arc<dyn AudioOutput>,
    streamer: ParameterStreamer,
    parameter: ParameterDefinition,
    watch: WatchSettings,
    frame_ms: u32,
    registered: OnceCell<()>,
}

impl<T: Transport> PlaybackCoordinator<T> {
    pub fn new(
        rig: SharedRig<T>,
        output: Arc<dyn AudioOutput>,
        lip_sync: &LipSyncConfig,
        watch: WatchSettings,
    ) -> Self {
        Self {
            rig,
            output,
            streamer: lip_sync.streamer(),
            parameter: lip_sync.parameter(),
            watch,
            frame_ms: lip_sync.frame_ms,
            registered: OnceCell::new(),
        }
    }

    pub fn rig(&self) -> &SharedRig<T> {
        &self.rig
    }

    /// Registers the lip parameter with the controller, once per
    /// coordinator. Later calls return immediately.
    pub async fn ensure_registered(&self) -> Result<()> {
        self.registered
            .get_or_try_init(|| async {
                let mut session = self.rig.lock().await;
                let registered = ParameterStreamer::register(&mut *session, &self.parameter).await;
                registered
            })
            .await
            .map(|_| ())
    }

    /// Waits for `path` to be fully written, then plays it and streams its
    /// envelope concurrently. Returns once both have finished; if either
    /// failed, the first failure observed is returned.
    pub async fn speak(&self, path: &Path) -> Result<ClipReport> {
        let started = Instant::now();
        wait_until_stable(path, &self.watch).await?;

        let owned = path.to_path_buf();
        let clip = tokio::task::spawn_blocking(move || AudioBuffer::from_wav(owned))
            .await
            .map_err(|e| LipSyncError::Decode(format!("decoder task failed: {e}")))??;
        let envelope = clip.envelope(self.frame_ms)?;
        self.ensure_registered().await?;

        tracing::info!(
            path = %path.display(),
            duration = ?clip.duration(),
            frames = envelope.len(),
            "speaking clip"
        );

        let output = Arc::clone(&self.output);
        let device_clip = clip.clone();
        let player = tokio::task::spawn_blocking(move || output.play(&device_clip));

        let playback = async move {
            player
                .await
                .map_err(|e| LipSyncError::Playback(format!("playback worker failed: {e}")))??;
            Ok::<_, LipSyncError>(Activity::Played)
        };
        let streaming = async {
            let mut session = self.rig.lock().await;
            let streamed = self.streamer.stream(&mut *session, envelope).await;
            streamed.map(Activity::Streamed)
        };

        let mut activities: FuturesUnordered<BoxFuture<'_, Result<Activity>>> = FuturesUnordered::new();
        activities.push(playback.boxed());
        activities.push(streaming.boxed());

        let mut first_error = None;
        let mut frames_sent = 0;
        while let Some(outcome) = activities.next().await {
            match outcome {
                Ok(Activity::Played) => tracing::debug!("playback finished"),
                Ok(Activity::Streamed(report)) => frames_sent = report.frames_sent,
                Err(err) => {
                    tracing::warn!(error = %err, "clip activity failed");
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }

        Ok(ClipReport {
            frames_sent,
            clip_duration: clip.duration(),
            elapsed: started.elapsed(),
        })
    }
}

impl<T> std::fmt::Debug for PlaybackCoordinator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackCoordinator")
            .field("streamer", &self.streamer)
            .field("parameter", &self.parameter.id)
            .field("frame_ms", &self.frame_ms)
            .field("registered", &self.registered.initialized())
            .finish()
    }
}
