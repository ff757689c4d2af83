//! Waits for a file that another process is still writing.
//!
//! "Complete" is approximated as "non-empty and unchanged in size for a
//! while". The watcher never creates or touches the file.

use std::{
    io::ErrorKind,
    path::Path,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::{LipSyncError, Result};

/// Timing knobs for [`wait_until_stable`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchSettings {
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    /// How long the size must hold still before the file counts as written.
    #[serde(with = "millis")]
    pub stable_for: Duration,
    #[serde(with = "millis")]
    pub max_wait: Duration,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            stable_for: Duration::from_millis(250),
            max_wait: Duration::from_secs(30),
        }
    }
}

/// Observation state for a single watch.
#[derive(Debug, Clone)]
pub struct WriteWatch {
    last_size: Option<u64>,
    last_change: Instant,
}

impl WriteWatch {
    /// Starts a watch that has not seen the file yet.
    pub fn new(now: Instant) -> Self {
        Self {
            last_size: None,
            last_change: now,
        }
    }

    /// Records one poll. `size` is `None` while the path does not exist.
    /// Returns the size once it is non-zero and has held for `stable_for`.
    pub fn observe(&mut self, size: Option<u64>, now: Instant, stable_for: Duration) -> Option<u64> {
        if size != self.last_size {
            self.last_size = size;
            self.last_change = now;
        }

        match self.last_size {
            Some(size) if size > 0 && now.duration_since(self.last_change) >= stable_for => Some(size),
            _ => None,
        }
    }
}

/// Polls `path` until it is write-stable and returns its final size.
///
/// Fails with [`LipSyncError::Timeout`] once `max_wait` has passed without
/// a stable observation.
pub async fn wait_until_stable(path: &Path, settings: &WatchSettings) -> Result<u64> {
    let started = Instant::now();
    let mut watch = WriteWatch::new(started);

    loop {
        let size = match tokio::fs::metadata(path).await {
            Ok(meta) => Some(meta.len()),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => return Err(err.into()),
        };

        let now = Instant::now();
        if let Some(size) = watch.observe(size, now, settings.stable_for) {
            tracing::debug!(
                path = %path.display(),
                size,
                waited = ?now.duration_since(started),
                "file is write-stable"
            );
            return Ok(size);
        }

        let elapsed = now.duration_since(started);
        if elapsed >= settings.max_wait {
            return Err(LipSyncError::Timeout {
                path: path.to_path_buf(),
                elapsed,
            });
        }

        let remaining = settings.max_wait.saturating_sub(elapsed);
        tokio::time::sleep(settings.poll_interval.min(remaining)).await;
    }
}

pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
