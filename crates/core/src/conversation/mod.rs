//! The conversational turn loop.
//!
//! Each turn walks `Idle -> Listening -> Generating -> Speaking -> Idle`.
//! Speech capture, response generation and speech synthesis are external
//! services reached through the traits below; this module only decides
//! what happens when one of them fails.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    config::ConversationConfig,
    rig::Transport,
    ClipReport, LipSyncError, PlaybackCoordinator, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnState {
    Idle,
    Listening,
    Generating,
    Speaking,
    /// Terminal; the loop stops.
    Halted,
}

/// Captures the user's speech and returns its transcript.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn listen(&self) -> Result<String>;
}

/// Produces the avatar's reply to a transcript.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, prompt: &str) -> Result<String>;
}

/// Renders text to a WAV file at `output`.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, output: &Path) -> Result<()>;
}

/// Plays a finished clip with lip sync.
#[async_trait]
pub trait Speaker: Send + Sync {
    async fn speak(&self, clip: &Path) -> Result<ClipReport>;
}

#[async_trait]
impl<T: Transport> Speaker for PlaybackCoordinator<T> {
    async fn speak(&self, clip: &Path) -> Result<ClipReport> {
        PlaybackCoordinator::speak(self, clip).await
    }
}

/// How the loop reacts to failed turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailurePolicy {
    /// Failed turns in a row after which the loop halts.
    pub max_consecutive_failures: u32,
    /// Pause before the next turn after a failure.
    pub backoff: Duration,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

impl From<&ConversationConfig> for FailurePolicy {
    fn from(config: &ConversationConfig) -> Self {
        Self {
            max_consecutive_failures: config.max_consecutive_failures.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }
}

/// Result of a single turn.
#[derive(Debug)]
pub enum TurnOutcome {
    Spoken {
        transcript: String,
        reply: String,
        report: ClipReport,
    },
    /// Nothing intelligible was heard.
    Skipped,
    Failed {
        stage: TurnState,
        error: LipSyncError,
    },
}

/// Totals for a finished [`Conversation::run`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub turns: usize,
    pub spoken: usize,
    pub failed: usize,
    pub halted: bool,
}

pub struct Conversation<L, R, S, P> {
    listener: L,
    responder: R,
    synthesizer: S,
    speaker: P,
    policy: FailurePolicy,
    audio_dir: PathBuf,
    remove_spoken_clips: bool,
    state: TurnState,
    consecutive_failures: u32,
}

impl<L, R, S, P> Conversation<L, R, S, P>
where
    L: Transcriber,
    R: Responder,
    S: Synthesizer,
    P: Speaker,
{
    pub fn new(
        listener: L,
        responder: R,
        synthesizer: S,
        speaker: P,
        config: &ConversationConfig,
    ) -> Self {
        Self {
            listener,
            responder,
            synthesizer,
            speaker,
            policy: FailurePolicy::from(config),
            audio_dir: config.audio_dir.clone(),
            remove_spoken_clips: config.remove_spoken_clips,
            state: TurnState::Idle,
            consecutive_failures: 0,
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Runs turns until the loop halts or `max_turns` turns were taken.
    pub async fn run(&mut self, max_turns: Option<usize>) -> RunSummary {
        let mut summary = RunSummary::default();

        while self.state != TurnState::Halted && max_turns.map_or(true, |max| summary.turns < max) {
            summary.turns += 1;
            match self.turn().await {
                TurnOutcome::Spoken { report, .. } => {
                    summary.spoken += 1;
                    tracing::info!(frames = report.frames_sent, "turn spoken");
                }
                TurnOutcome::Skipped => {}
                TurnOutcome::Failed { stage, error } => {
                    summary.failed += 1;
                    tracing::error!(?stage, error = %error, "turn failed");
                    if self.state != TurnState::Halted && !self.policy.backoff.is_zero() {
                        tokio::time::sleep(self.policy.backoff).await;
                    }
                }
            }
        }

        summary.halted = self.state == TurnState::Halted;
        summary
    }

    /// Takes one turn and applies the failure policy to its outcome.
    pub async fn turn(&mut self) -> TurnOutcome {
        if self.state == TurnState::Halted {
            return TurnOutcome::Failed {
                stage: TurnState::Halted,
                error: LipSyncError::msg("conversation has halted"),
            };
        }

        self.transition(TurnState::Listening);
        let transcript = match self.listener.listen().await {
            Ok(text) => text,
            // Without speech capture there is nothing left to do.
            Err(error) => return self.halt(TurnState::Listening, error),
        };
        if transcript.trim().is_empty() {
            self.transition(TurnState::Idle);
            return TurnOutcome::Skipped;
        }
        tracing::info!(transcript = %transcript, "heard");

        self.transition(TurnState::Generating);
        let reply = match self.responder.respond(&transcript).await {
            Ok(reply) => reply,
            Err(error) => return self.fail(TurnState::Generating, error),
        };

        self.transition(TurnState::Speaking);
        let clip = self.clip_path();
        let spoken = self.synthesize_and_speak(&reply, &clip).await;
        if self.remove_spoken_clips {
            remove_clip(&clip).await;
        }

        match spoken {
            Ok(report) => {
                self.consecutive_failures = 0;
                self.transition(TurnState::Idle);
                TurnOutcome::Spoken {
                    transcript,
                    reply,
                    report,
                }
            }
            Err(error) => self.fail(TurnState::Speaking, error),
        }
    }

    async fn synthesize_and_speak(&self, reply: &str, clip: &Path) -> Result<ClipReport> {
        tokio::fs::create_dir_all(&self.audio_dir).await?;
        self.synthesizer.synthesize(reply, clip).await?;
        self.speaker.speak(clip).await
    }

    fn clip_path(&self) -> PathBuf {
        self.audio_dir
            .join(format!("output_{}.wav", uuid::Uuid::new_v4().simple()))
    }

    fn fail(&mut self, stage: TurnState, error: LipSyncError) -> TurnOutcome {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.policy.max_consecutive_failures {
            return self.halt(stage, error);
        }
        self.transition(TurnState::Idle);
        TurnOutcome::Failed { stage, error }
    }

    fn halt(&mut self, stage: TurnState, error: LipSyncError) -> TurnOutcome {
        self.transition(TurnState::Halted);
        TurnOutcome::Failed { stage, error }
    }

    fn transition(&mut self, next: TurnState) {
        tracing::debug!(from = ?self.state, to = ?next, "turn state");
        self.state = next;
    }
}

async fn remove_clip(clip: &Path) {
    match tokio::fs::remove_file(clip).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => tracing::warn!(path = %clip.display(), error = %err, "could not remove clip"),
    }
}
