//! Core library for the avatar lip-sync driver.
//!
//! While a synthesized speech clip plays, the loudness envelope of the clip
//! is streamed to a remote avatar controller as a mouth-openness parameter.
//! Each module owns one piece of that pipeline:
//!
//! - [`watch`] waits until the speech synthesizer has finished writing a clip.
//! - [`analysis`] turns decoded samples into a normalised loudness envelope.
//! - [`rig`] keeps an authenticated, self-healing session with the controller.
//! - [`streamer`] paces one parameter update per envelope frame.
//! - [`playback`] runs playback and streaming side by side for one clip.
//! - [`conversation`] strings clips together into conversational turns.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod conversation;
pub mod error;
pub mod playback;
pub mod rig;
pub mod streamer;
pub mod watch;

pub use analysis::{Envelope, EnvelopeSummary, Frame, ENVELOPE_GAIN};
#[cfg(feature = "backend-cpal")]
pub use audio::CpalOutput;
pub use audio::{AudioBuffer, AudioOutput, SilentOutput};
pub use config::{AppConfig, ConversationConfig, LipSyncConfig, RigConfig};
pub use conversation::{
    Conversation, FailurePolicy, Responder, RunSummary, Speaker, Synthesizer, Transcriber,
    TurnOutcome, TurnState,
};
pub use error::{LipSyncError, Result, TransportError};
pub use playback::{ClipReport, PlaybackCoordinator};
pub use rig::{
    AuthState, ConnectionState, RigSession, SharedRig, Transport, WebSocketTransport,
};
pub use streamer::{ParameterDefinition, ParameterRequest, ParameterStreamer, StreamReport};
pub use watch::{wait_until_stable, WatchSettings, WriteWatch};
