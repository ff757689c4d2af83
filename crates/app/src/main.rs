use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use lipsync_core::{
    AppConfig, AudioBuffer, AudioOutput, Conversation, EnvelopeSummary, Frame, LipSyncError,
    ParameterStreamer, PlaybackCoordinator, Responder, RigSession, SharedRig, Synthesizer,
    Transcriber, WebSocketTransport,
};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> lipsync_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Speak { clip } => run_speak(&config, clip).await,
        Commands::Register => run_register(&config).await,
        Commands::Converse { voice, turns } => run_converse(&config, voice, turns).await,
        Commands::Envelope {
            input,
            frame_ms,
            output,
        } => run_envelope(&config, &input, frame_ms, output.as_ref()),
    }
}

async fn run_speak(config: &AppConfig, clip: PathBuf) -> lipsync_core::Result<()> {
    let rig = connect(config).await?;
    let coordinator = PlaybackCoordinator::new(
        rig,
        audio_output()?,
        &config.lip_sync,
        config.watch.clone(),
    );

    let report = coordinator.speak(&clip).await?;
    tracing::info!(
        frames = report.frames_sent,
        clip = ?report.clip_duration,
        elapsed = ?report.elapsed,
        "clip spoken"
    );
    Ok(())
}

async fn run_register(config: &AppConfig) -> lipsync_core::Result<()> {
    let rig = connect(config).await?;
    let mut session = rig.lock().await;
    let registered = ParameterStreamer::register(&mut *session, &config.lip_sync.parameter()).await;
    registered
}

/// Console stand-in for the speech services: typed lines are the
/// transcript, the reply echoes it and every reply is voiced by `voice`.
async fn run_converse(
    config: &AppConfig,
    voice: PathBuf,
    turns: Option<usize>,
) -> lipsync_core::Result<()> {
    tokio::fs::create_dir_all(&config.conversation.audio_dir).await?;
    let rig = connect(config).await?;
    let coordinator = PlaybackCoordinator::new(
        rig,
        audio_output()?,
        &config.lip_sync,
        config.watch.clone(),
    );

    let mut conversation = Conversation::new(
        ConsoleTranscriber::new(),
        EchoResponder,
        CannedVoice { clip: voice },
        coordinator,
        &config.conversation,
    );
    let summary = conversation.run(turns).await;
    tracing::info!(
        turns = summary.turns,
        spoken = summary.spoken,
        failed = summary.failed,
        halted = summary.halted,
        "conversation finished"
    );
    Ok(())
}

struct ConsoleTranscriber {
    lines: Mutex<Lines<BufReader<Stdin>>>,
}

impl ConsoleTranscriber {
    fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

#[async_trait]
impl Transcriber for ConsoleTranscriber {
    async fn listen(&self) -> lipsync_core::Result<String> {
        let mut lines = self.lines.lock().await;
        match lines.next_line().await? {
            Some(line) => Ok(line),
            None => Err(LipSyncError::msg("input closed")),
        }
    }
}

struct EchoResponder;

#[async_trait]
impl Responder for EchoResponder {
    async fn respond(&self, prompt: &str) -> lipsync_core::Result<String> {
        Ok(prompt.trim().to_string())
    }
}

struct CannedVoice {
    clip: PathBuf,
}

#[async_trait]
impl Synthesizer for CannedVoice {
    async fn synthesize(&self, _text: &str, output: &Path) -> lipsync_core::Result<()> {
        tokio::fs::copy(&self.clip, output).await?;
        Ok(())
    }
}

fn run_envelope(
    config: &AppConfig,
    input: &PathBuf,
    frame_ms: Option<u32>,
    output: Option<&PathBuf>,
) -> lipsync_core::Result<()> {
    let frame_ms = frame_ms.unwrap_or(config.lip_sync.frame_ms);
    tracing::info!(?input, frame_ms, "extracting envelope");

    let clip = AudioBuffer::from_wav(input)?;
    let frames: Vec<Frame> = clip.envelope(frame_ms)?.collect();
    let summary = EnvelopeSummary::from_frames(clip.sample_rate(), frame_ms, &frames);
    let values: Vec<f32> = frames.iter().map(|frame| frame.value).collect();

    let document = serde_json::json!({ "summary": summary, "values": values });
    let text = serde_json::to_string_pretty(&document)
        .map_err(|e| lipsync_core::LipSyncError::msg(e.to_string()))?;

    match output {
        Some(path) => std::fs::write(path, text)?,
        None => println!("{text}"),
    }
    Ok(())
}

async fn connect(config: &AppConfig) -> lipsync_core::Result<SharedRig<WebSocketTransport>> {
    tracing::info!(url = %config.rig.url, "connecting to controller");
    let mut session = RigSession::new(
        WebSocketTransport::new(config.rig.url.clone()),
        config.rig.plugin(),
    );
    session.connect().await?;
    session.authenticate().await?;
    Ok(session.shared())
}

#[cfg(feature = "backend-cpal")]
fn audio_output() -> lipsync_core::Result<Arc<dyn AudioOutput>> {
    Ok(Arc::new(lipsync_core::CpalOutput::new()?))
}

#[cfg(not(feature = "backend-cpal"))]
fn audio_output() -> lipsync_core::Result<Arc<dyn AudioOutput>> {
    tracing::warn!("built without 'backend-cpal'; clips are timed but not played");
    Ok(Arc::new(lipsync_core::SilentOutput))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Drive avatar lip sync from speech clips", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play a clip and stream its loudness to the controller.
    Speak {
        /// WAV file to speak; may still be being written.
        clip: PathBuf,
    },
    /// Define the lip parameter on the controller and exit.
    Register,
    /// Run the turn loop from the console, voicing every reply with one clip.
    Converse {
        /// WAV file played for every reply.
        voice: PathBuf,
        /// Stop after this many turns.
        #[arg(short, long)]
        turns: Option<usize>,
    },
    /// Analyse a clip offline and print its loudness envelope as JSON.
    Envelope {
        /// Path to the WAV file that should be analysed.
        input: PathBuf,
        /// Frame duration in milliseconds; overrides the configuration.
        #[arg(short, long)]
        frame_ms: Option<u32>,
        /// Write the JSON here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}
