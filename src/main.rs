use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reflections_voice::audio::{AudioBackendConfig, CaptureFrame, FileBackend};
use reflections_voice::client::{run_with_reconnect, ClientEvent, Gesture, TimedPlayer, TriggerMode};
use reflections_voice::engines::Role;
use reflections_voice::protocol::ServerEvent;
use reflections_voice::{create_router, AppState, AudioBackend, AudioFile, Config, Engines};
use tokio::sync::mpsc;
use tracing::{info, warn};

const DEFAULT_CONFIG: &str = "config/reflections-voice";

/// Realtime voice turn controller.
#[derive(Parser)]
#[command(name = "reflections-voice", version)]
struct Cli {
    /// Config file path (without extension is fine)
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG)]
    config: String,

    /// Enable debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the voice server
    Serve,

    /// Talk to a server using a WAV file as the microphone
    Talk {
        /// WAV file to stream
        #[arg(short, long)]
        file: String,

        /// Voice endpoint (overrides client.url)
        #[arg(short, long)]
        url: Option<String>,

        /// How turns are ended
        #[arg(short, long, value_enum)]
        mode: Option<TriggerMode>,

        /// Silence appended after the file so the endpoint can fire
        #[arg(long, default_value_t = 1500)]
        trailing_silence_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let cfg = Config::load(&cli.config)?;
    info!("Reflections Voice v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Serve => serve(cfg).await,
        Commands::Talk {
            file,
            url,
            mode,
            trailing_silence_ms,
        } => talk(cfg, file, url, mode, trailing_silence_ms).await,
    }
}

async fn serve(cfg: Config) -> Result<()> {
    let engines = Engines::from_config(&cfg.engines, &cfg.session.system_prompt)
        .context("Failed to initialize engines")?;
    let state = AppState::new(cfg.session.clone(), engines);
    let router = create_router(state);

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("{} listening on ws://{}/ws/voice", cfg.service.name, addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("HTTP server failed")
}

async fn talk(
    cfg: Config,
    file: String,
    url: Option<String>,
    mode: Option<TriggerMode>,
    trailing_silence_ms: u64,
) -> Result<()> {
    let mut client = cfg.client;
    if let Some(url) = url {
        client.url = url;
    }
    if let Some(mode) = mode {
        client.mode = mode;
    }

    let audio = AudioFile::open(&file)?;
    info!(
        "Streaming {} ({:.1}s at {} Hz) in {:?} mode",
        file, audio.duration_seconds, audio.sample_rate, client.mode
    );
    let sample_rate = audio.sample_rate;

    let mut backend = FileBackend::from_file(
        audio,
        AudioBackendConfig {
            frame_duration_ms: client.frame_ms,
            realtime: true,
            trailing_silence_ms,
        },
    );
    let frames = backend.start().await?;

    let (gesture_tx, gestures) = mpsc::unbounded_channel();
    let frames = match client.mode {
        TriggerMode::PushToTalk => hold_while_streaming(frames, gesture_tx),
        TriggerMode::HandsFree => frames,
    };

    let (player, finished) = TimedPlayer::new();
    let (observer, mut events) = mpsc::unbounded_channel();

    let logger = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ClientEvent::Server(ServerEvent::FinalTranscript { text, .. }) => {
                    info!("You: {}", text)
                }
                ClientEvent::Server(ServerEvent::AssistantMessage { text }) => {
                    info!("Assistant: {}", text)
                }
                ClientEvent::Server(ServerEvent::Error { code, message, .. }) => {
                    warn!("{}: {}", code, message)
                }
                ClientEvent::Reconnecting { attempt, delay } => {
                    warn!("Reconnecting (attempt {}) in {:?}", attempt, delay)
                }
                _ => {}
            }
        }
    });

    let conversation =
        run_with_reconnect(&client, sample_rate, frames, gestures, player, finished, observer)
            .await;
    backend.stop().await?;
    let _ = logger.await;

    let conversation = conversation?;
    for entry in conversation.messages() {
        let who = match entry.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        };
        println!("{:>9}: {}", who, entry.text);
    }

    Ok(())
}

/// Presses the talk button as the first frame arrives. The end of the file
/// releases it.
fn hold_while_streaming(
    mut source: mpsc::Receiver<CaptureFrame>,
    gestures: mpsc::UnboundedSender<Gesture>,
) -> mpsc::Receiver<CaptureFrame> {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        let mut pressed = false;
        while let Some(frame) = source.recv().await {
            if !pressed {
                let _ = gestures.send(Gesture::Press);
                pressed = true;
            }
            if tx.send(frame).await.is_err() {
                break;
            }
        }
    });
    rx
}
