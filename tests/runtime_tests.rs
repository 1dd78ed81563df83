// Tests for the client runtime: capture, transport, playback and reconnect
// driven end to end through `run_with_reconnect`.

use futures::{SinkExt, StreamExt};
use reflections_voice::client::{
    run_with_reconnect, ClientEvent, Conversation, Gesture, PlaybackChunk, Player, ReconnectConfig,
};
use reflections_voice::config::EngineConfig;
use reflections_voice::engines::Role;
use reflections_voice::{
    create_router, AppState, CaptureFrame, ClientConfig, ClientMessage, EndpointConfig, Engines,
    ServerEvent, SessionConfig, TriggerMode,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;

// ============================================================================
// Helpers
// ============================================================================

/// Real server with stub engines and default endpointing
async fn spawn_server() -> anyhow::Result<SocketAddr> {
    let session = SessionConfig::default();
    let engines = Engines::from_config(&EngineConfig::default(), &session.system_prompt)?;
    let router = create_router(AppState::new(session, engines));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok(addr)
}

fn client_config(addr: SocketAddr, mode: TriggerMode) -> ClientConfig {
    ClientConfig {
        url: format!("ws://{}/ws/voice", addr),
        mode,
        max_pending_bytes: 1 << 20,
        endpoint: EndpointConfig {
            speech_rms_threshold: 0.015,
            min_utterance_ms: 200,
            trailing_silence_ms: 300,
        },
        reconnect: ReconnectConfig {
            initial_backoff_ms: 20,
            max_backoff_ms: 100,
            multiplier: 2.0,
            max_attempts: 5,
        },
        ..ClientConfig::default()
    }
}

/// 20 ms frames of 16 kHz audio: a 440 Hz tone, or silence at amplitude 0
fn segment(ms: u64, amplitude: f32, start_ms: u64) -> Vec<CaptureFrame> {
    (0..ms / 20)
        .map(|k| CaptureFrame {
            samples: (0..320)
                .map(|i| {
                    let t = (k * 320 + i) as f32 / 16000.0;
                    amplitude * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
                })
                .collect(),
            sample_rate: 16000,
            timestamp_ms: start_ms + k * 20,
        })
        .collect()
}

/// Queue every frame up front, then close the source
fn source(plan: &[(u64, f32)]) -> mpsc::Receiver<CaptureFrame> {
    let (tx, rx) = mpsc::channel(1024);
    let mut at = 0;
    for &(ms, amplitude) in plan {
        for frame in segment(ms, amplitude, at) {
            tx.try_send(frame).unwrap();
        }
        at += ms;
    }
    rx
}

fn drain(observer: &mut mpsc::UnboundedReceiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = observer.try_recv() {
        seen.push(event);
    }
    seen
}

fn finals(events: &[ClientEvent]) -> Vec<usize> {
    events
        .iter()
        .filter_map(|e| match e {
            ClientEvent::Server(ServerEvent::FinalTranscript { bytes_received, .. }) => {
                Some(*bytes_received)
            }
            _ => None,
        })
        .collect()
}

fn roles(conversation: &Conversation) -> Vec<Role> {
    conversation.messages().into_iter().map(|m| m.role).collect()
}

/// Logs what the runtime asks of the audio device
#[derive(Clone, Default)]
struct RecordingPlayer {
    log: Arc<Mutex<Vec<String>>>,
}

impl Player for RecordingPlayer {
    fn play(&mut self, id: u64, _chunk: &PlaybackChunk) {
        self.log.lock().unwrap().push(format!("play {}", id));
    }

    fn stop(&mut self) {
        self.log.lock().unwrap().push("stop".to_string());
    }
}

// ============================================================================
// Trigger modes
// ============================================================================

#[tokio::test]
async fn test_hands_free_conversation() -> anyhow::Result<()> {
    let addr = spawn_server().await?;
    let config = client_config(addr, TriggerMode::HandsFree);
    let frames = source(&[(500, 0.3), (1500, 0.0)]);
    let (_, gestures) = mpsc::unbounded_channel::<Gesture>();
    let (_, finished) = mpsc::unbounded_channel();
    let (observer_tx, mut observer) = mpsc::unbounded_channel();

    let conversation = tokio::time::timeout(
        Duration::from_secs(10),
        run_with_reconnect(
            &config,
            16000,
            frames,
            gestures,
            RecordingPlayer::default(),
            finished,
            observer_tx,
        ),
    )
    .await??;

    assert_eq!(roles(&conversation), vec![Role::User, Role::Assistant]);

    let events = drain(&mut observer);
    let finals = finals(&events);
    assert_eq!(finals.len(), 1, "One turn from one utterance: {:?}", events);
    assert!(
        finals[0] < 2000 * 32,
        "Endpointing closed the turn before the source ran out"
    );
    Ok(())
}

#[tokio::test]
async fn test_push_to_talk_conversation() -> anyhow::Result<()> {
    let addr = spawn_server().await?;
    let config = client_config(addr, TriggerMode::PushToTalk);
    let frames = source(&[(300, 0.3), (1000, 0.0), (300, 0.3)]);
    let (gesture_tx, gestures) = mpsc::unbounded_channel();
    gesture_tx.send(Gesture::Press)?;
    let (_, finished) = mpsc::unbounded_channel();
    let (observer_tx, mut observer) = mpsc::unbounded_channel();

    let conversation = tokio::time::timeout(
        Duration::from_secs(10),
        run_with_reconnect(
            &config,
            16000,
            frames,
            gestures,
            RecordingPlayer::default(),
            finished,
            observer_tx,
        ),
    )
    .await??;

    assert_eq!(roles(&conversation), vec![Role::User, Role::Assistant]);

    let events = drain(&mut observer);
    assert_eq!(
        finals(&events),
        vec![51200],
        "The whole press, pause included, is one utterance"
    );
    Ok(())
}

#[tokio::test]
async fn test_push_to_talk_without_press_sends_nothing() -> anyhow::Result<()> {
    let addr = spawn_server().await?;
    let config = client_config(addr, TriggerMode::PushToTalk);
    let frames = source(&[(300, 0.3)]);
    let (_, gestures) = mpsc::unbounded_channel::<Gesture>();
    let (_, finished) = mpsc::unbounded_channel();
    let (observer_tx, mut observer) = mpsc::unbounded_channel();

    let conversation = tokio::time::timeout(
        Duration::from_secs(5),
        run_with_reconnect(
            &config,
            16000,
            frames,
            gestures,
            RecordingPlayer::default(),
            finished,
            observer_tx,
        ),
    )
    .await??;

    assert!(conversation.messages().is_empty());
    assert!(finals(&drain(&mut observer)).is_empty());
    Ok(())
}

// ============================================================================
// Reconnect
// ============================================================================

/// Accepts two connections. The first answers the opened turn with a partial
/// reply and then vanishes; the first text message of the second is reported.
async fn spawn_flaky_server() -> anyhow::Result<(SocketAddr, oneshot::Receiver<String>)> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (first_tx, first_rx) = oneshot::channel();

    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let Ok(mut socket) = tokio_tungstenite::accept_async(stream).await else {
            return;
        };
        // Wait for the turn's audio
        while let Some(Ok(message)) = socket.next().await {
            if message.is_binary() {
                break;
            }
        }
        let reply = [
            ServerEvent::AssistantDelta {
                delta: "Half a ".to_string(),
            },
            ServerEvent::tts_chunk(0, "pcm16le", &vec![0u8; 32000]),
        ];
        for event in reply {
            let Ok(text) = event.to_json() else {
                return;
            };
            if socket.send(Message::Text(text)).await.is_err() {
                return;
            }
        }
        drop(socket);

        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let Ok(mut socket) = tokio_tungstenite::accept_async(stream).await else {
            return;
        };
        let mut first_tx = Some(first_tx);
        while let Some(Ok(message)) = socket.next().await {
            if let Message::Text(text) = message {
                if let Some(tx) = first_tx.take() {
                    let _ = tx.send(text);
                }
            }
        }
    });

    Ok((addr, first_rx))
}

#[tokio::test]
async fn test_reconnect_discards_the_interrupted_turn() -> anyhow::Result<()> {
    let (addr, first_message) = spawn_flaky_server().await?;
    let config = client_config(addr, TriggerMode::HandsFree);

    let (frame_tx, frames) = mpsc::channel(16);
    for frame in segment(20, 0.3, 0) {
        frame_tx.send(frame).await?;
    }
    let (_, gestures) = mpsc::unbounded_channel::<Gesture>();
    let (_finished_tx, finished) = mpsc::unbounded_channel();
    let (observer_tx, mut observer) = mpsc::unbounded_channel();
    let player = RecordingPlayer::default();
    let log = Arc::clone(&player.log);

    // The source stays open until the second connection has introduced itself
    let introduced = async {
        let first = tokio::time::timeout(Duration::from_secs(5), first_message).await??;
        drop(frame_tx);
        anyhow::Ok(first)
    };
    let (conversation, first) = tokio::join!(
        tokio::time::timeout(
            Duration::from_secs(10),
            run_with_reconnect(&config, 16000, frames, gestures, player, finished, observer_tx),
        ),
        introduced,
    );
    let conversation = conversation??;

    assert_eq!(
        serde_json::from_str::<ClientMessage>(&first?)?,
        ClientMessage::Hello {
            sample_rate: Some(16000)
        },
        "A new connection must introduce itself before anything else"
    );
    assert_eq!(
        *log.lock().unwrap(),
        vec!["play 0".to_string(), "stop".to_string()],
        "Audio of the lost turn must stop when the link drops"
    );
    assert_eq!(conversation.live_text(), None);
    assert!(conversation.messages().is_empty());

    let events = drain(&mut observer);
    let lost = events
        .iter()
        .position(|e| *e == ClientEvent::Disconnected)
        .expect("runtime should report the lost link");
    assert!(
        events[lost..]
            .iter()
            .any(|e| matches!(e, ClientEvent::Reconnecting { attempt: 1, .. })),
        "{:?}",
        events
    );
    assert_eq!(
        events.iter().filter(|e| **e == ClientEvent::Connected).count(),
        2
    );
    Ok(())
}
