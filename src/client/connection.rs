use anyhow::Result;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::capture::{CapturePipeline, OutboundSink, TurnSignal};
use super::conversation::Conversation;
use super::playback::{PlaybackChunk, PlaybackQueue, Player};
use super::policy::{BackpressurePolicy, ReconnectPolicy};
use super::ClientConfig;
use crate::audio::CaptureFrame;
use crate::error::VoiceError;
use crate::protocol::{ClientMessage, ServerEvent};

/// Bytes handed to the writer but not yet on the wire
#[derive(Debug, Clone, Default)]
pub struct PendingBytes(Arc<AtomicUsize>);

impl PendingBytes {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    pub fn add(&self, n: usize) {
        self.0.fetch_add(n, Ordering::SeqCst);
    }

    pub fn sub(&self, n: usize) {
        let _ = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some(v.saturating_sub(n)));
    }
}

/// What the runtime reports to its observer
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected,
    Server(ServerEvent),
    Capture(TurnSignal),
    Reconnecting { attempt: u32, delay: Duration },
    Disconnected,
}

/// Talk-button input. Press opens a turn, release sends `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    Press,
    Release,
}

/// How one connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Capture is exhausted and every reply has been played
    CaptureFinished,
    TransportLost,
}

/// Sending half of a voice WebSocket.
///
/// Messages go to a writer task through an unbounded queue; `pending_bytes`
/// tracks what the socket has not yet accepted.
pub struct Connection {
    tx: mpsc::UnboundedSender<Message>,
    pending: PendingBytes,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl Connection {
    /// Connect and return the connection plus its ordered event stream
    pub async fn connect(
        config: &ClientConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServerEvent>), VoiceError> {
        let url = config.connect_url();
        let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| VoiceError::transport(format!("connect to {} failed: {}", config.url, e)))?;
        info!("Connected to {}", config.url);

        let (mut sink, mut stream) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pending = PendingBytes::default();

        let written = pending.clone();
        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let len = message.len();
                if let Err(e) = sink.send(message).await {
                    debug!("Socket write failed: {}", e);
                    break;
                }
                written.sub(len);
            }
            let _ = sink.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => {
                            if events_tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Unrecognized server message: {}", e),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Socket read failed: {}", e);
                        break;
                    }
                }
            }
        });

        Ok((
            Self {
                tx,
                pending,
                writer,
                reader,
            },
            events_rx,
        ))
    }

    fn enqueue(&mut self, message: Message) -> Result<(), VoiceError> {
        let len = message.len();
        self.pending.add(len);
        self.tx.send(message).map_err(|_| {
            self.pending.sub(len);
            VoiceError::transport("connection closed")
        })
    }

    /// Stop both socket tasks
    pub fn close(self) {
        drop(self.tx);
        self.reader.abort();
        // The writer drains what is queued, then closes the socket.
        drop(self.writer);
    }
}

impl OutboundSink for Connection {
    fn pending_bytes(&self) -> usize {
        self.pending.get()
    }

    fn send_audio(&mut self, pcm: Vec<u8>) -> Result<(), VoiceError> {
        self.enqueue(Message::Binary(pcm))
    }

    fn send_control(&mut self, message: ClientMessage) -> Result<(), VoiceError> {
        let text = message
            .to_json()
            .map_err(|e| VoiceError::protocol_with("encode_failed", e.to_string()))?;
        self.enqueue(Message::Text(text))
    }
}

/// Everything a client keeps across reconnects
struct ClientRuntime<P: Player> {
    sample_rate: u32,
    capture: CapturePipeline,
    playback: PlaybackQueue<P>,
    conversation: Conversation,
    observer: mpsc::UnboundedSender<ClientEvent>,
    source_open: bool,
    /// Talk button is down; survives reconnects
    held: bool,
    /// A turn was opened and its reply has not finished
    awaiting_reply: bool,
}

impl<P: Player> ClientRuntime<P> {
    fn notify(&self, event: ClientEvent) {
        let _ = self.observer.send(event);
    }

    fn is_finished(&self) -> bool {
        !self.source_open && !self.awaiting_reply && self.playback.is_empty()
    }

    async fn run_connection(
        &mut self,
        conn: &mut Connection,
        events: &mut mpsc::UnboundedReceiver<ServerEvent>,
        frames: &mut mpsc::Receiver<CaptureFrame>,
        gestures: &mut mpsc::UnboundedReceiver<Gesture>,
        finished: &mut mpsc::UnboundedReceiver<u64>,
    ) -> SessionEnd {
        if conn
            .send_control(ClientMessage::Hello {
                sample_rate: Some(self.sample_rate),
            })
            .is_err()
        {
            return SessionEnd::TransportLost;
        }

        if self.held {
            if let Err(e) = self.on_gesture(Gesture::Press, conn) {
                warn!("{}", e);
                return SessionEnd::TransportLost;
            }
        }

        loop {
            // Gestures first: a press queued before a frame must open the turn for it.
            tokio::select! {
                biased;
                Some(gesture) = gestures.recv() => {
                    if let Err(e) = self.on_gesture(gesture, conn) {
                        warn!("{}", e);
                        return SessionEnd::TransportLost;
                    }
                },
                event = events.recv() => match event {
                    Some(event) => self.on_server_event(event),
                    None => return SessionEnd::TransportLost,
                },
                frame = frames.recv(), if self.source_open => {
                    let result = match frame {
                        Some(frame) => self
                            .capture
                            .process_frame(&frame, conn)
                            .map(|outcome| outcome.signal),
                        None => {
                            info!("Capture finished");
                            self.source_open = false;
                            self.held = false;
                            self.capture
                                .release(conn)
                                .map(|ended| ended.then_some(TurnSignal::Ended))
                        }
                    };
                    match result {
                        Ok(Some(signal)) => self.on_turn_signal(signal),
                        Ok(None) => {}
                        Err(e) => {
                            warn!("{}", e);
                            return SessionEnd::TransportLost;
                        }
                    }
                },
                Some(id) = finished.recv() => self.playback.on_finished(id),
            }

            if self.is_finished() {
                return SessionEnd::CaptureFinished;
            }
        }
    }

    fn on_gesture(&mut self, gesture: Gesture, conn: &mut Connection) -> Result<(), VoiceError> {
        let signal = match gesture {
            Gesture::Press => {
                self.held = true;
                self.capture
                    .press(conn)?
                    .then_some(TurnSignal::Started)
            }
            Gesture::Release => {
                self.held = false;
                self.capture
                    .release(conn)?
                    .then_some(TurnSignal::Ended)
            }
        };
        if let Some(signal) = signal {
            self.on_turn_signal(signal);
        }
        Ok(())
    }

    fn on_turn_signal(&mut self, signal: TurnSignal) {
        if signal == TurnSignal::Started {
            self.playback.flush();
        }
        self.awaiting_reply = true;
        self.notify(ClientEvent::Capture(signal));
    }

    fn on_server_event(&mut self, event: ServerEvent) {
        self.conversation.apply(&event);

        match &event {
            ServerEvent::FinalTranscript { .. } => self.capture.on_server_turn_closed(),
            ServerEvent::TtsChunk { seq, format, audio } => {
                match PlaybackChunk::decode(*seq, format, audio) {
                    Ok(chunk) => {
                        self.playback.enqueue(chunk);
                    }
                    Err(e) => warn!("Skipping tts chunk {}: {}", seq, e),
                }
            }
            ServerEvent::Done => self.awaiting_reply = self.capture.is_turn_open(),
            ServerEvent::Cancelled => {
                self.playback.flush();
                self.awaiting_reply = self.capture.is_turn_open();
            }
            ServerEvent::Error { code, message, .. } => {
                warn!("Server error {}: {}", code, message);
                if code != "protocol_error" {
                    self.capture.on_server_turn_closed();
                    self.awaiting_reply = false;
                }
            }
            _ => {}
        }

        self.notify(ClientEvent::Server(event));
    }

    fn on_transport_lost(&mut self) {
        self.playback.flush();
        self.capture.on_server_turn_closed();
        self.conversation.drop_live();
        self.awaiting_reply = false;
        self.notify(ClientEvent::Disconnected);
    }
}

/// Streams captured frames to the server, plays replies, and reconnects with
/// backoff on transport loss. Returns the conversation once capture is
/// exhausted and the last reply has played.
///
/// `gestures` drives push-to-talk; in hands-free mode its sender may simply
/// be dropped. The end of `frames` releases any turn still open.
pub async fn run_with_reconnect<P: Player>(
    config: &ClientConfig,
    sample_rate: u32,
    mut frames: mpsc::Receiver<CaptureFrame>,
    mut gestures: mpsc::UnboundedReceiver<Gesture>,
    player: P,
    mut finished: mpsc::UnboundedReceiver<u64>,
    observer: mpsc::UnboundedSender<ClientEvent>,
) -> Result<Conversation> {
    let mut runtime = ClientRuntime {
        sample_rate,
        capture: CapturePipeline::new(
            config.mode,
            config.endpoint.clone(),
            sample_rate,
            BackpressurePolicy::new(config.max_pending_bytes),
        ),
        playback: PlaybackQueue::new(player),
        conversation: Conversation::new(),
        observer,
        source_open: true,
        held: false,
        awaiting_reply: false,
    };
    let mut policy = ReconnectPolicy::new(config.reconnect.clone());

    loop {
        match Connection::connect(config).await {
            Ok((mut conn, mut events)) => {
                policy.reset();
                runtime.notify(ClientEvent::Connected);

                let end = runtime
                    .run_connection(
                        &mut conn,
                        &mut events,
                        &mut frames,
                        &mut gestures,
                        &mut finished,
                    )
                    .await;
                conn.close();

                if end == SessionEnd::CaptureFinished {
                    let stats = runtime.capture.stats();
                    info!(
                        "Conversation finished: {} turns, {} frames sent, {} dropped",
                        stats.turns_started, stats.frames_sent, stats.frames_dropped
                    );
                    return Ok(runtime.conversation);
                }
                warn!("Connection lost");
                runtime.on_transport_lost();
            }
            Err(e) => warn!("{}", e),
        }

        let Some(delay) = policy.next_delay() else {
            anyhow::bail!(
                "Giving up after {} reconnect attempts",
                policy.attempts()
            );
        };
        runtime.notify(ClientEvent::Reconnecting {
            attempt: policy.attempts(),
            delay,
        });
        info!(
            "Reconnecting in {:?} (attempt {})",
            delay,
            policy.attempts()
        );

        // Audio captured while offline is not replayed.
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                frame = frames.recv(), if runtime.source_open => {
                    if frame.is_none() {
                        runtime.source_open = false;
                        runtime.held = false;
                    }
                }
                Some(gesture) = gestures.recv() => runtime.held = gesture == Gesture::Press,
            }
        }
        if runtime.is_finished() {
            return Ok(runtime.conversation);
        }
    }
}
