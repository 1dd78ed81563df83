use base64::Engine;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::config::SessionConfig;
use super::state::{transition, Action, SessionEvent, TurnState};
use super::stats::{SessionSnapshot, SessionStats};
use super::turn::{History, Turn};
use super::worker::{spawn_turn, StageTimeouts, TurnJob, WorkerEvent, WorkerOutput};
use crate::audio::{
    codec, level, AudioClock, EndpointDecision, EndpointDetector, Resampler,
    CANONICAL_SAMPLE_RATE,
};
use crate::engines::Engines;
use crate::error::VoiceError;
use crate::protocol::{ClientMessage, Inbound, ServerEvent};

/// Accepted range for `hello{sample_rate}`
const MIN_SAMPLE_RATE: u32 = 8000;
const MAX_SAMPLE_RATE: u32 = 192_000;

/// Who a session belongs to
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    /// Server-assigned identifier
    pub session_id: String,
    /// Opaque token from the auth collaborator
    pub identity: String,
}

impl SessionIdentity {
    pub fn new(identity: Option<String>) -> Self {
        let session_id = format!("session-{}", uuid::Uuid::new_v4());
        let identity = identity.unwrap_or_else(|| format!("anonymous-{}", &session_id[8..16]));
        Self {
            session_id,
            identity,
        }
    }
}

/// Turn controller for one live connection.
///
/// All session state (audio buffer, epoch, turn) is owned here and mutated
/// only by [`VoiceSession::run`], which handles inbound messages strictly in
/// arrival order. Pipeline work runs in a separate task and reports back over
/// a channel, so a `cancel` is acted on while a stage is still awaiting.
pub struct VoiceSession {
    ident: SessionIdentity,
    config: SessionConfig,
    engines: Engines,

    state: TurnState,
    epoch: u64,
    sample_rate: u32,

    /// 16 kHz PCM16LE for the active turn
    buffer: Vec<u8>,
    max_buffer_bytes: usize,
    last_partial_bytes: usize,
    resampler: Resampler,
    detector: EndpointDetector,
    clock: AudioClock,
    /// Whether the detector may close the current turn
    auto_end: bool,

    turn: Option<Turn>,
    history: History,

    worker_tx: mpsc::Sender<WorkerEvent>,
    worker_rx: Option<mpsc::Receiver<WorkerEvent>>,
    outbound: mpsc::Sender<ServerEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
    stats: SessionStats,
}

impl VoiceSession {
    /// Create a session that writes its events to `outbound`
    pub fn new(
        ident: SessionIdentity,
        config: SessionConfig,
        engines: Engines,
        outbound: mpsc::Sender<ServerEvent>,
    ) -> Self {
        let sample_rate = config.default_sample_rate;
        let (worker_tx, worker_rx) = mpsc::channel(config.outbound_queue_len.max(1));
        let (snapshot, _) = watch::channel(SessionSnapshot {
            session_id: ident.session_id.clone(),
            identity: ident.identity.clone(),
            state: TurnState::Idle,
            epoch: 0,
            sample_rate,
            connected_at: Utc::now(),
        });
        let max_buffer_bytes =
            (config.max_turn_audio_secs.max(1) * CANONICAL_SAMPLE_RATE as u64 * 2) as usize;

        let resampler = Resampler::new(sample_rate, CANONICAL_SAMPLE_RATE).unwrap_or_else(|e| {
            warn!("Default capture rate unusable ({}), assuming 16 kHz", e);
            Resampler::passthrough(CANONICAL_SAMPLE_RATE)
        });

        Self {
            resampler,
            detector: EndpointDetector::new(config.endpoint.clone()),
            clock: AudioClock::new(CANONICAL_SAMPLE_RATE),
            auto_end: config.auto_endpoint,
            history: History::new(config.max_history_turns),
            ident,
            config,
            engines,
            state: TurnState::Idle,
            epoch: 0,
            sample_rate,
            buffer: Vec::new(),
            max_buffer_bytes,
            last_partial_bytes: 0,
            turn: None,
            worker_tx,
            worker_rx: Some(worker_rx),
            outbound,
            snapshot,
            stats: SessionStats::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.ident.session_id
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Live view of state and epoch, for the session registry
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    /// Process inbound messages until the transport goes away
    pub async fn run(mut self, mut inbound: mpsc::Receiver<Inbound>) -> SessionStats {
        let Some(mut worker_rx) = self.worker_rx.take() else {
            return self.stats;
        };

        info!(
            "Session {} started (identity {})",
            self.ident.session_id, self.ident.identity
        );

        self.emit(ServerEvent::Ready).await;

        let mut partials = tokio::time::interval(self.config.partial_interval());
        partials.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while self.state != TurnState::Disconnected {
            let listening = self.state == TurnState::Listening;
            tokio::select! {
                message = inbound.recv() => match message {
                    Some(message) => self.handle_inbound(message).await,
                    None => self.close(),
                },
                Some(event) = worker_rx.recv() => self.handle_worker(event).await,
                _ = partials.tick(), if listening => self.emit_partial().await,
            }
        }

        info!(
            "Session {} ended: {} turns completed, {} cancelled, {} failed",
            self.ident.session_id,
            self.stats.turns_completed,
            self.stats.turns_cancelled,
            self.stats.turns_failed
        );

        self.stats
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    fn step(&mut self, event: SessionEvent) -> Action {
        let t = transition(self.state, event);
        if t.next != self.state {
            debug!(
                "Session {}: {:?} -> {:?} on {:?}",
                self.ident.session_id, self.state, t.next, event
            );
            self.state = t.next;
            self.publish();
        }
        t.action
    }

    fn publish(&self) {
        let mut snapshot = self.snapshot.borrow().clone();
        snapshot.state = self.state;
        snapshot.epoch = self.epoch;
        snapshot.sample_rate = self.sample_rate;
        self.snapshot.send_replace(snapshot);
    }

    /// Handles an action the caller did not expect for its event
    async fn unexpected(&mut self, event: SessionEvent, action: Action) {
        match action {
            Action::Reject(reason) => {
                self.protocol_error(VoiceError::protocol_with("unexpected_message", reason))
                    .await
            }
            _ => debug!(
                "Session {}: {:?} ignored while {:?}",
                self.ident.session_id, event, self.state
            ),
        }
    }

    async fn protocol_error(&mut self, error: VoiceError) {
        self.stats.protocol_errors += 1;
        warn!("Session {}: {}", self.ident.session_id, error);
        self.emit(error.to_event()).await;
    }

    async fn emit(&mut self, event: ServerEvent) {
        if self.state == TurnState::Disconnected {
            return;
        }
        if self.outbound.send(event).await.is_err() {
            warn!(
                "Session {}: transport closed while sending",
                self.ident.session_id
            );
            self.close();
        }
    }

    // ========================================================================
    // Client messages
    // ========================================================================

    async fn handle_inbound(&mut self, message: Inbound) {
        match message {
            Inbound::Invalid(error) => self.protocol_error(error).await,
            Inbound::Audio(bytes) => self.on_audio(&bytes).await,
            Inbound::Control(message) => match message {
                ClientMessage::Hello { sample_rate } => match self.step(SessionEvent::Hello) {
                    Action::RecordSampleRate => self.record_sample_rate(sample_rate).await,
                    other => self.unexpected(SessionEvent::Hello, other).await,
                },
                ClientMessage::Start { auto_end } => match self.step(SessionEvent::Start) {
                    Action::OpenTurn => self.open_turn(auto_end),
                    other => self.unexpected(SessionEvent::Start, other).await,
                },
                ClientMessage::AudioFrame { pcm16le_b64, .. } => {
                    match base64::engine::general_purpose::STANDARD.decode(pcm16le_b64.as_bytes()) {
                        Ok(bytes) => self.on_audio(&bytes).await,
                        Err(e) => {
                            self.protocol_error(VoiceError::protocol_with(
                                "invalid_audio",
                                e.to_string(),
                            ))
                            .await
                        }
                    }
                }
                ClientMessage::End => self.end_turn("client").await,
                ClientMessage::Cancel => match self.step(SessionEvent::Cancel) {
                    Action::CancelTurn => self.cancel_turn().await,
                    other => self.unexpected(SessionEvent::Cancel, other).await,
                },
            },
        }
    }

    async fn record_sample_rate(&mut self, sample_rate: Option<u32>) {
        let Some(rate) = sample_rate else {
            return;
        };
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&rate) {
            self.protocol_error(VoiceError::protocol_with(
                "invalid_sample_rate",
                format!("{} Hz is outside {}..={}", rate, MIN_SAMPLE_RATE, MAX_SAMPLE_RATE),
            ))
            .await;
            return;
        }

        match Resampler::new(rate, CANONICAL_SAMPLE_RATE) {
            Ok(resampler) => {
                info!(
                    "Session {}: capture rate {} Hz",
                    self.ident.session_id, rate
                );
                self.sample_rate = rate;
                self.resampler = resampler;
                self.publish();
            }
            Err(error) => self.protocol_error(error).await,
        }
    }

    fn open_turn(&mut self, auto_end: Option<bool>) {
        if let Some(previous) = self.turn.take() {
            previous.retire();
        }

        self.epoch += 1;
        self.turn = Some(Turn::new(self.epoch));
        self.buffer.clear();
        self.last_partial_bytes = 0;
        self.resampler.reset();
        self.clock.reset();
        self.auto_end = auto_end.unwrap_or(self.config.auto_endpoint);
        if self.auto_end {
            self.detector.start(Duration::ZERO);
        } else {
            self.detector.reset();
        }
        self.stats.turns_started += 1;
        self.publish();

        info!(
            "Session {}: turn {} listening ({})",
            self.ident.session_id,
            self.epoch,
            if self.auto_end { "auto end" } else { "client ends" }
        );
    }

    async fn on_audio(&mut self, bytes: &[u8]) {
        match self.step(SessionEvent::AudioFrame) {
            Action::AppendAudio => self.append_audio(bytes).await,
            other => self.unexpected(SessionEvent::AudioFrame, other).await,
        }
    }

    async fn append_audio(&mut self, bytes: &[u8]) {
        let samples = codec::bytes_to_i16(bytes);
        let resampled = self.resampler.process(&samples);
        self.push_pcm(&resampled);

        let at = self.clock.advance(resampled.len());
        let rms = level::rms_i16(&resampled);
        let endpoint = self.detector.observe(rms, at) == EndpointDecision::EndOfSpeech;

        if endpoint && self.auto_end {
            info!(
                "Session {}: end of speech detected at {:.2}s",
                self.ident.session_id,
                at.as_secs_f64()
            );
            self.end_turn("endpoint").await;
        } else if self.buffer.len() >= self.max_buffer_bytes {
            warn!(
                "Session {}: utterance reached {}s, closing turn",
                self.ident.session_id, self.config.max_turn_audio_secs
            );
            self.end_turn("length limit").await;
        }
    }

    fn push_pcm(&mut self, samples: &[i16]) {
        let pcm = codec::i16_to_bytes(samples);
        self.stats.audio_bytes += pcm.len() as u64;
        self.buffer.extend_from_slice(&pcm);
    }

    async fn end_turn(&mut self, source: &str) {
        match self.step(SessionEvent::End) {
            Action::Finalize => self.finalize(source),
            other => self.unexpected(SessionEvent::End, other).await,
        }
    }

    fn finalize(&mut self, source: &str) {
        let tail = self.resampler.flush();
        self.push_pcm(&tail);
        let audio = std::mem::take(&mut self.buffer);
        let history = self.history.messages();
        self.detector.reset();

        let Some(turn) = self.turn.as_ref() else {
            return;
        };

        info!(
            "Session {}: turn {} closed by {} ({} bytes)",
            self.ident.session_id,
            turn.epoch,
            source,
            audio.len()
        );

        let job = TurnJob {
            token: turn.token.clone(),
            audio,
            history,
            engines: self.engines.clone(),
            timeouts: StageTimeouts {
                transcription: self.config.transcription_timeout(),
                generation: self.config.generation_timeout(),
                synthesis: self.config.synthesis_timeout(),
            },
            min_unit_chars: self.config.min_speech_unit_chars,
        };
        spawn_turn(job, self.worker_tx.clone());
    }

    async fn cancel_turn(&mut self) {
        self.epoch += 1;
        if let Some(turn) = self.turn.take() {
            let token = turn.retire();
            info!(
                "Session {}: turn {} cancelled",
                self.ident.session_id,
                token.epoch()
            );
        }
        self.buffer.clear();
        self.resampler.reset();
        self.detector.reset();
        self.stats.turns_cancelled += 1;
        self.publish();
        self.emit(ServerEvent::Cancelled).await;
    }

    async fn emit_partial(&mut self) {
        if self.buffer.len() == self.last_partial_bytes {
            return;
        }
        self.last_partial_bytes = self.buffer.len();
        let duration_s = self.buffer.len() as f64 / (CANONICAL_SAMPLE_RATE as f64 * 2.0);
        self.emit(ServerEvent::PartialTranscript {
            text: format!("listening… ~{:.2}s", duration_s),
            bytes_received: self.buffer.len(),
        })
        .await;
    }

    fn close(&mut self) {
        if self.step(SessionEvent::TransportClosed) != Action::Release {
            return;
        }
        self.epoch += 1;
        if let Some(turn) = self.turn.take() {
            turn.retire();
        }
        self.buffer.clear();
        self.publish();
        info!("Session {}: transport closed", self.ident.session_id);
    }

    // ========================================================================
    // Pipeline output
    // ========================================================================

    async fn handle_worker(&mut self, event: WorkerEvent) {
        if self.turn.as_ref().map(|t| t.epoch) != Some(event.epoch) {
            debug!(
                "Session {}: dropping output of retired epoch {}",
                self.ident.session_id, event.epoch
            );
            return;
        }

        match event.output {
            WorkerOutput::Transcript {
                text,
                bytes_received,
                duration_s,
            } => match self.step(SessionEvent::TranscriptReady) {
                Action::BeginResponse => {
                    if let Some(turn) = self.turn.as_mut() {
                        turn.transcript = Some(text.clone());
                    }
                    self.emit(ServerEvent::FinalTranscript {
                        text,
                        bytes_received,
                        duration_s,
                    })
                    .await;
                }
                other => self.unexpected(SessionEvent::TranscriptReady, other).await,
            },
            WorkerOutput::Delta(delta) => match self.step(SessionEvent::AssistantOutput) {
                Action::Forward => {
                    if let Some(turn) = self.turn.as_mut() {
                        turn.assistant_text.push_str(&delta);
                    }
                    self.emit(ServerEvent::AssistantDelta { delta }).await;
                }
                other => self.unexpected(SessionEvent::AssistantOutput, other).await,
            },
            WorkerOutput::Chunk { seq, audio } => match self.step(SessionEvent::AssistantOutput) {
                Action::Forward => {
                    if let Some(turn) = self.turn.as_mut() {
                        turn.chunks_sent += 1;
                    }
                    self.emit(ServerEvent::tts_chunk(seq, audio.format.as_str(), &audio.bytes))
                        .await;
                }
                other => self.unexpected(SessionEvent::AssistantOutput, other).await,
            },
            WorkerOutput::Message(text) => match self.step(SessionEvent::AssistantOutput) {
                Action::Forward => {
                    if let Some(turn) = self.turn.as_mut() {
                        turn.assistant_text = text.clone();
                    }
                    self.emit(ServerEvent::AssistantMessage { text }).await;
                }
                other => self.unexpected(SessionEvent::AssistantOutput, other).await,
            },
            WorkerOutput::Completed => match self.step(SessionEvent::TurnCompleted) {
                Action::CompleteTurn => self.complete_turn().await,
                other => self.unexpected(SessionEvent::TurnCompleted, other).await,
            },
            WorkerOutput::Failed(error) => match self.step(SessionEvent::StageFailed) {
                Action::FailTurn => self.fail_turn(error).await,
                other => self.unexpected(SessionEvent::StageFailed, other).await,
            },
        }
    }

    async fn complete_turn(&mut self) {
        let Some(turn) = self.turn.take() else {
            return;
        };
        info!(
            "Session {}: turn {} done ({} audio chunks)",
            self.ident.session_id, turn.epoch, turn.chunks_sent
        );
        self.history.push(
            turn.transcript.clone().unwrap_or_default(),
            turn.assistant_text.clone(),
        );
        turn.retire();
        self.stats.turns_completed += 1;
        self.publish();
        self.emit(ServerEvent::Done).await;
    }

    async fn fail_turn(&mut self, error: VoiceError) {
        if let Some(turn) = self.turn.take() {
            let token = turn.retire();
            warn!(
                "Session {}: turn {} failed: {}",
                self.ident.session_id,
                token.epoch(),
                error
            );
        }
        self.stats.turns_failed += 1;
        self.publish();
        self.emit(error.to_event()).await;
    }
}
