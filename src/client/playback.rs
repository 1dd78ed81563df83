use base64::Engine;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::audio::{wav, CANONICAL_SAMPLE_RATE};
use crate::error::VoiceError;

/// One decoded `tts_chunk`
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackChunk {
    pub seq: u32,
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl PlaybackChunk {
    /// Decode the base64 payload of a `tts_chunk` event
    pub fn decode(seq: u32, format: &str, audio_b64: &str) -> Result<Self, VoiceError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(audio_b64.as_bytes())
            .map_err(|e| VoiceError::protocol_with("invalid_audio", e.to_string()))?;

        if format == "wav" || wav::is_wav(&bytes) {
            let decoded = wav::decode_wav(&bytes)
                .map_err(|e| VoiceError::protocol_with("invalid_audio", e.to_string()))?;
            Ok(Self {
                seq,
                samples: decoded.samples,
                sample_rate: decoded.sample_rate,
            })
        } else {
            Ok(Self {
                seq,
                samples: crate::audio::codec::bytes_to_i16(&bytes),
                sample_rate: CANONICAL_SAMPLE_RATE,
            })
        }
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// Audio output device.
///
/// `play` must return immediately; the device reports completion through
/// [`PlaybackQueue::on_finished`] with the same id.
pub trait Player {
    fn play(&mut self, id: u64, chunk: &PlaybackChunk);

    /// Stop the current item now, without reporting completion
    fn stop(&mut self);
}

/// Strict FIFO of synthesized audio with barge-in flush.
pub struct PlaybackQueue<P: Player> {
    player: P,
    pending: VecDeque<(u64, PlaybackChunk)>,
    current: Option<u64>,
    next_id: u64,
    started: u64,
}

impl<P: Player> PlaybackQueue<P> {
    pub fn new(player: P) -> Self {
        Self {
            player,
            pending: VecDeque::new(),
            current: None,
            next_id: 0,
            started: 0,
        }
    }

    /// Queue a chunk; starts playing if the device is idle
    pub fn enqueue(&mut self, chunk: PlaybackChunk) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.push_back((id, chunk));
        if self.current.is_none() {
            self.start_next();
        }
        id
    }

    /// Completion from the device. Stale ids (from before a flush) are ignored.
    pub fn on_finished(&mut self, id: u64) {
        if self.current != Some(id) {
            debug!("Ignoring completion of stale playback item {}", id);
            return;
        }
        self.current = None;
        self.start_next();
    }

    /// Barge-in: drop everything queued and stop the current item immediately.
    /// Returns the number of items discarded, including the one playing.
    pub fn flush(&mut self) -> usize {
        let mut discarded = self.pending.len();
        self.pending.clear();
        if self.current.take().is_some() {
            self.player.stop();
            discarded += 1;
        }
        if discarded > 0 {
            info!("Playback flushed ({} items)", discarded);
        }
        discarded
    }

    /// Items queued or playing
    pub fn len(&self) -> usize {
        self.pending.len() + usize::from(self.current.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_playing(&self) -> bool {
        self.current.is_some()
    }

    /// Total items handed to the device
    pub fn started(&self) -> u64 {
        self.started
    }

    pub fn player(&self) -> &P {
        &self.player
    }

    pub fn player_mut(&mut self) -> &mut P {
        &mut self.player
    }

    fn start_next(&mut self) {
        if let Some((id, chunk)) = self.pending.pop_front() {
            debug!("Playing chunk seq {} ({:?})", chunk.seq, chunk.duration());
            self.current = Some(id);
            self.started += 1;
            self.player.play(id, &chunk);
        }
    }
}

/// Player without an audio device: holds each chunk for its duration, then
/// reports completion on `finished`.
pub struct TimedPlayer {
    finished: mpsc::UnboundedSender<u64>,
    playing: Option<JoinHandle<()>>,
}

impl TimedPlayer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<u64>) {
        let (finished, rx) = mpsc::unbounded_channel();
        (
            Self {
                finished,
                playing: None,
            },
            rx,
        )
    }
}

impl Player for TimedPlayer {
    fn play(&mut self, id: u64, chunk: &PlaybackChunk) {
        let duration = chunk.duration();
        let finished = self.finished.clone();
        self.playing = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = finished.send(id);
        }));
    }

    fn stop(&mut self) {
        if let Some(handle) = self.playing.take() {
            handle.abort();
        }
    }
}

impl Drop for TimedPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}
