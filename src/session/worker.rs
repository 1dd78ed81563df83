//! The per-turn pipeline: transcribe, then stream generation into synthesis.
//!
//! A worker owns nothing the session owns. It receives the closed audio buffer
//! and a history snapshot, and reports back through an ordered channel tagged
//! with its epoch. Every await on an engine is raced against the epoch token
//! and a per-stage deadline.

use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::audio::CANONICAL_SAMPLE_RATE;
use crate::cancel::EpochToken;
use crate::engines::{ChatMessage, Engines, SpeechSegmenter, SynthesizedAudio, Synthesizer};
use crate::error::{Stage, VoiceError};

/// Output of a worker, in the order it must reach the client.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutput {
    Transcript {
        text: String,
        bytes_received: usize,
        duration_s: f64,
    },
    Delta(String),
    Chunk {
        seq: u32,
        audio: SynthesizedAudio,
    },
    Message(String),
    Completed,
    Failed(VoiceError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerEvent {
    pub epoch: u64,
    pub output: WorkerOutput,
}

#[derive(Debug, Clone, Copy)]
pub struct StageTimeouts {
    pub transcription: Duration,
    pub generation: Duration,
    pub synthesis: Duration,
}

pub struct TurnJob {
    pub token: EpochToken,
    pub audio: Vec<u8>,
    pub history: Vec<ChatMessage>,
    pub engines: Engines,
    pub timeouts: StageTimeouts,
    pub min_unit_chars: usize,
}

enum Guarded<T> {
    Done(T),
    Cancelled,
    TimedOut,
}

/// Races `fut` against cancellation and a deadline. Cancellation wins ties.
async fn guarded<F: Future>(token: &EpochToken, limit: Duration, fut: F) -> Guarded<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Guarded::Cancelled,
        result = tokio::time::timeout(limit, fut) => match result {
            Ok(value) => Guarded::Done(value),
            Err(_) => Guarded::TimedOut,
        },
    }
}

/// Ordered sink back to the session. Sending fails once the session is gone.
#[derive(Clone)]
struct Reporter {
    epoch: u64,
    tx: mpsc::Sender<WorkerEvent>,
}

impl Reporter {
    async fn send(&self, output: WorkerOutput) -> bool {
        self.tx
            .send(WorkerEvent {
                epoch: self.epoch,
                output,
            })
            .await
            .is_ok()
    }

    async fn fail(&self, error: VoiceError) {
        let _ = self.send(WorkerOutput::Failed(error)).await;
    }
}

/// Runs the turn in its own task. It exits on its own once the token is raised.
pub fn spawn_turn(job: TurnJob, tx: mpsc::Sender<WorkerEvent>) {
    tokio::spawn(run_turn(job, tx));
}

pub async fn run_turn(job: TurnJob, tx: mpsc::Sender<WorkerEvent>) {
    let token = job.token;
    let reporter = Reporter {
        epoch: token.epoch(),
        tx,
    };

    // Transcription
    let bytes_received = job.audio.len();
    let transcript = match guarded(
        &token,
        job.timeouts.transcription,
        job.engines.transcriber.transcribe(&job.audio, &token),
    )
    .await
    {
        Guarded::Done(Ok(text)) => text,
        Guarded::Done(Err(e)) => return reporter.fail(e).await,
        Guarded::TimedOut => {
            return reporter
                .fail(VoiceError::timeout(Stage::Transcription, job.timeouts.transcription))
                .await
        }
        Guarded::Cancelled => return,
    };
    drop(job.audio);

    info!(
        "Transcribed epoch {} ({} bytes): {}",
        token.epoch(),
        bytes_received,
        transcript
    );

    let duration_s = bytes_received as f64 / (CANONICAL_SAMPLE_RATE as f64 * 2.0);
    if !reporter
        .send(WorkerOutput::Transcript {
            text: transcript.clone(),
            bytes_received,
            duration_s,
        })
        .await
    {
        return;
    }

    // Generation
    let mut deltas = match guarded(
        &token,
        job.timeouts.generation,
        job.engines.generator.generate(&job.history, &transcript, &token),
    )
    .await
    {
        Guarded::Done(Ok(stream)) => stream,
        Guarded::Done(Err(e)) => return reporter.fail(e).await,
        Guarded::TimedOut => {
            return reporter
                .fail(VoiceError::timeout(Stage::Generation, job.timeouts.generation))
                .await
        }
        Guarded::Cancelled => return,
    };

    // Synthesis runs beside generation, one unit at a time, in order.
    let (unit_tx, unit_rx) = mpsc::unbounded_channel::<String>();
    let synthesis = job.engines.synthesizer.clone().map(|synth| {
        tokio::spawn(run_synthesis(
            synth,
            unit_rx,
            token.clone(),
            job.timeouts.synthesis,
            reporter.clone(),
        ))
    });

    let mut segmenter = SpeechSegmenter::new(job.min_unit_chars);
    let mut assistant_text = String::new();

    loop {
        let delta = match guarded(&token, job.timeouts.generation, deltas.next()).await {
            Guarded::Done(Some(Ok(delta))) => delta,
            Guarded::Done(Some(Err(e))) => return reporter.fail(e).await,
            Guarded::Done(None) => break,
            Guarded::TimedOut => {
                return reporter
                    .fail(VoiceError::timeout(Stage::Generation, job.timeouts.generation))
                    .await
            }
            Guarded::Cancelled => return,
        };

        assistant_text.push_str(&delta);
        if !reporter.send(WorkerOutput::Delta(delta.clone())).await {
            return;
        }

        if synthesis.is_some() {
            for unit in segmenter.push(&delta) {
                let _ = unit_tx.send(unit);
            }
        }
    }

    if let Some(rest) = segmenter.finish() {
        if synthesis.is_some() {
            let _ = unit_tx.send(rest);
        }
    }
    drop(unit_tx);

    if let Some(handle) = synthesis {
        match handle.await {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                return reporter
                    .fail(VoiceError::stage_with(
                        Stage::Synthesis,
                        "synthesis task aborted",
                        Some(e.to_string()),
                    ))
                    .await
            }
        }
    }

    if token.is_cancelled() {
        return;
    }

    if reporter.send(WorkerOutput::Message(assistant_text)).await {
        reporter.send(WorkerOutput::Completed).await;
    }
}

/// Synthesizes queued units in order. Returns false if the turn must stop.
async fn run_synthesis(
    synth: Arc<dyn Synthesizer>,
    mut units: mpsc::UnboundedReceiver<String>,
    token: EpochToken,
    limit: Duration,
    reporter: Reporter,
) -> bool {
    let mut seq: u32 = 0;

    while let Some(unit) = units.recv().await {
        let audio = match guarded(&token, limit, synth.synthesize(&unit, &token)).await {
            Guarded::Done(Ok(audio)) => audio,
            Guarded::Done(Err(e)) => {
                reporter.fail(e).await;
                return false;
            }
            Guarded::TimedOut => {
                reporter.fail(VoiceError::timeout(Stage::Synthesis, limit)).await;
                return false;
            }
            Guarded::Cancelled => return false,
        };

        debug!(
            "Synthesized unit {} of epoch {} ({} bytes)",
            seq,
            token.epoch(),
            audio.bytes.len()
        );

        if !reporter.send(WorkerOutput::Chunk { seq, audio }).await {
            return false;
        }
        seq += 1;
    }

    true
}
