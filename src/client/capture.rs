use std::time::Duration;
use tracing::{debug, info, warn};

use super::policy::BackpressurePolicy;
use super::TriggerMode;
use crate::audio::{
    codec, AudioClock, CaptureFrame, EndpointConfig, EndpointDecision, EndpointDetector, LevelMeter,
};
use crate::error::VoiceError;
use crate::protocol::ClientMessage;

/// Log one warning per this many dropped frames
const DROP_LOG_EVERY: u64 = 50;

/// Where captured audio and control messages go.
///
/// Sending never waits: implementations hand the message to a writer and
/// account for it in `pending_bytes` until it is on the wire.
pub trait OutboundSink {
    /// Bytes queued but not yet written to the transport
    fn pending_bytes(&self) -> usize;

    fn send_audio(&mut self, pcm: Vec<u8>) -> Result<(), VoiceError>;

    fn send_control(&mut self, message: ClientMessage) -> Result<(), VoiceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    Sent,
    /// Dropped by backpressure
    Dropped,
    /// No turn was open
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnSignal {
    /// `cancel` + `start` were sent
    Started,
    /// `end` was sent
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameOutcome {
    /// Raw RMS of the frame
    pub level: f32,
    pub disposition: FrameDisposition,
    pub signal: Option<TurnSignal>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub turns_started: u64,
    pub ends_sent: u64,
}

/// Turns captured frames into protocol traffic.
///
/// In hands-free mode a frame above the speech threshold opens a turn
/// (barge-in: `cancel` then `start`) and the endpoint detector closes it.
/// In push-to-talk mode `press` and `release` do. Either way at most one
/// `end` is sent per turn.
pub struct CapturePipeline {
    mode: TriggerMode,
    meter: LevelMeter,
    detector: EndpointDetector,
    clock: AudioClock,
    backpressure: BackpressurePolicy,
    turn_open: bool,
    stats: CaptureStats,
}

impl CapturePipeline {
    pub fn new(
        mode: TriggerMode,
        endpoint: EndpointConfig,
        sample_rate: u32,
        backpressure: BackpressurePolicy,
    ) -> Self {
        Self {
            mode,
            meter: LevelMeter::default(),
            detector: EndpointDetector::new(endpoint),
            clock: AudioClock::new(sample_rate),
            backpressure,
            turn_open: false,
            stats: CaptureStats::default(),
        }
    }

    pub fn mode(&self) -> TriggerMode {
        self.mode
    }

    pub fn is_turn_open(&self) -> bool {
        self.turn_open
    }

    pub fn meter(&self) -> &LevelMeter {
        &self.meter
    }

    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    /// Feeds one captured frame.
    pub fn process_frame<S: OutboundSink>(
        &mut self,
        frame: &CaptureFrame,
        sink: &mut S,
    ) -> Result<FrameOutcome, VoiceError> {
        let level = self.meter.update(&frame.samples);
        let mut signal = None;

        if !self.turn_open {
            if self.mode == TriggerMode::HandsFree && self.detector.is_speech(level) {
                self.open_turn(sink)?;
                signal = Some(TurnSignal::Started);
            } else {
                return Ok(FrameOutcome {
                    level,
                    disposition: FrameDisposition::Discarded,
                    signal: None,
                });
            }
        }

        let pcm = codec::encode(&frame.samples);
        let disposition = if self.backpressure.admit(sink.pending_bytes(), pcm.len()) {
            sink.send_audio(pcm)?;
            self.stats.frames_sent += 1;
            FrameDisposition::Sent
        } else {
            self.stats.frames_dropped += 1;
            if self.stats.frames_dropped % DROP_LOG_EVERY == 1 {
                warn!(
                    "Transport congested ({} bytes pending), {} frames dropped so far",
                    sink.pending_bytes(),
                    self.stats.frames_dropped
                );
            }
            FrameDisposition::Dropped
        };

        // Dropped frames still advance the turn clock.
        let at = self.clock.advance(frame.samples.len());
        if self.mode == TriggerMode::HandsFree
            && self.detector.observe(level, at) == EndpointDecision::EndOfSpeech
        {
            debug!("End of speech after {:.2}s", at.as_secs_f64());
            if self.end_turn(sink)? {
                signal = Some(TurnSignal::Ended);
            }
        }

        Ok(FrameOutcome {
            level,
            disposition,
            signal,
        })
    }

    /// Push-to-talk press. Also usable in hands-free mode to force a turn open.
    pub fn press<S: OutboundSink>(&mut self, sink: &mut S) -> Result<bool, VoiceError> {
        if self.turn_open {
            return Ok(false);
        }
        self.open_turn(sink)?;
        Ok(true)
    }

    /// Push-to-talk release or an explicit stop. Returns whether `end` was sent.
    pub fn release<S: OutboundSink>(&mut self, sink: &mut S) -> Result<bool, VoiceError> {
        self.end_turn(sink)
    }

    /// The server closed the turn on its own (auto-endpoint, error, cancel, reconnect).
    pub fn on_server_turn_closed(&mut self) {
        if self.turn_open {
            debug!("Server closed the capture turn");
        }
        self.turn_open = false;
        self.detector.reset();
    }

    fn open_turn<S: OutboundSink>(&mut self, sink: &mut S) -> Result<(), VoiceError> {
        // Only a hands-free turn may be closed by the server's endpointing.
        sink.send_control(ClientMessage::Cancel)?;
        sink.send_control(ClientMessage::start_with(self.mode == TriggerMode::HandsFree))?;

        self.turn_open = true;
        self.clock.reset();
        self.detector.start(Duration::ZERO);
        self.stats.turns_started += 1;
        info!("Capture turn {} opened", self.stats.turns_started);
        Ok(())
    }

    fn end_turn<S: OutboundSink>(&mut self, sink: &mut S) -> Result<bool, VoiceError> {
        if !self.turn_open {
            return Ok(false);
        }
        self.turn_open = false;
        self.detector.reset();
        sink.send_control(ClientMessage::End)?;
        self.stats.ends_sent += 1;
        info!("Capture turn {} closed", self.stats.turns_started);
        Ok(true)
    }
}
