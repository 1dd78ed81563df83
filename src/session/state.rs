//! Turn state machine.
//!
//! Every (state, event) pair has an explicit entry in [`transition`]. Events
//! that make no sense in a state map to [`Action::Ignore`] (silently dropped)
//! or [`Action::Reject`] (answered with a `protocol_error`), never to an
//! implicit fall-through.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// No active turn.
    Idle,
    /// Accepting audio frames.
    Listening,
    /// Audio closed, awaiting the transcript.
    Finalizing,
    /// Streaming generation and synthesis.
    Responding,
    /// Transport lost. Terminal.
    Disconnected,
}

/// Typed input to the state machine. Payloads travel alongside, not inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Hello,
    Start,
    AudioFrame,
    End,
    Cancel,
    /// The current turn's transcription finished.
    TranscriptReady,
    /// A delta, audio chunk or final message of the current turn.
    AssistantOutput,
    /// Generation and synthesis of the current turn are exhausted.
    TurnCompleted,
    /// A pipeline stage of the current turn failed or timed out.
    StageFailed,
    TransportClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    RecordSampleRate,
    OpenTurn,
    AppendAudio,
    /// Close the buffer and start transcription.
    Finalize,
    /// Emit the final transcript; generation is already underway.
    BeginResponse,
    /// Forward assistant output to the client.
    Forward,
    /// Retire the epoch, raise its token and acknowledge.
    CancelTurn,
    /// Emit `done` and record the turn in history.
    CompleteTurn,
    /// Emit the stage error and retire the epoch.
    FailTurn,
    /// Retire the epoch without acknowledging anyone.
    Release,
    Ignore,
    Reject(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: TurnState,
    pub action: Action,
}

impl Transition {
    fn to(next: TurnState, action: Action) -> Self {
        Self { next, action }
    }

    fn stay(state: TurnState, action: Action) -> Self {
        Self { next: state, action }
    }
}

pub fn transition(state: TurnState, event: SessionEvent) -> Transition {
    use Action::*;
    use SessionEvent as E;
    use TurnState::*;

    match (state, event) {
        (Disconnected, _) => Transition::stay(Disconnected, Ignore),
        (_, E::TransportClosed) => Transition::to(Disconnected, Release),

        (Idle, E::Hello) => Transition::stay(Idle, RecordSampleRate),
        (Listening | Finalizing | Responding, E::Hello) => {
            Transition::stay(state, Reject("hello is only accepted while idle"))
        }

        (Idle, E::Start) => Transition::to(Listening, OpenTurn),
        (Listening | Finalizing | Responding, E::Start) => {
            Transition::stay(state, Reject("a turn is already active"))
        }

        (Listening, E::AudioFrame) => Transition::stay(Listening, AppendAudio),
        (Idle | Finalizing | Responding, E::AudioFrame) => Transition::stay(state, Ignore),

        (Listening, E::End) => Transition::to(Finalizing, Finalize),
        (Idle | Finalizing | Responding, E::End) => Transition::stay(state, Ignore),

        (Idle, E::Cancel) => Transition::stay(Idle, Ignore),
        (Listening | Finalizing | Responding, E::Cancel) => Transition::to(Idle, CancelTurn),

        (Finalizing, E::TranscriptReady) => Transition::to(Responding, BeginResponse),
        (Idle | Listening | Responding, E::TranscriptReady) => Transition::stay(state, Ignore),

        (Responding, E::AssistantOutput) => Transition::stay(Responding, Forward),
        (Idle | Listening | Finalizing, E::AssistantOutput) => Transition::stay(state, Ignore),

        (Responding, E::TurnCompleted) => Transition::to(Idle, CompleteTurn),
        (Idle | Listening | Finalizing, E::TurnCompleted) => Transition::stay(state, Ignore),

        (Finalizing | Responding, E::StageFailed) => Transition::to(Idle, FailTurn),
        (Idle | Listening, E::StageFailed) => Transition::stay(state, Ignore),
    }
}
