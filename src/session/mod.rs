//! Realtime voice session management
//!
//! A `VoiceSession` is the turn controller for one connection:
//! - Buffers and resamples incoming audio, runs endpoint detection
//! - Drives transcription, generation and synthesis per turn
//! - Enforces epoch-scoped cancellation and event ordering

mod config;
mod session;
mod state;
mod stats;
mod turn;
mod worker;

pub use config::SessionConfig;
pub use session::{VoiceSession, SessionIdentity};
pub use state::{transition, Action, SessionEvent, Transition, TurnState};
pub use stats::{SessionSnapshot, SessionStats};
pub use turn::History;
pub use worker::{StageTimeouts, WorkerEvent, WorkerOutput};
