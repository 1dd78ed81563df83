use chrono::{DateTime, Utc};
use serde::Serialize;

use super::state::TurnState;

/// Point-in-time view of a live session, published on every transition
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    /// Server-assigned session identifier
    pub session_id: String,

    /// Opaque identity supplied by the auth collaborator
    pub identity: String,

    pub state: TurnState,

    /// Current turn epoch
    pub epoch: u64,

    /// Capture rate declared by `hello`
    pub sample_rate: u32,

    pub connected_at: DateTime<Utc>,
}

/// Totals reported when a session ends
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    pub turns_started: u64,
    pub turns_completed: u64,
    pub turns_cancelled: u64,
    pub turns_failed: u64,

    /// Protocol errors answered with an `error` event
    pub protocol_errors: u64,

    /// Bytes of 16 kHz PCM accepted across all turns
    pub audio_bytes: u64,
}
