//! Error taxonomy for the voice turn controller.
//!
//! Every failure that reaches a client is converted into a single
//! `error{code, message, details?}` event. The `code` strings are stable and
//! machine-readable; clients switch on them.

use std::time::Duration;
use thiserror::Error;

use crate::protocol::ServerEvent;

/// Pipeline stage a failure is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Transcription,
    Generation,
    Synthesis,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Transcription => "transcription",
            Stage::Generation => "generation",
            Stage::Synthesis => "synthesis",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VoiceError {
    /// Connect/send failure. Fatal to the session.
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Transcription failed: {message}")]
    Transcription {
        message: String,
        details: Option<String>,
    },

    #[error("Generation failed: {message}")]
    Generation {
        message: String,
        details: Option<String>,
    },

    #[error("Synthesis failed: {message}")]
    Synthesis {
        message: String,
        details: Option<String>,
    },

    /// Malformed or out-of-state message. Never tears down the session.
    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        details: Option<String>,
    },
}

impl VoiceError {
    pub fn transport(message: impl Into<String>) -> Self {
        VoiceError::Transport {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        VoiceError::Protocol {
            message: message.into(),
            details: None,
        }
    }

    pub fn protocol_with(message: impl Into<String>, details: impl Into<String>) -> Self {
        VoiceError::Protocol {
            message: message.into(),
            details: Some(details.into()),
        }
    }

    /// Failure of an external call, scoped to its stage.
    pub fn stage(stage: Stage, message: impl Into<String>) -> Self {
        Self::stage_with(stage, message, None)
    }

    pub fn stage_with(stage: Stage, message: impl Into<String>, details: Option<String>) -> Self {
        let message = message.into();
        match stage {
            Stage::Transcription => VoiceError::Transcription { message, details },
            Stage::Generation => VoiceError::Generation { message, details },
            Stage::Synthesis => VoiceError::Synthesis { message, details },
        }
    }

    /// A stage call exceeded its deadline. Not retried.
    pub fn timeout(stage: Stage, after: Duration) -> Self {
        Self::stage_with(
            stage,
            format!("{} timed out", stage.as_str()),
            Some(format!("timeout after {}ms", after.as_millis())),
        )
    }

    /// Stable machine-readable code sent on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            VoiceError::Transport { .. } => "transport_error",
            VoiceError::Transcription { .. } => "transcription_error",
            VoiceError::Generation { .. } => "generation_error",
            VoiceError::Synthesis { .. } => "synthesis_error",
            VoiceError::Protocol { .. } => "protocol_error",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            VoiceError::Transport { message }
            | VoiceError::Transcription { message, .. }
            | VoiceError::Generation { message, .. }
            | VoiceError::Synthesis { message, .. }
            | VoiceError::Protocol { message, .. } => message,
        }
    }

    pub fn details(&self) -> Option<&str> {
        match self {
            VoiceError::Transport { .. } => None,
            VoiceError::Transcription { details, .. }
            | VoiceError::Generation { details, .. }
            | VoiceError::Synthesis { details, .. }
            | VoiceError::Protocol { details, .. } => details.as_deref(),
        }
    }

    /// Only transport loss ends a session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, VoiceError::Transport { .. })
    }

    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::Error {
            code: self.code().to_string(),
            message: self.message().to_string(),
            details: self.details().map(str::to_string),
        }
    }
}
