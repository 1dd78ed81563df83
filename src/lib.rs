pub mod audio;
pub mod cancel;
pub mod client;
pub mod config;
pub mod engines;
pub mod error;
pub mod http;
pub mod protocol;
pub mod session;

pub use audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFile, AudioSource, CaptureFrame,
    EndpointConfig, EndpointDetector, LevelMeter,
};
pub use cancel::EpochToken;
pub use client::{ClientConfig, PlaybackQueue, TriggerMode};
pub use config::Config;
pub use engines::{Engines, Generator, Synthesizer, Transcriber};
pub use error::{Stage, VoiceError};
pub use http::{create_router, AppState};
pub use protocol::{ClientMessage, Inbound, ServerEvent};
pub use session::{SessionConfig, SessionStats, TurnState, VoiceSession};
