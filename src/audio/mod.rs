pub mod backend;
pub mod codec;
pub mod endpoint;
pub mod file;
pub mod level;
pub mod resample;
pub mod wav;

pub use backend::{AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioSource, CaptureFrame};
pub use endpoint::{AudioClock, EndpointConfig, EndpointDecision, EndpointDetector};
pub use file::{AudioFile, FileBackend};
pub use level::LevelMeter;
pub use resample::Resampler;

/// Rate every frame is normalized to before transcription.
pub const CANONICAL_SAMPLE_RATE: u32 = 16000;
