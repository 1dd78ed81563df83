use anyhow::Result;
use tokio::sync::mpsc;

use super::file::FileBackend;

/// One captured frame in the analog domain (mono, floats in [-1, 1])
#[derive(Debug, Clone)]
pub struct CaptureFrame {
    /// Mono samples
    pub samples: Vec<f32>,
    /// Device-native sample rate in Hz
    pub sample_rate: u32,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl CaptureFrame {
    pub fn duration_ms(&self) -> u64 {
        self.samples.len() as u64 * 1000 / self.sample_rate.max(1) as u64
    }
}

/// Configuration for audio backend
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Frame size in milliseconds (short frames keep latency low)
    pub frame_duration_ms: u64,
    /// Deliver frames at wall-clock pace rather than as fast as possible
    pub realtime: bool,
    /// Silence appended after the source is exhausted, in milliseconds
    pub trailing_silence_ms: u64,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            frame_duration_ms: 20,
            realtime: true,
            trailing_silence_ms: 0,
        }
    }
}

/// Audio capture backend trait
///
/// Implementations own device acquisition and frame cadence:
/// - File: read a WAV file (for testing/batch processing)
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames. The channel
    /// closes when the source is exhausted or the backend is stopped.
    async fn start(&mut self) -> Result<mpsc::Receiver<CaptureFrame>>;

    /// Stop capturing audio
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create audio backend based on source and configuration
    pub fn create(source: AudioSource, config: AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        match source {
            AudioSource::Microphone => {
                anyhow::bail!("Microphone capture is provided by the browser client; use a file source")
            }
            AudioSource::File(path) => Ok(Box::new(FileBackend::open(path, config)?)),
        }
    }
}

/// Audio source type
#[derive(Debug, Clone)]
pub enum AudioSource {
    /// Microphone input
    Microphone,
    /// File input (for testing/batch processing)
    File(String),
}
