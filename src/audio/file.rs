use anyhow::{Context, Result};
use hound::WavReader;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use super::backend::{AudioBackend, AudioBackendConfig, CaptureFrame};
use super::codec::sample_to_f32;

/// A WAV file loaded into memory as mono float samples
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Int if spec.bits_per_sample == 16 => reader
                .into_samples::<i16>()
                .map(|s| s.map(sample_to_f32))
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            _ => anyhow::bail!(
                "Unsupported WAV format: {} bits {:?}",
                spec.bits_per_sample,
                spec.sample_format
            ),
        };

        let channels = spec.channels.max(1) as usize;
        let samples: Vec<f32> = interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();

        let duration_seconds = samples.len() as f64 / spec.sample_rate as f64;

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Split into fixed-duration frames, padding with trailing silence
    pub fn frames(&self, frame_duration_ms: u64, trailing_silence_ms: u64) -> Vec<CaptureFrame> {
        let frame_len = ((self.sample_rate as u64 * frame_duration_ms) / 1000).max(1) as usize;
        let silence_len = (self.sample_rate as u64 * trailing_silence_ms / 1000) as usize;

        let mut padded = self.samples.clone();
        padded.resize(padded.len() + silence_len, 0.0);

        padded
            .chunks(frame_len)
            .enumerate()
            .map(|(i, chunk)| CaptureFrame {
                samples: chunk.to_vec(),
                sample_rate: self.sample_rate,
                timestamp_ms: i as u64 * frame_duration_ms,
            })
            .collect()
    }
}

/// Capture backend that replays a WAV file as if it came from a device
pub struct FileBackend {
    file: Arc<AudioFile>,
    config: AudioBackendConfig,
    capturing: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl FileBackend {
    pub fn open(path: impl AsRef<Path>, config: AudioBackendConfig) -> Result<Self> {
        Ok(Self::from_file(AudioFile::open(path)?, config))
    }

    pub fn from_file(file: AudioFile, config: AudioBackendConfig) -> Self {
        Self {
            file: Arc::new(file),
            config,
            capturing: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for FileBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<CaptureFrame>> {
        if self.capturing.swap(true, Ordering::SeqCst) {
            anyhow::bail!("File backend already capturing");
        }

        let (tx, rx) = mpsc::channel(64);
        let frames = self
            .file
            .frames(self.config.frame_duration_ms, self.config.trailing_silence_ms);
        let pace = Duration::from_millis(self.config.frame_duration_ms.max(1));
        let realtime = self.config.realtime;
        let capturing = Arc::clone(&self.capturing);

        info!(
            "File capture started: {} ({} frames of {}ms)",
            self.file.path,
            frames.len(),
            self.config.frame_duration_ms
        );

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(pace);
            for frame in frames {
                if !capturing.load(Ordering::SeqCst) {
                    break;
                }
                if realtime {
                    ticker.tick().await;
                }
                if tx.send(frame).await.is_err() {
                    break;
                }
            }
            capturing.store(false, Ordering::SeqCst);
        }));

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.capturing.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "file"
    }
}
