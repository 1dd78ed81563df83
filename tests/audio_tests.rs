// Integration tests for the audio layer: codec fidelity, endpointing, and
// replaying WAV files through the capture backend.

use reflections_voice::audio::{
    codec, level, AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioClock, AudioFile,
    AudioSource, EndpointConfig, EndpointDecision, EndpointDetector, FileBackend, Resampler,
};
use std::time::Duration;
use tempfile::TempDir;

/// One quantization step of the 16-bit scale
const STEP: f32 = 1.0 / 32767.0;

fn write_wav(dir: &TempDir, name: &str, rate: u32, channels: u16, samples: &[i16]) -> String {
    let path = dir.path().join(name);
    let spec = hound::WavSpec {
        channels,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for &s in samples {
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
    path.display().to_string()
}

// ============================================================================
// Frame codec
// ============================================================================

#[test]
fn test_round_trip_within_one_step() {
    // Sweep [-1, 1] densely, including both rails and zero
    let samples: Vec<f32> = (0..=20_000).map(|i| -1.0 + i as f32 / 10_000.0).collect();

    let encoded = codec::encode(&samples);
    assert_eq!(encoded.len(), samples.len() * 2, "Two bytes per sample");

    let decoded = codec::decode(&encoded);
    for (sample, restored) in samples.iter().zip(&decoded) {
        assert!(
            (sample - restored).abs() <= STEP,
            "{} decoded as {}",
            sample,
            restored
        );
    }
}

#[test]
fn test_encode_clamps_and_zeroes_nan() {
    let encoded = codec::encode(&[f32::NAN, 3.0, -3.0, 1.0, -1.0]);
    assert_eq!(
        codec::bytes_to_i16(&encoded),
        vec![0, 32767, -32768, 32767, -32768]
    );
}

#[test]
fn test_pcm_is_little_endian() {
    assert_eq!(codec::i16_to_bytes(&[0x0102, -2]), vec![0x02, 0x01, 0xFE, 0xFF]);
}

// ============================================================================
// Endpoint detection
// ============================================================================

#[test]
fn test_loud_then_silent_ends_exactly_once() {
    let mut detector = EndpointDetector::new(EndpointConfig {
        speech_rms_threshold: 0.02,
        min_utterance_ms: 1000,
        trailing_silence_ms: 800,
    });
    let mut clock = AudioClock::new(16000);
    detector.start(Duration::ZERO);

    let loud = vec![0.2f32; 320];
    let quiet = vec![0.001f32; 320];

    let mut ends = Vec::new();
    // 1200ms of speech
    for _ in 0..60 {
        let at = clock.advance(loud.len());
        assert_eq!(detector.observe(level::rms(&loud), at), EndpointDecision::Continue);
    }
    // 900ms of trailing silence, then silence keeps arriving
    for _ in 0..150 {
        let at = clock.advance(quiet.len());
        if detector.observe(level::rms(&quiet), at) == EndpointDecision::EndOfSpeech {
            ends.push(at);
        }
    }

    assert_eq!(ends.len(), 1, "Exactly one end, not two");
    assert_eq!(ends[0], Duration::from_millis(2020), "First frame past 800ms of silence");
    assert!(detector.has_ended());
}

#[test]
fn test_short_burst_does_not_end_turn() {
    let mut detector = EndpointDetector::new(EndpointConfig {
        speech_rms_threshold: 0.02,
        min_utterance_ms: 1500,
        trailing_silence_ms: 300,
    });
    detector.start(Duration::ZERO);

    // 100ms click then silence: must wait for the minimum utterance length
    assert_eq!(
        detector.observe(0.5, Duration::from_millis(100)),
        EndpointDecision::Continue
    );
    assert_eq!(
        detector.observe(0.0, Duration::from_millis(1000)),
        EndpointDecision::Continue
    );
    assert_eq!(
        detector.observe(0.0, Duration::from_millis(1500)),
        EndpointDecision::EndOfSpeech
    );
}

#[test]
fn test_detector_restarts_per_turn() {
    let mut detector = EndpointDetector::new(EndpointConfig::default());
    assert_eq!(
        detector.observe(0.0, Duration::from_secs(10)),
        EndpointDecision::Continue,
        "Unarmed detector never fires"
    );

    detector.start(Duration::ZERO);
    assert_eq!(
        detector.observe(0.0, Duration::from_secs(2)),
        EndpointDecision::EndOfSpeech
    );

    detector.start(Duration::from_secs(5));
    assert!(detector.is_armed(), "No state carries over from the previous turn");
    assert_eq!(
        detector.observe(0.0, Duration::from_millis(5500)),
        EndpointDecision::Continue
    );
}

// ============================================================================
// Resampling
// ============================================================================

#[test]
fn test_resampler_preserves_duration_across_frames() -> anyhow::Result<()> {
    let mut resampler = Resampler::new(44100, 16000)?;
    let mut total = 0;
    // One second in 10ms frames
    for _ in 0..100 {
        total += resampler.process(&vec![500i16; 441]).len();
    }
    assert!(total < 16000, "Filter delay is held back until the turn closes");

    total += resampler.flush().len();
    assert_eq!(total, 16000, "Exactly one second at 16 kHz");
    Ok(())
}

// ============================================================================
// File capture backend
// ============================================================================

#[test]
fn test_audio_file_downmixes_and_frames() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    // 100ms of stereo at 8 kHz: left loud, right silent
    let interleaved: Vec<i16> = (0..800).flat_map(|_| [16000i16, 0]).collect();
    let path = write_wav(&dir, "stereo.wav", 8000, 2, &interleaved);

    let file = AudioFile::open(&path)?;
    assert_eq!(file.sample_rate, 8000);
    assert_eq!(file.channels, 2);
    assert_eq!(file.samples.len(), 800, "Channels should be averaged to mono");
    assert!((file.samples[0] - 0.2441).abs() < 0.001);
    assert!((file.duration_seconds - 0.1).abs() < 1e-9);

    let frames = file.frames(20, 40);
    assert_eq!(frames.len(), 7, "5 audio frames plus 2 frames of silence");
    assert!(frames.iter().all(|f| f.samples.len() == 160));
    assert_eq!(frames[6].timestamp_ms, 120);
    assert!(frames[6].samples.iter().all(|&s| s == 0.0));

    Ok(())
}

#[tokio::test]
async fn test_file_backend_streams_then_closes() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = write_wav(&dir, "mono.wav", 16000, 1, &vec![1000i16; 1600]);

    let mut backend = FileBackend::open(
        &path,
        AudioBackendConfig {
            frame_duration_ms: 20,
            realtime: false,
            trailing_silence_ms: 0,
        },
    )?;
    assert!(!backend.is_capturing());

    let mut frames = backend.start().await?;
    assert!(backend.start().await.is_err(), "Backend can only be started once");

    let mut count = 0;
    let mut last_ts = None;
    while let Some(frame) = frames.recv().await {
        assert_eq!(frame.sample_rate, 16000);
        if let Some(prev) = last_ts {
            assert!(frame.timestamp_ms > prev, "Frames arrive in order");
        }
        last_ts = Some(frame.timestamp_ms);
        count += 1;
    }
    assert_eq!(count, 5, "100ms in 20ms frames");

    backend.stop().await?;
    assert!(!backend.is_capturing());
    Ok(())
}

#[test]
fn test_factory_rejects_microphone() {
    let result = AudioBackendFactory::create(AudioSource::Microphone, AudioBackendConfig::default());
    assert!(result.is_err(), "Device capture lives in the browser client");
}
