//! WAV container helpers.
//!
//! The STT bridge accepts WAV uploads and the TTS bridge answers with WAV, so
//! PCM is wrapped and unwrapped here.

use anyhow::{Context, Result};
use std::io::Cursor;

/// Decoded WAV payload, downmixed to mono.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate.max(1) as f64
    }
}

pub fn is_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

/// Wraps mono PCM16 samples in a WAV container.
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).context("Failed to create WAV writer")?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .context("Failed to write sample to WAV")?;
        }
        writer.finalize().context("Failed to finalize WAV")?;
    }

    Ok(cursor.into_inner())
}

/// Reads a 16-bit integer WAV, averaging channels down to mono.
pub fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio> {
    let reader = hound::WavReader::new(Cursor::new(bytes)).context("Failed to parse WAV")?;
    let spec = reader.spec();

    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        anyhow::bail!(
            "Unsupported WAV format: {:?} {} bits (expected 16-bit PCM)",
            spec.sample_format,
            spec.bits_per_sample
        );
    }

    let interleaved: Vec<i16> = reader
        .into_samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to read WAV samples")?;

    let channels = spec.channels.max(1) as usize;
    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks_exact(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / channels as i32) as i16
            })
            .collect()
    };

    Ok(DecodedAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_wrap_and_unwrap() -> Result<()> {
        let samples = vec![0i16, 1000, -1000, i16::MAX, i16::MIN];
        let bytes = encode_wav(&samples, 16000)?;
        assert!(is_wav(&bytes));
        let decoded = decode_wav(&bytes)?;
        assert_eq!(decoded.samples, samples);
        assert_eq!(decoded.sample_rate, 16000);
        Ok(())
    }

    #[test]
    fn test_raw_pcm_is_not_wav() {
        assert!(!is_wav(&[0u8; 64]));
    }
}
