//! Band-limited resampling of mono PCM16 to the canonical rate.
//!
//! A sinc resampler (rubato) is kept per session and fed fixed 10 ms input
//! chunks; leftovers wait for the next frame. Its filter delay is trimmed
//! from the head of the stream and drained by [`Resampler::flush`] when the
//! turn closes, so a turn of N input samples always yields
//! `round(N * to / from)` output samples.

use rubato::{
    Resampler as _, SincFixedIn, SincInterpolationParameters, SincInterpolationType,
    WindowFunction,
};
use tracing::warn;

use crate::error::VoiceError;

/// Upper bound on zero chunks pushed through while draining the filter
const MAX_FLUSH_ROUNDS: usize = 64;

struct Sinc {
    inner: SincFixedIn<f32>,
    chunk_size: usize,
    ratio: f64,
    /// Input waiting for a full chunk
    pending: Vec<f32>,
    /// Filter delay still to be discarded, in output samples
    skip: usize,
    consumed: usize,
    emitted: usize,
}

impl Sinc {
    fn collect(&mut self, mut channels: Vec<Vec<f32>>, limit: usize, out: &mut Vec<i16>) {
        if channels.is_empty() {
            return;
        }
        for sample in channels.swap_remove(0) {
            if self.skip > 0 {
                self.skip -= 1;
                continue;
            }
            if self.emitted >= limit {
                break;
            }
            out.push(to_i16(sample));
            self.emitted += 1;
        }
    }

    fn restart(&mut self) {
        self.inner.reset();
        self.pending.clear();
        self.skip = self.inner.output_delay();
        self.consumed = 0;
        self.emitted = 0;
    }
}

pub struct Resampler {
    from_rate: u32,
    to_rate: u32,
    /// `None` when both rates are equal
    sinc: Option<Sinc>,
}

impl Resampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self, VoiceError> {
        if from_rate == 0 || to_rate == 0 {
            return Err(VoiceError::protocol_with(
                "invalid_sample_rate",
                "sample rate must be positive",
            ));
        }
        if from_rate == to_rate {
            return Ok(Self::passthrough(to_rate));
        }

        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        let ratio = to_rate as f64 / from_rate as f64;
        let chunk_size = (from_rate / 100).max(1) as usize;

        let inner = SincFixedIn::<f32>::new(ratio, 2.0, params, chunk_size, 1).map_err(|e| {
            VoiceError::protocol_with(
                "invalid_sample_rate",
                format!("cannot resample {} Hz to {} Hz: {}", from_rate, to_rate, e),
            )
        })?;
        let skip = inner.output_delay();

        Ok(Self {
            from_rate,
            to_rate,
            sinc: Some(Sinc {
                inner,
                chunk_size,
                ratio,
                pending: Vec::with_capacity(chunk_size),
                skip,
                consumed: 0,
                emitted: 0,
            }),
        })
    }

    pub fn passthrough(rate: u32) -> Self {
        Self {
            from_rate: rate,
            to_rate: rate,
            sinc: None,
        }
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    pub fn is_passthrough(&self) -> bool {
        self.sinc.is_none()
    }

    /// Forget stream history. Called at the start of every turn.
    pub fn reset(&mut self) {
        if let Some(sinc) = self.sinc.as_mut() {
            sinc.restart();
        }
    }

    /// Resample one frame. Output lags input by up to one chunk plus the
    /// filter delay until [`flush`](Self::flush).
    pub fn process(&mut self, input: &[i16]) -> Vec<i16> {
        let Some(sinc) = self.sinc.as_mut() else {
            return input.to_vec();
        };

        sinc.pending.extend(input.iter().map(|&s| to_f32(s)));
        sinc.consumed += input.len();

        let mut out = Vec::new();
        while sinc.pending.len() >= sinc.chunk_size {
            let chunk: Vec<f32> = sinc.pending.drain(..sinc.chunk_size).collect();
            let wave_in = vec![chunk];
            match sinc.inner.process(&wave_in, None) {
                Ok(channels) => sinc.collect(channels, usize::MAX, &mut out),
                Err(e) => warn!("Resampling failed: {}", e),
            }
        }
        out
    }

    /// Emit everything still held back, then start a fresh stream.
    pub fn flush(&mut self) -> Vec<i16> {
        let Some(sinc) = self.sinc.as_mut() else {
            return Vec::new();
        };

        let expected = (sinc.consumed as f64 * sinc.ratio).round() as usize;
        let mut out = Vec::new();
        let mut tail = Some(std::mem::take(&mut sinc.pending));

        for _ in 0..MAX_FLUSH_ROUNDS {
            if sinc.emitted >= expected {
                break;
            }
            let result = match tail.take() {
                Some(rest) if !rest.is_empty() => {
                    let wave_in = vec![rest];
                    sinc.inner.process_partial(Some(wave_in.as_slice()), None)
                }
                _ => sinc.inner.process_partial::<Vec<f32>>(None, None),
            };
            match result {
                Ok(channels) => sinc.collect(channels, expected, &mut out),
                Err(e) => {
                    warn!("Resampler flush failed: {}", e);
                    break;
                }
            }
        }

        sinc.restart();
        out
    }
}

fn to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

fn to_i16(sample: f32) -> i16 {
    (sample * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(rate: u32, freq: f32, n: usize) -> Vec<i16> {
        (0..n)
            .map(|i| {
                let t = i as f32 / rate as f32;
                (8000.0 * (2.0 * std::f32::consts::PI * freq * t).sin()) as i16
            })
            .collect()
    }

    fn rms(samples: &[i16]) -> f64 {
        let sum: f64 = samples.iter().map(|&s| (s as f64).powi(2)).sum();
        (sum / samples.len().max(1) as f64).sqrt()
    }

    fn run(resampler: &mut Resampler, input: &[i16], frame: usize) -> Vec<i16> {
        let mut out = Vec::new();
        for chunk in input.chunks(frame) {
            out.extend(resampler.process(chunk));
        }
        out.extend(resampler.flush());
        out
    }

    #[test]
    fn test_passthrough() {
        let mut r = Resampler::new(16000, 16000).unwrap();
        assert!(r.is_passthrough());
        assert_eq!(r.process(&[1, 2, 3]), vec![1, 2, 3]);
        assert!(r.flush().is_empty());
    }

    #[test]
    fn test_downsample_48k_length_is_exact() {
        let mut r = Resampler::new(48000, 16000).unwrap();
        let out = run(&mut r, &vec![0i16; 9600], 960);
        assert_eq!(out.len(), 3200);
    }

    #[test]
    fn test_odd_frames_and_upsampling_keep_length() {
        let mut r = Resampler::new(8000, 16000).unwrap();
        let out = run(&mut r, &vec![100i16; 1234], 77);
        assert_eq!(out.len(), 2468);
    }

    #[test]
    fn test_in_band_tone_survives() {
        let input = sine(48000, 440.0, 48000);
        let mut r = Resampler::new(48000, 16000).unwrap();
        let out = run(&mut r, &input, 960);
        let ratio = rms(&out[1000..15000]) / rms(&input);
        assert!((0.9..1.1).contains(&ratio), "440 Hz level changed by {:.3}", ratio);
    }

    #[test]
    fn test_tone_above_target_nyquist_is_filtered() {
        // 12 kHz cannot be represented at 16 kHz and must not fold down to 4 kHz
        let input = sine(48000, 12000.0, 48000);
        let mut r = Resampler::new(48000, 16000).unwrap();
        let out = run(&mut r, &input, 960);
        let ratio = rms(&out[1000..15000]) / rms(&input);
        assert!(ratio < 0.05, "12 kHz leaked through at {:.3}", ratio);
    }

    #[test]
    fn test_flush_starts_a_fresh_stream() {
        let mut r = Resampler::new(44100, 16000).unwrap();
        let first = run(&mut r, &vec![500i16; 4410], 441);
        let second = run(&mut r, &vec![500i16; 4410], 441);
        assert_eq!(first.len(), 1600);
        assert_eq!(second.len(), first.len());
    }
}
