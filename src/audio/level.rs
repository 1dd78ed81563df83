//! Level meter: short-window RMS energy of a frame.
//!
//! The same value drives UI metering and endpoint detection, so both agree on
//! what "loud" means.

use super::codec::sample_to_f32;

/// Floor reported by [`to_dbfs`] for digital silence.
pub const SILENCE_DBFS: f32 = -100.0;

/// RMS of float samples in [-1, 1]. Empty input is silent.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples
        .iter()
        .map(|&s| {
            let s = if s.is_nan() { 0.0 } else { s as f64 };
            s * s
        })
        .sum();
    (sum / samples.len() as f64).sqrt() as f32
}

/// RMS of PCM16 samples, normalized to the float range.
pub fn rms_i16(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples
        .iter()
        .map(|&s| {
            let f = sample_to_f32(s) as f64;
            f * f
        })
        .sum();
    (sum / samples.len() as f64).sqrt() as f32
}

pub fn to_dbfs(rms: f32) -> f32 {
    if rms <= 0.0 {
        return SILENCE_DBFS;
    }
    (20.0 * rms.log10()).max(SILENCE_DBFS)
}

/// Smoothed meter for display. Rises instantly, decays gradually.
#[derive(Debug, Clone)]
pub struct LevelMeter {
    decay: f32,
    level: f32,
}

impl LevelMeter {
    /// `decay` is the fraction of the previous level kept per frame (0..1).
    pub fn new(decay: f32) -> Self {
        Self {
            decay: decay.clamp(0.0, 1.0),
            level: 0.0,
        }
    }

    /// Feeds one frame and returns its raw RMS.
    pub fn update(&mut self, samples: &[f32]) -> f32 {
        let current = rms(samples);
        self.level = current.max(self.level * self.decay);
        current
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn level_dbfs(&self) -> f32 {
        to_dbfs(self.level)
    }

    pub fn reset(&mut self) {
        self.level = 0.0;
    }
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new(0.8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rms_of_full_scale_square_wave() {
        let samples: Vec<f32> = (0..160).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        assert!((rms(&samples) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_rms_i16_matches_float() {
        let floats = vec![0.5f32, -0.5, 0.25, -0.25];
        let ints: Vec<i16> = floats.iter().map(|&s| super::super::codec::sample_to_i16(s)).collect();
        assert!((rms(&floats) - rms_i16(&ints)).abs() < 1e-3);
    }

    #[test]
    fn test_dbfs_floor() {
        assert_eq!(to_dbfs(0.0), SILENCE_DBFS);
        assert!((to_dbfs(1.0) - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_meter_decays() {
        let mut meter = LevelMeter::new(0.5);
        meter.update(&[1.0, -1.0]);
        assert!((meter.level() - 1.0).abs() < 1e-6);
        meter.update(&[0.0, 0.0]);
        assert!((meter.level() - 0.5).abs() < 1e-6);
    }
}
