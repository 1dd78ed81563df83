//! Frame codec: analog-domain float samples <-> PCM16LE bytes.
//!
//! Negative samples scale by 32768 and positive by 32767 so that both rails
//! map inside the i16 range. NaN is treated as silence.

/// Converts one float sample in [-1, 1] to i16. Out-of-range input is clamped.
#[inline]
pub fn sample_to_i16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0).round() as i16
    } else {
        (s * 32767.0).round() as i16
    }
}

/// Inverse of [`sample_to_i16`].
#[inline]
pub fn sample_to_f32(sample: i16) -> f32 {
    if sample < 0 {
        sample as f32 / 32768.0
    } else {
        sample as f32 / 32767.0
    }
}

/// Encodes float samples as little-endian PCM16.
pub fn encode(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| sample_to_i16(s).to_le_bytes())
        .collect()
}

/// Decodes little-endian PCM16 into float samples. A trailing odd byte is ignored.
pub fn decode(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|b| sample_to_f32(i16::from_le_bytes([b[0], b[1]])))
        .collect()
}

pub fn i16_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

pub fn bytes_to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rails() {
        assert_eq!(sample_to_i16(1.0), i16::MAX);
        assert_eq!(sample_to_i16(-1.0), i16::MIN);
        assert_eq!(sample_to_i16(0.0), 0);
    }

    #[test]
    fn test_odd_trailing_byte_ignored() {
        assert_eq!(bytes_to_i16(&[0x01, 0x00, 0xff]), vec![1]);
        assert_eq!(decode(&[0x00]).len(), 0);
    }
}
