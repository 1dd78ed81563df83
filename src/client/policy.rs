use serde::Deserialize;
use std::time::Duration;

/// Exponential backoff between connection attempts
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    /// Consecutive failed attempts before giving up. 0 retries forever.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 500,
            max_backoff_ms: 15_000,
            multiplier: 2.0,
            max_attempts: 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt: u32,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.config.max_attempts != 0 && self.attempt >= self.config.max_attempts {
            return None;
        }

        let factor = self.config.multiplier.max(1.0).powi(self.attempt.min(32) as i32);
        let delay = (self.config.initial_backoff_ms as f64 * factor)
            .min(self.config.max_backoff_ms as f64);
        self.attempt += 1;

        Some(Duration::from_millis(delay as u64))
    }

    /// Call after a connection succeeds
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

/// Best-effort delivery of captured audio under congestion.
///
/// A frame is admitted only if it fits under the pending-write ceiling;
/// otherwise it is dropped on the spot. Nothing is queued on the caller's side.
#[derive(Debug, Clone, Copy)]
pub struct BackpressurePolicy {
    max_pending_bytes: usize,
}

impl BackpressurePolicy {
    pub fn new(max_pending_bytes: usize) -> Self {
        Self { max_pending_bytes }
    }

    pub fn admit(&self, pending_bytes: usize, frame_bytes: usize) -> bool {
        pending_bytes.saturating_add(frame_bytes) <= self.max_pending_bytes
    }

    pub fn max_pending_bytes(&self) -> usize {
        self.max_pending_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            initial_backoff_ms: 100,
            max_backoff_ms: 500,
            multiplier: 2.0,
            max_attempts: 5,
        });

        let delays: Vec<u64> = std::iter::from_fn(|| policy.next_delay())
            .map(|d| d.as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
        assert_eq!(policy.next_delay(), None);

        policy.reset();
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_admit_respects_ceiling() {
        let policy = BackpressurePolicy::new(1000);
        assert!(policy.admit(0, 640));
        assert!(policy.admit(360, 640));
        assert!(!policy.admit(361, 640));
    }
}
