use serde::Deserialize;
use std::time::Duration;

/// Bounded polling budget for waiting on hardware state that has no
/// completion event.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay_ms: u64,
    /// Multiplier applied to the delay after every attempt; 1.0 keeps it fixed.
    pub backoff: f32,
}

impl RetryPolicy {
    pub const fn fixed(attempts: u32, delay_ms: u64) -> Self {
        Self {
            attempts,
            delay_ms,
            backoff: 1.0,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff.max(1.0).powi(attempt as i32) as f64;
        Duration::from_nanos((self.delay_ms as f64 * 1_000_000.0 * factor).round() as u64)
    }

    pub fn total_budget(&self) -> Duration {
        (0..self.attempts).map(|a| self.delay_for(a)).sum()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(30, 100)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct HwOptions {
    /// Waiting for a written sample rate / buffer size to be reported back.
    pub settle: RetryPolicy,
    /// Waiting for the device to report it stopped running.
    pub stop: RetryPolicy,
    /// Quiet window that coalesces bursts of change notifications.
    pub refresh_debounce_ms: u64,
    /// Largest buffer size offered when expanding hardware ranges.
    pub max_buffer_size: u32,
}

impl HwOptions {
    pub fn refresh_debounce(&self) -> Duration {
        Duration::from_millis(self.refresh_debounce_ms)
    }
}

impl Default for HwOptions {
    fn default() -> Self {
        Self {
            settle: RetryPolicy::fixed(30, 100),
            stop: RetryPolicy::fixed(40, 50),
            refresh_debounce_ms: 100,
            max_buffer_size: 8192,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_policy_keeps_delay() {
        let policy = RetryPolicy::fixed(4, 50);
        assert_eq!(policy.delay_for(0), Duration::from_millis(50));
        assert_eq!(policy.delay_for(3), Duration::from_millis(50));
        assert_eq!(policy.total_budget(), Duration::from_millis(200));
    }

    #[test]
    fn backoff_grows_delay() {
        let policy = RetryPolicy {
            attempts: 3,
            delay_ms: 10,
            backoff: 2.0,
        };
        assert_eq!(policy.delay_for(2), Duration::from_millis(40));
        assert_eq!(policy.total_budget(), Duration::from_millis(70));
    }

    #[test]
    fn defaults_match_hardware_tuning() {
        let options = HwOptions::default();
        assert_eq!(options.settle.total_budget(), Duration::from_secs(3));
        assert_eq!(options.stop.total_budget(), Duration::from_secs(2));
        assert_eq!(options.refresh_debounce(), Duration::from_millis(100));
    }
}
