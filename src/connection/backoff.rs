//! Reconnect schedule

use std::time::Duration;

/// Exponential reconnect backoff (1s, 2s, 4s, ..., capped)
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Attempts before the stream is declared lost. Zero disables reconnects.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// No reconnects; the first socket failure loses the stream
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Delay before the 1-based `attempt`, or `None` once attempts are exhausted
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = self.multiplier.powi(attempt as i32 - 1);
        let secs = self.initial_delay.as_secs_f64() * factor;
        let capped = secs.min(self.max_delay.as_secs_f64());
        Some(Duration::from_secs_f64(capped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<_> = (1..=7).map(|a| policy.delay(a).unwrap().as_secs()).collect();
        assert_eq!(delays, [1, 2, 4, 8, 16, 30, 30]);
        assert_eq!(policy.delay(10), Some(Duration::from_secs(30)));
        assert_eq!(policy.delay(11), None);
        assert_eq!(policy.delay(0), None);
    }

    #[test]
    fn test_disabled() {
        assert_eq!(ReconnectPolicy::disabled().delay(1), None);
    }

    #[test]
    fn test_builder() {
        let policy = ReconnectPolicy::default()
            .max_attempts(3)
            .initial_delay(Duration::from_millis(100))
            .multiplier(3.0)
            .max_delay(Duration::from_millis(500));
        assert_eq!(policy.delay(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay(2), Some(Duration::from_millis(300)));
        assert_eq!(policy.delay(3), Some(Duration::from_millis(500)));
        assert_eq!(policy.delay(4), None);
    }

    #[test]
    fn test_multiplier_floor() {
        let policy = ReconnectPolicy::default().multiplier(0.5);
        assert_eq!(policy.delay(3), Some(Duration::from_secs(1)));
    }
}
