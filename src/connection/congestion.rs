//! Send buffer congestion detection
//!
//! Occupancy is the number of encoded bytes waiting between the encoder and
//! the socket. Congestion is raised once occupancy has stayed above the high
//! water mark for a whole window, and cleared as soon as it falls below the
//! low water mark. Between the two marks the flag keeps its value.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CongestionConfig {
    pub high_water: usize,
    pub low_water: usize,
    /// How long occupancy must stay above `high_water`
    pub window: Duration,
}

impl Default for CongestionConfig {
    fn default() -> Self {
        Self {
            high_water: 512 * 1024,
            low_water: 128 * 1024,
            window: Duration::from_secs(1),
        }
    }
}

impl CongestionConfig {
    pub fn high_water(mut self, bytes: usize) -> Self {
        self.high_water = bytes;
        self.low_water = self.low_water.min(bytes);
        self
    }

    pub fn low_water(mut self, bytes: usize) -> Self {
        self.low_water = bytes.min(self.high_water);
        self
    }

    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

/// Bytes queued between encoder and socket
///
/// The encoder stage adds a frame's size when it queues it, and the
/// connection worker subtracts it once the frame is written or discarded.
#[derive(Debug, Clone, Default)]
pub struct QueuedBytes(Arc<AtomicUsize>);

impl QueuedBytes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, bytes: usize) {
        self.0.fetch_add(bytes, Ordering::AcqRel);
    }

    pub fn sub(&self, bytes: usize) {
        // Saturate; a reset may race with an in-flight subtraction
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| Some(v.saturating_sub(bytes)));
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }
}

/// Hysteresis over sampled occupancy
#[derive(Debug)]
pub struct CongestionMonitor {
    config: CongestionConfig,
    above_since: Option<Instant>,
    congested: bool,
}

impl CongestionMonitor {
    pub fn new(config: CongestionConfig) -> Self {
        Self {
            config,
            above_since: None,
            congested: false,
        }
    }

    pub fn is_congested(&self) -> bool {
        self.congested
    }

    /// Feed one occupancy sample. Returns the new flag when it flips.
    pub fn observe(&mut self, occupancy: usize, now: Instant) -> Option<bool> {
        if occupancy > self.config.high_water {
            let since = *self.above_since.get_or_insert(now);
            if !self.congested && now.duration_since(since) >= self.config.window {
                self.congested = true;
                return Some(true);
            }
        } else {
            self.above_since = None;
            if self.congested && occupancy < self.config.low_water {
                self.congested = false;
                return Some(false);
            }
        }
        None
    }

    /// Forget history (new connection)
    pub fn reset(&mut self) -> Option<bool> {
        self.above_since = None;
        if self.congested {
            self.congested = false;
            return Some(false);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CongestionConfig {
        CongestionConfig::default()
            .high_water(1000)
            .low_water(100)
            .window(Duration::from_millis(500))
    }

    #[test]
    fn test_raise_after_window() {
        let mut m = CongestionMonitor::new(config());
        let t0 = Instant::now();
        assert_eq!(m.observe(2000, t0), None);
        assert_eq!(m.observe(2000, t0 + Duration::from_millis(300)), None);
        assert_eq!(m.observe(2000, t0 + Duration::from_millis(500)), Some(true));
        assert!(m.is_congested());
        assert_eq!(m.observe(2000, t0 + Duration::from_millis(900)), None);
    }

    #[test]
    fn test_short_spike_ignored() {
        let mut m = CongestionMonitor::new(config());
        let t0 = Instant::now();
        m.observe(2000, t0);
        m.observe(500, t0 + Duration::from_millis(400));
        assert_eq!(m.observe(2000, t0 + Duration::from_millis(600)), None);
        assert!(!m.is_congested());
    }

    #[test]
    fn test_clears_below_low_water_only() {
        let mut m = CongestionMonitor::new(config());
        let t0 = Instant::now();
        m.observe(2000, t0);
        m.observe(2000, t0 + Duration::from_secs(1));
        assert!(m.is_congested());

        // Between the marks: still congested
        assert_eq!(m.observe(500, t0 + Duration::from_millis(1100)), None);
        assert!(m.is_congested());

        assert_eq!(m.observe(50, t0 + Duration::from_millis(1200)), Some(false));
        assert!(!m.is_congested());
    }

    #[test]
    fn test_reset() {
        let mut m = CongestionMonitor::new(config());
        let t0 = Instant::now();
        m.observe(2000, t0);
        m.observe(2000, t0 + Duration::from_secs(1));
        assert_eq!(m.reset(), Some(false));
        assert_eq!(m.reset(), None);
    }

    #[test]
    fn test_queued_bytes_saturates() {
        let q = QueuedBytes::new();
        q.add(10);
        q.sub(4);
        assert_eq!(q.get(), 6);
        q.sub(100);
        assert_eq!(q.get(), 0);
    }

    #[test]
    fn test_config_marks_ordered() {
        let c = CongestionConfig::default().low_water(1 << 30);
        assert_eq!(c.low_water, c.high_water);
    }
}
