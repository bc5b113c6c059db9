//! Publishing statistics

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Snapshot of publishing counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishStats {
    /// Bytes written to the socket, chunk headers included
    pub bytes_sent: u64,
    pub video_frames_sent: u64,
    pub audio_frames_sent: u64,
    pub keyframes_sent: u64,
    /// Raw frames dropped because the encoder queue was full
    pub capture_drops: u64,
    /// Frames dropped by the encoder stage (codec errors, stale timestamps)
    pub encoder_drops: u64,
    /// Encoded frames discarded while reconnecting or waiting for a keyframe
    pub reconnect_drops: u64,
    pub reconnects: u64,
    /// Outbound bitrate over the last stats interval (bits/sec)
    pub bitrate: u64,
}

impl PublishStats {
    pub fn dropped_frames(&self) -> u64 {
        self.capture_drops + self.encoder_drops + self.reconnect_drops
    }
}

/// Counters shared between the pipeline tasks
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub bytes_sent: AtomicU64,
    pub video_frames_sent: AtomicU64,
    pub audio_frames_sent: AtomicU64,
    pub keyframes_sent: AtomicU64,
    pub capture_drops: AtomicU64,
    pub encoder_drops: AtomicU64,
    pub reconnect_drops: AtomicU64,
    pub reconnects: AtomicU64,
    pub bitrate: AtomicU64,
}

impl StatsCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PublishStats {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PublishStats {
            bytes_sent: get(&self.bytes_sent),
            video_frames_sent: get(&self.video_frames_sent),
            audio_frames_sent: get(&self.audio_frames_sent),
            keyframes_sent: get(&self.keyframes_sent),
            capture_drops: get(&self.capture_drops),
            encoder_drops: get(&self.encoder_drops),
            reconnect_drops: get(&self.reconnect_drops),
            reconnects: get(&self.reconnects),
            bitrate: get(&self.bitrate),
        }
    }
}

/// Bitrate over fixed sampling intervals
#[derive(Debug, Default)]
pub(crate) struct BitrateMeter {
    last_bytes: u64,
}

impl BitrateMeter {
    /// Bits per second since the previous sample
    pub fn sample(&mut self, total_bytes: u64, elapsed: Duration) -> u64 {
        let delta = total_bytes.saturating_sub(self.last_bytes);
        self.last_bytes = total_bytes;
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            (delta as f64 * 8.0 / secs) as u64
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_and_drop_total() {
        let counters = StatsCounters::new();
        StatsCounters::add(&counters.capture_drops, 2);
        StatsCounters::add(&counters.encoder_drops, 1);
        StatsCounters::add(&counters.reconnect_drops, 4);
        StatsCounters::add(&counters.bytes_sent, 1000);

        let stats = counters.snapshot();
        assert_eq!(stats.bytes_sent, 1000);
        assert_eq!(stats.dropped_frames(), 7);
    }

    #[test]
    fn test_bitrate_meter() {
        let mut meter = BitrateMeter::default();
        assert_eq!(meter.sample(125_000, Duration::from_secs(1)), 1_000_000);
        assert_eq!(meter.sample(187_500, Duration::from_millis(500)), 1_000_000);
        assert_eq!(meter.sample(187_500, Duration::from_secs(1)), 0);
        assert_eq!(meter.sample(200_000, Duration::ZERO), 0);
    }
}
