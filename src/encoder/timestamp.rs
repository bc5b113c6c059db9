//! Audio/video timestamp alignment
//!
//! Both tracks are stamped against one origin: the capture time of the first
//! frame of the session, whichever track it belongs to. Output timestamps are
//! milliseconds and strictly increase per track. A frame that arrives at or
//! before the previous one on its track is pushed forward by the smallest
//! amount that keeps the order; if that correction would exceed the skew
//! bound, the frame is dropped instead so the tracks cannot drift apart.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Track {
    Audio,
    Video,
}

#[derive(Debug)]
pub struct TimestampSync {
    origin: Option<Duration>,
    last_audio: Option<u32>,
    last_video: Option<u32>,
    max_skew_ms: u32,
}

impl TimestampSync {
    pub fn new(max_skew: Duration) -> Self {
        Self {
            origin: None,
            last_audio: None,
            last_video: None,
            max_skew_ms: max_skew.as_millis().min(u32::MAX as u128) as u32,
        }
    }

    /// Output timestamp for a frame captured at `capture`, or `None` to drop it
    pub fn stamp(&mut self, track: Track, capture: Duration) -> Option<u32> {
        let origin = *self.origin.get_or_insert(capture);
        let raw = capture.saturating_sub(origin).as_millis().min(u32::MAX as u128) as u32;

        let last = match track {
            Track::Audio => &mut self.last_audio,
            Track::Video => &mut self.last_video,
        };
        let out = match *last {
            Some(prev) if raw <= prev => {
                let next = prev.checked_add(1)?;
                if next - raw > self.max_skew_ms {
                    tracing::debug!(?track, raw, prev, "Stale frame dropped");
                    return None;
                }
                next
            }
            _ => raw,
        };
        *last = Some(out);
        Some(out)
    }

    /// Record a timestamp issued on `track` outside [`TimestampSync::stamp`],
    /// e.g. the later units of a frame the codec split up
    pub fn advance(&mut self, track: Track, timestamp: u32) {
        let last = match track {
            Track::Audio => &mut self.last_audio,
            Track::Video => &mut self.last_video,
        };
        *last = Some(last.map_or(timestamp, |prev| prev.max(timestamp)));
    }

    /// Last timestamp issued on `track`
    pub fn last(&self, track: Track) -> Option<u32> {
        match track {
            Track::Audio => self.last_audio,
            Track::Video => self.last_video,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_relative_to_first_frame() {
        let mut sync = TimestampSync::new(ms(100));
        assert_eq!(sync.stamp(Track::Video, ms(5_000)), Some(0));
        assert_eq!(sync.stamp(Track::Audio, ms(5_010)), Some(10));
        assert_eq!(sync.stamp(Track::Video, ms(5_033)), Some(33));
    }

    #[test]
    fn test_strictly_increasing_per_track() {
        let mut sync = TimestampSync::new(ms(100));
        assert_eq!(sync.stamp(Track::Video, ms(0)), Some(0));
        assert_eq!(sync.stamp(Track::Video, ms(0)), Some(1));
        assert_eq!(sync.stamp(Track::Video, ms(1)), Some(2));
        assert_eq!(sync.stamp(Track::Video, ms(40)), Some(40));

        // Tracks are independent
        assert_eq!(sync.stamp(Track::Audio, ms(0)), Some(0));
    }

    #[test]
    fn test_stale_frame_beyond_skew_dropped() {
        let mut sync = TimestampSync::new(ms(100));
        sync.stamp(Track::Audio, ms(0));
        assert_eq!(sync.stamp(Track::Audio, ms(500)), Some(500));

        // 80 ms late: corrected forward
        assert_eq!(sync.stamp(Track::Audio, ms(421)), Some(501));
        // 200 ms late: dropped, track unchanged
        assert_eq!(sync.stamp(Track::Audio, ms(301)), None);
        assert_eq!(sync.last(Track::Audio), Some(501));
    }

    #[test]
    fn test_advance_moves_track_forward_only() {
        let mut sync = TimestampSync::new(ms(100));
        assert_eq!(sync.stamp(Track::Audio, ms(10)), Some(0));
        sync.advance(Track::Audio, 23);
        assert_eq!(sync.stamp(Track::Audio, ms(20)), Some(24));

        sync.advance(Track::Audio, 5);
        assert_eq!(sync.last(Track::Audio), Some(24));
        assert_eq!(sync.last(Track::Video), None);
    }

    #[test]
    fn test_frames_before_origin_clamp_to_zero() {
        let mut sync = TimestampSync::new(ms(100));
        assert_eq!(sync.stamp(Track::Audio, ms(1_000)), Some(0));
        assert_eq!(sync.stamp(Track::Video, ms(990)), Some(0));
    }
}
