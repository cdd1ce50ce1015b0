//! Replay Playback
//!
//! Steps through a [`ReplayClip`] on its own clock. Wall time is converted to
//! frames at the recording sample rate times a speed multiplier, with the
//! fractional remainder carried so slow motion does not stall.

use crate::replay::recorder::{ReplayClip, ReplayFrame};

/// Slowest allowed multiplier.
pub const MIN_SPEED: f64 = 0.05;

/// Fastest allowed multiplier.
pub const MAX_SPEED: f64 = 4.0;

/// Independent time-stepper over a clip.
#[derive(Clone, Debug)]
pub struct ReplayPlayback {
    clip: ReplayClip,
    sample_rate: f64,
    speed: f64,
    cursor: usize,
    carry: f64,
}

impl ReplayPlayback {
    /// Start at the first frame.
    pub fn new(clip: ReplayClip, sample_rate: u32, speed: f64) -> Self {
        Self {
            clip,
            sample_rate: f64::from(sample_rate.max(1)),
            speed: clamp_speed(speed),
            cursor: 0,
            carry: 0.0,
        }
    }

    /// Advance by `delta_ms` of wall time. Returns how many frames moved.
    pub fn advance(&mut self, delta_ms: u64) -> usize {
        if self.is_finished() {
            return 0;
        }
        self.carry += delta_ms as f64 * self.sample_rate * self.speed / 1000.0;
        let whole = self.carry.floor();
        self.carry -= whole;

        let last = self.clip.len().saturating_sub(1);
        let before = self.cursor;
        self.cursor = self.cursor.saturating_add(whole as usize).min(last);
        self.cursor - before
    }

    /// Change the multiplier. Clamped to `[MIN_SPEED, MAX_SPEED]`.
    pub fn set_speed(&mut self, speed: f64) {
        self.speed = clamp_speed(speed);
    }

    /// Current multiplier.
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Jump to a frame index.
    pub fn seek(&mut self, index: usize) {
        self.cursor = index.min(self.clip.len().saturating_sub(1));
        self.carry = 0.0;
    }

    /// Frame under the cursor.
    pub fn current_frame(&self) -> Option<&ReplayFrame> {
        self.clip.frames.get(self.cursor)
    }

    /// Cursor position.
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Played through the last frame.
    pub fn is_finished(&self) -> bool {
        self.clip.is_empty() || self.cursor + 1 >= self.clip.len()
    }

    /// Clip being played.
    pub fn clip(&self) -> &ReplayClip {
        &self.clip
    }
}

fn clamp_speed(speed: f64) -> f64 {
    if speed.is_finite() {
        speed.clamp(MIN_SPEED, MAX_SPEED)
    } else {
        1.0
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(frames: u64) -> ReplayClip {
        ReplayClip::new(0, (0..frames).map(|i| ReplayFrame::empty(i * 16)).collect())
    }

    #[test]
    fn test_realtime_advances_sample_rate() {
        let mut playback = ReplayPlayback::new(clip(600), 60, 1.0);
        assert_eq!(playback.advance(1_000), 60);
        assert_eq!(playback.position(), 60);
    }

    #[test]
    fn test_slow_motion_carries_fraction() {
        let mut playback = ReplayPlayback::new(clip(600), 60, 0.5);
        // 25 ms at half speed is 0.75 frames
        assert_eq!(playback.advance(25), 0);
        assert_eq!(playback.advance(25), 1);
        assert_eq!(playback.advance(25), 1);
        assert_eq!(playback.advance(25), 1);
        let mut moved = 3;
        for _ in 0..96 {
            moved += playback.advance(25);
        }
        assert_eq!(moved, 75);
    }

    #[test]
    fn test_stops_at_last_frame() {
        let mut playback = ReplayPlayback::new(clip(10), 60, 4.0);
        playback.advance(10_000);
        assert!(playback.is_finished());
        assert_eq!(playback.current_frame().map(|f| f.timestamp_ms), Some(144));
        assert_eq!(playback.advance(1_000), 0);
    }

    #[test]
    fn test_huge_step_clamps_without_overflow() {
        let mut playback = ReplayPlayback::new(clip(10), u32::MAX, MAX_SPEED);
        playback.seek(1);
        assert_eq!(playback.advance(u64::MAX), 8);
        assert!(playback.is_finished());
    }

    #[test]
    fn test_seek_and_speed_clamp() {
        let mut playback = ReplayPlayback::new(clip(10), 60, 100.0);
        assert_eq!(playback.speed(), MAX_SPEED);
        playback.set_speed(f64::NAN);
        assert_eq!(playback.speed(), 1.0);
        playback.seek(50);
        assert_eq!(playback.position(), 9);
        playback.seek(2);
        assert!(!playback.is_finished());
    }

    #[test]
    fn test_empty_clip() {
        let mut playback = ReplayPlayback::new(ReplayClip::new(0, Vec::new()), 60, 1.0);
        assert!(playback.is_finished());
        assert!(playback.current_frame().is_none());
        assert_eq!(playback.advance(100), 0);
    }
}
