//! Replay Recording
//!
//! Fixed-capacity ring buffer of world snapshots, one per simulation tick.
//! A knockout captures a time window around the event into a [`ReplayClip`],
//! which can be exported with bincode for saved highlights.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::core::Vec3;
use crate::game::powerup::{PowerupId, PowerupKind};
use crate::game::projectile::ProjectileKind;
use crate::game::state::{ArenaState, PlayerId};

/// Current clip format version.
pub const CLIP_VERSION: u8 = 1;

/// One player in a snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplayPlayer {
    /// Position.
    pub position: Vec3,
    /// Velocity.
    pub velocity: Vec3,
    /// Color tag.
    pub color: String,
}

/// One power-up in a snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplayPowerup {
    /// Instance id.
    pub id: PowerupId,
    /// Kind.
    pub kind: PowerupKind,
    /// Position.
    pub position: Vec3,
}

/// One projectile in a snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplayProjectile {
    /// Projectile id.
    pub id: u32,
    /// Kind.
    pub kind: ProjectileKind,
    /// Position.
    pub position: Vec3,
}

/// World snapshot at one tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplayFrame {
    /// Capture time (ms).
    pub timestamp_ms: u64,
    /// Players keyed by id.
    pub players: BTreeMap<PlayerId, ReplayPlayer>,
    /// Power-ups on the field.
    pub powerups: Vec<ReplayPowerup>,
    /// Projectiles in flight.
    pub projectiles: Vec<ReplayProjectile>,
}

impl ReplayFrame {
    /// Snapshot the world. Players mid-respawn are left out.
    pub fn capture(world: &ArenaState, timestamp_ms: u64) -> Self {
        let players = world
            .players()
            .filter(|p| !p.is_respawning())
            .map(|p| {
                (
                    p.id.clone(),
                    ReplayPlayer {
                        position: p.position,
                        velocity: p.velocity,
                        color: p.color.clone(),
                    },
                )
            })
            .collect();
        let powerups = world
            .powerups
            .iter()
            .filter(|p| !p.claimed)
            .map(|p| ReplayPowerup { id: p.id.clone(), kind: p.kind, position: p.position })
            .collect();
        let projectiles = world
            .projectiles
            .iter()
            .map(|p| ReplayProjectile { id: p.id, kind: p.kind, position: p.position })
            .collect();
        Self { timestamp_ms, players, powerups, projectiles }
    }

    /// Empty frame, mostly for tests.
    pub fn empty(timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            players: BTreeMap::new(),
            powerups: Vec::new(),
            projectiles: Vec::new(),
        }
    }
}

// =============================================================================
// RECORDER
// =============================================================================

/// Ring buffer of recent frames.
#[derive(Clone, Debug)]
pub struct ReplayRecorder {
    frames: VecDeque<ReplayFrame>,
    capacity: usize,
    recording: bool,
}

impl ReplayRecorder {
    /// Create a recorder holding at most `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
            recording: true,
        }
    }

    /// Push a frame, evicting the oldest when full. Ignored while paused.
    pub fn record(&mut self, frame: ReplayFrame) {
        if !self.recording {
            return;
        }
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    /// Stop recording (e.g. while a clip plays).
    pub fn pause(&mut self) {
        self.recording = false;
    }

    /// Resume recording.
    pub fn resume(&mut self) {
        self.recording = true;
    }

    /// Whether frames are being recorded.
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Drop every buffered frame.
    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Buffered frame count.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// True if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Capacity in frames.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest to newest.
    pub fn frames(&self) -> impl Iterator<Item = &ReplayFrame> {
        self.frames.iter()
    }

    /// Frames with `timestamp_ms` in `[t - lead, t + trail]`, in order.
    ///
    /// A buffer that does not reach back far enough just yields a shorter
    /// clip.
    pub fn capture_replay(&self, knockout_ms: u64, lead_ms: u64, trail_ms: u64) -> ReplayClip {
        let start = knockout_ms.saturating_sub(lead_ms);
        let end = knockout_ms.saturating_add(trail_ms);
        let frames: Vec<ReplayFrame> = self
            .frames
            .iter()
            .filter(|f| f.timestamp_ms >= start && f.timestamp_ms <= end)
            .cloned()
            .collect();
        debug!(
            "Captured {} frames for knockout at {} ({}..={})",
            frames.len(),
            knockout_ms,
            start,
            end
        );
        ReplayClip::new(knockout_ms, frames)
    }
}

// =============================================================================
// CLIP
// =============================================================================

/// Errors loading a saved clip.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// Bincode failure.
    #[error("Replay serialization failed: {0}")]
    Codec(#[from] bincode::Error),

    /// Saved by an incompatible version.
    #[error("Replay version mismatch: expected {expected}, got {got}")]
    VersionMismatch {
        /// Supported version.
        expected: u8,
        /// Version in the data.
        got: u8,
    },

    /// Frame timestamps go backwards.
    #[error("Replay frame {index} at {timestamp_ms} ms precedes the frame before it")]
    FramesOutOfOrder {
        /// Offending frame index.
        index: usize,
        /// Its timestamp.
        timestamp_ms: u64,
    },
}

/// Frames around one knockout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplayClip {
    /// Format version.
    pub version: u8,
    /// Knockout time.
    pub knockout_ms: u64,
    /// Frames, oldest first.
    pub frames: Vec<ReplayFrame>,
}

impl ReplayClip {
    /// Wrap captured frames.
    pub fn new(knockout_ms: u64, frames: Vec<ReplayFrame>) -> Self {
        Self { version: CLIP_VERSION, knockout_ms, frames }
    }

    /// Time from first to last frame.
    pub fn duration_ms(&self) -> u64 {
        match (self.frames.first(), self.frames.last()) {
            (Some(first), Some(last)) => last.timestamp_ms.saturating_sub(first.timestamp_ms),
            _ => 0,
        }
    }

    /// Frame count.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// True if the clip has no frames.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Serialize with bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ReplayError> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize a clip saved by [`ReplayClip::to_bytes`].
    pub fn from_bytes(data: &[u8]) -> Result<Self, ReplayError> {
        let clip: Self = bincode::deserialize(data)?;
        if clip.version != CLIP_VERSION {
            return Err(ReplayError::VersionMismatch { expected: CLIP_VERSION, got: clip.version });
        }
        if let Some(index) = clip.frames.windows(2).position(|pair| pair[1].timestamp_ms < pair[0].timestamp_ms) {
            return Err(ReplayError::FramesOutOfOrder {
                index: index + 1,
                timestamp_ms: clip.frames[index + 1].timestamp_ms,
            });
        }
        Ok(clip)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{Authority, PlayerState};
    use proptest::prelude::*;

    fn filled(count: u64, step_ms: u64, capacity: usize) -> ReplayRecorder {
        let mut recorder = ReplayRecorder::new(capacity);
        for i in 0..count {
            recorder.record(ReplayFrame::empty(i * step_ms));
        }
        recorder
    }

    #[test]
    fn test_capture_window_inclusive() {
        let recorder = filled(100, 100, 600);
        let clip = recorder.capture_replay(5_000, 1_000, 500);
        let stamps: Vec<u64> = clip.frames.iter().map(|f| f.timestamp_ms).collect();
        assert_eq!(stamps.first(), Some(&4_000));
        assert_eq!(stamps.last(), Some(&5_500));
        assert_eq!(stamps.len(), 16);
        assert_eq!(clip.duration_ms(), 1_500);
    }

    #[test]
    fn test_capture_early_in_game_is_shorter() {
        let recorder = filled(10, 100, 600);
        let clip = recorder.capture_replay(500, 5_000, 2_000);
        assert_eq!(clip.len(), 10);
        assert_eq!(clip.frames[0].timestamp_ms, 0);
    }

    #[test]
    fn test_paused_recorder_ignores_frames() {
        let mut recorder = filled(3, 16, 10);
        recorder.pause();
        recorder.record(ReplayFrame::empty(999));
        assert_eq!(recorder.len(), 3);
        recorder.resume();
        recorder.record(ReplayFrame::empty(1_000));
        assert_eq!(recorder.len(), 4);
    }

    #[test]
    fn test_frame_capture_skips_respawning() {
        let mut world = ArenaState::new(4);
        world.reset_with_local(PlayerState::new(
            PlayerId::from("me"),
            "me",
            "red",
            0,
            Authority::Local,
            Vec3::new(1.0, 0.5, 0.0),
        ));
        let mut gone = PlayerState::new(PlayerId::from("gone"), "gone", "blue", 1, Authority::Remote, Vec3::ZERO);
        gone.lifecycle = crate::game::state::Lifecycle::Respawning { respawn_at: 10 };
        world.upsert_remote(gone).unwrap();
        world.powerups.spawn(PowerupId::new("p"), PowerupKind::Ghost, Vec3::ZERO, 0);

        let frame = ReplayFrame::capture(&world, 42);
        assert_eq!(frame.timestamp_ms, 42);
        assert_eq!(frame.players.len(), 1);
        assert_eq!(frame.players[&PlayerId::from("me")].color, "red");
        assert_eq!(frame.powerups.len(), 1);
    }

    #[test]
    fn test_clip_export() {
        let recorder = filled(20, 16, 600);
        let clip = recorder.capture_replay(160, 100, 100);
        let bytes = clip.to_bytes().unwrap();
        assert_eq!(ReplayClip::from_bytes(&bytes).unwrap(), clip);

        let mut old = clip.clone();
        old.version = 0;
        let bytes = old.to_bytes().unwrap();
        assert!(matches!(
            ReplayClip::from_bytes(&bytes),
            Err(ReplayError::VersionMismatch { expected: 1, got: 0 })
        ));
    }

    #[test]
    fn test_clip_rejects_frames_out_of_order() {
        let clip = ReplayClip::new(100, vec![ReplayFrame::empty(100), ReplayFrame::empty(0)]);
        assert_eq!(clip.duration_ms(), 0);

        let bytes = clip.to_bytes().unwrap();
        assert!(matches!(
            ReplayClip::from_bytes(&bytes),
            Err(ReplayError::FramesOutOfOrder { index: 1, timestamp_ms: 0 })
        ));
    }

    proptest! {
        #[test]
        fn prop_buffer_keeps_most_recent(capacity in 1usize..64, count in 0u64..200) {
            let recorder = filled(count, 1, capacity);
            let expected = (count as usize).min(capacity);
            prop_assert_eq!(recorder.len(), expected);

            let stamps: Vec<u64> = recorder.frames().map(|f| f.timestamp_ms).collect();
            let first = count.saturating_sub(capacity as u64);
            let want: Vec<u64> = (first..count).collect();
            prop_assert_eq!(stamps, want);
        }

        #[test]
        fn prop_capture_within_window(
            count in 1u64..300,
            t in 0u64..5_000,
            lead in 0u64..2_000,
            trail in 0u64..2_000,
        ) {
            let recorder = filled(count, 16, 600);
            let clip = recorder.capture_replay(t, lead, trail);
            let lo = t.saturating_sub(lead);
            let hi = t + trail;
            for pair in clip.frames.windows(2) {
                prop_assert!(pair[0].timestamp_ms < pair[1].timestamp_ms);
            }
            for frame in &clip.frames {
                prop_assert!(frame.timestamp_ms >= lo && frame.timestamp_ms <= hi);
            }
            let expected = recorder
                .frames()
                .filter(|f| f.timestamp_ms >= lo && f.timestamp_ms <= hi)
                .count();
            prop_assert_eq!(clip.len(), expected);
        }
    }
}
