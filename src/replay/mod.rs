//! Knockout Replays
//!
//! - `recorder`: ring buffer of world snapshots and clip capture
//! - `playback`: slow-motion stepper over a captured clip

pub mod recorder;
pub mod playback;

pub use recorder::{ReplayClip, ReplayError, ReplayFrame, ReplayRecorder};
pub use playback::ReplayPlayback;
