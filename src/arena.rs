//! Arena Session
//!
//! One client's frame loop. Owns the world, the simulator for the local
//! player, the room sync layer, the replay recorder and the stats service,
//! and moves data between them in a fixed order:
//!
//! ```text
//! transport/relay ──► RoomSync ──► remote players, ExternalEffect queue
//! host input ───────► Simulator ──► GameEvents ──► RoomSync::outbound
//!                                        │
//!                                        ├──► SessionStats
//!                                        └──► ReplayRecorder (every frame)
//! ```
//!
//! Everything runs on the caller's thread. Transports hand their events in
//! through [`ArenaSession::handle_transport`].

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::GameConfig;
use crate::game::body::PhysicsBody;
use crate::game::combat::CollisionEvent;
use crate::game::events::GameEvent;
use crate::game::input::TickInput;
use crate::game::powerup::PowerupKind;
use crate::game::state::ArenaState;
use crate::game::tick::Simulator;
use crate::network::client::TransportEvent;
use crate::network::protocol::{ClientMessage, ServerMessage};
use crate::network::sync::{RoomPhase, RoomSync, SyncError, SyncEvent};
use crate::replay::{ReplayClip, ReplayFrame, ReplayPlayback, ReplayRecorder};
use crate::stats::{SessionStats, SessionSummary};

/// Longest frame delta fed to projectiles. Longer gaps are clamped.
const MAX_FRAME_MS: u64 = 100;

/// Output of one frame.
#[derive(Debug, Default)]
pub struct FrameOutput {
    /// Events from the simulator tick.
    pub events: Vec<GameEvent>,
    /// Messages to send to the relay, in order.
    pub outbound: Vec<ClientMessage>,
    /// A knockout replay finished capturing this frame.
    pub replay_ready: bool,
}

/// Client-side session.
pub struct ArenaSession {
    config: Arc<GameConfig>,
    world: ArenaState,
    simulator: Simulator,
    sync: RoomSync,
    recorder: ReplayRecorder,
    stats: SessionStats,
    seed: u64,
    playback: Option<ReplayPlayback>,
    outbox: Vec<ClientMessage>,
    needs_reset: bool,
    last_frame_ms: Option<u64>,
    last_sample_ms: Option<u64>,
    pending_capture: Option<u64>,
    last_replay: Option<ReplayClip>,
}

impl ArenaSession {
    /// New session. `seed` drives cosmetic randomness only.
    pub fn new(config: Arc<GameConfig>, seed: u64) -> Self {
        Self {
            world: ArenaState::new(config.powerups.max_on_field),
            simulator: Simulator::new(config.clone(), seed),
            sync: RoomSync::new(config.clone()),
            recorder: ReplayRecorder::new(config.replay.capacity()),
            stats: SessionStats::new(),
            seed,
            playback: None,
            outbox: Vec::new(),
            needs_reset: false,
            last_frame_ms: None,
            last_sample_ms: None,
            pending_capture: None,
            last_replay: None,
            config,
        }
    }

    /// The world as this client sees it.
    pub fn world(&self) -> &ArenaState {
        &self.world
    }

    /// Room state.
    pub fn sync(&self) -> &RoomSync {
        &self.sync
    }

    /// Session statistics.
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Replay ring buffer.
    pub fn recorder(&self) -> &ReplayRecorder {
        &self.recorder
    }

    /// Local simulator.
    pub fn simulator(&self) -> &Simulator {
        &self.simulator
    }

    /// Current room phase.
    pub fn phase(&self) -> RoomPhase {
        self.sync.phase()
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    /// Feed a transport event.
    pub fn handle_transport(&mut self, event: TransportEvent, now_ms: u64) -> Result<Vec<SyncEvent>, SyncError> {
        let events = match event {
            TransportEvent::Connected => {
                if let Some(rejoin) = self.sync.on_transport_connected() {
                    self.outbox.push(rejoin);
                }
                Vec::new()
            }
            TransportEvent::Disconnected => self.sync.on_transport_lost(),
            TransportEvent::Reconnecting { attempt } => {
                self.sync.on_reconnecting(attempt);
                Vec::new()
            }
            TransportEvent::GaveUp => self.sync.on_reconnect_exhausted(&mut self.world),
            TransportEvent::Message(message) => return self.handle_server(message, now_ms),
        };
        for event in &events {
            self.route(event);
        }
        Ok(events)
    }

    /// Feed one relay message.
    pub fn handle_server(&mut self, message: ServerMessage, now_ms: u64) -> Result<Vec<SyncEvent>, SyncError> {
        let events = self.sync.handle_inbound(message, &mut self.world, now_ms)?;
        for event in &events {
            self.route(event);
        }
        Ok(events)
    }

    fn route(&mut self, event: &SyncEvent) {
        self.stats.record_sync(event);
        match event {
            SyncEvent::Joined { room_code, player_id } => {
                info!("In room {} as {}", room_code, player_id);
            }
            SyncEvent::MatchStarted { .. } => {
                self.needs_reset = true;
                self.recorder.clear();
                self.pending_capture = None;
                self.last_sample_ms = None;
            }
            SyncEvent::Effect(effect) => self.simulator.queue(effect.clone()),
            SyncEvent::GameOver { .. } => {
                match self.sync.report_game_end(self.stats.match_summary()) {
                    Ok(report) => self.outbox.push(report),
                    Err(err) => debug!("No game end report: {}", err),
                }
            }
            SyncEvent::ConnectionLost => self.replace_simulator(),
            _ => {}
        }
    }

    /// Timers of a torn-down simulator stay closed, so leaving a room swaps
    /// in a fresh one.
    fn replace_simulator(&mut self) {
        let cancelled = self.simulator.teardown();
        debug!("Cancelled {} lifecycle timers", cancelled);
        self.seed = self.seed.wrapping_add(1);
        self.simulator = Simulator::new(self.config.clone(), self.seed);
    }

    // =========================================================================
    // FRAME
    // =========================================================================

    /// Run one frame: projectiles, the local tick, recording, outbound.
    ///
    /// Does nothing outside the `Playing` phase except flush queued room
    /// messages.
    pub fn frame(
        &mut self,
        now_ms: u64,
        input: TickInput,
        body: &mut dyn PhysicsBody,
        contacts: &[CollisionEvent],
    ) -> FrameOutput {
        let mut output = FrameOutput::default();
        let delta_ms = self
            .last_frame_ms
            .map_or(1000 / 60, |last| now_ms.saturating_sub(last))
            .min(MAX_FRAME_MS);
        self.last_frame_ms = Some(now_ms);

        if self.sync.phase() == RoomPhase::Playing {
            if self.needs_reset {
                if let Some(player) = self.world.local_mut() {
                    self.simulator.reset_for_match(player, body);
                }
                self.needs_reset = false;
            }

            let positions = self.world.positions();
            self.world.projectiles.advance(delta_ms as f64 / 1000.0, now_ms, &positions);

            if let Some(view) = self.world.local_view() {
                let result = self.simulator.tick(view, body, input, contacts, now_ms);
                self.stats.record_events(&result.events);
                if result.knocked_out && self.pending_capture.is_none() {
                    self.pending_capture = Some(now_ms);
                }
                output.outbound = self.sync.outbound(&result.events);
                output.events = result.events;
            }

            self.sample(now_ms);
            output.replay_ready = self.finish_capture(now_ms);
        }

        if !self.outbox.is_empty() {
            let mut queued = std::mem::take(&mut self.outbox);
            queued.append(&mut output.outbound);
            output.outbound = queued;
        }
        output
    }

    fn sample(&mut self, now_ms: u64) {
        if !self.recorder.is_recording() {
            return;
        }
        let interval = 1000 / u64::from(self.config.replay.sample_rate.max(1));
        let due = self.last_sample_ms.map_or(true, |last| now_ms.saturating_sub(last) >= interval);
        if due {
            self.recorder.record(ReplayFrame::capture(&self.world, now_ms));
            self.last_sample_ms = Some(now_ms);
        }
    }

    /// Capture is deferred until the trail window after the knockout has
    /// been recorded.
    fn finish_capture(&mut self, now_ms: u64) -> bool {
        let Some(knockout_ms) = self.pending_capture else {
            return false;
        };
        let replay = &self.config.replay;
        if now_ms < knockout_ms + replay.trail_ms {
            return false;
        }
        let clip = self.recorder.capture_replay(knockout_ms, replay.lead_ms, replay.trail_ms);
        info!("Captured knockout replay: {} frames over {} ms", clip.len(), clip.duration_ms());
        self.pending_capture = None;
        self.last_replay = Some(clip);
        true
    }

    /// Take the most recent knockout clip.
    pub fn take_replay(&mut self) -> Option<ReplayClip> {
        self.last_replay.take()
    }

    // =========================================================================
    // PLAYBACK
    // =========================================================================

    /// Play a clip at the configured slow-motion speed. Recording pauses.
    pub fn start_playback(&mut self, clip: ReplayClip) {
        self.recorder.pause();
        let replay = &self.config.replay;
        self.playback = Some(ReplayPlayback::new(clip, replay.sample_rate, replay.playback_speed));
    }

    /// Clip being played.
    pub fn playback(&self) -> Option<&ReplayPlayback> {
        self.playback.as_ref()
    }

    /// Step the playback clock. Returns the frame under the cursor.
    pub fn advance_playback(&mut self, delta_ms: u64) -> Option<&ReplayFrame> {
        let playback = self.playback.as_mut()?;
        playback.advance(delta_ms);
        playback.current_frame()
    }

    /// Stop playback and resume recording.
    pub fn finish_playback(&mut self) -> Option<ReplayClip> {
        self.recorder.resume();
        self.playback.take().map(|p| p.clip().clone())
    }

    // =========================================================================
    // ROOM ACTIONS
    // =========================================================================

    /// Open a room.
    pub fn create_room(&self, player_name: &str) -> Result<ClientMessage, SyncError> {
        self.sync.create_room(player_name)
    }

    /// Join by code.
    pub fn join_room(&self, room_code: &str, player_name: &str) -> Result<ClientMessage, SyncError> {
        self.sync.join_room(room_code, player_name)
    }

    /// Join any open room.
    pub fn quick_join(&self, player_name: &str) -> Result<ClientMessage, SyncError> {
        self.sync.quick_join(player_name)
    }

    /// Toggle readiness.
    pub fn set_ready(&self, ready: bool, loadout: Vec<PowerupKind>) -> Result<ClientMessage, SyncError> {
        self.sync.set_ready(ready, loadout)
    }

    /// Vote for a map.
    pub fn vote_map(&self, map_id: &str) -> Result<ClientMessage, SyncError> {
        self.sync.vote_map(map_id)
    }

    /// Pick a mode.
    pub fn select_mode(&mut self, mode: &str) -> Result<ClientMessage, SyncError> {
        self.sync.select_mode(mode)
    }

    /// Back to the lobby.
    pub fn request_rematch(&mut self) -> Result<ClientMessage, SyncError> {
        self.sync.request_rematch()
    }

    /// Leave the room. Timers and queued effects are dropped.
    pub fn leave_room(&mut self) -> Option<ClientMessage> {
        self.replace_simulator();
        self.pending_capture = None;
        self.sync.leave_room(&mut self.world)
    }

    /// End the session and hand back its statistics.
    pub fn teardown(mut self) -> SessionSummary {
        let cancelled = self.simulator.teardown();
        if cancelled > 0 {
            warn!("Teardown cancelled {} pending timers", cancelled);
        }
        self.recorder.clear();
        self.world.clear();
        self.stats.teardown()
    }
}

// =============================================================================
// TESTS
// =============================================================================
