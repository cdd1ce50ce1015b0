//! Room Synchronization
//!
//! Client side of the relay protocol. Tracks the room phase
//! (`Disconnected -> Lobby -> Playing -> Ended`), reconciles remote players
//! from inbound messages and turns local gameplay events into outbound
//! messages.
//!
//! Authority split: this layer writes remote players only, through
//! [`ArenaState::remote_mut`]. Anything an inbound message means for the
//! local player comes back as a [`SyncEvent::Effect`] for the simulator to
//! apply on its next tick.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::GameConfig;
use crate::game::events::{GameEvent, GameEventData};
use crate::game::powerup::{PowerupId, PowerupKind};
use crate::game::state::{ArenaState, Authority, Lifecycle, PlayerId, PlayerState};
use crate::game::tick::ExternalEffect;
use crate::network::protocol::{
    ClientMessage, GamePhase, MatchStats, RoomPlayer, Scores, ServerMessage,
};

/// Map used until a vote says otherwise.
pub const DEFAULT_MAP: &str = "PROCEDURAL";

/// Mode used until one is selected.
pub const DEFAULT_MODE: &str = "knockout";

/// Room lifecycle as this client sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    /// No room, or the transport is down.
    Disconnected,
    /// In a room, waiting for the match.
    Lobby,
    /// Match running.
    Playing,
    /// Match over.
    Ended,
}

impl From<GamePhase> for RoomPhase {
    fn from(phase: GamePhase) -> Self {
        match phase {
            GamePhase::Lobby => RoomPhase::Lobby,
            GamePhase::Playing => RoomPhase::Playing,
            GamePhase::Ended => RoomPhase::Ended,
        }
    }
}

/// Transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected.
    Offline,
    /// Socket open.
    Connected,
    /// Socket dropped, retrying.
    Reconnecting {
        /// Attempt number, starting at 1.
        attempt: u32,
    },
    /// Retries exhausted.
    GaveUp,
}

/// Identity inside a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSession {
    /// Join code.
    pub room_code: String,
    /// Our id.
    pub player_id: PlayerId,
    /// Our color.
    pub color: String,
    /// Our seat.
    pub player_index: usize,
}

/// Things the session layer reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Joined a room.
    Joined {
        /// Room code.
        room_code: String,
        /// Our id.
        player_id: PlayerId,
    },
    /// Previous session restored after a reconnect.
    Resumed {
        /// Room phase at resume.
        phase: RoomPhase,
    },
    /// Roster changed.
    RosterChanged,
    /// Match started; the local player is on its spawn point.
    MatchStarted {
        /// Arena seed.
        seed: u64,
        /// Map.
        map: String,
        /// Mode.
        mode: String,
    },
    /// Someone was knocked out.
    Knockout {
        /// Credited player.
        scorer_id: Option<PlayerId>,
        /// Victim.
        knocked_out_id: PlayerId,
    },
    /// Something happens to the local player next tick.
    Effect(ExternalEffect),
    /// A player fired a power-up.
    PowerupUsed {
        /// User.
        player_id: PlayerId,
        /// Kind.
        kind: PowerupKind,
    },
    /// Match over.
    GameOver {
        /// Winner.
        winner_id: Option<PlayerId>,
        /// Final scores.
        scores: Scores,
    },
    /// Back in the lobby.
    ReturnedToLobby,
    /// Transport dropped; gameplay suspended.
    Disconnected,
    /// Reconnection gave up. The room is gone for this client.
    ConnectionLost,
}

/// Room action and handshake failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Relay refused create/join/rejoin.
    #[error("Room rejected: {0}")]
    Rejected(String),

    /// No open transport.
    #[error("Not connected")]
    NotConnected,

    /// Action needs a room.
    #[error("Not in a room")]
    NotInRoom,
}

/// Client-side room state machine.
pub struct RoomSync {
    config: Arc<GameConfig>,
    phase: RoomPhase,
    connection: ConnectionState,
    session: Option<RoomSession>,
    awaiting_resume: bool,
    roster: Vec<RoomPlayer>,
    scores: Scores,
    winner: Option<PlayerId>,
    selected_map: String,
    selected_mode: String,
    seed: Option<u64>,
    map_votes: BTreeMap<String, u32>,
    final_stats: BTreeMap<PlayerId, MatchStats>,
}

impl RoomSync {
    /// Create, offline and without a room.
    pub fn new(config: Arc<GameConfig>) -> Self {
        Self {
            config,
            phase: RoomPhase::Disconnected,
            connection: ConnectionState::Offline,
            session: None,
            awaiting_resume: false,
            roster: Vec::new(),
            scores: Scores::new(),
            winner: None,
            selected_map: DEFAULT_MAP.to_string(),
            selected_mode: DEFAULT_MODE.to_string(),
            seed: None,
            map_votes: BTreeMap::new(),
            final_stats: BTreeMap::new(),
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Room phase.
    pub fn phase(&self) -> RoomPhase {
        self.phase
    }

    /// Transport state.
    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    /// Current room identity.
    pub fn session(&self) -> Option<&RoomSession> {
        self.session.as_ref()
    }

    /// Room roster.
    pub fn roster(&self) -> &[RoomPlayer] {
        &self.roster
    }

    /// Scores.
    pub fn scores(&self) -> &Scores {
        &self.scores
    }

    /// Winner of the last match.
    pub fn winner(&self) -> Option<&PlayerId> {
        self.winner.as_ref()
    }

    /// Selected map.
    pub fn selected_map(&self) -> &str {
        &self.selected_map
    }

    /// Selected mode.
    pub fn selected_mode(&self) -> &str {
        &self.selected_mode
    }

    /// Arena seed of the current match.
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Map vote tally.
    pub fn map_votes(&self) -> &BTreeMap<String, u32> {
        &self.map_votes
    }

    /// Stats from the last game over.
    pub fn final_stats(&self) -> &BTreeMap<PlayerId, MatchStats> {
        &self.final_stats
    }

    /// Socket open and any resume handshake finished.
    pub fn is_ready(&self) -> bool {
        self.connection == ConnectionState::Connected && !self.awaiting_resume
    }

    // =========================================================================
    // TRANSPORT HOOKS
    // =========================================================================

    /// Socket opened. Returns the resume request if we had a room.
    pub fn on_transport_connected(&mut self) -> Option<ClientMessage> {
        self.connection = ConnectionState::Connected;
        let session = self.session.as_ref()?;
        info!("Reconnected, resuming room {} as {}", session.room_code, session.player_id);
        self.awaiting_resume = true;
        Some(ClientMessage::RejoinRoom {
            room_code: session.room_code.clone(),
            player_id: session.player_id.clone(),
        })
    }

    /// Socket dropped. Gameplay stops until the handshake completes again.
    pub fn on_transport_lost(&mut self) -> Vec<SyncEvent> {
        if self.connection == ConnectionState::GaveUp {
            return Vec::new();
        }
        warn!("Transport lost in phase {:?}", self.phase);
        self.connection = ConnectionState::Reconnecting { attempt: 0 };
        self.awaiting_resume = false;
        self.phase = RoomPhase::Disconnected;
        vec![SyncEvent::Disconnected]
    }

    /// A reconnect attempt is starting.
    pub fn on_reconnecting(&mut self, attempt: u32) {
        self.connection = ConnectionState::Reconnecting { attempt };
    }

    /// Retries exhausted. Terminal until the user acts.
    pub fn on_reconnect_exhausted(&mut self, world: &mut ArenaState) -> Vec<SyncEvent> {
        warn!("Reconnect attempts exhausted, leaving room");
        self.connection = ConnectionState::GaveUp;
        self.awaiting_resume = false;
        self.leave(world);
        vec![SyncEvent::ConnectionLost]
    }

    // =========================================================================
    // ROOM ACTIONS
    // =========================================================================

    /// Open a room.
    pub fn create_room(&self, player_name: &str) -> Result<ClientMessage, SyncError> {
        self.ensure_connected()?;
        Ok(ClientMessage::CreateRoom { player_name: player_name.to_string() })
    }

    /// Join by code. Codes are case-insensitive.
    pub fn join_room(&self, room_code: &str, player_name: &str) -> Result<ClientMessage, SyncError> {
        self.ensure_connected()?;
        Ok(ClientMessage::JoinRoom {
            room_code: room_code.trim().to_ascii_uppercase(),
            player_name: player_name.to_string(),
        })
    }

    /// Join any open room.
    pub fn quick_join(&self, player_name: &str) -> Result<ClientMessage, SyncError> {
        self.ensure_connected()?;
        Ok(ClientMessage::QuickJoin { player_name: player_name.to_string() })
    }

    /// Toggle readiness.
    pub fn set_ready(&self, ready: bool, loadout: Vec<PowerupKind>) -> Result<ClientMessage, SyncError> {
        self.ensure_in_room()?;
        Ok(ClientMessage::PlayerReady { ready, loadout })
    }

    /// Vote for a map.
    pub fn vote_map(&self, map_id: &str) -> Result<ClientMessage, SyncError> {
        self.ensure_in_room()?;
        Ok(ClientMessage::VoteMap { map_id: map_id.to_string() })
    }

    /// Pick a mode. Applied locally right away.
    pub fn select_mode(&mut self, mode: &str) -> Result<ClientMessage, SyncError> {
        self.ensure_in_room()?;
        self.selected_mode = mode.to_string();
        Ok(ClientMessage::SelectMode { mode: mode.to_string() })
    }

    /// Leave the room and forget it.
    pub fn leave_room(&mut self, world: &mut ArenaState) -> Option<ClientMessage> {
        let had_room = self.session.is_some();
        self.leave(world);
        (had_room && self.connection == ConnectionState::Connected).then_some(ClientMessage::LeaveRoom)
    }

    /// Ask for a rematch. Scores and winner reset locally right away.
    pub fn request_rematch(&mut self) -> Result<ClientMessage, SyncError> {
        self.ensure_in_room()?;
        self.reset_scores();
        self.phase = RoomPhase::Lobby;
        Ok(ClientMessage::RequestRematch)
    }

    /// Summarise the match for the relay.
    pub fn report_game_end(&self, stats: MatchStats) -> Result<ClientMessage, SyncError> {
        self.ensure_in_room()?;
        Ok(ClientMessage::ReportGameEnd {
            winner_id: self.winner.clone(),
            scores: self.scores.clone(),
            stats,
        })
    }

    // =========================================================================
    // OUTBOUND
    // =========================================================================

    /// Outbound messages for one tick's events. Empty unless playing with a
    /// completed handshake.
    pub fn outbound(&self, events: &[GameEvent]) -> Vec<ClientMessage> {
        if self.phase != RoomPhase::Playing || !self.is_ready() {
            return Vec::new();
        }
        let Some(session) = self.session.as_ref() else {
            return Vec::new();
        };

        events
            .iter()
            .filter_map(|event| match &event.data {
                GameEventData::PositionReport { position, velocity, rotation } => {
                    Some(ClientMessage::PlayerPosition {
                        position: *position,
                        velocity: *velocity,
                        rotation: *rotation,
                    })
                }
                GameEventData::KnockedOut { player_id } => {
                    Some(ClientMessage::PlayerKnockout { knocked_out_id: player_id.clone() })
                }
                GameEventData::StompLanded { target_id, damage } => Some(ClientMessage::ReportStomp {
                    target_id: target_id.clone(),
                    damage: *damage,
                }),
                GameEventData::DamageChanged { total, .. } => {
                    Some(ClientMessage::PlayerDamage { damage: *total })
                }
                GameEventData::PowerupClaimed { powerup_id, .. } => {
                    Some(ClientMessage::PowerupCollected { powerup_id: powerup_id.clone() })
                }
                GameEventData::PowerupUseRequested { powerup_id, target_position, target_id, kind } => {
                    match powerup_id {
                        Some(powerup_id) => Some(ClientMessage::UsePowerup {
                            powerup_id: powerup_id.clone(),
                            target_position: *target_position,
                            target_id: target_id.clone(),
                        }),
                        None => {
                            warn!("{} used by {} has no instance id, not reported", kind, session.player_id);
                            None
                        }
                    }
                }
                _ => None,
            })
            .collect()
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    /// Apply one inbound message.
    ///
    /// Room rejections come back as `Err`. Everything else that does not fit
    /// (unknown ids, own echoes, gameplay before the handshake) is logged and
    /// dropped.
    pub fn handle_inbound(
        &mut self,
        message: ServerMessage,
        world: &mut ArenaState,
        now_ms: u64,
    ) -> Result<Vec<SyncEvent>, SyncError> {
        if self.connection != ConnectionState::Connected {
            debug!("Dropping message while {:?}", self.connection);
            return Ok(Vec::new());
        }

        match message {
            ServerMessage::RoomJoined { room_code, player_id, color, player_index, players } => {
                info!("Joined room {} as {} (seat {})", room_code, player_id, player_index);
                self.session = Some(RoomSession {
                    room_code: room_code.clone(),
                    player_id: player_id.clone(),
                    color,
                    player_index,
                });
                self.awaiting_resume = false;
                self.roster = players;
                self.phase = RoomPhase::Lobby;
                self.reset_scores();
                world.clear();
                Ok(vec![SyncEvent::Joined { room_code, player_id }])
            }

            ServerMessage::RoomError { error } => {
                if self.awaiting_resume {
                    warn!("Resume refused: {}", error);
                    self.awaiting_resume = false;
                    self.leave(world);
                }
                Err(SyncError::Rejected(error))
            }

            ServerMessage::SessionResumed { room_code, player_id, color, player_index, players, phase, scores } => {
                let expected = self
                    .session
                    .as_ref()
                    .map_or(false, |s| s.room_code == room_code && s.player_id == player_id);
                if !self.awaiting_resume || !expected {
                    warn!("Unexpected resume for {} in {}", player_id, room_code);
                    return Ok(Vec::new());
                }
                self.awaiting_resume = false;
                self.session = Some(RoomSession { room_code, player_id, color, player_index });
                self.roster = players;
                self.scores = scores;
                self.phase = phase.into();
                if self.phase == RoomPhase::Playing && world.local().is_none() {
                    self.populate_world(world);
                }
                info!("Session resumed in phase {:?}", self.phase);
                Ok(vec![SyncEvent::Resumed { phase: self.phase }])
            }

            other if !self.is_ready() || self.session.is_none() => {
                debug!("Dropping {:?} before handshake", message_kind(&other));
                Ok(Vec::new())
            }

            other => Ok(self.handle_room_message(other, world, now_ms)),
        }
    }

    fn handle_room_message(&mut self, message: ServerMessage, world: &mut ArenaState, now_ms: u64) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        match message {
            ServerMessage::PlayerUpdate { players } => {
                self.roster = players;
                events.push(SyncEvent::RosterChanged);
            }

            ServerMessage::PlayerJoined { player } => {
                if !self.roster.iter().any(|p| p.id == player.id) {
                    debug!("Player {} joined", player.id);
                    self.roster.push(player);
                    events.push(SyncEvent::RosterChanged);
                }
            }

            ServerMessage::PlayerLeft { player_id } => {
                self.roster.retain(|p| p.id != player_id);
                if let Err(err) = world.remove_remote(&player_id) {
                    debug!("Leave for {}: {}", player_id, err);
                }
                events.push(SyncEvent::RosterChanged);
            }

            ServerMessage::GameStart { players, selected_map, seed, mode } => {
                info!("Match starting on {} (seed {}, mode {})", selected_map, seed, mode);
                self.roster = players;
                self.selected_map = selected_map.clone();
                self.selected_mode = mode.clone();
                self.seed = Some(seed);
                self.phase = RoomPhase::Playing;
                self.reset_scores();
                self.populate_world(world);
                events.push(SyncEvent::MatchStarted { seed, map: selected_map, mode });
            }

            ServerMessage::MapVoted { map_name, votes } => {
                self.selected_map = map_name;
                self.map_votes = votes;
            }

            ServerMessage::ModeSelected { mode } => {
                self.selected_mode = mode;
            }

            ServerMessage::PlayerMoved { player_id, position, velocity, rotation } => {
                if self.phase != RoomPhase::Playing {
                    return events;
                }
                if world.is_local(&player_id) {
                    debug!("Ignoring own position echo");
                    return events;
                }
                let airborne_height = self.config.puck.airborne_height;
                let trail_len = self.config.puck.trail_length;
                match world.remote_mut(&player_id) {
                    Ok(remote) => {
                        if let Err(err) = remote.apply_remote_transform(position, velocity, rotation, now_ms, trail_len) {
                            warn!("Position update refused: {}", err);
                        } else if !remote.is_respawning() {
                            remote.lifecycle = if remote.position.y > airborne_height {
                                Lifecycle::Airborne
                            } else {
                                Lifecycle::Active
                            };
                        }
                    }
                    Err(err) => warn!("Dropping position update: {}", err),
                }
            }

            ServerMessage::Knockout { scorer_id, knocked_out_id, scores } => {
                self.scores = scores;
                if !world.is_local(&knocked_out_id) {
                    match world.remote_mut(&knocked_out_id) {
                        Ok(remote) => {
                            remote.lifecycle = Lifecycle::Eliminated;
                            remote.trail.clear();
                        }
                        Err(err) => warn!("Knockout for {}", err),
                    }
                }
                events.push(SyncEvent::Knockout { scorer_id, knocked_out_id });
            }

            ServerMessage::Stomp { attacker_id, target_id, damage } => {
                if world.is_local(&attacker_id) {
                    debug!("Ignoring own stomp echo");
                } else if world.is_local(&target_id) {
                    events.push(SyncEvent::Effect(ExternalEffect::Stomped { attacker: attacker_id, damage }));
                }
            }

            ServerMessage::DamageUpdate { player_id, damage } => {
                if world.is_local(&player_id) {
                    debug!("Ignoring own damage echo");
                } else {
                    match world.remote_mut(&player_id) {
                        Ok(remote) => {
                            if let Err(err) = remote.apply_remote_damage(damage) {
                                warn!("Damage update refused: {}", err);
                            }
                        }
                        Err(err) => warn!("Dropping damage update: {}", err),
                    }
                }
            }

            ServerMessage::PowerupSpawned { id, kind, position } => {
                if !world.powerups.spawn(id.clone(), kind, position, now_ms) {
                    debug!("Power-up {} not spawned (duplicate, removed or field full)", id);
                }
            }

            ServerMessage::PowerupRemoved { powerup_id } => {
                world.powerups.remove(&powerup_id);
            }

            ServerMessage::PowerupCollected { powerup_id, player_id } => {
                let kind = world.powerups.kind_of(&powerup_id);
                world.powerups.remove(&powerup_id);
                if world.is_local(&player_id) {
                    match kind {
                        Some(kind) => events.push(SyncEvent::Effect(ExternalEffect::PowerupGranted {
                            powerup_id: Some(powerup_id),
                            kind,
                        })),
                        None => warn!("Granted unknown power-up {}", powerup_id),
                    }
                }
            }

            ServerMessage::PowerupUsed { player_id, powerup_id, kind, origin, target_position, target_id } => {
                let local = world.is_local(&player_id);
                if local {
                    events.push(SyncEvent::Effect(ExternalEffect::UseConfirmed(Some(powerup_id))));
                }
                if let Some(projectile) = kind.projectile() {
                    world.projectiles.spawn(
                        projectile,
                        player_id.clone(),
                        origin,
                        target_position,
                        target_id.clone(),
                        now_ms,
                    );
                }
                if let Some(affliction) = kind.inflicts() {
                    let on_us = target_id.as_ref().map_or(false, |t| world.is_local(t));
                    if on_us && !local {
                        events.push(SyncEvent::Effect(ExternalEffect::Afflicted(affliction)));
                    }
                }
                events.push(SyncEvent::PowerupUsed { player_id, kind });
            }

            ServerMessage::PowerupRejected { powerup_id } => {
                events.push(SyncEvent::Effect(ExternalEffect::UseRejected(powerup_id)));
            }

            ServerMessage::GameOver { winner_id, scores, stats } => {
                info!("Game over, winner {:?}", winner_id);
                self.phase = RoomPhase::Ended;
                self.scores = scores.clone();
                self.winner = winner_id.clone();
                self.final_stats = stats;
                world.projectiles.clear();
                events.push(SyncEvent::GameOver { winner_id, scores });
            }

            ServerMessage::RematchStarted { players } => {
                self.roster = players;
                if self.phase != RoomPhase::Lobby {
                    self.reset_scores();
                    self.phase = RoomPhase::Lobby;
                    world.projectiles.clear();
                    events.push(SyncEvent::ReturnedToLobby);
                }
            }

            ServerMessage::RoomJoined { .. }
            | ServerMessage::RoomError { .. }
            | ServerMessage::SessionResumed { .. } => {}
        }
        events
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn ensure_connected(&self) -> Result<(), SyncError> {
        if self.connection == ConnectionState::Connected {
            Ok(())
        } else {
            Err(SyncError::NotConnected)
        }
    }

    fn ensure_in_room(&self) -> Result<(), SyncError> {
        self.ensure_connected()?;
        if self.session.is_none() {
            return Err(SyncError::NotInRoom);
        }
        Ok(())
    }

    fn reset_scores(&mut self) {
        self.scores.clear();
        self.winner = None;
        self.final_stats.clear();
    }

    fn leave(&mut self, world: &mut ArenaState) {
        self.session = None;
        self.roster.clear();
        self.phase = RoomPhase::Disconnected;
        self.seed = None;
        self.map_votes.clear();
        self.reset_scores();
        world.clear();
    }

    /// Rebuild the world from the roster: local player on its spawn point,
    /// everyone else as remote.
    fn populate_world(&self, world: &mut ArenaState) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let local = PlayerState::new(
            session.player_id.clone(),
            self.roster
                .iter()
                .find(|p| p.id == session.player_id)
                .map_or("", |p| p.name.as_str()),
            &session.color,
            session.player_index,
            Authority::Local,
            self.config.spawn_point(session.player_index),
        );
        world.reset_with_local(local);

        for member in self.roster.iter().filter(|p| p.id != session.player_id) {
            let remote = PlayerState::new(
                member.id.clone(),
                &member.name,
                &member.color,
                member.player_index,
                Authority::Remote,
                self.config.spawn_point(member.player_index),
            );
            if let Err(err) = world.upsert_remote(remote) {
                warn!("Roster entry skipped: {}", err);
            }
        }
    }
}

fn message_kind(message: &ServerMessage) -> &'static str {
    match message {
        ServerMessage::RoomJoined { .. } => "roomJoined",
        ServerMessage::RoomError { .. } => "roomError",
        ServerMessage::SessionResumed { .. } => "sessionResumed",
        ServerMessage::PlayerUpdate { .. } => "playerUpdate",
        ServerMessage::PlayerJoined { .. } => "playerJoined",
        ServerMessage::PlayerLeft { .. } => "playerLeft",
        ServerMessage::GameStart { .. } => "gameStart",
        ServerMessage::MapVoted { .. } => "mapVoted",
        ServerMessage::ModeSelected { .. } => "modeSelected",
        ServerMessage::PlayerMoved { .. } => "playerMoved",
        ServerMessage::Knockout { .. } => "knockout",
        ServerMessage::Stomp { .. } => "stomp",
        ServerMessage::DamageUpdate { .. } => "damageUpdate",
        ServerMessage::PowerupSpawned { .. } => "powerupSpawned",
        ServerMessage::PowerupRemoved { .. } => "powerupRemoved",
        ServerMessage::PowerupCollected { .. } => "powerupCollected",
        ServerMessage::PowerupUsed { .. } => "powerupUsed",
        ServerMessage::PowerupRejected { .. } => "powerupRejected",
        ServerMessage::GameOver { .. } => "gameOver",
        ServerMessage::RematchStarted { .. } => "rematchStarted",
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Vec3;
    use crate::game::powerup::PowerupKind;

    fn member(id: &str, index: usize) -> RoomPlayer {
        RoomPlayer {
            id: PlayerId::from(id),
            name: id.to_uppercase(),
            color: format!("color-{}", index),
            player_index: index,
            ready: true,
            connected: true,
        }
    }

    fn joined() -> ServerMessage {
        ServerMessage::RoomJoined {
            room_code: "ABCD".into(),
            player_id: PlayerId::from("me"),
            color: "color-0".into(),
            player_index: 0,
            players: vec![member("me", 0)],
        }
    }

    fn game_start() -> ServerMessage {
        ServerMessage::GameStart {
            players: vec![member("me", 0), member("them", 1)],
            selected_map: "PROCEDURAL".into(),
            seed: 99,
            mode: "knockout".into(),
        }
    }

    fn playing() -> (RoomSync, ArenaState) {
        let mut sync = RoomSync::new(Arc::new(GameConfig::default()));
        let mut world = ArenaState::new(4);
        sync.on_transport_connected();
        sync.handle_inbound(joined(), &mut world, 0).unwrap();
        sync.handle_inbound(game_start(), &mut world, 0).unwrap();
        (sync, world)
    }

    #[test]
    fn test_phase_progression() {
        let mut sync = RoomSync::new(Arc::new(GameConfig::default()));
        let mut world = ArenaState::new(4);
        assert_eq!(sync.phase(), RoomPhase::Disconnected);
        assert_eq!(sync.create_room("me"), Err(SyncError::NotConnected));

        assert!(sync.on_transport_connected().is_none());
        let events = sync.handle_inbound(joined(), &mut world, 0).unwrap();
        assert_eq!(events, vec![SyncEvent::Joined { room_code: "ABCD".into(), player_id: PlayerId::from("me") }]);
        assert_eq!(sync.phase(), RoomPhase::Lobby);

        let events = sync.handle_inbound(game_start(), &mut world, 0).unwrap();
        assert!(matches!(events[0], SyncEvent::MatchStarted { seed: 99, .. }));
        assert_eq!(sync.phase(), RoomPhase::Playing);
        assert_eq!(world.player_count(), 2);
        assert!(world.local().unwrap().is_local());
        assert_eq!(world.local().unwrap().position, GameConfig::default().spawn_point(0));

        sync.handle_inbound(
            ServerMessage::GameOver { winner_id: Some(PlayerId::from("me")), scores: Scores::new(), stats: BTreeMap::new() },
            &mut world,
            10,
        )
        .unwrap();
        assert_eq!(sync.phase(), RoomPhase::Ended);
        assert_eq!(sync.winner(), Some(&PlayerId::from("me")));

        sync.request_rematch().unwrap();
        assert_eq!(sync.phase(), RoomPhase::Lobby);
        assert!(sync.winner().is_none());
        assert!(sync.scores().is_empty());
    }

    #[test]
    fn test_relayed_rematch_returns_to_lobby() {
        let (mut sync, mut world) = playing();
        sync.handle_inbound(
            ServerMessage::GameOver { winner_id: None, scores: Scores::new(), stats: BTreeMap::new() },
            &mut world,
            10,
        )
        .unwrap();

        let events = sync
            .handle_inbound(ServerMessage::RematchStarted { players: Vec::new() }, &mut world, 20)
            .unwrap();
        assert_eq!(events, vec![SyncEvent::ReturnedToLobby]);
        assert_eq!(sync.phase(), RoomPhase::Lobby);

        // Already in the lobby after a local rematch request
        let events = sync
            .handle_inbound(ServerMessage::RematchStarted { players: Vec::new() }, &mut world, 30)
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_room_error_is_rejection() {
        let mut sync = RoomSync::new(Arc::new(GameConfig::default()));
        let mut world = ArenaState::new(4);
        sync.on_transport_connected();
        let result = sync.handle_inbound(ServerMessage::RoomError { error: "Room is full".into() }, &mut world, 0);
        assert_eq!(result, Err(SyncError::Rejected("Room is full".into())));
        assert_eq!(sync.phase(), RoomPhase::Disconnected);
    }

    #[test]
    fn test_remote_moves_overwrite() {
        let (mut sync, mut world) = playing();
        sync.handle_inbound(
            ServerMessage::PlayerMoved {
                player_id: PlayerId::from("them"),
                position: Some(Vec3::new(3.0, 0.5, -2.0)),
                velocity: Some(Vec3::new(1.0, 0.0, 0.0)),
                rotation: None,
            },
            &mut world,
            5,
        )
        .unwrap();
        let them = world.get(&PlayerId::from("them")).unwrap();
        assert_eq!(them.position, Vec3::new(3.0, 0.5, -2.0));
        assert_eq!(them.velocity, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(them.last_update_ms, 5);
    }

    #[test]
    fn test_own_echo_never_touches_local() {
        let (mut sync, mut world) = playing();
        let before = world.local().unwrap().clone();

        for message in [
            ServerMessage::PlayerMoved {
                player_id: PlayerId::from("me"),
                position: Some(Vec3::new(50.0, 50.0, 50.0)),
                velocity: None,
                rotation: None,
            },
            ServerMessage::DamageUpdate { player_id: PlayerId::from("me"), damage: 999.0 },
        ] {
            let events = sync.handle_inbound(message, &mut world, 1).unwrap();
            assert!(events.is_empty());
        }
        let after = world.local().unwrap();
        assert_eq!(after.position, before.position);
        assert_eq!(after.damage, before.damage);
    }

    #[test]
    fn test_unknown_player_dropped() {
        let (mut sync, mut world) = playing();
        let events = sync
            .handle_inbound(
                ServerMessage::PlayerMoved {
                    player_id: PlayerId::from("ghost"),
                    position: Some(Vec3::ZERO),
                    velocity: None,
                    rotation: None,
                },
                &mut world,
                1,
            )
            .unwrap();
        assert!(events.is_empty());
        assert!(world.get(&PlayerId::from("ghost")).is_none());
    }

    #[test]
    fn test_stomp_on_local_becomes_effect() {
        let (mut sync, mut world) = playing();
        let events = sync
            .handle_inbound(
                ServerMessage::Stomp {
                    attacker_id: PlayerId::from("them"),
                    target_id: PlayerId::from("me"),
                    damage: 17.0,
                },
                &mut world,
                1,
            )
            .unwrap();
        assert_eq!(
            events,
            vec![SyncEvent::Effect(ExternalEffect::Stomped { attacker: PlayerId::from("them"), damage: 17.0 })]
        );
        assert_eq!(world.local().unwrap().damage, 0.0);
    }

    #[test]
    fn test_remote_knockout_until_next_move() {
        let (mut sync, mut world) = playing();
        sync.handle_inbound(
            ServerMessage::Knockout {
                scorer_id: Some(PlayerId::from("me")),
                knocked_out_id: PlayerId::from("them"),
                scores: [(PlayerId::from("me"), 1)].into_iter().collect(),
            },
            &mut world,
            1,
        )
        .unwrap();
        assert_eq!(world.get(&PlayerId::from("them")).unwrap().lifecycle, Lifecycle::Eliminated);
        assert_eq!(sync.scores()[&PlayerId::from("me")], 1);

        sync.handle_inbound(
            ServerMessage::PlayerMoved {
                player_id: PlayerId::from("them"),
                position: Some(Vec3::new(8.0, 0.5, 6.0)),
                velocity: None,
                rotation: None,
            },
            &mut world,
            2,
        )
        .unwrap();
        assert_eq!(world.get(&PlayerId::from("them")).unwrap().lifecycle, Lifecycle::Active);
    }

    #[test]
    fn test_powerup_removal_idempotent_and_out_of_order() {
        let (mut sync, mut world) = playing();
        let id = PowerupId::new("p1");
        sync.handle_inbound(
            ServerMessage::PowerupSpawned { id: id.clone(), kind: PowerupKind::Shield, position: Vec3::ZERO },
            &mut world,
            1,
        )
        .unwrap();

        // Removal first, then the collection ack for us
        sync.handle_inbound(ServerMessage::PowerupRemoved { powerup_id: id.clone() }, &mut world, 2).unwrap();
        sync.handle_inbound(ServerMessage::PowerupRemoved { powerup_id: id.clone() }, &mut world, 2).unwrap();
        let events = sync
            .handle_inbound(
                ServerMessage::PowerupCollected { powerup_id: id.clone(), player_id: PlayerId::from("me") },
                &mut world,
                3,
            )
            .unwrap();
        assert_eq!(
            events,
            vec![SyncEvent::Effect(ExternalEffect::PowerupGranted { powerup_id: Some(id.clone()), kind: PowerupKind::Shield })]
        );
        assert!(world.powerups.is_empty());

        // A late spawn for the same id stays dead
        sync.handle_inbound(
            ServerMessage::PowerupSpawned { id, kind: PowerupKind::Shield, position: Vec3::ZERO },
            &mut world,
            4,
        )
        .unwrap();
        assert!(world.powerups.is_empty());
    }

    #[test]
    fn test_powerup_used_spawns_projectile_and_confirms() {
        let (mut sync, mut world) = playing();
        let events = sync
            .handle_inbound(
                ServerMessage::PowerupUsed {
                    player_id: PlayerId::from("me"),
                    powerup_id: PowerupId::new("r1"),
                    kind: PowerupKind::Rocket,
                    origin: Vec3::new(0.0, 0.5, 0.0),
                    target_position: Vec3::new(5.0, 0.5, 0.0),
                    target_id: Some(PlayerId::from("them")),
                },
                &mut world,
                1,
            )
            .unwrap();
        assert_eq!(world.projectiles.len(), 1);
        assert!(events.contains(&SyncEvent::Effect(ExternalEffect::UseConfirmed(Some(PowerupId::new("r1"))))));
    }

    #[test]
    fn test_curse_on_local() {
        let (mut sync, mut world) = playing();
        let events = sync
            .handle_inbound(
                ServerMessage::PowerupUsed {
                    player_id: PlayerId::from("them"),
                    powerup_id: PowerupId::new("c1"),
                    kind: PowerupKind::Curse,
                    origin: Vec3::ZERO,
                    target_position: Vec3::ZERO,
                    target_id: Some(PlayerId::from("me")),
                },
                &mut world,
                1,
            )
            .unwrap();
        assert!(events.contains(&SyncEvent::Effect(ExternalEffect::Afflicted(
            crate::game::powerup::Affliction::Cursed
        ))));
        assert!(world.projectiles.is_empty());
    }

    #[test]
    fn test_outbound_only_while_playing() {
        let (mut sync, mut world) = playing();
        let events = vec![
            GameEvent::new(0, GameEventData::PositionReport {
                position: Vec3::ZERO,
                velocity: Vec3::ZERO,
                rotation: Vec3::ZERO,
            }),
            GameEvent::impact(0, 9.0),
            GameEvent::knocked_out(0, PlayerId::from("me")),
        ];
        let out = sync.outbound(&events);
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], ClientMessage::PlayerPosition { .. }));
        assert!(matches!(out[1], ClientMessage::PlayerKnockout { .. }));

        sync.handle_inbound(
            ServerMessage::GameOver { winner_id: None, scores: Scores::new(), stats: BTreeMap::new() },
            &mut world,
            1,
        )
        .unwrap();
        assert!(sync.outbound(&events).is_empty());
    }

    #[test]
    fn test_disconnect_gates_until_resume() {
        let (mut sync, mut world) = playing();
        assert_eq!(sync.on_transport_lost(), vec![SyncEvent::Disconnected]);
        assert_eq!(sync.phase(), RoomPhase::Disconnected);

        // Messages while down are ignored
        let moved = ServerMessage::PlayerMoved {
            player_id: PlayerId::from("them"),
            position: Some(Vec3::new(1.0, 0.5, 1.0)),
            velocity: None,
            rotation: None,
        };
        sync.handle_inbound(moved.clone(), &mut world, 1).unwrap();

        // Socket back: resume requested, gameplay still gated
        let rejoin = sync.on_transport_connected();
        assert_eq!(
            rejoin,
            Some(ClientMessage::RejoinRoom { room_code: "ABCD".into(), player_id: PlayerId::from("me") })
        );
        assert!(!sync.is_ready());
        sync.handle_inbound(moved.clone(), &mut world, 2).unwrap();
        assert_ne!(world.get(&PlayerId::from("them")).unwrap().position, Vec3::new(1.0, 0.5, 1.0));

        let events = sync
            .handle_inbound(
                ServerMessage::SessionResumed {
                    room_code: "ABCD".into(),
                    player_id: PlayerId::from("me"),
                    color: "color-0".into(),
                    player_index: 0,
                    players: vec![member("me", 0), member("them", 1)],
                    phase: GamePhase::Playing,
                    scores: Scores::new(),
                },
                &mut world,
                3,
            )
            .unwrap();
        assert_eq!(events, vec![SyncEvent::Resumed { phase: RoomPhase::Playing }]);
        assert_eq!(sync.session().unwrap().room_code, "ABCD");
        assert_eq!(sync.session().unwrap().player_id, PlayerId::from("me"));

        sync.handle_inbound(moved, &mut world, 4).unwrap();
        assert_eq!(world.get(&PlayerId::from("them")).unwrap().position, Vec3::new(1.0, 0.5, 1.0));
    }

    #[test]
    fn test_lobby_drop_resumes_same_session() {
        let mut sync = RoomSync::new(Arc::new(GameConfig::default()));
        let mut world = ArenaState::new(4);
        sync.on_transport_connected();
        sync.handle_inbound(joined(), &mut world, 0).unwrap();

        sync.on_transport_lost();
        let rejoin = sync.on_transport_connected();
        assert!(matches!(rejoin, Some(ClientMessage::RejoinRoom { .. })));

        let events = sync
            .handle_inbound(
                ServerMessage::SessionResumed {
                    room_code: "ABCD".into(),
                    player_id: PlayerId::from("me"),
                    color: "color-0".into(),
                    player_index: 0,
                    players: vec![member("me", 0), member("them", 1)],
                    phase: GamePhase::Lobby,
                    scores: Scores::new(),
                },
                &mut world,
                1,
            )
            .unwrap();
        assert_eq!(events, vec![SyncEvent::Resumed { phase: RoomPhase::Lobby }]);
        assert_eq!(sync.phase(), RoomPhase::Lobby);
        assert!(sync.is_ready());
        assert_eq!(sync.session().unwrap().room_code, "ABCD");
        assert_eq!(sync.session().unwrap().player_id, PlayerId::from("me"));
        assert_eq!(sync.roster().len(), 2);
        assert!(world.local().is_none());
    }

    #[test]
    fn test_reconnect_exhausted_is_terminal() {
        let (mut sync, mut world) = playing();
        sync.on_transport_lost();
        sync.on_reconnecting(5);
        assert_eq!(sync.connection(), ConnectionState::Reconnecting { attempt: 5 });

        assert_eq!(sync.on_reconnect_exhausted(&mut world), vec![SyncEvent::ConnectionLost]);
        assert_eq!(sync.connection(), ConnectionState::GaveUp);
        assert!(sync.session().is_none());
        assert_eq!(world.player_count(), 0);
        assert!(sync.on_transport_lost().is_empty());
    }
}
