//! Relay Rooms
//!
//! Relay-side bookkeeping for the rooms clients play in. Nothing here touches
//! a socket: every operation returns the messages it produces, addressed by
//! player id, and the relay server fans them out.
//!
//! The relay is semi-authoritative. It trusts each client's own transform
//! and knockout reports, but it owns the room phase, scores, the seed handed
//! out at match start, power-up spawns, first-claim pickups and use
//! validation.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::GameConfig;
use crate::core::{DeterministicRng, Vec3};
use crate::game::powerup::{PowerupClass, PowerupField, PowerupId, PowerupKind};
use crate::game::state::PlayerId;
use crate::network::protocol::{
    ClientMessage, GamePhase, MatchStats, RoomPlayer, Scores, ServerMessage,
};
use crate::network::sync::{DEFAULT_MAP, DEFAULT_MODE};

/// Join code length.
pub const ROOM_CODE_LEN: usize = 4;

/// Join code characters. No 0/O or 1/I.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Seat colors, by player index.
pub const PLAYER_COLORS: [&str; 4] = ["#00ff87", "#ff006e", "#00d4ff", "#ffd700"];

/// Ready players needed before a match starts.
pub const MIN_PLAYERS_TO_START: usize = 2;

/// Relay-side rejections, sent back as `roomError`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    /// No room with that code.
    #[error("Room {0} not found")]
    NotFound(String),

    /// Every seat taken.
    #[error("Room is full")]
    Full,

    /// Joins are only accepted in the lobby.
    #[error("Game already in progress")]
    InProgress,

    /// The rejoin grace window passed, or the seat was never held.
    #[error("Session expired")]
    SessionExpired,

    /// Rejoin for a seat whose connection is still live.
    #[error("Seat is still connected")]
    SeatConnected,
}

// =============================================================================
// DELIVERIES
// =============================================================================

/// Who receives a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    /// Every connected member.
    All,
    /// Every connected member but one.
    AllExcept(PlayerId),
    /// One member.
    Only(PlayerId),
}

/// A message produced by a room operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Addressees.
    pub recipient: Recipient,
    /// Payload.
    pub message: ServerMessage,
}

impl Delivery {
    fn all(message: ServerMessage) -> Self {
        Self { recipient: Recipient::All, message }
    }

    fn except(player_id: &PlayerId, message: ServerMessage) -> Self {
        Self { recipient: Recipient::AllExcept(player_id.clone()), message }
    }

    fn only(player_id: &PlayerId, message: ServerMessage) -> Self {
        Self { recipient: Recipient::Only(player_id.clone()), message }
    }
}

/// A message resolved to one connection.
pub type Outbound = (PlayerId, ServerMessage);

// =============================================================================
// ROOM
// =============================================================================

#[derive(Debug, Clone)]
struct Member {
    info: RoomPlayer,
    position: Vec3,
    damage: f64,
    last_stomper: Option<PlayerId>,
    held: BTreeMap<PowerupId, PowerupKind>,
    stats: MatchStats,
    dropped_at: Option<u64>,
}

impl Member {
    fn new(info: RoomPlayer) -> Self {
        Self {
            info,
            position: Vec3::ZERO,
            damage: 0.0,
            last_stomper: None,
            held: BTreeMap::new(),
            stats: MatchStats::default(),
            dropped_at: None,
        }
    }
}

/// One room on the relay.
#[derive(Debug)]
pub struct RelayRoom {
    code: String,
    config: Arc<GameConfig>,
    phase: GamePhase,
    members: BTreeMap<PlayerId, Member>,
    scores: Scores,
    votes: BTreeMap<PlayerId, String>,
    mode: String,
    field: PowerupField,
    next_spawn_at: Option<u64>,
    spawned: u64,
    rng: DeterministicRng,
}

impl RelayRoom {
    /// Empty lobby.
    pub fn new(code: String, config: Arc<GameConfig>, seed: u64) -> Self {
        let max_on_field = config.powerups.max_on_field;
        Self {
            code,
            config,
            phase: GamePhase::Lobby,
            members: BTreeMap::new(),
            scores: Scores::new(),
            votes: BTreeMap::new(),
            mode: DEFAULT_MODE.to_string(),
            field: PowerupField::new(max_on_field),
            next_spawn_at: None,
            spawned: 0,
            rng: DeterministicRng::new(seed),
        }
    }

    /// Join code.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Current phase.
    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    /// Current scores.
    pub fn scores(&self) -> &Scores {
        &self.scores
    }

    /// Members, connected or not.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// No members left.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Is `player_id` seated here.
    pub fn contains(&self, player_id: &PlayerId) -> bool {
        self.members.contains_key(player_id)
    }

    /// Accepting new players.
    pub fn is_open(&self) -> bool {
        self.phase == GamePhase::Lobby && self.members.len() < self.config.network.max_players
    }

    /// Live power-ups on the field.
    pub fn powerups_on_field(&self) -> usize {
        self.field.len()
    }

    /// Members ordered by seat.
    pub fn roster(&self) -> Vec<RoomPlayer> {
        let mut players: Vec<RoomPlayer> = self.members.values().map(|m| m.info.clone()).collect();
        players.sort_by_key(|p| p.player_index);
        players
    }

    /// Resolve deliveries against connected members.
    pub fn resolve(&self, deliveries: Vec<Delivery>) -> Vec<Outbound> {
        let mut out = Vec::new();
        for delivery in deliveries {
            match delivery.recipient {
                Recipient::Only(id) => {
                    if self.is_connected(&id) {
                        out.push((id, delivery.message));
                    }
                }
                Recipient::All | Recipient::AllExcept(_) => {
                    let skip = match &delivery.recipient {
                        Recipient::AllExcept(id) => Some(id),
                        _ => None,
                    };
                    for (id, member) in &self.members {
                        if member.info.connected && Some(id) != skip {
                            out.push((id.clone(), delivery.message.clone()));
                        }
                    }
                }
            }
        }
        out
    }

    fn is_connected(&self, player_id: &PlayerId) -> bool {
        self.members.get(player_id).map_or(false, |m| m.info.connected)
    }

    // =========================================================================
    // MEMBERSHIP
    // =========================================================================

    /// Seat a new player.
    pub fn join(&mut self, player_id: &PlayerId, player_name: &str) -> Result<Vec<Delivery>, RoomError> {
        if self.phase != GamePhase::Lobby {
            return Err(RoomError::InProgress);
        }
        if self.members.len() >= self.config.network.max_players {
            return Err(RoomError::Full);
        }

        let player_index = (0..)
            .find(|i| !self.members.values().any(|m| m.info.player_index == *i))
            .unwrap_or(0);
        let color = PLAYER_COLORS[player_index % PLAYER_COLORS.len()].to_string();
        let info = RoomPlayer {
            id: player_id.clone(),
            name: player_name.to_string(),
            color: color.clone(),
            player_index,
            ready: false,
            connected: true,
        };
        self.members.insert(player_id.clone(), Member::new(info.clone()));
        info!("{} joined room {} as player {}", player_name, self.code, player_index);

        Ok(vec![
            Delivery::only(
                player_id,
                ServerMessage::RoomJoined {
                    room_code: self.code.clone(),
                    player_id: player_id.clone(),
                    color,
                    player_index,
                    players: self.roster(),
                },
            ),
            Delivery::except(player_id, ServerMessage::PlayerJoined { player: info }),
        ])
    }

    /// Remove a player for good.
    pub fn leave(&mut self, player_id: &PlayerId) -> Vec<Delivery> {
        if self.members.remove(player_id).is_none() {
            return Vec::new();
        }
        self.votes.remove(player_id);
        self.scores.remove(player_id);
        info!("Player {} left room {}", player_id, self.code);
        vec![Delivery::except(player_id, ServerMessage::PlayerLeft { player_id: player_id.clone() })]
    }

    /// Transport dropped. The seat is held for the rejoin grace window in
    /// every phase and freed by [`RelayRoom::tick`] once it runs out.
    pub fn disconnect(&mut self, player_id: &PlayerId, now_ms: u64) -> Vec<Delivery> {
        let Some(member) = self.members.get_mut(player_id) else {
            return Vec::new();
        };
        member.info.connected = false;
        member.dropped_at = Some(now_ms);
        info!("Holding seat for {} in room {}", player_id, self.code);
        vec![Delivery::except(player_id, ServerMessage::PlayerUpdate { players: self.roster() })]
    }

    /// Resume a held seat on a fresh connection.
    pub fn rejoin(&mut self, player_id: &PlayerId, now_ms: u64) -> Result<Vec<Delivery>, RoomError> {
        let grace = self.config.network.rejoin_grace_ms;
        let member = self.members.get_mut(player_id).ok_or(RoomError::SessionExpired)?;
        let dropped_at = member.dropped_at.ok_or(RoomError::SeatConnected)?;
        if now_ms.saturating_sub(dropped_at) > grace {
            return Err(RoomError::SessionExpired);
        }
        member.info.connected = true;
        member.dropped_at = None;
        let info = member.info.clone();
        info!("Player {} resumed in room {}", player_id, self.code);

        Ok(vec![
            Delivery::only(
                player_id,
                ServerMessage::SessionResumed {
                    room_code: self.code.clone(),
                    player_id: player_id.clone(),
                    color: info.color,
                    player_index: info.player_index,
                    players: self.roster(),
                    phase: self.phase,
                    scores: self.scores.clone(),
                },
            ),
            Delivery::except(player_id, ServerMessage::PlayerUpdate { players: self.roster() }),
        ])
    }

    fn expire_dropped(&mut self, now_ms: u64) -> Vec<Delivery> {
        let grace = self.config.network.rejoin_grace_ms;
        let expired: Vec<PlayerId> = self
            .members
            .iter()
            .filter(|(_, m)| m.dropped_at.map_or(false, |t| now_ms.saturating_sub(t) > grace))
            .map(|(id, _)| id.clone())
            .collect();
        let mut deliveries = Vec::new();
        for id in expired {
            info!("Rejoin window for {} in room {} expired", id, self.code);
            deliveries.extend(self.leave(&id));
        }
        deliveries
    }

    // =========================================================================
    // LOBBY
    // =========================================================================

    /// Toggle readiness. Starts the match once every connected member is ready.
    pub fn set_ready(&mut self, player_id: &PlayerId, ready: bool, now_ms: u64) -> Vec<Delivery> {
        if self.phase != GamePhase::Lobby {
            return Vec::new();
        }
        let Some(member) = self.members.get_mut(player_id) else {
            return Vec::new();
        };
        member.info.ready = ready;

        let mut deliveries = vec![Delivery::all(ServerMessage::PlayerUpdate { players: self.roster() })];
        let connected: Vec<&Member> = self.members.values().filter(|m| m.info.connected).collect();
        if connected.len() >= MIN_PLAYERS_TO_START && connected.iter().all(|m| m.info.ready) {
            deliveries.push(self.start(now_ms));
        }
        deliveries
    }

    fn start(&mut self, now_ms: u64) -> Delivery {
        self.phase = GamePhase::Playing;
        self.field.clear();
        self.scores = self.members.keys().map(|id| (id.clone(), 0)).collect();
        for member in self.members.values_mut() {
            member.damage = 0.0;
            member.last_stomper = None;
            member.held.clear();
            member.stats = MatchStats::default();
        }
        self.schedule_spawn(now_ms);

        let seed = self.rng.next_u64();
        let selected_map = self.leading_map().unwrap_or_else(|| DEFAULT_MAP.to_string());
        info!("Room {} starting on {} (seed {})", self.code, selected_map, seed);
        Delivery::all(ServerMessage::GameStart {
            players: self.roster(),
            selected_map,
            seed,
            mode: self.mode.clone(),
        })
    }

    fn tally(&self) -> BTreeMap<String, u32> {
        let mut tally = BTreeMap::new();
        for map in self.votes.values() {
            *tally.entry(map.clone()).or_insert(0) += 1;
        }
        tally
    }

    /// Most-voted map; ties go to the alphabetically first.
    fn leading_map(&self) -> Option<String> {
        let mut best: Option<(String, u32)> = None;
        for (map, count) in self.tally() {
            if best.as_ref().map_or(true, |(_, c)| count > *c) {
                best = Some((map, count));
            }
        }
        best.map(|(map, _)| map)
    }

    /// Record a map vote.
    pub fn vote_map(&mut self, player_id: &PlayerId, map_id: String) -> Vec<Delivery> {
        if self.phase != GamePhase::Lobby || !self.contains(player_id) {
            return Vec::new();
        }
        self.votes.insert(player_id.clone(), map_id);
        let map_name = self.leading_map().unwrap_or_else(|| DEFAULT_MAP.to_string());
        vec![Delivery::all(ServerMessage::MapVoted { map_name, votes: self.tally() })]
    }

    /// Change the mode.
    pub fn select_mode(&mut self, player_id: &PlayerId, mode: String) -> Vec<Delivery> {
        if self.phase != GamePhase::Lobby || !self.contains(player_id) {
            return Vec::new();
        }
        self.mode = mode.clone();
        vec![Delivery::all(ServerMessage::ModeSelected { mode })]
    }

    /// Back to the lobby after a match.
    pub fn rematch(&mut self, player_id: &PlayerId) -> Vec<Delivery> {
        if self.phase != GamePhase::Ended || !self.contains(player_id) {
            return Vec::new();
        }
        self.phase = GamePhase::Lobby;
        self.scores.clear();
        self.votes.clear();
        self.field.clear();
        self.next_spawn_at = None;
        for member in self.members.values_mut() {
            member.info.ready = false;
        }
        info!("Room {} back in the lobby", self.code);
        vec![Delivery::all(ServerMessage::RematchStarted { players: self.roster() })]
    }

    // =========================================================================
    // MATCH
    // =========================================================================

    /// Relay a transform.
    pub fn position(&mut self, player_id: &PlayerId, position: Vec3, velocity: Vec3, rotation: Vec3) -> Vec<Delivery> {
        if self.phase != GamePhase::Playing {
            return Vec::new();
        }
        let Some(member) = self.members.get_mut(player_id) else {
            return Vec::new();
        };
        member.position = position;
        vec![Delivery::except(
            player_id,
            ServerMessage::PlayerMoved {
                player_id: player_id.clone(),
                position: Some(position),
                velocity: Some(velocity),
                rotation: Some(rotation),
            },
        )]
    }

    /// Relay a damage total. Collision damage only ever shows up here.
    pub fn damage(&mut self, player_id: &PlayerId, damage: f64) -> Vec<Delivery> {
        if self.phase != GamePhase::Playing || !damage.is_finite() {
            return Vec::new();
        }
        let Some(member) = self.members.get_mut(player_id) else {
            return Vec::new();
        };
        if damage > member.damage {
            member.stats.damage_taken += damage - member.damage;
        }
        member.damage = damage;
        vec![Delivery::except(
            player_id,
            ServerMessage::DamageUpdate { player_id: player_id.clone(), damage },
        )]
    }

    /// Relay a stomp and remember the attacker for knockout credit.
    pub fn stomp(&mut self, attacker_id: &PlayerId, target_id: PlayerId, damage: f64) -> Vec<Delivery> {
        if self.phase != GamePhase::Playing || attacker_id == &target_id || !damage.is_finite() {
            return Vec::new();
        }
        if !self.contains(attacker_id) {
            return Vec::new();
        }
        let Some(target) = self.members.get_mut(&target_id) else {
            debug!("Stomp on unknown player {}", target_id);
            return Vec::new();
        };
        target.last_stomper = Some(attacker_id.clone());
        if let Some(attacker) = self.members.get_mut(attacker_id) {
            attacker.stats.stomps += 1;
            attacker.stats.damage_dealt += damage;
        }
        vec![Delivery::except(
            attacker_id,
            ServerMessage::Stomp { attacker_id: attacker_id.clone(), target_id, damage },
        )]
    }

    /// A player fell out. Credits their last stomper and ends the match at
    /// the win score.
    pub fn knockout(&mut self, reporter: &PlayerId, knocked_out_id: PlayerId) -> Vec<Delivery> {
        if self.phase != GamePhase::Playing {
            return Vec::new();
        }
        if reporter != &knocked_out_id {
            warn!("{} reported a knockout for {}", reporter, knocked_out_id);
            return Vec::new();
        }
        let Some(victim) = self.members.get_mut(&knocked_out_id) else {
            return Vec::new();
        };
        victim.stats.deaths += 1;
        let scorer_id = victim.last_stomper.take().filter(|id| self.members.contains_key(id));

        if let Some(scorer) = &scorer_id {
            *self.scores.entry(scorer.clone()).or_insert(0) += 1;
            if let Some(member) = self.members.get_mut(scorer) {
                member.stats.knockouts += 1;
            }
        }
        info!("{} knocked out in room {} (scorer {:?})", knocked_out_id, self.code, scorer_id);

        let mut deliveries = vec![Delivery::all(ServerMessage::Knockout {
            scorer_id: scorer_id.clone(),
            knocked_out_id,
            scores: self.scores.clone(),
        })];
        if let Some(scorer) = scorer_id {
            if self.scores.get(&scorer).copied().unwrap_or(0) >= self.config.network.win_score {
                deliveries.push(self.finish(Some(scorer)));
            }
        }
        deliveries
    }

    fn finish(&mut self, winner_id: Option<PlayerId>) -> Delivery {
        self.phase = GamePhase::Ended;
        self.next_spawn_at = None;
        self.field.clear();
        info!("Room {} finished, winner {:?}", self.code, winner_id);
        Delivery::all(ServerMessage::GameOver {
            winner_id,
            scores: self.scores.clone(),
            stats: self.members.iter().map(|(id, m)| (id.clone(), m.stats.clone())).collect(),
        })
    }

    /// First claim wins; later claims for the same id are ignored.
    pub fn collect(&mut self, player_id: &PlayerId, powerup_id: PowerupId) -> Vec<Delivery> {
        if self.phase != GamePhase::Playing || !self.contains(player_id) {
            return Vec::new();
        }
        let Some(instance) = self.field.remove(&powerup_id) else {
            debug!("Late claim for power-up {} by {}", powerup_id, player_id);
            return Vec::new();
        };
        if let Some(member) = self.members.get_mut(player_id) {
            if instance.kind.class() == PowerupClass::Usable {
                member.held.insert(powerup_id.clone(), instance.kind);
            }
        }
        vec![
            Delivery::all(ServerMessage::PowerupCollected {
                powerup_id: powerup_id.clone(),
                player_id: player_id.clone(),
            }),
            Delivery::all(ServerMessage::PowerupRemoved { powerup_id }),
        ]
    }

    /// Validate a use against what the player picked up.
    pub fn use_powerup(
        &mut self,
        player_id: &PlayerId,
        powerup_id: PowerupId,
        target_position: Vec3,
        target_id: Option<PlayerId>,
    ) -> Vec<Delivery> {
        let playing = self.phase == GamePhase::Playing;
        let Some(member) = self.members.get_mut(player_id) else {
            return Vec::new();
        };
        let held = if playing { member.held.remove(&powerup_id) } else { None };
        let Some(kind) = held else {
            debug!("Rejecting use of {} by {}", powerup_id, player_id);
            return vec![Delivery::only(player_id, ServerMessage::PowerupRejected { powerup_id })];
        };
        member.stats.powerups_used += 1;
        vec![Delivery::all(ServerMessage::PowerupUsed {
            player_id: player_id.clone(),
            powerup_id,
            kind,
            origin: member.position,
            target_position,
            target_id,
        })]
    }

    /// Fold a client's own match summary into the relay's stats.
    pub fn report_game_end(&mut self, player_id: &PlayerId, stats: MatchStats) -> Vec<Delivery> {
        let Some(member) = self.members.get_mut(player_id) else {
            return Vec::new();
        };
        member.stats.damage_dealt = member.stats.damage_dealt.max(stats.damage_dealt);
        member.stats.damage_taken = member.stats.damage_taken.max(stats.damage_taken);
        debug!("{} reported {:?}", player_id, stats);
        Vec::new()
    }

    // =========================================================================
    // CLOCK
    // =========================================================================

    fn schedule_spawn(&mut self, now_ms: u64) {
        let powerups = &self.config.powerups;
        let delay = self
            .rng
            .next_u64_range(powerups.min_spawn_interval_ms, powerups.max_spawn_interval_ms);
        self.next_spawn_at = Some(now_ms + delay);
    }

    /// Periodic work: rejoin expiry and power-up spawns.
    pub fn tick(&mut self, now_ms: u64) -> Vec<Delivery> {
        let mut deliveries = self.expire_dropped(now_ms);
        if self.phase != GamePhase::Playing {
            return deliveries;
        }
        if self.members.values().all(|m| !m.info.connected) {
            return deliveries;
        }
        if let Some(at) = self.next_spawn_at {
            if now_ms >= at {
                if self.field.len() < self.config.powerups.max_on_field {
                    deliveries.push(self.spawn_powerup(now_ms));
                }
                self.schedule_spawn(now_ms);
            }
        }
        deliveries
    }

    fn spawn_powerup(&mut self, now_ms: u64) -> Delivery {
        self.spawned += 1;
        let id = PowerupId::new(format!("{}-{}", self.code, self.spawned));
        let kind = self.rng.choose(&PowerupKind::ALL).copied().unwrap_or(PowerupKind::SpeedBoost);
        let [extent_x, extent_z] = self.config.powerups.spawn_extent;
        let position = Vec3::new(
            (self.rng.next_f64() - 0.5) * extent_x,
            self.config.powerups.spawn_height,
            (self.rng.next_f64() - 0.5) * extent_z,
        );
        self.field.spawn(id.clone(), kind, position, now_ms);
        debug!("Room {} spawned {:?} as {}", self.code, kind, id);
        Delivery::all(ServerMessage::PowerupSpawned { id, kind, position })
    }
}

// =============================================================================
// ROOM MANAGER
// =============================================================================

/// Every room on the relay plus the player to room index.
#[derive(Debug)]
pub struct RoomManager {
    config: Arc<GameConfig>,
    rooms: BTreeMap<String, RelayRoom>,
    membership: BTreeMap<PlayerId, String>,
    rng: DeterministicRng,
}

impl RoomManager {
    /// No rooms yet.
    pub fn new(config: Arc<GameConfig>, seed: u64) -> Self {
        Self {
            config,
            rooms: BTreeMap::new(),
            membership: BTreeMap::new(),
            rng: DeterministicRng::new(seed),
        }
    }

    /// Room by code.
    pub fn room(&self, code: &str) -> Option<&RelayRoom> {
        self.rooms.get(code)
    }

    /// Code of the room a player is seated in.
    pub fn room_of(&self, player_id: &PlayerId) -> Option<&str> {
        self.membership.get(player_id).map(String::as_str)
    }

    /// Live rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    fn fresh_code(&mut self) -> String {
        loop {
            let code: String = (0..ROOM_CODE_LEN)
                .map(|_| CODE_ALPHABET[self.rng.next_index(CODE_ALPHABET.len())] as char)
                .collect();
            if !self.rooms.contains_key(&code) {
                return code;
            }
        }
    }

    fn error(player_id: &PlayerId, err: RoomError) -> Vec<Outbound> {
        vec![(player_id.clone(), ServerMessage::RoomError { error: err.to_string() })]
    }

    /// Handle one client message. `RejoinRoom` is routed through
    /// [`RoomManager::rejoin`] by the caller, since it changes the
    /// connection's identity.
    pub fn handle(&mut self, player_id: &PlayerId, message: ClientMessage, now_ms: u64) -> Vec<Outbound> {
        match message {
            ClientMessage::CreateRoom { player_name } => self.create_room(player_id, &player_name),
            ClientMessage::JoinRoom { room_code, player_name } => {
                self.join_room(player_id, &room_code, &player_name)
            }
            ClientMessage::QuickJoin { player_name } => self.quick_join(player_id, &player_name),
            ClientMessage::RejoinRoom { room_code, player_id: resumed } => {
                match self.rejoin(&resumed, &room_code, now_ms) {
                    Ok(out) => out,
                    Err(err) => Self::error(player_id, err),
                }
            }
            ClientMessage::LeaveRoom => self.leave(player_id),
            other => self.in_room(player_id, other, now_ms),
        }
    }

    /// Open a room and seat the creator.
    pub fn create_room(&mut self, player_id: &PlayerId, player_name: &str) -> Vec<Outbound> {
        let mut out = self.leave(player_id);
        let code = self.fresh_code();
        let seed = self.rng.next_u64();
        let mut room = RelayRoom::new(code.clone(), self.config.clone(), seed);
        match room.join(player_id, player_name) {
            Ok(deliveries) => {
                out.extend(room.resolve(deliveries));
                self.membership.insert(player_id.clone(), code.clone());
                self.rooms.insert(code, room);
            }
            Err(err) => out.extend(Self::error(player_id, err)),
        }
        out
    }

    /// Seat a player in an existing room. Codes are case-insensitive.
    pub fn join_room(&mut self, player_id: &PlayerId, room_code: &str, player_name: &str) -> Vec<Outbound> {
        let code = room_code.trim().to_uppercase();
        match self.rooms.get(&code) {
            None => return Self::error(player_id, RoomError::NotFound(code)),
            Some(room) if room.contains(player_id) => return Vec::new(),
            Some(room) if room.phase() != GamePhase::Lobby => {
                return Self::error(player_id, RoomError::InProgress)
            }
            Some(room) if !room.is_open() => return Self::error(player_id, RoomError::Full),
            Some(_) => {}
        }

        let mut out = self.leave(player_id);
        let Some(room) = self.rooms.get_mut(&code) else {
            return Self::error(player_id, RoomError::NotFound(code));
        };
        match room.join(player_id, player_name) {
            Ok(deliveries) => {
                out.extend(room.resolve(deliveries));
                self.membership.insert(player_id.clone(), code);
            }
            Err(err) => out.extend(Self::error(player_id, err)),
        }
        out
    }

    /// Join the first open lobby, or open a new one.
    pub fn quick_join(&mut self, player_id: &PlayerId, player_name: &str) -> Vec<Outbound> {
        let open = self
            .rooms
            .values()
            .find(|room| room.is_open() && !room.contains(player_id))
            .map(|room| room.code().to_string());
        match open {
            Some(code) => self.join_room(player_id, &code, player_name),
            None => self.create_room(player_id, player_name),
        }
    }

    /// Resume a held seat.
    pub fn rejoin(&mut self, player_id: &PlayerId, room_code: &str, now_ms: u64) -> Result<Vec<Outbound>, RoomError> {
        let code = room_code.trim().to_uppercase();
        let room = self.rooms.get_mut(&code).ok_or_else(|| RoomError::NotFound(code.clone()))?;
        let deliveries = room.rejoin(player_id, now_ms)?;
        self.membership.insert(player_id.clone(), code);
        Ok(room.resolve(deliveries))
    }

    /// Leave the current room, if any. Empty rooms are closed.
    pub fn leave(&mut self, player_id: &PlayerId) -> Vec<Outbound> {
        let Some(code) = self.membership.remove(player_id) else {
            return Vec::new();
        };
        let Some(room) = self.rooms.get_mut(&code) else {
            return Vec::new();
        };
        let deliveries = room.leave(player_id);
        let out = room.resolve(deliveries);
        if room.is_empty() {
            info!("Closing empty room {}", code);
            self.rooms.remove(&code);
        }
        out
    }

    /// Transport dropped for a player.
    pub fn disconnect(&mut self, player_id: &PlayerId, now_ms: u64) -> Vec<Outbound> {
        let Some(code) = self.membership.get(player_id).cloned() else {
            return Vec::new();
        };
        let Some(room) = self.rooms.get_mut(&code) else {
            return Vec::new();
        };
        let deliveries = room.disconnect(player_id, now_ms);
        let out = room.resolve(deliveries);
        if !room.contains(player_id) {
            self.membership.remove(player_id);
        }
        if room.is_empty() {
            info!("Closing empty room {}", code);
            self.rooms.remove(&code);
        }
        out
    }

    fn in_room(&mut self, player_id: &PlayerId, message: ClientMessage, now_ms: u64) -> Vec<Outbound> {
        let Some(code) = self.membership.get(player_id) else {
            debug!("Dropping message from {} outside any room", player_id);
            return Vec::new();
        };
        let Some(room) = self.rooms.get_mut(code) else {
            return Vec::new();
        };
        let deliveries = match message {
            ClientMessage::PlayerReady { ready, .. } => room.set_ready(player_id, ready, now_ms),
            ClientMessage::VoteMap { map_id } => room.vote_map(player_id, map_id),
            ClientMessage::SelectMode { mode } => room.select_mode(player_id, mode),
            ClientMessage::PlayerPosition { position, velocity, rotation } => {
                room.position(player_id, position, velocity, rotation)
            }
            ClientMessage::PlayerKnockout { knocked_out_id } => room.knockout(player_id, knocked_out_id),
            ClientMessage::ReportStomp { target_id, damage } => room.stomp(player_id, target_id, damage),
            ClientMessage::PlayerDamage { damage } => room.damage(player_id, damage),
            ClientMessage::PowerupCollected { powerup_id } => room.collect(player_id, powerup_id),
            ClientMessage::UsePowerup { powerup_id, target_position, target_id } => {
                room.use_powerup(player_id, powerup_id, target_position, target_id)
            }
            ClientMessage::ReportGameEnd { stats, .. } => room.report_game_end(player_id, stats),
            ClientMessage::RequestRematch => room.rematch(player_id),
            ClientMessage::CreateRoom { .. }
            | ClientMessage::JoinRoom { .. }
            | ClientMessage::QuickJoin { .. }
            | ClientMessage::RejoinRoom { .. }
            | ClientMessage::LeaveRoom => Vec::new(),
        };
        room.resolve(deliveries)
    }

    /// Periodic work for every room. Rooms emptied by expiry are closed.
    pub fn tick(&mut self, now_ms: u64) -> Vec<Outbound> {
        let mut out = Vec::new();
        for room in self.rooms.values_mut() {
            let deliveries = room.tick(now_ms);
            out.extend(room.resolve(deliveries));
        }
        let rooms = &self.rooms;
        self.membership
            .retain(|id, code| rooms.get(code).map_or(false, |room| room.contains(id)));
        self.rooms.retain(|code, room| {
            if room.is_empty() {
                info!("Closing empty room {}", code);
            }
            !room.is_empty()
        });
        out
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> RoomManager {
        RoomManager::new(Arc::new(GameConfig::default()), 7)
    }

    fn id(s: &str) -> PlayerId {
        PlayerId::from(s)
    }

    fn messages_for<'a>(out: &'a [Outbound], player: &str) -> Vec<&'a ServerMessage> {
        out.iter().filter(|(to, _)| to.as_str() == player).map(|(_, m)| m).collect()
    }

    /// Two players in a started match. Returns the room code.
    fn started(rooms: &mut RoomManager) -> String {
        rooms.create_room(&id("a"), "Ada");
        let code = rooms.room_of(&id("a")).unwrap().to_string();
        rooms.join_room(&id("b"), &code, "Bo");
        rooms.handle(&id("a"), ClientMessage::PlayerReady { ready: true, loadout: Vec::new() }, 0);
        let out = rooms.handle(&id("b"), ClientMessage::PlayerReady { ready: true, loadout: Vec::new() }, 0);
        assert!(out.iter().any(|(_, m)| matches!(m, ServerMessage::GameStart { .. })));
        code
    }

    fn spawn_until(rooms: &mut RoomManager, code: &str, kind: PowerupKind) -> PowerupId {
        let mut now = 0;
        loop {
            now += 1_000;
            for (_, message) in rooms.tick(now) {
                if let ServerMessage::PowerupSpawned { id, kind: k, .. } = message {
                    if k == kind {
                        return id;
                    }
                    // Clear the field so spawning continues
                    let room = rooms.rooms.get_mut(code).unwrap();
                    room.field.remove(&id);
                }
            }
            assert!(now < 10_000_000, "never spawned {:?}", kind);
        }
    }

    #[test]
    fn test_create_and_join() {
        let mut rooms = manager();
        let out = rooms.create_room(&id("a"), "Ada");
        let code = match &out[..] {
            [(to, ServerMessage::RoomJoined { room_code, player_index: 0, color, .. })] => {
                assert_eq!(to, &id("a"));
                assert_eq!(color, PLAYER_COLORS[0]);
                room_code.clone()
            }
            other => panic!("unexpected: {:?}", other),
        };
        assert_eq!(code.len(), ROOM_CODE_LEN);

        let out = rooms.join_room(&id("b"), &code.to_lowercase(), "Bo");
        assert!(matches!(
            messages_for(&out, "b")[..],
            [ServerMessage::RoomJoined { player_index: 1, .. }]
        ));
        assert!(matches!(messages_for(&out, "a")[..], [ServerMessage::PlayerJoined { .. }]));
        assert_eq!(rooms.room(&code).unwrap().roster().len(), 2);
    }

    #[test]
    fn test_join_errors() {
        let mut rooms = manager();
        let out = rooms.join_room(&id("a"), "ZZZZ", "Ada");
        assert_eq!(
            out,
            vec![(id("a"), ServerMessage::RoomError { error: "Room ZZZZ not found".into() })]
        );

        rooms.create_room(&id("p0"), "p0");
        let code = rooms.room_of(&id("p0")).unwrap().to_string();
        for i in 1..4 {
            rooms.join_room(&id(&format!("p{}", i)), &code, "p");
        }
        let out = rooms.join_room(&id("late"), &code, "Late");
        assert_eq!(out, vec![(id("late"), ServerMessage::RoomError { error: "Room is full".into() })]);
    }

    #[test]
    fn test_quick_join_fills_open_room() {
        let mut rooms = manager();
        rooms.quick_join(&id("a"), "Ada");
        rooms.quick_join(&id("b"), "Bo");
        assert_eq!(rooms.room_count(), 1);
        assert_eq!(rooms.room_of(&id("a")), rooms.room_of(&id("b")));
    }

    #[test]
    fn test_start_needs_everyone_ready() {
        let mut rooms = manager();
        rooms.create_room(&id("a"), "Ada");
        let code = rooms.room_of(&id("a")).unwrap().to_string();

        // Alone: ready is broadcast but nothing starts
        let out = rooms.handle(&id("a"), ClientMessage::PlayerReady { ready: true, loadout: Vec::new() }, 0);
        assert!(!out.iter().any(|(_, m)| matches!(m, ServerMessage::GameStart { .. })));

        rooms.join_room(&id("b"), &code, "Bo");
        rooms.handle(&id("a"), ClientMessage::VoteMap { map_id: "ICE".into() }, 0);
        let out = rooms.handle(&id("b"), ClientMessage::PlayerReady { ready: true, loadout: Vec::new() }, 0);
        let starts: Vec<_> = out
            .iter()
            .filter_map(|(to, m)| match m {
                ServerMessage::GameStart { seed, selected_map, .. } => Some((to.clone(), *seed, selected_map.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(starts.len(), 2);
        assert_eq!(starts[0].1, starts[1].1);
        assert_eq!(starts[0].2, "ICE");
        assert_eq!(rooms.room(&code).unwrap().phase(), GamePhase::Playing);

        let out = rooms.join_room(&id("c"), &code, "Cy");
        assert_eq!(out, vec![(id("c"), ServerMessage::RoomError { error: "Game already in progress".into() })]);
    }

    #[test]
    fn test_positions_relay_to_others_only() {
        let mut rooms = manager();
        started(&mut rooms);
        let out = rooms.handle(
            &id("a"),
            ClientMessage::PlayerPosition { position: Vec3::new(1.0, 0.5, 0.0), velocity: Vec3::ZERO, rotation: Vec3::ZERO },
            10,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, id("b"));
        assert!(matches!(out[0].1, ServerMessage::PlayerMoved { position: Some(_), .. }));
    }

    #[test]
    fn test_knockout_credits_last_stomper_and_ends_at_win_score() {
        let mut rooms = manager();
        let code = started(&mut rooms);

        // Unassisted fall scores nobody
        let out = rooms.handle(&id("b"), ClientMessage::PlayerKnockout { knocked_out_id: id("b") }, 10);
        assert!(matches!(&out[0].1, ServerMessage::Knockout { scorer_id: None, .. }));

        for round in 1..=5u32 {
            rooms.handle(&id("a"), ClientMessage::ReportStomp { target_id: id("b"), damage: 12.0 }, 20);
            let out = rooms.handle(&id("b"), ClientMessage::PlayerKnockout { knocked_out_id: id("b") }, 30);
            match &out[0].1 {
                ServerMessage::Knockout { scorer_id, scores, .. } => {
                    assert_eq!(scorer_id.as_ref(), Some(&id("a")));
                    assert_eq!(scores.get(&id("a")), Some(&round));
                }
                other => panic!("unexpected: {:?}", other),
            }
            let over = out.iter().find_map(|(_, m)| match m {
                ServerMessage::GameOver { winner_id, stats, .. } => Some((winner_id.clone(), stats.clone())),
                _ => None,
            });
            if round < 5 {
                assert!(over.is_none());
            } else {
                let (winner, stats) = over.unwrap();
                assert_eq!(winner, Some(id("a")));
                assert_eq!(stats[&id("a")].knockouts, 5);
                assert_eq!(stats[&id("a")].stomps, 5);
                assert_eq!(stats[&id("b")].deaths, 6);
            }
        }
        assert_eq!(rooms.room(&code).unwrap().phase(), GamePhase::Ended);

        let out = rooms.handle(&id("b"), ClientMessage::RequestRematch, 40);
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0].1, ServerMessage::RematchStarted { .. }));
        let room = rooms.room(&code).unwrap();
        assert_eq!(room.phase(), GamePhase::Lobby);
        assert!(room.scores().is_empty());
    }

    #[test]
    fn test_knockout_only_self_reported() {
        let mut rooms = manager();
        started(&mut rooms);
        let out = rooms.handle(&id("a"), ClientMessage::PlayerKnockout { knocked_out_id: id("b") }, 10);
        assert!(out.is_empty());
    }

    #[test]
    fn test_first_claim_wins() {
        let mut rooms = manager();
        let code = started(&mut rooms);
        let powerup = spawn_until(&mut rooms, &code, PowerupKind::Rocket);

        let out = rooms.handle(&id("b"), ClientMessage::PowerupCollected { powerup_id: powerup.clone() }, 0);
        assert_eq!(messages_for(&out, "a").len(), 2);
        assert!(matches!(
            messages_for(&out, "a")[0],
            ServerMessage::PowerupCollected { player_id, .. } if player_id == &id("b")
        ));

        let out = rooms.handle(&id("a"), ClientMessage::PowerupCollected { powerup_id: powerup }, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn test_use_validated_against_holdings() {
        let mut rooms = manager();
        let code = started(&mut rooms);
        let powerup = spawn_until(&mut rooms, &code, PowerupKind::GlueShot);

        // Not held yet
        let out = rooms.handle(
            &id("a"),
            ClientMessage::UsePowerup { powerup_id: powerup.clone(), target_position: Vec3::ZERO, target_id: None },
            0,
        );
        assert_eq!(out, vec![(id("a"), ServerMessage::PowerupRejected { powerup_id: powerup.clone() })]);

        rooms.handle(&id("a"), ClientMessage::PowerupCollected { powerup_id: powerup.clone() }, 0);
        rooms.handle(
            &id("a"),
            ClientMessage::PlayerPosition { position: Vec3::new(2.0, 0.5, 1.0), velocity: Vec3::ZERO, rotation: Vec3::ZERO },
            0,
        );
        let out = rooms.handle(
            &id("a"),
            ClientMessage::UsePowerup { powerup_id: powerup.clone(), target_position: Vec3::ZERO, target_id: Some(id("b")) },
            0,
        );
        assert_eq!(out.len(), 2);
        assert!(matches!(
            &out[0].1,
            ServerMessage::PowerupUsed { kind: PowerupKind::GlueShot, origin, .. } if *origin == Vec3::new(2.0, 0.5, 1.0)
        ));

        // Second use of the same instance
        let out = rooms.handle(
            &id("a"),
            ClientMessage::UsePowerup { powerup_id: powerup.clone(), target_position: Vec3::ZERO, target_id: None },
            0,
        );
        assert_eq!(out, vec![(id("a"), ServerMessage::PowerupRejected { powerup_id: powerup })]);
    }

    #[test]
    fn test_spawns_respect_interval_and_cap() {
        let mut rooms = manager();
        let code = started(&mut rooms);
        assert!(rooms.tick(5_999).is_empty());

        let mut spawned = 0;
        for step in 1..=200u64 {
            spawned += rooms
                .tick(step * 1_000)
                .iter()
                .filter(|(to, m)| to == &id("a") && matches!(m, ServerMessage::PowerupSpawned { .. }))
                .count();
        }
        assert_eq!(spawned, 4);
        assert_eq!(rooms.room(&code).unwrap().powerups_on_field(), 4);
    }

    #[test]
    fn test_spawn_positions_within_extent() {
        let mut rooms = manager();
        started(&mut rooms);
        for step in 1..=100u64 {
            for (_, message) in rooms.tick(step * 1_000) {
                if let ServerMessage::PowerupSpawned { position, .. } = message {
                    assert!(position.x.abs() <= 8.0);
                    assert!(position.z.abs() <= 5.0);
                    assert_eq!(position.y, 1.5);
                }
            }
        }
    }

    #[test]
    fn test_disconnect_grace_and_rejoin() {
        let mut rooms = manager();
        let code = started(&mut rooms);

        let out = rooms.disconnect(&id("b"), 1_000);
        assert!(matches!(messages_for(&out, "a")[..], [ServerMessage::PlayerUpdate { .. }]));
        assert_eq!(rooms.room_of(&id("b")), Some(code.as_str()));

        // Nothing reaches a dropped player
        let out = rooms.handle(
            &id("a"),
            ClientMessage::PlayerPosition { position: Vec3::ZERO, velocity: Vec3::ZERO, rotation: Vec3::ZERO },
            1_500,
        );
        assert!(out.is_empty());

        let out = rooms.rejoin(&id("b"), &code, 20_000).unwrap();
        assert!(matches!(
            messages_for(&out, "b")[..],
            [ServerMessage::SessionResumed { phase: GamePhase::Playing, .. }]
        ));

        rooms.disconnect(&id("b"), 21_000);
        assert_eq!(rooms.rejoin(&id("b"), &code, 60_000), Err(RoomError::SessionExpired));

        let out = rooms.tick(60_000);
        assert!(out.iter().any(|(to, m)| to == &id("a")
            && matches!(m, ServerMessage::PlayerLeft { player_id } if player_id == &id("b"))));
        assert_eq!(rooms.room_of(&id("b")), None);
    }

    #[test]
    fn test_lobby_disconnect_holds_seat_for_rejoin() {
        let mut rooms = manager();
        rooms.create_room(&id("a"), "Ada");
        let code = rooms.room_of(&id("a")).unwrap().to_string();
        rooms.join_room(&id("b"), &code, "Bo");

        rooms.disconnect(&id("a"), 0);
        assert_eq!(rooms.room(&code).unwrap().len(), 2);
        assert_eq!(rooms.room_of(&id("a")), Some(code.as_str()));

        let out = rooms.rejoin(&id("a"), &code, 1).unwrap();
        assert!(matches!(
            messages_for(&out, "a")[..],
            [ServerMessage::SessionResumed { phase: GamePhase::Lobby, player_index: 0, room_code, .. }]
                if room_code == &code
        ));
        assert!(matches!(messages_for(&out, "b")[..], [ServerMessage::PlayerUpdate { .. }]));
    }

    #[test]
    fn test_lobby_seat_freed_after_grace_and_empty_room_closed() {
        let mut rooms = manager();
        rooms.create_room(&id("a"), "Ada");
        let code = rooms.room_of(&id("a")).unwrap().to_string();
        rooms.join_room(&id("b"), &code, "Bo");

        rooms.disconnect(&id("b"), 0);
        rooms.handle(&id("a"), ClientMessage::LeaveRoom, 0);
        assert_eq!(rooms.room_count(), 1);

        rooms.tick(30_001);
        assert_eq!(rooms.room_of(&id("b")), None);
        assert_eq!(rooms.room_count(), 0);
    }

    #[test]
    fn test_rejoin_refused_while_seat_connected() {
        let mut rooms = manager();
        let code = started(&mut rooms);
        assert_eq!(rooms.rejoin(&id("b"), &code, 10), Err(RoomError::SeatConnected));
        assert!(rooms.room(&code).unwrap().roster().iter().all(|p| p.connected));
    }

    #[test]
    fn test_gameplay_outside_room_dropped() {
        let mut rooms = manager();
        let out = rooms.handle(&id("a"), ClientMessage::PlayerDamage { damage: 10.0 }, 0);
        assert!(out.is_empty());
    }
}
