//! Protocol Messages
//!
//! Wire format between clients and the relay over WebSocket. Every message
//! is a JSON object whose `type` field names the event, with camelCase
//! payload fields. Vectors travel as `[x, y, z]` arrays.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::Vec3;
use crate::game::powerup::{PowerupId, PowerupKind};
use crate::game::state::PlayerId;

/// Scores keyed by player.
pub type Scores = BTreeMap<PlayerId, u32>;

/// Wire (de)serialization failure.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Malformed or unknown JSON message.
    #[error("Invalid message: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// CLIENT -> RELAY MESSAGES
// =============================================================================

/// Messages sent from a client to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Open a new room and join it.
    #[serde(rename_all = "camelCase")]
    CreateRoom {
        /// Display name.
        player_name: String,
    },

    /// Join a room by code.
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        /// Join code.
        room_code: String,
        /// Display name.
        player_name: String,
    },

    /// Join any open lobby, or open one.
    #[serde(rename_all = "camelCase")]
    QuickJoin {
        /// Display name.
        player_name: String,
    },

    /// Resume a session after the transport dropped.
    #[serde(rename_all = "camelCase")]
    RejoinRoom {
        /// Room joined before the drop.
        room_code: String,
        /// Identity assigned before the drop.
        player_id: PlayerId,
    },

    /// Leave the current room.
    LeaveRoom,

    /// Toggle lobby readiness.
    #[serde(rename_all = "camelCase")]
    PlayerReady {
        /// Ready flag.
        ready: bool,
        /// Chosen starting power-ups, cosmetic for the relay.
        #[serde(default)]
        loadout: Vec<PowerupKind>,
    },

    /// Vote for the next map.
    #[serde(rename_all = "camelCase")]
    VoteMap {
        /// Map identifier.
        map_id: String,
    },

    /// Pick the game mode.
    #[serde(rename_all = "camelCase")]
    SelectMode {
        /// Mode name.
        mode: String,
    },

    /// Local transform, sent every tick while playing.
    #[serde(rename_all = "camelCase")]
    PlayerPosition {
        /// Position.
        position: Vec3,
        /// Velocity.
        velocity: Vec3,
        /// Orientation.
        rotation: Vec3,
    },

    /// The sender fell out of the arena.
    #[serde(rename_all = "camelCase")]
    PlayerKnockout {
        /// Knocked-out player (the sender).
        knocked_out_id: PlayerId,
    },

    /// The sender stomped someone.
    #[serde(rename_all = "camelCase")]
    ReportStomp {
        /// Victim.
        target_id: PlayerId,
        /// Damage dealt.
        damage: f64,
    },

    /// The sender's damage total.
    #[serde(rename_all = "camelCase")]
    PlayerDamage {
        /// Accumulated damage.
        damage: f64,
    },

    /// The sender touched a power-up.
    #[serde(rename_all = "camelCase")]
    PowerupCollected {
        /// Instance.
        powerup_id: PowerupId,
    },

    /// The sender fired a held power-up.
    #[serde(rename_all = "camelCase")]
    UsePowerup {
        /// Instance the item came from.
        powerup_id: PowerupId,
        /// Aim point.
        target_position: Vec3,
        /// Aimed-at player.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_id: Option<PlayerId>,
    },

    /// Match summary from the sender's point of view.
    #[serde(rename_all = "camelCase")]
    ReportGameEnd {
        /// Winner, if any.
        winner_id: Option<PlayerId>,
        /// Final scores as seen locally.
        scores: Scores,
        /// The sender's own stats.
        stats: MatchStats,
    },

    /// Back to the lobby with scores reset.
    RequestRematch,
}

/// Per-player match statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MatchStats {
    /// Opponents knocked out.
    pub knockouts: u32,
    /// Times fallen off.
    pub deaths: u32,
    /// Stomps landed.
    pub stomps: u32,
    /// Damage dealt to others.
    pub damage_dealt: f64,
    /// Damage received.
    pub damage_taken: f64,
    /// Power-ups used.
    pub powerups_used: u32,
}

// =============================================================================
// RELAY -> CLIENT MESSAGES
// =============================================================================

/// Lobby view of a room member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPlayer {
    /// Identity.
    pub id: PlayerId,
    /// Display name.
    pub name: String,
    /// Color tag.
    pub color: String,
    /// Seat, picks the spawn point.
    pub player_index: usize,
    /// Lobby readiness.
    #[serde(default)]
    pub ready: bool,
    /// Still connected.
    #[serde(default = "connected_default")]
    pub connected: bool,
}

fn connected_default() -> bool {
    true
}

/// Room phase as the relay sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GamePhase {
    /// Waiting for players.
    Lobby,
    /// Match running.
    Playing,
    /// Match over, waiting for a rematch.
    Ended,
}

/// Messages sent from the relay to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Reply to create/join/quick join.
    #[serde(rename_all = "camelCase")]
    RoomJoined {
        /// Join code.
        room_code: String,
        /// Assigned identity.
        player_id: PlayerId,
        /// Assigned color.
        color: String,
        /// Assigned seat.
        player_index: usize,
        /// Everyone in the room.
        players: Vec<RoomPlayer>,
    },

    /// Create/join/rejoin refused.
    #[serde(rename_all = "camelCase")]
    RoomError {
        /// Reason.
        error: String,
    },

    /// Reply to a successful rejoin.
    #[serde(rename_all = "camelCase")]
    SessionResumed {
        /// Join code.
        room_code: String,
        /// Identity, unchanged.
        player_id: PlayerId,
        /// Color, unchanged.
        color: String,
        /// Seat, unchanged.
        player_index: usize,
        /// Everyone in the room.
        players: Vec<RoomPlayer>,
        /// Where the room is now.
        phase: GamePhase,
        /// Current scores.
        scores: Scores,
    },

    /// Room roster changed.
    #[serde(rename_all = "camelCase")]
    PlayerUpdate {
        /// Everyone in the room.
        players: Vec<RoomPlayer>,
    },

    /// Someone joined.
    #[serde(rename_all = "camelCase")]
    PlayerJoined {
        /// Newcomer.
        player: RoomPlayer,
    },

    /// Someone left for good.
    #[serde(rename_all = "camelCase")]
    PlayerLeft {
        /// Leaver.
        player_id: PlayerId,
    },

    /// Match starts. Seed and map are authoritative.
    #[serde(rename_all = "camelCase")]
    GameStart {
        /// Everyone playing.
        players: Vec<RoomPlayer>,
        /// Winning map vote.
        selected_map: String,
        /// Arena generation seed.
        seed: u64,
        /// Game mode.
        mode: String,
    },

    /// Map vote tally changed.
    #[serde(rename_all = "camelCase")]
    MapVoted {
        /// Current leader.
        map_name: String,
        /// Votes per map.
        votes: BTreeMap<String, u32>,
    },

    /// Mode changed.
    #[serde(rename_all = "camelCase")]
    ModeSelected {
        /// Mode name.
        mode: String,
    },

    /// Another player's transform. Missing fields mean "unchanged".
    #[serde(rename_all = "camelCase")]
    PlayerMoved {
        /// Mover.
        player_id: PlayerId,
        /// Position.
        #[serde(default)]
        position: Option<Vec3>,
        /// Velocity.
        #[serde(default)]
        velocity: Option<Vec3>,
        /// Orientation.
        #[serde(default)]
        rotation: Option<Vec3>,
    },

    /// Someone was knocked out.
    #[serde(rename_all = "camelCase")]
    Knockout {
        /// Credited player, if any.
        scorer_id: Option<PlayerId>,
        /// Victim.
        knocked_out_id: PlayerId,
        /// Updated scores.
        scores: Scores,
    },

    /// Someone stomped someone.
    #[serde(rename_all = "camelCase")]
    Stomp {
        /// Attacker.
        attacker_id: PlayerId,
        /// Victim.
        target_id: PlayerId,
        /// Damage.
        damage: f64,
    },

    /// A player's damage total.
    #[serde(rename_all = "camelCase")]
    DamageUpdate {
        /// Player.
        player_id: PlayerId,
        /// Accumulated damage.
        damage: f64,
    },

    /// New power-up on the field.
    #[serde(rename_all = "camelCase")]
    PowerupSpawned {
        /// Instance.
        id: PowerupId,
        /// Kind.
        kind: PowerupKind,
        /// Position.
        position: Vec3,
    },

    /// Power-up gone from the field.
    #[serde(rename_all = "camelCase")]
    PowerupRemoved {
        /// Instance.
        powerup_id: PowerupId,
    },

    /// Pickup confirmed for one player.
    #[serde(rename_all = "camelCase")]
    PowerupCollected {
        /// Instance.
        powerup_id: PowerupId,
        /// Winner of the claim.
        player_id: PlayerId,
    },

    /// A held power-up was fired. Also sent back to the user as confirmation.
    #[serde(rename_all = "camelCase")]
    PowerupUsed {
        /// User.
        player_id: PlayerId,
        /// Instance.
        powerup_id: PowerupId,
        /// Kind.
        kind: PowerupKind,
        /// User's position when firing.
        origin: Vec3,
        /// Aim point.
        target_position: Vec3,
        /// Aimed-at player.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_id: Option<PlayerId>,
    },

    /// Use refused (not held, or already used).
    #[serde(rename_all = "camelCase")]
    PowerupRejected {
        /// Instance.
        powerup_id: PowerupId,
    },

    /// Match over.
    #[serde(rename_all = "camelCase")]
    GameOver {
        /// Winner, if any.
        winner_id: Option<PlayerId>,
        /// Final scores.
        scores: Scores,
        /// Per-player stats.
        #[serde(default)]
        stats: BTreeMap<PlayerId, MatchStats>,
    },

    /// Someone asked for a rematch; the room is back in the lobby.
    #[serde(rename_all = "camelCase")]
    RematchStarted {
        /// Everyone in the room, all unready.
        players: Vec<RoomPlayer>,
    },
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from JSON.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(s)?)
    }

    /// True for messages only meaningful during a match.
    pub fn is_gameplay(&self) -> bool {
        matches!(
            self,
            ClientMessage::PlayerPosition { .. }
                | ClientMessage::PlayerKnockout { .. }
                | ClientMessage::ReportStomp { .. }
                | ClientMessage::PlayerDamage { .. }
                | ClientMessage::PowerupCollected { .. }
                | ClientMessage::UsePowerup { .. }
        )
    }
}

impl ServerMessage {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from JSON.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_shape() {
        let msg = ClientMessage::PlayerPosition {
            position: Vec3::new(1.0, 2.0, 3.0),
            velocity: Vec3::ZERO,
            rotation: Vec3::ZERO,
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"playerPosition\""));
        assert!(json.contains("\"position\":[1.0,2.0,3.0]"));
        assert_eq!(ClientMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_camel_case_fields() {
        let json = r#"{"type":"joinRoom","roomCode":"ABCD","playerName":"Ada"}"#;
        let msg = ClientMessage::from_json(json).unwrap();
        assert_eq!(
            msg,
            ClientMessage::JoinRoom { room_code: "ABCD".into(), player_name: "Ada".into() }
        );

        let json = ServerMessage::Knockout {
            scorer_id: None,
            knocked_out_id: PlayerId::from("p2"),
            scores: Scores::new(),
        }
        .to_json()
        .unwrap();
        assert!(json.contains("\"knockedOutId\":\"p2\""));
        assert!(json.contains("\"scorerId\":null"));
    }

    #[test]
    fn test_unit_variants() {
        let json = ClientMessage::RequestRematch.to_json().unwrap();
        assert_eq!(json, r#"{"type":"requestRematch"}"#);
        assert_eq!(ClientMessage::from_json(r#"{"type":"leaveRoom"}"#).unwrap(), ClientMessage::LeaveRoom);
    }

    #[test]
    fn test_player_moved_partial() {
        let msg = ServerMessage::from_json(r#"{"type":"playerMoved","playerId":"p2","position":[1,2,3]}"#).unwrap();
        match msg {
            ServerMessage::PlayerMoved { player_id, position, velocity, rotation } => {
                assert_eq!(player_id, PlayerId::from("p2"));
                assert_eq!(position, Some(Vec3::new(1.0, 2.0, 3.0)));
                assert!(velocity.is_none());
                assert!(rotation.is_none());
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_powerup_kind_names() {
        let msg = ServerMessage::PowerupSpawned {
            id: PowerupId::new("pu-1"),
            kind: PowerupKind::SpeedBoost,
            position: Vec3::new(0.0, 1.5, 0.0),
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"kind\":\"speed_boost\""));
        assert_eq!(ServerMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_ready_loadout_optional() {
        let msg = ClientMessage::from_json(r#"{"type":"playerReady","ready":true}"#).unwrap();
        assert_eq!(msg, ClientMessage::PlayerReady { ready: true, loadout: Vec::new() });
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(matches!(
            ServerMessage::from_json(r#"{"type":"teleport"}"#),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_gameplay_classification() {
        assert!(ClientMessage::PlayerDamage { damage: 1.0 }.is_gameplay());
        assert!(!ClientMessage::LeaveRoom.is_gameplay());
    }
}
