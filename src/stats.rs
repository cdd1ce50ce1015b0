//! Session Statistics
//!
//! Counters for one client session, owned by whoever runs the frame loop and
//! passed where needed. Feeds the `reportGameEnd` summary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::game::events::{GameEvent, GameEventData};
use crate::game::powerup::PowerupKind;
use crate::game::state::PlayerId;
use crate::network::protocol::MatchStats;
use crate::network::sync::SyncEvent;

/// Totals over every match of a session.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Matches started.
    pub games_played: u32,
    /// Matches won.
    pub wins: u32,
    /// Sums over all matches.
    pub totals: MatchStats,
    /// Confirmed uses per kind.
    pub powerups_by_kind: BTreeMap<PowerupKind, u32>,
}

/// Per-session statistics service.
#[derive(Clone, Debug, Default)]
pub struct SessionStats {
    player_id: Option<PlayerId>,
    in_match: bool,
    current: MatchStats,
    summary: SessionSummary,
}

impl SessionStats {
    /// Fresh counters with no player bound.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind to the local player. Counting starts with the next match.
    pub fn init(&mut self, player_id: PlayerId) {
        self.player_id = Some(player_id);
    }

    /// Stats of the running (or last) match.
    pub fn current(&self) -> &MatchStats {
        &self.current
    }

    /// Session totals.
    pub fn summary(&self) -> &SessionSummary {
        &self.summary
    }

    /// Payload for `reportGameEnd`.
    pub fn match_summary(&self) -> MatchStats {
        self.current.clone()
    }

    /// Count what the local simulator reported this tick.
    pub fn record_events(&mut self, events: &[GameEvent]) {
        if !self.in_match {
            return;
        }
        for event in events {
            match &event.data {
                GameEventData::KnockedOut { .. } => {
                    self.current.deaths += 1;
                    self.summary.totals.deaths += 1;
                }
                GameEventData::StompLanded { damage, .. } => {
                    self.current.stomps += 1;
                    self.current.damage_dealt += damage;
                    self.summary.totals.stomps += 1;
                    self.summary.totals.damage_dealt += damage;
                }
                GameEventData::DamageChanged { delta, .. } => {
                    self.current.damage_taken += delta;
                    self.summary.totals.damage_taken += delta;
                }
                _ => {}
            }
        }
    }

    /// Count what the relay told us.
    pub fn record_sync(&mut self, event: &SyncEvent) {
        match event {
            SyncEvent::Joined { player_id, .. } => {
                self.player_id = Some(player_id.clone());
            }
            SyncEvent::MatchStarted { .. } => {
                self.in_match = true;
                self.current = MatchStats::default();
                self.summary.games_played += 1;
            }
            SyncEvent::Knockout { scorer_id: Some(scorer), .. } if self.in_match && self.is_me(scorer) => {
                self.current.knockouts += 1;
                self.summary.totals.knockouts += 1;
            }
            SyncEvent::PowerupUsed { player_id, kind } if self.in_match && self.is_me(player_id) => {
                self.current.powerups_used += 1;
                self.summary.totals.powerups_used += 1;
                *self.summary.powerups_by_kind.entry(*kind).or_insert(0) += 1;
            }
            SyncEvent::GameOver { winner_id, .. } => {
                if self.in_match && winner_id.as_ref().map_or(false, |w| self.is_me(w)) {
                    self.summary.wins += 1;
                }
                self.in_match = false;
            }
            SyncEvent::ReturnedToLobby | SyncEvent::ConnectionLost => {
                self.in_match = false;
            }
            _ => {}
        }
    }

    fn is_me(&self, id: &PlayerId) -> bool {
        self.player_id.as_ref() == Some(id)
    }

    /// Log and hand back the session totals, leaving the counters empty.
    pub fn teardown(&mut self) -> SessionSummary {
        let summary = std::mem::take(&mut self.summary);
        info!(
            "Session over: {} games, {} wins, {} knockouts, {} deaths",
            summary.games_played, summary.wins, summary.totals.knockouts, summary.totals.deaths
        );
        self.current = MatchStats::default();
        self.in_match = false;
        summary
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::events::DamageSource;

    fn me() -> PlayerId {
        PlayerId::from("me")
    }

    fn started() -> SessionStats {
        let mut stats = SessionStats::new();
        stats.init(me());
        stats.record_sync(&SyncEvent::MatchStarted { seed: 1, map: "PROCEDURAL".into(), mode: "knockout".into() });
        stats
    }

    #[test]
    fn test_nothing_counted_outside_match() {
        let mut stats = SessionStats::new();
        stats.init(me());
        stats.record_events(&[GameEvent::knocked_out(0, me())]);
        assert_eq!(stats.current().deaths, 0);
    }

    #[test]
    fn test_local_events_counted() {
        let mut stats = started();
        stats.record_events(&[
            GameEvent::new(0, GameEventData::StompLanded { target_id: PlayerId::from("them"), damage: 16.0 }),
            GameEvent::damage_changed(1, 7.5, 7.5, DamageSource::Collision),
            GameEvent::knocked_out(2, me()),
            GameEvent::impact(3, 9.0),
        ]);
        let summary = stats.match_summary();
        assert_eq!(summary.stomps, 1);
        assert_eq!(summary.damage_dealt, 16.0);
        assert_eq!(summary.damage_taken, 7.5);
        assert_eq!(summary.deaths, 1);
    }

    #[test]
    fn test_relay_credit_only_for_me() {
        let mut stats = started();
        stats.record_sync(&SyncEvent::Knockout { scorer_id: Some(me()), knocked_out_id: PlayerId::from("them") });
        stats.record_sync(&SyncEvent::Knockout { scorer_id: Some(PlayerId::from("them")), knocked_out_id: me() });
        stats.record_sync(&SyncEvent::PowerupUsed { player_id: me(), kind: PowerupKind::Rocket });
        stats.record_sync(&SyncEvent::PowerupUsed { player_id: PlayerId::from("them"), kind: PowerupKind::Curse });

        assert_eq!(stats.current().knockouts, 1);
        assert_eq!(stats.current().powerups_used, 1);
        assert_eq!(stats.summary().powerups_by_kind.get(&PowerupKind::Rocket), Some(&1));
        assert_eq!(stats.summary().powerups_by_kind.get(&PowerupKind::Curse), None);
    }

    #[test]
    fn test_totals_span_matches() {
        let mut stats = started();
        stats.record_events(&[GameEvent::knocked_out(0, me())]);
        stats.record_sync(&SyncEvent::GameOver { winner_id: Some(me()), scores: Default::default() });

        stats.record_sync(&SyncEvent::MatchStarted { seed: 2, map: "ICE".into(), mode: "knockout".into() });
        assert_eq!(stats.current().deaths, 0);
        stats.record_events(&[GameEvent::knocked_out(0, me())]);

        let summary = stats.teardown();
        assert_eq!(summary.games_played, 2);
        assert_eq!(summary.wins, 1);
        assert_eq!(summary.totals.deaths, 2);
        assert_eq!(stats.summary().games_played, 0);
    }
}
