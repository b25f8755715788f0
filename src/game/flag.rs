//! Flag Transitions
//!
//! Every way a flag changes hands, as methods on [`EntityStore`].
//!
//! ```text
//!            pickup (enemy)             carried into owned capture point
//!   AtHome ─────────────────► Carried ─────────────────────────────────► AtHome (+score)
//!     ▲                         │
//!     │ teammate touch /        │ drop / carrier tagged
//!     │ return timeout          ▼
//!     └──────────────────── Dropped { since }
//! ```
//!
//! The carrier link is written on both sides (flag status and the agent's
//! `carrying`) inside the same method, so the two never disagree.

use tracing::debug;

use crate::config::{MazeConfig, RulesConfig};
use crate::game::events::{DropReason, GameEvent};
use crate::game::state::{AgentId, CapturePointId, EntityStore, FlagId, FlagStatus};

impl EntityStore {
    /// Agent `agent` tries to take `flag`.
    ///
    /// Ignored unless the agent is active, empty-handed and within
    /// `pickup_radius`, and the flag is not already carried. Touching your
    /// own team's dropped flag sends it home; your own flag at home is left
    /// alone.
    pub fn pickup_flag(&mut self, rules: &RulesConfig, agent: AgentId, flag: FlagId, now: u64) -> Option<GameEvent> {
        let a = self.state.agent(agent)?;
        let f = self.state.flag(flag)?;
        let (position, status) = (a.position, f.status);

        if !a.active || a.carrying.is_some() {
            return None;
        }
        if matches!(status, FlagStatus::Carried { .. }) {
            return None;
        }
        if position.distance(f.position) > rules.pickup_radius {
            return None;
        }

        if f.team == a.team {
            return match status {
                FlagStatus::Dropped { .. } => self.return_flag(flag, Some(agent), now),
                _ => None,
            };
        }

        let f = &mut self.state.flags[flag.index()];
        f.status = FlagStatus::Carried { agent };
        f.position = position;
        self.state.agents[agent.index()].carrying = Some(flag);

        debug!("Agent {} picked up flag {} at tick {}", agent, flag, now);
        Some(GameEvent::flag_picked_up(now, agent, flag))
    }

    /// Put the agent's flag on the floor where it stands.
    pub fn drop_flag(&mut self, agent: AgentId, reason: DropReason, now: u64) -> Option<GameEvent> {
        let a = self.state.agents.get_mut(agent.index())?;
        let flag = a.carrying.take()?;
        let position = a.position;

        let f = self.state.flags.get_mut(flag.index())?;
        f.status = FlagStatus::Dropped { since: now };
        f.position = position;

        debug!("Agent {} dropped flag {} at {} ({:?})", agent, flag, position, reason);
        Some(GameEvent::flag_dropped(now, agent, flag, position, reason))
    }

    /// Send a flag home. A carrier, if any, loses it.
    pub fn return_flag(&mut self, flag: FlagId, by: Option<AgentId>, now: u64) -> Option<GameEvent> {
        let f = self.state.flags.get_mut(flag.index())?;
        if f.status == FlagStatus::AtHome {
            return None;
        }
        let carrier = f.carrier();
        f.status = FlagStatus::AtHome;
        f.position = f.home;

        if let Some(carrier) = carrier {
            if let Some(a) = self.state.agents.get_mut(carrier.index()) {
                a.carrying = None;
            }
        }

        debug!("Flag {} returned home at tick {}", flag, now);
        Some(GameEvent::flag_returned(now, flag, by))
    }

    /// Score the flag `agent` carries at `capture_point`.
    ///
    /// The flag resets to its home and counts one more capture.
    pub fn capture_flag(
        &mut self,
        agent: AgentId,
        capture_point: CapturePointId,
        points: u32,
        now: u64,
    ) -> Option<GameEvent> {
        let a = self.state.agents.get_mut(agent.index())?;
        let flag = a.carrying.take()?;
        a.captures += 1;
        let team = a.team;

        let f = self.state.flags.get_mut(flag.index())?;
        f.status = FlagStatus::AtHome;
        f.position = f.home;
        f.times_captured += 1;

        self.state.flags_captured += 1;
        self.add_score(team, points);

        debug!("Agent {} captured flag {} for team {} at point {}", agent, flag, team, capture_point);
        Some(GameEvent::flag_captured(now, agent, flag, team, capture_point, points))
    }

    /// Carried flags move with their carriers.
    pub fn follow_carriers(&mut self) {
        for i in 0..self.state.flags.len() {
            if let Some(carrier) = self.state.flags[i].carrier() {
                if let Some(a) = self.state.agent(carrier) {
                    let position = a.position;
                    self.state.flags[i].position = position;
                }
            }
        }
    }

    /// Every carrier of an enemy flag standing in a capture point its team
    /// owns scores, in agent-index order.
    pub fn process_flag_captures(&mut self, config: &MazeConfig, now: u64) -> Vec<GameEvent> {
        let mut events = Vec::new();
        let points = config.rules().flag_capture_score;

        for i in 0..self.state.agents.len() {
            let a = &self.state.agents[i];
            if !a.active {
                continue;
            }
            let Some(flag) = a.carrying.and_then(|f| self.state.flag(f)) else {
                continue;
            };
            if flag.team == a.team {
                continue;
            }

            let at = self
                .state
                .capture_points
                .iter()
                .find(|p| p.owner == Some(a.team) && p.contains(a.position))
                .map(|p| p.id);

            if let Some(point) = at {
                events.extend(self.capture_flag(AgentId(i as u32), point, points, now));
            }
        }

        events
    }

    /// Dropped flags lying untouched for `dropped_flag_return_ticks` go home.
    pub fn expire_dropped_flags(&mut self, rules: &RulesConfig, now: u64) -> Vec<GameEvent> {
        let Some(limit) = rules.dropped_flag_return_ticks else {
            return Vec::new();
        };

        let expired: Vec<FlagId> = self
            .state
            .flags
            .iter()
            .filter(|f| matches!(f.status, FlagStatus::Dropped { since } if now.saturating_sub(since) >= limit as u64))
            .map(|f| f.id)
            .collect();

        expired
            .into_iter()
            .filter_map(|flag| self.return_flag(flag, None, now))
            .collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vec2::Vec2;
    use crate::game::events::GameEventData;
    use crate::game::state::TeamId;

    fn fixture() -> (MazeConfig, EntityStore) {
        let config = MazeConfig::default_arena().unwrap();
        let store = EntityStore::new(&config);
        (config, store)
    }

    /// Put agent 0 (team 0) next to the enemy flag at (30, 0).
    fn beside_enemy_flag(store: &mut EntityStore) {
        store.apply_motion(AgentId(0), Vec2::new(28.0, 0.0), Vec2::ZERO);
    }

    #[test]
    fn test_pickup_enemy_flag() {
        let (config, mut store) = fixture();
        beside_enemy_flag(&mut store);

        let event = store.pickup_flag(config.rules(), AgentId(0), FlagId(1), 1).unwrap();
        assert_eq!(event.data, GameEventData::FlagPickedUp { agent: AgentId(0), flag: FlagId(1) });
        assert_eq!(store.state().flags[1].carrier(), Some(AgentId(0)));
        assert_eq!(store.state().agents[0].carrying, Some(FlagId(1)));
        assert!(store.check_invariants(&config).is_ok());
    }

    #[test]
    fn test_pickup_out_of_reach_ignored() {
        let (config, mut store) = fixture();
        assert!(store.pickup_flag(config.rules(), AgentId(0), FlagId(1), 1).is_none());
        assert_eq!(store.state().flags[1].status, FlagStatus::AtHome);
    }

    #[test]
    fn test_second_pickup_ignored() {
        let (config, mut store) = fixture();
        beside_enemy_flag(&mut store);
        store.pickup_flag(config.rules(), AgentId(0), FlagId(1), 1).unwrap();

        // Carrier cannot take another, and a carried flag cannot be taken.
        store.apply_motion(AgentId(0), Vec2::new(-31.0, 0.0), Vec2::ZERO);
        assert!(store.pickup_flag(config.rules(), AgentId(0), FlagId(0), 2).is_none());
        assert!(store.pickup_flag(config.rules(), AgentId(1), FlagId(1), 2).is_none());
    }

    #[test]
    fn test_own_flag_at_home_untouched() {
        let (config, mut store) = fixture();
        store.apply_motion(AgentId(0), Vec2::new(-31.0, 0.0), Vec2::ZERO);
        assert!(store.pickup_flag(config.rules(), AgentId(0), FlagId(0), 1).is_none());
        assert_eq!(store.state().agents[0].carrying, None);
    }

    #[test]
    fn test_drop_and_teammate_return() {
        let (config, mut store) = fixture();
        beside_enemy_flag(&mut store);
        store.pickup_flag(config.rules(), AgentId(0), FlagId(1), 1).unwrap();

        let dropped = store.drop_flag(AgentId(0), DropReason::Voluntary, 2).unwrap();
        assert!(matches!(dropped.data, GameEventData::FlagDropped { reason: DropReason::Voluntary, .. }));
        assert_eq!(store.state().flags[1].status, FlagStatus::Dropped { since: 2 });
        assert_eq!(store.state().flags[1].position, Vec2::new(28.0, 0.0));

        // Blue (team 1) touches its own dropped flag.
        store.apply_motion(AgentId(0), Vec2::new(20.0, 0.0), Vec2::ZERO);
        store.apply_motion(AgentId(1), Vec2::new(29.0, 0.0), Vec2::ZERO);
        let returned = store.pickup_flag(config.rules(), AgentId(1), FlagId(1), 3).unwrap();
        assert_eq!(returned.data, GameEventData::FlagReturned { flag: FlagId(1), by: Some(AgentId(1)) });
        assert_eq!(store.state().flags[1].status, FlagStatus::AtHome);
        assert_eq!(store.state().agents[1].carrying, None);
    }

    #[test]
    fn test_capture_scores_and_resets() {
        let (config, mut store) = fixture();
        beside_enemy_flag(&mut store);
        store.pickup_flag(config.rules(), AgentId(0), FlagId(1), 1).unwrap();

        // Red's home capture point is at (-40, 20).
        store.apply_motion(AgentId(0), Vec2::new(-40.0, 19.0), Vec2::ZERO);
        store.follow_carriers();
        assert_eq!(store.state().flags[1].position, Vec2::new(-40.0, 19.0));

        let events = store.process_flag_captures(&config, 2);
        assert_eq!(events.len(), 1);
        let state = store.state();
        assert_eq!(state.score(TeamId(0)), 10);
        assert_eq!(state.flags[1].status, FlagStatus::AtHome);
        assert_eq!(state.flags[1].position, state.flags[1].home);
        assert_eq!(state.flags[1].times_captured, 1);
        assert_eq!(state.agents[0].carrying, None);
        assert_eq!(state.agents[0].captures, 1);
        assert_eq!(state.flags_captured, 1);
    }

    #[test]
    fn test_no_capture_at_enemy_point() {
        let (config, mut store) = fixture();
        beside_enemy_flag(&mut store);
        store.pickup_flag(config.rules(), AgentId(0), FlagId(1), 1).unwrap();

        // Blue owns (40, 20).
        store.apply_motion(AgentId(0), Vec2::new(40.0, 19.0), Vec2::ZERO);
        assert!(store.process_flag_captures(&config, 2).is_empty());
        assert_eq!(store.state().agents[0].carrying, Some(FlagId(1)));
    }

    #[test]
    fn test_dropped_flag_times_out() {
        let (config, mut store) = fixture();
        beside_enemy_flag(&mut store);
        store.pickup_flag(config.rules(), AgentId(0), FlagId(1), 1).unwrap();
        store.drop_flag(AgentId(0), DropReason::Voluntary, 10).unwrap();

        assert!(store.expire_dropped_flags(config.rules(), 609).is_empty());
        let events = store.expire_dropped_flags(config.rules(), 610);
        assert_eq!(events, vec![GameEvent::flag_returned(610, FlagId(1), None)]);
        assert_eq!(store.state().flags[1].status, FlagStatus::AtHome);
    }
}
