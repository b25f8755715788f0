//! Agent Actions and Recording
//!
//! What an agent asks for on a tick, how it is checked, and how a run's
//! actions are stored for replay.
//!
//! An [`ActionTrack`] only stores an entry when an agent's action CHANGES,
//! so a run where agents hold a heading for many ticks stays small.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::hash::{StateHash, StateHasher};
use crate::core::vec2::Vec2;
use crate::game::state::{AgentId, AgentState, FlagId, GameState};

/// Relative slack on the speed limit before a velocity is rejected.
pub const SPEED_TOLERANCE: f64 = 1e-9;

// =============================================================================
// ACTION TYPES
// =============================================================================

/// Discrete interaction attempted alongside movement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interaction {
    /// Pick up a flag within `pickup_radius`
    PickupFlag(FlagId),
    /// Drop the carried flag where the agent stands
    DropFlag,
    /// Tag an enemy within `tag_range` and line of sight
    Tag(AgentId),
    /// Count as present at capture points this tick
    Contest,
}

/// One agent's request for one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Target velocity in world units per second
    pub velocity: Vec2,
    pub interaction: Option<Interaction>,
}

impl Action {
    /// Stand still, do nothing.
    pub const IDLE: Self = Self { velocity: Vec2::ZERO, interaction: None };

    /// Move without interacting.
    pub const fn moving(velocity: Vec2) -> Self {
        Self { velocity, interaction: None }
    }

    /// Add an interaction.
    pub fn with_interaction(mut self, interaction: Interaction) -> Self {
        self.interaction = Some(interaction);
        self
    }

    /// Same velocity, interaction dropped. Used on non-decision ticks.
    pub const fn movement_only(self) -> Self {
        Self { velocity: self.velocity, interaction: None }
    }

    /// Hash the action for transcripts.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_vec2(self.velocity);
        match self.interaction {
            None => hasher.update_u8(0),
            Some(Interaction::PickupFlag(flag)) => {
                hasher.update_u8(1);
                hasher.update_u32(flag.0);
            }
            Some(Interaction::DropFlag) => hasher.update_u8(2),
            Some(Interaction::Tag(agent)) => {
                hasher.update_u8(3);
                hasher.update_u32(agent.0);
            }
            Some(Interaction::Contest) => hasher.update_u8(4),
        }
    }
}

/// Hash of the action batch resolved on `tick`, in agent order.
pub fn hash_actions(tick: u64, actions: &[Action]) -> StateHash {
    let mut hasher = StateHasher::for_actions();
    hasher.update_u64(tick);
    hasher.update_u32(actions.len() as u32);
    for action in actions {
        action.hash_into(&mut hasher);
    }
    hasher.finalize()
}

// =============================================================================
// VALIDATION
// =============================================================================

/// Why an action was turned into a no-op.
#[derive(Clone, Debug, PartialEq, Error, Serialize, Deserialize)]
pub enum InvalidAction {
    #[error("velocity {0} is not finite")]
    NonFiniteVelocity(Vec2),
    #[error("speed {speed} exceeds max speed {max_speed}")]
    OverSpeed { speed: f64, max_speed: f64 },
    #[error("unknown flag {0}")]
    UnknownFlag(FlagId),
    #[error("unknown agent {0}")]
    UnknownAgent(AgentId),
}

/// Check an action against the acting agent and the current state.
///
/// Legal-but-pointless requests (tagging yourself, picking up a flag out
/// of reach) pass here and are ignored during resolution.
pub fn validate(action: &Action, agent: &AgentState, state: &GameState) -> Result<(), InvalidAction> {
    if !action.velocity.is_finite() {
        return Err(InvalidAction::NonFiniteVelocity(action.velocity));
    }
    let speed = action.velocity.length();
    if speed > agent.max_speed * (1.0 + SPEED_TOLERANCE) {
        return Err(InvalidAction::OverSpeed { speed, max_speed: agent.max_speed });
    }

    match action.interaction {
        Some(Interaction::PickupFlag(flag)) if state.flag(flag).is_none() => Err(InvalidAction::UnknownFlag(flag)),
        Some(Interaction::Tag(target)) if state.agent(target).is_none() => Err(InvalidAction::UnknownAgent(target)),
        _ => Ok(()),
    }
}

// =============================================================================
// ACTION RECORDING
// =============================================================================

/// An action that took effect from `tick` onwards.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionDelta {
    /// Tick number being resolved (state.tick before resolution)
    pub tick: u64,
    pub action: Action,
}

/// Delta-compressed action history of one agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionTrack {
    pub agent: AgentId,
    /// Last tick recorded
    pub end_tick: u64,
    deltas: Vec<ActionDelta>,
    /// Last recorded action (for delta comparison)
    #[serde(skip)]
    last: Option<Action>,
}

impl ActionTrack {
    pub fn new(agent: AgentId) -> Self {
        Self {
            agent,
            end_tick: 0,
            deltas: Vec::new(),
            last: None,
        }
    }

    /// Record the action applied on `tick`. Only stored if it changed.
    pub fn record(&mut self, tick: u64, action: Action) {
        self.end_tick = tick;
        if self.last != Some(action) {
            self.deltas.push(ActionDelta { tick, action });
            self.last = Some(action);
        }
    }

    /// Action in force on `tick` (idle before the first entry).
    pub fn action_at(&self, tick: u64) -> Action {
        let idx = self.deltas.partition_point(|d| d.tick <= tick);
        if idx == 0 {
            Action::IDLE
        } else {
            self.deltas[idx - 1].action
        }
    }

    pub fn deltas(&self) -> &[ActionDelta] {
        &self.deltas
    }

    pub fn delta_count(&self) -> usize {
        self.deltas.len()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MazeConfig;
    use crate::game::state::EntityStore;

    fn fixture() -> EntityStore {
        EntityStore::new(&MazeConfig::default_arena().unwrap())
    }

    #[test]
    fn test_valid_actions_pass() {
        let store = fixture();
        let state = store.state();
        let agent = &state.agents[0];

        assert!(validate(&Action::IDLE, agent, state).is_ok());
        assert!(validate(&Action::moving(Vec2::new(10.0, 0.0)), agent, state).is_ok());
        assert!(validate(&Action::IDLE.with_interaction(Interaction::Tag(AgentId(0))), agent, state).is_ok());
        assert!(validate(&Action::IDLE.with_interaction(Interaction::PickupFlag(FlagId(1))), agent, state).is_ok());
    }

    #[test]
    fn test_invalid_actions_rejected() {
        let store = fixture();
        let state = store.state();
        let agent = &state.agents[0];

        let nan = Action::moving(Vec2::new(f64::NAN, 0.0));
        assert!(matches!(validate(&nan, agent, state), Err(InvalidAction::NonFiniteVelocity(_))));

        let fast = Action::moving(Vec2::new(8.0, 8.0));
        assert!(matches!(validate(&fast, agent, state), Err(InvalidAction::OverSpeed { .. })));

        let flag = Action::IDLE.with_interaction(Interaction::PickupFlag(FlagId(7)));
        assert_eq!(validate(&flag, agent, state), Err(InvalidAction::UnknownFlag(FlagId(7))));

        let tag = Action::IDLE.with_interaction(Interaction::Tag(AgentId(9)));
        assert_eq!(validate(&tag, agent, state), Err(InvalidAction::UnknownAgent(AgentId(9))));
    }

    #[test]
    fn test_track_delta_compression() {
        let mut track = ActionTrack::new(AgentId(0));
        let east = Action::moving(Vec2::new(5.0, 0.0));

        track.record(0, east);
        track.record(1, east);
        track.record(2, east);
        assert_eq!(track.delta_count(), 1);

        track.record(3, east.with_interaction(Interaction::Contest));
        track.record(4, east);
        assert_eq!(track.delta_count(), 3);
        assert_eq!(track.end_tick, 4);
    }

    #[test]
    fn test_track_action_at() {
        let mut track = ActionTrack::new(AgentId(1));
        let a = Action::moving(Vec2::new(1.0, 0.0));
        let b = Action::moving(Vec2::new(0.0, 1.0));

        track.record(10, a);
        track.record(20, b);

        assert_eq!(track.action_at(5), Action::IDLE);
        assert_eq!(track.action_at(10), a);
        assert_eq!(track.action_at(15), a);
        assert_eq!(track.action_at(20), b);
        assert_eq!(track.action_at(100), b);
    }

    #[test]
    fn test_track_survives_bincode() {
        let mut track = ActionTrack::new(AgentId(0));
        track.record(0, Action::moving(Vec2::new(2.0, 0.0)));
        track.record(5, Action::IDLE.with_interaction(Interaction::DropFlag));

        let bytes = bincode::serialize(&track).unwrap();
        let back: ActionTrack = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back.deltas(), track.deltas());
        assert_eq!(back.action_at(7), track.action_at(7));
    }

    #[test]
    fn test_action_batch_hash() {
        let east = Action::moving(Vec2::new(2.0, 0.0));
        let tag = Action::IDLE.with_interaction(Interaction::Tag(AgentId(1)));

        assert_eq!(hash_actions(3, &[east, tag]), hash_actions(3, &[east, tag]));
        assert_ne!(hash_actions(3, &[east, tag]), hash_actions(4, &[east, tag]));
        assert_ne!(hash_actions(3, &[east, tag]), hash_actions(3, &[tag, east]));
        assert_ne!(
            hash_actions(3, &[tag]),
            hash_actions(3, &[Action::IDLE.with_interaction(Interaction::Tag(AgentId(2)))])
        );
    }
}
