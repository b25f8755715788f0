//! Built-in Agents
//!
//! Reference agent programs used by the binary, tests and benches.
//!
//! - [`IdleAgent`]: never moves
//! - [`ScriptedAgent`]: replays a fixed action sequence
//! - [`FlagRunner`]: greedy flag stealer with ray-based wall avoidance

use std::f64::consts::PI;

use crate::config::RulesConfig;
use crate::core::vec2::Vec2;
use crate::game::action::{Action, Interaction};
use crate::game::perception::{nearest_wall, wrap_angle};
use crate::game::state::{AgentId, AgentState, FlagStatus, GameState};
use crate::sim::agent::Agent;

/// Never moves.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdleAgent;

impl Agent for IdleAgent {
    fn get_action(&mut self, _state: &GameState) -> anyhow::Result<Action> {
        Ok(Action::IDLE)
    }
}

/// Cycles through a fixed action list, one entry per call.
#[derive(Clone, Debug, Default)]
pub struct ScriptedAgent {
    script: Vec<Action>,
    cursor: usize,
}

impl ScriptedAgent {
    pub fn new(script: Vec<Action>) -> Self {
        Self { script, cursor: 0 }
    }

    /// The same action every call.
    pub fn constant(action: Action) -> Self {
        Self::new(vec![action])
    }
}

impl Agent for ScriptedAgent {
    fn get_action(&mut self, _state: &GameState) -> anyhow::Result<Action> {
        if self.script.is_empty() {
            return Ok(Action::IDLE);
        }
        let action = self.script[self.cursor % self.script.len()];
        self.cursor += 1;
        Ok(action)
    }
}

// =============================================================================
// FLAG RUNNER
// =============================================================================

/// Distance the runner looks ahead along its rays.
const LOOKAHEAD: f64 = 6.0;

/// Extra room kept between the runner and walls.
const CLEARANCE: f64 = 0.75;

/// Fraction of max speed the runner requests.
const SPEED_FACTOR: f64 = 0.99;

/// Steals the nearest enemy flag and runs it to a capture point its team
/// owns, tagging enemies that come within reach.
#[derive(Clone, Debug)]
pub struct FlagRunner {
    me: Option<AgentId>,
    pickup_radius: f64,
    tag_range: f64,
}

impl FlagRunner {
    pub fn new(rules: &RulesConfig) -> Self {
        Self {
            me: None,
            pickup_radius: rules.pickup_radius,
            tag_range: rules.tag_range,
        }
    }

    fn decide(&self, me: &AgentState, state: &GameState) -> Action {
        if !me.active {
            return Action::IDLE;
        }

        let mut action = match me.carrying {
            Some(_) => self.run_home(me, state),
            None => self.hunt(me, state),
        };

        if action.interaction.is_none() && me.tag_cooldown == 0 {
            if let Some(enemy) = self.enemy_in_reach(me, state) {
                action = action.with_interaction(Interaction::Tag(enemy));
            }
        }
        action
    }

    fn hunt(&self, me: &AgentState, state: &GameState) -> Action {
        let target = state
            .flags
            .iter()
            .filter(|f| f.team != me.team && !matches!(f.status, FlagStatus::Carried { .. }))
            .min_by(|a, b| {
                me.position
                    .distance_squared(a.position)
                    .total_cmp(&me.position.distance_squared(b.position))
            });

        match target {
            Some(flag) if me.position.distance(flag.position) <= self.pickup_radius => {
                Action::IDLE.with_interaction(Interaction::PickupFlag(flag.id))
            }
            Some(flag) => Action::moving(steer(me, flag.position)),
            None => Action::IDLE,
        }
    }

    fn run_home(&self, me: &AgentState, state: &GameState) -> Action {
        state
            .capture_points
            .iter()
            .filter(|p| p.owner == Some(me.team))
            .min_by(|a, b| {
                me.position
                    .distance_squared(a.position)
                    .total_cmp(&me.position.distance_squared(b.position))
            })
            .map_or(Action::IDLE, |p| Action::moving(steer(me, p.position)))
    }

    fn enemy_in_reach(&self, me: &AgentState, state: &GameState) -> Option<AgentId> {
        state
            .agents
            .iter()
            .filter(|a| a.active && a.team != me.team)
            .filter(|a| me.position.distance(a.position) <= self.tag_range)
            .min_by(|a, b| {
                me.position
                    .distance_squared(a.position)
                    .total_cmp(&me.position.distance_squared(b.position))
            })
            .map(|a| a.id)
    }
}

impl Agent for FlagRunner {
    fn startup(&mut self, me: AgentId, _initial: &GameState) -> anyhow::Result<()> {
        self.me = Some(me);
        Ok(())
    }

    fn get_action(&mut self, state: &GameState) -> anyhow::Result<Action> {
        let id = self.me.ok_or_else(|| anyhow::anyhow!("get_action before startup"))?;
        let me = state
            .agent(id)
            .ok_or_else(|| anyhow::anyhow!("agent {} missing from state", id))?;
        Ok(self.decide(me, state))
    }
}

/// Velocity toward `target`, bending around walls seen by the raycasts.
fn steer(me: &AgentState, target: Vec2) -> Vec2 {
    let offset = target - me.position;
    let remaining = offset.length();
    if remaining < 1e-9 {
        return Vec2::ZERO;
    }

    let goal = offset.angle();
    let reach = remaining.min(LOOKAHEAD);
    let blocked = |distance: f64| distance < me.radius + CLEARANCE;

    let aligned = me
        .raycasts
        .iter()
        .min_by(|a, b| wrap_angle(a.theta - goal).abs().total_cmp(&wrap_angle(b.theta - goal).abs()));

    let mut direction = match aligned {
        Some(ray) if ray.is_clear() || ray.distance >= reach + me.radius => offset.normalize(),
        Some(_) => me
            .raycasts
            .iter()
            .filter(|r| !blocked(r.distance))
            .max_by(|a, b| score(a.theta, a.distance, goal).total_cmp(&score(b.theta, b.distance, goal)))
            .map_or(offset.normalize(), |r| Vec2::from_angle(r.theta)),
        None => offset.normalize(),
    };

    // Push off a wall that is already too close.
    if let Some(wall) = nearest_wall(&me.raycasts) {
        if blocked(wall.distance) {
            direction = direction - Vec2::from_angle(wall.theta) * 0.5;
        }
    }

    if direction.length_squared() < 1e-12 {
        return Vec2::ZERO;
    }
    direction.normalize() * (me.max_speed * SPEED_FACTOR)
}

/// Preference for a ray: alignment with the goal, then openness.
fn score(theta: f64, distance: f64, goal: f64) -> f64 {
    let alignment = 1.0 - wrap_angle(theta - goal).abs() / PI;
    alignment + 0.1 * distance.min(LOOKAHEAD) / LOOKAHEAD
}

// =============================================================================
// TESTS
// =============================================================================
