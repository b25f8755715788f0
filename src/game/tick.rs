//! Authoritative Simulation Tick
//!
//! Turns one snapshot plus one action per agent into the next snapshot.
//! Same config, same starting store and same actions always produce the
//! same next state, bit for bit.
//!
//! ## Phases
//!
//! ```text
//!   0. cooldowns        tag cooldowns tick down
//!   1. validate         bad actions become idle + InvalidAction
//!   2. movement         agent-index order, later movers see earlier results
//!   3. interactions     pickup / drop / tag / contest, agent-index order
//!   4. flag captures    carriers inside an owned capture point score
//!   5. timers           dropped-flag returns, respawns
//!   6. capture points   progress / flip / reset
//!   7. perception       raycasts + sightings (+ noise)
//!   8. publish          tick += 1, invariants, termination
//! ```

use serde::{Serialize, Deserialize};
#[cfg(feature = "debug-tracing")]
use tracing::trace;
use tracing::{debug, info};

use crate::config::MazeConfig;
use crate::core::vec2::Vec2;
use crate::game::action::{validate, Action, Interaction, InvalidAction};
use crate::game::capture::process_capture_points;
use crate::game::collision::{circles_overlap, resolve_motion, segment_hit_test, HitEntity, Obstacle};
use crate::game::events::{DropReason, GameEvent};
use crate::game::perception::perceive;
use crate::game::state::{AgentId, EntityStore, GameState, GeometryInvariantViolation, TeamId};

/// Why a run stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    /// The tick limit was reached
    MaxTicks,
    /// Every flag has been captured at least once
    AllFlagsCaptured,
    /// A team reached `score_to_win`
    ScoreReached { team: TeamId },
}

/// Result of a tick.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TickResult {
    /// The tick just produced
    pub tick: u64,
    /// Events generated this tick
    pub events: Vec<GameEvent>,
    /// Actions that were replaced by idle, with the reason
    pub invalid_actions: Vec<(AgentId, InvalidAction)>,
    /// Set when this tick ended the run
    pub end: Option<EndReason>,
}

/// Run one simulation tick.
///
/// `actions[i]` is agent `i`'s action; missing entries count as idle.
/// A terminal store is left untouched.
///
/// # Errors
///
/// A [`GeometryInvariantViolation`] if the resolved state is inconsistent.
/// That is an engine bug, and the store should not be stepped further.
pub fn resolve_tick(
    config: &MazeConfig,
    store: &mut EntityStore,
    actions: &[Action],
) -> Result<TickResult, GeometryInvariantViolation> {
    let now = store.state.tick + 1;
    let mut result = TickResult { tick: store.state.tick, ..TickResult::default() };
    if store.state.terminal {
        return Ok(result);
    }
    result.tick = now;

    // 0. Cooldowns
    for agent in &mut store.state.agents {
        agent.tag_cooldown = agent.tag_cooldown.saturating_sub(1);
    }

    // 1. Validate
    let effective = validate_actions(&store.state, actions, &mut result);

    // 2. Movement
    apply_movement(config, store, &effective);

    // 3. Interactions
    let contesting = apply_interactions(config, store, &effective, now, &mut result);

    // 4. Flag captures
    result.events.extend(store.process_flag_captures(config, now));

    // 5. Timers
    result.events.extend(store.expire_dropped_flags(config.rules(), now));
    result.events.extend(process_respawns(store, now));

    // 6. Capture points
    result.events.extend(process_capture_points(store, config, &contesting, now));

    // 7. Perception
    perceive(config, &mut store.state, &mut store.rng);

    // 8. Publish
    store.advance_tick();
    store.check_invariants(config)?;

    if let Some(reason) = check_end_conditions(config, &store.state) {
        result.events.push(end_match(store, reason));
        result.end = Some(reason);
    }

    #[cfg(feature = "debug-tracing")]
    trace!(
        "Tick {} resolved: {} events, {} invalid actions, hash {}",
        now,
        result.events.len(),
        result.invalid_actions.len(),
        crate::core::hash::short_hex(&store.state_hash())
    );

    Ok(result)
}

/// Replace every invalid action with idle.
fn validate_actions(state: &GameState, actions: &[Action], result: &mut TickResult) -> Vec<Action> {
    state
        .agents
        .iter()
        .map(|agent| {
            let action = actions.get(agent.id.index()).copied().unwrap_or(Action::IDLE);
            match validate(&action, agent, state) {
                Ok(()) => action,
                Err(reason) => {
                    result.invalid_actions.push((agent.id, reason));
                    Action::IDLE
                }
            }
        })
        .collect()
}

/// Bodies of active agents other than `except`.
fn obstacles(state: &GameState, except: Option<AgentId>) -> Vec<Obstacle> {
    state
        .agents
        .iter()
        .filter(|a| a.active && Some(a.id) != except)
        .map(|a| Obstacle { id: a.id, position: a.position, radius: a.radius })
        .collect()
}

/// Move every active agent in index order.
fn apply_movement(config: &MazeConfig, store: &mut EntityStore, actions: &[Action]) {
    let dt = config.simulation().tick_seconds;

    for (i, action) in actions.iter().enumerate() {
        let id = AgentId(i as u32);
        let (active, start, radius) = {
            let a = &store.state.agents[i];
            (a.active, a.position, a.radius)
        };
        if !active {
            continue;
        }

        let bodies = obstacles(&store.state, Some(id));
        let motion = resolve_motion(config.maze(), start, action.velocity * dt, radius, &bodies);
        let achieved = (motion.position - start) * (1.0 / dt);
        store.apply_motion(id, motion.position, achieved);

        if action.velocity.length_squared() > 0.0 {
            store.state.agents[i].heading = action.velocity.angle();
        }
    }

    store.follow_carriers();
}

/// Resolve interactions in index order. Returns each agent's Contest intent.
fn apply_interactions(
    config: &MazeConfig,
    store: &mut EntityStore,
    actions: &[Action],
    now: u64,
    result: &mut TickResult,
) -> Vec<bool> {
    let mut contesting = vec![false; actions.len()];

    for (i, action) in actions.iter().enumerate() {
        let id = AgentId(i as u32);
        // Agents tagged earlier in this pass lose their interaction.
        if !store.state.agents[i].active {
            continue;
        }

        match action.interaction {
            None => {}
            Some(Interaction::PickupFlag(flag)) => {
                result.events.extend(store.pickup_flag(config.rules(), id, flag, now));
            }
            Some(Interaction::DropFlag) => {
                result.events.extend(store.drop_flag(id, DropReason::Voluntary, now));
            }
            Some(Interaction::Tag(target)) => {
                result.events.extend(try_tag(config, store, id, target, now));
            }
            Some(Interaction::Contest) => contesting[i] = true,
        }
    }

    contesting
}

/// Tag `target` if it is an active enemy in range, the tagger is off
/// cooldown and the first thing on the line between them is the target.
fn try_tag(config: &MazeConfig, store: &mut EntityStore, tagger: AgentId, target: AgentId, now: u64) -> Vec<GameEvent> {
    let rules = config.rules();
    let state = &store.state;
    let (Some(a), Some(t)) = (state.agent(tagger), state.agent(target)) else {
        return Vec::new();
    };

    if tagger == target || a.team == t.team || !t.active || a.tag_cooldown > 0 {
        return Vec::new();
    }
    if a.position.distance(t.position) > rules.tag_range {
        return Vec::new();
    }

    let bodies = obstacles(state, None);
    let line = segment_hit_test(config.maze(), &bodies, a.position, t.position, Some(tagger));
    if line.hit != Some(HitEntity::Agent(target)) {
        return Vec::new();
    }

    let mut events = vec![GameEvent::agent_tagged(now, tagger, target)];
    events.extend(store.drop_flag(target, DropReason::Tagged, now));

    let t = &mut store.state.agents[target.index()];
    t.active = false;
    t.respawn_in = rules.respawn_ticks;
    t.velocity = Vec2::ZERO;
    t.raycasts.clear();
    t.sightings.clear();

    let a = &mut store.state.agents[tagger.index()];
    a.tag_cooldown = rules.tag_cooldown_ticks;
    a.tags += 1;

    debug!("Agent {} tagged agent {} at tick {}", tagger, target, now);
    events
}

/// Count down tagged agents and bring them back at their spawn once it
/// is free of other active agents.
fn process_respawns(store: &mut EntityStore, now: u64) -> Vec<GameEvent> {
    let mut events = Vec::new();

    for i in 0..store.state.agents.len() {
        let agent = &store.state.agents[i];
        if agent.active {
            continue;
        }
        if agent.respawn_in > 0 {
            store.state.agents[i].respawn_in -= 1;
            continue;
        }

        let (id, spawn, radius) = (agent.id, agent.spawn, agent.radius);
        let blocked = store
            .state
            .agents
            .iter()
            .any(|o| o.active && o.id != id && circles_overlap(spawn, radius, o.position, o.radius));
        if blocked {
            continue;
        }

        let agent = &mut store.state.agents[i];
        agent.active = true;
        agent.position = spawn;
        agent.velocity = Vec2::ZERO;

        debug!("Agent {} respawned at tick {}", id, now);
        events.push(GameEvent::agent_respawned(now, id));
    }

    events
}

/// Termination checks that depend on the state alone. The tick limit is
/// the driver's business.
pub fn check_end_conditions(config: &MazeConfig, state: &GameState) -> Option<EndReason> {
    let rules = config.rules();

    if rules.end_when_all_flags_captured && state.all_flags_captured() {
        return Some(EndReason::AllFlagsCaptured);
    }

    let target = rules.score_to_win?;
    state
        .scores
        .iter()
        .position(|s| *s >= target)
        .map(|team| EndReason::ScoreReached { team: TeamId(team as u32) })
}

/// Mark the store terminal and announce the result.
pub fn end_match(store: &mut EntityStore, reason: EndReason) -> GameEvent {
    store.mark_terminal();
    let winner = store.state.leader();
    info!("Match ended at tick {} ({:?}), winner {:?}", store.state.tick, reason, winner);
    GameEvent::match_ended(store.state.tick, winner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentConfig, LayoutConfig, RawMazeConfig};
    use crate::game::events::GameEventData;
    use crate::game::state::{FlagId, FlagStatus};
    use proptest::prelude::*;

    fn fixture(raw: RawMazeConfig) -> (MazeConfig, EntityStore) {
        let config = MazeConfig::from_raw(raw).unwrap();
        let store = EntityStore::new(&config);
        (config, store)
    }

    fn idle(store: &EntityStore) -> Vec<Action> {
        vec![Action::IDLE; store.state().agents.len()]
    }

    #[test]
    fn test_tick_determinism() {
        let (config, mut a) = fixture(RawMazeConfig::default());
        let mut b = a.clone();

        for t in 0..200u64 {
            let angle = t as f64 * 0.1;
            let actions = vec![
                Action::moving(Vec2::from_angle(angle) * 10.0),
                Action::moving(Vec2::from_angle(-angle) * 7.0),
            ];
            resolve_tick(&config, &mut a, &actions).unwrap();
            resolve_tick(&config, &mut b, &actions).unwrap();
            assert_eq!(a.state().to_bytes().unwrap(), b.state().to_bytes().unwrap());
        }

        assert_eq!(a.state().tick, 200);
        assert_eq!(a.state_hash(), b.state_hash());
    }

    #[test]
    fn test_agent_movement() {
        let (config, mut store) = fixture(RawMazeConfig::default());
        let actions = vec![Action::moving(Vec2::new(10.0, 0.0)), Action::IDLE];

        let result = resolve_tick(&config, &mut store, &actions).unwrap();
        assert_eq!(result.tick, 1);

        let agent = &store.state().agents[0];
        assert!((agent.position.x - (-40.0 + 10.0 / 60.0)).abs() < 1e-9);
        assert!((agent.velocity.x - 10.0).abs() < 1e-6);
        assert_eq!(agent.heading, 0.0);
        assert_eq!(store.state().agents[1].position, Vec2::new(40.0, 0.0));
    }

    #[test]
    fn test_invalid_action_is_noop() {
        let (config, mut store) = fixture(RawMazeConfig::default());
        let actions = vec![Action::moving(Vec2::new(1000.0, 0.0)), Action::moving(Vec2::new(f64::INFINITY, 0.0))];

        let result = resolve_tick(&config, &mut store, &actions).unwrap();
        assert_eq!(result.invalid_actions.len(), 2);
        assert!(matches!(result.invalid_actions[0], (AgentId(0), InvalidAction::OverSpeed { .. })));
        assert_eq!(store.state().agents[0].position, Vec2::new(-40.0, 0.0));
        assert_eq!(store.state().agents[1].position, Vec2::new(40.0, 0.0));
    }

    #[test]
    fn test_corridor_head_on() {
        let raw = RawMazeConfig {
            teams: 2,
            layout: LayoutConfig::Grid {
                cell_size: 1.0,
                rows: vec!["##########".into(), "#........#".into(), "##########".into()],
            },
            agents: vec![
                AgentConfig { team: TeamId(0), spawn: Vec2::new(1.5, 1.5), radius: 0.4, ..AgentConfig::default() },
                AgentConfig { team: TeamId(1), spawn: Vec2::new(8.5, 1.5), radius: 0.4, ..AgentConfig::default() },
            ],
            flags: Vec::new(),
            capture_points: Vec::new(),
            ..RawMazeConfig::default()
        };
        let (config, mut store) = fixture(raw);
        let actions = vec![Action::moving(Vec2::new(10.0, 0.0)), Action::moving(Vec2::new(-10.0, 0.0))];

        for _ in 0..120 {
            resolve_tick(&config, &mut store, &actions).unwrap();
            let (a, b) = (&store.state().agents[0], &store.state().agents[1]);
            assert!(a.position.x < b.position.x);
            assert!(a.position.distance(b.position) >= 0.8 - 1e-6);
        }

        let (a, b) = (&store.state().agents[0], &store.state().agents[1]);
        assert!(a.position.distance(b.position) < 0.81);
        assert!((a.position.y - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_first_pickup_wins() {
        let mut raw = RawMazeConfig::default();
        raw.agents.push(AgentConfig {
            name: "Red 2".into(),
            team: TeamId(0),
            spawn: Vec2::new(-40.0, -10.0),
            ..AgentConfig::default()
        });
        let (config, mut store) = fixture(raw);
        store.apply_motion(AgentId(0), Vec2::new(28.0, 0.0), Vec2::ZERO);
        store.apply_motion(AgentId(2), Vec2::new(30.0, 2.0), Vec2::ZERO);

        let grab = Action::IDLE.with_interaction(Interaction::PickupFlag(FlagId(1)));
        let result = resolve_tick(&config, &mut store, &[grab, Action::IDLE, grab]).unwrap();

        assert_eq!(store.state().flags[1].carrier(), Some(AgentId(0)));
        assert_eq!(store.state().agents[2].carrying, None);
        assert_eq!(result.events.len(), 1);
    }

    #[test]
    fn test_tag_and_respawn() {
        let mut raw = RawMazeConfig::default();
        raw.rules.respawn_ticks = 3;
        let (config, mut store) = fixture(raw);
        store.apply_motion(AgentId(0), Vec2::new(38.5, 0.0), Vec2::ZERO);

        let tag = Action::IDLE.with_interaction(Interaction::Tag(AgentId(1)));
        let result = resolve_tick(&config, &mut store, &[tag, Action::IDLE]).unwrap();

        assert_eq!(result.events[0].data, GameEventData::AgentTagged { tagger: AgentId(0), target: AgentId(1) });
        let target = &store.state().agents[1];
        assert!(!target.active);
        assert!(target.raycasts.is_empty());
        assert_eq!(store.state().agents[0].tags, 1);
        assert_eq!(store.state().agents[0].tag_cooldown, 60);

        for _ in 0..2 {
            let idle_actions = idle(&store);
            resolve_tick(&config, &mut store, &idle_actions).unwrap();
            assert!(!store.state().agents[1].active);
        }
        let idle_actions = idle(&store);
        let result = resolve_tick(&config, &mut store, &idle_actions).unwrap();
        assert!(store.state().agents[1].active);
        assert_eq!(store.state().agents[1].position, Vec2::new(40.0, 0.0));
        assert!(result.events.contains(&GameEvent::agent_respawned(4, AgentId(1))));
    }

    #[test]
    fn test_tag_needs_line_of_sight() {
        let mut raw = RawMazeConfig::default();
        raw.rules.tag_range = 4.0;
        let (config, mut store) = fixture(raw);
        // The east side bar (x = 45) sits between them.
        store.apply_motion(AgentId(0), Vec2::new(43.0, 10.0), Vec2::ZERO);
        store.apply_motion(AgentId(1), Vec2::new(47.0, 10.0), Vec2::ZERO);

        let tag = Action::IDLE.with_interaction(Interaction::Tag(AgentId(1)));
        resolve_tick(&config, &mut store, &[tag, Action::IDLE]).unwrap();
        assert!(store.state().agents[1].active);
        assert_eq!(store.state().agents[0].tags, 0);
    }

    #[test]
    fn test_tag_drops_carried_flag() {
        let (config, mut store) = fixture(RawMazeConfig::default());
        store.apply_motion(AgentId(0), Vec2::new(28.0, 0.0), Vec2::ZERO);
        let grab = Action::IDLE.with_interaction(Interaction::PickupFlag(FlagId(1)));
        resolve_tick(&config, &mut store, &[grab, Action::IDLE]).unwrap();

        store.apply_motion(AgentId(1), Vec2::new(29.5, 0.0), Vec2::ZERO);
        let tag = Action::IDLE.with_interaction(Interaction::Tag(AgentId(0)));
        let result = resolve_tick(&config, &mut store, &[Action::IDLE, tag]).unwrap();

        assert!(result.events.iter().any(|e| matches!(
            e.data,
            GameEventData::FlagDropped { reason: DropReason::Tagged, .. }
        )));
        assert_eq!(store.state().flags[1].status, FlagStatus::Dropped { since: 2 });
        assert_eq!(store.state().agents[0].carrying, None);
    }

    #[test]
    fn test_capture_reaches_score_to_win() {
        let mut raw = RawMazeConfig::default();
        raw.rules.score_to_win = Some(10);
        let (config, mut store) = fixture(raw);
        store.apply_motion(AgentId(0), Vec2::new(28.0, 0.0), Vec2::ZERO);
        let grab = Action::IDLE.with_interaction(Interaction::PickupFlag(FlagId(1)));
        resolve_tick(&config, &mut store, &[grab, Action::IDLE]).unwrap();

        store.apply_motion(AgentId(0), Vec2::new(-40.0, 19.0), Vec2::ZERO);
        let idle_actions = idle(&store);
        let result = resolve_tick(&config, &mut store, &idle_actions).unwrap();

        assert_eq!(result.end, Some(EndReason::ScoreReached { team: TeamId(0) }));
        assert!(store.state().terminal);
        assert_eq!(store.state().score(TeamId(0)), 10);
        assert!(matches!(
            result.events.last().map(|e| &e.data),
            Some(GameEventData::MatchEnded { winner: Some(TeamId(0)), .. })
        ));

        // Terminal stores do not advance.
        let idle_actions = idle(&store);
        let after = resolve_tick(&config, &mut store, &idle_actions).unwrap();
        assert_eq!(after.tick, 2);
        assert_eq!(store.state().tick, 2);
    }

    #[test]
    fn test_all_flags_captured_ends_run() {
        let mut raw = RawMazeConfig::default();
        raw.flags.remove(0);
        let (config, mut store) = fixture(raw);
        store.apply_motion(AgentId(0), Vec2::new(28.0, 0.0), Vec2::ZERO);
        let grab = Action::IDLE.with_interaction(Interaction::PickupFlag(FlagId(0)));
        resolve_tick(&config, &mut store, &[grab, Action::IDLE]).unwrap();

        store.apply_motion(AgentId(0), Vec2::new(-40.0, 19.0), Vec2::ZERO);
        let idle_actions = idle(&store);
        let result = resolve_tick(&config, &mut store, &idle_actions).unwrap();
        assert_eq!(result.end, Some(EndReason::AllFlagsCaptured));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn test_random_steering_stays_consistent(
            steering in prop::collection::vec((0.0f64..std::f64::consts::TAU, 0.0f64..=10.0), 1..90)
        ) {
            let (config, mut store) = fixture(RawMazeConfig::default());
            for (i, (angle, speed)) in steering.iter().enumerate() {
                let actions = vec![
                    Action::moving(Vec2::from_angle(*angle) * *speed),
                    Action::moving(Vec2::from_angle(angle + i as f64) * *speed),
                ];
                prop_assert!(resolve_tick(&config, &mut store, &actions).is_ok());
                for agent in &store.state().agents {
                    prop_assert!(config.maze().is_open(agent.position, agent.radius - 1e-6));
                }
            }
        }
    }
}
