//! Game State Definitions
//!
//! All state types for the simulation, plus the [`EntityStore`] that owns
//! the canonical copy.
//!
//! ```text
//!   EntityStore (mutable, engine-only)
//!        │ snapshot()
//!        ▼
//!   Arc<GameState> ──► agents (read-only, never mutated after publication)
//! ```
//!
//! Every collection is a `Vec` indexed by id, so iteration order is the
//! id order and stays fixed for the whole run.

use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::config::MazeConfig;
use crate::core::hash::{compute_state_hash, StateHash, StateHasher};
use crate::core::rng::{derive_run_seed, DeterministicRng};
use crate::core::vec2::Vec2;
use crate::game::collision::HitInfo;
use crate::game::maze::OccupancyGrid;
use crate::game::perception::{perceive, Sighting};

/// Positions may sit this far inside a surface before it counts as a breach.
pub const INVARIANT_TOLERANCE: f64 = 1e-6;

// =============================================================================
// IDENTIFIERS
// =============================================================================

macro_rules! index_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            /// Position in the owning `Vec`.
            #[inline]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

index_id!(
    /// Agent index, stable for the whole run.
    AgentId
);
index_id!(
    /// Team index in `0..teams`.
    TeamId
);
index_id!(
    /// Flag index into `MazeConfig::flags`.
    FlagId
);
index_id!(
    /// Capture point index into `MazeConfig::capture_points`.
    CapturePointId
);

// =============================================================================
// AGENT STATE
// =============================================================================

/// State of a single agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub id: AgentId,
    pub team: TeamId,

    /// Centre of the collision circle
    pub position: Vec2,

    /// Respawn point
    pub spawn: Vec2,

    /// Velocity actually achieved last tick (after collision)
    pub velocity: Vec2,

    /// Facing in radians; follows the last non-zero requested velocity
    pub heading: f64,

    pub radius: f64,
    pub max_speed: f64,

    /// Flag currently held
    pub carrying: Option<FlagId>,

    /// False while tagged out
    pub active: bool,

    /// Ticks left before respawn (only meaningful while inactive)
    pub respawn_in: u32,

    /// Ticks left before this agent may tag again
    pub tag_cooldown: u32,

    /// Range readings, sorted by theta
    pub raycasts: Vec<HitInfo>,

    /// Agents and flags currently in view
    pub sightings: Vec<Sighting>,

    // =========================================================================
    // Stats
    // =========================================================================
    pub tags: u32,
    pub captures: u32,
}

impl AgentState {
    /// Create an agent at its spawn point.
    pub fn new(id: AgentId, team: TeamId, spawn: Vec2, radius: f64, max_speed: f64) -> Self {
        Self {
            id,
            team,
            position: spawn,
            spawn,
            velocity: Vec2::ZERO,
            heading: 0.0,
            radius,
            max_speed,
            carrying: None,
            active: true,
            respawn_in: 0,
            tag_cooldown: 0,
            raycasts: Vec::new(),
            sightings: Vec::new(),
            tags: 0,
            captures: 0,
        }
    }

    /// Hash this agent's state for verification.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u32(self.id.0);
        hasher.update_u32(self.team.0);
        hasher.update_vec2(self.position);
        hasher.update_vec2(self.velocity);
        hasher.update_f64(self.heading);
        hasher.update_opt_u32(self.carrying.map(|f| f.0));
        hasher.update_bool(self.active);
        hasher.update_u32(self.respawn_in);
        hasher.update_u32(self.tag_cooldown);
        hasher.update_u32(self.tags);
        hasher.update_u32(self.captures);

        hasher.update_u32(self.raycasts.len() as u32);
        for ray in &self.raycasts {
            ray.hash_into(hasher);
        }
        hasher.update_u32(self.sightings.len() as u32);
        for sighting in &self.sightings {
            sighting.hash_into(hasher);
        }
    }
}

// =============================================================================
// FLAG STATE
// =============================================================================

/// Where a flag is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlagStatus {
    /// Resting at its home position
    AtHome,
    /// Held by exactly one agent
    Carried { agent: AgentId },
    /// Lying on the floor since the given tick
    Dropped { since: u64 },
}

/// State of a single flag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlagState {
    pub id: FlagId,
    /// Owning team
    pub team: TeamId,
    pub home: Vec2,
    pub position: Vec2,
    pub status: FlagStatus,
    /// Times an opposing team has scored with this flag
    pub times_captured: u32,
}

impl FlagState {
    pub fn new(id: FlagId, team: TeamId, home: Vec2) -> Self {
        Self {
            id,
            team,
            home,
            position: home,
            status: FlagStatus::AtHome,
            times_captured: 0,
        }
    }

    /// Current carrier, if any.
    #[inline]
    pub fn carrier(&self) -> Option<AgentId> {
        match self.status {
            FlagStatus::Carried { agent } => Some(agent),
            _ => None,
        }
    }

    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u32(self.id.0);
        hasher.update_vec2(self.position);
        match self.status {
            FlagStatus::AtHome => hasher.update_u8(0),
            FlagStatus::Carried { agent } => {
                hasher.update_u8(1);
                hasher.update_u32(agent.0);
            }
            FlagStatus::Dropped { since } => {
                hasher.update_u8(2);
                hasher.update_u64(since);
            }
        }
        hasher.update_u32(self.times_captured);
    }
}

// =============================================================================
// CAPTURE POINT STATE
// =============================================================================

/// State of a capture point.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapturePointState {
    pub id: CapturePointId,
    pub position: Vec2,
    pub radius: f64,
    /// Contiguous uncontested ticks needed to flip
    pub capture_ticks: u32,
    pub owner: Option<TeamId>,
    /// Team currently accumulating progress
    pub controlling: Option<TeamId>,
    pub progress: u32,
}

impl CapturePointState {
    pub fn new(id: CapturePointId, position: Vec2, radius: f64, capture_ticks: u32, owner: Option<TeamId>) -> Self {
        Self {
            id,
            position,
            radius,
            capture_ticks,
            owner,
            controlling: None,
            progress: 0,
        }
    }

    /// Point lies inside the capture area (boundary inclusive).
    #[inline]
    pub fn contains(&self, point: Vec2) -> bool {
        self.position.distance_squared(point) <= self.radius * self.radius
    }

    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u32(self.id.0);
        hasher.update_opt_u32(self.owner.map(|t| t.0));
        hasher.update_opt_u32(self.controlling.map(|t| t.0));
        hasher.update_u32(self.progress);
    }
}

// =============================================================================
// GAME STATE
// =============================================================================

/// Complete, immutable snapshot of the simulation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    /// Ticks resolved so far (0 = initial state)
    pub tick: u64,

    /// Index = agent id
    pub agents: Vec<AgentState>,

    /// Index = flag id
    pub flags: Vec<FlagState>,

    /// Index = capture point id
    pub capture_points: Vec<CapturePointState>,

    /// Index = team id
    pub scores: Vec<u32>,

    /// No further ticks will be resolved
    pub terminal: bool,

    /// Total flag captures across all teams
    pub flags_captured: u32,

    /// Lower-left corner of the maze bounds
    pub world_min: Vec2,

    /// Upper-right corner of the maze bounds
    pub world_max: Vec2,

    /// True occupancy map, shared when the camera config asks for it.
    /// Static for the run, so it is neither serialized nor hashed.
    #[serde(skip)]
    pub true_map: Option<Arc<OccupancyGrid>>,
}

impl GameState {
    /// Build the tick-0 state from a validated config.
    pub fn initial(config: &MazeConfig) -> Self {
        let agents = config
            .agents()
            .iter()
            .enumerate()
            .map(|(i, a)| AgentState::new(AgentId(i as u32), a.team, a.spawn, a.radius, a.max_speed))
            .collect();

        let flags = config
            .flags()
            .iter()
            .enumerate()
            .map(|(i, f)| FlagState::new(FlagId(i as u32), f.team, f.home))
            .collect();

        let capture_points = config
            .capture_points()
            .iter()
            .enumerate()
            .map(|(i, c)| {
                CapturePointState::new(CapturePointId(i as u32), c.position, c.radius, c.capture_ticks, c.initial_owner)
            })
            .collect();

        let true_map = config.camera().share_true_map.then(|| {
            Arc::new(config.maze().occupancy_grid(config.camera().map_cell_size, config.flags(), config.capture_points()))
        });

        let (world_min, world_max) = config.maze().bounds();

        Self {
            tick: 0,
            agents,
            flags,
            capture_points,
            scores: vec![0; config.teams() as usize],
            terminal: false,
            flags_captured: 0,
            world_min,
            world_max,
            true_map,
        }
    }

    /// Get an agent by id.
    pub fn agent(&self, id: AgentId) -> Option<&AgentState> {
        self.agents.get(id.index())
    }

    /// Get a flag by id.
    pub fn flag(&self, id: FlagId) -> Option<&FlagState> {
        self.flags.get(id.index())
    }

    /// Get a capture point by id.
    pub fn capture_point(&self, id: CapturePointId) -> Option<&CapturePointState> {
        self.capture_points.get(id.index())
    }

    /// Score of a team (0 for unknown teams).
    pub fn score(&self, team: TeamId) -> u32 {
        self.scores.get(team.index()).copied().unwrap_or(0)
    }

    /// Team with the strictly highest score, if there is one.
    pub fn leader(&self) -> Option<TeamId> {
        let best = *self.scores.iter().max()?;
        let mut leaders = self.scores.iter().enumerate().filter(|(_, s)| **s == best);
        let (team, _) = leaders.next()?;
        if leaders.next().is_some() {
            None
        } else {
            Some(TeamId(team as u32))
        }
    }

    /// Every flag has been captured at least once.
    pub fn all_flags_captured(&self) -> bool {
        !self.flags.is_empty() && self.flags.iter().all(|f| f.times_captured > 0)
    }

    /// Hash this snapshot together with the noise stream position.
    pub fn compute_hash(&self, rng_state: [u64; 2]) -> StateHash {
        compute_state_hash(self.tick, rng_state, |hasher| {
            hasher.update_bool(self.terminal);
            hasher.update_u32(self.flags_captured);

            hasher.update_u32(self.scores.len() as u32);
            for score in &self.scores {
                hasher.update_u32(*score);
            }
            for agent in &self.agents {
                agent.hash_into(hasher);
            }
            for flag in &self.flags {
                flag.hash_into(hasher);
            }
            for point in &self.capture_points {
                point.hash_into(hasher);
            }
        })
    }

    /// Encode the snapshot with bincode (used for byte-level comparison).
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }
}

// =============================================================================
// INVARIANTS
// =============================================================================

/// What went wrong.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum InvariantKind {
    #[error("agent {agent} at {position} is not in open space")]
    AgentNotInOpenSpace { agent: AgentId, position: Vec2 },
    #[error("agent {agent} has non-finite state")]
    NonFinite { agent: AgentId },
    #[error("agents {a} and {b} overlap")]
    AgentsOverlap { a: AgentId, b: AgentId },
    #[error("flag {flag} and agent {agent} disagree about who carries it")]
    CarrierMismatch { flag: FlagId, agent: AgentId },
    #[error("capture point {point} progress {progress} reached {capture_ticks} without flipping")]
    ProgressOverflow { point: CapturePointId, progress: u32, capture_ticks: u32 },
}

/// Internal inconsistency. Fatal: the run stops and carries the snapshot
/// that exposed it.
#[derive(Debug, Error)]
#[error("invariant violated at tick {tick}: {kind}")]
pub struct GeometryInvariantViolation {
    pub tick: u64,
    pub kind: InvariantKind,
    pub snapshot: Box<GameState>,
}

// =============================================================================
// ENTITY STORE
// =============================================================================

/// Owner of the canonical mutable state.
///
/// Only the tick resolver mutates it; everything else reads
/// [`EntityStore::snapshot`].
#[derive(Clone, Debug)]
pub struct EntityStore {
    pub(crate) state: GameState,
    pub(crate) rng: DeterministicRng,
}

impl EntityStore {
    /// Build the initial store: entities at spawn/home and tick-0 perception.
    pub fn new(config: &MazeConfig) -> Self {
        let seed = derive_run_seed(config.simulation().seed, &config.config_hash());
        let mut store = Self {
            state: GameState::initial(config),
            rng: DeterministicRng::new(seed),
        };
        perceive(config, &mut store.state, &mut store.rng);
        store
    }

    /// Read the canonical state.
    #[inline]
    pub fn state(&self) -> &GameState {
        &self.state
    }

    /// Publish an immutable copy.
    pub fn snapshot(&self) -> Arc<GameState> {
        Arc::new(self.state.clone())
    }

    /// Bump the tick counter.
    pub fn advance_tick(&mut self) -> u64 {
        self.state.tick += 1;
        self.state.tick
    }

    /// Write a post-collision position and the velocity it implies.
    pub fn apply_motion(&mut self, id: AgentId, position: Vec2, velocity: Vec2) {
        if let Some(agent) = self.state.agents.get_mut(id.index()) {
            agent.position = position;
            agent.velocity = velocity;
        }
    }

    /// No further ticks.
    pub fn mark_terminal(&mut self) {
        self.state.terminal = true;
    }

    /// Add to a team's score.
    pub fn add_score(&mut self, team: TeamId, amount: u32) {
        if let Some(score) = self.state.scores.get_mut(team.index()) {
            *score = score.saturating_add(amount);
        }
    }

    /// Noise stream position, for hashing and checkpoints.
    pub fn rng_state(&self) -> [u64; 2] {
        self.rng.state()
    }

    /// Hash of the current state.
    pub fn state_hash(&self) -> StateHash {
        self.state.compute_hash(self.rng.state())
    }

    /// Check every structural invariant of the current state.
    pub fn check_invariants(&self, config: &MazeConfig) -> Result<(), GeometryInvariantViolation> {
        self.find_violation(config).map_or(Ok(()), |kind| {
            Err(GeometryInvariantViolation {
                tick: self.state.tick,
                kind,
                snapshot: Box::new(self.state.clone()),
            })
        })
    }

    fn find_violation(&self, config: &MazeConfig) -> Option<InvariantKind> {
        let state = &self.state;
        let maze = config.maze();

        for agent in state.agents.iter().filter(|a| a.active) {
            if !agent.position.is_finite() || !agent.velocity.is_finite() {
                return Some(InvariantKind::NonFinite { agent: agent.id });
            }
            if !maze.is_open(agent.position, agent.radius - INVARIANT_TOLERANCE) {
                return Some(InvariantKind::AgentNotInOpenSpace { agent: agent.id, position: agent.position });
            }
        }

        for (i, a) in state.agents.iter().enumerate().filter(|(_, a)| a.active) {
            for b in state.agents.iter().skip(i + 1).filter(|b| b.active) {
                let reach = a.radius + b.radius - INVARIANT_TOLERANCE;
                if a.position.distance_squared(b.position) < reach * reach {
                    return Some(InvariantKind::AgentsOverlap { a: a.id, b: b.id });
                }
            }
        }

        // Flag -> carrier and carrier -> flag must agree both ways.
        for flag in &state.flags {
            if let Some(agent) = flag.carrier() {
                let held = state.agent(agent).and_then(|a| a.carrying);
                if held != Some(flag.id) {
                    return Some(InvariantKind::CarrierMismatch { flag: flag.id, agent });
                }
            }
        }
        for agent in &state.agents {
            if let Some(flag) = agent.carrying {
                let carrier = state.flag(flag).and_then(|f| f.carrier());
                if carrier != Some(agent.id) {
                    return Some(InvariantKind::CarrierMismatch { flag, agent: agent.id });
                }
            }
        }

        for point in &state.capture_points {
            if point.progress >= point.capture_ticks {
                return Some(InvariantKind::ProgressOverflow {
                    point: point.id,
                    progress: point.progress,
                    capture_ticks: point.capture_ticks,
                });
            }
        }

        None
    }
}

// =============================================================================
// TESTS
// =============================================================================
