//! Maze Configuration
//!
//! Two layers:
//!
//! ```text
//!   JSON ──serde──► RawMazeConfig ──validate──► MazeConfig (immutable)
//!                      (defaults)                 + compiled Maze
//! ```
//!
//! `RawMazeConfig` is the plain input contract with `#[serde(default)]` on
//! every table, so an empty object `{}` describes the stock two-team arena.
//! `MazeConfig` only exists after every check in [`validate`] has passed;
//! its fields are private and read through getters.

mod validate;

use std::path::Path;

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::hash::{hash_with_domain, StateHash};
use crate::core::vec2::Vec2;
use crate::game::maze::Maze;
use crate::game::state::{AgentId, CapturePointId, FlagId, TeamId};

// =============================================================================
// LAYOUT
// =============================================================================

/// A single wall segment in a segment layout.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WallConfig {
    pub start: Vec2,
    pub end: Vec2,
}

impl WallConfig {
    pub const fn new(start: Vec2, end: Vec2) -> Self {
        Self { start, end }
    }
}

/// Maze wall description.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayoutConfig {
    /// Character grid: `#` is wall, `.` is open.
    ///
    /// Cell `(col, row)` covers `x ∈ [col·s, (col+1)·s]`, `y ∈ [row·s, (row+1)·s]`.
    /// Everything outside the grid is wall.
    Grid {
        cell_size: f64,
        rows: Vec<String>,
    },
    /// Axis-aligned bounds plus free-standing wall segments of a given thickness.
    Segments {
        min: Vec2,
        max: Vec2,
        wall_thickness: f64,
        walls: Vec<WallConfig>,
    },
}

impl Default for LayoutConfig {
    /// The 100×100 arena: outer box, two side bars per flank, middle bars
    /// and the two centre diamonds.
    fn default() -> Self {
        let w = |x0: f64, y0: f64, x1: f64, y1: f64| WallConfig::new(Vec2::new(x0, y0), Vec2::new(x1, y1));

        let walls = vec![
            // Outer box
            w(-50.0, 50.0, 50.0, 50.0),
            w(50.0, 50.0, 50.0, -50.0),
            w(50.0, -50.0, -50.0, -50.0),
            w(-50.0, -50.0, -50.0, 50.0),
            // Side bars
            w(-45.0, 45.0, -45.0, 5.0),
            w(-45.0, -5.0, -45.0, -45.0),
            w(45.0, 45.0, 45.0, 5.0),
            w(45.0, -5.0, 45.0, -45.0),
            // Middle bars
            w(-10.0, 5.0, 10.0, 5.0),
            w(-10.0, -5.0, 10.0, -5.0),
            // Left diamond
            w(-5.0, 0.0, -35.0, 30.0),
            w(-35.0, -30.0, -5.0, 0.0),
            w(-5.0, 0.0, 25.0, -30.0),
            w(25.0, 20.0, 5.0, 0.0),
            // Right diamond
            w(5.0, 0.0, 35.0, 30.0),
            w(35.0, -30.0, 5.0, 0.0),
            w(5.0, 0.0, -25.0, 30.0),
            w(-25.0, -20.0, -5.0, 0.0),
        ];

        LayoutConfig::Segments {
            min: Vec2::new(-50.0, -50.0),
            max: Vec2::new(50.0, 50.0),
            wall_thickness: 1.0,
            walls,
        }
    }
}

// =============================================================================
// ENTITY CONFIGS
// =============================================================================

/// Static per-agent parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    pub team: TeamId,
    pub spawn: Vec2,
    /// Upper bound on requested speed (world units / second)
    pub max_speed: f64,
    /// Collision radius
    pub radius: f64,
    /// Overrides `camera.fov_degrees` for this agent
    pub fov_degrees: Option<f64>,
    /// Overrides `camera.view_range` for this agent
    pub view_range: Option<f64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "Agent".to_string(),
            team: TeamId(0),
            spawn: Vec2::ZERO,
            max_speed: 10.0,
            radius: 0.5,
            fov_degrees: None,
            view_range: None,
        }
    }
}

/// A team flag. Identity is its index in `flags`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlagConfig {
    pub team: TeamId,
    pub home: Vec2,
}

impl Default for FlagConfig {
    fn default() -> Self {
        Self { team: TeamId(0), home: Vec2::ZERO }
    }
}

/// A capture point. Identity is its index in `capture_points`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapturePointConfig {
    pub position: Vec2,
    pub radius: f64,
    /// Contiguous uncontested ticks required to flip ownership
    pub capture_ticks: u32,
    pub initial_owner: Option<TeamId>,
}

impl Default for CapturePointConfig {
    fn default() -> Self {
        Self {
            position: Vec2::ZERO,
            radius: 3.0,
            capture_ticks: 120,
            initial_owner: None,
        }
    }
}

/// Vision model shared by every agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Full cone angle for sightings, centred on the agent heading
    pub fov_degrees: f64,
    pub view_range: f64,
    pub occluded_by_walls: bool,
    /// Rays evenly spaced over a full turn
    pub ray_count: u32,
    pub ray_range: f64,
    /// Gaussian noise on ray hit distances
    pub range_noise_stddev: f64,
    /// Publish the true occupancy grid in every snapshot
    pub share_true_map: bool,
    pub map_cell_size: f64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_degrees: 120.0,
            view_range: 20.0,
            occluded_by_walls: true,
            ray_count: 16,
            ray_range: 20.0,
            range_noise_stddev: 0.0,
            share_true_map: false,
            map_cell_size: 1.0,
        }
    }
}

/// Contest rules.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Max centre distance between agent and flag for a pickup
    pub pickup_radius: f64,
    /// Max centre distance for a tag
    pub tag_range: f64,
    pub tag_cooldown_ticks: u32,
    /// Ticks a tagged agent stays out before respawning
    pub respawn_ticks: u32,
    pub flag_capture_score: u32,
    pub capture_point_flip_score: u32,
    /// Dropped flags return home after this many ticks (None = never)
    pub dropped_flag_return_ticks: Option<u32>,
    pub score_to_win: Option<u32>,
    pub end_when_all_flags_captured: bool,
    /// Presence at a capture point only counts with an explicit `Contest`
    pub require_contest_intent: bool,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            pickup_radius: 3.0,
            tag_range: 2.0,
            tag_cooldown_ticks: 60,
            respawn_ticks: 180,
            flag_capture_score: 10,
            capture_point_flip_score: 1,
            dropped_flag_return_ticks: Some(600),
            score_to_win: None,
            end_when_all_flags_captured: true,
            require_contest_intent: false,
        }
    }
}

/// Tick loop settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Simulated seconds per tick
    pub tick_seconds: f64,
    pub max_ticks: u64,
    /// Per-agent budget for one `get_action`
    pub action_timeout_ms: u64,
    /// Per-agent budget for `startup`
    pub startup_timeout_ms: u64,
    /// Agents are asked for a new action every N ticks
    pub decision_interval_ticks: u32,
    /// Sensor-noise seed
    pub seed: u64,
    /// Ticks between transcript checkpoints
    pub checkpoint_interval: u64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            tick_seconds: 1.0 / 60.0,
            max_ticks: 3600,
            action_timeout_ms: 50,
            startup_timeout_ms: 1000,
            decision_interval_ticks: 1,
            seed: 0,
            checkpoint_interval: 60,
        }
    }
}

// =============================================================================
// RAW CONFIG
// =============================================================================

/// Unvalidated configuration as read from JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawMazeConfig {
    pub teams: u32,
    pub layout: LayoutConfig,
    pub agents: Vec<AgentConfig>,
    pub flags: Vec<FlagConfig>,
    pub capture_points: Vec<CapturePointConfig>,
    pub camera: CameraConfig,
    pub rules: RulesConfig,
    pub simulation: SimulationSettings,
}

impl Default for RawMazeConfig {
    /// Two teams of one agent each on the stock arena, one flag per team,
    /// a home capture point per team and a neutral one in the centre.
    fn default() -> Self {
        Self {
            teams: 2,
            layout: LayoutConfig::default(),
            agents: vec![
                AgentConfig {
                    name: "Red".to_string(),
                    team: TeamId(0),
                    spawn: Vec2::new(-40.0, 0.0),
                    ..AgentConfig::default()
                },
                AgentConfig {
                    name: "Blue".to_string(),
                    team: TeamId(1),
                    spawn: Vec2::new(40.0, 0.0),
                    ..AgentConfig::default()
                },
            ],
            flags: vec![
                FlagConfig { team: TeamId(0), home: Vec2::new(-30.0, 0.0) },
                FlagConfig { team: TeamId(1), home: Vec2::new(30.0, 0.0) },
            ],
            capture_points: vec![
                CapturePointConfig {
                    position: Vec2::new(-40.0, 20.0),
                    initial_owner: Some(TeamId(0)),
                    ..CapturePointConfig::default()
                },
                CapturePointConfig {
                    position: Vec2::new(40.0, 20.0),
                    initial_owner: Some(TeamId(1)),
                    ..CapturePointConfig::default()
                },
                CapturePointConfig::default(),
            ],
            camera: CameraConfig::default(),
            rules: RulesConfig::default(),
            simulation: SimulationSettings::default(),
        }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Malformed or inconsistent configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// JSON did not match the expected shape.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    /// Grid layout has no rows or no columns.
    #[error("grid layout is empty")]
    EmptyGrid,
    /// Grid rows differ in length.
    #[error("grid row {row} has {found} cells, expected {expected}")]
    RaggedGrid { row: usize, expected: usize, found: usize },
    /// Grid contains a character other than `#` or `.`.
    #[error("unknown grid cell {cell:?} at row {row}, column {col}")]
    UnknownCell { row: usize, col: usize, cell: char },
    /// A number is non-finite or outside its allowed range.
    #[error("{field} must be {requirement}, got {value}")]
    OutOfRange { field: String, requirement: &'static str, value: f64 },
    /// Segment layout bounds do not span a positive area.
    #[error("layout bounds {min} .. {max} are degenerate")]
    DegenerateBounds { min: Vec2, max: Vec2 },
    /// A configured position is inside a wall or outside the maze.
    #[error("{entity} at {position} is not in open space")]
    NotInOpenSpace { entity: String, position: Vec2 },
    /// Two capture point areas intersect.
    #[error("capture points {a} and {b} overlap")]
    OverlappingCapturePoints { a: CapturePointId, b: CapturePointId },
    /// A flag sits inside a capture point initially owned by another team.
    #[error("flag {flag} home lies inside capture point {capture_point} owned by team {owner}")]
    FlagInsideForeignCapturePoint { flag: FlagId, capture_point: CapturePointId, owner: TeamId },
    /// Two flags share a home position.
    #[error("flags {a} and {b} share a home position")]
    SharedFlagHome { a: FlagId, b: FlagId },
    /// Two agents' spawn circles overlap.
    #[error("agents {a} and {b} have overlapping spawns")]
    OverlappingSpawns { a: AgentId, b: AgentId },
    /// No teams configured.
    #[error("at least one team is required")]
    NoTeams,
    /// No agents configured.
    #[error("at least one agent is required")]
    NoAgents,
    /// An entity names a team index that does not exist.
    #[error("{entity} references team {team}, but only {teams} teams exist")]
    UnknownTeam { entity: String, team: TeamId, teams: u32 },
    /// A configured team has no agent.
    #[error("team {0} has no agents")]
    EmptyTeam(TeamId),
}

// =============================================================================
// VALIDATED CONFIG
// =============================================================================

/// Validated, immutable configuration tree.
///
/// Only constructed by [`parse_config`], [`load_config`] or
/// [`MazeConfig::from_raw`], all of which run full validation.
#[derive(Clone, Debug)]
pub struct MazeConfig {
    raw: RawMazeConfig,
    maze: Maze,
    hash: StateHash,
}

impl MazeConfig {
    /// Validate a raw config and compile its maze.
    pub fn from_raw(raw: RawMazeConfig) -> Result<Self, ConfigError> {
        let maze = validate::validate(&raw)?;
        let hash = config_hash(&raw)?;
        Ok(Self { raw, maze, hash })
    }

    /// The stock arena with default rules.
    pub fn default_arena() -> Result<Self, ConfigError> {
        Self::from_raw(RawMazeConfig::default())
    }

    pub fn teams(&self) -> u32 {
        self.raw.teams
    }

    pub fn maze(&self) -> &Maze {
        &self.maze
    }

    pub fn layout(&self) -> &LayoutConfig {
        &self.raw.layout
    }

    pub fn agents(&self) -> &[AgentConfig] {
        &self.raw.agents
    }

    pub fn agent(&self, id: AgentId) -> Option<&AgentConfig> {
        self.raw.agents.get(id.index())
    }

    pub fn flags(&self) -> &[FlagConfig] {
        &self.raw.flags
    }

    pub fn capture_points(&self) -> &[CapturePointConfig] {
        &self.raw.capture_points
    }

    pub fn camera(&self) -> &CameraConfig {
        &self.raw.camera
    }

    pub fn rules(&self) -> &RulesConfig {
        &self.raw.rules
    }

    pub fn simulation(&self) -> &SimulationSettings {
        &self.raw.simulation
    }

    /// The validated input, for re-serialization.
    pub fn raw(&self) -> &RawMazeConfig {
        &self.raw
    }

    /// SHA-256 of the canonical JSON form. Recorded in transcripts.
    pub fn config_hash(&self) -> StateHash {
        self.hash
    }

    /// Field of view for an agent, in radians.
    pub fn fov_radians(&self, id: AgentId) -> f64 {
        self.agent(id)
            .and_then(|a| a.fov_degrees)
            .unwrap_or(self.raw.camera.fov_degrees)
            .to_radians()
    }

    /// Sighting range for an agent.
    pub fn view_range(&self, id: AgentId) -> f64 {
        self.agent(id)
            .and_then(|a| a.view_range)
            .unwrap_or(self.raw.camera.view_range)
    }
}

fn config_hash(raw: &RawMazeConfig) -> Result<StateHash, ConfigError> {
    let canonical = serde_json::to_vec(raw)?;
    Ok(hash_with_domain(b"MAZE_ARENA_CONFIG_V1", &canonical))
}

/// Parse and validate a JSON config.
pub fn parse_config(raw: &str) -> Result<MazeConfig, ConfigError> {
    let parsed: RawMazeConfig = serde_json::from_str(raw)?;
    MazeConfig::from_raw(parsed)
}

/// Read, parse and validate a JSON config file.
pub fn load_config(path: impl AsRef<Path>) -> Result<MazeConfig, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_config(&text)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_is_default_arena() {
        let config = parse_config("{}").unwrap();
        assert_eq!(config.teams(), 2);
        assert_eq!(config.agents().len(), 2);
        assert_eq!(config.flags().len(), 2);
        assert_eq!(config.capture_points().len(), 3);
        assert_eq!(config.raw(), &RawMazeConfig::default());
    }

    #[test]
    fn test_default_arena_walls() {
        let config = MazeConfig::default_arena().unwrap();
        // 18 configured walls + 4 bound edges
        assert_eq!(config.maze().walls().len(), 22);
    }

    #[test]
    fn test_parse_grid_layout() {
        let json = r######"{
            "teams": 1,
            "layout": { "kind": "grid", "cell_size": 1.0, "rows": ["#####", "#...#", "#####"] },
            "agents": [ { "team": 0, "spawn": { "x": 1.5, "y": 1.5 }, "radius": 0.4 } ],
            "flags": [],
            "capture_points": []
        }"######;

        let config = parse_config(json).unwrap();
        assert_eq!(config.agents()[0].radius, 0.4);
        assert!(config.maze().is_open(Vec2::new(2.5, 1.5), 0.4));
        assert!(!config.maze().is_open(Vec2::new(0.5, 0.5), 0.0));
    }

    #[test]
    fn test_config_hash_tracks_content() {
        let a = MazeConfig::default_arena().unwrap();
        let b = MazeConfig::default_arena().unwrap();
        assert_eq!(a.config_hash(), b.config_hash());

        let mut raw = RawMazeConfig::default();
        raw.simulation.seed = 99;
        let c = MazeConfig::from_raw(raw).unwrap();
        assert_ne!(a.config_hash(), c.config_hash());
    }

    #[test]
    fn test_vision_overrides() {
        let mut raw = RawMazeConfig::default();
        raw.agents[1].view_range = Some(5.0);
        raw.agents[1].fov_degrees = Some(90.0);
        let config = MazeConfig::from_raw(raw).unwrap();

        assert_eq!(config.view_range(AgentId(0)), 20.0);
        assert_eq!(config.view_range(AgentId(1)), 5.0);
        assert!((config.fov_radians(AgentId(1)) - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn test_bad_json_is_parse_error() {
        assert!(matches!(parse_config("{ not json"), Err(ConfigError::Parse(_))));
        assert!(matches!(parse_config(r#"{"teams": "two"}"#), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_config("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
