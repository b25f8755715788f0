//! # Maze Arena
//!
//! Deterministic multi-agent capture-the-flag simulation for evaluating
//! agent programs.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        MAZE ARENA                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                 │
//! │  ├── vec2.rs     - 2D f64 vector                            │
//! │  ├── rng.rs      - Seeded Xorshift128+ (sensor noise)       │
//! │  └── hash.rs     - State hashing for verification           │
//! │                                                             │
//! │  config/         - JSON config, defaults and validation     │
//! │                                                             │
//! │  game/           - Game logic (deterministic)               │
//! │  ├── maze.rs     - Wall geometry and open space             │
//! │  ├── collision.rs- Swept motion and hit tests               │
//! │  ├── state.rs    - Entity store and invariants              │
//! │  ├── action.rs   - Actions, validation, recording           │
//! │  ├── flag.rs     - Flag pickup, drop, return, capture       │
//! │  ├── capture.rs  - Capture point control                    │
//! │  ├── perception.rs- Raycasts and sightings                  │
//! │  └── tick.rs     - Authoritative tick resolution            │
//! │                                                             │
//! │  sim/            - Driver (talks to agents)                 │
//! │  ├── agent.rs    - Agent trait and worker threads           │
//! │  ├── driver.rs   - Run lifecycle                            │
//! │  ├── bots.rs     - Built-in agents                          │
//! │  ├── transcript.rs- Replayable recording                    │
//! │  └── verify.rs   - Replay verification                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! `core/` and `game/` never read the clock or an unseeded source of
//! randomness, and resolve agents in index order. Given the same config and
//! the same per-tick actions, every run produces the same sequence of
//! states on the same platform. Agent timing only decides *which* actions
//! are submitted; the transcript records them so the run can be replayed.

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod config;
pub mod game;
pub mod sim;

// Re-export commonly used types
pub use core::vec2::Vec2;
pub use core::rng::DeterministicRng;
pub use config::{load_config, parse_config, ConfigError, MazeConfig, RawMazeConfig};
pub use game::{Action, AgentId, AgentState, GameState, HitInfo, Interaction, TeamId};
pub use sim::{run, run_async, Agent, AgentFault, RunResult, Simulation, SimulationError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
