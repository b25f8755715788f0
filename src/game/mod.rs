//! Game Logic Module
//!
//! All simulation code. Deterministic for a given config and action sequence.
//!
//! ## Module Structure
//!
//! - `maze`: Compiled wall geometry and open-space queries
//! - `collision`: Swept motion and hit tests
//! - `state`: Game state, entity store and invariants
//! - `flag`: Flag pickup, drop, return and capture
//! - `capture`: Capture point control
//! - `action`: Agent actions, validation and recording
//! - `perception`: Raycasts and sightings
//! - `tick`: Authoritative per-tick resolution
//! - `events`: Game events for logs and transcripts

pub mod maze;
pub mod collision;
pub mod state;
pub mod flag;
pub mod capture;
pub mod action;
pub mod perception;
pub mod tick;
pub mod events;

// Re-export key types
pub use action::{Action, ActionTrack, Interaction, InvalidAction};
pub use collision::{HitEntity, HitInfo};
pub use events::{GameEvent, GameEventData};
pub use perception::{Sighting, SightingTarget};
pub use state::{AgentId, AgentState, CapturePointId, EntityStore, FlagId, FlagStatus, GameState, TeamId};
pub use tick::{resolve_tick, EndReason, TickResult};
