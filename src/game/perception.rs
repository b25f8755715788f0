//! Agent Perception
//!
//! Fills in `raycasts` and `sightings` for every agent at the end of a tick.
//!
//! - Raycasts: `ray_count` rays evenly spaced over a full turn starting at
//!   theta = 0, walls only, sorted by theta. Hit distances get Gaussian
//!   noise from the store's RNG when `range_noise_stddev > 0`.
//! - Sightings: other active agents and uncarried flags inside the agent's
//!   view cone and range, optionally blocked by walls.
//!
//! RNG draws happen in agent-index order, then ray order, so the noise
//! stream is reproducible.

use std::f64::consts::{PI, TAU};

use serde::{Serialize, Deserialize};

use crate::config::MazeConfig;
use crate::core::hash::StateHasher;
use crate::core::rng::DeterministicRng;
use crate::core::vec2::Vec2;
use crate::game::collision::{line_of_sight, wall_hit_test, HitEntity, HitInfo};
use crate::game::state::{AgentId, FlagId, FlagStatus, GameState, TeamId};

/// What was seen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SightingTarget {
    Agent { id: AgentId, team: TeamId },
    Flag { id: FlagId, team: TeamId },
}

/// One visible entity.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sighting {
    pub target: SightingTarget,
    pub position: Vec2,
    pub distance: f64,
    /// Angle relative to the observer's heading, in (-PI, PI]
    pub bearing: f64,
}

impl Sighting {
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        match self.target {
            SightingTarget::Agent { id, team } => {
                hasher.update_u8(0);
                hasher.update_u32(id.0);
                hasher.update_u32(team.0);
            }
            SightingTarget::Flag { id, team } => {
                hasher.update_u8(1);
                hasher.update_u32(id.0);
                hasher.update_u32(team.0);
            }
        }
        hasher.update_vec2(self.position);
        hasher.update_f64(self.distance);
        hasher.update_f64(self.bearing);
    }
}

/// Wrap an angle into (-PI, PI].
pub fn wrap_angle(theta: f64) -> f64 {
    let mut a = theta % TAU;
    if a <= -PI {
        a += TAU;
    } else if a > PI {
        a -= TAU;
    }
    a
}

/// Evenly spaced ray directions over a full turn.
pub fn ray_angles(count: u32) -> impl Iterator<Item = f64> {
    let step = if count == 0 { 0.0 } else { TAU / count as f64 };
    (0..count).map(move |i| i as f64 * step)
}

/// Cast one agent's rays against the walls.
pub fn cast_rays(config: &MazeConfig, origin: Vec2, rng: &mut DeterministicRng) -> Vec<HitInfo> {
    let camera = config.camera();
    let mut hits: Vec<HitInfo> = ray_angles(camera.ray_count)
        .map(|theta| {
            let direction = Vec2::from_angle(theta);
            let mut hit = wall_hit_test(config.maze(), origin, direction, camera.ray_range);
            // Report the cast angle, not the one recovered from the direction vector.
            hit.theta = theta;
            if hit.hit.is_some() && camera.range_noise_stddev > 0.0 {
                hit.distance = rng
                    .next_normal(hit.distance, camera.range_noise_stddev)
                    .clamp(0.0, camera.ray_range);
                hit.point = origin + direction * hit.distance;
            }
            hit
        })
        .collect();

    hits.sort_by(|a, b| a.theta.total_cmp(&b.theta));
    hits
}

/// Everything `observer` can currently see.
pub fn sightings_for(config: &MazeConfig, state: &GameState, observer: AgentId) -> Vec<Sighting> {
    let Some(me) = state.agent(observer) else {
        return Vec::new();
    };
    let half_fov = config.fov_radians(observer) * 0.5;
    let range = config.view_range(observer);
    let occluded = config.camera().occluded_by_walls;
    let maze = config.maze();

    let visible = |position: Vec2| -> Option<(f64, f64)> {
        let offset = position - me.position;
        let distance = offset.length();
        if distance > range {
            return None;
        }
        let bearing = if distance > 0.0 { wrap_angle(offset.angle() - me.heading) } else { 0.0 };
        if bearing.abs() > half_fov {
            return None;
        }
        if occluded && !line_of_sight(maze, me.position, position) {
            return None;
        }
        Some((distance, bearing))
    };

    let mut seen = Vec::new();

    for other in state.agents.iter().filter(|a| a.active && a.id != observer) {
        if let Some((distance, bearing)) = visible(other.position) {
            seen.push(Sighting {
                target: SightingTarget::Agent { id: other.id, team: other.team },
                position: other.position,
                distance,
                bearing,
            });
        }
    }

    for flag in &state.flags {
        // A carried flag is visible through its carrier.
        if matches!(flag.status, FlagStatus::Carried { .. }) {
            continue;
        }
        if let Some((distance, bearing)) = visible(flag.position) {
            seen.push(Sighting {
                target: SightingTarget::Flag { id: flag.id, team: flag.team },
                position: flag.position,
                distance,
                bearing,
            });
        }
    }

    seen
}

/// Refresh perception for every agent, in agent-index order.
pub fn perceive(config: &MazeConfig, state: &mut GameState, rng: &mut DeterministicRng) {
    for i in 0..state.agents.len() {
        let (active, position) = (state.agents[i].active, state.agents[i].position);
        if !active {
            state.agents[i].raycasts.clear();
            state.agents[i].sightings.clear();
            continue;
        }
        let raycasts = cast_rays(config, position, rng);
        let sightings = sightings_for(config, state, AgentId(i as u32));

        let agent = &mut state.agents[i];
        agent.raycasts = raycasts;
        agent.sightings = sightings;
    }
}

/// Nearest wall reading of a ray set.
pub fn nearest_wall(raycasts: &[HitInfo]) -> Option<&HitInfo> {
    raycasts
        .iter()
        .filter(|h| h.hit == Some(HitEntity::Wall))
        .min_by(|a, b| a.distance.total_cmp(&b.distance))
}

// =============================================================================
// TESTS
// =============================================================================
