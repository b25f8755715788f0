//! Collision Detection
//!
//! Continuous (swept) collision for moving agents and ray queries for
//! vision and targeting. Everything here is a pure function of its inputs.
//!
//! Moving circle of radius r vs. obstacles reduces to a ray vs. the
//! obstacle inflated by r:
//!
//! ```text
//!   wall capsule (h)  ──inflate r──►  capsule (h + r)   = 2 offset faces + 2 end circles
//!   agent circle (R)  ──inflate r──►  circle (R + r)
//! ```
//!
//! Motion is resolved as: sweep, stop just short of the first contact,
//! project what is left onto the contact surface, sweep again. Because
//! every step is a sweep, nothing tunnels regardless of speed.

use serde::{Serialize, Deserialize};

use crate::core::hash::StateHasher;
use crate::core::vec2::{Vec2, EPSILON};
use crate::game::maze::{Maze, WallSegment};
use crate::game::state::AgentId;

/// Distance kept between a mover and the surface it stopped against.
pub const CONTACT_SKIN: f64 = 1e-4;

/// Sweep/slide rounds per move before the remainder is dropped.
pub const MAX_SLIDE_ITERATIONS: usize = 4;

// =============================================================================
// QUERY TYPES
// =============================================================================

/// What a query hit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HitEntity {
    Wall,
    Agent(AgentId),
}

/// Result of a ray or segment query.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HitInfo {
    /// Ray direction in radians from +X
    pub theta: f64,
    /// Nearest thing hit, if any
    pub hit: Option<HitEntity>,
    /// Distance to the hit, or the full query length on a miss
    pub distance: f64,
    /// Hit point, or the query end on a miss
    pub point: Vec2,
}

impl HitInfo {
    /// True if the query reached its end unobstructed.
    #[inline]
    pub fn is_clear(&self) -> bool {
        self.hit.is_none()
    }

    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_f64(self.theta);
        match self.hit {
            None => hasher.update_u8(0),
            Some(HitEntity::Wall) => hasher.update_u8(1),
            Some(HitEntity::Agent(id)) => {
                hasher.update_u8(2);
                hasher.update_u32(id.0);
            }
        }
        hasher.update_f64(self.distance);
        hasher.update_vec2(self.point);
    }
}

/// Another agent's body, as seen by a mover or a ray.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Obstacle {
    pub id: AgentId,
    pub position: Vec2,
    pub radius: f64,
}

/// First contact along a sweep.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Contact {
    /// Fraction of the displacement travelled before contact, in [0, 1]
    pub t: f64,
    /// Surface normal pointing back toward the mover
    pub normal: Vec2,
    pub entity: HitEntity,
}

/// Outcome of [`resolve_motion`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionResult {
    pub position: Vec2,
    /// At least one contact shortened or deflected the move
    pub blocked: bool,
}

/// Check if two circles overlap.
#[inline]
pub fn circles_overlap(pos_a: Vec2, radius_a: f64, pos_b: Vec2, radius_b: f64) -> bool {
    let combined = radius_a + radius_b;
    pos_a.distance_squared(pos_b) < combined * combined
}

// =============================================================================
// PRIMITIVE SWEEPS
// =============================================================================

/// Ray `origin + disp·t`, t ∈ [0, 1], against a circle.
///
/// A start inside or touching the circle counts as a hit at t = 0 only
/// while moving inward, so overlapping bodies can always separate.
fn sweep_circle(origin: Vec2, disp: Vec2, center: Vec2, radius: f64) -> Option<(f64, Vec2)> {
    let m = origin - center;
    let a = disp.length_squared();
    let b = m.dot(disp);
    let c = m.length_squared() - radius * radius;

    if c <= 0.0 {
        if b < 0.0 {
            let normal = if m.length_squared() > EPSILON * EPSILON { m.normalize() } else { -disp.normalize() };
            return Some((0.0, normal));
        }
        return None;
    }
    if a < EPSILON * EPSILON || b >= 0.0 {
        return None;
    }

    let disc = b * b - a * c;
    if disc < 0.0 {
        return None;
    }
    let t = (-b - disc.sqrt()) / a;
    if !(0.0..=1.0).contains(&t) {
        return None;
    }
    let normal = (origin + disp * t - center).normalize();
    Some((t, normal))
}

/// Ray against a wall capsule inflated by `inflate`.
fn sweep_capsule(origin: Vec2, disp: Vec2, wall: &WallSegment, inflate: f64) -> Option<(f64, Vec2)> {
    let radius = wall.half_thickness + inflate;
    let axis = wall.end - wall.start;
    let length = axis.length();

    let mut best: Option<(f64, Vec2)> = None;
    let mut consider = |hit: Option<(f64, Vec2)>| {
        if let Some((t, n)) = hit {
            if best.map_or(true, |(bt, _)| t < bt) {
                best = Some((t, n));
            }
        }
    };

    consider(sweep_circle(origin, disp, wall.start, radius));
    if length < EPSILON {
        return best;
    }
    consider(sweep_circle(origin, disp, wall.end, radius));

    // Flat faces at ±radius from the axis.
    let u = axis * (1.0 / length);
    let n = u.perpendicular();
    let s0 = (origin - wall.start).dot(n);
    let ds = disp.dot(n);
    let along = |p: Vec2| (p - wall.start).dot(u);

    if s0.abs() < radius {
        // Starting inside the slab: a hit only if also within the span and moving deeper.
        let proj = along(origin);
        if (0.0..=length).contains(&proj) {
            let side = if s0 > 0.0 {
                1.0
            } else if s0 < 0.0 {
                -1.0
            } else if ds > 0.0 {
                -1.0
            } else {
                1.0
            };
            if ds * side < 0.0 {
                consider(Some((0.0, n * side)));
            }
        }
    } else {
        let side = if s0 > 0.0 { 1.0 } else { -1.0 };
        if ds * side < 0.0 {
            let t = (s0 - side * radius) / -ds;
            if (0.0..=1.0).contains(&t) {
                let proj = along(origin + disp * t);
                if (0.0..=length).contains(&proj) {
                    consider(Some((t, n * side)));
                }
            }
        }
    }

    best
}

// =============================================================================
// SWEEPS AGAINST THE WORLD
// =============================================================================

/// First contact for a circle of `radius` moving by `disp`.
///
/// Walls are checked before agents and an agent only replaces a wall
/// contact when strictly nearer, so walls win ties.
pub fn sweep(maze: &Maze, start: Vec2, disp: Vec2, radius: f64, obstacles: &[Obstacle]) -> Option<Contact> {
    let mut best: Option<Contact> = None;

    for wall in maze.walls() {
        if let Some((t, normal)) = sweep_capsule(start, disp, wall, radius) {
            if best.map_or(true, |b| t < b.t) {
                best = Some(Contact { t, normal, entity: HitEntity::Wall });
            }
        }
    }

    for obstacle in obstacles {
        if let Some((t, normal)) = sweep_circle(start, disp, obstacle.position, obstacle.radius + radius) {
            if best.map_or(true, |b| t < b.t) {
                best = Some(Contact { t, normal, entity: HitEntity::Agent(obstacle.id) });
            }
        }
    }

    best
}

/// Move a circle by `displacement`, sliding along whatever it touches.
///
/// `obstacles` are the other agents' bodies (the mover itself excluded).
/// The returned position never overlaps a wall or obstacle any deeper
/// than the start did.
pub fn resolve_motion(
    maze: &Maze,
    start: Vec2,
    displacement: Vec2,
    radius: f64,
    obstacles: &[Obstacle],
) -> MotionResult {
    let mut position = start;
    let mut remaining = displacement;
    let mut blocked = false;

    for _ in 0..MAX_SLIDE_ITERATIONS {
        let length = remaining.length();
        if length < EPSILON {
            remaining = Vec2::ZERO;
            break;
        }

        match sweep(maze, position, remaining, radius, obstacles) {
            None => {
                position = position + remaining;
                remaining = Vec2::ZERO;
                break;
            }
            Some(contact) => {
                blocked = true;
                let travel = (contact.t * length - CONTACT_SKIN).max(0.0);
                position = position + remaining * (travel / length);

                // Slide: drop the component pointing into the surface.
                let rest = remaining * (1.0 - contact.t);
                let into = rest.dot(contact.normal);
                remaining = if into < 0.0 { rest - contact.normal * into } else { rest };
            }
        }
    }

    if remaining.length_squared() > 0.0 {
        blocked = true;
    }

    MotionResult { position, blocked }
}

// =============================================================================
// HIT TESTS
// =============================================================================

/// Trace a ray of `max_distance` from `origin` along `direction`.
///
/// Walls are traced first, then agent bodies (skipping `ignore`); the
/// nearest hit wins and a wall wins an exact tie.
pub fn hit_test(
    maze: &Maze,
    agents: &[Obstacle],
    origin: Vec2,
    direction: Vec2,
    max_distance: f64,
    ignore: Option<AgentId>,
) -> HitInfo {
    let dir = direction.normalize();
    let theta = dir.angle();
    let disp = dir * max_distance;

    let mut best: Option<(f64, HitEntity)> = None;

    if max_distance > 0.0 && dir.length_squared() > 0.0 {
        for wall in maze.walls() {
            if let Some((t, _)) = sweep_capsule(origin, disp, wall, 0.0) {
                if best.map_or(true, |(bt, _)| t < bt) {
                    best = Some((t, HitEntity::Wall));
                }
            }
        }
        for agent in agents.iter().filter(|a| Some(a.id) != ignore) {
            if let Some((t, _)) = sweep_circle(origin, disp, agent.position, agent.radius) {
                if best.map_or(true, |(bt, _)| t < bt) {
                    best = Some((t, HitEntity::Agent(agent.id)));
                }
            }
        }
    }

    match best {
        Some((t, entity)) => HitInfo {
            theta,
            hit: Some(entity),
            distance: t * max_distance,
            point: origin + disp * t,
        },
        None => HitInfo {
            theta,
            hit: None,
            distance: max_distance,
            point: origin + disp,
        },
    }
}

/// Ray cast against walls only.
pub fn wall_hit_test(maze: &Maze, origin: Vec2, direction: Vec2, max_distance: f64) -> HitInfo {
    hit_test(maze, &[], origin, direction, max_distance, None)
}

/// Trace the segment `from → to`. Used for line of sight and targeting.
pub fn segment_hit_test(
    maze: &Maze,
    agents: &[Obstacle],
    from: Vec2,
    to: Vec2,
    ignore: Option<AgentId>,
) -> HitInfo {
    let delta = to - from;
    hit_test(maze, agents, from, delta, delta.length(), ignore)
}

/// No wall lies between two points.
pub fn line_of_sight(maze: &Maze, from: Vec2, to: Vec2) -> bool {
    segment_hit_test(maze, &[], from, to, None).is_clear()
}

// =============================================================================
// TESTS
// =============================================================================
