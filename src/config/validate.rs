//! Config validation.
//!
//! Checks run in a fixed order and stop at the first failure:
//! numbers, layout (compiles the maze), teams, then placement.

use super::{ConfigError, RawMazeConfig};
use crate::core::vec2::Vec2;
use crate::game::maze::Maze;
use crate::game::state::{AgentId, CapturePointId, FlagId, TeamId};

/// Validate everything and return the compiled maze.
pub(super) fn validate(raw: &RawMazeConfig) -> Result<Maze, ConfigError> {
    check_numbers(raw)?;
    let maze = Maze::from_layout(&raw.layout)?;
    check_teams(raw)?;
    check_placement(raw, &maze)?;
    Ok(maze)
}

fn positive(field: impl Into<String>, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { field: field.into(), requirement: "finite and > 0", value })
    }
}

fn non_negative(field: impl Into<String>, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { field: field.into(), requirement: "finite and >= 0", value })
    }
}

fn finite_point(field: impl Into<String>, p: Vec2) -> Result<(), ConfigError> {
    if p.is_finite() {
        Ok(())
    } else {
        let value = if p.x.is_finite() { p.y } else { p.x };
        Err(ConfigError::OutOfRange { field: field.into(), requirement: "finite", value })
    }
}

fn at_least_one(field: &str, value: u64) -> Result<(), ConfigError> {
    if value >= 1 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { field: field.to_string(), requirement: ">= 1", value: value as f64 })
    }
}

fn check_numbers(raw: &RawMazeConfig) -> Result<(), ConfigError> {
    for (i, agent) in raw.agents.iter().enumerate() {
        finite_point(format!("agents[{}].spawn", i), agent.spawn)?;
        positive(format!("agents[{}].max_speed", i), agent.max_speed)?;
        positive(format!("agents[{}].radius", i), agent.radius)?;
        if let Some(fov) = agent.fov_degrees {
            check_fov(&format!("agents[{}].fov_degrees", i), fov)?;
        }
        if let Some(range) = agent.view_range {
            non_negative(format!("agents[{}].view_range", i), range)?;
        }
    }

    for (i, flag) in raw.flags.iter().enumerate() {
        finite_point(format!("flags[{}].home", i), flag.home)?;
    }

    for (i, point) in raw.capture_points.iter().enumerate() {
        finite_point(format!("capture_points[{}].position", i), point.position)?;
        positive(format!("capture_points[{}].radius", i), point.radius)?;
        at_least_one(&format!("capture_points[{}].capture_ticks", i), point.capture_ticks as u64)?;
    }

    let camera = &raw.camera;
    check_fov("camera.fov_degrees", camera.fov_degrees)?;
    non_negative("camera.view_range", camera.view_range)?;
    non_negative("camera.ray_range", camera.ray_range)?;
    non_negative("camera.range_noise_stddev", camera.range_noise_stddev)?;
    positive("camera.map_cell_size", camera.map_cell_size)?;

    let rules = &raw.rules;
    non_negative("rules.pickup_radius", rules.pickup_radius)?;
    non_negative("rules.tag_range", rules.tag_range)?;
    if let Some(ticks) = rules.dropped_flag_return_ticks {
        at_least_one("rules.dropped_flag_return_ticks", ticks as u64)?;
    }
    if let Some(score) = rules.score_to_win {
        at_least_one("rules.score_to_win", score as u64)?;
    }

    let sim = &raw.simulation;
    positive("simulation.tick_seconds", sim.tick_seconds)?;
    at_least_one("simulation.max_ticks", sim.max_ticks)?;
    at_least_one("simulation.action_timeout_ms", sim.action_timeout_ms)?;
    at_least_one("simulation.startup_timeout_ms", sim.startup_timeout_ms)?;
    at_least_one("simulation.decision_interval_ticks", sim.decision_interval_ticks as u64)?;
    at_least_one("simulation.checkpoint_interval", sim.checkpoint_interval)?;

    Ok(())
}

fn check_fov(field: &str, fov: f64) -> Result<(), ConfigError> {
    if fov.is_finite() && fov > 0.0 && fov <= 360.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { field: field.to_string(), requirement: "in (0, 360]", value: fov })
    }
}

fn check_teams(raw: &RawMazeConfig) -> Result<(), ConfigError> {
    if raw.teams == 0 {
        return Err(ConfigError::NoTeams);
    }
    if raw.agents.is_empty() {
        return Err(ConfigError::NoAgents);
    }

    let known = |entity: String, team: TeamId| {
        if team.0 < raw.teams {
            Ok(())
        } else {
            Err(ConfigError::UnknownTeam { entity, team, teams: raw.teams })
        }
    };

    for (i, agent) in raw.agents.iter().enumerate() {
        known(format!("agent {}", i), agent.team)?;
    }
    for (i, flag) in raw.flags.iter().enumerate() {
        known(format!("flag {}", i), flag.team)?;
    }
    for (i, point) in raw.capture_points.iter().enumerate() {
        if let Some(owner) = point.initial_owner {
            known(format!("capture point {}", i), owner)?;
        }
    }

    for team in 0..raw.teams {
        if !raw.agents.iter().any(|a| a.team.0 == team) {
            return Err(ConfigError::EmptyTeam(TeamId(team)));
        }
    }

    Ok(())
}

fn check_placement(raw: &RawMazeConfig, maze: &Maze) -> Result<(), ConfigError> {
    for (i, agent) in raw.agents.iter().enumerate() {
        if !maze.is_open(agent.spawn, agent.radius) {
            return Err(ConfigError::NotInOpenSpace {
                entity: format!("agent {} spawn", i),
                position: agent.spawn,
            });
        }
    }

    for (i, a) in raw.agents.iter().enumerate() {
        for (j, b) in raw.agents.iter().enumerate().skip(i + 1) {
            let reach = a.radius + b.radius;
            if a.spawn.distance_squared(b.spawn) < reach * reach {
                return Err(ConfigError::OverlappingSpawns { a: AgentId(i as u32), b: AgentId(j as u32) });
            }
        }
    }

    for (i, flag) in raw.flags.iter().enumerate() {
        if !maze.is_open(flag.home, 0.0) {
            return Err(ConfigError::NotInOpenSpace {
                entity: format!("flag {} home", i),
                position: flag.home,
            });
        }
        for (j, other) in raw.flags.iter().enumerate().skip(i + 1) {
            if flag.home == other.home {
                return Err(ConfigError::SharedFlagHome { a: FlagId(i as u32), b: FlagId(j as u32) });
            }
        }
    }

    for (i, point) in raw.capture_points.iter().enumerate() {
        if !maze.is_open(point.position, 0.0) {
            return Err(ConfigError::NotInOpenSpace {
                entity: format!("capture point {}", i),
                position: point.position,
            });
        }
        for (j, other) in raw.capture_points.iter().enumerate().skip(i + 1) {
            let reach = point.radius + other.radius;
            if point.position.distance_squared(other.position) < reach * reach {
                return Err(ConfigError::OverlappingCapturePoints {
                    a: CapturePointId(i as u32),
                    b: CapturePointId(j as u32),
                });
            }
        }
    }

    for (f, flag) in raw.flags.iter().enumerate() {
        for (c, point) in raw.capture_points.iter().enumerate() {
            let Some(owner) = point.initial_owner else { continue };
            if owner != flag.team
                && flag.home.distance_squared(point.position) <= point.radius * point.radius
            {
                return Err(ConfigError::FlagInsideForeignCapturePoint {
                    flag: FlagId(f as u32),
                    capture_point: CapturePointId(c as u32),
                    owner,
                });
            }
        }
    }

    Ok(())
}
