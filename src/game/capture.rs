//! Capture Point Control
//!
//! A capture point flips to a team that holds it alone, and not as owner,
//! for `capture_ticks` consecutive ticks.
//!
//! Per point, per tick:
//!
//! | present teams            | effect                                   |
//! |--------------------------|------------------------------------------|
//! | exactly one, not owner   | progress += 1 (restart at 1 on a switch) |
//! | none / several / owner   | progress = 0, no controlling team        |
//!
//! Reaching `capture_ticks` flips ownership, awards the flip score and
//! resets progress.

use tracing::debug;

use crate::config::MazeConfig;
use crate::game::events::GameEvent;
use crate::game::state::{CapturePointId, CapturePointState, EntityStore, TeamId};

/// Capture point change to apply after every point has been read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CaptureAction {
    Advance { point: CapturePointId, team: TeamId, progress: u32 },
    Flip { point: CapturePointId, old_owner: Option<TeamId>, new_owner: TeamId },
    Reset { point: CapturePointId, team: Option<TeamId>, progress: u32 },
}

/// Teams with at least one counted agent inside the point.
///
/// `contesting[i]` is agent `i`'s Contest intent this tick; it is only
/// consulted when the rules require it.
fn present_teams(store: &EntityStore, config: &MazeConfig, point: &CapturePointState, contesting: &[bool]) -> Vec<TeamId> {
    let require_intent = config.rules().require_contest_intent;
    let mut teams: Vec<TeamId> = store
        .state
        .agents
        .iter()
        .filter(|a| a.active && point.contains(a.position))
        .filter(|a| !require_intent || contesting.get(a.id.index()).copied().unwrap_or(false))
        .map(|a| a.team)
        .collect();
    teams.sort_unstable();
    teams.dedup();
    teams
}

/// Update every capture point for this tick.
pub fn process_capture_points(
    store: &mut EntityStore,
    config: &MazeConfig,
    contesting: &[bool],
    now: u64,
) -> Vec<GameEvent> {
    // Step 1: Decide what happens at each point
    let mut actions: Vec<CaptureAction> = Vec::new();

    for point in &store.state.capture_points {
        let present = present_teams(store, config, point, contesting);

        let challenger = match present.as_slice() {
            [team] if point.owner != Some(*team) => Some(*team),
            _ => None,
        };

        match challenger {
            Some(team) => {
                let progress = if point.controlling == Some(team) { point.progress + 1 } else { 1 };
                if progress >= point.capture_ticks {
                    actions.push(CaptureAction::Flip { point: point.id, old_owner: point.owner, new_owner: team });
                } else {
                    actions.push(CaptureAction::Advance { point: point.id, team, progress });
                }
            }
            None if point.progress > 0 || point.controlling.is_some() => {
                actions.push(CaptureAction::Reset { point: point.id, team: point.controlling, progress: point.progress });
            }
            None => {}
        }
    }

    // Step 2: Apply
    let mut events = Vec::new();
    let flip_score = config.rules().capture_point_flip_score;

    for action in actions {
        match action {
            CaptureAction::Advance { point, team, progress } => {
                let p = &mut store.state.capture_points[point.index()];
                p.controlling = Some(team);
                p.progress = progress;
            }
            CaptureAction::Flip { point, old_owner, new_owner } => {
                let p = &mut store.state.capture_points[point.index()];
                p.owner = Some(new_owner);
                p.controlling = None;
                p.progress = 0;
                store.add_score(new_owner, flip_score);

                debug!("Capture point {} flipped from {:?} to team {}", point, old_owner, new_owner);
                events.push(GameEvent::capture_point_flipped(now, point, old_owner, new_owner));
            }
            CaptureAction::Reset { point, team, progress } => {
                let p = &mut store.state.capture_points[point.index()];
                p.controlling = None;
                p.progress = 0;

                if let (Some(team), true) = (team, progress > 0) {
                    debug!("Capture point {} lost {} ticks of progress by team {}", point, progress, team);
                    events.push(GameEvent::capture_progress_reset(now, point, team, progress));
                }
            }
        }
    }

    events
}

// =============================================================================
// TESTS
// =============================================================================
