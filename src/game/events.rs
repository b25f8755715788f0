//! Game Events
//!
//! Events generated while resolving a tick, for logs, transcripts and tests.

use serde::{Serialize, Deserialize};

use crate::core::vec2::Vec2;
use crate::game::state::{AgentId, CapturePointId, FlagId, TeamId};

/// Why a flag left its carrier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropReason {
    /// The carrier asked to drop it
    Voluntary,
    /// The carrier was tagged
    Tagged,
}

/// Game event data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum GameEventData {
    /// Agent picked up an enemy flag
    FlagPickedUp { agent: AgentId, flag: FlagId },

    /// Flag left its carrier and lies on the floor
    FlagDropped { agent: AgentId, flag: FlagId, position: Vec2, reason: DropReason },

    /// Flag went back home, by a teammate's touch or by timeout
    FlagReturned { flag: FlagId, by: Option<AgentId> },

    /// Flag was carried into an owned capture point
    FlagCaptured { agent: AgentId, flag: FlagId, team: TeamId, capture_point: CapturePointId, points: u32 },

    /// Agent tagged an enemy
    AgentTagged { tagger: AgentId, target: AgentId },

    /// Tagged agent is back at its spawn
    AgentRespawned { agent: AgentId },

    /// Capture point changed owner
    CapturePointFlipped { capture_point: CapturePointId, old_owner: Option<TeamId>, new_owner: TeamId },

    /// Accumulated capture progress was lost
    CaptureProgressReset { capture_point: CapturePointId, team: TeamId, progress: u32 },

    /// Run ended
    MatchEnded { winner: Option<TeamId>, duration_ticks: u64 },
}

/// A game event with timing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    /// Tick when the event occurred (the tick being produced)
    pub tick: u64,

    /// Agent responsible, if any (for filtering)
    pub agent: Option<AgentId>,

    /// Event data
    pub data: GameEventData,
}

impl GameEvent {
    /// Create a new event.
    pub fn new(tick: u64, data: GameEventData) -> Self {
        let agent = match &data {
            GameEventData::FlagPickedUp { agent, .. } => Some(*agent),
            GameEventData::FlagDropped { agent, .. } => Some(*agent),
            GameEventData::FlagReturned { by, .. } => *by,
            GameEventData::FlagCaptured { agent, .. } => Some(*agent),
            GameEventData::AgentTagged { tagger, .. } => Some(*tagger),
            GameEventData::AgentRespawned { agent } => Some(*agent),
            _ => None,
        };

        Self { tick, agent, data }
    }

    pub fn flag_picked_up(tick: u64, agent: AgentId, flag: FlagId) -> Self {
        Self::new(tick, GameEventData::FlagPickedUp { agent, flag })
    }

    pub fn flag_dropped(tick: u64, agent: AgentId, flag: FlagId, position: Vec2, reason: DropReason) -> Self {
        Self::new(tick, GameEventData::FlagDropped { agent, flag, position, reason })
    }

    pub fn flag_returned(tick: u64, flag: FlagId, by: Option<AgentId>) -> Self {
        Self::new(tick, GameEventData::FlagReturned { flag, by })
    }

    pub fn flag_captured(
        tick: u64,
        agent: AgentId,
        flag: FlagId,
        team: TeamId,
        capture_point: CapturePointId,
        points: u32,
    ) -> Self {
        Self::new(tick, GameEventData::FlagCaptured { agent, flag, team, capture_point, points })
    }

    pub fn agent_tagged(tick: u64, tagger: AgentId, target: AgentId) -> Self {
        Self::new(tick, GameEventData::AgentTagged { tagger, target })
    }

    pub fn agent_respawned(tick: u64, agent: AgentId) -> Self {
        Self::new(tick, GameEventData::AgentRespawned { agent })
    }

    pub fn capture_point_flipped(
        tick: u64,
        capture_point: CapturePointId,
        old_owner: Option<TeamId>,
        new_owner: TeamId,
    ) -> Self {
        Self::new(tick, GameEventData::CapturePointFlipped { capture_point, old_owner, new_owner })
    }

    pub fn capture_progress_reset(tick: u64, capture_point: CapturePointId, team: TeamId, progress: u32) -> Self {
        Self::new(tick, GameEventData::CaptureProgressReset { capture_point, team, progress })
    }

    /// Create match ended event.
    pub fn match_ended(tick: u64, winner: Option<TeamId>) -> Self {
        Self::new(tick, GameEventData::MatchEnded { winner, duration_ticks: tick })
    }
}
