//! Run Transcript Recording
//!
//! Records everything needed to replay a run and check its outcome:
//! the actions submitted each tick (delta-compressed per agent), state
//! hash checkpoints, the events and the final result.
//!
//! Wall-clock metadata (`run_id`, `started_at`) is informational and never
//! part of any hash.

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::MazeConfig;
use crate::core::hash::StateHash;
use crate::game::action::{Action, ActionTrack};
use crate::game::events::GameEvent;
use crate::game::state::{AgentId, TeamId};
use crate::game::tick::EndReason;

/// Current transcript version.
pub const TRANSCRIPT_VERSION: u8 = 1;

/// Complete run transcript.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunTranscript {
    /// Version for forward compatibility.
    pub version: u8,

    /// Run metadata.
    pub metadata: RunMetadata,

    /// Hash of the tick-0 state.
    pub initial_state_hash: StateHash,

    /// Per-agent action recordings, index = agent id.
    pub actions: Vec<ActionTrack>,

    /// State hash checkpoints (every `checkpoint_interval` ticks).
    pub checkpoints: Vec<StateCheckpoint>,

    /// Every event, in the order it happened.
    pub events: Vec<GameEvent>,

    /// Final result, set when the run terminates.
    pub result: Option<RunSummary>,
}

/// Run metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Unique run identifier.
    pub run_id: Uuid,

    /// Sensor-noise seed from the config.
    pub seed: u64,

    /// Hash of the validated config.
    pub config_hash: StateHash,

    /// Agent names in id order.
    pub agent_names: Vec<String>,

    /// Number of teams.
    pub teams: u32,

    /// When the run started.
    pub started_at: DateTime<Utc>,
}

impl RunMetadata {
    /// Fresh metadata for a run of `config`.
    pub fn for_config(config: &MazeConfig) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            seed: config.simulation().seed,
            config_hash: config.config_hash(),
            agent_names: config.agents().iter().map(|a| a.name.clone()).collect(),
            teams: config.teams(),
            started_at: Utc::now(),
        }
    }
}

/// State checkpoint for partial verification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCheckpoint {
    /// Tick number.
    pub tick: u64,

    /// State hash at this tick.
    pub state_hash: StateHash,

    /// RNG state at this tick.
    pub rng_state: [u64; 2],

    /// Hash of the actions resolved to reach this tick.
    pub actions_hash: StateHash,
}

/// Final run outcome.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Final tick.
    pub end_tick: u64,

    /// Why the run stopped.
    pub end_reason: EndReason,

    /// Team with the strictly highest score, if any.
    pub winner: Option<TeamId>,

    /// Final scores, index = team id.
    pub scores: Vec<u32>,

    /// Final state hash.
    pub final_state_hash: StateHash,
}

/// Errors that can occur with transcripts.
#[derive(Debug, Error)]
pub enum TranscriptError {
    /// Encoding failed.
    #[error("transcript encoding failed: {0}")]
    Encode(#[source] bincode::Error),
    /// Decoding failed.
    #[error("transcript decoding failed: {0}")]
    Decode(#[source] bincode::Error),
    /// Version mismatch.
    #[error("transcript version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u8, got: u8 },
}

impl RunTranscript {
    /// Create an empty transcript for `agent_count` agents.
    pub fn new(metadata: RunMetadata, initial_state_hash: StateHash, agent_count: usize) -> Self {
        Self {
            version: TRANSCRIPT_VERSION,
            metadata,
            initial_state_hash,
            actions: (0..agent_count).map(|i| ActionTrack::new(AgentId(i as u32))).collect(),
            checkpoints: Vec::new(),
            events: Vec::new(),
            result: None,
        }
    }

    /// Record the actions submitted for resolving `tick`.
    pub fn record_actions(&mut self, tick: u64, actions: &[Action]) {
        for (track, action) in self.actions.iter_mut().zip(actions) {
            track.record(tick, *action);
        }
    }

    /// Actions to replay when resolving `tick`.
    pub fn actions_at(&self, tick: u64) -> Vec<Action> {
        self.actions.iter().map(|t| t.action_at(tick)).collect()
    }

    /// Record a state checkpoint.
    pub fn add_checkpoint(&mut self, tick: u64, state_hash: StateHash, rng_state: [u64; 2], actions_hash: StateHash) {
        self.checkpoints.push(StateCheckpoint { tick, state_hash, rng_state, actions_hash });
    }

    /// Record game events.
    pub fn record_events<'a>(&mut self, events: impl IntoIterator<Item = &'a GameEvent>) {
        self.events.extend(events.into_iter().cloned());
    }

    /// Finalize the transcript with the run result.
    pub fn finalize(&mut self, result: RunSummary) {
        self.result = Some(result);
    }

    /// Check if transcript is complete.
    pub fn is_complete(&self) -> bool {
        self.result.is_some()
    }

    /// Serialize to bytes using bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TranscriptError> {
        bincode::serialize(self).map_err(TranscriptError::Encode)
    }

    /// Deserialize from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, TranscriptError> {
        let transcript: Self = bincode::deserialize(data).map_err(TranscriptError::Decode)?;
        if transcript.version != TRANSCRIPT_VERSION {
            return Err(TranscriptError::VersionMismatch { expected: TRANSCRIPT_VERSION, got: transcript.version });
        }
        Ok(transcript)
    }

    /// Total stored action entries across agents.
    pub fn action_delta_count(&self) -> usize {
        self.actions.iter().map(|t| t.delta_count()).sum()
    }
}
