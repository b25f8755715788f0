//! Verification API
//!
//! Verify runs by deterministic replay: rebuild the tick-0 store from the
//! config, feed the recorded actions back through [`resolve_tick`] and
//! compare every checkpoint, the event stream and the final result.

use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::MazeConfig;
use crate::core::hash::{short_hex, StateHash};
use crate::game::action::hash_actions;
use crate::game::events::GameEvent;
use crate::game::state::{EntityStore, TeamId};
use crate::game::tick::{end_match, resolve_tick, EndReason};
use crate::sim::transcript::{RunTranscript, TRANSCRIPT_VERSION};

/// Verification result.
#[derive(Clone, Debug)]
pub struct VerificationResult {
    /// Did verification pass?
    pub valid: bool,

    /// Final state hash (from replay).
    pub computed_final_hash: StateHash,

    /// Expected final hash (from transcript).
    pub expected_final_hash: StateHash,

    /// Checkpoint verification results.
    pub checkpoint_results: Vec<CheckpointResult>,

    /// Detailed error if verification failed.
    pub error: Option<VerificationError>,
}

/// Result of verifying a single checkpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointResult {
    pub tick: u64,
    pub expected: StateHash,
    pub computed: StateHash,
    pub valid: bool,
}

/// Why a transcript failed verification.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("transcript version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u8, got: u8 },

    #[error("transcript was recorded with a different config")]
    ConfigMismatch { expected: StateHash, computed: StateHash },

    #[error("transcript has {got} action tracks for {expected} agents")]
    AgentCountMismatch { expected: usize, got: usize },

    #[error("initial state hash mismatch")]
    InitialStateMismatch { expected: StateHash, computed: StateHash },

    #[error("recorded actions differ from checkpoint at tick {tick}")]
    ActionsMismatch { tick: u64, expected: StateHash, computed: StateHash },

    #[error("checkpoint mismatch at tick {tick}")]
    CheckpointMismatch { tick: u64, expected: StateHash, computed: StateHash },

    #[error("replay failed at tick {tick}: {reason}")]
    ReplayFailed { tick: u64, reason: String },

    #[error("event stream differs from replay")]
    EventMismatch,

    #[error("run result mismatch: recorded {expected:?}, replayed {computed:?}")]
    ResultMismatch {
        expected: (EndReason, Option<TeamId>, Vec<u32>),
        computed: (Option<EndReason>, Option<TeamId>, Vec<u32>),
    },

    #[error("final state hash mismatch")]
    FinalStateMismatch { expected: StateHash, computed: StateHash },

    #[error("transcript is incomplete")]
    IncompleteTranscript,
}

impl VerificationResult {
    fn failed(error: VerificationError, computed: StateHash, expected: StateHash, checkpoints: Vec<CheckpointResult>) -> Self {
        warn!("Transcript verification failed: {}", error);
        Self {
            valid: false,
            computed_final_hash: computed,
            expected_final_hash: expected,
            checkpoint_results: checkpoints,
            error: Some(error),
        }
    }
}

/// Verify a run transcript by full replay against `config`.
pub fn verify_transcript(config: &MazeConfig, transcript: &RunTranscript) -> VerificationResult {
    let summary = match &transcript.result {
        Some(r) => r,
        None => return VerificationResult::failed(VerificationError::IncompleteTranscript, [0; 32], [0; 32], vec![]),
    };
    let expected_final = summary.final_state_hash;

    // 1. Static checks
    if transcript.version != TRANSCRIPT_VERSION {
        let error = VerificationError::VersionMismatch { expected: TRANSCRIPT_VERSION, got: transcript.version };
        return VerificationResult::failed(error, [0; 32], expected_final, vec![]);
    }

    let config_hash = config.config_hash();
    if config_hash != transcript.metadata.config_hash {
        let error = VerificationError::ConfigMismatch { expected: transcript.metadata.config_hash, computed: config_hash };
        return VerificationResult::failed(error, [0; 32], expected_final, vec![]);
    }

    if transcript.actions.len() != config.agents().len() {
        let error = VerificationError::AgentCountMismatch {
            expected: config.agents().len(),
            got: transcript.actions.len(),
        };
        return VerificationResult::failed(error, [0; 32], expected_final, vec![]);
    }

    // 2. Initial state
    let mut store = EntityStore::new(config);
    let initial_hash = store.state_hash();
    if initial_hash != transcript.initial_state_hash {
        let error = VerificationError::InitialStateMismatch { expected: transcript.initial_state_hash, computed: initial_hash };
        return VerificationResult::failed(error, initial_hash, expected_final, vec![]);
    }

    // 3. Replay tick by tick with checkpoint verification
    let mut checkpoint_results = Vec::new();
    let mut checkpoints = transcript.checkpoints.iter().peekable();
    let mut events: Vec<GameEvent> = Vec::new();
    let mut end: Option<EndReason> = None;

    for tick in 0..summary.end_tick {
        let actions = transcript.actions_at(tick);
        let mut result = match resolve_tick(config, &mut store, &actions) {
            Ok(result) => result,
            Err(violation) => {
                let error = VerificationError::ReplayFailed { tick, reason: violation.to_string() };
                return VerificationResult::failed(error, store.state_hash(), expected_final, checkpoint_results);
            }
        };

        if let Some(checkpoint) = checkpoints.next_if(|c| c.tick == result.tick) {
            let actions_hash = hash_actions(tick, &actions);
            if actions_hash != checkpoint.actions_hash {
                let error = VerificationError::ActionsMismatch {
                    tick: checkpoint.tick,
                    expected: checkpoint.actions_hash,
                    computed: actions_hash,
                };
                return VerificationResult::failed(error, store.state_hash(), expected_final, checkpoint_results);
            }

            let computed = store.state_hash();
            let valid = computed == checkpoint.state_hash && store.rng_state() == checkpoint.rng_state;
            checkpoint_results.push(CheckpointResult {
                tick: checkpoint.tick,
                expected: checkpoint.state_hash,
                computed,
                valid,
            });

            if !valid {
                let error = VerificationError::CheckpointMismatch {
                    tick: checkpoint.tick,
                    expected: checkpoint.state_hash,
                    computed,
                };
                return VerificationResult::failed(error, computed, checkpoint.state_hash, checkpoint_results);
            }
        }

        // The tick limit lives outside the store; the recorded result says
        // whether it was hit.
        if result.tick == summary.end_tick && result.end.is_none() && summary.end_reason == EndReason::MaxTicks {
            result.events.push(end_match(&mut store, EndReason::MaxTicks));
            result.end = Some(EndReason::MaxTicks);
        }

        end = end.or(result.end);
        events.extend(result.events);
    }

    // 4. Outcome
    let state = store.state();
    if end != Some(summary.end_reason) || state.leader() != summary.winner || state.scores != summary.scores {
        let error = VerificationError::ResultMismatch {
            expected: (summary.end_reason, summary.winner, summary.scores.clone()),
            computed: (end, state.leader(), state.scores.clone()),
        };
        return VerificationResult::failed(error, store.state_hash(), expected_final, checkpoint_results);
    }

    if events != transcript.events {
        return VerificationResult::failed(VerificationError::EventMismatch, store.state_hash(), expected_final, checkpoint_results);
    }

    // 5. Final state
    let final_hash = store.state_hash();
    if final_hash != expected_final {
        let error = VerificationError::FinalStateMismatch { expected: expected_final, computed: final_hash };
        return VerificationResult::failed(error, final_hash, expected_final, checkpoint_results);
    }

    debug!(
        "Transcript {} verified: {} ticks, {} checkpoints, final hash {}",
        transcript.metadata.run_id,
        summary.end_tick,
        checkpoint_results.len(),
        short_hex(&final_hash)
    );

    VerificationResult {
        valid: true,
        computed_final_hash: final_hash,
        expected_final_hash: expected_final,
        checkpoint_results,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RawMazeConfig;
    use crate::sim::agent::Agent;
    use crate::sim::bots::{FlagRunner, ScriptedAgent};
    use crate::sim::driver::run;
    use crate::core::vec2::Vec2;
    use crate::game::action::{Action, ActionTrack};
    use crate::game::state::AgentId;
    use std::sync::Arc;

    fn recorded_run(max_ticks: u64) -> (Arc<MazeConfig>, RunTranscript) {
        let mut raw = RawMazeConfig::default();
        raw.simulation.checkpoint_interval = 10;
        raw.camera.range_noise_stddev = 0.05;
        let config = Arc::new(MazeConfig::from_raw(raw).unwrap());

        let agents: Vec<Box<dyn Agent>> = vec![
            Box::new(FlagRunner::new(config.rules())),
            Box::new(ScriptedAgent::new(vec![
                Action::moving(Vec2::new(-4.0, 3.0)),
                Action::moving(Vec2::new(-4.0, -3.0)),
            ])),
        ];
        let result = run(Arc::clone(&config), agents, Some(max_ticks)).unwrap();
        (config, result.transcript)
    }

    #[test]
    fn test_recorded_run_verifies() {
        let (config, transcript) = recorded_run(45);
        let result = verify_transcript(&config, &transcript);

        assert!(result.valid, "{:?}", result.error);
        assert_eq!(result.checkpoint_results.len(), 4);
        assert!(result.checkpoint_results.iter().all(|c| c.valid));
        assert_eq!(result.computed_final_hash, result.expected_final_hash);
    }

    #[test]
    fn test_serialized_transcript_verifies() {
        let (config, transcript) = recorded_run(20);
        let decoded = RunTranscript::from_bytes(&transcript.to_bytes().unwrap()).unwrap();
        assert!(verify_transcript(&config, &decoded).valid);
    }

    #[test]
    fn test_incomplete_transcript_fails() {
        let (config, mut transcript) = recorded_run(5);
        transcript.result = None;

        let result = verify_transcript(&config, &transcript);
        assert!(!result.valid);
        assert_eq!(result.error, Some(VerificationError::IncompleteTranscript));
    }

    #[test]
    fn test_tampered_checkpoint_detected() {
        let (config, mut transcript) = recorded_run(30);
        transcript.checkpoints[1].state_hash[0] ^= 0xff;

        let result = verify_transcript(&config, &transcript);
        assert!(!result.valid);
        assert!(matches!(result.error, Some(VerificationError::CheckpointMismatch { tick: 20, .. })));
        assert_eq!(result.checkpoint_results.len(), 2);
    }

    #[test]
    fn test_tampered_actions_detected() {
        let (config, mut transcript) = recorded_run(30);
        transcript.actions[1] = ActionTrack::new(AgentId(1));
        transcript.actions[1].record(0, Action::moving(Vec2::new(0.0, 5.0)));

        let result = verify_transcript(&config, &transcript);
        assert!(!result.valid);
        assert!(matches!(result.error, Some(VerificationError::ActionsMismatch { tick: 10, .. })));
        assert!(result.checkpoint_results.is_empty());
    }

    #[test]
    fn test_checkpoint_action_hash_checked() {
        let (config, mut transcript) = recorded_run(30);
        transcript.checkpoints[2].actions_hash[5] ^= 0x01;

        let result = verify_transcript(&config, &transcript);
        assert!(!result.valid);
        assert!(matches!(result.error, Some(VerificationError::ActionsMismatch { tick: 30, .. })));
        assert_eq!(result.checkpoint_results.len(), 2);
    }

    #[test]
    fn test_wrong_config_rejected() {
        let (_, transcript) = recorded_run(5);
        let other = MazeConfig::default_arena().unwrap();

        let result = verify_transcript(&other, &transcript);
        assert!(matches!(result.error, Some(VerificationError::ConfigMismatch { .. })));
    }

    #[test]
    fn test_forged_result_detected() {
        let (config, mut transcript) = recorded_run(15);
        if let Some(summary) = transcript.result.as_mut() {
            summary.scores[1] += 10;
        }

        let result = verify_transcript(&config, &transcript);
        assert!(matches!(result.error, Some(VerificationError::ResultMismatch { .. })));
    }
}
