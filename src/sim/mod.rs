//! Simulation Driver Module
//!
//! Everything around the deterministic core that talks to agent programs
//! or records what happened.
//!
//! ## Module Structure
//!
//! - `agent`: Agent contract, faults and per-agent worker threads
//! - `driver`: Run lifecycle, decision ticks and termination
//! - `bots`: Built-in agent programs
//! - `transcript`: Replayable run recording
//! - `verify`: Replay verification of transcripts

pub mod agent;
pub mod driver;
pub mod bots;
pub mod transcript;
pub mod verify;

pub use agent::{Agent, AgentFault, FaultLog, FaultPhase, FaultRecord};
pub use bots::{FlagRunner, IdleAgent, ScriptedAgent};
pub use driver::{run, run_async, Phase, RunResult, Simulation, SimulationError};
pub use transcript::{RunMetadata, RunSummary, RunTranscript, StateCheckpoint, TranscriptError};
pub use verify::{verify_transcript, CheckpointResult, VerificationError, VerificationResult};
