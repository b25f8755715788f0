//! Maze Arena
//!
//! Runs a match between the built-in flag runners and checks the recorded
//! transcript by replay.
//!
//! ```text
//! maze-arena [CONFIG.json] [MAX_TICKS]
//! ```
//!
//! Without a config path the stock arena is used. Set `RUST_LOG` to change
//! the log level (default `info`).

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use maze_arena::{
    VERSION,
    config::{load_config, MazeConfig},
    core::hash::short_hex,
    game::events::GameEventData,
    sim::{run, verify_transcript, Agent, FlagRunner},
};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => load_config(&path).with_context(|| format!("loading config {}", path))?,
        None => MazeConfig::default_arena()?,
    };
    let max_ticks = args
        .next()
        .map(|s| s.parse::<u64>().with_context(|| format!("invalid MAX_TICKS {:?}", s)))
        .transpose()?;

    info!("Maze Arena v{}", VERSION);
    info!("Config hash: {}", short_hex(&config.config_hash()));
    info!(
        "{} agents, {} teams, {} flags, {} capture points",
        config.agents().len(),
        config.teams(),
        config.flags().len(),
        config.capture_points().len()
    );

    let config = Arc::new(config);
    let agents: Vec<Box<dyn Agent>> = config
        .agents()
        .iter()
        .map(|_| Box::new(FlagRunner::new(config.rules())) as Box<dyn Agent>)
        .collect();

    let result = run(Arc::clone(&config), agents, max_ticks)?;

    // Log important events
    for event in &result.transcript.events {
        match &event.data {
            GameEventData::FlagCaptured { agent, flag, team, points, .. } => {
                info!("Tick {}: agent {} captured flag {} for team {} (+{})", event.tick, agent, flag, team, points);
            }
            GameEventData::CapturePointFlipped { capture_point, new_owner, .. } => {
                info!("Tick {}: capture point {} now held by team {}", event.tick, capture_point, new_owner);
            }
            _ => {}
        }
    }

    info!("=== Run Results ===");
    info!("Ended at tick {} ({:?})", result.final_state.tick, result.end_reason);
    for (team, score) in result.scores.iter().enumerate() {
        info!("Team {}: {}", team, score);
    }
    match result.winner {
        Some(team) => info!("Winner: team {}", team),
        None => info!("No winner"),
    }
    for (agent, count) in result.faults.counts(config.agents().len()).iter().enumerate() {
        if *count > 0 {
            warn!("Agent {} faulted {} times", agent, count);
        }
    }

    let bytes = result.transcript.to_bytes()?;
    info!(
        "Transcript: {} bytes, {} action deltas, {} checkpoints",
        bytes.len(),
        result.transcript.action_delta_count(),
        result.transcript.checkpoints.len()
    );

    info!("=== Verifying Transcript ===");
    let verification = verify_transcript(&config, &result.transcript);
    info!("Expected hash: {}", hex::encode(verification.expected_final_hash));
    info!("Replay hash:   {}", hex::encode(verification.computed_final_hash));

    match verification.error {
        None => info!("Replay verified: {} checkpoints match", verification.checkpoint_results.len()),
        Some(e) => anyhow::bail!("replay verification failed: {}", e),
    }

    Ok(())
}
