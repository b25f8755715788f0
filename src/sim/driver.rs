//! Simulation Driver
//!
//! Owns the entity store and the agent workers, and steps the run:
//!
//! ```text
//!   NotStarted ──start()──► Running ──step()*──► Terminated(EndReason)
//!                  │                    │
//!          startup(me, state)    decision tick? get_action : hold velocity
//!          once per agent        resolve_tick, checkpoint, end checks
//! ```
//!
//! Agent faults never stop a run. They turn into idle actions and end up in
//! the [`FaultLog`]. Only setup failures and engine invariant violations
//! surface as [`SimulationError`].

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use thiserror::Error;
use tracing::info;

use crate::config::MazeConfig;
use crate::core::hash::short_hex;
use crate::game::action::{hash_actions, Action};
use crate::game::state::{AgentId, EntityStore, GameState, GeometryInvariantViolation, TeamId};
use crate::game::tick::{end_match, resolve_tick, EndReason, TickResult};
use crate::sim::agent::{Agent, AgentFault, AgentWorker, FaultLog, FaultPhase};
use crate::sim::transcript::{RunMetadata, RunSummary, RunTranscript};

/// Errors that stop a run.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("config defines {expected} agents but {got} were supplied")]
    AgentCountMismatch { expected: usize, got: usize },
    #[error("max_ticks must be at least 1")]
    ZeroTicks,
    #[error("failed to build async runtime: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("run() called inside an async runtime; use run_async")]
    InsideRuntime,
    #[error("failed to spawn worker for agent {agent}: {source}")]
    WorkerSpawn {
        agent: AgentId,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Invariant(#[from] GeometryInvariantViolation),
    #[error("simulation already terminated")]
    AlreadyTerminated,
    #[error("simulation not started")]
    NotStarted,
}

/// Lifecycle of a [`Simulation`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    NotStarted,
    Running,
    Terminated(EndReason),
}

/// Everything a finished run produced.
#[derive(Clone, Debug)]
pub struct RunResult {
    pub final_state: Arc<GameState>,
    pub scores: Vec<u32>,
    pub winner: Option<TeamId>,
    pub end_reason: EndReason,
    pub faults: FaultLog,
    pub transcript: RunTranscript,
}

/// A run in progress.
pub struct Simulation {
    config: Arc<MazeConfig>,
    store: EntityStore,
    workers: Vec<AgentWorker>,
    max_ticks: u64,
    phase: Phase,
    /// Effective actions of the previous tick, replayed off decision ticks
    last_actions: Vec<Action>,
    faults: FaultLog,
    transcript: RunTranscript,
}

impl Simulation {
    /// Set up a run. `agents[i]` plays the config's agent `i`.
    ///
    /// `max_ticks` overrides the config's tick limit.
    pub fn new(
        config: Arc<MazeConfig>,
        agents: Vec<Box<dyn Agent>>,
        max_ticks: Option<u64>,
    ) -> Result<Self, SimulationError> {
        let expected = config.agents().len();
        if agents.len() != expected {
            return Err(SimulationError::AgentCountMismatch { expected, got: agents.len() });
        }

        let max_ticks = max_ticks.unwrap_or(config.simulation().max_ticks);
        if max_ticks == 0 {
            return Err(SimulationError::ZeroTicks);
        }

        let workers = agents
            .into_iter()
            .enumerate()
            .map(|(i, agent)| AgentWorker::spawn(AgentId(i as u32), agent))
            .collect::<Result<Vec<_>, _>>()?;

        let store = EntityStore::new(&config);
        let transcript = RunTranscript::new(RunMetadata::for_config(&config), store.state_hash(), expected);

        Ok(Self {
            store,
            workers,
            max_ticks,
            phase: Phase::NotStarted,
            last_actions: vec![Action::IDLE; expected],
            faults: FaultLog::new(),
            transcript,
            config,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &MazeConfig {
        &self.config
    }

    pub fn state(&self) -> &GameState {
        self.store.state()
    }

    pub fn tick(&self) -> u64 {
        self.store.state().tick
    }

    pub fn max_ticks(&self) -> u64 {
        self.max_ticks
    }

    pub fn faults(&self) -> &FaultLog {
        &self.faults
    }

    pub fn transcript(&self) -> &RunTranscript {
        &self.transcript
    }

    /// Call every agent's `startup` once. A no-op when already running.
    pub async fn start(&mut self) -> Result<(), SimulationError> {
        match self.phase {
            Phase::Running => return Ok(()),
            Phase::Terminated(_) => return Err(SimulationError::AlreadyTerminated),
            Phase::NotStarted => {}
        }

        info!(
            "Starting run {} with {} agents, max {} ticks",
            self.transcript.metadata.run_id,
            self.workers.len(),
            self.max_ticks
        );

        let initial = self.store.snapshot();
        let budget = Duration::from_millis(self.config.simulation().startup_timeout_ms);
        let replies = join_all(self.workers.iter_mut().map(|w| w.startup(Arc::clone(&initial), budget))).await;

        for (worker, reply) in self.workers.iter().zip(replies) {
            if let Err(fault) = reply {
                self.faults.record(initial.tick, worker.id(), FaultPhase::Startup, fault);
            }
        }

        self.phase = Phase::Running;
        Ok(())
    }

    /// Resolve one tick, starting the run first if needed.
    pub async fn step(&mut self) -> Result<TickResult, SimulationError> {
        match self.phase {
            Phase::NotStarted => self.start().await?,
            Phase::Terminated(_) => return Err(SimulationError::AlreadyTerminated),
            Phase::Running => {}
        }

        let tick = self.store.state().tick;
        let mut actions = if self.is_decision_tick(tick) {
            self.collect_actions(tick).await
        } else {
            self.last_actions.iter().map(|a| a.movement_only()).collect()
        };

        self.transcript.record_actions(tick, &actions);
        let actions_hash = hash_actions(tick, &actions);
        let mut result = resolve_tick(&self.config, &mut self.store, &actions)?;

        for (agent, invalid) in &result.invalid_actions {
            self.faults.record(tick, *agent, FaultPhase::Action, AgentFault::InvalidAction(invalid.clone()));
            if let Some(action) = actions.get_mut(agent.index()) {
                *action = Action::IDLE;
            }
        }
        self.last_actions = actions;

        let now = result.tick;
        if now % self.config.simulation().checkpoint_interval == 0 {
            self.transcript.add_checkpoint(now, self.store.state_hash(), self.store.rng_state(), actions_hash);
        }

        if result.end.is_none() && now >= self.max_ticks {
            result.events.push(end_match(&mut self.store, EndReason::MaxTicks));
            result.end = Some(EndReason::MaxTicks);
        }
        self.transcript.record_events(&result.events);

        if let Some(reason) = result.end {
            self.finish(reason);
        }

        Ok(result)
    }

    /// Step until the run terminates, then shut the workers down.
    pub async fn run_to_end(mut self) -> Result<RunResult, SimulationError> {
        while !matches!(self.phase, Phase::Terminated(_)) {
            self.step().await?;
        }
        self.into_result()
    }

    /// Tear down a terminated run.
    pub fn into_result(self) -> Result<RunResult, SimulationError> {
        let end_reason = match self.phase {
            Phase::Terminated(reason) => reason,
            Phase::Running => return Err(SimulationError::NotStarted),
            Phase::NotStarted => return Err(SimulationError::NotStarted),
        };

        for worker in self.workers {
            worker.shutdown();
        }

        let final_state = self.store.snapshot();
        Ok(RunResult {
            scores: final_state.scores.clone(),
            winner: final_state.leader(),
            end_reason,
            faults: self.faults,
            transcript: self.transcript,
            final_state,
        })
    }

    fn is_decision_tick(&self, tick: u64) -> bool {
        tick % u64::from(self.config.simulation().decision_interval_ticks) == 0
    }

    /// Ask every agent concurrently; faults become idle actions.
    async fn collect_actions(&mut self, tick: u64) -> Vec<Action> {
        let snapshot = self.store.snapshot();
        let budget = Duration::from_millis(self.config.simulation().action_timeout_ms);
        // Tagged-out agents are not asked; they idle until respawn.
        let requests = self.workers.iter_mut().zip(&snapshot.agents).map(|(worker, agent)| {
            let state = Arc::clone(&snapshot);
            let active = agent.active;
            async move {
                if active {
                    Some(worker.get_action(state, budget).await)
                } else {
                    None
                }
            }
        });
        let replies = join_all(requests).await;

        let mut actions = Vec::with_capacity(replies.len());
        for (worker, reply) in self.workers.iter().zip(replies) {
            match reply {
                Some(Ok(action)) => actions.push(action),
                Some(Err(fault)) => {
                    self.faults.record(tick, worker.id(), FaultPhase::Action, fault);
                    actions.push(Action::IDLE);
                }
                None => actions.push(Action::IDLE),
            }
        }
        actions
    }

    fn finish(&mut self, reason: EndReason) {
        let state = self.store.state();
        let final_state_hash = self.store.state_hash();

        self.transcript.finalize(RunSummary {
            end_tick: state.tick,
            end_reason: reason,
            winner: state.leader(),
            scores: state.scores.clone(),
            final_state_hash,
        });
        self.phase = Phase::Terminated(reason);

        info!(
            "Run {} finished at tick {}: {:?}, scores {:?}, {} faults, hash {}",
            self.transcript.metadata.run_id,
            state.tick,
            reason,
            state.scores,
            self.faults.len(),
            short_hex(&final_state_hash)
        );
    }
}

/// Drive a whole run on the current async runtime.
pub async fn run_async(
    config: Arc<MazeConfig>,
    agents: Vec<Box<dyn Agent>>,
    max_ticks: Option<u64>,
) -> Result<RunResult, SimulationError> {
    let mut simulation = Simulation::new(config, agents, max_ticks)?;
    simulation.start().await?;
    simulation.run_to_end().await
}

/// Drive a whole run, blocking on a private single-threaded runtime.
///
/// Fails with [`SimulationError::InsideRuntime`] when called from within an
/// async runtime; use [`run_async`] there.
pub fn run(
    config: Arc<MazeConfig>,
    agents: Vec<Box<dyn Agent>>,
    max_ticks: Option<u64>,
) -> Result<RunResult, SimulationError> {
    if tokio::runtime::Handle::try_current().is_ok() {
        return Err(SimulationError::InsideRuntime);
    }
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(SimulationError::Runtime)?;
    runtime.block_on(run_async(config, agents, max_ticks))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RawMazeConfig;
    use crate::core::vec2::Vec2;
    use crate::game::action::InvalidAction;
    use crate::game::events::GameEventData;
    use crate::sim::bots::{IdleAgent, ScriptedAgent};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn default_config() -> Arc<MazeConfig> {
        Arc::new(MazeConfig::default_arena().unwrap())
    }

    fn config_with(edit: impl FnOnce(&mut RawMazeConfig)) -> Arc<MazeConfig> {
        let mut raw = RawMazeConfig::default();
        edit(&mut raw);
        Arc::new(MazeConfig::from_raw(raw).unwrap())
    }

    struct Panicker;

    impl Agent for Panicker {
        fn get_action(&mut self, _state: &GameState) -> anyhow::Result<Action> {
            panic!("agent bug")
        }
    }

    struct Failing;

    impl Agent for Failing {
        fn startup(&mut self, _me: AgentId, _initial: &GameState) -> anyhow::Result<()> {
            anyhow::bail!("cannot start")
        }

        fn get_action(&mut self, _state: &GameState) -> anyhow::Result<Action> {
            anyhow::bail!("cannot act")
        }
    }

    struct Sleeper(Duration);

    impl Agent for Sleeper {
        fn get_action(&mut self, _state: &GameState) -> anyhow::Result<Action> {
            std::thread::sleep(self.0);
            Ok(Action::moving(Vec2::new(1.0, 0.0)))
        }
    }

    struct Counting {
        startups: Arc<AtomicUsize>,
        calls: Arc<AtomicUsize>,
    }

    impl Agent for Counting {
        fn startup(&mut self, _me: AgentId, initial: &GameState) -> anyhow::Result<()> {
            assert_eq!(initial.tick, 0);
            self.startups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn get_action(&mut self, _state: &GameState) -> anyhow::Result<Action> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Action::moving(Vec2::new(0.0, 1.0)))
        }
    }

    fn west() -> Box<dyn Agent> {
        Box::new(ScriptedAgent::constant(Action::moving(Vec2::new(-5.0, 0.0))))
    }

    #[test]
    fn test_run_reaches_max_ticks() {
        let agents: Vec<Box<dyn Agent>> = vec![Box::new(IdleAgent), Box::new(IdleAgent)];
        let result = run(default_config(), agents, Some(10)).unwrap();

        assert_eq!(result.end_reason, EndReason::MaxTicks);
        assert_eq!(result.final_state.tick, 10);
        assert!(result.final_state.terminal);
        assert_eq!(result.winner, None);
        assert!(result.faults.is_empty());

        let summary = result.transcript.result.as_ref().unwrap();
        assert_eq!(summary.end_tick, 10);
        assert_eq!(summary.scores, vec![0, 0]);
        assert!(result.transcript.events.iter().any(|e| matches!(e.data, GameEventData::MatchEnded { .. })));
    }

    #[test]
    fn test_agent_count_mismatch() {
        let agents: Vec<Box<dyn Agent>> = vec![Box::new(IdleAgent)];
        assert!(matches!(
            Simulation::new(default_config(), agents, None),
            Err(SimulationError::AgentCountMismatch { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn test_zero_ticks_rejected() {
        let agents: Vec<Box<dyn Agent>> = vec![Box::new(IdleAgent), Box::new(IdleAgent)];
        assert!(matches!(
            Simulation::new(default_config(), agents, Some(0)),
            Err(SimulationError::ZeroTicks)
        ));
    }

    #[tokio::test]
    async fn test_faulting_agents_do_not_stop_others() {
        let faulty_agents: Vec<Box<dyn Agent>> = vec![Box::new(Panicker), Box::new(Failing)];
        for faulty in faulty_agents {
            let agents = vec![faulty, west()];
            let result = run_async(default_config(), agents, Some(20)).await.unwrap();

            assert_eq!(result.end_reason, EndReason::MaxTicks);
            assert_eq!(result.final_state.tick, 20);
            assert!(result.final_state.agents[1].position.x < 40.0);
            assert_eq!(result.final_state.agents[0].position, Vec2::new(-40.0, 0.0));

            let action_faults = result
                .faults
                .for_agent(AgentId(0))
                .filter(|r| r.phase == FaultPhase::Action)
                .count();
            assert_eq!(action_faults, 20);
            assert_eq!(result.faults.for_agent(AgentId(1)).count(), 0);
        }
    }

    #[tokio::test]
    async fn test_slow_agent_times_out_then_busy() {
        let config = config_with(|raw| raw.simulation.action_timeout_ms = 20);
        let agents: Vec<Box<dyn Agent>> = vec![Box::new(Sleeper(Duration::from_millis(200))), west()];
        let result = run_async(config, agents, Some(4)).await.unwrap();

        let faults: Vec<&AgentFault> = result.faults.for_agent(AgentId(0)).map(|r| &r.fault).collect();
        assert_eq!(faults[0], &AgentFault::TimedOut { budget_ms: 20 });
        assert!(faults[1..].iter().all(|f| **f == AgentFault::Busy));
        assert_eq!(result.final_state.agents[0].position, Vec2::new(-40.0, 0.0));
        assert!(result.final_state.agents[1].position.x < 40.0);
    }

    #[tokio::test]
    async fn test_invalid_action_is_logged_and_ignored() {
        let too_fast = Box::new(ScriptedAgent::constant(Action::moving(Vec2::new(1000.0, 0.0))));
        let agents: Vec<Box<dyn Agent>> = vec![too_fast, Box::new(IdleAgent)];
        let result = run_async(default_config(), agents, Some(3)).await.unwrap();

        assert_eq!(result.final_state.agents[0].position, Vec2::new(-40.0, 0.0));
        assert_eq!(result.faults.len(), 3);
        assert!(result
            .faults
            .records()
            .iter()
            .all(|r| matches!(r.fault, AgentFault::InvalidAction(InvalidAction::OverSpeed { .. }))));
    }

    #[tokio::test]
    async fn test_startup_once_and_decision_interval() {
        let config = config_with(|raw| raw.simulation.decision_interval_ticks = 5);
        let startups = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let counting = Counting { startups: Arc::clone(&startups), calls: Arc::clone(&calls) };

        let agents: Vec<Box<dyn Agent>> = vec![Box::new(counting), Box::new(IdleAgent)];
        let mut sim = Simulation::new(config, agents, Some(12)).unwrap();
        sim.start().await.unwrap();
        sim.start().await.unwrap();

        let start_y = sim.state().agents[0].position.y;
        for _ in 0..10 {
            sim.step().await.unwrap();
        }

        assert_eq!(startups.load(Ordering::SeqCst), 1);
        // Decision ticks 0 and 5 only.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // Velocity held between decisions.
        assert!(sim.state().agents[0].position.y > start_y);
        assert!((sim.state().agents[0].velocity - Vec2::new(0.0, 1.0)).length() < 1e-9);
    }

    #[tokio::test]
    async fn test_inactive_agent_not_asked() {
        let startups = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let counting = Counting { startups: Arc::clone(&startups), calls: Arc::clone(&calls) };

        let agents: Vec<Box<dyn Agent>> = vec![Box::new(counting), Box::new(IdleAgent)];
        let mut sim = Simulation::new(default_config(), agents, Some(20)).unwrap();
        sim.start().await.unwrap();
        sim.store.state.agents[0].active = false;
        sim.store.state.agents[0].respawn_in = 10;

        for _ in 0..3 {
            sim.step().await.unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(sim.faults().is_empty());
        assert!(!sim.state().agents[0].active);
        assert_eq!(sim.state().agents[0].velocity, Vec2::ZERO);
    }

    #[tokio::test]
    async fn test_run_inside_runtime_is_rejected() {
        let agents: Vec<Box<dyn Agent>> = vec![Box::new(IdleAgent), Box::new(IdleAgent)];
        let result = run(default_config(), agents, Some(5));
        assert!(matches!(result, Err(SimulationError::InsideRuntime)));
    }

    #[tokio::test]
    async fn test_step_after_termination_fails() {
        let agents: Vec<Box<dyn Agent>> = vec![Box::new(IdleAgent), Box::new(IdleAgent)];
        let mut sim = Simulation::new(default_config(), agents, Some(2)).unwrap();

        let first = sim.step().await.unwrap();
        assert_eq!(first.end, None);
        let second = sim.step().await.unwrap();
        assert_eq!(second.end, Some(EndReason::MaxTicks));
        assert_eq!(sim.phase(), Phase::Terminated(EndReason::MaxTicks));
        assert!(matches!(sim.step().await, Err(SimulationError::AlreadyTerminated)));
    }

    #[tokio::test]
    async fn test_identical_runs_are_identical() {
        async fn trace() -> (Vec<Vec<u8>>, [u8; 32]) {
            let script = vec![
                Action::moving(Vec2::new(3.0, 4.0)),
                Action::moving(Vec2::new(0.0, -6.0)),
                Action::IDLE,
                Action::moving(Vec2::new(-8.0, 1.0)),
            ];
            let agents: Vec<Box<dyn Agent>> = vec![
                Box::new(ScriptedAgent::new(script.clone())),
                Box::new(ScriptedAgent::new(script.into_iter().rev().collect())),
            ];
            let mut sim = Simulation::new(default_config(), agents, Some(30)).unwrap();

            let mut states = vec![sim.state().to_bytes().unwrap()];
            while !matches!(sim.phase(), Phase::Terminated(_)) {
                sim.step().await.unwrap();
                states.push(sim.state().to_bytes().unwrap());
            }
            let result = sim.into_result().unwrap();
            (states, result.transcript.result.unwrap().final_state_hash)
        }

        let (states_a, hash_a) = trace().await;
        let (states_b, hash_b) = trace().await;
        assert_eq!(states_a.len(), 31);
        assert_eq!(states_a, states_b);
        assert_eq!(hash_a, hash_b);
    }
}
