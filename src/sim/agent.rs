//! Agent Contract and Workers
//!
//! Each agent program runs on its own OS thread. The driver talks to it
//! over channels and never waits longer than the configured budget:
//!
//! ```text
//!   driver (tokio)                           worker thread "agent-{id}"
//!   ──────────────                           ──────────────────────────
//!   mpsc::Sender<Request> ───── request ───► blocking_recv()
//!                                              catch_unwind(agent.get_action)
//!   timeout(budget, oneshot) ◄─── reply ────── reply.send(..)
//! ```
//!
//! A request that misses its budget leaves its reply slot pending. Until
//! that late reply arrives the worker is reported [`AgentFault::Busy`]; the
//! late reply itself is discarded.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use serde::{Serialize, Deserialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::warn;

use crate::game::action::{Action, InvalidAction};
use crate::game::state::{AgentId, GameState};
use crate::sim::driver::SimulationError;

// =============================================================================
// AGENT CONTRACT
// =============================================================================

/// An agent program.
///
/// Both calls receive read-only snapshots. Errors and panics are contained:
/// they turn into an idle action for that tick and a logged fault.
pub trait Agent: Send {
    /// Called once before the first tick.
    fn startup(&mut self, me: AgentId, initial: &GameState) -> anyhow::Result<()> {
        let _ = (me, initial);
        Ok(())
    }

    /// Choose an action for the current snapshot.
    fn get_action(&mut self, state: &GameState) -> anyhow::Result<Action>;
}

// =============================================================================
// FAULTS
// =============================================================================

/// Why an agent contributed an idle action instead of its own.
#[derive(Clone, Debug, PartialEq, Error, Serialize, Deserialize)]
pub enum AgentFault {
    #[error("agent returned an error: {0}")]
    Errored(String),
    #[error("agent panicked: {0}")]
    Panicked(String),
    #[error("agent exceeded its {budget_ms} ms budget")]
    TimedOut { budget_ms: u64 },
    #[error("agent is still busy with an earlier request")]
    Busy,
    #[error("agent worker is gone")]
    Disconnected,
    #[error("invalid action: {0}")]
    InvalidAction(InvalidAction),
}

/// Which call faulted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultPhase {
    Startup,
    Action,
}

/// One logged fault.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FaultRecord {
    /// State tick the request was made against
    pub tick: u64,
    pub agent: AgentId,
    pub phase: FaultPhase,
    pub fault: AgentFault,
}

/// Every fault of a run, in order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FaultLog {
    records: Vec<FaultRecord>,
}

impl FaultLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log and keep a fault.
    pub fn record(&mut self, tick: u64, agent: AgentId, phase: FaultPhase, fault: AgentFault) {
        warn!("Agent {} fault at tick {} ({:?}): {}", agent, tick, phase, fault);
        self.records.push(FaultRecord { tick, agent, phase, fault });
    }

    pub fn records(&self) -> &[FaultRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Faults of one agent.
    pub fn for_agent(&self, agent: AgentId) -> impl Iterator<Item = &FaultRecord> {
        self.records.iter().filter(move |r| r.agent == agent)
    }

    /// Fault count per agent, index = agent id.
    pub fn counts(&self, agents: usize) -> Vec<usize> {
        let mut counts = vec![0; agents];
        for record in &self.records {
            if let Some(c) = counts.get_mut(record.agent.index()) {
                *c += 1;
            }
        }
        counts
    }
}

// =============================================================================
// WORKER
// =============================================================================

/// What a worker answers.
#[derive(Debug)]
enum Reply {
    Ready,
    Action(Action),
}

type ReplySender = oneshot::Sender<Result<Reply, AgentFault>>;
type ReplyReceiver = oneshot::Receiver<Result<Reply, AgentFault>>;

enum Request {
    Startup { me: AgentId, state: Arc<GameState>, reply: ReplySender },
    Act { state: Arc<GameState>, reply: ReplySender },
}

/// Driver-side handle to one agent's thread.
pub(crate) struct AgentWorker {
    id: AgentId,
    requests: mpsc::Sender<Request>,
    /// Reply slot of a request that overran its budget
    pending: Option<ReplyReceiver>,
    thread: Option<JoinHandle<()>>,
}

impl AgentWorker {
    /// Move `agent` onto a new thread named `agent-{id}`.
    pub(crate) fn spawn(id: AgentId, agent: Box<dyn Agent>) -> Result<Self, SimulationError> {
        let (tx, rx) = mpsc::channel(1);
        let thread = std::thread::Builder::new()
            .name(format!("agent-{}", id))
            .spawn(move || worker_loop(agent, rx))
            .map_err(|source| SimulationError::WorkerSpawn { agent: id, source })?;

        Ok(Self {
            id,
            requests: tx,
            pending: None,
            thread: Some(thread),
        })
    }

    pub(crate) fn id(&self) -> AgentId {
        self.id
    }

    /// Run `startup` within `budget`.
    pub(crate) async fn startup(&mut self, state: Arc<GameState>, budget: Duration) -> Result<(), AgentFault> {
        let me = self.id;
        match self.call(|reply| Request::Startup { me, state, reply }, budget).await? {
            Reply::Ready => Ok(()),
            Reply::Action(_) => Err(AgentFault::Disconnected),
        }
    }

    /// Ask for an action within `budget`.
    pub(crate) async fn get_action(&mut self, state: Arc<GameState>, budget: Duration) -> Result<Action, AgentFault> {
        match self.call(|reply| Request::Act { state, reply }, budget).await? {
            Reply::Action(action) => Ok(action),
            Reply::Ready => Err(AgentFault::Disconnected),
        }
    }

    async fn call(
        &mut self,
        request: impl FnOnce(ReplySender) -> Request,
        budget: Duration,
    ) -> Result<Reply, AgentFault> {
        // A late reply from an earlier overrun is thrown away once it lands.
        if let Some(mut late) = self.pending.take() {
            match late.try_recv() {
                Ok(_) => {}
                Err(oneshot::error::TryRecvError::Empty) => {
                    self.pending = Some(late);
                    return Err(AgentFault::Busy);
                }
                Err(oneshot::error::TryRecvError::Closed) => return Err(AgentFault::Disconnected),
            }
        }

        let (tx, mut rx) = oneshot::channel();
        if self.requests.send(request(tx)).await.is_err() {
            return Err(AgentFault::Disconnected);
        }

        match timeout(budget, &mut rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(AgentFault::Disconnected),
            Err(_) => {
                self.pending = Some(rx);
                Err(AgentFault::TimedOut { budget_ms: budget.as_millis() as u64 })
            }
        }
    }

    /// Close the channel. Idle workers are joined; a worker still stuck in
    /// an overrun call is left to finish on its own.
    pub(crate) fn shutdown(mut self) {
        let id = self.id;
        let thread = self.thread.take();
        let idle = self.pending.is_none();
        if !idle {
            warn!("Agent {} still busy at shutdown, detaching its worker thread", id);
        }
        drop(self);
        if let (Some(thread), true) = (thread, idle) {
            if thread.join().is_err() {
                warn!("Agent worker thread exited abnormally");
            }
        }
    }
}

fn worker_loop(mut agent: Box<dyn Agent>, mut requests: mpsc::Receiver<Request>) {
    while let Some(request) = requests.blocking_recv() {
        match request {
            Request::Startup { me, state, reply } => {
                let result = guarded(|| agent.startup(me, &state)).map(|()| Reply::Ready);
                let _ = reply.send(result);
            }
            Request::Act { state, reply } => {
                let result = guarded(|| agent.get_action(&state)).map(Reply::Action);
                let _ = reply.send(result);
            }
        }
    }
}

/// Run an agent call, turning errors and panics into faults.
fn guarded<T>(call: impl FnOnce() -> anyhow::Result<T>) -> Result<T, AgentFault> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(AgentFault::Errored(format!("{:#}", e))),
        Err(payload) => Err(AgentFault::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MazeConfig;
    use crate::core::vec2::Vec2;
    use crate::game::state::EntityStore;

    struct Echo;

    impl Agent for Echo {
        fn startup(&mut self, _me: AgentId, _initial: &GameState) -> anyhow::Result<()> {
            Ok(())
        }

        fn get_action(&mut self, state: &GameState) -> anyhow::Result<Action> {
            Ok(Action::moving(Vec2::new(state.tick as f64, 0.0)))
        }
    }

    struct Broken;

    impl Agent for Broken {
        fn startup(&mut self, _me: AgentId, _initial: &GameState) -> anyhow::Result<()> {
            anyhow::bail!("no map")
        }

        fn get_action(&mut self, _state: &GameState) -> anyhow::Result<Action> {
            panic!("lost")
        }
    }

    struct Slow(Duration);

    impl Agent for Slow {
        fn get_action(&mut self, _state: &GameState) -> anyhow::Result<Action> {
            std::thread::sleep(self.0);
            Ok(Action::IDLE)
        }
    }

    fn snapshot() -> Arc<GameState> {
        EntityStore::new(&MazeConfig::default_arena().unwrap()).snapshot()
    }

    #[tokio::test]
    async fn test_worker_answers() {
        let mut worker = AgentWorker::spawn(AgentId(0), Box::new(Echo)).unwrap();
        let budget = Duration::from_secs(1);

        assert_eq!(worker.startup(snapshot(), budget).await, Ok(()));
        assert_eq!(worker.get_action(snapshot(), budget).await, Ok(Action::IDLE));
        worker.shutdown();
    }

    #[tokio::test]
    async fn test_errors_and_panics_become_faults() {
        let mut worker = AgentWorker::spawn(AgentId(1), Box::new(Broken)).unwrap();
        let budget = Duration::from_secs(1);

        assert_eq!(worker.startup(snapshot(), budget).await, Err(AgentFault::Errored("no map".into())));
        assert_eq!(worker.get_action(snapshot(), budget).await, Err(AgentFault::Panicked("lost".into())));
        // The worker survives its own panic.
        assert_eq!(worker.get_action(snapshot(), budget).await, Err(AgentFault::Panicked("lost".into())));
        worker.shutdown();
    }

    #[tokio::test]
    async fn test_overrun_reports_busy_until_late_reply() {
        let mut worker = AgentWorker::spawn(AgentId(2), Box::new(Slow(Duration::from_millis(150)))).unwrap();
        let budget = Duration::from_millis(20);

        assert_eq!(worker.get_action(snapshot(), budget).await, Err(AgentFault::TimedOut { budget_ms: 20 }));
        assert_eq!(worker.get_action(snapshot(), budget).await, Err(AgentFault::Busy));

        tokio::time::sleep(Duration::from_millis(300)).await;
        // Late reply discarded, fresh request served (and overruns again).
        assert_eq!(worker.get_action(snapshot(), budget).await, Err(AgentFault::TimedOut { budget_ms: 20 }));
        worker.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_detaches_busy_worker() {
        let mut worker = AgentWorker::spawn(AgentId(1), Box::new(Slow(Duration::from_secs(2)))).unwrap();
        let budget = Duration::from_millis(20);
        assert_eq!(worker.get_action(snapshot(), budget).await, Err(AgentFault::TimedOut { budget_ms: 20 }));

        let started = std::time::Instant::now();
        worker.shutdown();
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_fault_log_counts() {
        let mut log = FaultLog::new();
        log.record(1, AgentId(0), FaultPhase::Action, AgentFault::Busy);
        log.record(2, AgentId(0), FaultPhase::Action, AgentFault::Busy);
        log.record(2, AgentId(2), FaultPhase::Startup, AgentFault::Disconnected);

        assert_eq!(log.len(), 3);
        assert_eq!(log.counts(3), vec![2, 0, 1]);
        assert_eq!(log.for_agent(AgentId(2)).count(), 1);
    }
}
