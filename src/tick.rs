//! Tick barrier.
//!
//! State machine: `Idle -> Open -> Draining -> Closed(outcome) -> Idle`.
//! The orchestrator opens a tick with the ids alive at tick start, agent
//! units signal completion once each, and the orchestrator waits for all of
//! them or a timeout. Units hold a commit guard only while applying their
//! action. Closing stamps the tick shut, so later commits are refused, and
//! then waits a bounded grace period for commits already in flight.

use crate::agent::AgentId;
use crate::error::{Result, SimError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, TryLockError};
use std::time::{Duration, Instant};

/// Floor on the wait for in-flight commits after the barrier closes
const MIN_COMMIT_GRACE: Duration = Duration::from_millis(10);
const GRACE_POLL: Duration = Duration::from_micros(200);

/// How a tick was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TickOutcome {
    Complete,
    /// Force-closed with this many agents still outstanding
    Timeout { missing: usize },
}

impl TickOutcome {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TickOutcome::Timeout { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TickPhase {
    Idle,
    Open,
    Draining,
    Closed(TickOutcome),
}

/// Barrier accounting for one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub tick: u64,
    pub outcome: TickOutcome,
    pub expected: usize,
    pub completed: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug)]
struct BarrierState {
    phase: TickPhase,
    tick: u64,
    expected: usize,
    pending: HashSet<AgentId>,
}

impl BarrierState {
    fn completed(&self) -> usize {
        self.expected - self.pending.len()
    }
}

/// Held by an agent unit while it mutates shared state
#[derive(Debug)]
pub struct CommitGuard<'a> {
    _gate: RwLockReadGuard<'a, ()>,
    tick: u64,
}

impl CommitGuard<'_> {
    pub fn tick(&self) -> u64 {
        self.tick
    }
}

#[derive(Debug)]
pub struct TickCoordinator {
    state: Mutex<BarrierState>,
    drained: Condvar,
    /// Tick whose agents may still commit (0 = none)
    open: AtomicU64,
    /// Read side held by each commit in flight
    gate: RwLock<()>,
    opened_at: Mutex<Option<Instant>>,
}

impl Default for TickCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl TickCoordinator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BarrierState {
                phase: TickPhase::Idle,
                tick: 0,
                expected: 0,
                pending: HashSet::new(),
            }),
            drained: Condvar::new(),
            open: AtomicU64::new(0),
            gate: RwLock::new(()),
            opened_at: Mutex::new(None),
        }
    }

    fn state(&self) -> MutexGuard<'_, BarrierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn phase(&self) -> TickPhase {
        self.state().phase
    }

    pub fn is_idle(&self) -> bool {
        self.phase() == TickPhase::Idle
    }

    /// Fail with `NotIdle` unless no tick is in progress
    pub fn ensure_idle(&self) -> Result<()> {
        match self.phase() {
            TickPhase::Idle => Ok(()),
            phase => Err(SimError::NotIdle { phase }),
        }
    }

    /// Last tick opened (0 before the first)
    pub fn current_tick(&self) -> u64 {
        self.state().tick
    }

    pub fn expected_actors(&self) -> usize {
        self.state().expected
    }

    pub fn completions(&self) -> usize {
        self.state().completed()
    }

    /// Open the next tick for the given actors.
    pub fn open_tick<I>(&self, actors: I) -> Result<u64>
    where
        I: IntoIterator<Item = AgentId>,
    {
        let tick = {
            let mut state = self.state();
            if state.phase != TickPhase::Idle {
                return Err(SimError::NotIdle { phase: state.phase });
            }
            state.pending = actors.into_iter().collect();
            state.expected = state.pending.len();
            state.tick += 1;
            state.phase = TickPhase::Open;
            state.tick
        };
        self.open.store(tick, Ordering::SeqCst);
        *self.opened_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        Ok(tick)
    }

    /// Whether units of `tick` may still commit
    pub fn accepts(&self, tick: u64) -> bool {
        tick != 0 && self.open.load(Ordering::SeqCst) == tick
    }

    /// Enter the commit phase for `tick`; `None` once that tick has closed.
    ///
    /// Keep the guard for the mutation only and drop it before calling
    /// `signal_done`.
    pub fn begin_commit(&self, tick: u64) -> Option<CommitGuard<'_>> {
        let gate = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        self.accepts(tick).then_some(CommitGuard { _gate: gate, tick })
    }

    /// Record that `agent` finished `tick`. Repeated or late signals are
    /// ignored and return `false`.
    pub fn signal_done(&self, tick: u64, agent: AgentId) -> bool {
        let mut state = self.state();
        let accepting = matches!(state.phase, TickPhase::Open | TickPhase::Draining);
        if !accepting || state.tick != tick || !state.pending.remove(&agent) {
            return false;
        }
        if state.pending.is_empty() {
            self.drained.notify_all();
        }
        true
    }

    /// Block until every actor signalled or `timeout` elapsed, then close.
    ///
    /// Commits still in flight get `max(timeout, 10ms)` more to finish;
    /// the close never waits longer than that.
    pub fn wait_for_completion(&self, timeout: Duration) -> TickReport {
        {
            let mut state = self.state();
            if state.phase == TickPhase::Open {
                state.phase = TickPhase::Draining;
            }
            let (guard, _) = self
                .drained
                .wait_timeout_while(state, timeout, |s| {
                    s.phase == TickPhase::Draining && !s.pending.is_empty()
                })
                .unwrap_or_else(PoisonError::into_inner);
            drop(guard);
        }

        let closing = self.open.swap(0, Ordering::SeqCst);
        if !self.settle_commits(timeout.max(MIN_COMMIT_GRACE)) {
            log::warn!("Tick {} closed with agent commits still in flight", closing);
        }

        let mut state = self.state();
        let outcome = if state.pending.is_empty() {
            TickOutcome::Complete
        } else {
            TickOutcome::Timeout {
                missing: state.pending.len(),
            }
        };
        if matches!(state.phase, TickPhase::Open | TickPhase::Draining) {
            state.phase = TickPhase::Closed(outcome);
        }
        let elapsed_ms = self
            .opened_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);

        TickReport {
            tick: state.tick,
            outcome,
            expected: state.expected,
            completed: state.completed(),
            elapsed_ms,
        }
    }

    /// Wait up to `grace` for every outstanding commit guard to drop
    fn settle_commits(&self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        loop {
            match self.gate.try_write() {
                Ok(_) | Err(TryLockError::Poisoned(_)) => return true,
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        return false;
                    }
                    std::thread::sleep(GRACE_POLL);
                }
            }
        }
    }

    /// Return to `Idle` after the single-threaded phase
    pub fn finish_tick(&self) {
        let mut state = self.state();
        if matches!(state.phase, TickPhase::Closed(_)) {
            state.phase = TickPhase::Idle;
            state.pending.clear();
        }
    }
}
