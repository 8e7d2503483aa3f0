//! Per-collection run coalescing

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use super::report::CollectionReport;

#[derive(Default)]
struct GateState {
    running: bool,
    rerun_requested: bool,
    /// Passes started so far
    started: u64,
}

#[derive(Clone, Default)]
struct Completed {
    passes: u64,
    report: Option<CollectionReport>,
}

pub(crate) enum Admission {
    /// The caller runs passes until no rerun is requested.
    Leader,
    /// A pass is running; the caller waits for pass number `target`.
    Follower { target: u64 },
}

/// Keeps at most one pass in flight and folds any requests that arrive
/// meanwhile into a single follow-up pass.
pub(crate) struct RunGate {
    state: Mutex<GateState>,
    completed: watch::Sender<Completed>,
}

impl RunGate {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(GateState::default()),
            completed: watch::Sender::new(Completed::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn enter(&self) -> Admission {
        let mut state = self.state();
        if state.running {
            state.rerun_requested = true;
            Admission::Follower {
                target: state.started + 1,
            }
        } else {
            state.running = true;
            state.started += 1;
            Admission::Leader
        }
    }

    /// Publish a finished pass. Returns `true` when the leader must run again.
    pub(crate) fn finish_pass(&self, report: &CollectionReport) -> bool {
        let mut state = self.state();
        self.completed.send_replace(Completed {
            passes: state.started,
            report: Some(report.clone()),
        });
        if state.rerun_requested {
            state.rerun_requested = false;
            state.started += 1;
            true
        } else {
            state.running = false;
            false
        }
    }

    /// Release the gate after the leader stopped mid-pass. Waiting followers
    /// are woken without a report.
    fn abandon(&self) {
        let mut state = self.state();
        state.running = false;
        state.rerun_requested = false;
        self.completed.send_replace(Completed {
            passes: state.started + 1,
            report: None,
        });
    }

    pub(crate) async fn wait_for(&self, target: u64) -> Option<CollectionReport> {
        let mut completed = self.completed.subscribe();
        let done = completed
            .wait_for(|completed| completed.passes >= target)
            .await
            .ok()?;
        done.report.clone()
    }
}

/// Releases the gate if the leader's future is dropped or panics.
pub(crate) struct LeaderGuard<'a> {
    gate: &'a RunGate,
    armed: bool,
}

impl<'a> LeaderGuard<'a> {
    pub(crate) const fn new(gate: &'a RunGate) -> Self {
        Self { gate, armed: true }
    }

    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.gate.abandon();
        }
    }
}
