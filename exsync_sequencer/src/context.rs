//! Shared sequencer context.
//!
//! Every task (command threads, abort, scan monitor) holds an
//! `Arc<SequencerContext>`. The cancel flag, the in-flight flag, the state
//! and the operator status live behind one mutex so that they change
//! together; the condvar wakes anyone waiting for quiescence or for an
//! abort to finish.

use exsync_common::clock::Clock;
use exsync_common::consts::STATUS_HISTORY_LEN;
use exsync_common::io::role::OutputRole;
use exsync_hal::DigitalLineSet;
use heapless::Deque;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

use crate::error::SequencerError;
use crate::state::{CurrentFunction, SequencerState, TransitionResult};

/// Number of state transitions retained.
pub const TRANSITION_LOG_LEN: usize = 32;

/// One operator status update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    pub text: String,
    pub function: CurrentFunction,
    pub at: SystemTime,
}

/// Point-in-time view for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct ContextSnapshot {
    pub state: SequencerState,
    pub status: String,
    pub function: CurrentFunction,
    pub seq_in_progress: bool,
    pub running: Option<&'static str>,
    pub cancel: bool,
}

#[derive(Debug)]
struct Shared {
    cancel: bool,
    aborting: bool,
    seq_in_progress: bool,
    running: Option<&'static str>,
    state: SequencerState,
    status: String,
    function: CurrentFunction,
    history: Deque<StatusEntry, STATUS_HISTORY_LEN>,
    transitions: Deque<(SequencerState, Instant), TRANSITION_LOG_LEN>,
}

pub struct SequencerContext {
    inner: Mutex<Shared>,
    changed: Condvar,
    clock: Arc<dyn Clock>,
}

impl SequencerContext {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Shared {
                cancel: false,
                aborting: false,
                seq_in_progress: false,
                running: None,
                state: SequencerState::Idle,
                status: "Idle".to_string(),
                function: CurrentFunction::None,
                history: Deque::new(),
                transitions: Deque::new(),
            }),
            changed: Condvar::new(),
            clock,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // ─── In-flight sequence ─────────────────────────────────────────

    /// Claim the single in-flight slot for `name`.
    ///
    /// # Errors
    /// - `ConcurrentRequestRejected` if another sequence holds the slot
    /// - `NotReady` while an abort is unwinding
    pub fn try_begin_sequence(
        self: &Arc<Self>,
        name: &'static str,
    ) -> Result<SequenceGuard, SequencerError> {
        let mut inner = self.inner.lock();
        if let Some(running) = inner.running.filter(|_| inner.seq_in_progress) {
            warn!("{name} rejected: {running} in progress");
            return Err(SequencerError::ConcurrentRequestRejected { running });
        }
        if inner.cancel {
            warn!("{name} rejected: abort in progress");
            return Err(SequencerError::NotReady("Abort in progress"));
        }
        inner.seq_in_progress = true;
        inner.running = Some(name);
        debug!("Sequence '{name}' started");
        Ok(SequenceGuard {
            ctx: Arc::clone(self),
            name,
        })
    }

    pub fn seq_in_progress(&self) -> bool {
        self.inner.lock().seq_in_progress
    }

    /// Name of the in-flight sequence, if any.
    pub fn running(&self) -> Option<&'static str> {
        let inner = self.inner.lock();
        inner.running.filter(|_| inner.seq_in_progress)
    }

    fn end_sequence(&self, name: &'static str) {
        let mut inner = self.inner.lock();
        inner.seq_in_progress = false;
        inner.running = None;
        if inner.state != SequencerState::Aborting {
            Self::record_state(&mut inner, SequencerState::Idle, self.clock.now());
        }
        debug!("Sequence '{name}' ended");
        self.changed.notify_all();
    }

    /// Block until no sequence is in flight. `None` waits forever.
    ///
    /// Returns `false` on timeout.
    pub fn wait_until_quiescent(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut inner = self.inner.lock();
        while inner.seq_in_progress {
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut inner, deadline).timed_out() {
                        return !inner.seq_in_progress;
                    }
                }
                None => self.changed.wait(&mut inner),
            }
        }
        true
    }

    // ─── Cancel ─────────────────────────────────────────────────────

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.lock().cancel
    }

    pub fn is_aborting(&self) -> bool {
        self.inner.lock().aborting
    }

    /// Set the cancel flag and enter `Aborting`.
    ///
    /// Returns `false` if an abort is already unwinding; that caller must
    /// not run a second unwind.
    pub fn begin_abort(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.cancel {
            return false;
        }
        inner.cancel = true;
        inner.aborting = true;
        Self::record_state(&mut inner, SequencerState::Aborting, self.clock.now());
        self.changed.notify_all();
        true
    }

    /// Clear the cancel flag once every sequence has observed it.
    ///
    /// The final status lands under the same lock, so a sequence admitted
    /// after the abort can never have its first status overwritten.
    pub fn finish_abort(&self, status: &str) {
        let at = self.clock.wall_clock();
        let mut inner = self.inner.lock();
        info!("Status: {} {}", status, inner.function);
        Self::push_status(&mut inner, status.to_owned(), at);
        inner.cancel = false;
        inner.aborting = false;
        Self::record_state(&mut inner, SequencerState::Idle, self.clock.now());
        self.changed.notify_all();
    }

    /// Block while an abort is unwinding.
    pub fn wait_abort_complete(&self) {
        let mut inner = self.inner.lock();
        while inner.aborting {
            self.changed.wait(&mut inner);
        }
    }

    /// Assert an output unless cancel is set.
    ///
    /// The check and the write happen under the context lock, and the abort
    /// path sets cancel under the same lock before forcing lines low, so an
    /// assertion can never land after the abort's reset.
    pub fn assert_unless_cancelled(
        &self,
        lines: &DigitalLineSet,
        role: OutputRole,
    ) -> Result<(), SequencerError> {
        let inner = self.inner.lock();
        if inner.cancel {
            return Err(SequencerError::Aborted);
        }
        let result = lines.set_line(role, true);
        drop(inner);
        result.map_err(|source| SequencerError::HardwareWrite { line: role, source })
    }

    // ─── State ──────────────────────────────────────────────────────

    pub fn state(&self) -> SequencerState {
        self.inner.lock().state
    }

    /// Move to `to` if the table allows it.
    pub fn transition(&self, to: SequencerState) -> Result<(), SequencerError> {
        let mut inner = self.inner.lock();
        let from = inner.state;
        match from.transition(to) {
            TransitionResult::Ok(next) => {
                Self::record_state(&mut inner, next, self.clock.now());
                debug!("State {from} -> {next}");
                Ok(())
            }
            TransitionResult::Rejected(reason) => {
                if inner.cancel {
                    // The abort path already moved us; report the cancel.
                    return Err(SequencerError::Aborted);
                }
                warn!("State {from} -> {to} rejected: {reason}");
                Err(SequencerError::InvalidTransition { from, to })
            }
        }
    }

    fn record_state(inner: &mut Shared, state: SequencerState, at: Instant) {
        inner.state = state;
        if inner.transitions.is_full() {
            inner.transitions.pop_front();
        }
        let _ = inner.transitions.push_back((state, at));
    }

    /// Recent transitions, oldest first.
    pub fn transitions(&self) -> Vec<(SequencerState, Instant)> {
        self.inner.lock().transitions.iter().copied().collect()
    }

    // ─── Status ─────────────────────────────────────────────────────

    pub fn set_status(&self, text: impl Into<String>) {
        let text = text.into();
        let at = self.clock.wall_clock();
        let mut inner = self.inner.lock();
        info!("Status: {} {}", text, inner.function);
        Self::push_status(&mut inner, text, at);
    }

    fn push_status(inner: &mut Shared, text: String, at: SystemTime) {
        if inner.history.is_full() {
            inner.history.pop_front();
        }
        let entry = StatusEntry {
            text: text.clone(),
            function: inner.function,
            at,
        };
        let _ = inner.history.push_back(entry);
        inner.status = text;
    }

    pub fn status(&self) -> String {
        self.inner.lock().status.clone()
    }

    pub fn set_function(&self, function: CurrentFunction) {
        self.inner.lock().function = function;
    }

    pub fn current_function(&self) -> CurrentFunction {
        self.inner.lock().function
    }

    /// Status history, oldest first.
    pub fn history(&self) -> Vec<StatusEntry> {
        self.inner.lock().history.iter().cloned().collect()
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        let inner = self.inner.lock();
        ContextSnapshot {
            state: inner.state,
            status: inner.status.clone(),
            function: inner.function,
            seq_in_progress: inner.seq_in_progress,
            running: inner.running,
            cancel: inner.cancel,
        }
    }
}

/// Holds the in-flight slot. Dropping it releases the slot and wakes
/// quiescence waiters.
#[must_use = "dropping the guard ends the sequence"]
pub struct SequenceGuard {
    ctx: Arc<SequencerContext>,
    name: &'static str,
}

impl SequenceGuard {
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl Drop for SequenceGuard {
    fn drop(&mut self) {
        self.ctx.end_sequence(self.name);
    }
}

impl std::fmt::Debug for SequenceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SequenceGuard").field(&self.name).finish()
    }
}
