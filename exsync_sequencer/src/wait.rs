//! Cooperative wait loops.
//!
//! Every wait polls a condition on the injected clock and re-checks the
//! cancel flag on each iteration. Cancellation is checked before the
//! condition, so a wait never succeeds after an abort was requested.

use exsync_common::clock::Clock;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use crate::context::SequencerContext;
use crate::error::SequencerError;

#[derive(Clone)]
pub struct Waiter {
    ctx: Arc<SequencerContext>,
    clock: Arc<dyn Clock>,
    poll: Duration,
}

impl Waiter {
    pub fn new(ctx: Arc<SequencerContext>, clock: Arc<dyn Clock>, poll: Duration) -> Self {
        Self { ctx, clock, poll }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll
    }

    /// Poll `cond` until it holds.
    ///
    /// # Errors
    /// - `Aborted` as soon as cancel is observed
    /// - `ConfirmationTimeout` once `timeout` has elapsed (`None` = unbounded)
    pub fn until<F>(
        &self,
        what: &'static str,
        timeout: Option<Duration>,
        mut cond: F,
    ) -> Result<(), SequencerError>
    where
        F: FnMut() -> bool,
    {
        let started = self.clock.now();
        let mut polls = 0u64;
        loop {
            if self.ctx.is_cancelled() {
                trace!("Wait for {what} cancelled after {polls} polls");
                return Err(SequencerError::Aborted);
            }
            if cond() {
                trace!("Wait for {what} satisfied after {polls} polls");
                return Ok(());
            }
            let waited = self.clock.now().saturating_duration_since(started);
            if let Some(limit) = timeout {
                if waited >= limit {
                    return Err(SequencerError::ConfirmationTimeout {
                        waiting_for: what,
                        after: waited,
                    });
                }
            }
            self.clock.sleep(self.poll);
            polls += 1;
        }
    }

    /// Sleep `duration` in poll-sized slices, returning early on cancel.
    pub fn pause(&self, duration: Duration) -> Result<(), SequencerError> {
        let started = self.clock.now();
        loop {
            if self.ctx.is_cancelled() {
                return Err(SequencerError::Aborted);
            }
            let elapsed = self.clock.now().saturating_duration_since(started);
            if elapsed >= duration {
                return Ok(());
            }
            self.clock.sleep(self.poll.min(duration - elapsed));
        }
    }
}
