//! Abort controller.
//!
//! Any actor (operator command, scan monitor, a failing sequence) may
//! request an abort. The first requester runs the unwind; later requesters
//! block until it completes, so two calls in a row look like one.
//!
//! Unwind order:
//! 1. set cancel (under the context lock) and enter `Aborting`
//! 2. force every energizing line low
//! 3. stop a running scan
//! 4. wait until no sequence is in flight
//! 5. commit an exposure that ended before the abort
//! 6. clear cancel, report "Abort complete"

use exsync_common::hal::types::LineGroup;
use exsync_hal::{DigitalLineSet, LastExposureStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::context::{SequenceGuard, SequencerContext};
use crate::scan::ScanLiaison;

/// Interval between "still waiting" reports during quiescence.
const QUIESCENCE_REPORT: Duration = Duration::from_secs(5);

pub struct AbortController {
    ctx: Arc<SequencerContext>,
    lines: Arc<DigitalLineSet>,
    scan: Arc<dyn ScanLiaison>,
    exposures: Arc<LastExposureStore>,
}

impl AbortController {
    pub fn new(
        ctx: Arc<SequencerContext>,
        lines: Arc<DigitalLineSet>,
        scan: Arc<dyn ScanLiaison>,
        exposures: Arc<LastExposureStore>,
    ) -> Self {
        Self {
            ctx,
            lines,
            scan,
            exposures,
        }
    }

    /// Request an abort and return once it has completed.
    ///
    /// Idempotent; safe to call from any number of threads.
    pub fn request_abort(&self) {
        if !self.ctx.begin_abort() {
            info!("Abort already in progress, waiting for it");
            self.ctx.wait_abort_complete();
            return;
        }
        warn!("Abort requested");
        self.unwind(None);
    }

    /// Abort on behalf of the sequence holding `guard`.
    ///
    /// The guard is released once the lines are safe, so quiescence does
    /// not wait on the caller.
    pub fn abort_sequence(&self, guard: SequenceGuard) {
        if !self.ctx.begin_abort() {
            // Another abort is unwinding and waits for this sequence.
            drop(guard);
            return;
        }
        warn!("Sequence '{}' failed, aborting", guard.name());
        self.unwind(Some(guard));
    }

    #[inline]
    pub fn is_abort_requested(&self) -> bool {
        self.ctx.is_cancelled()
    }

    /// Block until no sequence is in flight.
    pub fn wait_for_quiescence(&self) {
        while !self.ctx.wait_until_quiescent(Some(QUIESCENCE_REPORT)) {
            warn!(
                "Abort still waiting for '{}' to observe cancel",
                self.ctx.running().unwrap_or("sequence")
            );
        }
    }

    fn unwind(&self, guard: Option<SequenceGuard>) {
        self.ctx.set_status("ABORTING!");

        if let Err(e) = self.lines.force_low(LineGroup::ENERGIZING) {
            error!("Abort could not reset every line: {e}");
            self.ctx.set_status(format!("ABORTING! line reset failed: {e}"));
        }

        match self.scan.is_scan_running() {
            Ok(true) => {
                info!("Cancelling running scan");
                if let Err(e) = self.scan.cancel_scan() {
                    error!("Scan cancel failed: {e}");
                }
            }
            Ok(false) => {}
            Err(e) => error!("Scan controller {e}"),
        }

        drop(guard);
        self.wait_for_quiescence();

        if let Err(e) = self.exposures.commit_pending() {
            error!("Exposure time not saved: {e}");
        }

        self.ctx.finish_abort("Abort complete");
    }
}
