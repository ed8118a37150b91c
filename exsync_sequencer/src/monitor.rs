//! Scan cancel monitor.
//!
//! The scan controller can be cancelled from its own panel. When that
//! happens while the generator is in rad prep, the sequencer must unwind
//! the same way an operator abort does.

use exsync_common::clock::Clock;
use exsync_common::io::role::OutputRole;
use exsync_hal::DigitalLineSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, warn};

use crate::abort::AbortController;
use crate::context::SequencerContext;
use crate::scan::ScanLiaison;

pub struct ScanMonitor {
    ctx: Arc<SequencerContext>,
    abort: Arc<AbortController>,
    lines: Arc<DigitalLineSet>,
    scan: Arc<dyn ScanLiaison>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    was_requested: bool,
}

impl ScanMonitor {
    pub fn new(
        ctx: Arc<SequencerContext>,
        abort: Arc<AbortController>,
        lines: Arc<DigitalLineSet>,
        scan: Arc<dyn ScanLiaison>,
        interval: Duration,
    ) -> Self {
        let clock = Arc::clone(ctx.clock());
        Self {
            ctx,
            abort,
            lines,
            scan,
            clock,
            interval,
            was_requested: false,
        }
    }

    /// One poll. Returns true when it requested an abort.
    ///
    /// Only the rising edge of the scan's cancel flag counts, and only
    /// while rad prep is commanded.
    pub fn check(&mut self) -> bool {
        let requested = match self.scan.cancel_requested() {
            Ok(requested) => requested,
            Err(e) => {
                warn!("Scan monitor: scan controller {e}");
                return false;
            }
        };
        let rising = requested && !self.was_requested;
        self.was_requested = requested;
        if !rising {
            return false;
        }
        if self.lines.commanded(OutputRole::RadPrepEnable) != Some(true) {
            info!("Scan cancelled while generator idle");
            return false;
        }
        if self.ctx.is_aborting() {
            return false;
        }
        warn!("Scan cancelled during rad prep, aborting");
        self.abort.request_abort();
        true
    }

    /// Move the monitor onto its own thread.
    pub fn spawn(mut self) -> std::io::Result<MonitorHandle> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let thread = std::thread::Builder::new()
            .name("exsync-scan-monitor".to_string())
            .spawn(move || {
                while flag.load(Ordering::SeqCst) {
                    self.check();
                    self.clock.sleep(self.interval);
                }
            })?;
        Ok(MonitorHandle {
            running,
            thread: Some(thread),
        })
    }
}

/// Dropping the handle stops the monitor thread.
pub struct MonitorHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("Scan monitor thread panicked");
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::SimulatedScan;
    use exsync_common::clock::ManualClock;
    use exsync_common::config::LinesConfig;
    use exsync_common::hal::driver::DioDriver;
    use exsync_hal::{LastExposureStore, SharedDriver, SimBench, SimulationDriver};
    use parking_lot::Mutex;

    struct Rig {
        monitor: ScanMonitor,
        ctx: Arc<SequencerContext>,
        lines: Arc<DigitalLineSet>,
        bench: SimBench,
        scan: Arc<SimulatedScan>,
        _dir: tempfile::TempDir,
    }

    fn rig() -> Rig {
        let clock = Arc::new(ManualClock::new());
        let lines_cfg = LinesConfig::default();
        let bench = SimBench::new(&lines_cfg, clock.clone()).unwrap();
        let mut driver = SimulationDriver::new(bench.clone());
        driver.init(&lines_cfg).unwrap();
        let driver: SharedDriver = Arc::new(Mutex::new(Box::new(driver)));
        let lines = Arc::new(DigitalLineSet::new(driver, Arc::new(bench.line_map().clone())));
        let dir = tempfile::tempdir().unwrap();
        let exposures = Arc::new(LastExposureStore::open(dir.path().join("last.bin"), clock.clone()));
        let ctx = Arc::new(SequencerContext::new(clock));
        let scan = Arc::new(SimulatedScan::new());
        let abort = Arc::new(AbortController::new(
            ctx.clone(),
            lines.clone(),
            scan.clone(),
            exposures,
        ));
        let monitor = ScanMonitor::new(
            ctx.clone(),
            abort,
            lines.clone(),
            scan.clone(),
            Duration::from_millis(10),
        );
        Rig {
            monitor,
            ctx,
            lines,
            bench,
            scan,
            _dir: dir,
        }
    }

    #[test]
    fn test_cancel_during_rad_prep_aborts_once() {
        let mut rig = rig();
        rig.scan.start(5);
        rig.lines.set_line(OutputRole::RadPrepEnable, true).unwrap();
        assert!(!rig.monitor.check());

        rig.scan.request_cancel();
        assert!(rig.monitor.check());
        assert!(!rig.bench.output(OutputRole::RadPrepEnable));
        assert_eq!(rig.ctx.status(), "Abort complete");

        // Flag still set: no second abort.
        rig.lines.set_line(OutputRole::RadPrepEnable, true).unwrap();
        assert!(!rig.monitor.check());
        assert!(rig.bench.output(OutputRole::RadPrepEnable));
    }

    #[test]
    fn test_cancel_while_idle_is_ignored() {
        let mut rig = rig();
        rig.scan.start(3);
        rig.scan.request_cancel();
        assert!(!rig.monitor.check());
        assert!(rig.ctx.history().is_empty());
    }
}
