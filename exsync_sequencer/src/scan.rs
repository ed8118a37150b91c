//! Scan controller liaison.
//!
//! No retries: a failed call is returned to the sequencer, which aborts.

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::CollaboratorError;

/// Counters published by the scan controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanProgress {
    pub points_finished: u32,
    pub total_points: u32,
    /// 1-based index of the point being acquired.
    pub current_point: u32,
}

impl ScanProgress {
    /// The two counters update at slightly different times; whichever
    /// reaches the terminal condition first decides.
    pub const fn is_last_point(&self) -> bool {
        self.points_finished + 1 >= self.total_points || self.current_point >= self.total_points
    }
}

/// Narrow interface to the external scan controller.
pub trait ScanLiaison: Send + Sync {
    fn is_scan_running(&self) -> Result<bool, CollaboratorError>;

    fn progress(&self) -> Result<ScanProgress, CollaboratorError>;

    fn is_last_point(&self) -> Result<bool, CollaboratorError> {
        Ok(self.progress()?.is_last_point())
    }

    /// Tell the scan to proceed to the next point.
    fn advance(&self) -> Result<(), CollaboratorError>;

    fn cancel_scan(&self) -> Result<(), CollaboratorError>;

    /// The scan side asked to stop (operator pressed stop on the scan).
    fn cancel_requested(&self) -> Result<bool, CollaboratorError> {
        Ok(false)
    }
}

/// Stand-alone operation without a scan controller.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoScan;

impl ScanLiaison for NoScan {
    fn is_scan_running(&self) -> Result<bool, CollaboratorError> {
        Ok(false)
    }

    fn progress(&self) -> Result<ScanProgress, CollaboratorError> {
        Ok(ScanProgress::default())
    }

    fn advance(&self) -> Result<(), CollaboratorError> {
        Ok(())
    }

    fn cancel_scan(&self) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

// ─── Simulation ─────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ScanModel {
    running: bool,
    progress: ScanProgress,
    advances: u32,
    cancels: u32,
    cancel_requested: bool,
    available: bool,
}

/// In-process scan controller.
#[derive(Debug)]
pub struct SimulatedScan {
    model: Mutex<ScanModel>,
}

impl Default for SimulatedScan {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedScan {
    pub fn new() -> Self {
        Self {
            model: Mutex::new(ScanModel {
                available: true,
                ..ScanModel::default()
            }),
        }
    }

    /// Start a scan of `total_points` points at point 1.
    pub fn start(&self, total_points: u32) {
        let mut model = self.model.lock();
        model.running = total_points > 0;
        model.progress = ScanProgress {
            points_finished: 0,
            total_points,
            current_point: 1,
        };
        model.cancel_requested = false;
        info!("Simulated scan started: {total_points} points");
    }

    /// Scan-side stop request, as the operator would press it.
    pub fn request_cancel(&self) {
        self.model.lock().cancel_requested = true;
    }

    pub fn set_available(&self, available: bool) {
        self.model.lock().available = available;
    }

    pub fn advances(&self) -> u32 {
        self.model.lock().advances
    }

    pub fn cancels(&self) -> u32 {
        self.model.lock().cancels
    }

    fn with_model<T>(
        &self,
        f: impl FnOnce(&mut ScanModel) -> T,
    ) -> Result<T, CollaboratorError> {
        let mut model = self.model.lock();
        if !model.available {
            return Err(CollaboratorError::Unavailable(
                "scan controller not reachable".to_string(),
            ));
        }
        Ok(f(&mut model))
    }
}

impl ScanLiaison for SimulatedScan {
    fn is_scan_running(&self) -> Result<bool, CollaboratorError> {
        self.with_model(|m| m.running)
    }

    fn progress(&self) -> Result<ScanProgress, CollaboratorError> {
        self.with_model(|m| m.progress)
    }

    fn advance(&self) -> Result<(), CollaboratorError> {
        self.with_model(|m| {
            m.advances += 1;
            if !m.running {
                return;
            }
            let p = &mut m.progress;
            p.points_finished += 1;
            if p.points_finished >= p.total_points {
                m.running = false;
                debug!("Simulated scan finished");
            } else {
                p.current_point += 1;
            }
        })
    }

    fn cancel_scan(&self) -> Result<(), CollaboratorError> {
        self.with_model(|m| {
            m.cancels += 1;
            m.running = false;
        })
    }

    fn cancel_requested(&self) -> Result<bool, CollaboratorError> {
        self.with_model(|m| m.cancel_requested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_point_from_either_counter() {
        let finished_counter = ScanProgress {
            points_finished: 4,
            total_points: 5,
            current_point: 4,
        };
        let point_counter = ScanProgress {
            points_finished: 3,
            total_points: 5,
            current_point: 5,
        };
        let middle = ScanProgress {
            points_finished: 2,
            total_points: 5,
            current_point: 3,
        };
        assert!(finished_counter.is_last_point());
        assert!(point_counter.is_last_point());
        assert!(!middle.is_last_point());
    }

    #[test]
    fn test_no_scan_is_always_last() {
        assert!(NoScan.is_last_point().unwrap());
        assert!(!NoScan.is_scan_running().unwrap());
    }

    #[test]
    fn test_simulated_scan_walks_points() {
        let scan = SimulatedScan::new();
        scan.start(3);
        let mut last = Vec::new();
        while scan.is_scan_running().unwrap() {
            last.push(scan.is_last_point().unwrap());
            scan.advance().unwrap();
        }
        assert_eq!(last, vec![false, false, true]);
        assert_eq!(scan.advances(), 3);
    }

    #[test]
    fn test_unavailable_scan() {
        let scan = SimulatedScan::new();
        scan.set_available(false);
        assert!(matches!(
            scan.advance(),
            Err(CollaboratorError::Unavailable(_))
        ));
    }
}
