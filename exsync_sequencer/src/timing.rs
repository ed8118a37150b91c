//! Per-shot phase timing diagnostics.
//!
//! Not needed for correctness. Samples are aggregated into running
//! statistics and reported at the end of a scan or single shot.

use parking_lot::Mutex;
use serde::Serialize;
use std::time::Duration;
use tracing::info;

/// Phase durations of one shot. `None` when the phase did not happen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimingSample {
    pub request_to_trigger: Option<Duration>,
    pub trigger_to_start: Option<Duration>,
    pub start_to_end: Option<Duration>,
    /// Previous exposure end to this exposure start.
    pub end_to_next_start: Option<Duration>,
}

/// Running statistics for one phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PhaseStats {
    pub count: u64,
    /// [us]
    pub min_us: u64,
    /// [us]
    pub max_us: u64,
    sum_us: u128,
    sum_sq_us: u128,
}

impl Default for PhaseStats {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseStats {
    pub const fn new() -> Self {
        Self {
            count: 0,
            min_us: u64::MAX,
            max_us: 0,
            sum_us: 0,
            sum_sq_us: 0,
        }
    }

    #[inline]
    pub fn record(&mut self, duration: Duration) {
        let us = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.count += 1;
        self.min_us = self.min_us.min(us);
        self.max_us = self.max_us.max(us);
        self.sum_us += u128::from(us);
        self.sum_sq_us += u128::from(us) * u128::from(us);
    }

    /// Mean [us] (0 if empty).
    pub fn mean_us(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_us as f64 / self.count as f64
        }
    }

    /// Population standard deviation [us].
    pub fn stddev_us(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let n = self.count as f64;
        let mean = self.mean_us();
        (self.sum_sq_us as f64 / n - mean * mean).max(0.0).sqrt()
    }
}

/// Statistics for every phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TimingStats {
    pub request_to_trigger: PhaseStats,
    pub trigger_to_start: PhaseStats,
    pub start_to_end: PhaseStats,
    pub end_to_next_start: PhaseStats,
}

impl TimingStats {
    pub fn record(&mut self, sample: &TimingSample) {
        let phases = [
            (&mut self.request_to_trigger, sample.request_to_trigger),
            (&mut self.trigger_to_start, sample.trigger_to_start),
            (&mut self.start_to_end, sample.start_to_end),
            (&mut self.end_to_next_start, sample.end_to_next_start),
        ];
        for (stats, value) in phases {
            if let Some(value) = value {
                stats.record(value);
            }
        }
    }
}

/// Consumer of shot timing.
pub trait TimingSink: Send + Sync {
    fn record(&self, sample: &TimingSample);

    /// Report and reset the aggregate.
    fn report(&self);
}

/// Aggregates samples and reports them through `tracing`.
#[derive(Debug, Default)]
pub struct TimingReport {
    stats: Mutex<TimingStats>,
}

impl TimingReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> TimingStats {
        *self.stats.lock()
    }
}

impl TimingSink for TimingReport {
    fn record(&self, sample: &TimingSample) {
        self.stats.lock().record(sample);
    }

    fn report(&self) {
        let stats = std::mem::take(&mut *self.stats.lock());
        let phases = [
            ("request->trigger", stats.request_to_trigger),
            ("trigger->start", stats.trigger_to_start),
            ("start->end", stats.start_to_end),
            ("end->next start", stats.end_to_next_start),
        ];
        for (name, phase) in phases {
            if phase.count == 0 {
                continue;
            }
            info!(
                "Timing {name}: n={} mean={:.0}us sd={:.0}us min={}us max={}us",
                phase.count,
                phase.mean_us(),
                phase.stddev_us(),
                phase.min_us,
                phase.max_us
            );
        }
    }
}
