//! Clock abstraction for every timed wait in the engine.
//!
//! Production code uses [`SystemClock`]. Tests that exercise timeouts use
//! [`ManualClock`], whose `sleep` advances simulated time instantly.

use parking_lot::Mutex;
use std::time::{Duration, Instant, SystemTime};

/// Below this, [`SystemClock::delay`] spins instead of sleeping.
const SPIN_THRESHOLD: Duration = Duration::from_micros(1_500);

/// Source of monotonic time, wall time and sleeps.
pub trait Clock: Send + Sync {
    /// Monotonic now.
    fn now(&self) -> Instant;

    /// Wall-clock now, used for persisted timestamps.
    fn wall_clock(&self) -> SystemTime;

    /// Coarse sleep (poll intervals, settle times).
    fn sleep(&self, duration: Duration);

    /// Precise delay for timing-critical gaps such as the generator delay.
    ///
    /// Default: same as `sleep`.
    fn delay(&self, duration: Duration) {
        self.sleep(duration);
    }
}

/// Real time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_clock(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) {
        if duration.is_zero() {
            std::thread::yield_now();
        } else {
            std::thread::sleep(duration);
        }
    }

    /// Sleeps for all but the last ~1.5 ms, then spins to the deadline.
    fn delay(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        if duration > SPIN_THRESHOLD {
            std::thread::sleep(duration - SPIN_THRESHOLD);
        }
        while Instant::now() < deadline {
            std::hint::spin_loop();
        }
    }
}

/// Simulated time for deterministic tests.
///
/// Every `sleep`/`delay` advances the clock by exactly the requested amount.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    base_wall: SystemTime,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(SystemTime::now())
    }

    /// A clock whose wall time starts at `wall`.
    pub fn starting_at(wall: SystemTime) -> Self {
        Self {
            base: Instant::now(),
            base_wall: wall,
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }

    /// Total simulated time elapsed since construction.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }

    fn wall_clock(&self) -> SystemTime {
        self.base_wall + *self.offset.lock()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}
