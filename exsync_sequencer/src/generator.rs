//! Generator parameter/status channel.
//!
//! The digital rad-ready line is not enough to know the generator finished
//! arming; its status channel must also report `ExposureReady`.

use exsync_common::config::FocusSize;
use exsync_common::io::role::{InputRole, OutputRole};
use exsync_hal::SimBench;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;

use crate::error::CollaboratorError;

/// Phase reported on the generator status channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum GeneratorPhase {
    Standby = 0,
    Initializing = 1,
    RadPrep = 2,
    RadReady = 3,
    ExposureReady = 4,
    Exposing = 5,
    Fault = 6,
}

impl GeneratorPhase {
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Standby),
            1 => Some(Self::Initializing),
            2 => Some(Self::RadPrep),
            3 => Some(Self::RadReady),
            4 => Some(Self::ExposureReady),
            5 => Some(Self::Exposing),
            6 => Some(Self::Fault),
            _ => None,
        }
    }
}

/// Settable generator parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeneratorSettings {
    pub kvp: f64,
    pub current_ma: f64,
    pub exposure_ms: f64,
    pub focus: FocusSize,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            kvp: 70.0,
            current_ma: 10.0,
            exposure_ms: 100.0,
            focus: FocusSize::Small,
        }
    }
}

/// External generator parameter interface.
pub trait GeneratorChannel: Send + Sync {
    fn set_kvp(&self, kvp: f64) -> Result<(), CollaboratorError>;
    fn set_current_ma(&self, current_ma: f64) -> Result<(), CollaboratorError>;
    fn set_exposure_ms(&self, exposure_ms: f64) -> Result<(), CollaboratorError>;
    fn set_focus(&self, focus: FocusSize) -> Result<(), CollaboratorError>;

    /// Current phase from the status channel.
    fn phase(&self) -> Result<GeneratorPhase, CollaboratorError>;

    /// Re-read every readback (after power-on).
    fn refresh(&self) -> Result<(), CollaboratorError>;
}

// ─── Simulation ─────────────────────────────────────────────────────

/// Generator model derived from the simulated bench lines.
pub struct SimulatedGenerator {
    bench: SimBench,
    settings: Mutex<GeneratorSettings>,
    available: AtomicBool,
    refreshes: AtomicU64,
}

impl SimulatedGenerator {
    pub fn new(bench: SimBench) -> Self {
        Self {
            bench,
            settings: Mutex::new(GeneratorSettings::default()),
            available: AtomicBool::new(true),
            refreshes: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> GeneratorSettings {
        *self.settings.lock()
    }

    /// Simulate the serial link dropping out (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }

    fn check_link(&self) -> Result<(), CollaboratorError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CollaboratorError::Unavailable(
                "no answer on generator status channel".to_string(),
            ))
        }
    }

    fn update(&self, apply: impl FnOnce(&mut GeneratorSettings)) -> Result<(), CollaboratorError> {
        self.check_link()?;
        let mut settings = self.settings.lock();
        apply(&mut settings);
        debug!("Generator settings: {:?}", *settings);
        Ok(())
    }
}

fn positive(name: &str, value: f64) -> Result<(), CollaboratorError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(CollaboratorError::Rejected(format!("{name} {value} out of range")))
    }
}

impl GeneratorChannel for SimulatedGenerator {
    fn set_kvp(&self, kvp: f64) -> Result<(), CollaboratorError> {
        positive("kV", kvp)?;
        self.update(|s| s.kvp = kvp)
    }

    fn set_current_ma(&self, current_ma: f64) -> Result<(), CollaboratorError> {
        positive("mA", current_ma)?;
        self.update(|s| s.current_ma = current_ma)
    }

    fn set_exposure_ms(&self, exposure_ms: f64) -> Result<(), CollaboratorError> {
        positive("ms", exposure_ms)?;
        self.update(|s| s.exposure_ms = exposure_ms)
    }

    fn set_focus(&self, focus: FocusSize) -> Result<(), CollaboratorError> {
        self.update(|s| s.focus = focus)
    }

    fn phase(&self) -> Result<GeneratorPhase, CollaboratorError> {
        self.check_link()?;
        let bench = &self.bench;
        let phase = if bench.input(InputRole::ExposeOut) {
            GeneratorPhase::Exposing
        } else if bench.input(InputRole::RadReadyOut) && bench.output(OutputRole::ExposeEnable) {
            GeneratorPhase::ExposureReady
        } else if bench.input(InputRole::RadReadyOut) {
            GeneratorPhase::RadReady
        } else if bench.input(InputRole::RadPrepOut) {
            GeneratorPhase::RadPrep
        } else {
            GeneratorPhase::Standby
        };
        Ok(phase)
    }

    fn refresh(&self) -> Result<(), CollaboratorError> {
        self.check_link()?;
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
