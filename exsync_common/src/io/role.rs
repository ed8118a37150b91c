//! Line role types.
//!
//! Every digital line the engine touches is addressed by a functional role
//! rather than a channel number. Roles carry a stable string name used in
//! TOML, logs and the operator console.

use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

// ─── InputRole ──────────────────────────────────────────────────────

/// Input lines driven by the generator and the camera.
///
/// The discriminant is the bit position inside a [`LineBundle`]; sample order
/// therefore never changes for the lifetime of the process.
///
/// [`LineBundle`]: crate::hal::types::LineBundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum InputRole {
    /// Generator echoes rad-prep.
    RadPrepOut = 0,
    /// Generator armed; exposure may proceed.
    RadReadyOut = 1,
    /// X-rays are physically on.
    ExposeOut = 2,
    /// Fluoroscopy active.
    FluoroOut = 3,
    /// Camera can accept a new trigger.
    CameraTriggerReady = 4,
    /// Camera integration in progress.
    CameraExposing = 5,
}

impl InputRole {
    /// Number of input roles.
    pub const COUNT: usize = 6;

    /// All input roles in bundle order.
    pub const ALL: [InputRole; Self::COUNT] = [
        Self::RadPrepOut,
        Self::RadReadyOut,
        Self::ExposeOut,
        Self::FluoroOut,
        Self::CameraTriggerReady,
        Self::CameraExposing,
    ];

    /// Bit position inside a bundle.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Stable string name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::RadPrepOut => "rad_prep_out",
            Self::RadReadyOut => "rad_ready_out",
            Self::ExposeOut => "expose_out",
            Self::FluoroOut => "fluoro_out",
            Self::CameraTriggerReady => "camera_trigger_ready",
            Self::CameraExposing => "camera_exposing",
        }
    }

    /// Role at bundle position `idx`.
    pub const fn from_index(idx: usize) -> Option<Self> {
        if idx < Self::COUNT {
            Some(Self::ALL[idx])
        } else {
            None
        }
    }
}

impl fmt::Display for InputRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for InputRole {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|r| r.name() == s)
            .ok_or_else(|| format!("unknown input role: {s:?}"))
    }
}

// ─── OutputRole ─────────────────────────────────────────────────────

/// Output lines commanded by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum OutputRole {
    /// Generator rad-prep (arming) request.
    RadPrepEnable = 0,
    /// Generator expose enable, asserted once rad-ready is seen.
    ExposeEnable = 1,
    /// Generator expose trigger (photospot).
    ExposeTrigger = 2,
    /// Fluoroscopy enable.
    FluoroEnable = 3,
    /// Generator power-on pulse.
    PowerOnPulse = 4,
    /// Generator power-off pulse.
    PowerOffPulse = 5,
    /// Camera release/trigger.
    CameraTrigger = 6,
}

impl OutputRole {
    /// Number of output roles.
    pub const COUNT: usize = 7;

    /// All output roles in declaration order.
    pub const ALL: [OutputRole; Self::COUNT] = [
        Self::RadPrepEnable,
        Self::ExposeEnable,
        Self::ExposeTrigger,
        Self::FluoroEnable,
        Self::PowerOnPulse,
        Self::PowerOffPulse,
        Self::CameraTrigger,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Stable string name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::RadPrepEnable => "rad_prep_enable",
            Self::ExposeEnable => "expose_enable",
            Self::ExposeTrigger => "expose_trigger",
            Self::FluoroEnable => "fluoro_enable",
            Self::PowerOnPulse => "power_on_pulse",
            Self::PowerOffPulse => "power_off_pulse",
            Self::CameraTrigger => "camera_trigger",
        }
    }

    /// A failed write on a safety-critical line must abort the running
    /// sequence. Failures on the remaining lines are reported only.
    pub const fn is_safety_critical(self) -> bool {
        matches!(
            self,
            Self::RadPrepEnable
                | Self::ExposeEnable
                | Self::ExposeTrigger
                | Self::FluoroEnable
                | Self::CameraTrigger
        )
    }

    /// Power lines are driven as pulses by their caller.
    pub const fn is_pulse(self) -> bool {
        matches!(self, Self::PowerOnPulse | Self::PowerOffPulse)
    }
}

impl fmt::Display for OutputRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OutputRole {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|r| r.name() == s)
            .ok_or_else(|| format!("unknown output role: {s:?}"))
    }
}
