//! Line map: runtime role-to-channel binding.
//!
//! Built at startup from [`LinesConfig`]. Immutable after construction.
//! Lookups are array indexed by role, no hashing and no allocation.

use thiserror::Error;

use crate::config::LinesConfig;
use crate::consts::MAX_CHANNEL;
use crate::hal::types::LineBundle;
use crate::io::role::{InputRole, OutputRole};

/// Output roles every deployment must wire.
pub const REQUIRED_OUTPUTS: [OutputRole; 4] = [
    OutputRole::RadPrepEnable,
    OutputRole::ExposeEnable,
    OutputRole::ExposeTrigger,
    OutputRole::CameraTrigger,
];

/// Input roles every deployment must wire.
pub const REQUIRED_INPUTS: [InputRole; 4] = [
    InputRole::RadPrepOut,
    InputRole::RadReadyOut,
    InputRole::ExposeOut,
    InputRole::CameraTriggerReady,
];

/// Line map validation error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineMapError {
    #[error("role '{0}' is bound more than once")]
    DuplicateRole(&'static str),
    #[error("{direction} channel {channel} is bound to both '{first}' and '{second}'")]
    DuplicateChannel {
        direction: &'static str,
        channel: u16,
        first: &'static str,
        second: &'static str,
    },
    #[error("channel {channel} of '{role}' exceeds {max}")]
    ChannelOutOfRange {
        role: &'static str,
        channel: u16,
        max: u16,
    },
    #[error("required line '{0}' is not bound")]
    MissingRole(&'static str),
}

/// Immutable binding of roles to hardware channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineMap {
    inputs: [Option<u16>; InputRole::COUNT],
    outputs: [Option<u16>; OutputRole::COUNT],
}

impl LineMap {
    /// Build the map, running all validation rules.
    ///
    /// Returns the first validation error encountered.
    pub fn from_config(config: &LinesConfig) -> Result<Self, LineMapError> {
        let mut inputs = [None; InputRole::COUNT];
        let mut outputs = [None; OutputRole::COUNT];

        for line in &config.inputs {
            check_range(line.role.name(), line.channel)?;
            if inputs[line.role.index()].is_some() {
                return Err(LineMapError::DuplicateRole(line.role.name()));
            }
            if let Some(other) = InputRole::ALL
                .iter()
                .find(|r| inputs[r.index()] == Some(line.channel))
            {
                return Err(LineMapError::DuplicateChannel {
                    direction: "input",
                    channel: line.channel,
                    first: other.name(),
                    second: line.role.name(),
                });
            }
            inputs[line.role.index()] = Some(line.channel);
        }

        for line in &config.outputs {
            check_range(line.role.name(), line.channel)?;
            if outputs[line.role.index()].is_some() {
                return Err(LineMapError::DuplicateRole(line.role.name()));
            }
            if let Some(other) = OutputRole::ALL
                .iter()
                .find(|r| outputs[r.index()] == Some(line.channel))
            {
                return Err(LineMapError::DuplicateChannel {
                    direction: "output",
                    channel: line.channel,
                    first: other.name(),
                    second: line.role.name(),
                });
            }
            outputs[line.role.index()] = Some(line.channel);
        }

        if let Some(missing) = REQUIRED_INPUTS.iter().find(|r| inputs[r.index()].is_none()) {
            return Err(LineMapError::MissingRole(missing.name()));
        }
        if let Some(missing) = REQUIRED_OUTPUTS.iter().find(|r| outputs[r.index()].is_none()) {
            return Err(LineMapError::MissingRole(missing.name()));
        }

        Ok(Self { inputs, outputs })
    }

    #[inline]
    pub fn input_channel(&self, role: InputRole) -> Option<u16> {
        self.inputs[role.index()]
    }

    #[inline]
    pub fn output_channel(&self, role: OutputRole) -> Option<u16> {
        self.outputs[role.index()]
    }

    /// Reverse lookup used by drivers that log or simulate by role.
    pub fn output_role(&self, channel: u16) -> Option<OutputRole> {
        OutputRole::ALL
            .iter()
            .copied()
            .find(|r| self.outputs[r.index()] == Some(channel))
    }

    pub fn input_role(&self, channel: u16) -> Option<InputRole> {
        InputRole::ALL
            .iter()
            .copied()
            .find(|r| self.inputs[r.index()] == Some(channel))
    }

    /// Bundle bits of every bound input role.
    pub fn bound_inputs(&self) -> u32 {
        InputRole::ALL
            .iter()
            .filter(|r| self.inputs[r.index()].is_some())
            .fold(0, |acc, r| acc | (1 << r.index()))
    }

    /// Translate a raw channel bitmask into role order.
    ///
    /// Unbound roles read low.
    pub fn bundle_bits(&self, raw: u32) -> u32 {
        let mut bits = 0u32;
        for role in InputRole::ALL {
            if let Some(ch) = self.inputs[role.index()] {
                if raw & (1 << ch) != 0 {
                    bits |= 1 << role.index();
                }
            }
        }
        bits
    }

    /// Assemble a [`LineBundle`] from one raw read.
    pub fn bundle_from_raw(&self, raw: u32, at: std::time::Instant, seq: u64) -> LineBundle {
        LineBundle::new(self.bundle_bits(raw), self.bound_inputs(), at, seq)
    }
}

fn check_range(role: &'static str, channel: u16) -> Result<(), LineMapError> {
    if channel > MAX_CHANNEL {
        return Err(LineMapError::ChannelOutOfRange {
            role,
            channel,
            max: MAX_CHANNEL,
        });
    }
    Ok(())
}
