//! Generator power pulses.
//!
//! Power on/off are edge-triggered inputs on the generator: the line is
//! held high for one pulse width, then released.

use exsync_common::clock::Clock;
use exsync_common::config::SequencerConfig;
use exsync_common::io::role::{InputRole, OutputRole};
use exsync_hal::{DigitalLineSet, LinePublisher};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::context::SequencerContext;
use crate::error::SequencerError;
use crate::generator::GeneratorChannel;

pub struct PowerSwitch {
    ctx: Arc<SequencerContext>,
    lines: Arc<DigitalLineSet>,
    inputs: Arc<LinePublisher>,
    generator: Arc<dyn GeneratorChannel>,
    clock: Arc<dyn Clock>,
    pulse_width: Duration,
    power_on_settle: Duration,
}

impl PowerSwitch {
    pub fn new(
        ctx: Arc<SequencerContext>,
        lines: Arc<DigitalLineSet>,
        inputs: Arc<LinePublisher>,
        generator: Arc<dyn GeneratorChannel>,
        config: &SequencerConfig,
    ) -> Self {
        let clock = Arc::clone(ctx.clock());
        Self {
            ctx,
            lines,
            inputs,
            generator,
            clock,
            pulse_width: Duration::from_millis(config.pulse_width_ms),
            power_on_settle: Duration::from_millis(config.power_on_settle_ms),
        }
    }

    /// Pulse power-on, wait for the generator to boot, refresh readbacks.
    pub fn power_on(&self) -> Result<(), SequencerError> {
        self.ctx.set_status("Generator power on");
        self.pulse(OutputRole::PowerOnPulse)?;
        self.clock.sleep(self.power_on_settle);
        self.generator
            .refresh()
            .map_err(SequencerError::collaborator("generator status channel"))?;
        info!("Generator powered on");
        self.ctx.set_status("Generator on");
        Ok(())
    }

    /// Pulse power-off. Refused while a sequence is in flight or the
    /// generator reports an exposure.
    pub fn power_off(&self) -> Result<(), SequencerError> {
        if let Some(running) = self.ctx.running() {
            warn!("Power off refused: {running} in progress");
            return Err(SequencerError::ConcurrentRequestRejected { running });
        }
        if self.inputs.is_high(InputRole::ExposeOut) {
            self.ctx.set_status("Power off refused: exposure live");
            return Err(SequencerError::NotReady("Exposure live"));
        }
        self.ctx.set_status("Generator power off");
        self.pulse(OutputRole::PowerOffPulse)?;
        self.ctx.set_status("Generator off");
        Ok(())
    }

    fn pulse(&self, role: OutputRole) -> Result<(), SequencerError> {
        let hw = |source| SequencerError::HardwareWrite { line: role, source };
        self.lines.set_line(role, true).map_err(hw)?;
        self.clock.sleep(self.pulse_width);
        self.lines.set_line(role, false).map_err(hw)
    }
}
