//! Manual line commands.
//!
//! Operator overrides outside a sequence. Asserting is refused while a
//! sequence owns the lines; releasing is always allowed.

use exsync_common::io::role::{InputRole, OutputRole};
use std::time::Duration;
use tracing::warn;

use crate::error::SequencerError;
use crate::sequencer::ExposureSequencer;
use crate::state::CurrentFunction;

const NOT_IN_RAD_PREP: &str = "Generator not in rad prep";

impl ExposureSequencer {
    /// Rad-prep level with a settle before asserting and after releasing.
    pub fn manual_rad_prep(&self, on: bool) -> Result<(), SequencerError> {
        self.ctx.set_function(CurrentFunction::Manual);
        let settle = Duration::from_millis(self.config.rad_prep_settle_ms);
        let result = if on {
            self.reject_if_busy().and_then(|()| {
                self.ctx.set_status("Rad prep on");
                self.clock.sleep(settle);
                self.assert_line(OutputRole::RadPrepEnable)
            })
        } else {
            let result = self.release_line(OutputRole::RadPrepEnable);
            self.clock.sleep(settle);
            self.ctx.set_status("Rad prep off");
            result
        };
        self.manual_outcome(result)
    }

    /// Expose-enable level. Enabling requires the generator in rad prep;
    /// disabling commits the last exposure time.
    pub fn manual_expose(&self, on: bool) -> Result<(), SequencerError> {
        self.ctx.set_function(CurrentFunction::Manual);
        let result = if on {
            self.reject_if_busy().and_then(|()| {
                if !self.inputs.is_high(InputRole::RadPrepOut) {
                    self.ctx.set_status(NOT_IN_RAD_PREP);
                    return Err(SequencerError::NotReady(NOT_IN_RAD_PREP));
                }
                self.ctx.set_status("Expose on");
                self.assert_line(OutputRole::ExposeEnable)
            })
        } else {
            let result = self.release_line(OutputRole::ExposeEnable);
            self.commit_exposure();
            self.ctx.set_status("Expose off");
            result
        };
        self.manual_outcome(result)
    }

    pub fn manual_fluoro(&self, on: bool) -> Result<(), SequencerError> {
        self.manual_level(OutputRole::FluoroEnable, on)
    }

    pub fn manual_camera_trigger(&self, on: bool) -> Result<(), SequencerError> {
        self.manual_level(OutputRole::CameraTrigger, on)
    }

    /// Expose-trigger level. Releasing commits an exposure the sampler
    /// has already seen end.
    pub fn manual_expose_trigger(&self, on: bool) -> Result<(), SequencerError> {
        let result = self.manual_level(OutputRole::ExposeTrigger, on);
        if !on {
            self.commit_exposure();
        }
        result
    }

    fn manual_level(&self, role: OutputRole, on: bool) -> Result<(), SequencerError> {
        self.ctx.set_function(CurrentFunction::Manual);
        let result = if on {
            self.reject_if_busy()
                .and_then(|()| self.assert_line(role))
        } else {
            self.release_line(role)
        };
        if result.is_ok() {
            self.ctx
                .set_status(format!("{role} {}", if on { "on" } else { "off" }));
        }
        self.manual_outcome(result)
    }

    fn reject_if_busy(&self) -> Result<(), SequencerError> {
        match self.ctx.running() {
            Some(running) => Err(SequencerError::ConcurrentRequestRejected { running }),
            None => Ok(()),
        }
    }

    /// A failed write on a safety line forces an abort.
    fn manual_outcome(&self, result: Result<(), SequencerError>) -> Result<(), SequencerError> {
        if let Err(e) = &result {
            warn!("Manual command failed: {e}");
            if e.is_abort_worthy() {
                self.ctx.set_status(format!("Error: {e}"));
                self.abort.request_abort();
            }
        }
        result
    }
}
