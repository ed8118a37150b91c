//! Warm-up planner.
//!
//! Reconditions the tube after an idle period with a table of bare
//! exposures. Each step pushes kV/mA/ms, arms the generator, fires
//! `repeat_count` exposures spaced by the duty cycle, then disarms and
//! waits for rad-ready to drop before the next step.

use exsync_common::config::{FocusSize, WarmUpConfig, WarmUpPreset, WarmUpStep, WaitTimeouts};
use exsync_common::hal::types::LineGroup;
use exsync_common::io::role::InputRole;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::SequencerError;
use crate::sequencer::{ExposureSequencer, Shot, ShotKind};
use crate::state::{CurrentFunction, SequencerState};

/// Which preset to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmUpKind {
    Short,
    Full,
}

impl WarmUpKind {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Short => "Warm-Up",
            Self::Full => "Full Warm-Up",
        }
    }

    const fn function(self) -> CurrentFunction {
        match self {
            Self::Short => CurrentFunction::WarmUp,
            Self::Full => CurrentFunction::FullWarmUp,
        }
    }
}

pub struct WarmUpPlanner {
    seq: Arc<ExposureSequencer>,
    presets: WarmUpConfig,
}

impl WarmUpPlanner {
    pub fn new(seq: Arc<ExposureSequencer>, presets: WarmUpConfig) -> Self {
        Self { seq, presets }
    }

    pub fn preset(&self, kind: WarmUpKind) -> &WarmUpPreset {
        match kind {
            WarmUpKind::Short => &self.presets.short,
            WarmUpKind::Full => &self.presets.full,
        }
    }

    /// Run a preset to completion or abort.
    pub fn run(&self, kind: WarmUpKind) -> Result<(), SequencerError> {
        let seq = &self.seq;
        let guard = seq.ctx.try_begin_sequence(kind.name())?;
        seq.ctx.set_function(kind.function());
        info!("{} started", kind.name());
        let outcome = self.run_preset(self.preset(kind));
        if outcome.is_ok() {
            seq.ctx.set_status(format!("{} complete", kind.name()));
            info!("{} complete", kind.name());
        }
        seq.conclude(outcome, guard)
    }

    fn run_preset(&self, preset: &WarmUpPreset) -> Result<(), SequencerError> {
        if let Some(focus) = preset.start_focus {
            self.set_focus(focus)?;
        }
        let pause = Duration::from_millis(preset.step_pause_ms);
        for (i, step) in preset.steps.iter().enumerate() {
            if i > 0 {
                self.seq.waiter.pause(pause)?;
            }
            info!(
                "Warm-up step {}/{}: {} kV, {} mA, {} ms x{}",
                i + 1,
                preset.steps.len(),
                step.kvp,
                step.current_ma,
                step.duration_ms,
                step.repeat_count
            );
            self.run_step(step)?;
        }
        if let Some(focus) = preset.end_focus {
            self.set_focus(focus)?;
        }
        Ok(())
    }

    fn run_step(&self, step: &WarmUpStep) -> Result<(), SequencerError> {
        let seq = &self.seq;
        self.push_settings(step)?;

        let mut shot = Shot::new(ShotKind::Bare, seq.clock.now());
        seq.prepare_generator(&mut shot)?;

        let duty = step.duty_cycle();
        for n in 0..step.repeat_count {
            let mut shot = Shot::new(ShotKind::Bare, seq.clock.now());
            seq.expose_bare(&mut shot)?;
            if n + 1 < step.repeat_count {
                seq.ctx.set_status("Wait duty cycle");
                seq.waiter.pause(duty)?;
            }
        }

        // Disarm before the next step's settings.
        seq.lines.force_low(LineGroup::ARMING)?;
        seq.commit_exposure();
        seq.ctx.transition(SequencerState::Idle)?;
        seq.ctx.set_status("Wait generator standby");
        seq.waiter.until(
            "rad-ready drop",
            WaitTimeouts::bound(seq.config.timeouts.ready_drop_s),
            || !seq.inputs.is_high(InputRole::RadReadyOut),
        )
    }

    fn push_settings(&self, step: &WarmUpStep) -> Result<(), SequencerError> {
        let seq = &self.seq;
        let generator = &seq.collab.generator;
        let settle = Duration::from_millis(seq.config.param_settle_ms);
        let channel = SequencerError::collaborator("generator parameter channel");

        seq.ctx.set_status("Changing settings");
        generator.set_kvp(step.kvp).map_err(channel)?;
        seq.waiter.pause(settle)?;
        generator.set_current_ma(step.current_ma).map_err(channel)?;
        seq.waiter.pause(settle)?;
        generator.set_exposure_ms(step.duration_ms).map_err(channel)?;
        seq.waiter.pause(settle)
    }

    fn set_focus(&self, focus: FocusSize) -> Result<(), SequencerError> {
        let seq = &self.seq;
        seq.ctx.set_status("Changing focus");
        seq.collab
            .generator
            .set_focus(focus)
            .map_err(SequencerError::collaborator("generator parameter channel"))?;
        seq.waiter
            .pause(Duration::from_millis(seq.config.param_settle_ms))
    }
}
