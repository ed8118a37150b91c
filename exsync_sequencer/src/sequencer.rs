//! Exposure sequencer.
//!
//! Drives one exposure from request to completion. Commands go through the
//! [`DigitalLineSet`]; confirmations come only from the sampled inputs
//! published by the [`LinePublisher`]. An asserted output is never assumed
//! to have taken effect until its input confirms it.
//!
//! # Shot order
//!
//! ```text
//! rad-prep ─► rad-ready ─► expose-enable ─► generator phase ─► camera ready
//!   ─► camera trigger ─► gen_delay ─► expose trigger ─► expose-out ↑ ─► expose-out ↓
//!   ─► per-shot lines low ─► commit exposure time ─► (last point) arming lines low
//! ```

use exsync_common::clock::Clock;
use exsync_common::config::{SequencerConfig, WaitTimeouts};
use exsync_common::hal::types::LineGroup;
use exsync_common::io::role::{InputRole, OutputRole};
use exsync_hal::{DigitalLineSet, LastExposureStore, LinePublisher};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::abort::AbortController;
use crate::context::{SequenceGuard, SequencerContext};
use crate::error::SequencerError;
use crate::generator::{GeneratorChannel, GeneratorPhase};
use crate::recorder::{ShotBookkeeping, ShotRecorder};
use crate::scan::ScanLiaison;
use crate::state::{CurrentFunction, SequencerState};
use crate::timing::{TimingSample, TimingSink};
use crate::wait::Waiter;

pub const CAMERA_NOT_READY: &str = "Camera not ready to expose";
const NO_SCAN_RUNNING: &str = "No scan running";

/// External channels the sequencer talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub generator: Arc<dyn GeneratorChannel>,
    pub scan: Arc<dyn ScanLiaison>,
    pub recorder: Arc<dyn ShotRecorder>,
    pub timing: Arc<dyn TimingSink>,
}

/// Line-level resources shared with the HAL.
#[derive(Clone)]
pub struct SequencerIo {
    pub lines: Arc<DigitalLineSet>,
    pub inputs: Arc<LinePublisher>,
    pub exposures: Arc<LastExposureStore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShotKind {
    Single,
    ScanPoint,
    /// Generator only, no camera (warm-up).
    Bare,
}

/// Timestamps and bookkeeping of one exposure.
#[derive(Debug)]
pub(crate) struct Shot {
    kind: ShotKind,
    requested: Instant,
    bookkeeping: Option<ShotBookkeeping>,
    triggered: Option<Instant>,
    started: Option<Instant>,
    ended: Option<Instant>,
}

impl Shot {
    pub(crate) fn new(kind: ShotKind, requested: Instant) -> Self {
        Self {
            kind,
            requested,
            bookkeeping: None,
            triggered: None,
            started: None,
            ended: None,
        }
    }
}

pub struct ExposureSequencer {
    pub(crate) ctx: Arc<SequencerContext>,
    pub(crate) abort: Arc<AbortController>,
    pub(crate) lines: Arc<DigitalLineSet>,
    pub(crate) inputs: Arc<LinePublisher>,
    pub(crate) exposures: Arc<LastExposureStore>,
    pub(crate) collab: Collaborators,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: SequencerConfig,
    pub(crate) waiter: Waiter,
    warmup_threshold: Duration,
    last_exposure_end: Mutex<Option<Instant>>,
}

impl ExposureSequencer {
    pub fn new(
        ctx: Arc<SequencerContext>,
        abort: Arc<AbortController>,
        io: SequencerIo,
        collab: Collaborators,
        config: SequencerConfig,
        warmup_threshold: Duration,
    ) -> Self {
        let clock = Arc::clone(ctx.clock());
        let waiter = Waiter::new(Arc::clone(&ctx), Arc::clone(&clock), config.poll_interval());
        Self {
            ctx,
            abort,
            lines: io.lines,
            inputs: io.inputs,
            exposures: io.exposures,
            collab,
            clock,
            config,
            waiter,
            warmup_threshold,
            last_exposure_end: Mutex::new(None),
        }
    }

    pub fn context(&self) -> &Arc<SequencerContext> {
        &self.ctx
    }

    pub fn config(&self) -> &SequencerConfig {
        &self.config
    }

    // ─── Entry points ───────────────────────────────────────────────

    /// Stand-alone exposure with camera.
    ///
    /// Rejected up front when the camera is not ready to trigger.
    pub fn single_shot(&self) -> Result<(), SequencerError> {
        let guard = self.ctx.try_begin_sequence("Single Shot")?;
        self.ctx.set_function(CurrentFunction::SingleShot);
        if !self.inputs.is_high(InputRole::CameraTriggerReady) {
            self.ctx.set_status(CAMERA_NOT_READY);
            return Err(SequencerError::NotReady(CAMERA_NOT_READY));
        }
        let mut shot = Shot::new(ShotKind::Single, self.clock.now());
        let outcome = self.run_shot(&mut shot);
        self.conclude(outcome, guard)
    }

    /// One point of a running multi-point scan.
    pub fn scan_shot(&self) -> Result<(), SequencerError> {
        let guard = self.ctx.try_begin_sequence("Scan Shot")?;
        self.ctx.set_function(CurrentFunction::ScanShot);
        let outcome = match self.collab.scan.is_scan_running() {
            Ok(true) => {
                let mut shot = Shot::new(ShotKind::ScanPoint, self.clock.now());
                self.run_shot(&mut shot)
            }
            Ok(false) => {
                self.ctx.set_status(NO_SCAN_RUNNING);
                Err(SequencerError::NotReady(NO_SCAN_RUNNING))
            }
            Err(e) => Err(SequencerError::collaborator("scan controller")(e)),
        };
        self.conclude(outcome, guard)
    }

    /// Arm the generator and leave it armed.
    pub fn prepare(&self) -> Result<(), SequencerError> {
        let guard = self.ctx.try_begin_sequence("Prepare")?;
        self.ctx.set_function(CurrentFunction::Manual);
        let mut shot = Shot::new(ShotKind::Single, self.clock.now());
        let outcome = self
            .prepare_generator(&mut shot)
            .map(|()| self.ctx.set_status("Generator ready"));
        self.conclude(outcome, guard)
    }

    fn run_shot(&self, shot: &mut Shot) -> Result<(), SequencerError> {
        self.prepare_generator(shot)?;
        self.await_camera()?;
        self.expose_now(shot)?;
        self.finalize(shot)
    }

    /// Route a sequence result: abort-worthy failures unwind through the
    /// abort controller before the error is returned.
    pub(crate) fn conclude(
        &self,
        outcome: Result<(), SequencerError>,
        guard: SequenceGuard,
    ) -> Result<(), SequencerError> {
        match outcome {
            Ok(()) => Ok(()),
            Err(e) if e.is_abort_worthy() => {
                error!("{} failed: {e}", guard.name());
                self.ctx.set_status(format!("Error: {e}"));
                self.abort.abort_sequence(guard);
                Err(e)
            }
            Err(SequencerError::Aborted) => {
                info!("{} aborted", guard.name());
                Err(SequencerError::Aborted)
            }
            Err(e) => {
                warn!("{} stopped: {e}", guard.name());
                if let SequencerError::HardwareWrite { .. } = e {
                    self.ctx.set_status(format!("Error: {e}"));
                }
                Err(e)
            }
        }
    }

    // ─── Phases ─────────────────────────────────────────────────────

    /// `Idle → PreparingGenerator → AwaitingCamera`, or straight to
    /// `AwaitingCamera` when rad-ready is already high.
    pub(crate) fn prepare_generator(&self, shot: &mut Shot) -> Result<(), SequencerError> {
        let timeouts = &self.config.timeouts;

        if self.inputs.is_high(InputRole::RadReadyOut) {
            debug!("Rad-ready already high, skipping rad prep");
            self.ctx.transition(SequencerState::AwaitingCamera)?;
            if self.lines.commanded(OutputRole::ExposeEnable) != Some(true) {
                self.arm_expose()?;
            }
            shot.bookkeeping = self.snapshot_bookkeeping();
            return Ok(());
        }

        self.ctx.transition(SequencerState::PreparingGenerator)?;
        self.ctx.set_status("Wait RadReady");
        self.assert_line(OutputRole::RadPrepEnable)?;
        shot.bookkeeping = self.snapshot_bookkeeping();
        self.waiter.until(
            "rad-ready",
            WaitTimeouts::bound(timeouts.rad_ready_s),
            || self.inputs.is_high(InputRole::RadReadyOut),
        )?;

        self.ctx.transition(SequencerState::AwaitingCamera)?;
        self.waiter
            .pause(Duration::from_millis(self.config.ready_settle_ms))?;
        self.arm_expose()
    }

    /// Assert expose-enable, then wait for the status channel to confirm
    /// the exposure-ready phase.
    fn arm_expose(&self) -> Result<(), SequencerError> {
        self.ctx.set_status("Wait generator ready");
        self.assert_line(OutputRole::ExposeEnable)?;

        let generator = &self.collab.generator;
        let mut last: Result<GeneratorPhase, _> = Ok(GeneratorPhase::Standby);
        self.waiter.until(
            "generator exposure-ready phase",
            WaitTimeouts::bound(self.config.timeouts.generator_phase_s),
            || {
                last = generator.phase();
                matches!(last, Ok(GeneratorPhase::ExposureReady) | Err(_))
            },
        )?;
        last.map(|_| ())
            .map_err(SequencerError::collaborator("generator status channel"))
    }

    fn await_camera(&self) -> Result<(), SequencerError> {
        if !self.inputs.is_high(InputRole::CameraTriggerReady) {
            self.ctx.set_status("Wait camera ready");
        }
        self.waiter.until(
            "camera trigger-ready",
            WaitTimeouts::bound(self.config.timeouts.camera_ready_s),
            || self.inputs.is_high(InputRole::CameraTriggerReady),
        )
    }

    /// Camera trigger, generator delay, expose trigger, then wait for the
    /// generator to confirm start and end of the physical exposure and for
    /// the camera to finish integrating.
    fn expose_now(&self, shot: &mut Shot) -> Result<(), SequencerError> {
        self.ctx.transition(SequencerState::Exposing)?;
        self.ctx.set_status("EXPOSING!");

        self.assert_line(OutputRole::CameraTrigger)?;
        let triggered = self.clock.now();
        shot.triggered = Some(triggered);
        self.clock.delay(self.config.gen_delay());
        self.assert_line(OutputRole::ExposeTrigger)?;

        self.confirm_exposure(shot, triggered)
    }

    /// Expose trigger only; the camera is not involved.
    pub(crate) fn expose_bare(&self, shot: &mut Shot) -> Result<(), SequencerError> {
        self.ctx.transition(SequencerState::Exposing)?;
        self.ctx.set_status("EXPOSING!");
        let triggered = self.clock.now();
        shot.triggered = Some(triggered);
        self.assert_line(OutputRole::ExposeTrigger)?;
        self.confirm_exposure(shot, triggered)?;
        self.finalize(shot)
    }

    fn confirm_exposure(&self, shot: &mut Shot, triggered: Instant) -> Result<(), SequencerError> {
        let timeouts = &self.config.timeouts;
        let inputs = &self.inputs;

        // A rise seen by the sampler counts even if the level already fell.
        self.waiter.until(
            "expose-out high",
            WaitTimeouts::bound(timeouts.expose_start_s),
            || {
                inputs.is_high(InputRole::ExposeOut)
                    || inputs
                        .last_rise(InputRole::ExposeOut)
                        .is_some_and(|at| at >= triggered)
            },
        )?;
        let started = inputs
            .last_rise(InputRole::ExposeOut)
            .filter(|at| *at >= triggered)
            .unwrap_or_else(|| self.clock.now());
        shot.started = Some(started);
        self.document(shot);

        self.ctx.set_status("Wait exposure end");
        self.waiter.until(
            "expose-out low",
            WaitTimeouts::bound(timeouts.expose_end_s),
            || {
                !inputs.is_high(InputRole::ExposeOut)
                    || inputs
                        .last_fall(InputRole::ExposeOut)
                        .is_some_and(|at| at >= started)
            },
        )?;
        shot.ended = Some(
            inputs
                .last_fall(InputRole::ExposeOut)
                .filter(|at| *at >= started)
                .unwrap_or_else(|| self.clock.now()),
        );

        // The camera trigger stays high until integration has ended too.
        if shot.kind != ShotKind::Bare {
            self.ctx.set_status("Wait camera exposure end");
            self.waiter.until(
                "camera exposure end",
                WaitTimeouts::bound(timeouts.camera_complete_s),
                || !inputs.is_high(InputRole::CameraExposing),
            )?;
        }
        Ok(())
    }

    /// `Exposing → Finalizing`.
    ///
    /// The physical exposure is over; the line resets here run to the end
    /// even if an abort arrives meanwhile.
    fn finalize(&self, shot: &Shot) -> Result<(), SequencerError> {
        self.ctx.transition(SequencerState::Finalizing)?;

        let per_shot = self.lines.force_low(LineGroup::PER_SHOT);
        self.clock
            .sleep(Duration::from_millis(self.config.post_shot_settle_ms));

        let last_point = match shot.kind {
            ShotKind::Single => Ok(true),
            ShotKind::Bare => Ok(false),
            ShotKind::ScanPoint => self
                .collab
                .scan
                .is_last_point()
                .map_err(SequencerError::collaborator("scan controller")),
        };
        let is_last = matches!(last_point, Ok(true));
        let arming = if is_last {
            self.lines.force_low(LineGroup::ARMING)
        } else {
            Ok(())
        };

        self.commit_exposure();
        self.record_timing(shot, is_last);

        per_shot.and(arming)?;
        let is_last = last_point?;

        match shot.kind {
            ShotKind::ScanPoint => {
                self.ctx
                    .set_status(if is_last { "Scan complete" } else { "Wait scan" });
                if self.config.advance_scan && !self.ctx.is_cancelled() {
                    self.collab
                        .scan
                        .advance()
                        .map_err(SequencerError::collaborator("scan controller"))?;
                }
            }
            ShotKind::Single => self.ctx.set_status("Idle"),
            ShotKind::Bare => {}
        }
        Ok(())
    }

    // ─── Helpers ────────────────────────────────────────────────────

    /// Assert `role` unless an abort has been requested.
    pub(crate) fn assert_line(&self, role: OutputRole) -> Result<(), SequencerError> {
        self.ctx.assert_unless_cancelled(&self.lines, role)
    }

    pub(crate) fn release_line(&self, role: OutputRole) -> Result<(), SequencerError> {
        self.lines
            .set_line(role, false)
            .map_err(|source| SequencerError::HardwareWrite { line: role, source })
    }

    fn snapshot_bookkeeping(&self) -> Option<ShotBookkeeping> {
        match self.collab.recorder.snapshot() {
            Ok(bookkeeping) => Some(bookkeeping),
            Err(e) => {
                warn!("Documentation snapshot failed: {e}");
                None
            }
        }
    }

    fn document(&self, shot: &Shot) {
        if shot.kind == ShotKind::Bare {
            return;
        }
        let Some(bookkeeping) = shot.bookkeeping.as_ref().filter(|b| b.doc_mode) else {
            return;
        };
        let recorder = &self.collab.recorder;
        if let Err(e) = recorder
            .document(bookkeeping)
            .and_then(|()| recorder.advance_file_number())
        {
            warn!("Documentation failed: {e}");
        }
    }

    /// Make the exposure end noted by the sampler durable.
    pub(crate) fn commit_exposure(&self) {
        match self.exposures.commit_pending() {
            Ok(Some(_)) => info!("{}", self.exposures.warmup_advice(self.warmup_threshold)),
            Ok(None) => {}
            Err(e) => {
                error!("Exposure time not saved: {e}");
                self.ctx.set_status("Exposure time not saved");
            }
        }
    }

    fn record_timing(&self, shot: &Shot, report: bool) {
        let span = |from: Option<Instant>, to: Option<Instant>| {
            from.zip(to).map(|(from, to)| to.saturating_duration_since(from))
        };
        let mut last_end = self.last_exposure_end.lock();
        let sample = TimingSample {
            request_to_trigger: span(Some(shot.requested), shot.triggered),
            trigger_to_start: span(shot.triggered, shot.started),
            start_to_end: span(shot.started, shot.ended),
            end_to_next_start: span(*last_end, shot.started),
        };
        if shot.ended.is_some() {
            *last_end = shot.ended;
        }
        self.collab.timing.record(&sample);
        if report {
            self.collab.timing.report();
            *last_end = None;
        }
    }
}
