//! Service assembly and lifecycle.
//!
//! `SyncService` owns one driver, the line set and sampler built on it,
//! the durable exposure record and every sequencer component. Lifecycle:
//!
//! 1. `new()` / `simulated()` - initialise the driver, open persistence
//! 2. `start()` - spawn the sampler and scan monitor threads
//! 3. `shutdown()` - abort anything in flight, drive lines low, stop threads

use exsync_common::clock::Clock;
use exsync_common::config::SyncConfig;
use exsync_common::hal::driver::{DioDriver, HalError};
use exsync_common::hal::types::LineGroup;
use exsync_common::io::map::LineMap;
use exsync_hal::drivers::register_builtin_drivers;
use exsync_hal::{
    DigitalLineSet, DriverRegistry, ExposureTracker, ExposureWriter, InputSampler,
    LastExposureStore, LinePublisher, SamplerHandle, SharedDriver, SimBench,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::abort::AbortController;
use crate::command::CommandDispatcher;
use crate::context::SequencerContext;
use crate::generator::SimulatedGenerator;
use crate::monitor::{MonitorHandle, ScanMonitor};
use crate::power::PowerSwitch;
use crate::recorder::LogRecorder;
use crate::scan::SimulatedScan;
use crate::sequencer::{Collaborators, ExposureSequencer, SequencerIo};
use crate::timing::TimingReport;
use crate::warmup::WarmUpPlanner;

/// Scan cancel flag poll interval.
const SCAN_MONITOR_INTERVAL: Duration = Duration::from_millis(50);

/// Handles onto the simulated bench and collaborators, for scripting.
#[derive(Clone)]
pub struct SimHandles {
    pub bench: SimBench,
    pub generator: Arc<SimulatedGenerator>,
    pub scan: Arc<SimulatedScan>,
    pub recorder: Arc<LogRecorder>,
    pub timing: Arc<TimingReport>,
}

pub struct SyncService {
    config: SyncConfig,
    driver: SharedDriver,
    lines: Arc<DigitalLineSet>,
    inputs: Arc<LinePublisher>,
    exposures: Arc<LastExposureStore>,
    ctx: Arc<SequencerContext>,
    abort: Arc<AbortController>,
    dispatcher: Arc<CommandDispatcher>,
    sampler: Option<InputSampler>,
    monitor: Option<ScanMonitor>,
    sampler_handle: Option<SamplerHandle>,
    monitor_handle: Option<MonitorHandle>,
    writer: Option<ExposureWriter>,
}

impl SyncService {
    /// Assemble the service around an uninitialised `driver`.
    ///
    /// # Errors
    /// Returns `HalError` if the line map is invalid or the driver fails to
    /// initialise.
    pub fn new(
        config: SyncConfig,
        mut driver: Box<dyn DioDriver>,
        collab: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, HalError> {
        let map = Arc::new(
            LineMap::from_config(&config.lines).map_err(|e| HalError::ConfigError(e.to_string()))?,
        );
        info!("Initializing driver '{}' v{}", driver.name(), driver.version());
        driver.init(&config.lines)?;
        let driver: SharedDriver = Arc::new(Mutex::new(driver));

        let lines = Arc::new(DigitalLineSet::new(Arc::clone(&driver), Arc::clone(&map)));
        let inputs = Arc::new(LinePublisher::new(clock.now()));
        let exposures = Arc::new(LastExposureStore::open(
            &config.persistence.state_file,
            Arc::clone(&clock),
        ));

        let mut sampler = InputSampler::new(
            Arc::clone(&driver),
            map,
            Arc::clone(&inputs),
            config.sampler.clone(),
            Arc::clone(&clock),
        );
        sampler.add_sink(Arc::new(ExposureTracker::new(
            Arc::clone(&exposures),
            Arc::clone(&clock),
        )));

        let ctx = Arc::new(SequencerContext::new(clock));
        let abort = Arc::new(AbortController::new(
            Arc::clone(&ctx),
            Arc::clone(&lines),
            Arc::clone(&collab.scan),
            Arc::clone(&exposures),
        ));
        let power = Arc::new(PowerSwitch::new(
            Arc::clone(&ctx),
            Arc::clone(&lines),
            Arc::clone(&inputs),
            Arc::clone(&collab.generator),
            &config.sequencer,
        ));
        let monitor = ScanMonitor::new(
            Arc::clone(&ctx),
            Arc::clone(&abort),
            Arc::clone(&lines),
            Arc::clone(&collab.scan),
            SCAN_MONITOR_INTERVAL,
        );
        let seq = Arc::new(ExposureSequencer::new(
            Arc::clone(&ctx),
            Arc::clone(&abort),
            SequencerIo {
                lines: Arc::clone(&lines),
                inputs: Arc::clone(&inputs),
                exposures: Arc::clone(&exposures),
            },
            collab,
            config.sequencer.clone(),
            config.persistence.warmup_idle_threshold(),
        ));
        let warmup = Arc::new(WarmUpPlanner::new(Arc::clone(&seq), config.warmup.clone()));
        let dispatcher = Arc::new(CommandDispatcher::new(
            seq,
            warmup,
            power,
            Arc::clone(&abort),
        ));

        Ok(Self {
            config,
            driver,
            lines,
            inputs,
            exposures,
            ctx,
            abort,
            dispatcher,
            sampler: Some(sampler),
            monitor: Some(monitor),
            sampler_handle: None,
            monitor_handle: None,
            writer: None,
        })
    }

    /// Assemble the service on a simulated bench built from `config.lines`.
    pub fn simulated(
        config: SyncConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<(Self, SimHandles), HalError> {
        let bench = SimBench::new(&config.lines, Arc::clone(&clock))?;
        let mut registry = DriverRegistry::new();
        register_builtin_drivers(&mut registry, &bench);
        let driver = registry.create_driver(&config.lines.driver)?;

        let handles = SimHandles {
            generator: Arc::new(SimulatedGenerator::new(bench.clone())),
            scan: Arc::new(SimulatedScan::new()),
            recorder: Arc::new(LogRecorder::new("/data/exsync", "frame", false)),
            timing: Arc::new(TimingReport::new()),
            bench,
        };
        let collab = Collaborators {
            generator: handles.generator.clone(),
            scan: handles.scan.clone(),
            recorder: handles.recorder.clone(),
            timing: handles.timing.clone(),
        };
        let service = Self::new(config, driver, collab, clock)?;
        Ok((service, handles))
    }

    /// Spawn the exposure writer, sampler and scan monitor, then report
    /// warm-up advice.
    ///
    /// Returns once the sampler has published its first bundle.
    pub fn start(&mut self) -> Result<(), HalError> {
        let spawn_failed = |e: std::io::Error| HalError::InitFailed(e.to_string());
        if self.writer.is_none() {
            self.writer = Some(self.exposures.spawn_writer().map_err(spawn_failed)?);
        }
        if let Some(sampler) = self.sampler.take() {
            self.sampler_handle = Some(sampler.spawn().map_err(spawn_failed)?);
            while self.inputs.seq() == 0 {
                std::thread::sleep(Duration::from_millis(1));
                if !self
                    .sampler_handle
                    .as_ref()
                    .is_some_and(SamplerHandle::is_running)
                {
                    return Err(HalError::InitFailed("sampler stopped".to_string()));
                }
            }
        }
        if let Some(monitor) = self.monitor.take() {
            self.monitor_handle = Some(monitor.spawn().map_err(spawn_failed)?);
        }

        let advice = self
            .exposures
            .warmup_advice(self.config.persistence.warmup_idle_threshold());
        if advice.advised {
            warn!("{advice}");
        } else {
            info!("{advice}");
        }
        info!("Service '{}' started", self.config.shared.service_name);
        Ok(())
    }

    /// Abort anything in flight, drive every energizing line low and stop
    /// the worker threads.
    pub fn shutdown(&mut self) -> Result<(), HalError> {
        info!("Shutting down '{}'", self.config.shared.service_name);
        if self.ctx.seq_in_progress() {
            self.abort.request_abort();
        }
        if let Some(mut monitor) = self.monitor_handle.take() {
            monitor.stop();
        }
        let reset = self.lines.force_low(LineGroup::ENERGIZING);
        if let Some(stats) = self.sampler_handle.take().and_then(|mut h| h.stop()) {
            info!(
                "Sampler: {} iterations, {} edges, {} read failures",
                stats.iterations, stats.edges, stats.read_failures
            );
        }
        // Stopping the writer saves anything still pending.
        if let Some(mut writer) = self.writer.take() {
            writer.stop();
        } else if let Err(e) = self.exposures.commit_pending() {
            error!("Exposure time not saved: {e}");
        }
        let stopped = self.driver.lock().shutdown();
        reset.and(stopped)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<CommandDispatcher> {
        &self.dispatcher
    }

    pub fn context(&self) -> &Arc<SequencerContext> {
        &self.ctx
    }

    pub fn abort_controller(&self) -> &Arc<AbortController> {
        &self.abort
    }

    pub fn exposures(&self) -> &Arc<LastExposureStore> {
        &self.exposures
    }

    pub fn inputs(&self) -> &Arc<LinePublisher> {
        &self.inputs
    }

    pub fn lines(&self) -> &Arc<DigitalLineSet> {
        &self.lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, CommandReply};
    use crate::state::SequencerState;
    use exsync_common::clock::SystemClock;
    use exsync_common::io::role::{InputRole, OutputRole};

    fn config(dir: &tempfile::TempDir) -> SyncConfig {
        let mut config = SyncConfig::default();
        config.persistence.state_file = dir.path().join("last_exposure.bin");
        config
    }

    #[test]
    fn test_start_publishes_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let (mut service, _sim) = SyncService::simulated(config(&dir), Arc::new(SystemClock)).unwrap();
        service.start().unwrap();
        assert!(service.inputs().is_high(InputRole::CameraTriggerReady));
        service.shutdown().unwrap();
    }

    #[test]
    fn test_single_shot_through_dispatcher_persists_exposure() {
        let dir = tempfile::tempdir().unwrap();
        let (mut service, sim) = SyncService::simulated(config(&dir), Arc::new(SystemClock)).unwrap();
        service.start().unwrap();
        let before = service.exposures().last_exposure();

        let reply = service
            .dispatcher()
            .dispatch(Command::SingleShot)
            .unwrap()
            .join()
            .unwrap();
        assert!(matches!(reply, Ok(CommandReply::Done)));
        assert!(service.exposures().last_exposure() > before);
        assert!(dir.path().join("last_exposure.bin").exists());
        assert!(!sim.bench.output(OutputRole::RadPrepEnable));
        assert_eq!(service.context().state(), SequencerState::Idle);
        // Reported and reset at the last point.
        assert_eq!(sim.timing.stats().request_to_trigger.count, 0);
        assert_eq!(service.context().status(), "Idle");
        service.shutdown().unwrap();
    }

    #[test]
    fn test_unknown_driver_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir);
        config.lines.driver = "usb6501".to_string();
        assert!(matches!(
            SyncService::simulated(config, Arc::new(SystemClock)),
            Err(HalError::DriverNotFound(_))
        ));
    }

    #[test]
    fn test_shutdown_drives_lines_low() {
        let dir = tempfile::tempdir().unwrap();
        let (mut service, sim) = SyncService::simulated(config(&dir), Arc::new(SystemClock)).unwrap();
        service.start().unwrap();
        service
            .dispatcher()
            .execute(Command::Fluoro(true))
            .unwrap();
        assert!(sim.bench.output(OutputRole::FluoroEnable));
        service.shutdown().unwrap();
        assert!(!sim.bench.output(OutputRole::FluoroEnable));
    }
}
