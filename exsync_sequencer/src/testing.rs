//! Sequencer on the simulated bench with a live sampler thread.

use exsync_common::clock::{Clock, SystemClock};
use exsync_common::config::{LinesConfig, SamplerConfig, SequencerConfig};
use exsync_common::hal::driver::DioDriver;
use exsync_common::io::role::InputRole;
use exsync_hal::{
    DigitalLineSet, ExposureTracker, InputSampler, LastExposureStore, LinePublisher,
    SamplerHandle, SharedDriver, SimBench, SimulationDriver,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::abort::AbortController;
use crate::context::SequencerContext;
use crate::generator::SimulatedGenerator;
use crate::recorder::LogRecorder;
use crate::scan::SimulatedScan;
use crate::sequencer::{Collaborators, ExposureSequencer, SequencerIo};
use crate::timing::TimingReport;

pub(crate) struct Rig {
    pub seq: Arc<ExposureSequencer>,
    pub bench: SimBench,
    pub generator: Arc<SimulatedGenerator>,
    pub scan: Arc<SimulatedScan>,
    pub recorder: Arc<LogRecorder>,
    pub exposures: Arc<LastExposureStore>,
    _sampler: SamplerHandle,
    _dir: tempfile::TempDir,
}

impl Rig {
    /// Block until the sampler has published `role == value`.
    pub fn settle_input(&self, role: InputRole, value: bool) {
        while self.seq.inputs.is_high(role) != value {
            thread::yield_now();
        }
    }
}

pub(crate) fn rig() -> Rig {
    rig_with(SequencerConfig::default())
}

pub(crate) fn rig_with(config: SequencerConfig) -> Rig {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let lines_cfg = LinesConfig::default();
    let bench = SimBench::new(&lines_cfg, clock.clone()).unwrap();
    let mut driver = SimulationDriver::new(bench.clone());
    driver.init(&lines_cfg).unwrap();
    let driver: SharedDriver = Arc::new(Mutex::new(Box::new(driver)));
    let map = Arc::new(bench.line_map().clone());
    let lines = Arc::new(DigitalLineSet::new(driver.clone(), map.clone()));
    let inputs = Arc::new(LinePublisher::new(clock.now()));
    let dir = tempfile::tempdir().unwrap();
    let exposures = Arc::new(LastExposureStore::open(
        dir.path().join("last.bin"),
        clock.clone(),
    ));

    let mut sampler = InputSampler::new(
        driver,
        map,
        inputs.clone(),
        SamplerConfig::default(),
        clock.clone(),
    );
    sampler.add_sink(Arc::new(ExposureTracker::new(exposures.clone(), clock.clone())));
    let sampler = sampler.spawn().unwrap();
    while inputs.seq() < 2 {
        thread::yield_now();
    }

    let ctx = Arc::new(SequencerContext::new(clock));
    let scan = Arc::new(SimulatedScan::new());
    let generator = Arc::new(SimulatedGenerator::new(bench.clone()));
    let recorder = Arc::new(LogRecorder::new("/data", "frame", true));
    let abort = Arc::new(AbortController::new(
        ctx.clone(),
        lines.clone(),
        scan.clone(),
        exposures.clone(),
    ));
    let seq = Arc::new(ExposureSequencer::new(
        ctx,
        abort,
        SequencerIo {
            lines,
            inputs,
            exposures: exposures.clone(),
        },
        Collaborators {
            generator: generator.clone(),
            scan: scan.clone(),
            recorder: recorder.clone(),
            timing: Arc::new(TimingReport::new()),
        },
        config,
        Duration::from_secs(8 * 3600),
    ));
    bench.clear_writes();
    Rig {
        seq,
        bench,
        generator,
        scan,
        recorder,
        exposures,
        _sampler: sampler,
        _dir: dir,
    }
}
