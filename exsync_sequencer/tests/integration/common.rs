//! Shared bench setup.

use exsync_common::clock::SystemClock;
use exsync_common::config::SyncConfig;
use exsync_common::io::role::OutputRole;
use exsync_sequencer::{ExposureSequencer, SequencerContext, SimHandles, SyncService};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Service on the simulated bench; shut down on drop.
pub struct Bench {
    pub service: SyncService,
    pub sim: SimHandles,
    _dir: Option<tempfile::TempDir>,
}

/// Default configuration with the state file under `dir`.
pub fn config_in(dir: &Path) -> SyncConfig {
    let mut config = SyncConfig::default();
    config.persistence.state_file = dir.join("last_exposure.bin");
    config
}

impl Bench {
    pub fn start() -> Self {
        Self::start_with(|_| {})
    }

    pub fn start_with(tune: impl FnOnce(&mut SyncConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut bench = Self::start_in(dir.path(), tune);
        bench._dir = Some(dir);
        bench
    }

    /// Start on a state directory owned by the caller.
    pub fn start_in(dir: &Path, tune: impl FnOnce(&mut SyncConfig)) -> Self {
        let mut config = config_in(dir);
        tune(&mut config);
        let (mut service, sim) = SyncService::simulated(config, Arc::new(SystemClock)).unwrap();
        service.start().unwrap();
        sim.bench.clear_writes();
        Self {
            service,
            sim,
            _dir: None,
        }
    }

    pub fn seq(&self) -> &Arc<ExposureSequencer> {
        self.service.dispatcher().sequencer()
    }

    pub fn ctx(&self) -> &Arc<SequencerContext> {
        self.service.context()
    }

    /// Rising writes to `role` since start.
    pub fn asserted(&self, role: OutputRole) -> usize {
        self.sim
            .bench
            .writes_to(role)
            .iter()
            .filter(|w| w.value)
            .count()
    }
}

impl Drop for Bench {
    fn drop(&mut self) {
        let _ = self.service.shutdown();
    }
}

/// Poll `cond` every millisecond; panic after `timeout`.
pub fn wait_for(what: &str, timeout: Duration, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(1));
    }
}
