//! `DioDriver` over a [`SimBench`].

use super::bench::SimBench;
use exsync_common::config::LinesConfig;
use exsync_common::hal::driver::{DioDriver, DriverDiagnostics, HalError};
use exsync_common::hal::types::ChangeNotifier;
use std::sync::Arc;
use tracing::{debug, info};

/// Simulation driver bound to a shared bench.
pub struct SimulationDriver {
    bench: SimBench,
    initialized: bool,
    diagnostics: DriverDiagnostics,
}

impl SimulationDriver {
    pub const NAME: &'static str = "simulation";

    pub fn new(bench: SimBench) -> Self {
        Self {
            bench,
            initialized: false,
            diagnostics: DriverDiagnostics::default(),
        }
    }

    fn ensure_initialized(&self) -> Result<(), HalError> {
        if self.initialized {
            Ok(())
        } else {
            Err(HalError::CommunicationError(
                "simulation driver not initialized".to_string(),
            ))
        }
    }
}

impl DioDriver for SimulationDriver {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    fn init(&mut self, config: &LinesConfig) -> Result<(), HalError> {
        for output in &config.outputs {
            self.bench
                .write_raw(output.channel, false)
                .map_err(|e| HalError::InitFailed(e.to_string()))?;
        }
        self.initialized = true;
        info!(
            "Simulation driver initialized ({} outputs driven low)",
            config.outputs.len()
        );
        Ok(())
    }

    fn read_inputs(&mut self) -> Result<u32, HalError> {
        self.ensure_initialized()?;
        self.diagnostics.reads += 1;
        self.bench.read_raw().inspect_err(|_| {
            self.diagnostics.read_failures += 1;
        })
    }

    fn write_output(&mut self, channel: u16, value: bool) -> Result<(), HalError> {
        self.ensure_initialized()?;
        self.diagnostics.writes += 1;
        self.bench.write_raw(channel, value).inspect_err(|_| {
            self.diagnostics.write_failures += 1;
        })
    }

    fn shutdown(&mut self) -> Result<(), HalError> {
        debug!(
            "Simulation driver shutdown after {} reads / {} writes",
            self.diagnostics.reads, self.diagnostics.writes
        );
        self.initialized = false;
        Ok(())
    }

    fn change_notifier(&self) -> Option<Arc<ChangeNotifier>> {
        Some(self.bench.notifier())
    }

    fn diagnostics(&self) -> Option<DriverDiagnostics> {
        Some(self.diagnostics.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exsync_common::clock::SystemClock;
    use exsync_common::io::role::{InputRole, OutputRole};

    fn driver() -> (SimulationDriver, SimBench) {
        let config = LinesConfig::default();
        let bench = SimBench::new(&config, Arc::new(SystemClock)).unwrap();
        let mut driver = SimulationDriver::new(bench.clone());
        driver.init(&config).unwrap();
        (driver, bench)
    }

    #[test]
    fn test_io_before_init_fails() {
        let bench = SimBench::new(&LinesConfig::default(), Arc::new(SystemClock)).unwrap();
        let mut driver = SimulationDriver::new(bench);
        assert!(driver.read_inputs().is_err());
    }

    #[test]
    fn test_init_drives_outputs_low() {
        let (_driver, bench) = driver();
        let writes = bench.writes();
        assert_eq!(writes.len(), LinesConfig::default().outputs.len());
        assert!(writes.iter().all(|w| !w.value));
    }

    #[test]
    fn test_reads_are_one_bitmask() {
        let (mut driver, bench) = driver();
        bench.set_input(InputRole::RadReadyOut, true);
        let raw = driver.read_inputs().unwrap();
        let ch_ready = bench.line_map().input_channel(InputRole::RadReadyOut).unwrap();
        let ch_cam = bench.line_map().input_channel(InputRole::CameraTriggerReady).unwrap();
        assert_eq!(raw, (1 << ch_ready) | (1 << ch_cam));
    }

    #[test]
    fn test_diagnostics_count_failures() {
        let (mut driver, bench) = driver();
        bench.fail_writes(OutputRole::CameraTrigger, true);
        let ch = bench.line_map().output_channel(OutputRole::CameraTrigger).unwrap();
        assert!(driver.write_output(ch, true).is_err());
        let diag = driver.diagnostics().unwrap();
        assert_eq!(diag.writes, 1);
        assert_eq!(diag.write_failures, 1);
        assert!(driver.change_notifier().is_some());
    }
}
