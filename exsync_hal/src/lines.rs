//! Digital line set: the only writer of output lines.
//!
//! Each call issues at most one physical write. Writing the level a line
//! already holds is a no-op, so repeated commands never produce an extra
//! pulse. Pulse lines (generator power on/off) are driven high, held and
//! released by the caller.

use exsync_common::hal::driver::{DioDriver, HalError};
use exsync_common::hal::types::LineGroup;
use exsync_common::io::map::LineMap;
use exsync_common::io::role::OutputRole;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Driver shared by the line set and the input sampler.
pub type SharedDriver = Arc<Mutex<Box<dyn DioDriver>>>;

/// Command layer over the named output lines.
pub struct DigitalLineSet {
    driver: SharedDriver,
    map: Arc<LineMap>,
    /// Last level successfully written per role; `None` = unknown.
    commanded: Mutex<[Option<bool>; OutputRole::COUNT]>,
}

impl DigitalLineSet {
    pub fn new(driver: SharedDriver, map: Arc<LineMap>) -> Self {
        Self {
            driver,
            map,
            commanded: Mutex::new([None; OutputRole::COUNT]),
        }
    }

    pub fn line_map(&self) -> &LineMap {
        &self.map
    }

    pub fn is_bound(&self, role: OutputRole) -> bool {
        self.map.output_channel(role).is_some()
    }

    /// Last level successfully commanded on `role`.
    pub fn commanded(&self, role: OutputRole) -> Option<bool> {
        self.commanded.lock()[role.index()]
    }

    /// Drive `role` to `value` with one atomic write.
    ///
    /// # Errors
    /// - `HalError::UnknownLine` if the role has no channel
    /// - `HalError::CommunicationError` if the driver reports a failure; the
    ///   cached level is dropped so the next command writes again
    pub fn set_line(&self, role: OutputRole, value: bool) -> Result<(), HalError> {
        let channel = self
            .map
            .output_channel(role)
            .ok_or_else(|| HalError::UnknownLine(role.to_string()))?;

        let mut commanded = self.commanded.lock();
        if commanded[role.index()] == Some(value) {
            trace!("{role} already {}", level(value));
            return Ok(());
        }
        self.write(&mut commanded, role, channel, value)
    }

    /// Drive every bound line of `group` low, regardless of the cached level.
    ///
    /// Every line is attempted; the first failure is returned.
    pub fn force_low(&self, group: LineGroup) -> Result<(), HalError> {
        let mut commanded = self.commanded.lock();
        let mut first_error = None;
        for role in group.roles() {
            let Some(channel) = self.map.output_channel(role) else {
                continue;
            };
            if let Err(e) = self.write(&mut commanded, role, channel, false) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn write(
        &self,
        commanded: &mut [Option<bool>; OutputRole::COUNT],
        role: OutputRole,
        channel: u16,
        value: bool,
    ) -> Result<(), HalError> {
        match self.driver.lock().write_output(channel, value) {
            Ok(()) => {
                commanded[role.index()] = Some(value);
                debug!("{role} -> {}", level(value));
                Ok(())
            }
            Err(e) => {
                commanded[role.index()] = None;
                warn!("Write {role} -> {} failed: {e}", level(value));
                Err(e)
            }
        }
    }
}

fn level(value: bool) -> &'static str {
    if value { "HIGH" } else { "LOW" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::simulation::{SimBench, SimulationDriver};
    use exsync_common::clock::SystemClock;
    use exsync_common::config::LinesConfig;

    fn line_set() -> (DigitalLineSet, SimBench) {
        let config = LinesConfig::default();
        let bench = SimBench::new(&config, Arc::new(SystemClock)).unwrap();
        let mut driver = SimulationDriver::new(bench.clone());
        driver.init(&config).unwrap();
        bench.clear_writes();
        let driver: SharedDriver = Arc::new(Mutex::new(Box::new(driver)));
        let lines = DigitalLineSet::new(driver, Arc::new(bench.line_map().clone()));
        (lines, bench)
    }

    #[test]
    fn test_repeated_level_writes_once() {
        let (lines, bench) = line_set();
        lines.set_line(OutputRole::RadPrepEnable, true).unwrap();
        lines.set_line(OutputRole::RadPrepEnable, true).unwrap();
        assert_eq!(bench.writes_to(OutputRole::RadPrepEnable).len(), 1);
        assert_eq!(lines.commanded(OutputRole::RadPrepEnable), Some(true));

        lines.set_line(OutputRole::RadPrepEnable, false).unwrap();
        assert_eq!(bench.writes_to(OutputRole::RadPrepEnable).len(), 2);
    }

    #[test]
    fn test_failed_write_is_reported_and_not_cached() {
        let (lines, bench) = line_set();
        bench.fail_writes(OutputRole::ExposeEnable, true);
        let err = lines.set_line(OutputRole::ExposeEnable, true).unwrap_err();
        assert!(matches!(err, HalError::CommunicationError(_)));
        assert_eq!(lines.commanded(OutputRole::ExposeEnable), None);

        bench.fail_writes(OutputRole::ExposeEnable, false);
        lines.set_line(OutputRole::ExposeEnable, true).unwrap();
        assert!(bench.output(OutputRole::ExposeEnable));
    }

    #[test]
    fn test_force_low_writes_even_when_cached_low() {
        let (lines, bench) = line_set();
        lines.set_line(OutputRole::CameraTrigger, false).unwrap();
        lines.force_low(LineGroup::PER_SHOT).unwrap();
        assert_eq!(bench.writes_to(OutputRole::CameraTrigger).len(), 2);
        assert_eq!(bench.writes_to(OutputRole::ExposeTrigger).len(), 1);
    }

    #[test]
    fn test_force_low_attempts_every_line_and_returns_first_error() {
        let (lines, bench) = line_set();
        lines.set_line(OutputRole::RadPrepEnable, true).unwrap();
        lines.set_line(OutputRole::ExposeEnable, true).unwrap();
        bench.fail_writes(OutputRole::ExposeEnable, true);

        assert!(lines.force_low(LineGroup::ENERGIZING).is_err());
        assert!(!bench.output(OutputRole::RadPrepEnable));
        assert!(bench.output(OutputRole::ExposeEnable));
    }

    #[test]
    fn test_unbound_role_is_rejected() {
        let mut config = LinesConfig::default();
        config.outputs.retain(|o| o.role != OutputRole::FluoroEnable);
        let bench = SimBench::new(&config, Arc::new(SystemClock)).unwrap();
        let mut driver = SimulationDriver::new(bench.clone());
        driver.init(&config).unwrap();
        let driver: SharedDriver = Arc::new(Mutex::new(Box::new(driver)));
        let lines = DigitalLineSet::new(driver, Arc::new(bench.line_map().clone()));

        assert!(!lines.is_bound(OutputRole::FluoroEnable));
        assert!(matches!(
            lines.set_line(OutputRole::FluoroEnable, true),
            Err(HalError::UnknownLine(_))
        ));
        // Unbound members of a group are skipped.
        lines.force_low(LineGroup::ENERGIZING).unwrap();
    }
}
