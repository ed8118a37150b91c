//! DIO driver implementations.
//!
//! - [`simulation`] - Scriptable bench standing in for the DIO cards
//!
//! # Adding New Drivers
//!
//! 1. Create a new submodule under `drivers/`
//! 2. Implement the `DioDriver` trait from `exsync_common::hal::driver`
//! 3. Register the driver in [`register_builtin_drivers`]

pub mod simulation;

use crate::driver_registry::DriverRegistry;
use simulation::{SimBench, SimulationDriver};

/// Register every built-in driver.
///
/// The simulation factory hands out drivers bound to `bench`, so the test
/// or console that owns the bench can script the inputs.
pub fn register_builtin_drivers(registry: &mut DriverRegistry, bench: &SimBench) {
    let bench = bench.clone();
    registry.register(
        SimulationDriver::NAME,
        Box::new(move || Box::new(SimulationDriver::new(bench.clone()))),
    );
}
