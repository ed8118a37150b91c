//! Simulation driver module.
//!
//! [`SimBench`] models the generator and camera wiring: outputs written by the
//! engine schedule delayed input changes (linked reactions), and tests can
//! set inputs, inject failures and inspect the write log.
//! [`SimulationDriver`] exposes a bench through the `DioDriver` trait.

mod bench;
mod driver;

pub use bench::{SimBench, WriteRecord};
pub use driver::SimulationDriver;
