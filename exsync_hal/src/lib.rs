//! # Exposure Sync HAL Library
//!
//! Digital I/O side of the exposure synchronization engine.
//!
//! Drivers implement the `DioDriver` trait defined in
//! `exsync_common::hal::driver`. One driver instance is shared by the
//! [`lines::DigitalLineSet`] (writes) and the [`sampler::InputSampler`]
//! (batched reads); nothing else touches the hardware.
//!
//! # Module Structure
//!
//! - [`driver_registry`] - Driver factory registration
//! - [`drivers`] - Driver implementations (simulation bench)
//! - [`lines`] - `DigitalLineSet`, idempotent output commands
//! - [`sampler`] - `InputSampler`, edge detection and `LinePublisher`
//! - [`persistence`] - Durable last-exposure record and warm-up advice
//! - [`rt`] - Optional real-time thread setup
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          exsync_hal                             │
//! │  ┌──────────────┐   writes   ┌───────────────┐                  │
//! │  │DigitalLineSet│──────────► │               │                  │
//! │  └──────────────┘            │   DioDriver   │◄── Registry      │
//! │  ┌──────────────┐   reads    │ (trait object)│                  │
//! │  │ InputSampler │──────────► │               │                  │
//! │  └──────┬───────┘            └───────────────┘                  │
//! │         │ bundles + edges                                       │
//! │         ▼                                                       │
//! │  ┌──────────────┐   ┌──────────────────────────┐                │
//! │  │LinePublisher │   │ EdgeSink (ExposureTracker)│──► persistence │
//! │  └──────────────┘   └──────────────────────────┘                │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod driver_registry;
pub mod drivers;
pub mod lines;
pub mod persistence;
pub mod rt;
pub mod sampler;

// Re-export key types for convenience
pub use crate::driver_registry::DriverRegistry;
pub use crate::drivers::simulation::{SimBench, SimulationDriver};
pub use crate::lines::{DigitalLineSet, SharedDriver};
pub use crate::persistence::{
    ExposureTracker, ExposureWriter, LastExposureStore, WarmUpAdvice, format_elapsed,
};
pub use crate::sampler::{EdgeSink, InputSampler, LinePublisher, SamplerHandle};
