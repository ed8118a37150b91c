//! Digital I/O driver trait and error types.
//!
//! This module defines:
//! - `DioDriver` trait - Interface for pluggable digital I/O backends
//! - `HalError` enum - Error types for HAL operations
//! - `DriverFactory` type alias - Factory closure type
//! - `DriverDiagnostics` struct - Optional driver diagnostics

use std::sync::Arc;
use thiserror::Error;

use crate::config::LinesConfig;
use crate::hal::types::ChangeNotifier;

/// Error types for HAL operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HalError {
    /// Driver initialization failed
    #[error("Initialization failed: {0}")]
    InitFailed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Hardware read or write returned a failure status
    #[error("Hardware communication error: {0}")]
    CommunicationError(String),

    /// Driver not found
    #[error("Driver not found: {0}")]
    DriverNotFound(String),

    /// State persistence error
    #[error("State persistence error: {0}")]
    PersistenceError(String),

    /// A role is not bound to any channel
    #[error("Line not bound: {0}")]
    UnknownLine(String),
}

/// Factory for creating driver instances.
///
/// A closure rather than a function pointer so a factory can capture shared
/// state (the simulation bench handle, a device path).
pub type DriverFactory = Box<dyn Fn() -> Box<dyn DioDriver> + Send + Sync>;

/// Optional driver diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverDiagnostics {
    pub reads: u64,
    pub writes: u64,
    pub read_failures: u64,
    pub write_failures: u64,
    /// Driver-specific diagnostics (JSON string)
    pub custom: Option<String>,
}

/// Interface for digital I/O drivers.
///
/// The line set and the input sampler share one driver instance behind a
/// mutex; no other component talks to the hardware.
///
/// # Lifecycle
///
/// 1. `init()` - Called once before sampling starts
/// 2. `read_inputs()` / `write_output()` - Called from the sampler and
///    sequencer threads, serialized by the owner
/// 3. `shutdown()` - Called when the service is stopping
///
/// # Timing Contracts
///
/// | Operation | Max Duration | Constraint |
/// |-----------|--------------|------------|
/// | `init()` | 30 seconds | None |
/// | `read_inputs()` | sampler interval | **one transaction** |
/// | `write_output()` | 1 ms | single channel |
/// | `shutdown()` | 1 second | None |
pub trait DioDriver: Send {
    /// Returns the driver's unique identifier (e.g., "simulation").
    fn name(&self) -> &'static str;

    /// Returns the driver's semantic version.
    fn version(&self) -> &'static str;

    /// Open the device and drive every configured output low.
    ///
    /// # Errors
    /// Return `HalError::InitFailed` if the device cannot be opened.
    fn init(&mut self, config: &LinesConfig) -> Result<(), HalError>;

    /// Read every input channel in a single hardware transaction.
    ///
    /// Bit `n` of the result is channel `n`. Values are mutually consistent
    /// at the moment of the read; per-line reads are not permitted.
    fn read_inputs(&mut self) -> Result<u32, HalError>;

    /// Drive one output channel to `value`.
    ///
    /// A failure status is returned to the caller, never retried here.
    fn write_output(&mut self, channel: u16, value: bool) -> Result<(), HalError>;

    /// Release the device.
    fn shutdown(&mut self) -> Result<(), HalError>;

    /// Notifier bumped on input changes, if the hardware can signal them.
    /// Default: None (poll only)
    fn change_notifier(&self) -> Option<Arc<ChangeNotifier>> {
        None
    }

    /// Get driver-specific diagnostics.
    /// Default: None
    fn diagnostics(&self) -> Option<DriverDiagnostics> {
        None
    }
}
