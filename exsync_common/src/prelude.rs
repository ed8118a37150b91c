//! Prelude module for common re-exports.
//!
//! ```rust
//! use exsync_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{
    ConfigError, ConfigLoader, FocusSize, LogLevel, SamplerStrategy, SharedConfig, SyncConfig,
    WarmUpPreset, WarmUpStep,
};

// ─── Lines ──────────────────────────────────────────────────────────
pub use crate::io::map::LineMap;
pub use crate::io::role::{InputRole, OutputRole};

// ─── HAL ────────────────────────────────────────────────────────────
pub use crate::hal::driver::{DioDriver, HalError};
pub use crate::hal::types::{EdgeEvent, LineBundle, LineGroup};

// ─── Time ───────────────────────────────────────────────────────────
pub use crate::clock::{Clock, ManualClock, SystemClock};
