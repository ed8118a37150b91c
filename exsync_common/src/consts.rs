//! System-wide constants.
//!
//! Defaults here back the `#[serde(default)]` values in [`crate::config`];
//! a deployment overrides them through the TOML file.

/// Maximum number of monitored input lines (one bit each in a bundle).
pub const MAX_INPUT_LINES: usize = 16;

/// Maximum number of commanded output lines.
pub const MAX_OUTPUT_LINES: usize = 16;

/// Highest hardware channel number a driver may expose per direction.
pub const MAX_CHANNEL: u16 = 31;

/// Default sampler poll interval [us].
pub const DEFAULT_SAMPLER_INTERVAL_US: u64 = 500;

/// Sampler iterations slower than this are reported [us].
pub const DEFAULT_SLOW_ITERATION_US: u64 = 2_000;

/// Default sequencer wait-loop poll interval [us].
pub const DEFAULT_WAIT_POLL_US: u64 = 1_000;

/// Default delay between camera trigger and generator trigger [ms].
pub const DEFAULT_GEN_DELAY_MS: f64 = 20.0;

/// Settle time after the generator reports its exposure-ready phase [ms].
pub const DEFAULT_READY_SETTLE_MS: u64 = 2;

/// Settle time after per-shot lines are released [ms].
pub const DEFAULT_POST_SHOT_SETTLE_MS: u64 = 25;

/// Settle time around manual rad-prep changes [ms].
pub const DEFAULT_RAD_PREP_SETTLE_MS: u64 = 100;

/// Pause between generator parameter writes [ms].
pub const DEFAULT_PARAM_SETTLE_MS: u64 = 100;

/// Width of a generator power on/off pulse [ms].
pub const DEFAULT_PULSE_WIDTH_MS: u64 = 600;

/// Wait after a power-on pulse before refreshing generator readbacks [ms].
pub const DEFAULT_POWER_ON_SETTLE_MS: u64 = 4_000;

/// Pause between warm-up steps [ms].
pub const DEFAULT_WARMUP_STEP_PAUSE_MS: u64 = 1_000;

/// Idle time after which a warm-up is advised (8 hours) [s].
pub const DEFAULT_WARMUP_IDLE_S: u64 = 8 * 60 * 60;

/// Number of status strings retained for operator inspection.
pub const STATUS_HISTORY_LEN: usize = 32;

/// Default service instance name.
pub const DEFAULT_SERVICE_NAME: &str = "exsync";
