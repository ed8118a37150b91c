//! Configuration loading traits and types.
//!
//! This module provides the TOML configuration tree for the exposure sync
//! service and the standardized loader shared by every binary.
//!
//! # Usage
//!
//! ```rust,no_run
//! use exsync_common::config::{ConfigError, SyncConfig};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = SyncConfig::load_validated(Path::new("exsync.toml"))?;
//!     println!("Service: {}", config.shared.service_name);
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::consts::*;
use crate::io::map::LineMap;
use crate::io::role::{InputRole, OutputRole};

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Common configuration fields.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "exsync-bench-01"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    pub service_name: String,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

/// A configured span in seconds.
///
/// `None` if negative, not finite or too large for a `Duration`.
pub fn secs_duration(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

// ─── Lines ──────────────────────────────────────────────────────────

/// One monitored input line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputLineConfig {
    pub role: InputRole,
    pub channel: u16,
    /// Power-up level (simulation driver only).
    #[serde(default)]
    pub initial: bool,
}

/// Simulated reaction: an output edge schedules a delayed input change.
///
/// ```toml
/// [[lines.outputs]]
/// role = "rad_prep_enable"
/// channel = 0
/// linked_inputs = [
///   { trigger = true, delay_s = 0.05, input = "rad_ready_out", result = true },
/// ]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedInput {
    /// Output level that fires the reaction.
    pub trigger: bool,
    /// Delay before the input changes [s].
    #[serde(default)]
    pub delay_s: f64,
    pub input: InputRole,
    pub result: bool,
}

impl LinkedInput {
    pub const fn new(trigger: bool, delay_s: f64, input: InputRole, result: bool) -> Self {
        Self {
            trigger,
            delay_s,
            input,
            result,
        }
    }

    pub fn delay(&self) -> Option<Duration> {
        secs_duration(self.delay_s)
    }
}

/// One commanded output line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputLineConfig {
    pub role: OutputRole,
    pub channel: u16,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub linked_inputs: Vec<LinkedInput>,
}

/// `[lines]` section: driver selection and role-to-channel bindings.
///
/// The order of `inputs` is irrelevant; bundle order is fixed by
/// [`InputRole::index`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinesConfig {
    /// Registered driver name.
    pub driver: String,
    pub outputs: Vec<OutputLineConfig>,
    pub inputs: Vec<InputLineConfig>,
}

impl Default for LinesConfig {
    /// A bench wiring whose simulated reactions behave like a generator and
    /// camera answering within a few tens of milliseconds.
    fn default() -> Self {
        use InputRole::*;
        let out = |role, channel, linked_inputs| OutputLineConfig {
            role,
            channel,
            linked_inputs,
        };
        let inp = |role, channel, initial| InputLineConfig {
            role,
            channel,
            initial,
        };
        Self {
            driver: "simulation".to_string(),
            outputs: vec![
                out(
                    OutputRole::RadPrepEnable,
                    0,
                    vec![
                        LinkedInput::new(true, 0.0, RadPrepOut, true),
                        LinkedInput::new(true, 0.05, RadReadyOut, true),
                        LinkedInput::new(false, 0.0, RadPrepOut, false),
                        LinkedInput::new(false, 0.0, RadReadyOut, false),
                    ],
                ),
                out(OutputRole::ExposeEnable, 1, Vec::new()),
                out(
                    OutputRole::ExposeTrigger,
                    2,
                    vec![
                        LinkedInput::new(true, 0.005, ExposeOut, true),
                        LinkedInput::new(true, 0.105, ExposeOut, false),
                    ],
                ),
                out(
                    OutputRole::FluoroEnable,
                    3,
                    vec![
                        LinkedInput::new(true, 0.0, FluoroOut, true),
                        LinkedInput::new(false, 0.0, FluoroOut, false),
                    ],
                ),
                out(OutputRole::PowerOnPulse, 4, Vec::new()),
                out(OutputRole::PowerOffPulse, 5, Vec::new()),
                out(
                    OutputRole::CameraTrigger,
                    6,
                    vec![
                        LinkedInput::new(true, 0.0, CameraTriggerReady, false),
                        LinkedInput::new(true, 0.001, CameraExposing, true),
                        // Integration outlasts the generator pulse.
                        LinkedInput::new(true, 0.15, CameraExposing, false),
                        LinkedInput::new(false, 0.0, CameraExposing, false),
                        LinkedInput::new(false, 0.01, CameraTriggerReady, true),
                    ],
                ),
            ],
            inputs: vec![
                inp(RadPrepOut, 0, false),
                inp(RadReadyOut, 1, false),
                inp(ExposeOut, 2, false),
                inp(FluoroOut, 3, false),
                inp(CameraTriggerReady, 4, true),
                inp(CameraExposing, 5, false),
            ],
        }
    }
}

impl LinesConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        LineMap::from_config(self).map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        for output in &self.outputs {
            if let Some(bad) = output.linked_inputs.iter().find(|l| l.delay().is_none()) {
                return Err(ConfigError::ValidationError(format!(
                    "lines.outputs.{}: linked input delay_s out of range (got {})",
                    output.role, bad.delay_s
                )));
            }
        }
        Ok(())
    }
}

// ─── Sampler ────────────────────────────────────────────────────────

/// How the input sampler learns about new line values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SamplerStrategy {
    /// Batched read every `interval_us`.
    #[default]
    Poll,
    /// Block on the driver's change notifier, then do a batched read.
    ChangeDetection,
}

/// `[sampler]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub strategy: SamplerStrategy,
    /// Sleep between polls [us]. Zero spins with a yield.
    pub interval_us: u64,
    /// Iterations slower than this are reported [us].
    pub slow_iteration_us: u64,
    /// Fallback wake-up for change detection [ms].
    pub change_wait_ms: u64,
    /// SCHED_FIFO priority for the sampler thread (`rt` feature).
    pub rt_priority: Option<i32>,
    /// CPU the sampler thread is pinned to (`rt` feature).
    pub cpu_core: Option<usize>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            strategy: SamplerStrategy::Poll,
            interval_us: DEFAULT_SAMPLER_INTERVAL_US,
            slow_iteration_us: DEFAULT_SLOW_ITERATION_US,
            change_wait_ms: 10,
            rt_priority: None,
            cpu_core: None,
        }
    }
}

impl SamplerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_micros(self.interval_us)
    }

    pub fn slow_iteration(&self) -> Duration {
        Duration::from_micros(self.slow_iteration_us)
    }

    pub fn change_wait(&self) -> Duration {
        Duration::from_millis(self.change_wait_ms)
    }
}

// ─── Sequencer ──────────────────────────────────────────────────────

/// Upper bounds for every confirmation wait [s]. `0` means unbounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitTimeouts {
    pub rad_ready_s: f64,
    pub generator_phase_s: f64,
    pub camera_ready_s: f64,
    pub expose_start_s: f64,
    pub expose_end_s: f64,
    /// Camera integration end; a miss is reported but not fatal.
    pub camera_complete_s: f64,
    /// Rad-ready dropping after a warm-up step.
    pub ready_drop_s: f64,
}

impl Default for WaitTimeouts {
    fn default() -> Self {
        Self {
            rad_ready_s: 30.0,
            generator_phase_s: 10.0,
            camera_ready_s: 30.0,
            expose_start_s: 10.0,
            expose_end_s: 30.0,
            camera_complete_s: 5.0,
            ready_drop_s: 10.0,
        }
    }
}

impl WaitTimeouts {
    /// Every wait unbounded.
    pub fn unbounded() -> Self {
        Self {
            rad_ready_s: 0.0,
            generator_phase_s: 0.0,
            camera_ready_s: 0.0,
            expose_start_s: 0.0,
            expose_end_s: 0.0,
            camera_complete_s: 0.0,
            ready_drop_s: 0.0,
        }
    }

    /// Converts a configured bound into an optional duration.
    pub fn bound(secs: f64) -> Option<Duration> {
        if secs > 0.0 {
            secs_duration(secs)
        } else {
            None
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let all = [
            ("rad_ready_s", self.rad_ready_s),
            ("generator_phase_s", self.generator_phase_s),
            ("camera_ready_s", self.camera_ready_s),
            ("expose_start_s", self.expose_start_s),
            ("expose_end_s", self.expose_end_s),
            ("camera_complete_s", self.camera_complete_s),
            ("ready_drop_s", self.ready_drop_s),
        ];
        for (name, value) in all {
            if secs_duration(value).is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "sequencer.timeouts.{name} must be >= 0 and in range (got {value})"
                )));
            }
        }
        Ok(())
    }
}

/// `[sequencer]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    /// Wait-loop poll interval; cancel is re-checked every iteration [us].
    pub poll_interval_us: u64,
    /// Camera trigger to generator trigger [ms].
    pub gen_delay_ms: f64,
    pub ready_settle_ms: u64,
    pub post_shot_settle_ms: u64,
    pub rad_prep_settle_ms: u64,
    pub param_settle_ms: u64,
    pub pulse_width_ms: u64,
    pub power_on_settle_ms: u64,
    /// Tell the scan controller to proceed after each non-final point.
    /// Disable when the scan advances on its own.
    pub advance_scan: bool,
    pub timeouts: WaitTimeouts,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            poll_interval_us: DEFAULT_WAIT_POLL_US,
            gen_delay_ms: DEFAULT_GEN_DELAY_MS,
            ready_settle_ms: DEFAULT_READY_SETTLE_MS,
            post_shot_settle_ms: DEFAULT_POST_SHOT_SETTLE_MS,
            rad_prep_settle_ms: DEFAULT_RAD_PREP_SETTLE_MS,
            param_settle_ms: DEFAULT_PARAM_SETTLE_MS,
            pulse_width_ms: DEFAULT_PULSE_WIDTH_MS,
            power_on_settle_ms: DEFAULT_POWER_ON_SETTLE_MS,
            advance_scan: true,
            timeouts: WaitTimeouts::default(),
        }
    }
}

impl SequencerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }

    pub fn gen_delay(&self) -> Duration {
        secs_duration(self.gen_delay_ms / 1000.0).unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_us == 0 {
            return Err(ConfigError::ValidationError(
                "sequencer.poll_interval_us must be > 0".to_string(),
            ));
        }
        if !self.gen_delay_ms.is_finite() || !(0.0..1000.0).contains(&self.gen_delay_ms) {
            return Err(ConfigError::ValidationError(format!(
                "sequencer.gen_delay_ms must be in [0, 1000) (got {})",
                self.gen_delay_ms
            )));
        }
        if self.pulse_width_ms == 0 {
            return Err(ConfigError::ValidationError(
                "sequencer.pulse_width_ms must be > 0".to_string(),
            ));
        }
        self.timeouts.validate()
    }
}

// ─── Persistence ────────────────────────────────────────────────────

/// `[persistence]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Durable record holding the last exposure time.
    pub state_file: PathBuf,
    /// Idle time after which a warm-up is advised [s].
    pub warmup_idle_threshold_s: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("/var/lib/exsync/last_exposure.bin"),
            warmup_idle_threshold_s: DEFAULT_WARMUP_IDLE_S,
        }
    }
}

impl PersistenceConfig {
    pub fn warmup_idle_threshold(&self) -> Duration {
        Duration::from_secs(self.warmup_idle_threshold_s)
    }
}

// ─── Warm-up ────────────────────────────────────────────────────────

/// Generator focal spot size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FocusSize {
    Small,
    Large,
}

/// One parameterized warm-up step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WarmUpStep {
    pub kvp: f64,
    pub current_ma: f64,
    pub duration_ms: f64,
    pub repeat_count: u32,
    /// Rest after each exposure [s].
    pub duty_cycle_s: f64,
}

impl WarmUpStep {
    pub const fn new(
        kvp: f64,
        current_ma: f64,
        duration_ms: f64,
        repeat_count: u32,
        duty_cycle_s: f64,
    ) -> Self {
        Self {
            kvp,
            current_ma,
            duration_ms,
            repeat_count,
            duty_cycle_s,
        }
    }

    /// Rest after each exposure.
    pub fn duty_cycle(&self) -> Duration {
        secs_duration(self.duty_cycle_s).unwrap_or_default()
    }
}

/// A named warm-up table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarmUpPreset {
    pub steps: Vec<WarmUpStep>,
    #[serde(default)]
    pub start_focus: Option<FocusSize>,
    #[serde(default)]
    pub end_focus: Option<FocusSize>,
    #[serde(default = "default_step_pause_ms")]
    pub step_pause_ms: u64,
}

fn default_step_pause_ms() -> u64 {
    DEFAULT_WARMUP_STEP_PAUSE_MS
}

impl WarmUpPreset {
    /// Short conditioning run after an idle period.
    pub fn short() -> Self {
        Self {
            steps: vec![
                WarmUpStep::new(80.0, 25.0, 100.0, 3, 1.0),
                WarmUpStep::new(100.0, 25.0, 100.0, 3, 1.0),
                WarmUpStep::new(125.0, 25.0, 100.0, 3, 1.0),
            ],
            start_focus: None,
            end_focus: None,
            step_pause_ms: DEFAULT_WARMUP_STEP_PAUSE_MS,
        }
    }

    /// Full conditioning run on the large focus.
    pub fn full() -> Self {
        Self {
            steps: vec![
                WarmUpStep::new(80.0, 200.0, 2000.0, 6, 5.0),
                WarmUpStep::new(90.0, 320.0, 100.0, 3, 1.0),
                WarmUpStep::new(100.0, 320.0, 100.0, 3, 1.0),
                WarmUpStep::new(110.0, 320.0, 100.0, 3, 1.0),
                WarmUpStep::new(120.0, 320.0, 100.0, 3, 1.0),
            ],
            start_focus: Some(FocusSize::Large),
            end_focus: Some(FocusSize::Small),
            step_pause_ms: DEFAULT_WARMUP_STEP_PAUSE_MS,
        }
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.steps.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "warmup.{name} has no steps"
            )));
        }
        for (i, step) in self.steps.iter().enumerate() {
            let positive = [step.kvp, step.current_ma, step.duration_ms]
                .iter()
                .all(|v| v.is_finite() && *v > 0.0);
            let rest_ok = secs_duration(step.duty_cycle_s).is_some();
            if !positive || step.repeat_count == 0 || !rest_ok {
                return Err(ConfigError::ValidationError(format!(
                    "warmup.{name} step {i} is invalid: {step:?}"
                )));
            }
        }
        Ok(())
    }
}

/// `[warmup]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmUpConfig {
    pub short: WarmUpPreset,
    pub full: WarmUpPreset,
}

impl Default for WarmUpConfig {
    fn default() -> Self {
        Self {
            short: WarmUpPreset::short(),
            full: WarmUpPreset::full(),
        }
    }
}

// ─── Top level ──────────────────────────────────────────────────────

/// Complete service configuration (`exsync.toml`).
///
/// Every section is optional; defaults describe a runnable simulated bench.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub shared: SharedConfig,
    pub lines: LinesConfig,
    pub sampler: SamplerConfig,
    pub sequencer: SequencerConfig,
    pub persistence: PersistenceConfig,
    pub warmup: WarmUpConfig,
}

impl SyncConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.lines.validate()?;
        self.sequencer.validate()?;
        self.warmup.short.validate("short")?;
        self.warmup.full.validate("full")?;
        Ok(())
    }

    /// Load from `path` and validate.
    pub fn load_validated(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}
