//! Sequencer state machine.
//!
//! ```text
//!            ┌──────────────── ready already high ──────────────┐
//!            │                                                  ▼
//! Idle ──► PreparingGenerator ──► AwaitingCamera ──► Exposing ──► Finalizing ──► Idle
//!   │              │                    │               ▲            │
//!   └── bare ──────┴────────────────────┴───────────────┼── repeat ──┘
//!                                                       │
//!  any ──► Aborting ──► Idle
//! ```

use serde::Serialize;
use std::fmt;

/// Exposure sequence phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SequencerState {
    #[default]
    Idle,
    /// Rad-prep asserted, waiting for rad-ready.
    PreparingGenerator,
    /// Generator armed, waiting for camera trigger-ready.
    AwaitingCamera,
    /// Triggers asserted, waiting for mutual completion.
    Exposing,
    /// Resetting lines, bookkeeping.
    Finalizing,
    Aborting,
}

/// Result of a state transition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionResult {
    Ok(SequencerState),
    Rejected(&'static str),
}

impl SequencerState {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::PreparingGenerator => "PreparingGenerator",
            Self::AwaitingCamera => "AwaitingCamera",
            Self::Exposing => "Exposing",
            Self::Finalizing => "Finalizing",
            Self::Aborting => "Aborting",
        }
    }

    /// Check a transition against the table.
    pub fn transition(self, to: SequencerState) -> TransitionResult {
        use SequencerState::*;

        let allowed = match (self, to) {
            (_, Aborting) => self != Aborting,
            (Idle, PreparingGenerator | AwaitingCamera | Exposing) => true,
            (PreparingGenerator, AwaitingCamera | Exposing) => true,
            (AwaitingCamera, Exposing) => true,
            (Exposing, Finalizing) => true,
            // Warm-up repeats bare exposures without leaving the armed state.
            (Finalizing, Idle | Exposing) => true,
            (Aborting, Idle) => true,
            _ => false,
        };

        if allowed {
            TransitionResult::Ok(to)
        } else {
            TransitionResult::Rejected(rejection_reason(self, to))
        }
    }
}

fn rejection_reason(from: SequencerState, to: SequencerState) -> &'static str {
    use SequencerState::*;
    match (from, to) {
        (Aborting, _) => "abort in progress: only Idle may follow",
        (_, Finalizing) => "only an exposure can be finalized",
        (_, PreparingGenerator) => "generator can only be prepared from Idle",
        (_, Idle) => "a sequence must finalize or abort to return to Idle",
        _ => "transition not in state table",
    }
}

impl fmt::Display for SequencerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Operator-visible label of the command that owns the lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CurrentFunction {
    #[default]
    None,
    Manual,
    SingleShot,
    ScanShot,
    WarmUp,
    FullWarmUp,
}

impl CurrentFunction {
    pub const fn label(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Manual => "(Manual)",
            Self::SingleShot => "(Single Shot)",
            Self::ScanShot => "(Scan Shot)",
            Self::WarmUp => "(Warm-Up)",
            Self::FullWarmUp => "(Full Warm-Up)",
        }
    }
}

impl fmt::Display for CurrentFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
