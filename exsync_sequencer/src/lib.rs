//! # Exposure Sync Sequencer
//!
//! Coordinates an X-ray generator and a camera over digital lines so every
//! exposure is captured: arm the generator, wait for the camera, trigger
//! camera then generator with a fixed delay, wait for both to finish, reset
//! the lines. Any wait can be interrupted by an abort.
//!
//! # Module Structure
//!
//! - [`context`] - `SequencerContext`: cancel flag, in-flight slot, state, status
//! - [`state`] - Sequencer states, transition table, current-function label
//! - [`wait`] - Cooperative, cancellable, bounded wait loops
//! - [`sequencer`] - `ExposureSequencer`: single shot, scan shot, prepare
//! - `manual` - Manual line commands on `ExposureSequencer`
//! - [`abort`] - `AbortController`
//! - [`scan`] - `ScanLiaison` trait and simulated scan controller
//! - [`monitor`] - Scan-side cancel watcher
//! - [`warmup`] - `WarmUpPlanner`
//! - [`generator`] - Generator parameter and status channel
//! - [`power`] - Generator power pulses
//! - [`recorder`] - Shot documentation collaborator
//! - [`timing`] - Per-shot timing statistics
//! - [`command`] - Operator command surface and dispatcher
//! - [`service`] - `SyncService` assembly and lifecycle
//! - [`error`] - `SequencerError`
//!
//! # Architecture
//!
//! ```text
//!   console / front end
//!          │ Command
//!          ▼
//!  ┌─────────────────┐  one thread per command
//!  │CommandDispatcher│──────────────┬──────────────┬─────────────┐
//!  └─────────────────┘              ▼              ▼             ▼
//!                        ┌─────────────────┐ ┌───────────┐ ┌───────────┐
//!                        │ExposureSequencer│ │WarmUpPlan.│ │PowerSwitch│
//!                        └───┬─────────┬───┘ └─────┬─────┘ └───────────┘
//!            assert lines    │         │ wait on   │
//!                            ▼         ▼ inputs    ▼
//!                  ┌──────────────┐ ┌─────────────┐   ┌───────────────┐
//!                  │DigitalLineSet│ │LinePublisher│◄──│ InputSampler  │
//!                  └──────────────┘ └─────────────┘   └───────────────┘
//!                            ▲
//!                  force low │  ┌───────────────┐   ┌───────────┐
//!                            └──│AbortController│◄──│ScanMonitor│
//!                               └───────────────┘   └───────────┘
//! ```

pub mod abort;
pub mod command;
pub mod context;
pub mod error;
pub mod generator;
mod manual;
pub mod monitor;
pub mod power;
pub mod recorder;
pub mod scan;
pub mod sequencer;
pub mod service;
pub mod state;
pub mod timing;
pub mod wait;
pub mod warmup;

#[cfg(test)]
mod testing;

pub use crate::abort::AbortController;
pub use crate::command::{Command, CommandDispatcher, CommandReply};
pub use crate::context::{ContextSnapshot, SequenceGuard, SequencerContext};
pub use crate::error::{CollaboratorError, SequencerError};
pub use crate::sequencer::{Collaborators, ExposureSequencer, SequencerIo};
pub use crate::service::{SimHandles, SyncService};
pub use crate::state::{CurrentFunction, SequencerState};
pub use crate::warmup::{WarmUpKind, WarmUpPlanner};
