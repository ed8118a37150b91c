//! Sequencer error taxonomy.
//!
//! | Variant | Cause | Handling |
//! |---------|-------|----------|
//! | `HardwareWrite` | a line write failed | abort if the line is safety-critical |
//! | `ConfirmationTimeout` | an input never confirmed | abort |
//! | `ConcurrentRequestRejected` | a sequence is already in flight | reject, no state change |
//! | `CollaboratorUnavailable` | generator status or scan channel failed | abort |
//! | `Aborted` | cancel observed at a wait point | unwind, abort controller owns cleanup |

use exsync_common::hal::driver::HalError;
use exsync_common::io::role::OutputRole;
use std::time::Duration;
use thiserror::Error;

use crate::state::SequencerState;

/// Failure reported by an external collaborator channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    /// Channel did not answer.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Channel answered but refused the request.
    #[error("rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum SequencerError {
    #[error("Write to {line} failed: {source}")]
    HardwareWrite {
        line: OutputRole,
        #[source]
        source: HalError,
    },

    #[error("Timed out waiting for {waiting_for} after {after:?}")]
    ConfirmationTimeout {
        waiting_for: &'static str,
        after: Duration,
    },

    #[error("Rejected: {running} already in progress")]
    ConcurrentRequestRejected { running: &'static str },

    #[error("{collaborator} {reason}")]
    CollaboratorUnavailable {
        collaborator: &'static str,
        reason: CollaboratorError,
    },

    #[error("Sequence aborted")]
    Aborted,

    #[error("{0}")]
    NotReady(&'static str),

    #[error("Invalid state transition {from} -> {to}")]
    InvalidTransition {
        from: SequencerState,
        to: SequencerState,
    },

    #[error("HAL error: {0}")]
    Hal(#[from] HalError),
}

impl SequencerError {
    pub fn collaborator(collaborator: &'static str) -> impl Fn(CollaboratorError) -> Self + Copy {
        move |reason| Self::CollaboratorUnavailable {
            collaborator,
            reason,
        }
    }

    /// Whether the failure must move the sequencer through `Aborting`.
    ///
    /// Rejections leave the lines untouched. A write failure on a line that
    /// cannot energize the tube (power pulses) is reported only.
    pub fn is_abort_worthy(&self) -> bool {
        match self {
            Self::HardwareWrite { line, .. } => line.is_safety_critical(),
            Self::ConcurrentRequestRejected { .. } | Self::NotReady(_) | Self::Aborted => false,
            Self::ConfirmationTimeout { .. }
            | Self::CollaboratorUnavailable { .. }
            | Self::InvalidTransition { .. }
            | Self::Hal(_) => true,
        }
    }
}
