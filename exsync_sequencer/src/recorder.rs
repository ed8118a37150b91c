//! Documentation collaborator.
//!
//! The bookkeeping snapshot is taken while the generator arms so that the
//! exposure path itself never waits on it.

use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

use crate::error::CollaboratorError;

/// Where the frame of the current shot will be filed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ShotBookkeeping {
    pub file_path: PathBuf,
    pub file_name: String,
    pub file_number: u32,
    /// Documentation enabled for this shot.
    pub doc_mode: bool,
}

pub trait ShotRecorder: Send + Sync {
    fn snapshot(&self) -> Result<ShotBookkeeping, CollaboratorError>;

    /// Write the documentation entry for a confirmed exposure.
    fn document(&self, shot: &ShotBookkeeping) -> Result<(), CollaboratorError>;

    fn advance_file_number(&self) -> Result<(), CollaboratorError>;
}

/// Documentation disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecorder;

impl ShotRecorder for NoopRecorder {
    fn snapshot(&self) -> Result<ShotBookkeeping, CollaboratorError> {
        Ok(ShotBookkeeping::default())
    }

    fn document(&self, _shot: &ShotBookkeeping) -> Result<(), CollaboratorError> {
        Ok(())
    }

    fn advance_file_number(&self) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

/// Records documentation entries through `tracing` and keeps them for
/// inspection.
#[derive(Debug)]
pub struct LogRecorder {
    template: Mutex<ShotBookkeeping>,
    documented: Mutex<Vec<ShotBookkeeping>>,
}

impl LogRecorder {
    pub fn new(file_path: impl Into<PathBuf>, file_name: impl Into<String>, doc_mode: bool) -> Self {
        Self {
            template: Mutex::new(ShotBookkeeping {
                file_path: file_path.into(),
                file_name: file_name.into(),
                file_number: 1,
                doc_mode,
            }),
            documented: Mutex::new(Vec::new()),
        }
    }

    pub fn set_doc_mode(&self, doc_mode: bool) {
        self.template.lock().doc_mode = doc_mode;
    }

    pub fn documented(&self) -> Vec<ShotBookkeeping> {
        self.documented.lock().clone()
    }

    pub fn file_number(&self) -> u32 {
        self.template.lock().file_number
    }
}

impl ShotRecorder for LogRecorder {
    fn snapshot(&self) -> Result<ShotBookkeeping, CollaboratorError> {
        Ok(self.template.lock().clone())
    }

    fn document(&self, shot: &ShotBookkeeping) -> Result<(), CollaboratorError> {
        info!(
            "Documented {}/{}_{:04}",
            shot.file_path.display(),
            shot.file_name,
            shot.file_number
        );
        self.documented.lock().push(shot.clone());
        Ok(())
    }

    fn advance_file_number(&self) -> Result<(), CollaboratorError> {
        self.template.lock().file_number += 1;
        Ok(())
    }
}
