//! Durable last-exposure record and warm-up advice.
//!
//! The record is a single bincode file rewritten after every confirmed
//! exposure. Writes go to a sibling temp file which is synced and then
//! renamed over the record, so a crash leaves either the old or the new
//! value on disk, never a torn one.
//!
//! An exposure counts only if the generator's ready line was high while
//! expose-out was high; boot-time line toggling is ignored.

use exsync_common::clock::Clock;
use exsync_common::hal::driver::HalError;
use exsync_common::hal::types::{EdgeEvent, LineBundle};
use exsync_common::io::role::InputRole;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

use crate::sampler::EdgeSink;

/// Back-off after a failed background save.
const WRITER_RETRY: Duration = Duration::from_secs(1);

/// On-disk record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistedExposure {
    /// Version of record format (for migration)
    pub version: u32,
    /// End of the last confirmed exposure (Unix epoch milliseconds)
    pub last_exposure_unix_ms: u64,
    /// Timestamp of last save (Unix epoch seconds)
    pub saved_at: u64,
}

impl PersistedExposure {
    /// Current record format version.
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(last_exposure: SystemTime) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            last_exposure_unix_ms: unix_ms(last_exposure),
            saved_at: 0,
        }
    }

    pub fn last_exposure(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.last_exposure_unix_ms)
    }
}

// ─── File ───────────────────────────────────────────────────────────

/// Atomic reader/writer for the record file.
#[derive(Debug, Clone)]
pub struct ExposureFile {
    path: PathBuf,
}

impl ExposureFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Write `record` durably: temp file, fsync, rename, directory fsync.
    pub fn save(&self, record: &PersistedExposure) -> Result<(), HalError> {
        debug!("Saving last exposure to {:?}", self.path);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                HalError::PersistenceError(format!("Failed to create directory: {}", e))
            })?;
        }

        let mut record = record.clone();
        record.saved_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let tmp = self.temp_path();
        let file = File::create(&tmp).map_err(|e| {
            HalError::PersistenceError(format!("Failed to create temp file: {}", e))
        })?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, &record).map_err(|e| {
            HalError::PersistenceError(format!("Failed to serialize record: {}", e))
        })?;
        writer
            .flush()
            .map_err(|e| HalError::PersistenceError(format!("Failed to flush record: {}", e)))?;
        let file = writer
            .into_inner()
            .map_err(|e| HalError::PersistenceError(format!("Failed to flush record: {}", e)))?;
        file.sync_all()
            .map_err(|e| HalError::PersistenceError(format!("Failed to sync record: {}", e)))?;
        drop(file);

        fs::rename(&tmp, &self.path).map_err(|e| {
            HalError::PersistenceError(format!("Failed to replace record: {}", e))
        })?;

        // Make the rename itself durable.
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = File::open(parent).and_then(|dir| dir.sync_all()) {
                debug!("Directory sync of {:?} failed: {}", parent, e);
            }
        }
        Ok(())
    }

    /// Load the record. `Ok(None)` if absent or from another format version.
    pub fn load(&self) -> Result<Option<PersistedExposure>, HalError> {
        if !self.path.exists() {
            debug!("Record {:?} does not exist", self.path);
            return Ok(None);
        }

        let file = File::open(&self.path).map_err(|e| {
            HalError::PersistenceError(format!("Failed to open record: {}", e))
        })?;
        let record: PersistedExposure =
            bincode::deserialize_from(BufReader::new(file)).map_err(|e| {
                HalError::PersistenceError(format!("Failed to deserialize record: {}", e))
            })?;

        if record.version != PersistedExposure::CURRENT_VERSION {
            warn!(
                "Record version {} differs from current {}, ignoring",
                record.version,
                PersistedExposure::CURRENT_VERSION
            );
            return Ok(None);
        }
        Ok(Some(record))
    }
}

// ─── Store ──────────────────────────────────────────────────────────

#[derive(Debug)]
struct ExposureState {
    last: SystemTime,
    /// Exposure end already current in memory but not yet made durable.
    pending: Option<SystemTime>,
    writer_stop: bool,
}

/// In-memory `LastExposureTimestamp` backed by the record file.
///
/// A noted exposure end is current immediately; making it durable happens
/// on whichever commit reaches it first (the sequencer, the abort path or
/// the background [`ExposureWriter`]). The state lock is never held across
/// file I/O, so noting an edge from the sampler thread does not block on
/// the disk.
pub struct LastExposureStore {
    file: ExposureFile,
    clock: Arc<dyn Clock>,
    state: Mutex<ExposureState>,
    noted: Condvar,
    /// Serializes writers of the record file.
    saving: Mutex<()>,
}

impl LastExposureStore {
    /// Load the record; a missing or unreadable file starts the idle timer now.
    pub fn open<P: AsRef<Path>>(path: P, clock: Arc<dyn Clock>) -> Self {
        let file = ExposureFile::new(path);
        let last = match file.load() {
            Ok(Some(record)) => {
                info!(
                    "Loaded last exposure from {:?} (saved at {})",
                    file.path(),
                    record.saved_at
                );
                record.last_exposure()
            }
            Ok(None) => {
                info!("No last-exposure record at {:?}, starting fresh", file.path());
                clock.wall_clock()
            }
            Err(e) => {
                warn!("{e}; starting fresh");
                clock.wall_clock()
            }
        };
        Self {
            file,
            clock,
            state: Mutex::new(ExposureState {
                last,
                pending: None,
                writer_stop: false,
            }),
            noted: Condvar::new(),
            saving: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn last_exposure(&self) -> SystemTime {
        self.state.lock().last
    }

    pub fn pending(&self) -> Option<SystemTime> {
        self.state.lock().pending
    }

    /// Make a confirmed exposure end current and queue it for saving.
    pub fn note_exposure_end(&self, at: SystemTime) {
        let mut state = self.state.lock();
        state.last = state.last.max(at);
        state.pending = Some(state.pending.map_or(at, |p| p.max(at)));
        self.noted.notify_all();
        debug!("Exposure end noted at {} ms", unix_ms(at));
    }

    /// Persist the pending exposure end.
    ///
    /// Returns the saved time, or `None` if nothing was pending. On failure
    /// the value stays pending.
    pub fn commit_pending(&self) -> Result<Option<SystemTime>, HalError> {
        let _saving = self.saving.lock();
        let Some(at) = self.state.lock().pending else {
            return Ok(None);
        };
        self.file.save(&PersistedExposure::new(at))?;
        let mut state = self.state.lock();
        // A later end noted during the save stays pending.
        if state.pending == Some(at) {
            state.pending = None;
        }
        info!("Last exposure recorded ({} ms)", unix_ms(at));
        Ok(Some(at))
    }

    /// Spawn the thread that saves every noted exposure end.
    pub fn spawn_writer(self: &Arc<Self>) -> std::io::Result<ExposureWriter> {
        self.state.lock().writer_stop = false;
        let store = Arc::clone(self);
        let thread = std::thread::Builder::new()
            .name("exsync-exposure-writer".to_string())
            .spawn(move || store.run_writer())?;
        Ok(ExposureWriter {
            store: Arc::clone(self),
            thread: Some(thread),
        })
    }

    fn run_writer(&self) {
        debug!("Exposure writer started");
        loop {
            let stopping = {
                let mut state = self.state.lock();
                while state.pending.is_none() && !state.writer_stop {
                    self.noted.wait(&mut state);
                }
                if state.pending.is_none() {
                    break;
                }
                state.writer_stop
            };
            if let Err(e) = self.commit_pending() {
                error!("Exposure time not saved: {e}");
                if stopping {
                    break;
                }
                std::thread::sleep(WRITER_RETRY);
            }
        }
        debug!("Exposure writer stopped");
    }

    /// Wall time since the last recorded exposure.
    pub fn idle_for(&self) -> Duration {
        self.clock
            .wall_clock()
            .duration_since(self.last_exposure())
            .unwrap_or_default()
    }

    pub fn warmup_advice(&self, threshold: Duration) -> WarmUpAdvice {
        let idle = self.idle_for();
        WarmUpAdvice {
            idle,
            advised: idle > threshold,
            threshold,
        }
    }
}

/// Handle to the background exposure writer. Stopping saves anything
/// still pending.
pub struct ExposureWriter {
    store: Arc<LastExposureStore>,
    thread: Option<JoinHandle<()>>,
}

impl ExposureWriter {
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        {
            let mut state = self.store.state.lock();
            state.writer_stop = true;
            self.store.noted.notify_all();
        }
        if thread.join().is_err() {
            error!("Exposure writer panicked");
        }
    }
}

impl Drop for ExposureWriter {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Idle time since the last exposure and whether a warm-up is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarmUpAdvice {
    pub idle: Duration,
    pub advised: bool,
    pub threshold: Duration,
}

impl std::fmt::Display for WarmUpAdvice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Time since last exposure: {}", format_elapsed(self.idle))?;
        if self.advised {
            write!(
                f,
                " (more than {} hours since last exposure, run warm-up)",
                self.threshold.as_secs() / 3600
            )?;
        }
        Ok(())
    }
}

/// `DD:HH:MM:SS`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!(
        "{:02}:{:02}:{:02}:{:02}",
        secs / 86_400,
        (secs % 86_400) / 3_600,
        (secs % 3_600) / 60,
        secs % 60
    )
}

fn unix_ms(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ─── Edge sink ──────────────────────────────────────────────────────

/// Watches expose-out and notes real exposure ends in the store.
pub struct ExposureTracker {
    store: Arc<LastExposureStore>,
    clock: Arc<dyn Clock>,
    ready_during_exposure: AtomicBool,
}

impl ExposureTracker {
    pub fn new(store: Arc<LastExposureStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            ready_during_exposure: AtomicBool::new(false),
        }
    }
}

impl EdgeSink for ExposureTracker {
    fn on_edge(&self, edge: &EdgeEvent, bundle: &LineBundle) {
        match edge.line {
            InputRole::ExposeOut if edge.is_rising() => {
                self.ready_during_exposure
                    .store(bundle.get(InputRole::RadReadyOut), Ordering::SeqCst);
            }
            InputRole::RadReadyOut if edge.is_rising() && bundle.get(InputRole::ExposeOut) => {
                self.ready_during_exposure.store(true, Ordering::SeqCst);
            }
            InputRole::ExposeOut if edge.is_falling() => {
                let ready = self.ready_during_exposure.swap(false, Ordering::SeqCst)
                    || bundle.get(InputRole::RadReadyOut);
                if ready {
                    let age = self.clock.now().saturating_duration_since(edge.at);
                    self.store.note_exposure_end(self.clock.wall_clock() - age);
                } else {
                    debug!("expose-out fell without rad-ready; not an exposure");
                }
            }
            _ => {}
        }
    }
}
