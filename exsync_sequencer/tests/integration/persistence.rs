//! Integration test: last-exposure durability across restarts.

use exsync_common::clock::SystemClock;
use exsync_common::io::role::InputRole;
use exsync_hal::persistence::{ExposureFile, PersistedExposure};
use exsync_sequencer::SyncService;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::common::{Bench, config_in, wait_for};

fn unix_ms(at: SystemTime) -> u128 {
    at.duration_since(UNIX_EPOCH).unwrap().as_millis()
}

#[test]
fn exposure_time_survives_crash() {
    let dir = tempfile::tempdir().unwrap();
    let recorded = {
        let (mut service, _sim) =
            SyncService::simulated(config_in(dir.path()), Arc::new(SystemClock)).unwrap();
        service.start().unwrap();
        service.dispatcher().sequencer().single_shot().unwrap();
        service.exposures().last_exposure()
        // Dropped without shutdown.
    };

    let bench = Bench::start_in(dir.path(), |_| {});
    let restored = bench.service.exposures().last_exposure();
    assert_eq!(unix_ms(restored), unix_ms(recorded));
    let advice = bench
        .service
        .exposures()
        .warmup_advice(Duration::from_secs(8 * 3600));
    assert!(!advice.advised);
}

#[test]
fn corrupt_record_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("last_exposure.bin"), b"\x01garbage").unwrap();
    let before = SystemTime::now();

    let bench = Bench::start_in(dir.path(), |_| {});
    assert!(bench.service.exposures().last_exposure() >= before - Duration::from_secs(1));
    bench.seq().single_shot().unwrap();
    assert!(bench.service.exposures().pending().is_none());
}

#[test]
fn idle_record_advises_warmup() {
    let dir = tempfile::tempdir().unwrap();
    let nine_hours_ago = SystemTime::now() - Duration::from_secs(9 * 3600);
    ExposureFile::new(dir.path().join("last_exposure.bin"))
        .save(&PersistedExposure::new(nine_hours_ago))
        .unwrap();
    let bench = Bench::start_in(dir.path(), |_| {});
    let advice = bench
        .service
        .exposures()
        .warmup_advice(bench.service.config().persistence.warmup_idle_threshold());
    assert!(advice.advised);
    assert!(advice.to_string().contains("run warm-up"));
}

#[test]
fn manual_trigger_exposure_saved_without_release() {
    let bench = Bench::start();
    let path = bench.service.exposures().path().to_path_buf();
    let before = bench.service.exposures().last_exposure();
    let dispatcher = bench.service.dispatcher();
    dispatcher.execute("radprep on".parse().unwrap()).unwrap();
    wait_for("rad-ready", Duration::from_secs(1), || {
        bench.service.inputs().is_high(InputRole::RadReadyOut)
    });
    dispatcher.execute("expose on".parse().unwrap()).unwrap();
    dispatcher.execute("exptrig on".parse().unwrap()).unwrap();

    // Trigger still held: the pulse end alone makes the time durable.
    wait_for("record file", Duration::from_secs(5), || path.exists());
    let saved = ExposureFile::new(&path).load().unwrap().unwrap();
    assert!(saved.last_exposure() > before);
    assert_eq!(
        unix_ms(bench.service.exposures().last_exposure()),
        unix_ms(saved.last_exposure())
    );

    dispatcher.execute("exptrig off".parse().unwrap()).unwrap();
    assert!(bench.service.exposures().pending().is_none());
}
