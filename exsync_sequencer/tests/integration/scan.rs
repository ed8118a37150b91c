//! Integration test: multi-point scans and scan-side cancel.

use exsync_common::io::role::OutputRole;
use exsync_sequencer::scan::ScanLiaison;
use exsync_sequencer::{Command, SequencerError};
use std::time::Duration;

use super::common::{Bench, wait_for};

#[test]
fn rad_prep_drops_only_after_last_point() {
    let bench = Bench::start();
    bench.sim.scan.start(5);

    for point in 1..=5 {
        bench.seq().scan_shot().unwrap();
        let armed = bench.sim.bench.output(OutputRole::RadPrepEnable);
        if point < 5 {
            assert!(armed, "rad prep dropped after point {point}");
            assert_eq!(bench.ctx().status(), "Wait scan");
        } else {
            assert!(!armed, "rad prep still high after last point");
            assert_eq!(bench.ctx().status(), "Scan complete");
        }
    }

    let rad_prep: Vec<_> = bench
        .sim
        .bench
        .writes_to(OutputRole::RadPrepEnable)
        .iter()
        .map(|w| w.value)
        .collect();
    assert_eq!(rad_prep, vec![true, false]);
    assert_eq!(bench.asserted(OutputRole::ExposeTrigger), 5);
    assert_eq!(bench.sim.scan.advances(), 5);
    assert!(!bench.sim.scan.is_scan_running().unwrap());
}

#[test]
fn scan_shot_without_scan_is_rejected() {
    let bench = Bench::start();
    assert!(matches!(
        bench.seq().scan_shot(),
        Err(SequencerError::NotReady("No scan running"))
    ));
    assert_eq!(bench.asserted(OutputRole::RadPrepEnable), 0);
}

#[test]
fn scan_cancel_during_rad_prep_aborts() {
    let bench = Bench::start();
    bench.sim.scan.start(3);
    bench
        .service
        .dispatcher()
        .execute(Command::RadPrep(true))
        .unwrap();
    assert!(bench.sim.bench.output(OutputRole::RadPrepEnable));

    bench.sim.scan.request_cancel();
    wait_for("scan-side abort", Duration::from_secs(5), || {
        bench.ctx().status() == "Abort complete"
    });
    assert!(!bench.sim.bench.output(OutputRole::RadPrepEnable));
    assert_eq!(bench.sim.scan.cancels(), 1);
}

#[test]
fn unreachable_scan_controller_aborts_point() {
    let bench = Bench::start();
    bench.sim.scan.start(3);
    bench.sim.scan.set_available(false);
    let err = bench.seq().scan_shot().unwrap_err();
    assert!(matches!(
        err,
        SequencerError::CollaboratorUnavailable {
            collaborator: "scan controller",
            ..
        }
    ));
    assert_eq!(bench.ctx().status(), "Abort complete");
}
