//! Integration test: abort and single-flight guarantees.

use exsync_common::io::role::{InputRole, OutputRole};
use exsync_sequencer::{Command, CommandReply, SequencerError, SequencerState};
use std::time::Duration;

use super::common::{Bench, wait_for};

const LONG: Duration = Duration::from_secs(5);

#[test]
fn second_request_is_rejected_while_first_runs() {
    let bench = Bench::start();
    bench.sim.bench.remove_reactions(OutputRole::RadPrepEnable);
    let dispatcher = bench.service.dispatcher();

    let first = dispatcher.dispatch(Command::SingleShot).unwrap();
    wait_for("first shot in flight", LONG, || bench.ctx().seq_in_progress());

    let others: Vec<_> = [Command::SingleShot, Command::Prepare, Command::WarmUp]
        .into_iter()
        .map(|c| dispatcher.dispatch(c).unwrap())
        .collect();
    for handle in others {
        assert!(matches!(
            handle.join().unwrap(),
            Err(SequencerError::ConcurrentRequestRejected {
                running: "Single Shot"
            })
        ));
    }

    bench.sim.bench.set_input(InputRole::RadReadyOut, true);
    assert!(matches!(first.join().unwrap(), Ok(CommandReply::Done)));
    assert_eq!(bench.asserted(OutputRole::ExposeTrigger), 1);
    assert_eq!(bench.asserted(OutputRole::RadPrepEnable), 1);
}

#[test]
fn abort_twice_matches_abort_once() {
    let bench = Bench::start();
    bench.seq().prepare().unwrap();
    assert!(bench.sim.bench.output(OutputRole::RadPrepEnable));

    let abort = bench.service.abort_controller();
    abort.request_abort();
    let once = bench.ctx().snapshot();
    let outputs_once: Vec<_> = [OutputRole::RadPrepEnable, OutputRole::ExposeEnable]
        .map(|r| bench.sim.bench.output(r))
        .to_vec();

    abort.request_abort();
    let twice = bench.ctx().snapshot();
    let outputs_twice: Vec<_> = [OutputRole::RadPrepEnable, OutputRole::ExposeEnable]
        .map(|r| bench.sim.bench.output(r))
        .to_vec();

    assert_eq!(once.state, SequencerState::Idle);
    assert_eq!(twice.state, once.state);
    assert_eq!(twice.status, once.status);
    assert!(!twice.cancel && !twice.seq_in_progress);
    assert_eq!(outputs_once, vec![false, false]);
    assert_eq!(outputs_twice, outputs_once);
}

#[test]
fn abort_releases_waiting_shot_and_service_accepts_next() {
    let bench = Bench::start();
    bench.sim.bench.remove_reactions(OutputRole::RadPrepEnable);

    let handle = bench
        .service
        .dispatcher()
        .dispatch(Command::SingleShot)
        .unwrap();
    wait_for("rad-ready wait", LONG, || bench.ctx().status() == "Wait RadReady");

    bench
        .service
        .dispatcher()
        .dispatch(Command::Abort)
        .unwrap()
        .join()
        .unwrap()
        .unwrap();
    assert!(matches!(handle.join().unwrap(), Err(SequencerError::Aborted)));
    assert!(!bench.sim.bench.output(OutputRole::RadPrepEnable));
    assert_eq!(bench.ctx().status(), "Abort complete");

    // Rad-ready now arrives on its own; the next shot runs normally.
    bench.sim.bench.set_input(InputRole::RadReadyOut, true);
    bench.seq().single_shot().unwrap();
    assert_eq!(bench.ctx().state(), SequencerState::Idle);
}

#[test]
fn rad_ready_timeout_aborts_shot_with_lines_low() {
    let bench = Bench::start_with(|c| c.sequencer.timeouts.rad_ready_s = 0.1);
    bench.sim.bench.remove_reactions(OutputRole::RadPrepEnable);

    let err = bench.seq().single_shot().unwrap_err();
    assert!(matches!(
        err,
        SequencerError::ConfirmationTimeout {
            waiting_for: "rad-ready",
            ..
        }
    ));

    assert_eq!(bench.ctx().status(), "Abort complete");
    assert_eq!(bench.ctx().state(), SequencerState::Idle);
    assert!(!bench.ctx().is_cancelled());
    for role in [
        OutputRole::RadPrepEnable,
        OutputRole::ExposeEnable,
        OutputRole::ExposeTrigger,
        OutputRole::CameraTrigger,
    ] {
        assert!(!bench.sim.bench.output(role), "{role} left high");
    }
    assert_eq!(bench.asserted(OutputRole::ExposeTrigger), 0);
}

#[test]
fn expose_trigger_write_failure_aborts_shot() {
    let bench = Bench::start();
    bench.sim.bench.fail_writes(OutputRole::ExposeTrigger, true);

    let err = bench.seq().single_shot().unwrap_err();
    assert!(matches!(
        err,
        SequencerError::HardwareWrite {
            line: OutputRole::ExposeTrigger,
            ..
        }
    ));

    let texts: Vec<_> = bench.ctx().history().into_iter().map(|e| e.text).collect();
    assert!(texts.iter().any(|t| t == "ABORTING!"), "{texts:?}");
    assert_eq!(bench.ctx().status(), "Abort complete");
    assert_eq!(bench.ctx().state(), SequencerState::Idle);
    for role in [
        OutputRole::RadPrepEnable,
        OutputRole::ExposeEnable,
        OutputRole::ExposeTrigger,
        OutputRole::CameraTrigger,
    ] {
        assert!(!bench.sim.bench.output(role), "{role} left high");
    }

    // The line recovers and the next shot runs.
    bench.sim.bench.fail_writes(OutputRole::ExposeTrigger, false);
    bench.seq().single_shot().unwrap();
    assert_eq!(bench.asserted(OutputRole::ExposeTrigger), 1);
}
