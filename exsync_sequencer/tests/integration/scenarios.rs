//! Integration test: end-to-end exposure scenarios.
//!
//! 1. Rad-ready arriving late unblocks preparation within one poll interval
//! 2. An abort before expose-out rises leaves no exposure on record
//! 3. Camera-to-generator delay holds on the wire

use exsync_common::io::role::{InputRole, OutputRole};
use exsync_sequencer::{Command, CommandReply, SequencerError, SequencerState};
use std::thread;
use std::time::{Duration, Instant};

use super::common::{Bench, wait_for};

const LONG: Duration = Duration::from_secs(5);

#[test]
fn late_rad_ready_unblocks_prepare_within_poll_interval() {
    let poll = Duration::from_millis(10);
    let bench = Bench::start_with(|c| c.sequencer.poll_interval_us = 10_000);
    bench.sim.bench.remove_reactions(OutputRole::RadPrepEnable);

    let handle = bench
        .service
        .dispatcher()
        .dispatch(Command::Prepare)
        .unwrap();
    wait_for("preparing", LONG, || {
        bench.ctx().state() == SequencerState::PreparingGenerator
    });
    thread::sleep(Duration::from_millis(30));
    assert_eq!(bench.ctx().state(), SequencerState::PreparingGenerator);
    assert_eq!(bench.ctx().status(), "Wait RadReady");

    let fed = Instant::now();
    bench.sim.bench.set_input(InputRole::RadReadyOut, true);
    let reply = handle.join().unwrap();
    assert!(matches!(reply, Ok(CommandReply::Done)));

    let (_, reached) = bench
        .ctx()
        .transitions()
        .into_iter()
        .find(|(s, _)| *s == SequencerState::AwaitingCamera)
        .unwrap();
    let latency = reached.saturating_duration_since(fed);
    // One poll interval plus sampler period and scheduling slack.
    assert!(
        latency <= poll + Duration::from_millis(10),
        "AwaitingCamera after {latency:?}"
    );
    assert!(bench.sim.bench.output(OutputRole::ExposeEnable));
    assert_eq!(bench.ctx().status(), "Generator ready");
}

#[test]
fn abort_before_expose_out_records_no_exposure() {
    let bench = Bench::start();
    bench.sim.bench.remove_reactions(OutputRole::ExposeTrigger);
    let state_file = bench.service.config().persistence.state_file.clone();
    let before = bench.service.exposures().last_exposure();

    let handle = bench
        .service
        .dispatcher()
        .dispatch(Command::SingleShot)
        .unwrap();
    wait_for("expose trigger", LONG, || {
        bench.sim.bench.output(OutputRole::ExposeTrigger)
    });
    assert_eq!(bench.ctx().state(), SequencerState::Exposing);

    bench.service.abort_controller().request_abort();
    let result = handle.join().unwrap();

    assert!(matches!(result, Err(SequencerError::Aborted)));
    assert!(!bench.sim.bench.output(OutputRole::ExposeEnable));
    assert!(!bench.sim.bench.output(OutputRole::ExposeTrigger));
    assert!(!bench.sim.bench.output(OutputRole::RadPrepEnable));
    assert_eq!(bench.ctx().state(), SequencerState::Idle);
    assert!(bench.service.exposures().pending().is_none());
    assert_eq!(bench.service.exposures().last_exposure(), before);
    assert!(!state_file.exists());
}

#[test]
fn generator_trigger_follows_camera_by_gen_delay() {
    let bench = Bench::start_with(|c| c.sequencer.gen_delay_ms = 20.0);
    bench.seq().single_shot().unwrap();

    let writes = bench.sim.bench.writes();
    let rise = |role| {
        writes
            .iter()
            .find(|w| w.role == Some(role) && w.value)
            .map(|w| w.at)
            .unwrap()
    };
    let gap = rise(OutputRole::ExposeTrigger) - rise(OutputRole::CameraTrigger);
    let delay = Duration::from_millis(20);
    assert!(gap >= delay, "generator triggered early: {gap:?}");
    assert!(gap <= delay + Duration::from_millis(5), "jitter too large: {gap:?}");
}

#[test]
fn single_shot_completes_full_cycle() {
    let bench = Bench::start();
    bench.seq().single_shot().unwrap();

    let states: Vec<_> = bench
        .ctx()
        .transitions()
        .into_iter()
        .map(|(s, _)| s)
        .collect();
    assert_eq!(
        states,
        vec![
            SequencerState::PreparingGenerator,
            SequencerState::AwaitingCamera,
            SequencerState::Exposing,
            SequencerState::Finalizing,
            SequencerState::Idle,
        ]
    );
    for role in [
        OutputRole::RadPrepEnable,
        OutputRole::ExposeEnable,
        OutputRole::CameraTrigger,
        OutputRole::ExposeTrigger,
    ] {
        assert!(!bench.sim.bench.output(role), "{role} left high");
    }
    assert!(bench.service.config().persistence.state_file.exists());
}
