//! Integration test: console command surface, warm-up and power.

use exsync_common::config::{FocusSize, WarmUpPreset, WarmUpStep};
use exsync_common::io::role::{InputRole, OutputRole};
use exsync_sequencer::{Command, CommandReply, CurrentFunction, SequencerError, SequencerState};

use super::common::Bench;

fn run(bench: &Bench, line: &str) -> Result<CommandReply, SequencerError> {
    let command: Command = line.parse().unwrap();
    bench
        .service
        .dispatcher()
        .dispatch(command)
        .unwrap()
        .join()
        .unwrap()
}

#[test]
fn console_words_drive_manual_lines() {
    let bench = Bench::start();
    run(&bench, "radprep on").unwrap();
    assert!(bench.sim.bench.output(OutputRole::RadPrepEnable));
    super::common::wait_for("rad prep out", std::time::Duration::from_secs(1), || {
        bench.service.inputs().is_high(InputRole::RadPrepOut)
    });

    run(&bench, "expose on").unwrap();
    assert!(bench.sim.bench.output(OutputRole::ExposeEnable));
    run(&bench, "fluoro on").unwrap();
    assert!(bench.sim.bench.output(OutputRole::FluoroEnable));

    run(&bench, "fluoro off").unwrap();
    run(&bench, "expose off").unwrap();
    run(&bench, "radprep off").unwrap();
    for role in [
        OutputRole::RadPrepEnable,
        OutputRole::ExposeEnable,
        OutputRole::FluoroEnable,
    ] {
        assert!(!bench.sim.bench.output(role));
    }

    match run(&bench, "status").unwrap() {
        CommandReply::Status(snapshot) => {
            assert_eq!(snapshot.state, SequencerState::Idle);
            assert_eq!(snapshot.function, CurrentFunction::Manual);
            assert!(!snapshot.seq_in_progress);
        }
        CommandReply::Done => panic!("status returned no snapshot"),
    }
}

#[test]
fn warmup_command_runs_configured_preset() {
    let bench = Bench::start_with(|c| {
        c.sequencer.param_settle_ms = 5;
        c.warmup.short = WarmUpPreset {
            steps: vec![WarmUpStep::new(70.0, 15.0, 50.0, 2, 0.02)],
            start_focus: None,
            end_focus: Some(FocusSize::Small),
            step_pause_ms: 10,
        };
    });
    run(&bench, "warmup").unwrap();

    assert_eq!(bench.asserted(OutputRole::ExposeTrigger), 2);
    assert_eq!(bench.asserted(OutputRole::CameraTrigger), 0);
    assert_eq!(bench.sim.generator.settings().kvp, 70.0);
    assert_eq!(bench.ctx().status(), "Warm-Up complete");
    assert!(!bench.sim.bench.output(OutputRole::RadPrepEnable));
}

#[test]
fn power_commands_pulse_lines() {
    let bench = Bench::start_with(|c| {
        c.sequencer.pulse_width_ms = 20;
        c.sequencer.power_on_settle_ms = 10;
    });
    run(&bench, "poweron").unwrap();
    run(&bench, "poweroff").unwrap();

    for role in [OutputRole::PowerOnPulse, OutputRole::PowerOffPulse] {
        let levels: Vec<_> = bench
            .sim
            .bench
            .writes_to(role)
            .iter()
            .map(|w| w.value)
            .collect();
        assert_eq!(levels, vec![true, false], "{role}");
    }
    assert_eq!(bench.sim.generator.refresh_count(), 1);
    assert_eq!(bench.ctx().status(), "Generator off");
}
