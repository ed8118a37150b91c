//! Operator command surface.
//!
//! Each command maps onto one sequencer, warm-up, power or abort entry
//! point. [`CommandDispatcher::dispatch`] runs every command on its own
//! thread so a blocking sequence never holds up an abort.

use core::fmt;
use core::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

use crate::abort::AbortController;
use crate::context::ContextSnapshot;
use crate::error::SequencerError;
use crate::power::PowerSwitch;
use crate::sequencer::ExposureSequencer;
use crate::warmup::{WarmUpKind, WarmUpPlanner};

/// One operator command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    RadPrep(bool),
    Expose(bool),
    Fluoro(bool),
    CameraTrigger(bool),
    ExposeTrigger(bool),
    Prepare,
    SingleShot,
    ScanShot,
    WarmUp,
    FullWarmUp,
    Abort,
    PowerOn,
    PowerOff,
    Status,
}

impl Command {
    /// Console words, for help output.
    pub const USAGE: &'static str = "radprep on|off, expose on|off, fluoro on|off, \
        camtrig on|off, exptrig on|off, prepare, single, scan, warmup, fullwarmup, \
        abort, poweron, poweroff, status";

    pub const fn name(self) -> &'static str {
        match self {
            Self::RadPrep(_) => "RadPrep",
            Self::Expose(_) => "Expose",
            Self::Fluoro(_) => "Fluoro",
            Self::CameraTrigger(_) => "CameraTrigger",
            Self::ExposeTrigger(_) => "ExposeTrigger",
            Self::Prepare => "Prepare",
            Self::SingleShot => "SingleShot",
            Self::ScanShot => "ScanShot",
            Self::WarmUp => "WarmUp",
            Self::FullWarmUp => "FullWarmUp",
            Self::Abort => "Abort",
            Self::PowerOn => "PowerOn",
            Self::PowerOff => "PowerOff",
            Self::Status => "Status",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RadPrep(on)
            | Self::Expose(on)
            | Self::Fluoro(on)
            | Self::CameraTrigger(on)
            | Self::ExposeTrigger(on) => {
                write!(f, "{} {}", self.name(), if *on { "on" } else { "off" })
            }
            _ => f.write_str(self.name()),
        }
    }
}

fn parse_level(word: Option<&str>, line: &str) -> Result<bool, String> {
    match word {
        Some("on" | "1" | "true") => Ok(true),
        Some("off" | "0" | "false") => Ok(false),
        _ => Err(format!("expected on/off: {line:?}")),
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s.trim().to_ascii_lowercase();
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Err("empty command".to_string());
        };
        let arg = words.next();
        if words.next().is_some() {
            return Err(format!("too many arguments: {line:?}"));
        }
        let bare = |cmd: Command| match arg {
            None => Ok(cmd),
            Some(_) => Err(format!("{head} takes no argument")),
        };
        match head {
            "radprep" => parse_level(arg, &line).map(Self::RadPrep),
            "expose" => parse_level(arg, &line).map(Self::Expose),
            "fluoro" => parse_level(arg, &line).map(Self::Fluoro),
            "camtrig" => parse_level(arg, &line).map(Self::CameraTrigger),
            "exptrig" => parse_level(arg, &line).map(Self::ExposeTrigger),
            "prepare" => bare(Self::Prepare),
            "single" => bare(Self::SingleShot),
            "scan" => bare(Self::ScanShot),
            "warmup" => bare(Self::WarmUp),
            "fullwarmup" => bare(Self::FullWarmUp),
            "abort" => bare(Self::Abort),
            "poweron" => bare(Self::PowerOn),
            "poweroff" => bare(Self::PowerOff),
            "status" => bare(Self::Status),
            _ => Err(format!("unknown command: {head:?}")),
        }
    }
}

/// Result of a completed command.
#[derive(Debug)]
pub enum CommandReply {
    Done,
    Status(ContextSnapshot),
}

pub struct CommandDispatcher {
    seq: Arc<ExposureSequencer>,
    warmup: Arc<WarmUpPlanner>,
    power: Arc<PowerSwitch>,
    abort: Arc<AbortController>,
    issued: AtomicU64,
}

impl CommandDispatcher {
    pub fn new(
        seq: Arc<ExposureSequencer>,
        warmup: Arc<WarmUpPlanner>,
        power: Arc<PowerSwitch>,
        abort: Arc<AbortController>,
    ) -> Self {
        Self {
            seq,
            warmup,
            power,
            abort,
            issued: AtomicU64::new(0),
        }
    }

    /// Run `command` on the calling thread.
    pub fn execute(&self, command: Command) -> Result<CommandReply, SequencerError> {
        debug!("Executing {command}");
        let seq = &self.seq;
        match command {
            Command::RadPrep(on) => seq.manual_rad_prep(on),
            Command::Expose(on) => seq.manual_expose(on),
            Command::Fluoro(on) => seq.manual_fluoro(on),
            Command::CameraTrigger(on) => seq.manual_camera_trigger(on),
            Command::ExposeTrigger(on) => seq.manual_expose_trigger(on),
            Command::Prepare => seq.prepare(),
            Command::SingleShot => seq.single_shot(),
            Command::ScanShot => seq.scan_shot(),
            Command::WarmUp => self.warmup.run(WarmUpKind::Short),
            Command::FullWarmUp => self.warmup.run(WarmUpKind::Full),
            Command::Abort => {
                self.abort.request_abort();
                Ok(())
            }
            Command::PowerOn => self.power.power_on(),
            Command::PowerOff => self.power.power_off(),
            Command::Status => return Ok(CommandReply::Status(seq.context().snapshot())),
        }
        .map(|()| CommandReply::Done)
    }

    /// Run `command` on a new thread.
    pub fn dispatch(
        self: &Arc<Self>,
        command: Command,
    ) -> std::io::Result<JoinHandle<Result<CommandReply, SequencerError>>> {
        let n = self.issued.fetch_add(1, Ordering::Relaxed);
        info!("Command #{n}: {command}");
        let this = Arc::clone(self);
        std::thread::Builder::new()
            .name(format!("exsync-cmd-{n}"))
            .spawn(move || {
                let result = this.execute(command);
                match &result {
                    Ok(_) => debug!("{command} finished"),
                    Err(e) => warn!("{command} failed: {e}"),
                }
                result
            })
    }

    pub fn sequencer(&self) -> &Arc<ExposureSequencer> {
        &self.seq
    }
}
