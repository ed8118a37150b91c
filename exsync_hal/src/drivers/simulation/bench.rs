//! Simulated generator/camera wiring.
//!
//! The bench keeps channel-level input and output state and a queue of
//! pending input changes produced by linked reactions. Pending changes are
//! applied lazily, whenever the bench is read or written.

use exsync_common::clock::Clock;
use exsync_common::config::LinesConfig;
use exsync_common::hal::driver::HalError;
use exsync_common::hal::types::ChangeNotifier;
use exsync_common::io::map::LineMap;
use exsync_common::io::role::{InputRole, OutputRole};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Input change queued by a linked reaction.
#[derive(Debug, Clone)]
struct PendingInputChange {
    due: Instant,
    /// Output channel whose edge queued the change.
    source: u16,
    channel: u16,
    value: bool,
}

/// Reaction resolved to channels.
#[derive(Debug, Clone)]
struct Reaction {
    output: u16,
    trigger: bool,
    delay: Duration,
    input: u16,
    result: bool,
}

/// One output write as seen by the bench.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRecord {
    pub channel: u16,
    pub role: Option<OutputRole>,
    pub value: bool,
    pub at: Instant,
}

#[derive(Debug)]
struct BenchState {
    inputs: u32,
    outputs: u32,
    reactions: Vec<Reaction>,
    pending: VecDeque<PendingInputChange>,
    writes: Vec<WriteRecord>,
    failing_writes: u32,
    failing_reads: u32,
}

impl BenchState {
    /// Apply every pending change due at `now`. Returns true if an input moved.
    fn apply_due(&mut self, now: Instant) -> bool {
        let mut moved = false;
        while let Some(front) = self.pending.front() {
            if front.due > now {
                break;
            }
            let Some(change) = self.pending.pop_front() else {
                break;
            };
            let old = self.inputs & (1 << change.channel) != 0;
            set_bit(&mut self.inputs, change.channel, change.value);
            if old != change.value {
                moved = true;
                debug!(
                    "DI[{}] changed: {} -> {}",
                    change.channel,
                    on_off(old),
                    on_off(change.value)
                );
            }
        }
        moved
    }

    /// Queue the reactions an output edge fires, superseding older changes
    /// queued by the same output.
    fn handle_output_edge(&mut self, channel: u16, value: bool, now: Instant) {
        self.pending.retain(|p| p.source != channel);
        for reaction in self.reactions.iter().filter(|r| r.output == channel) {
            if reaction.trigger != value {
                continue;
            }
            let change = PendingInputChange {
                due: now + reaction.delay,
                source: channel,
                channel: reaction.input,
                value: reaction.result,
            };
            trace!(
                "DO[{}] {} -> queued DI[{}] = {} in {:?}",
                channel,
                on_off(value),
                reaction.input,
                on_off(reaction.result),
                reaction.delay
            );
            let at = self.pending.partition_point(|p| p.due <= change.due);
            self.pending.insert(at, change);
        }
    }
}

/// Shared handle to a simulated bench.
///
/// Cloning is cheap; every clone addresses the same bench.
#[derive(Clone)]
pub struct SimBench {
    map: Arc<LineMap>,
    state: Arc<Mutex<BenchState>>,
    notifier: Arc<ChangeNotifier>,
    clock: Arc<dyn Clock>,
}

impl SimBench {
    /// Build a bench from the `[lines]` section.
    ///
    /// # Errors
    /// Returns `HalError::ConfigError` if the wiring does not validate.
    pub fn new(config: &LinesConfig, clock: Arc<dyn Clock>) -> Result<Self, HalError> {
        let map = LineMap::from_config(config).map_err(|e| HalError::ConfigError(e.to_string()))?;

        let mut inputs = 0u32;
        for line in &config.inputs {
            set_bit(&mut inputs, line.channel, line.initial);
        }

        let mut reactions = Vec::new();
        for output in &config.outputs {
            for linked in &output.linked_inputs {
                let input = map.input_channel(linked.input).ok_or_else(|| {
                    HalError::ConfigError(format!(
                        "linked input '{}' on '{}' is not bound",
                        linked.input, output.role
                    ))
                })?;
                let delay = linked.delay().ok_or_else(|| {
                    HalError::ConfigError(format!(
                        "linked input delay on '{}' out of range (got {})",
                        output.role, linked.delay_s
                    ))
                })?;
                reactions.push(Reaction {
                    output: output.channel,
                    trigger: linked.trigger,
                    delay,
                    input,
                    result: linked.result,
                });
            }
        }

        debug!(
            "SimBench initialized: {} inputs, {} outputs, {} linked reactions",
            config.inputs.len(),
            config.outputs.len(),
            reactions.len()
        );

        Ok(Self {
            map: Arc::new(map),
            state: Arc::new(Mutex::new(BenchState {
                inputs,
                outputs: 0,
                reactions,
                pending: VecDeque::new(),
                writes: Vec::new(),
                failing_writes: 0,
                failing_reads: 0,
            })),
            notifier: Arc::new(ChangeNotifier::new()),
            clock,
        })
    }

    pub fn line_map(&self) -> &LineMap {
        &self.map
    }

    pub fn notifier(&self) -> Arc<ChangeNotifier> {
        Arc::clone(&self.notifier)
    }

    /// Drive an input as the generator or camera would.
    ///
    /// Unbound roles are ignored.
    pub fn set_input(&self, role: InputRole, value: bool) {
        let Some(channel) = self.map.input_channel(role) else {
            return;
        };
        let moved = {
            let mut state = self.state.lock();
            state.apply_due(self.clock.now());
            let old = state.inputs & (1 << channel) != 0;
            set_bit(&mut state.inputs, channel, value);
            old != value
        };
        if moved {
            self.notifier.notify();
        }
    }

    /// Current input level, after applying due reactions.
    pub fn input(&self, role: InputRole) -> bool {
        let Some(channel) = self.map.input_channel(role) else {
            return false;
        };
        self.settle();
        self.state.lock().inputs & (1 << channel) != 0
    }

    /// Last level written to an output.
    pub fn output(&self, role: OutputRole) -> bool {
        let Some(channel) = self.map.output_channel(role) else {
            return false;
        };
        self.state.lock().outputs & (1 << channel) != 0
    }

    /// Apply every due reaction now.
    pub fn settle(&self) {
        let moved = self.state.lock().apply_due(self.clock.now());
        if moved {
            self.notifier.notify();
        }
    }

    pub fn pending_changes(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Every write since construction or the last [`clear_writes`](Self::clear_writes).
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.state.lock().writes.clone()
    }

    /// Writes to one role, in order.
    pub fn writes_to(&self, role: OutputRole) -> Vec<WriteRecord> {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|w| w.role == Some(role))
            .copied()
            .collect()
    }

    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    /// Make writes to `role` fail (or succeed again).
    pub fn fail_writes(&self, role: OutputRole, fail: bool) {
        if let Some(channel) = self.map.output_channel(role) {
            set_bit(&mut self.state.lock().failing_writes, channel, fail);
        }
    }

    /// Make the next `count` batched reads fail.
    pub fn fail_next_reads(&self, count: u32) {
        self.state.lock().failing_reads = count;
    }

    /// Drop the linked reactions of one output, e.g. a generator that never
    /// answers the expose trigger.
    pub fn remove_reactions(&self, role: OutputRole) {
        if let Some(channel) = self.map.output_channel(role) {
            let mut state = self.state.lock();
            state.reactions.retain(|r| r.output != channel);
            state.pending.retain(|p| p.source != channel);
        }
    }

    pub(crate) fn read_raw(&self) -> Result<u32, HalError> {
        let (result, moved) = {
            let mut state = self.state.lock();
            if state.failing_reads > 0 {
                state.failing_reads -= 1;
                return Err(HalError::CommunicationError(
                    "simulated input port read failure".to_string(),
                ));
            }
            let moved = state.apply_due(self.clock.now());
            (state.inputs, moved)
        };
        if moved {
            self.notifier.notify();
        }
        Ok(result)
    }

    pub(crate) fn write_raw(&self, channel: u16, value: bool) -> Result<(), HalError> {
        let now = self.clock.now();
        let moved = {
            let mut state = self.state.lock();
            if state.failing_writes & (1 << channel) != 0 {
                return Err(HalError::CommunicationError(format!(
                    "simulated write failure on DO[{channel}]"
                )));
            }
            let previous = state.outputs & (1 << channel) != 0;
            set_bit(&mut state.outputs, channel, value);
            state.writes.push(WriteRecord {
                channel,
                role: self.map.output_role(channel),
                value,
                at: now,
            });
            if previous != value {
                state.handle_output_edge(channel, value, now);
            }
            state.apply_due(now)
        };
        if moved {
            self.notifier.notify();
        }
        Ok(())
    }
}

impl std::fmt::Debug for SimBench {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SimBench")
            .field("inputs", &format_args!("{:#010b}", state.inputs))
            .field("outputs", &format_args!("{:#010b}", state.outputs))
            .field("pending", &state.pending.len())
            .finish()
    }
}

fn set_bit(bits: &mut u32, channel: u16, value: bool) {
    if value {
        *bits |= 1 << channel;
    } else {
        *bits &= !(1 << channel);
    }
}

fn on_off(value: bool) -> &'static str {
    if value { "ON" } else { "OFF" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exsync_common::clock::ManualClock;

    fn bench() -> (SimBench, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let bench = SimBench::new(&LinesConfig::default(), clock.clone()).unwrap();
        (bench, clock)
    }

    fn write(bench: &SimBench, role: OutputRole, value: bool) {
        let channel = bench.line_map().output_channel(role).unwrap();
        bench.write_raw(channel, value).unwrap();
    }

    #[test]
    fn test_initial_inputs_follow_config() {
        let (bench, _) = bench();
        assert!(bench.input(InputRole::CameraTriggerReady));
        assert!(!bench.input(InputRole::RadReadyOut));
    }

    #[test]
    fn test_linked_reaction_fires_after_delay() {
        let (bench, clock) = bench();
        write(&bench, OutputRole::RadPrepEnable, true);
        assert!(bench.input(InputRole::RadPrepOut));
        assert!(!bench.input(InputRole::RadReadyOut));

        clock.advance(Duration::from_millis(49));
        assert!(!bench.input(InputRole::RadReadyOut));
        clock.advance(Duration::from_millis(1));
        assert!(bench.input(InputRole::RadReadyOut));
    }

    #[test]
    fn test_reactions_fire_on_edges_only() {
        let (bench, _) = bench();
        write(&bench, OutputRole::RadPrepEnable, true);
        let queued = bench.pending_changes();
        write(&bench, OutputRole::RadPrepEnable, true);
        assert_eq!(bench.pending_changes(), queued);
        assert_eq!(bench.writes_to(OutputRole::RadPrepEnable).len(), 2);
    }

    #[test]
    fn test_falling_edge_supersedes_pending_rise() {
        let (bench, clock) = bench();
        write(&bench, OutputRole::RadPrepEnable, true);
        write(&bench, OutputRole::RadPrepEnable, false);
        clock.advance(Duration::from_millis(100));
        assert!(!bench.input(InputRole::RadReadyOut));
        assert!(!bench.input(InputRole::RadPrepOut));
    }

    #[test]
    fn test_expose_trigger_produces_a_pulse() {
        let (bench, clock) = bench();
        write(&bench, OutputRole::ExposeTrigger, true);
        clock.advance(Duration::from_millis(5));
        assert!(bench.input(InputRole::ExposeOut));
        clock.advance(Duration::from_millis(100));
        assert!(!bench.input(InputRole::ExposeOut));
    }

    #[test]
    fn test_out_of_range_delay_rejected() {
        let mut config = LinesConfig::default();
        config.outputs[0].linked_inputs[1].delay_s = 1e20;
        let clock = Arc::new(ManualClock::new());
        assert!(matches!(
            SimBench::new(&config, clock),
            Err(HalError::ConfigError(_))
        ));
    }

    #[test]
    fn test_camera_integration_outlasts_generator_pulse() {
        let (bench, clock) = bench();
        write(&bench, OutputRole::CameraTrigger, true);
        write(&bench, OutputRole::ExposeTrigger, true);
        clock.advance(Duration::from_millis(110));
        assert!(!bench.input(InputRole::ExposeOut));
        assert!(bench.input(InputRole::CameraExposing));
        clock.advance(Duration::from_millis(40));
        assert!(!bench.input(InputRole::CameraExposing));
    }

    #[test]
    fn test_injected_failures() {
        let (bench, _) = bench();
        bench.fail_next_reads(1);
        assert!(bench.read_raw().is_err());
        assert!(bench.read_raw().is_ok());

        bench.fail_writes(OutputRole::ExposeEnable, true);
        let channel = bench.line_map().output_channel(OutputRole::ExposeEnable).unwrap();
        assert!(matches!(
            bench.write_raw(channel, true),
            Err(HalError::CommunicationError(_))
        ));
        assert!(!bench.output(OutputRole::ExposeEnable));
    }

    #[test]
    fn test_input_changes_bump_notifier() {
        let (bench, _) = bench();
        let before = bench.notifier().generation();
        bench.set_input(InputRole::RadReadyOut, true);
        assert_eq!(bench.notifier().generation(), before + 1);
        bench.set_input(InputRole::RadReadyOut, true);
        assert_eq!(bench.notifier().generation(), before + 1);
    }

    #[test]
    fn test_removed_reactions_never_fire() {
        let (bench, clock) = bench();
        bench.remove_reactions(OutputRole::ExposeTrigger);
        write(&bench, OutputRole::ExposeTrigger, true);
        clock.advance(Duration::from_secs(1));
        assert!(!bench.input(InputRole::ExposeOut));
    }
}
