//! Input sampler: batched reads, edge detection, publication.
//!
//! The sampler owns no sequencing knowledge. Each iteration reads every
//! monitored input in one driver transaction, compares the result with the
//! previous bundle, hands each edge to the registered [`EdgeSink`]s in line
//! order, then publishes the bundle plus per-line edge times.
//!
//! Two strategies share the loop:
//!
//! | Strategy | Wake-up | Use |
//! |----------|---------|-----|
//! | `Poll` | every `interval_us` | hardware without change notification |
//! | `ChangeDetection` | driver notifier, `change_wait_ms` fallback | hardware that signals changes |

use exsync_common::clock::Clock;
use exsync_common::config::{SamplerConfig, SamplerStrategy};
use exsync_common::consts::MAX_INPUT_LINES;
use exsync_common::hal::driver::HalError;
use exsync_common::hal::types::{ChangeNotifier, EdgeEvent, LineBundle};
use exsync_common::io::map::LineMap;
use exsync_common::io::role::InputRole;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::lines::SharedDriver;
use crate::rt;

/// Edges detected in one iteration.
pub type EdgeBatch = heapless::Vec<EdgeEvent, MAX_INPUT_LINES>;

/// Consumer of edge events, called on the sampler thread.
///
/// Implementations must return quickly; they run inside the sampling loop.
pub trait EdgeSink: Send + Sync {
    fn on_edge(&self, edge: &EdgeEvent, bundle: &LineBundle);
}

/// Every index-adjacent difference between two bundles, in line order.
pub fn detect_edges(previous: &LineBundle, current: &LineBundle) -> EdgeBatch {
    let mut edges = EdgeBatch::new();
    let changed = current.changed_since(previous);
    if changed == 0 {
        return edges;
    }
    for role in InputRole::ALL {
        if changed & (1 << role.index()) == 0 {
            continue;
        }
        let edge = EdgeEvent {
            line: role,
            previous: previous.get(role),
            current: current.get(role),
            at: current.at,
            seq: current.seq,
        };
        if edges.push(edge).is_err() {
            break;
        }
    }
    edges
}

// ─── LinePublisher ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct PublishedLines {
    latest: LineBundle,
    last_rise: [Option<Instant>; InputRole::COUNT],
    last_fall: [Option<Instant>; InputRole::COUNT],
    edges: u64,
}

/// Latest sample and transition times, readable from any thread.
#[derive(Debug)]
pub struct LinePublisher {
    state: RwLock<PublishedLines>,
}

impl LinePublisher {
    pub fn new(at: Instant) -> Self {
        Self {
            state: RwLock::new(PublishedLines {
                latest: LineBundle::empty(at),
                last_rise: [None; InputRole::COUNT],
                last_fall: [None; InputRole::COUNT],
                edges: 0,
            }),
        }
    }

    pub fn latest(&self) -> LineBundle {
        self.state.read().latest
    }

    #[inline]
    pub fn is_high(&self, role: InputRole) -> bool {
        self.state.read().latest.get(role)
    }

    /// Sequence number of the latest sample (0 before the first read).
    pub fn seq(&self) -> u64 {
        self.state.read().latest.seq
    }

    pub fn last_rise(&self, role: InputRole) -> Option<Instant> {
        self.state.read().last_rise[role.index()]
    }

    pub fn last_fall(&self, role: InputRole) -> Option<Instant> {
        self.state.read().last_fall[role.index()]
    }

    /// Total edges published.
    pub fn edge_count(&self) -> u64 {
        self.state.read().edges
    }

    pub fn publish(&self, bundle: LineBundle, edges: &[EdgeEvent]) {
        let mut state = self.state.write();
        for edge in edges {
            let slot = if edge.current {
                &mut state.last_rise
            } else {
                &mut state.last_fall
            };
            slot[edge.line.index()] = Some(edge.at);
        }
        state.edges += edges.len() as u64;
        state.latest = bundle;
    }
}

// ─── InputSampler ───────────────────────────────────────────────────

/// Sampler loop statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SamplerStats {
    pub iterations: u64,
    pub edges: u64,
    pub read_failures: u64,
    pub slow_iterations: u64,
    pub max_iteration: Duration,
    pub total_iteration: Duration,
}

impl SamplerStats {
    pub fn avg_iteration(&self) -> Duration {
        if self.iterations == 0 {
            Duration::ZERO
        } else {
            let nanos = self.total_iteration.as_nanos() / u128::from(self.iterations);
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        }
    }
}

/// Continuously samples the input bundle.
pub struct InputSampler {
    driver: SharedDriver,
    map: Arc<LineMap>,
    publisher: Arc<LinePublisher>,
    sinks: Vec<Arc<dyn EdgeSink>>,
    config: SamplerConfig,
    clock: Arc<dyn Clock>,
    running: Arc<AtomicBool>,
    previous: Option<LineBundle>,
    seq: u64,
    stats: SamplerStats,
}

impl InputSampler {
    pub fn new(
        driver: SharedDriver,
        map: Arc<LineMap>,
        publisher: Arc<LinePublisher>,
        config: SamplerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            driver,
            map,
            publisher,
            sinks: Vec::new(),
            config,
            clock,
            running: Arc::new(AtomicBool::new(true)),
            previous: None,
            seq: 0,
            stats: SamplerStats::default(),
        }
    }

    pub fn add_sink(&mut self, sink: Arc<dyn EdgeSink>) {
        self.sinks.push(sink);
    }

    /// Clearing the flag stops the loop after the current iteration.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn stats(&self) -> &SamplerStats {
        &self.stats
    }

    /// Read every monitored input as one transaction.
    pub fn sample(&mut self) -> Result<LineBundle, HalError> {
        let raw = self.driver.lock().read_inputs()?;
        let at = self.clock.now();
        self.seq += 1;
        Ok(self.map.bundle_from_raw(raw, at, self.seq))
    }

    /// One iteration: sample, detect, notify sinks, publish.
    ///
    /// The first successful sample only primes the comparison.
    /// Returns the number of edges emitted.
    pub fn step(&mut self) -> Result<usize, HalError> {
        let bundle = self.sample()?;
        let edges = match &self.previous {
            Some(previous) => detect_edges(previous, &bundle),
            None => EdgeBatch::new(),
        };
        // Sinks first: a waiter that sees the new level must also see
        // whatever the sinks recorded for it.
        for edge in &edges {
            for sink in &self.sinks {
                sink.on_edge(edge, &bundle);
            }
        }
        self.publisher.publish(bundle, &edges);
        self.previous = Some(bundle);
        self.stats.edges += edges.len() as u64;
        Ok(edges.len())
    }

    /// Run until the running flag is cleared.
    ///
    /// Read failures are logged and the next iteration retries; the driver is
    /// never reset from here.
    pub fn run(&mut self) {
        let notifier = self.resolve_notifier();
        info!(
            "Input sampler started ({:?}, interval={}us)",
            self.config.strategy, self.config.interval_us
        );

        let slow = self.config.slow_iteration();
        while self.running.load(Ordering::SeqCst) {
            let seen = notifier.as_ref().map(|n| n.generation());
            let started = self.clock.now();

            if let Err(e) = self.step() {
                self.stats.read_failures += 1;
                if rate_limited(self.stats.read_failures) {
                    warn!("Input read failure #{}: {}", self.stats.read_failures, e);
                }
            }

            let elapsed = self.clock.now().saturating_duration_since(started);
            self.stats.iterations += 1;
            self.stats.total_iteration += elapsed;
            self.stats.max_iteration = self.stats.max_iteration.max(elapsed);
            if elapsed > slow {
                self.stats.slow_iterations += 1;
                if rate_limited(self.stats.slow_iterations) {
                    warn!(
                        "Slow sampler iteration #{}: {}us (threshold {}us)",
                        self.stats.slow_iterations,
                        elapsed.as_micros(),
                        slow.as_micros()
                    );
                }
            }

            match (&notifier, seen) {
                (Some(n), Some(seen)) => {
                    n.wait_for_change(seen, self.config.change_wait());
                }
                _ => self.clock.sleep(self.config.interval()),
            }

            if self.stats.iterations % 100_000 == 0 {
                debug!(
                    "Sampler: {} iterations, avg={}us, max={}us, edges={}",
                    self.stats.iterations,
                    self.stats.avg_iteration().as_micros(),
                    self.stats.max_iteration.as_micros(),
                    self.stats.edges
                );
            }
        }

        info!(
            "Input sampler stopped after {} iterations (edges: {}, read failures: {}, slow: {})",
            self.stats.iterations,
            self.stats.edges,
            self.stats.read_failures,
            self.stats.slow_iterations
        );
    }

    fn resolve_notifier(&self) -> Option<Arc<ChangeNotifier>> {
        match self.config.strategy {
            SamplerStrategy::Poll => None,
            SamplerStrategy::ChangeDetection => {
                let notifier = self.driver.lock().change_notifier();
                if notifier.is_none() {
                    warn!("Driver has no change notification; falling back to polling");
                }
                notifier
            }
        }
    }

    /// Move the sampler onto its own thread.
    pub fn spawn(mut self) -> std::io::Result<SamplerHandle> {
        let running = self.running_flag();
        let (cpu, priority) = (self.config.cpu_core, self.config.rt_priority);
        let thread = std::thread::Builder::new()
            .name("exsync-sampler".to_string())
            .spawn(move || {
                if let Err(e) = rt::rt_setup(cpu, priority) {
                    error!("Sampler RT setup failed, continuing without: {e}");
                }
                self.run();
                self.stats
            })?;
        Ok(SamplerHandle {
            running,
            thread: Some(thread),
        })
    }
}

/// First 10 occurrences, then every 1000th.
fn rate_limited(count: u64) -> bool {
    count <= 10 || count % 1000 == 0
}

/// Handle to a running sampler thread. Dropping it stops the thread.
pub struct SamplerHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<SamplerStats>>,
}

impl SamplerHandle {
    /// Stop the loop and wait for the thread.
    pub fn stop(&mut self) -> Option<SamplerStats> {
        self.running.store(false, Ordering::SeqCst);
        let thread = self.thread.take()?;
        match thread.join() {
            Ok(stats) => Some(stats),
            Err(_) => {
                error!("Sampler thread panicked");
                None
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some() && self.running.load(Ordering::SeqCst)
    }
}

impl Drop for SamplerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::simulation::{SimBench, SimulationDriver};
    use exsync_common::clock::{ManualClock, SystemClock};
    use exsync_common::config::LinesConfig;
    use exsync_common::hal::driver::DioDriver;
    use exsync_common::io::role::OutputRole;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<EdgeEvent>>);

    impl EdgeSink for Collect {
        fn on_edge(&self, edge: &EdgeEvent, _bundle: &LineBundle) {
            self.0.lock().push(*edge);
        }
    }

    fn sampler_with(clock: Arc<dyn Clock>, config: SamplerConfig) -> (InputSampler, SimBench) {
        let lines = LinesConfig::default();
        let bench = SimBench::new(&lines, clock.clone()).unwrap();
        let mut driver = SimulationDriver::new(bench.clone());
        driver.init(&lines).unwrap();
        let driver: SharedDriver = Arc::new(parking_lot::Mutex::new(Box::new(driver)));
        let map = Arc::new(bench.line_map().clone());
        let publisher = Arc::new(LinePublisher::new(clock.now()));
        (
            InputSampler::new(driver, map, publisher, config, clock),
            bench,
        )
    }

    fn bundle(bits: u32, seq: u64) -> LineBundle {
        LineBundle::new(bits, 0b11_1111, Instant::now(), seq)
    }

    #[test]
    fn test_detect_edges_reports_each_changed_line() {
        let edges = detect_edges(&bundle(0b000101, 1), &bundle(0b100100, 2));
        let lines: Vec<_> = edges.iter().map(|e| (e.line, e.previous, e.current)).collect();
        assert_eq!(
            lines,
            vec![
                (InputRole::RadPrepOut, true, false),
                (InputRole::CameraExposing, false, true),
            ]
        );
        assert!(detect_edges(&bundle(0b1, 1), &bundle(0b1, 2)).is_empty());
    }

    #[test]
    fn test_first_sample_primes_without_edges() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        let (mut sampler, _bench) = sampler_with(clock, SamplerConfig::default());
        // CameraTriggerReady is high at power-up; not an edge.
        assert_eq!(sampler.step().unwrap(), 0);
        assert!(sampler.publisher.is_high(InputRole::CameraTriggerReady));
        assert_eq!(sampler.publisher.seq(), 1);
    }

    #[test]
    fn test_edges_are_published_and_forwarded() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        let (mut sampler, bench) = sampler_with(clock, SamplerConfig::default());
        let sink = Arc::new(Collect::default());
        sampler.add_sink(sink.clone());

        sampler.step().unwrap();
        bench.set_input(InputRole::RadReadyOut, true);
        assert_eq!(sampler.step().unwrap(), 1);
        bench.set_input(InputRole::RadReadyOut, false);
        assert_eq!(sampler.step().unwrap(), 1);

        let seen = sink.0.lock().clone();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].is_rising() && seen[1].is_falling());
        assert!(sampler.publisher.last_rise(InputRole::RadReadyOut).is_some());
        assert!(sampler.publisher.last_fall(InputRole::RadReadyOut).is_some());
        assert_eq!(sampler.publisher.edge_count(), 2);
    }

    #[test]
    fn test_edge_stream_matches_adjacent_differences() {
        let manual = Arc::new(ManualClock::new());
        let clock: Arc<dyn Clock> = manual.clone();
        let (mut sampler, bench) = sampler_with(clock, SamplerConfig::default());
        let sink = Arc::new(Collect::default());
        sampler.add_sink(sink.clone());

        // Deterministic pseudo-random stream over two lines.
        let mut state = 0x2545_f491_u32;
        let mut stream = Vec::new();
        for _ in 0..200 {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            stream.push((state & 1 != 0, state & 2 != 0));
        }

        bench.set_input(InputRole::ExposeOut, false);
        bench.set_input(InputRole::FluoroOut, false);
        sampler.step().unwrap();
        let mut expected = 0;
        let mut prev = (false, false);
        for &(a, b) in &stream {
            manual.advance(Duration::from_micros(100));
            bench.set_input(InputRole::ExposeOut, a);
            bench.set_input(InputRole::FluoroOut, b);
            sampler.step().unwrap();
            expected += usize::from(a != prev.0) + usize::from(b != prev.1);
            prev = (a, b);
        }

        let edges = sink.0.lock().clone();
        assert_eq!(edges.len(), expected);
        for line in [InputRole::ExposeOut, InputRole::FluoroOut] {
            let per_line: Vec<_> = edges.iter().filter(|e| e.line == line).collect();
            for pair in per_line.windows(2) {
                assert!(pair[0].at <= pair[1].at);
                assert_eq!(pair[0].current, pair[1].previous);
            }
        }
    }

    #[test]
    fn test_read_failure_does_not_stop_the_loop() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let config = SamplerConfig {
            interval_us: 100,
            ..SamplerConfig::default()
        };
        let (sampler, bench) = sampler_with(clock, config);
        let publisher = Arc::clone(&sampler.publisher);
        bench.fail_next_reads(5);

        let mut handle = sampler.spawn().unwrap();
        std::thread::sleep(Duration::from_millis(30));
        bench.set_input(InputRole::RadReadyOut, true);
        std::thread::sleep(Duration::from_millis(30));
        let stats = handle.stop().unwrap();

        assert_eq!(stats.read_failures, 5);
        assert!(stats.iterations > 5);
        assert!(publisher.is_high(InputRole::RadReadyOut));
    }

    #[test]
    fn test_change_detection_strategy_follows_notifier() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let config = SamplerConfig {
            strategy: SamplerStrategy::ChangeDetection,
            change_wait_ms: 50,
            ..SamplerConfig::default()
        };
        let (sampler, bench) = sampler_with(clock, config);
        let publisher = Arc::clone(&sampler.publisher);
        let mut handle = sampler.spawn().unwrap();

        std::thread::sleep(Duration::from_millis(20));
        bench.set_input(InputRole::CameraExposing, true);
        let deadline = Instant::now() + Duration::from_secs(2);
        while !publisher.is_high(InputRole::CameraExposing) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(publisher.is_high(InputRole::CameraExposing));
        let stats = handle.stop().unwrap();
        // Blocking on the notifier keeps the iteration count low.
        assert!(stats.iterations < 200);
    }

    #[test]
    fn test_linked_reaction_is_seen_through_driver_writes() {
        let manual = Arc::new(ManualClock::new());
        let clock: Arc<dyn Clock> = manual.clone();
        let (mut sampler, bench) = sampler_with(clock, SamplerConfig::default());
        sampler.step().unwrap();

        let ch = bench.line_map().output_channel(OutputRole::RadPrepEnable).unwrap();
        sampler.driver.lock().write_output(ch, true).unwrap();
        manual.advance(Duration::from_millis(60));
        sampler.step().unwrap();
        assert!(sampler.publisher.is_high(InputRole::RadReadyOut));
        assert!(sampler.publisher.is_high(InputRole::RadPrepOut));
    }

    #[test]
    fn test_rate_limit_pattern() {
        assert!(rate_limited(1));
        assert!(rate_limited(10));
        assert!(!rate_limited(11));
        assert!(rate_limited(2000));
    }
}
