//! Line sample and edge types shared by the sampler and the sequencer.

use bitflags::bitflags;
use parking_lot::{Condvar, Mutex};
use static_assertions::const_assert;
use std::time::{Duration, Instant};

use crate::consts::{MAX_INPUT_LINES, MAX_OUTPUT_LINES};
use crate::io::role::{InputRole, OutputRole};

const_assert!(InputRole::COUNT <= MAX_INPUT_LINES);
const_assert!(MAX_INPUT_LINES <= u32::BITS as usize);
const_assert!(OutputRole::COUNT <= MAX_OUTPUT_LINES);
const_assert!(MAX_OUTPUT_LINES <= u16::BITS as usize);

// ─── LineBundle ─────────────────────────────────────────────────────

/// One atomic sample of every monitored input line.
///
/// Bit `i` holds [`InputRole::ALL`]`[i]`. Always paired with the monotonic
/// instant of the read that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineBundle {
    bits: u32,
    bound: u32,
    /// Monotonic time of the hardware read.
    pub at: Instant,
    /// Sample sequence number (0 = never sampled).
    pub seq: u64,
}

impl LineBundle {
    pub const fn new(bits: u32, bound: u32, at: Instant, seq: u64) -> Self {
        Self {
            bits: bits & bound,
            bound,
            at,
            seq,
        }
    }

    /// Placeholder published before the first read; every line reads low.
    pub const fn empty(at: Instant) -> Self {
        Self::new(0, 0, at, 0)
    }

    #[inline]
    pub const fn get(&self, role: InputRole) -> bool {
        self.bits & (1 << role.index()) != 0
    }

    #[inline]
    pub const fn bits(&self) -> u32 {
        self.bits
    }

    /// Mask of the roles bound to a channel.
    #[inline]
    pub const fn bound(&self) -> u32 {
        self.bound
    }

    /// Roles whose value differs from `previous`.
    #[inline]
    pub const fn changed_since(&self, previous: &LineBundle) -> u32 {
        (self.bits ^ previous.bits) & self.bound
    }

    /// Bound roles with their values, in bundle order.
    pub fn iter(&self) -> impl Iterator<Item = (InputRole, bool)> + '_ {
        InputRole::ALL
            .into_iter()
            .filter(|r| self.bound & (1 << r.index()) != 0)
            .map(|r| (r, self.get(r)))
    }
}

// ─── EdgeEvent ──────────────────────────────────────────────────────

/// A single line transition between two consecutive samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeEvent {
    pub line: InputRole,
    pub previous: bool,
    pub current: bool,
    /// Instant of the sample that observed the new value.
    pub at: Instant,
    /// Sequence number of that sample.
    pub seq: u64,
}

impl EdgeEvent {
    #[inline]
    pub const fn is_rising(&self) -> bool {
        !self.previous && self.current
    }

    #[inline]
    pub const fn is_falling(&self) -> bool {
        self.previous && !self.current
    }
}

// ─── LineGroup ──────────────────────────────────────────────────────

bitflags! {
    /// Output line groups released together.
    ///
    /// Bit `i` corresponds to [`OutputRole::ALL`]`[i]`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LineGroup: u16 {
        const RAD_PREP        = 1 << 0;
        const EXPOSE_ENABLE   = 1 << 1;
        const EXPOSE_TRIGGER  = 1 << 2;
        const FLUORO          = 1 << 3;
        const POWER_ON        = 1 << 4;
        const POWER_OFF       = 1 << 5;
        const CAMERA_TRIGGER  = 1 << 6;
    }
}

impl LineGroup {
    /// Lines asserted for a single shot.
    pub const PER_SHOT: Self = Self::from_bits_truncate(
        Self::EXPOSE_TRIGGER.bits() | Self::CAMERA_TRIGGER.bits(),
    );

    /// Lines that keep the generator armed between scan points.
    pub const ARMING: Self =
        Self::from_bits_truncate(Self::RAD_PREP.bits() | Self::EXPOSE_ENABLE.bits());

    /// Every line that can lead to radiation; forced low on abort.
    pub const ENERGIZING: Self = Self::from_bits_truncate(
        Self::PER_SHOT.bits() | Self::ARMING.bits() | Self::FLUORO.bits(),
    );

    /// Release order: the expose trigger drops first, rad-prep last
    /// among the generator lines, then the camera.
    const RELEASE_ORDER: [OutputRole; OutputRole::COUNT] = [
        OutputRole::ExposeTrigger,
        OutputRole::ExposeEnable,
        OutputRole::FluoroEnable,
        OutputRole::RadPrepEnable,
        OutputRole::CameraTrigger,
        OutputRole::PowerOnPulse,
        OutputRole::PowerOffPulse,
    ];

    #[inline]
    pub const fn of(role: OutputRole) -> Self {
        Self::from_bits_truncate(1 << role.index())
    }

    /// Member roles in release order.
    pub fn roles(self) -> impl Iterator<Item = OutputRole> {
        Self::RELEASE_ORDER
            .into_iter()
            .filter(move |r| self.contains(Self::of(*r)))
    }
}

// ─── ChangeNotifier ─────────────────────────────────────────────────

/// Generation counter a driver bumps whenever an input may have changed.
///
/// Lets the sampler block instead of polling on hardware that can signal
/// input changes.
#[derive(Debug, Default)]
pub struct ChangeNotifier {
    generation: Mutex<u64>,
    changed: Condvar,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.changed.notify_all();
    }

    pub fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    /// Block until the generation moves past `seen` or `timeout` elapses.
    ///
    /// Returns the current generation either way.
    pub fn wait_for_change(&self, seen: u64, timeout: Duration) -> u64 {
        let mut generation = self.generation.lock();
        if *generation == seen {
            let _ = self.changed.wait_for(&mut generation, timeout);
        }
        *generation
    }
}
