use std::time::{Duration, Instant};

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

/// Process-wide epoch shared by every clock.
static EPOCH: OnceCell<Instant> = OnceCell::new();

/// Monotonic tick attached to a MIDI message, in nanoseconds since the process epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MidiTimestamp(u64);

impl MidiTimestamp {
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Time since the process epoch.
    pub fn as_duration(self) -> Duration {
        Duration::from_nanos(self.0)
    }

    /// Time elapsed since `earlier`, zero if `earlier` is later than `self`.
    pub fn saturating_elapsed(self, earlier: MidiTimestamp) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

/// Utility for stamping messages with monotonic ticks.
///
/// All clocks share one epoch, captured by the first call to
/// [`MidiClock::init_process_epoch`] (done by `SessionManager::start`), so
/// timestamps from consecutive sessions stay comparable.
#[derive(Debug, Clone, Copy)]
pub struct MidiClock {
    epoch: Instant,
}

impl MidiClock {
    /// Captures the process epoch if it has not been captured yet.
    ///
    /// Returns `true` when this call performed the initialisation.
    pub fn init_process_epoch() -> bool {
        let mut initialised = false;
        EPOCH.get_or_init(|| {
            initialised = true;
            Instant::now()
        });
        initialised
    }

    /// Clock bound to the process epoch.
    pub fn process() -> Self {
        Self {
            epoch: *EPOCH.get_or_init(Instant::now),
        }
    }

    /// Current tick.
    #[inline]
    pub fn now(&self) -> MidiTimestamp {
        let nanos = self.epoch.elapsed().as_nanos().min(u128::from(u64::MAX)) as u64;
        MidiTimestamp(nanos)
    }
}

impl Default for MidiClock {
    fn default() -> Self {
        Self::process()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_never_go_backwards() {
        let clock = MidiClock::process();
        let mut last = clock.now();
        for _ in 0..1_000 {
            let next = clock.now();
            assert!(next >= last);
            last = next;
        }
    }

    #[test]
    fn clocks_share_the_epoch() {
        MidiClock::init_process_epoch();
        assert!(!MidiClock::init_process_epoch());
        let a = MidiClock::process();
        let b = MidiClock::process();
        assert_eq!(a.epoch, b.epoch);
    }

    #[test]
    fn elapsed_saturates() {
        let early = MidiTimestamp::from_nanos(1_000);
        let late = MidiTimestamp::from_nanos(3_500);
        assert_eq!(late.saturating_elapsed(early), Duration::from_nanos(2_500));
        assert_eq!(early.saturating_elapsed(late), Duration::ZERO);
    }
}
