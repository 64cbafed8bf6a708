//! Wall-clock capture and the sleep compensation record.
//!
//! The sleep clock is a free-running two-word (high/low) counter that
//! keeps counting through deep sleep. It is captured immediately before
//! suspending the system timer and written back verbatim on resume; the
//! elapsed real time is accounted for separately by stepping the
//! scheduler's logical tick count.

use crate::error::Error;

/// The free-running sleep-domain counter, read as two 32-bit words.
pub trait SleepClock {
    fn high_word(&self) -> u32;
    fn low_word(&self) -> u32;
}

/// A captured two-word wall-clock value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WallClock {
    pub hi: u32,
    pub lo: u32,
}

impl WallClock {
    pub const fn as_ticks(self) -> u64 {
        ((self.hi as u64) << 32) | self.lo as u64
    }

    pub const fn from_ticks(ticks: u64) -> Self {
        Self {
            hi: (ticks >> 32) as u32,
            lo: ticks as u32,
        }
    }
}

/// Capture the wall clock without tearing across a low-word rollover.
///
/// Reads high, low, high again; a changed high word means the low word
/// rolled over mid-read and the sample is discarded. The retry loop is
/// bounded: a clock whose high word never holds still for two reads
/// yields `Error::Timeout` instead of spinning forever.
pub fn capture<C: SleepClock>(clock: &C, max_retries: u32) -> Result<WallClock, Error> {
    for _ in 0..=max_retries {
        let hi = clock.high_word();
        let lo = clock.low_word();
        if clock.high_word() == hi {
            return Ok(WallClock { hi, lo });
        }
    }
    Err(Error::Timeout)
}

/// Everything that must be put back on resume.
///
/// Created immediately before the system timer is suspended, consumed
/// immediately after wake. Must be restored even when the sleep ends
/// early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SleepCompensation {
    /// Wall clock at suspend, written back verbatim on resume.
    pub captured: WallClock,
    /// Saved timer-clock configuration register.
    pub timer_config: u32,
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests (run on host, not embedded)
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    /// Clock whose high word changes for the first `flips` reads, then
    /// settles. Models a low-word rollover racing the capture.
    struct FlippingClock {
        reads: Cell<u32>,
        flips: u32,
    }

    impl SleepClock for FlippingClock {
        fn high_word(&self) -> u32 {
            let n = self.reads.get();
            self.reads.set(n + 1);
            if n < self.flips {
                n
            } else {
                0xDEAD
            }
        }

        fn low_word(&self) -> u32 {
            0x1234_5678
        }
    }

    #[test]
    fn stable_clock_captures_first_try() {
        let clock = FlippingClock {
            reads: Cell::new(0),
            flips: 0,
        };
        let t = capture(&clock, 4).unwrap();
        assert_eq!(t.hi, 0xDEAD);
        assert_eq!(t.lo, 0x1234_5678);
    }

    #[test]
    fn rollover_during_read_retries_until_stable() {
        // First sample torn (hi changes between reads), second succeeds.
        let clock = FlippingClock {
            reads: Cell::new(0),
            flips: 2,
        };
        let t = capture(&clock, 4).unwrap();
        assert_eq!(t.hi, 0xDEAD);
    }

    #[test]
    fn never_stable_clock_times_out() {
        // hi differs on every single read.
        struct Runaway(Cell<u32>);
        impl SleepClock for Runaway {
            fn high_word(&self) -> u32 {
                let n = self.0.get();
                self.0.set(n + 1);
                n
            }
            fn low_word(&self) -> u32 {
                0
            }
        }

        let clock = Runaway(Cell::new(0));
        assert_eq!(capture(&clock, 4), Err(Error::Timeout));
    }

    #[test]
    fn tick_conversion_roundtrip() {
        let t = WallClock {
            hi: 0x0000_0001,
            lo: 0xFFFF_FFF0,
        };
        assert_eq!(WallClock::from_ticks(t.as_ticks()), t);
        assert_eq!(t.as_ticks(), 0x1_FFFF_FFF0);
    }
}
