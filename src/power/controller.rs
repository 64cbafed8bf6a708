//! The power state controller: glitch-free suspend and resume.
//!
//! Invoked from the scheduler's idle hook, never from the pairing task.
//! The controller owns the full suspend/resume sequence; the invariant
//! it enforces is that **no timer or clock register is touched unless
//! the decision to actually suspend has been taken**, and that the
//! resume steps run in the same relative order on every wake.

use crate::config::WALL_CLOCK_READ_RETRIES;
use crate::power::clock::{self, SleepClock, SleepCompensation};
use crate::power::plan::{plan_sleep, FlashReadMode, RadioBudget, SleepDecision};

/// The hardware a suspend touches. One implementation per board; tests
/// use a register-recording mock.
pub trait SleepHardware {
    type Clock: SleepClock;

    /// The free-running sleep-domain counter.
    fn wall_clock(&self) -> &Self::Clock;

    /// A live BLE connection needs continuous radio servicing.
    fn connection_active(&self) -> bool;

    /// Ticks until the radio's next scheduled event, or `Negotiating`.
    fn radio_budget(&self) -> RadioBudget;

    /// Currently configured flash read mode (wake-cost input).
    fn flash_mode(&self) -> FlashReadMode;

    /// Read the timer-clock configuration register.
    fn timer_config(&mut self) -> u32;

    /// Write the timer-clock configuration register back.
    fn restore_timer_config(&mut self, config: u32);

    /// Disable the timer-compare interrupt pre-emptively so no spurious
    /// pending interrupt straddles the suspend boundary.
    fn mask_timer_compare(&mut self);

    /// Re-arm the timer-compare interrupt.
    fn unmask_timer_compare(&mut self);

    /// Write the captured wall clock back verbatim.
    fn restore_wall_clock(&mut self, captured: clock::WallClock);

    /// Suspend the system clock tree for up to `ticks`. Returns the
    /// measured number of ticks actually slept (the wake may come
    /// early).
    fn enter_sleep(&mut self, ticks: u32) -> u32;

    /// Re-enable gated clocks, disabled peripheral clocks and the
    /// flash/DMA timing context that sleep entry tore down.
    fn restore_hardware_context(&mut self);

    /// Clear the watchdog counter.
    fn feed_watchdog(&mut self);
}

/// The cooperative scheduler's view of a suspend.
pub trait Scheduler {
    /// Final go/no-go: false when another task became ready while we
    /// were deciding, which aborts the sleep with no side effects.
    fn confirm_sleep(&mut self) -> bool;

    /// Advance logical time by the *measured* sleep duration.
    fn step_ticks(&mut self, ticks: u32);
}

/// What happened this idle opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SleepOutcome {
    /// Suspended and resumed.
    Slept { requested: u32, actual: u32 },
    /// Entry guard fired (active connection or window too small).
    Refused,
    /// Late abort (radio negotiation or scheduler veto). Silent and
    /// side-effect free; these are frequent and expected.
    Aborted,
}

/// Decides on and sequences system suspends. One instance, owned by the
/// idle hook.
#[derive(Debug, Default)]
pub struct PowerController {
    sleeps: u32,
    aborts: u32,
}

impl PowerController {
    pub const fn new() -> Self {
        Self {
            sleeps: 0,
            aborts: 0,
        }
    }

    /// Total completed suspend/resume cycles.
    pub fn sleep_count(&self) -> u32 {
        self.sleeps
    }

    /// Total aborted attempts (diagnostic only).
    pub fn abort_count(&self) -> u32 {
        self.aborts
    }

    /// One idle opportunity: maybe suspend for up to
    /// `requested_idle_ticks`.
    pub fn idle<H, S>(&mut self, requested_idle_ticks: u32, hw: &mut H, sched: &mut S) -> SleepOutcome
    where
        H: SleepHardware,
        S: Scheduler,
    {
        // Entry guard: an active link needs the radio awake. Service
        // the watchdog in its place and bail out.
        if hw.connection_active() {
            hw.feed_watchdog();
            return SleepOutcome::Refused;
        }

        let ticks = match plan_sleep(requested_idle_ticks, hw.radio_budget(), hw.flash_mode()) {
            SleepDecision::Refuse => return SleepOutcome::Refused,
            SleepDecision::Abort => {
                self.aborts += 1;
                return SleepOutcome::Aborted;
            }
            SleepDecision::Sleep { ticks, .. } => ticks,
        };

        // Last veto before any register is touched.
        if !sched.confirm_sleep() {
            self.aborts += 1;
            return SleepOutcome::Aborted;
        }

        let captured = match clock::capture(hw.wall_clock(), WALL_CLOCK_READ_RETRIES) {
            Ok(t) => t,
            // A wall clock that never settles means something else is
            // mutating it; skip this cycle rather than sleep on a torn
            // timestamp.
            Err(_) => {
                self.aborts += 1;
                return SleepOutcome::Aborted;
            }
        };
        let comp = SleepCompensation {
            captured,
            timer_config: hw.timer_config(),
        };
        hw.mask_timer_compare();

        let actual = hw.enter_sleep(ticks);

        // Resume. Same relative order on every wake, even when the
        // sleep ended early: the compensation record is always
        // consumed.
        hw.restore_timer_config(comp.timer_config);
        hw.restore_wall_clock(comp.captured);
        hw.restore_hardware_context();
        hw.unmask_timer_compare();
        sched.step_ticks(actual);

        self.sleeps += 1;
        SleepOutcome::Slept {
            requested: ticks,
            actual,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests (run on host, not embedded)
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FLASH_WAKE_TICKS_QUAD, MIN_SLEEP_TICKS};
    use crate::power::clock::WallClock;
    use core::cell::Cell;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Op {
        FeedWatchdog,
        ReadTimerConfig,
        MaskCompare,
        EnterSleep(u32),
        RestoreTimerConfig(u32),
        RestoreWallClock(u64),
        RestoreContext,
        UnmaskCompare,
    }

    struct FixedClock {
        ticks: Cell<u64>,
    }

    impl SleepClock for FixedClock {
        fn high_word(&self) -> u32 {
            (self.ticks.get() >> 32) as u32
        }
        fn low_word(&self) -> u32 {
            self.ticks.get() as u32
        }
    }

    struct MockHw {
        clock: FixedClock,
        connection_active: bool,
        radio: RadioBudget,
        flash: FlashReadMode,
        timer_config: u32,
        /// Ticks the "hardware" really sleeps regardless of request.
        actual_sleep: u32,
        ops: Vec<Op>,
    }

    impl MockHw {
        fn idle_board() -> Self {
            Self {
                clock: FixedClock {
                    ticks: Cell::new(0x0000_0001_0000_0100),
                },
                connection_active: false,
                radio: RadioBudget::Ticks(50_000),
                flash: FlashReadMode::Quad,
                timer_config: 0x0000_1234,
                actual_sleep: 0,
                ops: Vec::new(),
            }
        }

        fn register_ops(&self) -> Vec<Op> {
            self.ops
                .iter()
                .copied()
                .filter(|op| !matches!(op, Op::FeedWatchdog))
                .collect()
        }
    }

    impl SleepHardware for MockHw {
        type Clock = FixedClock;

        fn wall_clock(&self) -> &FixedClock {
            &self.clock
        }
        fn connection_active(&self) -> bool {
            self.connection_active
        }
        fn radio_budget(&self) -> RadioBudget {
            self.radio
        }
        fn flash_mode(&self) -> FlashReadMode {
            self.flash
        }
        fn timer_config(&mut self) -> u32 {
            self.ops.push(Op::ReadTimerConfig);
            self.timer_config
        }
        fn restore_timer_config(&mut self, config: u32) {
            self.ops.push(Op::RestoreTimerConfig(config));
        }
        fn mask_timer_compare(&mut self) {
            self.ops.push(Op::MaskCompare);
        }
        fn unmask_timer_compare(&mut self) {
            self.ops.push(Op::UnmaskCompare);
        }
        fn restore_wall_clock(&mut self, captured: WallClock) {
            self.ops.push(Op::RestoreWallClock(captured.as_ticks()));
        }
        fn enter_sleep(&mut self, ticks: u32) -> u32 {
            self.ops.push(Op::EnterSleep(ticks));
            // The counter keeps running while we sleep.
            let slept = if self.actual_sleep == 0 {
                ticks
            } else {
                self.actual_sleep
            };
            self.clock.ticks.set(self.clock.ticks.get() + slept as u64);
            slept
        }
        fn restore_hardware_context(&mut self) {
            self.ops.push(Op::RestoreContext);
        }
        fn feed_watchdog(&mut self) {
            self.ops.push(Op::FeedWatchdog);
        }
    }

    struct MockSched {
        allow: bool,
        logical_ticks: u64,
    }

    impl Scheduler for MockSched {
        fn confirm_sleep(&mut self) -> bool {
            self.allow
        }
        fn step_ticks(&mut self, ticks: u32) {
            self.logical_ticks += ticks as u64;
        }
    }

    #[test]
    fn active_connection_feeds_watchdog_and_refuses() {
        let mut hw = MockHw::idle_board();
        hw.connection_active = true;
        let mut sched = MockSched {
            allow: true,
            logical_ticks: 0,
        };
        let mut pc = PowerController::new();

        let out = pc.idle(10_000, &mut hw, &mut sched);

        assert_eq!(out, SleepOutcome::Refused);
        assert_eq!(hw.ops, vec![Op::FeedWatchdog]);
        assert_eq!(pc.sleep_count(), 0);
    }

    #[test]
    fn scheduler_veto_touches_no_registers() {
        let mut hw = MockHw::idle_board();
        let mut sched = MockSched {
            allow: false,
            logical_ticks: 0,
        };
        let mut pc = PowerController::new();

        let out = pc.idle(10_000, &mut hw, &mut sched);

        assert_eq!(out, SleepOutcome::Aborted);
        assert!(hw.register_ops().is_empty());
        assert_eq!(sched.logical_ticks, 0);
        assert_eq!(pc.abort_count(), 1);
    }

    #[test]
    fn radio_negotiation_touches_no_registers() {
        let mut hw = MockHw::idle_board();
        hw.radio = RadioBudget::Negotiating;
        let mut sched = MockSched {
            allow: true,
            logical_ticks: 0,
        };
        let mut pc = PowerController::new();

        assert_eq!(pc.idle(10_000, &mut hw, &mut sched), SleepOutcome::Aborted);
        assert!(hw.register_ops().is_empty());
    }

    #[test]
    fn short_window_refused_without_side_effects() {
        let mut hw = MockHw::idle_board();
        let mut sched = MockSched {
            allow: true,
            logical_ticks: 0,
        };
        let mut pc = PowerController::new();

        let out = pc.idle(MIN_SLEEP_TICKS - 1, &mut hw, &mut sched);
        assert_eq!(out, SleepOutcome::Refused);
        assert!(hw.register_ops().is_empty());
    }

    #[test]
    fn full_sleep_sequence_in_fixed_order() {
        let mut hw = MockHw::idle_board();
        hw.radio = RadioBudget::Ticks(400);
        let mut sched = MockSched {
            allow: true,
            logical_ticks: 0,
        };
        let mut pc = PowerController::new();

        let requested = 400 - FLASH_WAKE_TICKS_QUAD;
        let out = pc.idle(10_000, &mut hw, &mut sched);

        assert_eq!(
            out,
            SleepOutcome::Slept {
                requested,
                actual: requested
            }
        );
        assert_eq!(
            hw.register_ops(),
            vec![
                Op::ReadTimerConfig,
                Op::MaskCompare,
                Op::EnterSleep(requested),
                Op::RestoreTimerConfig(0x0000_1234),
                Op::RestoreWallClock(0x0000_0001_0000_0100),
                Op::RestoreContext,
                Op::UnmaskCompare,
            ]
        );
        assert_eq!(sched.logical_ticks, requested as u64);
        assert_eq!(pc.sleep_count(), 1);
    }

    #[test]
    fn early_wake_still_restores_and_steps_measured_ticks() {
        let mut hw = MockHw::idle_board();
        hw.radio = RadioBudget::Ticks(400);
        hw.actual_sleep = 90; // woke early
        let mut sched = MockSched {
            allow: true,
            logical_ticks: 0,
        };
        let mut pc = PowerController::new();

        let out = pc.idle(10_000, &mut hw, &mut sched);

        match out {
            SleepOutcome::Slept { actual, .. } => assert_eq!(actual, 90),
            other => panic!("unexpected outcome {other:?}"),
        }
        // Compensation record consumed despite the early wake.
        assert!(hw
            .register_ops()
            .contains(&Op::RestoreWallClock(0x0000_0001_0000_0100)));
        assert_eq!(sched.logical_ticks, 90);
    }

    #[test]
    fn repeated_cycles_accumulate_without_drift() {
        let mut hw = MockHw::idle_board();
        hw.radio = RadioBudget::Ticks(400);
        let mut sched = MockSched {
            allow: true,
            logical_ticks: 0,
        };
        let mut pc = PowerController::new();

        let start = hw.clock.ticks.get();
        let mut expected_logical = 0u64;
        for _ in 0..100 {
            match pc.idle(10_000, &mut hw, &mut sched) {
                SleepOutcome::Slept { actual, .. } => expected_logical += actual as u64,
                other => panic!("unexpected outcome {other:?}"),
            }
        }

        // Logical time advanced by exactly the measured sleep total;
        // the wall clock moved by the same amount. No drift.
        assert_eq!(sched.logical_ticks, expected_logical);
        assert_eq!(hw.clock.ticks.get() - start, expected_logical);
        assert_eq!(pc.sleep_count(), 100);
    }
}
