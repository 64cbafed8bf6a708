//! Board adapter for the power controller (embedded builds only).
//!
//! Maps the [`SleepHardware`]/[`Scheduler`] traits onto the nRF52840.
//! RTC2 is the 32.768 kHz wall clock (a 24-bit counter extended to 64
//! bits in software); RTC1 belongs to the embassy time driver and is
//! never touched here. `sd_app_evt_wait` is the suspend instruction,
//! and the SoftDevice keeps the radio schedule. The radio budget is
//! published by the BLE worker through an atomic so the idle hook never
//! calls into the stack.
//!
//! Wake semantics: `sd_app_evt_wait` returns when an application
//! interrupt pends in the NVIC, and a peripheral event only pends one
//! if its INTEN bit is set. The sleep deadline therefore uses its own
//! compare channel (CC1) with the interrupt enabled at the peripheral
//! but left disabled in the NVIC, so the pend wakes the core without
//! ever vectoring. CC0 is the scheduler compare that
//! `mask_timer_compare` covers.

use core::sync::atomic::{AtomicU32, Ordering};

use embassy_nrf::pac;
use nrf_softdevice::raw;

use crate::ble::central;
use crate::power::clock::{SleepClock, WallClock};
use crate::power::controller::{Scheduler, SleepHardware};
use crate::power::plan::{FlashReadMode, RadioBudget};
use crate::roles::Watchdog;

/// RTC counters are 24 bits wide.
const RTC_COUNTER_MASK: u32 = 0x00FF_FFFF;

/// Published radio budget value meaning "schedule being renegotiated".
const RADIO_NEGOTIATING: u32 = u32::MAX;

/// Ticks until the next radio event, written by the BLE worker after
/// every scheduling change. Defaults to negotiating so the idle hook
/// stays out of the way until the stack has settled.
pub static RADIO_BUDGET_TICKS: AtomicU32 = AtomicU32::new(RADIO_NEGOTIATING);

/// Ticks until the radio's next scheduled event.
pub fn publish_radio_budget(ticks: u32) {
    RADIO_BUDGET_TICKS.store(ticks.min(RADIO_NEGOTIATING - 1), Ordering::Release);
}

/// The radio schedule is in flux; sleep attempts abort until a budget
/// is published again.
pub fn publish_radio_negotiating() {
    RADIO_BUDGET_TICKS.store(RADIO_NEGOTIATING, Ordering::Release);
}

/// Software extension of the 24-bit RTC2 counter.
pub struct RtcClock {
    /// High word, stepped on counter wrap and restored after sleep.
    hi: AtomicU32,
    /// Last counter sample, for wrap detection.
    last: AtomicU32,
}

impl RtcClock {
    pub const fn new() -> Self {
        Self {
            hi: AtomicU32::new(0),
            last: AtomicU32::new(0),
        }
    }

    /// Samples the counter, stepping the high word when it wrapped
    /// since the previous sample. The supervisor loop samples every
    /// 20 ms, far inside the 512 s wrap period, so no overflow
    /// interrupt is needed.
    fn counter(&self) -> u32 {
        let now = pac::RTC2.counter().read().counter() & RTC_COUNTER_MASK;
        let prev = self.last.swap(now, Ordering::AcqRel);
        if now < prev {
            self.hi.fetch_add(1, Ordering::AcqRel);
        }
        now
    }
}

impl SleepClock for RtcClock {
    fn high_word(&self) -> u32 {
        self.hi.load(Ordering::Acquire)
    }

    fn low_word(&self) -> u32 {
        self.counter()
    }
}

/// Watchdog reload. Started once at boot with `WATCHDOG_TIMEOUT`; the
/// supervisor loop and the idle hook both feed it.
#[derive(Clone, Copy)]
pub struct Wdt;

impl Wdt {
    pub fn start(timeout_ticks: u32) -> Self {
        pac::WDT.crv().write(|w| w.set_crv(timeout_ticks));
        // Keep running while the CPU sleeps; pause under the debugger.
        pac::WDT.config().write(|w| {
            w.set_sleep(pac::wdt::vals::Sleep::RUN);
            w.set_halt(pac::wdt::vals::Halt::PAUSE);
        });
        pac::WDT.rren().write(|w| w.set_rr0(true));
        pac::WDT.tasks_start().write_value(1);
        Self
    }

    fn reload(&self) {
        pac::WDT.rr(0).write(|w| w.set_rr(pac::wdt::vals::Rr::RELOAD));
    }
}

impl Watchdog for Wdt {
    fn clear_counter(&mut self) {
        self.reload();
    }
}

/// The idle hook's view of the board.
pub struct BoardSleep {
    clock: RtcClock,
    wdt: Wdt,
}

impl BoardSleep {
    /// Starts RTC2 at the raw 32.768 kHz rate. The RTC2 interrupt stays
    /// disabled in the NVIC for the lifetime of the device; its pend
    /// bit is only ever used as a wake source.
    pub fn new(wdt: Wdt) -> Self {
        pac::RTC2.prescaler().write(|w| w.set_prescaler(0));
        pac::RTC2.tasks_start().write_value(1);
        Self {
            clock: RtcClock::new(),
            wdt,
        }
    }

    pub fn clock(&self) -> &RtcClock {
        &self.clock
    }
}

impl SleepHardware for BoardSleep {
    type Clock = RtcClock;

    fn wall_clock(&self) -> &RtcClock {
        &self.clock
    }

    fn connection_active(&self) -> bool {
        central::link_shared().connection().is_some()
    }

    fn radio_budget(&self) -> RadioBudget {
        match RADIO_BUDGET_TICKS.load(Ordering::Acquire) {
            RADIO_NEGOTIATING => RadioBudget::Negotiating,
            ticks => RadioBudget::Ticks(ticks),
        }
    }

    fn flash_mode(&self) -> FlashReadMode {
        // On-die flash with the cache enabled wakes on the fast path.
        FlashReadMode::QuadContinuous
    }

    fn timer_config(&mut self) -> u32 {
        pac::RTC2.prescaler().read().prescaler() as u32
    }

    fn restore_timer_config(&mut self, config: u32) {
        pac::RTC2.prescaler().write(|w| w.set_prescaler(config as _));
    }

    fn mask_timer_compare(&mut self) {
        pac::RTC2.intenclr().write(|w| w.set_compare0(true));
    }

    fn unmask_timer_compare(&mut self) {
        pac::RTC2.intenset().write(|w| w.set_compare0(true));
    }

    fn restore_wall_clock(&mut self, captured: WallClock) {
        // The counter itself keeps running through System ON sleep;
        // only the software high word needs to be written back.
        self.clock.hi.store(captured.hi, Ordering::Release);
    }

    fn enter_sleep(&mut self, ticks: u32) -> u32 {
        let rtc = pac::RTC2;

        let start = self.clock.counter();
        let deadline = (start + ticks) & RTC_COUNTER_MASK;
        rtc.cc(1).write(|w| w.set_compare(deadline));
        rtc.events_compare(1).write_value(0);
        // INTEN must be set for the compare event to pend in the NVIC;
        // the NVIC enable stays off so no handler runs.
        rtc.intenset().write(|w| w.set_compare1(true));

        // Returns on the compare pend or any earlier SoftDevice event;
        // the caller steps measured ticks only.
        unsafe {
            let _ = raw::sd_app_evt_wait();
        }

        rtc.intenclr().write(|w| w.set_compare1(true));
        rtc.events_compare(1).write_value(0);
        cortex_m::peripheral::NVIC::unpend(pac::Interrupt::RTC2);

        self.clock.counter().wrapping_sub(start) & RTC_COUNTER_MASK
    }

    fn restore_hardware_context(&mut self) {
        // System ON sleep on this part gates nothing the application
        // owns; the SoftDevice restarts the HF clock for its own radio
        // events. Nothing to rebuild here.
    }

    fn feed_watchdog(&mut self) {
        self.wdt.reload();
    }
}

/// Logical-time bookkeeping for the supervisor loop.
#[derive(Default)]
pub struct IdleScheduler {
    slept_ticks: u64,
}

impl IdleScheduler {
    pub const fn new() -> Self {
        Self { slept_ticks: 0 }
    }

    /// Total sleep-clock ticks spent suspended.
    pub fn slept_ticks(&self) -> u64 {
        self.slept_ticks
    }
}

impl Scheduler for IdleScheduler {
    fn confirm_sleep(&mut self) -> bool {
        // Unconsumed flags mean the pairing task has work queued.
        central::event_bus().peek().is_empty()
    }

    fn step_ticks(&mut self, ticks: u32) {
        self.slept_ticks += u64::from(ticks);
    }
}
