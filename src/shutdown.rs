//! Shutdown supervisor - idle-timeout watchdog over the whole device.
//!
//! The main loop ticks the supervisor once per fixed 20 ms cycle; any
//! cycle in which the pairing machine did user-visible work resets the
//! counter. After 5 s of continuous inactivity the board is shut down
//! for good: this is a terminal action, the device cold-boots on the
//! next wake.

use crate::config::{POWER_DOWN_SECS, RETAINED_SENTINEL, SHUTDOWN_IDLE_CYCLES};

/// Counts consecutive idle scheduler cycles.
#[derive(Debug, Default)]
pub struct ShutdownSupervisor {
    idle_cycles: u32,
}

impl ShutdownSupervisor {
    pub const fn new() -> Self {
        Self { idle_cycles: 0 }
    }

    /// A unit of user-visible work happened this cycle.
    pub fn note_activity(&mut self) {
        self.idle_cycles = 0;
    }

    /// One 20 ms cycle elapsed with no work. Returns true when the
    /// inactivity threshold is reached and the board must shut down.
    pub fn tick(&mut self) -> bool {
        self.idle_cycles = self.idle_cycles.saturating_add(1);
        self.idle_cycles >= SHUTDOWN_IDLE_CYCLES
    }

    pub fn idle_cycles(&self) -> u32 {
        self.idle_cycles
    }
}

/// Board-level operations the shutdown sequence needs.
pub trait Board {
    fn stop_advertising(&mut self);
    fn disable_radio(&mut self);
    /// Persist a marker that survives power-down (retained register).
    fn write_retained_sentinel(&mut self, value: u32);
    /// Tri-state every GPIO output we own (LED, motors).
    fn tristate_outputs(&mut self);
    /// Disable the hardware entropy source.
    fn disable_entropy_source(&mut self);
    /// Enter the deepest power-down level for `seconds`. Never returns;
    /// the device cold-boots afterwards.
    fn enter_power_down(&mut self, seconds: u32) -> !;
}

/// Full hardware shutdown, in the fixed order the hardware requires:
/// radio quiesced first, then state persisted, then pins released, then
/// power-down.
pub fn perform_shutdown<B: Board>(board: &mut B) -> ! {
    board.stop_advertising();
    board.disable_radio();
    board.write_retained_sentinel(RETAINED_SENTINEL);
    board.tristate_outputs();
    board.disable_entropy_source();
    board.enter_power_down(POWER_DOWN_SECS)
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests (run on host, not embedded)
// ═══════════════════════════════════════════════════════════════════════════
