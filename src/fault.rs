//! Fatal-fault handling.
//!
//! Stack overflow, allocation failure and failed assertions are not
//! recoverable here: the default handler parks the core and lets the
//! watchdog force a hard reset. The handler slot is overridable once at
//! initialization (e.g. the embedded build installs one that logs over
//! RTT first).

use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

/// Classes of unrecoverable faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FaultKind {
    Assertion,
    StackOverflow,
    AllocationFailed,
}

/// A fault handler never returns; the device is expected to reset.
pub type FaultHandler = fn(FaultKind) -> !;

static HANDLER: Mutex<CriticalSectionRawMutex, Cell<FaultHandler>> =
    Mutex::new(Cell::new(default_handler));

/// Replace the default handler. Call once during init, before any
/// fault can occur.
pub fn install_fault_handler(handler: FaultHandler) {
    HANDLER.lock(|h| h.set(handler));
}

/// Raise an unrecoverable fault.
pub fn raise(kind: FaultKind) -> ! {
    let handler = HANDLER.lock(|h| h.get());
    handler(kind)
}

fn default_handler(_kind: FaultKind) -> ! {
    // Park until the watchdog bites.
    loop {
        core::hint::spin_loop();
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests (run on host, not embedded)
// ═══════════════════════════════════════════════════════════════════════════
