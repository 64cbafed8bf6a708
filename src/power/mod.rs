//! Power management - deep sleep between BLE events.
//!
//! Split the way the rest of the crate is: pure decision logic
//! (`plan`), the wall-clock capture/restore bookkeeping (`clock`) and
//! the controller that sequences an actual suspend/resume over the
//! hardware traits (`controller`). The embedded idle hook calls
//! `PowerController::idle` once per idle opportunity.

pub mod clock;
pub mod controller;
pub mod plan;

#[cfg(feature = "embedded")]
pub mod idle;

pub use clock::{SleepClock, SleepCompensation, WallClock};
pub use controller::{PowerController, Scheduler, SleepHardware, SleepOutcome};
pub use plan::{plan_sleep, FlashReadMode, RadioBudget, SleepDecision};
