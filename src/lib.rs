//! trainlink - BLE pairing controller for `lego_train_` peripherals.
//!
//! Application logic of a battery-powered BLE peripheral/central hybrid:
//! it advertises its own presence, scans for a matching train peer,
//! performs a one-shot `SCAN`/`OK` pairing handshake over GATT, and
//! sleeps as deeply and as often as the radio schedule allows. After
//! 5 s of total inactivity the whole board powers down.
//!
//! Everything in this library is host-testable: the vendor BLE stack,
//! the scheduler and the hardware are consumed through traits and
//! callback entry points, so the pairing machine and power controller
//! run under `cargo test` with no radio. The embedded binary
//! (`src/main.rs`, `--features embedded`) wires the same logic to the
//! SoftDevice and Embassy.
//!
//! Module map:
//! - [`bus`] - single-consumer bit-flag mailbox between ISR callbacks
//!   and the pairing task.
//! - [`ble`] - advertisement parsing, the advertising payload, the
//!   shared link scratch and the pairing state machine.
//! - [`power`] - sleep negotiation, wall-clock capture and the
//!   suspend/resume controller.
//! - [`shutdown`] - idle supervisor and the terminal power-down
//!   sequence.
//! - [`roles`] - LED/motor/watchdog side-effect sinks.
//! - [`fault`] - overridable fatal-fault handler slot.

#![cfg_attr(not(test), no_std)]

pub mod ble;
pub mod bus;
pub mod config;
pub mod error;
pub mod fault;
pub mod power;
pub mod roles;
pub mod shutdown;
