//! Discovery & pairing state machine.
//!
//! Drives the one-shot handshake with a train peer:
//!
//! ```text
//! Scanning -> Connecting -> Connected -> DiscoveringCharacteristics
//!          -> DiscoveringDescriptor -> Subscribing
//!          -> AwaitingConfirmation -> Confirmed
//! ```
//!
//! The machine is a synchronous function from (state, flags) to side
//! effects on a `PairingStack`. Its only inputs are the OR-combined
//! `StatusFlags` taken from the bus; several flags may arrive in a
//! single wake and **all** of them are processed before the next wait,
//! each guarded by its own precondition. Any failure - rejected stack
//! call, unmet discovery dependency, wait timeout - routes to the same
//! recovery: tear the link down and restart scanning. Scanning itself
//! is the retry loop; there is no backoff.

use crate::ble::{
    ConnHandle, ConnectionParams, DataLength, DiscoverKind, DisconnectReason, PairingStack,
    PeerAddress,
};
use crate::bus::StatusFlags;
use crate::config::{CONNECT_TIMEOUT_MS, FIRST_ATTRIBUTE_HANDLE, SCAN_CMD_LEN, SCAN_CODE};
use crate::error::Error;

use super::shared::LinkShared;

/// Observable state of the pairing procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkState {
    Scanning,
    Connecting,
    Connected,
    DiscoveringCharacteristics,
    DiscoveringDescriptor,
    Subscribing,
    AwaitingConfirmation,
    Confirmed,
}

/// How long the task should block on the bus before the next poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Wait {
    /// Block until a flag arrives.
    Unbounded,
    /// Block at most this many milliseconds; expiry is a failure.
    Timeout(u32),
    /// The peer is paired; the procedure is over.
    Finished,
}

/// Build the 10-byte handshake command: `"SCAN"` + local public address.
pub fn handshake_payload(local: PeerAddress) -> [u8; SCAN_CMD_LEN] {
    let mut buf = [0u8; SCAN_CMD_LEN];
    buf[..SCAN_CODE.len()].copy_from_slice(SCAN_CODE);
    buf[SCAN_CODE.len()..].copy_from_slice(&local.0);
    buf
}

/// The pairing state machine. Owned exclusively by the pairing task.
pub struct PairingMachine {
    state: LinkState,
    wait: Wait,
}

impl PairingMachine {
    pub const fn new() -> Self {
        Self {
            state: LinkState::Scanning,
            wait: Wait::Unbounded,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Arm the initial scan. Called once before the wait loop starts.
    pub fn start(&mut self, stack: &mut impl PairingStack) -> Result<Wait, Error> {
        stack.start_scan()?;
        self.state = LinkState::Scanning;
        self.wait = Wait::Unbounded;
        Ok(self.wait)
    }

    /// Process every flag set in `flags`, then report how long to wait
    /// for the next batch.
    pub fn poll(
        &mut self,
        flags: StatusFlags,
        shared: &LinkShared,
        stack: &mut impl PairingStack,
    ) -> Wait {
        let mut failed = false;

        if flags.contains(StatusFlags::ADDRESS_FOUND) {
            failed |= !self.handle_address_found(shared, stack);
        }
        if flags.contains(StatusFlags::CONNECTED) {
            failed |= !self.handle_connected(shared, stack);
        }
        if flags.contains(StatusFlags::CHARS_DISCOVERED) {
            failed |= !self.handle_chars_discovered(shared, stack);
        }
        if flags.contains(StatusFlags::DESCRIPTOR_DISCOVERED) {
            failed |= !self.handle_descriptor_discovered(shared, stack);
        }
        if flags.contains(StatusFlags::SUBSCRIBED) {
            failed |= !self.handle_subscribed(shared, stack);
        }
        if flags.contains(StatusFlags::PEER_CONFIRMED) {
            self.handle_peer_confirmed(shared, stack);
            return self.wait;
        }

        if failed {
            self.teardown_and_rescan(shared, stack);
        }
        self.wait
    }

    /// The bounded wait expired with no signal. Exactly one
    /// disconnect-or-release action, then back to scanning.
    pub fn on_wait_timeout(&mut self, shared: &LinkShared, stack: &mut impl PairingStack) -> Wait {
        self.teardown_and_rescan(shared, stack);
        self.wait
    }

    // Per-flag handlers. Each returns false on failure so stale or
    // out-of-order flags fall through to the recovery path instead of
    // wedging the sequence.

    fn handle_address_found(&mut self, shared: &LinkShared, stack: &mut impl PairingStack) -> bool {
        let Some(peer) = shared.peer() else {
            return false;
        };
        match stack.connect(peer, &ConnectionParams::train_peer()) {
            Ok(()) => {
                self.state = LinkState::Connecting;
                // The "connected" signal must arrive within this window.
                self.wait = Wait::Timeout(CONNECT_TIMEOUT_MS);
                true
            }
            Err(_) => false,
        }
    }

    fn handle_connected(&mut self, shared: &LinkShared, stack: &mut impl PairingStack) -> bool {
        let Some(conn) = shared.connection() else {
            return false;
        };
        self.state = LinkState::Connected;

        // Advisory; a refused data-length update does not gate pairing.
        let _ = stack.set_data_length(conn, DataLength::extended());

        shared.clear_handles();
        self.state = LinkState::DiscoveringCharacteristics;
        stack
            .discover(conn, DiscoverKind::Characteristics, FIRST_ATTRIBUTE_HANDLE)
            .is_ok()
    }

    fn handle_chars_discovered(
        &mut self,
        shared: &LinkShared,
        stack: &mut impl PairingStack,
    ) -> bool {
        let Some(conn) = shared.connection() else {
            return false;
        };
        let handles = shared.handles();
        if handles.write == 0 || handles.notify == 0 {
            return false;
        }
        self.state = LinkState::DiscoveringDescriptor;
        stack
            .discover(conn, DiscoverKind::Descriptors, FIRST_ATTRIBUTE_HANDLE)
            .is_ok()
    }

    fn handle_descriptor_discovered(
        &mut self,
        shared: &LinkShared,
        stack: &mut impl PairingStack,
    ) -> bool {
        let Some(conn) = shared.connection() else {
            return false;
        };
        let handles = shared.handles();
        if !handles.complete() {
            return false;
        }
        self.state = LinkState::Subscribing;
        stack
            .subscribe(conn, handles.notify, handles.ccc)
            .is_ok()
    }

    fn handle_subscribed(&mut self, shared: &LinkShared, stack: &mut impl PairingStack) -> bool {
        let Some(conn) = shared.connection() else {
            return false;
        };
        let handles = shared.handles();
        if handles.write == 0 {
            return false;
        }
        self.state = LinkState::AwaitingConfirmation;
        let payload = handshake_payload(stack.local_address());
        // The write-complete callback is advisory; only the subsequent
        // "OK" notification advances the sequence.
        stack.write(conn, handles.write, &payload).is_ok()
    }

    fn handle_peer_confirmed(&mut self, shared: &LinkShared, stack: &mut impl PairingStack) {
        if let Some(conn) = shared.release_connection() {
            stack.disconnect(conn, DisconnectReason::RemoteUserTerminated);
        }
        self.state = LinkState::Confirmed;
        self.wait = Wait::Finished;
    }

    /// Common recovery: release the link (one disconnect or one connect
    /// cancellation, never both), forget discovery progress and re-arm
    /// scanning unconditionally.
    fn teardown_and_rescan(&mut self, shared: &LinkShared, stack: &mut impl PairingStack) {
        if let Some(conn) = shared.release_connection() {
            stack.disconnect(conn, DisconnectReason::RemoteUserTerminated);
        } else if self.state == LinkState::Connecting {
            stack.cancel_connect();
        }
        shared.clear_handles();
        shared.clear_peer();

        self.state = LinkState::Scanning;
        self.wait = Wait::Unbounded;
        // A failed scan start leaves us waiting on the bus; the idle
        // supervisor shuts the board down if nothing ever arrives.
        let _ = stack.start_scan();
    }
}

impl Default for PairingMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Expiry tracking for the machine's bounded waits.
///
/// Re-armed after **every** poll, so each step of the sequence gets the
/// full window again: a slow connect does not eat into the time allowed
/// for discovery or subscription. Any processed wake restarts the
/// window, matching a notification wait whose timeout argument is
/// passed fresh on every call.
#[derive(Debug, Default)]
pub struct WaitWindow {
    deadline_ms: Option<u64>,
}

impl WaitWindow {
    pub const fn new() -> Self {
        Self { deadline_ms: None }
    }

    /// Arm or clear from the wait a poll returned.
    pub fn rearm(&mut self, wait: Wait, now_ms: u64) {
        self.deadline_ms = match wait {
            Wait::Timeout(ms) => Some(now_ms + u64::from(ms)),
            Wait::Unbounded | Wait::Finished => None,
        };
    }

    /// True once a bounded wait has run out.
    pub fn expired(&self, now_ms: u64) -> bool {
        matches!(self.deadline_ms, Some(d) if now_ms >= d)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests (run on host, not embedded)
// ═══════════════════════════════════════════════════════════════════════════
