//! Bluetooth Low Energy subsystem.
//!
//! This module drives the vendor BLE stack in a **peripheral/central
//! hybrid** role:
//!
//! 1. **Advertising** - broadcasts our device-type service data so train
//!    peers can see us, with a button-cycled mode byte.
//! 2. **Pairing state machine** - scans for a `lego_train_` peer, connects,
//!    discovers the write/notify characteristics and the CCC descriptor,
//!    subscribes, and performs the one-shot `SCAN` handshake.
//! 3. **Shared link scratch** - the only state touched from interrupt
//!    context: captured peer address, raw connection handle and the
//!    discovered attribute handles.
//!
//! Stack callbacks never block; they post `StatusFlags` to the crate's
//! `FlagBus` and stage data in `LinkShared`.

pub mod adv_parser;
pub mod advertising;
pub mod pairing;
pub mod shared;

#[cfg(feature = "embedded")]
pub mod central;

use crate::error::StackError;

/// A peer's 6-byte link-layer address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerAddress(pub [u8; 6]);

/// Opaque reference to an active BLE link. At most one exists at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnHandle(pub u16);

/// A 128-bit GATT UUID in canonical (big-endian text) byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Uuid128(pub [u8; 16]);

impl Uuid128 {
    /// The wire byte order: least-significant byte first. Vendor-UUID
    /// registration with the stack takes this order, not the canonical
    /// text order the constants are written in.
    pub const fn to_le_bytes(self) -> [u8; 16] {
        let mut out = [0u8; 16];
        let mut i = 0;
        while i < 16 {
            out[i] = self.0[15 - i];
            i += 1;
        }
        out
    }
}

/// Write characteristic of the train peer:
/// `00070002-0745-4650-8d93-df59be2fc10a`
pub const WRITE_CHAR_UUID: Uuid128 = Uuid128([
    0x00, 0x07, 0x00, 0x02, 0x07, 0x45, 0x46, 0x50, 0x8d, 0x93, 0xdf, 0x59, 0xbe, 0x2f, 0xc1, 0x0a,
]);

/// Read/notify characteristic of the train peer:
/// `00070001-0745-4650-8d93-df59be2fc10a`
pub const READ_CHAR_UUID: Uuid128 = Uuid128([
    0x00, 0x07, 0x00, 0x01, 0x07, 0x45, 0x46, 0x50, 0x8d, 0x93, 0xdf, 0x59, 0xbe, 0x2f, 0xc1, 0x0a,
]);

/// Client Characteristic Configuration descriptor (16-bit UUID).
pub const CCC_UUID16: u16 = 0x2902;

/// The three attribute handles discovered on the peer.
///
/// All three must be non-zero before a subscription is attempted; the
/// set is reset to zero at the start of every discovery pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AttributeHandles {
    /// Value handle of the write characteristic.
    pub write: u16,
    /// Value handle of the read/notify characteristic.
    pub notify: u16,
    /// Handle of the notify characteristic's CCC descriptor.
    pub ccc: u16,
}

impl AttributeHandles {
    pub const fn empty() -> Self {
        Self {
            write: 0,
            notify: 0,
            ccc: 0,
        }
    }

    /// True once every handle the handshake needs has been discovered.
    pub const fn complete(&self) -> bool {
        self.write != 0 && self.notify != 0 && self.ccc != 0
    }
}

/// One attribute reported by a discovery pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GattAttribute {
    Characteristic { uuid: Uuid128, value_handle: u16 },
    Descriptor { uuid16: u16, handle: u16 },
}

/// Which attribute type a discovery pass walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DiscoverKind {
    Characteristics,
    Descriptors,
}

/// Link-layer connection parameters for the single connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectionParams {
    /// 1.25 ms units.
    pub interval_min: u16,
    /// 1.25 ms units.
    pub interval_max: u16,
    pub latency: u16,
    /// 10 ms units.
    pub supervision_timeout: u16,
}

impl ConnectionParams {
    pub const fn train_peer() -> Self {
        Self {
            interval_min: crate::config::CONN_INTERVAL_MIN,
            interval_max: crate::config::CONN_INTERVAL_MAX,
            latency: crate::config::CONN_LATENCY,
            supervision_timeout: crate::config::CONN_SUP_TIMEOUT,
        }
    }
}

/// HCI reason codes we disconnect with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DisconnectReason {
    /// HCI 0x13 - remote user terminated connection.
    RemoteUserTerminated,
}

/// Data-length extension request issued right after connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DataLength {
    pub tx_octets: u16,
    pub tx_time_us: u16,
}

impl DataLength {
    pub const fn extended() -> Self {
        Self {
            tx_octets: crate::config::DATA_LENGTH_TX_OCTETS,
            tx_time_us: crate::config::DATA_LENGTH_TX_TIME_US,
        }
    }
}

/// The BLE command interface the pairing machine consumes.
///
/// Calls are synchronous command submissions: an `Ok` means the stack
/// accepted the request, and completion arrives later as a `StatusFlags`
/// post on the bus. The embedded build implements this over the vendor
/// stack; tests use a recording mock.
pub trait PairingStack {
    /// Begin an active, duplicate-filtered scan.
    fn start_scan(&mut self) -> Result<(), StackError>;

    /// Issue a connection request to `peer`.
    fn connect(&mut self, peer: PeerAddress, params: &ConnectionParams) -> Result<(), StackError>;

    /// Abort a connect attempt that has not completed yet.
    fn cancel_connect(&mut self);

    /// Tear down an established connection.
    fn disconnect(&mut self, conn: ConnHandle, reason: DisconnectReason);

    /// Request a TX data-length update (advisory; failures do not gate
    /// the pairing sequence).
    fn set_data_length(&mut self, conn: ConnHandle, len: DataLength) -> Result<(), StackError>;

    /// Start a discovery pass of `kind` from `start_handle` to 0xFFFF.
    fn discover(
        &mut self,
        conn: ConnHandle,
        kind: DiscoverKind,
        start_handle: u16,
    ) -> Result<(), StackError>;

    /// Enable notifications: write the CCC and install the notify sink.
    fn subscribe(
        &mut self,
        conn: ConnHandle,
        notify_handle: u16,
        ccc_handle: u16,
    ) -> Result<(), StackError>;

    /// Write `payload` to the peer's `handle`.
    fn write(&mut self, conn: ConnHandle, handle: u16, payload: &[u8]) -> Result<(), StackError>;

    /// Our own public address.
    fn local_address(&self) -> PeerAddress;
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests (run on host, not embedded)
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_wire_order_is_byte_reversed() {
        // 00070002-0745-4650-8d93-df59be2fc10a, LSB first on the wire.
        let le = WRITE_CHAR_UUID.to_le_bytes();
        assert_eq!(
            le,
            [
                0x0a, 0xc1, 0x2f, 0xbe, 0x59, 0xdf, 0x93, 0x8d, 0x50, 0x46, 0x45, 0x07, 0x02,
                0x00, 0x07, 0x00,
            ]
        );
        // Round-trips back to the canonical constant.
        assert_eq!(Uuid128(le).to_le_bytes(), WRITE_CHAR_UUID.0);
    }

    #[test]
    fn handle_set_completeness() {
        let mut h = AttributeHandles::empty();
        assert!(!h.complete());
        h.write = 0x0012;
        h.notify = 0x0015;
        assert!(!h.complete());
        h.ccc = 0x0016;
        assert!(h.complete());
    }
}
