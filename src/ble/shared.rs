//! Link scratch shared between interrupt-context stack callbacks and the
//! pairing task.
//!
//! The vendor stack invokes its callbacks in interrupt or stack-task
//! context. They must not block, so all they do is stage data here
//! (peer address, raw connection handle, discovered attribute handles)
//! and post `StatusFlags` on the bus. The pairing task is the only
//! reader that acts on the staged data.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::ble::{
    AttributeHandles, ConnHandle, GattAttribute, PeerAddress, CCC_UUID16, READ_CHAR_UUID,
    WRITE_CHAR_UUID,
};
use crate::bus::{FlagBus, StatusFlags};
use crate::config::RESP_OK_CODE;

#[derive(Debug, Default)]
struct Scratch {
    peer: Option<PeerAddress>,
    conn: Option<ConnHandle>,
    handles: AttributeHandles,
}

/// Interrupt-safe staging area for the single BLE link.
pub struct LinkShared {
    inner: Mutex<CriticalSectionRawMutex, RefCell<Scratch>>,
}

impl LinkShared {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Scratch {
                peer: None,
                conn: None,
                handles: AttributeHandles::empty(),
            })),
        }
    }

    pub fn peer(&self) -> Option<PeerAddress> {
        self.inner.lock(|s| s.borrow().peer)
    }

    pub fn clear_peer(&self) {
        self.inner.lock(|s| s.borrow_mut().peer = None);
    }

    pub fn connection(&self) -> Option<ConnHandle> {
        self.inner.lock(|s| s.borrow().conn)
    }

    /// Take the connection handle, leaving "none" behind. The caller
    /// becomes responsible for the disconnect.
    pub fn release_connection(&self) -> Option<ConnHandle> {
        self.inner.lock(|s| s.borrow_mut().conn.take())
    }

    pub fn handles(&self) -> AttributeHandles {
        self.inner.lock(|s| s.borrow().handles)
    }

    /// Reset the attribute handle set to all-zero (start of a discovery
    /// pass).
    pub fn clear_handles(&self) {
        self.inner
            .lock(|s| s.borrow_mut().handles = AttributeHandles::empty());
    }
}

impl Default for LinkShared {
    fn default() -> Self {
        Self::new()
    }
}

/// What the scan callback tells the stack to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScanVerdict {
    Continue,
    Stop,
}

/// Advertisement-received callback.
///
/// Parses the payload for a local name; on a train-peer match, captures
/// the address, posts ADDRESS_FOUND and asks the caller to stop the
/// scan.
pub fn on_advert(
    shared: &LinkShared,
    bus: &FlagBus,
    addr: PeerAddress,
    adv_data: &[u8],
) -> ScanVerdict {
    if !super::adv_parser::matches_train_peer(adv_data) {
        return ScanVerdict::Continue;
    }
    shared.inner.lock(|s| s.borrow_mut().peer = Some(addr));
    bus.post(StatusFlags::ADDRESS_FOUND);
    ScanVerdict::Stop
}

/// Connection-established callback.
pub fn on_connected(shared: &LinkShared, bus: &FlagBus, conn: ConnHandle) {
    shared.inner.lock(|s| s.borrow_mut().conn = Some(conn));
    bus.post(StatusFlags::CONNECTED);
}

/// Connection-terminated callback. Clears the handle; the pairing task
/// notices through its timeout path.
pub fn on_disconnected(shared: &LinkShared) {
    shared.inner.lock(|s| s.borrow_mut().conn = None);
}

/// Discovery callback: one attribute of the current pass.
///
/// Characteristics are matched against the two known 128-bit UUIDs;
/// descriptors against the standard CCC UUID. Anything else is ignored.
pub fn on_attribute(shared: &LinkShared, attr: GattAttribute) {
    shared.inner.lock(|s| {
        let handles = &mut s.borrow_mut().handles;
        match attr {
            GattAttribute::Characteristic { uuid, value_handle } => {
                if uuid == WRITE_CHAR_UUID {
                    handles.write = value_handle;
                } else if uuid == READ_CHAR_UUID {
                    handles.notify = value_handle;
                }
            }
            GattAttribute::Descriptor { uuid16, handle } => {
                if uuid16 == CCC_UUID16 {
                    handles.ccc = handle;
                }
            }
        }
    });
}

/// Discovery callback: null terminator, the pass is complete.
///
/// If the CCC handle is already known the descriptor pass is redundant,
/// so completion is signalled directly; otherwise the characteristic
/// pass is reported and the machine follows up with descriptors.
pub fn on_discovery_complete(shared: &LinkShared, bus: &FlagBus) {
    if shared.handles().ccc != 0 {
        bus.post(StatusFlags::DESCRIPTOR_DISCOVERED);
    } else {
        bus.post(StatusFlags::CHARS_DISCOVERED);
    }
}

/// Notification callback.
///
/// An empty payload is the subscription acknowledgment; the fixed
/// 2-byte "OK" payload is the peer confirmation. Anything else is
/// ignored here.
pub fn on_notification(bus: &FlagBus, payload: &[u8]) {
    if payload.is_empty() {
        bus.post(StatusFlags::SUBSCRIBED);
    } else if payload == RESP_OK_CODE {
        bus.post(StatusFlags::PEER_CONFIRMED);
    }
}

/// Button IRQ handler body.
pub fn on_button_pressed(bus: &FlagBus) {
    bus.post(StatusFlags::BUTTON_PRESSED);
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests (run on host, not embedded)
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: PeerAddress = PeerAddress([0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);

    fn named_adv(name: &str) -> heapless::Vec<u8, 40> {
        let mut v = heapless::Vec::new();
        v.push((name.len() + 1) as u8).unwrap();
        v.push(0x09).unwrap();
        v.extend_from_slice(name.as_bytes()).unwrap();
        v
    }

    #[test]
    fn matching_advert_captures_address_and_stops_scan() {
        let shared = LinkShared::new();
        let bus = FlagBus::new();

        let verdict = on_advert(&shared, &bus, ADDR, &named_adv("lego_train_0102"));
        assert_eq!(verdict, ScanVerdict::Stop);
        assert_eq!(shared.peer(), Some(ADDR));
        assert!(bus.take().contains(StatusFlags::ADDRESS_FOUND));
    }

    #[test]
    fn non_matching_advert_is_ignored() {
        let shared = LinkShared::new();
        let bus = FlagBus::new();

        let verdict = on_advert(&shared, &bus, ADDR, &named_adv("kettle"));
        assert_eq!(verdict, ScanVerdict::Continue);
        assert_eq!(shared.peer(), None);
        assert!(bus.take().is_empty());
    }

    #[test]
    fn characteristic_uuids_record_value_handles() {
        let shared = LinkShared::new();

        on_attribute(
            &shared,
            GattAttribute::Characteristic {
                uuid: WRITE_CHAR_UUID,
                value_handle: 0x0012,
            },
        );
        on_attribute(
            &shared,
            GattAttribute::Characteristic {
                uuid: READ_CHAR_UUID,
                value_handle: 0x0015,
            },
        );
        // Unknown characteristic must not disturb the set.
        on_attribute(
            &shared,
            GattAttribute::Characteristic {
                uuid: crate::ble::Uuid128([0xAA; 16]),
                value_handle: 0x0044,
            },
        );

        let h = shared.handles();
        assert_eq!(h.write, 0x0012);
        assert_eq!(h.notify, 0x0015);
        assert_eq!(h.ccc, 0);
        assert!(!h.complete());
    }

    #[test]
    fn ccc_descriptor_completes_the_handle_set() {
        let shared = LinkShared::new();
        on_attribute(
            &shared,
            GattAttribute::Characteristic {
                uuid: WRITE_CHAR_UUID,
                value_handle: 0x0012,
            },
        );
        on_attribute(
            &shared,
            GattAttribute::Characteristic {
                uuid: READ_CHAR_UUID,
                value_handle: 0x0015,
            },
        );
        on_attribute(
            &shared,
            GattAttribute::Descriptor {
                uuid16: CCC_UUID16,
                handle: 0x0016,
            },
        );
        assert!(shared.handles().complete());

        shared.clear_handles();
        assert_eq!(shared.handles(), AttributeHandles::empty());
    }

    #[test]
    fn discovery_complete_signals_by_ccc_presence() {
        let shared = LinkShared::new();
        let bus = FlagBus::new();

        // CCC still unknown: characteristic pass completion.
        on_discovery_complete(&shared, &bus);
        assert_eq!(bus.take(), StatusFlags::CHARS_DISCOVERED);

        on_attribute(
            &shared,
            GattAttribute::Descriptor {
                uuid16: CCC_UUID16,
                handle: 0x0016,
            },
        );
        on_discovery_complete(&shared, &bus);
        assert_eq!(bus.take(), StatusFlags::DESCRIPTOR_DISCOVERED);
    }

    #[test]
    fn notification_payloads_classify_correctly() {
        let bus = FlagBus::new();

        on_notification(&bus, &[]);
        assert_eq!(bus.take(), StatusFlags::SUBSCRIBED);

        on_notification(&bus, b"OK");
        assert_eq!(bus.take(), StatusFlags::PEER_CONFIRMED);

        // Anything else is ignored.
        on_notification(&bus, b"NO");
        on_notification(&bus, b"OKX");
        assert!(bus.take().is_empty());
    }

    #[test]
    fn release_connection_clears_the_handle() {
        let shared = LinkShared::new();
        let bus = FlagBus::new();

        on_connected(&shared, &bus, ConnHandle(3));
        assert_eq!(shared.connection(), Some(ConnHandle(3)));
        assert_eq!(shared.release_connection(), Some(ConnHandle(3)));
        assert_eq!(shared.connection(), None);
        assert_eq!(shared.release_connection(), None);
    }

    #[test]
    fn disconnect_callback_clears_connection() {
        let shared = LinkShared::new();
        let bus = FlagBus::new();
        on_connected(&shared, &bus, ConnHandle(7));
        on_disconnected(&shared);
        assert_eq!(shared.connection(), None);
    }
}
