//! Event/notification bus - a single-consumer bit-flag mailbox.
//!
//! Producers are interrupt-context BLE stack callbacks plus the mode
//! button; the single consumer is the pairing task. Producers OR their
//! flag into the pending set; the consumer's wait atomically reads and
//! clears the whole set, so a flag posted between two wake-ups is never
//! lost even if it is not individually observed.

use core::future::poll_fn;
use core::sync::atomic::{AtomicU32, Ordering};
use core::task::Poll;

use embassy_sync::waitqueue::AtomicWaker;

/// Bitmask of asynchronous status events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatusFlags(pub u32);

impl StatusFlags {
    /// Peer advertisement matched, address captured.
    pub const ADDRESS_FOUND: StatusFlags = StatusFlags(0x01);
    /// GAP connection established.
    pub const CONNECTED: StatusFlags = StatusFlags(0x02);
    /// Characteristic discovery pass completed.
    pub const CHARS_DISCOVERED: StatusFlags = StatusFlags(0x04);
    /// Descriptor discovery pass completed (CCC handle known).
    pub const DESCRIPTOR_DISCOVERED: StatusFlags = StatusFlags(0x08);
    /// Subscription acknowledged (empty notification).
    pub const SUBSCRIBED: StatusFlags = StatusFlags(0x10);
    /// Peer sent the "OK" confirmation.
    pub const PEER_CONFIRMED: StatusFlags = StatusFlags(0x20);
    /// Mode button pressed.
    pub const BUTTON_PRESSED: StatusFlags = StatusFlags(0x40);

    pub const fn empty() -> Self {
        StatusFlags(0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: StatusFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn union(self, other: StatusFlags) -> Self {
        StatusFlags(self.0 | other.0)
    }
}

impl core::ops::BitOr for StatusFlags {
    type Output = StatusFlags;

    fn bitor(self, rhs: StatusFlags) -> StatusFlags {
        self.union(rhs)
    }
}

/// Single-consumer flag mailbox.
///
/// `post` is safe from interrupt context; `take`/`wait` belong to the
/// one consumer task.
pub struct FlagBus {
    pending: AtomicU32,
    waker: AtomicWaker,
}

impl FlagBus {
    pub const fn new() -> Self {
        Self {
            pending: AtomicU32::new(0),
            waker: AtomicWaker::new(),
        }
    }

    /// OR `flags` into the pending set and wake the consumer.
    pub fn post(&self, flags: StatusFlags) {
        self.pending.fetch_or(flags.0, Ordering::AcqRel);
        self.waker.wake();
    }

    /// Atomically take (read and clear) the accumulated pending set.
    pub fn take(&self) -> StatusFlags {
        StatusFlags(self.pending.swap(0, Ordering::AcqRel))
    }

    /// Read the pending set without clearing it. Used by the idle hook
    /// to veto a sleep when the consumer has unprocessed work.
    pub fn peek(&self) -> StatusFlags {
        StatusFlags(self.pending.load(Ordering::Acquire))
    }

    /// Wait until at least one flag is pending, then take the whole set.
    ///
    /// Bounded waits are built by the caller wrapping this future in a
    /// timeout (`embassy_time::with_timeout` on target).
    pub async fn wait(&self) -> StatusFlags {
        poll_fn(|cx| {
            let flags = self.take();
            if flags.is_empty() {
                self.waker.register(cx.waker());
                // Re-check after registering so a post racing with the
                // registration is not missed.
                let flags = self.take();
                if flags.is_empty() {
                    Poll::Pending
                } else {
                    Poll::Ready(flags)
                }
            } else {
                Poll::Ready(flags)
            }
        })
        .await
    }
}

impl Default for FlagBus {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests (run on host, not embedded)
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_on_empty_bus_returns_nothing() {
        let bus = FlagBus::new();
        assert!(bus.take().is_empty());
    }

    #[test]
    fn posted_flag_is_observed_once() {
        let bus = FlagBus::new();
        bus.post(StatusFlags::CONNECTED);
        assert_eq!(bus.take(), StatusFlags::CONNECTED);
        assert!(bus.take().is_empty());
    }

    #[test]
    fn peek_does_not_clear() {
        let bus = FlagBus::new();
        bus.post(StatusFlags::CONNECTED);
        assert_eq!(bus.peek(), StatusFlags::CONNECTED);
        assert_eq!(bus.take(), StatusFlags::CONNECTED);
        assert!(bus.peek().is_empty());
    }

    #[test]
    fn flags_accumulate_between_takes() {
        let bus = FlagBus::new();
        bus.post(StatusFlags::ADDRESS_FOUND);
        bus.post(StatusFlags::CONNECTED);
        bus.post(StatusFlags::BUTTON_PRESSED);

        let flags = bus.take();
        assert!(flags.contains(StatusFlags::ADDRESS_FOUND));
        assert!(flags.contains(StatusFlags::CONNECTED));
        assert!(flags.contains(StatusFlags::BUTTON_PRESSED));
        assert!(!flags.contains(StatusFlags::SUBSCRIBED));
    }

    #[test]
    fn reposting_same_flag_is_idempotent() {
        let bus = FlagBus::new();
        bus.post(StatusFlags::SUBSCRIBED);
        bus.post(StatusFlags::SUBSCRIBED);
        assert_eq!(bus.take(), StatusFlags::SUBSCRIBED);
        assert!(bus.take().is_empty());
    }

    #[test]
    fn flag_set_operations() {
        let both = StatusFlags::CONNECTED | StatusFlags::SUBSCRIBED;
        assert!(both.contains(StatusFlags::CONNECTED));
        assert!(both.contains(StatusFlags::SUBSCRIBED));
        assert!(!both.contains(StatusFlags::PEER_CONFIRMED));
        assert!(StatusFlags::empty().is_empty());
    }
}
