//! Advertising service-data payload.
//!
//! 3 bytes of 16-bit service data: the constant device-type code in
//! little-endian order plus one mutable mode byte. The mode byte is only
//! ever mutated by the button-press handler and cycles 0 -> 1 -> 2 -> 0;
//! after every mutation the payload must be re-broadcast.

use crate::config::{ADV_DEVICE_TYPE_CODE, ADV_MODE_COUNT};

/// Size of the service-data payload.
pub const ADV_PAYLOAD_LEN: usize = 3;

/// The mutable advertising payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdvPayload {
    buf: [u8; ADV_PAYLOAD_LEN],
}

impl AdvPayload {
    /// Fresh payload: device-type code, mode 0.
    pub const fn new() -> Self {
        Self {
            buf: [
                (ADV_DEVICE_TYPE_CODE & 0xFF) as u8,
                (ADV_DEVICE_TYPE_CODE >> 8) as u8,
                0x00,
            ],
        }
    }

    /// Current mode byte (0..ADV_MODE_COUNT).
    pub const fn mode(&self) -> u8 {
        self.buf[2]
    }

    /// Advance the mode byte one step: 0 -> 1 -> 2 -> 0.
    ///
    /// Returns the new mode. The caller must re-broadcast afterwards.
    pub fn cycle_mode(&mut self) -> u8 {
        self.buf[2] = (self.buf[2] + 1) % ADV_MODE_COUNT;
        self.buf[2]
    }

    /// Raw bytes for the advertising data builder.
    pub const fn as_bytes(&self) -> &[u8; ADV_PAYLOAD_LEN] {
        &self.buf
    }
}

impl Default for AdvPayload {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests (run on host, not embedded)
// ═══════════════════════════════════════════════════════════════════════════
