//! Advertisement payload parsing and peer-name matching.
//!
//! Walks the AD structures of a received advertisement looking for a
//! shortened/complete local name, and decides whether that name belongs
//! to a train peer (`lego_train_` naming convention).

use core::fmt::Write;

use heapless::String;

use crate::ble::PeerAddress;
use crate::config::{LOCAL_NAME_PREFIX, PEER_NAME_PREFIX};

/// Longest device name we keep (truncated beyond this).
pub const MAX_NAME_LEN: usize = 30;

/// Extract the complete (0x09) or shortened (0x08) local name from raw
/// advertisement data. Returns `None` when no name AD structure exists.
pub fn extract_device_name(data: &[u8]) -> Option<String<MAX_NAME_LEN>> {
    let mut i = 0;
    while i < data.len() {
        let len = data[i] as usize;
        if len == 0 || i + len >= data.len() {
            break;
        }
        let ad_type = data[i + 1];
        if ad_type == 0x08 || ad_type == 0x09 {
            let name_bytes = &data[i + 2..i + 1 + len];
            let mut name = String::new();
            for &b in name_bytes {
                if name.push(b as char).is_err() {
                    break;
                }
            }
            return Some(name);
        }
        i += len + 1;
    }
    None
}

/// True when `name` follows the train-peer naming convention.
pub fn is_train_peer(name: &str) -> bool {
    // Substring match, not prefix: peers may decorate the name further.
    let needle = PEER_NAME_PREFIX.as_bytes();
    let hay = name.as_bytes();
    if needle.len() > hay.len() {
        return false;
    }
    hay.windows(needle.len()).any(|w| w == needle)
}

/// Advertisement matched a train peer and carries its name.
pub fn matches_train_peer(adv_data: &[u8]) -> bool {
    extract_device_name(adv_data)
        .map(|n| is_train_peer(&n))
        .unwrap_or(false)
}

/// Build our own advertised name: `lego_train_ctrl_XXYY` where XXYY are
/// the two low bytes of the local public address in hex.
pub fn local_device_name(addr: PeerAddress) -> String<MAX_NAME_LEN> {
    let mut name = String::new();
    // Prefix and two hex bytes always fit in MAX_NAME_LEN.
    let _ = name.push_str(LOCAL_NAME_PREFIX);
    let _ = write!(&mut name, "{:02X}{:02X}", addr.0[0], addr.0[1]);
    name
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests (run on host, not embedded)
// ═══════════════════════════════════════════════════════════════════════════
