//! Application-wide constants and compile-time configuration.
//!
//! All timing parameters, protocol constants, UUIDs and thresholds live
//! here so they can be tuned in one place.

// Peer identity

/// Peer devices advertise a name containing this literal substring.
pub const PEER_NAME_PREFIX: &str = "lego_train_";

/// Our own advertised name: prefix + two low address bytes in hex.
pub const LOCAL_NAME_PREFIX: &str = "lego_train_ctrl_";

// Wire-level payloads (peer-agreed, fixed size)

/// Handshake command prefix written to the peer's write characteristic.
pub const SCAN_CODE: &[u8; 4] = b"SCAN";

/// Full handshake command length: `SCAN_CODE` + 6-byte local address.
pub const SCAN_CMD_LEN: usize = 10;

/// Peer confirmation notification payload.
pub const RESP_OK_CODE: &[u8; 2] = b"OK";

// Advertising

/// 16-bit device-type code carried in the service-data payload (LE).
pub const ADV_DEVICE_TYPE_CODE: u16 = 0x3456;

/// Number of advertised modes; the mode byte cycles 0 -> 1 -> 2 -> 0.
pub const ADV_MODE_COUNT: u8 = 3;

// BLE scanning / connection

/// Scan interval (0.625 ms units) - fast scanning while searching.
pub const SCAN_INTERVAL: u16 = 0x0060;

/// Scan window (0.625 ms units).
pub const SCAN_WINDOW: u16 = 0x0030;

/// Connection interval bounds (1.25 ms units), fast-init range.
pub const CONN_INTERVAL_MIN: u16 = 0x0018;
pub const CONN_INTERVAL_MAX: u16 = 0x0028;

/// Slave latency (connection events the peer may skip).
pub const CONN_LATENCY: u16 = 0;

/// Supervision timeout (10 ms units). 400 = 4 s.
pub const CONN_SUP_TIMEOUT: u16 = 400;

/// How long to wait for the "connected" signal after a connect request.
pub const CONNECT_TIMEOUT_MS: u32 = 20_000;

/// GATT discovery always restarts from the first attribute handle.
pub const FIRST_ATTRIBUTE_HANDLE: u16 = 0x0001;

/// GATT discovery end handle.
pub const LAST_ATTRIBUTE_HANDLE: u16 = 0xFFFF;

/// Data-length update requested right after connecting (advisory).
pub const DATA_LENGTH_TX_OCTETS: u16 = 0x00FB;
pub const DATA_LENGTH_TX_TIME_US: u16 = 0x0848;

// Power management

/// Sleep/wall clock rate (32.768 kHz crystal).
pub const SLEEP_CLOCK_HZ: u32 = 32_768;

/// Minimum worthwhile sleep window in sleep-clock ticks (~2 ms).
/// Below this the enter/leave overhead exceeds the saving.
pub const MIN_SLEEP_TICKS: u32 = 66;

/// Bounded retry count for the two-word wall-clock capture.
pub const WALL_CLOCK_READ_RETRIES: u32 = 4;

/// Flash-wake compensation offsets (sleep-clock ticks), per read mode.
/// Continuous-read quad wakes fastest, plain dual slowest.
pub const FLASH_WAKE_TICKS_QUAD_CONTINUOUS: u32 = 28;
pub const FLASH_WAKE_TICKS_QUAD: u32 = 33;
pub const FLASH_WAKE_TICKS_DUAL: u32 = 39;

// Shutdown supervisor

/// Main loop cycle time (ms).
pub const THREAD_CYCLE_MS: u32 = 20;

/// Total inactivity before full hardware shutdown (ms).
pub const SHUTDOWN_AFTER_MS: u32 = 5_000;

/// Idle cycles before shutdown fires (250 at 20 ms/cycle = 5 s).
pub const SHUTDOWN_IDLE_CYCLES: u32 = SHUTDOWN_AFTER_MS / THREAD_CYCLE_MS;

/// Sentinel persisted to retained memory right before power-down.
pub const RETAINED_SENTINEL: u32 = 0xA5A5_5A5A;

/// Deepest power-down level duration (seconds). The device cold-boots
/// afterwards; there is no resume path.
pub const POWER_DOWN_SECS: u32 = 5;

// Watchdog

/// Watchdog timeout value written at boot.
pub const WATCHDOG_TIMEOUT: u32 = 0xFFFF;

// GPIO pin assignments (nRF52840-DK defaults)
//
// These are logical names; actual `embassy_nrf::peripherals::*` types are
// selected in `main.rs`. Adjust for your custom PCB.
//
//   Status LED   -> P0.06
//   Motor 1      -> P0.13
//   Motor 2      -> P0.14
//   Mode button  -> P0.11

/// Button debounce time (ms).
pub const BUTTON_DEBOUNCE_MS: u64 = 50;
