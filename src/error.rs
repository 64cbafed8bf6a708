//! Unified error type for trainlink.
//!
//! We avoid `alloc` - all error variants carry only fixed-size data.
//! Implements `defmt::Format` for efficient on-target logging.

/// Top-level error type used across the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The BLE stack rejected or failed a command.
    Stack(StackError),

    /// An operation exhausted its bounded retry/wait budget.
    Timeout,

    /// A command needed an active connection and there was none.
    NotConnected,

    /// A required discovered attribute handle was still zero.
    HandleUnknown,

    /// Buffer too small for the requested operation.
    BufferOverflow,
}

/// Subset of BLE stack errors we propagate (keeps the enum `Copy`-friendly).
///
/// Every variant folds into the same local recovery path: tear down any
/// connection and restart scanning. Nothing above the pairing task ever
/// sees these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StackError {
    /// Raw GAP / GATT error code from the vendor stack.
    Raw(i32),
    /// Scan could not start.
    ScanFailed,
    /// Connection request was rejected.
    ConnectFailed,
    /// GATT discovery call was rejected.
    DiscoveryFailed,
    /// CCC subscribe call was rejected.
    SubscribeFailed,
    /// Characteristic write was rejected.
    WriteFailed,
    /// The stack is busy with a conflicting operation.
    Busy,
}

// Convenience conversions

impl From<StackError> for Error {
    fn from(e: StackError) -> Self {
        Error::Stack(e)
    }
}
