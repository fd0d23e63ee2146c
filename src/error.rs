//! Error types for the usbmon record codec.

use thiserror::Error;

/// Result type alias for codec operations.
pub type Result<T> = std::result::Result<T, UsbRevueError>;

/// Errors that can occur when decoding, editing or re-encoding records.
#[derive(Error, Debug)]
pub enum UsbRevueError {
    /// Buffer is smaller than the fixed 64-byte usbmon header
    #[error("Not a USB packet: {len} bytes is shorter than the {min}-byte header")]
    TooShort { len: usize, min: usize },

    /// Event type or transfer type byte outside its closed enumeration
    #[error("Not a USB packet: {0}")]
    NotAUsbRecord(String),

    /// Field is not present in the active field table
    #[error("Unknown field: {0}")]
    UnknownField(&'static str),

    /// Field table places a field beyond the end of the buffer
    #[error("Buffer too short for field '{field}': need {needed} bytes, have {len}")]
    BufferTooShort {
        field: &'static str,
        needed: usize,
        len: usize,
    },

    /// Parameterized field read without a runtime length
    #[error("Field '{0}' needs a length to be decoded")]
    UnsizedField(&'static str),

    /// Value cannot be represented by the field's codec
    #[error("Cannot encode {value} into field '{field}': {reason}")]
    EncodeRange {
        field: &'static str,
        value: String,
        reason: String,
    },

    /// Payload write outside the trailing data region
    #[error("Payload index {index} out of range for {len}-byte payload")]
    PayloadIndex { index: usize, len: usize },

    /// Symbolic name not present in an enumeration table
    #[error("Unknown {table} name: {name}")]
    UnknownSymbol { table: &'static str, name: String },

    /// Invalid capture file framing (wrong magic, unsupported link type)
    #[error("Invalid capture format: {0}")]
    InvalidFormat(String),

    /// I/O error occurred while reading or writing
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Polars error during DataFrame construction
    #[error("Polars error: {0}")]
    PolarsError(#[from] polars::error::PolarsError),
}
