//! Enumeration tables for usbmon and USB setup codes.
//!
//! Every table is a [`SymbolTable`]: an immutable list of `(name, code)` pairs
//! searchable in both directions. The typed enums below mirror those tables:
//! names always come from the table, and each variant's code must resolve to
//! an entry of it.

use crate::error::{Result, UsbRevueError};
use std::fmt;
use std::str::FromStr;

/// Immutable bidirectional map between symbolic names and small integer codes.
#[derive(Debug, Clone, Copy)]
pub struct SymbolTable {
    kind: &'static str,
    entries: &'static [(&'static str, u8)],
}

impl SymbolTable {
    pub const fn new(kind: &'static str, entries: &'static [(&'static str, u8)]) -> Self {
        Self { kind, entries }
    }

    /// What the table enumerates, e.g. "transfer type".
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn entries(&self) -> &'static [(&'static str, u8)] {
        self.entries
    }

    /// Looks up the name for a code.
    pub fn name(&self, code: u8) -> Option<&'static str> {
        self.entries
            .iter()
            .find(|(_, c)| *c == code)
            .map(|(name, _)| *name)
    }

    /// Looks up the code for a name.
    pub fn code(&self, name: &str) -> Option<u8> {
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, code)| *code)
    }

    /// Like [`SymbolTable::code`], failing with `UnknownSymbol`.
    pub fn lookup_code(&self, name: &str) -> Result<u8> {
        self.code(name).ok_or_else(|| UsbRevueError::UnknownSymbol {
            table: self.kind,
            name: name.to_string(),
        })
    }
}

// Note that usbmon's transfer type numbering differs from the endpoint
// attribute numbering in <linux/usb/ch9.h>.
pub const TRANSFER_TYPE: SymbolTable = SymbolTable::new(
    "transfer type",
    &[
        ("isochronous", 0),
        ("interrupt", 1),
        ("control", 2),
        ("bulk", 3),
    ],
);

pub const EVENT_TYPE: SymbolTable = SymbolTable::new(
    "event type",
    &[("submission", b'S'), ("callback", b'C'), ("error", b'E')],
);

/// bmRequestType bit groups.
pub const DIRECTION_MASK: u8 = 0b1000_0000;
pub const TYPE_MASK: u8 = 0b0110_0000;
pub const RECIPIENT_MASK: u8 = 0b0001_1111;

pub const REQUEST_TYPE_DIRECTION: SymbolTable = SymbolTable::new(
    "request direction",
    &[("host_to_device", 0b0000_0000), ("device_to_host", 0b1000_0000)],
);

pub const REQUEST_TYPE_TYPE: SymbolTable = SymbolTable::new(
    "request type",
    &[
        ("standard", 0b0000_0000),
        ("class_", 0b0010_0000),
        ("vendor", 0b0100_0000),
        ("reserved", 0b0110_0000),
    ],
);

// Values 4..=31 are reserved.
pub const REQUEST_TYPE_RECIPIENT: SymbolTable = SymbolTable::new(
    "request recipient",
    &[
        ("device", 0b0000_0000),
        ("interface", 0b0000_0001),
        ("endpoint", 0b0000_0010),
        ("other", 0b0000_0011),
    ],
);

/// Standard bRequest codes. 0x02, 0x04 and 0x0D.. are reserved.
pub const SETUP_REQUEST: SymbolTable = SymbolTable::new(
    "request",
    &[
        ("GET_STATUS", 0x00),
        ("CLEAR_FEATURE", 0x01),
        ("SET_FEATURE", 0x03),
        ("SET_ADDRESS", 0x05),
        ("GET_DESCRIPTOR", 0x06),
        ("SET_DESCRIPTOR", 0x07),
        ("GET_CONFIGURATION", 0x08),
        ("SET_CONFIGURATION", 0x09),
        ("GET_INTERFACE", 0x0A),
        ("SET_INTERFACE", 0x0B),
        ("SYNCH_FRAME", 0x0C),
    ],
);

/// Name reported for request codes outside the standard set.
pub const UNKNOWN_REQUEST: &str = "unknown";

macro_rules! symbolic_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident in $table:ident {
            $($variant:ident = $code:expr),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Raw code as stored in the record.
            pub fn code(self) -> u8 {
                match self {
                    $($name::$variant => $code),+
                }
            }

            /// Decodes a raw code, `None` if it is not in the table.
            pub fn from_code(code: u8) -> Option<Self> {
                $table.name(code)?;
                Self::ALL.iter().copied().find(|v| v.code() == code)
            }

            pub fn name(self) -> &'static str {
                $table.name(self.code()).unwrap_or(UNKNOWN_REQUEST)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }

        impl FromStr for $name {
            type Err = UsbRevueError;

            fn from_str(s: &str) -> Result<Self> {
                let code = $table.lookup_code(s)?;
                Self::from_code(code).ok_or_else(|| UsbRevueError::UnknownSymbol {
                    table: $table.kind(),
                    name: s.to_string(),
                })
            }
        }
    };
}

symbolic_enum! {
    /// usbmon transfer type (`xfer_type`).
    pub enum TransferType in TRANSFER_TYPE {
        Isochronous = 0,
        Interrupt = 1,
        Control = 2,
        Bulk = 3,
    }
}

symbolic_enum! {
    /// Which phase of a transfer a record represents (`event_type`).
    pub enum EventType in EVENT_TYPE {
        Submission = b'S',
        Callback = b'C',
        Error = b'E',
    }
}

symbolic_enum! {
    /// bmRequestType bit 7.
    pub enum Direction in REQUEST_TYPE_DIRECTION {
        HostToDevice = 0b0000_0000,
        DeviceToHost = 0b1000_0000,
    }
}

symbolic_enum! {
    /// bmRequestType bits 5-6.
    pub enum RequestKind in REQUEST_TYPE_TYPE {
        Standard = 0b0000_0000,
        Class = 0b0010_0000,
        Vendor = 0b0100_0000,
        Reserved = 0b0110_0000,
    }
}

symbolic_enum! {
    /// bmRequestType bits 0-4.
    pub enum Recipient in REQUEST_TYPE_RECIPIENT {
        Device = 0b0000_0000,
        Interface = 0b0000_0001,
        Endpoint = 0b0000_0010,
        Other = 0b0000_0011,
    }
}

symbolic_enum! {
    /// Standard bRequest codes.
    pub enum StandardRequest in SETUP_REQUEST {
        GetStatus = 0x00,
        ClearFeature = 0x01,
        SetFeature = 0x03,
        SetAddress = 0x05,
        GetDescriptor = 0x06,
        SetDescriptor = 0x07,
        GetConfiguration = 0x08,
        SetConfiguration = 0x09,
        GetInterface = 0x0A,
        SetInterface = 0x0B,
        SynchFrame = 0x0C,
    }
}
