//! The 8-byte USB control setup packet and its bit-packed bmRequestType.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::enums::{
    Direction, Recipient, RequestKind, StandardRequest, DIRECTION_MASK, RECIPIENT_MASK,
    SETUP_REQUEST, TYPE_MASK, UNKNOWN_REQUEST,
};
use crate::error::{Result, UsbRevueError};
use crate::record::{FieldDescriptor, FieldName, FieldTable, Record};
use crate::types::{PrimitiveCodec, Value};

/// Size of a setup packet in bytes.
pub const SETUP_LEN: usize = 8;

/// Fields of the setup packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetupFieldName {
    RequestType,
    Request,
    Value,
    Index,
    Length,
}

impl SetupFieldName {
    pub const ALL: [SetupFieldName; 5] = [
        SetupFieldName::RequestType,
        SetupFieldName::Request,
        SetupFieldName::Value,
        SetupFieldName::Index,
        SetupFieldName::Length,
    ];
}

impl FieldName for SetupFieldName {
    fn as_str(self) -> &'static str {
        match self {
            SetupFieldName::RequestType => "bmRequestType",
            SetupFieldName::Request => "bRequest",
            SetupFieldName::Value => "wValue",
            SetupFieldName::Index => "wIndex",
            SetupFieldName::Length => "wLength",
        }
    }
}

impl FromStr for SetupFieldName {
    type Err = UsbRevueError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| UsbRevueError::UnknownSymbol {
                table: "setup field",
                name: s.to_string(),
            })
    }
}

/// Field table shared by every setup packet.
pub fn setup_table() -> &'static FieldTable<SetupFieldName> {
    static TABLE: OnceLock<FieldTable<SetupFieldName>> = OnceLock::new();
    TABLE.get_or_init(|| {
        FieldTable::new([
            (SetupFieldName::RequestType, FieldDescriptor::new(PrimitiveCodec::U8, 0)),
            (SetupFieldName::Request, FieldDescriptor::new(PrimitiveCodec::U8, 1)),
            (SetupFieldName::Value, FieldDescriptor::new(PrimitiveCodec::U16, 2)),
            (SetupFieldName::Index, FieldDescriptor::new(PrimitiveCodec::U16, 4)),
            (SetupFieldName::Length, FieldDescriptor::new(PrimitiveCodec::U16, 6)),
        ])
    })
}

/// Replaces the bits of `old` selected by `mask` with those of `new`.
///
/// Bits outside `mask` always come from `old`.
pub fn apply_mask(mask: u8, old: u8, new: u8) -> u8 {
    (mask & new) | (!mask & old)
}

/// A decoded setup packet.
///
/// When obtained from a [`UsbPacket`](crate::packet::UsbPacket) it is a view over the
/// packet's setup bytes; edits go through [`SetupMut`](crate::packet::SetupMut) so
/// they reach the packet's buffer in the same call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupField {
    record: Record<'static, SetupFieldName>,
}

impl SetupField {
    /// Decodes the first 8 bytes of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SETUP_LEN {
            return Err(UsbRevueError::TooShort {
                len: bytes.len(),
                min: SETUP_LEN,
            });
        }
        Ok(Self {
            record: Record::new(setup_table(), bytes[..SETUP_LEN].to_vec()),
        })
    }

    pub fn get(&self, field: SetupFieldName) -> Result<Value> {
        self.record.get(field)
    }

    pub fn set(&mut self, field: SetupFieldName, value: Value) -> Result<()> {
        self.record.set(field, value)
    }

    /// The 8 setup bytes as currently encoded.
    pub fn encode(&self) -> &[u8] {
        self.record.encode()
    }

    // The buffer always holds SETUP_LEN bytes, so table lookups cannot fail.
    fn scalar(&self, field: SetupFieldName) -> u64 {
        self.record
            .get(field)
            .ok()
            .and_then(|v| v.as_u64())
            .unwrap_or_default()
    }

    /// Raw bmRequestType.
    pub fn request_type(&self) -> u8 {
        self.scalar(SetupFieldName::RequestType) as u8
    }

    /// Raw bRequest.
    pub fn request(&self) -> u8 {
        self.scalar(SetupFieldName::Request) as u8
    }

    /// wValue.
    pub fn value(&self) -> u16 {
        self.scalar(SetupFieldName::Value) as u16
    }

    /// wIndex.
    pub fn index(&self) -> u16 {
        self.scalar(SetupFieldName::Index) as u16
    }

    /// wLength.
    pub fn length(&self) -> u16 {
        self.scalar(SetupFieldName::Length) as u16
    }

    pub fn set_request_type(&mut self, raw: u8) -> Result<()> {
        self.set(SetupFieldName::RequestType, Value::from(raw))
    }

    pub fn set_request(&mut self, raw: u8) -> Result<()> {
        self.set(SetupFieldName::Request, Value::from(raw))
    }

    pub fn set_value(&mut self, value: u16) -> Result<()> {
        self.set(SetupFieldName::Value, Value::from(value))
    }

    pub fn set_index(&mut self, index: u16) -> Result<()> {
        self.set(SetupFieldName::Index, Value::from(index))
    }

    pub fn set_length(&mut self, length: u16) -> Result<()> {
        self.set(SetupFieldName::Length, Value::from(length))
    }

    /// Decodes the direction bit of bmRequestType.
    pub fn direction(&self) -> Direction {
        if self.request_type() & DIRECTION_MASK != 0 {
            Direction::DeviceToHost
        } else {
            Direction::HostToDevice
        }
    }

    /// Decodes the type bits of bmRequestType.
    pub fn kind(&self) -> RequestKind {
        // The table covers all four values of the two type bits.
        RequestKind::from_code(self.request_type() & TYPE_MASK).unwrap_or(RequestKind::Reserved)
    }

    /// Decodes the recipient bits of bmRequestType, `None` for reserved values.
    pub fn recipient(&self) -> Option<Recipient> {
        Recipient::from_code(self.request_type() & RECIPIENT_MASK)
    }

    pub fn set_direction(&mut self, direction: Direction) -> Result<()> {
        self.set_masked(DIRECTION_MASK, direction.code())
    }

    pub fn set_kind(&mut self, kind: RequestKind) -> Result<()> {
        self.set_masked(TYPE_MASK, kind.code())
    }

    pub fn set_recipient(&mut self, recipient: Recipient) -> Result<()> {
        self.set_masked(RECIPIENT_MASK, recipient.code())
    }

    fn set_masked(&mut self, mask: u8, bits: u8) -> Result<()> {
        let raw = apply_mask(mask, self.request_type(), bits);
        self.set_request_type(raw)
    }

    /// bRequest as a standard request, if it is one.
    pub fn standard_request(&self) -> Option<StandardRequest> {
        StandardRequest::from_code(self.request())
    }

    /// Symbolic name of bRequest, `"unknown"` outside the standard set.
    pub fn request_name(&self) -> &'static str {
        SETUP_REQUEST.name(self.request()).unwrap_or(UNKNOWN_REQUEST)
    }

    /// Compact hex rendering of the raw bytes, 16-bit fields grouped as stored.
    pub fn data_to_str(&self) -> String {
        let b = self.encode();
        format!(
            "{:02X} {:02X} {:02X}{:02X} {:02X}{:02X} {:02X}{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]
        )
    }

    /// Single-line rendering of every decoded field.
    pub fn fields_to_str(&self) -> String {
        let recipient = self.recipient().map(|r| r.name()).unwrap_or("reserved");
        format!(
            "bmRequestType: {}, {}, {} ({:#010b}); bRequest: {} (0x{:X}); wValue: (0x{:X}); wIndex: (0x{:X}); wLength: (0x{:X})",
            self.kind(),
            self.direction(),
            recipient,
            self.request_type(),
            self.request_name(),
            self.request(),
            self.value(),
            self.index(),
            self.length()
        )
    }
}

impl fmt::Display for SetupField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fields_to_str())?;
        if self.kind() == RequestKind::Standard {
            let recipient = self.recipient().map(|r| r.name()).unwrap_or("reserved");
            write!(
                f,
                ", request: {}, direction: {}, recipient: {}",
                self.request_name(),
                self.direction(),
                recipient
            )?;
        }
        write!(f, ", data: {}", self.data_to_str())
    }
}
