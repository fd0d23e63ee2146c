//! usbmon packet records.
//!
//! A [`UsbPacket`] is a [`Record`] over the 64-byte usbmon binary header
//! (`struct usbmon_packet`, see the kernel's `Documentation/usb/usbmon.txt`)
//! followed by the captured payload. Bytes 40..48 are a union: the control
//! setup packet, or the isochronous `error_count`/`numdesc` pair followed by
//! `interval` and `start_frame` at 48..56. The engine decodes whichever view
//! is asked for; the typed accessors here decide which one is meaningful.

use std::cell::OnceCell;
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::enums::{Direction, EventType, TransferType, DIRECTION_MASK};
use crate::error::{Result, UsbRevueError};
use crate::record::{FieldDescriptor, FieldName, FieldTable, Record};
use crate::setup::{SetupField, SetupFieldName, SETUP_LEN};
use crate::types::{PrimitiveCodec, Value};

/// Size of the fixed usbmon header.
pub const HEADER_LEN: usize = 64;

/// Offset of the setup bytes within the header.
pub const SETUP_OFFSET: usize = 40;

/// `flag_setup` value marking the setup bytes as present.
///
/// The text interface prints `'s'`; binary captures carry 0x00.
pub const SETUP_PRESENT: u8 = 0x00;

/// Fields of a usbmon packet record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsbField {
    Urb,
    EventType,
    XferType,
    Epnum,
    Devnum,
    Busnum,
    FlagSetup,
    FlagData,
    TsSec,
    TsUsec,
    Status,
    Length,
    LenCap,
    Setup,
    ErrorCount,
    Numdesc,
    Interval,
    StartFrame,
    XferFlags,
    Ndesc,
    Data,
}

impl UsbField {
    /// Every field, in wire order.
    pub const ALL: [UsbField; 21] = [
        UsbField::Urb,
        UsbField::EventType,
        UsbField::XferType,
        UsbField::Epnum,
        UsbField::Devnum,
        UsbField::Busnum,
        UsbField::FlagSetup,
        UsbField::FlagData,
        UsbField::TsSec,
        UsbField::TsUsec,
        UsbField::Status,
        UsbField::Length,
        UsbField::LenCap,
        UsbField::Setup,
        UsbField::ErrorCount,
        UsbField::Numdesc,
        UsbField::Interval,
        UsbField::StartFrame,
        UsbField::XferFlags,
        UsbField::Ndesc,
        UsbField::Data,
    ];

    /// Header fields compared by [`UsbPacket::diff`], covering bytes 0..64
    /// once each. The union at offset 40 is represented by `setup`, followed
    /// by `interval` and `start_frame`; the payload is compared separately.
    pub const HEADER: [UsbField; 18] = [
        UsbField::Urb,
        UsbField::EventType,
        UsbField::XferType,
        UsbField::Epnum,
        UsbField::Devnum,
        UsbField::Busnum,
        UsbField::FlagSetup,
        UsbField::FlagData,
        UsbField::TsSec,
        UsbField::TsUsec,
        UsbField::Status,
        UsbField::Length,
        UsbField::LenCap,
        UsbField::Setup,
        UsbField::Interval,
        UsbField::StartFrame,
        UsbField::XferFlags,
        UsbField::Ndesc,
    ];
}

impl FieldName for UsbField {
    fn as_str(self) -> &'static str {
        match self {
            UsbField::Urb => "urb",
            UsbField::EventType => "event_type",
            UsbField::XferType => "xfer_type",
            UsbField::Epnum => "epnum",
            UsbField::Devnum => "devnum",
            UsbField::Busnum => "busnum",
            UsbField::FlagSetup => "flag_setup",
            UsbField::FlagData => "flag_data",
            UsbField::TsSec => "ts_sec",
            UsbField::TsUsec => "ts_usec",
            UsbField::Status => "status",
            UsbField::Length => "length",
            UsbField::LenCap => "len_cap",
            UsbField::Setup => "setup",
            UsbField::ErrorCount => "error_count",
            UsbField::Numdesc => "numdesc",
            UsbField::Interval => "interval",
            UsbField::StartFrame => "start_frame",
            UsbField::XferFlags => "xfer_flags",
            UsbField::Ndesc => "ndesc",
            UsbField::Data => "data",
        }
    }
}

impl FromStr for UsbField {
    type Err = UsbRevueError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| UsbRevueError::UnknownSymbol {
                table: "packet field",
                name: s.to_string(),
            })
    }
}

/// Field table shared by every usbmon packet.
pub fn usb_table() -> &'static FieldTable<UsbField> {
    static TABLE: OnceLock<FieldTable<UsbField>> = OnceLock::new();
    TABLE.get_or_init(|| {
        use PrimitiveCodec::*;
        FieldTable::new([
            (UsbField::Urb, FieldDescriptor::new(U64, 0)),
            (UsbField::EventType, FieldDescriptor::new(U8, 8)),
            (UsbField::XferType, FieldDescriptor::new(U8, 9)),
            (UsbField::Epnum, FieldDescriptor::new(U8, 10)),
            (UsbField::Devnum, FieldDescriptor::new(U8, 11)),
            (UsbField::Busnum, FieldDescriptor::new(U16, 12)),
            (UsbField::FlagSetup, FieldDescriptor::new(U8, 14)),
            (UsbField::FlagData, FieldDescriptor::new(U8, 15)),
            (UsbField::TsSec, FieldDescriptor::new(I64, 16)),
            (UsbField::TsUsec, FieldDescriptor::new(I32, 24)),
            (UsbField::Status, FieldDescriptor::new(I32, 28)),
            (UsbField::Length, FieldDescriptor::new(U32, 32)),
            (UsbField::LenCap, FieldDescriptor::new(U32, 36)),
            (UsbField::Setup, FieldDescriptor::new(Bytes(SETUP_LEN), SETUP_OFFSET)),
            (UsbField::ErrorCount, FieldDescriptor::new(I32, 40)),
            (UsbField::Numdesc, FieldDescriptor::new(I32, 44)),
            (UsbField::Interval, FieldDescriptor::new(I32, 48)),
            (UsbField::StartFrame, FieldDescriptor::new(I32, 52)),
            (UsbField::XferFlags, FieldDescriptor::new(U32, 56)),
            (UsbField::Ndesc, FieldDescriptor::new(U32, 60)),
            (UsbField::Data, FieldDescriptor::new(VarBytes, HEADER_LEN)),
        ])
    })
}

/// Per-unit metadata from the capture source. Display only; field access never changes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CaptureMeta {
    pub ts_sec: u32,
    pub ts_usec: u32,
    /// Length of the unit on the wire.
    pub wire_length: u32,
    /// Length actually captured.
    pub captured_length: u32,
}

impl CaptureMeta {
    /// Metadata for a unit captured in full.
    pub fn for_len(len: usize) -> Self {
        let len = u32::try_from(len).unwrap_or(u32::MAX);
        Self {
            wire_length: len,
            captured_length: len,
            ..Self::default()
        }
    }
}

impl fmt::Display for CaptureMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:06}: Captured {} bytes, truncated to {} bytes",
            self.ts_sec, self.ts_usec, self.wire_length, self.captured_length
        )
    }
}

macro_rules! header_accessors {
    ($($(#[$doc:meta])* $get:ident / $set:ident: $field:ident => $ty:ty;)+) => {
        $(
            $(#[$doc])*
            pub fn $get(&self) -> $ty {
                self.scalar(UsbField::$field) as $ty
            }

            pub fn $set(&mut self, value: $ty) -> Result<()> {
                self.set(UsbField::$field, Value::from(value))
            }
        )+
    };
}

/// A usbmon packet record.
#[derive(Debug, Clone)]
pub struct UsbPacket {
    meta: CaptureMeta,
    record: Record<'static, UsbField>,
    setup: OnceCell<SetupField>,
}

impl UsbPacket {
    /// Wraps a captured unit, validating that it is a usbmon record.
    ///
    /// This is the only validation performed; later writes may store any value
    /// the field's codec can represent.
    pub fn new(meta: CaptureMeta, bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(UsbRevueError::TooShort {
                len: bytes.len(),
                min: HEADER_LEN,
            });
        }

        let packet = Self::from_parts(meta, bytes);

        let event_type = packet.event_type();
        if EventType::from_code(event_type).is_none() {
            return Err(UsbRevueError::NotAUsbRecord(format!(
                "event type 0x{:02x} is not S, C or E",
                event_type
            )));
        }

        let xfer_type = packet.xfer_type();
        if TransferType::from_code(xfer_type).is_none() {
            return Err(UsbRevueError::NotAUsbRecord(format!(
                "transfer type {} is out of range",
                xfer_type
            )));
        }

        Ok(packet)
    }

    fn from_parts(meta: CaptureMeta, bytes: Vec<u8>) -> Self {
        Self {
            meta,
            record: Record::new(usb_table(), bytes),
            setup: OnceCell::new(),
        }
    }

    /// Capture metadata this packet was built with.
    pub fn meta(&self) -> &CaptureMeta {
        &self.meta
    }

    // The header is at least HEADER_LEN bytes, so header lookups cannot fail.
    fn scalar(&self, field: UsbField) -> i128 {
        match self.record.get(field) {
            Ok(Value::Unsigned(v)) => v as i128,
            Ok(Value::Signed(v)) => v as i128,
            _ => 0,
        }
    }

    /// Decodes any field. The payload is read at its structural length.
    pub fn get(&self, field: UsbField) -> Result<Value> {
        match field {
            UsbField::Data => self.record.get_sized(field, self.datalen()),
            _ => self.record.get(field),
        }
    }

    /// Encodes `value` into any field. A payload value must keep the payload length.
    pub fn set(&mut self, field: UsbField, value: Value) -> Result<()> {
        match field {
            UsbField::Data => self.record.set_sized(field, self.datalen(), value)?,
            _ => self.record.set(field, value)?,
        }
        if overlaps_setup(field) {
            self.setup = OnceCell::new();
        }
        Ok(())
    }

    /// Like [`UsbPacket::get`], naming the field as text.
    pub fn get_by_name(&self, name: &str) -> Result<Value> {
        self.get(name.parse()?)
    }

    /// Like [`UsbPacket::set`], naming the field as text.
    pub fn set_by_name(&mut self, name: &str, value: Value) -> Result<()> {
        self.set(name.parse()?, value)
    }

    /// Parses `text` with the field's codec and stores it.
    pub fn set_from_str(&mut self, name: &str, text: &str) -> Result<()> {
        let field: UsbField = name.parse()?;
        let codec = usb_table()
            .get(field)
            .ok_or(UsbRevueError::UnknownField(field.as_str()))?
            .codec;
        let value = codec
            .parse_value(text)
            .ok_or_else(|| UsbRevueError::EncodeRange {
                field: field.as_str(),
                value: text.to_string(),
                reason: "not a valid literal for this field".to_string(),
            })?;
        self.set(field, value)
    }

    header_accessors! {
        /// URB identifier, an opaque correlation id.
        urb / set_urb: Urb => u64;
        /// Raw event type byte, `'S'`, `'C'` or `'E'`.
        event_type / set_event_type: EventType => u8;
        /// Raw transfer type byte.
        xfer_type / set_xfer_type: XferType => u8;
        /// Endpoint number; bit 7 is the direction.
        epnum / set_epnum: Epnum => u8;
        devnum / set_devnum: Devnum => u8;
        busnum / set_busnum: Busnum => u16;
        flag_setup / set_flag_setup: FlagSetup => u8;
        flag_data / set_flag_data: FlagData => u8;
        ts_sec / set_ts_sec: TsSec => i64;
        ts_usec / set_ts_usec: TsUsec => i32;
        status / set_status: Status => i32;
        /// Length reported by the URB.
        length / set_length: Length => u32;
        /// Length of data captured.
        len_cap / set_len_cap: LenCap => u32;
        xfer_flags / set_xfer_flags: XferFlags => u32;
        /// Number of isochronous descriptors.
        ndesc / set_ndesc: Ndesc => u32;
    }

    /// Event type, `None` if the byte was rewritten to something unknown.
    pub fn event(&self) -> Option<EventType> {
        EventType::from_code(self.event_type())
    }

    /// Transfer type, `None` if the byte was rewritten to something unknown.
    pub fn transfer(&self) -> Option<TransferType> {
        TransferType::from_code(self.xfer_type())
    }

    /// Direction bit of `epnum`: set means IN (device to host).
    pub fn endpoint_direction(&self) -> Direction {
        if self.epnum() & DIRECTION_MASK != 0 {
            Direction::DeviceToHost
        } else {
            Direction::HostToDevice
        }
    }

    /// Endpoint address without the direction bit.
    pub fn endpoint_address(&self) -> u8 {
        self.epnum() & 0x0f
    }

    pub fn is_isochronous_xfer(&self) -> bool {
        self.xfer_type() == TransferType::Isochronous.code()
    }

    pub fn is_interrupt_xfer(&self) -> bool {
        self.xfer_type() == TransferType::Interrupt.code()
    }

    pub fn is_control_xfer(&self) -> bool {
        self.xfer_type() == TransferType::Control.code()
    }

    pub fn is_bulk_xfer(&self) -> bool {
        self.xfer_type() == TransferType::Bulk.code()
    }

    /// True if the setup bytes at offset 40 are valid.
    pub fn is_setup_packet(&self) -> bool {
        self.flag_setup() == SETUP_PRESENT
    }

    fn conditional(&self, field: UsbField, applies: bool) -> Option<i32> {
        applies.then(|| self.scalar(field) as i32)
    }

    /// Isochronous error count, `None` for other transfer types.
    pub fn try_error_count(&self) -> Option<i32> {
        self.conditional(UsbField::ErrorCount, self.is_isochronous_xfer())
    }

    /// Isochronous descriptor count, `None` for other transfer types.
    pub fn try_numdesc(&self) -> Option<i32> {
        self.conditional(UsbField::Numdesc, self.is_isochronous_xfer())
    }

    /// Polling interval, `None` unless isochronous or interrupt.
    pub fn try_interval(&self) -> Option<i32> {
        self.conditional(
            UsbField::Interval,
            self.is_isochronous_xfer() || self.is_interrupt_xfer(),
        )
    }

    /// Isochronous start frame, `None` for other transfer types.
    pub fn try_start_frame(&self) -> Option<i32> {
        self.conditional(UsbField::StartFrame, self.is_isochronous_xfer())
    }

    /// Isochronous error count, 0 for other transfer types.
    pub fn error_count(&self) -> i32 {
        self.try_error_count().unwrap_or(0)
    }

    /// Isochronous descriptor count, 0 for other transfer types.
    pub fn numdesc(&self) -> i32 {
        self.try_numdesc().unwrap_or(0)
    }

    /// Polling interval, 0 unless isochronous or interrupt.
    pub fn interval(&self) -> i32 {
        self.try_interval().unwrap_or(0)
    }

    /// Isochronous start frame, 0 for other transfer types.
    pub fn start_frame(&self) -> i32 {
        self.try_start_frame().unwrap_or(0)
    }

    /// Length of the trailing payload.
    pub fn datalen(&self) -> usize {
        self.record.len() - HEADER_LEN
    }

    /// The trailing payload.
    pub fn payload(&self) -> &[u8] {
        &self.record.encode()[HEADER_LEN..]
    }

    /// Overwrites one payload byte in place. The payload never grows or shrinks.
    pub fn set_payload(&mut self, index: usize, value: u8) -> Result<()> {
        let len = self.datalen();
        if index >= len {
            return Err(UsbRevueError::PayloadIndex { index, len });
        }
        self.record.write_bytes(HEADER_LEN + index, &[value])
    }

    /// The setup packet view, built on first access. `None` unless
    /// [`is_setup_packet`](UsbPacket::is_setup_packet).
    pub fn setup(&self) -> Option<&SetupField> {
        if !self.is_setup_packet() {
            return None;
        }
        if let Some(setup) = self.setup.get() {
            return Some(setup);
        }
        let bytes = self.record.get(UsbField::Setup).ok()?;
        let setup = SetupField::from_bytes(bytes.as_bytes()?).ok()?;
        Some(self.setup.get_or_init(|| setup))
    }

    /// Mutable access to the setup view. Every edit is written back into this
    /// packet's buffer before the edit returns.
    pub fn setup_mut(&mut self) -> Option<SetupMut<'_>> {
        self.setup()?;
        let setup = self.setup.get_mut()?;
        Some(SetupMut {
            record: &mut self.record,
            setup,
        })
    }

    /// Stores a child setup image into this packet's setup bytes.
    ///
    /// A cached setup view is rebuilt if it no longer matches.
    pub fn apply_child_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        write_setup(&mut self.record, bytes)?;
        if self.setup.get().is_some_and(|s| s.encode() != bytes) {
            self.setup = OnceCell::new();
        }
        Ok(())
    }

    /// Fields that differ from `other`, as `(field, mine, theirs)`.
    ///
    /// Header fields are compared in wire order, followed by the payload.
    pub fn diff(&self, other: &UsbPacket) -> Vec<(UsbField, Value, Value)> {
        let mut result = Vec::new();

        for field in UsbField::HEADER {
            if let (Ok(mine), Ok(theirs)) = (self.get(field), other.get(field)) {
                if mine != theirs {
                    result.push((field, mine, theirs));
                }
            }
        }

        if self.payload() != other.payload() {
            result.push((
                UsbField::Data,
                Value::from(self.payload()),
                Value::from(other.payload()),
            ));
        }

        result
    }

    /// An independent packet over a clone of this packet's buffer.
    pub fn copy(&self) -> UsbPacket {
        Self::from_parts(self.meta, self.record.encode().to_vec())
    }

    /// Header fields and payload as `(name, value)` pairs.
    pub fn field_map(&self) -> Vec<(&'static str, Value)> {
        UsbField::HEADER
            .into_iter()
            .chain(std::iter::once(UsbField::Data))
            .filter_map(|field| self.get(field).ok().map(|v| (field.as_str(), v)))
            .collect()
    }

    /// The packet's bytes, header and payload.
    pub fn encode(&self) -> &[u8] {
        self.record.encode()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.record.into_bytes()
    }
}

impl PartialEq for UsbPacket {
    fn eq(&self, other: &Self) -> bool {
        self.record == other.record
    }
}

impl Eq for UsbPacket {}

fn overlaps_setup(field: UsbField) -> bool {
    usb_table()
        .get(field)
        .and_then(|d| d.span(None))
        .is_some_and(|span| span.start < SETUP_OFFSET + SETUP_LEN && SETUP_OFFSET < span.end)
}

fn write_setup(record: &mut Record<'static, UsbField>, bytes: &[u8]) -> Result<()> {
    tracing::debug!(bytes = %hex::encode(bytes), "propagating setup into packet");
    record.set(UsbField::Setup, Value::from(bytes))
}

/// Write access to a packet's setup view.
///
/// Reads go through `Deref` to [`SetupField`]. Each setter edits the view and
/// then pushes its 8 bytes into the owning packet before returning.
pub struct SetupMut<'p> {
    record: &'p mut Record<'static, UsbField>,
    setup: &'p mut SetupField,
}

impl SetupMut<'_> {
    fn update<E>(&mut self, edit: E) -> Result<()>
    where
        E: FnOnce(&mut SetupField) -> Result<()>,
    {
        edit(&mut *self.setup)?;
        write_setup(&mut *self.record, self.setup.encode())
    }

    pub fn set(&mut self, field: SetupFieldName, value: Value) -> Result<()> {
        self.update(|s| s.set(field, value))
    }

    pub fn set_request_type(&mut self, raw: u8) -> Result<()> {
        self.update(|s| s.set_request_type(raw))
    }

    pub fn set_request(&mut self, raw: u8) -> Result<()> {
        self.update(|s| s.set_request(raw))
    }

    pub fn set_value(&mut self, value: u16) -> Result<()> {
        self.update(|s| s.set_value(value))
    }

    pub fn set_index(&mut self, index: u16) -> Result<()> {
        self.update(|s| s.set_index(index))
    }

    pub fn set_length(&mut self, length: u16) -> Result<()> {
        self.update(|s| s.set_length(length))
    }

    pub fn set_direction(&mut self, direction: Direction) -> Result<()> {
        self.update(|s| s.set_direction(direction))
    }

    pub fn set_kind(&mut self, kind: crate::enums::RequestKind) -> Result<()> {
        self.update(|s| s.set_kind(kind))
    }

    pub fn set_recipient(&mut self, recipient: crate::enums::Recipient) -> Result<()> {
        self.update(|s| s.set_recipient(recipient))
    }
}

impl Deref for SetupMut<'_> {
    type Target = SetupField;

    fn deref(&self) -> &SetupField {
        self.setup
    }
}

impl fmt::Display for UsbPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "urb = {}", self.urb())?;
        writeln!(f, "event_type = {}", self.event_type().escape_ascii())?;
        writeln!(f, "xfer_type = {}", self.xfer_type())?;
        writeln!(f, "epnum = {}", self.epnum())?;
        writeln!(f, "devnum = {}", self.devnum())?;
        writeln!(f, "busnum = {}", self.busnum())?;
        writeln!(f, "flag_setup = {}", self.flag_setup().escape_ascii())?;
        writeln!(f, "flag_data = {}", self.flag_data().escape_ascii())?;
        writeln!(f, "ts_sec = {}", self.ts_sec())?;
        writeln!(f, "ts_usec = {}", self.ts_usec())?;
        writeln!(f, "status = {}", self.status())?;
        writeln!(f, "length = {}", self.length())?;
        writeln!(f, "len_cap = {}", self.len_cap())?;
        if let Some(setup) = self.setup() {
            writeln!(f, "setup = {}", setup.data_to_str())?;
        }
        if let Some(error_count) = self.try_error_count() {
            writeln!(f, "error_count = {}", error_count)?;
            writeln!(f, "numdesc = {}", self.numdesc())?;
        }
        if let Some(interval) = self.try_interval() {
            writeln!(f, "interval = {}", interval)?;
        }
        if let Some(start_frame) = self.try_start_frame() {
            writeln!(f, "start_frame = {}", start_frame)?;
        }
        writeln!(f, "xfer_flags = {}", self.xfer_flags())?;
        writeln!(f, "ndesc = {}", self.ndesc())?;
        write!(f, "data = {}", hex::encode(self.payload()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::{Recipient, RequestKind};

    /// A GET_DESCRIPTOR(DEVICE) submission on bus 7, device 3.
    fn control_bytes() -> Vec<u8> {
        let mut data = Vec::with_capacity(HEADER_LEN);
        data.extend_from_slice(&0xef98ef00u64.to_le_bytes()); // urb
        data.push(b'S'); // event_type
        data.push(2); // xfer_type = control
        data.push(0x80); // epnum
        data.push(3); // devnum
        data.extend_from_slice(&7u16.to_le_bytes()); // busnum
        data.push(0x00); // flag_setup
        data.push(b'<'); // flag_data
        data.extend_from_slice(&1309208916i64.to_le_bytes()); // ts_sec
        data.extend_from_slice(&397516i32.to_le_bytes()); // ts_usec
        data.extend_from_slice(&(-115i32).to_le_bytes()); // status
        data.extend_from_slice(&40u32.to_le_bytes()); // length
        data.extend_from_slice(&0u32.to_le_bytes()); // len_cap
        data.extend_from_slice(&[0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x28, 0x00]); // setup
        data.extend_from_slice(&[0u8; 8]); // interval, start_frame
        data.extend_from_slice(&0x200u32.to_le_bytes()); // xfer_flags
        data.extend_from_slice(&0u32.to_le_bytes()); // ndesc
        assert_eq!(data.len(), HEADER_LEN);
        data
    }

    fn control_packet() -> UsbPacket {
        let bytes = control_bytes();
        UsbPacket::new(CaptureMeta::for_len(bytes.len()), bytes).unwrap()
    }

    fn packet_with_payload(xfer_type: u8, payload: &[u8]) -> UsbPacket {
        let mut bytes = control_bytes();
        bytes[9] = xfer_type;
        bytes[14] = b'-';
        bytes.extend_from_slice(payload);
        UsbPacket::new(CaptureMeta::for_len(bytes.len()), bytes).unwrap()
    }

    #[test]
    fn test_header_fields() {
        let packet = control_packet();

        assert_eq!(packet.urb(), 0xef98ef00);
        assert_eq!(packet.event_type(), b'S');
        assert_eq!(packet.event(), Some(EventType::Submission));
        assert_eq!(packet.xfer_type(), 2);
        assert_eq!(packet.transfer(), Some(TransferType::Control));
        assert_eq!(packet.epnum(), 0x80);
        assert_eq!(packet.endpoint_direction(), Direction::DeviceToHost);
        assert_eq!(packet.endpoint_address(), 0);
        assert_eq!(packet.devnum(), 3);
        assert_eq!(packet.busnum(), 7);
        assert_eq!(packet.flag_setup(), 0x00);
        assert_eq!(packet.flag_data(), b'<');
        assert_eq!(packet.ts_sec(), 1309208916);
        assert_eq!(packet.ts_usec(), 397516);
        assert_eq!(packet.status(), -115);
        assert_eq!(packet.length(), 40);
        assert_eq!(packet.len_cap(), 0);
        assert_eq!(packet.xfer_flags(), 0x200);
        assert_eq!(packet.ndesc(), 0);
        assert_eq!(packet.datalen(), 0);
        assert!(packet.payload().is_empty());
    }

    #[test]
    fn test_classifiers() {
        let packet = control_packet();
        assert!(packet.is_control_xfer());
        assert!(!packet.is_isochronous_xfer());
        assert!(!packet.is_bulk_xfer());
        assert!(!packet.is_interrupt_xfer());
        assert!(packet.is_setup_packet());
    }

    #[test]
    fn test_setup_view() {
        let packet = control_packet();
        let setup = packet.setup().unwrap();
        assert_eq!(setup.request_name(), "GET_DESCRIPTOR");
        assert_eq!(setup.direction(), Direction::DeviceToHost);
        assert_eq!(setup.length(), 40);
    }

    #[test]
    fn test_no_setup_view_without_flag() {
        let packet = packet_with_payload(3, &[]);
        assert!(!packet.is_setup_packet());
        assert!(packet.setup().is_none());
    }

    #[test]
    fn test_setup_propagation() {
        let mut packet = control_packet();

        packet
            .setup_mut()
            .unwrap()
            .set_direction(Direction::HostToDevice)
            .unwrap();

        assert_eq!(packet.setup().unwrap().direction(), Direction::HostToDevice);
        assert_eq!(packet.encode()[SETUP_OFFSET], 0x00);
        assert_eq!(
            packet.get(UsbField::Setup).unwrap(),
            Value::Bytes(vec![0x00, 0x06, 0x00, 0x01, 0x00, 0x00, 0x28, 0x00])
        );
    }

    #[test]
    fn test_setup_mut_reads_through() {
        let mut packet = control_packet();
        let mut setup = packet.setup_mut().unwrap();
        setup.set_kind(RequestKind::Vendor).unwrap();
        setup.set_recipient(Recipient::Endpoint).unwrap();
        setup.set_length(0x0102).unwrap();
        assert_eq!(setup.request_type(), 0b1100_0010);

        assert_eq!(packet.encode()[SETUP_OFFSET], 0b1100_0010);
        assert_eq!(&packet.encode()[46..48], &[0x02, 0x01]);
    }

    #[test]
    fn test_parent_write_rebuilds_setup_view() {
        let mut packet = control_packet();
        assert_eq!(packet.setup().unwrap().request(), 0x06);

        packet
            .set(
                UsbField::Setup,
                Value::Bytes(vec![0x00, 0x05, 0x09, 0x00, 0x00, 0x00, 0x00, 0x00]),
            )
            .unwrap();
        assert_eq!(packet.setup().unwrap().request_name(), "SET_ADDRESS");

        packet
            .set(UsbField::ErrorCount, Value::Signed(0x0000_0980))
            .unwrap();
        assert_eq!(packet.setup().unwrap().request_type(), 0x80);
        assert_eq!(packet.setup().unwrap().request(), 0x09);
    }

    #[test]
    fn test_apply_child_bytes() {
        let mut packet = control_packet();
        assert!(packet.setup().is_some());

        let bytes = [0x21, 0x09, 0x00, 0x02, 0x00, 0x00, 0x01, 0x00];
        packet.apply_child_bytes(&bytes).unwrap();
        assert_eq!(&packet.encode()[40..48], &bytes);
        assert_eq!(packet.setup().unwrap().kind(), RequestKind::Class);

        assert!(packet.apply_child_bytes(&bytes[..4]).is_err());
    }

    #[test]
    fn test_construction_failures() {
        assert!(matches!(
            UsbPacket::new(CaptureMeta::default(), vec![0; 63]),
            Err(UsbRevueError::TooShort { len: 63, min: 64 })
        ));

        let mut bad_event = control_bytes();
        bad_event[8] = b's';
        assert!(matches!(
            UsbPacket::new(CaptureMeta::default(), bad_event),
            Err(UsbRevueError::NotAUsbRecord(_))
        ));

        let mut bad_xfer = control_bytes();
        bad_xfer[9] = 4;
        assert!(matches!(
            UsbPacket::new(CaptureMeta::default(), bad_xfer),
            Err(UsbRevueError::NotAUsbRecord(_))
        ));

        let mut error_event = control_bytes();
        error_event[8] = b'E';
        assert!(UsbPacket::new(CaptureMeta::default(), error_event).is_ok());
    }

    #[test]
    fn test_urb_range() {
        let mut packet = control_packet();

        for urb in [0x00000000ef98ef01u64, 0xffff0000ef98ef01, 0, u64::MAX] {
            packet.set_urb(urb).unwrap();
            assert_eq!(packet.urb(), urb);
        }
        assert!(matches!(
            packet.set(UsbField::Urb, Value::Signed(-1)),
            Err(UsbRevueError::EncodeRange { field: "urb", .. })
        ));
        assert_eq!(packet.urb(), u64::MAX);
    }

    #[test]
    fn test_set_leaves_unrelated_fields() {
        let mut packet = control_packet();
        let before = packet.field_map();

        packet.set_length(99).unwrap();
        assert_eq!(packet.length(), 99);

        let after = packet.field_map();
        for ((name, old), (_, new)) in before.iter().zip(after.iter()) {
            if *name != "length" {
                assert_eq!(old, new, "{} changed", name);
            }
        }
    }

    #[test]
    fn test_event_type_accepts_any_byte() {
        let mut packet = control_packet();
        for event in [b'C', b'E', 0x00, 0xff] {
            packet.set_event_type(event).unwrap();
            assert_eq!(packet.event_type(), event);
        }
        assert_eq!(packet.event(), None);
    }

    #[test]
    fn test_conditional_fields_default_to_zero() {
        let packet = control_packet();
        assert_eq!(packet.error_count(), 0);
        assert_eq!(packet.numdesc(), 0);
        assert_eq!(packet.interval(), 0);
        assert_eq!(packet.start_frame(), 0);
        assert_eq!(packet.try_error_count(), None);
        // The raw engine still decodes the aliased bytes
        assert_eq!(
            packet.get(UsbField::ErrorCount).unwrap(),
            Value::Signed(0x01000680)
        );
    }

    #[test]
    fn test_conditional_fields_isochronous() {
        let mut bytes = control_bytes();
        bytes[9] = 0;
        bytes[40..44].copy_from_slice(&2i32.to_le_bytes());
        bytes[44..48].copy_from_slice(&5i32.to_le_bytes());
        bytes[48..52].copy_from_slice(&8i32.to_le_bytes());
        bytes[52..56].copy_from_slice(&1234i32.to_le_bytes());
        let packet = UsbPacket::new(CaptureMeta::default(), bytes).unwrap();

        assert_eq!(packet.error_count(), 2);
        assert_eq!(packet.numdesc(), 5);
        assert_eq!(packet.interval(), 8);
        assert_eq!(packet.start_frame(), 1234);
    }

    #[test]
    fn test_interval_interrupt() {
        let mut bytes = control_bytes();
        bytes[9] = 1;
        bytes[48..52].copy_from_slice(&4i32.to_le_bytes());
        let packet = UsbPacket::new(CaptureMeta::default(), bytes).unwrap();

        assert_eq!(packet.interval(), 4);
        assert_eq!(packet.start_frame(), 0);
        assert_eq!(packet.try_error_count(), None);
    }

    #[test]
    fn test_payload() {
        let mut packet = packet_with_payload(3, &[1, 0, 6, 0, 0, 0, 0, 0]);
        assert_eq!(packet.datalen(), 8);
        assert_eq!(
            packet.get(UsbField::Data).unwrap(),
            Value::Bytes(vec![1, 0, 6, 0, 0, 0, 0, 0])
        );

        packet.set_payload(7, 0xff).unwrap();
        assert_eq!(packet.encode().len(), 72);
        assert_eq!(*packet.encode().last().unwrap(), 0xff);
        assert_eq!(packet.payload()[7], 0xff);
        assert_eq!(
            packet.get(UsbField::Data).unwrap(),
            Value::Bytes(vec![1, 0, 6, 0, 0, 0, 0, 0xff])
        );

        assert!(matches!(
            packet.set_payload(8, 0),
            Err(UsbRevueError::PayloadIndex { index: 8, len: 8 })
        ));
        assert!(packet.set(UsbField::Data, Value::Bytes(vec![0; 9])).is_err());
        assert_eq!(packet.datalen(), 8);
    }

    #[test]
    fn test_diff_identity() {
        let packet = packet_with_payload(3, &[1, 2, 3]);
        assert!(packet.diff(&packet).is_empty());
        assert!(packet.diff(&packet.copy()).is_empty());
    }

    #[test]
    fn test_diff_sensitivity() {
        let packet = control_packet();
        let mut copy = packet.copy();
        copy.set_status(0).unwrap();

        let diff = packet.diff(&copy);
        assert_eq!(
            diff,
            vec![(UsbField::Status, Value::Signed(-115), Value::Signed(0))]
        );
    }

    #[test]
    fn test_diff_setup_and_payload() {
        let packet = packet_with_payload(2, &[9, 9]);
        let mut copy = packet.copy();
        copy.set_payload(1, 0).unwrap();
        let diff = packet.diff(&copy);
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].0, UsbField::Data);

        let packet = control_packet();
        let mut copy = packet.copy();
        copy.setup_mut().unwrap().set_request(0x08).unwrap();
        let diff = packet.diff(&copy);
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].0, UsbField::Setup);
    }

    #[test]
    fn test_diff_sees_interval_and_start_frame() {
        let mut bytes = control_bytes();
        bytes[9] = 1;
        bytes[14] = b'-';
        bytes[48..52].copy_from_slice(&8i32.to_le_bytes());
        let packet = UsbPacket::new(CaptureMeta::default(), bytes).unwrap();

        let mut copy = packet.copy();
        copy.set(UsbField::Interval, Value::Signed(16)).unwrap();
        assert_eq!(
            packet.diff(&copy),
            vec![(UsbField::Interval, Value::Signed(8), Value::Signed(16))]
        );

        let mut copy = packet.copy();
        copy.set(UsbField::StartFrame, Value::Signed(3)).unwrap();
        let diff = packet.diff(&copy);
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].0, UsbField::StartFrame);
    }

    #[test]
    fn test_copy_independence() {
        let packet = control_packet();
        let mut copy = packet.copy();
        copy.set_busnum(1).unwrap();
        copy.setup_mut().unwrap().set_value(0xbeef).unwrap();

        assert_eq!(packet.busnum(), 7);
        assert_eq!(packet.setup().unwrap().value(), 0x0100);
        assert_eq!(packet.encode(), control_bytes().as_slice());
        assert_eq!(copy.meta(), packet.meta());
        assert_ne!(copy, packet);
    }

    #[test]
    fn test_by_name_access() {
        let mut packet = control_packet();
        assert_eq!(packet.get_by_name("busnum").unwrap(), Value::Unsigned(7));
        packet.set_by_name("devnum", Value::Unsigned(9)).unwrap();
        assert_eq!(packet.devnum(), 9);

        packet.set_from_str("status", "-32").unwrap();
        assert_eq!(packet.status(), -32);
        packet.set_from_str("epnum", "0x81").unwrap();
        assert_eq!(packet.endpoint_address(), 1);

        assert!(matches!(
            packet.get_by_name("bogus"),
            Err(UsbRevueError::UnknownSymbol { .. })
        ));
        assert!(packet.set_from_str("epnum", "0x181").is_err());
        assert!(packet.set_from_str("epnum", "many").is_err());
    }

    #[test]
    fn test_field_map_order() {
        let packet = control_packet();
        let names: Vec<&str> = packet.field_map().iter().map(|(n, _)| *n).collect();
        assert_eq!(names.first(), Some(&"urb"));
        assert_eq!(names.last(), Some(&"data"));
        assert_eq!(names.len(), 19);
        assert!(names.contains(&"interval"));
        assert!(names.contains(&"start_frame"));
        assert!(!names.contains(&"error_count"));
    }

    #[test]
    fn test_display() {
        let text = control_packet().to_string();
        assert!(text.starts_with("urb = 4019777280\n"));
        assert!(text.contains("event_type = S\n"));
        assert!(text.contains("flag_setup = \\x00\n"));
        assert!(text.contains("setup = 80 06 0001 0000 2800\n"));
        assert!(!text.contains("error_count"));
        assert!(text.ends_with("data = "));
    }
}
