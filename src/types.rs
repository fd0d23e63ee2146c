//! Primitive codecs and the values they decode to.
//!
//! This module provides:
//! - `PrimitiveCodec`: the closed set of byte-level encodings a field can use
//! - `Value`: a decoded field value
//! - Range validation when encoding a `Value` back into a buffer

use byteorder::{ByteOrder, LittleEndian};
use std::fmt;

/// Byte-level encoding of a single field. All integers are little-endian, as captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveCodec {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    /// One byte, zero is false.
    Bool,
    /// Fixed-length byte array.
    Bytes(usize),
    /// Byte array whose length is supplied when the field is looked up.
    VarBytes,
}

impl PrimitiveCodec {
    /// Width in bytes, or `None` for the parameterized array.
    pub fn width(self) -> Option<usize> {
        match self {
            PrimitiveCodec::U8 | PrimitiveCodec::I8 | PrimitiveCodec::Bool => Some(1),
            PrimitiveCodec::U16 | PrimitiveCodec::I16 => Some(2),
            PrimitiveCodec::U32 | PrimitiveCodec::I32 => Some(4),
            PrimitiveCodec::U64 | PrimitiveCodec::I64 => Some(8),
            PrimitiveCodec::Bytes(len) => Some(len),
            PrimitiveCodec::VarBytes => None,
        }
    }

    /// Returns true for the signed integer codecs.
    pub fn is_signed(self) -> bool {
        matches!(
            self,
            PrimitiveCodec::I8 | PrimitiveCodec::I16 | PrimitiveCodec::I32 | PrimitiveCodec::I64
        )
    }

    /// Decodes a value from `data`, which must be exactly the field's width.
    pub(crate) fn decode(self, data: &[u8]) -> Value {
        match self {
            PrimitiveCodec::U8 => Value::Unsigned(data[0] as u64),
            PrimitiveCodec::U16 => Value::Unsigned(LittleEndian::read_u16(data) as u64),
            PrimitiveCodec::U32 => Value::Unsigned(LittleEndian::read_u32(data) as u64),
            PrimitiveCodec::U64 => Value::Unsigned(LittleEndian::read_u64(data)),
            PrimitiveCodec::I8 => Value::Signed(data[0] as i8 as i64),
            PrimitiveCodec::I16 => Value::Signed(LittleEndian::read_i16(data) as i64),
            PrimitiveCodec::I32 => Value::Signed(LittleEndian::read_i32(data) as i64),
            PrimitiveCodec::I64 => Value::Signed(LittleEndian::read_i64(data)),
            PrimitiveCodec::Bool => Value::Bool(data[0] != 0),
            PrimitiveCodec::Bytes(_) | PrimitiveCodec::VarBytes => Value::Bytes(data.to_vec()),
        }
    }

    /// Encodes `value` into `out`, which must be exactly the field's width.
    ///
    /// Returns the reason the value was rejected if it is outside the codec's domain.
    /// Nothing is written on rejection.
    pub(crate) fn encode(self, value: &Value, out: &mut [u8]) -> Result<(), String> {
        match self {
            PrimitiveCodec::U8 => out[0] = unsigned_in_range(value, u8::MAX as u64)? as u8,
            PrimitiveCodec::U16 => {
                LittleEndian::write_u16(out, unsigned_in_range(value, u16::MAX as u64)? as u16)
            }
            PrimitiveCodec::U32 => {
                LittleEndian::write_u32(out, unsigned_in_range(value, u32::MAX as u64)? as u32)
            }
            PrimitiveCodec::U64 => {
                LittleEndian::write_u64(out, unsigned_in_range(value, u64::MAX)?)
            }
            PrimitiveCodec::I8 => {
                out[0] = signed_in_range(value, i8::MIN as i64, i8::MAX as i64)? as i8 as u8
            }
            PrimitiveCodec::I16 => LittleEndian::write_i16(
                out,
                signed_in_range(value, i16::MIN as i64, i16::MAX as i64)? as i16,
            ),
            PrimitiveCodec::I32 => LittleEndian::write_i32(
                out,
                signed_in_range(value, i32::MIN as i64, i32::MAX as i64)? as i32,
            ),
            PrimitiveCodec::I64 => {
                LittleEndian::write_i64(out, signed_in_range(value, i64::MIN, i64::MAX)?)
            }
            PrimitiveCodec::Bool => match value {
                Value::Bool(b) => out[0] = *b as u8,
                other => return Err(format!("expected a boolean, got {:?}", other)),
            },
            PrimitiveCodec::Bytes(_) | PrimitiveCodec::VarBytes => match value {
                Value::Bytes(bytes) if bytes.len() == out.len() => out.copy_from_slice(bytes),
                Value::Bytes(bytes) => {
                    return Err(format!(
                        "expected {} bytes, got {}",
                        out.len(),
                        bytes.len()
                    ))
                }
                other => return Err(format!("expected a byte array, got {:?}", other)),
            },
        }
        Ok(())
    }

    /// Parses a textual value for this codec.
    ///
    /// Integers accept decimal, `0x` hex and `0b` binary; booleans accept
    /// `true`/`false`/`1`/`0`; byte arrays accept a hex string.
    pub fn parse_value(self, text: &str) -> Option<Value> {
        let text = text.trim();
        match self {
            PrimitiveCodec::Bool => match text {
                "true" | "1" => Some(Value::Bool(true)),
                "false" | "0" => Some(Value::Bool(false)),
                _ => None,
            },
            PrimitiveCodec::Bytes(_) | PrimitiveCodec::VarBytes => {
                let digits: String = text.chars().filter(|c| !c.is_whitespace()).collect();
                hex::decode(digits).ok().map(Value::Bytes)
            }
            _ => {
                let (negative, magnitude) = match text.strip_prefix('-') {
                    Some(rest) => (true, rest),
                    None => (false, text),
                };
                let parsed = if let Some(hex) = magnitude.strip_prefix("0x") {
                    u64::from_str_radix(hex, 16).ok()?
                } else if let Some(bin) = magnitude.strip_prefix("0b") {
                    u64::from_str_radix(bin, 2).ok()?
                } else {
                    magnitude.parse::<u64>().ok()?
                };
                if negative {
                    if parsed > i64::MAX as u64 + 1 {
                        return None;
                    }
                    Some(Value::Signed((parsed as i64).wrapping_neg()))
                } else if self.is_signed() && parsed <= i64::MAX as u64 {
                    Some(Value::Signed(parsed as i64))
                } else {
                    Some(Value::Unsigned(parsed))
                }
            }
        }
    }
}

fn unsigned_in_range(value: &Value, max: u64) -> Result<u64, String> {
    let v = match value {
        Value::Unsigned(v) => *v,
        Value::Signed(v) if *v >= 0 => *v as u64,
        Value::Signed(v) => return Err(format!("{} is negative", v)),
        other => return Err(format!("expected an integer, got {:?}", other)),
    };
    if v > max {
        return Err(format!("{} exceeds maximum {}", v, max));
    }
    Ok(v)
}

fn signed_in_range(value: &Value, min: i64, max: i64) -> Result<i64, String> {
    let v = match value {
        Value::Signed(v) => *v,
        Value::Unsigned(v) if *v <= i64::MAX as u64 => *v as i64,
        Value::Unsigned(v) => return Err(format!("{} exceeds maximum {}", v, max)),
        other => return Err(format!("expected an integer, got {:?}", other)),
    };
    if v < min || v > max {
        return Err(format!("{} outside range {}..={}", v, min, max));
    }
    Ok(v)
}

/// A decoded field value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Unsigned(u64),
    Signed(i64),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns the value as an unsigned integer if it is a non-negative integer.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Unsigned(v) => Some(*v),
            Value::Signed(v) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }

    /// Returns the value as a signed integer if it fits.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Signed(v) => Some(*v),
            Value::Unsigned(v) if *v <= i64::MAX as u64 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unsigned(v) => write!(f, "{}", v),
            Value::Signed(v) => write!(f, "{}", v),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Bytes(bytes) => write!(f, "{}", hex::encode(bytes)),
        }
    }
}

macro_rules! value_from {
    ($variant:ident, $target:ty, $($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::$variant(v as $target)
                }
            }
        )*
    };
}

value_from!(Unsigned, u64, u8, u16, u32, u64);
value_from!(Signed, i64, i8, i16, i32, i64);

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes)
    }
}

impl From<&[u8]> for Value {
    fn from(bytes: &[u8]) -> Self {
        Value::Bytes(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_little_endian() {
        let data = [0x80, 0xb3, 0x42, 0xf6];
        assert_eq!(PrimitiveCodec::U32.decode(&data), Value::Unsigned(0xf642b380));
        assert_eq!(
            PrimitiveCodec::I32.decode(&data),
            Value::Signed(0xf642b380u32 as i32 as i64)
        );
        assert_eq!(PrimitiveCodec::U8.decode(&data[..1]), Value::Unsigned(0x80));
        assert_eq!(PrimitiveCodec::I8.decode(&data[..1]), Value::Signed(-128));
    }

    #[test]
    fn test_encode_unsigned_range() {
        let mut out = [0u8; 4];
        assert!(PrimitiveCodec::U32.encode(&Value::Unsigned(0xffff_ffff), &mut out).is_ok());
        assert_eq!(out, [0xff; 4]);

        assert!(PrimitiveCodec::U32.encode(&Value::Unsigned(0x1_0000_0000), &mut out).is_err());
        assert!(PrimitiveCodec::U32.encode(&Value::Signed(-1), &mut out).is_err());
        // Rejected values leave the buffer alone
        assert_eq!(out, [0xff; 4]);
    }

    #[test]
    fn test_encode_signed_range() {
        let mut out = [0u8; 4];
        PrimitiveCodec::I32.encode(&Value::Signed(-115), &mut out).unwrap();
        assert_eq!(PrimitiveCodec::I32.decode(&out), Value::Signed(-115));

        assert!(PrimitiveCodec::I32
            .encode(&Value::Signed(i32::MAX as i64 + 1), &mut out)
            .is_err());
        assert!(PrimitiveCodec::I32.encode(&Value::Unsigned(7), &mut out).is_ok());
        assert_eq!(PrimitiveCodec::I32.decode(&out), Value::Signed(7));
    }

    #[test]
    fn test_encode_bool_and_bytes() {
        let mut out = [0u8; 1];
        PrimitiveCodec::Bool.encode(&Value::Bool(true), &mut out).unwrap();
        assert_eq!(out, [1]);
        assert!(PrimitiveCodec::Bool.encode(&Value::Unsigned(1), &mut out).is_err());

        let mut out = [0u8; 2];
        PrimitiveCodec::Bytes(2)
            .encode(&Value::Bytes(vec![0xab, 0xcd]), &mut out)
            .unwrap();
        assert_eq!(out, [0xab, 0xcd]);
        assert!(PrimitiveCodec::Bytes(2)
            .encode(&Value::Bytes(vec![1, 2, 3]), &mut out)
            .is_err());
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(PrimitiveCodec::U8.parse_value("0x80"), Some(Value::Unsigned(0x80)));
        assert_eq!(PrimitiveCodec::U8.parse_value("0b101"), Some(Value::Unsigned(5)));
        assert_eq!(PrimitiveCodec::I32.parse_value("-115"), Some(Value::Signed(-115)));
        assert_eq!(PrimitiveCodec::I32.parse_value("12"), Some(Value::Signed(12)));
        assert_eq!(PrimitiveCodec::Bool.parse_value("true"), Some(Value::Bool(true)));
        assert_eq!(
            PrimitiveCodec::Bytes(2).parse_value("ab cd"),
            Some(Value::Bytes(vec![0xab, 0xcd]))
        );
        assert_eq!(PrimitiveCodec::U8.parse_value("nope"), None);
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Unsigned(7).to_string(), "7");
        assert_eq!(Value::Signed(-115).to_string(), "-115");
        assert_eq!(Value::Bytes(vec![0x80, 0x06]).to_string(), "8006");
    }
}
