//! ZCL attribute values and their CBOR representation
//!
//! Attribute values are a tagged union over the base data types the engine
//! understands: booleans, signed and unsigned integers, UTC timestamps and
//! text. Thresholds in report configurations and attribute read/write
//! payloads all flow through this type.

use ciborium::value::{Integer, Value as Cbor};
use std::fmt;

/// CBOR tag number for an epoch-based date/time (RFC 8949 §3.4.2)
const TAG_EPOCH_DATE: u64 = 1;

/// A single ZCL attribute value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Uint(u64),
    /// Seconds since the UNIX epoch
    Time(u64),
    String(String),
}

/// Error produced when a CBOR item doesn't map onto a ZCL value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("CBOR item is not a ZCL value")]
pub struct InvalidValue;

impl Value {
    /// Decodes a CBOR item into a value.
    ///
    /// true/false map to [Value::Bool], non-negative integers to
    /// [Value::Uint], negative integers to [Value::Int], text strings to
    /// [Value::String] and tagged epoch dates to [Value::Time]. Every other
    /// CBOR type is rejected.
    pub fn from_cbor(item: &Cbor) -> Result<Value, InvalidValue> {
        match item {
            Cbor::Bool(value) => Ok(Value::Bool(*value)),
            Cbor::Integer(value) => {
                if let Ok(unsigned) = u64::try_from(*value) {
                    Ok(Value::Uint(unsigned))
                } else {
                    let signed = i64::try_from(*value).map_err(|_| InvalidValue)?;
                    Ok(Value::Int(signed))
                }
            }
            Cbor::Text(value) => Ok(Value::String(value.clone())),
            Cbor::Tag(TAG_EPOCH_DATE, inner) => match inner.as_ref() {
                Cbor::Integer(value) => {
                    let seconds = u64::try_from(*value).map_err(|_| InvalidValue)?;
                    Ok(Value::Time(seconds))
                }
                _ => Err(InvalidValue),
            },
            _ => Err(InvalidValue),
        }
    }

    /// Encodes this value as a CBOR item (the inverse of [Value::from_cbor])
    pub fn to_cbor(&self) -> Cbor {
        match self {
            Value::Bool(value) => Cbor::Bool(*value),
            Value::Int(value) => Cbor::Integer(Integer::from(*value)),
            Value::Uint(value) => Cbor::Integer(Integer::from(*value)),
            Value::Time(value) => Cbor::Tag(
                TAG_EPOCH_DATE,
                Box::new(Cbor::Integer(Integer::from(*value))),
            ),
            Value::String(value) => Cbor::Text(value.clone()),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Reads this value as a signed integer. Unsigned values convert
    /// when they fit.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            Value::Uint(value) => i64::try_from(*value).ok(),
            _ => None,
        }
    }

    /// Reads this value as an unsigned integer. Signed values convert
    /// when non-negative.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Uint(value) => Some(*value),
            Value::Int(value) => u64::try_from(*value).ok(),
            _ => None,
        }
    }

    pub fn as_i8(&self) -> Option<i8> {
        self.as_i64().and_then(|value| i8::try_from(value).ok())
    }

    pub fn as_i16(&self) -> Option<i16> {
        self.as_i64().and_then(|value| i16::try_from(value).ok())
    }

    pub fn as_i32(&self) -> Option<i32> {
        self.as_i64().and_then(|value| i32::try_from(value).ok())
    }

    pub fn as_u8(&self) -> Option<u8> {
        self.as_u64().and_then(|value| u8::try_from(value).ok())
    }

    pub fn as_u16(&self) -> Option<u16> {
        self.as_u64().and_then(|value| u16::try_from(value).ok())
    }

    pub fn as_u32(&self) -> Option<u32> {
        self.as_u64().and_then(|value| u32::try_from(value).ok())
    }

    /// Reads this value as seconds since the UNIX epoch
    pub fn as_time(&self) -> Option<u64> {
        match self {
            Value::Time(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(value) => value.fmt(f),
            Value::Int(value) => value.fmt(f),
            Value::Uint(value) => value.fmt(f),
            Value::Time(value) => write!(f, "{}s", value),
            Value::String(value) => value.fmt(f),
        }
    }
}

#[cfg(test)]
mod test {
    use super::Value;
    use ciborium::value::Value as Cbor;

    /// CBOR booleans, integers, text and epoch tags should all decode to
    /// the matching value kind
    #[test]
    fn test_decode_kinds() {
        assert_eq!(Value::from_cbor(&Cbor::Bool(true)), Ok(Value::Bool(true)));
        assert_eq!(
            Value::from_cbor(&Cbor::Integer(12.into())),
            Ok(Value::Uint(12))
        );
        assert_eq!(
            Value::from_cbor(&Cbor::Integer((-12).into())),
            Ok(Value::Int(-12))
        );
        assert_eq!(
            Value::from_cbor(&Cbor::Text("hi".to_string())),
            Ok(Value::String("hi".to_string()))
        );
        assert_eq!(
            Value::from_cbor(&Cbor::Tag(1, Box::new(Cbor::Integer(1000.into())))),
            Ok(Value::Time(1000))
        );
    }

    /// Arrays, maps, floats and byte strings are not ZCL values
    #[test]
    fn test_decode_rejects_other_types() {
        assert!(Value::from_cbor(&Cbor::Array(Vec::new())).is_err());
        assert!(Value::from_cbor(&Cbor::Map(Vec::new())).is_err());
        assert!(Value::from_cbor(&Cbor::Float(1.5)).is_err());
        assert!(Value::from_cbor(&Cbor::Bytes(vec![1, 2])).is_err());
        assert!(Value::from_cbor(&Cbor::Null).is_err());
        // Unknown tag numbers are rejected too
        assert!(Value::from_cbor(&Cbor::Tag(2, Box::new(Cbor::Integer(1.into())))).is_err());
    }

    /// Encoding and decoding a value should round-trip
    #[test]
    fn test_round_trip() {
        let values = [
            Value::Bool(false),
            Value::Int(-40),
            Value::Uint(u64::MAX),
            Value::Time(1234567),
            Value::String("Hello, World!".to_string()),
        ];
        for value in values {
            assert_eq!(Value::from_cbor(&value.to_cbor()), Ok(value));
        }
    }

    /// Narrowing accessors convert between integer kinds when in range
    /// and fail otherwise
    #[test]
    fn test_narrowing() {
        assert_eq!(Value::Uint(200).as_u8(), Some(200));
        assert_eq!(Value::Uint(300).as_u8(), None);
        assert_eq!(Value::Uint(5).as_i8(), Some(5));
        assert_eq!(Value::Int(-1).as_u64(), None);
        assert_eq!(Value::Int(-1).as_i16(), Some(-1));
        assert_eq!(Value::Bool(true).as_u8(), None);
        assert_eq!(Value::String("x".into()).as_i64(), None);
    }
}
