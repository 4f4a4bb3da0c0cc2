//! Semantic type tags, field descriptors, and scalar values

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Data type tag for column values
///
/// This is the closed set of semantic types a column may carry. A column's
/// tag is resolved once, when the field is declared or its data first
/// assigned, and is never re-inferred downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    /// 8-bit unsigned integer
    U8,
    /// 16-bit unsigned integer
    U16,
    /// 32-bit unsigned integer
    U32,
    /// 64-bit unsigned integer
    U64,
    /// 8-bit signed integer
    I8,
    /// 16-bit signed integer
    I16,
    /// 32-bit signed integer
    I32,
    /// 64-bit signed integer
    I64,
    /// 32-bit floating point
    F32,
    /// 64-bit floating point
    F64,
    /// Boolean
    Bool,
    /// Fixed-width byte string of the given width
    FixedStr(usize),
    /// Variable-length UTF-8 string
    Str,
}

impl DType {
    /// Get the size of one element in bytes (0 for variable-length types)
    pub fn size_bytes(&self) -> usize {
        match self {
            DType::U8 | DType::I8 | DType::Bool => 1,
            DType::U16 | DType::I16 => 2,
            DType::U32 | DType::I32 | DType::F32 => 4,
            DType::U64 | DType::I64 | DType::F64 => 8,
            DType::FixedStr(width) => *width,
            DType::Str => 0,
        }
    }

    /// Check if this type is a numeric type
    pub fn is_numeric(&self) -> bool {
        !self.is_string() && *self != DType::Bool
    }

    /// Check if this type is string-like
    pub fn is_string(&self) -> bool {
        matches!(self, DType::FixedStr(_) | DType::Str)
    }

    /// Check if elements of this type have a fixed byte width
    pub fn is_fixed_width(&self) -> bool {
        !matches!(self, DType::Str)
    }

    /// Render the NPY descr string for this type (e.g. `<u8`, `|b1`, `|S12`)
    ///
    /// Variable-length strings have no fixed descr; callers pack them to a
    /// concrete `FixedStr` width before serializing.
    pub fn to_descr(&self) -> String {
        match self {
            DType::U8 => "|u1".into(),
            DType::U16 => "<u2".into(),
            DType::U32 => "<u4".into(),
            DType::U64 => "<u8".into(),
            DType::I8 => "|i1".into(),
            DType::I16 => "<i2".into(),
            DType::I32 => "<i4".into(),
            DType::I64 => "<i8".into(),
            DType::F32 => "<f4".into(),
            DType::F64 => "<f8".into(),
            DType::Bool => "|b1".into(),
            DType::FixedStr(width) => format!("|S{width}"),
            DType::Str => "|O".into(),
        }
    }

    /// Parse an NPY descr string into a type tag
    pub fn from_descr(descr: &str) -> Result<Self> {
        let descr = descr.trim();
        let body = descr
            .strip_prefix('<')
            .or_else(|| descr.strip_prefix('|'))
            .or_else(|| descr.strip_prefix('='))
            .unwrap_or(descr);
        if let Some(width) = body.strip_prefix('S') {
            let width: usize = width
                .parse()
                .map_err(|_| Error::InvalidArgument(format!("bad string descr '{descr}'")))?;
            return Ok(DType::FixedStr(width));
        }
        match body {
            "u1" => Ok(DType::U8),
            "u2" => Ok(DType::U16),
            "u4" => Ok(DType::U32),
            "u8" => Ok(DType::U64),
            "i1" => Ok(DType::I8),
            "i2" => Ok(DType::I16),
            "i4" => Ok(DType::I32),
            "i8" => Ok(DType::I64),
            "f4" => Ok(DType::F32),
            "f8" => Ok(DType::F64),
            "b1" => Ok(DType::Bool),
            _ => Err(Error::UnsupportedFormat(format!("unknown descr '{descr}'"))),
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_descr())
    }
}

/// A field in a dataset: a name paired with a type tag
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    /// Name of the field
    pub name: String,

    /// Data type of the field
    pub dtype: DType,
}

impl Field {
    /// Create a new field descriptor
    pub fn new(name: &str, dtype: DType) -> Self {
        Self {
            name: name.to_string(),
            dtype,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.dtype)
    }
}

/// A single scalar value read from or written to a column
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// 8-bit unsigned integer
    U8(u8),
    /// 16-bit unsigned integer
    U16(u16),
    /// 32-bit unsigned integer
    U32(u32),
    /// 64-bit unsigned integer
    U64(u64),
    /// 8-bit signed integer
    I8(i8),
    /// 16-bit signed integer
    I16(i16),
    /// 32-bit signed integer
    I32(i32),
    /// 64-bit signed integer
    I64(i64),
    /// 32-bit floating point
    F32(f32),
    /// 64-bit floating point
    F64(f64),
    /// Boolean
    Bool(bool),
    /// String (fixed- or variable-width columns both yield this)
    Str(String),
}

impl Value {
    /// The natural type tag for this value
    pub fn dtype(&self) -> DType {
        match self {
            Value::U8(_) => DType::U8,
            Value::U16(_) => DType::U16,
            Value::U32(_) => DType::U32,
            Value::U64(_) => DType::U64,
            Value::I8(_) => DType::I8,
            Value::I16(_) => DType::I16,
            Value::I32(_) => DType::I32,
            Value::I64(_) => DType::I64,
            Value::F32(_) => DType::F32,
            Value::F64(_) => DType::F64,
            Value::Bool(_) => DType::Bool,
            Value::Str(_) => DType::Str,
        }
    }

    /// View this value as u64 if it is an unsigned integer
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::U8(v) => Some(u64::from(*v)),
            Value::U16(v) => Some(u64::from(*v)),
            Value::U32(v) => Some(u64::from(*v)),
            Value::U64(v) => Some(*v),
            _ => None,
        }
    }

    /// View this value as f64 if it is any numeric type
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::U8(v) => Some(f64::from(*v)),
            Value::U16(v) => Some(f64::from(*v)),
            Value::U32(v) => Some(f64::from(*v)),
            Value::U64(v) => Some(*v as f64),
            Value::I8(v) => Some(f64::from(*v)),
            Value::I16(v) => Some(f64::from(*v)),
            Value::I32(v) => Some(f64::from(*v)),
            Value::I64(v) => Some(*v as f64),
            Value::F32(v) => Some(f64::from(*v)),
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    /// View this value as a string slice if it is string-like
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::U8(v) => write!(f, "{v}"),
            Value::U16(v) => write!(f, "{v}"),
            Value::U32(v) => write!(f, "{v}"),
            Value::U64(v) => write!(f, "{v}"),
            Value::I8(v) => write!(f, "{v}"),
            Value::I16(v) => write!(f, "{v}"),
            Value::I32(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v}"),
        }
    }
}

macro_rules! value_from {
    ($($native:ty => $variant:ident),* $(,)?) => {
        $(impl From<$native> for Value {
            fn from(v: $native) -> Self {
                Value::$variant(v)
            }
        })*
    };
}

value_from!(
    u8 => U8, u16 => U16, u32 => U32, u64 => U64,
    i8 => I8, i16 => I16, i32 => I32, i64 => I64,
    f32 => F32, f64 => F64, bool => Bool, String => Str,
);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("<u8", DType::U64)]
    #[test_case("|u1", DType::U8)]
    #[test_case("<i4", DType::I32)]
    #[test_case("<f4", DType::F32)]
    #[test_case("<f8", DType::F64)]
    #[test_case("|b1", DType::Bool)]
    #[test_case("|S12", DType::FixedStr(12))]
    fn descr_round_trip(descr: &str, dtype: DType) {
        assert_eq!(DType::from_descr(descr).unwrap(), dtype);
        assert_eq!(DType::from_descr(&dtype.to_descr()).unwrap(), dtype);
    }

    #[test]
    fn descr_rejects_garbage() {
        assert!(DType::from_descr("<x3").is_err());
        assert!(DType::from_descr("|Sx").is_err());
    }

    #[test]
    fn value_casts() {
        assert_eq!(Value::from(7u16).as_u64(), Some(7));
        assert_eq!(Value::from(2.5f32).as_f64(), Some(2.5));
        assert_eq!(Value::from("abc").as_str(), Some("abc"));
        assert_eq!(Value::from(true).as_u64(), None);
    }

    #[test]
    fn classification() {
        assert!(DType::F32.is_numeric());
        assert!(!DType::Bool.is_numeric());
        assert!(DType::FixedStr(4).is_string());
        assert!(!DType::Str.is_fixed_width());
        assert_eq!(DType::FixedStr(9).size_bytes(), 9);
    }
}
