//! This contains the closed code sets used throughout the stream format.
//!
//! A das stream is self describing: header elements carry short string codes
//! naming value storage types, buffer encodings, value semantics and so on.
//! Each code set only has certain values, which lends itself well to being
//! represented by enums. The numeric discriminants are stable and are also
//! used for compact in-memory dispatch tables.
use num::FromPrimitive;
#[cfg(any(feature = "to_json", feature = "serde"))]
use serde::{Deserialize, Serialize};

use crate::errors::*;
use crate::time::DasTime;

/// Element types storable in a [`crate::array::DynArray`] and producible by a
/// [`crate::variable::Variable`].
///
/// Most variants are fixed-size scalars. `Time` is the broken-down calendar
/// structure [`DasTime`]. `Text`, `GeoVec` and `ByteSeq` are rank-1 composite
/// types that only appear at the datum level, never as raw array elements
/// (strings are stored in `UInt8` arrays with a usage flag instead).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(C)]
#[cfg_attr(
    any(feature = "to_json", feature = "serde"),
    derive(Serialize, Deserialize)
)]
pub enum ValType {
    Unknown = 0,
    UInt8 = 1,
    Int8 = 2,
    UInt16 = 3,
    Int16 = 4,
    UInt32 = 5,
    Int32 = 6,
    UInt64 = 7,
    Int64 = 8,
    Float32 = 9,
    Float64 = 10,
    Time = 11,
    Index = 12,
    Text = 13,
    GeoVec = 14,
    ByteSeq = 15,
}

impl std::fmt::Display for ValType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ValType {
    pub fn new(source: u16) -> Result<Self, DasError> {
        ValType::from_u16(source).ok_or(DasError::ParseEnum {
            f: "ValType".to_string(),
            code: source as i32,
        })
    }

    /// The fixed in-memory size of one element, in bytes.
    ///
    /// The composite types report the size of their in-memory handle, which
    /// is almost never what a codec wants; codecs operate on the backing
    /// byte arrays instead.
    pub fn size(self) -> usize {
        match self {
            Self::UInt8 | Self::Int8 => 1,
            Self::UInt16 | Self::Int16 => 2,
            Self::UInt32 | Self::Int32 | Self::Float32 => 4,
            Self::UInt64 | Self::Int64 | Self::Float64 => 8,
            Self::Time => DasTime::WIRE_SIZE,
            Self::Index => std::mem::size_of::<usize>(),
            Self::Unknown | Self::Text | Self::GeoVec | Self::ByteSeq => 1,
        }
    }

    /// Most value types are scalars (rank 0) but strings, byte sequences and
    /// geometric vectors carry one internal index.
    pub fn rank(self) -> usize {
        match self {
            Self::Text | Self::GeoVec | Self::ByteSeq => 1,
            _ => 0,
        }
    }

    pub fn is_int(self) -> bool {
        matches!(
            self,
            Self::UInt8
                | Self::Int8
                | Self::UInt16
                | Self::Int16
                | Self::UInt32
                | Self::Int32
                | Self::UInt64
                | Self::Int64
        )
    }

    pub fn is_signed_int(self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    pub fn is_real(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::UInt8 => "ubyte",
            Self::Int8 => "byte",
            Self::UInt16 => "ushort",
            Self::Int16 => "short",
            Self::UInt32 => "uint",
            Self::Int32 => "int",
            Self::UInt64 => "ulong",
            Self::Int64 => "long",
            Self::Float32 => "float",
            Self::Float64 => "double",
            Self::Time => "time",
            Self::Index => "index",
            Self::Text => "text",
            Self::GeoVec => "geovec",
            Self::ByteSeq => "byteseq",
        }
    }

    /// Parse a `storage` attribute value from a stream header.
    pub fn from_str(s: &str) -> Result<Self, DasError> {
        let vt = match s {
            "ubyte" => Self::UInt8,
            "byte" => Self::Int8,
            "ushort" => Self::UInt16,
            "short" => Self::Int16,
            "uint" => Self::UInt32,
            "int" => Self::Int32,
            "ulong" => Self::UInt64,
            "long" => Self::Int64,
            "float" => Self::Float32,
            "double" => Self::Float64,
            "time" | "struct" => Self::Time,
            _ => {
                return Err(DasError::Value {
                    msg: format!("Unknown storage type '{}'", s),
                })
            }
        };
        Ok(vt)
    }
}

/// Buffer encodings: how one item is laid out in packet bytes.
///
/// From the `encoding` attribute of a `<packet>` element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(C)]
#[cfg_attr(
    any(feature = "to_json", feature = "serde"),
    derive(Serialize, Deserialize)
)]
pub enum Encoding {
    /// Signed big-endian integer, 1 to 8 bytes.
    BigEndInt = 1,
    /// Unsigned big-endian integer.
    BigEndUint = 2,
    /// Signed little-endian integer.
    LittleEndInt = 3,
    /// Unsigned little-endian integer.
    LittleEndUint = 4,
    /// IEEE-754 value, most significant byte first.
    BigEndReal = 5,
    /// IEEE-754 value, least significant byte first.
    LittleEndReal = 6,
    /// A single signed byte.
    Byte = 7,
    /// A single unsigned byte.
    UByte = 8,
    /// UTF-8 text bytes.
    Utf8 = 9,
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Encoding {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BigEndInt => "BEint",
            Self::BigEndUint => "BEuint",
            Self::LittleEndInt => "LEint",
            Self::LittleEndUint => "LEuint",
            Self::BigEndReal => "BEreal",
            Self::LittleEndReal => "LEreal",
            Self::Byte => "byte",
            Self::UByte => "ubyte",
            Self::Utf8 => "utf8",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, DasError> {
        let enc = match s {
            "BEint" => Self::BigEndInt,
            "BEuint" => Self::BigEndUint,
            "LEint" => Self::LittleEndInt,
            "LEuint" => Self::LittleEndUint,
            "BEreal" => Self::BigEndReal,
            "LEreal" => Self::LittleEndReal,
            "byte" => Self::Byte,
            "ubyte" => Self::UByte,
            "utf8" => Self::Utf8,
            _ => {
                return Err(DasError::Enc {
                    msg: format!("Unknown buffer encoding '{}'", s),
                })
            }
        };
        Ok(enc)
    }

    /// True for the big-endian binary encodings.
    pub fn is_big_endian(self) -> bool {
        matches!(self, Self::BigEndInt | Self::BigEndUint | Self::BigEndReal)
    }

    /// True for anything that is not text.
    pub fn is_integral(self) -> bool {
        !matches!(self, Self::Utf8)
    }
}

/// The intended meaning of buffer items, separate from their storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(C)]
#[cfg_attr(
    any(feature = "to_json", feature = "serde"),
    derive(Serialize, Deserialize)
)]
pub enum Semantic {
    Bool = 1,
    Int = 2,
    Real = 3,
    Datetime = 4,
    Text = 5,
}

impl Semantic {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Real => "real",
            Self::Datetime => "datetime",
            Self::Text => "string",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, DasError> {
        let sem = match s {
            "bool" => Self::Bool,
            "int" | "integer" => Self::Int,
            "real" => Self::Real,
            "datetime" => Self::Datetime,
            "string" => Self::Text,
            _ => {
                return Err(DasError::Enc {
                    msg: format!("Unknown value semantic '{}'", s),
                })
            }
        };
        Ok(sem)
    }

    /// The default semantic for data stored as the given value type.
    pub fn default_for(vt: ValType) -> Self {
        match vt {
            ValType::Float32 | ValType::Float64 => Self::Real,
            ValType::Time => Self::Datetime,
            ValType::Text => Self::Text,
            _ => Self::Int,
        }
    }
}

impl std::fmt::Display for Semantic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether a dimension provides coordinates or data values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(C)]
#[cfg_attr(
    any(feature = "to_json", feature = "serde"),
    derive(Serialize, Deserialize)
)]
pub enum DimType {
    Coord = 1,
    Data = 2,
}

impl DimType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Coord => "coord",
            Self::Data => "data",
        }
    }
}

/// The role a variable plays within its dimension.
///
/// From the `use` attribute of `<scalar>` and `<vector>` elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(C)]
#[cfg_attr(
    any(feature = "to_json", feature = "serde"),
    derive(Serialize, Deserialize)
)]
pub enum Role {
    Center = 1,
    Min = 2,
    Max = 3,
    Reference = 4,
    Offset = 5,
    Mean = 6,
    Err = 7,
    Width = 8,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Center => "center",
            Self::Min => "min",
            Self::Max => "max",
            Self::Reference => "reference",
            Self::Offset => "offset",
            Self::Mean => "mean",
            Self::Err => "err",
            Self::Width => "width",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, DasError> {
        let role = match s {
            "center" => Self::Center,
            "min" => Self::Min,
            "max" => Self::Max,
            "reference" => Self::Reference,
            "offset" => Self::Offset,
            "mean" => Self::Mean,
            "err" | "uncertainty" => Self::Err,
            "width" => Self::Width,
            _ => {
                return Err(DasError::Dim {
                    msg: format!("Unknown variable role '{}'", s),
                })
            }
        };
        Ok(role)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Property value types, from the `type` attribute of `<p>` elements.
///
/// Both the das2 capitalized names and the das3 lower-case names are accepted
/// on input; output uses the das3 names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(C)]
#[cfg_attr(
    any(feature = "to_json", feature = "serde"),
    derive(Serialize, Deserialize)
)]
pub enum PropType {
    Bool = 1,
    Int = 2,
    Real = 3,
    RealRange = 4,
    Datum = 5,
    DatumRange = 6,
    Str = 7,
    Datetime = 8,
    DatetimeRange = 9,
}

impl PropType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "integer",
            Self::Real => "real",
            Self::RealRange => "realRange",
            Self::Datum => "datum",
            Self::DatumRange => "datumRange",
            Self::Str => "string",
            Self::Datetime => "datetime",
            Self::DatetimeRange => "datetimeRange",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, DasError> {
        let pt = match s {
            "bool" | "boolean" => Self::Bool,
            "int" | "integer" => Self::Int,
            "real" | "double" | "doubleArray" => Self::Real,
            "realRange" => Self::RealRange,
            "datum" | "Datum" => Self::Datum,
            "datumRange" | "DatumRange" => Self::DatumRange,
            "string" | "String" | "stringArray" => Self::Str,
            "datetime" | "Time" | "time" => Self::Datetime,
            "datetimeRange" | "TimeRange" => Self::DatetimeRange,
            _ => {
                return Err(DasError::Desc {
                    msg: format!("Unknown property type '{}'", s),
                })
            }
        };
        Ok(pt)
    }
}

impl std::fmt::Display for PropType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coordinate system tags carried by frames and vector variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(C)]
#[cfg_attr(
    any(feature = "to_json", feature = "serde"),
    derive(Serialize, Deserialize)
)]
pub enum CoordSys {
    Cartesian = 1,
    Polar = 2,
    SphereSurface = 3,
    Cylindrical = 4,
    /// ISO spherical, colatitude 0 at the north pole.
    Spherical = 5,
    /// Spherical, but with latitude +90 at the north pole.
    Centric = 6,
    /// Ellipsoidal, same angles as centric.
    Detic = 7,
    /// Ellipsoidal, longitude reversed.
    Graphic = 8,
}

impl CoordSys {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cartesian => "cartesian",
            Self::Polar => "polar",
            Self::SphereSurface => "sphere_surface",
            Self::Cylindrical => "cylindrical",
            Self::Spherical => "spherical",
            Self::Centric => "planetocentric",
            Self::Detic => "planetodetic",
            Self::Graphic => "planetographic",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, DasError> {
        let cs = match s {
            "cartesian" => Self::Cartesian,
            "polar" => Self::Polar,
            "sphere_surface" => Self::SphereSurface,
            "cylindrical" => Self::Cylindrical,
            "spherical" => Self::Spherical,
            "planetocentric" | "centric" => Self::Centric,
            "planetodetic" | "detic" => Self::Detic,
            "planetographic" | "graphic" => Self::Graphic,
            _ => {
                return Err(DasError::Vec {
                    msg: format!("Unknown coordinate system '{}'", s),
                })
            }
        };
        Ok(cs)
    }
}

impl std::fmt::Display for CoordSys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which generation of the wire format a stream uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    any(feature = "to_json", feature = "serde"),
    derive(Serialize, Deserialize)
)]
pub enum StreamModel {
    /// Legacy streams: 2-digit packet ids, `<x>/<y>/<yscan>` packet headers,
    /// ids may be redefined mid-stream.
    V2,
    /// Modern streams: arbitrary ids, `<dataset>` headers, ids are single
    /// assignment.
    V3,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn val_type_round_trip() {
        for code in 1u16..=15 {
            let vt = ValType::new(code).unwrap();
            if !matches!(vt, ValType::Index | ValType::GeoVec | ValType::ByteSeq) {
                assert_eq!(ValType::from_str(vt.as_str()).unwrap(), vt);
            }
        }
        assert!(ValType::new(200).is_err());
    }

    #[test]
    fn encoding_strings() {
        for s in &[
            "BEint", "BEuint", "LEint", "LEuint", "BEreal", "LEreal", "byte", "ubyte", "utf8",
        ] {
            let enc = Encoding::from_str(s).unwrap();
            assert_eq!(enc.as_str(), *s);
        }
        assert!(Encoding::from_str("middle_endian_real").is_err());
    }

    #[test]
    fn semantic_accepts_both_integer_spellings() {
        assert_eq!(Semantic::from_str("int").unwrap(), Semantic::Int);
        assert_eq!(Semantic::from_str("integer").unwrap(), Semantic::Int);
    }

    #[test]
    fn prop_type_accepts_das2_names() {
        assert_eq!(PropType::from_str("Datum").unwrap(), PropType::Datum);
        assert_eq!(PropType::from_str("boolean").unwrap(), PropType::Bool);
        assert_eq!(PropType::from_str("Time").unwrap(), PropType::Datetime);
        assert_eq!(PropType::from_str("datum").unwrap().as_str(), "datum");
    }
}
