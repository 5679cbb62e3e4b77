//! Scalar values: fills, parsing, formatting, comparison and the type
//! arithmetic used when variables are combined.
//!
//! Array elements are stored as raw native-endian bytes with an out-of-band
//! [`ValType`] tag; [`Value`] is the unpacked form handed to consumers.

use std::cmp::Ordering;

use crate::enums::{Encoding, Semantic, ValType};
use crate::errors::*;
use crate::time::DasTime;
use crate::units::{self, Units};

/// Canonical fill for real values across das tooling.
pub const FILL_VALUE: f64 = -1e31;

pub const INT64_FILL: i64 = -0x7FFF_FFFF_FFFF_FFFF;
pub const INT32_FILL: i32 = -0x7FFF_FFFF;

/// A single element, packed as raw native-endian bytes next to its type tag.
///
/// Large enough for any fixed-size element including a [`DasTime`].
#[derive(Debug, Clone, Copy)]
pub struct RawVal {
    bytes: [u8; 32],
    len: usize,
}

impl RawVal {
    pub fn new(src: &[u8]) -> Self {
        let mut bytes = [0u8; 32];
        bytes[..src.len()].copy_from_slice(src);
        RawVal {
            bytes,
            len: src.len(),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

/// The unpacked form of a stored element.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    UInt8(u8),
    Int8(i8),
    UInt16(u16),
    Int16(i16),
    UInt32(u32),
    Int32(i32),
    UInt64(u64),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Time(DasTime),
    Text(String),
    ByteSeq(Vec<u8>),
    GeoVec(GeoVec),
}

/// A geometric vector value: up to three components tagged with the frame
/// they are measured in.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoVec {
    pub components: [f64; 3],
    pub ncomp: u8,
    /// Index into the stream frame table, 0 when no frame was declared.
    pub frame_id: u8,
    pub sys: crate::enums::CoordSys,
    /// Direction map: which declared frame direction each component uses.
    pub dirs: [u8; 3],
}

impl Value {
    pub fn val_type(&self) -> ValType {
        match self {
            Value::UInt8(_) => ValType::UInt8,
            Value::Int8(_) => ValType::Int8,
            Value::UInt16(_) => ValType::UInt16,
            Value::Int16(_) => ValType::Int16,
            Value::UInt32(_) => ValType::UInt32,
            Value::Int32(_) => ValType::Int32,
            Value::UInt64(_) => ValType::UInt64,
            Value::Int64(_) => ValType::Int64,
            Value::Float32(_) => ValType::Float32,
            Value::Float64(_) => ValType::Float64,
            Value::Time(_) => ValType::Time,
            Value::Text(_) => ValType::Text,
            Value::ByteSeq(_) => ValType::ByteSeq,
            Value::GeoVec(_) => ValType::GeoVec,
        }
    }

    /// Unpack raw array bytes. The slice must hold at least `vt.size()`
    /// bytes for fixed-size types; for `Text`/`ByteSeq` the whole slice is
    /// taken.
    pub fn from_bytes(vt: ValType, b: &[u8]) -> Result<Value, DasError> {
        if b.len() < vt.size() && !matches!(vt, ValType::Text | ValType::ByteSeq) {
            return Err(DasError::Value {
                msg: format!("{} bytes cannot hold a {}", b.len(), vt),
            });
        }
        let v = match vt {
            ValType::UInt8 => Value::UInt8(b[0]),
            ValType::Int8 => Value::Int8(b[0] as i8),
            ValType::UInt16 => Value::UInt16(u16::from_ne_bytes([b[0], b[1]])),
            ValType::Int16 => Value::Int16(i16::from_ne_bytes([b[0], b[1]])),
            ValType::UInt32 => Value::UInt32(u32::from_ne_bytes([b[0], b[1], b[2], b[3]])),
            ValType::Int32 => Value::Int32(i32::from_ne_bytes([b[0], b[1], b[2], b[3]])),
            ValType::UInt64 => Value::UInt64(u64::from_ne_bytes([
                b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
            ])),
            ValType::Int64 => Value::Int64(i64::from_ne_bytes([
                b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
            ])),
            ValType::Float32 => Value::Float32(f32::from_ne_bytes([b[0], b[1], b[2], b[3]])),
            ValType::Float64 => Value::Float64(f64::from_ne_bytes([
                b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
            ])),
            ValType::Time => Value::Time(DasTime::from_bytes(b)),
            ValType::Text => Value::Text(String::from_utf8_lossy(b).into_owned()),
            ValType::ByteSeq => Value::ByteSeq(b.to_vec()),
            ValType::GeoVec | ValType::Index | ValType::Unknown => {
                return Err(DasError::Value {
                    msg: format!("Cannot unpack raw bytes as {}", vt),
                })
            }
        };
        Ok(v)
    }

    /// Pack back to raw native-endian array bytes.
    pub fn to_raw(&self) -> RawVal {
        match self {
            Value::UInt8(v) => RawVal::new(&[*v]),
            Value::Int8(v) => RawVal::new(&[*v as u8]),
            Value::UInt16(v) => RawVal::new(&v.to_ne_bytes()),
            Value::Int16(v) => RawVal::new(&v.to_ne_bytes()),
            Value::UInt32(v) => RawVal::new(&v.to_ne_bytes()),
            Value::Int32(v) => RawVal::new(&v.to_ne_bytes()),
            Value::UInt64(v) => RawVal::new(&v.to_ne_bytes()),
            Value::Int64(v) => RawVal::new(&v.to_ne_bytes()),
            Value::Float32(v) => RawVal::new(&v.to_ne_bytes()),
            Value::Float64(v) => RawVal::new(&v.to_ne_bytes()),
            Value::Time(v) => RawVal::new(&v.to_bytes()),
            Value::Text(s) => RawVal::new(&s.as_bytes()[..s.len().min(32)]),
            Value::ByteSeq(b) => RawVal::new(&b[..b.len().min(32)]),
            Value::GeoVec(_) => RawVal::new(&[]),
        }
    }

    /// Numeric view, if there is one. Times project onto `us2000`.
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            Value::UInt8(v) => Some(*v as f64),
            Value::Int8(v) => Some(*v as f64),
            Value::UInt16(v) => Some(*v as f64),
            Value::Int16(v) => Some(*v as f64),
            Value::UInt32(v) => Some(*v as f64),
            Value::Int32(v) => Some(*v as f64),
            Value::UInt64(v) => Some(*v as f64),
            Value::Int64(v) => Some(*v as f64),
            Value::Float32(v) => Some(*v as f64),
            Value::Float64(v) => Some(*v),
            Value::Time(t) => Some(t.epoch_seconds() * 1e6),
            Value::Text(_) | Value::ByteSeq(_) | Value::GeoVec(_) => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::UInt8(v) => write!(f, "{}", v),
            Value::Int8(v) => write!(f, "{}", v),
            Value::UInt16(v) => write!(f, "{}", v),
            Value::Int16(v) => write!(f, "{}", v),
            Value::UInt32(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::UInt64(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Float32(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::Time(t) => write!(f, "{}", t),
            Value::Text(s) => write!(f, "{}", s),
            Value::ByteSeq(b) => write!(f, "{} bytes", b.len()),
            Value::GeoVec(g) => {
                let c = &g.components[..g.ncomp as usize];
                write!(f, "({})", c.iter().map(|v| v.to_string()).collect::<Vec<_>>().join("; "))
            }
        }
    }
}

/// A value paired with its units; what [`crate::variable::Variable::get`]
/// produces.
#[derive(Debug, Clone, PartialEq)]
pub struct Datum {
    pub value: Value,
    pub units: Units,
}

impl Datum {
    pub fn new(value: Value, units: Units) -> Self {
        Datum { value, units }
    }

    pub fn to_f64(&self) -> Option<f64> {
        self.value.to_f64()
    }
}

impl std::fmt::Display for Datum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.units == units::DIMENSIONLESS {
            write!(f, "{}", self.value)
        } else {
            write!(f, "{} {}", self.value, self.units)
        }
    }
}

/// The default fill element for each storable type, as raw bytes.
pub fn fill_for(vt: ValType) -> RawVal {
    match vt {
        ValType::UInt8 => RawVal::new(&[u8::MAX]),
        ValType::Int8 => RawVal::new(&[(-127i8) as u8]),
        ValType::UInt16 => RawVal::new(&u16::MAX.to_ne_bytes()),
        ValType::Int16 => RawVal::new(&(-32767i16).to_ne_bytes()),
        ValType::UInt32 => RawVal::new(&u32::MAX.to_ne_bytes()),
        ValType::Int32 => RawVal::new(&INT32_FILL.to_ne_bytes()),
        ValType::UInt64 => RawVal::new(&u64::MAX.to_ne_bytes()),
        ValType::Int64 => RawVal::new(&INT64_FILL.to_ne_bytes()),
        ValType::Float32 => RawVal::new(&(FILL_VALUE as f32).to_ne_bytes()),
        ValType::Float64 => RawVal::new(&FILL_VALUE.to_ne_bytes()),
        ValType::Time => RawVal::new(&DasTime::new(1, 1, 1, 0, 0, 0.0).to_bytes()),
        _ => RawVal::new(&[0]),
    }
}

/// Parse text into raw bytes of the requested storage type.
///
/// Erroneous input is reported, not logged, so callers can substitute fill.
pub fn from_str(vt: ValType, text: &str) -> Result<RawVal, DasError> {
    let s = text.trim();
    let err = |t: &str| DasError::Value {
        msg: format!("'{}' does not parse as {}", t, vt),
    };
    let v = match vt {
        ValType::UInt8 => Value::UInt8(s.parse().map_err(|_| err(s))?),
        ValType::Int8 => Value::Int8(s.parse().map_err(|_| err(s))?),
        ValType::UInt16 => Value::UInt16(s.parse().map_err(|_| err(s))?),
        ValType::Int16 => Value::Int16(s.parse().map_err(|_| err(s))?),
        ValType::UInt32 => Value::UInt32(s.parse().map_err(|_| err(s))?),
        ValType::Int32 => Value::Int32(s.parse().map_err(|_| err(s))?),
        ValType::UInt64 => Value::UInt64(s.parse().map_err(|_| err(s))?),
        ValType::Int64 => Value::Int64(s.parse().map_err(|_| err(s))?),
        // Integer text like "42" must still land in real arrays
        ValType::Float32 => Value::Float32(s.parse().map_err(|_| err(s))?),
        ValType::Float64 => Value::Float64(s.parse().map_err(|_| err(s))?),
        ValType::Time => Value::Time(DasTime::parse(s)?),
        _ => return Err(err(s)),
    };
    Ok(v.to_raw())
}

/// Compare two packed values, possibly of different types.
///
/// Numerics promote to double and compare; times compare field-wise; text
/// compares bytewise. Mixed text/number or time/number is incomparable and
/// yields `None`.
pub fn cmp_any(vt_a: ValType, a: &[u8], vt_b: ValType, b: &[u8]) -> Option<Ordering> {
    if vt_a == vt_b && vt_a == ValType::Time {
        let ta = DasTime::from_bytes(a);
        let tb = DasTime::from_bytes(b);
        return ta.epoch_seconds().partial_cmp(&tb.epoch_seconds());
    }
    if vt_a == ValType::Text && vt_b == ValType::Text {
        return Some(a.cmp(b));
    }
    let va = Value::from_bytes(vt_a, a).ok()?;
    let vb = Value::from_bytes(vt_b, b).ok()?;
    match (va.to_f64(), vb.to_f64()) {
        (Some(x), Some(y)) if vt_a != ValType::Time && vt_b != ValType::Time => {
            x.partial_cmp(&y)
        }
        _ => None,
    }
}

/// The operations recognized by [`merge`] and binary variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
}

impl Op {
    pub fn as_str(self) -> &'static str {
        match self {
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, DasError> {
        match s {
            "+" => Ok(Op::Add),
            "-" => Ok(Op::Sub),
            "*" => Ok(Op::Mul),
            "/" => Ok(Op::Div),
            _ => Err(DasError::Var {
                msg: format!("Unknown operator '{}'", s),
            }),
        }
    }

    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            Op::Add => a + b,
            Op::Sub => a - b,
            Op::Mul => a * b,
            Op::Div => a / b,
        }
    }
}

/// The resulting storage type when two values are combined.
///
/// The combining rules:
/// 1. Unknown, Index, ByteSeq or Text combined with anything is unknown.
/// 2. Small integer math (widths below 4 bytes) yields `Float32`.
/// 3. Wider integer and real math yields `Float64`.
/// 4. `Time - Time` yields `Float64`; `Time` plus or minus a number stays
///    `Time`; any other combination with `Time` is unknown.
pub fn merge(left: ValType, op: Op, right: ValType) -> ValType {
    use ValType::*;
    let absorbs = |vt: ValType| matches!(vt, Unknown | Index | ByteSeq | Text | GeoVec);
    if absorbs(left) || absorbs(right) {
        return Unknown;
    }
    if left == Time || right == Time {
        if left == Time && right == Time {
            return if op == Op::Sub { Float64 } else { Unknown };
        }
        // Time shifted by a numeric interval stays a time
        let other = if left == Time { right } else { left };
        if matches!(op, Op::Add | Op::Sub) && other != Time {
            return Time;
        }
        return Unknown;
    }
    let small = |vt: ValType| matches!(vt, UInt8 | Int8 | UInt16 | Int16);
    if small(left) && small(right) {
        Float32
    } else {
        Float64
    }
}

/// Pick the in-memory storage type for a buffer encoding plus semantic.
///
/// This is how headers that give no explicit `storage` attribute are
/// assigned arrays. Text is sized by what it means: datetimes need an epoch
/// to become numbers, and TT2000 epochs need the full 64 bits.
pub fn store_type(
    enc: Encoding,
    item_bytes: i16,
    semantic: Semantic,
    epoch: Option<Units>,
) -> Result<ValType, DasError> {
    use Encoding::*;
    let vt = match enc {
        Byte => ValType::Int8,
        UByte => ValType::UInt8,
        BigEndInt | LittleEndInt => match item_bytes {
            1 => ValType::Int8,
            2 => ValType::Int16,
            4 => ValType::Int32,
            8 => ValType::Int64,
            _ => {
                return Err(DasError::Enc {
                    msg: format!("{}-byte integers are not a storable size", item_bytes),
                })
            }
        },
        BigEndUint | LittleEndUint => match item_bytes {
            1 => ValType::UInt8,
            2 => ValType::UInt16,
            4 => ValType::UInt32,
            8 => ValType::UInt64,
            _ => {
                return Err(DasError::Enc {
                    msg: format!("{}-byte integers are not a storable size", item_bytes),
                })
            }
        },
        BigEndReal | LittleEndReal => match item_bytes {
            4 => ValType::Float32,
            8 => ValType::Float64,
            _ => {
                return Err(DasError::Enc {
                    msg: format!("{}-byte reals are not a storable size", item_bytes),
                })
            }
        },
        Utf8 => match semantic {
            Semantic::Bool => ValType::UInt8,
            Semantic::Int => ValType::Int32,
            Semantic::Real => ValType::Float64,
            Semantic::Text => ValType::UInt8,
            Semantic::Datetime => match epoch {
                Some(u) if u == units::TT2000 => ValType::Int64,
                Some(u) if u.has_calendar_rep() => ValType::Float64,
                Some(u) => {
                    return Err(DasError::Enc {
                        msg: format!("'{}' is not a datetime epoch", u),
                    })
                }
                None => ValType::Time,
            },
        },
    };
    Ok(vt)
}

/// Convert a string to a double, das style: leading and trailing whitespace
/// is ignored, anything else fails.
pub fn str2double(s: &str) -> Option<f64> {
    s.trim().parse().ok()
}

/// Convert a string to an integer. Accepts an `0x` prefix for base 16.
pub fn str2int(s: &str) -> Option<i64> {
    let s = s.trim();
    let (neg, mag) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let v = match mag.strip_prefix("0x").or_else(|| mag.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None => mag.parse().ok()?,
    };
    Some(if neg { -v } else { v })
}

/// Convert a string to a bool. `true`/`yes`/`T`/`Y`/`1` and their opposites
/// are accepted, anything else is no conversion.
pub fn str2bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "t" | "y" | "1" => Some(true),
        "false" | "no" | "f" | "n" | "0" => Some(false),
        _ => None,
    }
}

/// Parse a comma separated list of ASCII values into doubles.
pub fn csv_to_doubles(s: &str) -> Result<Vec<f64>, DasError> {
    s.split(',')
        .map(|p| {
            str2double(p).ok_or_else(|| DasError::Value {
                msg: format!("'{}' is not a number", p.trim()),
            })
        })
        .collect()
}

/// Print doubles with comma-space separation, the ytag list format.
pub fn doubles_to_csv(vals: &[f64]) -> String {
    vals.iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Drop useless zeros from a formatted real: `7.1400e+02` becomes
/// `7.14e+02` and `3.000` becomes `3`. Used when printing header values.
pub fn trim_real(s: &str) -> String {
    if let Some(epos) = s.find(|c| c == 'e' || c == 'E') {
        let (mant, exp) = s.split_at(epos);
        if mant.contains('.') {
            let mant = mant.trim_end_matches('0').trim_end_matches('.');
            return format!("{}{}", mant, exp);
        }
        return s.to_string();
    }
    if s.contains('.') {
        return s.trim_end_matches('0').trim_end_matches('.').to_string();
    }
    s.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_values() {
        let f = fill_for(ValType::Float64);
        match Value::from_bytes(ValType::Float64, f.as_slice()).unwrap() {
            Value::Float64(v) => assert_eq!(v, FILL_VALUE),
            _ => panic!("wrong type"),
        }
        let f = fill_for(ValType::Int64);
        match Value::from_bytes(ValType::Int64, f.as_slice()).unwrap() {
            Value::Int64(v) => assert_eq!(v, INT64_FILL),
            _ => panic!("wrong type"),
        }
    }

    #[test]
    fn parse_values() {
        let v = from_str(ValType::Float64, " 3.14 ").unwrap();
        assert_eq!(
            Value::from_bytes(ValType::Float64, v.as_slice()).unwrap(),
            Value::Float64(3.14)
        );
        let v = from_str(ValType::Int16, "-7").unwrap();
        assert_eq!(
            Value::from_bytes(ValType::Int16, v.as_slice()).unwrap(),
            Value::Int16(-7)
        );
        assert!(from_str(ValType::Int16, "seven").is_err());
    }

    #[test]
    fn cross_type_compare() {
        let a = from_str(ValType::Int16, "41").unwrap();
        let b = from_str(ValType::Float64, "41.5").unwrap();
        assert_eq!(
            cmp_any(ValType::Int16, a.as_slice(), ValType::Float64, b.as_slice()),
            Some(Ordering::Less)
        );
        // Text never compares to numbers
        let t = b"41";
        assert_eq!(
            cmp_any(ValType::Text, t, ValType::Float64, b.as_slice()),
            None
        );
    }

    #[test]
    fn merge_rules() {
        use ValType::*;
        assert_eq!(merge(UInt8, Op::Mul, Int16), Float32);
        assert_eq!(merge(Int32, Op::Add, Int16), Float64);
        assert_eq!(merge(Float32, Op::Add, Float64), Float64);
        assert_eq!(merge(Time, Op::Sub, Time), Float64);
        assert_eq!(merge(Time, Op::Add, Float64), Time);
        assert_eq!(merge(Time, Op::Mul, Float64), Unknown);
        assert_eq!(merge(Text, Op::Add, Float64), Unknown);
    }

    #[test]
    fn store_type_inference() {
        assert_eq!(
            store_type(Encoding::BigEndReal, 8, Semantic::Real, None).unwrap(),
            ValType::Float64
        );
        assert_eq!(
            store_type(Encoding::Utf8, 24, Semantic::Datetime, Some(units::TT2000)).unwrap(),
            ValType::Int64
        );
        assert_eq!(
            store_type(Encoding::Utf8, 24, Semantic::Datetime, Some(units::US2000)).unwrap(),
            ValType::Float64
        );
        assert_eq!(
            store_type(Encoding::Utf8, 24, Semantic::Datetime, None).unwrap(),
            ValType::Time
        );
        assert_eq!(
            store_type(Encoding::LittleEndUint, 2, Semantic::Int, None).unwrap(),
            ValType::UInt16
        );
        assert!(store_type(Encoding::BigEndReal, 3, Semantic::Real, None).is_err());
    }

    #[test]
    fn string_helpers() {
        assert_eq!(str2int("0x10"), Some(16));
        assert_eq!(str2int("-12"), Some(-12));
        assert_eq!(str2bool("Yes"), Some(true));
        assert_eq!(str2bool("maybe"), None);
        assert_eq!(csv_to_doubles("1, 2.5,3").unwrap(), vec![1.0, 2.5, 3.0]);
        assert_eq!(trim_real("7.1400e+02"), "7.14e+02");
        assert_eq!(trim_real("3.000"), "3");
    }
}
