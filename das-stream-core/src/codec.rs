//! Bidirectional element ↔ byte translation over packet buffers.
//!
//! A [`Codec`] binds one array to one column of a packet layout: it knows
//! the buffer encoding, the per-item width, and everything derived from
//! comparing that to the array's element type (endian swap, width casts,
//! text parsing, datetime re-projection). Decoding appends into the array;
//! encoding walks the array back out.

use crate::array::{self, AryRef};
use crate::enums::{Encoding, Semantic, ValType};
use crate::errors::*;
use crate::time::DasTime;
use crate::units::{self, Units};
use crate::value::{self, Value};
use crate::IDX_MAX;

/// Binary ragged-row separators for IEEE floats.
///
/// These NaN palindromes read as non-standard quiet NaNs in either byte
/// order, so they work as in-band row terminators even when ordinary NaNs
/// are present in the data. The middle bytes carry the separator number.
pub const FLOAT_SEP: [[u8; 4]; IDX_MAX] = [
    [0x7f, 0x80, 0x80, 0x7f],
    [0x7f, 0x81, 0x81, 0x7f],
    [0x7f, 0x82, 0x82, 0x7f],
    [0x7f, 0x83, 0x83, 0x7f],
    [0x7f, 0x84, 0x84, 0x7f],
    [0x7f, 0x85, 0x85, 0x7f],
    [0x7f, 0x86, 0x86, 0x7f],
    [0x7f, 0x87, 0x87, 0x7f],
];

/// The 8-byte analogs of [`FLOAT_SEP`].
pub const DOUBLE_SEP: [[u8; 8]; IDX_MAX] = [
    [0x7f, 0xf8, 0x00, 0x00, 0x00, 0x00, 0xf8, 0x7f],
    [0x7f, 0xf8, 0x00, 0x81, 0x81, 0x00, 0xf8, 0x7f],
    [0x7f, 0xf8, 0x00, 0x82, 0x82, 0x00, 0xf8, 0x7f],
    [0x7f, 0xf8, 0x00, 0x83, 0x83, 0x00, 0xf8, 0x7f],
    [0x7f, 0xf8, 0x00, 0x84, 0x84, 0x00, 0xf8, 0x7f],
    [0x7f, 0xf8, 0x00, 0x85, 0x85, 0x00, 0xf8, 0x7f],
    [0x7f, 0xf8, 0x00, 0x86, 0x86, 0x00, 0xf8, 0x7f],
    [0x7f, 0xf8, 0x00, 0x87, 0x87, 0x00, 0xf8, 0x7f],
];

/// Identify a 4 or 8 byte ragged separator, returning its axis number.
pub fn ragged_sep_axis(item: &[u8]) -> Option<usize> {
    match item.len() {
        4 => FLOAT_SEP.iter().position(|s| s == item),
        8 => DOUBLE_SEP.iter().position(|s| s == item),
        _ => None,
    }
}

/// Item width marker: values are terminated by a separator byte.
pub const ITEM_TERM: i16 = -9;
/// Item width marker: values carry explicit lengths (not supported).
pub const ITEM_LEN: i16 = -1;

/// Encode flag: this codec writes the last items of a packet, append a
/// newline after text output.
pub const ENC_PKT_LAST: u32 = 0x02;
/// Encode flag: output lands in a header `<values>` block, wrap rows to
/// keep them readable.
pub const ENC_IN_HDR: u32 = 0x04;

// Processing flags derived at init
const SWAP: u32 = 0x0002;
const CAST_UP: u32 = 0x0004;
const TEXT: u32 = 0x0008;
const PARSE: u32 = 0x0010;
const VARSZ: u32 = 0x0020;
const CAST_DOWN: u32 = 0x0040;
const READER: u32 = 0x0080;
const MAJ_MASK: u32 = 0x00FE;
const NULLTERM: u32 = 0x0200;
const WRAP: u32 = 0x0400;
const EAT_SPACE: u32 = 0x0800;

#[cfg(target_endian = "little")]
const HOST_IS_LSB_FIRST: bool = true;
#[cfg(target_endian = "big")]
const HOST_IS_LSB_FIRST: bool = false;

/// Reads or writes one packet column of one array.
#[derive(Debug)]
pub struct Codec {
    uproc: u32,
    res_loss_warn: bool,
    ary: AryRef,
    vt_buf: ValType,
    enc: Encoding,
    /// Width of one buffer item; [`ITEM_TERM`] for separator-terminated.
    buf_val_sz: i16,
    semantic: Semantic,
    /// One separator per index, 0 meaning "any whitespace".
    sep_set: [u8; IDX_MAX],
    time_units: Option<Units>,
    out_fmt: Option<OutFmt>,
}

impl Codec {
    /// Build a codec that reads buffer bytes into the array.
    pub fn new_reader(
        ary: AryRef,
        semantic: Semantic,
        enc: Encoding,
        item_bytes: i16,
        sep: u8,
        epoch: Option<Units>,
    ) -> Result<Codec, DasError> {
        Codec::init(true, ary, semantic, enc, item_bytes, sep, epoch, None)
    }

    /// Build a codec that writes array values out to a buffer.
    pub fn new_writer(
        ary: AryRef,
        semantic: Semantic,
        enc: Encoding,
        item_bytes: i16,
        sep: u8,
        epoch: Option<Units>,
        out_fmt: Option<&str>,
    ) -> Result<Codec, DasError> {
        Codec::init(false, ary, semantic, enc, item_bytes, sep, epoch, out_fmt)
    }

    /// Validate that the buffer encoding can live in the array's value type
    /// and derive the processing flags. The rules, buffer → array:
    /// integers widen but never narrow on read, equal-width int → real is a
    /// precision error, text parses into anything numeric given a semantic,
    /// and `datetime` text needs an epoch unless the array stores calendar
    /// structs.
    #[allow(clippy::too_many_arguments)]
    fn init(
        read: bool,
        ary: AryRef,
        semantic: Semantic,
        enc: Encoding,
        item_bytes: i16,
        sep: u8,
        epoch: Option<Units>,
        out_fmt: Option<&str>,
    ) -> Result<Codec, DasError> {
        if item_bytes == 0 {
            return Err(DasError::Enc {
                msg: "Invalid item size in buffer: 0".to_string(),
            });
        }
        if item_bytes == ITEM_LEN {
            return Err(DasError::NotImp {
                what: "Parsing in-packet value lengths (use separators)".to_string(),
            });
        }

        let (vt_ary, ary_usage, last_decl, rank, ary_id) = {
            let a = ary.borrow();
            let (shape, rank) = a.shape();
            (
                a.val_type(),
                a.usage(),
                shape[rank - 1],
                rank,
                a.id().to_string(),
            )
        };

        let mut uproc = 0u32;
        if read {
            uproc |= READER;
        }

        let unsupported = || DasError::UnsupportedStorage {
            enc: enc.as_str().to_string(),
            item_bytes,
            vt: vt_ary,
        };

        let mut time_units = epoch;
        let vt_buf;

        if enc.is_integral() {
            vt_buf = match (enc, item_bytes) {
                (Encoding::Byte, 1) => ValType::Int8,
                (Encoding::UByte, 1) => ValType::UInt8,
                (Encoding::BigEndInt, 1) | (Encoding::LittleEndInt, 1) => ValType::Int8,
                (Encoding::BigEndInt, 2) | (Encoding::LittleEndInt, 2) => ValType::Int16,
                (Encoding::BigEndInt, 4) | (Encoding::LittleEndInt, 4) => ValType::Int32,
                (Encoding::BigEndInt, 8) | (Encoding::LittleEndInt, 8) => ValType::Int64,
                (Encoding::BigEndUint, 1) | (Encoding::LittleEndUint, 1) => ValType::UInt8,
                (Encoding::BigEndUint, 2) | (Encoding::LittleEndUint, 2) => ValType::UInt16,
                (Encoding::BigEndUint, 4) | (Encoding::LittleEndUint, 4) => ValType::UInt32,
                (Encoding::BigEndUint, 8) | (Encoding::LittleEndUint, 8) => ValType::UInt64,
                (Encoding::BigEndReal, 4) | (Encoding::LittleEndReal, 4) => ValType::Float32,
                (Encoding::BigEndReal, 8) | (Encoding::LittleEndReal, 8) => ValType::Float64,
                _ => return Err(unsupported()),
            };
            if enc.is_big_endian() == HOST_IS_LSB_FIRST {
                uproc |= SWAP;
            }

            if vt_buf.size() > vt_ary.size() {
                if read {
                    return Err(unsupported());
                }
                uproc |= CAST_DOWN;
            }
            if vt_buf.is_int() && vt_ary.is_real() && vt_ary.size() == vt_buf.size() {
                if read {
                    return Err(unsupported());
                }
                uproc |= CAST_DOWN;
            }
            if vt_buf.size() < vt_ary.size() {
                uproc |= CAST_UP;
            }
            if !vt_ary.is_int() && !vt_ary.is_real() {
                return Err(unsupported());
            }
        } else {
            vt_buf = ValType::Text;
            uproc |= TEXT;
            if item_bytes < 1 {
                uproc |= VARSZ;
            }
            match semantic {
                Semantic::Bool => {
                    return Err(DasError::NotImp {
                        what: "Parsing of 'true', 'false' text values".to_string(),
                    })
                }
                Semantic::Int | Semantic::Real => {
                    uproc |= PARSE;
                }
                Semantic::Datetime => {
                    if vt_ary != ValType::UInt8 && vt_ary != ValType::Int8 {
                        uproc |= PARSE;
                        if vt_ary != ValType::Time {
                            let ep = match epoch {
                                Some(u) if u.has_calendar_rep() => u,
                                _ => return Err(unsupported()),
                            };
                            if ep == units::TT2000 {
                                if vt_ary != ValType::Int64 && vt_ary != ValType::Float64 {
                                    return Err(unsupported());
                                }
                            } else if vt_ary != ValType::Float64 && vt_ary != ValType::Float32 {
                                return Err(unsupported());
                            }
                            time_units = Some(ep);
                        } else {
                            time_units = Some(units::UTC);
                        }
                    }
                }
                Semantic::Text => {
                    if vt_ary != ValType::UInt8 && vt_ary != ValType::Int8 {
                        return Err(unsupported());
                    }
                    if ary_usage & array::AS_STRING != 0 {
                        uproc |= NULLTERM;
                    }
                    if let crate::AxisLen::Size(n) = last_decl {
                        if item_bytes > 0 && n < item_bytes as usize && rank > 1 {
                            return Err(DasError::Enc {
                                msg: format!(
                                    "Array {}: last index too small for {} byte strings",
                                    ary_id, item_bytes
                                ),
                            });
                        }
                    }
                    if last_decl == crate::AxisLen::Ragged && rank > 1 {
                        uproc |= WRAP;
                    }
                }
            }
        }

        let mut sep_set = [0u8; IDX_MAX];
        sep_set[0] = sep;

        Ok(Codec {
            uproc,
            res_loss_warn: false,
            ary,
            vt_buf,
            enc,
            buf_val_sz: item_bytes,
            semantic,
            sep_set,
            time_units,
            out_fmt: out_fmt.and_then(OutFmt::parse),
        })
    }

    /// Re-point a copy of this codec at another array, e.g. when cloning a
    /// reference codec onto a fresh dataset. The resolution-loss warning
    /// latch resets.
    pub fn clone_for(&self, ary: AryRef) -> Result<Codec, DasError> {
        Codec::init(
            self.is_reader(),
            ary,
            self.semantic,
            self.enc,
            self.buf_val_sz,
            self.sep_set[0],
            self.time_units,
            None,
        )
    }

    /// A write-mode twin over the same array and wire layout, for emitting
    /// the data this codec was set up to read.
    pub fn to_writer(&self) -> Result<Codec, DasError> {
        Codec::init(
            false,
            std::rc::Rc::clone(&self.ary),
            self.semantic,
            self.enc,
            self.buf_val_sz,
            self.sep_set[0],
            self.time_units,
            None,
        )
    }

    pub fn is_reader(&self) -> bool {
        self.uproc & READER != 0
    }

    /// Eat extra whitespace between variable-length text values.
    pub fn set_eat_space(&mut self, eat: bool) {
        if eat {
            self.uproc |= EAT_SPACE;
        } else {
            self.uproc &= !EAT_SPACE;
        }
    }

    /// Set the separator for one index position.
    pub fn set_sep(&mut self, axis: usize, sep: u8) {
        if axis < IDX_MAX {
            self.sep_set[axis] = sep;
        }
    }

    pub fn array(&self) -> AryRef {
        std::rc::Rc::clone(&self.ary)
    }

    pub fn encoding(&self) -> Encoding {
        self.enc
    }

    pub fn item_bytes(&self) -> i16 {
        self.buf_val_sz
    }

    pub fn semantic(&self) -> Semantic {
        self.semantic
    }

    /// The primary value separator, 0 meaning whitespace.
    pub fn sep(&self) -> u8 {
        self.sep_set[0]
    }

    pub fn epoch(&self) -> Option<Units> {
        self.time_units
    }

    /// True when items have no fixed width in the buffer.
    pub fn is_var_size(&self) -> bool {
        self.buf_val_sz < 1
    }

    /// Read up to `expect` values from `buf` into the array.
    ///
    /// With `expect` of `None` the codec reads until the buffer is
    /// exhausted. Returns `(unread bytes, values read)`.
    pub fn decode(
        &mut self,
        buf: &[u8],
        expect: Option<usize>,
    ) -> Result<(usize, usize), DasError> {
        if !self.is_reader() {
            return Err(DasError::Enc {
                msg: "Codec is set to encode mode".to_string(),
            });
        }
        if expect == Some(0) || buf.is_empty() {
            return Ok((buf.len(), 0));
        }

        let item = self.buf_val_sz.max(0) as usize;
        let to_read = match (self.buf_val_sz > 0, expect) {
            (true, Some(n)) => {
                if buf.len() < n * item {
                    return Err(DasError::Enc {
                        msg: format!(
                            "Remaining read bytes, {}, too small to supply {} {} byte values",
                            buf.len(),
                            n,
                            item
                        ),
                    });
                }
                Some(n)
            }
            (false, Some(n)) => Some(n),
            (true, None) => {
                if buf.len() < item {
                    return Err(DasError::Enc {
                        msg: format!(
                            "Remaining read bytes, {}, too small to supply a single {} byte value",
                            buf.len(),
                            item
                        ),
                    });
                }
                Some(buf.len() / item)
            }
            (false, None) => None,
        };

        let vt_ary = self.ary.borrow().val_type();
        match self.uproc & MAJ_MASK {
            // Buffer and array layouts already agree
            x if x == READER => {
                let n = to_read.unwrap();
                self.ary.borrow_mut().append(Some(&buf[..n * item]), n)?;
                Ok((buf.len() - n * item, n))
            }
            x if x == READER | SWAP => {
                let n = to_read.unwrap();
                {
                    let mut a = self.ary.borrow_mut();
                    let dest = a.append(None, n)?;
                    for (i, chunk) in buf[..n * item].chunks_exact(item).enumerate() {
                        let d = &mut dest[i * item..(i + 1) * item];
                        for (j, b) in chunk.iter().rev().enumerate() {
                            d[j] = *b;
                        }
                    }
                }
                Ok((buf.len() - n * item, n))
            }
            x if x == READER | CAST_UP || x == READER | CAST_UP | SWAP => {
                let n = to_read.unwrap();
                let swap = self.uproc & SWAP != 0;
                {
                    let mut a = self.ary.borrow_mut();
                    let out_sz = a.val_size();
                    let dest = a.append(None, n)?;
                    cast_read(dest, &buf[..n * item], item, out_sz, vt_ary, self.vt_buf, swap)?;
                }
                Ok((buf.len() - n * item, n))
            }
            x if x == READER | CAST_DOWN || x == READER | CAST_DOWN | SWAP => {
                Err(DasError::Enc {
                    msg: "Downcasting to smaller types not supported on read".to_string(),
                })
            }
            // Fixed-width text stored as-is
            x if x == READER | TEXT => {
                let n = to_read.unwrap();
                let mut a = self.ary.borrow_mut();
                if self.uproc & NULLTERM != 0 {
                    for chunk in buf[..n * item].chunks_exact(item) {
                        a.append(Some(chunk), item)?;
                        a.append(Some(&[0]), 1)?;
                    }
                } else {
                    a.append(Some(&buf[..n * item]), n * item)?;
                }
                Ok((buf.len() - n * item, n))
            }
            // Fixed-width text parsed to values
            x if x == READER | TEXT | PARSE => {
                let n = to_read.unwrap();
                for chunk in buf[..n * item].chunks_exact(item) {
                    let text: String = chunk
                        .iter()
                        .map(|&b| b as char)
                        .filter(|c| !c.is_whitespace() && *c != '\0')
                        .collect();
                    if text.is_empty() {
                        self.ary.borrow_mut().append(None, 1)?;
                    } else {
                        self.convert_store(&text)?;
                    }
                }
                Ok((buf.len() - n * item, n))
            }
            // Variable-width text, with or without parsing
            x if x == READER | TEXT | VARSZ || x == READER | TEXT | PARSE | VARSZ => {
                let (used, did) = self.var_text_read(buf, to_read)?;
                Ok((buf.len() - used, did))
            }
            _ => Err(DasError::Enc {
                msg: "Logic error in encoder setup".to_string(),
            }),
        }
    }

    /// The variable-length text reading loop: skip filler, slice out one
    /// value, then parse or store it.
    ///
    /// With an explicit separator two adjacent separators mean an empty
    /// value; only whitespace and NULs are skipped as filler. In
    /// whitespace-separated mode (separator 0) runs of whitespace collapse.
    fn var_text_read(
        &mut self,
        buf: &[u8],
        expect: Option<usize>,
    ) -> Result<(usize, usize), DasError> {
        let parse = self.uproc & PARSE != 0;
        let space_sep = self.uproc & EAT_SPACE != 0 || self.sep_set[0] == 0;
        let sep = self.sep_set[0];
        let is_filler = |b: u8| b == 0 || (space_sep && b.is_ascii_whitespace());
        let is_break =
            |b: u8| (sep != 0 && b == sep) || b == 0 || (space_sep && b.is_ascii_whitespace());

        let mut pos = 0usize;
        let mut did = 0usize;
        while pos < buf.len() && expect.map(|n| did < n).unwrap_or(true) {
            while pos < buf.len() && is_filler(buf[pos]) {
                pos += 1;
            }
            if pos == buf.len() {
                break;
            }
            let start = pos;
            while pos < buf.len() && !is_break(buf[pos]) {
                pos += 1;
            }
            let raw = &buf[start..pos];
            if raw.is_empty() && (sep == 0 || pos == buf.len() || buf[pos] != sep) {
                break;
            }
            // A separator trails each value except possibly the last
            if sep != 0 && pos < buf.len() && buf[pos] == sep {
                pos += 1;
            }

            if parse {
                if raw.is_empty() {
                    self.ary.borrow_mut().append(None, 1)?;
                } else {
                    let text = String::from_utf8_lossy(raw).into_owned();
                    self.convert_store(&text)?;
                }
            } else {
                let mut a = self.ary.borrow_mut();
                if !raw.is_empty() {
                    a.append(Some(raw), raw.len())?;
                }
                if self.uproc & NULLTERM != 0 {
                    a.append(Some(&[0]), 1)?;
                }
                if self.uproc & WRAP != 0 {
                    let rank = a.rank();
                    a.mark_end(rank - 1)?;
                }
            }
            did += 1;
        }
        Ok((pos, did))
    }

    /// Parse one text value and append it, re-projecting datetimes onto the
    /// codec's epoch units when needed.
    fn convert_store(&mut self, text: &str) -> Result<(), DasError> {
        let vt_ary = self.ary.borrow().val_type();

        // Simple conversion: not a time, or stored as a calendar struct
        let is_time = self.semantic == Semantic::Datetime && self.time_units.is_some();
        if !is_time || vt_ary == ValType::Time {
            let raw = value::from_str(vt_ary, text)?;
            self.ary.borrow_mut().append(Some(raw.as_slice()), 1)?;
            return Ok(());
        }

        let epoch = self.time_units.unwrap();
        let dt = DasTime::parse(text)?;

        if epoch == units::TT2000 {
            let ns = dt.to_tt2000();
            match vt_ary {
                ValType::Int64 => {
                    self.ary.borrow_mut().append(Some(&ns.to_ne_bytes()), 1)?;
                }
                ValType::Float64 => {
                    if !self.res_loss_warn {
                        log::warn!(
                            "Resolution loss detected while converting TT2000 values to {}. \
                             Hint: use the 'storage' attribute in your streams to fix this.",
                            vt_ary
                        );
                        self.res_loss_warn = true;
                    }
                    let r = ns as f64;
                    self.ary.borrow_mut().append(Some(&r.to_ne_bytes()), 1)?;
                }
                _ => {
                    return Err(DasError::Enc {
                        msg: format!("Refusing to store TT2000 values in a {}", vt_ary),
                    })
                }
            }
            return Ok(());
        }

        let r = epoch.from_dt(&dt)?;
        match vt_ary {
            ValType::Float64 => {
                self.ary.borrow_mut().append(Some(&r.to_ne_bytes()), 1)?;
            }
            ValType::Float32 => {
                if !self.res_loss_warn {
                    log::warn!(
                        "Resolution loss detected while converting {} values to {}. \
                         Hint: use the 'storage' attribute in your streams to fix this.",
                        epoch,
                        vt_ary
                    );
                    self.res_loss_warn = true;
                }
                let r32 = r as f32;
                self.ary.borrow_mut().append(Some(&r32.to_ne_bytes()), 1)?;
            }
            _ => {
                return Err(DasError::Enc {
                    msg: format!("Refusing to store {} values in a {}", epoch, vt_ary),
                })
            }
        }
        Ok(())
    }

    /// Write values below a start location into `out`. With `expect` set the
    /// available element count must cover it. Returns values written.
    pub fn encode(
        &mut self,
        out: &mut Vec<u8>,
        loc: &[usize],
        expect: Option<usize>,
        flags: u32,
    ) -> Result<usize, DasError> {
        if self.is_reader() {
            return Err(DasError::Enc {
                msg: "Codec is set to decode mode".to_string(),
            });
        }
        let a = self.ary.borrow();
        let vt_ary = a.val_type();
        let (bytes, avail) = a.get_in(loc)?;
        if avail == 0 {
            return Err(DasError::Enc {
                msg: format!("No values were available to write from array {}", a.id()),
            });
        }
        if let Some(n) = expect {
            if avail < n {
                return Err(DasError::Enc {
                    msg: format!(
                        "Expected to write {} values for {}, but only {} were available",
                        n,
                        a.id(),
                        avail
                    ),
                });
            }
        }
        let sz = a.val_size();
        let item = self.buf_val_sz.max(0) as usize;

        match self.uproc & MAJ_MASK {
            0 => {
                out.extend_from_slice(bytes);
                Ok(avail)
            }
            SWAP => {
                for chunk in bytes.chunks_exact(sz) {
                    out.extend(chunk.iter().rev());
                }
                Ok(avail)
            }
            x if x == CAST_UP || x == CAST_DOWN || x == CAST_UP | SWAP || x == CAST_DOWN | SWAP => {
                let swap = self.uproc & SWAP != 0;
                let fill_in = *a.fill();
                for chunk in bytes.chunks_exact(sz) {
                    cast_write(
                        out,
                        chunk,
                        vt_ary,
                        fill_in.as_slice(),
                        self.vt_buf,
                        item,
                        swap,
                    )?;
                }
                Ok(avail)
            }
            TEXT => {
                // Text stored, text out; runs have known widths
                if self.uproc & NULLTERM != 0 {
                    let mut beg = 0usize;
                    let mut wrote = 0usize;
                    while beg < avail {
                        out.extend_from_slice(&bytes[beg..beg + item]);
                        beg += item + 1; // hop the NUL
                        wrote += 1;
                    }
                    Ok(wrote)
                } else {
                    out.extend_from_slice(bytes);
                    Ok(avail / item.max(1))
                }
            }
            x if x == TEXT | PARSE || x == TEXT | PARSE | VARSZ => {
                self.print_items(out, bytes, avail, sz, vt_ary, flags)?;
                Ok(avail)
            }
            x if x == TEXT | VARSZ => {
                // Variable width strings: walk completed runs below loc
                let sep = if self.sep_set[0] != 0 {
                    self.sep_set[0]
                } else {
                    b' '
                };
                let rank = a.rank();
                let n_runs = match a.length_in(loc) {
                    crate::AxisLen::Size(n) if loc.len() < rank - 1 => n,
                    _ => 1,
                };
                let mut wrote = 0usize;
                let mut row_chars = 0usize;
                for i in 0..n_runs {
                    let mut full = loc.to_vec();
                    if loc.len() < rank - 1 {
                        full.push(i);
                    }
                    let s = a.get_chars_in(&full)?;
                    if wrote > 0 {
                        if row_chars > 80 {
                            out.push(b'\n');
                            row_chars = 0;
                        } else {
                            out.push(sep);
                        }
                    }
                    out.extend_from_slice(s.as_bytes());
                    row_chars += s.len();
                    wrote += 1;
                }
                Ok(wrote)
            }
            _ => Err(DasError::Enc {
                msg: "Logic error in encoder setup".to_string(),
            }),
        }
    }

    /// The text pretty-printer used for packet text output and for header
    /// `<values>` blocks (which wrap at roughly 100 characters).
    fn print_items(
        &self,
        out: &mut Vec<u8>,
        bytes: &[u8],
        n: usize,
        sz: usize,
        vt: ValType,
        flags: u32,
    ) -> Result<(), DasError> {
        let sep = if self.sep_set[0] != 0 {
            self.sep_set[0]
        } else {
            b' '
        };
        let in_hdr = flags & ENC_IN_HDR != 0;

        let rough_each = match vt {
            ValType::UInt8 | ValType::Int8 => 5,
            ValType::UInt16 | ValType::Int16 => 8,
            ValType::UInt32 | ValType::Int32 => 12,
            ValType::UInt64 | ValType::Int64 => 20,
            ValType::Float32 => 12,
            ValType::Float64 => 15,
            ValType::Time => 24,
            _ => 25,
        };
        let rough_each = if self.buf_val_sz > 1 {
            self.buf_val_sz as usize
        } else {
            rough_each
        };

        let mut row_len = 0usize;
        for i in 0..n {
            if i > 0 {
                if in_hdr && row_len > 100 {
                    if sep != b' ' {
                        out.push(sep);
                    }
                    out.extend_from_slice(b"\n        ");
                    row_len = 0;
                } else {
                    out.push(sep);
                }
            } else if in_hdr {
                out.extend_from_slice(b"        ");
            }

            let item = &bytes[i * sz..(i + 1) * sz];
            let v = Value::from_bytes(vt, item)?;
            let mut text = match &self.out_fmt {
                Some(f) => f.render(&v),
                None => default_render(&v),
            };
            if in_hdr && vt.is_real() {
                text = value::trim_real(&text);
            }
            out.extend_from_slice(text.as_bytes());
            row_len += rough_each;
        }

        if flags & ENC_PKT_LAST != 0 {
            out.push(b'\n');
        } else {
            out.push(sep);
        }
        Ok(())
    }
}

/// Element-wise read conversion for the cast (and cast + swap) paths.
fn cast_read(
    dest: &mut [u8],
    src: &[u8],
    in_sz: usize,
    out_sz: usize,
    vt_ary: ValType,
    vt_buf: ValType,
    swap: bool,
) -> Result<(), DasError> {
    let n = src.len() / in_sz;
    let mut tmp = [0u8; 8];
    for i in 0..n {
        let chunk = &src[i * in_sz..(i + 1) * in_sz];
        let item: &[u8] = if swap {
            for (j, b) in chunk.iter().rev().enumerate() {
                tmp[j] = *b;
            }
            &tmp[..in_sz]
        } else {
            chunk
        };
        let v = Value::from_bytes(vt_buf, item)?;
        let d = &mut dest[i * out_sz..(i + 1) * out_sz];
        write_cast(d, vt_ary, &v)?;
    }
    Ok(())
}

/// Narrowing (or widening) write conversion with fill translation.
fn cast_write(
    out: &mut Vec<u8>,
    item: &[u8],
    vt_ary: ValType,
    fill_in: &[u8],
    vt_buf: ValType,
    out_sz: usize,
    swap: bool,
) -> Result<(), DasError> {
    let v = if item == fill_in {
        Value::from_bytes(vt_buf, value::fill_for(vt_buf).as_slice())?
    } else {
        Value::from_bytes(vt_ary, item)?
    };
    let mut staged = [0u8; 8];
    write_cast(&mut staged[..out_sz], vt_buf, &v)?;
    if swap {
        out.extend(staged[..out_sz].iter().rev());
    } else {
        out.extend_from_slice(&staged[..out_sz]);
    }
    Ok(())
}

/// Store a value into raw bytes of the requested type, converting as needed.
fn write_cast(dest: &mut [u8], vt: ValType, v: &Value) -> Result<(), DasError> {
    macro_rules! put {
        ($t:ty) => {{
            let x = v.to_f64().ok_or_else(|| DasError::Enc {
                msg: format!("Cannot cast {} to {}", v.val_type(), vt),
            })? as $t;
            dest.copy_from_slice(&x.to_ne_bytes());
        }};
    }
    // Integer sources stay exact through an integer path
    macro_rules! put_int {
        ($t:ty) => {{
            let x: $t = match v {
                Value::UInt8(x) => *x as $t,
                Value::Int8(x) => *x as $t,
                Value::UInt16(x) => *x as $t,
                Value::Int16(x) => *x as $t,
                Value::UInt32(x) => *x as $t,
                Value::Int32(x) => *x as $t,
                Value::UInt64(x) => *x as $t,
                Value::Int64(x) => *x as $t,
                Value::Float32(x) => *x as $t,
                Value::Float64(x) => *x as $t,
                _ => {
                    return Err(DasError::Enc {
                        msg: format!("Cannot cast {} to {}", v.val_type(), vt),
                    })
                }
            };
            dest.copy_from_slice(&x.to_ne_bytes());
        }};
    }
    match vt {
        ValType::UInt8 => put_int!(u8),
        ValType::Int8 => put_int!(i8),
        ValType::UInt16 => put_int!(u16),
        ValType::Int16 => put_int!(i16),
        ValType::UInt32 => put_int!(u32),
        ValType::Int32 => put_int!(i32),
        ValType::UInt64 => put_int!(u64),
        ValType::Int64 => put_int!(i64),
        ValType::Float32 => put!(f32),
        ValType::Float64 => put!(f64),
        _ => {
            return Err(DasError::Enc {
                msg: format!("Cannot cast into {}", vt),
            })
        }
    }
    Ok(())
}

fn default_render(v: &Value) -> String {
    match v {
        Value::Float32(x) => OutFmt::e_notation(*x as f64, 6),
        Value::Float64(x) => OutFmt::e_notation(*x, 11),
        other => other.to_string(),
    }
}

/// A parsed subset of printf conversions: `%[+][width][.prec](d|e|f|g|s)`.
#[derive(Debug, Clone)]
struct OutFmt {
    plus: bool,
    width: usize,
    prec: Option<usize>,
    kind: char,
}

impl OutFmt {
    fn parse(fmt: &str) -> Option<OutFmt> {
        let rest = fmt.strip_prefix('%')?;
        let (plus, rest) = match rest.strip_prefix('+') {
            Some(r) => (true, r),
            None => (false, rest),
        };
        let kind = rest.chars().last()?;
        if !matches!(kind, 'd' | 'e' | 'f' | 'g' | 's') {
            return None;
        }
        let body = &rest[..rest.len() - 1];
        let (w, p) = match body.split_once('.') {
            Some((w, p)) => (w, p.parse().ok()),
            None => (body, None),
        };
        let width = if w.is_empty() { 0 } else { w.parse().ok()? };
        Some(OutFmt {
            plus,
            width,
            prec: p,
            kind,
        })
    }

    /// printf-style exponent notation: two digit signed exponent.
    fn e_notation(v: f64, prec: usize) -> String {
        let s = format!("{:.*e}", prec, v);
        match s.split_once('e') {
            Some((mant, exp)) => {
                let (sign, digits) = match exp.strip_prefix('-') {
                    Some(d) => ('-', d),
                    None => ('+', exp),
                };
                format!("{}e{}{:0>2}", mant, sign, digits)
            }
            None => s,
        }
    }

    fn render(&self, v: &Value) -> String {
        let body = match (self.kind, v.to_f64()) {
            ('e', Some(x)) => {
                let mut t = Self::e_notation(x, self.prec.unwrap_or(6));
                if self.plus && x >= 0.0 {
                    t.insert(0, '+');
                }
                t
            }
            ('f', Some(x)) => format!("{:.*}", self.prec.unwrap_or(6), x),
            ('g', Some(x)) => value::trim_real(&format!("{:.*}", self.prec.unwrap_or(6), x)),
            ('d', Some(x)) => format!("{}", x as i64),
            _ => v.to_string(),
        };
        if body.len() < self.width {
            format!("{:>width$}", body, width = self.width)
        } else {
            body
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::DynArray;
    use std::convert::TryInto;

    fn ary(id: &str, vt: ValType, shape: &[usize]) -> AryRef {
        DynArray::new(id, vt, None, shape, units::DIMENSIONLESS)
            .unwrap()
            .into_ref()
    }

    #[test]
    fn decode_swapped_double() {
        // Big-endian pi with a little-endian host array
        let a = ary("x", ValType::Float64, &[0]);
        let mut c = Codec::new_reader(
            std::rc::Rc::clone(&a),
            Semantic::Real,
            Encoding::BigEndReal,
            8,
            0,
            None,
        )
        .unwrap();
        let buf = [0x40, 0x09, 0x21, 0xFB, 0x54, 0x44, 0x2D, 0x18];
        let (unread, read) = c.decode(&buf, Some(1)).unwrap();
        assert_eq!((unread, read), (0, 1));
        let b = a.borrow();
        let got = b.get_at(&[0]).unwrap();
        let v = f64::from_ne_bytes(got.try_into().unwrap());
        assert_eq!(v, std::f64::consts::PI);
    }

    #[test]
    fn decode_promotes_width() {
        let a = ary("counts", ValType::Float64, &[0]);
        let mut c = Codec::new_reader(
            std::rc::Rc::clone(&a),
            Semantic::Int,
            Encoding::BigEndInt,
            2,
            0,
            None,
        )
        .unwrap();
        let buf = [0x00, 0x01, 0x00, 0x02, 0x00, 0x03];
        let (unread, read) = c.decode(&buf, Some(3)).unwrap();
        assert_eq!((unread, read), (0, 3));
        let b = a.borrow();
        for (i, want) in [1.0, 2.0, 3.0].iter().enumerate() {
            let got = b.get_at(&[i]).unwrap();
            assert_eq!(f64::from_ne_bytes(got.try_into().unwrap()), *want);
        }
    }

    #[test]
    fn reader_rejects_downcast() {
        let a = ary("narrow", ValType::Int16, &[0]);
        let err = Codec::new_reader(a, Semantic::Int, Encoding::BigEndInt, 4, 0, None)
            .unwrap_err();
        assert!(matches!(err, DasError::UnsupportedStorage { .. }));
    }

    #[test]
    fn same_width_int_to_real_rejected() {
        let a = ary("r", ValType::Float32, &[0]);
        let err = Codec::new_reader(a, Semantic::Int, Encoding::LittleEndInt, 4, 0, None)
            .unwrap_err();
        assert!(matches!(err, DasError::UnsupportedStorage { .. }));
    }

    #[test]
    fn decode_text_times_to_tt2000() {
        let a = ary("epoch", ValType::Int64, &[0]);
        let mut c = Codec::new_reader(
            std::rc::Rc::clone(&a),
            Semantic::Datetime,
            Encoding::Utf8,
            24,
            0,
            Some(units::TT2000),
        )
        .unwrap();
        let mut buf = b"2020-01-01T00:00:00.000Z".to_vec();
        buf.resize(24, b' ');
        let (unread, read) = c.decode(&buf, Some(1)).unwrap();
        assert_eq!((unread, read), (0, 1));
        let b = a.borrow();
        let got = b.get_at(&[0]).unwrap();
        assert_eq!(i64::from_ne_bytes(got.try_into().unwrap()), 631108869184000000);
    }

    #[test]
    fn ragged_text_with_separator() {
        let a = ary("tags", ValType::UInt8, &[0, 0]);
        a.borrow_mut().set_usage(array::AS_STRING);
        let mut c = Codec::new_reader(
            std::rc::Rc::clone(&a),
            Semantic::Text,
            Encoding::Utf8,
            ITEM_TERM,
            b',',
            None,
        )
        .unwrap();
        let (unread, read) = c.decode(b"alpha,beta,,gamma", Some(4)).unwrap();
        assert_eq!(unread, 0);
        assert_eq!(read, 4);
        let b = a.borrow();
        assert_eq!(b.get_chars_in(&[0]).unwrap(), "alpha");
        assert_eq!(b.get_chars_in(&[1]).unwrap(), "beta");
        assert_eq!(b.get_chars_in(&[2]).unwrap(), "");
        assert_eq!(b.get_chars_in(&[3]).unwrap(), "gamma");
        assert_eq!(b.length_in(&[0]), crate::AxisLen::Size(6));
        assert_eq!(b.length_in(&[2]), crate::AxisLen::Size(1));
    }

    #[test]
    fn fixed_binary_round_trip() {
        // Invariant: encode(decode(bytes)) == bytes on the no-cast path
        let src: Vec<u8> = [1.0f32, -2.5, 3.25]
            .iter()
            .flat_map(|v| v.to_be_bytes())
            .collect();
        let a = ary("rt", ValType::Float32, &[0]);
        let mut rd = Codec::new_reader(
            std::rc::Rc::clone(&a),
            Semantic::Real,
            Encoding::BigEndReal,
            4,
            0,
            None,
        )
        .unwrap();
        rd.decode(&src, Some(3)).unwrap();

        let mut wr = Codec::new_writer(
            std::rc::Rc::clone(&a),
            Semantic::Real,
            Encoding::BigEndReal,
            4,
            0,
            None,
            None,
        )
        .unwrap();
        let mut out = Vec::new();
        let wrote = wr.encode(&mut out, &[], Some(3), 0).unwrap();
        assert_eq!(wrote, 3);
        assert_eq!(out, src);
    }

    #[test]
    fn text_encode_wraps_in_header() {
        let a = ary("vals", ValType::Float64, &[0]);
        {
            let mut b = a.borrow_mut();
            for i in 0..40 {
                b.append(Some(&(i as f64).to_ne_bytes()), 1).unwrap();
            }
        }
        let mut wr = Codec::new_writer(
            std::rc::Rc::clone(&a),
            Semantic::Real,
            Encoding::Utf8,
            ITEM_TERM,
            b';',
            None,
            Some("%11.4e"),
        )
        .unwrap();
        let mut out = Vec::new();
        wr.encode(&mut out, &[], None, ENC_IN_HDR).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains('\n'));
        assert!(text.contains("3.9e+01") || text.contains("39"));
    }

    #[test]
    fn ragged_sep_constants() {
        assert_eq!(ragged_sep_axis(&FLOAT_SEP[0]), Some(0));
        assert_eq!(ragged_sep_axis(&DOUBLE_SEP[5]), Some(5));
        assert_eq!(ragged_sep_axis(&[0u8; 4]), None);
        for sep in FLOAT_SEP.iter() {
            let v = f32::from_be_bytes(*sep);
            assert!(v.is_nan());
            let v = f32::from_le_bytes(*sep);
            assert!(v.is_nan());
        }
    }
}
