//! Growable typed N-dimensional arrays with fill and ragged support.
//!
//! A [`DynArray`] is the only shared leaf of the data model: codecs append
//! into it during decode, variables read from it, and the owning dataset
//! keeps it alive. Sharing uses [`AryRef`] handles; the stream model is
//! single threaded so `Rc<RefCell<_>>` is the whole ownership story.
//!
//! Geometry: the 0th index is the record axis and may grow without bound
//! (declared extent 0). The last index may also be declared extent 0, which
//! makes it ragged: each run along it has its own length, closed by
//! [`DynArray::mark_end`]. Interior indices are always fixed, so any prefix
//! of a location addresses a contiguous span of the backing buffer.

use std::cell::RefCell;
use std::rc::Rc;

use crate::enums::ValType;
use crate::errors::*;
use crate::units::Units;
use crate::value::{self, RawVal};
use crate::{AxisLen, Shape, IDX_MAX, SHAPE_EMPTY};

/// Treat the last index as NUL-terminated UTF-8 text.
pub const AS_STRING: u32 = 0x0001;
/// Treat the last index as an opaque byte run.
pub const AS_SUBSEQ: u32 = 0x0002;

/// Shared handle to a dynamic array.
pub type AryRef = Rc<RefCell<DynArray>>;

/// One closed run along a ragged last index, in element offsets.
#[derive(Debug, Clone, Copy)]
struct Row {
    start: usize,
    len: usize,
}

/// A typed, optionally ragged, growable N-dimensional array.
#[derive(Debug)]
pub struct DynArray {
    id: String,
    vt: ValType,
    elem_sz: usize,
    fill: RawVal,
    units: Units,
    rank: usize,
    /// Declared extents; 0 on the record axis means growable, 0 on the last
    /// axis means ragged.
    decl: [usize; IDX_MAX],
    buf: Vec<u8>,
    rows: Vec<Row>,
    /// First element of the currently open run (ragged arrays only).
    open_row: usize,
    usage: u32,
    /// Which packet column fills this array, when stream-bound.
    src: Option<(u16, usize, usize)>,
}

impl DynArray {
    /// Create a new array.
    ///
    /// `shape` gives the declared extent per index; use 0 on the record axis
    /// for unbounded growth and 0 on the last axis for raggedness. If every
    /// extent is definite the array is pre-allocated full of the fill value,
    /// so [`DynArray::put_at`] works immediately.
    ///
    /// ```
    /// use das_stream_core::array::DynArray;
    /// use das_stream_core::enums::ValType;
    /// use das_stream_core::units;
    ///
    /// let mut ary = DynArray::new("freqs", ValType::Float64, None, &[5], units::HERTZ).unwrap();
    /// ary.put_at(&[2], &7.25f64.to_ne_bytes(), 1).unwrap();
    /// let b = ary.get_at(&[2]).unwrap();
    /// assert_eq!(f64::from_ne_bytes([b[0],b[1],b[2],b[3],b[4],b[5],b[6],b[7]]), 7.25);
    /// ```
    pub fn new(
        id: &str,
        vt: ValType,
        fill: Option<RawVal>,
        shape: &[usize],
        units: Units,
    ) -> Result<Self, DasError> {
        let rank = shape.len();
        if rank == 0 || rank > IDX_MAX {
            return Err(DasError::Array {
                msg: format!("Array {} rank {} is out of range", id, rank),
            });
        }
        for (i, &n) in shape.iter().enumerate() {
            if n == 0 && i != 0 && i != rank - 1 {
                return Err(DasError::Array {
                    msg: format!("Array {}: interior index {} cannot be ragged", id, i),
                });
            }
        }
        let fill = fill.unwrap_or_else(|| value::fill_for(vt));
        let elem_sz = vt.size();
        if fill.as_slice().len() != elem_sz {
            return Err(DasError::Array {
                msg: format!(
                    "Array {}: fill is {} bytes but elements are {}",
                    id,
                    fill.as_slice().len(),
                    elem_sz
                ),
            });
        }

        let mut decl = [0usize; IDX_MAX];
        decl[..rank].copy_from_slice(shape);

        let mut ary = DynArray {
            id: id.to_string(),
            vt,
            elem_sz,
            fill,
            units,
            rank,
            decl,
            buf: Vec::new(),
            rows: Vec::new(),
            open_row: 0,
            usage: 0,
            src: None,
        };

        // Fully declared arrays are materialized up front
        if shape.iter().all(|&n| n > 0) {
            let total: usize = shape.iter().product();
            ary.buf.reserve(total * elem_sz);
            for _ in 0..total {
                ary.buf.extend_from_slice(ary.fill.as_slice());
            }
        }
        Ok(ary)
    }

    /// Wrap in a shared handle.
    pub fn into_ref(self) -> AryRef {
        Rc::new(RefCell::new(self))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn val_type(&self) -> ValType {
        self.vt
    }

    pub fn val_size(&self) -> usize {
        self.elem_sz
    }

    pub fn units(&self) -> Units {
        self.units
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn fill(&self) -> &RawVal {
        &self.fill
    }

    pub fn set_usage(&mut self, flags: u32) {
        self.usage = flags;
    }

    pub fn usage(&self) -> u32 {
        self.usage
    }

    /// Record which packet column feeds this array: (packet id, column,
    /// items per record).
    pub fn set_src(&mut self, pkt_id: u16, col: usize, items: usize) {
        self.src = Some((pkt_id, col, items));
    }

    pub fn src(&self) -> Option<(u16, usize, usize)> {
        self.src
    }

    fn ragged_last(&self) -> bool {
        self.rank > 1 && self.decl[self.rank - 1] == 0
    }

    /// True when the record axis grows without bound.
    pub fn is_growable(&self) -> bool {
        self.decl[0] == 0
    }

    /// The declared extent of one axis; 0 means unbounded or ragged.
    pub fn declared(&self, axis: usize) -> usize {
        if axis < self.rank {
            self.decl[axis]
        } else {
            0
        }
    }

    /// Elements per full record when the inner geometry is fixed.
    fn rec_elems(&self) -> Option<usize> {
        if self.ragged_last() {
            return None;
        }
        Some(self.decl[1..self.rank].iter().product())
    }

    /// Completed runs per record for ragged arrays.
    fn rows_per_rec(&self) -> usize {
        self.decl[1..self.rank - 1].iter().product()
    }

    fn elem_count(&self) -> usize {
        self.buf.len() / self.elem_sz
    }

    /// The number of complete records present.
    pub fn records(&self) -> usize {
        if !self.is_growable() {
            return self.decl[0];
        }
        if self.ragged_last() {
            self.rows.len() / self.rows_per_rec()
        } else {
            match self.rec_elems() {
                Some(0) | None => 0,
                Some(n) => self.elem_count() / n,
            }
        }
    }

    /// Current extent of every index.
    pub fn shape(&self) -> (Shape, usize) {
        let mut out = SHAPE_EMPTY;
        out[0] = AxisLen::Size(self.records());
        for i in 1..self.rank {
            out[i] = if self.decl[i] == 0 {
                AxisLen::Ragged
            } else {
                AxisLen::Size(self.decl[i])
            };
        }
        (out, self.rank)
    }

    /// Append `count` elements at the end of the array, extending the record
    /// axis (and the open run for ragged arrays). With `data` as `None` the
    /// new elements are set to fill. Returns the byte range just written so
    /// decoders can convert in place.
    pub fn append(
        &mut self,
        data: Option<&[u8]>,
        count: usize,
    ) -> Result<&mut [u8], DasError> {
        if let Some(d) = data {
            if d.len() < count * self.elem_sz {
                return Err(DasError::Array {
                    msg: format!(
                        "Array {}: {} bytes do not hold {} elements",
                        self.id,
                        d.len(),
                        count
                    ),
                });
            }
        }
        if !self.is_growable() {
            return Err(DasError::Array {
                msg: format!("Array {} has a fixed record count", self.id),
            });
        }
        let at = self.buf.len();
        match data {
            Some(d) => self.buf.extend_from_slice(&d[..count * self.elem_sz]),
            None => {
                for _ in 0..count {
                    let f = self.fill;
                    self.buf.extend_from_slice(f.as_slice());
                }
            }
        }
        Ok(&mut self.buf[at..])
    }

    /// Close the current run along a ragged last index.
    pub fn mark_end(&mut self, axis: usize) -> Result<(), DasError> {
        if !self.ragged_last() || axis != self.rank - 1 {
            return Err(DasError::Array {
                msg: format!("Array {}: index {} is not ragged", self.id, axis),
            });
        }
        let end = self.elem_count();
        self.rows.push(Row {
            start: self.open_row,
            len: end - self.open_row,
        });
        self.open_row = end;
        Ok(())
    }

    /// Byte offset of a full location, or None for a ragged hole.
    fn offset_of(&self, loc: &[usize]) -> Option<usize> {
        if loc.len() != self.rank {
            return None;
        }
        if self.ragged_last() {
            let row = self.row_of(&loc[..self.rank - 1])?;
            let r = self.rows.get(row)?;
            if loc[self.rank - 1] >= r.len {
                return None;
            }
            Some((r.start + loc[self.rank - 1]) * self.elem_sz)
        } else {
            let mut off = 0usize;
            let mut stride = 1usize;
            for i in (0..self.rank).rev() {
                let extent = if i == 0 { self.records() } else { self.decl[i] };
                if loc[i] >= extent {
                    return None;
                }
                off += loc[i] * stride;
                stride *= extent;
            }
            Some(off * self.elem_sz)
        }
    }

    /// Completed-run index for a location prefix of length rank-1.
    fn row_of(&self, prefix: &[usize]) -> Option<usize> {
        let mut row = 0usize;
        let mut stride = 1usize;
        for i in (0..prefix.len()).rev() {
            let extent = if i == 0 {
                self.records().max(prefix[0] + 1)
            } else {
                self.decl[i]
            };
            if i != 0 && prefix[i] >= extent {
                return None;
            }
            row += prefix[i] * stride;
            stride *= extent;
        }
        Some(row)
    }

    /// Does a complete location address a stored element?
    pub fn valid_at(&self, loc: &[usize]) -> bool {
        self.offset_of(loc).is_some()
    }

    /// One element's raw bytes.
    pub fn get_at(&self, loc: &[usize]) -> Result<&[u8], DasError> {
        let off = self.offset_of(loc).ok_or_else(|| DasError::Array {
            msg: format!("Array {}: location {:?} is not valid", self.id, loc),
        })?;
        Ok(&self.buf[off..off + self.elem_sz])
    }

    /// Overwrite `count` elements starting at a location. Only valid inside
    /// the materialized extent.
    pub fn put_at(&mut self, loc: &[usize], data: &[u8], count: usize) -> Result<(), DasError> {
        let off = self.offset_of(loc).ok_or_else(|| DasError::Array {
            msg: format!("Array {}: location {:?} is not valid", self.id, loc),
        })?;
        let nbytes = count * self.elem_sz;
        if off + nbytes > self.buf.len() || data.len() < nbytes {
            return Err(DasError::Array {
                msg: format!("Array {}: write of {} elements overruns", self.id, count),
            });
        }
        self.buf[off..off + nbytes].copy_from_slice(&data[..nbytes]);
        Ok(())
    }

    /// All elements below a location prefix as one contiguous span, with the
    /// element count. Appends happen in row-major order, so every prefix is
    /// contiguous by construction.
    pub fn get_in(&self, prefix: &[usize]) -> Result<(&[u8], usize), DasError> {
        let err = || DasError::Array {
            msg: format!("Array {}: prefix {:?} is not valid", self.id, prefix),
        };
        if prefix.len() > self.rank {
            return Err(err());
        }
        if prefix.is_empty() {
            let n = if self.ragged_last() {
                self.rows.last().map(|r| r.start + r.len).unwrap_or(0)
            } else {
                self.elem_count()
            };
            return Ok((&self.buf[..n * self.elem_sz], n));
        }
        if prefix.len() == self.rank {
            let b = self.get_at(prefix)?;
            return Ok((b, 1));
        }
        if !self.ragged_last() {
            let inner: usize = self.decl[prefix.len()..self.rank].iter().product();
            let mut off = 0usize;
            let mut stride = inner;
            for i in (0..prefix.len()).rev() {
                let extent = if i == 0 { self.records() } else { self.decl[i] };
                if prefix[i] >= extent {
                    return Err(err());
                }
                off += prefix[i] * stride;
                stride *= extent;
            }
            return Ok((&self.buf[off * self.elem_sz..(off + inner) * self.elem_sz], inner));
        }
        // Ragged: a prefix covers a contiguous range of completed runs
        let runs_below: usize = self.decl[prefix.len()..self.rank - 1].iter().product();
        let mut full = prefix.to_vec();
        full.resize(self.rank - 1, 0);
        let first = self.row_of(&full).ok_or_else(err)?;
        let last = first + runs_below;
        if last > self.rows.len() {
            return Err(err());
        }
        let start = self.rows[first].start;
        let end = self.rows[last - 1].start + self.rows[last - 1].len;
        Ok((&self.buf[start * self.elem_sz..end * self.elem_sz], end - start))
    }

    /// The run below a prefix as text, trailing NUL removed.
    pub fn get_chars_in(&self, prefix: &[usize]) -> Result<&str, DasError> {
        let (bytes, _) = self.get_in(prefix)?;
        let bytes = if self.usage & AS_STRING != 0 {
            match bytes.iter().position(|&b| b == 0) {
                Some(n) => &bytes[..n],
                None => bytes,
            }
        } else {
            bytes
        };
        std::str::from_utf8(bytes).map_err(|_| DasError::Array {
            msg: format!("Array {}: run at {:?} is not UTF-8", self.id, prefix),
        })
    }

    /// The extent of the index just below a prefix.
    pub fn length_in(&self, prefix: &[usize]) -> AxisLen {
        if prefix.is_empty() {
            return AxisLen::Size(self.records());
        }
        if prefix.len() >= self.rank {
            return AxisLen::Size(0);
        }
        let axis = prefix.len();
        if axis < self.rank - 1 || !self.ragged_last() {
            return AxisLen::Size(self.decl[axis]);
        }
        match self.row_of(prefix).and_then(|r| self.rows.get(r)) {
            Some(row) => AxisLen::Size(row.len),
            None => AxisLen::Ragged,
        }
    }

    /// Element strides per index for dense arrays, or `None` when a ragged
    /// index makes a single stride equation impossible.
    pub fn stride(&self) -> Option<(Vec<usize>, Vec<usize>)> {
        if self.ragged_last() {
            return None;
        }
        let mut shape = vec![0usize; self.rank];
        let mut strides = vec![0usize; self.rank];
        let mut acc = 1usize;
        for i in (0..self.rank).rev() {
            shape[i] = if i == 0 { self.records() } else { self.decl[i] };
            strides[i] = acc;
            acc *= shape[i];
        }
        Some((shape, strides))
    }

    /// Copy everything below a prefix into a new standalone array.
    ///
    /// For ragged arrays the prefix must reach the ragged index, since a
    /// shorter prefix has no single sub-shape.
    pub fn sub_set_in(&self, prefix: &[usize]) -> Result<DynArray, DasError> {
        if self.ragged_last() && prefix.len() < self.rank - 1 {
            return Err(DasError::Array {
                msg: format!("Array {}: no uniform subset above a ragged index", self.id),
            });
        }
        let (bytes, count) = self.get_in(prefix)?;
        let sub_rank = self.rank - prefix.len();
        let mut shape: Vec<usize> = self.decl[prefix.len()..self.rank].to_vec();
        if sub_rank >= 1 && shape[0] == 0 {
            // Pin the leading extent of the copy to what is actually there
            let inner: usize = shape[1..].iter().product::<usize>().max(1);
            shape[0] = count / inner;
        }
        let mut out = DynArray::new(&self.id, self.vt, Some(self.fill), &shape, self.units)?;
        out.usage = self.usage;
        out.buf.clear();
        out.buf.extend_from_slice(bytes);
        Ok(out)
    }

    /// Extend the raw buffer directly. Only for building subset copies
    /// whose geometry is already accounted for.
    pub(crate) fn append_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Drop all stored records but keep the capacity. Returns bytes freed
    /// from the caller's point of view.
    pub fn clear(&mut self) -> usize {
        let freed = self.buf.len();
        self.buf.clear();
        self.rows.clear();
        self.open_row = 0;
        freed
    }

    /// Bytes currently holding live elements.
    pub fn mem_used(&self) -> usize {
        self.buf.len() + self.rows.len() * std::mem::size_of::<Row>()
    }

    /// Bytes owned including growth slack.
    pub fn mem_owned(&self) -> usize {
        self.buf.capacity() + self.rows.capacity() * std::mem::size_of::<Row>()
    }

    /// Bytes spent on the ragged index bookkeeping alone.
    pub fn mem_indexed(&self) -> usize {
        self.rows.capacity() * std::mem::size_of::<Row>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units;
    use std::convert::TryInto;

    fn f64s(vals: &[f64]) -> Vec<u8> {
        vals.iter().flat_map(|v| v.to_ne_bytes()).collect()
    }

    #[test]
    fn grow_and_read_rank2() {
        let mut a =
            DynArray::new("spec", ValType::Float64, None, &[0, 3], units::E_SPECDENS).unwrap();
        a.append(Some(&f64s(&[1.0, 2.0, 3.0])), 3).unwrap();
        a.append(Some(&f64s(&[4.0, 5.0, 6.0])), 3).unwrap();
        assert_eq!(a.records(), 2);

        let b = a.get_at(&[1, 2]).unwrap();
        assert_eq!(f64::from_ne_bytes(b.try_into().unwrap()), 6.0);
        assert!(!a.valid_at(&[2, 0]));

        let (row, n) = a.get_in(&[0]).unwrap();
        assert_eq!(n, 3);
        assert_eq!(row.len(), 24);

        let (shape, rank) = a.shape();
        assert_eq!(rank, 2);
        assert_eq!(shape[0], AxisLen::Size(2));
        assert_eq!(shape[1], AxisLen::Size(3));
    }

    #[test]
    fn shape_stable_across_get_at() {
        let mut a = DynArray::new("x", ValType::Float32, None, &[0], units::US2000).unwrap();
        a.append(Some(&1.5f32.to_ne_bytes()), 1).unwrap();
        let before = a.shape();
        for _ in 0..3 {
            a.get_at(&[0]).unwrap();
        }
        assert_eq!(a.shape(), before);
    }

    #[test]
    fn ragged_strings() {
        let mut a = DynArray::new("names", ValType::UInt8, None, &[0, 0], units::DIMENSIONLESS)
            .unwrap();
        a.set_usage(AS_STRING);
        for word in ["alpha", "be", ""] {
            a.append(Some(word.as_bytes()), word.len()).unwrap();
            a.append(Some(&[0]), 1).unwrap();
            a.mark_end(1).unwrap();
        }
        assert_eq!(a.records(), 3);
        assert_eq!(a.length_in(&[0]), AxisLen::Size(6));
        assert_eq!(a.length_in(&[1]), AxisLen::Size(3));
        assert_eq!(a.get_chars_in(&[0]).unwrap(), "alpha");
        assert_eq!(a.get_chars_in(&[2]).unwrap(), "");

        let (shape, _) = a.shape();
        assert_eq!(shape[1], AxisLen::Ragged);
    }

    #[test]
    fn fixed_preallocates_fill() {
        let a = DynArray::new("yt", ValType::Float64, None, &[4], units::HERTZ).unwrap();
        assert_eq!(a.records(), 4);
        let b = a.get_at(&[3]).unwrap();
        assert_eq!(f64::from_ne_bytes(b.try_into().unwrap()), value::FILL_VALUE);
    }

    #[test]
    fn interior_ragged_rejected() {
        assert!(DynArray::new("bad", ValType::Float64, None, &[0, 0, 4], units::HERTZ).is_err());
    }

    #[test]
    fn clear_keeps_capacity() {
        let mut a = DynArray::new("x", ValType::Float64, None, &[0], units::T2000).unwrap();
        a.append(Some(&f64s(&[1.0, 2.0, 3.0, 4.0])), 4).unwrap();
        let owned = a.mem_owned();
        let freed = a.clear();
        assert_eq!(freed, 32);
        assert_eq!(a.records(), 0);
        assert!(a.mem_owned() >= owned);
    }

    #[test]
    fn sub_set_in_copies_span() {
        let mut a =
            DynArray::new("z", ValType::Float32, None, &[0, 2], units::DIMENSIONLESS).unwrap();
        let vals: Vec<u8> = [1.0f32, 2.0, 3.0, 4.0].iter().flat_map(|v| v.to_ne_bytes()).collect();
        a.append(Some(&vals), 4).unwrap();
        let sub = a.sub_set_in(&[1]).unwrap();
        assert_eq!(sub.rank(), 1);
        let b = sub.get_at(&[1]).unwrap();
        assert_eq!(f32::from_ne_bytes(b.try_into().unwrap()), 4.0);
    }
}
