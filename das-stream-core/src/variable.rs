//! Rank-N value providers over arrays, sequences and expressions.
//!
//! A [`Variable`] answers "what is the value at this index?" for every index
//! of its dataset. The sum type replaces the function-pointer vtables of
//! older das libraries; every operation is an exhaustive match.
//!
//! External (dataset) index positions map onto array axes through an
//! [`IndexMap`]; positions a variable does not vary along are tagged
//! [`IdxMap::Unused`] and are legal to iterate anyway, which is how a rank-1
//! time column participates in a rank-2 spectrogram.

use std::rc::Rc;

use crate::array::{self, AryRef, DynArray};
use crate::enums::{CoordSys, ValType};
use crate::errors::*;
use crate::units::{self, Units};
use crate::value::{self, Datum, GeoVec, Op, RawVal, Value};
use crate::{AxisLen, IdxMap, Index, IndexMap, Shape, IDX_MAX, SHAPE_EMPTY};

/// A scalar literal repeated over all of index space.
#[derive(Debug, Clone)]
pub struct ConstVar {
    pub(crate) datum: Datum,
    pub(crate) ext_rank: usize,
}

/// An affine map `i → start + interval · i` along one index position.
#[derive(Debug, Clone)]
pub struct SeqVar {
    /// Value at index zero.
    pub(crate) start: Value,
    /// Step per index increment. For datetime sequences this is held in
    /// seconds regardless of the declared units.
    pub(crate) interval: f64,
    pub(crate) units: Units,
    /// The one external position this sequence depends on.
    pub(crate) axis: usize,
    pub(crate) ext_rank: usize,
}

/// Vector annotations for an array variable whose last axis holds
/// components.
#[derive(Debug, Clone)]
pub struct VecInfo {
    pub frame: String,
    pub frame_id: u8,
    pub sys: CoordSys,
    pub ncomp: usize,
    /// Which declared frame direction each component points along.
    pub dirs: [u8; 4],
}

/// A variable backed by a shared [`DynArray`].
#[derive(Debug, Clone)]
pub struct ArrayVar {
    pub(crate) ary: AryRef,
    pub(crate) idx_map: IndexMap,
    pub(crate) ext_rank: usize,
    /// 0 for scalars, 1 for strings and vectors.
    pub(crate) int_rank: usize,
    pub(crate) vec: Option<VecInfo>,
}

/// Pointwise negation of another variable.
#[derive(Debug, Clone)]
pub struct UnaryVar {
    pub(crate) sub: Box<Variable>,
    pub(crate) ext_rank: usize,
}

/// Pointwise combination of two variables.
#[derive(Debug, Clone)]
pub struct BinaryVar {
    pub(crate) left: Box<Variable>,
    pub(crate) op: Op,
    pub(crate) right: Box<Variable>,
    pub(crate) ext_rank: usize,
    pub(crate) vt: ValType,
}

/// A polymorphic rank-N value provider.
#[derive(Debug, Clone)]
pub enum Variable {
    Const(ConstVar),
    Sequence(SeqVar),
    Array(ArrayVar),
    Unary(UnaryVar),
    Binary(BinaryVar),
}

impl Variable {
    /// A constant with the given external rank.
    pub fn constant(datum: Datum, ext_rank: usize) -> Variable {
        Variable::Const(ConstVar { datum, ext_rank })
    }

    /// An affine sequence along `axis`.
    pub fn sequence(
        start: Value,
        interval: f64,
        units: Units,
        axis: usize,
        ext_rank: usize,
    ) -> Result<Variable, DasError> {
        if axis >= ext_rank || ext_rank > IDX_MAX {
            return Err(DasError::Var {
                msg: format!("Sequence axis {} outside rank {}", axis, ext_rank),
            });
        }
        Ok(Variable::Sequence(SeqVar {
            start,
            interval,
            units,
            axis,
            ext_rank,
        }))
    }

    /// An array-backed variable. `ext_map[i]` gives the array axis for each
    /// external position, or `Unused`.
    pub fn array(ary: AryRef, ext_map: &[IdxMap]) -> Result<Variable, DasError> {
        let ext_rank = ext_map.len();
        if ext_rank == 0 || ext_rank > IDX_MAX {
            return Err(DasError::Var {
                msg: format!("External rank {} out of range", ext_rank),
            });
        }
        let (ary_rank, usage) = {
            let a = ary.borrow();
            (a.rank(), a.usage())
        };
        let mut idx_map = crate::IDXMAP_EMPTY;
        let mut used = 0usize;
        for (i, m) in ext_map.iter().enumerate() {
            idx_map[i] = *m;
            if let IdxMap::Mapped(ax) = m {
                if *ax >= ary_rank {
                    return Err(DasError::Var {
                        msg: format!("Index map names array axis {} of a rank {} array", ax, ary_rank),
                    });
                }
                used += 1;
            }
        }
        // Unmapped trailing array axes are internal structure (strings)
        let int_rank = ary_rank - used;
        if int_rank > 1 {
            return Err(DasError::Var {
                msg: "At most one internal index is supported".to_string(),
            });
        }
        if int_rank == 1 && usage & (array::AS_STRING | array::AS_SUBSEQ) == 0 {
            return Err(DasError::Var {
                msg: "Array axes left unmapped on a non-string array".to_string(),
            });
        }
        Ok(Variable::Array(ArrayVar {
            ary,
            idx_map,
            ext_rank,
            int_rank,
            vec: None,
        }))
    }

    /// A vector variable: like [`Variable::array`] but the array's last axis
    /// holds the components of each value.
    pub fn vector(ary: AryRef, ext_map: &[IdxMap], vec: VecInfo) -> Result<Variable, DasError> {
        let ext_rank = ext_map.len();
        let ary_rank = ary.borrow().rank();
        let mut idx_map = crate::IDXMAP_EMPTY;
        let mut used = 0usize;
        for (i, m) in ext_map.iter().enumerate() {
            idx_map[i] = *m;
            if let IdxMap::Mapped(_) = m {
                used += 1;
            }
        }
        if used + 1 != ary_rank {
            return Err(DasError::Vec {
                msg: "Vector arrays need exactly one unmapped component axis".to_string(),
            });
        }
        if vec.ncomp == 0 || vec.ncomp > 3 {
            return Err(DasError::Vec {
                msg: format!("{} components is out of range", vec.ncomp),
            });
        }
        Ok(Variable::Array(ArrayVar {
            ary,
            idx_map,
            ext_rank,
            int_rank: 1,
            vec: Some(vec),
        }))
    }

    /// Pointwise negation.
    pub fn negate(sub: Variable) -> Variable {
        let ext_rank = sub.ext_rank();
        Variable::Unary(UnaryVar {
            sub: Box::new(sub),
            ext_rank,
        })
    }

    /// Pointwise combination. The ranks must agree; the element type comes
    /// from the value-type merge rules.
    pub fn binary(left: Variable, op: Op, right: Variable) -> Result<Variable, DasError> {
        if left.ext_rank() != right.ext_rank() {
            return Err(DasError::Var {
                msg: format!(
                    "Rank mismatch combining variables: {} vs {}",
                    left.ext_rank(),
                    right.ext_rank()
                ),
            });
        }
        let vt = value::merge(left.elem_type(), op, right.elem_type());
        if vt == ValType::Unknown {
            return Err(DasError::Var {
                msg: format!(
                    "No result type for {} {} {}",
                    left.elem_type(),
                    op.as_str(),
                    right.elem_type()
                ),
            });
        }
        let ext_rank = left.ext_rank();
        Ok(Variable::Binary(BinaryVar {
            left: Box::new(left),
            op,
            right: Box::new(right),
            ext_rank,
            vt,
        }))
    }

    /// Positions visible to callers.
    pub fn ext_rank(&self) -> usize {
        match self {
            Variable::Const(v) => v.ext_rank,
            Variable::Sequence(v) => v.ext_rank,
            Variable::Array(v) => v.ext_rank,
            Variable::Unary(v) => v.ext_rank,
            Variable::Binary(v) => v.ext_rank,
        }
    }

    /// 1 for strings and vectors, else 0.
    pub fn int_rank(&self) -> usize {
        match self {
            Variable::Array(v) => v.int_rank,
            _ => 0,
        }
    }

    pub fn units(&self) -> Units {
        match self {
            Variable::Const(v) => v.datum.units,
            Variable::Sequence(v) => v.units,
            Variable::Array(v) => v.ary.borrow().units(),
            Variable::Unary(v) => v.sub.units(),
            Variable::Binary(v) => {
                // Calendar math keeps the calendar side's units
                let lu = v.left.units();
                if lu != units::DIMENSIONLESS {
                    lu
                } else {
                    v.right.units()
                }
            }
        }
    }

    pub fn elem_type(&self) -> ValType {
        match self {
            Variable::Const(v) => v.datum.value.val_type(),
            Variable::Sequence(v) => v.start.val_type(),
            Variable::Array(v) => {
                if v.vec.is_some() {
                    ValType::GeoVec
                } else if v.int_rank == 1 {
                    let a = v.ary.borrow();
                    if a.usage() & array::AS_STRING != 0 {
                        ValType::Text
                    } else {
                        ValType::ByteSeq
                    }
                } else {
                    v.ary.borrow().val_type()
                }
            }
            Variable::Unary(v) => v.sub.elem_type(),
            Variable::Binary(v) => v.vt,
        }
    }

    pub fn is_numeric(&self) -> bool {
        let vt = self.elem_type();
        vt.is_int() || vt.is_real() || vt == ValType::Time
    }

    /// The backing array, for array variables.
    pub fn backing_array(&self) -> Option<AryRef> {
        match self {
            Variable::Array(v) => Some(Rc::clone(&v.ary)),
            _ => None,
        }
    }

    /// Sequence parameters (start, interval in storage form, axis), for
    /// sequence variables.
    pub fn as_sequence(&self) -> Option<(&Value, f64, usize)> {
        match self {
            Variable::Sequence(v) => Some((&v.start, v.interval, v.axis)),
            _ => None,
        }
    }

    /// The literal, for constant variables.
    pub fn as_const(&self) -> Option<&Datum> {
        match self {
            Variable::Const(v) => Some(&v.datum),
            _ => None,
        }
    }

    /// Vector annotations, when this is a vector variable.
    pub fn vec_info(&self) -> Option<&VecInfo> {
        match self {
            Variable::Array(v) => v.vec.as_ref(),
            _ => None,
        }
    }

    /// The external index map, for array variables.
    pub fn index_map(&self) -> Option<&IndexMap> {
        match self {
            Variable::Array(v) => Some(&v.idx_map),
            _ => None,
        }
    }

    /// Extent of each external position.
    pub fn shape(&self) -> Shape {
        let mut out = SHAPE_EMPTY;
        match self {
            Variable::Const(_) => {}
            Variable::Sequence(v) => out[v.axis] = AxisLen::Func,
            Variable::Array(v) => {
                let (ashape, _) = v.ary.borrow().shape();
                for i in 0..v.ext_rank {
                    if let IdxMap::Mapped(ax) = v.idx_map[i] {
                        out[i] = ashape[ax];
                    }
                }
            }
            Variable::Unary(v) => out = v.sub.shape(),
            Variable::Binary(v) => {
                out = v.left.shape();
                let rs = v.right.shape();
                crate::shape_merge(&mut out, &rs, v.ext_rank);
            }
        }
        out
    }

    /// Extent of the internal index, if any.
    pub fn intr_shape(&self) -> (Shape, usize) {
        let mut out = SHAPE_EMPTY;
        if let Variable::Array(v) = self {
            if v.int_rank == 1 {
                let a = v.ary.borrow();
                let (ashape, rank) = a.shape();
                out[0] = ashape[rank - 1];
                return (out, 1);
            }
        }
        (out, 0)
    }

    /// True when the variable does not vary along the given position.
    pub fn degenerate(&self, axis: usize) -> bool {
        !self.shape()[axis].is_used()
    }

    /// Extent along the position after a prefix of concrete indices.
    pub fn length_in(&self, prefix: &[usize]) -> AxisLen {
        match self {
            Variable::Const(_) => AxisLen::Unused,
            Variable::Sequence(v) => {
                if prefix.len() == v.axis {
                    AxisLen::Func
                } else {
                    AxisLen::Unused
                }
            }
            Variable::Array(v) => {
                let axis = prefix.len();
                match v.idx_map.get(axis) {
                    Some(IdxMap::Mapped(target)) => {
                        let mut ary_prefix = Vec::with_capacity(*target);
                        for a in 0..*target {
                            // idx maps preserve order, find the ext position
                            match (0..v.ext_rank)
                                .find(|e| v.idx_map[*e] == IdxMap::Mapped(a))
                            {
                                Some(e) if e < prefix.len() => ary_prefix.push(prefix[e]),
                                _ => return AxisLen::Ragged,
                            }
                        }
                        v.ary.borrow().length_in(&ary_prefix)
                    }
                    _ => AxisLen::Unused,
                }
            }
            Variable::Unary(v) => v.sub.length_in(prefix),
            Variable::Binary(v) => v.left.length_in(prefix).merge(v.right.length_in(prefix)),
        }
    }

    /// Map an external location to a location in the backing array
    /// (array variables only; positions tagged `Unused` are dropped).
    fn ary_loc(v: &ArrayVar, loc: &Index) -> Vec<usize> {
        let mut out = Vec::with_capacity(IDX_MAX);
        let a_rank = v.ary.borrow().rank();
        for target in 0..a_rank - v.int_rank {
            for e in 0..v.ext_rank {
                if v.idx_map[e] == IdxMap::Mapped(target) {
                    out.push(loc[e]);
                }
            }
        }
        out
    }

    /// The value at one external location.
    pub fn get(&self, loc: &Index) -> Result<Datum, DasError> {
        match self {
            Variable::Const(v) => Ok(v.datum.clone()),
            Variable::Sequence(v) => {
                let i = loc[v.axis] as f64;
                match &v.start {
                    Value::Time(t0) => {
                        // Interval is banked in seconds, add and re-normalize
                        let mut t = *t0;
                        t.second += v.interval * i;
                        t.normalize();
                        Ok(Datum::new(Value::Time(t), units::UTC))
                    }
                    other => {
                        let b = other.to_f64().ok_or_else(|| DasError::Var {
                            msg: "Sequence start is not numeric".to_string(),
                        })?;
                        Ok(Datum::new(Value::Float64(b + v.interval * i), v.units))
                    }
                }
            }
            Variable::Array(v) => {
                let aloc = Self::ary_loc(v, loc);
                let a = v.ary.borrow();
                if let Some(vec) = &v.vec {
                    let (bytes, n) = a.get_in(&aloc)?;
                    let vt = a.val_type();
                    let sz = a.val_size();
                    let mut comps = [0.0f64; 3];
                    for (ci, c) in comps.iter_mut().enumerate().take(n.min(vec.ncomp)) {
                        let item = &bytes[ci * sz..(ci + 1) * sz];
                        *c = Value::from_bytes(vt, item)?
                            .to_f64()
                            .unwrap_or(value::FILL_VALUE);
                    }
                    return Ok(Datum::new(
                        Value::GeoVec(GeoVec {
                            components: comps,
                            ncomp: vec.ncomp as u8,
                            frame_id: vec.frame_id,
                            sys: vec.sys,
                            dirs: [vec.dirs[0], vec.dirs[1], vec.dirs[2]],
                        }),
                        a.units(),
                    ));
                }
                if v.int_rank == 1 {
                    let text = a.get_chars_in(&aloc)?;
                    return Ok(Datum::new(Value::Text(text.to_string()), a.units()));
                }
                let bytes = a.get_at(&aloc)?;
                Ok(Datum::new(
                    Value::from_bytes(a.val_type(), bytes)?,
                    a.units(),
                ))
            }
            Variable::Unary(v) => {
                let d = v.sub.get(loc)?;
                let x = d.to_f64().ok_or_else(|| DasError::Var {
                    msg: "Cannot negate a non-numeric value".to_string(),
                })?;
                Ok(Datum::new(Value::Float64(-x), d.units))
            }
            Variable::Binary(v) => {
                let l = v.left.get(loc)?;
                let r = v.right.get(loc)?;
                binary_datum(&l, v.op, &r)
            }
        }
    }

    /// Does a raw element equal the backing array's fill?
    pub fn is_fill(&self, bytes: &[u8]) -> bool {
        match self {
            Variable::Array(v) => {
                let a = v.ary.borrow();
                a.fill().as_slice() == bytes
            }
            _ => false,
        }
    }

    /// Materialize the index range `[min, max)` as a standalone array.
    ///
    /// Three strategies, tried in order: a contiguous copy when the request
    /// covers whole records of a dense array, a strided copy for any other
    /// dense layout, and a per-element walk that writes fill into ragged
    /// holes.
    pub fn subset(&self, min: &[usize], max: &[usize]) -> Result<DynArray, DasError> {
        let rank = self.ext_rank();
        if min.len() != rank || max.len() != rank {
            return Err(DasError::Var {
                msg: "Subset range rank mismatch".to_string(),
            });
        }
        let mut lens = Vec::with_capacity(rank);
        for i in 0..rank {
            if max[i] < min[i] {
                return Err(DasError::Var {
                    msg: format!("Inverted range on index {}", i),
                });
            }
            lens.push(max[i] - min[i]);
        }

        if let Variable::Array(v) = self {
            if v.int_rank == 0 {
                let a = v.ary.borrow();
                let (ashape, _) = a.shape();
                let ragged = ashape.iter().any(|s| *s == AxisLen::Ragged);
                if !ragged {
                    if let Some(out) = self.subset_contiguous(v, min, max, &lens)? {
                        return Ok(out);
                    }
                    return self.subset_strided(v, min, &lens);
                }
            }
        }
        self.subset_slow(min, &lens)
    }

    /// Strategy 1: the request maps onto whole trailing records, one
    /// contiguous span.
    fn subset_contiguous(
        &self,
        v: &ArrayVar,
        min: &[usize],
        max: &[usize],
        lens: &[usize],
    ) -> Result<Option<DynArray>, DasError> {
        let a = v.ary.borrow();
        let (ashape, _) = a.shape();
        // Must use every external position in array order with full extent
        // everywhere below the outermost
        let mut mapped_axes = Vec::new();
        for e in 0..v.ext_rank {
            match v.idx_map[e] {
                IdxMap::Mapped(ax) => mapped_axes.push((e, ax)),
                IdxMap::Unused => {
                    if lens[e] != 1 {
                        return Ok(None); // broadcast request, not contiguous
                    }
                }
            }
        }
        for (pos, (_, ax)) in mapped_axes.iter().enumerate() {
            if *ax != pos {
                return Ok(None);
            }
        }
        for (pos, (e, ax)) in mapped_axes.iter().enumerate() {
            if pos == 0 {
                continue;
            }
            let extent = match ashape[*ax] {
                AxisLen::Size(n) => n,
                _ => return Ok(None),
            };
            if min[*e] != 0 || max[*e] != extent {
                return Ok(None);
            }
        }
        let (outer_ext, _) = match mapped_axes.first() {
            Some((e, ax)) => (*e, *ax),
            None => return Ok(None),
        };
        let mut out = DynArray::new(
            a.id(),
            a.val_type(),
            Some(*a.fill()),
            lens,
            a.units(),
        )?;
        out.clear();
        for rec in min[outer_ext]..max[outer_ext] {
            let (bytes, _) = a.get_in(&[rec])?;
            out.append_raw(bytes);
        }
        Ok(Some(out))
    }

    /// Strategy 2: dense array, arbitrary sub-ranges and broadcasts; copy
    /// row by row along the innermost mapped axis.
    fn subset_strided(
        &self,
        v: &ArrayVar,
        min: &[usize],
        lens: &[usize],
    ) -> Result<DynArray, DasError> {
        let a = v.ary.borrow();
        let mut out = DynArray::new(a.id(), a.val_type(), Some(*a.fill()), lens, a.units())?;
        let sz = a.val_size();
        let total: usize = lens.iter().product();
        let rank = lens.len();
        let mut odo = vec![0usize; rank];
        let mut buf = vec![0u8; total * sz];
        let mut loc: Index = [0; IDX_MAX];
        for chunk in buf.chunks_exact_mut(sz).take(total) {
            for i in 0..rank {
                loc[i] = min[i] + odo[i];
            }
            let aloc = Self::ary_loc(v, &loc);
            chunk.copy_from_slice(a.get_at(&aloc)?);
            for i in (0..rank).rev() {
                odo[i] += 1;
                if odo[i] < lens[i] {
                    break;
                }
                odo[i] = 0;
            }
        }
        out.clear();
        out.append_raw(&buf);
        Ok(out)
    }

    /// Strategy 3: anything goes; ragged holes read as fill.
    fn subset_slow(&self, min: &[usize], lens: &[usize]) -> Result<DynArray, DasError> {
        let vt = match self.elem_type() {
            ValType::Text | ValType::ByteSeq | ValType::GeoVec => {
                return Err(DasError::NotImp {
                    what: "Subsets of rank-1 composite values".to_string(),
                })
            }
            ValType::Unknown => ValType::Float64,
            other => other,
        };
        let mut out = DynArray::new("subset", vt, None, lens, self.units())?;
        let rank = lens.len();
        let total: usize = lens.iter().product();
        let mut odo = vec![0usize; rank];
        let mut loc: Index = [0; IDX_MAX];
        let fill = *out.fill();
        for _ in 0..total {
            for i in 0..rank {
                loc[i] = min[i] + odo[i];
            }
            let raw: RawVal = match self.get(&loc) {
                Ok(d) => coerce_raw(&d.value, vt).unwrap_or(fill),
                Err(_) => fill,
            };
            let mut put_loc = vec![0usize; rank];
            put_loc.copy_from_slice(&odo[..rank]);
            out.put_at(&put_loc, raw.as_slice(), 1)?;
            for i in (0..rank).rev() {
                odo[i] += 1;
                if odo[i] < lens[i] {
                    break;
                }
                odo[i] = 0;
            }
        }
        Ok(out)
    }

    /// A one-line human readable rendering, e.g.
    /// `e_spec_dens[i][j] V**2 m**-2 Hz**-1 | i:0..60, j:0..* [float]`.
    pub fn expression(&self) -> String {
        use std::fmt::Write;
        let letters = ['i', 'j', 'k', 'l', 'm', 'n', 'p', 'q'];
        match self {
            Variable::Const(v) => format!("{}", v.datum),
            Variable::Sequence(v) => {
                let mut s = String::new();
                let _ = write!(
                    s,
                    "{} + {}*{}",
                    v.start,
                    v.interval,
                    letters[v.axis.min(7)]
                );
                if v.units != units::DIMENSIONLESS {
                    let _ = write!(s, " {}", v.units);
                }
                let _ = write!(s, " | {}:0..* [{}]", letters[v.axis.min(7)], v.start.val_type());
                s
            }
            Variable::Array(v) => {
                let a = v.ary.borrow();
                let mut s = a.id().to_string();
                let shape = self.shape();
                let mut ranges = Vec::new();
                for e in 0..v.ext_rank {
                    if let IdxMap::Mapped(_) = v.idx_map[e] {
                        let _ = write!(s, "[{}]", letters[e.min(7)]);
                        let r = match shape[e] {
                            AxisLen::Size(n) => format!("{}:0..{}", letters[e.min(7)], n),
                            _ => format!("{}:0..*", letters[e.min(7)]),
                        };
                        ranges.push(r);
                    }
                }
                if a.units() != units::DIMENSIONLESS {
                    let _ = write!(s, " {}", a.units());
                }
                let _ = write!(s, " | {} [{}]", ranges.join(", "), a.val_type());
                s
            }
            Variable::Unary(v) => format!("-({})", v.sub.expression()),
            Variable::Binary(v) => format!(
                "({} {} {})",
                v.left.expression(),
                v.op.as_str(),
                v.right.expression()
            ),
        }
    }
}

/// Repack a value into `vt` raw bytes if it has a numeric path there.
fn coerce_raw(v: &Value, vt: ValType) -> Option<RawVal> {
    if v.val_type() == vt {
        return Some(v.to_raw());
    }
    if vt == ValType::Time {
        return match v {
            Value::Time(t) => Some(RawVal::new(&t.to_bytes())),
            _ => None,
        };
    }
    let x = v.to_f64()?;
    let out = match vt {
        ValType::UInt8 => Value::UInt8(x as u8),
        ValType::Int8 => Value::Int8(x as i8),
        ValType::UInt16 => Value::UInt16(x as u16),
        ValType::Int16 => Value::Int16(x as i16),
        ValType::UInt32 => Value::UInt32(x as u32),
        ValType::Int32 => Value::Int32(x as i32),
        ValType::UInt64 => Value::UInt64(x as u64),
        ValType::Int64 => Value::Int64(x as i64),
        ValType::Float32 => Value::Float32(x as f32),
        ValType::Float64 => Value::Float64(x),
        _ => return None,
    };
    Some(out.to_raw())
}

/// Combine two datums under the binary operator rules: calendar values
/// shift by intervals, intervals re-scale across unit families, plain
/// numbers use the left side's units.
fn binary_datum(l: &Datum, op: Op, r: &Datum) -> Result<Datum, DasError> {
    // Calendar struct on the left: shift by seconds
    if let Value::Time(t0) = &l.value {
        let rv = r.to_f64().ok_or_else(|| DasError::Var {
            msg: "Cannot shift a time by a non-number".to_string(),
        })?;
        let secs = r.units.convert(rv, units::SECONDS).unwrap_or(rv);
        let mut t = *t0;
        match op {
            Op::Add => t.second += secs,
            Op::Sub => t.second -= secs,
            _ => {
                return Err(DasError::Var {
                    msg: format!("Operation '{}' has no meaning for times", op.as_str()),
                })
            }
        }
        t.normalize();
        return Ok(Datum::new(Value::Time(t), units::UTC));
    }

    let lv = l.to_f64().ok_or_else(|| DasError::Var {
        msg: "Left operand is not numeric".to_string(),
    })?;
    let rv = r.to_f64().ok_or_else(|| DasError::Var {
        msg: "Right operand is not numeric".to_string(),
    })?;

    // Epoch + interval: bring the interval onto the epoch's tick size
    if l.units.has_calendar_rep() && !r.units.has_calendar_rep() {
        let rscaled = match (r.units.seconds_per_step(), l.units.seconds_per_step()) {
            (Some(rs), Some(ls)) => rv * rs / ls,
            _ => rv,
        };
        return Ok(Datum::new(Value::Float64(op.apply(lv, rscaled)), l.units));
    }

    let rv = if l.units != r.units && r.units.can_convert(l.units) {
        r.units.convert(rv, l.units)?
    } else {
        rv
    };
    Ok(Datum::new(Value::Float64(op.apply(lv, rv)), l.units))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::DasTime;
    use std::convert::TryInto;

    fn idx(loc: &[usize]) -> Index {
        let mut out = [0usize; IDX_MAX];
        out[..loc.len()].copy_from_slice(loc);
        out
    }

    fn waveform_arrays() -> (AryRef, AryRef) {
        // 2 records of a 4-sample waveform
        let refs = DynArray::new("time", ValType::Float64, None, &[0], units::US2000)
            .unwrap()
            .into_ref();
        {
            let mut a = refs.borrow_mut();
            a.append(Some(&1000.0f64.to_ne_bytes()), 1).unwrap();
            a.append(Some(&2000.0f64.to_ne_bytes()), 1).unwrap();
        }
        let offs = DynArray::new("offset", ValType::Float64, None, &[4], units::MICROSECONDS)
            .unwrap()
            .into_ref();
        {
            let mut a = offs.borrow_mut();
            for i in 0..4 {
                a.put_at(&[i], &(i as f64).to_ne_bytes(), 1).unwrap();
            }
        }
        (refs, offs)
    }

    #[test]
    fn const_is_degenerate_everywhere() {
        let c = Variable::constant(
            Datum::new(Value::Float64(2.5), units::SECONDS),
            2,
        );
        assert!(c.degenerate(0));
        assert!(c.degenerate(1));
        assert_eq!(c.get(&idx(&[5, 9])).unwrap().to_f64().unwrap(), 2.5);

        let sub = c.subset(&[0, 0], &[2, 3]).unwrap();
        let b = sub.get_at(&[1, 2]).unwrap();
        assert_eq!(f64::from_ne_bytes(b.try_into().unwrap()), 2.5);
    }

    #[test]
    fn sequence_values_and_shape() {
        let s = Variable::sequence(Value::Float64(10.0), 2.0, units::HERTZ, 1, 2).unwrap();
        assert_eq!(s.shape()[1], AxisLen::Func);
        assert!(s.degenerate(0));
        assert_eq!(s.get(&idx(&[0, 3])).unwrap().to_f64().unwrap(), 16.0);

        let sub = s.subset(&[0, 2], &[1, 5]).unwrap();
        let b = sub.get_at(&[0, 0]).unwrap();
        assert_eq!(f64::from_ne_bytes(b.try_into().unwrap()), 14.0);
    }

    #[test]
    fn datetime_sequence_normalizes() {
        let t0 = DasTime::parse("2020-01-01T23:59:50").unwrap();
        let s = Variable::sequence(Value::Time(t0), 5.0, units::SECONDS, 0, 1).unwrap();
        let d = s.get(&idx(&[4])).unwrap();
        match d.value {
            Value::Time(t) => {
                assert_eq!((t.mday, t.hour, t.minute), (2, 0, 0));
                assert_eq!(t.second, 10.0);
            }
            _ => panic!("expected time"),
        }
    }

    #[test]
    fn array_variable_with_unused_axis() {
        let (refs, _) = waveform_arrays();
        let v = Variable::array(refs, &[IdxMap::Mapped(0), IdxMap::Unused]).unwrap();
        assert_eq!(v.ext_rank(), 2);
        assert!(v.degenerate(1));
        let d = v.get(&idx(&[1, 3])).unwrap();
        assert_eq!(d.to_f64().unwrap(), 2000.0);
        assert_eq!(v.shape()[0], AxisLen::Size(2));
    }

    #[test]
    fn binary_reference_plus_offset() {
        let (refs, offs) = waveform_arrays();
        let r = Variable::array(refs, &[IdxMap::Mapped(0), IdxMap::Unused]).unwrap();
        let o = Variable::array(offs, &[IdxMap::Unused, IdxMap::Mapped(0)]).unwrap();
        let center = Variable::binary(r, Op::Add, o).unwrap();
        assert_eq!(center.ext_rank(), 2);
        assert_eq!(center.elem_type(), ValType::Float64);

        // offsets are µs and the reference epoch ticks in µs
        let d = center.get(&idx(&[1, 3])).unwrap();
        assert_eq!(d.to_f64().unwrap(), 2003.0);
        assert_eq!(d.units, units::US2000);

        let shape = center.shape();
        assert_eq!(shape[0], AxisLen::Size(2));
        assert_eq!(shape[1], AxisLen::Size(4));
    }

    #[test]
    fn subset_length_matches_request() {
        let (_, offs) = waveform_arrays();
        let o = Variable::array(offs, &[IdxMap::Mapped(0)]).unwrap();
        let sub = o.subset(&[1], &[3]).unwrap();
        let (shape, rank) = sub.shape();
        assert_eq!(rank, 1);
        assert_eq!(shape[0], AxisLen::Size(2));
        let b = sub.get_at(&[0]).unwrap();
        assert_eq!(f64::from_ne_bytes(b.try_into().unwrap()), 1.0);
    }

    #[test]
    fn expression_renders() {
        let (refs, _) = waveform_arrays();
        let v = Variable::array(refs, &[IdxMap::Mapped(0), IdxMap::Unused]).unwrap();
        let e = v.expression();
        assert!(e.starts_with("time[i]"));
        assert!(e.contains("us2000"));
        assert!(e.contains("[double]"));
    }

    #[test]
    fn string_variable_reads_rows() {
        let a = DynArray::new("labels", ValType::UInt8, None, &[0, 0], units::DIMENSIONLESS)
            .unwrap();
        let a = a.into_ref();
        a.borrow_mut().set_usage(array::AS_STRING);
        {
            let mut b = a.borrow_mut();
            for w in ["Bx", "By"] {
                b.append(Some(w.as_bytes()), w.len()).unwrap();
                b.append(Some(&[0]), 1).unwrap();
                b.mark_end(1).unwrap();
            }
        }
        let v = Variable::array(a, &[IdxMap::Mapped(0)]).unwrap();
        assert_eq!(v.int_rank(), 1);
        assert_eq!(v.elem_type(), ValType::Text);
        match v.get(&idx(&[1])).unwrap().value {
            Value::Text(s) => assert_eq!(s, "By"),
            _ => panic!("expected text"),
        }
    }
}
