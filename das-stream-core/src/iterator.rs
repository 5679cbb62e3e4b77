//! Index walkers over datasets and index ranges.
//!
//! Dataset rank is a union over components, so iterating one is not a plain
//! nested loop: ragged datasets change extent per outer index. These
//! iterators hide that. Advance order is presentational only; fastest-last
//! (row major) is the default.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::dataset::Dataset;
use crate::variable::Variable;
use crate::{AxisLen, Index, IDX_MAX};

/// Which index position advances fastest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterOrder {
    /// The last index moves fastest (row major). The default.
    FastestLast,
    /// The first index moves fastest.
    FastestFirst,
}

static DEFAULT_ORDER: AtomicU8 = AtomicU8::new(0);

/// Set the process-wide default advance order.
pub fn set_default_order(order: IterOrder) {
    DEFAULT_ORDER.store(order as u8, Ordering::Relaxed);
}

/// The current process-wide default advance order.
pub fn default_order() -> IterOrder {
    if DEFAULT_ORDER.load(Ordering::Relaxed) == 0 {
        IterOrder::FastestLast
    } else {
        IterOrder::FastestFirst
    }
}

/// Extent of one axis at the current position, re-queried for ragged axes.
fn extent_at(ds: &Dataset, axis: usize, index: &Index) -> usize {
    match ds.length_in(&index[..axis]) {
        AxisLen::Size(n) => n,
        AxisLen::Ragged => 0,
        // Degenerate or purely functional axes visit a single position
        AxisLen::Func | AxisLen::Unused => 1,
    }
}

/// Walks every valid index of a dataset.
///
/// Safe on datasets that are still growing: the bounds seen at construction
/// are re-checked as the outer indices move.
pub struct DatasetIter<'a> {
    ds: &'a Dataset,
    rank: usize,
    order: IterOrder,
    index: Index,
    started: bool,
    done: bool,
    /// Axes that stay pinned at zero (used by the unique iterator).
    locked: [bool; IDX_MAX],
}

impl<'a> DatasetIter<'a> {
    pub fn new(ds: &'a Dataset) -> DatasetIter<'a> {
        DatasetIter {
            ds,
            rank: ds.rank(),
            order: default_order(),
            index: [0; IDX_MAX],
            started: false,
            done: false,
            locked: [false; IDX_MAX],
        }
    }

    /// Visit each distinct value of `var` exactly once by pinning every
    /// index position the variable is degenerate in.
    pub fn new_unique(ds: &'a Dataset, var: &Variable) -> DatasetIter<'a> {
        let mut it = DatasetIter::new(ds);
        for axis in 0..it.rank {
            if var.degenerate(axis) {
                it.locked[axis] = true;
            }
        }
        it
    }

    pub fn with_order(mut self, order: IterOrder) -> Self {
        self.order = order;
        self
    }

    fn axis_sequence(&self) -> Vec<usize> {
        match self.order {
            IterOrder::FastestLast => (0..self.rank).rev().collect(),
            IterOrder::FastestFirst => (0..self.rank).collect(),
        }
    }

    fn in_range(&self) -> bool {
        (0..self.rank).all(|ax| {
            self.locked[ax] || self.index[ax] < extent_at(self.ds, ax, &self.index).max(1)
        })
    }

    fn advance(&mut self) -> bool {
        for ax in self.axis_sequence() {
            if self.locked[ax] {
                continue;
            }
            self.index[ax] += 1;
            // Re-query since a higher index may just have moved
            if self.index[ax] < extent_at(self.ds, ax, &self.index) {
                return true;
            }
            self.index[ax] = 0;
        }
        false
    }
}

impl<'a> Iterator for DatasetIter<'a> {
    type Item = Index;

    fn next(&mut self) -> Option<Index> {
        if self.done {
            return None;
        }
        if !self.started {
            self.started = true;
            // An empty dataset has nothing at the origin either
            if extent_at(self.ds, 0, &self.index) == 0 || !self.in_range() {
                self.done = true;
                return None;
            }
            return Some(self.index);
        }
        if self.advance() {
            Some(self.index)
        } else {
            self.done = true;
            None
        }
    }
}

/// Walks the half-open rectangular range `[min, max)`.
pub struct CubeIter {
    rank: usize,
    min: Index,
    max: Index,
    order: IterOrder,
    index: Index,
    started: bool,
    done: bool,
}

impl CubeIter {
    pub fn new(rank: usize, min: &[usize], max: &[usize]) -> CubeIter {
        let mut mn = [0; IDX_MAX];
        let mut mx = [0; IDX_MAX];
        mn[..rank.min(min.len())].copy_from_slice(&min[..rank.min(min.len())]);
        mx[..rank.min(max.len())].copy_from_slice(&max[..rank.min(max.len())]);
        let empty = (0..rank).any(|i| mx[i] <= mn[i]);
        CubeIter {
            rank,
            min: mn,
            max: mx,
            order: default_order(),
            index: mn,
            started: false,
            done: empty,
        }
    }

    pub fn with_order(mut self, order: IterOrder) -> Self {
        self.order = order;
        self
    }
}

impl Iterator for CubeIter {
    type Item = Index;

    fn next(&mut self) -> Option<Index> {
        if self.done {
            return None;
        }
        if !self.started {
            self.started = true;
            return Some(self.index);
        }
        let axes: Vec<usize> = match self.order {
            IterOrder::FastestLast => (0..self.rank).rev().collect(),
            IterOrder::FastestFirst => (0..self.rank).collect(),
        };
        for ax in axes {
            self.index[ax] += 1;
            if self.index[ax] < self.max[ax] {
                return Some(self.index);
            }
            self.index[ax] = self.min[ax];
        }
        self.done = true;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::DynArray;
    use crate::enums::{DimType, Role, ValType};
    use crate::units;
    use crate::variable::Variable;
    use crate::IdxMap;
    use std::rc::Rc;

    fn small_ds() -> Dataset {
        let mut ds = Dataset::new("d", "g", 2).unwrap();
        let t = DynArray::new("t", ValType::Float64, None, &[0], units::T2000)
            .unwrap()
            .into_ref();
        let z = DynArray::new("z", ValType::Float64, None, &[0, 3], units::DIMENSIONLESS)
            .unwrap()
            .into_ref();
        {
            let mut b = t.borrow_mut();
            for v in [0.0f64, 1.0] {
                b.append(Some(&v.to_ne_bytes()), 1).unwrap();
            }
            let mut b = z.borrow_mut();
            for v in 0..6 {
                b.append(Some(&(v as f64).to_ne_bytes()), 1).unwrap();
            }
        }
        ds.add_array(Rc::clone(&t)).unwrap();
        ds.add_array(Rc::clone(&z)).unwrap();
        let d = ds.make_dim(DimType::Coord, "t").unwrap();
        d.add_var(
            Role::Center,
            Variable::array(t, &[IdxMap::Mapped(0), IdxMap::Unused]).unwrap(),
        )
        .unwrap();
        let d = ds.make_dim(DimType::Data, "z").unwrap();
        d.add_var(
            Role::Center,
            Variable::array(z, &[IdxMap::Mapped(0), IdxMap::Mapped(1)]).unwrap(),
        )
        .unwrap();
        ds
    }

    #[test]
    fn dataset_iter_row_major() {
        let ds = small_ds();
        let visits: Vec<(usize, usize)> =
            DatasetIter::new(&ds).map(|ix| (ix[0], ix[1])).collect();
        assert_eq!(
            visits,
            vec![(0, 0), (0, 1), (0, 2), (1, 0), (1, 1), (1, 2)]
        );
    }

    #[test]
    fn unique_iter_pins_degenerate_axes() {
        let ds = small_ds();
        let tvar = ds.get_dim("t").unwrap().get_var(Role::Center).unwrap().clone();
        let visits: Vec<(usize, usize)> =
            DatasetIter::new_unique(&ds, &tvar).map(|ix| (ix[0], ix[1])).collect();
        // Axis 1 is pinned: one visit per distinct time
        assert_eq!(visits, vec![(0, 0), (1, 0)]);
    }

    #[test]
    fn cube_iter_covers_range() {
        let visits: Vec<(usize, usize)> = CubeIter::new(2, &[1, 0], &[3, 2])
            .map(|ix| (ix[0], ix[1]))
            .collect();
        assert_eq!(visits, vec![(1, 0), (1, 1), (2, 0), (2, 1)]);
        assert_eq!(CubeIter::new(2, &[0, 0], &[0, 5]).count(), 0);
    }

    #[test]
    fn fastest_first_flips_presentation() {
        let visits: Vec<(usize, usize)> = CubeIter::new(2, &[0, 0], &[2, 2])
            .with_order(IterOrder::FastestFirst)
            .map(|ix| (ix[0], ix[1]))
            .collect();
        assert_eq!(visits, vec![(0, 0), (1, 0), (0, 1), (1, 1)]);
    }

    #[test]
    fn empty_dataset_yields_nothing() {
        let mut ds = Dataset::new("e", "g", 1).unwrap();
        let t = DynArray::new("t", ValType::Float64, None, &[0], units::T2000)
            .unwrap()
            .into_ref();
        ds.add_array(Rc::clone(&t)).unwrap();
        let d = ds.make_dim(DimType::Coord, "t").unwrap();
        d.add_var(Role::Center, Variable::array(t, &[IdxMap::Mapped(0)]).unwrap())
            .unwrap();
        assert_eq!(DatasetIter::new(&ds).count(), 0);
    }
}
