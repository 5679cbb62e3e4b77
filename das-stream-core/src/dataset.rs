//! Datasets: correlated collections of dimensions, arrays and codecs.

use std::rc::Rc;

use crate::array::AryRef;
use crate::codec::Codec;
use crate::descriptor::{PropRef, Properties};
use crate::dimension::Dimension;
use crate::enums::{DimType, Encoding, Semantic};
use crate::errors::*;
use crate::units::Units;
use crate::{AxisLen, Shape, SHAPE_EMPTY};

/// One registered packet column: a codec plus how many items it reads or
/// writes per record (`None` for variable-count columns).
#[derive(Debug)]
pub struct CodecEntry {
    pub codec: Codec,
    pub items: Option<usize>,
}

/// A rank-N dataset.
///
/// The dataset's shape is the index-wise union of its variables' shapes;
/// see [`AxisLen::merge`] for the precedence. Datasets sharing a group id
/// are intended to be plotted together.
pub struct Dataset {
    id: String,
    group: String,
    rank: usize,
    props: PropRef,
    dims: Vec<Dimension>,
    arrays: Vec<AryRef>,
    codecs: Vec<CodecEntry>,
    frozen: bool,
}

impl Dataset {
    pub fn new(id: &str, group: &str, rank: usize) -> Result<Dataset, DasError> {
        if rank == 0 || rank > crate::IDX_MAX {
            return Err(DasError::Dataset {
                msg: format!("Dataset {} rank {} is out of range", id, rank),
            });
        }
        Ok(Dataset {
            id: id.to_string(),
            group: group.to_string(),
            rank,
            props: Properties::new(),
            dims: Vec::new(),
            arrays: Vec::new(),
            codecs: Vec::new(),
            frozen: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn props(&self) -> &PropRef {
        &self.props
    }

    /// Stop structural changes; the shape union can only grow from here.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    fn check_mutable(&self) -> Result<(), DasError> {
        if self.frozen {
            return Err(DasError::Dataset {
                msg: format!("Dataset {} is frozen", self.id),
            });
        }
        Ok(())
    }

    /// Create a dimension owned by this dataset. Its properties inherit
    /// from the dataset's.
    pub fn make_dim(&mut self, dtype: DimType, id: &str) -> Result<&mut Dimension, DasError> {
        self.check_mutable()?;
        if self.dims.iter().any(|d| d.id() == id) {
            return Err(DasError::Dataset {
                msg: format!("Dataset {} already has a dimension '{}'", self.id, id),
            });
        }
        let dim = Dimension::new(dtype, id);
        dim.props().borrow_mut().set_parent(&self.props);
        self.dims.push(dim);
        Ok(self.dims.last_mut().expect("just pushed"))
    }

    pub fn get_dim(&self, id: &str) -> Option<&Dimension> {
        self.dims.iter().find(|d| d.id() == id)
    }

    pub fn get_dim_mut(&mut self, id: &str) -> Option<&mut Dimension> {
        self.dims.iter_mut().find(|d| d.id() == id)
    }

    pub fn dims(&self) -> impl Iterator<Item = &Dimension> {
        self.dims.iter()
    }

    pub fn dims_of(&self, dtype: DimType) -> impl Iterator<Item = &Dimension> {
        self.dims.iter().filter(move |d| d.dim_type() == dtype)
    }

    /// Register a backing array. Ids must be unique within the dataset.
    pub fn add_array(&mut self, ary: AryRef) -> Result<(), DasError> {
        self.check_mutable()?;
        let id = ary.borrow().id().to_string();
        if self.arrays.iter().any(|a| a.borrow().id() == id) {
            return Err(DasError::Dataset {
                msg: format!("Dataset {} already has an array '{}'", self.id, id),
            });
        }
        self.arrays.push(ary);
        Ok(())
    }

    pub fn get_array(&self, id: &str) -> Option<AryRef> {
        self.arrays
            .iter()
            .find(|a| a.borrow().id() == id)
            .map(Rc::clone)
    }

    pub fn arrays(&self) -> impl Iterator<Item = &AryRef> {
        self.arrays.iter()
    }

    /// Bind a read codec to one of this dataset's arrays: `items` values of
    /// the given packet encoding per record.
    pub fn add_fixed_codec(
        &mut self,
        array_id: &str,
        semantic: Semantic,
        enc: Encoding,
        item_bytes: i16,
        items: Option<usize>,
        epoch: Option<Units>,
    ) -> Result<(), DasError> {
        let ary = self.get_array(array_id).ok_or_else(|| DasError::Dataset {
            msg: format!("Dataset {} has no array '{}'", self.id, array_id),
        })?;
        let codec = Codec::new_reader(ary, semantic, enc, item_bytes, 0, epoch)?;
        self.codecs.push(CodecEntry { codec, items });
        Ok(())
    }

    /// Register an already-built codec. The codec's array must belong to
    /// this dataset.
    pub fn push_codec(&mut self, codec: Codec, items: Option<usize>) -> Result<(), DasError> {
        let id = codec.array().borrow().id().to_string();
        if self.get_array(&id).is_none() {
            return Err(DasError::Dataset {
                msg: format!("Codec array '{}' is not owned by dataset {}", id, self.id),
            });
        }
        self.codecs.push(CodecEntry { codec, items });
        Ok(())
    }

    /// Clone another codec (e.g. from a reference dataset) and re-point it
    /// at this dataset's array of the same id.
    pub fn add_codec_from(&mut self, other: &Codec, items: Option<usize>) -> Result<(), DasError> {
        let id = other.array().borrow().id().to_string();
        let ary = self.get_array(&id).ok_or_else(|| DasError::Dataset {
            msg: format!("Dataset {} has no array '{}'", self.id, id),
        })?;
        let codec = other.clone_for(ary)?;
        self.codecs.push(CodecEntry { codec, items });
        Ok(())
    }

    pub fn codecs(&self) -> &[CodecEntry] {
        &self.codecs
    }

    pub fn codecs_mut(&mut self) -> &mut [CodecEntry] {
        &mut self.codecs
    }

    /// Fixed record size in packet bytes, or `None` when any column is
    /// variable length (which switches the reader to streaming parsing).
    pub fn rec_bytes(&self) -> Option<usize> {
        let mut total = 0usize;
        for e in &self.codecs {
            let items = e.items?;
            if e.codec.is_var_size() {
                return None;
            }
            total += items * e.codec.item_bytes() as usize;
        }
        Some(total)
    }

    /// Union shape over every dimension.
    pub fn shape(&self) -> (Shape, usize) {
        let mut out = SHAPE_EMPTY;
        for d in &self.dims {
            let s = d.shape(self.rank);
            crate::shape_merge(&mut out, &s, self.rank);
        }
        (out, self.rank)
    }

    /// Merged extent below a concrete prefix.
    pub fn length_in(&self, prefix: &[usize]) -> AxisLen {
        let mut out = AxisLen::Unused;
        for d in &self.dims {
            out = out.merge(d.length_in(prefix));
        }
        out
    }

    /// Decode one packet payload by running each codec in declaration
    /// order. A variable-count column is only legal in the last position;
    /// binary sentinel search is not implemented.
    pub fn decode_data(&mut self, payload: &[u8]) -> Result<(), DasError> {
        let n_codecs = self.codecs.len();
        let mut pos = 0usize;
        for (i, entry) in self.codecs.iter_mut().enumerate() {
            if entry.items.is_none() && i + 1 != n_codecs {
                return Err(DasError::NotImp {
                    what: "Variable length columns before the last".to_string(),
                });
            }
            let remaining = &payload[pos..];
            let (unread, _read) = entry.codec.decode(remaining, entry.items)?;
            pos += remaining.len() - unread;
        }
        if pos < payload.len() {
            log::warn!(
                "{} trailing bytes not read from a packet for dataset {}",
                payload.len() - pos,
                self.id
            );
        }
        Ok(())
    }

    /// For exporters needing orthogonal coordinates: one rank-1 coordinate
    /// dimension per axis, each varying on exactly that axis. Returns the
    /// dimensions in axis order, or `None` when the dataset isn't cubic.
    pub fn cubic_coords(&self) -> Option<Vec<&Dimension>> {
        let mut picks: Vec<Option<&Dimension>> = vec![None; self.rank];
        for d in self.dims_of(DimType::Coord) {
            let shape = d.shape(self.rank);
            let used: Vec<usize> = (0..self.rank).filter(|i| shape[*i].is_used()).collect();
            if used.len() != 1 {
                continue;
            }
            let axis = used[0];
            if picks[axis].is_none() {
                picks[axis] = Some(d);
            }
        }
        picks.into_iter().collect()
    }

    /// Reset every growable array without releasing its storage: the
    /// bounded-memory idiom for filters that stream many packets through
    /// one dataset.
    pub fn clear_ragged_0(&mut self) -> usize {
        let mut freed = 0usize;
        for a in &self.arrays {
            let mut b = a.borrow_mut();
            if b.is_growable() {
                freed += b.clear();
            }
        }
        freed
    }

    pub fn mem_used(&self) -> usize {
        self.arrays.iter().map(|a| a.borrow().mem_used()).sum()
    }

    pub fn mem_owned(&self) -> usize {
        self.arrays.iter().map(|a| a.borrow().mem_owned()).sum()
    }

    pub fn mem_indexed(&self) -> usize {
        self.arrays.iter().map(|a| a.borrow().mem_indexed()).sum()
    }
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("id", &self.id)
            .field("group", &self.group)
            .field("rank", &self.rank)
            .field("dims", &self.dims.len())
            .field("arrays", &self.arrays.len())
            .field("codecs", &self.codecs.len())
            .finish()
    }
}
