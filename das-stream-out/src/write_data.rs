//! Emitting packet payloads from dataset arrays.

use tinyvec::TinyVec;

use das_stream_core::codec::ENC_PKT_LAST;
use das_stream_core::dataset::Dataset;
use das_stream_core::errors::*;

/// Encode one record of a dataset as packet payload bytes, walking the
/// codec list in declaration order, the mirror image of payload decode.
pub fn encode_record(ds: &Dataset, rec: usize) -> Result<Vec<u8>, DasError> {
    let n = ds.codecs().len();
    if n == 0 {
        return Err(DasError::Dataset {
            msg: format!("Dataset {} has no codecs to emit with", ds.id()),
        });
    }
    let mut out = Vec::new();
    for (i, entry) in ds.codecs().iter().enumerate() {
        let mut wc = entry.codec.to_writer()?;
        let flags = if i + 1 == n { ENC_PKT_LAST } else { 0 };
        wc.encode(&mut out, &[rec], entry.items, flags)?;
    }
    Ok(out)
}

/// How many whole records a dataset currently holds, by the merge of its
/// dimensions.
pub fn record_count(ds: &Dataset) -> usize {
    match ds.length_in(&[]) {
        das_stream_core::AxisLen::Size(n) => n,
        _ => 0,
    }
}

/// Render a wire tag like `|Pd|12|196|` without touching the heap for the
/// common short case.
pub(crate) fn pipe_tag(kind: &str, id: Option<u16>, len: usize) -> TinyVec<[u8; 24]> {
    let mut tag: TinyVec<[u8; 24]> = tiny_vec!();
    tag.push(b'|');
    tag.extend_from_slice(kind.as_bytes());
    tag.push(b'|');
    if let Some(id) = id {
        tag.extend_from_slice(id.to_string().as_bytes());
    }
    tag.push(b'|');
    tag.extend_from_slice(len.to_string().as_bytes());
    tag.push(b'|');
    tag
}
