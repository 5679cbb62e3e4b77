//! Writer for das3 scientific data streams.
//!
//! The mirror image of `das-stream-in`: a [`StreamWriter`] emits the
//! `<stream>` envelope, dataset headers, and tagged data packets onto any
//! byte sink. Output is always das3 framing; legacy streams read with the
//! input crate come out upgraded, which is the usual filter idiom.
extern crate das_stream_core;
extern crate fnv;
extern crate num;
extern crate quick_xml;
#[macro_use]
extern crate tinyvec;
#[cfg(test)]
extern crate das_stream_in;
#[cfg(test)]
extern crate tempfile;

#[cfg(test)]
mod integration_tests;
pub mod write_data;
pub mod write_headers;

use std::io::Write;

use das_stream_core::errors::*;
use das_stream_core::stream::Stream;

use crate::write_data::pipe_tag;

/// Running totals per packet id, for end-of-run reporting.
#[derive(Debug, Default, Clone, Copy)]
pub struct PacketStats {
    /// Header records written under this id.
    pub headers: usize,
    /// Data packets written under this id.
    pub packets: usize,
    /// Payload bytes, tags excluded.
    pub bytes: usize,
}

/// Writes a das3 stream onto any `io::Write` sink.
///
/// ```
/// use das_stream_core::enums::StreamModel;
/// use das_stream_core::stream::Stream;
/// use das_stream_out::StreamWriter;
///
/// let mut stream = Stream::new(StreamModel::V3);
/// stream.props().borrow_mut().set_str("title", "example");
///
/// let mut out = Vec::new();
/// {
///     let mut wr = StreamWriter::new(&mut out);
///     wr.write_stream_header(&stream).unwrap();
/// }
/// assert!(out.starts_with(b"|Sx||"));
/// ```
pub struct StreamWriter<W: Write> {
    sink: W,
    header_sent: bool,
    stats: fnv::FnvHashMap<u16, PacketStats>,
}

impl<W: Write> StreamWriter<W> {
    pub fn new(sink: W) -> StreamWriter<W> {
        StreamWriter {
            sink,
            header_sent: false,
            stats: fnv::FnvHashMap::default(),
        }
    }

    fn put(&mut self, kind: &str, id: Option<u16>, body: &[u8]) -> Result<(), DasError> {
        let tag = pipe_tag(kind, id, body.len());
        self.sink.write_all(&tag)?;
        self.sink.write_all(body)?;
        Ok(())
    }

    /// Emit the stream envelope. Must come before anything else.
    pub fn write_stream_header(&mut self, stream: &Stream) -> Result<(), DasError> {
        if self.header_sent {
            return Err(DasError::Serial {
                msg: "Stream header already written".to_string(),
            });
        }
        let xml = write_headers::stream_header_xml(stream)?;
        self.put("Sx", None, &xml)?;
        self.header_sent = true;
        Ok(())
    }

    /// Emit one dataset's header and flag it sent.
    pub fn write_dataset_header(
        &mut self,
        stream: &mut Stream,
        id: u16,
    ) -> Result<(), DasError> {
        self.need_header()?;
        let ds = stream.get(id).ok_or(DasError::Serial {
            msg: format!("No dataset bound to packet id {}", id),
        })?;
        let xml = write_headers::dataset_header_xml(ds)?;
        self.put("Hx", Some(id), &xml)?;
        stream.mark_sent(id);
        self.stats.entry(id).or_default().headers += 1;
        Ok(())
    }

    /// Emit one data record for a dataset, sending its header first if it
    /// hasn't gone out yet.
    pub fn write_record(
        &mut self,
        stream: &mut Stream,
        id: u16,
        rec: usize,
    ) -> Result<(), DasError> {
        self.need_header()?;
        if !stream.is_sent(id) {
            self.write_dataset_header(stream, id)?;
        }
        let ds = stream.get(id).ok_or(DasError::Serial {
            msg: format!("No dataset bound to packet id {}", id),
        })?;
        let payload = write_data::encode_record(ds, rec)?;
        self.put("Pd", Some(id), &payload)?;
        let st = self.stats.entry(id).or_default();
        st.packets += 1;
        st.bytes += payload.len();
        Ok(())
    }

    /// Emit everything a stream holds: envelope if needed, then each
    /// dataset's header and all of its records in packet-id order.
    pub fn write_all(&mut self, stream: &mut Stream) -> Result<(), DasError> {
        if !self.header_sent {
            self.write_stream_header(stream)?;
        }
        let ids: Vec<u16> = stream.iter().map(|(id, _)| id).collect();
        for id in ids {
            self.write_dataset_header(stream, id)?;
            let n = stream
                .get(id)
                .map(|ds| write_data::record_count(ds))
                .unwrap_or(0);
            for rec in 0..n {
                self.write_record(stream, id, rec)?;
            }
        }
        Ok(())
    }

    /// Emit an out-of-band exception record.
    pub fn write_exception(&mut self, kind: &str, message: &str) -> Result<(), DasError> {
        self.need_header()?;
        let xml = oob_xml("exception", &[("type", kind), ("message", message)])?;
        self.put("Ex", None, &xml)
    }

    /// Emit an out-of-band progress comment.
    pub fn write_comment(&mut self, kind: &str, value: &str) -> Result<(), DasError> {
        self.need_header()?;
        let xml = oob_xml("comment", &[("type", kind), ("value", value)])?;
        self.put("Cx", None, &xml)
    }

    fn need_header(&self) -> Result<(), DasError> {
        if self.header_sent {
            Ok(())
        } else {
            Err(DasError::Serial {
                msg: "The stream header must be written first".to_string(),
            })
        }
    }

    pub fn stats(&self, id: u16) -> PacketStats {
        self.stats.get(&id).copied().unwrap_or_default()
    }

    /// Flush and hand the sink back.
    pub fn into_inner(mut self) -> Result<W, DasError> {
        self.sink.flush()?;
        Ok(self.sink)
    }
}

fn oob_xml(el: &str, attrs: &[(&str, &str)]) -> Result<Vec<u8>, DasError> {
    use quick_xml::events::{BytesStart, Event};
    let mut w = quick_xml::Writer::new(Vec::new());
    let mut e = BytesStart::borrowed_name(el.as_bytes());
    for (k, v) in attrs {
        e.push_attribute((*k, *v));
    }
    w.write_event(Event::Empty(e)).map_err(|e| DasError::Serial {
        msg: format!("XML write error: {}", e),
    })?;
    Ok(w.into_inner())
}
