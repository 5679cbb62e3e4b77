//! Reader for das2 and das3 scientific data streams.
//!
//! A das stream is a self-describing header followed by tagged data
//! packets. This crate recognizes the wire framing of both stream
//! generations, parses the XML headers into the `das_stream_core` data
//! model, rewrites legacy `<packet>` definitions into datasets, and runs
//! packet payloads through the dataset codecs as they arrive.
//!
//! Reading is strictly in wire order and single threaded: packets are
//! decoded and delivered to the consumer callback in the order they appear,
//! and a header redefinition takes effect before the next payload of that
//! id. A callback error stops the read loop promptly.
extern crate das_stream_core;
extern crate memmap2;
extern crate num;
extern crate quick_xml;

pub mod framing;
pub mod header3;
pub mod legacy;
pub mod stream_hdr;
pub mod upgrade;
mod xmlutil;
#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::fs::File;
use std::io::BufRead;
use std::path::Path;

use das_stream_core::errors::*;
use das_stream_core::stream::Stream;

use crate::framing::{Chunk, TagReader};

/// What the read loop hands to the consumer callback.
///
/// Dataset contents live in the [`Stream`] passed alongside; events only
/// say what just happened.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// The stream header has been parsed; properties and frames are in.
    StreamHeader,
    /// A dataset was defined (or redefined, on legacy streams) under the
    /// given packet id.
    DatasetDefined { id: u16 },
    /// One payload for the given id was decoded into its dataset's arrays.
    Data { id: u16 },
    /// An out-of-band exception record.
    Exception { kind: String, message: String },
    /// An out-of-band progress or log comment.
    Comment { kind: String, value: String },
}

/// Pull parser over any buffered byte source.
///
/// ```
/// use das_stream_in::StreamReader;
///
/// let mut wire: Vec<u8> = Vec::new();
/// let hdr = br#"<stream version="2.2"/>"#;
/// wire.extend_from_slice(format!("[00]{:06}", hdr.len()).as_bytes());
/// wire.extend_from_slice(hdr);
/// let pkt = br#"<packet>
///   <x type="little_endian_real8" units="t2000"/>
///   <y name="density" type="little_endian_real4" units="cm**-3"/>
/// </packet>"#;
/// wire.extend_from_slice(format!("[01]{:06}", pkt.len()).as_bytes());
/// wire.extend_from_slice(pkt);
/// wire.extend_from_slice(b":01:");
/// wire.extend_from_slice(&3600.0f64.to_le_bytes());
/// wire.extend_from_slice(&5.5f32.to_le_bytes());
///
/// let stream = StreamReader::new(&wire[..]).read_all().unwrap();
/// let ds = stream.get(1).unwrap();
/// let n = ds.get_dim("density").unwrap().point_var().unwrap();
/// let loc = [0usize; das_stream_core::IDX_MAX];
/// assert_eq!(n.get(&loc).unwrap().to_f64().unwrap(), 5.5);
/// ```
pub struct StreamReader<R: BufRead> {
    tags: TagReader<R>,
    stream: Option<Stream>,
}

impl<R: BufRead> StreamReader<R> {
    pub fn new(src: R) -> StreamReader<R> {
        StreamReader {
            tags: TagReader::new(src),
            stream: None,
        }
    }

    /// Run the read loop to the end of input, delivering an event per
    /// record. The callback may stop the loop early by returning an error,
    /// which is passed back to the caller.
    pub fn process<F>(&mut self, mut on_event: F) -> Result<(), DasError>
    where
        F: FnMut(StreamEvent, &Stream) -> Result<(), DasError>,
    {
        loop {
            // Legacy payload tags carry no length; snapshot the record
            // sizes the current definitions imply
            let sizes: HashMap<u16, usize> = match &self.stream {
                Some(s) => s
                    .iter()
                    .filter_map(|(id, ds)| ds.rec_bytes().map(|n| (id, n)))
                    .collect(),
                None => HashMap::new(),
            };
            let sizer = |id: u16| sizes.get(&id).copied();

            let chunk = match self.tags.next_chunk(&sizer)? {
                Some(c) => c,
                None => return Ok(()),
            };

            match chunk {
                Chunk::StreamHeader(xml) => {
                    if self.stream.is_some() {
                        return Err(DasError::Serial {
                            msg: "A second stream header arrived".to_string(),
                        });
                    }
                    let s = stream_hdr::parse_stream_header(&xml)?;
                    self.stream = Some(s);
                    on_event(StreamEvent::StreamHeader, self.stream.as_ref().unwrap())?;
                }
                Chunk::Header { id, xml } => {
                    let stream = self.stream.as_mut().ok_or_else(|| DasError::Serial {
                        msg: "Records arrived before the stream header".to_string(),
                    })?;
                    match root_element(&xml)? {
                        RootKind::Packet => {
                            let pd = legacy::parse_packet(id, &xml)?;
                            let ds = upgrade::dataset_from_packet(stream, &pd, None, true)?;
                            stream.add_dataset(id, ds)?;
                            on_event(StreamEvent::DatasetDefined { id }, stream)?;
                        }
                        RootKind::Dataset => {
                            let ds = header3::parse_dataset_header(stream, id, &xml)?;
                            stream.add_dataset(id, ds)?;
                            on_event(StreamEvent::DatasetDefined { id }, stream)?;
                        }
                        RootKind::Exception { kind, message } => {
                            on_event(StreamEvent::Exception { kind, message }, stream)?;
                        }
                        RootKind::Comment { kind, value } => {
                            on_event(StreamEvent::Comment { kind, value }, stream)?;
                        }
                        RootKind::Stream => {
                            return Err(DasError::Serial {
                                msg: "Nested stream header".to_string(),
                            })
                        }
                    }
                }
                Chunk::Data { id, payload } => {
                    let stream = self.stream.as_mut().ok_or_else(|| DasError::Serial {
                        msg: "Data arrived before the stream header".to_string(),
                    })?;
                    let ds = stream.get_mut(id).ok_or(DasError::Serial {
                        msg: format!("Data packet for undefined id {}", id),
                    })?;
                    ds.decode_data(&payload)?;
                    on_event(StreamEvent::Data { id }, stream)?;
                }
                Chunk::OutOfBand { xml } => {
                    let stream = self.stream.as_ref().ok_or_else(|| DasError::Serial {
                        msg: "Records arrived before the stream header".to_string(),
                    })?;
                    match root_element(&xml)? {
                        RootKind::Exception { kind, message } => {
                            on_event(StreamEvent::Exception { kind, message }, stream)?;
                        }
                        RootKind::Comment { kind, value } => {
                            on_event(StreamEvent::Comment { kind, value }, stream)?;
                        }
                        _ => {
                            return Err(DasError::Serial {
                                msg: "Out-of-band record was not an exception or comment"
                                    .to_string(),
                            })
                        }
                    }
                }
            }
        }
    }

    /// Consume the whole input and return the populated stream.
    pub fn read_all(mut self) -> Result<Stream, DasError> {
        self.process(|_, _| Ok(()))?;
        self.stream.ok_or_else(|| DasError::Serial {
            msg: "Input held no stream header".to_string(),
        })
    }

    /// The stream as parsed so far.
    pub fn stream(&self) -> Option<&Stream> {
        self.stream.as_ref()
    }
}

/// Read a whole stream from a file through a memory mapping.
pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Stream, DasError> {
    let file = File::open(path)?;
    // Safety: the mapping is read only and lives for the parse only
    let map = unsafe { memmap2::Mmap::map(&file)? };
    StreamReader::new(&map[..]).read_all()
}

enum RootKind {
    Stream,
    Packet,
    Dataset,
    Exception { kind: String, message: String },
    Comment { kind: String, value: String },
}

/// Identify a header's root element and lift out the attributes of the
/// out-of-band record kinds.
fn root_element(xml: &[u8]) -> Result<RootKind, DasError> {
    use quick_xml::events::Event;
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();
    loop {
        let ev = reader.read_event(&mut buf).map_err(xmlutil::xml_err)?;
        match ev {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let attrs = xmlutil::attrs_of(e, &reader)?;
                let get = |name: &str| {
                    attrs
                        .iter()
                        .find(|(k, _)| k == name)
                        .map(|(_, v)| v.clone())
                        .unwrap_or_default()
                };
                return match e.local_name() {
                    b"stream" => Ok(RootKind::Stream),
                    b"packet" => Ok(RootKind::Packet),
                    b"dataset" => Ok(RootKind::Dataset),
                    b"exception" => Ok(RootKind::Exception {
                        kind: get("type"),
                        message: get("message"),
                    }),
                    b"comment" => Ok(RootKind::Comment {
                        kind: get("type"),
                        value: get("value"),
                    }),
                    other => Err(DasError::Serial {
                        msg: format!(
                            "Unexpected header element <{}>",
                            String::from_utf8_lossy(other)
                        ),
                    }),
                };
            }
            Event::Eof => {
                return Err(DasError::Serial {
                    msg: "Empty header record".to_string(),
                })
            }
            _ => {}
        }
        buf.clear();
    }
}
