//! Wire framing: recognizing the tags that precede every stream record.
//!
//! Legacy (das2) streams tag records with fixed-width ASCII:
//! `[00]NNNNNN` carries the stream header, `[NN]NNNNNN` a packet definition
//! for id NN, and `:NN:` a data payload whose length the packet definition
//! implies. Modern (das3) streams use variable pipe-delimited tags with
//! explicit lengths: `|Sx||len|`, `|Hx|id|len|`, `|Pd|id|len|`, plus `|Cx|`
//! and `|Ex|` for out-of-band comments and exceptions.

use std::io::{BufRead, ErrorKind, Read};

use das_stream_core::errors::*;

/// One framed record pulled off the wire.
#[derive(Debug, PartialEq)]
pub enum Chunk {
    /// The `<stream>` header, id 0.
    StreamHeader(Vec<u8>),
    /// A header defining packet id `id`: `<packet>` or `<dataset>` XML, but
    /// also out-of-band `<comment>` and `<exception>` records on legacy
    /// streams.
    Header { id: u16, xml: Vec<u8> },
    /// A data payload for packet id `id`.
    Data { id: u16, payload: Vec<u8> },
    /// A das3 out-of-band record (`|Cx|` or `|Ex|`).
    OutOfBand { xml: Vec<u8> },
}

/// Callback giving the fixed payload size for a legacy packet id, or `None`
/// when the id is undefined.
pub type PayloadSizer<'a> = &'a dyn Fn(u16) -> Option<usize>;

/// Pulls tagged chunks off a byte source, auto-detecting the tag dialect.
pub struct TagReader<R: BufRead> {
    src: R,
    /// Remember the dialect once the first tag settles it.
    das3: Option<bool>,
}

impl<R: BufRead> TagReader<R> {
    pub fn new(src: R) -> TagReader<R> {
        TagReader { src, das3: None }
    }

    /// True once a das3 pipe tag has been seen.
    pub fn is_das3(&self) -> bool {
        self.das3.unwrap_or(false)
    }

    fn fill_exact(&mut self, n: usize) -> Result<Vec<u8>, DasError> {
        let mut buf = vec![0u8; n];
        self.src.read_exact(&mut buf).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                DasError::Serial {
                    msg: format!("Stream ended inside a {} byte record", n),
                }
            } else {
                DasError::StdIoError(e)
            }
        })?;
        Ok(buf)
    }

    /// The next chunk, or `None` at a clean end of stream.
    ///
    /// `sizer` supplies the record length for legacy `:NN:` payload tags,
    /// which carry no length of their own.
    pub fn next_chunk(&mut self, sizer: PayloadSizer) -> Result<Option<Chunk>, DasError> {
        let first = {
            let avail = self.src.fill_buf()?;
            if avail.is_empty() {
                return Ok(None);
            }
            avail[0]
        };

        match first {
            b'[' => {
                self.das3.get_or_insert(false);
                self.legacy_header()
            }
            b':' => {
                self.das3.get_or_insert(false);
                self.legacy_payload(sizer)
            }
            b'|' => {
                self.das3 = Some(true);
                self.pipe_tag()
            }
            other => Err(DasError::Serial {
                msg: format!("Unrecognized tag byte 0x{:02x}", other),
            }),
        }
    }

    /// `[NN]NNNNNN<xml…>`
    fn legacy_header(&mut self) -> Result<Option<Chunk>, DasError> {
        let tag = self.fill_exact(4)?;
        if tag[3] != b']' {
            return Err(DasError::Serial {
                msg: "Malformed [NN] header tag".to_string(),
            });
        }
        let id = ascii_u16(&tag[1..3])?;
        let len_txt = self.fill_exact(6)?;
        let len = ascii_usize(&len_txt)?;
        let xml = self.fill_exact(len)?;
        if id == 0 {
            Ok(Some(Chunk::StreamHeader(xml)))
        } else {
            Ok(Some(Chunk::Header { id, xml }))
        }
    }

    /// `:NN:<payload>`, whose length comes from the packet definition.
    fn legacy_payload(&mut self, sizer: PayloadSizer) -> Result<Option<Chunk>, DasError> {
        let tag = self.fill_exact(4)?;
        if tag[3] != b':' {
            return Err(DasError::Serial {
                msg: "Malformed :NN: payload tag".to_string(),
            });
        }
        // The das1 sub-tags :bx: :by: :b0: ride inside b-format streams
        if tag[1] == b'b' {
            return Err(DasError::NotImp {
                what: "das1 b-format payload blocks".to_string(),
            });
        }
        let id = ascii_u16(&tag[1..3])?;
        let len = sizer(id).ok_or(DasError::Serial {
            msg: format!("Data packet :{:02}: arrived before its definition", id),
        })?;
        let payload = self.fill_exact(len)?;
        Ok(Some(Chunk::Data { id, payload }))
    }

    /// `|Tv|id|len|<body>`, where the id field may be empty.
    fn pipe_tag(&mut self) -> Result<Option<Chunk>, DasError> {
        let mut fields: Vec<Vec<u8>> = Vec::with_capacity(3);
        // Opening pipe
        self.fill_exact(1)?;
        for _ in 0..3 {
            let mut field = Vec::new();
            loop {
                let b = self.fill_exact(1)?[0];
                if b == b'|' {
                    break;
                }
                if field.len() > 20 {
                    return Err(DasError::Serial {
                        msg: "Oversized field in pipe tag".to_string(),
                    });
                }
                field.push(b);
            }
            fields.push(field);
        }
        let kind = fields[0].clone();
        let id = if fields[1].is_empty() {
            0
        } else {
            ascii_u16(&fields[1])?
        };
        let len = ascii_usize(&fields[2])?;
        let body = self.fill_exact(len)?;

        match kind.as_slice() {
            b"Sx" => Ok(Some(Chunk::StreamHeader(body))),
            b"Hx" => Ok(Some(Chunk::Header { id, xml: body })),
            b"Pd" => Ok(Some(Chunk::Data { id, payload: body })),
            b"Cx" | b"Ex" => Ok(Some(Chunk::OutOfBand { xml: body })),
            other => Err(DasError::Serial {
                msg: format!(
                    "Unknown pipe tag '{}'",
                    String::from_utf8_lossy(other)
                ),
            }),
        }
    }
}

fn ascii_u16(b: &[u8]) -> Result<u16, DasError> {
    std::str::from_utf8(b)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| DasError::Serial {
            msg: format!("'{}' is not a packet id", String::from_utf8_lossy(b)),
        })
}

fn ascii_usize(b: &[u8]) -> Result<usize, DasError> {
    std::str::from_utf8(b)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| DasError::Serial {
            msg: format!("'{}' is not a record length", String::from_utf8_lossy(b)),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn no_size(_: u16) -> Option<usize> {
        None
    }

    #[test]
    fn legacy_stream_then_packet_then_data() {
        let mut wire = Vec::new();
        let hdr = b"<stream version=\"2.2\"/>";
        wire.extend_from_slice(format!("[00]{:06}", hdr.len()).as_bytes());
        wire.extend_from_slice(hdr);
        let pkt = b"<packet><x type=\"little_endian_real8\" units=\"t2000\"></x></packet>";
        wire.extend_from_slice(format!("[01]{:06}", pkt.len()).as_bytes());
        wire.extend_from_slice(pkt);
        wire.extend_from_slice(b":01:");
        wire.extend_from_slice(&42.0f64.to_le_bytes());

        let mut rd = TagReader::new(Cursor::new(wire));
        let sizer = |id: u16| if id == 1 { Some(8) } else { None };

        match rd.next_chunk(&sizer).unwrap().unwrap() {
            Chunk::StreamHeader(xml) => assert_eq!(xml, hdr.to_vec()),
            other => panic!("unexpected {:?}", other),
        }
        match rd.next_chunk(&sizer).unwrap().unwrap() {
            Chunk::Header { id, xml } => {
                assert_eq!(id, 1);
                assert_eq!(xml, pkt.to_vec());
            }
            other => panic!("unexpected {:?}", other),
        }
        match rd.next_chunk(&sizer).unwrap().unwrap() {
            Chunk::Data { id, payload } => {
                assert_eq!(id, 1);
                assert_eq!(payload, 42.0f64.to_le_bytes().to_vec());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(rd.next_chunk(&sizer).unwrap().is_none());
        assert!(!rd.is_das3());
    }

    #[test]
    fn data_before_definition_is_an_error() {
        let mut wire = Vec::new();
        wire.extend_from_slice(b":07:");
        let mut rd = TagReader::new(Cursor::new(wire));
        assert!(rd.next_chunk(&no_size).is_err());
    }

    #[test]
    fn pipe_tags() {
        let mut wire = Vec::new();
        let hdr = b"<stream type=\"das-basic-stream\" version=\"3.0\"/>";
        wire.extend_from_slice(format!("|Sx||{}|", hdr.len()).as_bytes());
        wire.extend_from_slice(hdr);
        let ds = b"<dataset name=\"x\" rank=\"1\" index=\"*\"/>";
        wire.extend_from_slice(format!("|Hx|12|{}|", ds.len()).as_bytes());
        wire.extend_from_slice(ds);
        wire.extend_from_slice(b"|Pd|12|4|");
        wire.extend_from_slice(&7.5f32.to_be_bytes());
        wire.extend_from_slice(b"|Ex||21|<exception type=\"x\"/>");

        let mut rd = TagReader::new(Cursor::new(wire));
        assert!(matches!(
            rd.next_chunk(&no_size).unwrap().unwrap(),
            Chunk::StreamHeader(_)
        ));
        assert!(rd.is_das3());
        match rd.next_chunk(&no_size).unwrap().unwrap() {
            Chunk::Header { id, .. } => assert_eq!(id, 12),
            other => panic!("unexpected {:?}", other),
        }
        match rd.next_chunk(&no_size).unwrap().unwrap() {
            Chunk::Data { id, payload } => {
                assert_eq!(id, 12);
                assert_eq!(payload.len(), 4);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            rd.next_chunk(&no_size).unwrap().unwrap(),
            Chunk::OutOfBand { .. }
        ));
    }

    #[test]
    fn das1_sub_tags_are_flagged() {
        let mut rd = TagReader::new(Cursor::new(b":bx:12345678".to_vec()));
        match rd.next_chunk(&no_size).unwrap_err() {
            DasError::NotImp { .. } => {}
            other => panic!("unexpected {}", other),
        }
    }

    #[test]
    fn truncated_header_reports_serial_error() {
        let mut rd = TagReader::new(Cursor::new(b"[00]000500<str".to_vec()));
        assert!(matches!(
            rd.next_chunk(&no_size),
            Err(DasError::Serial { .. })
        ));
    }
}
