//! Parsing `<stream>` envelope headers, both generations, plus `<frame>`
//! definitions and the two property notations.

use quick_xml::events::Event;
use quick_xml::Reader;

use das_stream_core::enums::{CoordSys, StreamModel};
use das_stream_core::errors::*;
use das_stream_core::frame::Frame;
use das_stream_core::stream::Stream;

use crate::xmlutil::{attrs_of, das3_prop, legacy_props_into, xml_err};

/// Parse the id-0 header into a fresh [`Stream`].
///
/// Legacy streams put typed properties in attribute form on a single
/// `<properties>` element; modern streams use `<p>` children and may define
/// coordinate frames inline.
pub fn parse_stream_header(xml: &[u8]) -> Result<Stream, DasError> {
    let mut reader = Reader::from_reader(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();

    let mut stream: Option<Stream> = None;
    let mut frame: Option<Frame> = None;
    let mut prop_attrs: Option<Vec<(String, String)>> = None;
    let mut prop_text = String::new();

    loop {
        let ev = reader.read_event(&mut buf).map_err(xml_err)?;
        match ev {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let empty = matches!(&ev, Event::Empty(_));
                let name = e.local_name().to_vec();
                let attrs = attrs_of(e, &reader)?;
                match name.as_slice() {
                    b"stream" => {
                        let mut version = String::from("2.2");
                        for (k, v) in &attrs {
                            match k.as_str() {
                                "version" => version = v.clone(),
                                "type" => {}
                                other => {
                                    log::warn!("Unknown attribute {} in <stream>", other)
                                }
                            }
                        }
                        let model = if version.starts_with('3') {
                            StreamModel::V3
                        } else {
                            StreamModel::V2
                        };
                        let mut s = Stream::new(model);
                        s.set_version(&version);
                        stream = Some(s);
                    }
                    b"properties" => {
                        let s = stream.as_mut().ok_or_else(|| DasError::Serial {
                            msg: "<properties> outside of <stream>".to_string(),
                        })?;
                        if !attrs.is_empty() {
                            match &frame {
                                Some(f) => {
                                    legacy_props_into(&attrs, &mut f.props().borrow_mut())?
                                }
                                None => legacy_props_into(&attrs, &mut s.props().borrow_mut())?,
                            }
                        }
                    }
                    b"p" => {
                        prop_attrs = Some(attrs);
                        prop_text.clear();
                        if empty {
                            commit_prop(&stream, &frame, &mut prop_attrs, &prop_text)?;
                        }
                    }
                    b"frame" => {
                        let s = stream.as_mut().ok_or_else(|| DasError::Serial {
                            msg: "<frame> outside of <stream>".to_string(),
                        })?;
                        let f = frame_from_attrs(s, &attrs)?;
                        if empty {
                            s.add_frame(f)?;
                        } else {
                            frame = Some(f);
                        }
                    }
                    b"dir" => {
                        let f = frame.as_mut().ok_or_else(|| DasError::Serial {
                            msg: "<dir> outside of <frame>".to_string(),
                        })?;
                        let name = attrs
                            .iter()
                            .find(|(k, _)| k == "name")
                            .map(|(_, v)| v.clone())
                            .ok_or_else(|| DasError::Serial {
                                msg: "<dir> element with no name".to_string(),
                            })?;
                        f.add_dir(&name)?;
                    }
                    other => log::warn!(
                        "Unknown element <{}> in stream header",
                        String::from_utf8_lossy(other)
                    ),
                }
            }
            Event::Text(t) => {
                if prop_attrs.is_some() {
                    prop_text.push_str(&t.unescape_and_decode(&reader).map_err(xml_err)?);
                }
            }
            Event::End(ref e) => match e.local_name() {
                b"p" => commit_prop(&stream, &frame, &mut prop_attrs, &prop_text)?,
                b"frame" => {
                    if let (Some(s), Some(f)) = (stream.as_mut(), frame.take()) {
                        s.add_frame(f)?;
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    stream.ok_or_else(|| DasError::Serial {
        msg: "Header carried no <stream> element".to_string(),
    })
}

fn commit_prop(
    stream: &Option<Stream>,
    frame: &Option<Frame>,
    prop_attrs: &mut Option<Vec<(String, String)>>,
    text: &str,
) -> Result<(), DasError> {
    let attrs = match prop_attrs.take() {
        Some(a) => a,
        None => return Ok(()),
    };
    let prop = das3_prop(&attrs, text)?;
    match (frame, stream) {
        (Some(f), _) => f.props().borrow_mut().set(prop),
        (None, Some(s)) => s.props().borrow_mut().set(prop),
        _ => {
            return Err(DasError::Serial {
                msg: "Property outside of any element".to_string(),
            })
        }
    }
    Ok(())
}

fn frame_from_attrs(stream: &Stream, attrs: &[(String, String)]) -> Result<Frame, DasError> {
    let mut name = None;
    let mut id = None;
    let mut sys = CoordSys::Cartesian;
    let mut body = None;
    let mut inertial = false;
    for (k, v) in attrs {
        match k.as_str() {
            "name" => name = Some(v.clone()),
            "id" => {
                id = Some(v.parse::<u8>().map_err(|_| DasError::Vec {
                    msg: format!("'{}' is not a frame id", v),
                })?)
            }
            "system" | "vecClass" | "type" => sys = CoordSys::from_str(v)?,
            "body" => body = Some(v.clone()),
            "inertial" => inertial = v == "true" || v == "1",
            other => log::warn!("Unknown attribute {} in <frame>", other),
        }
    }
    let name = name.ok_or_else(|| DasError::Vec {
        msg: "Frames require a name".to_string(),
    })?;
    let id = match id {
        Some(i) => i,
        None => stream.next_frame_id()?,
    };
    let mut f = Frame::new(id, &name, sys)?;
    if let Some(b) = body {
        f.set_body(&b);
    }
    f.set_inertial(inertial);
    Ok(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_stream_header() {
        let xml = br#"<stream version="2.2">
          <properties String:title="Galileo PWS Survey" Datum:xTagWidth="0.5 s"
                      double:zFill="-1.0e31"/>
        </stream>"#;
        let s = parse_stream_header(xml).unwrap();
        assert_eq!(s.model(), StreamModel::V2);
        let p = s.props().borrow();
        assert_eq!(p.get_str("title").unwrap(), "Galileo PWS Survey");
        assert_eq!(p.get_double("zFill").unwrap(), -1.0e31);
    }

    #[test]
    fn das3_stream_header_with_frame() {
        let xml = br#"<stream type="das-basic-stream" version="3.0">
          <properties>
            <p name="title" type="string">Magnetometer despun</p>
            <p name="sourceId">mag_cal</p>
          </properties>
          <frame name="sc" id="1" system="cartesian" inertial="false">
            <dir name="u"/><dir name="v"/><dir name="w"/>
          </frame>
        </stream>"#;
        let s = parse_stream_header(xml).unwrap();
        assert_eq!(s.model(), StreamModel::V3);
        assert_eq!(
            s.props().borrow().get_str("title").unwrap(),
            "Magnetometer despun"
        );
        let f = s.frame_by_name("sc").unwrap();
        assert_eq!(f.id(), 1);
        assert_eq!(f.dirs().len(), 3);
        assert_eq!(f.dir_index("w"), Some(2));
    }

    #[test]
    fn missing_stream_element_is_an_error() {
        assert!(parse_stream_header(b"<nonsense/>").is_err());
    }
}
