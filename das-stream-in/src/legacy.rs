//! Parsing of legacy das2.2 `<packet>` headers and their plane set.
//!
//! A legacy packet is a flat list of planes: one `<x>` column, then `<y>`,
//! `<z>` or `<yscan>` columns. Each plane names a value encoding from the
//! old grammar (`sun_real4`, `little_endian_real8`, `time24`, `ascii11`,
//! ...) and a yscan additionally carries the coordinate tags of its fast
//! axis. The structures here are inputs to [`crate::upgrade`].

use quick_xml::events::Event;
use quick_xml::Reader;

use das_stream_core::descriptor::{PropRef, Properties};
use das_stream_core::errors::*;
use das_stream_core::units::{self, Units};
use das_stream_core::value;

use crate::xmlutil::{attrs_of, legacy_props_into, xml_err};

/// Legacy plane kinds, in wire order of appearance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneType {
    X,
    Y,
    YScan,
    Z,
}

/// Categories of the legacy value-encoding grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncCat {
    BigEndReal,
    LittleEndReal,
    BigEndInt,
    LittleEndInt,
    BigEndUint,
    LittleEndUint,
    Ascii,
    Time,
}

/// A parsed legacy encoding: category plus the item width in bytes.
///
/// For text categories the width includes the field's trailing separator
/// byte, which is how das2 streams have always counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyEncoding {
    pub cat: EncCat,
    pub width: usize,
}

impl LegacyEncoding {
    /// Parse a `type` attribute value.
    /// ```
    /// use das_stream_in::legacy::{EncCat, LegacyEncoding};
    ///
    /// let e = LegacyEncoding::from_str("sun_real4").unwrap();
    /// assert_eq!((e.cat, e.width), (EncCat::BigEndReal, 4));
    /// let e = LegacyEncoding::from_str("time24").unwrap();
    /// assert_eq!((e.cat, e.width), (EncCat::Time, 24));
    /// assert!(LegacyEncoding::from_str("ebcdic9").is_err());
    /// ```
    pub fn from_str(s: &str) -> Result<LegacyEncoding, DasError> {
        let fixed = match s {
            "sun_real8" | "double" => Some((EncCat::BigEndReal, 8)),
            "sun_real4" | "float" => Some((EncCat::BigEndReal, 4)),
            "little_endian_real8" => Some((EncCat::LittleEndReal, 8)),
            "little_endian_real4" => Some((EncCat::LittleEndReal, 4)),
            _ => None,
        };
        if let Some((cat, width)) = fixed {
            return Ok(LegacyEncoding { cat, width });
        }

        let widthed: &[(&str, EncCat)] = &[
            ("little_endian_uint", EncCat::LittleEndUint),
            ("little_endian_int", EncCat::LittleEndInt),
            ("big_endian_uint", EncCat::BigEndUint),
            ("big_endian_int", EncCat::BigEndInt),
            ("ascii", EncCat::Ascii),
            ("time", EncCat::Time),
        ];
        for (prefix, cat) in widthed {
            if let Some(rest) = s.strip_prefix(prefix) {
                let width: usize = rest.parse().map_err(|_| DasError::Serial {
                    msg: format!("Error parsing encoding type '{}'", s),
                })?;
                if width < 1 || width > 127 {
                    return Err(DasError::Serial {
                        msg: format!("Encoding width out of range in '{}'", s),
                    });
                }
                return Ok(LegacyEncoding { cat: *cat, width });
            }
        }
        Err(DasError::Serial {
            msg: format!("Error parsing encoding type '{}'", s),
        })
    }

    pub fn to_str(self) -> String {
        match self.cat {
            EncCat::BigEndReal if self.width == 8 => "sun_real8".to_string(),
            EncCat::BigEndReal => "sun_real4".to_string(),
            EncCat::LittleEndReal if self.width == 8 => "little_endian_real8".to_string(),
            EncCat::LittleEndReal => "little_endian_real4".to_string(),
            EncCat::BigEndInt => format!("big_endian_int{}", self.width),
            EncCat::LittleEndInt => format!("little_endian_int{}", self.width),
            EncCat::BigEndUint => format!("big_endian_uint{}", self.width),
            EncCat::LittleEndUint => format!("little_endian_uint{}", self.width),
            EncCat::Ascii => format!("ascii{}", self.width),
            EncCat::Time => format!("time{}", self.width),
        }
    }

    pub fn is_binary_real(self) -> bool {
        matches!(self.cat, EncCat::BigEndReal | EncCat::LittleEndReal)
    }
}

/// How a yscan declares the coordinates of its fast axis.
#[derive(Debug, Clone, PartialEq)]
pub enum YTagSpec {
    /// No tags: item numbers stand in.
    None,
    /// An explicit comma separated list.
    List(Vec<f64>),
    /// A linear series.
    Series { interval: f64, min: f64, max: f64 },
}

impl YTagSpec {
    /// Materialize the tag values for `nitems` items.
    pub fn values(&self, nitems: usize) -> Vec<f64> {
        match self {
            YTagSpec::None => (0..nitems).map(|i| i as f64).collect(),
            YTagSpec::List(v) => v.clone(),
            YTagSpec::Series { interval, min, .. } => {
                (0..nitems).map(|i| min + interval * i as f64).collect()
            }
        }
    }
}

/// One legacy plane: a single column or sub-matrix of a packet.
#[derive(Debug)]
pub struct PlaneDesc {
    pub ptype: PlaneType,
    pub name: Option<String>,
    pub units: Units,
    pub enc: LegacyEncoding,
    /// Values per record: 1 for X/Y/Z, the yscan item count otherwise.
    pub nitems: usize,
    pub ytag_spec: YTagSpec,
    pub ytag_units: Units,
    pub props: PropRef,
}

impl PlaneDesc {
    /// The fill value for absent data, from the axis fill property when
    /// present.
    pub fn fill(&self) -> f64 {
        let p = self.props.borrow();
        for name in ["zFill", "yFill", "fill"] {
            if let Some(v) = p.get_double(name) {
                return v;
            }
        }
        value::FILL_VALUE
    }

    /// Bytes this plane occupies in each record.
    pub fn rec_bytes(&self) -> usize {
        self.nitems * self.enc.width
    }
}

/// A parsed legacy packet definition.
#[derive(Debug)]
pub struct PktDesc {
    pub id: u16,
    pub props: PropRef,
    pub planes: Vec<PlaneDesc>,
}

impl PktDesc {
    pub fn planes_of(&self, ptype: PlaneType) -> impl Iterator<Item = &PlaneDesc> {
        self.planes.iter().filter(move |p| p.ptype == ptype)
    }

    pub fn count_of(&self, ptype: PlaneType) -> usize {
        self.planes_of(ptype).count()
    }

    /// Total record bytes implied by the plane set.
    pub fn rec_bytes(&self) -> usize {
        self.planes.iter().map(|p| p.rec_bytes()).sum()
    }

    /// The packet's plot group, if one was declared.
    pub fn group(&self) -> Option<String> {
        self.props.borrow().get_str("group")
    }
}

/// Parse a legacy `<packet>` header body.
pub fn parse_packet(id: u16, xml: &[u8]) -> Result<PktDesc, DasError> {
    let mut reader = Reader::from_reader(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();

    let props = Properties::new();
    let mut planes: Vec<PlaneDesc> = Vec::new();
    let mut in_plane = false;

    loop {
        let ev = reader.read_event(&mut buf).map_err(xml_err)?;
        match ev {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let empty = matches!(&ev, Event::Empty(_));
                let name = e.local_name().to_vec();
                let attrs = attrs_of(e, &reader)?;
                match name.as_slice() {
                    b"packet" => {
                        legacy_props_into(&attrs, &mut props.borrow_mut())?;
                    }
                    b"x" | b"y" | b"z" | b"yscan" => {
                        let ptype = match name.as_slice() {
                            b"x" => PlaneType::X,
                            b"y" => PlaneType::Y,
                            b"z" => PlaneType::Z,
                            _ => PlaneType::YScan,
                        };
                        planes.push(parse_plane(id, ptype, &attrs)?);
                        in_plane = !empty;
                    }
                    b"properties" => {
                        let mut target = if in_plane {
                            planes.last().expect("plane open").props.borrow_mut()
                        } else {
                            props.borrow_mut()
                        };
                        legacy_props_into(&attrs, &mut target)?;
                    }
                    other => {
                        log::warn!(
                            "Unknown element <{}> in packet {:02} header",
                            String::from_utf8_lossy(other),
                            id
                        );
                    }
                }
            }
            Event::End(ref e) => {
                if matches!(e.local_name(), b"x" | b"y" | b"z" | b"yscan") {
                    in_plane = false;
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if planes.is_empty() {
        return Err(DasError::Serial {
            msg: format!("Packet {:02} defines no planes", id),
        });
    }
    if !planes.iter().any(|p| p.ptype == PlaneType::X) {
        return Err(DasError::Serial {
            msg: format!("Packet {:02} has no <x> plane", id),
        });
    }
    Ok(PktDesc { id, props, planes })
}

fn parse_plane(
    _pkt_id: u16,
    ptype: PlaneType,
    attrs: &[(String, String)],
) -> Result<PlaneDesc, DasError> {
    let mut enc = None;
    let mut name = None;
    let mut units_attr = None;
    let mut nitems = 1usize;
    let mut ytag_units = units::DIMENSIONLESS;
    let mut ytags_txt: Option<String> = None;
    let mut interval = None;
    let mut ymin = None;
    let mut ymax = None;
    let props = Properties::new();

    for (key, val) in attrs {
        match key.as_str() {
            "type" => enc = Some(LegacyEncoding::from_str(val)?),
            "name" => {
                if !val.is_empty() {
                    name = Some(val.clone());
                }
            }
            "units" | "zUnits" => units_attr = Some(Units::from_str(val)),
            "yUnits" => ytag_units = Units::from_str(val),
            "nitems" => {
                nitems = val.parse().map_err(|_| DasError::Serial {
                    msg: format!("Couldn't parse nitems value '{}'", val),
                })?;
            }
            "yTags" => ytags_txt = Some(val.clone()),
            "yTagInterval" => interval = value::str2double(val),
            "yTagMin" => ymin = value::str2double(val),
            "yTagMax" => ymax = value::str2double(val),
            // Anything else (renderer, source, operation, ...) travels as a
            // plane property
            other => props.borrow_mut().set_str(other, val),
        }
    }

    let enc = enc.ok_or_else(|| DasError::Serial {
        msg: "Data 'type' attribute missing from plane description".to_string(),
    })?;

    if ptype != PlaneType::YScan && nitems != 1 {
        return Err(DasError::Serial {
            msg: format!("nitems has no meaning on a {:?} plane", ptype),
        });
    }

    let ytag_spec = if let Some(txt) = ytags_txt {
        let vals = value::csv_to_doubles(&txt)?;
        if vals.len() != nitems {
            return Err(DasError::Serial {
                msg: format!(
                    "{} yTag values do not match the nitems value ({})",
                    vals.len(),
                    nitems
                ),
            });
        }
        YTagSpec::List(vals)
    } else if let Some(intv) = interval {
        // Min and max default around whichever end was pinned
        let (min, max) = match (ymin, ymax) {
            (None, None) => (0.0, intv * nitems as f64),
            (None, Some(mx)) => (mx - intv * nitems as f64, mx),
            (Some(mn), _) => (mn, mn + intv * nitems as f64),
        };
        YTagSpec::Series {
            interval: intv,
            min,
            max,
        }
    } else {
        YTagSpec::None
    };

    Ok(PlaneDesc {
        ptype,
        name,
        units: units_attr.unwrap_or(units::DIMENSIONLESS),
        enc,
        nitems,
        ytag_spec,
        ytag_units,
        props,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const YSCAN_PKT: &[u8] = br#"<packet>
      <x type="time24" units="us2000"></x>
      <yscan name="specs" type="ascii11" zUnits="V**2 m**-2 Hz**-1" yUnits="Hz"
             nitems="3" yTags="10.0, 20.0, 30.0">
        <properties double:zFill="0.0" String:zLabel="Spectral Density"/>
      </yscan>
    </packet>"#;

    #[test]
    fn parse_yscan_packet() {
        let pd = parse_packet(1, YSCAN_PKT).unwrap();
        assert_eq!(pd.planes.len(), 2);
        assert_eq!(pd.count_of(PlaneType::X), 1);
        assert_eq!(pd.count_of(PlaneType::YScan), 1);

        let x = &pd.planes[0];
        assert_eq!((x.enc.cat, x.enc.width), (EncCat::Time, 24));
        assert_eq!(x.units, units::US2000);

        let ys = &pd.planes[1];
        assert_eq!(ys.nitems, 3);
        assert_eq!(ys.ytag_units, units::HERTZ);
        assert_eq!(ys.ytag_spec.values(3), vec![10.0, 20.0, 30.0]);
        assert_eq!(ys.fill(), 0.0);
        assert_eq!(
            ys.props.borrow().get_str("zLabel").unwrap(),
            "Spectral Density"
        );
        assert_eq!(pd.rec_bytes(), 24 + 33);
    }

    #[test]
    fn ytag_series_defaults() {
        let xml = br#"<packet>
          <x type="little_endian_real8" units="t2000"/>
          <yscan type="sun_real4" nitems="4" yUnits="s" yTagInterval="0.5" renderer="waveform"/>
        </packet>"#;
        let pd = parse_packet(2, xml).unwrap();
        let ys = &pd.planes[1];
        match &ys.ytag_spec {
            YTagSpec::Series { interval, min, max } => {
                assert_eq!((*interval, *min, *max), (0.5, 0.0, 2.0));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(ys.ytag_spec.values(4), vec![0.0, 0.5, 1.0, 1.5]);
    }

    #[test]
    fn missing_type_attribute_fails() {
        let xml = br#"<packet><x units="t2000"/></packet>"#;
        assert!(parse_packet(3, xml).is_err());
    }

    #[test]
    fn encoding_grammar() {
        for (s, cat, w) in [
            ("little_endian_int4", EncCat::LittleEndInt, 4),
            ("big_endian_uint2", EncCat::BigEndUint, 2),
            ("ascii24", EncCat::Ascii, 24),
        ] {
            let e = LegacyEncoding::from_str(s).unwrap();
            assert_eq!((e.cat, e.width), (cat, w));
            assert_eq!(e.to_str(), s);
        }
    }
}
