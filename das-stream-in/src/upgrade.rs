//! Rewriting legacy packet definitions into the dataset model.
//!
//! Old das2 streams describe payloads as flat plane lists; the modern model
//! wants dimensions, variables and codecs. The upgrade rules are driven by
//! the observed plane pattern: X with Ys is an XY line plot set, X with Zs
//! an XYZ scatter set, X with yscans a rank-2 spectrogram or waveform set.
//! The produced dataset reproduces the packet payload byte for byte, so a
//! legacy stream and its upgraded form parse identically.

use std::rc::Rc;

use das_stream_core::array::DynArray;
use das_stream_core::dataset::Dataset;
use das_stream_core::enums::{DimType, Encoding, Role, Semantic, ValType};
use das_stream_core::errors::*;
use das_stream_core::stream::Stream;
use das_stream_core::units::{self, Units};
use das_stream_core::value::{self, Op, RawVal};
use das_stream_core::variable::Variable;
use das_stream_core::IdxMap;

use crate::legacy::{EncCat, LegacyEncoding, PktDesc, PlaneDesc, PlaneType};

/// Upgrade one legacy packet definition to a dataset.
///
/// With `with_codecs` set the dataset can parse the packet's payloads
/// directly; otherwise it only models the structure (values already parsed
/// to doubles elsewhere).
pub fn dataset_from_packet(
    stream: &Stream,
    pd: &PktDesc,
    group: Option<&str>,
    with_codecs: bool,
) -> Result<Dataset, DasError> {
    let n_x = pd.count_of(PlaneType::X);
    let n_yscan = pd.count_of(PlaneType::YScan);
    let n_z = pd.count_of(PlaneType::Z);

    if n_yscan > 0 {
        return init_yscan(stream, pd, group, with_codecs);
    }
    if n_z > 0 {
        return init_xy(stream, pd, group, with_codecs, true);
    }
    if n_x == 2 {
        return Err(DasError::NotImp {
            what: "Event stream reading".to_string(),
        });
    }
    init_xy(stream, pd, group, with_codecs, false)
}

/// The reason a plane is present, from the Autoplot-style `operation`
/// property.
fn role_of(plane: &PlaneDesc) -> Role {
    match plane.props.borrow().get_str("operation").as_deref() {
        Some("BIN_AVG") => Role::Mean,
        Some("BIN_MAX") => Role::Max,
        Some("BIN_MIN") => Role::Min,
        _ => Role::Center,
    }
}

fn clean_id(id: &str) -> String {
    id.replace('.', "_")
}

/// Internal array creation. When reading raw stream bytes the element type
/// follows the wire encoding: text times become calendar structs, short
/// ASCII numbers and 4-byte reals stay single precision, everything else
/// goes to doubles.
fn make_ary(
    raw: bool,
    id: &str,
    enc: LegacyEncoding,
    fill: f64,
    shape: &[usize],
    def_units: Units,
) -> Result<DynArray, DasError> {
    let mut units = def_units;
    let vt = if raw {
        match enc.cat {
            EncCat::Time => {
                units = units::UTC;
                ValType::Time
            }
            EncCat::Ascii => {
                if enc.width > 12 {
                    ValType::Float64
                } else {
                    ValType::Float32
                }
            }
            EncCat::BigEndReal | EncCat::LittleEndReal => {
                if enc.width > 4 {
                    ValType::Float64
                } else {
                    ValType::Float32
                }
            }
            _ => value::store_type(
                wire_encoding(enc).0,
                enc.width as i16,
                Semantic::Int,
                None,
            )?,
        }
    } else {
        ValType::Float64
    };
    let fill_raw = match vt {
        ValType::Float32 => Some(RawVal::new(&(fill as f32).to_ne_bytes())),
        ValType::Float64 => Some(RawVal::new(&fill.to_ne_bytes())),
        _ => None,
    };
    DynArray::new(id, vt, fill_raw, shape, units)
}

/// The modern (encoding, semantic) pair for a legacy encoding.
fn wire_encoding(enc: LegacyEncoding) -> (Encoding, Semantic) {
    match enc.cat {
        EncCat::BigEndReal => (Encoding::BigEndReal, Semantic::Real),
        EncCat::LittleEndReal => (Encoding::LittleEndReal, Semantic::Real),
        EncCat::BigEndInt => (Encoding::BigEndInt, Semantic::Int),
        EncCat::LittleEndInt => (Encoding::LittleEndInt, Semantic::Int),
        EncCat::BigEndUint => (Encoding::BigEndUint, Semantic::Int),
        EncCat::LittleEndUint => (Encoding::LittleEndUint, Semantic::Int),
        EncCat::Ascii => (Encoding::Utf8, Semantic::Real),
        EncCat::Time => (Encoding::Utf8, Semantic::Datetime),
    }
}

fn add_codec(
    ds: &mut Dataset,
    ary_id: &str,
    items: usize,
    enc: LegacyEncoding,
) -> Result<(), DasError> {
    let (wire, semantic) = wire_encoding(enc);
    ds.add_fixed_codec(ary_id, semantic, wire, enc.width as i16, Some(items), None)
}

/// Find or create the dimension a plane belongs to. Planes sharing a
/// `source` property land in one dimension under distinct roles; the
/// `source` bookkeeping lives in `groups` as (source, dim id) pairs.
#[allow(clippy::too_many_arguments)]
fn obtain_dim(
    ds: &mut Dataset,
    stream: &Stream,
    pd: &PktDesc,
    plane: &PlaneDesc,
    axis: char,
    dtype: DimType,
    dim_id: &str,
    groups: &mut Vec<(String, String)>,
) -> Result<String, DasError> {
    let source = plane.props.borrow().get_str("source");

    if let Some(src) = &source {
        if let Some((_, existing)) = groups.iter().find(|(s, _)| s == src) {
            let id = existing.clone();
            if axis != '\0' {
                if let Some(dim) = ds.get_dim_mut(&id) {
                    dim.copy_in_props(axis, &plane.props.borrow());
                }
            }
            return Ok(id);
        }
    }

    // De-kludge names like `amplitude.max`: the dimension is `amplitude`
    let id = match (&source, dim_id.find('.')) {
        (Some(_), Some(dot)) if dot > 0 => dim_id[..dot].to_string(),
        _ => dim_id.to_string(),
    };

    let dim = ds.make_dim(dtype, &id)?;
    if axis != '\0' {
        dim.copy_in_props(axis, &stream.props().borrow());
        dim.copy_in_props(axis, &pd.props.borrow());
        dim.copy_in_props(axis, &plane.props.borrow());
    }
    if let Some(src) = source {
        groups.push((src, id.clone()));
    }
    Ok(id)
}

/// The XY and XYZ patterns: a rank-1 dataset, one dimension per plane
/// group.
fn init_xy(
    stream: &Stream,
    pd: &PktDesc,
    group: Option<&str>,
    with_codecs: bool,
    has_z: bool,
) -> Result<Dataset, DasError> {
    let n_y = pd.count_of(PlaneType::Y);
    let group = match group.map(String::from).or_else(|| pd.group()) {
        Some(g) => g,
        None => {
            if !has_z && n_y == 1 {
                pd.planes_of(PlaneType::Y)
                    .next()
                    .and_then(|p| p.name.clone())
                    .unwrap_or_else(|| format!("unknown_{}Y", n_y))
            } else if has_z {
                format!("unknown_{}Z", pd.count_of(PlaneType::Z))
            } else {
                format!("unknown_{}Y", n_y)
            }
        }
    };
    let mut ds = Dataset::new(&format!("{}_{:02}", group, pd.id), &group, 1)?;

    let mut groups: Vec<(String, String)> = Vec::new();
    let mut ny = 0usize;
    let mut nz = 0usize;

    for (col, plane) in pd.planes.iter().enumerate() {
        let (axis, dtype) = match plane.ptype {
            PlaneType::X => ('x', DimType::Coord),
            PlaneType::Y if has_z => ('y', DimType::Coord),
            PlaneType::Y => ('y', DimType::Data),
            PlaneType::Z => ('z', DimType::Data),
            PlaneType::YScan => unreachable!("yscan packets upgrade elsewhere"),
        };
        let plane_id = match (&plane.name, plane.ptype) {
            (Some(n), _) => n.clone(),
            (None, PlaneType::X) => {
                if plane.units.has_calendar_rep() {
                    "time".to_string()
                } else {
                    "X".to_string()
                }
            }
            (None, PlaneType::Y) => {
                ny += 1;
                format!("Y_{}", ny)
            }
            (None, _) => {
                nz += 1;
                format!("Z_{}", nz)
            }
        };
        let ary_id = clean_id(&plane_id);
        let ary = make_ary(
            with_codecs,
            &ary_id,
            plane.enc,
            plane.fill(),
            &[0],
            plane.units,
        )?;
        let ary = ary.into_ref();
        ary.borrow_mut().set_src(pd.id, col, 1);
        ds.add_array(Rc::clone(&ary))?;

        let dim_id = obtain_dim(&mut ds, stream, pd, plane, axis, dtype, &plane_id, &mut groups)?;
        let var = Variable::array(ary, &[IdxMap::Mapped(0)])?;
        ds.get_dim_mut(&dim_id)
            .expect("dimension just obtained")
            .add_var(role_of(plane), var)?;

        if with_codecs {
            add_codec(&mut ds, &ary_id, 1, plane.enc)?;
        }
    }
    Ok(ds)
}

/// All yscans in one packet must agree on their fast-axis tags; data with
/// different tags is simply not correlated.
fn check_ytags(pd: &PktDesc) -> bool {
    let mut scans = pd.planes_of(PlaneType::YScan);
    let first = match scans.next() {
        Some(f) => f,
        None => return true,
    };
    scans.all(|s| {
        s.nitems == first.nitems
            && s.ytag_units == first.ytag_units
            && s.ytag_spec == first.ytag_spec
    })
}

/// A yscan is a waveform when it says so and its ytags are time offsets.
fn is_waveform(plane: &PlaneDesc) -> bool {
    plane.props.borrow().get_str("renderer").as_deref() == Some("waveform")
        && plane.ytag_units.can_convert(units::SECONDS)
}

/// The YScan pattern: a rank-2 dataset. Waveform ytags fold into the time
/// dimension as offsets; otherwise the ytags make their own coordinate
/// dimension named by unit family.
fn init_yscan(
    stream: &Stream,
    pd: &PktDesc,
    group: Option<&str>,
    with_codecs: bool,
) -> Result<Dataset, DasError> {
    if !check_ytags(pd) {
        return Err(DasError::Serial {
            msg: "YTags are not equivalent in a multi-yscan packet".to_string(),
        });
    }

    let first_scan = pd
        .planes_of(PlaneType::YScan)
        .next()
        .expect("at least one yscan");
    let uitems = first_scan.nitems;

    let group = group
        .map(String::from)
        .or_else(|| pd.group())
        .or_else(|| first_scan.name.clone())
        .unwrap_or_else(|| format!("default_{}_MultiZ", pd.count_of(PlaneType::YScan)));
    let mut ds = Dataset::new(&format!("{}_{:02}", group, pd.id), &group, 2)?;

    let mut groups: Vec<(String, String)> = Vec::new();
    let mut x_dim_id: Option<String> = None;
    let mut y_dim_id: Option<String> = None;
    let mut ny = 0usize;
    let mut nyscan = 0usize;
    let mut added_ytags = false;

    for (col, plane) in pd.planes.iter().enumerate() {
        match plane.ptype {
            PlaneType::X => {
                let plane_id = plane.name.clone().unwrap_or_else(|| {
                    if plane.units.has_calendar_rep() {
                        "time".to_string()
                    } else {
                        "X".to_string()
                    }
                });
                let ary = make_ary(
                    with_codecs,
                    &clean_id(&plane_id),
                    plane.enc,
                    plane.fill(),
                    &[0],
                    plane.units,
                )?
                .into_ref();
                ary.borrow_mut().set_src(pd.id, col, 1);
                ds.add_array(Rc::clone(&ary))?;

                let id = obtain_dim(
                    &mut ds,
                    stream,
                    pd,
                    plane,
                    'x',
                    DimType::Coord,
                    &plane_id,
                    &mut groups,
                )?;
                let var = Variable::array(ary, &[IdxMap::Mapped(0), IdxMap::Unused])?;
                ds.get_dim_mut(&id)
                    .expect("dimension just obtained")
                    .add_var(role_of(plane), var)?;
                if with_codecs {
                    add_codec(&mut ds, &clean_id(&plane_id), 1, plane.enc)?;
                }
                x_dim_id = Some(id);
            }
            PlaneType::Y => {
                ny += 1;
                let plane_id = plane
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("Y_{}", ny));
                let ary_id = clean_id(&plane_id);
                let ary = make_ary(
                    with_codecs,
                    &ary_id,
                    plane.enc,
                    plane.fill(),
                    &[0],
                    plane.units,
                )?
                .into_ref();
                ary.borrow_mut().set_src(pd.id, col, 1);
                ds.add_array(Rc::clone(&ary))?;

                // Extra Ys on a yscan packet are more coordinates
                let id = obtain_dim(
                    &mut ds,
                    stream,
                    pd,
                    plane,
                    'y',
                    DimType::Coord,
                    &plane_id,
                    &mut groups,
                )?;
                let var = Variable::array(ary, &[IdxMap::Mapped(0), IdxMap::Unused])?;
                ds.get_dim_mut(&id)
                    .expect("dimension just obtained")
                    .add_var(role_of(plane), var)?;
                if with_codecs {
                    add_codec(&mut ds, &ary_id, 1, plane.enc)?;
                }
                y_dim_id = Some(id);
            }
            PlaneType::YScan => {
                nyscan += 1;
                if !added_ytags {
                    add_ytag_dim(&mut ds, stream, pd, plane, uitems, &x_dim_id, &y_dim_id)?;
                    added_ytags = true;
                }

                let z_units = plane.units;
                let ary_id = match &plane.name {
                    Some(n) => clean_id(n),
                    None => {
                        if z_units.can_convert(units::E_SPECDENS) {
                            "e_spec_dens".to_string()
                        } else if z_units.can_convert(units::B_SPECDENS) {
                            "b_spec_dens".to_string()
                        } else {
                            format!("YScan_{}", nyscan)
                        }
                    }
                };
                let ary = make_ary(
                    with_codecs,
                    &ary_id,
                    plane.enc,
                    plane.fill(),
                    &[0, uitems],
                    z_units,
                )?
                .into_ref();
                ary.borrow_mut().set_src(pd.id, col, uitems);
                ds.add_array(Rc::clone(&ary))?;

                let plane_id = plane.name.clone().unwrap_or_else(|| ary_id.clone());
                let id = obtain_dim(
                    &mut ds,
                    stream,
                    pd,
                    plane,
                    'z',
                    DimType::Data,
                    &plane_id,
                    &mut groups,
                )?;
                let var = Variable::array(ary, &[IdxMap::Mapped(0), IdxMap::Mapped(1)])?;
                ds.get_dim_mut(&id)
                    .expect("dimension just obtained")
                    .add_var(role_of(plane), var)?;
                if with_codecs {
                    add_codec(&mut ds, &ary_id, uitems, plane.enc)?;
                }
            }
            PlaneType::Z => {
                return Err(DasError::Serial {
                    msg: "A packet cannot mix <z> and <yscan> planes".to_string(),
                })
            }
        }
    }
    Ok(ds)
}

/// Build the ytag coordinate structure for the first yscan of a packet.
fn add_ytag_dim(
    ds: &mut Dataset,
    stream: &Stream,
    pd: &PktDesc,
    plane: &PlaneDesc,
    uitems: usize,
    x_dim_id: &Option<String>,
    y_dim_id: &Option<String>,
) -> Result<(), DasError> {
    let y_units = plane.ytag_units;
    let ytag_id = if y_units.can_convert(units::HERTZ) {
        "frequency"
    } else if y_units.can_convert(units::SECONDS) {
        "offset"
    } else if y_units.can_convert(units::EV) {
        "energy"
    } else {
        "ytags"
    };

    let ary = DynArray::new(ytag_id, ValType::Float64, None, &[uitems], y_units)?.into_ref();
    {
        let vals = plane.ytag_spec.values(uitems);
        let bytes: Vec<u8> = vals.iter().flat_map(|v| v.to_ne_bytes().to_vec()).collect();
        ary.borrow_mut().put_at(&[0], &bytes, uitems)?;
    }
    ds.add_array(Rc::clone(&ary))?;

    let offset_var = Variable::array(Rc::clone(&ary), &[IdxMap::Unused, IdxMap::Mapped(0)])?;

    // Waveform ytags become time offsets; ditto when explicit Y reference
    // values exist. Otherwise the ytags are their own coordinate.
    let host_dim = if is_waveform(plane) {
        x_dim_id.clone()
    } else {
        y_dim_id.clone()
    };

    match host_dim {
        Some(host) => {
            let dim = ds.get_dim_mut(&host).ok_or_else(|| DasError::Dataset {
                msg: format!("Lost track of dimension {}", host),
            })?;
            dim.add_var(Role::Offset, offset_var.clone())?;
            let reference = dim.pop_var(Role::Center).ok_or_else(|| DasError::Dim {
                msg: format!("Dimension {} has no center to re-anchor", host),
            })?;
            dim.add_var(Role::Reference, reference.clone())?;
            // Reference and offset are orthogonal, their sum is rank 2
            let center = Variable::binary(reference, Op::Add, offset_var)?;
            dim.add_var(Role::Center, center)?;
        }
        None => {
            let dim = ds.make_dim(DimType::Coord, ytag_id)?;
            dim.copy_in_props('y', &stream.props().borrow());
            dim.copy_in_props('y', &pd.props.borrow());
            dim.copy_in_props('y', &plane.props.borrow());
            dim.add_var(Role::Center, offset_var)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use das_stream_core::enums::StreamModel;
    use das_stream_core::iterator::DatasetIter;
    use das_stream_core::AxisLen;

    use crate::legacy::parse_packet;

    fn empty_stream() -> Stream {
        Stream::new(StreamModel::V2)
    }

    #[test]
    fn xy_packet_becomes_rank1() {
        let xml = br#"<packet>
          <x type="little_endian_real8" units="t2000"/>
          <y name="radius" type="sun_real4" units="km">
            <properties String:yLabel="Radial Distance"/>
          </y>
        </packet>"#;
        let pd = parse_packet(1, xml).unwrap();
        let ds = dataset_from_packet(&empty_stream(), &pd, None, true).unwrap();

        assert_eq!(ds.rank(), 1);
        assert_eq!(ds.id(), "radius_01");
        assert!(ds.get_dim("radius").is_some());
        assert_eq!(ds.rec_bytes(), Some(12));

        let dim = ds.get_dim("radius").unwrap();
        assert_eq!(
            dim.props().borrow().get_str("label").unwrap(),
            "Radial Distance"
        );
    }

    #[test]
    fn source_property_groups_planes() {
        let xml = br#"<packet>
          <x type="little_endian_real8" units="t2000"/>
          <y name="amplitude.avg" type="sun_real4" units="V" source="amp" operation="BIN_AVG"/>
          <y name="amplitude.max" type="sun_real4" units="V" source="amp" operation="BIN_MAX"/>
        </packet>"#;
        let pd = parse_packet(4, xml).unwrap();
        let ds = dataset_from_packet(&empty_stream(), &pd, None, true).unwrap();

        // Both planes share one dimension under different roles
        let dim = ds.get_dim("amplitude").unwrap();
        assert!(dim.get_var(Role::Mean).is_some());
        assert!(dim.get_var(Role::Max).is_some());
        assert_eq!(ds.dims().count(), 2);
    }

    #[test]
    fn waveform_yscan_builds_reference_offset_center() {
        // 512 microsecond-spaced samples per record, declared a waveform
        let tags: Vec<String> = (0..8).map(|i| format!("{}.0e-6", i)).collect();
        let xml = format!(
            r#"<packet>
              <x type="time24" units="us2000"/>
              <yscan name="e_spec_dens" type="sun_real4" zUnits="V**2 m**-2 Hz**-1"
                     yUnits="s" nitems="8" yTags="{}" renderer="waveform"/>
            </packet>"#,
            tags.join(",")
        );
        let pd = parse_packet(2, xml.as_bytes()).unwrap();
        let ds = dataset_from_packet(&empty_stream(), &pd, None, true).unwrap();

        assert_eq!(ds.rank(), 2);
        let time = ds.get_dim("time").unwrap();
        assert!(time.get_var(Role::Reference).is_some());
        assert!(time.get_var(Role::Offset).is_some());
        let center = time.get_var(Role::Center).unwrap();
        assert!(matches!(center, Variable::Binary(_)));

        // No separate frequency/ytag coordinate dimension was made
        assert_eq!(ds.dims().count(), 2);
        let data = ds.get_dim("e_spec_dens").unwrap();
        let shape = data.shape(2);
        assert_eq!(shape[1], AxisLen::Size(8));
    }

    #[test]
    fn spectrum_yscan_gets_frequency_dim() {
        let xml = br#"<packet>
          <x type="time24" units="us2000"/>
          <yscan type="ascii11" zUnits="V**2 m**-2 Hz**-1" yUnits="Hz"
                 nitems="3" yTags="10.0,20.0,30.0"/>
        </packet>"#;
        let pd = parse_packet(3, xml).unwrap();
        let ds = dataset_from_packet(&empty_stream(), &pd, None, true).unwrap();

        let freq = ds.get_dim("frequency").unwrap();
        let v = freq.get_var(Role::Center).unwrap();
        let mut loc = [0usize; das_stream_core::IDX_MAX];
        loc[1] = 1;
        assert_eq!(v.get(&loc).unwrap().to_f64().unwrap(), 20.0);
        assert_eq!(ds.get_dim("e_spec_dens").is_some(), true);
    }

    #[test]
    fn events_pattern_is_flagged() {
        let xml = br#"<packet>
          <x type="time24" units="us2000"/>
          <x type="time24" units="us2000"/>
        </packet>"#;
        let pd = parse_packet(5, xml).unwrap();
        match dataset_from_packet(&empty_stream(), &pd, None, true).unwrap_err() {
            DasError::NotImp { .. } => {}
            other => panic!("unexpected {}", other),
        }
    }

    #[test]
    fn upgraded_dataset_parses_payload() {
        // End to end: binary XY packet definition, then one record
        let xml = br#"<packet>
          <x type="little_endian_real8" units="t2000"/>
          <y name="b_mag" type="little_endian_real4" units="nT"/>
        </packet>"#;
        let pd = parse_packet(1, xml).unwrap();
        let mut ds = dataset_from_packet(&empty_stream(), &pd, None, true).unwrap();

        let mut payload = Vec::new();
        payload.extend_from_slice(&86400.0f64.to_le_bytes());
        payload.extend_from_slice(&4.25f32.to_le_bytes());
        ds.decode_data(&payload).unwrap();

        let x = ds.get_dim("time").unwrap().point_var().unwrap();
        let y = ds.get_dim("b_mag").unwrap().point_var().unwrap();
        let locs: Vec<_> = DatasetIter::new(&ds).collect();
        assert_eq!(locs.len(), 1);
        assert_eq!(x.get(&locs[0]).unwrap().to_f64().unwrap(), 86400.0);
        let b = y.get(&locs[0]).unwrap();
        assert_eq!(b.to_f64().unwrap(), 4.25);
        assert_eq!(b.units, Units::from_str("nT"));
    }
}
