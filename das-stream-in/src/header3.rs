//! Parsing das3 `<dataset>` headers into datasets with live codecs.
//!
//! The parser is event driven. Attributes of an open `<scalar>` or
//! `<vector>` are staged in the context and nothing is committed until the
//! element closes, when enough is known to build the variable, its backing
//! array and any packet codec in one step. Errors stick: the first failure
//! wins and later events are ignored.

use std::rc::Rc;

use quick_xml::events::Event;
use quick_xml::Reader;

use das_stream_core::array::{self, DynArray};
use das_stream_core::codec::{Codec, ITEM_TERM};
use das_stream_core::dataset::Dataset;
use das_stream_core::enums::{CoordSys, DimType, Encoding, Role, Semantic, ValType};
use das_stream_core::errors::*;
use das_stream_core::stream::Stream;
use das_stream_core::time::DasTime;
use das_stream_core::units::Units;
use das_stream_core::value::{self, Value};
use das_stream_core::variable::{VecInfo, Variable};
use das_stream_core::IdxMap;

use crate::xmlutil::{attrs_of, das3_prop, xml_err};

/// One token of an `index` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdxTok {
    /// `-`: this position is unused.
    Unused,
    /// `*`: varies, extent open.
    Any,
    /// A definite extent.
    Num(usize),
}

fn parse_index(s: &str) -> Result<Vec<IdxTok>, DasError> {
    s.split(';')
        .map(|t| match t.trim() {
            "-" => Ok(IdxTok::Unused),
            "*" => Ok(IdxTok::Any),
            n => n.parse::<usize>().map(IdxTok::Num).map_err(|_| {
                DasError::Serial {
                    msg: format!("'{}' is not an index entry", n),
                }
            }),
        })
        .collect()
}

/// `<packet>` child attributes, staged until the variable closes.
#[derive(Debug)]
struct PktAttrs {
    num_items: Option<usize>,
    encoding: Encoding,
    item_bytes: i16,
    fill: Option<String>,
    val_term: Option<u8>,
}

/// Staged state for the `<scalar>`/`<vector>` currently open.
#[derive(Default)]
struct VarCtx {
    is_vector: bool,
    role: Option<Role>,
    semantic: Option<Semantic>,
    storage: Option<ValType>,
    units: Option<Units>,
    index: Vec<IdxTok>,
    ncomp: usize,
    sys: Option<CoordSys>,
    sysorder: Option<String>,
    pkt: Option<PktAttrs>,
    seq: Option<(String, String)>,
    values_text: Option<String>,
}

struct Ctx<'a> {
    stream: &'a Stream,
    pkt_id: u16,
    ds: Option<Dataset>,
    ds_shape: Vec<usize>,
    cur_dim: Option<String>,
    cur_frame: Option<String>,
    var: Option<VarCtx>,
    in_values: bool,
    prop_attrs: Option<Vec<(String, String)>>,
    prop_text: String,
}

/// Parse one das3 `<dataset>` header for the given packet id.
pub fn parse_dataset_header(
    stream: &Stream,
    pkt_id: u16,
    xml: &[u8],
) -> Result<Dataset, DasError> {
    let mut reader = Reader::from_reader(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();

    let mut ctx = Ctx {
        stream,
        pkt_id,
        ds: None,
        ds_shape: Vec::new(),
        cur_dim: None,
        cur_frame: None,
        var: None,
        in_values: false,
        prop_attrs: None,
        prop_text: String::new(),
    };

    loop {
        let ev = reader.read_event(&mut buf).map_err(xml_err)?;
        match ev {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let empty = matches!(&ev, Event::Empty(_));
                let name = e.local_name().to_vec();
                let attrs = attrs_of(e, &reader)?;
                on_open(&mut ctx, &name, &attrs, empty)?;
            }
            Event::Text(t) => {
                let text = t.unescape_and_decode(&reader).map_err(xml_err)?;
                on_text(&mut ctx, &text);
            }
            Event::End(ref e) => {
                let name = e.local_name().to_vec();
                on_close(&mut ctx, &name)?;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    ctx.ds.ok_or_else(|| DasError::Serial {
        msg: format!("Header for packet {} carried no <dataset>", pkt_id),
    })
}

fn on_open(
    ctx: &mut Ctx,
    name: &[u8],
    attrs: &[(String, String)],
    empty: bool,
) -> Result<(), DasError> {
    match name {
        b"dataset" => on_open_dataset(ctx, attrs),
        b"coord" | b"data" => {
            let dtype = if name == b"coord" {
                DimType::Coord
            } else {
                DimType::Data
            };
            on_open_dim(ctx, dtype, attrs)
        }
        b"scalar" | b"vector" => on_open_var(ctx, name == b"vector", attrs),
        b"packet" => on_packet(ctx, attrs),
        b"sequence" => on_sequence(ctx, attrs),
        b"values" => {
            let var = ctx.var.as_mut().ok_or_else(|| DasError::Serial {
                msg: "<values> outside of a variable".to_string(),
            })?;
            if !attrs.is_empty() {
                return Err(DasError::NotImp {
                    what: "Attributes on <values> elements".to_string(),
                });
            }
            var.values_text = Some(String::new());
            ctx.in_values = !empty;
            Ok(())
        }
        b"properties" => Ok(()),
        b"p" => {
            ctx.prop_attrs = Some(attrs.to_vec());
            ctx.prop_text.clear();
            if empty {
                commit_prop(ctx)?;
            }
            Ok(())
        }
        other => {
            log::warn!(
                "Unknown element <{}> in dataset {:02} header",
                String::from_utf8_lossy(other),
                ctx.pkt_id
            );
            Ok(())
        }
    }
}

fn on_text(ctx: &mut Ctx, text: &str) {
    if ctx.in_values {
        if let Some(var) = ctx.var.as_mut() {
            if let Some(vals) = var.values_text.as_mut() {
                vals.push_str(text);
                vals.push(' ');
            }
        }
    } else if ctx.prop_attrs.is_some() {
        ctx.prop_text.push_str(text);
    }
}

fn on_close(ctx: &mut Ctx, name: &[u8]) -> Result<(), DasError> {
    match name {
        b"p" => commit_prop(ctx),
        b"values" => {
            ctx.in_values = false;
            Ok(())
        }
        b"scalar" | b"vector" => commit_var(ctx),
        b"coord" | b"data" => {
            ctx.cur_dim = None;
            ctx.cur_frame = None;
            Ok(())
        }
        _ => Ok(()),
    }
}

fn on_open_dataset(ctx: &mut Ctx, attrs: &[(String, String)]) -> Result<(), DasError> {
    let mut ds_name = None;
    let mut group = None;
    let mut rank = None;
    let mut index = None;
    for (k, v) in attrs {
        match k.as_str() {
            "name" => ds_name = Some(v.clone()),
            "plot" | "group" => group = Some(v.clone()),
            "rank" => rank = v.parse::<usize>().ok(),
            "index" => index = Some(parse_index(v)?),
            other => log::warn!(
                "Unknown attribute {} in <dataset> ID {:02}",
                other,
                ctx.pkt_id
            ),
        }
    }
    let name = ds_name.unwrap_or_else(|| format!("dataset_{:02}", ctx.pkt_id));
    let rank = rank.ok_or_else(|| DasError::Serial {
        msg: format!(
            "Invalid or missing rank attribute for <dataset> {:02}",
            ctx.pkt_id
        ),
    })?;
    let shape = match index {
        Some(toks) => {
            if toks.len() != rank {
                return Err(DasError::Serial {
                    msg: format!(
                        "Dataset {:02}: index attribute disagrees with rank {}",
                        ctx.pkt_id, rank
                    ),
                });
            }
            toks.iter()
                .map(|t| match t {
                    IdxTok::Num(n) => *n,
                    _ => 0,
                })
                .collect()
        }
        None => vec![0; rank],
    };
    let group = group.unwrap_or_else(|| name.clone());
    ctx.ds = Some(Dataset::new(&name, &group, rank)?);
    ctx.ds_shape = shape;
    Ok(())
}

fn on_open_dim(
    ctx: &mut Ctx,
    dtype: DimType,
    attrs: &[(String, String)],
) -> Result<(), DasError> {
    let pkt_id = ctx.pkt_id;
    let ds = ctx.ds.as_mut().ok_or_else(|| DasError::Serial {
        msg: "Dimension outside of <dataset>".to_string(),
    })?;
    let mut id = None;
    let mut axes = None;
    let mut frame = None;
    for (k, v) in attrs {
        match k.as_str() {
            "name" | "physDim" => id = Some(v.clone()),
            "axis" | "axes" => axes = Some(v.clone()),
            "frame" => frame = Some(v.clone()),
            other => log::warn!("Unknown attribute {} in a dimension element", other),
        }
    }
    let id = id.ok_or_else(|| DasError::Serial {
        msg: format!("Unnamed dimension in dataset {:02}", pkt_id),
    })?;
    let dim = ds.make_dim(dtype, &id)?;
    if let Some(a) = axes {
        dim.set_axes(&a);
    }
    if let Some(f) = &frame {
        dim.set_frame(f);
    }
    ctx.cur_dim = Some(id);
    ctx.cur_frame = frame;
    Ok(())
}

fn on_open_var(
    ctx: &mut Ctx,
    is_vector: bool,
    attrs: &[(String, String)],
) -> Result<(), DasError> {
    if ctx.var.is_some() {
        return Err(DasError::Serial {
            msg: "Scalars and vectors cannot nest".to_string(),
        });
    }
    if ctx.cur_dim.is_none() {
        return Err(DasError::Serial {
            msg: "Variable outside of <coord> or <data>".to_string(),
        });
    }
    let mut var = VarCtx {
        is_vector,
        ..Default::default()
    };
    for (k, v) in attrs {
        match k.as_str() {
            "use" => var.role = Some(Role::from_str(v)?),
            "semantic" | "valType" => var.semantic = Some(Semantic::from_str(v)?),
            "storage" => var.storage = Some(ValType::from_str(v)?),
            "index" => var.index = parse_index(v)?,
            "units" => var.units = Some(Units::from_str(v)),
            "components" => {
                var.ncomp = v.parse().map_err(|_| DasError::Vec {
                    msg: format!("Invalid number of components '{}'", v),
                })?
            }
            "system" | "vecClass" => var.sys = Some(CoordSys::from_str(v)?),
            "sysorder" => var.sysorder = Some(v.clone()),
            other => log::warn!(
                "Unknown attribute {} in a variable of dataset {:02}",
                other,
                ctx.pkt_id
            ),
        }
    }
    if var.is_vector && var.ncomp == 0 {
        return Err(DasError::Vec {
            msg: format!(
                "Number of components were not specified for <vector> in dataset {}",
                ctx.pkt_id
            ),
        });
    }
    if var.role.is_none() {
        var.role = Some(Role::Center);
    }
    ctx.var = Some(var);
    Ok(())
}

fn on_packet(ctx: &mut Ctx, attrs: &[(String, String)]) -> Result<(), DasError> {
    let var = ctx.var.as_mut().ok_or_else(|| DasError::Serial {
        msg: "<packet> outside of a variable".to_string(),
    })?;
    let mut num_items = None;
    let mut encoding = None;
    let mut item_bytes = None;
    let mut fill = None;
    let mut val_term = None;
    for (k, v) in attrs {
        match k.as_str() {
            "numItems" => {
                num_items = if v == "*" {
                    Some(None)
                } else {
                    Some(Some(v.parse::<usize>().map_err(|_| DasError::Serial {
                        msg: format!("Error parsing numItems=\"{}\"", v),
                    })?))
                }
            }
            "encoding" => encoding = Some(Encoding::from_str(v)?),
            "itemBytes" => {
                item_bytes = Some(if v == "*" {
                    ITEM_TERM
                } else {
                    v.parse::<i16>().map_err(|_| DasError::Serial {
                        msg: format!("Error parsing itemBytes=\"{}\"", v),
                    })?
                })
            }
            "fill" => fill = Some(v.clone()),
            "valTerm" => val_term = v.bytes().next(),
            "itemsTerm" => {
                return Err(DasError::NotImp {
                    what: "In-packet item length prefixes".to_string(),
                })
            }
            other => log::warn!("Unknown attribute {} in <packet>", other),
        }
    }
    let (encoding, item_bytes) = match (encoding, item_bytes) {
        (Some(e), Some(b)) => (e, b),
        _ => {
            return Err(DasError::Serial {
                msg: format!(
                    "Required attributes missing from <packet> in dataset {:02}",
                    ctx.pkt_id
                ),
            })
        }
    };
    if item_bytes == ITEM_TERM && val_term.is_none() && encoding == Encoding::Utf8 {
        return Err(DasError::Serial {
            msg: "Attribute 'valTerm' missing for variable length values".to_string(),
        });
    }
    var.pkt = Some(PktAttrs {
        num_items: num_items.flatten(),
        encoding,
        item_bytes,
        fill,
        val_term,
    });
    Ok(())
}

fn on_sequence(ctx: &mut Ctx, attrs: &[(String, String)]) -> Result<(), DasError> {
    let pkt_id = ctx.pkt_id;
    let var = ctx.var.as_mut().ok_or_else(|| DasError::Serial {
        msg: "<sequence> outside of a variable".to_string(),
    })?;
    let mut minval = "0".to_string();
    let mut interval = None;
    for (k, v) in attrs {
        match k.as_str() {
            "minval" => minval = v.clone(),
            "interval" => interval = Some(v.clone()),
            "repeat" | "repetitions" => {
                return Err(DasError::NotImp {
                    what: "Repeated sequence items".to_string(),
                })
            }
            other => log::warn!("Unknown attribute {} in <sequence>", other),
        }
    }
    let interval = interval.ok_or_else(|| DasError::Serial {
        msg: format!(
            "Interval not provided for <sequence> in dataset {:02}",
            pkt_id
        ),
    })?;
    var.seq = Some((minval, interval));
    Ok(())
}

fn commit_prop(ctx: &mut Ctx) -> Result<(), DasError> {
    let attrs = match ctx.prop_attrs.take() {
        Some(a) => a,
        None => return Ok(()),
    };
    let prop = das3_prop(&attrs, &ctx.prop_text)?;
    let ds = ctx.ds.as_mut().ok_or_else(|| DasError::Serial {
        msg: "Property outside of <dataset>".to_string(),
    })?;
    // Variable properties fold into their dimension's bag
    match &ctx.cur_dim {
        Some(dim_id) => {
            let dim = ds.get_dim_mut(dim_id).expect("open dimension exists");
            dim.props().borrow_mut().set(prop);
        }
        None => ds.props().borrow_mut().set(prop),
    }
    Ok(())
}

/// Everything is known once a variable element closes; build the array,
/// the variable and any codec in one go.
fn commit_var(ctx: &mut Ctx) -> Result<(), DasError> {
    let pkt_id = ctx.pkt_id;
    let var = ctx.var.take().ok_or_else(|| DasError::Serial {
        msg: "Variable close without open".to_string(),
    })?;
    let ds = ctx.ds.as_mut().ok_or_else(|| DasError::Serial {
        msg: "Variable outside of <dataset>".to_string(),
    })?;
    let dim_id = ctx.cur_dim.clone().expect("variable inside dimension");
    let rank = ds.rank();

    let semantic = var.semantic.ok_or_else(|| DasError::Serial {
        msg: format!(
            "Attribute 'semantic' not provided for a variable in dataset {}",
            pkt_id
        ),
    })?;
    let vunits = var.units.ok_or_else(|| DasError::Serial {
        msg: format!(
            "Attribute 'units' not provided for a variable in dataset {}",
            pkt_id
        ),
    })?;
    let role = var.role.unwrap_or(Role::Center);

    if var.index.len() != rank {
        return Err(DasError::Serial {
            msg: format!(
                "Variable index rank {} does not match dataset rank {}",
                var.index.len(),
                rank
            ),
        });
    }

    // Sequences carry no array at all
    if let Some((minval, interval)) = &var.seq {
        let axis = var
            .index
            .iter()
            .position(|t| *t != IdxTok::Unused)
            .ok_or_else(|| DasError::Serial {
                msg: "Sequence with no varying index".to_string(),
            })?;
        let intv: f64 = value::str2double(interval).ok_or_else(|| DasError::Serial {
            msg: format!("'{}' is not a sequence interval", interval),
        })?;
        let (start, intv) = if semantic == Semantic::Datetime {
            let dt = DasTime::parse(minval)?;
            // Bank the interval in seconds
            let scale = vunits.seconds_per_step().unwrap_or(1.0);
            (Value::Time(dt), intv * scale)
        } else {
            let m = value::str2double(minval).ok_or_else(|| DasError::Serial {
                msg: format!("'{}' is not a sequence start", minval),
            })?;
            (Value::Float64(m), intv)
        };
        let seq = Variable::sequence(start, intv, vunits, axis, rank)?;
        let dim = ds.get_dim_mut(&dim_id).expect("open dimension exists");
        dim.add_var(role, seq)?;
        return Ok(());
    }

    // Element type: explicit storage wins, else inferred from the wire
    let epoch = if semantic == Semantic::Datetime {
        Some(vunits)
    } else {
        None
    };
    let vt = match var.storage {
        Some(vt) => vt,
        None => match &var.pkt {
            Some(p) => value::store_type(p.encoding, p.item_bytes.max(1), semantic, epoch)?,
            None => match semantic {
                Semantic::Datetime => ValType::Time,
                Semantic::Text => ValType::UInt8,
                Semantic::Int => ValType::Int32,
                _ => ValType::Float64,
            },
        },
    };

    // Array geometry: mapped external extents first, then the internal
    // index for vectors and strings
    let mut ext_map = Vec::with_capacity(rank);
    let mut shape = Vec::new();
    let mut next_axis = 0usize;
    for (i, tok) in var.index.iter().enumerate() {
        match tok {
            IdxTok::Unused => ext_map.push(IdxMap::Unused),
            IdxTok::Any => {
                ext_map.push(IdxMap::Mapped(next_axis));
                next_axis += 1;
                shape.push(if i == 0 { 0 } else { ctx.ds_shape[i] });
            }
            IdxTok::Num(n) => {
                ext_map.push(IdxMap::Mapped(next_axis));
                next_axis += 1;
                shape.push(*n);
            }
        }
    }
    let is_string = semantic == Semantic::Text;
    if var.is_vector {
        shape.push(var.ncomp);
    } else if is_string {
        let w = var.pkt.as_ref().map(|p| p.item_bytes).unwrap_or(ITEM_TERM);
        shape.push(if w > 0 { w as usize + 1 } else { 0 });
    }
    // Header values fill their array by appending, so the leading extent
    // stays open and the value count defines it
    if var.values_text.is_some() && !shape.is_empty() {
        shape[0] = 0;
    }
    for (i, n) in shape.iter().enumerate() {
        if *n == 0 && i != 0 && i + 1 != shape.len() {
            return Err(DasError::Serial {
                msg: format!(
                    "Unbounded interior index in a variable of dataset {}",
                    pkt_id
                ),
            });
        }
    }

    let ary_id = format!("{}_{}", dim_id, role);
    let fill = match var.pkt.as_ref().and_then(|p| p.fill.as_ref()) {
        Some(f) => Some(value::from_str(vt, f)?),
        None => None,
    };
    let ary = DynArray::new(&ary_id, vt, fill, &shape, vunits)?;
    let ary = ary.into_ref();
    if is_string {
        ary.borrow_mut().set_usage(array::AS_STRING);
    }

    let variable = if var.is_vector {
        let (frame_id, dirs) = resolve_frame(ctx.stream, &ctx.cur_frame, &var)?;
        Variable::vector(
            Rc::clone(&ary),
            &ext_map,
            VecInfo {
                frame: ctx.cur_frame.clone().unwrap_or_default(),
                frame_id,
                sys: var.sys.unwrap_or(CoordSys::Cartesian),
                ncomp: var.ncomp,
                dirs,
            },
        )?
    } else {
        Variable::array(Rc::clone(&ary), &ext_map)?
    };

    ds.add_array(Rc::clone(&ary))?;

    if let Some(p) = &var.pkt {
        let mut codec = Codec::new_reader(
            Rc::clone(&ary),
            semantic,
            p.encoding,
            p.item_bytes,
            p.val_term.unwrap_or(0),
            epoch,
        )?;
        codec.set_eat_space(true);
        ds.push_codec(codec, p.num_items)?;
    }

    if let Some(text) = &var.values_text {
        // Header values: semicolon separated with free whitespace
        let mut codec =
            Codec::new_reader(Rc::clone(&ary), semantic, Encoding::Utf8, ITEM_TERM, b';', epoch)?;
        codec.set_eat_space(true);
        codec.decode(text.as_bytes(), None)?;
    }

    let dim = ds.get_dim_mut(&dim_id).expect("open dimension exists");
    dim.add_var(role, variable)?;
    Ok(())
}

/// Map a vector's frame name and `sysorder` to a frame id and direction
/// numbers.
fn resolve_frame(
    stream: &Stream,
    frame_name: &Option<String>,
    var: &VarCtx,
) -> Result<(u8, [u8; 4]), DasError> {
    let mut dirs = [0u8, 1, 2, 3];
    if let Some(order) = &var.sysorder {
        for (i, tok) in order.split(';').enumerate().take(4) {
            dirs[i] = tok.trim().parse().map_err(|_| DasError::Vec {
                msg: format!("'{}' is not a component order", order),
            })?;
        }
    }
    match frame_name {
        Some(name) => {
            let f = stream.frame_by_name(name).ok_or_else(|| DasError::Vec {
                msg: format!("Vector names undefined frame '{}'", name),
            })?;
            Ok((f.id(), dirs))
        }
        None => Ok((das_stream_core::frame::NO_FRAME, dirs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use das_stream_core::enums::StreamModel;
    use das_stream_core::AxisLen;

    fn das3_stream() -> Stream {
        Stream::new(StreamModel::V3)
    }

    const SWEEP: &[u8] = br#"<dataset name="sweep" rank="2" index="*;4">
      <properties>
        <p name="title">Electric sweep</p>
      </properties>
      <coord name="time" axis="x">
        <scalar use="center" semantic="datetime" storage="double" units="us2000" index="*;-">
          <packet numItems="1" encoding="LEreal" itemBytes="8"/>
        </scalar>
      </coord>
      <coord name="frequency" axis="y">
        <scalar use="center" semantic="real" units="Hz" index="-;4">
          <values>10.0; 20.0; 30.0; 40.0</values>
        </scalar>
      </coord>
      <data name="amplitude">
        <scalar use="center" semantic="real" units="V m**-1" index="*;4">
          <packet numItems="4" encoding="LEreal" itemBytes="4" fill="-1.0e31"/>
        </scalar>
      </data>
    </dataset>"#;

    #[test]
    fn parse_rank2_sweep() {
        let stream = das3_stream();
        let mut ds = parse_dataset_header(&stream, 2, SWEEP).unwrap();
        assert_eq!(ds.rank(), 2);
        assert_eq!(ds.id(), "sweep");
        assert_eq!(ds.props().borrow().get_str("title").unwrap(), "Electric sweep");

        // The inline values are in place before any packet arrives
        let freq = ds.get_dim("frequency").unwrap().point_var().unwrap();
        let mut loc = [0usize; das_stream_core::IDX_MAX];
        loc[1] = 2;
        assert_eq!(freq.get(&loc).unwrap().to_f64().unwrap(), 30.0);

        assert_eq!(ds.rec_bytes(), Some(8 + 16));

        let mut payload = Vec::new();
        payload.extend_from_slice(&0.0f64.to_le_bytes());
        for v in [1.0f32, 2.0, 4.0, 8.0] {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        ds.decode_data(&payload).unwrap();
        let amp = ds.get_dim("amplitude").unwrap().point_var().unwrap();
        loc[0] = 0;
        loc[1] = 3;
        assert_eq!(amp.get(&loc).unwrap().to_f64().unwrap(), 8.0);

        let (shape, _) = ds.shape();
        assert_eq!(shape[1], AxisLen::Size(4));
    }

    #[test]
    fn sequence_coordinate() {
        let xml = br#"<dataset name="wav" rank="2" index="*;512">
          <coord name="offset">
            <scalar use="center" semantic="real" units="s" index="-;*">
              <sequence minval="0.0" interval="2.0e-6"/>
            </scalar>
          </coord>
          <data name="e_field">
            <scalar use="center" semantic="real" units="mV m**-1" index="*;512">
              <packet numItems="512" encoding="LEreal" itemBytes="4"/>
            </scalar>
          </data>
        </dataset>"#;
        let stream = das3_stream();
        let ds = parse_dataset_header(&stream, 1, xml).unwrap();
        let off = ds.get_dim("offset").unwrap().point_var().unwrap();
        let mut loc = [0usize; das_stream_core::IDX_MAX];
        loc[1] = 3;
        let d = off.get(&loc).unwrap();
        assert!((d.to_f64().unwrap() - 6.0e-6).abs() < 1e-16);
    }

    #[test]
    fn vector_needs_components() {
        let xml = br#"<dataset name="b" rank="1" index="*">
          <data name="b_gsm" frame="gsm">
            <vector use="center" semantic="real" units="nT" index="*">
              <packet numItems="3" encoding="BEreal" itemBytes="4"/>
            </vector>
          </data>
        </dataset>"#;
        let stream = das3_stream();
        let err = parse_dataset_header(&stream, 1, xml).unwrap_err();
        assert!(matches!(err, DasError::Vec { .. }));
    }

    #[test]
    fn vector_with_frame() {
        let mut stream = das3_stream();
        stream
            .add_frame(
                das_stream_core::frame::Frame::new(1, "gsm", CoordSys::Cartesian).unwrap(),
            )
            .unwrap();
        let xml = br#"<dataset name="b" rank="1" index="*">
          <data name="b_gsm" frame="gsm">
            <vector use="center" semantic="real" units="nT" index="*"
                    components="3" system="cartesian" sysorder="0;1;2">
              <packet numItems="3" encoding="BEreal" itemBytes="4"/>
            </vector>
          </data>
        </dataset>"#;
        let mut ds = parse_dataset_header(&stream, 1, xml).unwrap();

        let mut payload = Vec::new();
        for v in [1.0f32, -2.0, 0.5] {
            payload.extend_from_slice(&v.to_be_bytes());
        }
        ds.decode_data(&payload).unwrap();

        let b = ds.get_dim("b_gsm").unwrap().point_var().unwrap();
        let loc = [0usize; das_stream_core::IDX_MAX];
        match b.get(&loc).unwrap().value {
            Value::GeoVec(g) => {
                assert_eq!(g.ncomp, 3);
                assert_eq!(g.frame_id, 1);
                assert_eq!(g.components, [1.0, -2.0, 0.5]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn missing_semantic_is_sticky_error() {
        let xml = br#"<dataset name="x" rank="1" index="*">
          <coord name="t"><scalar use="center" units="s" index="*">
            <packet numItems="1" encoding="LEreal" itemBytes="8"/>
          </scalar></coord>
        </dataset>"#;
        let stream = das3_stream();
        assert!(parse_dataset_header(&stream, 1, xml).is_err());
    }
}
