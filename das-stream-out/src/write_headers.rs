//! Emitting das3 XML headers for streams and datasets.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use das_stream_core::codec::{Codec, ITEM_TERM};
use das_stream_core::dataset::Dataset;
use das_stream_core::descriptor::Properties;
use das_stream_core::dimension::Dimension;
use das_stream_core::enums::{DimType, Encoding, Role, Semantic, ValType};
use das_stream_core::errors::*;
use das_stream_core::stream::Stream;
use das_stream_core::units;
use das_stream_core::value::Value;
use das_stream_core::variable::Variable;
use das_stream_core::{AxisLen, IdxMap};

type XmlWriter = Writer<Vec<u8>>;

fn werr(e: quick_xml::Error) -> DasError {
    DasError::Serial {
        msg: format!("XML write error: {}", e),
    }
}

fn start<'a>(name: &'a str, attrs: &[(&str, String)]) -> BytesStart<'a> {
    let mut el = BytesStart::borrowed_name(name.as_bytes());
    for (k, v) in attrs {
        el.push_attribute((*k, v.as_str()));
    }
    el
}

fn empty_el(w: &mut XmlWriter, name: &str, attrs: &[(&str, String)]) -> Result<(), DasError> {
    w.write_event(Event::Empty(start(name, attrs))).map_err(werr)
}

fn open_el(w: &mut XmlWriter, name: &str, attrs: &[(&str, String)]) -> Result<(), DasError> {
    w.write_event(Event::Start(start(name, attrs))).map_err(werr)
}

fn close_el(w: &mut XmlWriter, name: &str) -> Result<(), DasError> {
    w.write_event(Event::End(BytesEnd::borrowed(name.as_bytes())))
        .map_err(werr)
}

fn text_el(w: &mut XmlWriter, text: &str) -> Result<(), DasError> {
    w.write_event(Event::Text(BytesText::from_plain_str(text)))
        .map_err(werr)
}

fn write_props(w: &mut XmlWriter, props: &Properties) -> Result<(), DasError> {
    if props.is_empty() {
        return Ok(());
    }
    open_el(w, "properties", &[])?;
    for p in props.iter() {
        let mut attrs: Vec<(&str, String)> = vec![("name", p.name().to_string())];
        if p.prop_type() != das_stream_core::enums::PropType::Str {
            attrs.push(("type", p.prop_type().as_str().to_string()));
        }
        if p.units() != units::DIMENSIONLESS {
            attrs.push(("units", p.units().to_string()));
        }
        if let Some(s) = p.sep() {
            attrs.push(("sep", s.to_string()));
        }
        open_el(w, "p", &attrs)?;
        text_el(w, p.value())?;
        close_el(w, "p")?;
    }
    close_el(w, "properties")
}

/// Serialize the `<stream>` envelope: stream properties then frame
/// definitions.
pub fn stream_header_xml(stream: &Stream) -> Result<Vec<u8>, DasError> {
    let mut w = Writer::new_with_indent(Vec::new(), b' ', 2);
    open_el(
        &mut w,
        "stream",
        &[
            ("type", "das-basic-stream".to_string()),
            ("version", "3.0".to_string()),
        ],
    )?;
    write_props(&mut w, &stream.props().borrow())?;
    for f in stream.frames() {
        let mut attrs: Vec<(&str, String)> = vec![
            ("name", f.name().to_string()),
            ("id", f.id().to_string()),
            ("system", f.coord_sys().as_str().to_string()),
        ];
        if !f.body().is_empty() {
            attrs.push(("body", f.body().to_string()));
        }
        if f.is_inertial() {
            attrs.push(("inertial", "true".to_string()));
        }
        if f.dirs().is_empty() && f.props().borrow().is_empty() {
            empty_el(&mut w, "frame", &attrs)?;
        } else {
            open_el(&mut w, "frame", &attrs)?;
            write_props(&mut w, &f.props().borrow())?;
            for d in f.dirs() {
                empty_el(&mut w, "dir", &[("name", d.clone())])?;
            }
            close_el(&mut w, "frame")?;
        }
    }
    close_el(&mut w, "stream")?;
    Ok(w.into_inner())
}

/// The `index` attribute of a whole dataset: the record axis is open, the
/// rest report the agreed extents.
fn dataset_index(ds: &Dataset) -> String {
    let (shape, rank) = ds.shape();
    let mut toks = Vec::with_capacity(rank);
    for (i, s) in shape.iter().enumerate().take(rank) {
        let tok = if i == 0 {
            "*".to_string()
        } else {
            match s {
                AxisLen::Size(n) => n.to_string(),
                _ => "*".to_string(),
            }
        };
        toks.push(tok);
    }
    toks.join(";")
}

/// Serialize one `<dataset>` header: inherited properties first, then the
/// coordinate dimensions, then the data dimensions.
pub fn dataset_header_xml(ds: &Dataset) -> Result<Vec<u8>, DasError> {
    let mut w = Writer::new_with_indent(Vec::new(), b' ', 2);
    open_el(
        &mut w,
        "dataset",
        &[
            ("name", ds.id().to_string()),
            ("group", ds.group().to_string()),
            ("rank", ds.rank().to_string()),
            ("index", dataset_index(ds)),
        ],
    )?;
    write_props(&mut w, &ds.props().borrow())?;
    for dim in ds.dims_of(DimType::Coord) {
        write_dim(&mut w, ds, dim, "coord")?;
    }
    for dim in ds.dims_of(DimType::Data) {
        write_dim(&mut w, ds, dim, "data")?;
    }
    close_el(&mut w, "dataset")?;
    Ok(w.into_inner())
}

fn write_dim(
    w: &mut XmlWriter,
    ds: &Dataset,
    dim: &Dimension,
    el_name: &str,
) -> Result<(), DasError> {
    let mut attrs: Vec<(&str, String)> = vec![("name", dim.id().to_string())];
    if !dim.axes().is_empty() {
        attrs.push(("axis", dim.axes()));
    }
    if let Some(f) = dim.frame() {
        attrs.push(("frame", f.to_string()));
    }
    open_el(w, el_name, &attrs)?;
    write_props(w, &dim.props().borrow())?;
    for (role, var) in dim.iter_vars() {
        write_var(w, ds, role, var)?;
    }
    close_el(w, el_name)
}

/// The `index` attribute of one variable.
fn var_index(ds: &Dataset, var: &Variable) -> String {
    let rank = ds.rank();
    let mut toks = vec!["-".to_string(); rank];
    match var {
        Variable::Sequence(_) => {
            let shape = var.shape();
            for (i, tok) in toks.iter_mut().enumerate() {
                if shape[i] == AxisLen::Func {
                    *tok = "*".to_string();
                }
            }
        }
        Variable::Array(_) => {
            let map = var.index_map().expect("array variables have maps");
            let ary = var.backing_array().expect("array variables have arrays");
            let a = ary.borrow();
            for (i, tok) in toks.iter_mut().enumerate().take(rank) {
                if let IdxMap::Mapped(ax) = map[i] {
                    let d = a.declared(ax);
                    *tok = if d == 0 { "*".to_string() } else { d.to_string() };
                }
            }
        }
        _ => {}
    }
    toks.join(";")
}

/// The codec registered for an array, if any.
fn codec_for<'a>(ds: &'a Dataset, ary_id: &str) -> Option<(&'a Codec, Option<usize>)> {
    ds.codecs()
        .iter()
        .find(|e| e.codec.array().borrow().id() == ary_id)
        .map(|e| (&e.codec, e.items))
}

/// Serialize one variable. Derived variables (the virtual
/// `center = reference + offset`) are not written; readers reconstruct
/// them from their operands.
fn write_var(
    w: &mut XmlWriter,
    ds: &Dataset,
    role: Role,
    var: &Variable,
) -> Result<(), DasError> {
    match var {
        Variable::Unary(_) | Variable::Binary(_) => return Ok(()),
        _ => {}
    }

    let is_vector = var.vec_info().is_some();
    let el_name = if is_vector { "vector" } else { "scalar" };

    let (semantic, storage) = if let Some(ary) = var.backing_array() {
        let (vt, ary_id) = {
            let b = ary.borrow();
            (b.val_type(), b.id().to_string())
        };
        let semantic = match codec_for(ds, &ary_id) {
            Some((c, _)) => c.semantic(),
            None => Semantic::default_for(vt),
        };
        (semantic, Some(vt))
    } else if let Some((start, _, _)) = var.as_sequence() {
        match start.val_type() {
            ValType::Time => (Semantic::Datetime, None),
            _ => (Semantic::Real, None),
        }
    } else {
        let d = var.as_const().expect("constant is the only case left");
        (Semantic::default_for(d.value.val_type()), None)
    };

    let mut attrs: Vec<(&str, String)> = vec![
        ("use", role.to_string()),
        ("semantic", semantic.to_string()),
        ("units", var.units().to_string()),
        ("index", var_index(ds, var)),
    ];
    if let Some(vt) = storage {
        attrs.push(("storage", vt.as_str().to_string()));
    }
    if let Some(vec) = var.vec_info() {
        attrs.push(("components", vec.ncomp.to_string()));
        attrs.push(("system", vec.sys.to_string()));
        let order: Vec<String> = vec.dirs[..vec.ncomp]
            .iter()
            .map(|d| d.to_string())
            .collect();
        attrs.push(("sysorder", order.join(";")));
    }

    open_el(w, el_name, &attrs)?;

    if let Some((start, interval, _)) = var.as_sequence() {
        // Datetime intervals are banked in seconds; emit them back in the
        // declared units so a re-parse scales identically
        let (minval, interval) = match start {
            Value::Time(t) => {
                let scale = var.units().seconds_per_step().unwrap_or(1.0);
                (t.to_string(), interval / scale)
            }
            other => (other.to_string(), interval),
        };
        empty_el(
            w,
            "sequence",
            &[("minval", minval), ("interval", interval.to_string())],
        )?;
    } else if let Some(d) = var.as_const() {
        open_el(w, "values", &[])?;
        text_el(w, &d.value.to_string())?;
        close_el(w, "values")?;
    } else {
        let ary = var.backing_array().expect("array variables have arrays");
        let ary_id = ary.borrow().id().to_string();
        match codec_for(ds, &ary_id) {
            Some((codec, items)) => {
                let mut pk: Vec<(&str, String)> = vec![
                    (
                        "numItems",
                        items.map(|n| n.to_string()).unwrap_or_else(|| "*".to_string()),
                    ),
                    ("encoding", codec.encoding().to_string()),
                    (
                        "itemBytes",
                        if codec.item_bytes() > 0 {
                            codec.item_bytes().to_string()
                        } else {
                            "*".to_string()
                        },
                    ),
                ];
                if codec.item_bytes() == ITEM_TERM {
                    let sep = if codec.sep() != 0 { codec.sep() } else { b';' };
                    pk.push(("valTerm", (sep as char).to_string()));
                }
                empty_el(w, "packet", &pk)?;
            }
            None => {
                // Header-only values: print the whole array inline
                open_el(w, "values", &[])?;
                let mut writer_codec = Codec::new_writer(
                    ary,
                    semantic,
                    Encoding::Utf8,
                    ITEM_TERM,
                    b';',
                    None,
                    None,
                )?;
                let mut text = Vec::new();
                writer_codec.encode(&mut text, &[], None, das_stream_core::codec::ENC_IN_HDR)?;
                let text = String::from_utf8_lossy(&text).into_owned();
                let trimmed = text
                    .trim_end_matches(|c| c == ';' || c == ' ' || c == '\n')
                    .trim();
                text_el(w, trimmed)?;
                close_el(w, "values")?;
            }
        }
    }

    close_el(w, el_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use das_stream_core::enums::StreamModel;

    #[test]
    fn stream_envelope_renders() {
        let mut s = Stream::new(StreamModel::V3);
        s.props().borrow_mut().set_str("title", "Test & sample");
        let xml = stream_header_xml(&s).unwrap();
        let text = String::from_utf8(xml).unwrap();
        assert!(text.starts_with("<stream"));
        assert!(text.contains("version=\"3.0\""));
        // Reserved characters must be escaped
        assert!(text.contains("Test &amp; sample"));
    }
}
