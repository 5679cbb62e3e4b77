//! Small shared helpers over the quick-xml event API.

use quick_xml::events::BytesStart;
use quick_xml::Reader;

use das_stream_core::descriptor::Properties;
use das_stream_core::enums::PropType;
use das_stream_core::errors::*;
use das_stream_core::property::Property;
use das_stream_core::units::Units;

pub(crate) fn xml_err(e: quick_xml::Error) -> DasError {
    DasError::Serial {
        msg: format!("XML error: {}", e),
    }
}

/// Collect an element's attributes as owned (name, value) pairs.
pub(crate) fn attrs_of<B: std::io::BufRead>(
    e: &BytesStart,
    reader: &Reader<B>,
) -> Result<Vec<(String, String)>, DasError> {
    let mut out = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| DasError::Serial {
            msg: format!("Bad attribute: {}", e),
        })?;
        let key = String::from_utf8_lossy(attr.key).into_owned();
        let val = attr
            .unescape_and_decode_value(reader)
            .map_err(xml_err)?;
        out.push((key, val));
    }
    Ok(out)
}

/// Parse a legacy attribute-style `<properties>` element, where each
/// attribute is `name="value"` or `Type:name="value"`.
pub(crate) fn legacy_props_into(
    attrs: &[(String, String)],
    props: &mut Properties,
) -> Result<(), DasError> {
    for (key, val) in attrs {
        if key.starts_with("xmlns") {
            continue;
        }
        let (ptype, name) = match key.split_once(':') {
            Some((t, n)) => (PropType::from_str(t)?, n),
            None => (PropType::Str, key.as_str()),
        };
        props.set(Property::new(ptype, name, val));
    }
    Ok(())
}

/// Build a property from a das3 `<p>` element's attributes plus its text.
pub(crate) fn das3_prop(
    attrs: &[(String, String)],
    text: &str,
) -> Result<Property, DasError> {
    let mut name = None;
    let mut ptype = PropType::Str;
    let mut units = None;
    let mut sep = None;
    for (key, val) in attrs {
        match key.as_str() {
            "name" => name = Some(val.clone()),
            "type" => ptype = PropType::from_str(val)?,
            "units" => units = Some(Units::from_str(val)),
            "sep" => sep = val.chars().next(),
            other => log::warn!("Unknown attribute {} in <p>", other),
        }
    }
    let name = name.ok_or_else(|| DasError::Serial {
        msg: "<p> element with no name".to_string(),
    })?;
    let mut p = Property::new(ptype, &name, text.trim());
    if let Some(u) = units {
        p = p.with_units(u);
    }
    if let Some(s) = sep {
        p = p.with_sep(s);
    }
    Ok(p)
}
