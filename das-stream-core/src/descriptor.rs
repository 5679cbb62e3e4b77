//! Property containers with inherited lookup.
//!
//! Everything that owns metadata (stream, dataset, dimension) holds a
//! [`Properties`] bag. Bags are chained upward: a lookup that misses locally
//! walks the parent chain, so a dimension sees its dataset's properties and
//! a dataset sees the stream's. The chain is one-directional, parents never
//! reach down, so shared handles cannot form a cycle.

use std::cell::RefCell;
use std::rc::Rc;

use crate::enums::PropType;
use crate::errors::*;
use crate::property::Property;
use crate::time::DasTime;
use crate::units::{self, Units};
use crate::value::{self, Datum, Value};

/// Shared handle to a property bag.
pub type PropRef = Rc<RefCell<Properties>>;

/// An ordered property container.
///
/// Removal tombstones the record in place rather than compacting, so
/// positions observed by an iterator stay meaningful while edits happen.
#[derive(Debug, Default)]
pub struct Properties {
    items: Vec<Property>,
    invalid: usize,
    parent: Option<PropRef>,
}

impl Properties {
    pub fn new() -> PropRef {
        Rc::new(RefCell::new(Properties::default()))
    }

    pub fn with_parent(parent: &PropRef) -> PropRef {
        let mut p = Properties::default();
        p.parent = Some(Rc::clone(parent));
        Rc::new(RefCell::new(p))
    }

    pub fn set_parent(&mut self, parent: &PropRef) {
        self.parent = Some(Rc::clone(parent));
    }

    /// Add or replace a property. Replacement reuses the existing record
    /// slot so positions stay stable.
    pub fn set(&mut self, prop: Property) {
        if let Some(slot) = self
            .items
            .iter_mut()
            .find(|p| p.valid && p.name == prop.name)
        {
            *slot = prop;
            return;
        }
        self.items.push(prop);
    }

    /// Shorthand for a plain string property.
    pub fn set_str(&mut self, name: &str, value: &str) {
        self.set(Property::new(PropType::Str, name, value));
    }

    /// Tombstone a property. Returns whether anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        match self.items.iter_mut().find(|p| p.valid && p.name == name) {
            Some(p) => {
                p.valid = false;
                self.invalid += 1;
                true
            }
            None => false,
        }
    }

    /// Number of live properties, local only.
    pub fn len(&self) -> usize {
        self.items.len() - self.invalid
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tombstoned record count, for storage diagnostics.
    pub fn invalid_count(&self) -> usize {
        self.invalid
    }

    /// Iterate the live local properties in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.items.iter().filter(|p| p.valid)
    }

    /// Local lookup only, no parent walk.
    pub fn get_local(&self, name: &str) -> Option<Property> {
        self.items
            .iter()
            .find(|p| p.valid && p.name == name)
            .cloned()
    }

    /// Inherited lookup: local records first, then up the parent chain.
    pub fn get(&self, name: &str) -> Option<Property> {
        if let Some(p) = self.get_local(name) {
            return Some(p);
        }
        let parent = self.parent.as_ref()?;
        let found = parent.borrow().get(name);
        found
    }

    pub fn get_str(&self, name: &str) -> Option<String> {
        self.get(name).map(|p| p.value)
    }

    pub fn get_double(&self, name: &str) -> Option<f64> {
        value::str2double(&self.get(name)?.value)
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        value::str2int(&self.get(name)?.value)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        value::str2bool(&self.get(name)?.value)
    }

    /// Parse a property as a value with units.
    ///
    /// A bare number takes the property's units. A value containing `:` or a
    /// date-like `T` with no declared units is treated as UTC.
    pub fn get_datum(&self, name: &str) -> Result<Datum, DasError> {
        let p = self.get(name).ok_or_else(|| DasError::Desc {
            msg: format!("No property named '{}'", name),
        })?;
        parse_datum(&p.value, p.units)
    }

    /// Parse a `min to max` range property into two datums.
    pub fn get_datum_range(&self, name: &str) -> Result<(Datum, Datum), DasError> {
        let p = self.get(name).ok_or_else(|| DasError::Desc {
            msg: format!("No property named '{}'", name),
        })?;
        let (lo, hi) = p.value.split_once(" to ").ok_or_else(|| DasError::Desc {
            msg: format!("Property '{}' is not a range: '{}'", name, p.value),
        })?;
        // Units, if any, trail the second value
        let hi = hi.trim();
        let (hi_val, unit_txt) = split_trailing_units(hi);
        let u = if unit_txt.is_empty() {
            p.units
        } else {
            Units::from_str(unit_txt)
        };
        Ok((parse_datum(lo.trim(), u)?, parse_datum(hi_val, u)?))
    }

    /// Split a list-valued string property into owned entries.
    pub fn get_str_list(&self, name: &str) -> Vec<String> {
        match self.get(name) {
            Some(p) => p.entries().into_iter().map(String::from).collect(),
            None => Vec::new(),
        }
    }
}

fn looks_like_time(s: &str) -> bool {
    s.contains(':')
        || (s.len() > 4 && s[..4].bytes().all(|b| b.is_ascii_digit()) && s.contains('-'))
}

fn split_trailing_units(s: &str) -> (&str, &str) {
    match s.find(|c: char| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
        Some(i) if i > 0 => (s[..i].trim(), s[i..].trim()),
        _ => (s, ""),
    }
}

/// The bare-number-vs-time heuristic shared by the datum getters.
pub fn parse_datum(text: &str, declared: Units) -> Result<Datum, DasError> {
    let s = text.trim();
    if declared == units::UTC || (declared == units::DIMENSIONLESS && looks_like_time(s)) {
        let dt = DasTime::parse(s)?;
        return Ok(Datum::new(Value::Time(dt), units::UTC));
    }
    let (num, unit_txt) = split_trailing_units(s);
    let v = value::str2double(num).ok_or_else(|| DasError::Value {
        msg: format!("'{}' is neither a number nor a time", s),
    })?;
    let u = if unit_txt.is_empty() {
        declared
    } else {
        Units::from_str(unit_txt)
    };
    Ok(Datum::new(Value::Float64(v), u))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tombstone_removal_keeps_positions() {
        let props = Properties::new();
        {
            let mut p = props.borrow_mut();
            p.set_str("title", "Survey");
            p.set_str("source", "preflight");
            p.set_str("label", "E");
            assert!(p.remove("source"));
            assert!(!p.remove("source"));
            assert_eq!(p.len(), 2);
            assert_eq!(p.invalid_count(), 1);
        }
        let p = props.borrow();
        let names: Vec<&str> = p.iter().map(|x| x.name()).collect();
        assert_eq!(names, vec!["title", "label"]);
    }

    #[test]
    fn inherited_lookup_walks_parents() {
        let stream = Properties::new();
        stream.borrow_mut().set_str("instrument", "WBR");
        let ds = Properties::with_parent(&stream);
        ds.borrow_mut().set_str("title", "High rate");

        let d = ds.borrow();
        assert_eq!(d.get_str("title").unwrap(), "High rate");
        assert_eq!(d.get_str("instrument").unwrap(), "WBR");
        assert!(d.get_str("nope").is_none());
        // Parent lookup does not leak down
        assert!(stream.borrow().get_str("title").is_none());
    }

    #[test]
    fn typed_getters() {
        let props = Properties::new();
        {
            let mut p = props.borrow_mut();
            p.set(Property::new(PropType::Real, "zFill", "-1.0e31"));
            p.set(Property::new(PropType::Int, "nitems", "512"));
            p.set(Property::new(PropType::Bool, "monotonic", "true"));
        }
        let p = props.borrow();
        assert_eq!(p.get_double("zFill").unwrap(), -1.0e31);
        assert_eq!(p.get_int("nitems").unwrap(), 512);
        assert_eq!(p.get_bool("monotonic").unwrap(), true);
    }

    #[test]
    fn datum_heuristics() {
        let props = Properties::new();
        {
            let mut p = props.borrow_mut();
            p.set(Property::new(PropType::Datum, "xTagWidth", "0.5 s"));
            p.set(Property::new(PropType::Datum, "start", "2020-01-01T12:00:00"));
            p.set(
                Property::new(PropType::DatumRange, "xRange", "10.0 to 600.0 kHz"),
            );
        }
        let p = props.borrow();
        let d = p.get_datum("xTagWidth").unwrap();
        assert_eq!(d.units, units::SECONDS);
        assert_eq!(d.to_f64().unwrap(), 0.5);

        let t = p.get_datum("start").unwrap();
        assert_eq!(t.units, units::UTC);
        match t.value {
            Value::Time(dt) => assert_eq!(dt.hour, 12),
            _ => panic!("expected a time"),
        }

        let (lo, hi) = p.get_datum_range("xRange").unwrap();
        assert_eq!(lo.units, units::KILOHERTZ);
        assert_eq!(lo.to_f64().unwrap(), 10.0);
        assert_eq!(hi.to_f64().unwrap(), 600.0);
    }
}
