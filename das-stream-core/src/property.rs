//! Single metadata properties: a name, a semantic type, and a string value.

use crate::enums::PropType;
use crate::units::{self, Units};

/// One named metadata item attached to a descriptor.
///
/// Values are kept in their string form and parsed on demand by the typed
/// getters on [`crate::descriptor::Properties`]. Multi-valued properties
/// carry a separator byte; properties never carry fill values.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub(crate) name: String,
    pub(crate) ptype: PropType,
    pub(crate) value: String,
    pub(crate) units: Units,
    /// Separator between entries of a list-valued property.
    pub(crate) sep: Option<char>,
    /// Cleared instead of removing the record, so iteration stays stable.
    pub(crate) valid: bool,
}

impl Property {
    pub fn new(ptype: PropType, name: &str, value: &str) -> Self {
        Property {
            name: name.to_string(),
            ptype,
            value: value.to_string(),
            units: units::DIMENSIONLESS,
            sep: None,
            valid: true,
        }
    }

    pub fn with_units(mut self, units: Units) -> Self {
        self.units = units;
        self
    }

    pub fn with_sep(mut self, sep: char) -> Self {
        self.sep = Some(sep);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prop_type(&self) -> PropType {
        self.ptype
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn units(&self) -> Units {
        self.units
    }

    pub fn sep(&self) -> Option<char> {
        self.sep
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// How many CDF attribute entries this property expands to: one per
    /// separator-delimited item for list-typed string properties, otherwise
    /// one.
    /// ```
    /// use das_stream_core::enums::PropType;
    /// use das_stream_core::property::Property;
    ///
    /// let p = Property::new(PropType::Str, "labels", "Bx|By|Bz").with_sep('|');
    /// assert_eq!(p.cdf_entries(), 3);
    /// let q = Property::new(PropType::Str, "title", "Magnetic field");
    /// assert_eq!(q.cdf_entries(), 1);
    /// ```
    pub fn cdf_entries(&self) -> usize {
        match (self.ptype, self.sep) {
            (PropType::Str, Some(sep)) => self.value.matches(sep).count() + 1,
            _ => 1,
        }
    }

    /// Split a list-valued property into its entries. Single-valued
    /// properties yield themselves whole.
    pub fn entries(&self) -> Vec<&str> {
        match self.sep {
            Some(sep) => self.value.split(sep).map(str::trim).collect(),
            None => vec![self.value.as_str()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cdf_entries_counts_separators() {
        let p = Property::new(PropType::Str, "notes", "a;b;;d").with_sep(';');
        assert_eq!(p.cdf_entries(), 4);
        assert_eq!(p.entries(), vec!["a", "b", "", "d"]);

        // Non-string lists still report a single entry
        let p = Property::new(PropType::Real, "coeffs", "1;2;3").with_sep(';');
        assert_eq!(p.cdf_entries(), 1);
    }
}
