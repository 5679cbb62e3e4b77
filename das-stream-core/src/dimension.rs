//! Physical dimensions: groups of variables playing named roles.

use crate::descriptor::{PropRef, Properties};
use crate::enums::{DimType, Role};
use crate::errors::*;
use crate::property::Property;
use crate::value::Op;
use crate::variable::Variable;
use crate::{AxisLen, Shape, SHAPE_EMPTY};

/// One physical dimension of a dataset: either a coordinate (time,
/// frequency, ...) or a data quantity (spectral density, counts, ...).
///
/// Each member variable is registered under a [`Role`]; at most one variable
/// per role. Properties inherit from the owning dataset.
#[derive(Debug)]
pub struct Dimension {
    dtype: DimType,
    id: String,
    /// Plot axes this dimension is intended for, e.g. `x` or `yz`.
    axes: Vec<char>,
    /// Coordinate frame name for vector-valued dimensions.
    frame: Option<String>,
    props: PropRef,
    vars: Vec<(Role, Variable)>,
}

impl Dimension {
    pub fn new(dtype: DimType, id: &str) -> Dimension {
        Dimension {
            dtype,
            id: id.to_string(),
            axes: Vec::new(),
            frame: None,
            props: Properties::new(),
            vars: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dim_type(&self) -> DimType {
        self.dtype
    }

    pub fn props(&self) -> &PropRef {
        &self.props
    }

    pub fn set_axes(&mut self, axes: &str) {
        self.axes = axes.chars().collect();
    }

    pub fn axes(&self) -> String {
        self.axes.iter().collect()
    }

    pub fn set_frame(&mut self, frame: &str) {
        self.frame = Some(frame.to_string());
    }

    pub fn frame(&self) -> Option<&str> {
        self.frame.as_deref()
    }

    /// Register a variable under a role. Fails on collision so callers can
    /// spot duplicate `use` attributes in headers.
    pub fn add_var(&mut self, role: Role, var: Variable) -> Result<(), DasError> {
        if self.vars.iter().any(|(r, _)| *r == role) {
            return Err(DasError::Dim {
                msg: format!("Dimension {} already has a '{}' variable", self.id, role),
            });
        }
        self.vars.push((role, var));
        Ok(())
    }

    pub fn get_var(&self, role: Role) -> Option<&Variable> {
        self.vars.iter().find(|(r, _)| *r == role).map(|(_, v)| v)
    }

    /// Remove and return a variable, e.g. to re-register it under another
    /// role during legacy upgrades.
    pub fn pop_var(&mut self, role: Role) -> Option<Variable> {
        let at = self.vars.iter().position(|(r, _)| *r == role)?;
        Some(self.vars.remove(at).1)
    }

    pub fn iter_vars(&self) -> impl Iterator<Item = (Role, &Variable)> {
        self.vars.iter().map(|(r, v)| (*r, v))
    }

    pub fn var_count(&self) -> usize {
        self.vars.len()
    }

    /// The variable that locates points along this dimension: the `center`
    /// variable if present, else a virtual `reference + offset`.
    pub fn point_var(&self) -> Result<Variable, DasError> {
        if let Some(v) = self.get_var(Role::Center) {
            return Ok(v.clone());
        }
        match (self.get_var(Role::Reference), self.get_var(Role::Offset)) {
            (Some(r), Some(o)) => Variable::binary(r.clone(), Op::Add, o.clone()),
            _ => Err(DasError::Dim {
                msg: format!(
                    "Dimension {} has neither a center nor reference + offset",
                    self.id
                ),
            }),
        }
    }

    /// Index-wise union of the member variables' shapes.
    pub fn shape(&self, rank: usize) -> Shape {
        let mut out = SHAPE_EMPTY;
        for (_, v) in &self.vars {
            let s = v.shape();
            crate::shape_merge(&mut out, &s, rank);
        }
        out
    }

    /// Merge of the member variables' extents below a prefix.
    pub fn length_in(&self, prefix: &[usize]) -> AxisLen {
        let mut out = AxisLen::Unused;
        for (_, v) in &self.vars {
            out = out.merge(v.length_in(prefix));
        }
        out
    }

    /// Import legacy axis-prefixed properties: `yLabel` on a source
    /// descriptor lands here as `label`, with the post-prefix letter
    /// lower-cased. Later imports overwrite earlier ones, so call in
    /// stream → packet → plane order.
    pub fn copy_in_props(&mut self, axis: char, source: &Properties) -> usize {
        let mut copied = 0;
        for p in source.iter() {
            let name = p.name();
            let mut chars = name.chars();
            if chars.next() != Some(axis) {
                continue;
            }
            let rest: String = chars.collect();
            if rest.is_empty() {
                continue;
            }
            let mut renamed = String::with_capacity(rest.len());
            let mut rc = rest.chars();
            if let Some(first) = rc.next() {
                renamed.extend(first.to_lowercase());
            }
            renamed.extend(rc);

            let mut np = Property::new(p.prop_type(), &renamed, p.value()).with_units(p.units());
            if let Some(sep) = p.sep() {
                np = np.with_sep(sep);
            }
            self.props.borrow_mut().set(np);
            copied += 1;
        }
        copied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::DynArray;
    use crate::enums::{PropType, ValType};
    use crate::units;
    use crate::value::{Datum, Value};
    use crate::IdxMap;

    fn center_var() -> Variable {
        let a = DynArray::new("t", ValType::Float64, None, &[0], units::US2000)
            .unwrap()
            .into_ref();
        a.borrow_mut().append(Some(&5.0f64.to_ne_bytes()), 1).unwrap();
        Variable::array(a, &[IdxMap::Mapped(0)]).unwrap()
    }

    #[test]
    fn role_collision_rejected() {
        let mut d = Dimension::new(DimType::Coord, "time");
        d.add_var(Role::Center, center_var()).unwrap();
        let err = d.add_var(Role::Center, center_var()).unwrap_err();
        assert!(matches!(err, DasError::Dim { .. }));
    }

    #[test]
    fn point_var_synthesizes_center() {
        let mut d = Dimension::new(DimType::Coord, "time");
        d.add_var(
            Role::Reference,
            Variable::constant(Datum::new(Value::Float64(100.0), units::US2000), 1),
        )
        .unwrap();
        d.add_var(
            Role::Offset,
            Variable::constant(Datum::new(Value::Float64(7.0), units::MICROSECONDS), 1),
        )
        .unwrap();
        let v = d.point_var().unwrap();
        let got = v.get(&[0; crate::IDX_MAX]).unwrap();
        assert_eq!(got.to_f64().unwrap(), 107.0);
    }

    #[test]
    fn axis_prefix_import() {
        let src = crate::descriptor::Properties::new();
        {
            let mut s = src.borrow_mut();
            s.set(Property::new(PropType::Str, "yLabel", "Frequency (Hz)"));
            s.set(Property::new(PropType::Real, "yFill", "-1e31"));
            s.set(Property::new(PropType::Str, "zLabel", "Amplitude"));
            s.set(Property::new(PropType::Str, "y", "ignored"));
        }
        let mut d = Dimension::new(DimType::Coord, "frequency");
        let n = d.copy_in_props('y', &src.borrow());
        assert_eq!(n, 2);
        let p = d.props().borrow();
        assert_eq!(p.get_str("label").unwrap(), "Frequency (Hz)");
        assert_eq!(p.get_double("fill").unwrap(), -1e31);
        assert!(p.get_str("zLabel").is_none());
    }
}
