//! Coordinate frame definitions referenced by vector variables.

use crate::descriptor::{PropRef, Properties};
use crate::enums::CoordSys;
use crate::errors::*;

/// Most directions a frame may declare.
pub const MAX_DIRS: usize = 4;

/// Frame id 0 is reserved for "no frame".
pub const NO_FRAME: u8 = 0;

/// A named coordinate frame.
///
/// Two vectors sharing a frame can be combined directly; vectors in
/// different frames need an out-of-band transformation first. Names are
/// case sensitive and ids are unique within a stream.
#[derive(Debug)]
pub struct Frame {
    id: u8,
    name: String,
    /// Central body the frame is fixed to, e.g. `jupiter`.
    body: String,
    sys: CoordSys,
    inertial: bool,
    dirs: Vec<String>,
    props: PropRef,
}

impl Frame {
    pub fn new(id: u8, name: &str, sys: CoordSys) -> Result<Frame, DasError> {
        if id == NO_FRAME {
            return Err(DasError::Vec {
                msg: "Frame id 0 is reserved".to_string(),
            });
        }
        if name.is_empty() {
            return Err(DasError::Vec {
                msg: "Frames require a name".to_string(),
            });
        }
        Ok(Frame {
            id,
            name: name.to_string(),
            body: String::new(),
            sys,
            inertial: false,
            dirs: Vec::new(),
            props: Properties::new(),
        })
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn coord_sys(&self) -> CoordSys {
        self.sys
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn set_body(&mut self, body: &str) {
        self.body = body.to_string();
    }

    pub fn is_inertial(&self) -> bool {
        self.inertial
    }

    pub fn set_inertial(&mut self, inertial: bool) {
        self.inertial = inertial;
    }

    pub fn props(&self) -> &PropRef {
        &self.props
    }

    /// Declare the next direction name, in component order.
    pub fn add_dir(&mut self, name: &str) -> Result<(), DasError> {
        if self.dirs.len() >= MAX_DIRS {
            return Err(DasError::Vec {
                msg: format!("Frame {} already has {} directions", self.name, MAX_DIRS),
            });
        }
        if self.dirs.iter().any(|d| d == name) {
            return Err(DasError::Vec {
                msg: format!("Frame {} already has a '{}' direction", self.name, name),
            });
        }
        self.dirs.push(name.to_string());
        Ok(())
    }

    pub fn dirs(&self) -> &[String] {
        &self.dirs
    }

    /// Component number of a named direction.
    pub fn dir_index(&self, name: &str) -> Option<u8> {
        self.dirs.iter().position(|d| d == name).map(|i| i as u8)
    }
}
