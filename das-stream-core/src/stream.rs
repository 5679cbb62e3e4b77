//! The root stream container: packet-id routing and the frame table.

use std::collections::BTreeMap;

use crate::dataset::Dataset;
use crate::descriptor::{PropRef, Properties};
use crate::enums::StreamModel;
use crate::errors::*;
use crate::frame::Frame;

/// Most packet ids a legacy stream may define.
pub const MAX_LEGACY_PKT_IDS: u16 = 100;

/// Most frames a stream may carry (ids are a single byte, 0 reserved).
pub const MAX_FRAMES: usize = 255;

/// One top-level descriptor slot.
#[derive(Debug)]
pub struct Slot {
    pub ds: Dataset,
    /// Has this descriptor's header already gone out on the wire?
    pub sent: bool,
}

/// The root object of a das stream.
///
/// Owns every dataset by packet id (id 0 is the stream itself), the frame
/// table, and the stream-wide properties that descendants inherit.
#[derive(Debug)]
pub struct Stream {
    model: StreamModel,
    version: String,
    props: PropRef,
    frames: Vec<Frame>,
    slots: BTreeMap<u16, Slot>,
}

impl Stream {
    pub fn new(model: StreamModel) -> Stream {
        let version = match model {
            StreamModel::V2 => "2.2",
            StreamModel::V3 => "3.0",
        };
        Stream {
            model,
            version: version.to_string(),
            props: Properties::new(),
            frames: Vec::new(),
            slots: BTreeMap::new(),
        }
    }

    pub fn model(&self) -> StreamModel {
        self.model
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn set_version(&mut self, v: &str) {
        self.version = v.to_string();
    }

    pub fn props(&self) -> &PropRef {
        &self.props
    }

    /// Bind a dataset to a packet id, wiring its property inheritance.
    ///
    /// Id 0 is reserved for the stream header. Legacy streams may redefine
    /// an id mid-stream; modern streams must not.
    pub fn add_dataset(&mut self, id: u16, ds: Dataset) -> Result<(), DasError> {
        if id == 0 {
            return Err(DasError::Serial {
                msg: "Packet id 0 is reserved for the stream header".to_string(),
            });
        }
        if self.model == StreamModel::V2 && id >= MAX_LEGACY_PKT_IDS {
            return Err(DasError::Serial {
                msg: format!("Packet id {} is out of range for a das2 stream", id),
            });
        }
        if self.slots.contains_key(&id) && self.model == StreamModel::V3 {
            return Err(DasError::PktIdCollision { id });
        }
        ds.props().borrow_mut().set_parent(&self.props);
        self.slots.insert(id, Slot { ds, sent: false });
        Ok(())
    }

    /// Release a descriptor slot, returning the dataset.
    pub fn free_sub_desc(&mut self, id: u16) -> Option<Dataset> {
        self.slots.remove(&id).map(|s| s.ds)
    }

    /// The smallest id not yet in use.
    pub fn next_free_id(&self) -> Result<u16, DasError> {
        let limit = match self.model {
            StreamModel::V2 => MAX_LEGACY_PKT_IDS,
            StreamModel::V3 => u16::MAX,
        };
        (1..limit)
            .find(|id| !self.slots.contains_key(id))
            .ok_or_else(|| DasError::Serial {
                msg: "All packet ids are in use".to_string(),
            })
    }

    pub fn get(&self, id: u16) -> Option<&Dataset> {
        self.slots.get(&id).map(|s| &s.ds)
    }

    pub fn get_mut(&mut self, id: u16) -> Option<&mut Dataset> {
        self.slots.get_mut(&id).map(|s| &mut s.ds)
    }

    pub fn is_valid_id(&self, id: u16) -> bool {
        self.slots.contains_key(&id)
    }

    pub fn dataset_count(&self) -> usize {
        self.slots.len()
    }

    /// Walk descriptors in packet-id order.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &Dataset)> {
        self.slots.iter().map(|(id, s)| (*id, &s.ds))
    }

    pub fn mark_sent(&mut self, id: u16) {
        if let Some(s) = self.slots.get_mut(&id) {
            s.sent = true;
        }
    }

    pub fn is_sent(&self, id: u16) -> bool {
        self.slots.get(&id).map(|s| s.sent).unwrap_or(false)
    }

    /// Define a coordinate frame. Both names and ids must be unique.
    pub fn add_frame(&mut self, frame: Frame) -> Result<(), DasError> {
        if self.frames.len() >= MAX_FRAMES {
            return Err(DasError::Vec {
                msg: "Frame table is full".to_string(),
            });
        }
        if self.frames.iter().any(|f| f.id() == frame.id()) {
            return Err(DasError::Vec {
                msg: format!("Frame id {} is already defined", frame.id()),
            });
        }
        if self.frames.iter().any(|f| f.name() == frame.name()) {
            return Err(DasError::Vec {
                msg: format!("Frame '{}' is already defined", frame.name()),
            });
        }
        frame.props().borrow_mut().set_parent(&self.props);
        self.frames.push(frame);
        Ok(())
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn frame_by_name(&self, name: &str) -> Option<&Frame> {
        self.frames.iter().find(|f| f.name() == name)
    }

    pub fn frame_by_id(&self, id: u8) -> Option<&Frame> {
        self.frames.iter().find(|f| f.id() == id)
    }

    /// The smallest unused frame id.
    pub fn next_frame_id(&self) -> Result<u8, DasError> {
        (1..=u8::MAX)
            .find(|id| self.frame_by_id(*id).is_none())
            .ok_or_else(|| DasError::Vec {
                msg: "All frame ids are in use".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::CoordSys;

    fn ds(id: &str) -> Dataset {
        Dataset::new(id, "g", 1).unwrap()
    }

    #[test]
    fn id_rules_by_model() {
        let mut v3 = Stream::new(StreamModel::V3);
        v3.add_dataset(1, ds("a")).unwrap();
        let err = v3.add_dataset(1, ds("b")).unwrap_err();
        assert!(matches!(err, DasError::PktIdCollision { id: 1 }));

        let mut v2 = Stream::new(StreamModel::V2);
        v2.add_dataset(1, ds("a")).unwrap();
        // Legacy streams may redefine
        v2.add_dataset(1, ds("b")).unwrap();
        assert_eq!(v2.get(1).unwrap().id(), "b");
        assert!(v2.add_dataset(100, ds("c")).is_err());
    }

    #[test]
    fn smallest_free_id() {
        let mut s = Stream::new(StreamModel::V3);
        s.add_dataset(1, ds("a")).unwrap();
        s.add_dataset(2, ds("b")).unwrap();
        s.add_dataset(4, ds("c")).unwrap();
        assert_eq!(s.next_free_id().unwrap(), 3);
        assert_eq!(s.free_sub_desc(2).unwrap().id(), "b");
        assert_eq!(s.next_free_id().unwrap(), 2);
    }

    #[test]
    fn frame_table() {
        let mut s = Stream::new(StreamModel::V3);
        s.add_frame(Frame::new(1, "sc", CoordSys::Cartesian).unwrap())
            .unwrap();
        assert!(s
            .add_frame(Frame::new(1, "other", CoordSys::Polar).unwrap())
            .is_err());
        assert!(s
            .add_frame(Frame::new(2, "sc", CoordSys::Polar).unwrap())
            .is_err());
        assert_eq!(s.next_frame_id().unwrap(), 2);
        assert_eq!(s.frame_by_name("sc").unwrap().id(), 1);
    }

    #[test]
    fn sent_flags() {
        let mut s = Stream::new(StreamModel::V3);
        s.add_dataset(3, ds("a")).unwrap();
        assert!(!s.is_sent(3));
        s.mark_sent(3);
        assert!(s.is_sent(3));
    }
}
