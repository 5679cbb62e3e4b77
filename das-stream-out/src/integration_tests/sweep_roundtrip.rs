//! Build a stream in memory, write it to das3 wire format, read it back
//! with `das_stream_in`, and check the result is structurally equivalent.

use std::collections::BTreeSet;
use std::io::Write;
use std::rc::Rc;

use das_stream_core::array::DynArray;
use das_stream_core::dataset::Dataset;
use das_stream_core::enums::{DimType, Encoding, Role, Semantic, StreamModel, ValType};
use das_stream_core::stream::Stream;
use das_stream_core::units;
use das_stream_core::variable::Variable;
use das_stream_core::{AxisLen, IdxMap};

use das_stream_in::StreamReader;

use crate::StreamWriter;

/// A rank-2 frequency sweep with header-only frequency values and two
/// packet-fed arrays.
fn build_sweep() -> Stream {
    let mut stream = Stream::new(StreamModel::V3);
    stream
        .props()
        .borrow_mut()
        .set_str("title", "Synthetic sweep");

    let mut ds = Dataset::new("sweep", "sweep", 2).unwrap();

    let t = DynArray::new("time_center", ValType::Float64, None, &[0], units::US2000)
        .unwrap()
        .into_ref();
    let f = DynArray::new("frequency_center", ValType::Float64, None, &[0], units::HERTZ)
        .unwrap()
        .into_ref();
    {
        let mut b = f.borrow_mut();
        for v in [10.0f64, 20.0, 40.0] {
            b.append(Some(&v.to_ne_bytes()), 1).unwrap();
        }
    }
    let a = DynArray::new(
        "amplitude_center",
        ValType::Float32,
        None,
        &[0, 3],
        units::E_SPECDENS,
    )
    .unwrap()
    .into_ref();

    ds.add_array(Rc::clone(&t)).unwrap();
    ds.add_array(Rc::clone(&f)).unwrap();
    ds.add_array(Rc::clone(&a)).unwrap();

    let dim = ds.make_dim(DimType::Coord, "time").unwrap();
    dim.set_axes("x");
    dim.add_var(
        Role::Center,
        Variable::array(Rc::clone(&t), &[IdxMap::Mapped(0), IdxMap::Unused]).unwrap(),
    )
    .unwrap();

    let dim = ds.make_dim(DimType::Coord, "frequency").unwrap();
    dim.set_axes("y");
    dim.add_var(
        Role::Center,
        Variable::array(Rc::clone(&f), &[IdxMap::Unused, IdxMap::Mapped(0)]).unwrap(),
    )
    .unwrap();

    let dim = ds.make_dim(DimType::Data, "amplitude").unwrap();
    dim.props().borrow_mut().set_str("label", "E!");
    dim.add_var(
        Role::Center,
        Variable::array(Rc::clone(&a), &[IdxMap::Mapped(0), IdxMap::Mapped(1)]).unwrap(),
    )
    .unwrap();

    ds.add_fixed_codec(
        "time_center",
        Semantic::Real,
        Encoding::LittleEndReal,
        8,
        Some(1),
        None,
    )
    .unwrap();
    ds.add_fixed_codec(
        "amplitude_center",
        Semantic::Real,
        Encoding::LittleEndReal,
        4,
        Some(3),
        None,
    )
    .unwrap();

    // Two records of payload
    for rec in 0..2u32 {
        t.borrow_mut()
            .append(Some(&(rec as f64 * 1.0e6).to_ne_bytes()), 1)
            .unwrap();
        let mut b = a.borrow_mut();
        for i in 0..3 {
            b.append(Some(&((rec * 10 + i) as f32).to_ne_bytes()), 1)
                .unwrap();
        }
    }

    stream.add_dataset(3, ds).unwrap();
    stream
}

fn roles_of(ds: &Dataset, dim: &str) -> BTreeSet<String> {
    ds.get_dim(dim)
        .map(|d| d.iter_vars().map(|(r, _)| r.to_string()).collect())
        .unwrap_or_default()
}

#[test]
fn sweep_survives_the_wire() {
    let mut stream = build_sweep();

    let mut wire = Vec::new();
    {
        let mut wr = StreamWriter::new(&mut wire);
        wr.write_all(&mut stream).unwrap();
        assert_eq!(wr.stats(3).packets, 2);
        assert_eq!(wr.stats(3).bytes, 2 * 20);
    }

    let back = StreamReader::new(&wire[..]).read_all().unwrap();
    assert_eq!(
        back.props().borrow().get_str("title").unwrap(),
        "Synthetic sweep"
    );
    let ds = back.get(3).unwrap();
    assert_eq!(ds.rank(), 2);
    assert_eq!(ds.id(), "sweep");

    // Same dimension set with the same roles
    let orig = stream.get(3).unwrap();
    for dim in ["time", "frequency", "amplitude"] {
        assert_eq!(roles_of(orig, dim), roles_of(ds, dim), "dim {}", dim);
    }
    assert_eq!(
        ds.get_dim("amplitude").unwrap().props().borrow().get_str("label").unwrap(),
        "E!"
    );

    // Same codec list
    assert_eq!(ds.codecs().len(), orig.codecs().len());
    assert_eq!(ds.rec_bytes(), orig.rec_bytes());

    // And the same cell values
    let (shape, _) = ds.shape();
    assert_eq!(shape[0], AxisLen::Size(2));
    assert_eq!(shape[1], AxisLen::Size(3));
    let amp = ds.get_dim("amplitude").unwrap().point_var().unwrap();
    let mut loc = [0usize; das_stream_core::IDX_MAX];
    loc[0] = 1;
    loc[1] = 2;
    assert_eq!(amp.get(&loc).unwrap().to_f64().unwrap(), 12.0);

    // Header-only frequency values came through the <values> block
    let freq = ds.get_dim("frequency").unwrap().point_var().unwrap();
    assert_eq!(freq.get(&loc).unwrap().to_f64().unwrap(), 40.0);
}

#[test]
fn double_upgrade_is_stable() {
    // A stream that is already modern re-emits identically: writing the
    // re-read stream produces the same wire bytes.
    let mut stream = build_sweep();
    let mut wire1 = Vec::new();
    StreamWriter::new(&mut wire1).write_all(&mut stream).unwrap();

    let mut back = StreamReader::new(&wire1[..]).read_all().unwrap();
    let mut wire2 = Vec::new();
    StreamWriter::new(&mut wire2).write_all(&mut back).unwrap();

    assert_eq!(wire1, wire2);
}

#[test]
fn file_round_trip_through_mmap() {
    let dir = tempfile::tempdir().expect("couldn't get a tempdir");
    let path = dir.path().join("sweep.d3b");

    let mut stream = build_sweep();
    let mut wire = Vec::new();
    StreamWriter::new(&mut wire).write_all(&mut stream).unwrap();
    let mut fh = std::fs::File::create(&path).unwrap();
    fh.write_all(&wire).unwrap();
    drop(fh);

    let back = das_stream_in::read_file(&path).unwrap();
    assert_eq!(back.get(3).unwrap().rank(), 2);
}

#[test]
fn exceptions_round_trip() {
    let stream = Stream::new(StreamModel::V3);
    let mut wire = Vec::new();
    {
        let mut wr = StreamWriter::new(&mut wire);
        wr.write_stream_header(&stream).unwrap();
        wr.write_exception("NoDataInInterval", "nothing matched").unwrap();
    }

    let mut got = None;
    let mut rd = StreamReader::new(&wire[..]);
    rd.process(|ev, _| {
        if let das_stream_in::StreamEvent::Exception { kind, message } = ev {
            got = Some((kind, message));
        }
        Ok(())
    })
    .unwrap();
    let (kind, message) = got.unwrap();
    assert_eq!(kind, "NoDataInInterval");
    assert_eq!(message, "nothing matched");
}
