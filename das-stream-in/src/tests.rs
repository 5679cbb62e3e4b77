//! Whole-stream reading tests over in-memory wires.

use das_stream_core::enums::{Role, StreamModel};
use das_stream_core::errors::*;
use das_stream_core::units;
use das_stream_core::AxisLen;

use crate::{StreamEvent, StreamReader};

fn legacy_header(id: u16, xml: &[u8], wire: &mut Vec<u8>) {
    wire.extend_from_slice(format!("[{:02}]{:06}", id, xml.len()).as_bytes());
    wire.extend_from_slice(xml);
}

/// A little das2.2 waveform stream: time24 x column plus an 8 sample
/// waveform yscan, two records.
fn waveform_wire() -> Vec<u8> {
    let mut wire = Vec::new();
    legacy_header(
        0,
        br#"<stream version="2.2">
             <properties String:title="Plasma wave survey"/>
           </stream>"#,
        &mut wire,
    );
    let tags: Vec<String> = (0..8).map(|i| format!("{}.0e-6", i)).collect();
    let pkt = format!(
        r#"<packet>
          <x type="time24" units="us2000"/>
          <yscan name="e_wave" type="sun_real4" zUnits="V**2 m**-2 Hz**-1"
                 yUnits="s" nitems="8" yTags="{}" renderer="waveform"/>
        </packet>"#,
        tags.join(",")
    );
    legacy_header(1, pkt.as_bytes(), &mut wire);

    for (t, base) in [("2020-01-01T00:00:00.000Z", 0.0f32), ("2020-01-01T00:00:01.000Z", 10.0)] {
        wire.extend_from_slice(b":01:");
        let mut rec = Vec::new();
        rec.extend_from_slice(t.as_bytes());
        while rec.len() < 24 {
            rec.push(b' ');
        }
        for i in 0..8 {
            rec.extend_from_slice(&(base + i as f32).to_be_bytes());
        }
        assert_eq!(rec.len(), 24 + 32);
        wire.extend_from_slice(&rec);
    }
    wire
}

#[test]
fn waveform_stream_upgrades_and_decodes() {
    let stream = StreamReader::new(&waveform_wire()[..]).read_all().unwrap();
    assert_eq!(stream.model(), StreamModel::V2);
    assert_eq!(
        stream.props().borrow().get_str("title").unwrap(),
        "Plasma wave survey"
    );

    let ds = stream.get(1).unwrap();
    assert_eq!(ds.rank(), 2);
    let (shape, _) = ds.shape();
    assert_eq!(shape[0], AxisLen::Size(2));
    assert_eq!(shape[1], AxisLen::Size(8));

    // The time dimension was rebuilt as reference + offset
    let time = ds.get_dim("time").unwrap();
    assert!(time.get_var(Role::Reference).is_some());
    assert!(time.get_var(Role::Offset).is_some());

    let center = time.point_var().unwrap();
    let mut loc = [0usize; das_stream_core::IDX_MAX];
    loc[0] = 1;
    loc[1] = 4;
    let d = center.get(&loc).unwrap();
    // Second record starts one second in, sample 4 adds 4 µs
    match d.value {
        das_stream_core::value::Value::Time(t) => {
            assert_eq!(t.year, 2020);
            assert!((t.second - 1.000004).abs() < 1e-12);
        }
        other => panic!("unexpected {:?}", other),
    }

    let wave = ds.get_dim("e_wave").unwrap().point_var().unwrap();
    assert_eq!(wave.get(&loc).unwrap().to_f64().unwrap(), 14.0);
    assert_eq!(wave.get(&loc).unwrap().units, units::E_SPECDENS);
}

#[test]
fn events_arrive_in_wire_order() {
    let mut events = Vec::new();
    let wire = waveform_wire();
    let mut rd = StreamReader::new(&wire[..]);
    rd.process(|ev, _| {
        events.push(ev);
        Ok(())
    })
    .unwrap();
    assert_eq!(
        events,
        vec![
            StreamEvent::StreamHeader,
            StreamEvent::DatasetDefined { id: 1 },
            StreamEvent::Data { id: 1 },
            StreamEvent::Data { id: 1 },
        ]
    );
}

#[test]
fn callback_error_stops_promptly() {
    let mut seen = 0;
    let wire = waveform_wire();
    let mut rd = StreamReader::new(&wire[..]);
    let err = rd.process(|ev, _| {
        seen += 1;
        if matches!(ev, StreamEvent::Data { .. }) {
            return Err(DasError::Dataset {
                msg: "enough".to_string(),
            });
        }
        Ok(())
    });
    assert!(err.is_err());
    assert_eq!(seen, 3); // header, definition, first data packet only
}

#[test]
fn exception_records_are_surfaced() {
    let mut wire = Vec::new();
    legacy_header(0, br#"<stream version="2.2"/>"#, &mut wire);
    legacy_header(
        1,
        br#"<exception type="NoDataInInterval" message="No files matched the query"/>"#,
        &mut wire,
    );
    let mut got = None;
    StreamReader::new(&wire[..])
        .process(|ev, _| {
            if let StreamEvent::Exception { kind, message } = ev {
                got = Some((kind, message));
            }
            Ok(())
        })
        .unwrap();
    let (kind, message) = got.unwrap();
    assert_eq!(kind, "NoDataInInterval");
    assert_eq!(message, "No files matched the query");
}

#[test]
fn legacy_ids_may_be_redefined() {
    let mut wire = Vec::new();
    legacy_header(0, br#"<stream version="2.2"/>"#, &mut wire);
    let pkt_a = br#"<packet>
      <x type="little_endian_real8" units="t2000"/>
      <y name="a" type="little_endian_real4" units="V"/>
    </packet>"#;
    let pkt_b = br#"<packet>
      <x type="little_endian_real8" units="t2000"/>
      <y name="b" type="little_endian_real8" units="V"/>
    </packet>"#;
    legacy_header(1, pkt_a, &mut wire);
    wire.extend_from_slice(b":01:");
    wire.extend_from_slice(&1.0f64.to_le_bytes());
    wire.extend_from_slice(&2.0f32.to_le_bytes());
    legacy_header(1, pkt_b, &mut wire);
    wire.extend_from_slice(b":01:");
    wire.extend_from_slice(&3.0f64.to_le_bytes());
    wire.extend_from_slice(&4.0f64.to_le_bytes());

    let stream = StreamReader::new(&wire[..]).read_all().unwrap();
    // The redefinition replaced the earlier dataset
    let ds = stream.get(1).unwrap();
    assert!(ds.get_dim("b").is_some());
    assert!(ds.get_dim("a").is_none());
    // And the second payload used the new 16 byte record length
    assert_eq!(ds.rec_bytes(), Some(16));
}

#[test]
fn das3_round_data() {
    let mut wire = Vec::new();
    let hdr = br#"<stream type="das-basic-stream" version="3.0"/>"#;
    wire.extend_from_slice(format!("|Sx||{}|", hdr.len()).as_bytes());
    wire.extend_from_slice(hdr);
    let ds_xml = br#"<dataset name="ephem" rank="1" index="*">
      <coord name="time">
        <scalar use="center" semantic="datetime" storage="double" units="us2000" index="*">
          <packet numItems="1" encoding="LEreal" itemBytes="8"/>
        </scalar>
      </coord>
      <data name="radius">
        <scalar use="center" semantic="real" units="km" index="*">
          <packet numItems="1" encoding="LEreal" itemBytes="8"/>
        </scalar>
      </data>
    </dataset>"#;
    wire.extend_from_slice(format!("|Hx|5|{}|", ds_xml.len()).as_bytes());
    wire.extend_from_slice(ds_xml);
    for (t, r) in [(0.0f64, 60268.0f64), (60.0e6, 60300.0)] {
        wire.extend_from_slice(b"|Pd|5|16|");
        wire.extend_from_slice(&t.to_le_bytes());
        wire.extend_from_slice(&r.to_le_bytes());
    }

    let stream = StreamReader::new(&wire[..]).read_all().unwrap();
    assert_eq!(stream.model(), StreamModel::V3);
    let ds = stream.get(5).unwrap();
    let r = ds.get_dim("radius").unwrap().point_var().unwrap();
    let mut loc = [0usize; das_stream_core::IDX_MAX];
    loc[0] = 1;
    assert_eq!(r.get(&loc).unwrap().to_f64().unwrap(), 60300.0);
}

#[test]
fn modern_id_collision_is_fatal() {
    let mut wire = Vec::new();
    let hdr = br#"<stream type="das-basic-stream" version="3.0"/>"#;
    wire.extend_from_slice(format!("|Sx||{}|", hdr.len()).as_bytes());
    wire.extend_from_slice(hdr);
    let ds_xml = br#"<dataset name="x" rank="1" index="*">
      <coord name="t"><scalar use="center" semantic="real" units="s" index="*">
        <packet numItems="1" encoding="LEreal" itemBytes="8"/>
      </scalar></coord>
    </dataset>"#;
    for _ in 0..2 {
        wire.extend_from_slice(format!("|Hx|9|{}|", ds_xml.len()).as_bytes());
        wire.extend_from_slice(ds_xml);
    }
    let err = StreamReader::new(&wire[..]).read_all().unwrap_err();
    assert!(matches!(err, DasError::PktIdCollision { id: 9 }));
}
