//! Whole-stream write → read round trips.

mod sweep_roundtrip;
