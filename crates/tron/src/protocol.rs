//! Generated from `proto/tron.proto` via `tonic-prost-build` (see `build.rs`).

include!(concat!(env!("OUT_DIR"), "/protocol.rs"));
