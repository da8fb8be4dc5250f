//! Data structures shared by the decoder and the defect pipeline.
//!
//! Contains electron coordinates, compressed frame buffers, camera defect
//! descriptions and the packed per-pixel defect neighbour annotations.

pub mod defects;
pub mod electron;
pub mod frame;
pub mod neighbor_spec;
