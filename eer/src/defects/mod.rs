//! Sensor defect handling.
//!
//! Defects are found once per camera from a gain reference
//! ([`extract::extract_defects`]). They are then either interpolated in
//! rendered images ([`correct::correct_defects`]) or compensated per frame in
//! electron lists ([`adder::DefectElectronAdder`]) using the annotations of a
//! [`neighbor::DefectNeighborMap`].

pub mod adder;
pub mod correct;
pub mod extract;
pub mod neighbor;

/// Default gain below which a pixel counts as dead.
pub const DEFAULT_DEAD_THRESHOLD: f32 = 0.9;
