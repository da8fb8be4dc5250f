use std::collections::BTreeMap;

use log::trace;
use rand_chacha::ChaCha8Rng;
use rand_core::{RngCore, SeedableRng};

use crate::defects::neighbor::DefectNeighborMap;
use crate::process::{SENSOR_SIZE, SUPER_RESOLVED_SIZE};
use crate::structs::electron::ElectronPos;
use crate::structs::neighbor_spec::{DefectNeighborSpec, NeighborClass};
use crate::utils::errors::DefectError;

const PIXELS: isize = (SENSOR_SIZE * SENSOR_SIZE) as isize;

/// Uniform sample in `[0, 1)` with 24 bits of precision.
#[inline(always)]
fn uniform<R: RngCore>(rng: &mut R) -> f32 {
    (rng.next_u32() >> 8) as f32 * (1.0 / (1u32 << 24) as f32)
}

/// Random 4-bit sub-pixel phase.
#[inline(always)]
fn phase<R: RngCore>(rng: &mut R) -> u16 {
    (rng.next_u32() & 15) as u16
}

/// Gain lookup for electron positions on the super-resolved grid.
struct GainLookup<'a> {
    gain: &'a [f32],
    size: usize,
    divisor: usize,
}

impl<'a> GainLookup<'a> {
    fn new(gain: &'a [f32], size: usize) -> Result<Self, DefectError> {
        if gain.len() != size * size {
            return Err(DefectError::GainSizeMismatch {
                size,
                actual: gain.len(),
            });
        }
        if size == 0 || size > SUPER_RESOLVED_SIZE || SUPER_RESOLVED_SIZE % size != 0 {
            return Err(DefectError::GainScaleMismatch {
                gain_size: size,
                sensor_size: SENSOR_SIZE,
            });
        }
        Ok(Self {
            gain,
            size,
            divisor: SUPER_RESOLVED_SIZE / size,
        })
    }

    #[inline(always)]
    fn at(&self, electron: &ElectronPos) -> f32 {
        let x = usize::from(electron.x) / self.divisor;
        let y = usize::from(electron.y) / self.divisor;
        self.gain[y * self.size + x]
    }
}

/// Steps and offset of the spread described by a neighbour annotation.
#[inline(always)]
fn spread(spec: DefectNeighborSpec) -> (u32, isize) {
    (
        u32::from(spec.distance()) + 1,
        spec.direction().offset(SENSOR_SIZE),
    )
}

/// Compensates sensor defects in electron lists.
///
/// Electrons on defective pixels are replaced by [`ElectronPos::SENTINEL`].
/// Electrons next to a defect spread part of their gain-weighted mass into it;
/// the accumulated mass of each defective pixel turns into an electron with
/// that probability.
#[derive(Debug)]
pub struct DefectElectronAdder<R: RngCore = ChaCha8Rng> {
    rng: R,
    masses: BTreeMap<usize, f32>,
}

impl DefectElectronAdder<ChaCha8Rng> {
    pub fn new() -> Self {
        Self::with_rng(ChaCha8Rng::from_entropy())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(ChaCha8Rng::seed_from_u64(seed))
    }
}

impl Default for DefectElectronAdder<ChaCha8Rng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RngCore> DefectElectronAdder<R> {
    pub fn with_rng(rng: R) -> Self {
        Self {
            rng,
            masses: BTreeMap::new(),
        }
    }

    #[inline(always)]
    fn deposit(&mut self, index: isize, mass: f32) {
        if (0..PIXELS).contains(&index) {
            *self.masses.entry(index as usize).or_insert(0.0) += mass;
        }
    }

    /// Masks and compensates the electrons of one frame.
    ///
    /// `gain` is the correction map of `gain_size` x `gain_size` pixels, with
    /// `gain_size` dividing the super-resolved sensor size. New electrons are
    /// appended; the new list length is returned.
    pub fn execute(
        &mut self,
        electrons: &mut Vec<ElectronPos>,
        map: &DefectNeighborMap,
        gain: &[f32],
        gain_size: usize,
    ) -> Result<usize, DefectError> {
        let gain = GainLookup::new(gain, gain_size)?;
        self.masses.clear();
        let mut masked = 0usize;

        for electron in electrons.iter_mut() {
            if electron.is_sentinel() {
                continue;
            }
            let index = electron.pixel_index();
            let spec = map.at(index);
            if spec.is_defect() {
                *electron = ElectronPos::SENTINEL;
                masked += 1;
                continue;
            }
            let Some(class) = spec.class() else {
                continue;
            };

            // Gain is taken at the recorded sub-pixel position
            let pixel_gain = gain.at(electron);
            let sub = phase(&mut self.rng);
            electron.set_sub_pixel(sub & 3, sub >> 2);

            let (steps, offset) = spread(spec);
            let divisor = if class == NeighborClass::PointEdge {
                2.0
            } else {
                1.0
            };
            let origin = index as isize;
            for k in 1..=steps {
                let weight = (steps - k + 1) as f32 / (divisor * (steps + 1) as f32);
                self.deposit(origin + k as isize * offset, pixel_gain * weight);
            }

            let back = origin - offset;
            if class == NeighborClass::Corner && (0..PIXELS).contains(&back) {
                let (steps_ortho, offset_ortho) = spread(map.at(back as usize));
                for k in 0..=steps {
                    let weight = (steps - k + 1) as f32 / (steps + 1) as f32;
                    for m in 1..=steps_ortho {
                        let weight_ortho = (steps_ortho - m + 1) as f32 / (steps_ortho + 1) as f32;
                        self.deposit(
                            origin + k as isize * offset + m as isize * offset_ortho,
                            pixel_gain * weight * weight_ortho,
                        );
                    }
                }
            }
        }

        let before = electrons.len();
        let masses = std::mem::take(&mut self.masses);
        for (&index, &mass) in &masses {
            if uniform(&mut self.rng) < mass {
                let sub = phase(&mut self.rng);
                electrons.push(ElectronPos::from_pixel(
                    (index % SENSOR_SIZE) as u16,
                    (index / SENSOR_SIZE) as u16,
                    sub >> 2,
                    sub & 3,
                ));
            }
        }
        self.masses = masses;

        trace!(
            "Defect adder: {masked} masked, {} candidate pixels, {} added",
            self.masses.len(),
            electrons.len() - before
        );
        Ok(electrons.len())
    }
}

/// Replaces the sub-pixel phase of every electron with a random one.
#[derive(Debug)]
pub struct SubpixelPositionRandomizer<R: RngCore = ChaCha8Rng> {
    rng: R,
}

impl SubpixelPositionRandomizer<ChaCha8Rng> {
    pub fn new() -> Self {
        Self::with_rng(ChaCha8Rng::from_entropy())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(ChaCha8Rng::seed_from_u64(seed))
    }
}

impl Default for SubpixelPositionRandomizer<ChaCha8Rng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RngCore> SubpixelPositionRandomizer<R> {
    pub fn with_rng(rng: R) -> Self {
        Self { rng }
    }

    /// Masked electrons keep the sentinel value.
    pub fn execute(&mut self, electrons: &mut [ElectronPos]) {
        for electron in electrons.iter_mut().filter(|e| !e.is_sentinel()) {
            let sub = phase(&mut self.rng);
            electron.set_sub_pixel(sub >> 2, sub & 3);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::defects::{CameraDefects, LineDefect, PointDefect};

    const GAIN_SIZE: usize = 64;

    fn flat_gain(value: f32) -> Vec<f32> {
        vec![value; GAIN_SIZE * GAIN_SIZE]
    }

    fn pixels(electrons: &[ElectronPos]) -> Vec<(u16, u16)> {
        electrons
            .iter()
            .map(|e| (e.pixel_x(), e.pixel_y()))
            .collect()
    }

    #[test]
    fn masks_defect_and_fills_point() -> anyhow::Result<()> {
        let map = DefectNeighborMap::build(&CameraDefects {
            points: vec![PointDefect { x: 10, y: 10 }],
            ..Default::default()
        });
        let mut electrons = vec![
            ElectronPos::from_pixel(10, 10, 1, 1),
            ElectronPos::from_pixel(9, 10, 0, 0),
            ElectronPos::from_pixel(300, 300, 2, 2),
        ];

        // 4 * 1/(2 * 2) = 1: the point always receives an electron
        let mut adder = DefectElectronAdder::with_seed(7);
        let count = adder.execute(&mut electrons, &map, &flat_gain(4.0), GAIN_SIZE)?;

        assert_eq!(count, 4);
        assert!(electrons[0].is_sentinel());
        assert_eq!((electrons[1].pixel_x(), electrons[1].pixel_y()), (9, 10));
        assert_eq!(electrons[2], ElectronPos::from_pixel(300, 300, 2, 2));
        assert_eq!(pixels(&electrons[3..]), [(10, 10)]);
        Ok(())
    }

    #[test]
    fn gain_uses_recorded_sub_pixel() -> anyhow::Result<()> {
        let map = DefectNeighborMap::build(&CameraDefects {
            points: vec![PointDefect { x: 10, y: 10 }],
            ..Default::default()
        });
        let neighbor = ElectronPos::from_pixel(9, 10, 0, 0);
        let mut gain = vec![0.0f32; SUPER_RESOLVED_SIZE * SUPER_RESOLVED_SIZE];
        gain[usize::from(neighbor.y) * SUPER_RESOLVED_SIZE + usize::from(neighbor.x)] = 4.0;

        for seed in 0..32 {
            let mut electrons = vec![neighbor];
            let mut adder = DefectElectronAdder::with_seed(seed);
            adder.execute(&mut electrons, &map, &gain, SUPER_RESOLVED_SIZE)?;
            assert_eq!(pixels(&electrons), [(9, 10), (10, 10)], "seed {seed}");
        }
        Ok(())
    }

    #[test]
    fn line_edge_spreads_full_weight() -> anyhow::Result<()> {
        let map = DefectNeighborMap::build(&CameraDefects {
            vertical_lines: vec![LineDefect {
                begin: 100,
                end: 100,
            }],
            ..Default::default()
        });
        let mut electrons = vec![ElectronPos::from_pixel(99, 5, 0, 0)];

        let mut adder = DefectElectronAdder::with_seed(1);
        adder.execute(&mut electrons, &map, &flat_gain(2.0), GAIN_SIZE)?;
        assert_eq!(pixels(&electrons[1..]), [(100, 5)]);

        // zero gain never adds anything
        let mut electrons = vec![ElectronPos::from_pixel(99, 5, 0, 0)];
        assert_eq!(
            adder.execute(&mut electrons, &map, &flat_gain(0.0), GAIN_SIZE)?,
            1
        );
        Ok(())
    }

    #[test]
    fn corner_spreads_along_both_axes() -> anyhow::Result<()> {
        let map = DefectNeighborMap::build(&CameraDefects {
            vertical_lines: vec![LineDefect {
                begin: 100,
                end: 100,
            }],
            horizontal_lines: vec![LineDefect {
                begin: 200,
                end: 200,
            }],
            ..Default::default()
        });
        let mut electrons = vec![ElectronPos::from_pixel(99, 199, 0, 0)];

        let mut adder = DefectElectronAdder::with_seed(3);
        let count = adder.execute(&mut electrons, &map, &flat_gain(4.0), GAIN_SIZE)?;

        assert_eq!(count, 4);
        assert_eq!(
            pixels(&electrons[1..]),
            [(100, 199), (99, 200), (100, 200)]
        );
        Ok(())
    }

    #[test]
    fn seeded_runs_are_reproducible() -> anyhow::Result<()> {
        let map = DefectNeighborMap::build(&CameraDefects {
            points: vec![PointDefect { x: 20, y: 20 }],
            vertical_lines: vec![LineDefect { begin: 40, end: 43 }],
            ..Default::default()
        });
        let input: Vec<_> = (0..64u16)
            .flat_map(|y| {
                [
                    ElectronPos::from_pixel(39, y, 1, 1),
                    ElectronPos::from_pixel(21, y, 2, 2),
                ]
            })
            .collect();

        let run = |seed| -> anyhow::Result<Vec<ElectronPos>> {
            let mut electrons = input.clone();
            DefectElectronAdder::with_seed(seed).execute(
                &mut electrons,
                &map,
                &flat_gain(0.7),
                GAIN_SIZE,
            )?;
            Ok(electrons)
        };
        assert_eq!(run(11)?, run(11)?);
        assert!(run(11)?.len() > input.len());
        Ok(())
    }

    #[test]
    fn rejects_unsupported_gain_size() {
        let map = DefectNeighborMap::default();
        let mut electrons = Vec::new();
        let mut adder = DefectElectronAdder::with_seed(0);
        assert!(matches!(
            adder.execute(&mut electrons, &map, &[1.0; 9], 3),
            Err(DefectError::GainScaleMismatch { gain_size: 3, .. })
        ));
        assert!(matches!(
            adder.execute(&mut electrons, &map, &[1.0; 8], 4),
            Err(DefectError::GainSizeMismatch { size: 4, actual: 8 })
        ));
    }

    #[test]
    fn randomizer_keeps_pixels() {
        let mut electrons: Vec<_> = (0..256u16)
            .map(|i| ElectronPos::from_pixel(i, 4095 - i, 0, 0))
            .collect();
        electrons.push(ElectronPos::SENTINEL);

        SubpixelPositionRandomizer::with_seed(5).execute(&mut electrons);
        let mut seen = [false; 16];
        for (i, electron) in electrons[..256].iter().enumerate() {
            assert_eq!(
                (electron.pixel_x(), electron.pixel_y()),
                (i as u16, 4095 - i as u16)
            );
            seen[usize::from(electron.sub_x() << 2 | electron.sub_y())] = true;
        }
        assert!(seen.iter().all(|&s| s));
        assert!(electrons[256].is_sentinel());
    }
}
