//! Render policies for decoded electron events.
//!
//! The decode loop reports each event as a physical pixel plus the raw 2-bit
//! sub-pixel phase per axis. The phase is stored XOR'd with 2 by the camera,
//! so the offset inside the pixel is `phase ^ 2`.

use crate::process::{SUB_PIXEL_BITS, SuperResolution};
use crate::structs::electron::ElectronPos;
use crate::utils::errors::DecodeError;

/// Receives every electron event of a frame.
pub trait RenderPolicy {
    fn render(&mut self, pixel_x: usize, pixel_y: usize, sub_x: u32, sub_y: u32);
}

/// Integer pixel types usable as hit maps and electron counters.
pub trait CountPixel: Copy + Default + Send + Sync + 'static {
    const ONE: Self;

    /// Adds one, saturating at the type maximum.
    fn increment(&mut self);
}

macro_rules! impl_count_pixel {
    ($($t:ty),+) => { $(
        impl CountPixel for $t {
            const ONE: Self = 1;

            #[inline(always)]
            fn increment(&mut self) {
                *self = self.saturating_add(1);
            }
        }
    )+ }
}

impl_count_pixel!(u8, u16, u32);

/// Output extent of a nearest-neighbour render of a `width`x`height` frame.
pub fn nearest_output_size(width: usize, height: usize, factor: SuperResolution) -> (usize, usize) {
    (factor.scaled(width), factor.scaled(height))
}

#[inline(always)]
const fn nearest_coordinate(pixel: usize, sub: u32, shift: u32) -> usize {
    ((pixel << SUB_PIXEL_BITS) + (sub ^ 2) as usize) >> shift
}

fn check_output_len(expected: usize, actual: usize) -> Result<(), DecodeError> {
    if actual < expected {
        return Err(DecodeError::InvalidOutputSize { expected, actual });
    }
    Ok(())
}

/// Marks every pixel that received at least one electron.
pub struct NearestSet<'a, T: CountPixel> {
    out: &'a mut [T],
    width_out: usize,
    shift: u32,
}

impl<'a, T: CountPixel> NearestSet<'a, T> {
    pub fn new(
        out: &'a mut [T],
        width: usize,
        height: usize,
        factor: SuperResolution,
    ) -> Result<Self, DecodeError> {
        let (width_out, height_out) = nearest_output_size(width, height, factor);
        check_output_len(width_out * height_out, out.len())?;

        Ok(Self {
            out,
            width_out,
            shift: (SUB_PIXEL_BITS as i32 - factor.up_bits()) as u32,
        })
    }
}

impl<T: CountPixel> RenderPolicy for NearestSet<'_, T> {
    #[inline(always)]
    fn render(&mut self, pixel_x: usize, pixel_y: usize, sub_x: u32, sub_y: u32) {
        let x = nearest_coordinate(pixel_x, sub_x, self.shift);
        let y = nearest_coordinate(pixel_y, sub_y, self.shift);
        self.out[y * self.width_out + x] = T::ONE;
    }
}

/// Counts electrons per output pixel.
pub struct NearestAdd<'a, T: CountPixel> {
    out: &'a mut [T],
    width_out: usize,
    shift: u32,
}

impl<'a, T: CountPixel> NearestAdd<'a, T> {
    pub fn new(
        out: &'a mut [T],
        width: usize,
        height: usize,
        factor: SuperResolution,
    ) -> Result<Self, DecodeError> {
        let (width_out, height_out) = nearest_output_size(width, height, factor);
        check_output_len(width_out * height_out, out.len())?;

        Ok(Self {
            out,
            width_out,
            shift: (SUB_PIXEL_BITS as i32 - factor.up_bits()) as u32,
        })
    }
}

impl<T: CountPixel> RenderPolicy for NearestAdd<'_, T> {
    #[inline(always)]
    fn render(&mut self, pixel_x: usize, pixel_y: usize, sub_x: u32, sub_y: u32) {
        let x = nearest_coordinate(pixel_x, sub_x, self.shift);
        let y = nearest_coordinate(pixel_y, sub_y, self.shift);
        self.out[y * self.width_out + x].increment();
    }
}

/// Per-axis kernel normalization; one event deposits its square in total.
pub const SPLINE_SCALE: f32 = 9.9867;

/// Total weight deposited by one unclipped electron event.
pub const SPLINE_EVENT_WEIGHT: f32 = SPLINE_SCALE * SPLINE_SCALE;

const SPLINE_TAPS: usize = 4;

/// Cubic B-spline weights for the four sub-pixel phases.
#[derive(Debug, Clone, Copy)]
pub struct SplineKernel {
    lut: [[f32; SPLINE_TAPS]; 4],
}

impl Default for SplineKernel {
    fn default() -> Self {
        let mut lut = [[0f32; SPLINE_TAPS]; 4];
        for (phase, row) in lut.iter_mut().enumerate() {
            let w = phase as f32 / 4.0 + 0.125;
            for (tap, weight) in cubic_bspline_weights(w).into_iter().enumerate() {
                row[tap] = weight * SPLINE_SCALE;
            }
        }
        Self { lut }
    }
}

impl SplineKernel {
    pub fn weights(&self, phase: usize) -> &[f32; SPLINE_TAPS] {
        &self.lut[phase & 3]
    }
}

fn cubic_bspline_weights(w: f32) -> [f32; 4] {
    let w3 = w * w * w / 6.0;
    let w0 = 1.0 / 6.0 + 0.5 * w * (w - 1.0) - w3;
    let w2 = w + w0 - 2.0 * w3;
    let w1 = 1.0 - w0 - w2 - w3;
    [w0, w1, w2, w3]
}

/// Splats a 4x4 cubic B-spline per electron into a float image.
///
/// Taps outside the output are dropped.
pub struct CubicSplineAdd<'a> {
    out: &'a mut [f32],
    width_out: isize,
    height_out: isize,
    up_bits: u32,
    kernel: SplineKernel,
}

impl<'a> CubicSplineAdd<'a> {
    pub fn new(
        out: &'a mut [f32],
        width: usize,
        height: usize,
        factor: SuperResolution,
    ) -> Result<Self, DecodeError> {
        if !factor.supports_spline() {
            return Err(DecodeError::UnsupportedSplineFactor(factor.factor()));
        }
        let up_bits = factor.up_bits() as u32;
        let (width_out, height_out) = (width << up_bits, height << up_bits);
        check_output_len(width_out * height_out, out.len())?;

        Ok(Self {
            out,
            width_out: width_out as isize,
            height_out: height_out as isize,
            up_bits,
            kernel: SplineKernel::default(),
        })
    }

    #[inline(always)]
    fn origin(&self, pixel: usize, sub: u32) -> (isize, usize) {
        let up = self.up_bits;
        let base = ((pixel as isize - ((sub >> 1) & 1) as isize) << up)
            + (sub >> (SUB_PIXEL_BITS - up)) as isize;
        let phase = ((sub << up) & 3) as usize;
        (base - 1, phase)
    }
}

impl RenderPolicy for CubicSplineAdd<'_> {
    #[inline(always)]
    fn render(&mut self, pixel_x: usize, pixel_y: usize, sub_x: u32, sub_y: u32) {
        let (x0, phase_x) = self.origin(pixel_x, sub_x);
        let (y0, phase_y) = self.origin(pixel_y, sub_y);
        let wx = *self.kernel.weights(phase_x);
        let wy = *self.kernel.weights(phase_y);

        for (ty, weight_y) in wy.iter().enumerate() {
            let row = y0 + ty as isize;
            if row < 0 || row >= self.height_out {
                continue;
            }
            let row_start = (row * self.width_out) as usize;
            for (tx, weight_x) in wx.iter().enumerate() {
                let col = x0 + tx as isize;
                if col < 0 || col >= self.width_out {
                    continue;
                }
                self.out[row_start + col as usize] += weight_y * weight_x;
            }
        }
    }
}

/// Collects events as sub-pixel coordinates into a pre-sized list.
///
/// Events past the list capacity are counted in [`overflow`](Self::overflow)
/// and dropped.
pub struct CoordinateCollector<'a> {
    out: &'a mut [ElectronPos],
    len: usize,
    overflow: usize,
}

impl<'a> CoordinateCollector<'a> {
    pub fn new(out: &'a mut [ElectronPos]) -> Self {
        Self {
            out,
            len: 0,
            overflow: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn overflow(&self) -> usize {
        self.overflow
    }
}

impl RenderPolicy for CoordinateCollector<'_> {
    #[inline(always)]
    fn render(&mut self, pixel_x: usize, pixel_y: usize, sub_x: u32, sub_y: u32) {
        match self.out.get_mut(self.len) {
            Some(slot) => {
                *slot = ElectronPos::from_pixel(
                    pixel_x as u16,
                    pixel_y as u16,
                    (sub_x ^ 2) as u16,
                    (sub_y ^ 2) as u16,
                );
                self.len += 1;
            }
            None => self.overflow += 1,
        }
    }
}

/// Discards events; useful when only the electron count is needed.
#[derive(Debug, Default)]
pub struct CountOnly;

impl RenderPolicy for CountOnly {
    #[inline(always)]
    fn render(&mut self, _pixel_x: usize, _pixel_y: usize, _sub_x: u32, _sub_y: u32) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_set_scales_coordinates() -> anyhow::Result<()> {
        let mut out = vec![0u8; 32 * 32];
        let mut policy = NearestSet::new(&mut out, 16, 16, SuperResolution::Up2)?;
        // offset 3 of 4 -> second half of the pixel
        policy.render(5, 7, 1, 2);
        policy.render(5, 7, 1, 2);
        assert_eq!(out[14 * 32 + 11], 1);
        assert_eq!(out.iter().map(|&v| v as u32).sum::<u32>(), 1);
        Ok(())
    }

    #[test]
    fn nearest_add_counts_and_downsamples() -> anyhow::Result<()> {
        let mut out = vec![0u16; 4 * 4];
        let mut policy = NearestAdd::new(&mut out, 16, 16, SuperResolution::Down4)?;
        for sub in 0..4 {
            policy.render(4, 15, sub, sub);
            policy.render(7, 12, sub, sub);
        }
        assert_eq!(out[3 * 4 + 1], 8);
        Ok(())
    }

    #[test]
    fn nearest_add_saturates() -> anyhow::Result<()> {
        let mut out = vec![254u8; 16];
        let mut policy = NearestAdd::new(&mut out, 4, 4, SuperResolution::Native)?;
        for _ in 0..3 {
            policy.render(0, 0, 2, 2);
        }
        assert_eq!(out[0], 255);
        Ok(())
    }

    #[test]
    fn rejects_short_buffers() {
        let mut out = vec![0u8; 10];
        assert!(matches!(
            NearestSet::new(&mut out, 4, 4, SuperResolution::Native),
            Err(DecodeError::InvalidOutputSize {
                expected: 16,
                actual: 10
            })
        ));
        let mut out = vec![0f32; 64];
        assert!(matches!(
            CubicSplineAdd::new(&mut out, 8, 8, SuperResolution::Down2),
            Err(DecodeError::UnsupportedSplineFactor(-2))
        ));
    }

    #[test]
    fn spline_conserves_weight_for_all_phases() -> anyhow::Result<()> {
        for factor in [
            SuperResolution::Native,
            SuperResolution::Up2,
            SuperResolution::Up4,
        ] {
            for sub_y in 0..4 {
                for sub_x in 0..4 {
                    let size = factor.scaled(16);
                    let mut out = vec![0f32; size * size];
                    CubicSplineAdd::new(&mut out, 16, 16, factor)?.render(8, 8, sub_x, sub_y);
                    let total: f32 = out.iter().sum();
                    assert!(
                        (total - SPLINE_EVENT_WEIGHT).abs() < 1e-3,
                        "factor {factor}, phase ({sub_x},{sub_y}): {total}"
                    );
                }
            }
        }
        Ok(())
    }

    #[test]
    fn spline_clips_at_border() -> anyhow::Result<()> {
        let mut out = vec![0f32; 16 * 16];
        let mut policy = CubicSplineAdd::new(&mut out, 16, 16, SuperResolution::Native)?;
        policy.render(0, 0, 3, 3);
        policy.render(15, 15, 0, 0);
        let total: f32 = out.iter().sum();
        assert!(total > 0.0);
        assert!(total < 2.0 * SPLINE_EVENT_WEIGHT);
        Ok(())
    }

    #[test]
    fn collector_counts_overflow() {
        let mut out = [ElectronPos::default(); 1];
        let mut policy = CoordinateCollector::new(&mut out);
        policy.render(10, 20, 0, 3);
        policy.render(11, 20, 0, 3);
        assert_eq!(policy.len(), 1);
        assert_eq!(policy.overflow(), 1);
        assert_eq!(out[0], ElectronPos::new((10 << 2) | 2, (20 << 2) | 1));
    }
}
