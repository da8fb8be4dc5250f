use log::{debug, info};
use rayon::prelude::*;

use crate::structs::defects::{AreaDefect, CameraDefects, LineDefect, PointDefect};
use crate::utils::errors::DefectError;

const VISITED_MARK: f32 = -2.0;
/// Between [`VISITED_MARK`] and zero so visited pixels compare safely.
const VISITED_THRESHOLD: f32 = -1.0;
const HOT_PIXEL_FACTOR: f64 = 400.0;

/// Dose statistics of a gain reference.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GainStatistics {
    /// Mean dose per valid pixel of the (reduced) gain image.
    pub mean_dose: f64,
    pub total_dose: f64,
    pub valid_pixels: usize,
    /// Pixels at or below the dead threshold before region growing.
    pub dead_pixels: usize,
    /// Pixels above 400x the mean dose; they are zeroed and become defects.
    pub hot_pixels: usize,
    /// Gain pixels per sensor pixel along each axis.
    pub scale: usize,
}

#[inline(always)]
fn is_dead(value: f32, threshold: f32) -> bool {
    value < threshold && value > VISITED_THRESHOLD
}

fn reduce(gain: &[f32], gain_size: usize, scale: usize, width: usize, height: usize) -> Vec<f32> {
    let mut reduced = vec![0f32; width * height];
    reduced
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, out) in row.iter_mut().enumerate() {
                let sum: f64 = (0..scale)
                    .map(|sy| {
                        let start = (y * scale + sy) * gain_size + x * scale;
                        gain[start..start + scale]
                            .iter()
                            .map(|&v| f64::from(v))
                            .sum::<f64>()
                    })
                    .sum();
                *out = sum as f32;
            }
        });
    reduced
}

/// Finds defect regions in a sensor-sized image, marking visited pixels.
fn scan(
    image: &mut [f32],
    width: usize,
    height: usize,
    threshold: f32,
) -> Result<(CameraDefects, GainStatistics), DefectError> {
    let (total_dose, valid_pixels) = image
        .par_iter()
        .filter(|&&v| !(v <= threshold && v > VISITED_THRESHOLD))
        .map(|&v| (f64::from(v), 1usize))
        .reduce(|| (0.0, 0), |a, b| (a.0 + b.0, a.1 + b.1));
    if valid_pixels == 0 {
        return Err(DefectError::NoValidPixels(f64::from(threshold)));
    }

    let mean_dose = total_dose / valid_pixels as f64;
    let hot_threshold = HOT_PIXEL_FACTOR * mean_dose;
    debug!("Hot pixel threshold: {hot_threshold}");

    let mut defects = CameraDefects::default();
    let mut hot_pixels = 0;

    for y in 0..height {
        for x in 0..width {
            let index = y * width + x;
            if f64::from(image[index]) > hot_threshold {
                image[index] = 0.0;
                hot_pixels += 1;
            }
            if !is_dead(image[index], threshold) {
                continue;
            }

            let mut end_x = x + 1;
            while end_x < width && image[y * width + end_x] < threshold {
                end_x += 1;
            }

            let mut end_y = y;
            loop {
                image[end_y * width + x..end_y * width + end_x].fill(VISITED_MARK);
                end_y += 1;
                if end_y >= height
                    || image[end_y * width + x..end_y * width + end_x]
                        .iter()
                        .any(|&v| v > threshold)
                {
                    break;
                }
            }

            let (span_x, span_y) = (end_x - x, end_y - y);
            defects.defective_pixels += span_x * span_y;
            debug!(
                "Defect at x {x}..{end_x}, y {y}..{end_y}: {} pixels",
                span_x * span_y
            );

            if span_x == 1 && span_y == 1 {
                defects.points.push(PointDefect { x, y });
            } else if span_x == width {
                defects.horizontal_lines.push(LineDefect {
                    begin: y,
                    end: end_y - 1,
                });
            } else if span_y == height {
                defects.vertical_lines.push(LineDefect {
                    begin: x,
                    end: end_x - 1,
                });
            } else {
                defects.areas.push(AreaDefect {
                    begin_x: x,
                    begin_y: y,
                    end_x: end_x - 1,
                    end_y: end_y - 1,
                });
            }
        }
    }

    let stats = GainStatistics {
        mean_dose,
        total_dose,
        valid_pixels,
        dead_pixels: image.len() - valid_pixels,
        hot_pixels,
        scale: 1,
    };
    Ok((defects, stats))
}

fn fill_block(
    gain: &mut [f32],
    gain_size: usize,
    xs: std::ops::Range<usize>,
    ys: std::ops::Range<usize>,
) {
    for y in ys {
        gain[y * gain_size + xs.start..y * gain_size + xs.end].fill(1.0);
    }
}

/// Sets the gain of every defective pixel to `1.0`.
fn neutralize_defects(gain: &mut [f32], gain_size: usize, scale: usize, defects: &CameraDefects) {
    for line in &defects.vertical_lines {
        fill_block(
            gain,
            gain_size,
            scale * line.begin..scale * (line.end + 1),
            0..gain_size,
        );
    }
    for line in &defects.horizontal_lines {
        fill_block(
            gain,
            gain_size,
            0..gain_size,
            scale * line.begin..scale * (line.end + 1),
        );
    }
    for point in &defects.points {
        fill_block(
            gain,
            gain_size,
            scale * point.x..scale * (point.x + 1),
            scale * point.y..scale * (point.y + 1),
        );
    }
    for area in &defects.areas {
        fill_block(
            gain,
            gain_size,
            scale * area.begin_x..scale * (area.end_x + 1),
            scale * area.begin_y..scale * (area.end_y + 1),
        );
    }
}

/// Extracts camera defects from a gain reference and turns it into a
/// multiplicative correction map in place.
///
/// `gain` is a `gain_size` x `gain_size` image; when `gain_size` is a multiple
/// `k` of the sensor `width`, defects are searched in the `k`x`k` box-summed
/// image and the correction map keeps the full resolution.
pub fn extract_defects(
    gain: &mut [f32],
    gain_size: usize,
    width: usize,
    height: usize,
    dead_threshold: f32,
) -> Result<(CameraDefects, GainStatistics), DefectError> {
    if gain.len() != gain_size * gain_size {
        return Err(DefectError::GainSizeMismatch {
            size: gain_size,
            actual: gain.len(),
        });
    }
    if width == 0
        || gain_size < width
        || gain_size % width != 0
        || gain_size / width * height != gain_size
    {
        return Err(DefectError::GainScaleMismatch {
            gain_size,
            sensor_size: width,
        });
    }

    let scale = gain_size / width;
    debug!("Extracting defects from {gain_size}x{gain_size} gain, scale {scale}");
    let (defects, mut stats) = if scale > 1 {
        let mut reduced = reduce(gain, gain_size, scale, width, height);
        scan(&mut reduced, width, height, dead_threshold)?
    } else {
        scan(gain, width, height, dead_threshold)?
    };
    stats.scale = scale;

    let numerator = stats.mean_dose / (scale * scale) as f64;
    gain.par_iter_mut().for_each(|g| {
        if *g > 0.0 {
            *g = (numerator / f64::from(*g)) as f32;
        }
    });
    neutralize_defects(gain, gain_size, scale, &defects);

    info!(
        "Gain reference: total dose {:.0}, {} valid pixels, mean dose {:.3} e/pix, {} dead, {} hot",
        stats.total_dose, stats.valid_pixels, stats.mean_dose, stats.dead_pixels, stats.hot_pixels
    );
    info!("Defects: {defects}");
    for line in &defects.vertical_lines {
        debug!("Vertical line defect at {} -- {}", line.begin, line.end);
    }
    for line in &defects.horizontal_lines {
        debug!("Horizontal line defect at {} -- {}", line.begin, line.end);
    }

    Ok((defects, stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    const N: usize = 32;

    fn defect_gain() -> Vec<f32> {
        let mut gain = vec![1f32; N * N];
        for y in 0..N {
            gain[y * N + 20] = 0.0;
        }
        for x in 0..N {
            gain[28 * N + x] = 0.0;
        }
        gain[3 * N + 3] = 0.1;
        for (x, y) in [(5, 6), (6, 6), (5, 7), (6, 7)] {
            gain[y * N + x] = 0.0;
        }
        gain[12 * N + 1] = 5000.0;
        gain
    }

    #[test]
    fn classifies_regions() -> anyhow::Result<()> {
        let mut gain = defect_gain();
        let (defects, stats) = extract_defects(&mut gain, N, N, N, 0.9)?;

        assert_eq!(
            defects.points,
            [PointDefect { x: 3, y: 3 }, PointDefect { x: 1, y: 12 }]
        );
        assert_eq!(defects.vertical_lines, [LineDefect { begin: 20, end: 20 }]);
        assert_eq!(
            defects.horizontal_lines,
            [LineDefect { begin: 28, end: 28 }]
        );
        assert_eq!(
            defects.areas,
            [AreaDefect {
                begin_x: 5,
                begin_y: 6,
                end_x: 6,
                end_y: 7
            }]
        );
        assert_eq!(defects.defective_pixels, 32 + 32 + 1 + 4 + 1);

        assert_eq!(stats.hot_pixels, 1);
        assert_eq!(stats.valid_pixels, 956);
        assert!((stats.mean_dose - 5955.0 / 956.0).abs() < 1e-9);

        assert!((f64::from(gain[0]) - stats.mean_dose).abs() < 1e-4);
        for index in [3 * N + 3, 12 * N + 1, 7 * N + 6, 28 * N + 2, 9 * N + 20] {
            assert_eq!(gain[index], 1.0, "pixel {index}");
        }
        Ok(())
    }

    #[test]
    fn reduces_super_resolved_gain() -> anyhow::Result<()> {
        let size = 16;
        let mut gain = vec![0.25f32; size * size];
        for y in 4..6 {
            for x in 4..6 {
                gain[y * size + x] = 0.0;
            }
        }

        let (defects, stats) = extract_defects(&mut gain, size, 8, 8, 0.9)?;
        assert_eq!(defects.points, [PointDefect { x: 2, y: 2 }]);
        assert_eq!(stats.scale, 2);
        assert_eq!(stats.valid_pixels, 63);
        assert!(gain.iter().all(|&g| (g - 1.0).abs() < 1e-6));
        Ok(())
    }

    #[test]
    fn rejects_bad_gain() {
        let mut gain = vec![1f32; 10];
        assert!(matches!(
            extract_defects(&mut gain, 4, 4, 4, 0.9),
            Err(DefectError::GainSizeMismatch {
                size: 4,
                actual: 10
            })
        ));

        let mut gain = vec![1f32; 36];
        assert!(matches!(
            extract_defects(&mut gain, 6, 4, 4, 0.9),
            Err(DefectError::GainScaleMismatch { gain_size: 6, .. })
        ));

        let mut gain = vec![0f32; 16];
        assert!(matches!(
            extract_defects(&mut gain, 4, 4, 4, 0.9),
            Err(DefectError::NoValidPixels(_))
        ));
    }
}
