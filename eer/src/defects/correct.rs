use log::warn;
use rayon::prelude::*;

use crate::structs::defects::{AreaDefect, CameraDefects, LineDefect};
use crate::utils::errors::DefectError;

/// Pixel types supported by static defect correction.
pub trait Sample: Copy + Send + Sync {
    fn to_f64(self) -> f64;

    /// Converts back, rounding and clamping for integer types.
    fn from_f64(value: f64) -> Self;
}

macro_rules! impl_integer_sample {
    ($($t:ty),+) => { $(
        impl Sample for $t {
            #[inline(always)]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[inline(always)]
            fn from_f64(value: f64) -> Self {
                value.round().clamp(0.0, <$t>::MAX as f64) as $t
            }
        }
    )+ }
}

impl_integer_sample!(u8, u16, u32);

impl Sample for f32 {
    #[inline(always)]
    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    #[inline(always)]
    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

/// Neighbouring positions before and after `line` on an axis of `len`
/// pixels. A missing side falls back to the opposite one.
fn line_borders(line: &LineDefect, len: usize) -> Option<(usize, usize)> {
    let before = if line.begin > 0 {
        Some(line.begin - 1)
    } else {
        Some(line.end + 1).filter(|&p| p < len)
    };
    let after = if line.end + 1 < len {
        Some(line.end + 1)
    } else {
        line.begin.checked_sub(1)
    };
    before.zip(after)
}

#[inline(always)]
fn blend(before: f64, after: f64, offset: usize, len: usize) -> f64 {
    let coef = (offset + 1) as f64 / (len + 1) as f64;
    before * (1.0 - coef) + after * coef
}

fn correct_area<T: Sample>(image: &mut [T], width: usize, height: usize, area: &AreaDefect) {
    let horizontal = line_borders(
        &LineDefect {
            begin: area.begin_x,
            end: area.end_x,
        },
        width,
    );
    let vertical = line_borders(
        &LineDefect {
            begin: area.begin_y,
            end: area.end_y,
        },
        height,
    );
    let (Some((x_before, x_after)), Some((y_before, y_after))) = (horizontal, vertical) else {
        warn!("Area defect {area:?} has no neighbours, left uncorrected");
        return;
    };

    let nx = (2 * (area.width() + 1)) as f64;
    let ny = (2 * (area.height() + 1)) as f64;
    for y in area.begin_y..=area.end_y {
        let cy = (y - area.begin_y + 1) as f64 / ny;
        for x in area.begin_x..=area.end_x {
            let cx = (x - area.begin_x + 1) as f64 / nx;
            let value = image[y_before * width + x].to_f64() * (0.5 - cy)
                + image[y_after * width + x].to_f64() * cy
                + image[y * width + x_before].to_f64() * (0.5 - cx)
                + image[y * width + x_after].to_f64() * cx;
            image[y * width + x] = T::from_f64(value);
        }
    }
}

fn fits(defects: &CameraDefects, width: usize, height: usize) -> bool {
    let lines_fit = |lines: &[LineDefect], limit: usize| {
        lines.iter().all(|l| l.begin <= l.end && l.end < limit)
    };
    let points_fit = defects.points.iter().all(|p| p.x < width && p.y < height);
    let areas_fit = defects.areas.iter().all(|a| {
        a.begin_x <= a.end_x && a.begin_y <= a.end_y && a.end_x < width && a.end_y < height
    });
    lines_fit(&defects.vertical_lines, width)
        && lines_fit(&defects.horizontal_lines, height)
        && points_fit
        && areas_fit
}

/// Replaces defective pixels of a rendered `width` x `height` image by
/// interpolating their neighbours.
///
/// Vertical lines are corrected first, then horizontal lines, points and
/// areas, so later passes see the already patched pixels.
pub fn correct_defects<T: Sample>(
    image: &mut [T],
    width: usize,
    height: usize,
    defects: &CameraDefects,
) -> Result<(), DefectError> {
    if image.len() != width * height || !fits(defects, width, height) {
        return Err(DefectError::ImageSizeMismatch {
            width,
            height,
            actual: image.len(),
        });
    }

    for line in &defects.vertical_lines {
        let Some((left, right)) = line_borders(line, width) else {
            warn!("Vertical line defect {line:?} covers the image, left uncorrected");
            continue;
        };
        image.par_chunks_mut(width).for_each(|row| {
            let (before, after) = (row[left].to_f64(), row[right].to_f64());
            for x in line.begin..=line.end {
                row[x] = T::from_f64(blend(before, after, x - line.begin, line.len()));
            }
        });
    }

    for line in &defects.horizontal_lines {
        let Some((above, below)) = line_borders(line, height) else {
            warn!("Horizontal line defect {line:?} covers the image, left uncorrected");
            continue;
        };
        for x in 0..width {
            let (before, after) = (
                image[above * width + x].to_f64(),
                image[below * width + x].to_f64(),
            );
            for y in line.begin..=line.end {
                image[y * width + x] =
                    T::from_f64(blend(before, after, y - line.begin, line.len()));
            }
        }
    }

    for point in &defects.points {
        let (x, y) = (point.x, point.y);
        let neighbours = [
            (y > 0).then(|| (y - 1) * width + x),
            (x > 0).then(|| y * width + x - 1),
            (x + 1 < width).then(|| y * width + x + 1),
            (y + 1 < height).then(|| (y + 1) * width + x),
        ];
        let (sum, count) = neighbours
            .into_iter()
            .flatten()
            .fold((0.0, 0usize), |(sum, count), index| {
                (sum + image[index].to_f64(), count + 1)
            });
        if count > 0 {
            image[y * width + x] = T::from_f64(sum / count as f64);
        }
    }

    for area in &defects.areas {
        correct_area(image, width, height, area);
    }

    Ok(())
}
