use std::ops::{Add, Range};

use anyhow::{Result, bail};
use indicatif::{MultiProgress, ProgressBar};
use rayon::prelude::*;
use tiff::encoder::colortype::{Gray32, Gray32Float};

use eer::defects::correct::correct_defects;
use eer::defects::extract::extract_defects;
use eer::process::SuperResolution;
use eer::process::decompress::{Decompressor, RenderPixel};
use eer::structs::defects::{AreaDefect, CameraDefects, LineDefect, PointDefect};

use super::command::{Cli, RenderArgs};
use super::output::{create_path_with_extension, read_gain, write_tiff};
use super::progress::create_progress_bar;

pub fn cmd_render(args: &RenderArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    let factor = SuperResolution::try_from(args.factor)?;
    if args.spline && !factor.supports_spline() {
        bail!("The spline renderer does not support factor {factor}");
    }

    let mut decompressor = Decompressor::open(&args.input)?;
    decompressor.set_fail_level(cli.fail_level());
    let frames = args.frames.clone().unwrap_or(0..decompressor.frame_count());
    if frames.end > decompressor.frame_count() {
        bail!(
            "Frame range {}..{} exceeds the {} frames of {}",
            frames.start,
            frames.end,
            decompressor.frame_count(),
            args.input.display()
        );
    }

    let (width, height) = (
        factor.scaled(decompressor.width()),
        factor.scaled(decompressor.height()),
    );
    log::info!(
        "Rendering frames {}..{} of {} at {factor} into {width}x{height}{}",
        frames.start,
        frames.end,
        args.input.display(),
        if args.spline {
            " with the cubic B-spline"
        } else {
            ""
        }
    );

    let pb = create_progress_bar(multi, frames.len() as u64, "rendering")?;
    let output = create_path_with_extension(&args.output, "tif");

    if args.spline || args.gain.is_some() {
        let mut image = if args.spline {
            sum_frames::<f32>(&decompressor, factor, frames, width * height, pb.as_ref())?
        } else {
            sum_frames::<u32>(&decompressor, factor, frames, width * height, pb.as_ref())?
                .into_par_iter()
                .map(|count| count as f32)
                .collect()
        };
        if let Some(path) = &args.gain {
            let sensor = (decompressor.width(), decompressor.height());
            apply_gain(
                &mut image,
                (width, height),
                sensor,
                factor,
                path,
                args.threshold,
            )?;
        }
        write_tiff::<Gray32Float>(&output, width, height, &image)?;
    } else {
        let image = sum_frames::<u32>(&decompressor, factor, frames, width * height, pb.as_ref())?;
        write_tiff::<Gray32>(&output, width, height, &image)?;
    }

    if let Some(pb) = pb {
        pb.finish_with_message("done");
    }
    log::info!(
        "Wrote {} ({} electrons decoded)",
        output.display(),
        decompressor.electrons_counted()
    );
    Ok(())
}

/// Memory allowed for the per-worker accumulation buffers.
const ACCUMULATION_BUDGET: usize = 2 << 30;

/// Number of accumulation buffers for `frames` frames of `len` pixels of `T`.
fn accumulation_workers<T>(frames: usize, len: usize) -> usize {
    let per_buffer = (len * size_of::<T>()).max(1);
    rayon::current_num_threads()
        .min(ACCUMULATION_BUDGET / per_buffer)
        .min(frames)
        .max(1)
}

/// Sums `frames` into one image.
///
/// Frames are split into contiguous chunks, each summed into its own buffer;
/// the buffers are then added together.
fn sum_frames<T>(
    decompressor: &Decompressor,
    factor: SuperResolution,
    frames: Range<usize>,
    len: usize,
    pb: Option<&ProgressBar>,
) -> Result<Vec<T>>
where
    T: RenderPixel + Add<Output = T>,
{
    let workers = accumulation_workers::<T>(frames.len(), len);
    let chunk = frames.len().div_ceil(workers);
    log::debug!("Summing {} frames into {workers} buffers", frames.len());

    let partials = (0..workers)
        .into_par_iter()
        .map(|worker| {
            let start = frames.start + worker * chunk;
            let end = (start + chunk).min(frames.end);
            let mut image = vec![T::default(); len];
            for frame in start..end {
                decompressor.decode_image_add(&mut image, factor, frame)?;
                if let Some(pb) = pb {
                    pb.inc(1);
                }
            }
            Ok::<_, anyhow::Error>(image)
        })
        .collect::<Result<Vec<Vec<T>>>>()?;

    let mut partials = partials.into_iter();
    let mut image = partials.next().unwrap_or_else(|| vec![T::default(); len]);
    for other in partials {
        image
            .par_iter_mut()
            .zip(other)
            .for_each(|(a, b)| *a = *a + b);
    }
    Ok(image)
}

/// Multiplies by the gain correction map and patches the defects it reveals.
fn apply_gain(
    image: &mut [f32],
    (width, height): (usize, usize),
    (sensor_width, sensor_height): (usize, usize),
    factor: SuperResolution,
    path: &std::path::Path,
    threshold: f32,
) -> Result<()> {
    let (mut gain, gain_size) = read_gain(path)?;
    let (defects, _) =
        extract_defects(&mut gain, gain_size, sensor_width, sensor_height, threshold)?;

    image.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
        let gain_row = &gain[(y * gain_size / height) * gain_size..];
        for (x, value) in row.iter_mut().enumerate() {
            *value *= gain_row[x * gain_size / width];
        }
    });

    correct_defects(image, width, height, &scale_defects(&defects, factor))?;
    Ok(())
}

/// Maps defects found on the sensor grid onto an image rendered at `factor`.
fn scale_defects(defects: &CameraDefects, factor: SuperResolution) -> CameraDefects {
    let bits = factor.up_bits();
    let lo = |v: usize| if bits >= 0 { v << bits } else { v >> -bits };
    let hi = |v: usize| {
        if bits >= 0 {
            ((v + 1) << bits) - 1
        } else {
            v >> -bits
        }
    };

    let line = |l: &LineDefect| LineDefect {
        begin: lo(l.begin),
        end: hi(l.end),
    };
    let area = |a: &AreaDefect| AreaDefect {
        begin_x: lo(a.begin_x),
        begin_y: lo(a.begin_y),
        end_x: hi(a.end_x),
        end_y: hi(a.end_y),
    };

    let mut scaled = CameraDefects {
        vertical_lines: defects.vertical_lines.iter().map(line).collect(),
        horizontal_lines: defects.horizontal_lines.iter().map(line).collect(),
        areas: defects.areas.iter().map(area).collect(),
        defective_pixels: defects.defective_pixels,
        ..Default::default()
    };
    for p in &defects.points {
        if bits > 0 {
            scaled.areas.push(area(&AreaDefect {
                begin_x: p.x,
                begin_y: p.y,
                end_x: p.x,
                end_y: p.y,
            }));
        } else {
            scaled.points.push(PointDefect {
                x: lo(p.x),
                y: lo(p.y),
            });
        }
    }
    scaled
}

#[cfg(test)]
mod tests {
    use super::*;
    use eer::process::SENSOR_SIZE;
    use eer::process::encode::{encode_frame, encode_headerless};
    use eer::process::extract::{ContainerMode, FrameFooter};
    use eer::structs::electron::ElectronPos;
    use eer::structs::frame::EncodingVersion;

    fn sample() -> CameraDefects {
        CameraDefects {
            points: vec![PointDefect { x: 5, y: 9 }],
            vertical_lines: vec![LineDefect { begin: 10, end: 11 }],
            areas: vec![AreaDefect {
                begin_x: 20,
                begin_y: 30,
                end_x: 23,
                end_y: 31,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn defects_follow_super_resolution() {
        let scaled = scale_defects(&sample(), SuperResolution::Up2);
        assert_eq!(scaled.vertical_lines, [LineDefect { begin: 20, end: 23 }]);
        assert!(scaled.points.is_empty());
        assert_eq!(
            scaled.areas[1],
            AreaDefect {
                begin_x: 10,
                begin_y: 18,
                end_x: 11,
                end_y: 19
            }
        );
    }

    #[test]
    fn defects_follow_binning() {
        let scaled = scale_defects(&sample(), SuperResolution::Down4);
        assert_eq!(scaled.points, [PointDefect { x: 1, y: 2 }]);
        assert_eq!(scaled.vertical_lines, [LineDefect { begin: 2, end: 2 }]);
        assert_eq!(
            scaled.areas[0],
            AreaDefect {
                begin_x: 5,
                begin_y: 7,
                end_x: 5,
                end_y: 7
            }
        );
    }

    #[test]
    fn native_factor_keeps_defects() {
        assert_eq!(scale_defects(&sample(), SuperResolution::Native), sample());
    }

    #[test]
    fn accumulation_buffers_are_bounded() {
        let spline_up4 = 16384 * 16384;
        assert_eq!(accumulation_workers::<f32>(1000, spline_up4), 1);
        assert_eq!(accumulation_workers::<u32>(0, 64), 1);
        assert!(accumulation_workers::<u32>(2, 64) <= 2);
        assert!(accumulation_workers::<u32>(1000, 64) <= rayon::current_num_threads());
    }

    #[test]
    fn frame_sums_match_single_frames() -> Result<()> {
        let electrons = |frame: u16| {
            (0..8u16)
                .map(|i| ElectronPos::from_pixel(64 * i + frame, 512 * i, 0, 0))
                .collect::<Vec<_>>()
        };
        let frames = (0..5u16)
            .map(|frame| {
                let electrons = electrons(frame);
                encode_frame(&electrons, SENSOR_SIZE, SENSOR_SIZE, EncodingVersion::V1)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let stream = encode_headerless(frames.iter().map(|frame| (frame, FrameFooter::Ok)));
        let decompressor = Decompressor::from_bytes(&stream, ContainerMode::Headerless)?;

        let factor = SuperResolution::Down32;
        let len = factor.scaled(SENSOR_SIZE) * factor.scaled(SENSOR_SIZE);
        let sum = sum_frames::<u32>(&decompressor, factor, 1..5, len, None)?;

        let mut expected = vec![0u32; len];
        for frame in 1..5 {
            decompressor.decode_image_add(&mut expected, factor, frame)?;
        }
        assert_eq!(sum, expected);
        assert_eq!(sum.iter().sum::<u32>(), 32);
        Ok(())
    }
}
