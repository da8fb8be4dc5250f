use anyhow::{Context, Result};
use indicatif::MultiProgress;
use serde::Serialize;
use tiff::encoder::colortype::Gray32Float;

use eer::defects::extract::{GainStatistics, extract_defects};
use eer::process::SENSOR_SIZE;
use eer::structs::defects::CameraDefects;

use super::command::{Cli, DefectsArgs};
use super::output::{create_path_with_extension, read_gain, write_tiff};
use super::progress::create_spinner;

#[derive(Debug, Serialize)]
struct DefectReport {
    gain: String,
    gain_size: usize,
    threshold: f32,
    mean_dose: f64,
    total_dose: f64,
    valid_pixels: usize,
    dead_pixels: usize,
    hot_pixels: usize,
    defective_pixels: usize,
    points: Vec<[usize; 2]>,
    vertical_lines: Vec<[usize; 2]>,
    horizontal_lines: Vec<[usize; 2]>,
    /// `[begin_x, begin_y, end_x, end_y]`, inclusive.
    areas: Vec<[usize; 4]>,
}

impl DefectReport {
    fn new(
        args: &DefectsArgs,
        gain_size: usize,
        stats: &GainStatistics,
        defects: &CameraDefects,
    ) -> Self {
        Self {
            gain: args.input.display().to_string(),
            gain_size,
            threshold: args.threshold,
            mean_dose: stats.mean_dose,
            total_dose: stats.total_dose,
            valid_pixels: stats.valid_pixels,
            dead_pixels: stats.dead_pixels,
            hot_pixels: stats.hot_pixels,
            defective_pixels: defects.defective_pixels,
            points: defects.points.iter().map(|p| [p.x, p.y]).collect(),
            vertical_lines: defects
                .vertical_lines
                .iter()
                .map(|l| [l.begin, l.end])
                .collect(),
            horizontal_lines: defects
                .horizontal_lines
                .iter()
                .map(|l| [l.begin, l.end])
                .collect(),
            areas: defects
                .areas
                .iter()
                .map(|a| [a.begin_x, a.begin_y, a.end_x, a.end_y])
                .collect(),
        }
    }
}

pub fn cmd_defects(args: &DefectsArgs, _cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    let (mut gain, gain_size) = read_gain(&args.input)?;

    let spinner = create_spinner(multi, "extracting defects")?;
    let (defects, stats) = extract_defects(
        &mut gain,
        gain_size,
        SENSOR_SIZE,
        SENSOR_SIZE,
        args.threshold,
    )
    .with_context(|| format!("Failed to extract defects from {}", args.input.display()))?;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    println!(
        "Gain reference:   {gain_size}x{gain_size} (scale {})",
        stats.scale
    );
    println!("Mean dose:        {:.3} e/pix", stats.mean_dose);
    println!("Dead pixels:      {}", stats.dead_pixels);
    println!("Hot pixels:       {}", stats.hot_pixels);
    println!("Defects:          {defects}");

    if let Some(path) = &args.output_gain {
        let path = create_path_with_extension(path, "tif");
        write_tiff::<Gray32Float>(&path, gain_size, gain_size, &gain)?;
        log::info!("Correction map written to {}", path.display());
    }

    if let Some(path) = &args.report {
        let yaml = serde_yaml_ng::to_string(&DefectReport::new(args, gain_size, &stats, &defects))?;
        std::fs::write(path, yaml).with_context(|| format!("Failed to write {}", path.display()))?;
        log::info!("Report written to {}", path.display());
    }

    Ok(())
}
