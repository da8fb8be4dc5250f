use anyhow::{Context, Result};
use indicatif::MultiProgress;
use rayon::prelude::*;
use serde::Serialize;

use eer::process::decode::SubpixelHistogram;
use eer::process::decompress::Decompressor;
use eer::process::extract::ContainerMode;
use eer::process::render::CountOnly;

use super::command::{Cli, InfoArgs};
use super::progress::create_progress_bar;

#[derive(Debug, Serialize)]
struct InfoReport {
    input: String,
    container: String,
    width: usize,
    height: usize,
    frames: usize,
    compressed_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    footers: Option<FooterReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    electrons: Option<ElectronReport>,
}

#[derive(Debug, Serialize)]
struct FooterReport {
    ok: usize,
    error: usize,
}

#[derive(Debug, Serialize)]
struct ElectronReport {
    total: u64,
    /// Mean electrons per pixel per frame.
    mean_dose: f64,
    truncated_frames: usize,
    /// Share of electrons per encoded sub-pixel phase, row-major by sub_y.
    subpixel_occupancy: Vec<f64>,
    per_frame: Vec<FrameReport>,
}

#[derive(Debug, Serialize)]
struct FrameReport {
    frame: usize,
    bytes: usize,
    electrons: u64,
    dose: f64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    truncated: bool,
}

pub fn cmd_info(args: &InfoArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    log::info!("Analyzing EER file: {}", args.input.display());

    let mut decompressor = Decompressor::open(&args.input)?;
    decompressor.set_fail_level(cli.fail_level());
    let (width, height, frames) = decompressor.size();

    println!("Container:        {}", decompressor.mode());
    println!("Size:             {width}x{height}");
    println!("Frames:           {frames}");
    println!(
        "Compressed:       {} bytes ({:.1} bytes/frame)",
        decompressor.compressed_bytes(),
        decompressor.compressed_bytes() as f64 / frames.max(1) as f64
    );

    let footers = (decompressor.mode() == ContainerMode::Headerless).then(|| {
        let tally = decompressor.footer_tally();
        println!("Footers:          {} ok, {} error", tally.ok, tally.error);
        FooterReport {
            ok: tally.ok,
            error: tally.error,
        }
    });

    if args.metadata {
        match decompressor.acquisition_metadata() {
            Ok("") => println!("Metadata:         (none)"),
            Ok(xml) => println!("Metadata:\n{xml}"),
            Err(e) => log::warn!("{e}"),
        }
    }

    let electrons = if args.count {
        Some(count_electrons(&decompressor, multi)?)
    } else {
        None
    };

    if let Some(report) = &electrons {
        println!("Electrons:        {}", report.total);
        println!("Mean dose:        {:.4} e/pix/frame", report.mean_dose);
        if report.truncated_frames > 0 {
            println!("Truncated frames: {}", report.truncated_frames);
        }
    }

    if let Some(path) = &args.report {
        let report = InfoReport {
            input: args.input.display().to_string(),
            container: decompressor.mode().to_string(),
            width,
            height,
            frames,
            compressed_bytes: decompressor.compressed_bytes(),
            footers,
            electrons,
        };
        let yaml = serde_yaml_ng::to_string(&report)?;
        std::fs::write(path, yaml).with_context(|| format!("Failed to write {}", path.display()))?;
        log::info!("Report written to {}", path.display());
    }

    Ok(())
}

fn count_electrons(
    decompressor: &Decompressor,
    multi: Option<&MultiProgress>,
) -> Result<ElectronReport> {
    let pb = create_progress_bar(
        multi,
        decompressor.frame_count() as u64,
        "counting electrons",
    )?;
    let pixels = (decompressor.width() * decompressor.height()) as f64;

    let (per_frame, histogram) = (0..decompressor.frame_count())
        .into_par_iter()
        .map(|frame| {
            let mut histogram = SubpixelHistogram::default();
            let stats = decompressor.decode_with(frame, &mut CountOnly, Some(&mut histogram))?;
            if let Some(pb) = &pb {
                pb.inc(1);
            }
            let report = FrameReport {
                frame,
                bytes: decompressor.frames()[frame].len(),
                electrons: stats.electrons,
                dose: stats.electrons as f64 / pixels,
                truncated: stats.truncated,
            };
            Ok::<_, anyhow::Error>((vec![report], histogram))
        })
        .try_reduce(
            || (Vec::new(), SubpixelHistogram::default()),
            |(mut frames, mut histogram), (other_frames, other_histogram)| {
                frames.extend(other_frames);
                histogram.merge(&other_histogram);
                Ok((frames, histogram))
            },
        )?;

    if let Some(pb) = pb {
        pb.finish_with_message("counted");
    }

    let total = decompressor.electrons_counted();
    let truncated_frames = per_frame.iter().filter(|f| f.truncated).count();
    let occupancy: Vec<f64> = (0..16)
        .map(|i| histogram.count(i % 4, i / 4) as f64 / histogram.total().max(1) as f64)
        .collect();
    log::debug!("Sub-pixel occupancy: {occupancy:?}");

    Ok(ElectronReport {
        total,
        mean_dose: total as f64 / pixels / per_frame.len().max(1) as f64,
        truncated_frames,
        subpixel_occupancy: occupancy,
        per_frame,
    })
}
