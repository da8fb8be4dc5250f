use std::fs::File;
use std::io::{BufWriter, Write};

use anyhow::{Context, Result};
use indicatif::MultiProgress;
use rayon::prelude::*;

use eer::defects::adder::{DefectElectronAdder, SubpixelPositionRandomizer};
use eer::defects::extract::extract_defects;
use eer::defects::neighbor::DefectNeighborMap;
use eer::process::decompress::Decompressor;
use eer::structs::electron::{ElectronPos, write_electron_list};

use super::command::{Cli, PositionsArgs};
use super::output::read_gain;
use super::progress::create_progress_bar;

/// Frames decoded in parallel before their electrons are written out.
const FRAMES_PER_BATCH: usize = 64;

struct Compensation {
    map: DefectNeighborMap,
    gain: Vec<f32>,
    gain_size: usize,
}

pub fn cmd_positions(args: &PositionsArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    let mut decompressor = Decompressor::open(&args.input)?;
    decompressor.set_fail_level(cli.fail_level());

    let compensation = match &args.gain {
        Some(path) => {
            let (mut gain, gain_size) = read_gain(path)?;
            let (defects, _) = extract_defects(
                &mut gain,
                gain_size,
                decompressor.width(),
                decompressor.height(),
                args.threshold,
            )?;
            Some(Compensation {
                map: DefectNeighborMap::build(&defects),
                gain,
                gain_size,
            })
        }
        None => None,
    };

    let file = File::create(&args.output)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;
    let mut writer = BufWriter::new(file);
    let pb = create_progress_bar(
        multi,
        decompressor.frame_count() as u64,
        "decoding positions",
    )?;

    let seed = args.seed;
    let mut totals = FrameTally::default();
    for start in (0..decompressor.frame_count()).step_by(FRAMES_PER_BATCH) {
        let end = (start + FRAMES_PER_BATCH).min(decompressor.frame_count());
        let batch = (start..end)
            .into_par_iter()
            .map(|frame| {
                let frame_seed = seed.map(|seed| seed.wrapping_add(frame as u64));
                let mut electrons = decompressor.read_frame_positions(frame)?;
                let mut tally = FrameTally::default();
                if let Some(c) = &compensation {
                    let mut adder = match frame_seed {
                        Some(seed) => DefectElectronAdder::with_seed(seed),
                        None => DefectElectronAdder::new(),
                    };
                    let decoded = electrons.len();
                    tally.added =
                        adder.execute(&mut electrons, &c.map, &c.gain, c.gain_size)? - decoded;
                    electrons.retain(|e| !e.is_sentinel());
                    tally.masked = decoded + tally.added - electrons.len();
                }
                if args.randomize_subpixel {
                    let mut randomizer = match frame_seed {
                        Some(seed) => SubpixelPositionRandomizer::with_seed(!seed),
                        None => SubpixelPositionRandomizer::new(),
                    };
                    randomizer.execute(&mut electrons);
                }
                if let Some(pb) = &pb {
                    pb.inc(1);
                }
                Ok::<_, anyhow::Error>((electrons, tally))
            })
            .collect::<Result<Vec<(Vec<ElectronPos>, FrameTally)>>>()?;

        for (electrons, tally) in batch {
            write_electron_list(&mut writer, &electrons)?;
            totals.written += electrons.len() as u64;
            totals.added += tally.added;
            totals.masked += tally.masked;
        }
    }
    writer.flush()?;

    if let Some(pb) = pb {
        pb.finish_with_message("done");
    }
    log::info!(
        "Wrote {} electrons from {} frames to {}",
        totals.written,
        decompressor.frame_count(),
        args.output.display()
    );
    if compensation.is_some() {
        log::info!(
            "Defect compensation masked {} electrons and added {}",
            totals.masked,
            totals.added
        );
    }
    Ok(())
}

#[derive(Debug, Default)]
struct FrameTally {
    written: u64,
    added: usize,
    masked: usize,
}
