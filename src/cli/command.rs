use std::ops::Range;
use std::path::PathBuf;

use clap::{Args, Parser as ClapParser, Subcommand, ValueEnum};

#[derive(Debug, ClapParser)]
#[command(
    name       = env!("CARGO_PKG_NAME"),
    version    = concat!(env!("CARGO_PKG_VERSION"), " (eer ", env!("EER_VERSION"), ", built ", env!("BUILD_TIMESTAMP"), ")"),
    author     = env!("CARGO_PKG_AUTHORS"),
    about      = "Tools for inspecting and decoding EER electron-counting movies",
    long_about = None,
)]
pub struct Cli {
    /// Set the log level
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    pub loglevel: LogLevel,

    /// Treat consistency warnings as fatal errors.
    #[arg(long, global = true)]
    pub strict: bool,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Plain)]
    pub log_format: LogFormat,

    /// Show progress bars during operations.
    #[arg(long, global = true)]
    pub progress: bool,

    /// Choose an operation to perform.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn fail_level(&self) -> log::Level {
        if self.strict {
            log::Level::Warn
        } else {
            log::Level::Error
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print file information
    Info(InfoArgs),

    /// Sum frames into an image and write it as TIFF.
    Render(RenderArgs),

    /// Write all electron coordinates as a binary list.
    Positions(PositionsArgs),

    /// Extract sensor defects from a gain reference.
    Defects(DefectsArgs),
}

#[derive(Debug, Args)]
pub struct InfoArgs {
    /// Input EER file (TIFF container or headerless .ecc stream).
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Decode every frame to count electrons.
    #[arg(long)]
    pub count: bool,

    /// Print the acquisition metadata XML.
    #[arg(long)]
    pub metadata: bool,

    /// Write the analysis as YAML.
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct RenderArgs {
    /// Input EER file.
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Output TIFF image.
    #[arg(long, short, value_name = "FILE")]
    pub output: PathBuf,

    /// Super-resolution factor: 1, 2, 4, or -2 down to -32 to bin.
    #[arg(long, value_name = "N", default_value_t = 1, allow_negative_numbers = true)]
    pub factor: i32,

    /// Render with the cubic B-spline kernel into a float image.
    #[arg(long)]
    pub spline: bool,

    /// Frame range to sum, e.g. "10..20" (default: all frames).
    #[arg(long, value_name = "A..B", value_parser = parse_frame_range)]
    pub frames: Option<Range<usize>>,

    /// Gain reference used for gain and defect correction.
    #[arg(long, value_name = "GAIN.tif")]
    pub gain: Option<PathBuf>,

    /// Dead pixel threshold applied to the gain reference.
    #[arg(long, value_name = "T", default_value_t = eer::defects::DEFAULT_DEAD_THRESHOLD)]
    pub threshold: f32,
}

#[derive(Debug, Args)]
pub struct PositionsArgs {
    /// Input EER file.
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Output file of little-endian u16 (x, y) pairs.
    #[arg(long, short, value_name = "FILE")]
    pub output: PathBuf,

    /// Gain reference; defects are compensated with synthetic electrons.
    #[arg(long, value_name = "GAIN.tif")]
    pub gain: Option<PathBuf>,

    /// Dead pixel threshold applied to the gain reference.
    #[arg(long, value_name = "T", default_value_t = eer::defects::DEFAULT_DEAD_THRESHOLD)]
    pub threshold: f32,

    /// Seed for the electron adder (default: from entropy).
    #[arg(long, value_name = "N")]
    pub seed: Option<u64>,

    /// Replace the recorded sub-pixel phases with random ones.
    #[arg(long)]
    pub randomize_subpixel: bool,
}

#[derive(Debug, Args)]
pub struct DefectsArgs {
    /// Gain reference TIFF (float, 4096 or a multiple of it per side).
    #[arg(value_name = "GAIN.tif")]
    pub input: PathBuf,

    /// Dead pixel threshold.
    #[arg(long, value_name = "T", default_value_t = eer::defects::DEFAULT_DEAD_THRESHOLD)]
    pub threshold: f32,

    /// Write the multiplicative correction map as a float TIFF.
    #[arg(long, value_name = "FILE")]
    pub output_gain: Option<PathBuf>,

    /// Write the defect list as YAML.
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,
}

fn parse_frame_range(value: &str) -> Result<Range<usize>, String> {
    let (start, end) = value
        .split_once("..")
        .ok_or_else(|| format!("expected A..B, got {value:?}"))?;
    let start = start.trim().parse::<usize>().map_err(|e| e.to_string())?;
    let end = end.trim().parse::<usize>().map_err(|e| e.to_string())?;
    if start >= end {
        return Err(format!("empty frame range {start}..{end}"));
    }
    Ok(start..end)
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    /// Disable logging output.
    Off,
    /// No output except errors.
    Error,
    /// Show warnings and errors.
    Warn,
    /// Show info, warnings and errors (default).
    Info,
    /// Show debug, info, warnings and errors.
    Debug,
    /// Show all log messages including trace.
    Trace,
}

impl LogLevel {
    /// Convert LogLevel to log::LevelFilter
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Colorized human-readable text.
    Plain,
    /// Structured JSON per log record.
    Json,
}

#[test]
fn frame_ranges() {
    assert_eq!(parse_frame_range("3..10"), Ok(3..10));
    assert!(parse_frame_range("10..10").is_err());
    assert!(parse_frame_range("7").is_err());
}
