use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tiff::TiffResult;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::colortype::ColorType;
use tiff::encoder::{TiffEncoder, TiffValue};

/// Appends `expected_ext` unless `base_path` already carries it.
pub fn create_path_with_extension(base_path: &Path, expected_ext: &str) -> PathBuf {
    match base_path.extension() {
        Some(ext) if ext.eq_ignore_ascii_case(expected_ext) => base_path.to_path_buf(),
        Some(_) => {
            let mut name = base_path.as_os_str().to_owned();
            name.push(".");
            name.push(expected_ext);
            PathBuf::from(name)
        }
        None => base_path.with_extension(expected_ext),
    }
}

/// Writes a single-directory grayscale TIFF.
pub fn write_tiff<C: ColorType>(
    path: &Path,
    width: usize,
    height: usize,
    data: &[C::Inner],
) -> Result<()>
where
    [C::Inner]: TiffValue,
{
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let encode = || -> TiffResult<()> {
        let mut encoder = TiffEncoder::new(BufWriter::new(file))?;
        encoder.write_image::<C>(width as u32, height as u32, data)
    };
    encode().with_context(|| format!("Failed to encode {}", path.display()))?;
    log::debug!("Wrote {width}x{height} TIFF to {}", path.display());
    Ok(())
}

/// Reads a square gain reference as `f32`, returning the data and its side.
pub fn read_gain(path: &Path) -> Result<(Vec<f32>, usize)> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut decoder = Decoder::new(BufReader::new(file))
        .with_context(|| format!("{} is not a TIFF file", path.display()))?
        .with_limits(Limits::unlimited());

    let (width, height) = decoder.dimensions()?;
    if width != height {
        bail!(
            "Gain reference {} is {width}x{height}, expected a square image",
            path.display()
        );
    }

    let data: Vec<f32> = match decoder.read_image()? {
        DecodingResult::F32(data) => data,
        DecodingResult::F64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U8(data) => data.into_iter().map(f32::from).collect(),
        DecodingResult::U16(data) => data.into_iter().map(f32::from).collect(),
        DecodingResult::U32(data) => data.into_iter().map(|v| v as f32).collect(),
        _ => bail!(
            "Unsupported sample format in gain reference {}",
            path.display()
        ),
    };
    log::info!("Loaded {width}x{height} gain reference {}", path.display());
    Ok((data, width as usize))
}
