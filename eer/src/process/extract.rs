use std::io::Cursor;
use std::path::Path;

use anyhow::Result;
use log::{debug, info, trace};
use tiff::decoder::ifd::Value;
use tiff::decoder::{Decoder, Limits};
use tiff::tags::Tag;

use crate::process::SENSOR_SIZE;
use crate::structs::frame::{EncodingVersion, Frame};
use crate::utils::bitstream_io::WORD_BYTES;
use crate::utils::errors::ContainerError;

/// Private TIFF tag holding the acquisition metadata XML.
pub const TAG_ACQUISITION_METADATA: u16 = 65001;

/// Length of the hardware footer closing every headerless frame.
pub const FOOTER_BYTES: usize = 24;

const FOOTER_OK: &[u8; FOOTER_BYTES] = b"ThermoFisherECComprOK000";
const FOOTER_ERROR: &[u8; FOOTER_BYTES] = b"ThermoFisherECComprERR00";

const FOOTER_WORDS: usize = FOOTER_BYTES / WORD_BYTES;

/// Hardware status recorded in a headerless frame footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFooter {
    Ok,
    Error,
}

impl FrameFooter {
    pub fn bytes(self) -> &'static [u8; FOOTER_BYTES] {
        match self {
            Self::Ok => FOOTER_OK,
            Self::Error => FOOTER_ERROR,
        }
    }

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes == FOOTER_OK {
            Some(Self::Ok)
        } else if bytes == FOOTER_ERROR {
            Some(Self::Error)
        } else {
            None
        }
    }
}

/// OK and error frame counts of a headerless stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FooterTally {
    pub ok: usize,
    pub error: usize,
}

impl FooterTally {
    fn count(&mut self, footer: FrameFooter) {
        match footer {
            FrameFooter::Ok => self.ok += 1,
            FrameFooter::Error => self.error += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerMode {
    /// TIFF file with one directory per frame.
    Directory,
    /// Raw back-to-back frames delimited by hardware footers.
    Headerless,
}

impl ContainerMode {
    /// `.ecc` files are headerless, everything else is read as TIFF.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("ecc") => Self::Headerless,
            _ => Self::Directory,
        }
    }
}

impl std::fmt::Display for ContainerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Directory => write!(f, "tiff"),
            Self::Headerless => write!(f, "headerless"),
        }
    }
}

/// Frames and side data extracted from one container.
#[derive(Debug, Clone)]
pub struct FrameSource {
    pub mode: ContainerMode,
    pub width: usize,
    pub height: usize,
    pub frames: Vec<Frame>,
    pub metadata: Option<String>,
    pub footers: FooterTally,
}

impl FrameSource {
    pub fn from_bytes(bytes: &[u8], mode: ContainerMode) -> Result<Self> {
        match mode {
            ContainerMode::Directory => read_directories(bytes),
            ContainerMode::Headerless => Ok(read_headerless(bytes)?),
        }
    }

    pub fn compressed_bytes(&self) -> u64 {
        self.frames.iter().map(|frame| frame.len() as u64).sum()
    }
}

/// Indexes a headerless stream by walking footers back from the end.
pub fn read_headerless(bytes: &[u8]) -> Result<FrameSource, ContainerError> {
    // A trailing partial word reads as if zero-padded
    let word_count = bytes.len().div_ceil(WORD_BYTES);
    let word = |index: usize| {
        let mut word = [0u8; WORD_BYTES];
        let start = (index * WORD_BYTES).min(bytes.len());
        let end = ((index + 1) * WORD_BYTES).min(bytes.len());
        word[..end - start].copy_from_slice(&bytes[start..end]);
        word
    };

    let mut footers = FooterTally::default();
    let mut frames = Vec::new();
    let mut end = word_count;

    while end > 0 {
        if end < FOOTER_WORDS + 1 {
            return Err(ContainerError::StreamTooShort {
                remaining_words: end,
            });
        }

        let offset = end * WORD_BYTES;
        let footer_words: Vec<u8> = (end - FOOTER_WORDS..end).flat_map(word).collect();
        let footer =
            FrameFooter::parse(&footer_words).ok_or(ContainerError::InvalidFooter { offset })?;
        footers.count(footer);

        let size_index = end - FOOTER_WORDS - 1;
        let size_words = u64::from_le_bytes(word(size_index));
        if size_words > size_index as u64 {
            return Err(ContainerError::FrameSizeOutOfRange {
                size_words,
                remaining_words: size_index,
            });
        }

        let start = size_index - size_words as usize;
        trace!("Headerless frame at word {start}, {size_words} words, {footer:?}");
        // The size word and footer follow, so the frame data is never the partial tail
        let data = &bytes[start * WORD_BYTES..size_index * WORD_BYTES];
        frames.push(Frame::new(data, EncodingVersion::V1));
        end = start;
    }

    frames.reverse();
    info!(
        "Found {} frames; #OK = {}, #Error = {}",
        frames.len(),
        footers.ok,
        footers.error
    );
    if frames.is_empty() {
        return Err(ContainerError::NoFrames);
    }

    Ok(FrameSource {
        mode: ContainerMode::Headerless,
        width: SENSOR_SIZE,
        height: SENSOR_SIZE,
        frames,
        metadata: None,
        footers,
    })
}

fn value_bytes(value: Value) -> Vec<u8> {
    match value {
        Value::Ascii(text) => text.into_bytes(),
        Value::List(items) => items
            .into_iter()
            .filter_map(|item| item.into_u8().ok())
            .collect(),
        other => other.into_u8().map(|byte| vec![byte]).unwrap_or_default(),
    }
}

fn strip_bytes<'a>(
    bytes: &'a [u8],
    directory: usize,
    offsets: &[u64],
    counts: &[u64],
) -> Result<Vec<&'a [u8]>, ContainerError> {
    if offsets.len() != counts.len() {
        return Err(ContainerError::MismatchedStripTags {
            directory,
            offsets: offsets.len(),
            counts: counts.len(),
        });
    }

    offsets
        .iter()
        .zip(counts)
        .enumerate()
        .map(|(strip, (&offset, &length))| {
            offset
                .checked_add(length)
                .filter(|&end| end <= bytes.len() as u64)
                .map(|end| &bytes[offset as usize..end as usize])
                .ok_or(ContainerError::StripOutOfBounds {
                    directory,
                    strip,
                    offset,
                    length,
                })
        })
        .collect()
}

/// Reads every TIFF directory, collecting EER frames and checking baseline images.
pub fn read_directories(bytes: &[u8]) -> Result<FrameSource> {
    let mut decoder = Decoder::new(Cursor::new(bytes))?.with_limits(Limits::unlimited());
    let mut frames = Vec::new();
    let mut metadata = None;
    let mut directory = 0usize;

    loop {
        let (width, height) = decoder.dimensions()?;
        let compression = decoder
            .find_tag_unsigned::<u16>(Tag::Compression)?
            .unwrap_or(1);
        let offsets = decoder.get_tag_u64_vec(Tag::StripOffsets)?;
        let counts = decoder.get_tag_u64_vec(Tag::StripByteCounts)?;
        let strips = strip_bytes(bytes, directory, &offsets, &counts)?;

        if metadata.is_none() {
            if let Some(value) = decoder.find_tag(Tag::Unknown(TAG_ACQUISITION_METADATA))? {
                let blob = value_bytes(value);
                debug!(
                    "Acquisition metadata: {} bytes in directory {directory}",
                    blob.len()
                );
                metadata = Some(String::from_utf8_lossy(&blob).into_owned());
            }
        }

        match EncodingVersion::from_compression(compression) {
            Some(encoding) => {
                if width as usize != SENSOR_SIZE || height as usize != SENSOR_SIZE {
                    return Err(ContainerError::UnsupportedDimensions {
                        directory,
                        width,
                        height,
                    }
                    .into());
                }
                let data: Vec<u8> = strips.concat();
                trace!("Directory {directory}: {} bytes, {encoding}", data.len());
                frames.push(Frame::new(data, encoding));
            }
            None => {
                let bits = decoder
                    .find_tag_unsigned::<u64>(Tag::BitsPerSample)?
                    .unwrap_or(1);
                let expected = u64::from(width) * u64::from(height) * bits / 8;
                let actual: u64 = counts.iter().sum();
                if actual != expected {
                    return Err(ContainerError::BaselineSizeMismatch {
                        directory,
                        compression,
                        actual,
                        expected,
                    }
                    .into());
                }
                debug!("Directory {directory}: baseline {width}x{height} image, {bits} bits");
            }
        }

        if !decoder.more_images() {
            break;
        }
        decoder.next_image()?;
        directory += 1;
    }

    debug!(
        "Read {} EER frames from {} directories",
        frames.len(),
        directory + 1
    );
    if frames.is_empty() {
        return Err(ContainerError::NoFrames.into());
    }
    let Some(metadata) = metadata else {
        return Err(ContainerError::MissingMetadata(TAG_ACQUISITION_METADATA).into());
    };

    Ok(FrameSource {
        mode: ContainerMode::Directory,
        width: SENSOR_SIZE,
        height: SENSOR_SIZE,
        frames,
        metadata: Some(metadata),
        footers: FooterTally::default(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::process::encode::{encode_frame, encode_headerless};
    use crate::structs::electron::ElectronPos;

    /// One TIFF directory for a hand-assembled test container.
    pub(crate) struct TestDirectory {
        pub width: u32,
        pub height: u32,
        pub compression: u16,
        pub bits_per_sample: u16,
        pub strips: Vec<Vec<u8>>,
        pub metadata: Option<Vec<u8>>,
    }

    /// Assembles a little-endian classic TIFF: strip data first, then IFDs.
    pub(crate) fn build_tiff(directories: &[TestDirectory]) -> Vec<u8> {
        let mut out = b"II*\0\0\0\0\0".to_vec();
        let mut ifd_offsets = Vec::new();
        let mut link_positions: Vec<usize> = Vec::new();

        for dir in directories {
            let mut offsets = Vec::new();
            for strip in &dir.strips {
                offsets.push(out.len() as u32);
                out.extend_from_slice(strip);
            }
            let mut arrays: Vec<(u16, u16, u32, Vec<u8>)> = Vec::new();
            let pack32 = |values: Vec<u32>| -> Vec<u8> {
                values.iter().flat_map(|v| v.to_le_bytes()).collect()
            };
            arrays.push((273, 4, offsets.len() as u32, pack32(offsets.clone())));
            arrays.push((
                279,
                4,
                dir.strips.len() as u32,
                pack32(dir.strips.iter().map(|s| s.len() as u32).collect()),
            ));
            if let Some(blob) = &dir.metadata {
                arrays.push((TAG_ACQUISITION_METADATA, 1, blob.len() as u32, blob.clone()));
            }

            let rows_per_strip = dir.height.div_ceil(dir.strips.len().max(1) as u32);
            let mut entries: Vec<(u16, u16, u32, [u8; 4])> = vec![
                (256, 4, 1, dir.width.to_le_bytes()),
                (257, 4, 1, dir.height.to_le_bytes()),
                (258, 3, 1, u32::from(dir.bits_per_sample).to_le_bytes()),
                (259, 3, 1, u32::from(dir.compression).to_le_bytes()),
                (262, 3, 1, 1u32.to_le_bytes()),
                (278, 4, 1, rows_per_strip.to_le_bytes()),
            ];
            for (tag, ty, count, data) in arrays {
                if data.len() <= 4 {
                    let mut inline = [0u8; 4];
                    inline[..data.len()].copy_from_slice(&data);
                    entries.push((tag, ty, count, inline));
                } else {
                    if out.len() % 2 == 1 {
                        out.push(0);
                    }
                    entries.push((tag, ty, count, (out.len() as u32).to_le_bytes()));
                    out.extend_from_slice(&data);
                }
            }
            entries.sort_by_key(|entry| entry.0);

            if out.len() % 2 == 1 {
                out.push(0);
            }
            ifd_offsets.push(out.len() as u32);
            out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
            for (tag, ty, count, value) in entries {
                out.extend_from_slice(&tag.to_le_bytes());
                out.extend_from_slice(&ty.to_le_bytes());
                out.extend_from_slice(&count.to_le_bytes());
                out.extend_from_slice(&value);
            }
            link_positions.push(out.len());
            out.extend_from_slice(&0u32.to_le_bytes());
        }

        out[4..8].copy_from_slice(&ifd_offsets[0].to_le_bytes());
        for (position, next) in link_positions.iter().zip(ifd_offsets.iter().skip(1)) {
            out[*position..*position + 4].copy_from_slice(&next.to_le_bytes());
        }
        out
    }

    pub(crate) fn eer_directory(frame: &Frame, metadata: Option<&str>) -> TestDirectory {
        let data = frame.as_ref();
        let half = data.len() / 2;
        TestDirectory {
            width: SENSOR_SIZE as u32,
            height: SENSOR_SIZE as u32,
            compression: frame.encoding.compression(),
            bits_per_sample: 1,
            strips: vec![data[..half].to_vec(), data[half..].to_vec()],
            metadata: metadata.map(|text| text.as_bytes().to_vec()),
        }
    }

    fn sensor_frame(electrons: &[ElectronPos], encoding: EncodingVersion) -> Frame {
        encode_frame(electrons, SENSOR_SIZE, SENSOR_SIZE, encoding).unwrap()
    }

    #[test]
    fn headerless_index() -> anyhow::Result<()> {
        let first = sensor_frame(&[ElectronPos::from_pixel(1, 1, 0, 0)], EncodingVersion::V1);
        let second = sensor_frame(&[], EncodingVersion::V1);
        let stream = encode_headerless([
            (&first, FrameFooter::Ok),
            (&second, FrameFooter::Error),
            (&first, FrameFooter::Ok),
        ]);

        let source = read_headerless(&stream)?;
        assert_eq!(source.frames.len(), 3);
        assert_eq!(source.footers, FooterTally { ok: 2, error: 1 });
        assert_eq!(source.frames[0].as_ref(), first.as_ref());
        assert_eq!(source.frames[1].as_ref(), second.as_ref());
        assert_eq!(source.frames[2].as_ref(), first.as_ref());
        assert!(source.metadata.is_none());
        Ok(())
    }

    #[test]
    fn headerless_rejects_bad_footer_and_size() {
        let frame = Frame::new(vec![0u8; 16], EncodingVersion::V1);
        let mut stream = encode_headerless([(&frame, FrameFooter::Ok)]);
        let last = stream.len() - 1;
        stream[last] = b'1';
        assert!(matches!(
            read_headerless(&stream),
            Err(ContainerError::InvalidFooter { .. })
        ));

        let mut stream = encode_headerless([(&frame, FrameFooter::Ok)]);
        stream[16..24].copy_from_slice(&100u64.to_le_bytes());
        assert!(matches!(
            read_headerless(&stream),
            Err(ContainerError::FrameSizeOutOfRange {
                size_words: 100,
                remaining_words: 2
            })
        ));

        assert!(matches!(
            read_headerless(FOOTER_OK),
            Err(ContainerError::StreamTooShort { remaining_words: 3 })
        ));
        assert!(matches!(read_headerless(&[]), Err(ContainerError::NoFrames)));
    }

    #[test]
    fn headerless_partial_tail_word() -> anyhow::Result<()> {
        let frame = sensor_frame(&[ElectronPos::from_pixel(3, 4, 0, 1)], EncodingVersion::V1);
        let stream = encode_headerless([(&frame, FrameFooter::Ok)]);

        let mut padded = stream.clone();
        padded.extend_from_slice(&[0u8; 3]);
        assert!(matches!(
            read_headerless(&padded),
            Err(ContainerError::InvalidFooter { offset }) if offset == stream.len() + WORD_BYTES
        ));

        let source = read_headerless(&stream)?;
        assert_eq!(source.frames[0].as_ref(), frame.as_ref());
        Ok(())
    }

    #[test]
    fn reads_tiff_directories() -> anyhow::Result<()> {
        let v1 = sensor_frame(&[ElectronPos::from_pixel(7, 9, 1, 2)], EncodingVersion::V1);
        let v0 = sensor_frame(&[ElectronPos::from_pixel(9, 7, 2, 1)], EncodingVersion::V0);
        let tiff = build_tiff(&[
            eer_directory(&v1, Some("<metadata/>")),
            eer_directory(&v0, None),
            TestDirectory {
                width: 8,
                height: 8,
                compression: 1,
                bits_per_sample: 8,
                strips: vec![vec![0u8; 64]],
                metadata: None,
            },
        ]);

        let source = read_directories(&tiff)?;
        assert_eq!(source.mode, ContainerMode::Directory);
        assert_eq!(source.frames.len(), 2);
        assert_eq!(source.frames[0].encoding, EncodingVersion::V1);
        assert_eq!(source.frames[1].encoding, EncodingVersion::V0);
        assert_eq!(source.frames[0].as_ref(), v1.as_ref());
        assert_eq!(source.frames[1].as_ref(), v0.as_ref());
        assert_eq!(source.metadata.as_deref(), Some("<metadata/>"));
        Ok(())
    }

    #[test]
    fn tiff_without_metadata_is_rejected() {
        let v1 = sensor_frame(&[ElectronPos::from_pixel(7, 9, 1, 2)], EncodingVersion::V1);
        let tiff = build_tiff(&[eer_directory(&v1, None), eer_directory(&v1, None)]);

        let err = read_directories(&tiff).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ContainerError>(),
            Some(ContainerError::MissingMetadata(TAG_ACQUISITION_METADATA))
        ));
    }

    #[test]
    fn tiff_baseline_size_is_checked() {
        let v1 = sensor_frame(&[], EncodingVersion::V1);
        let tiff = build_tiff(&[
            eer_directory(&v1, None),
            TestDirectory {
                width: 8,
                height: 8,
                compression: 1,
                bits_per_sample: 8,
                strips: vec![vec![0u8; 60]],
                metadata: None,
            },
        ]);

        let err = read_directories(&tiff).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ContainerError>(),
            Some(ContainerError::BaselineSizeMismatch {
                directory: 1,
                actual: 60,
                expected: 64,
                ..
            })
        ));
    }

    #[test]
    fn tiff_frame_dimensions_are_checked() {
        let mut dir = eer_directory(&sensor_frame(&[], EncodingVersion::V1), None);
        dir.width = 2048;
        let err = read_directories(&build_tiff(&[dir])).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ContainerError>(),
            Some(ContainerError::UnsupportedDimensions { width: 2048, .. })
        ));
    }

    #[test]
    fn mode_from_extension() {
        assert_eq!(
            ContainerMode::from_path(Path::new("run/frames.ecc")),
            ContainerMode::Headerless
        );
        assert_eq!(
            ContainerMode::from_path(Path::new("run/frames.eer")),
            ContainerMode::Directory
        );
    }
}
