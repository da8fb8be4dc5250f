use std::ops::Range;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use log::{debug, trace};

use crate::log_or_err;
use crate::process::decode::{DecodeObserver, FrameStats, decode_frame};
use crate::process::extract::{ContainerMode, FooterTally, FrameSource, TAG_ACQUISITION_METADATA};
use crate::process::render::{
    CoordinateCollector, CountOnly, CubicSplineAdd, NearestAdd, NearestSet, RenderPolicy,
};
use crate::process::{CODE_BITS, SuperResolution};
use crate::structs::electron::ElectronPos;
use crate::structs::frame::Frame;
use crate::utils::bitstream_io::EerBitReader;
use crate::utils::errors::{ContainerError, DecodeError};

/// Pixel types that frames can be rendered into.
///
/// Integer pixels use the nearest-neighbour policies, `f32` pixels the cubic
/// B-spline policy.
pub trait RenderPixel: Copy + Default + Send + Sync + 'static {
    fn render_set(
        decompressor: &Decompressor,
        out: &mut [Self],
        factor: SuperResolution,
        frame: usize,
    ) -> Result<FrameStats>;

    fn render_add(
        decompressor: &Decompressor,
        out: &mut [Self],
        factor: SuperResolution,
        frame: usize,
    ) -> Result<FrameStats>;
}

macro_rules! impl_render_pixel_nearest {
    ($($t:ty),+) => { $(
        impl RenderPixel for $t {
            fn render_set(
                decompressor: &Decompressor,
                out: &mut [Self],
                factor: SuperResolution,
                frame: usize,
            ) -> Result<FrameStats> {
                let (width, height) = (decompressor.width(), decompressor.height());
                let mut policy = NearestSet::new(out, width, height, factor)?;
                decompressor.decode_with(frame, &mut policy, None)
            }

            fn render_add(
                decompressor: &Decompressor,
                out: &mut [Self],
                factor: SuperResolution,
                frame: usize,
            ) -> Result<FrameStats> {
                let (width, height) = (decompressor.width(), decompressor.height());
                let mut policy = NearestAdd::new(out, width, height, factor)?;
                decompressor.decode_with(frame, &mut policy, None)
            }
        }
    )+ }
}

impl_render_pixel_nearest!(u8, u16, u32);

impl RenderPixel for f32 {
    fn render_set(
        decompressor: &Decompressor,
        out: &mut [Self],
        factor: SuperResolution,
        frame: usize,
    ) -> Result<FrameStats> {
        Self::render_add(decompressor, out, factor, frame)
    }

    fn render_add(
        decompressor: &Decompressor,
        out: &mut [Self],
        factor: SuperResolution,
        frame: usize,
    ) -> Result<FrameStats> {
        let (width, height) = (decompressor.width(), decompressor.height());
        let mut policy = CubicSplineAdd::new(out, width, height, factor)?;
        decompressor.decode_with(frame, &mut policy, None)
    }
}

/// Decoder over the frames of one loaded EER file.
///
/// All decoding methods take `&self` and can be called from several threads at
/// once; each call reads its frame through a private bit reader.
#[derive(Debug)]
pub struct Decompressor {
    source: FrameSource,
    /// Consistency conditions at or above this level are returned as errors.
    pub fail_level: log::Level,
    electrons_counted: AtomicU64,
}

impl Decompressor {
    /// Loads a file, choosing the container mode from its extension.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let mode = ContainerMode::from_path(path);
        debug!(
            "Opening {} as {mode} ({} bytes)",
            path.display(),
            bytes.len()
        );

        Self::from_bytes(&bytes, mode)
            .with_context(|| format!("Failed to index {}", path.display()))
    }

    pub fn from_bytes(bytes: &[u8], mode: ContainerMode) -> Result<Self> {
        Ok(Self::from_source(FrameSource::from_bytes(bytes, mode)?))
    }

    pub fn from_source(source: FrameSource) -> Self {
        Self {
            source,
            fail_level: log::Level::Error,
            electrons_counted: AtomicU64::new(0),
        }
    }

    /// `log::Level::Warn` turns consistency warnings into errors.
    pub fn set_fail_level(&mut self, level: log::Level) {
        self.fail_level = level;
    }

    pub fn width(&self) -> usize {
        self.source.width
    }

    pub fn height(&self) -> usize {
        self.source.height
    }

    /// `(width, height, frame_count)`
    pub fn size(&self) -> (usize, usize, usize) {
        (self.width(), self.height(), self.frame_count())
    }

    pub fn frame_count(&self) -> usize {
        self.source.frames.len()
    }

    pub fn mode(&self) -> ContainerMode {
        self.source.mode
    }

    pub fn frames(&self) -> &[Frame] {
        &self.source.frames
    }

    pub fn footer_tally(&self) -> FooterTally {
        self.source.footers
    }

    pub fn compressed_bytes(&self) -> u64 {
        self.source.compressed_bytes()
    }

    /// Acquisition metadata XML; empty for headerless streams.
    pub fn acquisition_metadata(&self) -> Result<&str, ContainerError> {
        match self.source.mode {
            ContainerMode::Headerless => Ok(""),
            ContainerMode::Directory => self
                .source
                .metadata
                .as_deref()
                .ok_or(ContainerError::MissingMetadata(TAG_ACQUISITION_METADATA)),
        }
    }

    /// Running total of electrons decoded through this instance.
    pub fn electrons_counted(&self) -> u64 {
        self.electrons_counted.load(Ordering::Relaxed)
    }

    pub fn frame(&self, index: usize) -> Result<&Frame, DecodeError> {
        self.source
            .frames
            .get(index)
            .ok_or(DecodeError::FrameOutOfRange {
                index,
                count: self.frame_count(),
            })
    }

    /// Upper bound on the electrons in `frames`: one per code in the
    /// compressed data.
    pub fn electron_count_upper_bound(&self, frames: Range<usize>) -> Result<u64, DecodeError> {
        let frames = self
            .source
            .frames
            .get(frames.clone())
            .ok_or(DecodeError::FrameOutOfRange {
                index: frames.end.max(frames.start).saturating_sub(1),
                count: self.frame_count(),
            })?;

        let bytes: u64 = frames.iter().map(|frame| frame.len() as u64).sum();
        Ok((bytes * 8).div_ceil(u64::from(CODE_BITS)))
    }

    /// Decodes `frame` into an arbitrary render policy.
    pub fn decode_with<P: RenderPolicy + ?Sized>(
        &self,
        frame: usize,
        policy: &mut P,
        observer: Option<&mut dyn DecodeObserver>,
    ) -> Result<FrameStats> {
        let data = self.frame(frame)?;
        let mut reader = EerBitReader::from_slice(data.as_ref());
        let stats = decode_frame(
            &mut reader,
            data.encoding,
            self.width(),
            self.height(),
            policy,
            observer,
        );
        self.electrons_counted
            .fetch_add(stats.electrons, Ordering::Relaxed);
        trace!(
            "Frame {frame}: {} electrons, {} words read",
            stats.electrons,
            reader.words_read().unwrap_or_default()
        );

        let pixels = (self.width() * self.height()) as u64;
        if !stats.is_consistent(pixels) {
            log_or_err!(
                self,
                log::Level::Warn,
                DecodeError::PixelCountMismatch {
                    out_count: stats.out_count,
                    expected: pixels,
                }
            );
        }
        Ok(stats)
    }

    /// Renders `frame` into `out`, discarding its previous contents.
    pub fn decode_image<T: RenderPixel>(
        &self,
        out: &mut [T],
        factor: SuperResolution,
        frame: usize,
    ) -> Result<FrameStats> {
        out.fill(T::default());
        T::render_set(self, out, factor, frame)
    }

    /// Renders `frame` on top of the current contents of `out`.
    pub fn decode_image_add<T: RenderPixel>(
        &self,
        out: &mut [T],
        factor: SuperResolution,
        frame: usize,
    ) -> Result<FrameStats> {
        T::render_add(self, out, factor, frame)
    }

    /// Decodes `frame` into `out` as sub-pixel coordinates.
    ///
    /// Size `out` with [`electron_count_upper_bound`](Self::electron_count_upper_bound).
    /// Returns the number of entries written.
    pub fn decode_coordinate_list(&self, out: &mut [ElectronPos], frame: usize) -> Result<usize> {
        let capacity = out.len();
        let mut collector = CoordinateCollector::new(out);
        self.decode_with(frame, &mut collector, None)?;

        if collector.overflow() > 0 {
            log_or_err!(
                self,
                log::Level::Warn,
                DecodeError::CoordinateOverflow {
                    frame,
                    capacity,
                    decoded: collector.len() + collector.overflow(),
                }
            );
        }
        Ok(collector.len())
    }

    /// Coordinates of all electrons of one frame.
    pub fn read_frame_positions(&self, frame: usize) -> Result<Vec<ElectronPos>> {
        let end = frame.checked_add(1).ok_or(DecodeError::FrameOutOfRange {
            index: frame,
            count: self.frame_count(),
        })?;
        let bound = self.electron_count_upper_bound(frame..end)?;
        let mut out = vec![ElectronPos::default(); bound as usize];
        let len = self.decode_coordinate_list(&mut out, frame)?;
        out.truncate(len);
        Ok(out)
    }

    /// Coordinates of all electrons of all frames, in frame order.
    pub fn read_positions(&self) -> Result<Vec<ElectronPos>> {
        let bound = self.electron_count_upper_bound(0..self.frame_count())?;
        let mut out = vec![ElectronPos::default(); bound as usize];
        let mut len = 0;
        for frame in 0..self.frame_count() {
            len += self.decode_coordinate_list(&mut out[len..], frame)?;
        }
        out.truncate(len);
        debug!("Read {len} electrons from {} frames", self.frame_count());
        Ok(out)
    }

    /// Decodes `frame` only to count its electrons.
    pub fn count_electrons(&self, frame: usize) -> Result<FrameStats> {
        self.decode_with(frame, &mut CountOnly, None)
    }

    /// Single-threaded reader that walks the frames in order.
    pub fn sequential(&self) -> SequentialReader<'_> {
        SequentialReader {
            decompressor: self,
            position: 0,
        }
    }
}

/// Cursor over the frames of a [`Decompressor`]; every decode advances it by one.
#[derive(Debug)]
pub struct SequentialReader<'a> {
    decompressor: &'a Decompressor,
    position: usize,
}

impl SequentialReader<'_> {
    /// Index of the next frame to decode.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.decompressor
            .frame_count()
            .saturating_sub(self.position)
    }

    pub fn seek(&mut self, frame: usize) -> Result<(), DecodeError> {
        self.decompressor.frame(frame)?;
        self.position = frame;
        Ok(())
    }

    fn advance<R>(&mut self, decode: impl FnOnce(&Decompressor, usize) -> Result<R>) -> Result<R> {
        let frame = self.position;
        let result = decode(self.decompressor, frame)?;
        self.position += 1;
        Ok(result)
    }

    pub fn decode_image<T: RenderPixel>(
        &mut self,
        out: &mut [T],
        factor: SuperResolution,
    ) -> Result<FrameStats> {
        self.advance(|decompressor, frame| decompressor.decode_image(out, factor, frame))
    }

    pub fn decode_image_add<T: RenderPixel>(
        &mut self,
        out: &mut [T],
        factor: SuperResolution,
    ) -> Result<FrameStats> {
        self.advance(|decompressor, frame| decompressor.decode_image_add(out, factor, frame))
    }

    pub fn decode_coordinate_list(&mut self, out: &mut [ElectronPos]) -> Result<usize> {
        self.advance(|decompressor, frame| decompressor.decode_coordinate_list(out, frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::encode::{encode_frame, encode_headerless};
    use crate::process::extract::FrameFooter;
    use crate::process::render::SPLINE_EVENT_WEIGHT;
    use crate::structs::frame::EncodingVersion;

    const SIZE: usize = 64;

    fn pattern(frame: u16) -> Vec<ElectronPos> {
        (0..20u16)
            .map(|i| ElectronPos::from_pixel(3 * i + frame, 2 * i + 10, i & 3, (i >> 2) & 3))
            .collect()
    }

    fn small_source(frames: &[Vec<ElectronPos>]) -> FrameSource {
        FrameSource {
            mode: ContainerMode::Directory,
            width: SIZE,
            height: SIZE,
            frames: frames
                .iter()
                .map(|electrons| encode_frame(electrons, SIZE, SIZE, EncodingVersion::V1).unwrap())
                .collect(),
            metadata: Some("<acquisition/>".into()),
            footers: FooterTally::default(),
        }
    }

    #[test]
    fn image_set_and_add() -> anyhow::Result<()> {
        let decompressor = Decompressor::from_source(small_source(&[pattern(0), pattern(1)]));
        assert_eq!(decompressor.size(), (SIZE, SIZE, 2));

        let mut image = vec![7u16; SIZE * SIZE];
        decompressor.decode_image(&mut image, SuperResolution::Native, 0)?;
        assert_eq!(image.iter().map(|&v| u32::from(v)).sum::<u32>(), 20);
        assert_eq!(image[10 * SIZE], 1);

        decompressor.decode_image_add(&mut image, SuperResolution::Native, 0)?;
        assert_eq!(image[10 * SIZE], 2);

        let mut hits = vec![0u8; 4 * SIZE * SIZE];
        decompressor.decode_image(&mut hits, SuperResolution::Up2, 1)?;
        assert_eq!(hits.iter().filter(|&&v| v == 1).count(), 20);

        assert_eq!(decompressor.electrons_counted(), 60);
        Ok(())
    }

    #[test]
    fn spline_image_total() -> anyhow::Result<()> {
        let decompressor = Decompressor::from_source(small_source(&[pattern(2)]));
        let mut image = vec![0f32; 4 * SIZE * SIZE];
        let stats = decompressor.decode_image(&mut image, SuperResolution::Up2, 0)?;

        let total: f32 = image.iter().sum();
        let expected = stats.electrons as f32 * SPLINE_EVENT_WEIGHT;
        assert!(
            (total - expected).abs() / expected < 1e-4,
            "{total} vs {expected}"
        );
        Ok(())
    }

    #[test]
    fn coordinate_list_and_bounds() -> anyhow::Result<()> {
        let frames = [pattern(0), pattern(1), pattern(2)];
        let decompressor = Decompressor::from_source(small_source(&frames));

        let mut previous = 0;
        for end in 0..=3 {
            let bound = decompressor.electron_count_upper_bound(0..end)?;
            assert!(bound >= previous);
            assert!(bound >= 20 * end as u64);
            previous = bound;
        }
        assert!(matches!(
            decompressor.electron_count_upper_bound(0..4),
            Err(DecodeError::FrameOutOfRange { count: 3, .. })
        ));

        assert!(matches!(
            decompressor.electron_count_upper_bound(3..1),
            Err(DecodeError::FrameOutOfRange { count: 3, .. })
        ));
        assert!(decompressor.read_frame_positions(usize::MAX).is_err());

        assert_eq!(decompressor.read_frame_positions(1)?, frames[1]);
        assert_eq!(decompressor.read_positions()?, frames.concat());
        Ok(())
    }

    #[test]
    fn v0_frames_stay_within_bound() -> anyhow::Result<()> {
        let frames = [
            pattern(0),
            vec![ElectronPos::from_pixel(SIZE as u16 - 1, 0, 3, 3)],
        ];
        let mut source = small_source(&[]);
        source.frames = frames
            .iter()
            .map(|electrons| encode_frame(electrons, SIZE, SIZE, EncodingVersion::V0))
            .collect::<Result<_, _>>()?;
        let decompressor = Decompressor::from_source(source);

        for (index, electrons) in frames.iter().enumerate() {
            let stats = decompressor.count_electrons(index)?;
            assert!(stats.is_consistent((SIZE * SIZE) as u64));
            assert_eq!(stats.electrons, electrons.len() as u64);
            assert!(decompressor.electron_count_upper_bound(index..index + 1)? >= stats.electrons);
            assert_eq!(&decompressor.read_frame_positions(index)?, electrons);
        }
        Ok(())
    }

    #[test]
    fn strictness_controls_consistency_errors() -> anyhow::Result<()> {
        let good = encode_frame(&pattern(0), SIZE, SIZE, EncodingVersion::V1)?;
        let truncated = Frame::new(&good.as_ref()[..16], EncodingVersion::V1);
        let mut source = small_source(&[]);
        source.frames = vec![truncated];
        let mut decompressor = Decompressor::from_source(source);

        let mut out = vec![ElectronPos::default(); 2];
        assert_eq!(decompressor.decode_coordinate_list(&mut out, 0)?, 2);
        let stats = decompressor.count_electrons(0)?;
        assert!(stats.truncated);

        decompressor.set_fail_level(log::Level::Warn);
        let err = decompressor.count_electrons(0).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DecodeError>(),
            Some(DecodeError::PixelCountMismatch { expected: 4096, .. })
        ));
        Ok(())
    }

    #[test]
    fn sequential_reader_advances() -> anyhow::Result<()> {
        let frames = [pattern(0), pattern(1)];
        let decompressor = Decompressor::from_source(small_source(&frames));
        let mut reader = decompressor.sequential();
        let mut out = vec![ElectronPos::default(); 32];

        assert_eq!(reader.decode_coordinate_list(&mut out)?, 20);
        assert_eq!(&out[..20], frames[0].as_slice());
        assert_eq!(reader.position(), 1);
        assert_eq!(reader.decode_coordinate_list(&mut out)?, 20);
        assert_eq!(&out[..20], frames[1].as_slice());
        assert_eq!(reader.remaining(), 0);

        let err = reader.decode_coordinate_list(&mut out).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DecodeError>(),
            Some(DecodeError::FrameOutOfRange { index: 2, count: 2 })
        ));
        assert_eq!(reader.position(), 2);

        reader.seek(0)?;
        let mut image = vec![0u32; SIZE * SIZE];
        reader.decode_image(&mut image, SuperResolution::Native)?;
        assert_eq!(image.iter().sum::<u32>(), 20);
        Ok(())
    }

    #[test]
    fn rejects_bad_parameters() {
        let decompressor = Decompressor::from_source(small_source(&[pattern(0)]));
        let mut short = vec![0u8; 10];
        let err = decompressor
            .decode_image(&mut short, SuperResolution::Native, 0)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DecodeError>(),
            Some(DecodeError::InvalidOutputSize { .. })
        ));

        let mut image = vec![0f32; SIZE * SIZE];
        let err = decompressor
            .decode_image(&mut image, SuperResolution::Down2, 0)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DecodeError>(),
            Some(DecodeError::UnsupportedSplineFactor(-2))
        ));
    }

    #[test]
    fn headerless_bytes_and_metadata() -> anyhow::Result<()> {
        let electrons = [ElectronPos::from_pixel(4000, 12, 1, 1)];
        let frame = encode_frame(&electrons, 4096, 4096, EncodingVersion::V1)?;
        let stream = encode_headerless([(&frame, FrameFooter::Ok), (&frame, FrameFooter::Ok)]);

        let decompressor = Decompressor::from_bytes(&stream, ContainerMode::Headerless)?;
        assert_eq!(decompressor.size(), (4096, 4096, 2));
        assert_eq!(decompressor.acquisition_metadata()?, "");
        assert_eq!(decompressor.footer_tally().ok, 2);
        assert_eq!(decompressor.read_frame_positions(1)?, electrons);

        let with_metadata = Decompressor::from_source(small_source(&[pattern(0)]));
        assert_eq!(with_metadata.acquisition_metadata()?, "<acquisition/>");
        Ok(())
    }
}
