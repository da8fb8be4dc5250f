use std::fmt::Display;

use crate::utils::errors::DecodeError;

/// Container reading for TIFF-directory and headerless EER files.
///
/// Provides [`FrameSource`](extract::FrameSource), which yields shared
/// [`Frame`](crate::structs::frame::Frame) buffers and the acquisition metadata.
pub mod extract;

/// Run-length decoding of a single frame.
///
/// Provides [`decode_frame`](decode::decode_frame), generic over a
/// [`RenderPolicy`](render::RenderPolicy).
pub mod decode;

/// Render policies that turn decoded electron events into pixels or coordinates.
pub mod render;

/// Run-length encoding of electron lists into frames and headerless streams.
pub mod encode;

/// Decoder front end over a loaded file.
///
/// Provides the [`Decompressor`](decompress::Decompressor) with the indexed,
/// thread-safe decode API and a single-threaded sequential reader.
pub mod decompress;

/// Physical sensor size in pixels along each axis.
pub const SENSOR_SIZE: usize = 4096;

/// Sub-pixel resolution per axis in bits (4 phases per pixel).
pub const SUB_PIXEL_BITS: u32 = 2;

/// Bits of the run-length field of a code.
pub const RUN_LENGTH_BITS: u32 = 7;

/// Width of one RLE code.
pub const CODE_BITS: u32 = RUN_LENGTH_BITS + 2 * SUB_PIXEL_BITS;

/// Run-length value meaning "no electron, keep accumulating".
pub const MAX_RUN_VALUE: u32 = (1 << RUN_LENGTH_BITS) - 1;

/// Sensor size on the sub-pixel grid.
pub const SUPER_RESOLVED_SIZE: usize = SENSOR_SIZE << SUB_PIXEL_BITS;

/// Render-time resampling of the physical sensor grid.
///
/// Independent of the fixed hardware sub-pixel resolution; only this closed
/// set of factors is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuperResolution {
    Down32,
    Down16,
    Down8,
    Down4,
    Down2,
    #[default]
    Native,
    Up2,
    Up4,
}

impl SuperResolution {
    pub const ALL: [SuperResolution; 8] = [
        Self::Down32,
        Self::Down16,
        Self::Down8,
        Self::Down4,
        Self::Down2,
        Self::Native,
        Self::Up2,
        Self::Up4,
    ];

    /// Signed log2 of the factor: negative for down-sampling.
    pub const fn up_bits(self) -> i32 {
        match self {
            Self::Down32 => -5,
            Self::Down16 => -4,
            Self::Down8 => -3,
            Self::Down4 => -2,
            Self::Down2 => -1,
            Self::Native => 0,
            Self::Up2 => 1,
            Self::Up4 => 2,
        }
    }

    /// Factor in the `{1, 2, 4, -2, ..., -32}` convention.
    pub const fn factor(self) -> i32 {
        let bits = self.up_bits();
        if bits >= 0 { 1 << bits } else { -(1 << -bits) }
    }

    /// Output extent for an input extent of `size` pixels.
    pub const fn scaled(self, size: usize) -> usize {
        let bits = self.up_bits();
        if bits >= 0 {
            size << bits
        } else {
            size >> -bits
        }
    }

    /// Whether the cubic B-spline renderer supports this factor.
    pub const fn supports_spline(self) -> bool {
        self.up_bits() >= 0
    }
}

impl TryFrom<i32> for SuperResolution {
    type Error = DecodeError;

    fn try_from(factor: i32) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.factor() == factor)
            .ok_or(DecodeError::UnsupportedSuperResolution(factor))
    }
}

impl Display for SuperResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let factor = self.factor();
        if factor >= 1 {
            write!(f, "x{factor}")
        } else {
            write!(f, "1/{}", -factor)
        }
    }
}

#[test]
fn super_resolution_factors() -> anyhow::Result<()> {
    assert_eq!(SuperResolution::try_from(1)?, SuperResolution::Native);
    assert_eq!(SuperResolution::try_from(-32)?, SuperResolution::Down32);
    assert_eq!(SuperResolution::try_from(4)?.scaled(4096), 16384);
    assert_eq!(SuperResolution::try_from(-8)?.scaled(4096), 512);
    assert!(matches!(
        SuperResolution::try_from(3),
        Err(DecodeError::UnsupportedSuperResolution(3))
    ));
    assert!(matches!(
        SuperResolution::try_from(8),
        Err(DecodeError::UnsupportedSuperResolution(8))
    ));
    assert!(SuperResolution::Up2.supports_spline());
    assert!(!SuperResolution::Down2.supports_spline());
    assert_eq!(SuperResolution::Down4.to_string(), "1/4");
    Ok(())
}
