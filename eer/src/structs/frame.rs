//! Compressed EER frame buffers.

use std::fmt::Display;
use std::sync::Arc;

/// TIFF compression code of RLE frames that spend a full code on overflow.
pub const COMPRESSION_EER_V0: u16 = 65000;

/// TIFF compression code of RLE frames that reclaim the overflow code's
/// sub-pixel bits.
pub const COMPRESSION_EER_V1: u16 = 65001;

/// Overflow convention of a frame's run-length codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncodingVersion {
    /// A run of `2^runLengthBits - 1` occupies a complete code.
    V0,
    /// The sub-pixel bits of an overflow code are not stored.
    #[default]
    V1,
}

impl EncodingVersion {
    pub fn from_compression(compression: u16) -> Option<Self> {
        match compression {
            COMPRESSION_EER_V0 => Some(Self::V0),
            COMPRESSION_EER_V1 => Some(Self::V1),
            _ => None,
        }
    }

    pub fn compression(self) -> u16 {
        match self {
            Self::V0 => COMPRESSION_EER_V0,
            Self::V1 => COMPRESSION_EER_V1,
        }
    }

    pub fn rewinds_overflow(self) -> bool {
        self == Self::V1
    }
}

impl Display for EncodingVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::V0 => write!(f, "v0 (wasteful overflow)"),
            Self::V1 => write!(f, "v1 (no-waste overflow)"),
        }
    }
}

/// A single compressed frame.
///
/// Frame data is shared and never modified once read from the container.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Arc<[u8]>,
    pub encoding: EncodingVersion,
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl Frame {
    pub fn new(data: impl Into<Arc<[u8]>>, encoding: EncodingVersion) -> Self {
        Self {
            data: data.into(),
            encoding,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[test]
fn compression_codes() {
    assert_eq!(
        EncodingVersion::from_compression(65000),
        Some(EncodingVersion::V0)
    );
    assert_eq!(
        EncodingVersion::from_compression(65001),
        Some(EncodingVersion::V1)
    );
    assert_eq!(EncodingVersion::from_compression(1), None);
    assert!(EncodingVersion::V1.rewinds_overflow());
    assert!(!EncodingVersion::V0.rewinds_overflow());
}
