#[macro_export]
macro_rules! log_or_err {
    ($state:expr, $level:expr, $err:expr $(,)?) => {{
        if $level <= $state.fail_level {
            return Err($err.into());
        } else {
            match $level {
                ::log::Level::Error => ::log::error!("{}", $err),
                ::log::Level::Warn => ::log::warn!("{}", $err),
                ::log::Level::Info => ::log::info!("{}", $err),
                ::log::Level::Debug => ::log::debug!("{}", $err),
                ::log::Level::Trace => ::log::trace!("{}", $err),
            }
        }
    }};
}

#[derive(thiserror::Error, Debug)]
pub enum BitstreamError {
    #[error("Truncated stream: read of {requested} bits at bit {position} exceeds {len} bits")]
    TruncatedStream {
        requested: u32,
        position: u64,
        len: u64,
    },

    #[error("Cannot rewind {requested} bits at bit {position}")]
    RewindBeforeStart { requested: u32, position: u64 },

    #[error("get_bits supports at most 16 bits per read. Requested {0}")]
    TooManyBits(u32),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum ContainerError {
    #[error("Unrecognized frame footer ending at byte {offset}")]
    InvalidFooter { offset: usize },

    #[error("Headerless stream too short: {remaining_words} words left at frame boundary")]
    StreamTooShort { remaining_words: usize },

    #[error("Frame size word {size_words} exceeds remaining stream of {remaining_words} words")]
    FrameSizeOutOfRange {
        size_words: u64,
        remaining_words: usize,
    },

    #[error(
        "Baseline image in directory {directory} (compression {compression}) has {actual} bytes, expected {expected}"
    )]
    BaselineSizeMismatch {
        directory: usize,
        compression: u16,
        actual: u64,
        expected: u64,
    },

    #[error("Unsupported frame dimensions {width}x{height} in directory {directory}")]
    UnsupportedDimensions {
        directory: usize,
        width: u32,
        height: u32,
    },

    #[error("Strip {strip} of directory {directory} lies outside the file ({offset} + {length})")]
    StripOutOfBounds {
        directory: usize,
        strip: usize,
        offset: u64,
        length: u64,
    },

    #[error("Directory {directory} has {offsets} strip offsets but {counts} strip byte counts")]
    MismatchedStripTags {
        directory: usize,
        offsets: usize,
        counts: usize,
    },

    #[error("Acquisition metadata tag {0} not found")]
    MissingMetadata(u16),

    #[error("Container holds no EER frames")]
    NoFrames,
}

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("Invalid RLE decoding: out_count = {out_count}, expected {expected} pixels")]
    PixelCountMismatch { out_count: u64, expected: u64 },

    #[error("Coordinate list holds {capacity} entries but frame {frame} decoded {decoded} electrons")]
    CoordinateOverflow {
        frame: usize,
        capacity: usize,
        decoded: usize,
    },

    #[error("Super sampling factor must be 1, 2, 4, -2, -4, -8, -16, or -32. Got {0}")]
    UnsupportedSuperResolution(i32),

    #[error("Super sampling factor must be 1, 2, or 4 in B-spline mode. Got {0}")]
    UnsupportedSplineFactor(i32),

    #[error("Frame {index} out of range ({count} frames)")]
    FrameOutOfRange { index: usize, count: usize },

    #[error("Output buffer holds {actual} pixels, expected at least {expected}")]
    InvalidOutputSize { expected: usize, actual: usize },
}

#[derive(thiserror::Error, Debug)]
pub enum DefectError {
    #[error("Gain image of {actual} pixels does not match {size}x{size}")]
    GainSizeMismatch { size: usize, actual: usize },

    #[error("Gain image size {gain_size} is not a multiple of sensor size {sensor_size}")]
    GainScaleMismatch {
        gain_size: usize,
        sensor_size: usize,
    },

    #[error("Gain image has no pixel above the dead threshold {0}")]
    NoValidPixels(f64),

    #[error("Image of {actual} pixels does not match {width}x{height}")]
    ImageSizeMismatch {
        width: usize,
        height: usize,
        actual: usize,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum EncodeError {
    #[error("Electron {index} at pixel ({x}, {y}) lies outside the {width}x{height} frame")]
    OutOfBounds {
        index: usize,
        x: u16,
        y: u16,
        width: usize,
        height: usize,
    },

    #[error("Electron {index} is not strictly after the previous one in raster order")]
    NotRasterOrdered { index: usize },

    #[error(transparent)]
    Bitstream(#[from] BitstreamError),
}
