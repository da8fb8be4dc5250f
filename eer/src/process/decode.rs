use log::trace;

use crate::process::render::RenderPolicy;
use crate::process::{CODE_BITS, MAX_RUN_VALUE, RUN_LENGTH_BITS, SUB_PIXEL_BITS};
use crate::structs::frame::EncodingVersion;
use crate::utils::bitstream_io::EerBitReader;
use crate::utils::errors::BitstreamError;

/// Sees the sub-pixel phase of every decoded electron.
pub trait DecodeObserver {
    fn observe(&mut self, sub_x: u32, sub_y: u32);
}

/// Occupancy of the 4x4 encoded sub-pixel phases.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubpixelHistogram {
    counts: [[u64; 4]; 4],
}

impl SubpixelHistogram {
    /// Count for encoded phase `(sub_x, sub_y)`.
    pub fn count(&self, sub_x: usize, sub_y: usize) -> u64 {
        self.counts[sub_y & 3][sub_x & 3]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().flatten().sum()
    }

    pub fn merge(&mut self, other: &SubpixelHistogram) {
        for (row, other_row) in self.counts.iter_mut().zip(other.counts.iter()) {
            for (count, other_count) in row.iter_mut().zip(other_row.iter()) {
                *count += other_count;
            }
        }
    }
}

impl DecodeObserver for SubpixelHistogram {
    #[inline(always)]
    fn observe(&mut self, sub_x: u32, sub_y: u32) {
        self.counts[(sub_y & 3) as usize][(sub_x & 3) as usize] += 1;
    }
}

/// Outcome of decoding one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub electrons: u64,
    /// Pixel counter at loop exit; equals the pixel count of a consistent frame.
    pub out_count: u64,
    /// The stream ended before the frame was complete.
    pub truncated: bool,
}

impl FrameStats {
    pub fn is_consistent(&self, pixels: u64) -> bool {
        !self.truncated && self.out_count == pixels
    }
}

/// Reads the next code.
///
/// A no-waste overflow code is only 7 bits long, so the closing code of a
/// frame may end less than 11 bits before the end of the buffer. Such a tail
/// is read zero-extended and accepted only as an overflow code.
fn next_code(
    reader: &mut EerBitReader<'_>,
    encoding: EncodingVersion,
) -> Result<u32, BitstreamError> {
    let available = reader.available()?;
    if !encoding.rewinds_overflow()
        || available >= u64::from(CODE_BITS)
        || available < u64::from(RUN_LENGTH_BITS)
    {
        return reader.get_bits(CODE_BITS);
    }

    let position = reader.position()?;
    let symbol = reader.get_bits(available as u32)?;
    if symbol & MAX_RUN_VALUE != MAX_RUN_VALUE {
        return Err(BitstreamError::TruncatedStream {
            requested: CODE_BITS,
            position,
            len: reader.len_bits(),
        });
    }
    Ok(symbol)
}

/// Run-length decodes one frame of `width * height` pixels into `policy`.
///
/// Decoding stops at the first read that would overrun the buffer; the events
/// rendered so far are kept and the result is flagged as truncated.
pub fn decode_frame<P: RenderPolicy + ?Sized>(
    reader: &mut EerBitReader<'_>,
    encoding: EncodingVersion,
    width: usize,
    height: usize,
    policy: &mut P,
    mut observer: Option<&mut dyn DecodeObserver>,
) -> FrameStats {
    let pixels = (width * height) as u64;
    let width = width as u64;
    let mut stats = FrameStats::default();

    let mut symbol = match next_code(reader, encoding) {
        Ok(symbol) => symbol,
        Err(e) => {
            trace!("Empty frame stream: {e}");
            stats.truncated = true;
            return stats;
        }
    };
    let mut value = symbol & MAX_RUN_VALUE;
    let mut out_count = u64::from(value);

    while out_count < pixels {
        if value < MAX_RUN_VALUE {
            let sub = symbol >> RUN_LENGTH_BITS;
            let sub_x = sub & ((1 << SUB_PIXEL_BITS) - 1);
            let sub_y = sub >> SUB_PIXEL_BITS;
            policy.render(
                (out_count % width) as usize,
                (out_count / width) as usize,
                sub_x,
                sub_y,
            );
            if let Some(observer) = observer.as_deref_mut() {
                observer.observe(sub_x, sub_y);
            }
            out_count += 1;
            stats.electrons += 1;
        } else if encoding.rewinds_overflow() && reader.rewind(2 * SUB_PIXEL_BITS).is_err() {
            stats.truncated = true;
            break;
        }

        symbol = match next_code(reader, encoding) {
            Ok(symbol) => symbol,
            Err(e) => {
                trace!("Frame stream ended at pixel {out_count}: {e}");
                stats.truncated = true;
                break;
            }
        };
        value = symbol & MAX_RUN_VALUE;
        out_count += u64::from(value);
    }

    stats.out_count = out_count;
    stats
}
