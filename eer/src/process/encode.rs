use log::trace;

use crate::process::extract::FrameFooter;
use crate::process::{CODE_BITS, MAX_RUN_VALUE, RUN_LENGTH_BITS, SUB_PIXEL_BITS};
use crate::structs::electron::ElectronPos;
use crate::structs::frame::{EncodingVersion, Frame};
use crate::utils::bitstream_io::{EerBitWriter, WORD_BYTES};
use crate::utils::errors::EncodeError;

struct RunLengthWriter {
    writer: EerBitWriter,
    encoding: EncodingVersion,
}

impl RunLengthWriter {
    fn put_overflow(&mut self) -> Result<(), EncodeError> {
        let bits = match self.encoding {
            EncodingVersion::V0 => CODE_BITS,
            EncodingVersion::V1 => RUN_LENGTH_BITS,
        };
        self.writer.put_bits(MAX_RUN_VALUE, bits)?;
        Ok(())
    }

    /// Emits overflow codes until `gap` fits into a code, returning the rest.
    fn put_run(&mut self, mut gap: u64) -> Result<u32, EncodeError> {
        while gap >= u64::from(MAX_RUN_VALUE) {
            self.put_overflow()?;
            gap -= u64::from(MAX_RUN_VALUE);
        }
        Ok(gap as u32)
    }

    fn put_code(&mut self, run: u32, sub: u32) -> Result<(), EncodeError> {
        self.writer
            .put_bits(run | (sub << RUN_LENGTH_BITS), CODE_BITS)?;
        Ok(())
    }
}

/// Run-length encodes electrons into a frame of `width * height` pixels.
///
/// Electrons must lie on distinct pixels in raster order. The encoded phase of
/// each electron is its sub-pixel offset XOR 2, so decoding reproduces the
/// positions exactly.
pub fn encode_frame(
    electrons: &[ElectronPos],
    width: usize,
    height: usize,
    encoding: EncodingVersion,
) -> Result<Frame, EncodeError> {
    let pixels = (width * height) as u64;
    let mut rle = RunLengthWriter {
        writer: EerBitWriter::default(),
        encoding,
    };

    let mut cursor = 0u64;
    for (index, electron) in electrons.iter().enumerate() {
        let (x, y) = (electron.pixel_x(), electron.pixel_y());
        if usize::from(x) >= width || usize::from(y) >= height {
            return Err(EncodeError::OutOfBounds {
                index,
                x,
                y,
                width,
                height,
            });
        }

        let pixel = u64::from(y) * width as u64 + u64::from(x);
        if pixel < cursor {
            return Err(EncodeError::NotRasterOrdered { index });
        }

        let run = rle.put_run(pixel - cursor)?;
        let sub = u32::from(electron.sub_x() ^ 2)
            | (u32::from(electron.sub_y() ^ 2) << SUB_PIXEL_BITS);
        rle.put_code(run, sub)?;
        cursor = pixel + 1;
    }

    let remaining = pixels.saturating_sub(cursor);
    let run = rle.put_run(remaining)?;
    // A trailing run of zero is only needed when no overflow code closed the frame
    if run > 0 || remaining == 0 {
        rle.put_code(run, 0)?;
    }

    trace!(
        "Encoded {} electrons into {} words ({encoding})",
        electrons.len(),
        rle.writer.word_size()
    );

    Ok(Frame::new(rle.writer.finish()?, encoding))
}

/// Appends a frame to a headerless stream: data words, size word, footer.
pub fn append_headerless_frame(stream: &mut Vec<u8>, frame: &Frame, footer: FrameFooter) {
    let words = frame.len().div_ceil(WORD_BYTES);
    stream.extend_from_slice(frame.as_ref());
    stream.resize(stream.len() + words * WORD_BYTES - frame.len(), 0);
    stream.extend_from_slice(&(words as u64).to_le_bytes());
    stream.extend_from_slice(footer.bytes());
}

/// Builds a complete headerless stream from frames and their footers.
pub fn encode_headerless<'a>(
    frames: impl IntoIterator<Item = (&'a Frame, FrameFooter)>,
) -> Vec<u8> {
    let mut stream = Vec::new();
    for (frame, footer) in frames {
        append_headerless_frame(&mut stream, frame, footer);
    }
    stream
}
