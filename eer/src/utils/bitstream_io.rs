//! Bitstream I/O for EER run-length codes.
//!
//! EER frames are streams of little-endian 64-bit words consumed least
//! significant bit first. Reading the underlying bytes LSB-first in file order
//! is bit-for-bit the same stream, so both reader and writer work on byte
//! buffers and only report sizes in words.

use std::io;
use std::io::SeekFrom;

use bitstream_io::{BitRead, BitReader, BitWrite, BitWriter, LittleEndian};

use crate::utils::errors::BitstreamError;

/// Size of one bitstream word in bytes.
pub const WORD_BYTES: usize = 8;

/// Largest read supported by [`EerBitReader::get_bits`].
pub const MAX_READ_BITS: u32 = 16;

#[derive(Debug)]
pub struct EerBitReader<'a> {
    bs: BitReader<io::Cursor<&'a [u8]>, LittleEndian>,
    len: u64,
}

impl<'a> EerBitReader<'a> {
    pub fn from_slice(buf: &'a [u8]) -> Self {
        Self {
            bs: BitReader::new(io::Cursor::new(buf)),
            len: (buf.len() as u64) << 3,
        }
    }

    /// Reads `n <= 16` bits, LSB first.
    ///
    /// Fails with [`BitstreamError::TruncatedStream`] instead of reading past
    /// the end of the buffer; the cursor is left unspecified in that case.
    #[inline(always)]
    pub fn get_bits(&mut self, n: u32) -> Result<u32, BitstreamError> {
        if n > MAX_READ_BITS {
            return Err(BitstreamError::TooManyBits(n));
        }

        match self.bs.read_unsigned_var::<u32>(n) {
            Ok(val) => Ok(val),
            // Only call position() on error path to avoid overhead
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(BitstreamError::TruncatedStream {
                    requested: n,
                    position: self.bs.position_in_bits().unwrap_or(self.len),
                    len: self.len,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Moves the cursor back by `n` bits.
    #[inline(always)]
    pub fn rewind(&mut self, n: u32) -> Result<(), BitstreamError> {
        let position = self.position()?;
        if u64::from(n) > position {
            return Err(BitstreamError::RewindBeforeStart {
                requested: n,
                position,
            });
        }

        self.bs.seek_bits(SeekFrom::Current(-i64::from(n)))?;
        Ok(())
    }

    #[inline(always)]
    pub fn position(&mut self) -> Result<u64, BitstreamError> {
        Ok(self.bs.position_in_bits()?)
    }

    #[inline(always)]
    pub fn available(&mut self) -> Result<u64, BitstreamError> {
        self.position().map(|pos| self.len.saturating_sub(pos))
    }

    /// Number of whole or partial words consumed so far.
    pub fn words_read(&mut self) -> Result<u64, BitstreamError> {
        self.position().map(|pos| pos.div_ceil(64))
    }

    pub fn len_bits(&self) -> u64 {
        self.len
    }
}

impl Default for EerBitReader<'_> {
    fn default() -> Self {
        Self::from_slice(&[])
    }
}

/// Packs codes into a growing word buffer.
pub struct EerBitWriter {
    bs: BitWriter<Vec<u8>, LittleEndian>,
    bits_written: u64,
}

impl Default for EerBitWriter {
    fn default() -> Self {
        Self {
            bs: BitWriter::new(Vec::new()),
            bits_written: 0,
        }
    }
}

impl EerBitWriter {
    /// Appends the low `n <= 16` bits of `value`.
    pub fn put_bits(&mut self, value: u32, n: u32) -> Result<(), BitstreamError> {
        if n > MAX_READ_BITS {
            return Err(BitstreamError::TooManyBits(n));
        }
        if n == 0 {
            return Ok(());
        }

        let masked = value & ((1u32 << n) - 1);
        self.bs.write_unsigned_var::<u32>(n, masked)?;
        self.bits_written += u64::from(n);
        Ok(())
    }

    pub fn bits_written(&self) -> u64 {
        self.bits_written
    }

    /// Number of words the stream occupies, counting a partial word as one.
    pub fn word_size(&self) -> usize {
        self.bits_written.div_ceil(64) as usize
    }

    /// Pads the stream with zero bits to a whole number of words and returns it.
    pub fn finish(mut self) -> Result<Vec<u8>, BitstreamError> {
        let pad = (self.word_size() as u64 * 64) - self.bits_written;
        let mut remaining = pad;
        while remaining > 0 {
            let n = remaining.min(u64::from(MAX_READ_BITS)) as u32;
            self.bs.write_unsigned_var::<u32>(n, 0)?;
            remaining -= u64::from(n);
        }
        self.bs.byte_align()?;

        Ok(self.bs.into_writer())
    }
}

#[test]
fn reads_across_word_boundary() -> anyhow::Result<()> {
    let mut writer = EerBitWriter::default();
    for _ in 0..5 {
        writer.put_bits(0x7FF, 11)?;
    }
    writer.put_bits(0x5A5, 11)?;
    writer.put_bits(0x123, 11)?;
    assert_eq!(writer.bits_written(), 77);
    assert_eq!(writer.word_size(), 2);

    let buf = writer.finish()?;
    assert_eq!(buf.len(), 2 * WORD_BYTES);

    let mut reader = EerBitReader::from_slice(&buf);
    for _ in 0..5 {
        assert_eq!(reader.get_bits(11)?, 0x7FF);
    }
    // Straddles bits 55..66
    assert_eq!(reader.get_bits(11)?, 0x5A5);
    assert_eq!(reader.get_bits(11)?, 0x123);
    assert_eq!(reader.words_read()?, 2);
    Ok(())
}

#[test]
fn lsb_first_word_order() -> anyhow::Result<()> {
    let word: u64 = 0x0123_4567_89AB_CDEF;
    let bytes = word.to_le_bytes();
    let mut reader = EerBitReader::from_slice(&bytes);

    assert_eq!(reader.get_bits(4)?, 0xF);
    assert_eq!(reader.get_bits(8)?, 0xDE);
    assert_eq!(reader.get_bits(16)?, 0x9ABC);
    Ok(())
}

#[test]
fn rewind_reclaims_bits() -> anyhow::Result<()> {
    let mut writer = EerBitWriter::default();
    writer.put_bits(0x7F, 7)?;
    writer.put_bits(0x2A5, 11)?;
    let buf = writer.finish()?;

    let mut reader = EerBitReader::from_slice(&buf);
    assert_eq!(reader.get_bits(11)? & 0x7F, 0x7F);
    reader.rewind(4)?;
    assert_eq!(reader.position()?, 7);
    assert_eq!(reader.get_bits(11)?, 0x2A5);

    assert!(matches!(
        reader.rewind(64),
        Err(BitstreamError::RewindBeforeStart { .. })
    ));
    Ok(())
}

#[test]
fn truncated_read_fails() {
    let buf = [0xFFu8; WORD_BYTES];
    let mut reader = EerBitReader::from_slice(&buf);
    for _ in 0..5 {
        assert!(reader.get_bits(11).is_ok());
    }
    assert!(matches!(
        reader.get_bits(11),
        Err(BitstreamError::TruncatedStream { len: 64, .. })
    ));
    assert!(matches!(
        EerBitReader::default().get_bits(1),
        Err(BitstreamError::TruncatedStream { .. })
    ));
    assert!(matches!(
        EerBitReader::default().get_bits(17),
        Err(BitstreamError::TooManyBits(17))
    ));
}
