//! Utility functions and supporting infrastructure.
//!
//! Provides the word-stream bit reader and writer and the error types shared
//! by decoding and defect processing.

pub mod bitstream_io;
pub mod errors;
