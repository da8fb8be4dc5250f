//! Decoder for EER (Electron Event Representation) electron-counting data.
//!
//! ## Technical Overview
//!
//! A direct electron detector reports every detected electron as an event on a
//! 4096x4096 sensor with 2 bits of sub-pixel position per axis. Frames are
//! stored as run-length codes packed into little-endian 64-bit words.
//!
//! ### Bitstream Organization
//!
//! Each 11-bit code carries a 7-bit run of empty pixels followed by a 4-bit
//! sub-pixel phase. A run of 127 means "no electron yet"; in the no-waste
//! encoding such an overflow code only occupies its 7 run bits.
//!
//! ### Containers
//!
//! - TIFF files with one directory per frame (compression 65000 or 65001) and
//!   the acquisition metadata XML in private tag 65001
//! - Headerless `.ecc` streams of back-to-back frames, each closed by a size
//!   word and a 24-byte hardware footer
//!
//! ### Defects
//!
//! A gain reference identifies dead and hot sensor regions. They can be
//! patched in rendered images by interpolation, or compensated in electron
//! lists by adding synthetic electrons next to the defect.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use eer::process::SuperResolution;
//! use eer::process::decompress::Decompressor;
//!
//! let decompressor = Decompressor::open("movie.eer")?;
//! let (width, height, frames) = decompressor.size();
//!
//! // Sum all frames at 2x super-resolution
//! let factor = SuperResolution::Up2;
//! let mut image = vec![0u16; factor.scaled(width) * factor.scaled(height)];
//! for frame in 0..frames {
//!     decompressor.decode_image_add(&mut image, factor, frame)?;
//! }
//!
//! // Or get the electrons as coordinates
//! let positions = decompressor.read_frame_positions(0)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

/// Decoding pipeline for EER files.
///
/// 1. **Container Reading** ([`process::extract`]): Splits a TIFF or headerless
///    file into frame buffers.
///
/// 2. **Frame Decoding** ([`process::decode`]): Run-length decoding into a
///    render policy.
///
/// 3. **Rendering** ([`process::render`]): Nearest-neighbour, cubic B-spline and
///    coordinate-list outputs.
///
/// 4. **Front End** ([`process::decompress`]): Indexed and sequential access to
///    all frames of a file.
pub mod process;

/// Sensor defect handling.
///
/// - **Extraction** ([`defects::extract`]): Finds defects in a gain reference
/// - **Correction** ([`defects::correct`]): Interpolates defects in images
/// - **Neighbor Map** ([`defects::neighbor`]): Per-pixel defect annotations
/// - **Electron Adder** ([`defects::adder`]): Compensates defects in electron lists
pub mod defects;

/// Data structures shared across the pipeline.
///
/// - **Electrons** ([`structs::electron`]): Sub-pixel electron coordinates
/// - **Frames** ([`structs::frame`]): Compressed frame buffers
/// - **Defects** ([`structs::defects`]): Defect lists
/// - **Neighbor Specs** ([`structs::neighbor_spec`]): Packed defect annotations
pub mod structs;

/// Utility functions and supporting infrastructure.
///
/// - **Bitstream I/O** ([`utils::bitstream_io`]): Bit-level reading/writing
/// - **Error Handling** ([`utils::errors`]): Error types
pub mod utils;
