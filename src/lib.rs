//! # zenvp8l
//!
//! Lossless WebP (VP8L) bitstream decoder.
//!
//! Decodes a raw VP8L chunk payload — the bytes following the `VP8L`
//! fourcc in a WebP container — into 32-bit BGRA pixels, or into an
//! 8-bit plane for alpha-channel streams. Container parsing (the RIFF
//! chunk walk) and the lossy VP8 path are out of scope; this crate is
//! the lossless core they plug into.
//!
//! ## One-shot decoding
//!
//! ```no_run
//! use enough::Never;
//!
//! let data: &[u8] = &[]; // raw VP8L payload
//! let decoded = zenvp8l::decode(data, Never)?;
//! println!("{}x{} BGRA", decoded.width, decoded.height);
//! # Ok::<(), zenvp8l::Vp8lError>(())
//! ```
//!
//! ## Streaming / incremental decoding
//!
//! With [`DecodeOptions::incremental`] set, the decoder checkpoints
//! periodically and returns [`StreamStatus::Suspended`] when the input
//! underruns mid-frame. Extend the buffer and call again:
//!
//! ```no_run
//! use enough::Never;
//! use zenvp8l::{ColorSpace, DecodeOptions, PixelSink, RgbaOutput, StreamStatus, Vp8lDecoder};
//!
//! # fn demo(first_half: &[u8], full: &[u8]) -> Result<(), zenvp8l::Vp8lError> {
//! let options = DecodeOptions { incremental: true, ..DecodeOptions::default() };
//! let mut dec = Vp8lDecoder::new();
//! dec.decode_header(first_half, &options, &Never)?;
//!
//! let (w, h) = (dec.width() as usize, dec.height() as usize);
//! let mut buf = vec![0u8; w * h * 4];
//! let mut sink = PixelSink::Rgba(RgbaOutput {
//!     colorspace: ColorSpace::Bgra,
//!     buf: &mut buf,
//!     stride: w * 4,
//! });
//! if dec.decode_image(&options, &mut sink, &Never)? == StreamStatus::Suspended {
//!     dec.set_data(full)?; // same bytes plus the rest
//!     dec.decode_image(&options, &mut sink, &Never)?;
//! }
//! # Ok(()) }
//! ```
//!
//! ## Features
//!
//! - `std` (default): nothing beyond `no_std + alloc` is actually
//!   required; the feature exists for downstream convenience.
//! - `rgb`: typed pixel views ([`DecodeOutput::as_bgra8`]).
//! - `imgref`: [`imgref`] views of decoded output (implies `rgb`).

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;

use alloc::vec;

mod alpha;
mod bitreader;
mod color_cache;
mod decoder;
mod error;
mod huffman;
mod io;
mod limits;
mod output;
mod pixel;
mod rescale;
mod transform;
mod yuv;

pub use alpha::AlphaDecoder;
pub use decoder::{get_info, ImageInfo, StreamStatus, Vp8lDecoder};
pub use error::Vp8lError;
pub use io::{CropRect, DecodeOptions, PixelSink, RgbaOutput, YuvaOutput};
pub use limits::Limits;
pub use output::DecodeOutput;
pub use pixel::ColorSpace;

// Re-export cooperative cancellation types.
pub use enough::{Stop, StopReason, Never};

/// 8-bit BGRA pixel.
#[cfg(feature = "rgb")]
pub type BGRA8 = rgb::alt::BGRA<u8>;

/// Decode a full VP8L payload to BGRA pixels.
pub fn decode(data: &[u8], stop: impl Stop) -> Result<DecodeOutput, Vp8lError> {
    decode_to(data, ColorSpace::Bgra, stop)
}

/// Decode a full VP8L payload to the given colour space.
pub fn decode_to(data: &[u8], colorspace: ColorSpace, stop: impl Stop) -> Result<DecodeOutput, Vp8lError> {
    decode_with_options(data, colorspace, &DecodeOptions::default(), stop)
}

/// Decode with crop/scale/limit options. One-shot: the whole payload
/// must be present, regardless of `options.incremental`.
pub fn decode_with_options(
    data: &[u8],
    colorspace: ColorSpace,
    options: &DecodeOptions,
    stop: impl Stop,
) -> Result<DecodeOutput, Vp8lError> {
    let mut dec = Vp8lDecoder::new();
    if dec.decode_header(data, options, &stop)? == StreamStatus::Suspended {
        return Err(Vp8lError::UnexpectedEof);
    }
    let (width, height) = dec.output_size(options)?;
    let stride = width as usize * colorspace.bytes_per_pixel();
    options.limits.check_memory(stride * height as usize)?;
    let mut buf = vec![0u8; stride * height as usize];
    let mut sink = PixelSink::Rgba(RgbaOutput { colorspace, buf: &mut buf, stride });
    if dec.decode_image(options, &mut sink, &stop)? == StreamStatus::Suspended {
        return Err(Vp8lError::UnexpectedEof);
    }
    Ok(DecodeOutput::new(buf, width, height, colorspace))
}
