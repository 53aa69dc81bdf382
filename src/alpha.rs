//! Alpha-plane decoding.
//!
//! WebP lossy frames carry their alpha channel as an independent VP8L
//! stream whose green channel holds the alpha values. When that stream
//! uses exactly one transform (colour indexing), no colour cache, and
//! trivial red/blue/alpha trees, a byte-per-pixel decode path is used;
//! otherwise the regular 32-bit path runs with an alpha-extraction row
//! processor.

use enough::Stop;

use crate::bitreader::BitReader;
use crate::decoder::{RowSink, Vp8lDecoder};
use crate::error::Vp8lError;
use crate::transform::TransformType;

/// Decoder for an alpha-channel VP8L stream of known dimensions.
///
/// Rows can be requested in increasing batches as the luma decode
/// progresses: call [`decode_rows`](Self::decode_rows) repeatedly with
/// a growing `last_row`.
pub struct AlphaDecoder<'a> {
    dec: Vp8lDecoder<'a>,
    width: usize,
    height: usize,
    use_8b_decode: bool,
}

impl<'a> AlphaDecoder<'a> {
    /// Parse the alpha stream header and choose the decode path.
    pub fn new(width: u32, height: u32, data: &'a [u8], stop: impl Stop) -> Result<AlphaDecoder<'a>, Vp8lError> {
        if width == 0 || height == 0 {
            return Err(Vp8lError::InvalidParameter("empty alpha plane".into()));
        }
        let width = width as usize;
        let height = height as usize;

        let mut dec = Vp8lDecoder::new();
        dec.width = width;
        dec.height = height;
        dec.io_width = width;
        dec.io_height = height;
        dec.br = BitReader::new(data);
        dec.decode_image_stream(width, height, true, &stop)?;

        // The frequent case of paletted alpha without a colour cache
        // only needs one byte per pixel.
        let use_8b_decode = dec.transforms.len() == 1
            && dec.transforms[0].ty == TransformType::ColorIndexing
            && dec.is_8b_optimizable();
        if use_8b_decode {
            dec.allocate_internal_buffers_8b()?;
        } else {
            dec.allocate_internal_buffers_32b(width)?;
        }

        Ok(AlphaDecoder { dec, width, height, use_8b_decode })
    }

    /// Decode alpha values for all rows up to `last_row` into `output`,
    /// a full `width * height` plane. Rows already decoded by earlier
    /// calls are not re-emitted.
    pub fn decode_rows(&mut self, last_row: usize, output: &mut [u8], stop: impl Stop) -> Result<(), Vp8lError> {
        if last_row > self.height {
            return Err(Vp8lError::InvalidParameter("last_row beyond alpha plane".into()));
        }
        let needed = self.width * self.height;
        if output.len() < needed {
            return Err(Vp8lError::BufferTooSmall { needed, actual: output.len() });
        }

        let dec = &mut self.dec;
        if dec.last_pixel == dec.width * dec.height {
            return Ok(()); // done
        }

        if self.use_8b_decode {
            let mut data8 = core::mem::take(&mut dec.pixels8);
            let (w, h) = (dec.width, dec.height);
            let result = dec.decode_alpha_data_8b(&mut data8, w, h, last_row, output, &stop);
            dec.pixels8 = data8;
            result
        } else {
            let mut pixels = core::mem::take(&mut dec.pixels);
            let (w, h) = (dec.width, dec.height);
            let mut sink = RowSink::AlphaPlane(output);
            let result = dec.decode_image_data_32(&mut pixels, w, h, last_row, &mut sink, &stop);
            dec.pixels = pixels;
            result
        }
    }

    /// Dimensions of the alpha plane.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width as u32, self.height as u32)
    }
}
