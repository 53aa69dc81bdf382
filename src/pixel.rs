//! Output colour spaces and BGRA row conversion.
//!
//! Decoded pixels live as 32-bit words laid out `(A<<24)|(R<<16)|
//! (G<<8)|B`; written byte-wise little-endian that is a BGRA byte
//! stream, which is the native output order. The remaining orders are
//! byte shuffles of it.

/// Output colour space for interleaved row emission.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorSpace {
    /// 4 channels, byte order B,G,R,A (native).
    Bgra,
    /// 4 channels, byte order R,G,B,A.
    Rgba,
    /// 4 channels, byte order A,R,G,B.
    Argb,
    /// 3 channels, byte order R,G,B.
    Rgb,
    /// 3 channels, byte order B,G,R.
    Bgr,
}

impl ColorSpace {
    /// Bytes per output pixel.
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::Bgra | Self::Rgba | Self::Argb => 4,
            Self::Rgb | Self::Bgr => 3,
        }
    }
}

/// Convert one row of decoded words into interleaved bytes.
pub(crate) fn convert_from_bgra(src: &[u32], colorspace: ColorSpace, dst: &mut [u8]) {
    let bpp = colorspace.bytes_per_pixel();
    for (px, out) in src.iter().zip(dst.chunks_exact_mut(bpp)) {
        let a = (px >> 24) as u8;
        let r = (px >> 16) as u8;
        let g = (px >> 8) as u8;
        let b = *px as u8;
        match colorspace {
            ColorSpace::Bgra => out.copy_from_slice(&[b, g, r, a]),
            ColorSpace::Rgba => out.copy_from_slice(&[r, g, b, a]),
            ColorSpace::Argb => out.copy_from_slice(&[a, r, g, b]),
            ColorSpace::Rgb => out.copy_from_slice(&[r, g, b]),
            ColorSpace::Bgr => out.copy_from_slice(&[b, g, r]),
        }
    }
}
