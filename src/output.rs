//! Owned decode results for the one-shot convenience API.

use alloc::vec::Vec;

use crate::pixel::ColorSpace;

/// Decoded image with an owned pixel buffer.
#[derive(Clone, Debug)]
pub struct DecodeOutput {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub colorspace: ColorSpace,
}

impl DecodeOutput {
    pub(crate) fn new(pixels: Vec<u8>, width: u32, height: u32, colorspace: ColorSpace) -> Self {
        Self { pixels, width, height, colorspace }
    }

    /// Access the interleaved pixel data.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Take ownership of the pixel data.
    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    /// Reinterpret the pixel data as typed BGRA pixels.
    ///
    /// Returns an error unless the output colour space is
    /// [`ColorSpace::Bgra`].
    #[cfg(feature = "rgb")]
    pub fn as_bgra8(&self) -> Result<&[crate::BGRA8], crate::Vp8lError> {
        use rgb::AsPixels as _;
        if self.colorspace != ColorSpace::Bgra {
            return Err(crate::Vp8lError::InvalidParameter(alloc::format!(
                "pixel data is {:?}, not Bgra",
                self.colorspace
            )));
        }
        Ok(self.pixels.as_pixels())
    }

    /// Zero-copy view as an [`imgref::ImgRef`] of BGRA pixels.
    #[cfg(feature = "imgref")]
    pub fn as_imgref(&self) -> Result<imgref::ImgRef<'_, crate::BGRA8>, crate::Vp8lError> {
        let pixels = self.as_bgra8()?;
        Ok(imgref::ImgRef::new(pixels, self.width as usize, self.height as usize))
    }

    /// Convert to an [`imgref::ImgVec`] of BGRA pixels.
    #[cfg(feature = "imgref")]
    pub fn to_imgvec(&self) -> Result<imgref::ImgVec<crate::BGRA8>, crate::Vp8lError> {
        let pixels = self.as_bgra8()?;
        Ok(imgref::ImgVec::new(pixels.to_vec(), self.width as usize, self.height as usize))
    }
}
