//! Contains the traits at the boundaries of the pipeline: codecs and pixel sources.

use crate::{CompressError, EncodeError, ImageFormat, PixelBuffer};

/// An injected codec capability for one output format.
///
/// The quality parameter is a scalar in `[0, 1]`, where `1.0` is the least
/// aggressive compression the codec offers. Implementations are expected (but not required)
/// to produce output whose size grows with quality.
pub trait Encoder: Send + Sync {
    /// The format this encoder produces.
    fn format(&self) -> ImageFormat;

    /// Encodes the pixels at the given quality.
    ///
    /// # Errors
    /// Returns [`EncodeError::Unsupported`] if the input can never be encoded,
    /// or another [`EncodeError`] if this particular attempt failed.
    fn encode(&self, pixels: &PixelBuffer, quality: f32) -> Result<Vec<u8>, EncodeError>;

    /// Encodes the pixels using a progressive variant of the format, if the codec offers one.
    ///
    /// The default implementation returns `None`.
    fn encode_progressive(
        &self,
        pixels: &PixelBuffer,
        quality: f32,
    ) -> Option<Result<Vec<u8>, EncodeError>> {
        let _ = (pixels, quality);
        None
    }
}

impl<E: Encoder + ?Sized> Encoder for &E {
    fn format(&self) -> ImageFormat {
        (**self).format()
    }

    fn encode(&self, pixels: &PixelBuffer, quality: f32) -> Result<Vec<u8>, EncodeError> {
        (**self).encode(pixels, quality)
    }

    fn encode_progressive(
        &self,
        pixels: &PixelBuffer,
        quality: f32,
    ) -> Option<Result<Vec<u8>, EncodeError>> {
        (**self).encode_progressive(pixels, quality)
    }
}

/// Supplies the decoded pixels of the image to compress.
pub trait PixelSource {
    /// Decodes the source into a [`PixelBuffer`].
    ///
    /// # Errors
    /// Returns [`CompressError::Decode`] or [`CompressError::InvalidInput`]
    /// if the source cannot be turned into pixels.
    fn decode(&self) -> Result<PixelBuffer, CompressError>;

    /// The original encoded bytes, if the source has any.
    ///
    /// When present, a source that already fits the target is returned unchanged.
    fn original(&self) -> Option<&[u8]> {
        None
    }

    /// The length of the decoded pixel data in bytes, if it is known without decoding.
    fn decoded_len(&self) -> Option<usize> {
        None
    }
}

impl PixelSource for PixelBuffer {
    fn decode(&self) -> Result<PixelBuffer, CompressError> {
        Ok(self.clone())
    }

    fn decoded_len(&self) -> Option<usize> {
        Some(self.len())
    }
}
