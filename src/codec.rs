//! Built-in codecs and sources backed by the [`image`] crate.

use crate::{
    quantize::quantize_step, types::byte_len, CompressError, EncodeError, Encoder, ImageFormat,
    PixelBuffer, PixelSource, CHANNELS,
};
use image::{
    codecs::{
        jpeg::JpegEncoder,
        png::{CompressionType, FilterType, PngEncoder},
    },
    ExtendedColorType, ImageEncoder, ImageError, ImageReader,
};
use std::io::Cursor;

/// The largest posterization step the PNG codec applies (at quality `0.0`).
const MAX_POSTERIZE_STEP: f32 = 32.0;

/// Encodes JPEG with the [`image`] crate's baseline encoder.
///
/// Transparent pixels are composited over white, and the quality is mapped to `1..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JpegCodec;

impl Encoder for JpegCodec {
    fn format(&self) -> ImageFormat {
        ImageFormat::Jpeg
    }

    fn encode(&self, pixels: &PixelBuffer, quality: f32) -> Result<Vec<u8>, EncodeError> {
        let quality = checked_quality(quality)?;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let quality = ((quality * 100.0).round() as u8).clamp(1, 100);

        let rgb = flatten_over_white(pixels);
        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, quality)
            .write_image(&rgb, pixels.width(), pixels.height(), ExtendedColorType::Rgb8)
            .map_err(encode_error)?;
        Ok(bytes)
    }
}

/// Encodes PNG with the [`image`] crate's encoder at its best compression.
///
/// PNG is lossless, so lower qualities posterize the color channels first:
/// each channel is rounded to a multiple of `1 + round((1 - quality) * 31)`.
/// Alpha is kept as is. Fully opaque images are written without an alpha channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PngCodec;

impl PngCodec {
    /// The posterization step used at the given quality.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn posterize_step(quality: f32) -> u8 {
        1 + ((1.0 - quality.clamp(0.0, 1.0)) * (MAX_POSTERIZE_STEP - 1.0)).round() as u8
    }
}

impl Encoder for PngCodec {
    fn format(&self) -> ImageFormat {
        ImageFormat::Png
    }

    fn encode(&self, pixels: &PixelBuffer, quality: f32) -> Result<Vec<u8>, EncodeError> {
        let step = Self::posterize_step(checked_quality(quality)?);
        let opaque = !pixels.has_transparency();

        let channels = if opaque { 3 } else { CHANNELS };
        let mut data = Vec::with_capacity(pixels.len() / CHANNELS * channels);
        for pixel in pixels.as_bytes().chunks_exact(CHANNELS) {
            data.extend(pixel[..3].iter().map(|&c| quantize_step(c, step)));
            if !opaque {
                data.push(pixel[3]);
            }
        }

        let color = if opaque { ExtendedColorType::Rgb8 } else { ExtendedColorType::Rgba8 };
        let mut bytes = Vec::new();
        PngEncoder::new_with_quality(&mut bytes, CompressionType::Best, FilterType::Adaptive)
            .write_image(&data, pixels.width(), pixels.height(), color)
            .map_err(encode_error)?;
        Ok(bytes)
    }
}

/// A [`PixelSource`] over an encoded image in any format the [`image`] crate can read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedImage<'a> {
    /// The encoded bytes.
    bytes: &'a [u8],
}

impl<'a> EncodedImage<'a> {
    /// Creates a new [`EncodedImage`] from encoded bytes.
    #[must_use]
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// Reads the image dimensions from the header without decoding the pixels.
    ///
    /// # Errors
    /// Returns [`CompressError::Decode`] if the format is unknown or the header is malformed.
    pub fn dimensions(&self) -> Result<(u32, u32), CompressError> {
        ImageReader::new(Cursor::new(self.bytes))
            .with_guessed_format()
            .map_err(|error| CompressError::Decode(error.to_string()))?
            .into_dimensions()
            .map_err(|error| CompressError::Decode(error.to_string()))
    }
}

impl PixelSource for EncodedImage<'_> {
    fn decode(&self) -> Result<PixelBuffer, CompressError> {
        let image = image::load_from_memory(self.bytes)
            .map_err(|error| CompressError::Decode(error.to_string()))?;
        Ok(PixelBuffer::try_from(image.into_rgba8())?)
    }

    fn original(&self) -> Option<&[u8]> {
        Some(self.bytes)
    }

    fn decoded_len(&self) -> Option<usize> {
        let (width, height) = self.dimensions().ok()?;
        Some(byte_len(width, height).unwrap_or(usize::MAX))
    }
}

/// Rejects qualities that are not a number.
fn checked_quality(quality: f32) -> Result<f32, EncodeError> {
    if quality.is_finite() {
        Ok(quality.clamp(0.0, 1.0))
    } else {
        Err(EncodeError::Rejected(format!("quality {quality} is not finite")))
    }
}

/// Composites each pixel over opaque white and drops alpha.
fn flatten_over_white(pixels: &PixelBuffer) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(pixels.len() / CHANNELS * 3);
    for pixel in pixels.as_bytes().chunks_exact(CHANNELS) {
        let alpha = u16::from(pixel[3]);
        rgb.extend(pixel[..3].iter().map(|&c| {
            let blended = (u16::from(c) * alpha + 255 * (255 - alpha) + 127) / 255;
            #[allow(clippy::cast_possible_truncation)]
            {
                blended as u8
            }
        }));
    }
    rgb
}

/// Maps an [`ImageError`] onto the retryable and fatal codec errors.
fn encode_error(error: ImageError) -> EncodeError {
    match error {
        ImageError::Unsupported(_) => EncodeError::Unsupported(error.to_string()),
        ImageError::Parameter(_) | ImageError::Limits(_) => EncodeError::Rejected(error.to_string()),
        _ => EncodeError::Codec(error.to_string()),
    }
}
