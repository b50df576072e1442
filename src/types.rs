//! Contains the pixel buffer and format types needed across the crate.

use crate::{BufferError, CompressError, CHANNELS, MAX_PIXELS};
use palette::{cast::ComponentsAs, Srgba};
use std::time::{Duration, Instant};
#[cfg(feature = "image")]
use image::RgbaImage;

/// A flat buffer of RGBA pixels, 4 bytes per pixel in row-major order.
///
/// The invariant `bytes.len() == width * height * 4` is checked on construction
/// and upheld by every operation in this crate.
///
/// A [`PixelBuffer`] is exclusively owned by the pipeline stage currently transforming it.
/// Stages hand buffers to each other by value; when a stage needs the pristine input
/// again (e.g., a fallback strategy), it clones the buffer instead of sharing it,
/// so concurrent tile tasks never alias the same bytes.
///
/// # Examples
/// ```
/// # use pixpress::{PixelBuffer, BufferError};
/// # fn main() -> Result<(), BufferError> {
/// let buffer = PixelBuffer::new(2, 1, vec![0, 0, 0, 255, 255, 255, 255, 255])?;
/// assert_eq!(buffer.pixel(1, 0), [255, 255, 255, 255]);
///
/// assert!(PixelBuffer::new(2, 2, vec![0; 4]).is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PixelBuffer {
    /// The width of the image in pixels.
    width: u32,
    /// The height of the image in pixels.
    height: u32,
    /// The RGBA bytes.
    bytes: Vec<u8>,
}

/// Returns the number of bytes for an image of the given dimensions,
/// or an error if the image is too large to be addressed.
pub(crate) fn byte_len(width: u32, height: u32) -> Result<usize, BufferError> {
    let pixels = u64::from(width) * u64::from(height);
    if pixels > u64::from(MAX_PIXELS) {
        return Err(BufferError::Overflow { width, height });
    }
    usize::try_from(pixels)
        .ok()
        .and_then(|pixels| pixels.checked_mul(CHANNELS))
        .ok_or(BufferError::Overflow { width, height })
}

impl PixelBuffer {
    /// Creates a new [`PixelBuffer`], validating that `bytes` holds exactly
    /// `width * height` RGBA pixels.
    ///
    /// # Errors
    /// Returns [`BufferError::ZeroDimension`] if either dimension is zero,
    /// and [`BufferError::LengthMismatch`] if the length of `bytes` is wrong.
    pub fn new(width: u32, height: u32, bytes: Vec<u8>) -> Result<Self, BufferError> {
        if width == 0 || height == 0 {
            return Err(BufferError::ZeroDimension { width, height });
        }
        let expected = byte_len(width, height)?;
        if bytes.len() == expected {
            Ok(Self { width, height, bytes })
        } else {
            Err(BufferError::LengthMismatch { expected, actual: bytes.len() })
        }
    }

    /// Creates a new fully transparent black [`PixelBuffer`] of the given size.
    ///
    /// # Errors
    /// Returns an error if either dimension is zero or the image is too large.
    pub fn new_zeroed(width: u32, height: u32) -> Result<Self, BufferError> {
        let len = byte_len(width, height)?;
        Self::new(width, height, vec![0; len])
    }

    /// Reuses `bytes` as the storage of a new [`PixelBuffer`] of the given size,
    /// resizing it as needed. The contents are unspecified.
    pub(crate) fn from_recycled(width: u32, height: u32, mut bytes: Vec<u8>) -> Result<Self, BufferError> {
        let len = byte_len(width, height)?;
        bytes.resize(len, 0);
        Self::new(width, height, bytes)
    }

    /// The width of the image in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// The height of the image in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// The dimensions of the image as `(width, height)`.
    #[must_use]
    pub const fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// The number of pixels in the image.
    #[must_use]
    pub fn num_pixels(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// The number of bytes in the image.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always `false`, since both dimensions are non-zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The raw RGBA bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The raw RGBA bytes, mutably. The length cannot change.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Consumes the buffer and returns its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// The pixels of the image as colors.
    #[must_use]
    pub fn pixels(&self) -> &[Srgba<u8>] {
        self.bytes.as_slice().components_as()
    }

    /// The bytes of a single row.
    #[must_use]
    pub fn row(&self, y: u32) -> &[u8] {
        let stride = self.stride();
        let start = y as usize * stride;
        &self.bytes[start..start + stride]
    }

    /// The number of bytes in a row.
    #[must_use]
    pub fn stride(&self) -> usize {
        self.width as usize * CHANNELS
    }

    /// Returns the RGBA components of the pixel at `(x, y)`.
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = self.index(x, y);
        [self.bytes[i], self.bytes[i + 1], self.bytes[i + 2], self.bytes[i + 3]]
    }

    /// Sets the RGBA components of the pixel at `(x, y)`.
    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let i = self.index(x, y);
        self.bytes[i..i + CHANNELS].copy_from_slice(&rgba);
    }

    /// The byte index of the pixel at `(x, y)`.
    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * CHANNELS
    }

    /// Whether any pixel is not fully opaque.
    #[must_use]
    pub fn has_transparency(&self) -> bool {
        self.pixels().iter().any(|p| p.alpha < u8::MAX)
    }

    /// Returns a copy of the image scaled by `factor` (in `(0, 1]`)
    /// using a triangle filter. The result is at least 1x1.
    #[cfg(feature = "image")]
    #[must_use]
    pub fn downscaled(&self, factor: f32) -> Self {
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let scale = |v: u32| ((v as f32 * factor.clamp(0.0, 1.0)).round() as u32).max(1);
        let (width, height) = (scale(self.width), scale(self.height));

        let image = RgbaImage::from_raw(self.width, self.height, self.bytes.clone());
        match image {
            Some(image) => {
                let resized = image::imageops::resize(
                    &image,
                    width,
                    height,
                    image::imageops::FilterType::Triangle,
                );
                Self { width, height, bytes: resized.into_raw() }
            }
            // unreachable given the length invariant
            None => self.clone(),
        }
    }
}

impl AsRef<[u8]> for PixelBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(feature = "image")]
impl TryFrom<RgbaImage> for PixelBuffer {
    type Error = BufferError;

    fn try_from(image: RgbaImage) -> Result<Self, Self::Error> {
        let (width, height) = image.dimensions();
        Self::new(width, height, image.into_raw())
    }
}

#[cfg(feature = "image")]
impl From<PixelBuffer> for RgbaImage {
    fn from(buffer: PixelBuffer) -> Self {
        let PixelBuffer { width, height, bytes } = buffer;
        #[allow(clippy::expect_used)]
        {
            // the length invariant of PixelBuffer matches what RgbaImage requires
            RgbaImage::from_raw(width, height, bytes).expect("large enough buffer")
        }
    }
}

/// A point in time after which work should be abandoned.
///
/// Checked at phase boundaries and while waiting on workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    /// When the budget started.
    start: Instant,
    /// The total budget, or `None` for no limit.
    budget: Option<Duration>,
}

impl Deadline {
    /// A deadline `budget` from now.
    #[must_use]
    pub fn after(budget: Duration) -> Self {
        Self { start: Instant::now(), budget: Some(budget) }
    }

    /// A deadline that never expires.
    #[must_use]
    pub fn never() -> Self {
        Self { start: Instant::now(), budget: None }
    }

    /// The time left before expiry, or `None` for no limit.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.budget.map(|budget| budget.saturating_sub(self.start.elapsed()))
    }

    /// Whether the deadline has passed.
    #[must_use]
    pub fn expired(&self) -> bool {
        self.remaining().is_some_and(|remaining| remaining.is_zero())
    }

    /// Returns [`CompressError::DeadlineExpired`] if the deadline has passed.
    ///
    /// # Errors
    /// See above.
    pub fn check(&self) -> Result<(), CompressError> {
        match self.budget {
            Some(budget) if self.expired() => Err(CompressError::DeadlineExpired(budget)),
            _ => Ok(()),
        }
    }

    /// The shorter of `timeout` and the time left.
    #[must_use]
    pub fn clamp(&self, timeout: Duration) -> Duration {
        self.remaining().map_or(timeout, |remaining| remaining.min(timeout))
    }

    /// A deadline starting now that ends after `fraction` of the time left,
    /// and never later than this one.
    #[must_use]
    pub fn share(&self, fraction: f32) -> Self {
        Self {
            start: Instant::now(),
            budget: self
                .remaining()
                .map(|remaining| {
                    let share = remaining.as_secs_f64() * f64::from(fraction.clamp(0.0, 1.0));
                    Duration::try_from_secs_f64(share).map_or(remaining, |share| share.min(remaining))
                }),
        }
    }
}

/// The supported output formats, one per codec family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    /// The lossy transform codec family.
    Jpeg,
    /// The palette/lossless codec family.
    Png,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn length_must_match_dimensions() {
        assert_eq!(
            PixelBuffer::new(3, 2, vec![0; 23]),
            Err(BufferError::LengthMismatch { expected: 24, actual: 23 })
        );
        assert!(PixelBuffer::new(3, 2, vec![0; 24]).is_ok());
        assert_eq!(
            PixelBuffer::new(0, 2, Vec::new()),
            Err(BufferError::ZeroDimension { width: 0, height: 2 })
        );
    }

    #[test]
    fn pixel_accessors_agree_with_bytes() {
        let mut buffer = PixelBuffer::new_zeroed(4, 3).unwrap();
        buffer.set_pixel(2, 1, [1, 2, 3, 4]);
        assert_eq!(buffer.pixel(2, 1), [1, 2, 3, 4]);
        assert_eq!(&buffer.row(1)[8..12], &[1, 2, 3, 4]);

        let color = buffer.pixels()[4 + 2];
        assert_eq!(color.into_components(), (1, 2, 3, 4));
        assert!(buffer.has_transparency());
    }

    #[test]
    fn recycled_storage_is_resized() {
        let buffer = PixelBuffer::from_recycled(5, 5, vec![7; 3]).unwrap();
        assert_eq!(buffer.len(), 100);
    }

    #[test]
    fn deadlines() {
        let never = Deadline::never();
        assert!(!never.expired());
        assert!(never.check().is_ok());
        assert_eq!(never.clamp(Duration::from_secs(3)), Duration::from_secs(3));

        let expired = Deadline::after(Duration::ZERO);
        assert!(expired.expired());
        assert_eq!(expired.check(), Err(CompressError::DeadlineExpired(Duration::ZERO)));
        assert_eq!(expired.clamp(Duration::from_secs(3)), Duration::ZERO);

        let long = Deadline::after(Duration::from_secs(100));
        assert!(long.share(0.5).remaining().unwrap() <= Duration::from_secs(50));
    }

    #[test]
    fn sharing_an_unbounded_budget_does_not_overflow() {
        let max = Deadline::after(Duration::MAX);
        assert!(max.share(1.0).remaining().unwrap() > Duration::from_secs(u64::MAX / 2));
        assert!(max.share(0.6).check().is_ok());
        assert!(max.share(0.0).expired());
    }

    #[test]
    #[cfg(feature = "image")]
    fn downscale_keeps_aspect_and_minimum_size() {
        let buffer = PixelBuffer::new_zeroed(100, 40).unwrap();
        assert_eq!(buffer.downscaled(0.5).dimensions(), (50, 20));
        assert_eq!(buffer.downscaled(0.001).dimensions(), (1, 1));
    }
}
