//! A library for compressing raster images to a target byte budget while
//! preserving as much perceptual quality as the budget allows.
//!
//! `pixpress` works entirely on decoded pixels. An image is first classified
//! (line art, photographic, graphical, or mixed content), then quantized with a pass
//! chosen for that classification, and finally encoded through a binary search over
//! the codec quality parameter. Large images are split into tiles that are quantized
//! concurrently on a bounded worker pool. A fallback state machine sequences
//! progressively simpler strategies, so a result is produced for any valid input.
//!
//! # Features
//! To reduce dependencies and compile times, `pixpress` has several `cargo` features
//! that can be turned off or on:
//! - `threads`: exposes parallel versions of the quantization passes via [`rayon`].
//! - `image`: enables integration with the [`image`] crate, including built-in
//!   JPEG and PNG codecs and decoding of encoded sources.
//!
//! # High-Level API
//! To get started, see [`compress`] and [`CompressOptions`]:
//! ```no_run
//! # use pixpress::{compress, CompressOptions, EncodedImage, JpegCodec, Scheduler, SchedulerConfig};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bytes = std::fs::read("some image")?;
//! let scheduler = Scheduler::init(SchedulerConfig::default());
//!
//! let options = CompressOptions::new(200 * 1024) // target of 200 KiB
//!     .preserve_dimensions(true);
//!
//! let result = compress(&EncodedImage::new(&bytes), &options, &JpegCodec, &scheduler)?;
//! println!("quality {} met target: {}", result.final_quality, result.met_target);
//!
//! scheduler.shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! Note that some of the types above require the `image` feature to be enabled.

#![deny(unsafe_code, unsafe_op_in_unsafe_fn)]
#![warn(
    clippy::pedantic,
    clippy::cargo,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::todo,
    clippy::unimplemented,
    clippy::unwrap_used,
    clippy::unwrap_in_result,
    clippy::expect_used,
    clippy::unneeded_field_pattern,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::unnecessary_self_imports,
    clippy::str_to_string,
    clippy::string_to_string,
    clippy::string_slice,
    missing_docs,
    clippy::missing_docs_in_private_items,
    rustdoc::all,
    clippy::float_cmp_const,
    clippy::lossy_float_literal
)]
#![allow(
    clippy::doc_markdown,
    clippy::module_name_repetitions,
    clippy::many_single_char_names,
    clippy::missing_panics_doc,
    clippy::unreadable_literal,
    clippy::wildcard_imports
)]

mod api;
mod error;
mod pool;
mod scheduler;
mod traits;
mod types;

pub mod classify;
pub mod quantize;
pub mod search;
pub mod tile;

#[cfg(feature = "image")]
mod codec;

pub use api::*;
pub use classify::{classify, ClassificationResult, ClassifyOptions, ContentKind};
pub use error::*;
pub use pool::{PoolConfig, PooledWorker, ProgressSender, TaskHandle, WorkerMessage, WorkerPool};
pub use quantize::{quantize, QuantizeParams, QuantizePass};
pub use scheduler::{BufferPool, Scheduler, SchedulerConfig};
pub use search::{
    search, CompressionAttempt, CompressionTarget, MonotonicityViolation, SearchOptions, SearchReport,
};
pub use tile::{QuantizeProcessor, Rect, Tile, TileConfig, TilePlan, TileProcessor, TileStats};
pub use traits::*;
pub use types::*;

#[cfg(feature = "image")]
pub use codec::{EncodedImage, JpegCodec, PngCodec};

/// The maximum supported image size in number of pixels is `u32::MAX`.
pub const MAX_PIXELS: u32 = u32::MAX;

/// The number of bytes per pixel in a [`PixelBuffer`] (R, G, B, A).
pub const CHANNELS: usize = 4;

#[cfg(test)]
pub(crate) mod tests {
    use crate::{EncodeError, Encoder, ImageFormat, PixelBuffer};
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoroshiro128PlusPlus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// An image of uniformly random opaque pixels.
    pub fn noise_image(width: u32, height: u32, seed: u64) -> PixelBuffer {
        let mut rng = Xoroshiro128PlusPlus::seed_from_u64(seed);
        let mut image = PixelBuffer::new_zeroed(width, height).unwrap();
        for pixel in image.as_bytes_mut().chunks_exact_mut(4) {
            pixel[0] = rng.gen();
            pixel[1] = rng.gen();
            pixel[2] = rng.gen();
            pixel[3] = 255;
        }
        image
    }

    /// An image filled with a single color.
    pub fn solid_image(width: u32, height: u32, rgba: [u8; 4]) -> PixelBuffer {
        let mut image = PixelBuffer::new_zeroed(width, height).unwrap();
        for pixel in image.as_bytes_mut().chunks_exact_mut(4) {
            pixel.copy_from_slice(&rgba);
        }
        image
    }

    /// A two color checkerboard with square cells of `cell` pixels.
    pub fn checkerboard(width: u32, height: u32, cell: u32, a: [u8; 4], b: [u8; 4]) -> PixelBuffer {
        let mut image = PixelBuffer::new_zeroed(width, height).unwrap();
        for y in 0..height {
            for x in 0..width {
                let color = if (x / cell + y / cell) % 2 == 0 { a } else { b };
                image.set_pixel(x, y, color);
            }
        }
        image
    }

    /// Horizontal and vertical ramps in red and green with a noisy blue channel
    /// whose swing stays below the edge threshold, which reads as photographic content.
    pub fn photo_image(width: u32, height: u32, seed: u64) -> PixelBuffer {
        let mut rng = Xoroshiro128PlusPlus::seed_from_u64(seed);
        let mut image = PixelBuffer::new_zeroed(width, height).unwrap();
        #[allow(clippy::cast_possible_truncation)]
        let ramp = |v: u32, len: u32| (v * 255 / len.saturating_sub(1).max(1)) as u8;
        for y in 0..height {
            for x in 0..width {
                let blue = rng.gen_range(0..=97);
                image.set_pixel(x, y, [ramp(x, width), ramp(y, height), blue, 255]);
            }
        }
        image
    }

    /// The number of distinct RGBA values in the image.
    pub fn distinct_colors(image: &PixelBuffer) -> usize {
        let mut colors = image
            .as_bytes()
            .chunks_exact(4)
            .map(|p| [p[0], p[1], p[2], p[3]])
            .collect::<Vec<_>>();
        colors.sort_unstable();
        colors.dedup();
        colors.len()
    }

    /// A deterministic encoder whose output size only depends on the quality:
    /// `base + quality * slope` bytes, strictly increasing in quality.
    pub struct MockEncoder {
        pub base: usize,
        pub slope: f32,
        pub calls: AtomicUsize,
        pub fail: Option<EncodeError>,
    }

    impl MockEncoder {
        pub fn new(base: usize, slope: f32) -> Self {
            Self { base, slope, calls: AtomicUsize::new(0), fail: None }
        }

        pub fn failing(error: EncodeError) -> Self {
            Self { fail: Some(error), ..Self::new(0, 0.0) }
        }

        pub fn size_at(&self, quality: f32) -> usize {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let extra = (quality * self.slope) as usize;
            self.base + extra
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Encoder for MockEncoder {
        fn format(&self) -> ImageFormat {
            ImageFormat::Jpeg
        }

        fn encode(&self, _pixels: &PixelBuffer, quality: f32) -> Result<Vec<u8>, EncodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.fail {
                Some(error) => Err(error.clone()),
                None => Ok(vec![0; self.size_at(quality)]),
            }
        }
    }
}
