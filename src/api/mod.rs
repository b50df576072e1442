//! Contains the options and the entry point of the high level compression API.

mod pipeline;
mod strategy;

pub use pipeline::{compress, CompressionResult};
pub use strategy::Strategy;

use crate::{ClassifyOptions, CompressionTarget, QuantizeParams, SearchOptions};
use std::{sync::Arc, time::Duration};

/// A callback receiving the progress of a compression in percent.
///
/// Calls are made on the thread running [`compress`], with values that never decrease.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Options for the fallback strategies and the overall deadline.
///
/// # Examples
/// ```
/// # use pixpress::FallbackConfig;
/// # use std::time::Duration;
/// let config = FallbackConfig::new();
/// assert_eq!(config.downscale_factor(20_000_000), 0.6);
/// assert_eq!(config.downscale_factor(1_000_000), 0.9);
/// assert_eq!(config.deadline_for(5_000_000), Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FallbackConfig {
    /// `(pixels, factor)` brackets in decreasing order of pixels:
    /// images with more than `pixels` pixels are downscaled by `factor`.
    downscale_brackets: [(u64, f32); 3],
    /// The downscale factor for images below every bracket.
    default_downscale: f32,
    /// The deadline of a zero pixel image.
    base_deadline: Duration,
    /// The extra deadline per megapixel.
    deadline_per_megapixel: Duration,
    /// The upper limit of the deadline.
    max_deadline: Duration,
    /// The fraction of the deadline the primary strategy may use.
    primary_share: f32,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl FallbackConfig {
    /// Creates a new [`FallbackConfig`] with the default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            downscale_brackets: [(16_000_000, 0.6), (8_000_000, 0.7), (2_000_000, 0.8)],
            default_downscale: 0.9,
            base_deadline: Duration::from_secs(10),
            deadline_per_megapixel: Duration::from_secs(4),
            max_deadline: Duration::from_secs(120),
            primary_share: 0.6,
        }
    }

    /// Sets the downscale brackets of the secondary strategy. An image with more than
    /// `brackets[i].0` pixels (checked in order) is downscaled by `brackets[i].1`,
    /// and smaller images by `default`. Factors are clamped to `0.0..=1.0`.
    ///
    /// The defaults are `(16_000_000, 0.6)`, `(8_000_000, 0.7)`, `(2_000_000, 0.8)`, and `0.9`.
    #[must_use]
    pub fn downscale_brackets(mut self, brackets: [(u64, f32); 3], default: f32) -> Self {
        self.downscale_brackets = brackets.map(|(pixels, factor)| (pixels, factor.clamp(0.0, 1.0)));
        self.default_downscale = default.clamp(0.0, 1.0);
        self
    }

    /// Sets the deadline model: `base + per_megapixel * megapixels`, at most `max`.
    ///
    /// The defaults are 10 seconds, 4 seconds, and 120 seconds.
    #[must_use]
    pub fn deadline_model(mut self, base: Duration, per_megapixel: Duration, max: Duration) -> Self {
        self.base_deadline = base;
        self.deadline_per_megapixel = per_megapixel;
        self.max_deadline = max;
        self
    }

    /// Sets the fraction of the deadline that the primary strategy may use
    /// before the secondary strategy takes over. Values are clamped to `0.0..=1.0`.
    ///
    /// The default is `0.6`.
    #[must_use]
    pub fn primary_share(mut self, share: f32) -> Self {
        self.primary_share = share.clamp(0.0, 1.0);
        self
    }

    /// The downscale factor of the secondary strategy for an image with the given number of pixels.
    #[must_use]
    pub fn downscale_factor(&self, pixels: u64) -> f32 {
        self.downscale_brackets
            .iter()
            .find(|&&(threshold, _)| pixels > threshold)
            .map_or(self.default_downscale, |&(_, factor)| factor)
    }

    /// The overall deadline for an image with the given number of pixels.
    #[must_use]
    pub fn deadline_for(&self, pixels: u64) -> Duration {
        #[allow(clippy::cast_precision_loss)]
        let megapixels = pixels as f64 / 1_000_000.0;
        let extra = Duration::try_from_secs_f64(self.deadline_per_megapixel.as_secs_f64() * megapixels)
            .unwrap_or(self.max_deadline);
        self.base_deadline.saturating_add(extra).min(self.max_deadline)
    }

    /// The fraction of the deadline the primary strategy may use.
    #[must_use]
    pub const fn primary_fraction(&self) -> f32 {
        self.primary_share
    }
}

/// The options for [`compress`].
///
/// # Examples
/// ```
/// # use pixpress::CompressOptions;
/// # use std::time::Duration;
/// let options = CompressOptions::new(100 * 1024)
///     .acceptable_size(110 * 1024)
///     .quality_range(0.1, 0.95)
///     .preserve_dimensions(true)
///     .deadline(Duration::from_secs(30))
///     .on_progress(|percent| eprintln!("{percent}%"));
/// ```
#[derive(Clone)]
pub struct CompressOptions {
    /// The byte budget and quality range.
    target: CompressionTarget,
    /// Inputs whose decoded pixels are larger than this are rejected.
    max_input_bytes: usize,
    /// Whether the secondary strategy may downscale.
    preserve_dimensions: bool,
    /// Overrides the size-dependent deadline.
    deadline: Option<Duration>,
    /// The progress callback.
    on_progress: Option<ProgressFn>,
    /// The classifier sample stride (`0` picks one from the grid cap).
    sample_stride: u32,
    /// Classifier thresholds.
    classify: ClassifyOptions,
    /// Quantization thresholds and steps.
    quantize: QuantizeParams,
    /// Search options.
    search: SearchOptions,
    /// Fallback options.
    fallback: FallbackConfig,
}

impl std::fmt::Debug for CompressOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressOptions")
            .field("target", &self.target)
            .field("max_input_bytes", &self.max_input_bytes)
            .field("preserve_dimensions", &self.preserve_dimensions)
            .field("deadline", &self.deadline)
            .field("on_progress", &self.on_progress.is_some())
            .field("sample_stride", &self.sample_stride)
            .field("classify", &self.classify)
            .field("quantize", &self.quantize)
            .field("search", &self.search)
            .field("fallback", &self.fallback)
            .finish()
    }
}

impl CompressOptions {
    /// The default maximum decoded input size of 1 GiB.
    pub const DEFAULT_MAX_INPUT_BYTES: usize = 1 << 30;

    /// Creates a new [`CompressOptions`] for the given target size in bytes.
    #[must_use]
    pub const fn new(target_size: usize) -> Self {
        Self {
            target: CompressionTarget::new(target_size),
            max_input_bytes: Self::DEFAULT_MAX_INPUT_BYTES,
            preserve_dimensions: false,
            deadline: None,
            on_progress: None,
            sample_stride: 0,
            classify: ClassifyOptions::new(),
            quantize: QuantizeParams::new(),
            search: SearchOptions::new(),
            fallback: FallbackConfig::new(),
        }
    }

    /// Sets the size at or below which a strategy's output is accepted without trying
    /// the next strategy. Values below the target size are treated as the target size.
    ///
    /// The default is the target size.
    #[must_use]
    pub fn acceptable_size(mut self, size: usize) -> Self {
        self.target = self.target.acceptable_size(size);
        self
    }

    /// Sets the quality range to search.
    ///
    /// The range must satisfy `0.0 <= min < max <= 1.0`,
    /// otherwise the default range is used as a fallback.
    ///
    /// The default range is `0.05..=1.0`.
    #[must_use]
    pub fn quality_range(mut self, min: f32, max: f32) -> Self {
        self.target = self.target.quality_range(min, max);
        self
    }

    /// Sets the precision of the quality search.
    ///
    /// The default is `0.01`.
    #[must_use]
    pub fn precision(mut self, precision: f32) -> Self {
        self.target = self.target.precision(precision);
        self
    }

    /// Sets the maximum size in bytes of the decoded input (at 4 bytes per pixel).
    /// Larger inputs are rejected before any work is done.
    ///
    /// The default is [`CompressOptions::DEFAULT_MAX_INPUT_BYTES`].
    #[must_use]
    pub fn max_input_bytes(mut self, max: usize) -> Self {
        self.max_input_bytes = max;
        self
    }

    /// Sets whether the output must have the same dimensions as the input.
    /// Otherwise, the secondary strategy may downscale the image.
    ///
    /// The default is `false`.
    #[must_use]
    pub fn preserve_dimensions(mut self, preserve_dimensions: bool) -> Self {
        self.preserve_dimensions = preserve_dimensions;
        self
    }

    /// Sets a fixed overall deadline instead of the size-dependent one.
    #[must_use]
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets a callback that receives the progress in percent.
    #[must_use]
    pub fn on_progress(mut self, on_progress: impl Fn(u8) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(on_progress));
        self
    }

    /// Sets the classifier sample stride. `0` derives it from the classifier's grid cap.
    ///
    /// The default is `0`.
    #[must_use]
    pub fn sample_stride(mut self, sample_stride: u32) -> Self {
        self.sample_stride = sample_stride;
        self
    }

    /// Sets the classifier thresholds.
    #[must_use]
    pub fn classify_options(mut self, classify: ClassifyOptions) -> Self {
        self.classify = classify;
        self
    }

    /// Sets the quantization thresholds and steps.
    #[must_use]
    pub fn quantize_params(mut self, quantize: QuantizeParams) -> Self {
        self.quantize = quantize;
        self
    }

    /// Sets the quality search options.
    #[must_use]
    pub fn search_options(mut self, search: SearchOptions) -> Self {
        self.search = search;
        self
    }

    /// Sets the fallback options.
    #[must_use]
    pub fn fallback_config(mut self, fallback: FallbackConfig) -> Self {
        self.fallback = fallback;
        self
    }

    /// The byte budget and quality range.
    #[must_use]
    pub const fn target(&self) -> &CompressionTarget {
        &self.target
    }
}
