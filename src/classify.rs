//! Heuristic content classification used to pick a quantization pass.
//!
//! The classifier samples pixels on a regular grid (capped at roughly 300x300 samples),
//! buckets each sample as black, white, gray, or colored, counts distinct colors at a
//! reduced precision, and counts samples that differ strongly from their right or bottom
//! grid neighbor. The resulting ratios drive a fixed decision table:
//!
//! 1. [`ContentKind::LineArt`] if the image is mostly black/white (or black/white/gray) with edges
//! 2. [`ContentKind::Photographic`] if it has many colors and few edges
//! 3. [`ContentKind::Graphical`] if it has few colors, many edges, or transparency
//! 4. [`ContentKind::Mixed`] otherwise
//!
//! # Examples
//! ```
//! # use pixpress::{classify, PixelBuffer, ContentKind};
//! # fn main() -> Result<(), pixpress::BufferError> {
//! let black = PixelBuffer::new(50, 50, [0, 0, 0, 255].repeat(2500))?;
//! let result = classify(&black, 0);
//! assert!(result.black_white_ratio > 0.99);
//! assert!(!result.has_transparency);
//! # Ok(())
//! # }
//! ```

use crate::{types::byte_len, BufferError, PixelBuffer, CHANNELS};
use bitvec::vec::BitVec;
use std::fmt::Display;

/// The closed set of content kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    /// Mostly black, white, or gray with sharp edges, e.g., scanned text or diagrams.
    LineArt,
    /// Many colors with smooth transitions, e.g., photos.
    Photographic,
    /// Few colors, many hard edges, or transparency, e.g., logos and UI captures.
    Graphical,
    /// Anything else.
    Mixed,
}

impl Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ContentKind::LineArt => "lineart",
                ContentKind::Photographic => "photographic",
                ContentKind::Graphical => "graphical",
                ContentKind::Mixed => "mixed",
            }
        )
    }
}

/// The output of the classifier. Derived purely from a sample of the pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassificationResult {
    /// The decided content kind.
    pub kind: ContentKind,
    /// Distinct reduced-precision colors per sample.
    pub color_ratio: f32,
    /// Samples on an edge per sample.
    pub edge_ratio: f32,
    /// Black or white samples per sample.
    pub black_white_ratio: f32,
    /// Gray (but not black or white) samples per sample.
    pub gray_ratio: f32,
    /// Whether any sample is not fully opaque.
    pub has_transparency: bool,
    /// The number of pixels sampled.
    pub samples: u32,
}

/// Thresholds for the classifier.
///
/// The defaults are empirically tuned and rarely need changing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifyOptions {
    /// The maximum number of samples along each axis.
    grid_cap: u32,
    /// Channels below this value (on all of r, g, b) count as black.
    black_below: u8,
    /// Channels above this value (on all of r, g, b) count as white.
    white_above: u8,
    /// Pairwise channel differences below this value count as gray.
    gray_delta: u8,
    /// Each channel is divided by this before counting distinct colors.
    color_divisor: u8,
    /// A summed r, g, b difference above this to a neighbor marks an edge.
    edge_delta: u16,
    /// Alpha values below this count as transparency.
    opaque_alpha: u8,
    /// `black_white_ratio` above this (with edges) means line art.
    lineart_black_white: f32,
    /// `black_white_ratio + gray_ratio` above this (with edges) means line art.
    lineart_black_white_gray: f32,
    /// Line art requires `edge_ratio` above this.
    lineart_min_edges: f32,
    /// Photographic requires `color_ratio` above this.
    photo_min_colors: f32,
    /// Photographic requires `edge_ratio` below this.
    photo_max_edges: f32,
    /// Graphical if `color_ratio` is below this.
    graphic_max_colors: f32,
    /// Graphical if `edge_ratio` is above this.
    graphic_min_edges: f32,
}

impl Default for ClassifyOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassifyOptions {
    /// The default number of samples along each axis.
    pub const DEFAULT_GRID_CAP: u32 = 300;

    /// Creates a new [`ClassifyOptions`] with the default thresholds.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            grid_cap: Self::DEFAULT_GRID_CAP,
            black_below: 30,
            white_above: 225,
            gray_delta: 20,
            color_divisor: 5,
            edge_delta: 100,
            opaque_alpha: u8::MAX,
            lineart_black_white: 0.8,
            lineart_black_white_gray: 0.9,
            lineart_min_edges: 0.05,
            photo_min_colors: 0.5,
            photo_max_edges: 0.1,
            graphic_max_colors: 0.2,
            graphic_min_edges: 0.2,
        }
    }

    /// Sets the maximum number of samples along each axis. Values below `1` are treated as `1`.
    ///
    /// The default is `300`.
    #[must_use]
    pub fn grid_cap(mut self, grid_cap: u32) -> Self {
        self.grid_cap = grid_cap.max(1);
        self
    }

    /// Sets the black and white thresholds.
    ///
    /// The defaults are `30` and `225`.
    #[must_use]
    pub fn black_white_thresholds(mut self, black_below: u8, white_above: u8) -> Self {
        self.black_below = black_below;
        self.white_above = white_above;
        self
    }

    /// Sets the maximum pairwise channel difference for a pixel to count as gray.
    ///
    /// The default is `20`.
    #[must_use]
    pub fn gray_delta(mut self, gray_delta: u8) -> Self {
        self.gray_delta = gray_delta;
        self
    }

    /// Sets the divisor used to reduce color precision before counting distinct colors.
    /// Values below `1` are treated as `1`.
    ///
    /// The default is `5`.
    #[must_use]
    pub fn color_divisor(mut self, color_divisor: u8) -> Self {
        self.color_divisor = color_divisor.max(1);
        self
    }

    /// Sets the summed channel difference above which a sample is on an edge.
    ///
    /// The default is `100`.
    #[must_use]
    pub fn edge_delta(mut self, edge_delta: u16) -> Self {
        self.edge_delta = edge_delta;
        self
    }

    /// Sets the line art thresholds: `black_white_ratio`, `black_white_ratio + gray_ratio`,
    /// and the minimum `edge_ratio`.
    ///
    /// The defaults are `0.8`, `0.9`, and `0.05`.
    #[must_use]
    pub fn lineart_thresholds(mut self, black_white: f32, black_white_gray: f32, min_edges: f32) -> Self {
        self.lineart_black_white = black_white;
        self.lineart_black_white_gray = black_white_gray;
        self.lineart_min_edges = min_edges;
        self
    }

    /// Sets the photographic thresholds: the minimum `color_ratio` and maximum `edge_ratio`.
    ///
    /// The defaults are `0.5` and `0.1`.
    #[must_use]
    pub fn photographic_thresholds(mut self, min_colors: f32, max_edges: f32) -> Self {
        self.photo_min_colors = min_colors;
        self.photo_max_edges = max_edges;
        self
    }

    /// Sets the graphical thresholds: the maximum `color_ratio` and minimum `edge_ratio`.
    ///
    /// The defaults are `0.2` and `0.2`.
    #[must_use]
    pub fn graphical_thresholds(mut self, max_colors: f32, min_edges: f32) -> Self {
        self.graphic_max_colors = max_colors;
        self.graphic_min_edges = min_edges;
        self
    }

    /// The stride actually used for an image, given the requested stride.
    ///
    /// A requested stride of `0` picks the smallest stride that respects the grid cap.
    /// A requested stride that would exceed the grid cap is increased.
    #[must_use]
    pub fn effective_stride(&self, width: u32, height: u32, sample_stride: u32) -> u32 {
        let min_stride = width.max(height).div_ceil(self.grid_cap).max(1);
        sample_stride.max(min_stride)
    }

    /// Classifies the image by sampling every `sample_stride`-th pixel along each axis.
    ///
    /// See the [module documentation](self) for details.
    #[must_use]
    pub fn classify(&self, buffer: &PixelBuffer, sample_stride: u32) -> ClassificationResult {
        let (width, height) = buffer.dimensions();
        self.classify_unchecked(buffer.as_bytes(), width, height, sample_stride)
    }

    /// Classifies a raw RGBA byte slice, validating its length first.
    ///
    /// # Errors
    /// Returns [`BufferError::LengthMismatch`] if `bytes.len() != width * height * 4`,
    /// and [`BufferError::ZeroDimension`] if either dimension is zero.
    pub fn classify_bytes(
        &self,
        bytes: &[u8],
        width: u32,
        height: u32,
        sample_stride: u32,
    ) -> Result<ClassificationResult, BufferError> {
        if width == 0 || height == 0 {
            return Err(BufferError::ZeroDimension { width, height });
        }
        let expected = byte_len(width, height)?;
        if bytes.len() == expected {
            Ok(self.classify_unchecked(bytes, width, height, sample_stride))
        } else {
            Err(BufferError::LengthMismatch { expected, actual: bytes.len() })
        }
    }

    /// Classifies a byte slice already known to hold `width * height` RGBA pixels.
    fn classify_unchecked(
        &self,
        bytes: &[u8],
        width: u32,
        height: u32,
        sample_stride: u32,
    ) -> ClassificationResult {
        let stride = self.effective_stride(width, height, sample_stride);
        let levels = usize::from(u8::MAX / self.color_divisor) + 1;
        let mut seen: BitVec = BitVec::repeat(false, levels * levels * levels);

        let pixel_at = |x: u32, y: u32| {
            let i = (y as usize * width as usize + x as usize) * CHANNELS;
            [bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]
        };

        let mut samples = 0u32;
        let mut unique = 0u32;
        let mut edges = 0u32;
        let mut black_white = 0u32;
        let mut gray = 0u32;
        let mut has_transparency = false;

        for y in (0..height).step_by(stride as usize) {
            for x in (0..width).step_by(stride as usize) {
                let [r, g, b, a] = pixel_at(x, y);
                samples += 1;

                if a < self.opaque_alpha {
                    has_transparency = true;
                }

                if r < self.black_below && g < self.black_below && b < self.black_below
                    || r > self.white_above && g > self.white_above && b > self.white_above
                {
                    black_white += 1;
                } else if is_gray([r, g, b], self.gray_delta) {
                    gray += 1;
                }

                let [r5, g5, b5] = [r, g, b].map(|c| usize::from(c / self.color_divisor));
                let key = (r5 * levels + g5) * levels + b5;
                if !seen[key] {
                    seen.set(key, true);
                    unique += 1;
                }

                let right = (x + stride < width).then(|| pixel_at(x + stride, y));
                let below = (y + stride < height).then(|| pixel_at(x, y + stride));
                if [right, below]
                    .into_iter()
                    .flatten()
                    .any(|n| channel_delta_sum([r, g, b], n) > self.edge_delta)
                {
                    edges += 1;
                }
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let ratio = |n: u32| n as f32 / samples.max(1) as f32;

        let color_ratio = ratio(unique);
        let edge_ratio = ratio(edges);
        let black_white_ratio = ratio(black_white);
        let gray_ratio = ratio(gray);

        let kind = self.decide(color_ratio, edge_ratio, black_white_ratio, gray_ratio, has_transparency);

        ClassificationResult {
            kind,
            color_ratio,
            edge_ratio,
            black_white_ratio,
            gray_ratio,
            has_transparency,
            samples,
        }
    }

    /// Applies the decision table to the sampled ratios.
    fn decide(
        &self,
        color_ratio: f32,
        edge_ratio: f32,
        black_white_ratio: f32,
        gray_ratio: f32,
        has_transparency: bool,
    ) -> ContentKind {
        if (black_white_ratio > self.lineart_black_white
            || black_white_ratio + gray_ratio > self.lineart_black_white_gray)
            && edge_ratio > self.lineart_min_edges
        {
            ContentKind::LineArt
        } else if color_ratio > self.photo_min_colors && edge_ratio < self.photo_max_edges {
            ContentKind::Photographic
        } else if color_ratio < self.graphic_max_colors
            || edge_ratio > self.graphic_min_edges
            || has_transparency
        {
            ContentKind::Graphical
        } else {
            ContentKind::Mixed
        }
    }
}

/// Whether all pairwise differences between r, g, and b are below `delta`.
#[inline]
pub(crate) fn is_gray([r, g, b]: [u8; 3], delta: u8) -> bool {
    r.abs_diff(g) < delta && r.abs_diff(b) < delta && g.abs_diff(b) < delta
}

/// The summed absolute r, g, b difference between two pixels.
#[inline]
fn channel_delta_sum([r, g, b]: [u8; 3], [nr, ng, nb, _]: [u8; 4]) -> u16 {
    u16::from(r.abs_diff(nr)) + u16::from(g.abs_diff(ng)) + u16::from(b.abs_diff(nb))
}

/// Classifies the image with the default [`ClassifyOptions`].
///
/// A `sample_stride` of `0` picks a stride automatically.
#[must_use]
pub fn classify(buffer: &PixelBuffer, sample_stride: u32) -> ClassificationResult {
    ClassifyOptions::new().classify(buffer, sample_stride)
}
