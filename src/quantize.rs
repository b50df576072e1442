//! Classification-driven, in-place pixel transforms that reduce color and alpha entropy.
//!
//! Each [`ContentKind`] maps to a base [`QuantizePass`]. Line art can additionally be
//! escalated to an aggressive pass, and any image can be reduced with the aggressive
//! fallback pass as a last resort. The passes are not idempotent in general,
//! so each is applied at most once per compression attempt.
//!
//! # Examples
//! ```
//! # use pixpress::{quantize, ContentKind, PixelBuffer};
//! # fn main() -> Result<(), pixpress::BufferError> {
//! let mut buffer = PixelBuffer::new(1, 1, vec![201, 99, 13, 100])?;
//! quantize(&mut buffer, ContentKind::Graphical);
//! assert_eq!(buffer.pixel(0, 0), [200, 96, 16, 0]);
//! # Ok(())
//! # }
//! ```

use crate::{classify::is_gray, ContentKind, PixelBuffer, CHANNELS};
use bitvec::vec::BitVec;
#[cfg(feature = "threads")]
use rayon::prelude::*;

/// The set of quantization passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuantizePass {
    /// Snaps near-black and near-white pixels, reduces grays to a few levels,
    /// and coarsely quantizes the remaining colors. Alpha is untouched.
    LineArt,
    /// Reduces the image to black, mid-gray, and white with binary alpha.
    LineArtAggressive,
    /// Fine per-channel quantization with binary alpha.
    Photographic,
    /// Medium per-channel quantization with binary alpha.
    Graphical,
    /// Fine quantization on edges and coarser quantization elsewhere, with binary alpha.
    Adaptive,
    /// Coarse per-channel quantization with binary alpha, usable on any image.
    AggressiveFallback,
}

impl From<ContentKind> for QuantizePass {
    fn from(kind: ContentKind) -> Self {
        match kind {
            ContentKind::LineArt => QuantizePass::LineArt,
            ContentKind::Photographic => QuantizePass::Photographic,
            ContentKind::Graphical => QuantizePass::Graphical,
            ContentKind::Mixed => QuantizePass::Adaptive,
        }
    }
}

impl QuantizePass {
    /// The number of neighboring pixels on each side a pixel's result depends on.
    #[must_use]
    pub const fn margin(self) -> u32 {
        match self {
            QuantizePass::Adaptive => 1,
            QuantizePass::LineArt
            | QuantizePass::LineArtAggressive
            | QuantizePass::Photographic
            | QuantizePass::Graphical
            | QuantizePass::AggressiveFallback => 0,
        }
    }

    /// The pass to apply on top of this one when it did not reduce the size enough, if any.
    #[must_use]
    pub const fn escalation(self) -> Option<Self> {
        match self {
            QuantizePass::LineArt => Some(QuantizePass::LineArtAggressive),
            QuantizePass::LineArtAggressive
            | QuantizePass::Photographic
            | QuantizePass::Graphical
            | QuantizePass::Adaptive
            | QuantizePass::AggressiveFallback => None,
        }
    }
}

/// The thresholds and step sizes used by the quantization passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantizeParams {
    /// Line art: pixels with all channels below this become black.
    lineart_black_below: u8,
    /// Line art: pixels with all channels above this become white.
    lineart_white_above: u8,
    /// Line art: pairwise channel differences below this make a pixel gray.
    gray_delta: u8,
    /// Line art: the number of evenly spaced gray levels.
    gray_levels: u8,
    /// Line art: the quantization step for colored pixels.
    lineart_color_step: u8,
    /// Alpha values at or above this become opaque, the rest transparent.
    alpha_threshold: u8,
    /// Aggressive line art: brightness below this becomes black.
    aggressive_black_below: u8,
    /// Aggressive line art: brightness below this (and not black) becomes `mid_gray`.
    aggressive_gray_below: u8,
    /// Aggressive line art: the middle gray value.
    mid_gray: u8,
    /// Photographic quantization step.
    photographic_step: u8,
    /// Graphical quantization step.
    graphical_step: u8,
    /// Adaptive: the step for edge pixels.
    edge_step: u8,
    /// Adaptive: the step for non-edge pixels.
    flat_step: u8,
    /// Adaptive: the maximum channel difference to a 4-neighbor above which a pixel is an edge.
    edge_delta: u8,
    /// Aggressive fallback quantization step.
    fallback_step: u8,
}

impl Default for QuantizeParams {
    fn default() -> Self {
        Self::new()
    }
}

impl QuantizeParams {
    /// Creates a new [`QuantizeParams`] with the default thresholds and steps.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            lineart_black_below: 30,
            lineart_white_above: 200,
            gray_delta: 20,
            gray_levels: 4,
            lineart_color_step: 32,
            alpha_threshold: 128,
            aggressive_black_below: 40,
            aggressive_gray_below: 150,
            mid_gray: 128,
            photographic_step: 4,
            graphical_step: 8,
            edge_step: 2,
            flat_step: 6,
            edge_delta: 100,
            fallback_step: 16,
        }
    }

    /// Sets the line art black and white thresholds.
    ///
    /// The defaults are `30` and `200`.
    #[must_use]
    pub fn lineart_thresholds(mut self, black_below: u8, white_above: u8) -> Self {
        self.lineart_black_below = black_below;
        self.lineart_white_above = white_above;
        self
    }

    /// Sets the number of gray levels for line art. Values below `2` are treated as `2`.
    ///
    /// The default is `4`.
    #[must_use]
    pub fn gray_levels(mut self, gray_levels: u8) -> Self {
        self.gray_levels = gray_levels.max(2);
        self
    }

    /// Sets the alpha binarization threshold.
    ///
    /// The default is `128`.
    #[must_use]
    pub fn alpha_threshold(mut self, alpha_threshold: u8) -> Self {
        self.alpha_threshold = alpha_threshold;
        self
    }

    /// Sets the per-channel steps for the photographic, graphical,
    /// and aggressive fallback passes.
    ///
    /// The defaults are `4`, `8`, and `16`.
    #[must_use]
    pub fn steps(mut self, photographic: u8, graphical: u8, fallback: u8) -> Self {
        self.photographic_step = photographic;
        self.graphical_step = graphical;
        self.fallback_step = fallback;
        self
    }

    /// Sets the adaptive pass parameters: the step on edges, the step elsewhere,
    /// and the edge threshold.
    ///
    /// The defaults are `2`, `6`, and `100`.
    #[must_use]
    pub fn adaptive(mut self, edge_step: u8, flat_step: u8, edge_delta: u8) -> Self {
        self.edge_step = edge_step;
        self.flat_step = flat_step;
        self.edge_delta = edge_delta;
        self
    }

    /// Applies the given pass to the buffer in place. The dimensions never change.
    pub fn apply(&self, buffer: &mut PixelBuffer, pass: QuantizePass) {
        if pass == QuantizePass::Adaptive {
            let edges = self.edge_mask(buffer);
            for (i, pixel) in buffer.as_bytes_mut().chunks_exact_mut(CHANNELS).enumerate() {
                self.adaptive_pixel(pixel, edges[i]);
            }
        } else {
            for pixel in buffer.as_bytes_mut().chunks_exact_mut(CHANNELS) {
                self.pixel(pass, pixel);
            }
        }
    }

    /// Applies the given pass to the buffer in place, in parallel over rows.
    ///
    /// The result is identical to [`QuantizeParams::apply`].
    #[cfg(feature = "threads")]
    pub fn apply_par(&self, buffer: &mut PixelBuffer, pass: QuantizePass) {
        let width = buffer.width() as usize;
        let stride = buffer.stride();
        if pass == QuantizePass::Adaptive {
            let edges = self.edge_mask(buffer);
            buffer
                .as_bytes_mut()
                .par_chunks_mut(stride)
                .enumerate()
                .for_each(|(y, row)| {
                    let edges = &edges[(y * width)..((y + 1) * width)];
                    for (pixel, edge) in row.chunks_exact_mut(CHANNELS).zip(edges) {
                        self.adaptive_pixel(pixel, *edge);
                    }
                });
        } else {
            buffer.as_bytes_mut().par_chunks_mut(stride).for_each(|row| {
                for pixel in row.chunks_exact_mut(CHANNELS) {
                    self.pixel(pass, pixel);
                }
            });
        }
    }

    /// Applies a pass that only depends on the pixel itself.
    #[inline]
    fn pixel(&self, pass: QuantizePass, pixel: &mut [u8]) {
        match pass {
            QuantizePass::LineArt => self.lineart_pixel(pixel),
            QuantizePass::LineArtAggressive => self.aggressive_lineart_pixel(pixel),
            QuantizePass::Photographic => self.step_pixel(pixel, self.photographic_step),
            QuantizePass::Graphical => self.step_pixel(pixel, self.graphical_step),
            QuantizePass::AggressiveFallback => self.step_pixel(pixel, self.fallback_step),
            // needs neighborhood information, handled by the callers
            QuantizePass::Adaptive => self.step_pixel(pixel, self.flat_step),
        }
    }

    /// Line art base pass.
    #[inline]
    fn lineart_pixel(&self, pixel: &mut [u8]) {
        let [r, g, b] = [pixel[0], pixel[1], pixel[2]];
        let rgb = if r < self.lineart_black_below
            && g < self.lineart_black_below
            && b < self.lineart_black_below
        {
            [0; 3]
        } else if r > self.lineart_white_above
            && g > self.lineart_white_above
            && b > self.lineart_white_above
        {
            [u8::MAX; 3]
        } else if is_gray([r, g, b], self.gray_delta) {
            [gray_level(brightness([r, g, b]), self.gray_levels); 3]
        } else {
            [r, g, b].map(|c| quantize_step(c, self.lineart_color_step))
        };
        pixel[..3].copy_from_slice(&rgb);
    }

    /// Aggressive line art pass.
    #[inline]
    fn aggressive_lineart_pixel(&self, pixel: &mut [u8]) {
        let value = match brightness([pixel[0], pixel[1], pixel[2]]) {
            v if v < self.aggressive_black_below => 0,
            v if v < self.aggressive_gray_below => self.mid_gray,
            _ => u8::MAX,
        };
        pixel[..3].fill(value);
        pixel[3] = binarize(pixel[3], self.alpha_threshold);
    }

    /// Uniform per-channel quantization with binary alpha.
    #[inline]
    fn step_pixel(&self, pixel: &mut [u8], step: u8) {
        for c in &mut pixel[..3] {
            *c = quantize_step(*c, step);
        }
        pixel[3] = binarize(pixel[3], self.alpha_threshold);
    }

    /// Adaptive pass for a single pixel given its edge flag.
    #[inline]
    fn adaptive_pixel(&self, pixel: &mut [u8], edge: bool) {
        let step = if edge { self.edge_step } else { self.flat_step };
        self.step_pixel(pixel, step);
    }

    /// Flags each pixel whose maximum channel difference to any 4-neighbor exceeds `edge_delta`.
    fn edge_mask(&self, buffer: &PixelBuffer) -> BitVec {
        let (width, height) = buffer.dimensions();
        let (width, height) = (width as usize, height as usize);
        let bytes = buffer.as_bytes();
        let rgb = |i: usize| {
            let i = i * CHANNELS;
            [bytes[i], bytes[i + 1], bytes[i + 2]]
        };
        let differs = |a: [u8; 3], b: [u8; 3]| {
            a.iter().zip(&b).any(|(&a, &b)| a.abs_diff(b) > self.edge_delta)
        };

        let mut mask: BitVec = BitVec::repeat(false, width * height);
        for y in 0..height {
            for x in 0..width {
                let i = y * width + x;
                let center = rgb(i);
                // only look right and down, marking both ends of each edge
                let right = (x + 1 < width).then(|| i + 1);
                let below = (y + 1 < height).then(|| i + width);
                for j in [right, below].into_iter().flatten() {
                    if differs(center, rgb(j)) {
                        mask.set(i, true);
                        mask.set(j, true);
                    }
                }
            }
        }
        mask
    }
}

/// Rounds `value` to the nearest multiple of `step`, clamped to `u8::MAX`.
#[inline]
pub(crate) fn quantize_step(value: u8, step: u8) -> u8 {
    if step <= 1 {
        value
    } else {
        let step = u16::from(step);
        let rounded = (u16::from(value) + step / 2) / step * step;
        #[allow(clippy::cast_possible_truncation)]
        {
            rounded.min(u16::from(u8::MAX)) as u8
        }
    }
}

/// Snaps the value to the nearest of `levels` evenly spaced values in `0..=255`.
#[inline]
fn gray_level(value: u8, levels: u8) -> u8 {
    let spacing = u16::from(u8::MAX) / u16::from(levels.max(2) - 1);
    let level = (u16::from(value) + spacing / 2) / spacing;
    #[allow(clippy::cast_possible_truncation)]
    {
        (level * spacing).min(u16::from(u8::MAX)) as u8
    }
}

/// The unweighted mean of r, g, and b.
#[inline]
fn brightness([r, g, b]: [u8; 3]) -> u8 {
    #[allow(clippy::cast_possible_truncation)]
    {
        ((u16::from(r) + u16::from(g) + u16::from(b)) / 3) as u8
    }
}

/// Maps alpha to fully opaque or fully transparent.
#[inline]
fn binarize(alpha: u8, threshold: u8) -> u8 {
    if alpha >= threshold {
        u8::MAX
    } else {
        0
    }
}

/// Applies the base pass for `kind` with the default [`QuantizeParams`].
pub fn quantize(buffer: &mut PixelBuffer, kind: ContentKind) {
    QuantizeParams::new().apply(buffer, kind.into());
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::tests::*;

    const ALL_PASSES: [QuantizePass; 6] = [
        QuantizePass::LineArt,
        QuantizePass::LineArtAggressive,
        QuantizePass::Photographic,
        QuantizePass::Graphical,
        QuantizePass::Adaptive,
        QuantizePass::AggressiveFallback,
    ];

    fn one_pixel(rgba: [u8; 4], pass: QuantizePass) -> [u8; 4] {
        let mut buffer = PixelBuffer::new(1, 1, rgba.to_vec()).unwrap();
        QuantizeParams::new().apply(&mut buffer, pass);
        buffer.pixel(0, 0)
    }

    #[test]
    fn step_rounding() {
        assert_eq!(quantize_step(0, 8), 0);
        assert_eq!(quantize_step(3, 8), 0);
        assert_eq!(quantize_step(4, 8), 8);
        assert_eq!(quantize_step(255, 8), 255);
        assert_eq!(quantize_step(250, 32), 255);
        assert_eq!(quantize_step(77, 1), 77);
        assert_eq!(gray_level(40, 4), 0);
        assert_eq!(gray_level(43, 4), 85);
        assert_eq!(gray_level(200, 4), 170);
        assert_eq!(gray_level(250, 4), 255);
    }

    #[test]
    fn black_stays_black() {
        let image = solid_image(50, 50, [0, 0, 0, 255]);
        for pass in ALL_PASSES {
            let mut quantized = image.clone();
            QuantizeParams::new().apply(&mut quantized, pass);
            assert_eq!(quantized, image, "{pass:?}");
        }
    }

    #[test]
    fn dimensions_are_preserved() {
        let image = noise_image(37, 19, 3);
        for pass in ALL_PASSES {
            let mut quantized = image.clone();
            QuantizeParams::new().apply(&mut quantized, pass);
            assert_eq!(quantized.dimensions(), image.dimensions());
            assert_eq!(quantized.len(), image.len());
        }
    }

    #[test]
    fn checkerboard_collapses_to_two_colors() {
        let mut image = checkerboard(512, 512, 8, [200, 30, 30, 255], [30, 30, 200, 255]);
        quantize(&mut image, ContentKind::Graphical);
        assert_eq!(distinct_colors(&image), 2);
        assert_eq!(image.pixel(0, 0), [200, 32, 32, 255]);
        assert_eq!(image.pixel(8, 0), [32, 32, 200, 255]);
    }

    #[test]
    fn lineart_base_pass() {
        assert_eq!(one_pixel([10, 20, 29, 77], QuantizePass::LineArt), [0, 0, 0, 77]);
        assert_eq!(one_pixel([201, 230, 255, 5], QuantizePass::LineArt), [255, 255, 255, 5]);
        // gray with mean 100 snaps to 85
        assert_eq!(one_pixel([95, 100, 105, 255], QuantizePass::LineArt), [85, 85, 85, 255]);
        // colored pixels use 32-wide steps
        assert_eq!(one_pixel([200, 40, 100, 255], QuantizePass::LineArt), [192, 32, 96, 255]);
    }

    #[test]
    fn lineart_aggressive_pass() {
        let pass = QuantizePass::LineArtAggressive;
        assert_eq!(one_pixel([20, 30, 40, 200], pass), [0, 0, 0, 255]);
        assert_eq!(one_pixel([100, 120, 140, 100], pass), [128, 128, 128, 0]);
        assert_eq!(one_pixel([150, 150, 150, 128], pass), [255, 255, 255, 255]);
    }

    #[test]
    fn uniform_steps_and_binary_alpha() {
        let image = noise_image(64, 64, 11);
        for (pass, step) in [
            (QuantizePass::Photographic, 4),
            (QuantizePass::Graphical, 8),
            (QuantizePass::AggressiveFallback, 16),
        ] {
            let mut quantized = image.clone();
            QuantizeParams::new().apply(&mut quantized, pass);
            for pixel in quantized.as_bytes().chunks_exact(4) {
                for &c in &pixel[..3] {
                    assert!(c % step == 0 || c == 255, "{pass:?} {c}");
                }
                assert!(pixel[3] == 0 || pixel[3] == 255);
            }
        }
    }

    #[test]
    fn adaptive_keeps_edges_finer() {
        let mut image = PixelBuffer::new_zeroed(8, 1).unwrap();
        for x in 0..8 {
            let v = if x < 4 { 103 } else { 250 };
            image.set_pixel(x, 0, [v, v, v, 255]);
        }
        QuantizeParams::new().apply(&mut image, QuantizePass::Adaptive);

        // flat pixels use a step of 6, edge pixels a step of 2
        assert_eq!(image.pixel(0, 0), [102, 102, 102, 255]);
        assert_eq!(image.pixel(3, 0), [104, 104, 104, 255]);
        assert_eq!(image.pixel(4, 0), [250, 250, 250, 255]);
        assert_eq!(image.pixel(7, 0), [252, 252, 252, 255]);
    }

    #[test]
    fn escalation_only_for_lineart() {
        assert_eq!(
            QuantizePass::LineArt.escalation(),
            Some(QuantizePass::LineArtAggressive)
        );
        for pass in &ALL_PASSES[1..] {
            assert_eq!(pass.escalation(), None);
        }
    }

    #[test]
    #[cfg(feature = "threads")]
    fn single_and_multi_threaded_match() {
        let image = noise_image(129, 67, 5);
        let params = QuantizeParams::new();
        for pass in ALL_PASSES {
            let mut single = image.clone();
            let mut par = image.clone();
            params.apply(&mut single, pass);
            params.apply_par(&mut par, pass);
            assert_eq!(single, par, "{pass:?}");
        }
    }
}
