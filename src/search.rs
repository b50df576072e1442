//! Binary search over the codec quality parameter for the highest quality that fits a byte budget.
//!
//! The search first tries the maximum quality. If that does not fit, it bisects
//! `[min_quality, max_quality]` down to a precision `ε`, keeping the best fitting attempt,
//! and stops early once the bracket is narrower than a coarse tolerance and some attempt fits.
//! If no quality fits, the minimum quality encoding is returned as a best effort.
//!
//! The number of encodes is at most `ceil(log2((max_quality - min_quality) / ε)) + 2`.
//!
//! Bisection assumes the encoded size does not decrease as quality increases.
//! Real codecs only approximate this, so every probe is recorded and checked afterwards:
//! a higher quality producing a smaller output (beyond a noise floor) is reported as a
//! [`MonotonicityViolation`].
//!
//! # Examples
//! ```
//! # use pixpress::{search, search::CompressionTarget};
//! # fn main() -> Result<(), pixpress::CompressError> {
//! #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
//! let encode = |quality: f32| Ok(vec![0; (quality * 10_000.0) as usize]);
//!
//! let report = search(encode, &CompressionTarget::new(5_000))?;
//! assert!(report.met_target);
//! assert!(report.attempt.size <= 5_000);
//! assert!(report.attempt.quality > 0.45);
//! # Ok(())
//! # }
//! ```

use crate::{CompressError, Deadline, EncodeError};
use tracing::{debug, trace, warn};

/// The byte budget and the quality range to search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressionTarget {
    /// The size the search aims for.
    target_size: usize,
    /// The size at or below which a strategy counts as successful.
    acceptable_size: usize,
    /// The lowest quality to try.
    min_quality: f32,
    /// The highest quality to try.
    max_quality: f32,
    /// The search stops once the bracket is at most this wide.
    precision: f32,
}

impl CompressionTarget {
    /// The default lowest quality.
    pub const DEFAULT_MIN_QUALITY: f32 = 0.05;

    /// The default highest quality.
    pub const DEFAULT_MAX_QUALITY: f32 = 1.0;

    /// The default precision.
    pub const DEFAULT_PRECISION: f32 = 0.01;

    /// Creates a new [`CompressionTarget`] for the given size with the default quality range.
    #[must_use]
    pub const fn new(target_size: usize) -> Self {
        Self {
            target_size,
            acceptable_size: target_size,
            min_quality: Self::DEFAULT_MIN_QUALITY,
            max_quality: Self::DEFAULT_MAX_QUALITY,
            precision: Self::DEFAULT_PRECISION,
        }
    }

    /// Sets the acceptable size, which is clamped to be at least the target size.
    ///
    /// The default is the target size.
    #[must_use]
    pub fn acceptable_size(mut self, acceptable_size: usize) -> Self {
        self.acceptable_size = acceptable_size.max(self.target_size);
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
        if (0.0..=1.0).contains(&min) && (0.0..=1.0).contains(&max) && min < max {
            self.min_quality = min;
            self.max_quality = max;
        } else {
            self.min_quality = Self::DEFAULT_MIN_QUALITY;
            self.max_quality = Self::DEFAULT_MAX_QUALITY;
        }
        self
    }

    /// Sets the precision of the search.
    ///
    /// Non-positive or non-finite values fall back to the default of `0.01`.
    #[must_use]
    pub fn precision(mut self, precision: f32) -> Self {
        self.precision = if precision.is_finite() && precision > 0.0 {
            precision
        } else {
            Self::DEFAULT_PRECISION
        };
        self
    }

    /// The size the search aims for.
    #[must_use]
    pub const fn target_size(&self) -> usize {
        self.target_size
    }

    /// The size at or below which a strategy counts as successful.
    #[must_use]
    pub const fn acceptable(&self) -> usize {
        self.acceptable_size
    }

    /// The lowest quality tried.
    #[must_use]
    pub const fn min_quality(&self) -> f32 {
        self.min_quality
    }

    /// The highest quality tried.
    #[must_use]
    pub const fn max_quality(&self) -> f32 {
        self.max_quality
    }

    /// The width of the final bracket.
    #[must_use]
    pub const fn search_precision(&self) -> f32 {
        self.precision
    }

    /// The maximum number of bisection steps: `ceil(log2((max_quality - min_quality) / ε))`.
    #[must_use]
    pub fn bisection_steps(&self) -> u32 {
        let steps = ((self.max_quality - self.min_quality) / self.precision).log2().ceil();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            steps.max(0.0) as u32
        }
    }

    /// The maximum number of encodes a search over this target can make:
    /// the maximum quality, every bisection step, and the minimum quality.
    #[must_use]
    pub fn max_probes(&self) -> u32 {
        self.bisection_steps() + 2
    }
}

/// One encode made during the search.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionAttempt {
    /// The quality passed to the encoder.
    pub quality: f32,
    /// The encoded output.
    pub bytes: Vec<u8>,
    /// The length of `bytes`.
    pub size: usize,
}

impl CompressionAttempt {
    /// Creates a new [`CompressionAttempt`].
    #[must_use]
    pub fn new(quality: f32, bytes: Vec<u8>) -> Self {
        let size = bytes.len();
        Self { quality, bytes, size }
    }
}

/// A pair of probes where the higher quality produced a smaller output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonotonicityViolation {
    /// The lower of the two qualities.
    pub lower_quality: f32,
    /// The size at the lower quality.
    pub lower_size: usize,
    /// The higher of the two qualities.
    pub higher_quality: f32,
    /// The (smaller) size at the higher quality.
    pub higher_size: usize,
}

/// The outcome of a search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchReport {
    /// The chosen attempt.
    pub attempt: CompressionAttempt,
    /// Whether the chosen attempt fits the target size.
    pub met_target: bool,
    /// The number of encodes made.
    pub iterations: u32,
    /// Every `(quality, size)` probed, in the order they were made.
    pub probes: Vec<(f32, usize)>,
    /// The pairs of probes where size decreased as quality increased.
    pub violations: Vec<MonotonicityViolation>,
}

/// Options for the search that do not depend on the target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchOptions {
    /// Stop once a fitting attempt exists and the bracket is narrower than this.
    coarse_tolerance: f32,
    /// Size decreases up to this many bytes are noise.
    noise_bytes: usize,
    /// Size decreases up to this fraction of the lower quality's size are noise.
    noise_fraction: f32,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchOptions {
    /// The default coarse tolerance.
    pub const DEFAULT_COARSE_TOLERANCE: f32 = 0.04;

    /// Creates a new [`SearchOptions`] with the default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            coarse_tolerance: Self::DEFAULT_COARSE_TOLERANCE,
            noise_bytes: 64,
            noise_fraction: 0.02,
        }
    }

    /// Sets the early stopping tolerance. Set it to `0.0` to always search down to the precision.
    ///
    /// The default is `0.04`.
    #[must_use]
    pub fn coarse_tolerance(mut self, coarse_tolerance: f32) -> Self {
        self.coarse_tolerance = coarse_tolerance.max(0.0);
        self
    }

    /// Sets the noise floor of the monotonicity check: a size decrease is only
    /// reported if it is above both `bytes` and `fraction` of the larger size.
    ///
    /// The defaults are `64` bytes and `0.02`.
    #[must_use]
    pub fn noise_floor(mut self, bytes: usize, fraction: f32) -> Self {
        self.noise_bytes = bytes;
        self.noise_fraction = fraction.max(0.0);
        self
    }

    /// Searches for the highest quality whose encoding fits the target size.
    ///
    /// The deadline is checked before every encode.
    ///
    /// # Errors
    /// Returns [`CompressError::Encode`] if an encode fails and
    /// [`CompressError::DeadlineExpired`] if the deadline passes mid-search.
    pub fn run<F>(
        &self,
        mut encode: F,
        target: &CompressionTarget,
        deadline: &Deadline,
    ) -> Result<SearchReport, CompressError>
    where
        F: FnMut(f32) -> Result<Vec<u8>, EncodeError>,
    {
        let target_size = target.target_size();
        let mut probes = Vec::new();

        let attempt = {
            let mut probe = |quality: f32| -> Result<CompressionAttempt, CompressError> {
                deadline.check()?;
                let attempt = CompressionAttempt::new(quality, encode(quality)?);
                trace!(quality, size = attempt.size, "probe");
                probes.push((quality, attempt.size));
                Ok(attempt)
            };

            let top = probe(target.max_quality())?;
            if top.size <= target_size {
                top
            } else {
                let mut lo = target.min_quality();
                let mut hi = target.max_quality();
                let mut best = None;
                let mut steps = target.bisection_steps();

                // float rounding can leave the bracket a hair above ε after the last step
                while steps > 0 && hi - lo > target.search_precision() {
                    steps -= 1;
                    let mid = (lo + hi) / 2.0;
                    let attempt = probe(mid)?;
                    if attempt.size <= target_size {
                        lo = mid;
                        best = Some(attempt);
                    } else {
                        hi = mid;
                    }
                    debug!(lo, hi, "narrowed quality bracket");

                    if best.is_some() && hi - lo < self.coarse_tolerance {
                        break;
                    }
                }

                match best {
                    Some(best) => best,
                    None => probe(target.min_quality())?,
                }
            }
        };

        let violations = self.violations(&probes);
        for violation in &violations {
            warn!(?violation, "encoded size decreased as quality increased");
        }

        #[allow(clippy::cast_possible_truncation)]
        let iterations = probes.len() as u32;

        Ok(SearchReport {
            met_target: attempt.size <= target_size,
            attempt,
            iterations,
            probes,
            violations,
        })
    }

    /// Returns every pair of probes where a higher quality produced an output
    /// smaller than the lower quality's by more than the noise floor.
    #[must_use]
    pub fn violations(&self, probes: &[(f32, usize)]) -> Vec<MonotonicityViolation> {
        let mut sorted = probes.to_vec();
        sorted.sort_by(|(a, _), (b, _)| a.total_cmp(b));

        let mut violations = Vec::new();
        for (i, &(lower_quality, lower_size)) in sorted.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
            let noise = self
                .noise_bytes
                .max((lower_size as f32 * self.noise_fraction) as usize);

            for &(higher_quality, higher_size) in &sorted[(i + 1)..] {
                if higher_quality > lower_quality && lower_size.saturating_sub(higher_size) > noise {
                    violations.push(MonotonicityViolation {
                        lower_quality,
                        lower_size,
                        higher_quality,
                        higher_size,
                    });
                }
            }
        }
        violations
    }
}

/// Searches for the highest quality whose encoding fits the target size,
/// using the default [`SearchOptions`] and no deadline.
///
/// See the [module](crate::search) documentation for more information.
///
/// # Errors
/// Returns [`CompressError::Encode`] if an encode fails.
pub fn search<F>(encode: F, target: &CompressionTarget) -> Result<SearchReport, CompressError>
where
    F: FnMut(f32) -> Result<Vec<u8>, EncodeError>,
{
    SearchOptions::new().run(encode, target, &Deadline::never())
}
