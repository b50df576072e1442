use crate::{CompressError, CompressionAttempt};
use std::fmt::Display;

/// The strategy that produced a [`CompressionResult`](crate::CompressionResult).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// The source's own encoded bytes already fit the target and were returned unchanged.
    Original,
    /// Classification-driven quantization (tiled for large images) and quality search.
    Primary,
    /// Aggressive single-pass quantization, optionally downscaled, and quality search.
    Secondary,
    /// Best effort encoding at the minimum quality.
    Tertiary,
}

impl Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Strategy::Original => "original",
                Strategy::Primary => "primary",
                Strategy::Secondary => "secondary",
                Strategy::Tertiary => "tertiary",
            }
        )
    }
}

/// An encoded output produced by one strategy.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Candidate {
    /// The encoded bytes.
    pub bytes: Vec<u8>,
    /// The quality they were encoded at.
    pub quality: f32,
    /// The strategy that produced them.
    pub strategy: Strategy,
    /// The dimensions of the encoded image.
    pub dimensions: (u32, u32),
}

impl Candidate {
    /// Wraps the attempt chosen by a quality search.
    pub fn from_attempt(attempt: CompressionAttempt, strategy: Strategy, dimensions: (u32, u32)) -> Self {
        Self { bytes: attempt.bytes, quality: attempt.quality, strategy, dimensions }
    }

    /// The encoded size in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Keeps the smaller of `best` and `self` in `best`. Ties keep the earlier candidate.
    pub fn offer_to(self, best: &mut Option<Candidate>) {
        match best {
            Some(current) if current.size() <= self.size() => {}
            _ => *best = Some(self),
        }
    }
}

/// The states of the fallback state machine.
///
/// ```text
/// SizeCheck ──▶ Primary ──▶ Secondary ──▶ Tertiary ──▶ Emit
///     │            │            │             │
///     └────────────┴────────────┴─────────────┴──────▶ Emit | Failed
/// ```
///
/// `Emit` and `Failed` are terminal.
#[derive(Debug)]
pub(crate) enum State {
    /// Return the source unchanged if it already fits.
    SizeCheck,
    /// Run the primary strategy.
    Primary,
    /// Run the secondary strategy.
    Secondary,
    /// Run the tertiary strategy.
    Tertiary,
    /// Return this candidate.
    Emit(Candidate),
    /// Return this error.
    Failed(CompressError),
}
