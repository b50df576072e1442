use super::{
    strategy::{Candidate, State},
    CompressOptions, ProgressFn, Strategy,
};
use crate::{
    BufferError, ClassificationResult, CompressError, CompressionTarget, Deadline, Encoder,
    MonotonicityViolation, PixelBuffer, PixelSource, QuantizeParams, QuantizePass,
    QuantizeProcessor, Scheduler, SearchReport, TileProcessor, TileStats,
};
use std::{cell::Cell, sync::Arc};
use tracing::{debug, info, info_span, warn};

/// The output of [`compress`].
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionResult {
    /// The encoded image.
    pub final_bytes: Vec<u8>,
    /// The quality `final_bytes` was encoded at (`1.0` for the unchanged original).
    pub final_quality: f32,
    /// Whether `final_bytes` fits the target size.
    pub met_target: bool,
    /// The strategy that produced `final_bytes`.
    pub strategy: Strategy,
    /// The dimensions of the encoded image.
    pub dimensions: (u32, u32),
    /// The classification of the source, if the primary strategy got that far.
    pub classification: Option<ClassificationResult>,
    /// How the tiles were processed, if the source was tiled.
    pub tile_stats: Option<TileStats>,
    /// The total number of encodes made.
    pub iterations: u32,
    /// Every monotonicity violation seen by the quality searches.
    pub violations: Vec<MonotonicityViolation>,
}

/// Reports progress to the caller's callback, dropping values that would go backwards.
struct Progress {
    /// The callback.
    callback: Option<ProgressFn>,
    /// The last reported value.
    last: Cell<Option<u8>>,
}

impl Progress {
    /// Reports `percent` if it is larger than the last reported value.
    fn report(&self, percent: u8) {
        let percent = percent.min(100);
        if let Some(callback) = &self.callback {
            if self.last.get().map_or(true, |last| percent > last) {
                self.last.set(Some(percent));
                callback(percent);
            }
        }
    }

    /// Reports the progress of step `done` of `total` inside the range `from..=to`.
    fn report_between(&self, from: u8, to: u8, done: usize, total: usize) {
        let span = usize::from(to.saturating_sub(from));
        #[allow(clippy::cast_possible_truncation)]
        let offset = (span * done.min(total) / total.max(1)) as u8;
        self.report(from + offset);
    }
}

/// The state shared by the strategies of one compression.
struct Run<'a, E: ?Sized> {
    /// The caller's options.
    options: &'a CompressOptions,
    /// The codec.
    encoder: &'a E,
    /// The scheduler for tiled work.
    scheduler: &'a Scheduler,
    /// The byte budget.
    target: CompressionTarget,
    /// The decoded source. Never modified.
    pixels: PixelBuffer,
    /// The overall deadline.
    deadline: Deadline,
    /// The progress reporter.
    progress: Progress,
    /// The classification from the primary strategy.
    classification: Option<ClassificationResult>,
    /// The tile stats from the primary strategy.
    tile_stats: Option<TileStats>,
    /// Encodes made so far.
    iterations: u32,
    /// Monotonicity violations seen so far.
    violations: Vec<MonotonicityViolation>,
    /// The secondary strategy's quantized pixels, reused by the tertiary strategy.
    fallback_pixels: Option<PixelBuffer>,
    /// The smallest candidate that missed the acceptable size.
    best: Option<Candidate>,
    /// The error of the last strategy that failed.
    last_error: Option<CompressError>,
}

/// Compresses the source to fit the target size in `options`, as well as possible.
///
/// The source is decoded once and never modified. Strategies run in order until one
/// produces output at or below the acceptable size:
/// 1. If the source's original encoded bytes already fit, they are returned unchanged.
/// 2. Primary: classify, quantize with the pass for the content kind (tiled on the
///    scheduler's worker pool for large images), and search the quality.
///    Line art that still does not fit is quantized again with the aggressive line art pass.
/// 3. Secondary: quantize with the aggressive fallback pass, without tiling and (unless
///    dimensions are preserved) after downscaling, and search the quality.
/// 4. Tertiary: encode at the minimum quality, and with the codec's progressive variant if
///    it has one.
///
/// If no strategy reaches the acceptable size, the smallest output of any strategy is
/// returned with [`CompressionResult::met_target`] set to `false`.
///
/// The primary and secondary strategies are abandoned once the overall deadline passes.
/// The tertiary strategy always runs to completion.
///
/// # Errors
/// Returns [`CompressError::InvalidInput`] (before any other work) if the decoded source is
/// larger than the configured maximum, a decode error if the source cannot be decoded,
/// the codec's error if it is unrecoverable, or [`CompressError::Exhausted`] if every
/// strategy failed to produce any output.
pub fn compress<S, E>(
    source: &S,
    options: &CompressOptions,
    encoder: &E,
    scheduler: &Scheduler,
) -> Result<CompressionResult, CompressError>
where
    S: PixelSource + ?Sized,
    E: Encoder + ?Sized,
{
    let target = *options.target();
    let span = info_span!("compress", target = target.target_size(), format = ?encoder.format());
    let _guard = span.enter();

    let progress = Progress { callback: options.on_progress.clone(), last: Cell::new(None) };
    progress.report(0);

    if let Some(len) = source.decoded_len() {
        check_input_len(len, options.max_input_bytes)?;
    }
    let pixels = source.decode()?;
    check_input_len(pixels.len(), options.max_input_bytes)?;
    progress.report(5);

    let budget = options
        .deadline
        .unwrap_or_else(|| options.fallback.deadline_for(pixels.num_pixels()));
    debug!(width = pixels.width(), height = pixels.height(), ?budget, "decoded source");

    let mut run = Run {
        options,
        encoder,
        scheduler,
        target,
        pixels,
        deadline: Deadline::after(budget),
        progress,
        classification: None,
        tile_stats: None,
        iterations: 0,
        violations: Vec::new(),
        fallback_pixels: None,
        best: None,
        last_error: None,
    };

    let mut state = State::SizeCheck;
    loop {
        state = match state {
            State::SizeCheck => run.size_check(source.original()),
            State::Primary => {
                let deadline = run.deadline.share(options.fallback.primary_fraction());
                let outcome = run.primary(&deadline);
                run.advance(Strategy::Primary, outcome, State::Secondary)
            }
            State::Secondary => {
                let outcome = run.secondary();
                run.advance(Strategy::Secondary, outcome, State::Tertiary)
            }
            State::Tertiary => run.tertiary(),
            State::Emit(candidate) => {
                run.progress.report(100);
                return Ok(run.finish(candidate));
            }
            State::Failed(error) => {
                warn!(%error, "compression failed");
                return Err(error);
            }
        };
    }
}

/// Rejects decoded inputs above the maximum size.
fn check_input_len(len: usize, max: usize) -> Result<(), CompressError> {
    if len > max {
        Err(BufferError::AboveMaxLen { max, actual: len }.into())
    } else {
        Ok(())
    }
}

/// Applies a quantization pass, in parallel if possible.
fn apply(params: &QuantizeParams, buffer: &mut PixelBuffer, pass: QuantizePass) {
    #[cfg(feature = "threads")]
    params.apply_par(buffer, pass);
    #[cfg(not(feature = "threads"))]
    params.apply(buffer, pass);
}

impl<E: Encoder + ?Sized> Run<'_, E> {
    /// Emits the original bytes if they already fit.
    fn size_check(&mut self, original: Option<&[u8]>) -> State {
        match original {
            Some(bytes) if bytes.len() <= self.target.target_size() => {
                info!(size = bytes.len(), "source already fits the target");
                State::Emit(Candidate {
                    bytes: bytes.to_vec(),
                    quality: 1.0,
                    strategy: Strategy::Original,
                    dimensions: self.pixels.dimensions(),
                })
            }
            _ => State::Primary,
        }
    }

    /// Moves to `Emit` if the strategy's output is acceptable, to `Failed` on an
    /// unrecoverable error, and to `next` otherwise.
    fn advance(
        &mut self,
        strategy: Strategy,
        outcome: Result<Candidate, CompressError>,
        next: State,
    ) -> State {
        match outcome {
            Ok(candidate) if candidate.size() <= self.target.acceptable() => {
                info!(%strategy, size = candidate.size(), quality = candidate.quality, "strategy succeeded");
                State::Emit(candidate)
            }
            Ok(candidate) => {
                info!(%strategy, size = candidate.size(), "strategy missed the target, falling back");
                candidate.offer_to(&mut self.best);
                next
            }
            Err(error) if error.is_fatal() => State::Failed(error),
            Err(error) => {
                warn!(%strategy, %error, "strategy failed, falling back");
                self.last_error = Some(error);
                next
            }
        }
    }

    /// Classifies, quantizes (tiled for large images), and searches the quality.
    fn primary(&mut self, deadline: &Deadline) -> Result<Candidate, CompressError> {
        let options = self.options;
        let classification = options.classify.classify(&self.pixels, options.sample_stride);
        self.classification = Some(classification);
        debug!(
            kind = %classification.kind,
            color_ratio = classification.color_ratio,
            edge_ratio = classification.edge_ratio,
            "classified source"
        );
        self.progress.report(10);
        deadline.check()?;

        let mut pass = QuantizePass::from(classification.kind);
        let (width, height) = self.pixels.dimensions();
        let mut working = if self.scheduler.tile_config().needs_tiling(width, height) {
            let processor: Arc<dyn TileProcessor> =
                Arc::new(QuantizeProcessor::new(options.quantize, pass));
            let progress = &self.progress;
            let (output, stats) = self.scheduler.process_tiles(
                &self.pixels,
                &processor,
                deadline,
                |done, total| progress.report_between(10, 50, done, total),
            )?;
            self.tile_stats = Some(stats);
            output
        } else {
            let mut working = self.pixels.clone();
            apply(&options.quantize, &mut working, pass);
            working
        };
        self.progress.report(50);

        let mut report = self.search(&working, deadline, 50, 90)?;
        if report.attempt.size > self.target.acceptable() {
            if let Some(next) = pass.escalation() {
                debug!(from = ?pass, to = ?next, "escalating quantization");
                apply(&options.quantize, &mut working, next);
                pass = next;
                report = self.search(&working, deadline, 50, 90)?;
            }
        }
        debug!(?pass, quality = report.attempt.quality, "primary search done");

        Ok(Candidate::from_attempt(report.attempt, Strategy::Primary, working.dimensions()))
    }

    /// Quantizes aggressively without tiling, optionally downscales, and searches the quality.
    fn secondary(&mut self) -> Result<Candidate, CompressError> {
        let deadline = self.deadline;
        deadline.check()?;

        let mut working = self.secondary_source();
        apply(&self.options.quantize, &mut working, QuantizePass::AggressiveFallback);
        self.progress.report(90);

        let report = self.search(&working, &deadline, 90, 95);
        let dimensions = working.dimensions();
        self.fallback_pixels = Some(working);
        Ok(Candidate::from_attempt(report?.attempt, Strategy::Secondary, dimensions))
    }

    /// The source, downscaled for the secondary strategy unless dimensions are preserved.
    #[cfg(feature = "image")]
    fn secondary_source(&self) -> PixelBuffer {
        if self.options.preserve_dimensions {
            self.pixels.clone()
        } else {
            let factor = self.options.fallback.downscale_factor(self.pixels.num_pixels());
            debug!(factor, "downscaling source");
            self.pixels.downscaled(factor)
        }
    }

    /// The source, unchanged since downscaling requires the `image` feature.
    #[cfg(not(feature = "image"))]
    fn secondary_source(&self) -> PixelBuffer {
        self.pixels.clone()
    }

    /// Encodes at the minimum quality (and progressively, if offered) and always emits something,
    /// unless no strategy produced any output.
    fn tertiary(&mut self) -> State {
        self.progress.report(95);
        let pixels = match self.fallback_pixels.take() {
            Some(pixels) => pixels,
            None => {
                let mut pixels = self.pixels.clone();
                apply(&self.options.quantize, &mut pixels, QuantizePass::AggressiveFallback);
                pixels
            }
        };

        let quality = self.target.min_quality();
        let dimensions = pixels.dimensions();
        let candidate = |bytes| Candidate { bytes, quality, strategy: Strategy::Tertiary, dimensions };

        let mut error = None;
        let mut outputs = vec![self.encoder.encode(&pixels, quality)];
        if let Some(progressive) = self.encoder.encode_progressive(&pixels, quality) {
            outputs.push(progressive);
        }
        for output in outputs {
            self.iterations += 1;
            match output {
                Ok(bytes) => candidate(bytes).offer_to(&mut self.best),
                Err(e) => {
                    warn!(error = %e, "minimum quality encode failed");
                    error = Some(CompressError::from(e));
                }
            }
        }

        match (self.best.take(), error) {
            (Some(best), _) => {
                info!(strategy = %best.strategy, size = best.size(), "emitting best effort result");
                State::Emit(best)
            }
            (None, Some(error)) if error.is_fatal() => State::Failed(error),
            (None, error) => State::Failed(CompressError::Exhausted {
                source: Box::new(
                    error
                        .or_else(|| self.last_error.take())
                        .unwrap_or(CompressError::WorkerUnavailable),
                ),
            }),
        }
    }

    /// Runs the quality search on `pixels`, reporting progress inside `from..=to`.
    fn search(
        &mut self,
        pixels: &PixelBuffer,
        deadline: &Deadline,
        from: u8,
        to: u8,
    ) -> Result<SearchReport, CompressError> {
        let max_probes = self.target.max_probes() as usize;
        let encoder = self.encoder;
        let progress = &self.progress;
        let mut probes = 0;

        let report = self.options.search.run(
            |quality| {
                let output = encoder.encode(pixels, quality);
                probes += 1;
                progress.report_between(from, to, probes, max_probes);
                output
            },
            &self.target,
            deadline,
        );

        self.iterations += u32::try_from(probes).unwrap_or(u32::MAX);
        let report = report?;
        self.violations.extend(report.violations.iter().copied());
        Ok(report)
    }

    /// Builds the result from the emitted candidate.
    fn finish(self, candidate: Candidate) -> CompressionResult {
        CompressionResult {
            met_target: candidate.size() <= self.target.target_size(),
            final_quality: candidate.quality,
            strategy: candidate.strategy,
            dimensions: candidate.dimensions,
            final_bytes: candidate.bytes,
            classification: self.classification,
            tile_stats: self.tile_stats,
            iterations: self.iterations,
            violations: self.violations,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::tests::*;
    use crate::{ContentKind, EncodeError, FallbackConfig, ImageFormat, SchedulerConfig, TileConfig};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn scheduler() -> Scheduler {
        Scheduler::init(SchedulerConfig::default())
    }

    /// A source with original encoded bytes.
    struct WithOriginal {
        pixels: PixelBuffer,
        original: Vec<u8>,
    }

    impl PixelSource for WithOriginal {
        fn decode(&self) -> Result<PixelBuffer, CompressError> {
            Ok(self.pixels.clone())
        }

        fn original(&self) -> Option<&[u8]> {
            Some(&self.original)
        }
    }

    /// A source that only knows its size after decoding.
    struct Opaque(PixelBuffer);

    impl PixelSource for Opaque {
        fn decode(&self) -> Result<PixelBuffer, CompressError> {
            Ok(self.0.clone())
        }
    }

    /// Fails the first `failures` encodes, then behaves like a [`MockEncoder`].
    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
        inner: MockEncoder,
    }

    impl Encoder for Flaky {
        fn format(&self) -> ImageFormat {
            ImageFormat::Jpeg
        }

        fn encode(&self, pixels: &PixelBuffer, quality: f32) -> Result<Vec<u8>, EncodeError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                Err(EncodeError::Rejected("flaky".into()))
            } else {
                self.inner.encode(pixels, quality)
            }
        }
    }

    #[test]
    fn fits_at_some_quality() {
        let encoder = MockEncoder::new(100, 10_000.0);
        let options = CompressOptions::new(5000);
        let result = compress(&noise_image(32, 32, 1), &options, &encoder, &scheduler()).unwrap();

        assert!(result.met_target);
        assert_eq!(result.strategy, Strategy::Primary);
        assert!(result.final_bytes.len() <= 5000);
        assert!(result.final_quality <= 0.49 && result.final_quality >= 0.44);
        assert!(result.iterations <= options.target().max_probes());
        assert_eq!(result.iterations as usize, encoder.calls());
        assert!(result.classification.is_some());
        assert!(result.tile_stats.is_none());
    }

    #[test]
    fn unreachable_target_emits_min_quality_encoding() {
        let encoder = MockEncoder::new(10_000, 1000.0);
        let options = CompressOptions::new(100);
        let result = compress(&noise_image(32, 32, 1), &options, &encoder, &scheduler()).unwrap();

        assert!(!result.met_target);
        assert!((result.final_quality - options.target().min_quality()).abs() < f32::EPSILON);
        assert_eq!(result.final_bytes.len(), encoder.size_at(options.target().min_quality()));
    }

    #[test]
    fn oversized_input_is_rejected_before_any_work() {
        let encoder = MockEncoder::new(0, 1.0);
        let options = CompressOptions::new(10).max_input_bytes(100);
        let expected = Err(CompressError::InvalidInput(BufferError::AboveMaxLen { max: 100, actual: 400 }));

        let image = noise_image(10, 10, 1);
        assert_eq!(compress(&image, &options, &encoder, &scheduler()), expected);
        assert_eq!(compress(&Opaque(image), &options, &encoder, &scheduler()), expected);
        assert_eq!(encoder.calls(), 0);
    }

    #[test]
    fn fitting_original_is_returned_unchanged() {
        let encoder = MockEncoder::new(0, 1.0);
        let source = WithOriginal { pixels: noise_image(8, 8, 1), original: vec![1, 2, 3] };
        let result = compress(&source, &CompressOptions::new(10), &encoder, &scheduler()).unwrap();

        assert_eq!(result.strategy, Strategy::Original);
        assert_eq!(result.final_bytes, [1, 2, 3]);
        assert!((result.final_quality - 1.0).abs() < f32::EPSILON);
        assert!(result.met_target);
        assert_eq!(encoder.calls(), 0);
    }

    #[test]
    fn unsupported_format_fails_immediately() {
        let encoder = MockEncoder::failing(EncodeError::Unsupported("format".into()));
        let result = compress(&noise_image(8, 8, 1), &CompressOptions::new(10), &encoder, &scheduler());
        assert_eq!(result, Err(CompressError::Encode(EncodeError::Unsupported("format".into()))));
        assert_eq!(encoder.calls(), 1);
    }

    #[test]
    fn every_strategy_failing_is_exhausted() {
        let encoder = MockEncoder::failing(EncodeError::Codec("broken".into()));
        let error = compress(&noise_image(8, 8, 1), &CompressOptions::new(10), &encoder, &scheduler())
            .unwrap_err();
        assert_eq!(
            error,
            CompressError::Exhausted { source: Box::new(EncodeError::Codec("broken".into()).into()) }
        );
        assert!(!error.is_fatal());
    }

    #[test]
    fn primary_failure_falls_back_to_secondary() {
        for preserve_dimensions in [true, false] {
            let encoder = Flaky { failures: 1, calls: AtomicUsize::new(0), inner: MockEncoder::new(100, 10_000.0) };
            let options = CompressOptions::new(5000).preserve_dimensions(preserve_dimensions);
            let result = compress(&noise_image(100, 100, 2), &options, &encoder, &scheduler()).unwrap();

            assert_eq!(result.strategy, Strategy::Secondary);
            assert!(result.met_target);
            if preserve_dimensions || cfg!(not(feature = "image")) {
                assert_eq!(result.dimensions, (100, 100));
            } else {
                assert_eq!(result.dimensions, (90, 90));
            }
        }
    }

    #[test]
    fn lineart_escalates_once() {
        let options = CompressOptions::new(100).preserve_dimensions(true);
        let probes = options.target().max_probes();

        let lineart = checkerboard(64, 64, 3, [0, 0, 0, 255], [255, 255, 255, 255]);
        let encoder = MockEncoder::new(10_000, 1000.0);
        let result = compress(&lineart, &options, &encoder, &scheduler()).unwrap();
        assert_eq!(result.classification.map(|c| c.kind), Some(ContentKind::LineArt));
        // base search, escalated search, secondary search, and one tertiary encode
        assert_eq!(result.iterations, 3 * probes + 1);

        let graphic = checkerboard(64, 64, 8, [200, 30, 30, 255], [30, 30, 200, 255]);
        let encoder = MockEncoder::new(10_000, 1000.0);
        let result = compress(&graphic, &options, &encoder, &scheduler()).unwrap();
        assert_eq!(result.classification.map(|c| c.kind), Some(ContentKind::Graphical));
        assert_eq!(result.iterations, 2 * probes + 1);
    }

    #[test]
    fn expired_deadline_still_emits() {
        let encoder = MockEncoder::new(100, 10_000.0);
        let options = CompressOptions::new(5000).deadline(Duration::ZERO);
        let result = compress(&noise_image(16, 16, 1), &options, &encoder, &scheduler()).unwrap();

        assert_eq!(result.strategy, Strategy::Tertiary);
        assert_eq!(result.final_bytes.len(), encoder.size_at(options.target().min_quality()));
        assert!(result.met_target);
    }

    /// Sleeps before every encode.
    struct Slow {
        delay: Duration,
        inner: MockEncoder,
    }

    impl Encoder for Slow {
        fn format(&self) -> ImageFormat {
            ImageFormat::Jpeg
        }

        fn encode(&self, pixels: &PixelBuffer, quality: f32) -> Result<Vec<u8>, EncodeError> {
            std::thread::sleep(self.delay);
            self.inner.encode(pixels, quality)
        }
    }

    #[test]
    fn slow_encoder_overruns_deadline_by_at_most_two_encodes() {
        let delay = Duration::from_millis(30);
        let deadline = Duration::from_millis(100);
        // classification and quantization of a tiny image
        let slack = Duration::from_millis(50);

        let encoder = Slow { delay, inner: MockEncoder::new(10_000, 1000.0) };
        let options = CompressOptions::new(100).deadline(deadline);
        let start = Instant::now();
        let result = compress(&noise_image(16, 16, 1), &options, &encoder, &scheduler()).unwrap();
        let elapsed = start.elapsed();

        assert!(!result.met_target);
        assert!(elapsed <= deadline + 2 * delay + slack, "took {elapsed:?}");
        assert!(encoder.inner.calls() >= 1);
    }

    #[test]
    fn unbounded_deadline_with_full_primary_share() {
        let encoder = MockEncoder::new(100, 10_000.0);
        let options = CompressOptions::new(5000)
            .deadline(Duration::MAX)
            .fallback_config(FallbackConfig::new().primary_share(1.0));
        let result = compress(&noise_image(16, 16, 1), &options, &encoder, &scheduler()).unwrap();

        assert_eq!(result.strategy, Strategy::Primary);
        assert!(result.met_target);
    }

    #[test]
    fn progress_is_monotonic_and_complete() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let options = CompressOptions::new(100).on_progress(move |p| sink.lock().push(p));

        let encoder = MockEncoder::new(10_000, 1000.0);
        compress(&noise_image(16, 16, 1), &options, &encoder, &scheduler()).unwrap();

        let seen = seen.lock();
        assert_eq!(seen.first(), Some(&0));
        assert_eq!(seen.last(), Some(&100));
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn tiles_fall_back_locally_without_workers() {
        let scheduler = Scheduler::init(
            SchedulerConfig::new().with_tiles(TileConfig::new().tiling_threshold(0).tile_edge(Some(16))),
        );
        scheduler.shutdown();

        let encoder = MockEncoder::new(100, 10_000.0);
        let result = compress(&photo_image(64, 64, 3), &CompressOptions::new(5000), &encoder, &scheduler).unwrap();

        let stats = result.tile_stats.unwrap();
        assert_eq!(stats.tiles, 16);
        assert_eq!(stats.local_fallbacks, 16);
        assert!(result.met_target);
    }

    #[test]
    #[cfg(feature = "image")]
    fn solid_black_compresses_to_a_few_hundred_bytes() {
        let image = solid_image(50, 50, [0, 0, 0, 255]);
        let result = compress(&image, &CompressOptions::new(2000), &crate::JpegCodec, &scheduler()).unwrap();

        let classification = result.classification.unwrap();
        assert!(classification.black_white_ratio > 0.99);
        assert!(result.met_target);
        assert!((result.final_quality - 1.0).abs() < f32::EPSILON);
        assert!(result.final_bytes.len() < 1000);
    }

    #[test]
    #[cfg(feature = "image")]
    fn tiled_and_whole_image_quantization_agree() {
        let tiled = Scheduler::init(
            SchedulerConfig::new().with_tiles(TileConfig::new().tiling_threshold(0).tile_edge(Some(24))),
        );
        let options = CompressOptions::new(usize::MAX);
        let image = checkerboard(96, 80, 8, [250, 10, 10, 255], [10, 10, 250, 255]);

        for image in [image, photo_image(96, 80, 6)] {
            let a = compress(&image, &options, &crate::PngCodec, &tiled).unwrap();
            let b = compress(&image, &options, &crate::PngCodec, &scheduler()).unwrap();
            assert!(a.tile_stats.is_some());
            assert!(b.tile_stats.is_none());
            assert_eq!(a.final_bytes, b.final_bytes);
        }
    }
}
