//! The owned scheduler that runs tiled work on a [`WorkerPool`].
//!
//! A [`Scheduler`] bundles the worker pool, a bounded [`BufferPool`] of tile buffers,
//! and the [`TileConfig`]. It is created with [`Scheduler::init`], passed by reference
//! into each compression, and torn down with [`Scheduler::shutdown`].
//!
//! Tiles are dispatched in batches. Each tile is waited on with a per-tile timeout.
//! A tile whose worker is unavailable, times out, or fails is not retried on another
//! worker: it is re-extracted from the (untouched) source and processed locally on the
//! calling thread. Every tile is written into its own disjoint region of a fresh output
//! buffer, so the result does not depend on completion order.

use crate::{
    CompressError, Deadline, PixelBuffer, PoolConfig, Rect, TaskError, Tile, TileConfig,
    TileProcessor, TileStats, WorkerPool,
};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// A bounded stack of byte buffers reused for tile pixel data.
pub struct BufferPool {
    /// The idle buffers.
    buffers: Mutex<Vec<Vec<u8>>>,
    /// The maximum number of idle buffers kept.
    capacity: usize,
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("idle", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl BufferPool {
    /// Creates a new, empty [`BufferPool`] that keeps at most `capacity` idle buffers.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { buffers: Mutex::new(Vec::with_capacity(capacity)), capacity }
    }

    /// Takes an idle buffer, or a new empty one if there are none.
    #[must_use]
    pub fn take(&self) -> Vec<u8> {
        self.buffers.lock().pop().unwrap_or_default()
    }

    /// Returns a buffer to the pool. It is dropped if the pool is full.
    pub fn give(&self, mut buffer: Vec<u8>) {
        let mut buffers = self.buffers.lock();
        if buffers.len() < self.capacity {
            buffer.clear();
            buffers.push(buffer);
        }
    }

    /// The number of idle buffers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers.lock().len()
    }

    /// Whether there are no idle buffers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every idle buffer.
    pub fn clear(&self) {
        self.buffers.lock().clear();
    }
}

/// Configuration for a [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerConfig {
    /// The worker pool configuration.
    pub pool: PoolConfig,
    /// The tiling configuration.
    pub tiles: TileConfig,
    /// The maximum number of idle tile buffers kept. `None` means twice the batch size.
    pub buffer_capacity: Option<usize>,
}

impl SchedulerConfig {
    /// Creates a new [`SchedulerConfig`] with the default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the worker pool configuration.
    #[must_use]
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Sets the tiling configuration.
    #[must_use]
    pub fn with_tiles(mut self, tiles: TileConfig) -> Self {
        self.tiles = tiles;
        self
    }

    /// Sets the maximum number of idle tile buffers kept.
    #[must_use]
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = Some(capacity);
        self
    }
}

/// Owns the worker pool and buffer pool shared by every compression that uses it.
#[derive(Debug)]
pub struct Scheduler {
    /// The tiling configuration.
    tiles: TileConfig,
    /// The worker pool.
    pool: WorkerPool,
    /// Recycled tile buffers.
    buffers: BufferPool,
}

impl Scheduler {
    /// Creates a new [`Scheduler`]. Worker threads are spawned lazily on first use.
    #[must_use]
    pub fn init(config: SchedulerConfig) -> Self {
        let capacity = config
            .buffer_capacity
            .unwrap_or(config.tiles.batch_limit() * 2);
        debug!(max_workers = config.pool.max_workers(), capacity, "scheduler initialized");
        Self {
            tiles: config.tiles,
            pool: WorkerPool::new(config.pool),
            buffers: BufferPool::new(capacity),
        }
    }

    /// Joins every worker and drops every pooled buffer.
    ///
    /// Later calls to [`Scheduler::process_tiles`] still succeed, processing every tile locally.
    pub fn shutdown(&self) {
        self.pool.shutdown();
        self.buffers.clear();
    }

    /// The tiling configuration.
    #[must_use]
    pub const fn tile_config(&self) -> &TileConfig {
        &self.tiles
    }

    /// The worker pool.
    #[must_use]
    pub const fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// The buffer pool.
    #[must_use]
    pub const fn buffers(&self) -> &BufferPool {
        &self.buffers
    }

    /// Applies `processor` to every tile of `source`, returning the reassembled output.
    ///
    /// `on_batch` is called with the number of finished tiles and the total after every batch.
    ///
    /// # Errors
    /// Returns [`CompressError::DeadlineExpired`] if `deadline` passes before every tile is done.
    /// Returns the worker error of a tile if processing it locally also failed.
    pub fn process_tiles(
        &self,
        source: &PixelBuffer,
        processor: &Arc<dyn TileProcessor>,
        deadline: &Deadline,
        mut on_batch: impl FnMut(usize, usize),
    ) -> Result<(PixelBuffer, TileStats), CompressError> {
        let (width, height) = source.dimensions();
        let plan = self.tiles.plan(width, height);
        let timeout = self.tiles.timeout_per_tile();
        let overlap = plan.overlap().max(processor.margin());
        let mut output = PixelBuffer::new_zeroed(width, height)?;

        let mut stats = TileStats {
            regions: plan.regions().len(),
            tiles: plan.len(),
            ..TileStats::default()
        };
        debug!(tiles = stats.tiles, regions = stats.regions, edge = plan.edge(), "processing tiles");

        let mut done = 0;
        for batch in plan.batches() {
            deadline.check()?;
            stats.batches += 1;

            let mut pending = Vec::with_capacity(batch.len());
            for &core in batch {
                let mut tile = Tile::extract(source, core, overlap, self.buffers.take())?;
                let processor = Arc::clone(processor);
                let handle = self.pool.submit(
                    move |_| {
                        processor.process(tile.pixels_mut());
                        Ok(tile)
                    },
                    &Deadline::after(deadline.clamp(timeout)),
                );
                pending.push((core, handle));
            }

            for (core, handle) in pending {
                deadline.check()?;
                let tile = match handle.and_then(|handle| handle.wait(deadline.clamp(timeout))) {
                    Ok(tile) => {
                        stats.remote += 1;
                        tile
                    }
                    Err(error) => {
                        warn!(?core, %error, "processing tile locally");
                        stats.local_fallbacks += 1;
                        self.process_locally(source, core, overlap, &**processor, error)?
                    }
                };
                tile.write_into(&mut output);
                self.buffers.give(tile.into_storage());
                done += 1;
            }

            on_batch(done, stats.tiles);
        }

        Ok((output, stats))
    }

    /// Re-extracts a tile from the source and processes it on the calling thread.
    fn process_locally(
        &self,
        source: &PixelBuffer,
        core: Rect,
        overlap: u32,
        processor: &dyn TileProcessor,
        cause: TaskError,
    ) -> Result<Tile, CompressError> {
        let mut tile = Tile::extract(source, core, overlap, self.buffers.take())?;
        match panic::catch_unwind(AssertUnwindSafe(|| processor.process(tile.pixels_mut()))) {
            Ok(()) => Ok(tile),
            Err(_) => Err(cause.into()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::tests::*;
    use crate::{QuantizeParams, QuantizePass, QuantizeProcessor};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    /// Stalls on its first call only, then quantizes.
    struct StallOnce {
        stalled: AtomicBool,
        stall: Duration,
        inner: QuantizeProcessor,
    }

    impl TileProcessor for StallOnce {
        fn process(&self, pixels: &mut PixelBuffer) {
            if !self.stalled.swap(true, Ordering::SeqCst) {
                thread::sleep(self.stall);
            }
            self.inner.process(pixels);
        }
    }

    fn scheduler(edge: u32, timeout: Duration) -> Scheduler {
        Scheduler::init(
            SchedulerConfig::new()
                .with_pool(PoolConfig::new().with_max_workers(2))
                .with_tiles(TileConfig::new().tile_edge(Some(edge)).tile_timeout(timeout)),
        )
    }

    #[test]
    fn identity_reassembles_source() {
        let source = noise_image(100, 70, 5);
        let scheduler = scheduler(16, Duration::from_secs(10));
        let identity: Arc<dyn TileProcessor> = Arc::new(|_: &mut PixelBuffer| {});

        let mut batches = 0;
        let (output, stats) = scheduler
            .process_tiles(&source, &identity, &Deadline::never(), |_, _| batches += 1)
            .unwrap();

        assert_eq!(output, source);
        assert_eq!(stats.tiles, 7 * 5);
        assert_eq!(stats.remote + stats.local_fallbacks, stats.tiles);
        assert_eq!(stats.batches, batches);
        scheduler.shutdown();
    }

    #[test]
    fn timed_out_tile_is_processed_locally() {
        let source = noise_image(64, 64, 11);
        let quantize = QuantizeProcessor::new(QuantizeParams::new(), QuantizePass::Graphical);
        let mut expected = source.clone();
        quantize.process(&mut expected);

        let scheduler = scheduler(16, Duration::from_millis(50));
        let processor: Arc<dyn TileProcessor> = Arc::new(StallOnce {
            stalled: AtomicBool::new(false),
            stall: Duration::from_millis(400),
            inner: quantize,
        });

        let (output, stats) = scheduler
            .process_tiles(&source, &processor, &Deadline::never(), |_, _| {})
            .unwrap();

        assert_eq!(stats.tiles, 16);
        assert!(stats.local_fallbacks >= 1);
        assert_eq!(stats.remote + stats.local_fallbacks, 16);
        assert_eq!(output, expected);
    }

    #[test]
    fn failed_tile_is_processed_locally() {
        let source = noise_image(32, 32, 2);
        let calls = AtomicUsize::new(0);
        let processor: Arc<dyn TileProcessor> = Arc::new(move |pixels: &mut PixelBuffer| {
            assert!(calls.fetch_add(1, Ordering::SeqCst) != 0, "first tile fails");
            QuantizeParams::new().apply(pixels, QuantizePass::AggressiveFallback);
        });
        let mut expected = source.clone();
        QuantizeParams::new().apply(&mut expected, QuantizePass::AggressiveFallback);

        let scheduler = scheduler(16, Duration::from_secs(10));
        let (output, stats) = scheduler
            .process_tiles(&source, &processor, &Deadline::never(), |_, _| {})
            .unwrap();
        assert_eq!(stats.local_fallbacks, 1);
        assert_eq!(output, expected);
    }

    #[test]
    fn unrecoverable_tile_is_an_error() {
        let source = noise_image(32, 32, 2);
        let processor: Arc<dyn TileProcessor> =
            Arc::new(|_: &mut PixelBuffer| panic!("always fails"));
        let scheduler = scheduler(16, Duration::from_secs(10));
        let result = scheduler.process_tiles(&source, &processor, &Deadline::never(), |_, _| {});
        assert_eq!(result.err(), Some(CompressError::WorkerFailed("always fails".to_owned())));
    }

    #[test]
    fn expired_deadline() {
        let source = noise_image(32, 32, 2);
        let identity: Arc<dyn TileProcessor> = Arc::new(|_: &mut PixelBuffer| {});
        let scheduler = scheduler(16, Duration::from_secs(10));
        let result = scheduler.process_tiles(
            &source,
            &identity,
            &Deadline::after(Duration::ZERO),
            |_, _| {},
        );
        assert!(matches!(result, Err(CompressError::DeadlineExpired(_))));
    }

    #[test]
    fn shut_down_scheduler_processes_locally() {
        let source = noise_image(48, 48, 4);
        let identity: Arc<dyn TileProcessor> = Arc::new(|_: &mut PixelBuffer| {});
        let scheduler = scheduler(16, Duration::from_secs(10));
        scheduler.shutdown();

        let (output, stats) = scheduler
            .process_tiles(&source, &identity, &Deadline::never(), |_, _| {})
            .unwrap();
        assert_eq!(output, source);
        assert_eq!(stats.local_fallbacks, 9);
    }

    #[test]
    fn buffer_pool_is_bounded() {
        let buffers = BufferPool::new(2);
        assert!(buffers.take().is_empty());
        for _ in 0..3 {
            buffers.give(Vec::with_capacity(64));
        }
        assert_eq!(buffers.len(), 2);
        assert!(buffers.take().capacity() >= 64);
        buffers.clear();
        assert!(buffers.is_empty());
    }
}
