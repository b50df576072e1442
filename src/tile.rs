//! Partitioning of large images into tiles that can be processed independently.
//!
//! A [`TilePlan`] splits an image into a grid of disjoint core rectangles. The tile edge
//! shrinks as the image grows, down to a minimum. Very large images are first split into
//! quadrant regions, and each region is tiled on its own so that a batch never spans regions.
//!
//! Each [`Tile`] carries a copy of its core plus an optional overlap margin of neighboring
//! pixels. After processing, only the core is written back, so the output does not depend
//! on the order in which tiles complete.
//!
//! # Examples
//! ```
//! # use pixpress::{PixelBuffer, TileConfig, Tile};
//! # fn main() -> Result<(), pixpress::BufferError> {
//! let image = PixelBuffer::new(100, 60, vec![7; 100 * 60 * 4])?;
//! let plan = TileConfig::new().tile_edge(Some(32)).plan(image.width(), image.height());
//!
//! let mut output = PixelBuffer::new_zeroed(100, 60)?;
//! for core in plan.tiles() {
//!     let tile = Tile::extract(&image, core, plan.overlap(), Vec::new())?;
//!     tile.write_into(&mut output);
//! }
//! assert_eq!(output, image);
//! # Ok(())
//! # }
//! ```

use crate::{BufferError, PixelBuffer, QuantizeParams, QuantizePass, CHANNELS};
use std::time::Duration;

/// A rectangle of pixels inside an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    /// The left edge.
    pub x: u32,
    /// The top edge.
    pub y: u32,
    /// The number of columns.
    pub width: u32,
    /// The number of rows.
    pub height: u32,
}

impl Rect {
    /// Creates a new [`Rect`].
    #[must_use]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// The rectangle covering a whole image.
    #[must_use]
    pub const fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// One past the rightmost column.
    #[must_use]
    pub const fn right(&self) -> u32 {
        self.x + self.width
    }

    /// One past the bottom row.
    #[must_use]
    pub const fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// The number of pixels in the rectangle.
    #[must_use]
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Whether the rectangle has no pixels.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Grows the rectangle by `margin` on every side, clipped to `bounds`.
    #[must_use]
    pub fn expand(&self, margin: u32, bounds: Rect) -> Self {
        let x = self.x.saturating_sub(margin).max(bounds.x);
        let y = self.y.saturating_sub(margin).max(bounds.y);
        let right = self.right().saturating_add(margin).min(bounds.right());
        let bottom = self.bottom().saturating_add(margin).min(bounds.bottom());
        Self::new(x, y, right.saturating_sub(x), bottom.saturating_sub(y))
    }

    /// Splits the rectangle into (up to) four quadrants, skipping empty ones.
    fn quadrants(&self) -> Vec<Rect> {
        let (left, top) = (self.width / 2, self.height / 2);
        let (right, bottom) = (self.width - left, self.height - top);
        [
            Rect::new(self.x, self.y, left, top),
            Rect::new(self.x + left, self.y, right, top),
            Rect::new(self.x, self.y + top, left, bottom),
            Rect::new(self.x + left, self.y + top, right, bottom),
        ]
        .into_iter()
        .filter(|rect| !rect.is_empty())
        .collect()
    }
}

/// An owned copy of one tile of an image.
///
/// The tile owns its pixels, so tiles can be moved to other threads while
/// the source image stays untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    /// The region of the output this tile is responsible for.
    core: Rect,
    /// The region copied into `pixels` (the core plus the overlap margin).
    bounds: Rect,
    /// The copied pixels of `bounds`.
    pixels: PixelBuffer,
}

impl Tile {
    /// Copies the pixels of `core` (grown by `overlap`) out of `source`,
    /// reusing `storage` for the tile's pixel data.
    ///
    /// # Errors
    /// Returns a [`BufferError`] if `core` is empty.
    ///
    /// # Panics
    /// Panics if `core` does not lie inside `source`.
    pub fn extract(
        source: &PixelBuffer,
        core: Rect,
        overlap: u32,
        storage: Vec<u8>,
    ) -> Result<Self, BufferError> {
        let bounds = core.expand(overlap, Rect::full(source.width(), source.height()));
        let mut pixels = PixelBuffer::from_recycled(bounds.width, bounds.height, storage)?;

        let start = bounds.x as usize * CHANNELS;
        let end = bounds.right() as usize * CHANNELS;
        let stride = pixels.stride();
        for (row, y) in pixels
            .as_bytes_mut()
            .chunks_exact_mut(stride)
            .zip(bounds.y..bounds.bottom())
        {
            row.copy_from_slice(&source.row(y)[start..end]);
        }

        Ok(Self { core, bounds, pixels })
    }

    /// The region of the output this tile is responsible for.
    #[must_use]
    pub const fn core(&self) -> Rect {
        self.core
    }

    /// The region of the source the tile's pixels were copied from.
    #[must_use]
    pub const fn bounds(&self) -> Rect {
        self.bounds
    }

    /// The tile's pixels.
    #[must_use]
    pub const fn pixels(&self) -> &PixelBuffer {
        &self.pixels
    }

    /// The tile's pixels, mutably.
    pub fn pixels_mut(&mut self) -> &mut PixelBuffer {
        &mut self.pixels
    }

    /// Returns the tile's pixel storage, e.g., for reuse.
    #[must_use]
    pub fn into_storage(self) -> Vec<u8> {
        self.pixels.into_bytes()
    }

    /// Copies the core of the tile into its place in `output`. The overlap margin is discarded.
    ///
    /// # Panics
    /// Panics if the tile's core does not lie inside `output`.
    pub fn write_into(&self, output: &mut PixelBuffer) {
        let offset_x = (self.core.x - self.bounds.x) as usize * CHANNELS;
        let offset_y = self.core.y - self.bounds.y;
        let len = self.core.width as usize * CHANNELS;
        let out_start = self.core.x as usize * CHANNELS;
        let out_stride = output.stride();

        for y in 0..self.core.height {
            let src = &self.pixels.row(offset_y + y)[offset_x..(offset_x + len)];
            let row = (self.core.y + y) as usize * out_stride;
            output.as_bytes_mut()[(row + out_start)..(row + out_start + len)].copy_from_slice(src);
        }
    }
}

/// Work applied to each tile, either on a worker or locally.
///
/// Processing must be deterministic: the same input pixels must always give the same output,
/// so that a tile reprocessed locally is indistinguishable from one processed on a worker.
pub trait TileProcessor: Send + Sync {
    /// Transforms the tile's pixels in place. The dimensions must not change.
    fn process(&self, pixels: &mut PixelBuffer);

    /// The number of neighboring pixels on each side that the result of a pixel depends on.
    /// Tiles are extracted with at least this much overlap.
    ///
    /// The default is `0`.
    fn margin(&self) -> u32 {
        0
    }
}

impl<F: Fn(&mut PixelBuffer) + Send + Sync> TileProcessor for F {
    fn process(&self, pixels: &mut PixelBuffer) {
        self(pixels);
    }
}

/// Applies a quantization pass to each tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantizeProcessor {
    /// The quantization parameters.
    pub params: QuantizeParams,
    /// The pass to apply.
    pub pass: QuantizePass,
}

impl QuantizeProcessor {
    /// Creates a new [`QuantizeProcessor`].
    #[must_use]
    pub const fn new(params: QuantizeParams, pass: QuantizePass) -> Self {
        Self { params, pass }
    }
}

impl TileProcessor for QuantizeProcessor {
    fn process(&self, pixels: &mut PixelBuffer) {
        self.params.apply(pixels, self.pass);
    }

    fn margin(&self) -> u32 {
        self.pass.margin()
    }
}

/// Counts of how the tiles of one image were processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TileStats {
    /// The number of quadrant regions (`1` if the image was not split).
    pub regions: usize,
    /// The number of tiles in the plan.
    pub tiles: usize,
    /// The number of batches dispatched.
    pub batches: usize,
    /// Tiles completed by a worker.
    pub remote: usize,
    /// Tiles reprocessed locally after a worker was unavailable, timed out, or failed.
    pub local_fallbacks: usize,
}

/// Options for tiling large images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileConfig {
    /// Images with more pixels than this are tiled.
    tiling_threshold: u64,
    /// Images with more pixels than this are first split into quadrants.
    quadrant_threshold: u64,
    /// `(max dimension, tile edge)` brackets, in increasing order of dimension.
    brackets: [(u32, u32); 3],
    /// The tile edge used past the last bracket, and the smallest bracketed edge.
    min_tile_edge: u32,
    /// Overrides the bracketed tile edge.
    fixed_tile_edge: Option<u32>,
    /// The number of neighboring pixels copied around each tile.
    overlap: u32,
    /// The maximum number of tiles in flight at once.
    batch_size: usize,
    /// How long to wait for a worker to finish one tile.
    tile_timeout: Duration,
}

impl Default for TileConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TileConfig {
    /// The default number of pixels above which images are tiled.
    pub const DEFAULT_TILING_THRESHOLD: u64 = 4_000_000;

    /// The default number of pixels above which images are split into quadrants first.
    pub const DEFAULT_QUADRANT_THRESHOLD: u64 = 16_000_000;

    /// Creates a new [`TileConfig`] with the default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tiling_threshold: Self::DEFAULT_TILING_THRESHOLD,
            quadrant_threshold: Self::DEFAULT_QUADRANT_THRESHOLD,
            brackets: [(2048, 1024), (4096, 512), (8192, 384)],
            min_tile_edge: 256,
            fixed_tile_edge: None,
            overlap: 0,
            batch_size: 8,
            tile_timeout: Duration::from_secs(5),
        }
    }

    /// Sets the number of pixels above which images are tiled.
    ///
    /// The default is [`TileConfig::DEFAULT_TILING_THRESHOLD`].
    #[must_use]
    pub fn tiling_threshold(mut self, pixels: u64) -> Self {
        self.tiling_threshold = pixels;
        self
    }

    /// Sets the number of pixels above which images are split into quadrants before tiling.
    ///
    /// The default is [`TileConfig::DEFAULT_QUADRANT_THRESHOLD`].
    #[must_use]
    pub fn quadrant_threshold(mut self, pixels: u64) -> Self {
        self.quadrant_threshold = pixels;
        self
    }

    /// Sets the tile edge brackets: an image whose larger dimension is at most `brackets[i].0`
    /// (and above the previous bracket) uses tiles of edge `brackets[i].1`.
    /// Images past the last bracket use the minimum tile edge.
    ///
    /// The defaults are `(2048, 1024)`, `(4096, 512)`, and `(8192, 384)`.
    #[must_use]
    pub fn tile_edge_brackets(mut self, brackets: [(u32, u32); 3]) -> Self {
        self.brackets = brackets;
        self
    }

    /// Sets the minimum tile edge. Values below `1` are treated as `1`.
    ///
    /// The default is `256`.
    #[must_use]
    pub fn min_tile_edge(mut self, edge: u32) -> Self {
        self.min_tile_edge = edge.max(1);
        self
    }

    /// Sets a fixed tile edge that overrides the brackets (and the minimum), or `None` to use the brackets.
    ///
    /// The default is `None`.
    #[must_use]
    pub fn tile_edge(mut self, edge: Option<u32>) -> Self {
        self.fixed_tile_edge = edge.map(|edge| edge.max(1));
        self
    }

    /// Sets the overlap margin.
    ///
    /// The default is `0`.
    #[must_use]
    pub fn overlap(mut self, overlap: u32) -> Self {
        self.overlap = overlap;
        self
    }

    /// Sets the maximum number of tiles in flight. Values below `1` are treated as `1`.
    ///
    /// The default is `8`.
    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Sets how long to wait for a worker to finish one tile before processing it locally.
    ///
    /// The default is 5 seconds.
    #[must_use]
    pub fn tile_timeout(mut self, timeout: Duration) -> Self {
        self.tile_timeout = timeout;
        self
    }

    /// The maximum number of tiles in flight.
    #[must_use]
    pub const fn batch_limit(&self) -> usize {
        self.batch_size
    }

    /// The per-tile worker timeout.
    #[must_use]
    pub const fn timeout_per_tile(&self) -> Duration {
        self.tile_timeout
    }

    /// Whether an image of the given dimensions should be tiled.
    #[must_use]
    pub fn needs_tiling(&self, width: u32, height: u32) -> bool {
        u64::from(width) * u64::from(height) > self.tiling_threshold
    }

    /// The tile edge for an image of the given dimensions.
    #[must_use]
    pub fn edge_for(&self, width: u32, height: u32) -> u32 {
        if let Some(edge) = self.fixed_tile_edge {
            return edge;
        }
        let largest = width.max(height);
        self.brackets
            .iter()
            .find(|&&(max_dim, _)| largest <= max_dim)
            .map_or(self.min_tile_edge, |&(_, edge)| edge.max(self.min_tile_edge))
    }

    /// Partitions an image of the given dimensions.
    #[must_use]
    pub fn plan(&self, width: u32, height: u32) -> TilePlan {
        let full = Rect::full(width, height);
        let regions = if full.area() > self.quadrant_threshold {
            full.quadrants()
        } else {
            vec![full]
        };

        let edge = self.edge_for(width, height);
        let tiles = regions
            .iter()
            .map(|region| {
                let mut tiles = Vec::new();
                for y in (region.y..region.bottom()).step_by(edge as usize) {
                    for x in (region.x..region.right()).step_by(edge as usize) {
                        let w = edge.min(region.right() - x);
                        let h = edge.min(region.bottom() - y);
                        tiles.push(Rect::new(x, y, w, h));
                    }
                }
                tiles
            })
            .collect();

        TilePlan {
            width,
            height,
            edge,
            overlap: self.overlap,
            batch_size: self.batch_size,
            regions,
            tiles,
        }
    }
}

/// A partition of an image into regions and tiles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilePlan {
    /// The image width.
    width: u32,
    /// The image height.
    height: u32,
    /// The tile edge used.
    edge: u32,
    /// The overlap margin around each tile.
    overlap: u32,
    /// The maximum number of tiles per batch.
    batch_size: usize,
    /// The quadrant regions, or the whole image.
    regions: Vec<Rect>,
    /// The tile cores of each region.
    tiles: Vec<Vec<Rect>>,
}

impl TilePlan {
    /// The dimensions of the partitioned image.
    #[must_use]
    pub const fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// The tile edge used.
    #[must_use]
    pub const fn edge(&self) -> u32 {
        self.edge
    }

    /// The overlap margin around each tile.
    #[must_use]
    pub const fn overlap(&self) -> u32 {
        self.overlap
    }

    /// The quadrant regions, or the whole image if it was not split.
    #[must_use]
    pub fn regions(&self) -> &[Rect] {
        &self.regions
    }

    /// The number of tiles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiles.iter().map(Vec::len).sum()
    }

    /// Whether the plan has no tiles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every tile core, region by region.
    pub fn tiles(&self) -> impl Iterator<Item = Rect> + '_ {
        self.tiles.iter().flatten().copied()
    }

    /// The tile cores in batches of at most the batch size. A batch never spans two regions.
    pub fn batches(&self) -> impl Iterator<Item = &[Rect]> + '_ {
        let batch_size = self.batch_size;
        self.tiles.iter().flat_map(move |region| region.chunks(batch_size))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::tests::*;

    fn coverage(plan: &TilePlan) -> Vec<u32> {
        let (width, height) = plan.dimensions();
        let mut counts = vec![0; (width * height) as usize];
        for tile in plan.tiles() {
            for y in tile.y..tile.bottom() {
                for x in tile.x..tile.right() {
                    counts[(y * width + x) as usize] += 1;
                }
            }
        }
        counts
    }

    #[test]
    fn edge_shrinks_as_image_grows() {
        let config = TileConfig::new();
        assert_eq!(config.edge_for(1500, 1500), 1024);
        assert_eq!(config.edge_for(3000, 2000), 512);
        assert_eq!(config.edge_for(100, 8000), 384);
        assert_eq!(config.edge_for(10_000, 10_000), 256);
        assert_eq!(config.tile_edge(Some(16)).edge_for(10_000, 10_000), 16);
    }

    #[test]
    fn tiling_threshold() {
        let config = TileConfig::new();
        assert!(!config.needs_tiling(2000, 2000));
        assert!(config.needs_tiling(2001, 2000));
    }

    #[test]
    fn tiles_cover_image_exactly_once() {
        let plan = TileConfig::new().tile_edge(Some(64)).plan(1000, 700);
        assert_eq!(plan.regions(), &[Rect::full(1000, 700)]);
        assert_eq!(plan.len(), 16 * 11);
        assert!(coverage(&plan).iter().all(|&count| count == 1));
    }

    #[test]
    fn large_images_are_split_into_quadrants() {
        let plan = TileConfig::new()
            .quadrant_threshold(100)
            .tile_edge(Some(4))
            .batch_size(3)
            .plan(31, 17);

        assert_eq!(plan.regions().len(), 4);
        assert!(coverage(&plan).iter().all(|&count| count == 1));

        for batch in plan.batches() {
            assert!(!batch.is_empty() && batch.len() <= 3);
            let region = plan
                .regions()
                .iter()
                .find(|region| region.expand(0, batch[0]) == batch[0])
                .unwrap();
            assert!(batch.iter().all(|tile| tile.expand(0, *region) == *tile));
        }
        assert_eq!(plan.batches().map(<[Rect]>::len).sum::<usize>(), plan.len());
    }

    #[test]
    fn identity_round_trip() {
        let image = noise_image(97, 61, 3);
        for overlap in [0, 3] {
            let plan = TileConfig::new().tile_edge(Some(16)).overlap(overlap).plan(97, 61);
            let mut output = PixelBuffer::new_zeroed(97, 61).unwrap();
            for core in plan.tiles() {
                let tile = Tile::extract(&image, core, plan.overlap(), vec![1; 13]).unwrap();
                tile.write_into(&mut output);
            }
            assert_eq!(output, image);
        }
    }

    #[test]
    fn overlap_is_clipped_to_image() {
        let image = noise_image(40, 40, 1);
        let tile = Tile::extract(&image, Rect::new(0, 16, 16, 16), 4, Vec::new()).unwrap();
        assert_eq!(tile.core(), Rect::new(0, 16, 16, 16));
        assert_eq!(tile.bounds(), Rect::new(0, 12, 20, 24));
        assert_eq!(tile.pixels().dimensions(), (20, 24));
        assert_eq!(tile.pixels().pixel(0, 0), image.pixel(0, 12));
    }

    #[test]
    fn processed_tiles_match_whole_image() {
        let image = checkerboard(64, 64, 8, [250, 10, 10, 255], [10, 10, 250, 200]);
        for pass in [QuantizePass::Graphical, QuantizePass::Adaptive] {
            assert_tiled_matches_whole(&image, QuantizeProcessor::new(QuantizeParams::new(), pass));
        }
    }

    fn assert_tiled_matches_whole(image: &PixelBuffer, processor: QuantizeProcessor) {
        let mut expected = image.clone();
        processor.process(&mut expected);

        let plan = TileConfig::new().tile_edge(Some(16)).plan(64, 64);
        let mut output = PixelBuffer::new_zeroed(64, 64).unwrap();
        for core in plan.tiles() {
            let mut tile = Tile::extract(image, core, processor.margin(), Vec::new()).unwrap();
            processor.process(tile.pixels_mut());
            tile.write_into(&mut output);
        }
        assert_eq!(output, expected);
    }
}
