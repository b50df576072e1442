#![deny(unsafe_code, unsafe_op_in_unsafe_fn)]
#![warn(
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::todo,
    clippy::unimplemented,
    clippy::unneeded_field_pattern,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::unnecessary_self_imports,
    clippy::str_to_string,
    clippy::string_to_string,
    clippy::string_slice
)]

use std::{fmt::Display, path::PathBuf, time::Duration};

use clap::{Parser, ValueEnum};
use pixpress::{
    compress, CompressOptions, EncodedImage, Encoder, JpegCodec, PngCodec, PoolConfig, Scheduler,
    SchedulerConfig, TileConfig,
};
use tracing_subscriber::EnvFilter;

#[derive(Copy, Clone, ValueEnum)]
enum Format {
    Jpeg,
    Png,
}

impl Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Format::Jpeg => "jpeg",
                Format::Png => "png",
            }
        )
    }
}

#[derive(Parser)]
pub struct Options {
    /// The target size in KiB.
    #[arg(short, long)]
    target: usize,

    /// Accept outputs up to this size in KiB without trying further fallbacks.
    #[arg(long)]
    acceptable: Option<usize>,

    #[arg(short, long, default_value_t = Format::Jpeg)]
    format: Format,

    #[arg(long, default_value_t = 0.05)]
    min_quality: f32,

    #[arg(long, default_value_t = 1.0)]
    max_quality: f32,

    /// Never downscale the image.
    #[arg(long)]
    preserve_dimensions: bool,

    /// Overall deadline in seconds (derived from the image size by default).
    #[arg(long)]
    deadline: Option<u64>,

    /// The maximum number of tile workers (0 picks one from the available parallelism).
    #[arg(short, long, default_value_t = 0)]
    workers: usize,

    /// Fixed tile edge length (derived from the image size by default).
    #[arg(long)]
    tile_edge: Option<u32>,

    #[arg(long)]
    progress: bool,

    #[arg(long)]
    verbose: bool,

    input: PathBuf,

    output: PathBuf,
}

fn main() {
    let options = Options::parse();

    let level = if options.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    macro_rules! log {
        ($name: literal, $val: expr) => {
            if options.verbose {
                let time = std::time::Instant::now();
                let value = $val;
                println!("{} took {}ms", $name, time.elapsed().as_millis());
                value
            } else {
                $val
            }
        };
    }

    let bytes = log!("read image", std::fs::read(&options.input).unwrap());

    let mut pool = PoolConfig::new();
    if options.workers > 0 {
        pool = pool.with_max_workers(options.workers);
    }
    let scheduler = Scheduler::init(
        SchedulerConfig::new()
            .with_pool(pool)
            .with_tiles(TileConfig::new().tile_edge(options.tile_edge)),
    );

    let mut compress_options = CompressOptions::new(options.target * 1024)
        .quality_range(options.min_quality, options.max_quality)
        .preserve_dimensions(options.preserve_dimensions);
    if let Some(acceptable) = options.acceptable {
        compress_options = compress_options.acceptable_size(acceptable * 1024);
    }
    if let Some(deadline) = options.deadline {
        compress_options = compress_options.deadline(Duration::from_secs(deadline));
    }
    if options.progress {
        compress_options = compress_options.on_progress(|percent| eprintln!("{percent}%"));
    }

    let encoder: &dyn Encoder = match options.format {
        Format::Jpeg => &JpegCodec,
        Format::Png => &PngCodec,
    };

    let result = log!(
        "compression",
        compress(&EncodedImage::new(&bytes), &compress_options, encoder, &scheduler).unwrap()
    );

    scheduler.shutdown();

    println!(
        "{} -> {} bytes ({}x{}, {} strategy, quality {:.2}, {} encodes, target {})",
        bytes.len(),
        result.final_bytes.len(),
        result.dimensions.0,
        result.dimensions.1,
        result.strategy,
        result.final_quality,
        result.iterations,
        if result.met_target { "met" } else { "missed" },
    );
    if let Some(classification) = result.classification {
        println!("classified as {}", classification.kind);
    }
    if let Some(stats) = result.tile_stats {
        println!(
            "{} tiles in {} batches, {} processed locally",
            stats.tiles, stats.batches, stats.local_fallbacks
        );
    }

    log!("write image", std::fs::write(&options.output, &result.final_bytes).unwrap())
}
