#![allow(dead_code)]

use std::{
    path::{Path, PathBuf},
    sync::OnceLock,
};

use pixpress::PixelBuffer;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoroshiro128PlusPlus;

/// Set to a directory of images to benchmark on them as well as the synthetic set.
pub const IMAGE_DIR_VAR: &str = "PIXPRESS_BENCH_IMAGES";

pub fn load_images(images: &[PathBuf]) -> Vec<(String, PixelBuffer)> {
    images
        .iter()
        .map(|path| {
            let image = image::open(path).expect("opened image").into_rgba8();
            let name = path.file_name().unwrap().to_owned().into_string().unwrap();
            (name, PixelBuffer::try_from(image).expect("valid image dimensions"))
        })
        .collect()
}

pub fn load_image_dir(dir: impl AsRef<Path>) -> Vec<(String, PixelBuffer)> {
    let mut paths = std::fs::read_dir(dir)
        .expect("read image directory")
        .collect::<Result<Vec<_>, _>>()
        .expect("read each file")
        .iter()
        .map(std::fs::DirEntry::path)
        .collect::<Vec<_>>();

    paths.sort();

    load_images(&paths)
}

/// Ramps with low amplitude noise, like a smooth photograph.
pub fn photo(width: u32, height: u32, seed: u64) -> PixelBuffer {
    let mut rng = Xoroshiro128PlusPlus::seed_from_u64(seed);
    let mut image = PixelBuffer::new_zeroed(width, height).unwrap();
    let ramp = |v: u32, len: u32| (u64::from(v) * 255 / u64::from(len.max(2) - 1)) as u8;
    for y in 0..height {
        for x in 0..width {
            let blue = rng.gen_range(0..=97);
            image.set_pixel(x, y, [ramp(x, width), ramp(y, height), blue, 255]);
        }
    }
    image
}

/// Black strokes on white, like a scanned page.
pub fn lineart(width: u32, height: u32) -> PixelBuffer {
    let mut image = PixelBuffer::new_zeroed(width, height).unwrap();
    for y in 0..height {
        for x in 0..width {
            let ink = (y % 24 < 2) || (x % 7 == 0 && y % 24 < 16);
            let value = if ink { 0 } else { 255 };
            image.set_pixel(x, y, [value, value, value, 255]);
        }
    }
    image
}

/// Flat colored blocks with a transparent border, like a logo or chart.
pub fn graphic(width: u32, height: u32) -> PixelBuffer {
    const COLORS: [[u8; 4]; 4] = [
        [220, 40, 40, 255],
        [40, 120, 220, 255],
        [250, 200, 30, 255],
        [30, 30, 30, 255],
    ];
    let mut image = PixelBuffer::new_zeroed(width, height).unwrap();
    for y in 0..height {
        for x in 0..width {
            let color = if x < 8 || y < 8 || x + 8 >= width || y + 8 >= height {
                [0, 0, 0, 0]
            } else {
                COLORS[((x / 64 + y / 48) % 4) as usize]
            };
            image.set_pixel(x, y, color);
        }
    }
    image
}

pub fn synthetic_images() -> Vec<(String, PixelBuffer)> {
    let mut images = Vec::new();
    for (width, height) in [(1024, 768), (3000, 2000)] {
        let size = format!("{width}x{height}");
        images.push((format!("photo-{size}"), photo(width, height, 0)));
        images.push((format!("lineart-{size}"), lineart(width, height)));
        images.push((format!("graphic-{size}"), graphic(width, height)));
    }
    images
}

fn load_benchmark_images() -> Vec<(String, PixelBuffer)> {
    let mut images = synthetic_images();
    if let Some(dir) = std::env::var_os(IMAGE_DIR_VAR) {
        images.extend(load_image_dir(dir));
    }
    images
}

static BENCHMARK_IMAGES: OnceLock<Vec<(String, PixelBuffer)>> = OnceLock::new();

pub fn benchmark_images() -> &'static [(String, PixelBuffer)] {
    BENCHMARK_IMAGES.get_or_init(load_benchmark_images)
}
