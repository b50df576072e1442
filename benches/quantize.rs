#[path = "../util/util.rs"]
mod util;

use util::benchmark_images;

use std::time::Duration;

use criterion::{
    criterion_group, criterion_main, measurement::WallTime, BatchSize, Bencher, BenchmarkId,
    Criterion, SamplingMode,
};
use pixpress::{PixelBuffer, QuantizeParams, QuantizePass};

const PASSES: [QuantizePass; 6] = [
    QuantizePass::LineArt,
    QuantizePass::LineArtAggressive,
    QuantizePass::Photographic,
    QuantizePass::Graphical,
    QuantizePass::Adaptive,
    QuantizePass::AggressiveFallback,
];

fn bench(
    c: &mut Criterion,
    group: &str,
    mut f: impl FnMut(&mut Bencher<WallTime>, &(QuantizePass, &PixelBuffer)),
) {
    let mut group = c.benchmark_group(group);
    group
        .sample_size(30)
        .noise_threshold(0.05)
        .sampling_mode(SamplingMode::Flat)
        .warm_up_time(Duration::from_millis(500));

    for pass in PASSES {
        for (path, image) in benchmark_images() {
            group.bench_with_input(
                BenchmarkId::new(format!("{pass:?}"), path),
                &(pass, image),
                &mut f,
            );
        }
    }
}

fn quantize_single(c: &mut Criterion) {
    let params = QuantizeParams::new();
    bench(c, "quantize_single", |b, &(pass, image)| {
        b.iter_batched_ref(
            || image.clone(),
            |image| params.apply(image, pass),
            BatchSize::LargeInput,
        )
    })
}

fn quantize_par(c: &mut Criterion) {
    let params = QuantizeParams::new();
    bench(c, "quantize_par", |b, &(pass, image)| {
        b.iter_batched_ref(
            || image.clone(),
            |image| params.apply_par(image, pass),
            BatchSize::LargeInput,
        )
    })
}

criterion_group!(benches, quantize_single, quantize_par);
criterion_main!(benches);
