//! Benchmark for the tile-descrambling transform.
//!
//! Run with: `cargo bench --bench descramble`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{Rgba, RgbaImage};
use mangafetch::descramble::descramble_tiles;

/// Deterministic page-like test image.
fn pattern(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x % 251) as u8, (y % 241) as u8, ((x + y) % 239) as u8, 255])
    })
}

fn bench_descramble(c: &mut Criterion) {
    let mut group = c.benchmark_group("descramble_tiles");

    for (width, height) in [(800, 1200), (1080, 1536)] {
        let img = pattern(width, height);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{width}x{height}")),
            &img,
            |b, img| b.iter(|| descramble_tiles(black_box(img), black_box(3))),
        );
    }

    group.finish();
}

criterion_group!(benches, bench_descramble);
criterion_main!(benches);
