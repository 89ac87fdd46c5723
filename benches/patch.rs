use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use patch_inpaint as pi;

use pi::image::{GrayImage, Luma, Rgba, RgbaImage};

fn test_pair(dim: u32) -> (RgbaImage, GrayImage) {
    let mut img = RgbaImage::new(dim, dim);
    for (x, y, px) in img.enumerate_pixels_mut() {
        *px = Rgba([
            ((x * 37 + y * 11) % 256) as u8,
            ((x * 5 + y * 29) % 256) as u8,
            ((x + y) % 256) as u8,
            255,
        ]);
    }

    let hole = dim / 4;
    let origin = (dim - hole) / 2;
    let mut mask = GrayImage::from_pixel(dim, dim, Luma([255]));
    for y in origin..origin + hole {
        for x in origin..origin + hole {
            mask.put_pixel(x, y, Luma([0]));
        }
    }

    (img, mask)
}

fn patch_sizes(c: &mut Criterion) {
    static DIM: u32 = 32;

    let mut group = c.benchmark_group("patch");
    group.sample_size(10);

    for dim in [DIM, 2 * DIM, 4 * DIM].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(dim), dim, |b, &dim| {
            let (img, mask) = test_pair(dim);

            b.iter(|| {
                let out = pi::SessionBuilder::new(&img, &mask)
                    .radius(2)
                    .seed(120)
                    .build()
                    .unwrap()
                    .run();
                black_box(out)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, patch_sizes);
criterion_main!(benches);
