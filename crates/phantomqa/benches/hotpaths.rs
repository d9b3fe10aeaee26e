use criterion::{black_box, criterion_group, criterion_main, Criterion};
use image::Luma;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use phantomqa::{
    CropConfig, DepthAnalyzer, DepthAnalyzerConfig, DotGridConfig, DotGridDetector, GridShape,
    ImageMeta, IntensityMap, PhantomCropper, PhantomImage, PolynomialSurface, UniformityAnalyzer,
};

/// Vertical channel with a Gaussian cross-section fading with depth, plus
/// uniform noise.
fn make_channel_fixture(width: u32, height: u32, seed: u64) -> PhantomImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let cx = width as f64 * 0.5;
    let sigma = width as f64 * 0.04;
    let (y0, y1) = (height / 10, height - height / 10);
    let img = IntensityMap::from_fn(width, height, |x, y| {
        let noise = rng.gen_range(-2.0f32..2.0f32);
        if y < y0 || y >= y1 {
            return Luma([30.0 + noise]);
        }
        let t = (y - y0) as f64 / (y1 - y0) as f64;
        let amp = 3000.0 * (-3.0 * t).exp();
        let dx = x as f64 - cx;
        let g = (-(dx * dx) / (2.0 * sigma * sigma)).exp();
        Luma([30.0 + (amp * g) as f32 + noise])
    });
    PhantomImage::new(img, ImageMeta::new(format!("channel-{seed}")).with_scale(0.02))
}

/// 3x3 well plate with per-well gain variation and noise.
fn make_wells_fixture(width: u32, height: u32, seed: u64) -> PhantomImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let pitch = width.min(height) as f64 / 4.0;
    let radius = pitch * 0.22;
    let wells: Vec<([f64; 2], f32)> = (0..9)
        .map(|i| {
            let c = [
                pitch * (1.0 + (i % 3) as f64),
                pitch * (1.0 + (i / 3) as f64),
            ];
            (c, rng.gen_range(700.0f32..1000.0f32))
        })
        .collect();
    let img = IntensityMap::from_fn(width, height, |x, y| {
        let noise = rng.gen_range(-3.0f32..3.0f32);
        let v = wells
            .iter()
            .find(|(c, _)| {
                let dx = x as f64 - c[0];
                let dy = y as f64 - c[1];
                dx * dx + dy * dy <= radius * radius
            })
            .map_or(40.0, |(_, gain)| *gain);
        Luma([v + noise])
    });
    PhantomImage::new(img, ImageMeta::new(format!("wells-{seed}")).with_scale(0.05))
}

fn bench_crop(c: &mut Criterion) {
    let cropper = PhantomCropper::new(CropConfig::default()).expect("default crop config");
    let image = make_channel_fixture(640, 1024, 3);

    c.bench_function("crop_channel_640x1024", |b| {
        b.iter(|| {
            let roi = cropper.crop(black_box(&image)).expect("fixture has one channel");
            black_box(roi.n_rows())
        })
    });
}

fn bench_depth(c: &mut Criterion) {
    let cropper = PhantomCropper::new(CropConfig::default()).expect("default crop config");
    let roi = cropper
        .crop(&make_channel_fixture(640, 1024, 5))
        .expect("fixture has one channel");
    let smoothed = DepthAnalyzer::default();
    let raw = DepthAnalyzer::new(DepthAnalyzerConfig {
        smoothing: false,
        ..Default::default()
    })
    .expect("valid depth config");

    c.bench_function("depth_10_profiles_smoothed", |b| {
        b.iter(|| {
            let a = smoothed.analyze(black_box(&roi)).expect("profiles");
            black_box(a.profiles.len())
        })
    });

    c.bench_function("depth_10_profiles_raw", |b| {
        b.iter(|| {
            let a = raw.analyze(black_box(&roi)).expect("profiles");
            black_box(a.profiles.len())
        })
    });
}

fn bench_dots(c: &mut Criterion) {
    let detector = DotGridDetector::new(DotGridConfig::default()).expect("default dot config");
    let images: Vec<PhantomImage> = (0..4).map(|k| make_wells_fixture(800, 800, k)).collect();

    c.bench_function("dots_4x_800x800", |b| {
        b.iter(|| {
            let set = detector.detect(black_box(&images)).expect("fixture grids");
            black_box(set.n_wells())
        })
    });
}

fn bench_surface(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(11);
    let points: Vec<[f64; 2]> = (0..64)
        .map(|_| [rng.gen_range(0.0..40.0), rng.gen_range(0.0..40.0)])
        .collect();
    let values: Vec<f64> = points
        .iter()
        .map(|p| 1000.0 - 0.3 * (p[0] - 20.0).powi(2) - 0.2 * (p[1] - 18.0).powi(2))
        .collect();

    c.bench_function("surface_fit_order4_64pts", |b| {
        b.iter(|| {
            let s = PolynomialSurface::fit(black_box(&points), black_box(&values), 4)
                .expect("well-conditioned fixture");
            black_box(s.evaluate(20.0, 20.0))
        })
    });

    let detector = DotGridDetector::new(DotGridConfig {
        grid: GridShape::new(3, 3),
        ..Default::default()
    })
    .expect("default dot config");
    let set = detector
        .detect(&[make_wells_fixture(800, 800, 21)])
        .expect("fixture grid");
    let analyzer = UniformityAnalyzer::default();

    c.bench_function("uniformity_model_64x64", |b| {
        b.iter(|| {
            let m = analyzer.generate_surface(black_box(&set)).expect("model");
            black_box(m.stats.cv)
        })
    });
}

criterion_group!(hotpaths, bench_crop, bench_depth, bench_dots, bench_surface);
criterion_main!(hotpaths);
