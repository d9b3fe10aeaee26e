//! Synthetic phantom renderers shared by unit tests and scenario tests.

use image::Luma;

use crate::input::{ImageMeta, IntensityMap, PhantomImage};

/// Hard-edged disk: `fg` where the pixel centre is within `radius`.
pub(crate) fn render_disk(
    w: u32,
    h: u32,
    center: [f64; 2],
    radius: f64,
    fg: f32,
    bg: f32,
) -> IntensityMap {
    IntensityMap::from_fn(w, h, |x, y| {
        let dx = x as f64 - center[0];
        let dy = y as f64 - center[1];
        Luma([if dx * dx + dy * dy <= radius * radius { fg } else { bg }])
    })
}

/// Axis-aligned rectangle, `min` inclusive and `max` exclusive.
pub(crate) fn render_rect(
    w: u32,
    h: u32,
    min: [u32; 2],
    max: [u32; 2],
    fg: f32,
    bg: f32,
) -> IntensityMap {
    IntensityMap::from_fn(w, h, |x, y| {
        let inside = x >= min[0] && x < max[0] && y >= min[1] && y < max[1];
        Luma([if inside { fg } else { bg }])
    })
}

/// Grid of equal disks; returns the image and the centre of each well in
/// row-major order.
#[allow(clippy::too_many_arguments)]
pub(crate) fn render_well_grid(
    w: u32,
    h: u32,
    rows: usize,
    cols: usize,
    origin: [f64; 2],
    pitch: f64,
    radius: f64,
    fg: f32,
    bg: f32,
) -> (IntensityMap, Vec<[f64; 2]>) {
    let centers: Vec<[f64; 2]> = (0..rows)
        .flat_map(|r| {
            (0..cols).map(move |c| [origin[0] + c as f64 * pitch, origin[1] + r as f64 * pitch])
        })
        .collect();
    let img = IntensityMap::from_fn(w, h, |x, y| {
        let inside = centers.iter().any(|c| {
            let dx = x as f64 - c[0];
            let dy = y as f64 - c[1];
            dx * dx + dy * dy <= radius * radius
        });
        Luma([if inside { fg } else { bg }])
    });
    (img, centers)
}

/// Vertical channel with a Gaussian cross-section.
///
/// Rows `y_range[0]..y_range[1]` carry `bg + peak(y) * exp(-(x-cx)^2 / 2 sigma^2)`
/// where `peak(y)` decays linearly from `peak` to `peak * end_fraction`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn render_gaussian_channel(
    w: u32,
    h: u32,
    cx: f64,
    sigma: f64,
    y_range: [u32; 2],
    peak: f32,
    end_fraction: f32,
    bg: f32,
) -> IntensityMap {
    let len = (y_range[1] - y_range[0]).max(1) as f32;
    IntensityMap::from_fn(w, h, |x, y| {
        if y < y_range[0] || y >= y_range[1] {
            return Luma([bg]);
        }
        let t = (y - y_range[0]) as f32 / len;
        let amp = peak * (1.0 - t * (1.0 - end_fraction));
        let dx = x as f64 - cx;
        let g = (-(dx * dx) / (2.0 * sigma * sigma)).exp() as f32;
        Luma([bg + amp * g])
    })
}

/// Wrap a rendered map as an input image.
pub(crate) fn phantom(pixels: IntensityMap, id: &str) -> PhantomImage {
    PhantomImage::new(pixels, ImageMeta::new(id))
}
