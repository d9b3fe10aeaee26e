//! Well candidates from one image: segmentation, shape gating and aperture
//! photometry.

use image::{GrayImage, Luma};

use super::config::DotGridConfig;
use crate::input::{IntensityMap, PhantomImage};
use crate::segment::{self, Component};

/// One accepted well region with its photometry.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Blob {
    /// Intensity-weighted centroid `[x, y]` (pixels).
    pub centroid: [f64; 2],
    pub radius_px: f64,
    pub area_px: usize,
    pub mean_intensity: f64,
    pub peak_intensity: f64,
}

/// Accepted wells and the background level of one image.
#[derive(Debug, Clone)]
pub(crate) struct BlobScan {
    pub blobs: Vec<Blob>,
    /// Median of the pixels outside every foreground region.
    pub background: f64,
    /// Regions rejected by the shape gates.
    pub rejected: usize,
}

pub(crate) fn scan_wells(image: &PhantomImage, config: &DotGridConfig) -> BlobScan {
    let raw = image.pixels();
    let (w, h) = raw.dimensions();
    let smoothed = segment::smooth(raw, config.blur_sigma);
    let (mask, level) = segment::binarize(&segment::normalize_u8(&smoothed), config.threshold);

    let mut outside: Vec<f32> = raw
        .as_raw()
        .iter()
        .zip(mask.as_raw())
        .filter(|(_, m)| **m == 0)
        .map(|(v, _)| *v)
        .collect();
    let background = segment::median(&mut outside).unwrap_or(0.0) as f64;

    let regions = if config.local_level > 0.0 {
        let local = config.local_level as f32;
        let refined = local_level_mask(&mask, &smoothed, background as f32, local);
        segment::components(&refined, raw)
    } else {
        segment::components(&mask, raw)
    };

    let max_area = config.max_area_frac * (w as f64 * h as f64);
    let total = regions.len();
    let blobs: Vec<Blob> = regions
        .iter()
        .filter(|c| accept(c, config, max_area))
        .map(|c| photometry(c, raw, config.aperture_frac))
        .collect();

    tracing::debug!(
        image = image.id(),
        level,
        regions = total,
        accepted = blobs.len(),
        background,
        "well scan"
    );
    BlobScan {
        rejected: total - blobs.len(),
        blobs,
        background,
    }
}

/// Keep, within each candidate, the pixels at or above
/// `background + level * (peak - background)` of that candidate's own peak.
fn local_level_mask(
    mask: &GrayImage,
    smoothed: &IntensityMap,
    background: f32,
    level: f32,
) -> GrayImage {
    let mut refined = GrayImage::new(mask.width(), mask.height());
    for c in segment::components(mask, smoothed) {
        let peak = c
            .pixels
            .iter()
            .map(|&[x, y]| smoothed.get_pixel(x, y)[0])
            .fold(f32::NEG_INFINITY, f32::max);
        let cut = background + level * (peak - background);
        for &[x, y] in &c.pixels {
            if smoothed.get_pixel(x, y)[0] >= cut {
                refined.put_pixel(x, y, Luma([255]));
            }
        }
    }
    refined
}

fn accept(c: &Component, config: &DotGridConfig, max_area: f64) -> bool {
    c.area >= config.min_area_px
        && (c.area as f64) <= max_area
        && c.elongation() <= config.max_aspect_ratio
        && c.fill_ratio() >= config.min_fill_ratio
        && !(config.exclude_border && c.touches_border)
}

/// Mean and peak of the raw image inside a circular aperture.
fn photometry(c: &Component, raw: &IntensityMap, aperture_frac: f64) -> Blob {
    let radius_px = c.equivalent_radius();
    let [cx, cy] = c.weighted_centroid;
    let r = (aperture_frac * radius_px).max(0.5);
    let (w, h) = raw.dimensions();
    let x0 = (cx - r).floor().max(0.0) as u32;
    let y0 = (cy - r).floor().max(0.0) as u32;
    let x1 = ((cx + r).ceil() as u32).min(w - 1);
    let y1 = ((cy + r).ceil() as u32).min(h - 1);

    let (mut sum, mut n, mut peak) = (0.0f64, 0usize, f64::NEG_INFINITY);
    for y in y0..=y1 {
        for x in x0..=x1 {
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            if dx * dx + dy * dy <= r * r {
                let v = raw.get_pixel(x, y)[0] as f64;
                sum += v;
                n += 1;
                peak = peak.max(v);
            }
        }
    }
    if n == 0 {
        let x = (cx.round() as u32).min(w - 1);
        let y = (cy.round() as u32).min(h - 1);
        let v = raw.get_pixel(x, y)[0] as f64;
        (sum, n, peak) = (v, 1, v);
    }

    Blob {
        centroid: [cx, cy],
        radius_px,
        area_px: c.area,
        mean_intensity: sum / n as f64,
        peak_intensity: peak,
    }
}
