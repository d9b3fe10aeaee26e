//! Shared segmentation primitives: normalization, smoothing, thresholding and
//! connected-component statistics.
//!
//! Both the phantom cropper and the dot-grid detector reduce an image to a set
//! of bright connected regions; this module owns that reduction so the two
//! stages agree on thresholds and moments.

use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};

use crate::input::IntensityMap;

/// Variance of a unit pixel treated as a uniform square (1/12 px²).
const PIXEL_VARIANCE: f64 = 1.0 / 12.0;

/// Foreground threshold selection.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case", tag = "method")]
pub enum ThresholdMethod {
    /// Otsu's between-class variance maximum on the normalized 8-bit image.
    #[default]
    Otsu,
    /// Fixed fraction of the normalized range, in (0, 1).
    FractionOfMax { fraction: f32 },
}

impl ThresholdMethod {
    pub(crate) fn validate(&self) -> Result<(), String> {
        match *self {
            Self::Otsu => Ok(()),
            Self::FractionOfMax { fraction } if fraction > 0.0 && fraction < 1.0 => Ok(()),
            Self::FractionOfMax { fraction } => {
                Err(format!("threshold fraction must lie in (0, 1), got {fraction}"))
            }
        }
    }
}

/// Gaussian-smooth an intensity map; `sigma <= 0` returns a copy.
pub(crate) fn smooth(img: &IntensityMap, sigma: f32) -> IntensityMap {
    if sigma <= 0.0 {
        return img.clone();
    }
    imageproc::filter::gaussian_blur_f32(img, sigma)
}

/// Stretch an intensity map to the full 8-bit range.
///
/// A flat image maps to all zeros.
pub(crate) fn normalize_u8(img: &IntensityMap) -> GrayImage {
    let (lo, hi) = img
        .as_raw()
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let span = hi - lo;
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        if !(span > 0.0) {
            return Luma([0]);
        }
        let v = (img.get_pixel(x, y)[0] - lo) / span;
        Luma([(v * 255.0).round().clamp(0.0, 255.0) as u8])
    })
}

/// Binary foreground mask (255 = foreground) and the 8-bit level used.
pub(crate) fn binarize(normalized: &GrayImage, method: ThresholdMethod) -> (GrayImage, u8) {
    let level = match method {
        ThresholdMethod::Otsu => imageproc::contrast::otsu_level(normalized),
        ThresholdMethod::FractionOfMax { fraction } => {
            (fraction * 255.0).round().clamp(0.0, 254.0) as u8
        }
    };
    let mask = GrayImage::from_fn(normalized.width(), normalized.height(), |x, y| {
        if normalized.get_pixel(x, y)[0] > level {
            Luma([255])
        } else {
            Luma([0])
        }
    });
    (mask, level)
}

/// Statistics of one 8-connected foreground region.
#[derive(Debug, Clone)]
pub(crate) struct Component {
    pub area: usize,
    pub touches_border: bool,
    /// Unweighted centroid of the region's pixels.
    pub centroid: [f64; 2],
    /// Intensity-weighted centroid (weights above the region's minimum).
    pub weighted_centroid: [f64; 2],
    /// Second central moments `[mu20, mu02, mu11]` of the binary region.
    pub moments: [f64; 3],
    pub pixels: Vec<[u32; 2]>,
}

impl Component {
    /// Eigenvalues `(major, minor)` of the pixel-corrected covariance.
    pub fn axis_variances(&self) -> (f64, f64) {
        let [mu20, mu02, mu11] = self.moments;
        let mean = 0.5 * (mu20 + mu02);
        let diff = (0.25 * (mu20 - mu02).powi(2) + mu11 * mu11).sqrt();
        (
            mean + diff + PIXEL_VARIANCE,
            (mean - diff).max(0.0) + PIXEL_VARIANCE,
        )
    }

    /// Major-to-minor axis length ratio.
    pub fn elongation(&self) -> f64 {
        let (l1, l2) = self.axis_variances();
        (l1 / l2).sqrt()
    }

    /// Angle of the major axis in radians, in `(-pi/2, pi/2]`.
    pub fn orientation(&self) -> f64 {
        let [mu20, mu02, mu11] = self.moments;
        0.5 * (2.0 * mu11).atan2(mu20 - mu02)
    }

    /// Region area relative to the ellipse implied by its moments.
    ///
    /// A filled disk scores ~1; rings and ragged blobs score lower.
    pub fn fill_ratio(&self) -> f64 {
        let (l1, l2) = self.axis_variances();
        let ellipse_area = std::f64::consts::PI * 4.0 * (l1 * l2).sqrt();
        if ellipse_area <= 0.0 {
            return 0.0;
        }
        self.area as f64 / ellipse_area
    }

    /// Radius of the disk with the same area.
    pub fn equivalent_radius(&self) -> f64 {
        (self.area as f64 / std::f64::consts::PI).sqrt()
    }
}

/// Label 8-connected foreground regions and collect their statistics.
///
/// Components come back in label order (raster order of first pixel), which
/// keeps downstream selection deterministic.
pub(crate) fn components(mask: &GrayImage, intensity: &IntensityMap) -> Vec<Component> {
    let (w, h) = mask.dimensions();
    let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));
    let n_labels = labels.as_raw().iter().copied().max().unwrap_or(0) as usize;
    if n_labels == 0 {
        return Vec::new();
    }

    let mut pixels: Vec<Vec<[u32; 2]>> = vec![Vec::new(); n_labels];
    for (x, y, l) in labels.enumerate_pixels() {
        let l = l[0] as usize;
        if l > 0 {
            pixels[l - 1].push([x, y]);
        }
    }

    pixels
        .into_iter()
        .filter(|p| !p.is_empty())
        .map(|p| component_stats(p, intensity, w, h))
        .collect()
}

fn component_stats(pixels: Vec<[u32; 2]>, intensity: &IntensityMap, w: u32, h: u32) -> Component {
    let n = pixels.len() as f64;
    // Inclusive pixel bounds [min_x, min_y, max_x, max_y].
    let mut bounds = [u32::MAX, u32::MAX, 0, 0];
    let (mut sx, mut sy) = (0.0f64, 0.0f64);
    let mut floor = f32::INFINITY;
    for &[x, y] in &pixels {
        bounds[0] = bounds[0].min(x);
        bounds[1] = bounds[1].min(y);
        bounds[2] = bounds[2].max(x);
        bounds[3] = bounds[3].max(y);
        sx += x as f64;
        sy += y as f64;
        floor = floor.min(intensity.get_pixel(x, y)[0]);
    }
    let cx = sx / n;
    let cy = sy / n;

    let (mut mu20, mut mu02, mut mu11) = (0.0, 0.0, 0.0);
    let (mut wsum, mut wx, mut wy) = (0.0f64, 0.0f64, 0.0f64);
    for &[x, y] in &pixels {
        let dx = x as f64 - cx;
        let dy = y as f64 - cy;
        mu20 += dx * dx;
        mu02 += dy * dy;
        mu11 += dx * dy;
        let wgt = (intensity.get_pixel(x, y)[0] - floor) as f64;
        wsum += wgt;
        wx += wgt * x as f64;
        wy += wgt * y as f64;
    }
    let weighted_centroid = if wsum > 0.0 {
        [wx / wsum, wy / wsum]
    } else {
        [cx, cy]
    };

    Component {
        area: pixels.len(),
        touches_border: bounds[0] == 0 || bounds[1] == 0 || bounds[2] + 1 == w || bounds[3] + 1 == h,
        centroid: [cx, cy],
        weighted_centroid,
        moments: [mu20 / n, mu02 / n, mu11 / n],
        pixels,
    }
}

/// Median of a sample set; `None` when empty.
pub(crate) fn median(values: &mut [f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    let mid = values.len() / 2;
    let (_, m, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    Some(*m)
}
