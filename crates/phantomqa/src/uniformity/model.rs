//! Surface model construction from a [`DotSet`].

use super::config::{UniformityConfig, WellIntensity};
use super::surface::PolynomialSurface;
use crate::depth::linspace;
use crate::dots::DotSet;
use crate::error::{QalError, Result};

/// Aggregated response of one well.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WellResponse {
    pub index: usize,
    pub row: usize,
    pub col: usize,
    /// Mean centroid across images (mm).
    pub position_mm: [f64; 2],
    /// Aggregated, background-corrected intensity.
    pub response: f64,
    /// Normalized model value at the well position.
    pub fitted: f64,
    /// `response` minus the unnormalized model value.
    pub residual: f64,
}

/// Goodness of fit in response units.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FitQuality {
    pub rms_residual: f64,
    pub r_squared: f64,
}

/// Summary of the normalized uniformity map.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct UniformityStats {
    /// Unnormalized peak the map was divided by.
    pub peak: f64,
    pub mean: f64,
    pub min: f64,
    pub std_dev: f64,
    /// `std_dev / mean`.
    pub cv: f64,
}

/// Normalized surface sampled over the full field of view.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct UniformityGrid {
    /// Sample x positions (mm), left to right.
    pub x_mm: Vec<f64>,
    /// Sample y positions (mm), top to bottom.
    pub y_mm: Vec<f64>,
    /// Row-major samples, `values[iy * x_mm.len() + ix]`, peak = 1.
    pub values: Vec<f64>,
}

impl UniformityGrid {
    pub fn width(&self) -> usize {
        self.x_mm.len()
    }

    pub fn height(&self) -> usize {
        self.y_mm.len()
    }

    pub fn at(&self, ix: usize, iy: usize) -> f64 {
        self.values[iy * self.width() + ix]
    }
}

/// Fitted field-uniformity model.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SurfaceModel {
    pub surface: PolynomialSurface,
    /// Millimetres per pixel used for well positions; 1 when the images
    /// carry no scale.
    pub mm_per_px: f64,
    pub pixel_units: bool,
    /// Field of view `[width, height]` (mm).
    pub extent_mm: [f64; 2],
    pub grid: UniformityGrid,
    pub stats: UniformityStats,
    pub fit: FitQuality,
    pub wells: Vec<WellResponse>,
    pub n_images: usize,
}

impl SurfaceModel {
    /// Normalized model value at a field position (mm).
    pub fn evaluate(&self, x_mm: f64, y_mm: f64) -> f64 {
        self.surface.evaluate(x_mm, y_mm) / self.stats.peak
    }
}

pub(crate) fn build_model(dot_set: &DotSet, config: &UniformityConfig) -> Result<SurfaceModel> {
    if dot_set.images.is_empty() {
        return Err(QalError::invalid("dot set contains no images"));
    }
    let n_wells = dot_set.n_wells();
    let required = config.required_wells();
    if n_wells < required {
        return Err(QalError::invalid(format!(
            "{n_wells} wells cannot constrain an order-{} surface; at least {required} are required",
            config.fit_order
        )));
    }

    let (mm_per_px, pixel_units) = match dot_set.mm_per_px() {
        Some(s) => (s, false),
        None => (1.0, true),
    };

    let mut points = Vec::with_capacity(n_wells);
    let mut responses = Vec::with_capacity(n_wells);
    for index in 0..n_wells {
        let records = dot_set.well(index);
        if records.len() != dot_set.n_images() {
            return Err(QalError::invalid(format!(
                "well #{index} is missing from {} image(s)",
                dot_set.n_images() - records.len()
            )));
        }
        let samples: Vec<f64> = dot_set
            .images
            .iter()
            .zip(&records)
            .map(|(img, rec)| {
                let raw = match config.intensity {
                    WellIntensity::Mean => rec.mean_intensity,
                    WellIntensity::Peak => rec.peak_intensity,
                };
                if config.subtract_background {
                    raw - img.background
                } else {
                    raw
                }
            })
            .collect();
        let response = config
            .aggregation
            .apply(&samples)
            .ok_or_else(|| QalError::invalid(format!("well #{index} has no samples")))?;
        if !response.is_finite() {
            return Err(QalError::Fit(format!("well #{index} response is not finite")));
        }
        let n = records.len() as f64;
        let cx = records.iter().map(|r| r.centroid[0]).sum::<f64>() / n;
        let cy = records.iter().map(|r| r.centroid[1]).sum::<f64>() / n;
        points.push([cx * mm_per_px, cy * mm_per_px]);
        responses.push(response);
    }

    let surface = PolynomialSurface::fit(&points, &responses, config.fit_order)?;

    let [w_px, h_px] = dot_set.image_size;
    let extent_mm = [
        (w_px.max(1) - 1) as f64 * mm_per_px,
        (h_px.max(1) - 1) as f64 * mm_per_px,
    ];
    let x_mm = linspace(0.0, extent_mm[0], config.grid_shape[0]);
    let y_mm = linspace(0.0, extent_mm[1], config.grid_shape[1]);
    let raw_grid: Vec<f64> = y_mm
        .iter()
        .flat_map(|&y| x_mm.iter().map(move |&x| (x, y)))
        .map(|(x, y)| surface.evaluate(x, y))
        .collect();

    let peak = raw_grid.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !(peak.is_finite() && peak > 0.0) {
        return Err(QalError::Fit(format!(
            "uniformity surface peak is {peak}; cannot normalize"
        )));
    }
    let values: Vec<f64> = raw_grid.iter().map(|v| v / peak).collect();
    let stats = map_stats(&values, peak);

    let mut wells = Vec::with_capacity(n_wells);
    let mut ss_res = 0.0;
    for (index, (p, &response)) in points.iter().zip(&responses).enumerate() {
        let model = surface.evaluate(p[0], p[1]);
        let residual = response - model;
        ss_res += residual * residual;
        let (row, col) = dot_set.grid.position(index);
        wells.push(WellResponse {
            index,
            row,
            col,
            position_mm: *p,
            response,
            fitted: model / peak,
            residual,
        });
    }
    let mean_response = responses.iter().sum::<f64>() / n_wells as f64;
    let ss_tot: f64 = responses.iter().map(|r| (r - mean_response).powi(2)).sum();
    let fit = FitQuality {
        rms_residual: (ss_res / n_wells as f64).sqrt(),
        r_squared: if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 1.0 },
    };
    tracing::debug!(
        coefficients = ?surface.coefficients,
        rms_residual = fit.rms_residual,
        r_squared = fit.r_squared,
        "surface fit"
    );
    tracing::info!(
        wells = n_wells,
        images = dot_set.n_images(),
        order = config.fit_order,
        min = stats.min,
        cv = stats.cv,
        "uniformity surface"
    );

    Ok(SurfaceModel {
        surface,
        mm_per_px,
        pixel_units,
        extent_mm,
        grid: UniformityGrid { x_mm, y_mm, values },
        stats,
        fit,
        wells,
        n_images: dot_set.n_images(),
    })
}

fn map_stats(values: &[f64], peak: f64) -> UniformityStats {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std_dev = var.sqrt();
    UniformityStats {
        peak,
        mean,
        min,
        std_dev,
        cv: if mean != 0.0 { std_dev / mean } else { 0.0 },
    }
}
