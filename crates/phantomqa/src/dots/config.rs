use crate::error::{QalError, Result};
use crate::segment::ThresholdMethod;

/// Rows and columns of the well grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GridShape {
    pub rows: usize,
    pub cols: usize,
}

impl GridShape {
    pub const fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    /// Number of wells in the grid.
    pub fn count(&self) -> usize {
        self.rows * self.cols
    }

    /// Grid `(row, col)` of a well index.
    pub fn position(&self, index: usize) -> (usize, usize) {
        (index / self.cols, index % self.cols)
    }
}

impl Default for GridShape {
    fn default() -> Self {
        Self::new(3, 3)
    }
}

/// Dot-grid detector configuration.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DotGridConfig {
    /// Expected grid layout; every image must show exactly this many wells.
    pub grid: GridShape,
    /// Gaussian sigma applied before thresholding (pixels).
    pub blur_sigma: f32,
    /// Global level that separates candidate wells from the background.
    pub threshold: ThresholdMethod,
    /// Each candidate keeps the pixels above this fraction of its own peak
    /// over the background, so dim wells get the same boundary as bright
    /// ones. 0 keeps the global mask.
    pub local_level: f64,
    /// Smallest accepted well area (pixels).
    pub min_area_px: usize,
    /// Largest accepted well area as a fraction of the image area.
    pub max_area_frac: f64,
    /// Largest accepted major/minor axis ratio.
    pub max_aspect_ratio: f64,
    /// Smallest accepted area relative to the moment ellipse.
    pub min_fill_ratio: f64,
    /// Drop regions touching the image border.
    pub exclude_border: bool,
    /// Photometry aperture radius as a fraction of the well radius.
    pub aperture_frac: f64,
    /// Allowed deviation of a well's grid offset between images, in pitches.
    pub geometry_tolerance: f64,
}

impl Default for DotGridConfig {
    fn default() -> Self {
        Self {
            grid: GridShape::default(),
            blur_sigma: 1.0,
            threshold: ThresholdMethod::FractionOfMax { fraction: 0.1 },
            local_level: 0.5,
            min_area_px: 12,
            max_area_frac: 0.05,
            max_aspect_ratio: 1.6,
            min_fill_ratio: 0.6,
            exclude_border: true,
            aperture_frac: 0.7,
            geometry_tolerance: 0.35,
        }
    }
}

impl DotGridConfig {
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(QalError::invalid(format!("dot-grid config: {msg}")));
        if self.grid.rows == 0 || self.grid.cols == 0 {
            return fail(format!(
                "grid must have at least one row and column, got {}x{}",
                self.grid.rows, self.grid.cols
            ));
        }
        if !(self.blur_sigma >= 0.0) {
            return fail(format!("blur_sigma must be >= 0, got {}", self.blur_sigma));
        }
        self.threshold.validate().or_else(fail)?;
        if !(0.0..1.0).contains(&self.local_level) {
            return fail(format!("local_level must lie in [0, 1), got {}", self.local_level));
        }
        if self.min_area_px == 0 {
            return fail("min_area_px must be positive".to_string());
        }
        if !(self.max_area_frac > 0.0 && self.max_area_frac <= 1.0) {
            return fail(format!("max_area_frac must lie in (0, 1], got {}", self.max_area_frac));
        }
        if !(self.max_aspect_ratio >= 1.0) {
            return fail(format!("max_aspect_ratio must be >= 1, got {}", self.max_aspect_ratio));
        }
        if !(0.0..=1.0).contains(&self.min_fill_ratio) {
            return fail(format!("min_fill_ratio must lie in [0, 1], got {}", self.min_fill_ratio));
        }
        if !(self.aperture_frac > 0.0 && self.aperture_frac <= 1.0) {
            return fail(format!("aperture_frac must lie in (0, 1], got {}", self.aperture_frac));
        }
        if !(self.geometry_tolerance > 0.0 && self.geometry_tolerance < 0.5) {
            return fail(format!(
                "geometry_tolerance must lie in (0, 0.5), got {}",
                self.geometry_tolerance
            ));
        }
        Ok(())
    }
}
