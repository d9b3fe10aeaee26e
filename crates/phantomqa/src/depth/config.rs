use crate::error::{QalError, Result};

/// Default number of evenly spaced profile depths.
pub const DEFAULT_DEPTH_COUNT: usize = 10;
/// Default first and last profile depth (mm).
pub const DEFAULT_DEPTH_SPAN_MM: [f64; 2] = [1.0, 6.0];
/// Fraction of the reference peak below which a profile is a dropout.
pub const DROPOUT_FRACTION: f64 = 0.02;

/// Baseline removed from each profile before peak and FWHM evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineMode {
    /// Use the raw intensities.
    None,
    /// Subtract the profile minimum.
    #[default]
    Minimum,
}

/// Depth-resolution analyzer configuration.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DepthAnalyzerConfig {
    /// Depths (mm) profiled by [`super::DepthAnalyzer::analyze`], in output order.
    pub depths_mm: Vec<f64>,
    /// Smooth profiles before measuring FWHM.
    pub smoothing: bool,
    /// Gaussian smoothing sigma in samples.
    pub smoothing_sigma: f64,
    /// Rows averaged on each side of the profile row.
    pub band_half_width: usize,
    pub baseline: BaselineMode,
    /// Peak fraction of the reference below which a profile is flagged.
    pub dropout_fraction: f64,
}

impl Default for DepthAnalyzerConfig {
    fn default() -> Self {
        Self {
            depths_mm: linspace(
                DEFAULT_DEPTH_SPAN_MM[0],
                DEFAULT_DEPTH_SPAN_MM[1],
                DEFAULT_DEPTH_COUNT,
            ),
            smoothing: true,
            smoothing_sigma: 1.0,
            band_half_width: 1,
            baseline: BaselineMode::Minimum,
            dropout_fraction: DROPOUT_FRACTION,
        }
    }
}

impl DepthAnalyzerConfig {
    /// Checks analyzer-wide parameters. Individual depths are checked per
    /// depth during analysis so one bad depth does not sink the batch.
    pub fn validate(&self) -> Result<()> {
        if !(self.smoothing_sigma > 0.0 && self.smoothing_sigma.is_finite()) {
            return Err(QalError::invalid(format!(
                "depth config: smoothing_sigma must be positive, got {}",
                self.smoothing_sigma
            )));
        }
        if !(self.dropout_fraction > 0.0 && self.dropout_fraction < 1.0) {
            return Err(QalError::invalid(format!(
                "depth config: dropout_fraction must lie in (0, 1), got {}",
                self.dropout_fraction
            )));
        }
        Ok(())
    }
}

/// `n` evenly spaced values from `start` to `end` inclusive.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}
