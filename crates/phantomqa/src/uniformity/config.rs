use std::path::PathBuf;

use crate::error::{QalError, Result};

/// Highest supported polynomial order of the uniformity surface.
pub const MAX_FIT_ORDER: usize = 4;

/// How one well's responses from several images combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    #[default]
    Mean,
    Median,
    Max,
}

impl Aggregation {
    /// Combine values; `None` when empty.
    pub(crate) fn apply(self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        Some(match self {
            Self::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Self::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::Median => {
                let mut v = values.to_vec();
                v.sort_by(f64::total_cmp);
                let mid = v.len() / 2;
                if v.len() % 2 == 0 {
                    0.5 * (v[mid - 1] + v[mid])
                } else {
                    v[mid]
                }
            }
        })
    }
}

/// Which aperture statistic is a well's response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WellIntensity {
    #[default]
    Mean,
    Peak,
}

/// Uniformity analyzer configuration.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct UniformityConfig {
    /// Persist the fitted model and uniformity map. Off by default so that
    /// analysis never writes to disk unless asked.
    pub save_output: bool,
    /// Total polynomial order of the fitted surface, 1..=4.
    pub fit_order: usize,
    pub aggregation: Aggregation,
    /// Subtract each image's background level from its well responses.
    pub subtract_background: bool,
    pub intensity: WellIntensity,
    /// Samples `[nx, ny]` of the evaluated map over the full field of view.
    pub grid_shape: [usize; 2],
    /// Fewest wells accepted for a fit (never fewer than the polynomial terms).
    pub min_wells: usize,
    /// Base directory for persisted output; defaults to the images' directory.
    pub output_dir: Option<PathBuf>,
}

impl Default for UniformityConfig {
    fn default() -> Self {
        Self {
            save_output: false,
            fit_order: 2,
            aggregation: Aggregation::Mean,
            subtract_background: true,
            intensity: WellIntensity::Mean,
            grid_shape: [64, 64],
            min_wells: 6,
            output_dir: None,
        }
    }
}

impl UniformityConfig {
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(QalError::invalid(format!("uniformity config: {msg}")));
        if !(1..=MAX_FIT_ORDER).contains(&self.fit_order) {
            return fail(format!(
                "fit_order must lie in 1..={MAX_FIT_ORDER}, got {}",
                self.fit_order
            ));
        }
        if self.grid_shape.iter().any(|&n| n < 2) {
            return fail(format!(
                "grid_shape needs at least 2 samples per axis, got {:?}",
                self.grid_shape
            ));
        }
        if self.min_wells == 0 {
            return fail("min_wells must be positive".to_string());
        }
        Ok(())
    }

    /// Number of wells a fit needs under this configuration.
    pub fn required_wells(&self) -> usize {
        self.min_wells.max(super::surface::n_terms(self.fit_order))
    }
}
