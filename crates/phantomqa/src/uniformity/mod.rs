//! Field-uniformity surface from detected wells.
//!
//! Each well's response is aggregated across images, a low-order polynomial is
//! fitted over the well positions, and the fit is sampled over the whole field
//! of view and normalized to a peak of 1.

mod config;
mod model;
mod persist;
mod surface;

pub use config::{Aggregation, UniformityConfig, WellIntensity, MAX_FIT_ORDER};
pub use model::{FitQuality, SurfaceModel, UniformityGrid, UniformityStats, WellResponse};
pub use persist::{
    SavedArtifacts, UniformitySnapshot, MAP_FILE, MODEL_FILE, OUTPUT_SUBDIR, SNAPSHOT_SCHEMA_V1,
};
pub use surface::{n_terms, PolynomialSurface};

use crate::dots::DotSet;
use crate::error::{QalError, Result};

/// Result of [`UniformityAnalyzer::run`].
#[derive(Debug)]
pub struct UniformityOutput {
    pub model: SurfaceModel,
    /// `None` when saving is off; otherwise the outcome of the save.
    pub saved: Option<Result<SavedArtifacts>>,
}

impl UniformityOutput {
    pub fn saved_to(&self) -> Option<&SavedArtifacts> {
        self.saved.as_ref().and_then(|r| r.as_ref().ok())
    }

    pub fn save_error(&self) -> Option<&QalError> {
        self.saved.as_ref().and_then(|r| r.as_ref().err())
    }
}

/// Fits uniformity surfaces to [`DotSet`]s.
#[derive(Debug, Clone, Default)]
pub struct UniformityAnalyzer {
    config: UniformityConfig,
}

impl UniformityAnalyzer {
    pub fn new(config: UniformityConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &UniformityConfig {
        &self.config
    }

    /// Fit the surface without touching the filesystem.
    pub fn generate_surface(&self, dot_set: &DotSet) -> Result<SurfaceModel> {
        model::build_model(dot_set, &self.config)
    }

    /// Fit the surface and, when `save_output` is on, persist it.
    ///
    /// A failed save is reported in the output; the model is still returned.
    pub fn run(&self, dot_set: &DotSet) -> Result<UniformityOutput> {
        let model = self.generate_surface(dot_set)?;
        let saved = self.config.save_output.then(|| {
            let result = self.save(&model, dot_set);
            if let Err(err) = &result {
                tracing::warn!(error = %err, "uniformity output not saved");
            }
            result
        });
        Ok(UniformityOutput { model, saved })
    }

    fn save(&self, model: &SurfaceModel, dot_set: &DotSet) -> Result<SavedArtifacts> {
        let base = self
            .config
            .output_dir
            .as_deref()
            .or_else(|| dot_set.source_dir())
            .ok_or_else(|| {
                QalError::invalid("no output_dir configured and images have no source path")
            })?;
        persist::save_run(base, model, dot_set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dots::{GridShape, ImageWells, WellRecord};
    use approx::assert_relative_eq;

    /// 3x3 wells on a 20 px pitch in a 101x101 image; response falls off
    /// quadratically from the image centre.
    fn dot_set(n_images: usize, scale: Option<f64>) -> DotSet {
        let grid = GridShape::new(3, 3);
        let images = (0..n_images)
            .map(|k| {
                let id = format!("img{k}");
                let wells = (0..9)
                    .map(|i| {
                        let (row, col) = grid.position(i);
                        let x = 30.0 + 20.0 * col as f64;
                        let y = 30.0 + 20.0 * row as f64;
                        let r2 = (x - 50.0).powi(2) + (y - 50.0).powi(2);
                        let v = 1000.0 - 0.1 * r2 + 10.0 * k as f64;
                        WellRecord {
                            index: i,
                            row,
                            col,
                            centroid: [x, y],
                            radius_px: 5.0,
                            mean_intensity: v + 100.0,
                            peak_intensity: v + 150.0,
                            area_px: 78,
                            image_id: id.clone(),
                        }
                    })
                    .collect();
                ImageWells {
                    image_id: id,
                    source_path: None,
                    mm_per_px: scale,
                    background: 100.0,
                    grid_angle_deg: 0.0,
                    pitch_px: [20.0, 20.0],
                    wells,
                }
            })
            .collect();
        DotSet {
            image_size: [101, 101],
            grid,
            images,
        }
    }

    #[test]
    fn normalized_map_peaks_at_one() {
        let model = UniformityAnalyzer::default()
            .generate_surface(&dot_set(2, Some(0.1)))
            .unwrap();
        let max = model.grid.values.iter().copied().fold(f64::MIN, f64::max);
        assert_relative_eq!(max, 1.0, epsilon = 1e-12);
        assert_eq!(model.grid.width(), 64);
        assert_eq!(model.grid.height(), 64);
        assert_relative_eq!(model.extent_mm[0], 10.0, epsilon = 1e-12);
        // Mean aggregation of 1000 and 1010 at the centre, background removed.
        assert_relative_eq!(model.wells[4].response, 1005.0, epsilon = 1e-9);
        assert_relative_eq!(model.fit.r_squared, 1.0, epsilon = 1e-9);
        assert!(model.fit.rms_residual < 1e-6);
        // The true maximum lies between grid samples.
        let centre = model.evaluate(5.0, 5.0);
        assert!(centre >= 1.0);
        assert_relative_eq!(centre, 1.0, epsilon = 1e-3);
        assert!(model.stats.min < 1.0 && model.stats.min > 0.0);
        assert!(model.stats.cv > 0.0);
        assert!(!model.pixel_units);
    }

    #[test]
    fn aggregation_and_intensity_choice() {
        let analyzer = UniformityAnalyzer::new(UniformityConfig {
            aggregation: Aggregation::Max,
            intensity: WellIntensity::Peak,
            subtract_background: false,
            ..Default::default()
        })
        .unwrap();
        let model = analyzer.generate_surface(&dot_set(3, None)).unwrap();
        assert_relative_eq!(model.wells[4].response, 1000.0 + 20.0 + 150.0, epsilon = 1e-9);
        assert!(model.pixel_units);
        assert_eq!(model.mm_per_px, 1.0);
    }

    #[test]
    fn too_few_wells_is_invalid_input() {
        let mut set = dot_set(1, None);
        set.grid = GridShape::new(1, 4);
        for img in &mut set.images {
            img.wells.truncate(4);
        }
        let err = UniformityAnalyzer::default().generate_surface(&set).unwrap_err();
        assert!(matches!(err, QalError::InvalidInput(_)));
    }

    #[test]
    fn non_positive_surface_is_fit_error() {
        let mut set = dot_set(1, None);
        for w in &mut set.images[0].wells {
            w.mean_intensity = 50.0;
        }
        let err = UniformityAnalyzer::default().generate_surface(&set).unwrap_err();
        assert!(matches!(err, QalError::Fit(_)));
    }

    #[test]
    fn run_without_save_touches_nothing() {
        let out = UniformityAnalyzer::default().run(&dot_set(1, None)).unwrap();
        assert!(out.saved.is_none());
    }

    #[test]
    fn save_failure_keeps_model() {
        let analyzer = UniformityAnalyzer::new(UniformityConfig {
            save_output: true,
            ..Default::default()
        })
        .unwrap();
        let out = analyzer.run(&dot_set(1, None)).unwrap();
        assert!(out.save_error().is_some());
        assert_eq!(out.model.wells.len(), 9);
    }

    #[test]
    fn saved_snapshot_reloads() {
        let base = std::env::temp_dir().join(format!("phantomqa-uniformity-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&base);
        let analyzer = UniformityAnalyzer::new(UniformityConfig {
            save_output: true,
            output_dir: Some(base.clone()),
            ..Default::default()
        })
        .unwrap();
        let set = dot_set(2, Some(0.05));
        let out = analyzer.run(&set).unwrap();
        let saved = out.saved_to().unwrap();
        assert_eq!(saved.run_dir, base.join(OUTPUT_SUBDIR).join("run-001"));
        assert!(saved.map_png.is_file());

        let snapshot = UniformitySnapshot::from_json_file(&saved.model_json).unwrap();
        assert_eq!(snapshot.schema_version, SNAPSHOT_SCHEMA_V1);
        assert_eq!(snapshot.dot_set, set);
        assert_relative_eq!(
            snapshot.model.evaluate(2.0, 3.0),
            out.model.evaluate(2.0, 3.0),
            epsilon = 1e-9
        );

        let second = analyzer.run(&set).unwrap();
        assert_eq!(
            second.saved_to().unwrap().run_dir,
            base.join(OUTPUT_SUBDIR).join("run-002")
        );
        std::fs::remove_dir_all(&base).unwrap();
    }

    #[test]
    fn repeated_fit_is_identical() {
        let set = dot_set(2, Some(0.1));
        let analyzer = UniformityAnalyzer::default();
        assert_eq!(
            analyzer.generate_surface(&set).unwrap(),
            analyzer.generate_surface(&set).unwrap()
        );
    }
}
