//! Well-grid detection for reference-uniformity phantoms.
//!
//! Every image of a batch must share one size. Each image is scanned for
//! compact bright wells, which are then indexed row-major on the grid so that
//! well `i` is the same physical well in every image. Per-image failures are
//! collected and reported together.

mod blobs;
mod config;
mod dot_set;
mod grid;

pub use config::{DotGridConfig, GridShape};
pub use dot_set::{DotSet, ImageWells, WellRecord};

use crate::error::{QalError, Result, Unit, UnitFailure};
use crate::input::PhantomImage;

/// Detects the well grid in a batch of images.
#[derive(Debug, Clone, Default)]
pub struct DotGridDetector {
    config: DotGridConfig,
}

impl DotGridDetector {
    pub fn new(config: DotGridConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DotGridConfig {
        &self.config
    }

    /// Detect and index the well grid in every image.
    ///
    /// Fails with `InvalidInput` before any detection when the batch is empty
    /// or image sizes differ. Otherwise every image is processed, and any
    /// per-image failures are returned together as `Batch`.
    pub fn detect(&self, images: &[PhantomImage]) -> Result<DotSet> {
        let (w, h) = check_dimensions(images)?;
        tracing::info!(images = images.len(), width = w, height = h, "dot-grid detection");

        let outcomes = crate::parallel::map_ordered(images, |img| self.detect_one(img));

        let mut detected = Vec::with_capacity(images.len());
        let mut failures = Vec::new();
        for (img, outcome) in images.iter().zip(outcomes) {
            match outcome {
                Ok(wells) => detected.push(wells),
                Err(err) => {
                    tracing::warn!(image = img.id(), error = %err, "well grid not detected");
                    failures.push(UnitFailure::new(Unit::Image(img.id().to_string()), err));
                }
            }
        }

        let reference = detected.first().cloned();
        if let Some(reference) = reference {
            let tolerance = self.config.geometry_tolerance;
            detected.retain(|wells| match check_geometry(&reference, wells, tolerance) {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!(image = %wells.image_id, error = %err, "inconsistent grid geometry");
                    failures.push(UnitFailure::new(Unit::Image(wells.image_id.clone()), err));
                    false
                }
            });
        }

        if !failures.is_empty() {
            failures.sort_by_key(|f| match &f.unit {
                Unit::Image(id) => images.iter().position(|img| img.id() == id.as_str()),
                _ => None,
            });
            return Err(QalError::Batch {
                total: images.len(),
                failures,
            });
        }

        tracing::info!(
            images = detected.len(),
            wells = self.config.grid.count(),
            "dot-grid detection complete"
        );
        Ok(DotSet {
            image_size: [w, h],
            grid: self.config.grid,
            images: detected,
        })
    }

    fn detect_one(&self, image: &PhantomImage) -> Result<ImageWells> {
        let scan = blobs::scan_wells(image, &self.config);
        let centroids: Vec<[f64; 2]> = scan.blobs.iter().map(|b| b.centroid).collect();
        let index = grid::index_grid(&centroids, self.config.grid)?;
        let shape = self.config.grid;

        let wells = index
            .order
            .iter()
            .enumerate()
            .map(|(i, &src)| {
                let b = &scan.blobs[src];
                let (row, col) = shape.position(i);
                WellRecord {
                    index: i,
                    row,
                    col,
                    centroid: b.centroid,
                    radius_px: b.radius_px,
                    mean_intensity: b.mean_intensity,
                    peak_intensity: b.peak_intensity,
                    area_px: b.area_px,
                    image_id: image.id().to_string(),
                }
            })
            .collect();

        tracing::debug!(
            image = image.id(),
            angle_deg = index.angle_rad.to_degrees(),
            pitch_px = ?index.pitch,
            rejected = scan.rejected,
            "grid indexed"
        );
        Ok(ImageWells {
            image_id: image.id().to_string(),
            source_path: image.meta().source_path.clone(),
            mm_per_px: image.meta().mm_per_px,
            background: scan.background,
            grid_angle_deg: index.angle_rad.to_degrees(),
            pitch_px: index.pitch,
            wells,
        })
    }
}

fn check_dimensions(images: &[PhantomImage]) -> Result<(u32, u32)> {
    let first = images
        .first()
        .ok_or_else(|| QalError::invalid("dot-grid detection needs at least one image"))?;
    let dims = first.dimensions();
    let mismatched: Vec<String> = images
        .iter()
        .filter(|img| img.dimensions() != dims)
        .map(|img| {
            let (w, h) = img.dimensions();
            format!("'{}' is {w}x{h}", img.id())
        })
        .collect();
    if !mismatched.is_empty() {
        return Err(QalError::invalid(format!(
            "image dimensions differ from '{}' ({}x{}): {}",
            first.id(),
            dims.0,
            dims.1,
            mismatched.join(", ")
        )));
    }
    Ok(dims)
}

/// Offsets of each well from the grid centroid must match the reference.
fn check_geometry(reference: &ImageWells, wells: &ImageWells, tolerance: f64) -> Result<()> {
    let offsets = |w: &ImageWells| {
        let n = w.wells.len().max(1) as f64;
        let (sx, sy) = w
            .wells
            .iter()
            .fold((0.0, 0.0), |(sx, sy), r| (sx + r.centroid[0], sy + r.centroid[1]));
        let (mx, my) = (sx / n, sy / n);
        w.wells
            .iter()
            .map(|r| [r.centroid[0] - mx, r.centroid[1] - my])
            .collect::<Vec<_>>()
    };
    let pitch = grid::unit_pitch(reference.pitch_px);
    if !(pitch > 0.0) {
        return Ok(());
    }
    let limit = tolerance * pitch;
    for (i, (a, b)) in offsets(reference).iter().zip(offsets(wells)).enumerate() {
        let dev = (a[0] - b[0]).hypot(a[1] - b[1]);
        if dev > limit {
            return Err(QalError::DetectionFailed(format!(
                "well #{i} sits {dev:.1} px from its position in '{}' (limit {limit:.1} px)",
                reference.image_id
            )));
        }
    }
    Ok(())
}
