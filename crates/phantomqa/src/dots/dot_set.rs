use std::path::{Path, PathBuf};

use super::config::GridShape;

/// One detected well in one image.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WellRecord {
    /// Row-major grid index, stable across images.
    pub index: usize,
    pub row: usize,
    pub col: usize,
    /// Intensity-weighted centroid `[x, y]` (pixels).
    pub centroid: [f64; 2],
    /// Equivalent-area radius (pixels).
    pub radius_px: f64,
    /// Mean raw intensity inside the photometry aperture.
    pub mean_intensity: f64,
    /// Peak raw intensity inside the photometry aperture.
    pub peak_intensity: f64,
    pub area_px: usize,
    pub image_id: String,
}

/// Wells of one image, in grid-index order.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ImageWells {
    pub image_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,
    pub mm_per_px: Option<f64>,
    /// Median intensity outside every detected region.
    pub background: f64,
    /// Lattice rotation (degrees).
    pub grid_angle_deg: f64,
    /// Mean column and row spacing `[col, row]` (pixels).
    pub pitch_px: [f64; 2],
    pub wells: Vec<WellRecord>,
}

/// Per-image well lists sharing one grid layout and image size.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DotSet {
    /// Common `[width, height]` of every image.
    pub image_size: [u32; 2],
    pub grid: GridShape,
    pub images: Vec<ImageWells>,
}

impl DotSet {
    pub fn n_images(&self) -> usize {
        self.images.len()
    }

    pub fn n_wells(&self) -> usize {
        self.grid.count()
    }

    /// Records of well `index` in every image, in image order.
    pub fn well(&self, index: usize) -> Vec<&WellRecord> {
        self.images
            .iter()
            .filter_map(|img| img.wells.get(index))
            .collect()
    }

    /// First pixel scale recorded by any image.
    pub fn mm_per_px(&self) -> Option<f64> {
        self.images.iter().find_map(|img| img.mm_per_px)
    }

    /// Directory of the first image that came from disk.
    pub fn source_dir(&self) -> Option<&Path> {
        self.images
            .iter()
            .find_map(|img| img.source_path.as_deref())
            .and_then(Path::parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: usize, image: &str, x: f64) -> WellRecord {
        WellRecord {
            index,
            row: index / 2,
            col: index % 2,
            centroid: [x, 0.0],
            radius_px: 3.0,
            mean_intensity: 10.0,
            peak_intensity: 12.0,
            area_px: 28,
            image_id: image.into(),
        }
    }

    fn image(id: &str, path: Option<&str>, scale: Option<f64>) -> ImageWells {
        ImageWells {
            image_id: id.into(),
            source_path: path.map(PathBuf::from),
            mm_per_px: scale,
            background: 1.0,
            grid_angle_deg: 0.0,
            pitch_px: [10.0, 10.0],
            wells: (0..4).map(|i| record(i, id, i as f64)).collect(),
        }
    }

    #[test]
    fn well_accessor_spans_images() {
        let set = DotSet {
            image_size: [64, 64],
            grid: GridShape::new(2, 2),
            images: vec![image("a", None, None), image("b", Some("/data/run/b.png"), Some(0.1))],
        };
        let w = set.well(3);
        assert_eq!(w.len(), 2);
        assert_eq!(w[0].image_id, "a");
        assert_eq!(w[1].image_id, "b");
        assert!(set.well(4).is_empty());
        assert_eq!(set.mm_per_px(), Some(0.1));
        assert_eq!(set.source_dir(), Some(Path::new("/data/run")));
    }
}
