//! On-disk output of a uniformity run.
//!
//! Each run writes into its own `run-NNN` directory beneath
//! `<base>/Surface Representation/`. Directories are claimed with
//! `create_dir`, so two runs never share one.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use image::{ImageBuffer, Luma};

use super::model::{SurfaceModel, UniformityGrid};
use crate::dots::DotSet;
use crate::error::{QalError, Result};

pub const SNAPSHOT_SCHEMA_V1: &str = "phantomqa.uniformity.v1";
/// Subdirectory of the base directory holding all runs.
pub const OUTPUT_SUBDIR: &str = "Surface Representation";
pub const MODEL_FILE: &str = "surface_model.json";
pub const MAP_FILE: &str = "uniformity_map.png";

const MAX_RUNS: u32 = 9999;

/// Persisted model together with the wells it was fitted to.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct UniformitySnapshot {
    pub schema_version: String,
    pub model: SurfaceModel,
    pub dot_set: DotSet,
}

impl UniformitySnapshot {
    pub fn new(model: SurfaceModel, dot_set: DotSet) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_V1.to_string(),
            model,
            dot_set,
        }
    }

    /// Load a snapshot written by a previous run.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let snapshot: Self = serde_json::from_str(&text)?;
        if snapshot.schema_version != SNAPSHOT_SCHEMA_V1 {
            return Err(QalError::invalid(format!(
                "{}: unsupported snapshot schema '{}', expected '{SNAPSHOT_SCHEMA_V1}'",
                path.display(),
                snapshot.schema_version
            )));
        }
        Ok(snapshot)
    }

    pub fn write_json_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Files written by one run.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SavedArtifacts {
    pub run_dir: PathBuf,
    pub model_json: PathBuf,
    pub map_png: PathBuf,
}

pub(crate) fn save_run(base: &Path, model: &SurfaceModel, dot_set: &DotSet) -> Result<SavedArtifacts> {
    let run_dir = create_run_dir(&base.join(OUTPUT_SUBDIR))?;
    let model_json = run_dir.join(MODEL_FILE);
    let map_png = run_dir.join(MAP_FILE);

    UniformitySnapshot::new(model.clone(), dot_set.clone()).write_json_file(&model_json)?;
    map_raster(&model.grid).save(&map_png)?;

    tracing::info!(run_dir = %run_dir.display(), "uniformity output saved");
    Ok(SavedArtifacts {
        run_dir,
        model_json,
        map_png,
    })
}

/// Claim the next free `run-NNN` directory under `root`.
fn create_run_dir(root: &Path) -> Result<PathBuf> {
    fs::create_dir_all(root)?;
    for n in 1..=MAX_RUNS {
        let dir = root.join(format!("run-{n:03}"));
        match fs::create_dir(&dir) {
            Ok(()) => return Ok(dir),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(QalError::invalid(format!(
        "{}: all {MAX_RUNS} run directories are taken",
        root.display()
    )))
}

/// 16-bit grayscale map, full scale = normalized 1.0.
fn map_raster(grid: &UniformityGrid) -> ImageBuffer<Luma<u16>, Vec<u16>> {
    ImageBuffer::from_fn(grid.width() as u32, grid.height() as u32, |x, y| {
        let v = grid.at(x as usize, y as usize).clamp(0.0, 1.0);
        Luma([(v * u16::MAX as f64).round() as u16])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_directories_are_never_reused() {
        let root = std::env::temp_dir().join(format!("phantomqa-runs-{}", std::process::id()));
        let _ = fs::remove_dir_all(&root);
        let a = create_run_dir(&root).unwrap();
        let b = create_run_dir(&root).unwrap();
        assert_eq!(a.file_name().unwrap(), "run-001");
        assert_eq!(b.file_name().unwrap(), "run-002");
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn raster_spans_full_scale() {
        let grid = UniformityGrid {
            x_mm: vec![0.0, 1.0],
            y_mm: vec![0.0, 1.0],
            values: vec![1.0, 0.5, 0.0, -0.2],
        };
        let img = map_raster(&grid);
        assert_eq!(img.get_pixel(0, 0)[0], u16::MAX);
        assert_eq!(img.get_pixel(1, 0)[0], 32768);
        assert_eq!(img.get_pixel(0, 1)[0], 0);
        assert_eq!(img.get_pixel(1, 1)[0], 0);
    }
}
