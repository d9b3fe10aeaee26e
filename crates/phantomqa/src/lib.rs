//! phantomqa: quantitative analysis of fluorescence-imaging calibration
//! phantoms.
//!
//! Two measurement chains are provided:
//!
//! 1. **Depth resolution** – [`PhantomCropper`] locates the channel of a
//!    depth phantom and returns a [`Roi`]; [`DepthAnalyzer`] samples
//!    cross-channel [`Profile`]s at requested depths and measures FWHM and
//!    signal dropout.
//! 2. **Field uniformity** – [`DotGridDetector`] finds the well grid in a
//!    batch of equally sized images and returns a [`DotSet`];
//!    [`UniformityAnalyzer`] fits a normalized [`SurfaceModel`] over the field
//!    of view and can persist it.
//!
//! [`Pipeline`] bundles all four stages behind one JSON-loadable
//! [`PipelineConfig`]. Every component validates its configuration at
//! construction and is a pure function of its inputs; only
//! [`UniformityAnalyzer::run`] with `save_output` touches the filesystem.

mod depth;
mod dots;
mod error;
mod input;
mod parallel;
mod pipeline;
mod roi;
mod segment;
mod uniformity;

#[cfg(test)]
pub(crate) mod test_utils;

pub use depth::{
    fwhm, gaussian_smooth, is_dropout, linspace, BaselineMode, ChannelIntensity, DepthAnalysis,
    DepthAnalyzer, DepthAnalyzerConfig, Profile, ResolutionSummary, DEFAULT_DEPTH_COUNT,
    DEFAULT_DEPTH_SPAN_MM, DROPOUT_FRACTION,
};
pub use dots::{DotGridConfig, DotGridDetector, DotSet, GridShape, ImageWells, WellRecord};
pub use error::{ErrorKind, QalError, Result, Unit, UnitFailure};
pub use input::{ImageMeta, IntensityMap, PhantomImage};
pub use pipeline::{Pipeline, PipelineConfig, UniformityRun};
pub use roi::{
    CropConfig, DepthOrientation, PhantomCropper, PhantomGeometry, PixelRect, Roi, RoiFrame,
    ScaleSource,
};
pub use segment::ThresholdMethod;
pub use uniformity::{
    n_terms, Aggregation, FitQuality, PolynomialSurface, SavedArtifacts, SurfaceModel,
    UniformityAnalyzer, UniformityConfig, UniformityGrid, UniformityOutput, UniformitySnapshot,
    UniformityStats, WellIntensity, WellResponse, MAP_FILE, MAX_FIT_ORDER, MODEL_FILE,
    OUTPUT_SUBDIR, SNAPSHOT_SCHEMA_V1,
};
