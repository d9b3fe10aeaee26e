//! Stage bundle driven by one configuration document.

use std::path::Path;

use crate::depth::{DepthAnalysis, DepthAnalyzer, DepthAnalyzerConfig};
use crate::dots::{DotGridConfig, DotGridDetector, DotSet};
use crate::error::Result;
use crate::input::PhantomImage;
use crate::roi::{CropConfig, PhantomCropper};
use crate::uniformity::{UniformityAnalyzer, UniformityConfig, UniformityOutput};

/// Configuration of every stage. Missing sections take their defaults.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub crop: CropConfig,
    pub depth: DepthAnalyzerConfig,
    pub dots: DotGridConfig,
    pub uniformity: UniformityConfig,
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }
}

/// Wells detected in a batch and the uniformity fit over them.
#[derive(Debug)]
pub struct UniformityRun {
    pub dot_set: DotSet,
    pub output: UniformityOutput,
}

/// All four stages, validated together.
#[derive(Debug, Clone)]
pub struct Pipeline {
    cropper: PhantomCropper,
    depth: DepthAnalyzer,
    detector: DotGridDetector,
    uniformity: UniformityAnalyzer,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        Ok(Self {
            cropper: PhantomCropper::new(config.crop)?,
            depth: DepthAnalyzer::new(config.depth)?,
            detector: DotGridDetector::new(config.dots)?,
            uniformity: UniformityAnalyzer::new(config.uniformity)?,
        })
    }

    pub fn cropper(&self) -> &PhantomCropper {
        &self.cropper
    }

    pub fn depth_analyzer(&self) -> &DepthAnalyzer {
        &self.depth
    }

    pub fn detector(&self) -> &DotGridDetector {
        &self.detector
    }

    pub fn uniformity_analyzer(&self) -> &UniformityAnalyzer {
        &self.uniformity
    }

    /// Crop the channel and profile the configured depths.
    pub fn depth_resolution(&self, image: &PhantomImage) -> Result<DepthAnalysis> {
        tracing::info!(image = image.id(), "depth-resolution analysis");
        let roi = self.cropper.crop(image)?;
        self.depth.analyze(&roi)
    }

    /// Detect the well grid in every image and fit the uniformity surface.
    pub fn uniformity(&self, images: &[PhantomImage]) -> Result<UniformityRun> {
        let dot_set = self.detector.detect(images)?;
        let output = self.uniformity.run(&dot_set)?;
        Ok(UniformityRun { dot_set, output })
    }
}
