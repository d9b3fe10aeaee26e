//! Depth-phantom cropper.
//!
//! Segments the bright channel of a depth-resolution phantom, orients it so
//! that crop rows run from the shallow to the deep end, and resamples it into
//! a [`Roi`] whose columns cross the channel.

mod config;
mod crop;
mod frame;

pub use config::{CropConfig, DepthOrientation, PhantomGeometry};
pub use frame::{PixelRect, Roi, RoiFrame, ScaleSource};

use crate::error::Result;
use crate::input::PhantomImage;

/// Locates and crops the imaging channel of a depth phantom.
///
/// Construct once with a validated [`CropConfig`], crop many images.
#[derive(Debug, Clone, Default)]
pub struct PhantomCropper {
    config: CropConfig,
}

impl PhantomCropper {
    /// Create a cropper; fails with `InvalidInput` if the configuration is
    /// out of range.
    pub fn new(config: CropConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &CropConfig {
        &self.config
    }

    /// Crop the depth-phantom channel from one image.
    pub fn crop(&self, image: &PhantomImage) -> Result<Roi> {
        crop::crop_depth_phantom(image, &self.config)
    }
}
