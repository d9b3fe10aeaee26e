use crate::error::{QalError, Result};
use crate::segment::ThresholdMethod;

/// Which end of the channel is the shallow one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthOrientation {
    /// The brighter end of the segmented channel is shallow.
    #[default]
    Auto,
    /// Depth increases along +x / +y of the source image.
    Forward,
    /// Depth increases along -x / -y of the source image.
    Reverse,
}

/// Physical description of the depth phantom.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PhantomGeometry {
    /// Depth below the surface at the shallow and deep channel ends (mm).
    pub depth_range_mm: [f64; 2],
    /// Length of the imaged channel (mm). Used to derive the pixel scale when
    /// the image carries none, and to fix the crop length when it does.
    pub channel_length_mm: Option<f64>,
}

impl Default for PhantomGeometry {
    fn default() -> Self {
        Self {
            depth_range_mm: [0.5, 6.5],
            channel_length_mm: None,
        }
    }
}

/// Phantom cropper configuration.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CropConfig {
    /// Images with either side shorter than this are rejected.
    pub min_image_side_px: u32,
    /// Gaussian sigma applied before thresholding (pixels).
    pub blur_sigma: f32,
    /// Foreground threshold.
    pub threshold: ThresholdMethod,
    /// Minimum candidate area as a fraction of the image area.
    pub min_area_frac: f64,
    /// Minimum major/minor axis ratio for a channel candidate.
    pub min_elongation: f64,
    /// A runner-up candidate at least this fraction of the winner's area makes
    /// the channel ambiguous.
    pub ambiguity_ratio: f64,
    /// Channel axes within this many degrees of an image axis are snapped to it.
    pub axis_snap_deg: f64,
    /// Cross-channel padding on each side, in channel widths.
    pub cross_padding: f64,
    /// The deep end is extended past the segmented region while the mean
    /// cross-channel signal stays above this fraction of the channel peak.
    pub extension_fraction: f64,
    pub orientation: DepthOrientation,
    pub geometry: PhantomGeometry,
}

impl Default for CropConfig {
    fn default() -> Self {
        Self {
            min_image_side_px: 16,
            blur_sigma: 2.0,
            threshold: ThresholdMethod::Otsu,
            min_area_frac: 0.002,
            min_elongation: 2.0,
            ambiguity_ratio: 0.6,
            axis_snap_deg: 2.0,
            cross_padding: 1.5,
            extension_fraction: 0.01,
            orientation: DepthOrientation::Auto,
            geometry: PhantomGeometry::default(),
        }
    }
}

impl CropConfig {
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(QalError::invalid(format!("crop config: {msg}")));
        if self.min_image_side_px < 4 {
            return fail(format!(
                "min_image_side_px must be >= 4, got {}",
                self.min_image_side_px
            ));
        }
        if !(self.blur_sigma >= 0.0) {
            return fail(format!("blur_sigma must be >= 0, got {}", self.blur_sigma));
        }
        self.threshold.validate().or_else(fail)?;
        if !(self.min_area_frac > 0.0 && self.min_area_frac < 1.0) {
            return fail(format!("min_area_frac must lie in (0, 1), got {}", self.min_area_frac));
        }
        if !(self.min_elongation >= 1.0) {
            return fail(format!("min_elongation must be >= 1, got {}", self.min_elongation));
        }
        if !(self.ambiguity_ratio > 0.0 && self.ambiguity_ratio <= 1.0) {
            return fail(format!(
                "ambiguity_ratio must lie in (0, 1], got {}",
                self.ambiguity_ratio
            ));
        }
        if !(0.0..45.0).contains(&self.axis_snap_deg) {
            return fail(format!("axis_snap_deg must lie in [0, 45), got {}", self.axis_snap_deg));
        }
        if !(self.cross_padding >= 0.0 && self.cross_padding.is_finite()) {
            return fail(format!("cross_padding must be >= 0, got {}", self.cross_padding));
        }
        if !(0.0..1.0).contains(&self.extension_fraction) {
            return fail(format!(
                "extension_fraction must lie in [0, 1), got {}",
                self.extension_fraction
            ));
        }
        let [d0, d1] = self.geometry.depth_range_mm;
        if !(d0.is_finite() && d1.is_finite() && d0 >= 0.0 && d1 > d0) {
            return fail(format!("depth_range_mm must be increasing and >= 0, got [{d0}, {d1}]"));
        }
        if let Some(len) = self.geometry.channel_length_mm {
            if !(len > 0.0 && len.is_finite()) {
                return fail(format!("channel_length_mm must be positive, got {len}"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(CropConfig::default().validate().is_ok());
    }

    #[test]
    fn inverted_depth_range_rejected() {
        let mut cfg = CropConfig::default();
        cfg.geometry.depth_range_mm = [6.0, 1.0];
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("depth_range_mm"));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: CropConfig =
            serde_json::from_str(r#"{ "blur_sigma": 1.0, "orientation": "reverse" }"#).unwrap();
        assert_eq!(cfg.blur_sigma, 1.0);
        assert_eq!(cfg.orientation, DepthOrientation::Reverse);
        assert_eq!(cfg.cross_padding, CropConfig::default().cross_padding);
    }
}
