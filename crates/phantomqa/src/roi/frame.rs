use crate::input::IntensityMap;

/// Axis-aligned pixel rectangle in source-image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    /// Whether the rectangle lies entirely inside a `width x height` image.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.x as u64 + self.width as u64 <= width as u64
            && self.y as u64 + self.height as u64 <= height as u64
    }
}

/// Where the ROI's millimetre scale came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleSource {
    /// Pixel pitch recorded in the image metadata.
    ImageMetadata,
    /// Configured channel length divided by the measured channel length.
    ChannelLength,
    /// No scale available; "millimetres" are pixels.
    Pixels,
}

/// Coordinate frame of a cropped depth-phantom channel.
///
/// Crop row `r`, column `c` maps to source pixel
/// `origin + r * depth_axis + c * cross_axis`. Row 0 is the shallow end.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RoiFrame {
    /// Source-image position of crop sample (row 0, column 0).
    pub origin_xy: [f64; 2],
    /// Unit vector along the channel, pointing from shallow to deep.
    pub depth_axis: [f64; 2],
    /// Unit vector across the channel.
    pub cross_axis: [f64; 2],
    /// Millimetres per crop sample (samples are one source pixel apart).
    pub mm_per_px: f64,
    pub scale_source: ScaleSource,
    /// Depth at the first and last crop row (mm).
    pub depth_range_mm: [f64; 2],
    /// Number of crop rows (depth samples).
    pub n_rows: usize,
    /// Inclusive column span of the segmented channel within the crop.
    pub channel_cols: [usize; 2],
    /// Intensity-weighted channel centre column (fractional).
    pub channel_center_col: f64,
}

impl RoiFrame {
    /// Depth (mm) of a fractional crop row.
    pub fn row_to_depth(&self, row: f64) -> f64 {
        let [d0, d1] = self.depth_range_mm;
        if self.n_rows < 2 {
            return d0;
        }
        d0 + row / (self.n_rows - 1) as f64 * (d1 - d0)
    }

    /// Fractional crop row of a depth, or `None` outside the valid range.
    pub fn depth_to_row(&self, depth_mm: f64) -> Option<f64> {
        let [d0, d1] = self.depth_range_mm;
        const EPS: f64 = 1e-9;
        if !depth_mm.is_finite() || depth_mm < d0 - EPS || depth_mm > d1 + EPS {
            return None;
        }
        if self.n_rows < 2 {
            return Some(0.0);
        }
        let row = (depth_mm - d0) / (d1 - d0) * (self.n_rows - 1) as f64;
        Some(row.clamp(0.0, (self.n_rows - 1) as f64))
    }

    /// Signed cross-channel position (mm) of a crop column, 0 at the centre.
    pub fn col_to_position_mm(&self, col: f64) -> f64 {
        (col - self.channel_center_col) * self.mm_per_px
    }

    /// Source-image coordinates of a crop sample.
    pub fn to_source(&self, row: f64, col: f64) -> [f64; 2] {
        [
            self.origin_xy[0] + row * self.depth_axis[0] + col * self.cross_axis[0],
            self.origin_xy[1] + row * self.depth_axis[1] + col * self.cross_axis[1],
        ]
    }
}

/// Cropped depth-phantom channel with its frame.
#[derive(Debug, Clone)]
pub struct Roi {
    pub(crate) source_id: String,
    pub(crate) bbox: PixelRect,
    pub(crate) frame: RoiFrame,
    pub(crate) pixels: IntensityMap,
}

impl Roi {
    /// Identifier of the image this ROI was cropped from.
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Source-image bounding box of every sampled position.
    pub fn bbox(&self) -> PixelRect {
        self.bbox
    }

    pub fn frame(&self) -> &RoiFrame {
        &self.frame
    }

    /// Cropped grid: rows follow depth, columns cross the channel.
    pub fn pixels(&self) -> &IntensityMap {
        &self.pixels
    }

    pub fn n_rows(&self) -> usize {
        self.pixels.height() as usize
    }

    pub fn n_cols(&self) -> usize {
        self.pixels.width() as usize
    }

    /// Samples of one crop row.
    pub fn row(&self, r: usize) -> &[f32] {
        let w = self.n_cols();
        &self.pixels.as_raw()[r * w..(r + 1) * w]
    }

    /// Valid depth range (mm).
    pub fn depth_range_mm(&self) -> [f64; 2] {
        self.frame.depth_range_mm
    }
}
