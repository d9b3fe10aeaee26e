//! Input image representation.
//!
//! [`PhantomImage`] is the seam between the ingestion adapter (whatever loads
//! pixels from disk or a camera) and the analysis core. Samples are stored as
//! `f32` in the source's native count range so that 8-bit and 16-bit inputs
//! keep their full precision.

use std::path::PathBuf;

use image::{DynamicImage, GrayImage, ImageBuffer, Luma};

use crate::error::{QalError, Result};

/// Single-channel floating-point intensity grid.
pub type IntensityMap = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Acquisition metadata carried alongside the pixels.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ImageMeta {
    /// Identifier used in results and error messages (typically the file name).
    pub id: String,
    /// Bit depth of the original samples.
    pub bit_depth: u8,
    /// Physical pixel pitch in millimetres, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mm_per_px: Option<f64>,
    /// Depth / z-position tag in millimetres, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth_mm: Option<f64>,
    /// File the pixels were read from, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,
}

impl ImageMeta {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            bit_depth: 8,
            ..Default::default()
        }
    }

    pub fn with_scale(mut self, mm_per_px: f64) -> Self {
        self.mm_per_px = Some(mm_per_px);
        self
    }

    pub fn with_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_path = Some(path.into());
        self
    }
}

/// Immutable intensity image plus metadata.
#[derive(Debug, Clone)]
pub struct PhantomImage {
    pixels: IntensityMap,
    meta: ImageMeta,
}

impl PhantomImage {
    /// Wrap an existing intensity map.
    pub fn new(pixels: IntensityMap, meta: ImageMeta) -> Self {
        Self { pixels, meta }
    }

    /// Build from a row-major sample vector.
    pub fn from_vec(width: u32, height: u32, data: Vec<f32>, meta: ImageMeta) -> Result<Self> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(QalError::invalid(format!(
                "image '{}': {} samples supplied for {}x{} pixels",
                meta.id,
                data.len(),
                width,
                height
            )));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(QalError::invalid(format!(
                "image '{}' contains non-finite samples",
                meta.id
            )));
        }
        let pixels = ImageBuffer::from_raw(width, height, data)
            .ok_or_else(|| QalError::invalid("sample buffer does not match dimensions"))?;
        Ok(Self { pixels, meta })
    }

    pub fn from_gray8(gray: &GrayImage, mut meta: ImageMeta) -> Self {
        meta.bit_depth = 8;
        let pixels = ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
            Luma([gray.get_pixel(x, y)[0] as f32])
        });
        Self { pixels, meta }
    }

    pub fn from_gray16(gray: &ImageBuffer<Luma<u16>, Vec<u16>>, mut meta: ImageMeta) -> Self {
        meta.bit_depth = 16;
        let pixels = ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
            Luma([gray.get_pixel(x, y)[0] as f32])
        });
        Self { pixels, meta }
    }

    /// Convert a decoded image of any layout.
    ///
    /// 8- and 16-bit grayscale keep their counts; every other layout
    /// (colour, alpha, float) is reduced to 16-bit luminance.
    pub fn from_dynamic(img: &DynamicImage, meta: ImageMeta) -> Self {
        match img {
            DynamicImage::ImageLuma8(g) => Self::from_gray8(g, meta),
            DynamicImage::ImageLuma16(g) => Self::from_gray16(g, meta),
            other => Self::from_gray16(&other.to_luma16(), meta),
        }
    }

    pub fn pixels(&self) -> &IntensityMap {
        &self.pixels
    }

    pub fn meta(&self) -> &ImageMeta {
        &self.meta
    }

    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Sample at integer pixel coordinates.
    #[inline]
    pub fn at(&self, x: u32, y: u32) -> f32 {
        self.pixels.get_pixel(x, y)[0]
    }

    /// Largest sample value.
    pub fn max_value(&self) -> f32 {
        self.pixels
            .as_raw()
            .iter()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max)
    }
}

/// Bilinear sample of an intensity map; `None` outside `[0, w-1] x [0, h-1]`.
pub(crate) fn sample_bilinear(img: &IntensityMap, x: f64, y: f64) -> Option<f32> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return None;
    }
    let max_x = (w - 1) as f64;
    let max_y = (h - 1) as f64;
    const EPS: f64 = 1e-9;
    if x < -EPS || y < -EPS || x > max_x + EPS || y > max_y + EPS {
        return None;
    }
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = (x - x0 as f64) as f32;
    let fy = (y - y0 as f64) as f32;
    let p = |xx: u32, yy: u32| img.get_pixel(xx, yy)[0];
    let top = p(x0, y0) * (1.0 - fx) + p(x1, y0) * fx;
    let bottom = p(x0, y1) * (1.0 - fx) + p(x1, y1) * fx;
    Some(top * (1.0 - fy) + bottom * fy)
}
