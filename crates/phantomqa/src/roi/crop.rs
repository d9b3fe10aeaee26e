//! Channel segmentation and resampling into a depth-aligned crop.

use crate::error::{QalError, Result};
use crate::input::{sample_bilinear, IntensityMap, PhantomImage};
use crate::segment::{self, Component};

use super::config::{CropConfig, DepthOrientation};
use super::frame::{PixelRect, Roi, RoiFrame, ScaleSource};

const BOUNDS_EPS: f64 = 1e-9;

/// Locate the depth-phantom channel in `image` and resample it into a crop
/// whose rows follow depth (shallow first) and columns cross the channel.
pub(crate) fn crop_depth_phantom(image: &PhantomImage, config: &CropConfig) -> Result<Roi> {
    let (w, h) = image.dimensions();
    if w < config.min_image_side_px || h < config.min_image_side_px {
        return Err(QalError::invalid(format!(
            "image '{}' is {}x{}; both sides must be at least {} px",
            image.id(),
            w,
            h,
            config.min_image_side_px
        )));
    }

    let smoothed = segment::smooth(image.pixels(), config.blur_sigma);
    let normalized = segment::normalize_u8(&smoothed);
    let (mask, level) = segment::binarize(&normalized, config.threshold);
    let comps = segment::components(&mask, &smoothed);
    let not_found = |msg: String| QalError::RoiNotFound(format!("image '{}': {msg}", image.id()));
    let channel = select_channel(&comps, w, h, config).map_err(not_found)?;
    tracing::debug!(
        "channel candidate: area={} elongation={:.2} threshold={}",
        channel.area,
        channel.elongation(),
        level
    );

    let (axis, snapped) = principal_axis(channel.orientation(), config.axis_snap_deg);
    let anchor = if snapped {
        [channel.centroid[0].round(), channel.centroid[1].round()]
    } else {
        channel.centroid
    };

    let reverse = match config.orientation {
        DepthOrientation::Forward => false,
        DepthOrientation::Reverse => true,
        DepthOrientation::Auto => deep_end_is_brighter(channel, image, anchor, axis),
    };
    let depth_axis = if reverse { [-axis[0], -axis[1]] } else { axis };
    let cross_axis = perpendicular(depth_axis);
    let project = |x: f64, y: f64| {
        let d = [x - anchor[0], y - anchor[1]];
        (dot(d, depth_axis), dot(d, cross_axis))
    };

    // Channel extent and intensity-weighted centre line in (s, t) coordinates.
    let mut s_range = [f64::INFINITY, f64::NEG_INFINITY];
    let mut t_range = [f64::INFINITY, f64::NEG_INFINITY];
    let floor = channel
        .pixels
        .iter()
        .map(|&[x, y]| smoothed.get_pixel(x, y)[0])
        .fold(f32::INFINITY, f32::min);
    let mut peak = f32::NEG_INFINITY;
    let (mut wt, mut wsum) = (0.0f64, 0.0f64);
    for &[x, y] in &channel.pixels {
        let (s, t) = project(x as f64, y as f64);
        s_range = [s_range[0].min(s), s_range[1].max(s)];
        t_range = [t_range[0].min(t), t_range[1].max(t)];
        let v = smoothed.get_pixel(x, y)[0];
        peak = peak.max(v);
        let wgt = (v - floor) as f64;
        wt += wgt * t;
        wsum += wgt;
    }
    let t_center = if wsum > 0.0 {
        wt / wsum
    } else {
        0.5 * (t_range[0] + t_range[1])
    };

    let t_ch = [t_range[0].floor() as i64, t_range[1].ceil() as i64];
    let s0 = s_range[0].floor() as i64;
    let meta_scale = image
        .meta()
        .mm_per_px
        .filter(|v| v.is_finite() && *v > 0.0);
    let s1 = match (meta_scale, config.geometry.channel_length_mm) {
        (Some(mm_per_px), Some(len_mm)) => s0 + (len_mm / mm_per_px).round() as i64,
        _ => {
            let mut background: Vec<f32> = smoothed
                .as_raw()
                .iter()
                .zip(mask.as_raw())
                .filter(|(_, m)| **m == 0)
                .map(|(&v, _)| v)
                .collect();
            let bg = segment::median(&mut background).unwrap_or(floor);
            let limit = bg + config.extension_fraction as f32 * (peak - bg);
            let sampler = AxisSampler {
                img: &smoothed,
                anchor,
                depth_axis,
                cross_axis,
            };
            let s_seg = s_range[1].ceil() as i64;
            let s_ext = sampler.extend_while_above(s_seg, t_ch, limit);
            // The extension follows dim signal; the channel ends where the
            // signal halves against the rows just before it.
            let window = (t_ch[1] - t_ch[0] + 1).max(3);
            sampler.half_max_edge([(s_seg - window).max(s0), s_ext], t_ch, bg, window as usize)
        }
    };

    let width_px = (t_ch[1] - t_ch[0] + 1) as f64;
    let pad = (config.cross_padding * width_px).round() as i64;
    let bounds = CropBounds {
        s: [s0, s1],
        t: [t_ch[0] - pad, t_ch[1] + pad],
    };
    let frame_geom = AxisSampler {
        img: image.pixels(),
        anchor,
        depth_axis,
        cross_axis,
    };
    let bounds = frame_geom
        .clip(bounds, t_ch)
        .ok_or_else(|| not_found("channel does not fit inside the image".to_string()))?;
    let n_rows = (bounds.s[1] - bounds.s[0] + 1) as usize;
    let n_cols = (bounds.t[1] - bounds.t[0] + 1) as usize;
    if n_rows < 3 || n_cols < 3 {
        return Err(not_found(format!("crop of {n_rows}x{n_cols} samples is degenerate")));
    }

    let mut data = Vec::with_capacity(n_rows * n_cols);
    for s in bounds.s[0]..=bounds.s[1] {
        for t in bounds.t[0]..=bounds.t[1] {
            let [x, y] = frame_geom.point(s as f64, t as f64);
            let v = sample_bilinear(image.pixels(), x, y)
                .ok_or_else(|| not_found(format!("sample ({x:.2}, {y:.2}) left the image")))?;
            data.push(v);
        }
    }
    let pixels = IntensityMap::from_raw(n_cols as u32, n_rows as u32, data)
        .ok_or_else(|| not_found("crop buffer size mismatch".to_string()))?;

    let length_px = (n_rows - 1) as f64;
    let (mm_per_px, scale_source) = match (meta_scale, config.geometry.channel_length_mm) {
        (Some(mm), _) => (mm, ScaleSource::ImageMetadata),
        (None, Some(len_mm)) => (len_mm / length_px, ScaleSource::ChannelLength),
        (None, None) => (1.0, ScaleSource::Pixels),
    };

    let clamp_col = |t: i64| (t - bounds.t[0]).clamp(0, n_cols as i64 - 1) as usize;
    let frame = RoiFrame {
        origin_xy: frame_geom.point(bounds.s[0] as f64, bounds.t[0] as f64),
        depth_axis,
        cross_axis,
        mm_per_px,
        scale_source,
        depth_range_mm: config.geometry.depth_range_mm,
        n_rows,
        channel_cols: [clamp_col(t_ch[0]), clamp_col(t_ch[1])],
        channel_center_col: t_center - bounds.t[0] as f64,
    };
    let bbox = frame_geom.bounding_rect(bounds, w, h);

    tracing::info!(
        "cropped channel from '{}': {} depth rows x {} cross cols, bbox {}x{} at ({}, {}), {:.4} mm/px ({:?})",
        image.id(),
        n_rows,
        n_cols,
        bbox.width,
        bbox.height,
        bbox.x,
        bbox.y,
        mm_per_px,
        scale_source
    );

    Ok(Roi {
        source_id: image.id().to_string(),
        bbox,
        frame,
        pixels,
    })
}

/// Pick the largest elongated component, refusing ambiguous scenes.
fn select_channel<'a>(
    comps: &'a [Component],
    w: u32,
    h: u32,
    config: &CropConfig,
) -> std::result::Result<&'a Component, String> {
    let min_area = config.min_area_frac * w as f64 * h as f64;
    let mut candidates: Vec<&Component> = comps
        .iter()
        .filter(|c| c.area as f64 >= min_area && c.elongation() >= config.min_elongation)
        .collect();
    // Stable sort: equal areas keep label (raster) order.
    candidates.sort_by(|a, b| b.area.cmp(&a.area));

    let best = *candidates.first().ok_or_else(|| {
        format!(
            "no elongated bright region (of {} components) above {:.0} px",
            comps.len(),
            min_area
        )
    })?;
    if let Some(second) = candidates.get(1) {
        if second.area as f64 >= config.ambiguity_ratio * best.area as f64 {
            return Err(format!(
                "ambiguous channel: candidates of {} px and {} px are comparable",
                best.area, second.area
            ));
        }
    }
    Ok(best)
}

/// Unit vector of the major axis, snapped to an image axis when close.
fn principal_axis(angle: f64, snap_deg: f64) -> ([f64; 2], bool) {
    let snap = snap_deg.to_radians();
    if angle.abs() <= snap {
        return ([1.0, 0.0], true);
    }
    if (angle.abs() - std::f64::consts::FRAC_PI_2).abs() <= snap {
        return ([0.0, 1.0], true);
    }
    let u = [angle.cos(), angle.sin()];
    if u[0] < 0.0 {
        ([-u[0], -u[1]], false)
    } else {
        (u, false)
    }
}

/// Perpendicular unit vector whose dominant component is positive.
fn perpendicular(u: [f64; 2]) -> [f64; 2] {
    let v = [-u[1], u[0]];
    let dominant = if v[0].abs() >= v[1].abs() { v[0] } else { v[1] };
    if dominant < 0.0 {
        [-v[0], -v[1]]
    } else {
        v
    }
}

#[inline]
fn dot(a: [f64; 2], b: [f64; 2]) -> f64 {
    a[0] * b[0] + a[1] * b[1]
}

/// Compare mean raw intensity over the first and last tenth of the channel.
fn deep_end_is_brighter(
    channel: &Component,
    image: &PhantomImage,
    anchor: [f64; 2],
    axis: [f64; 2],
) -> bool {
    let proj: Vec<(f64, f32)> = channel
        .pixels
        .iter()
        .map(|&[x, y]| {
            let s = dot([x as f64 - anchor[0], y as f64 - anchor[1]], axis);
            (s, image.at(x, y))
        })
        .collect();
    let (lo, hi) = proj
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &(s, _)| {
            (lo.min(s), hi.max(s))
        });
    let band = (0.1 * (hi - lo)).max(1.0);
    let mean_where = |pred: &dyn Fn(f64) -> bool| {
        let (sum, n) = proj
            .iter()
            .filter(|(s, _)| pred(*s))
            .fold((0.0f64, 0usize), |(sum, n), &(_, v)| (sum + v as f64, n + 1));
        if n == 0 {
            0.0
        } else {
            sum / n as f64
        }
    };
    let start = mean_where(&|s| s <= lo + band);
    let end = mean_where(&|s| s >= hi - band);
    // Ties (uniform channels) keep the forward direction.
    end > start + 1e-6 * start.abs().max(end.abs())
}

#[derive(Debug, Clone, Copy)]
struct CropBounds {
    s: [i64; 2],
    t: [i64; 2],
}

/// Maps integer `(s, t)` crop coordinates to source positions.
struct AxisSampler<'a> {
    img: &'a IntensityMap,
    anchor: [f64; 2],
    depth_axis: [f64; 2],
    cross_axis: [f64; 2],
}

impl AxisSampler<'_> {
    fn point(&self, s: f64, t: f64) -> [f64; 2] {
        [
            self.anchor[0] + s * self.depth_axis[0] + t * self.cross_axis[0],
            self.anchor[1] + s * self.depth_axis[1] + t * self.cross_axis[1],
        ]
    }

    fn in_bounds(&self, s: i64, t: i64) -> bool {
        let [x, y] = self.point(s as f64, t as f64);
        let (w, h) = self.img.dimensions();
        x >= -BOUNDS_EPS
            && y >= -BOUNDS_EPS
            && x <= (w - 1) as f64 + BOUNDS_EPS
            && y <= (h - 1) as f64 + BOUNDS_EPS
    }

    /// Mean over the channel span of one crop row, `None` if it leaves the image.
    fn row_mean(&self, s: i64, t_span: [i64; 2]) -> Option<f32> {
        let mut sum = 0.0f64;
        for t in t_span[0]..=t_span[1] {
            let [x, y] = self.point(s as f64, t as f64);
            sum += sample_bilinear(self.img, x, y)? as f64;
        }
        Some((sum / (t_span[1] - t_span[0] + 1) as f64) as f32)
    }

    /// Step past `s_end` while the channel signal stays at or above `limit`.
    fn extend_while_above(&self, s_end: i64, t_span: [i64; 2], limit: f32) -> i64 {
        let mut s = s_end;
        while let Some(mean) = self.row_mean(s + 1, t_span) {
            if mean < limit {
                break;
            }
            s += 1;
        }
        s
    }

    /// Last row of `s_span` before the signal above `bg` drops under half of
    /// its maximum over the preceding `window` rows.
    fn half_max_edge(&self, s_span: [i64; 2], t_span: [i64; 2], bg: f32, window: usize) -> i64 {
        let signal: Vec<f32> = (s_span[0]..=s_span[1])
            .map(|s| self.row_mean(s, t_span).map_or(0.0, |m| m - bg))
            .collect();
        for i in 1..signal.len() {
            let level = signal[i.saturating_sub(window)..i]
                .iter()
                .copied()
                .fold(f32::NEG_INFINITY, f32::max);
            if level > 0.0 && signal[i] < 0.5 * level {
                return s_span[0] + i as i64 - 1;
            }
        }
        s_span[1]
    }

    /// Shrink bounds until every corner lies in the image, trimming cross
    /// padding before depth extent. `None` when nothing is left.
    fn clip(&self, mut b: CropBounds, t_channel: [i64; 2]) -> Option<CropBounds> {
        loop {
            if b.s[0] > b.s[1] || b.t[0] > b.t[1] {
                return None;
            }
            let corners = [(0, 0), (0, 1), (1, 0), (1, 1)];
            let Some(&(si, ti)) = corners
                .iter()
                .find(|&&(si, ti)| !self.in_bounds(b.s[si], b.t[ti]))
            else {
                return Some(b);
            };
            if ti == 0 && b.t[0] < t_channel[0] {
                b.t[0] += 1;
            } else if ti == 1 && b.t[1] > t_channel[1] {
                b.t[1] -= 1;
            } else if si == 0 {
                b.s[0] += 1;
            } else {
                b.s[1] -= 1;
            }
        }
    }

    fn bounding_rect(&self, b: CropBounds, w: u32, h: u32) -> PixelRect {
        let corners = [
            self.point(b.s[0] as f64, b.t[0] as f64),
            self.point(b.s[0] as f64, b.t[1] as f64),
            self.point(b.s[1] as f64, b.t[0] as f64),
            self.point(b.s[1] as f64, b.t[1] as f64),
        ];
        let (mut x0, mut y0, mut x1, mut y1) = (
            f64::INFINITY,
            f64::INFINITY,
            f64::NEG_INFINITY,
            f64::NEG_INFINITY,
        );
        for [x, y] in corners {
            x0 = x0.min(x);
            y0 = y0.min(y);
            x1 = x1.max(x);
            y1 = y1.max(y);
        }
        let clamp = |v: f64, max: u32| (v.max(0.0) as u32).min(max - 1);
        let (x0, y0) = (clamp(x0.floor(), w), clamp(y0.floor(), h));
        let (x1, y1) = (clamp(x1.ceil(), w), clamp(y1.ceil(), h));
        PixelRect {
            x: x0,
            y: y0,
            width: x1 - x0 + 1,
            height: y1 - y0 + 1,
        }
    }
}
