//! Assigning detected wells to grid rows and columns.
//!
//! The lattice angle comes from nearest-neighbour directions folded onto a
//! quarter turn (4θ circular mean). Centroids are de-rotated about their mean,
//! cut into row bands by y and ordered by x within each band.

use super::config::GridShape;
use crate::error::{QalError, Result};

/// Grid assignment for one image.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct GridIndex {
    /// `order[i]` is the input point at grid index `i` (row-major).
    pub order: Vec<usize>,
    /// Lattice rotation in radians, in `(-pi/4, pi/4]`.
    pub angle_rad: f64,
    /// Mean column and row spacing `[col, row]` (pixels); 0 when the grid has
    /// a single column or row.
    pub pitch: [f64; 2],
}

/// Smallest positive spacing of a `[col, row]` pitch, used to scale
/// geometric tolerances.
pub(crate) fn unit_pitch(pitch: [f64; 2]) -> f64 {
    match pitch {
        [c, r] if c > 0.0 && r > 0.0 => c.min(r),
        [c, r] => c.max(r),
    }
}

pub(crate) fn index_grid(points: &[[f64; 2]], shape: GridShape) -> Result<GridIndex> {
    let expected = shape.count();
    if points.len() != expected {
        return Err(QalError::DetectionFailed(format!(
            "found {} wells, expected {}x{} = {}",
            points.len(),
            shape.rows,
            shape.cols,
            expected
        )));
    }
    if expected == 1 {
        return Ok(GridIndex {
            order: vec![0],
            angle_rad: 0.0,
            pitch: [0.0, 0.0],
        });
    }

    let angle_rad = lattice_angle(points);
    let center = mean_point(points);
    let (s, c) = (-angle_rad).sin_cos();
    let local: Vec<[f64; 2]> = points
        .iter()
        .map(|p| {
            let dx = p[0] - center[0];
            let dy = p[1] - center[1];
            [c * dx - s * dy, s * dx + c * dy]
        })
        .collect();

    let mut by_y: Vec<usize> = (0..local.len()).collect();
    by_y.sort_by(|&a, &b| local[a][1].total_cmp(&local[b][1]));

    let mut order = Vec::with_capacity(expected);
    for band in by_y.chunks(shape.cols) {
        let mut band = band.to_vec();
        band.sort_by(|&a, &b| local[a][0].total_cmp(&local[b][0]));
        order.extend(band);
    }

    let row_pitch = check_bands(&local, &order, shape, 1, "row")?;
    let col_pitch = check_bands(&local, &order, shape, 0, "column")?;
    Ok(GridIndex {
        order,
        angle_rad,
        pitch: [col_pitch, row_pitch],
    })
}

/// Band spreads along `axis` must stay under half the band pitch.
///
/// `axis == 1` checks rows (bands of `cols` consecutive indices), `axis == 0`
/// checks columns. Returns the mean band pitch.
fn check_bands(
    local: &[[f64; 2]],
    order: &[usize],
    shape: GridShape,
    axis: usize,
    what: &str,
) -> Result<f64> {
    let (n_bands, band_len) = if axis == 1 {
        (shape.rows, shape.cols)
    } else {
        (shape.cols, shape.rows)
    };
    if n_bands < 2 {
        return Ok(0.0);
    }
    let member = |band: usize, k: usize| {
        let idx = if axis == 1 {
            band * shape.cols + k
        } else {
            k * shape.cols + band
        };
        local[order[idx]][axis]
    };

    let mut means = Vec::with_capacity(n_bands);
    let mut spreads = Vec::with_capacity(n_bands);
    for band in 0..n_bands {
        let (lo, hi, sum) = (0..band_len).map(|k| member(band, k)).fold(
            (f64::INFINITY, f64::NEG_INFINITY, 0.0),
            |(lo, hi, sum), v| (lo.min(v), hi.max(v), sum + v),
        );
        means.push(sum / band_len as f64);
        spreads.push(hi - lo);
    }
    let pitch = (means[n_bands - 1] - means[0]) / (n_bands - 1) as f64;
    if !(pitch > 0.0) {
        return Err(QalError::DetectionFailed(format!(
            "{what} bands are not separated"
        )));
    }
    if let Some((band, spread)) = spreads
        .iter()
        .enumerate()
        .find(|(_, s)| **s >= 0.5 * pitch)
    {
        return Err(QalError::DetectionFailed(format!(
            "{what} {band} spreads {spread:.1} px, more than half the {pitch:.1} px pitch"
        )));
    }
    Ok(pitch)
}

fn mean_point(points: &[[f64; 2]]) -> [f64; 2] {
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p[0], sy + p[1]));
    [sx / n, sy / n]
}

/// Dominant lattice direction, folded into `(-pi/4, pi/4]`.
fn lattice_angle(points: &[[f64; 2]]) -> f64 {
    let (mut sc, mut ss) = (0.0f64, 0.0f64);
    for (i, p) in points.iter().enumerate() {
        let nearest = points
            .iter()
            .enumerate()
            .filter(|&(j, _)| j != i)
            .map(|(_, q)| [q[0] - p[0], q[1] - p[1]])
            .min_by(|a, b| a[0].hypot(a[1]).total_cmp(&b[0].hypot(b[1])));
        if let Some(v) = nearest {
            let theta = v[1].atan2(v[0]);
            sc += (4.0 * theta).cos();
            ss += (4.0 * theta).sin();
        }
    }
    if sc.hypot(ss) < 1e-9 {
        return 0.0;
    }
    0.25 * ss.atan2(sc)
}
